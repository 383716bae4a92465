//! Processing pipeline: extraction, redaction and dual-channel clustering
//!
//! A `Pipeline` owns both clustering trees for the duration of a run. Each
//! line is extracted, redacted, then clustered once on the original message
//! and once on the anonymized message. Extraction cannot fail, redaction
//! degrades, and a clustering failure only marks that channel unclustered.

pub mod external;
mod record;

pub use external::{adopt, hand_off, to_tabular, write_tabular, ExternalRow, PromptParser, TabularRow};
pub use record::{OutputRow, ProcessedRecord};

use crate::clustering::{ChannelAssignment, ChannelTrees, ClusterChange, ClusterTree, TreeStats};
use crate::config::{Config, ConfigValidator, PipelineConfig};
use crate::error::Result;
use crate::parsing::{FieldExtractor, HeaderBook, ParsedFields, RawLine, StrategyKind};
use crate::patterns::PatternRegistry;
use crate::redaction::{EntityRecognizer, RedactionEngine, RedactionOutcome};
use crate::storage::StateStore;
use rayon::prelude::*;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub clusters: usize,
    /// Records assigned to a cluster during this run
    pub clustered: u64,
    /// Counters below accumulate over the tree's lifetime, including loaded state
    pub unclustered: u64,
    pub load_shed: u64,
    pub leaf_overflows: u64,
}

impl ChannelStats {
    fn from_tree(tree: &ClusterTree, clustered: u64) -> Self {
        let TreeStats {
            unclustered,
            load_shed,
            leaf_overflows,
        } = tree.stats();
        Self {
            clusters: tree.len(),
            clustered,
            unclustered,
            load_shed,
            leaf_overflows,
        }
    }
}

/// Run statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub total_records: u64,
    pub degraded_records: u64,
    pub truncated_lines: u64,
    pub strategy_counts: BTreeMap<StrategyKind, u64>,
    pub original: ChannelStats,
    pub anonymized: ChannelStats,
}

#[derive(Debug, Default)]
struct RunCounters {
    total_records: u64,
    degraded_records: u64,
    truncated_lines: u64,
    strategy_counts: BTreeMap<StrategyKind, u64>,
    original_clustered: u64,
    anonymized_clustered: u64,
}

/// A line after the stateless stages
struct Prepared {
    line: RawLine,
    fields: ParsedFields,
    redaction: RedactionOutcome,
    truncated: bool,
}

/// Extraction and redaction; shared by the sequential and parallel paths
struct Stages<'a> {
    extractor: &'a FieldExtractor,
    redaction: &'a RedactionEngine,
    max_line_length: usize,
}

impl Stages<'_> {
    fn prepare(&self, line: RawLine, headers: &HeaderBook) -> Prepared {
        let (fields, redaction, truncated) = {
            let working = truncate_line(&line, self.max_line_length);
            let truncated = matches!(working, Cow::Owned(_));
            if truncated {
                tracing::debug!(
                    "Truncated {}:{} to {} bytes",
                    line.source,
                    line.line_number,
                    working.text.len()
                );
            }
            let fields = self.extractor.extract(&working, headers);
            let redaction = self.redaction.redact(&fields.message);
            (fields, redaction, truncated)
        };
        Prepared {
            line,
            fields,
            redaction,
            truncated,
        }
    }
}

/// Working copy of `line` cut to at most `max` bytes on a char boundary
fn truncate_line(line: &RawLine, max: usize) -> Cow<'_, RawLine> {
    if line.text.len() <= max {
        return Cow::Borrowed(line);
    }
    let mut cut = max;
    while !line.text.is_char_boundary(cut) {
        cut -= 1;
    }
    Cow::Owned(RawLine::new(
        line.source.clone(),
        line.line_number,
        &line.text[..cut],
    ))
}

fn assign(tree: &mut ClusterTree, message: Option<&str>) -> ChannelAssignment {
    let Some(message) = message else {
        return ChannelAssignment::Unclustered {
            reason: "no anonymized view".to_string(),
        };
    };
    match tree.add(message) {
        Ok(update) => {
            if update.change == ClusterChange::Created {
                tracing::debug!("New cluster {}: {}", update.cluster_id, update.template);
            }
            update.into()
        }
        Err(e) => ChannelAssignment::Unclustered {
            reason: e.to_string(),
        },
    }
}

/// Per-run orchestrator owning both clustering trees
pub struct Pipeline {
    settings: PipelineConfig,
    extractor: FieldExtractor,
    redaction: RedactionEngine,
    trees: ChannelTrees,
    counters: RunCounters,
}

impl Pipeline {
    /// Build a pipeline from configuration with empty trees.
    /// The configuration is validated first; any problem is fatal.
    pub fn from_config(config: &Config) -> Result<Self> {
        ConfigValidator::validate(config)?;
        let registry = Arc::new(PatternRegistry::from_config(config)?);
        let redaction = RedactionEngine::from_config(&config.redaction, registry.clone())?;
        Self::assemble(config, registry, redaction)
    }

    /// Build a pipeline with an explicit semantic collaborator
    pub fn with_recognizer(
        config: &Config,
        recognizer: Option<Arc<dyn EntityRecognizer>>,
    ) -> Result<Self> {
        ConfigValidator::validate(config)?;
        let registry = Arc::new(PatternRegistry::from_config(config)?);
        let redaction = RedactionEngine::new(&config.redaction, registry.clone(), recognizer)?;
        Self::assemble(config, registry, redaction)
    }

    fn assemble(
        config: &Config,
        registry: Arc<PatternRegistry>,
        redaction: RedactionEngine,
    ) -> Result<Self> {
        Ok(Self {
            settings: config.pipeline.clone(),
            extractor: FieldExtractor::new(&config.parsing, registry)?,
            redaction,
            trees: ChannelTrees::new(&config.clustering),
            counters: RunCounters::default(),
        })
    }

    /// Continue from previously persisted trees
    pub fn with_trees(mut self, trees: ChannelTrees) -> Self {
        self.trees = trees;
        self
    }

    pub fn trees(&self) -> &ChannelTrees {
        &self.trees
    }

    /// Persist both trees
    pub fn save_state(&self, store: &StateStore) -> Result<()> {
        store.save(&self.trees)
    }

    /// Process lines lazily, one record per line, in input order.
    /// Header detection starts fresh for every call.
    pub fn process_batch<I>(&mut self, lines: I) -> BatchIter<'_, I::IntoIter>
    where
        I: IntoIterator<Item = RawLine>,
    {
        let headers = self.extractor.header_book();
        BatchIter {
            pipeline: self,
            lines: lines.into_iter(),
            headers,
        }
    }

    /// Process lines with extraction and redaction spread over the rayon pool,
    /// `chunk_size` lines at a time. Records, ids and templates match
    /// [`Pipeline::process_batch`].
    pub fn process_batch_parallel<I>(
        &mut self,
        lines: I,
        chunk_size: usize,
    ) -> ParallelBatchIter<'_, I::IntoIter>
    where
        I: IntoIterator<Item = RawLine>,
    {
        let headers = self.extractor.header_book();
        ParallelBatchIter {
            pipeline: self,
            lines: lines.into_iter(),
            headers,
            chunk_size: chunk_size.max(1),
            ready: Vec::new().into_iter(),
        }
    }

    fn process_chunk(&mut self, chunk: Vec<RawLine>, headers: &HeaderBook) -> Vec<ProcessedRecord> {
        let stages = Stages {
            extractor: &self.extractor,
            redaction: &self.redaction,
            max_line_length: self.settings.max_line_length,
        };
        let prepared: Vec<Prepared> = chunk
            .into_par_iter()
            .map(|line| stages.prepare(line, headers))
            .collect();

        let ChannelTrees {
            original,
            anonymized,
        } = &mut self.trees;
        let (original_assignments, anonymized_assignments) = rayon::join(
            || {
                prepared
                    .iter()
                    .map(|p| assign(original, Some(&p.fields.message)))
                    .collect::<Vec<_>>()
            },
            || {
                prepared
                    .iter()
                    .map(|p| assign(anonymized, p.redaction.primary().map(|v| v.redacted_message.as_str())))
                    .collect::<Vec<_>>()
            },
        );

        prepared
            .into_iter()
            .zip(original_assignments)
            .zip(anonymized_assignments)
            .map(|((prepared, original), anonymized)| self.finish(prepared, original, anonymized))
            .collect()
    }

    fn process_line(&mut self, line: RawLine, headers: &HeaderBook) -> ProcessedRecord {
        let prepared = Stages {
            extractor: &self.extractor,
            redaction: &self.redaction,
            max_line_length: self.settings.max_line_length,
        }
        .prepare(line, headers);

        let original = assign(&mut self.trees.original, Some(&prepared.fields.message));
        let anonymized = assign(
            &mut self.trees.anonymized,
            prepared
                .redaction
                .primary()
                .map(|v| v.redacted_message.as_str()),
        );
        self.finish(prepared, original, anonymized)
    }

    fn finish(
        &mut self,
        prepared: Prepared,
        original: ChannelAssignment,
        anonymized: ChannelAssignment,
    ) -> ProcessedRecord {
        let counters = &mut self.counters;
        counters.total_records += 1;
        if prepared.redaction.degraded {
            counters.degraded_records += 1;
        }
        if prepared.truncated {
            counters.truncated_lines += 1;
        }
        *counters
            .strategy_counts
            .entry(prepared.fields.strategy)
            .or_insert(0) += 1;
        if original.cluster_id().is_some() {
            counters.original_clustered += 1;
        }
        if anonymized.cluster_id().is_some() {
            counters.anonymized_clustered += 1;
        }

        ProcessedRecord {
            line: prepared.line,
            fields: prepared.fields,
            redaction: prepared.redaction,
            original,
            anonymized,
        }
    }

    /// Counters for this pipeline
    pub fn statistics(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            total_records: c.total_records,
            degraded_records: c.degraded_records,
            truncated_lines: c.truncated_lines,
            strategy_counts: c.strategy_counts.clone(),
            original: ChannelStats::from_tree(&self.trees.original, c.original_clustered),
            anonymized: ChannelStats::from_tree(&self.trees.anonymized, c.anonymized_clustered),
        }
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }
}

/// Lazy iterator returned by [`Pipeline::process_batch`]
pub struct BatchIter<'a, I> {
    pipeline: &'a mut Pipeline,
    lines: I,
    headers: HeaderBook,
}

impl<I> Iterator for BatchIter<'_, I>
where
    I: Iterator<Item = RawLine>,
{
    type Item = ProcessedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        self.headers.observe(&line);
        Some(self.pipeline.process_line(line, &self.headers))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lines.size_hint()
    }
}

/// Lazy record stream for [`Pipeline::process_batch_parallel`]
pub struct ParallelBatchIter<'a, I> {
    pipeline: &'a mut Pipeline,
    lines: I,
    headers: HeaderBook,
    chunk_size: usize,
    ready: std::vec::IntoIter<ProcessedRecord>,
}

impl<I> Iterator for ParallelBatchIter<'_, I>
where
    I: Iterator<Item = RawLine>,
{
    type Item = ProcessedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.ready.next() {
            return Some(record);
        }

        let chunk: Vec<RawLine> = self.lines.by_ref().take(self.chunk_size).collect();
        if chunk.is_empty() {
            return None;
        }
        for line in &chunk {
            self.headers.observe(line);
        }
        self.ready = self.pipeline.process_chunk(chunk, &self.headers).into_iter();
        self.ready.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ClusterId;

    fn lines(source: &str, texts: &[&str]) -> Vec<RawLine> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| RawLine::new(source, i as u64 + 1, *t))
            .collect()
    }

    fn create_test_pipeline() -> Pipeline {
        Pipeline::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_one_record_per_line_in_order() {
        let mut pipeline = create_test_pipeline();
        let input = lines("a.log", &["first line", "", "third line here"]);
        let records: Vec<ProcessedRecord> = pipeline.process_batch(input.clone()).collect();

        assert_eq!(records.len(), 3);
        for (record, line) in records.iter().zip(&input) {
            assert_eq!(&record.line, line);
        }
        // Empty message is unclusterable on both channels
        assert!(matches!(records[1].original, ChannelAssignment::Unclustered { .. }));
        assert!(matches!(records[1].anonymized, ChannelAssignment::Unclustered { .. }));
    }

    #[test]
    fn test_batch_is_lazy() {
        let mut pipeline = create_test_pipeline();
        let mut iter = pipeline.process_batch(lines("a.log", &["one", "two"]));
        assert!(iter.next().is_some());
        drop(iter);
        assert_eq!(pipeline.statistics().total_records, 1);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut pipeline = create_test_pipeline();
        let input = lines(
            "fw.log",
            &[
                "accepted connection from 10.0.0.1",
                "accepted connection from 10.0.0.2",
            ],
        );
        let records: Vec<ProcessedRecord> = pipeline.process_batch(input).collect();

        assert_eq!(
            records[1].original.template(),
            Some("accepted connection from <*>")
        );
        // Identical after redaction: the anonymized template stays literal
        assert_eq!(
            records[1].anonymized.template(),
            Some("accepted connection from <IP>")
        );
        assert_eq!(records[0].original.cluster_id(), Some(ClusterId(1)));
        assert_eq!(records[0].anonymized.cluster_id(), Some(ClusterId(1)));
    }

    #[test]
    fn test_statistics() {
        let mut pipeline = create_test_pipeline();
        let input = lines(
            "mixed.log",
            &[
                r#"{"msg":"login ok","user":"alice"}"#,
                "action=deny src=10.0.0.9",
                "plain words only",
            ],
        );
        let _ = pipeline.process_batch(input).count();

        let stats = pipeline.statistics();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.degraded_records, 0);
        assert_eq!(stats.strategy_counts.get(&StrategyKind::Structured), Some(&1));
        assert_eq!(stats.strategy_counts.get(&StrategyKind::PatternBased), Some(&1));
        assert_eq!(stats.strategy_counts.get(&StrategyKind::Adaptive), Some(&1));
        assert_eq!(stats.original.clusters, 3);
        assert_eq!(stats.original.clustered, 3);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut texts = Vec::new();
        for i in 0..60 {
            texts.push(format!("worker {} finished job {} in {} ms", i % 4, i, i * 3));
            texts.push(format!("user=u{} ip=10.0.{}.{} action=login", i, i % 7, i));
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let input = lines("svc.log", &refs);

        let mut sequential = create_test_pipeline();
        let expected: Vec<ProcessedRecord> = sequential.process_batch(input.clone()).collect();

        let mut parallel = create_test_pipeline();
        let actual: Vec<ProcessedRecord> = parallel.process_batch_parallel(input, 7).collect();

        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(&expected) {
            assert_eq!(a.line, e.line);
            assert_eq!(a.original.cluster_id(), e.original.cluster_id());
            assert_eq!(a.anonymized.cluster_id(), e.anonymized.cluster_id());
        }
        assert_eq!(parallel.statistics(), sequential.statistics());
    }

    #[test]
    fn test_long_lines_are_truncated() {
        let mut config = Config::default();
        config.pipeline.max_line_length = 8;
        let mut pipeline = Pipeline::from_config(&config).unwrap();

        let records: Vec<ProcessedRecord> = pipeline
            .process_batch(lines("a", &["ééééé tail"]))
            .collect();
        // The record keeps the line as read; only extraction sees the cut
        assert_eq!(records[0].line.text, "ééééé tail");
        assert_eq!(records[0].fields.message, "éééé");
        assert_eq!(pipeline.statistics().truncated_lines, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.clustering.original.similarity_threshold = 0.0;
        config.clustering.anonymized.max_children = 0;
        assert!(matches!(
            Pipeline::from_config(&config),
            Err(crate::error::LoglensError::ConfigValidation { .. })
        ));

        let mut config = Config::default();
        config.clustering.original.similarity_threshold = f64::NAN;
        assert!(Pipeline::with_recognizer(&config, None).is_err());
    }

    #[test]
    fn test_header_book_resets_per_call() {
        let mut pipeline = create_test_pipeline();
        let first: Vec<ProcessedRecord> = pipeline
            .process_batch(lines("t.csv", &["name,type,action", "bob,user,login"]))
            .collect();
        assert_eq!(first[1].fields.strategy, StrategyKind::Structured);

        // Same source, but no line 1 in this call: no header is known
        let second: Vec<ProcessedRecord> = pipeline
            .process_batch(vec![RawLine::new("t.csv", 3, "eve,user,logout")])
            .collect();
        assert_ne!(second[0].fields.strategy, StrategyKind::Structured);
    }
}
