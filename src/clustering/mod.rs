//! Online template clustering
//!
//! A bounded, incremental template miner: messages are routed by token count
//! and leading tokens through a fixed-depth prefix tree, then matched against
//! the candidate templates at the leaf. Every decision is computed against an
//! immutable view of the tree before anything is mutated.

mod tokens;
mod tree;
mod types;

pub use tokens::{TokenSequence, WILDCARD};
pub use tree::{NodeId, PrefixTree};
pub use types::{
    ChannelAssignment, Cluster, ClusterChange, ClusterError, ClusterId, ClusterLimit,
    ClusterUpdate, TreeStats, UNBOUNDED_SENTINEL,
};

use crate::config::{ChannelConfig, ClusteringConfig};
use crate::error::{LoglensError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two independent clustering channels of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Original,
    Anonymized,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Anonymized => "anonymized",
        }
    }

    pub fn parse_channel(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "anonymized" | "anonymised" => Ok(Self::Anonymized),
            _ => Err(LoglensError::Config(format!(
                "Unknown channel: {}. Valid options: original, anonymized",
                s
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a record, decided before mutating the tree
enum Decision {
    Merge { cluster: ClusterId },
    Create,
    Absorb { cluster: ClusterId },
    Reject(ClusterError),
}

/// Template clustering tree for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTree {
    tree: PrefixTree,
    clusters: Vec<Cluster>,
    stats: TreeStats,
    #[serde(skip)]
    settings: TreeSettings,
}

/// Runtime parameters; taken from configuration rather than persisted
#[derive(Debug, Clone)]
struct TreeSettings {
    max_children: usize,
    max_clusters: ClusterLimit,
    similarity_threshold: f64,
    extra_delimiters: Vec<String>,
}

impl Default for TreeSettings {
    fn default() -> Self {
        let channel = ChannelConfig::default();
        Self::from(&channel)
    }
}

impl From<&ChannelConfig> for TreeSettings {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            max_children: config.max_children,
            max_clusters: config.max_clusters,
            similarity_threshold: config.similarity_threshold,
            extra_delimiters: config.extra_delimiters.clone(),
        }
    }
}

impl ClusterTree {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            tree: PrefixTree::new(config.depth),
            clusters: Vec::new(),
            stats: TreeStats::default(),
            settings: TreeSettings::from(config),
        }
    }

    /// Tree depth counting the root and the token-count layer
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// Re-apply runtime parameters after loading persisted state.
    /// The depth is structural and must match.
    pub fn reconfigure(&mut self, channel: Channel, config: &ChannelConfig) -> Result<()> {
        if config.depth != self.depth() {
            return Err(LoglensError::StateVersionMismatch {
                channel: channel.to_string(),
                expected: config.depth,
                found: self.depth(),
            });
        }
        self.settings = TreeSettings::from(config);
        Ok(())
    }

    pub fn tokenize(&self, text: &str) -> TokenSequence {
        TokenSequence::tokenize(text, &self.settings.extra_delimiters)
    }

    /// Cluster one message, creating or generalizing a template
    pub fn add(&mut self, text: &str) -> std::result::Result<ClusterUpdate, ClusterError> {
        let seq = self.tokenize(text);
        let decision = self.decide(&seq);

        match decision {
            Decision::Merge { cluster } => Ok(self.merge(cluster, &seq, false)),
            Decision::Absorb { cluster } => {
                self.stats.load_shed += 1;
                tracing::warn!(
                    "Cluster limit {} reached, record absorbed by cluster {}",
                    self.settings.max_clusters,
                    cluster
                );
                Ok(self.merge(cluster, &seq, true))
            }
            Decision::Create => Ok(self.create(seq)),
            Decision::Reject(err) => {
                self.stats.unclustered += 1;
                Err(err)
            }
        }
    }

    fn decide(&self, seq: &TokenSequence) -> Decision {
        if seq.is_empty() {
            return Decision::Reject(ClusterError::EmptySequence);
        }

        let candidates = self
            .tree
            .search(seq)
            .map(|leaf| self.tree.candidates(leaf))
            .unwrap_or(&[]);

        let scored: Vec<(ClusterId, f64)> = candidates
            .iter()
            .filter_map(|id| self.cluster(*id))
            .map(|c| (c.id, c.template.similarity(seq)))
            .collect();

        // Highest score, ties to the lowest id
        let best = scored
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)));

        if let Some((id, score)) = best {
            if score >= self.settings.similarity_threshold {
                return Decision::Merge { cluster: id };
            }
        }

        if self.settings.max_clusters.allows_new(self.clusters.len()) {
            return Decision::Create;
        }

        // Lowest score, ties to the lowest id
        let weakest = scored
            .iter()
            .copied()
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        match weakest {
            Some((id, _)) => Decision::Absorb { cluster: id },
            None => Decision::Reject(ClusterError::CapacityExhausted {
                limit: self.settings.max_clusters,
            }),
        }
    }

    fn merge(&mut self, id: ClusterId, seq: &TokenSequence, absorbed: bool) -> ClusterUpdate {
        // Ids are dense and start at 1
        let cluster = &mut self.clusters[(id.0 - 1) as usize];
        let changed = cluster.template.generalize(seq);
        cluster.size += 1;
        cluster.last_updated = chrono::Utc::now();

        let change = match (absorbed, changed) {
            (true, _) => ClusterChange::Absorbed,
            (false, true) => ClusterChange::Updated,
            (false, false) => ClusterChange::Unchanged,
        };

        ClusterUpdate {
            cluster_id: id,
            template: cluster.template.render(),
            size: cluster.size,
            change,
        }
    }

    fn create(&mut self, seq: TokenSequence) -> ClusterUpdate {
        let id = ClusterId(self.clusters.len() as u64 + 1);
        let max_children = self.settings.max_children;

        let held = self.tree.insert(&seq, id, max_children);
        if held >= max_children {
            self.stats.leaf_overflows += 1;
            tracing::warn!(
                "Leaf already holds {} clusters (max_children = {}), adding cluster {}",
                held,
                max_children,
                id
            );
        }

        let template = seq.render();
        self.clusters.push(Cluster {
            id,
            template: seq,
            size: 1,
            last_updated: chrono::Utc::now(),
        });

        ClusterUpdate {
            cluster_id: id,
            template,
            size: 1,
            change: ClusterChange::Created,
        }
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        let index = id.0.checked_sub(1)?;
        self.clusters.get(usize::try_from(index).ok()?)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }
}

/// Both clustering trees of a run; they never share ids or state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTrees {
    pub original: ClusterTree,
    pub anonymized: ClusterTree,
}

impl ChannelTrees {
    pub fn new(config: &ClusteringConfig) -> Self {
        Self {
            original: ClusterTree::new(&config.original),
            anonymized: ClusterTree::new(&config.anonymized),
        }
    }

    pub fn get(&self, channel: Channel) -> &ClusterTree {
        match channel {
            Channel::Original => &self.original,
            Channel::Anonymized => &self.anonymized,
        }
    }

    /// Check persisted depths against `config` and apply its runtime settings
    pub fn reconfigure(&mut self, config: &ClusteringConfig) -> Result<()> {
        self.original.reconfigure(Channel::Original, &config.original)?;
        self.anonymized
            .reconfigure(Channel::Anonymized, &config.anonymized)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(depth: usize, threshold: f64, max_clusters: ClusterLimit) -> ChannelConfig {
        ChannelConfig {
            depth,
            max_children: 100,
            max_clusters,
            similarity_threshold: threshold,
            extra_delimiters: vec!["=".to_string()],
        }
    }

    fn default_tree() -> ClusterTree {
        ClusterTree::new(&channel(4, 0.4, ClusterLimit::limited(1000)))
    }

    #[test]
    fn test_key_value_lines_share_a_template() {
        let mut tree = default_tree();
        let first = tree.add("user=alice ip=10.0.0.1").unwrap();
        let second = tree.add("user=bob ip=10.0.0.2").unwrap();

        assert_eq!(first.change, ClusterChange::Created);
        assert_eq!(second.cluster_id, first.cluster_id);
        assert_eq!(second.template, "user=<*> ip=<*>");
        assert_eq!(second.size, 2);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_different_lengths_never_merge() {
        let mut tree = default_tree();
        let a = tree.add("service started").unwrap();
        let b = tree.add("service started again").unwrap();
        assert_ne!(a.cluster_id, b.cluster_id);
    }

    #[test]
    fn test_below_threshold_creates_new_cluster() {
        let mut tree = ClusterTree::new(&channel(3, 0.9, ClusterLimit::limited(1000)));
        let a = tree.add("disk usage high on sda").unwrap();
        let b = tree.add("disk quota low for bob").unwrap();
        assert_ne!(a.cluster_id, b.cluster_id);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_templates_only_generalize() {
        let mut tree = default_tree();
        tree.add("job 1 finished in 10 ms").unwrap();
        tree.add("job 2 finished in 12 ms").unwrap();
        let update = tree.add("job 1 finished in 10 ms").unwrap();

        assert_eq!(update.template, "job <*> finished in <*> ms");
        assert_eq!(update.change, ClusterChange::Unchanged);
    }

    #[test]
    fn test_empty_message_is_unclustered() {
        let mut tree = default_tree();
        assert_eq!(tree.add("   "), Err(ClusterError::EmptySequence));
        assert_eq!(tree.stats().unclustered, 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_full_tree_absorbs_into_weakest_candidate() {
        let mut tree = ClusterTree::new(&channel(3, 0.9, ClusterLimit::limited(2)));
        let a = tree.add("login ok for alice today").unwrap();
        let b = tree.add("login failed for bob yesterday").unwrap();

        // Leaf "login": a scores 3/5, b scores 4/5 against this record
        let c = tree.add("login failed for bob today").unwrap();
        assert_eq!(c.change, ClusterChange::Absorbed);
        assert_eq!(c.cluster_id, a.cluster_id);
        assert_ne!(c.cluster_id, b.cluster_id);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.stats().load_shed, 1);
    }

    #[test]
    fn test_full_tree_without_candidates_rejects() {
        let mut tree = ClusterTree::new(&channel(4, 0.4, ClusterLimit::limited(1)));
        tree.add("first template here").unwrap();
        let result = tree.add("another shape");
        assert!(matches!(result, Err(ClusterError::CapacityExhausted { .. })));
        assert_eq!(tree.stats().unclustered, 1);
    }

    #[test]
    fn test_unbounded_never_sheds() {
        let mut tree = ClusterTree::new(&channel(4, 1.0, ClusterLimit::Unbounded));
        for i in 0..200 {
            tree.add(&format!("event{} happened", i)).unwrap();
        }
        assert_eq!(tree.len(), 200);
        assert_eq!(tree.stats().load_shed, 0);
    }

    #[test]
    fn test_leaf_overflow_is_counted() {
        let mut config = channel(3, 1.0, ClusterLimit::Unbounded);
        config.max_children = 2;
        let mut tree = ClusterTree::new(&config);

        tree.add("same a").unwrap();
        tree.add("same b").unwrap();
        tree.add("same c").unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.stats().leaf_overflows, 1);
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let mut tree = ClusterTree::new(&channel(3, 0.5, ClusterLimit::limited(1000)));
        let first = tree.add("x aa bb").unwrap();
        let second = tree.add("x cc dd").unwrap();
        assert_ne!(first.cluster_id, second.cluster_id);

        // Scores 2/3 against both
        let update = tree.add("x aa dd").unwrap();
        assert_eq!(update.cluster_id, first.cluster_id);
    }

    #[test]
    fn test_replay_reproduces_ids_and_templates() {
        let lines = [
            "GET /index.html 200",
            "GET /about.html 200",
            "POST /login 302",
            "worker 3 stopped",
            "worker 9 stopped",
            "POST /logout 302",
        ];

        let run = || {
            let mut tree = default_tree();
            lines
                .iter()
                .map(|l| {
                    let u = tree.add(l).unwrap();
                    (u.cluster_id, u.template)
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_reconfigure_rejects_depth_change() {
        let mut tree = default_tree();
        let other = channel(5, 0.4, ClusterLimit::Unbounded);
        let err = tree.reconfigure(Channel::Original, &other).unwrap_err();
        assert!(matches!(
            err,
            LoglensError::StateVersionMismatch {
                expected: 5,
                found: 4,
                ..
            }
        ));
    }
}
