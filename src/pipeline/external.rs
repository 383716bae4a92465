//! Hand-off to an external prompt-based parser
//!
//! Records are flattened into tabular rows keyed by `source:line_number`.
//! The service answers with a template (and optionally fields) per row,
//! which are adopted back as records of the `external` strategy.

use super::record::ProcessedRecord;
use crate::clustering::ChannelAssignment;
use crate::error::{LoglensError, Result};
use crate::parsing::{ParsedFields, StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

/// One row handed to the external parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularRow {
    pub line_id: String,
    pub source: String,
    pub line_number: u64,
    pub parser: String,
    /// Anonymized message; raw content never leaves the process
    pub content: String,
    pub original_template: String,
    pub anonymized_template: String,
}

/// One row returned by the external parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRow {
    pub line_id: String,
    pub template: String,
    #[serde(default)]
    pub fields: Vec<(String, String)>,
}

/// External prompt-based parsing service
pub trait PromptParser {
    fn parse_rows(&self, rows: &[TabularRow]) -> Result<Vec<ExternalRow>>;

    fn name(&self) -> &str;
}

/// Format processed records for the external parser
pub fn to_tabular(records: &[ProcessedRecord]) -> Vec<TabularRow> {
    records
        .iter()
        .map(|record| TabularRow {
            line_id: record.line_id(),
            source: record.line.source.clone(),
            line_number: record.line.line_number,
            parser: record.fields.parser.clone(),
            content: record.anonymized_message().unwrap_or_default().to_string(),
            original_template: record.original.template().unwrap_or_default().to_string(),
            anonymized_template: record.anonymized.template().unwrap_or_default().to_string(),
        })
        .collect()
}

/// Write rows as tab-separated values with a header line
pub fn write_tabular<W: Write>(rows: &[TabularRow], writer: W) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for row in rows {
        csv_writer
            .serialize(row)
            .map_err(|e| LoglensError::Other(anyhow::anyhow!("Failed to write row {}: {}", row.line_id, e)))?;
    }
    csv_writer.flush().map_err(|e| LoglensError::Io {
        source: e,
        context: "Failed to flush tabular output".to_string(),
    })?;
    Ok(())
}

/// Turn the external parser's rows back into records.
///
/// Rows are matched to `records` by line id; rows for unknown lines are
/// skipped. Redaction and the anonymized assignment are kept as they were.
pub fn adopt(
    records: &[ProcessedRecord],
    rows: Vec<ExternalRow>,
    parser_name: &str,
) -> Vec<ProcessedRecord> {
    let by_id: HashMap<String, &ProcessedRecord> =
        records.iter().map(|r| (r.line_id(), r)).collect();

    rows.into_iter()
        .filter_map(|row| {
            let Some(record) = by_id.get(&row.line_id) else {
                tracing::warn!("External parser returned unknown line {}", row.line_id);
                return None;
            };

            let mut fields = ParsedFields::new(StrategyKind::External, parser_name);
            fields.fields = row.fields;
            fields.message = record.fields.message.clone();
            fields.timestamp = record.fields.timestamp;

            Some(ProcessedRecord {
                line: record.line.clone(),
                fields,
                redaction: record.redaction.clone(),
                original: ChannelAssignment::External {
                    template: row.template,
                },
                anonymized: record.anonymized.clone(),
            })
        })
        .collect()
}

/// Send records through `parser` and adopt its answer
pub fn hand_off(parser: &dyn PromptParser, records: &[ProcessedRecord]) -> Result<Vec<ProcessedRecord>> {
    let rows = parser.parse_rows(&to_tabular(records))?;
    tracing::info!(
        "External parser '{}' returned {} of {} rows",
        parser.name(),
        rows.len(),
        records.len()
    );
    Ok(adopt(records, rows, parser.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parsing::RawLine;
    use crate::pipeline::Pipeline;

    /// Replaces every digit-bearing token with a wildcard
    struct DigitMasker;

    impl PromptParser for DigitMasker {
        fn parse_rows(&self, rows: &[TabularRow]) -> Result<Vec<ExternalRow>> {
            Ok(rows
                .iter()
                .map(|row| ExternalRow {
                    line_id: row.line_id.clone(),
                    template: row
                        .content
                        .split_whitespace()
                        .map(|t| {
                            if t.chars().any(|c| c.is_ascii_digit()) {
                                "<*>"
                            } else {
                                t
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(" "),
                    fields: vec![("event".to_string(), "E1".to_string())],
                })
                .collect())
        }

        fn name(&self) -> &str {
            "digit-masker"
        }
    }

    fn records() -> Vec<ProcessedRecord> {
        let mut pipeline = Pipeline::from_config(&Config::default()).unwrap();
        pipeline
            .process_batch(vec![
                RawLine::new("app.log", 1, "job 17 done by 10.0.0.3"),
                RawLine::new("app.log", 2, "job 18 done by 10.0.0.4"),
            ])
            .collect()
    }

    #[test]
    fn test_to_tabular_uses_anonymized_content() {
        let rows = to_tabular(&records());
        assert_eq!(rows[0].line_id, "app.log:1");
        assert_eq!(rows[0].content, "job 17 done by <IP>");
        assert_eq!(rows[1].original_template, "job <*> done by <*>");
    }

    #[test]
    fn test_hand_off_adopts_rows() {
        let records = records();
        let adopted = hand_off(&DigitMasker, &records).unwrap();

        assert_eq!(adopted.len(), 2);
        assert_eq!(adopted[0].fields.strategy, StrategyKind::External);
        assert_eq!(adopted[0].fields.parser, "digit-masker");
        assert_eq!(adopted[0].fields.get("event"), Some("E1"));
        assert_eq!(
            adopted[0].original,
            ChannelAssignment::External {
                template: "job <*> done by <IP>".to_string()
            }
        );
        assert_eq!(adopted[0].anonymized, records[0].anonymized);
    }

    #[test]
    fn test_unknown_rows_are_skipped() {
        let rows = vec![ExternalRow {
            line_id: "other.log:9".to_string(),
            template: "x".to_string(),
            fields: Vec::new(),
        }];
        assert!(adopt(&records(), rows, "p").is_empty());
    }

    #[test]
    fn test_write_tabular() {
        let mut out = Vec::new();
        write_tabular(&to_tabular(&records()), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("line_id\tsource\tline_number"));
        assert!(lines.next().unwrap().starts_with("app.log:1\tapp.log\t1\t"));
    }
}
