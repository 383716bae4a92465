use crate::clustering::ChannelAssignment;
use crate::parsing::{ParsedFields, RawLine};
use crate::redaction::{AnonymizedView, RedactionOutcome};
use serde::{Deserialize, Serialize};

/// Everything the pipeline produced for one input line
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub line: RawLine,
    pub fields: ParsedFields,
    pub redaction: RedactionOutcome,
    pub original: ChannelAssignment,
    pub anonymized: ChannelAssignment,
}

impl ProcessedRecord {
    /// Stable row identifier, `source:line_number`
    pub fn line_id(&self) -> String {
        format!("{}:{}", self.line.source, self.line.line_number)
    }

    /// Message fed to the anonymized channel
    pub fn anonymized_message(&self) -> Option<&str> {
        self.redaction
            .primary()
            .map(|view| view.redacted_message.as_str())
    }
}

/// Serialized output schema, one row per record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub line_id: String,
    pub source: String,
    pub line_number: u64,
    pub strategy: String,
    pub parser: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Extracted fields in source order; repeated keys are all kept
    pub fields: Vec<(String, String)>,
    pub message: String,
    pub original: ChannelAssignment,
    pub anonymized: ChannelAssignment,
    pub redaction_mode: String,
    pub degraded: bool,
    pub views: Vec<AnonymizedView>,
}

impl From<&ProcessedRecord> for OutputRow {
    fn from(record: &ProcessedRecord) -> Self {
        let views = record
            .redaction
            .views
            .iter()
            .chain(record.redaction.combined.as_ref())
            .cloned()
            .collect();

        Self {
            line_id: record.line_id(),
            source: record.line.source.clone(),
            line_number: record.line.line_number,
            strategy: record.fields.strategy.to_string(),
            parser: record.fields.parser.clone(),
            timestamp: record.fields.timestamp.map(|ts| ts.to_rfc3339()),
            fields: record.fields.fields.clone(),
            message: record.fields.message.clone(),
            original: record.original.clone(),
            anonymized: record.anonymized.clone(),
            redaction_mode: record.redaction.mode.to_string(),
            degraded: record.redaction.degraded,
            views,
        }
    }
}
