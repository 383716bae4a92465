use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One line of input, immutable once read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLine {
    /// Source identifier, usually the file path
    pub source: String,
    /// 1-based line number within the source
    pub line_number: u64,
    pub text: String,
}

impl RawLine {
    pub fn new(source: impl Into<String>, line_number: u64, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line_number,
            text: text.into(),
        }
    }
}

/// Family of the strategy that produced a record's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Structured,
    PatternBased,
    Adaptive,
    /// Supplied by an external prompt-based parser
    External,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::PatternBased => "pattern",
            Self::Adaptive => "adaptive",
            Self::External => "external",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields extracted from one line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFields {
    /// Key/value pairs in extraction order
    pub fields: Vec<(String, String)>,
    pub strategy: StrategyKind,
    /// Name of the concrete parser (pattern name, "json", "delimited", ...)
    pub parser: String,
    /// Normalized message used for redaction and clustering
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ParsedFields {
    pub fn new(strategy: StrategyKind, parser: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            strategy,
            parser: parser.into(),
            message: String::new(),
            timestamp: None,
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A strategy accepted a line but could not extract from it
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{strategy} parser failed on {origin}:{line_number}: {reason}")]
pub struct ParseFailure {
    pub strategy: StrategyKind,
    /// Source of the failing line
    pub origin: String,
    pub line_number: u64,
    pub reason: String,
}

impl ParseFailure {
    pub fn new(strategy: StrategyKind, line: &RawLine, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            origin: line.source.clone(),
            line_number: line.line_number,
            reason: reason.into(),
        }
    }
}
