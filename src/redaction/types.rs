use crate::error::{LoglensError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a detected entity is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Substitute the entity type's placeholder
    Replace,
    /// Substitute a fixed-width run of the mask character
    Mask,
    /// Substitute a salted, truncated digest
    Hash,
    /// Leave the text untouched; the entity is still reported
    Keep,
}

impl Strategy {
    pub fn parse_strategy(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "mask" => Ok(Self::Mask),
            "hash" => Ok(Self::Hash),
            "keep" => Ok(Self::Keep),
            _ => Err(LoglensError::Config(format!(
                "Unknown redaction strategy: {}. Valid options: replace, mask, hash, keep",
                s
            ))),
        }
    }
}

/// Which detection paths run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    Classic,
    Semantic,
    Hybrid,
}

impl RedactionMode {
    pub fn parse_mode(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "classic" => Ok(Self::Classic),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(LoglensError::Config(format!(
                "Unknown redaction mode: {}. Valid options: classic, semantic, hybrid",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for RedactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection path that found an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Classic,
    Semantic,
}

/// A detected sensitive span of the original message (byte offsets)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
    pub strategy: Strategy,
    pub source: DetectionSource,
}

impl DetectedEntity {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &DetectedEntity) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Label of an anonymized view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewChannel {
    Classic,
    Semantic,
    Hybrid,
}

/// The original message with detected entities rewritten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedView {
    pub channel: ViewChannel,
    pub redacted_message: String,
    pub entities: Vec<DetectedEntity>,
    /// The requested path was unavailable and classic detection stood in
    pub degraded: bool,
}

/// Everything the redaction engine produced for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionOutcome {
    pub mode: RedactionMode,
    pub views: Vec<AnonymizedView>,
    /// Union of both paths; only present for a healthy hybrid run
    pub combined: Option<AnonymizedView>,
    pub degraded: bool,
}

impl RedactionOutcome {
    /// The view that feeds the anonymized clustering channel
    pub fn primary(&self) -> Option<&AnonymizedView> {
        self.combined.as_ref().or_else(|| self.views.first())
    }

    pub fn view(&self, channel: ViewChannel) -> Option<&AnonymizedView> {
        self.views
            .iter()
            .chain(self.combined.as_ref())
            .find(|v| v.channel == channel)
    }
}
