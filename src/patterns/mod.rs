//! Pattern registry for configuration-driven parsing and redaction
//!
//! This module provides:
//! - Pre-compiled named parsing patterns (syslog, timestamp/level, key=value, ...)
//! - Pre-compiled classic redaction recognizers (emails, IPs, MACs, card numbers, ...)
//!
//! Patterns are compiled once at startup; an invalid pattern is a fatal
//! configuration error.

use crate::config::{Config, ParsingConfig, PatternKind, RedactionConfig};
use crate::error::{LoglensError, Result};
use crate::redaction::Strategy;
use regex::Regex;
use std::collections::HashMap;

/// Compiled parsing pattern
#[derive(Debug, Clone)]
pub struct CompiledParsingPattern {
    pub name: String,
    pub regex: Regex,
    pub kind: PatternKind,
    pub confidence: f32,
}

impl CompiledParsingPattern {
    /// True if the pattern defines a `message` capture group
    pub fn has_message_group(&self) -> bool {
        self.regex.capture_names().flatten().any(|n| n == "message")
    }
}

/// Compiled classic redaction recognizer
#[derive(Debug, Clone)]
pub struct CompiledRecognizer {
    pub name: String,
    pub entity_type: String,
    pub regex: Regex,
    pub score: f32,
    pub strategy: Strategy,
}

/// A recognizer hit before overlap resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerMatch {
    /// Registration index of the recognizer
    pub rank: usize,
    pub start: usize,
    pub end: usize,
}

/// Pattern registry with all pre-compiled patterns
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    /// Parsing patterns, in registration order
    pub parsing: Vec<CompiledParsingPattern>,
    /// Parsing pattern lookup by name
    pub parsing_by_name: HashMap<String, usize>,
    /// Enabled recognizers, in registration order
    pub recognizers: Vec<CompiledRecognizer>,
    /// Recognizer lookup by name
    pub recognizers_by_name: HashMap<String, usize>,
}

impl PatternRegistry {
    /// Build the registry from the loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_configs(&config.parsing, &config.redaction)
    }

    /// Build the registry from parsing and redaction sections
    pub fn from_configs(parsing_config: &ParsingConfig, redaction: &RedactionConfig) -> Result<Self> {
        let mut parsing = Vec::new();
        let mut parsing_by_name = HashMap::new();

        for pattern_cfg in &parsing_config.patterns {
            let regex = Regex::new(&pattern_cfg.pattern).map_err(|e| {
                LoglensError::Config(format!(
                    "Invalid regex for parsing pattern '{}': {}",
                    pattern_cfg.name, e
                ))
            })?;

            parsing_by_name.insert(pattern_cfg.name.clone(), parsing.len());
            parsing.push(CompiledParsingPattern {
                name: pattern_cfg.name.clone(),
                regex,
                kind: pattern_cfg.kind,
                confidence: pattern_cfg.confidence,
            });
        }

        let mut recognizers = Vec::new();
        let mut recognizers_by_name = HashMap::new();

        for recognizer_cfg in redaction.recognizers.iter().filter(|r| r.enabled) {
            let regex = Regex::new(&recognizer_cfg.pattern).map_err(|e| {
                LoglensError::Config(format!(
                    "Invalid regex for recognizer '{}': {}",
                    recognizer_cfg.name, e
                ))
            })?;
            let strategy = Strategy::parse_strategy(&recognizer_cfg.strategy)?;

            recognizers_by_name.insert(recognizer_cfg.name.clone(), recognizers.len());
            recognizers.push(CompiledRecognizer {
                name: recognizer_cfg.name.clone(),
                entity_type: recognizer_cfg.entity_type.clone(),
                regex,
                score: recognizer_cfg.score,
                strategy,
            });
        }

        Ok(Self {
            parsing,
            parsing_by_name,
            recognizers,
            recognizers_by_name,
        })
    }

    /// True if any parsing pattern matches the line
    pub fn matches_any(&self, line: &str) -> bool {
        self.parsing.iter().any(|p| p.regex.is_match(line))
    }

    /// Matching parsing patterns, highest confidence first.
    /// Equal confidences keep registration order.
    pub fn ranked_matches<'a>(&'a self, line: &str) -> Vec<&'a CompiledParsingPattern> {
        let mut matches: Vec<&CompiledParsingPattern> = self
            .parsing
            .iter()
            .filter(|p| p.regex.is_match(line))
            .collect();
        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        matches
    }

    /// Get a parsing pattern by name
    pub fn parsing_pattern(&self, name: &str) -> Option<&CompiledParsingPattern> {
        self.parsing_by_name.get(name).map(|&i| &self.parsing[i])
    }

    /// Get a recognizer by name
    pub fn recognizer(&self, name: &str) -> Option<&CompiledRecognizer> {
        self.recognizers_by_name.get(name).map(|&i| &self.recognizers[i])
    }

    /// Every recognizer hit in `text`, in registration order
    pub fn recognizer_matches(&self, text: &str) -> Vec<RecognizerMatch> {
        self.recognizers
            .iter()
            .enumerate()
            .flat_map(|(rank, recognizer)| {
                recognizer
                    .regex
                    .find_iter(text)
                    .filter(|m| !m.is_empty())
                    .map(move |m| RecognizerMatch {
                        rank,
                        start: m.start(),
                        end: m.end(),
                    })
            })
            .collect()
    }
}
