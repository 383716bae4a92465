//! Multi-strategy field extraction
//!
//! An ordered chain of strategies turns a raw line into named fields:
//! - Structured: JSON objects, CEF records and delimited lines under a detected header
//! - Pattern-based: named patterns from the registry
//! - Adaptive: positional segments, always the terminal fallback
//!
//! The chain tries strategies in order and parses with the first one that
//! accepts the line. A strategy that accepts and then fails hands the line to
//! the next candidate; extraction as a whole never fails.

mod adaptive;
mod cef;
mod pattern;
mod structured;
pub mod timestamp;
mod types;

pub use adaptive::AdaptiveParser;
pub use pattern::PatternParser;
pub use structured::{Header, HeaderBook, StructuredParser};
pub use types::{ParseFailure, ParsedFields, RawLine, StrategyKind};

use crate::config::ParsingConfig;
use crate::error::{LoglensError, Result};
use crate::patterns::PatternRegistry;
use std::sync::Arc;

/// One entry of the extraction chain
#[derive(Debug, Clone)]
pub enum ParsingStrategy {
    Structured(StructuredParser),
    PatternBased(PatternParser),
    Adaptive(AdaptiveParser),
}

impl ParsingStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Structured(_) => StrategyKind::Structured,
            Self::PatternBased(_) => StrategyKind::PatternBased,
            Self::Adaptive(_) => StrategyKind::Adaptive,
        }
    }

    pub fn can_handle(&self, line: &RawLine, headers: &HeaderBook) -> bool {
        match self {
            Self::Structured(p) => p.can_handle(line, headers),
            Self::PatternBased(p) => p.can_handle(line),
            Self::Adaptive(_) => true,
        }
    }

    pub fn parse(
        &self,
        line: &RawLine,
        headers: &HeaderBook,
    ) -> std::result::Result<ParsedFields, ParseFailure> {
        match self {
            Self::Structured(p) => p.parse(line, headers),
            Self::PatternBased(p) => p.parse(line),
            Self::Adaptive(p) => Ok(p.parse(line)),
        }
    }
}

/// Ordered strategy chain
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    chain: Vec<ParsingStrategy>,
    header_delimiters: Vec<u8>,
}

impl FieldExtractor {
    /// Build the chain in `strategy_order`
    pub fn new(config: &ParsingConfig, registry: Arc<PatternRegistry>) -> Result<Self> {
        let mut chain = Vec::with_capacity(config.strategy_order.len());
        for name in &config.strategy_order {
            let strategy = match name.as_str() {
                "structured" => {
                    ParsingStrategy::Structured(StructuredParser::new(config.message_keys.clone()))
                }
                "pattern" => ParsingStrategy::PatternBased(PatternParser::new(registry.clone())),
                "adaptive" => ParsingStrategy::Adaptive(AdaptiveParser),
                other => {
                    return Err(LoglensError::Config(format!(
                        "Unknown parsing strategy: {}. Valid options: structured, pattern, adaptive",
                        other
                    )))
                }
            };
            chain.push(strategy);
        }

        if !matches!(chain.last(), Some(ParsingStrategy::Adaptive(_))) {
            return Err(LoglensError::Config(
                "The adaptive strategy must terminate the parsing chain".to_string(),
            ));
        }

        let header_delimiters = config
            .header_delimiters
            .iter()
            .filter_map(|d| d.bytes().next())
            .collect();

        Ok(Self {
            chain,
            header_delimiters,
        })
    }

    /// Fresh header book for one batch
    pub fn header_book(&self) -> HeaderBook {
        HeaderBook::new(self.header_delimiters.clone())
    }

    pub fn strategies(&self) -> &[ParsingStrategy] {
        &self.chain
    }

    /// Extract fields with the first strategy that accepts and parses the line
    pub fn extract(&self, line: &RawLine, headers: &HeaderBook) -> ParsedFields {
        let mut parsed = self
            .chain
            .iter()
            .filter(|s| s.can_handle(line, headers))
            .find_map(|strategy| match strategy.parse(line, headers) {
                Ok(parsed) => Some(parsed),
                Err(failure) => {
                    tracing::debug!("{}", failure);
                    None
                }
            })
            .unwrap_or_else(|| AdaptiveParser.parse(line));

        parsed.timestamp = timestamp::normalize(&parsed.fields);
        parsed
    }
}
