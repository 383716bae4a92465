use super::types::{ParsedFields, RawLine, StrategyKind};

/// Catch-all strategy: positional segments of the line. Never rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveParser;

impl AdaptiveParser {
    pub fn parse(&self, line: &RawLine) -> ParsedFields {
        let mut parsed = ParsedFields::new(StrategyKind::Adaptive, "adaptive");

        let segments = line
            .text
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|'))
            .filter(|s| !s.is_empty());
        for (i, segment) in segments.enumerate() {
            parsed.push(format!("segment_{}", i + 1), segment);
        }

        parsed.message = line.text.split_whitespace().collect::<Vec<_>>().join(" ");
        parsed
    }
}
