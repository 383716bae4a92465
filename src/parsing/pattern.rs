use super::types::{ParseFailure, ParsedFields, RawLine, StrategyKind};
use crate::config::PatternKind;
use crate::patterns::{CompiledParsingPattern, PatternRegistry};
use std::sync::Arc;

/// Named-pattern strategy backed by the central registry
#[derive(Debug, Clone)]
pub struct PatternParser {
    registry: Arc<PatternRegistry>,
}

impl PatternParser {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    pub fn can_handle(&self, line: &RawLine) -> bool {
        self.registry.matches_any(&line.text)
    }

    pub fn parse(&self, line: &RawLine) -> Result<ParsedFields, ParseFailure> {
        let pattern = self
            .registry
            .ranked_matches(&line.text)
            .into_iter()
            .next()
            .ok_or_else(|| ParseFailure::new(StrategyKind::PatternBased, line, "no pattern matches"))?;

        let parsed = match pattern.kind {
            PatternKind::Captures => Self::parse_captures(pattern, &line.text),
            PatternKind::KeyValue => Self::parse_key_values(pattern, &line.text),
        };

        if parsed.fields.iter().all(|(_, v)| v.is_empty()) {
            return Err(ParseFailure::new(
                StrategyKind::PatternBased,
                line,
                format!("pattern '{}' matched but extracted nothing", pattern.name),
            ));
        }
        Ok(parsed)
    }

    fn parse_captures(pattern: &CompiledParsingPattern, text: &str) -> ParsedFields {
        let mut parsed = ParsedFields::new(StrategyKind::PatternBased, pattern.name.clone());
        parsed.message = text.to_string();

        let Some(caps) = pattern.regex.captures(text) else {
            return parsed;
        };

        for name in pattern.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                if !m.as_str().is_empty() {
                    parsed.push(name, m.as_str());
                }
            }
        }

        if let Some(message) = caps.name("message") {
            parsed.message = message.as_str().to_string();
        }
        parsed
    }

    fn parse_key_values(pattern: &CompiledParsingPattern, text: &str) -> ParsedFields {
        let mut parsed = ParsedFields::new(StrategyKind::PatternBased, pattern.name.clone());
        parsed.message = text.to_string();

        for caps in pattern.regex.captures_iter(text) {
            let (Some(key), Some(value)) = (caps.name("key"), caps.name("value")) else {
                continue;
            };
            parsed.push(key.as_str(), unquote(value.as_str()));
        }
        parsed
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
