use super::types::{DetectedEntity, Strategy};
use crate::config::RedactionConfig;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Keep the best non-overlapping candidates.
///
/// `rank` orders candidates from most to least preferred; the result is
/// sorted by position.
pub fn resolve_overlaps<T, E, F>(mut candidates: Vec<T>, entity: E, rank: F) -> Vec<T>
where
    E: Fn(&T) -> &DetectedEntity,
    F: Fn(&T, &T) -> Ordering,
{
    candidates.sort_by(|a, b| rank(a, b).then_with(|| entity(a).start.cmp(&entity(b).start)));

    let mut accepted: Vec<T> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let span = entity(&candidate);
        if span.is_empty() || accepted.iter().any(|a| entity(a).overlaps(span)) {
            continue;
        }
        accepted.push(candidate);
    }

    accepted.sort_by_key(|c| entity(c).start);
    accepted
}

/// Rewrites detected spans according to their strategy
#[derive(Debug, Clone)]
pub struct Redactor {
    placeholders: HashMap<String, String>,
    mask: String,
    hash_salt: String,
    hash_length: usize,
}

impl Redactor {
    pub fn new(config: &RedactionConfig) -> Self {
        let mask_char = config.mask_char.chars().next().unwrap_or('*');
        Self {
            placeholders: config.placeholders.clone(),
            mask: std::iter::repeat(mask_char).take(config.mask_width).collect(),
            hash_salt: config.hash_salt.clone(),
            hash_length: config.hash_length.clamp(1, 64),
        }
    }

    /// Replacement text for one entity, `None` when it is kept
    pub fn replacement(&self, entity: &DetectedEntity, value: &str) -> Option<String> {
        match entity.strategy {
            Strategy::Replace => Some(
                self.placeholders
                    .get(&entity.entity_type)
                    .cloned()
                    .unwrap_or_else(|| format!("<{}>", entity.entity_type)),
            ),
            Strategy::Mask => Some(self.mask.clone()),
            Strategy::Hash => {
                let input = format!("{}:{}:{}", self.hash_salt, entity.entity_type, value);
                let digest = blake3::hash(input.as_bytes()).to_hex();
                Some(format!("<HASH_{}>", &digest.as_str()[..self.hash_length]))
            }
            Strategy::Keep => None,
        }
    }

    /// Rewrite `text`; `entities` must be non-overlapping and sorted by start
    pub fn apply(&self, text: &str, entities: &[DetectedEntity]) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        for entity in entities {
            let Some(value) = text.get(entity.start..entity.end) else {
                continue;
            };
            if entity.start < cursor {
                continue;
            }
            if let Some(replacement) = self.replacement(entity, value) {
                out.push_str(&text[cursor..entity.start]);
                out.push_str(&replacement);
                cursor = entity.end;
            }
        }

        out.push_str(&text[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redaction::types::DetectionSource;

    fn entity(entity_type: &str, start: usize, end: usize, strategy: Strategy) -> DetectedEntity {
        DetectedEntity {
            entity_type: entity_type.to_string(),
            start,
            end,
            score: 0.9,
            strategy,
            source: DetectionSource::Classic,
        }
    }

    #[test]
    fn test_strategies() {
        let redactor = Redactor::new(&RedactionConfig::default());
        let text = "ip 10.0.0.1 card 4111111111111111 id abc";
        let entities = vec![
            entity("IP_ADDRESS", 3, 11, Strategy::Replace),
            entity("CREDIT_CARD", 17, 33, Strategy::Mask),
            entity("THING", 37, 40, Strategy::Keep),
        ];

        assert_eq!(redactor.apply(text, &entities), "ip <IP> card ******** id abc");
    }

    #[test]
    fn test_default_placeholder() {
        let redactor = Redactor::new(&RedactionConfig::default());
        let out = redactor.apply("hi bob", &[entity("PERSON", 3, 6, Strategy::Replace)]);
        assert_eq!(out, "hi <PERSON>");
    }

    #[test]
    fn test_hash_is_deterministic_and_typed() {
        let redactor = Redactor::new(&RedactionConfig::default());
        let a = redactor.apply("u alice", &[entity("PERSON", 2, 7, Strategy::Hash)]);
        let b = redactor.apply("u alice", &[entity("PERSON", 2, 7, Strategy::Hash)]);
        let c = redactor.apply("u alice", &[entity("USER", 2, 7, Strategy::Hash)]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("u <HASH_"));
        assert_eq!(a.len(), "u <HASH_>".len() + 16);
    }

    #[test]
    fn test_resolve_prefers_longest_then_rank() {
        let candidates = vec![
            entity("SHORT", 0, 4, Strategy::Replace),
            entity("LONG", 2, 10, Strategy::Replace),
            entity("TAIL", 12, 14, Strategy::Replace),
        ];
        let kept = resolve_overlaps(candidates, |e| e, |a, b| b.len().cmp(&a.len()));

        let types: Vec<&str> = kept.iter().map(|e| e.entity_type.as_str()).collect();
        assert_eq!(types, vec!["LONG", "TAIL"]);
    }
}
