use super::apply::resolve_overlaps;
use super::types::{DetectedEntity, DetectionSource};
use crate::patterns::PatternRegistry;
use std::sync::Arc;

/// Regex recognizers from the pattern registry
#[derive(Debug, Clone)]
pub struct ClassicDetector {
    registry: Arc<PatternRegistry>,
}

impl ClassicDetector {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    /// Non-overlapping entities; longest match wins, then registration order
    pub fn detect(&self, text: &str) -> Vec<DetectedEntity> {
        let candidates: Vec<(usize, DetectedEntity)> = self
            .registry
            .recognizer_matches(text)
            .into_iter()
            .map(|m| {
                let recognizer = &self.registry.recognizers[m.rank];
                let entity = DetectedEntity {
                    entity_type: recognizer.entity_type.clone(),
                    start: m.start,
                    end: m.end,
                    score: recognizer.score,
                    strategy: recognizer.strategy,
                    source: DetectionSource::Classic,
                };
                (m.rank, entity)
            })
            .collect();

        resolve_overlaps(
            candidates,
            |(_, e)| e,
            |(rank_a, a), (rank_b, b)| b.len().cmp(&a.len()).then_with(|| rank_a.cmp(rank_b)),
        )
        .into_iter()
        .map(|(_, e)| e)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RecognizerConfig};
    use crate::redaction::Strategy;

    fn detector(config: &Config) -> ClassicDetector {
        ClassicDetector::new(Arc::new(PatternRegistry::from_config(config).unwrap()))
    }

    #[test]
    fn test_detects_defaults() {
        let d = detector(&Config::default());
        let text = "from 192.168.1.20 mac 00:1A:2B:3C:4D:5E mail root@corp.example";
        let types: Vec<String> = d.detect(text).into_iter().map(|e| e.entity_type).collect();
        assert_eq!(types, vec!["IP_ADDRESS", "MAC_ADDRESS", "EMAIL_ADDRESS"]);
    }

    #[test]
    fn test_longest_match_wins() {
        let mut config = Config::default();
        config.redaction.recognizers = vec![
            RecognizerConfig {
                name: "digits".to_string(),
                entity_type: "NUMBER".to_string(),
                pattern: r"\d{3}".to_string(),
                score: 0.5,
                enabled: true,
                strategy: "replace".to_string(),
            },
            RecognizerConfig {
                name: "ssn".to_string(),
                entity_type: "US_SSN".to_string(),
                pattern: r"\d{3}-\d{2}-\d{4}".to_string(),
                score: 0.5,
                enabled: true,
                strategy: "mask".to_string(),
            },
        ];

        let found = detector(&config).detect("ssn 123-45-6789");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, "US_SSN");
        assert_eq!(found[0].strategy, Strategy::Mask);
    }

    #[test]
    fn test_equal_length_goes_to_first_registered() {
        let mut config = Config::default();
        let make = |name: &str, entity_type: &str| RecognizerConfig {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            pattern: r"\bFGT\w+".to_string(),
            score: 0.5,
            enabled: true,
            strategy: "replace".to_string(),
        };
        config.redaction.recognizers = vec![make("first", "DEVICE_ID"), make("second", "SERIAL")];

        let found = detector(&config).detect("device FGT60E4Q16000001 up");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, "DEVICE_ID");
    }
}
