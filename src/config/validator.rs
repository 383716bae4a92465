use crate::config::{ChannelConfig, Config, PatternKind, SCHEMA_VERSION};
use crate::error::{LoglensError, Result, ValidationError};
use crate::redaction::{RedactionMode, Strategy};

const KNOWN_STRATEGIES: [&str; 3] = ["structured", "pattern", "adaptive"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_parsing(config, &mut errors);
        Self::validate_redaction(config, &mut errors);
        Self::validate_channel("clustering.original", &config.clustering.original, &mut errors);
        Self::validate_channel(
            "clustering.anonymized",
            &config.clustering.anonymized,
            &mut errors,
        );
        Self::validate_pipeline(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoglensError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_parsing(config: &Config, errors: &mut Vec<ValidationError>) {
        let order = &config.parsing.strategy_order;

        if order.is_empty() {
            errors.push(ValidationError::new(
                "parsing.strategy_order",
                "Strategy order cannot be empty",
            ));
        }

        for (i, name) in order.iter().enumerate() {
            if !KNOWN_STRATEGIES.contains(&name.as_str()) {
                errors.push(ValidationError::new(
                    format!("parsing.strategy_order[{}]", i),
                    format!(
                        "Strategy must be one of {:?}, got '{}'",
                        KNOWN_STRATEGIES, name
                    ),
                ));
            }
            if order[..i].contains(name) {
                errors.push(ValidationError::new(
                    format!("parsing.strategy_order[{}]", i),
                    format!("Duplicate strategy '{}'", name),
                ));
            }
        }

        if order.last().map(String::as_str) != Some("adaptive") {
            errors.push(ValidationError::new(
                "parsing.strategy_order",
                "The adaptive strategy must be the last entry",
            ));
        }

        if config.parsing.message_keys.is_empty() {
            errors.push(ValidationError::new(
                "parsing.message_keys",
                "At least one message key is required",
            ));
        }

        for (i, delimiter) in config.parsing.header_delimiters.iter().enumerate() {
            let mut chars = delimiter.chars();
            if chars.next().is_none() || chars.next().is_some() || !delimiter.is_ascii() {
                errors.push(ValidationError::new(
                    format!("parsing.header_delimiters[{}]", i),
                    format!("Delimiter must be a single ASCII character, got '{}'", delimiter),
                ));
            }
        }

        for (i, pattern) in config.parsing.patterns.iter().enumerate() {
            let path = format!("parsing.patterns[{}]", i);

            if !(0.0..=1.0).contains(&pattern.confidence) {
                errors.push(ValidationError::new(
                    format!("{}.confidence", path),
                    format!("Confidence must be between 0.0 and 1.0, got {}", pattern.confidence),
                ));
            }

            let regex = match regex::Regex::new(&pattern.pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    errors.push(ValidationError::new(
                        format!("{}.pattern", path),
                        format!("Pattern '{}' does not compile: {}", pattern.name, e),
                    ));
                    continue;
                }
            };

            let names: Vec<&str> = regex.capture_names().flatten().collect();
            match pattern.kind {
                PatternKind::Captures if names.is_empty() => {
                    errors.push(ValidationError::new(
                        format!("{}.pattern", path),
                        format!("Pattern '{}' defines no named groups", pattern.name),
                    ));
                }
                PatternKind::KeyValue if !(names.contains(&"key") && names.contains(&"value")) => {
                    errors.push(ValidationError::new(
                        format!("{}.pattern", path),
                        format!(
                            "Key/value pattern '{}' needs 'key' and 'value' groups",
                            pattern.name
                        ),
                    ));
                }
                _ => {}
            }
        }
    }

    fn validate_redaction(config: &Config, errors: &mut Vec<ValidationError>) {
        let redaction = &config.redaction;

        let mode = match RedactionMode::parse_mode(&redaction.mode) {
            Ok(mode) => Some(mode),
            Err(e) => {
                errors.push(ValidationError::new("redaction.mode", e.to_string()));
                None
            }
        };

        if redaction.mask_char.chars().count() != 1 {
            errors.push(ValidationError::new(
                "redaction.mask_char",
                format!("Mask character must be one character, got '{}'", redaction.mask_char),
            ));
        }

        if !(1..=64).contains(&redaction.mask_width) {
            errors.push(ValidationError::new(
                "redaction.mask_width",
                format!("Mask width must be between 1 and 64, got {}", redaction.mask_width),
            ));
        }

        if !(1..=64).contains(&redaction.hash_length) {
            errors.push(ValidationError::new(
                "redaction.hash_length",
                format!("Hash length must be between 1 and 64, got {}", redaction.hash_length),
            ));
        }

        for (i, recognizer) in redaction.recognizers.iter().enumerate() {
            let path = format!("redaction.recognizers[{}]", i);

            if let Err(e) = regex::Regex::new(&recognizer.pattern) {
                errors.push(ValidationError::new(
                    format!("{}.pattern", path),
                    format!("Recognizer '{}' does not compile: {}", recognizer.name, e),
                ));
            }

            if !(0.0..=1.0).contains(&recognizer.score) {
                errors.push(ValidationError::new(
                    format!("{}.score", path),
                    format!("Score must be between 0.0 and 1.0, got {}", recognizer.score),
                ));
            }

            if let Err(e) = Strategy::parse_strategy(&recognizer.strategy) {
                errors.push(ValidationError::new(format!("{}.strategy", path), e.to_string()));
            }
        }

        let semantic = &redaction.semantic;

        if !(0.0..=1.0).contains(&semantic.confidence_threshold) {
            errors.push(ValidationError::new(
                "redaction.semantic.confidence_threshold",
                format!(
                    "Confidence threshold must be between 0.0 and 1.0, got {}",
                    semantic.confidence_threshold
                ),
            ));
        }

        if let Err(e) = Strategy::parse_strategy(&semantic.default_strategy) {
            errors.push(ValidationError::new(
                "redaction.semantic.default_strategy",
                e.to_string(),
            ));
        }

        for (entity_type, strategy) in &semantic.strategies {
            if let Err(e) = Strategy::parse_strategy(strategy) {
                errors.push(ValidationError::new(
                    format!("redaction.semantic.strategies.{}", entity_type),
                    e.to_string(),
                ));
            }
        }

        if matches!(mode, Some(RedactionMode::Semantic | RedactionMode::Hybrid)) {
            if !semantic.enabled {
                errors.push(ValidationError::new(
                    "redaction.semantic.enabled",
                    format!("Mode '{}' requires the semantic recognizer", redaction.mode),
                ));
            }
            if semantic.endpoint.is_empty() {
                errors.push(ValidationError::new(
                    "redaction.semantic.endpoint",
                    "Semantic endpoint cannot be empty",
                ));
            }
            if semantic.timeout_ms == 0 {
                errors.push(ValidationError::new(
                    "redaction.semantic.timeout_ms",
                    "Timeout must be greater than 0",
                ));
            }
            if semantic.failure_threshold == 0 {
                errors.push(ValidationError::new(
                    "redaction.semantic.failure_threshold",
                    "Failure threshold must be greater than 0",
                ));
            }
            if semantic.workers == 0 {
                errors.push(ValidationError::new(
                    "redaction.semantic.workers",
                    "Worker count must be greater than 0",
                ));
            }
        }
    }

    fn validate_channel(path: &str, channel: &ChannelConfig, errors: &mut Vec<ValidationError>) {
        if channel.depth < 3 {
            errors.push(ValidationError::new(
                format!("{}.depth", path),
                format!("Depth must be at least 3, got {}", channel.depth),
            ));
        }

        if channel.max_children < 2 {
            errors.push(ValidationError::new(
                format!("{}.max_children", path),
                format!("max_children must be at least 2, got {}", channel.max_children),
            ));
        }

        let threshold = channel.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            errors.push(ValidationError::new(
                format!("{}.similarity_threshold", path),
                format!("Similarity threshold must be in (0.0, 1.0], got {}", threshold),
            ));
        }

        for (i, delimiter) in channel.extra_delimiters.iter().enumerate() {
            if delimiter.is_empty() || delimiter.chars().any(char::is_whitespace) {
                errors.push(ValidationError::new(
                    format!("{}.extra_delimiters[{}]", path, i),
                    "Delimiters must be non-empty and contain no whitespace",
                ));
            }
        }
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.pipeline.chunk_size == 0 {
            errors.push(ValidationError::new(
                "pipeline.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.pipeline.max_line_length == 0 {
            errors.push(ValidationError::new(
                "pipeline.max_line_length",
                "Maximum line length must be greater than 0",
            ));
        }

        if config.storage.state_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.state_file",
                "State file path cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_paths(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Err(LoglensError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_adaptive_must_be_last() {
        let mut config = Config::default();
        config.parsing.strategy_order = vec!["adaptive".to_string(), "structured".to_string()];
        assert!(error_paths(&config).contains(&"parsing.strategy_order".to_string()));
    }

    #[test]
    fn test_unknown_and_duplicate_strategies() {
        let mut config = Config::default();
        config.parsing.strategy_order = vec![
            "pattern".to_string(),
            "pattern".to_string(),
            "magic".to_string(),
            "adaptive".to_string(),
        ];
        let paths = error_paths(&config);
        assert!(paths.contains(&"parsing.strategy_order[1]".to_string()));
        assert!(paths.contains(&"parsing.strategy_order[2]".to_string()));
    }

    #[test]
    fn test_invalid_mode() {
        let mut config = Config::default();
        config.redaction.mode = "invalid".to_string();
        assert!(error_paths(&config).contains(&"redaction.mode".to_string()));
    }

    #[test]
    fn test_hybrid_requires_semantic_settings() {
        let mut config = Config::default();
        config.redaction.mode = "hybrid".to_string();
        assert!(error_paths(&config).contains(&"redaction.semantic.enabled".to_string()));

        config.redaction.semantic.enabled = true;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_uncompilable_recognizer() {
        let mut config = Config::default();
        config.redaction.recognizers[0].pattern = "([unclosed".to_string();
        assert!(error_paths(&config).contains(&"redaction.recognizers[0].pattern".to_string()));
    }

    #[test]
    fn test_key_value_pattern_needs_groups() {
        let mut config = Config::default();
        let kv = config
            .parsing
            .patterns
            .iter_mut()
            .find(|p| p.kind == PatternKind::KeyValue)
            .unwrap();
        kv.pattern = r"(?P<k>\w+)=(?P<v>\S+)".to_string();
        assert!(!error_paths(&config).is_empty());
    }

    #[test]
    fn test_channel_bounds() {
        let mut config = Config::default();
        config.clustering.original.depth = 2;
        config.clustering.anonymized.max_children = 1;
        config.clustering.anonymized.similarity_threshold = 0.0;

        let paths = error_paths(&config);
        assert!(paths.contains(&"clustering.original.depth".to_string()));
        assert!(paths.contains(&"clustering.anonymized.max_children".to_string()));
        assert!(paths.contains(&"clustering.anonymized.similarity_threshold".to_string()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.meta.schema_version = "9.9.9".to_string();
        config.pipeline.chunk_size = 0;
        config.redaction.mask_width = 0;
        assert_eq!(error_paths(&config).len(), 3);
    }
}
