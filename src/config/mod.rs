//! Configuration management for loglens
//!
//! Loads the TOML configuration, applies environment and profile overrides and
//! runs the validator. An invalid configuration is fatal: the pipeline never
//! starts with undefined parsing, redaction or clustering semantics.

use crate::clustering::ClusterLimit;
use crate::error::{LoglensError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Schema version understood by this build
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parsing chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// Strategy names in priority order; `adaptive` must come last
    pub strategy_order: Vec<String>,
    /// Field names used as the normalized message of structured records
    pub message_keys: Vec<String>,
    /// Delimiters tried when detecting a header line
    pub header_delimiters: Vec<String>,
    /// Named patterns used by the pattern-based strategy
    pub patterns: Vec<ParsingPatternConfig>,
}

/// How a named parsing pattern turns a match into fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Named capture groups become fields
    #[default]
    Captures,
    /// Every match contributes one `key`/`value` pair
    KeyValue,
}

/// Named parsing pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingPatternConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub kind: PatternKind,
    pub confidence: f32,
    #[serde(default)]
    pub description: String,
}

/// Redaction engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// "classic", "semantic" or "hybrid"
    pub mode: String,
    pub mask_char: String,
    pub mask_width: usize,
    pub hash_salt: String,
    pub hash_length: usize,
    /// Entity type -> replacement placeholder
    #[serde(default)]
    pub placeholders: HashMap<String, String>,
    #[serde(default)]
    pub recognizers: Vec<RecognizerConfig>,
    #[serde(default)]
    pub semantic: SemanticConfig,
}

/// Classic (regex) recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub name: String,
    pub entity_type: String,
    pub pattern: String,
    pub score: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_enabled() -> bool {
    true
}

fn default_strategy() -> String {
    "replace".to_string()
}

/// Semantic entity-recognition collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub language: String,
    pub confidence_threshold: f32,
    pub timeout_ms: u64,
    pub default_strategy: String,
    /// Entity type -> strategy
    #[serde(default)]
    pub strategies: HashMap<String, String>,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    /// Threads kept for recognizer calls
    #[serde(default = "default_semantic_workers")]
    pub workers: usize,
}

fn default_semantic_workers() -> usize {
    4
}

/// Per-channel clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub original: ChannelConfig,
    pub anonymized: ChannelConfig,
}

/// Template clustering tree settings for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Tree depth counting the root and the token-count layer
    pub depth: usize,
    pub max_children: usize,
    pub max_clusters: ClusterLimit,
    pub similarity_threshold: f64,
    #[serde(default = "default_extra_delimiters")]
    pub extra_delimiters: Vec<String>,
}

fn default_extra_delimiters() -> Vec<String> {
    vec!["=".to_string()]
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub parallel: bool,
    pub chunk_size: usize,
    /// Lines longer than this (bytes) are truncated before extraction
    pub max_line_length: usize,
}

/// Clustering state persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub state_file: PathBuf,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LoglensError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LoglensError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(mode) = overrides.redaction_mode {
            self.redaction.mode = mode;
        }
        if let Some(threshold) = overrides.similarity_threshold {
            self.clustering.original.similarity_threshold = threshold;
            self.clustering.anonymized.similarity_threshold = threshold;
        }
        if let Some(parallel) = overrides.parallel {
            self.pipeline.parallel = parallel;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LOGLENS_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LOGLENS_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "REDACTION__MODE" => {
                self.redaction.mode = value.to_string();
            }
            "REDACTION__SEMANTIC__ENDPOINT" => {
                self.redaction.semantic.endpoint = value.to_string();
            }
            "CLUSTERING__SIMILARITY_THRESHOLD" => {
                let threshold: f64 =
                    value.parse().map_err(|_| LoglensError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as float", value),
                    })?;
                self.clustering.original.similarity_threshold = threshold;
                self.clustering.anonymized.similarity_threshold = threshold;
            }
            "PIPELINE__PARALLEL" => {
                self.pipeline.parallel =
                    value.parse().map_err(|_| LoglensError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "STORAGE__STATE_FILE" => {
                self.storage.state_file = PathBuf::from(value);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LoglensError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("loglens").join("config.toml"))
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| LoglensError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LoglensError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
            },
            parsing: ParsingConfig::default(),
            redaction: RedactionConfig::default(),
            clustering: ClusteringConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            strategy_order: vec![
                "structured".to_string(),
                "pattern".to_string(),
                "adaptive".to_string(),
            ],
            message_keys: ["message", "msg", "log", "text"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            header_delimiters: [",", ";", "|", "\t"].iter().map(|s| s.to_string()).collect(),
            patterns: vec![
                ParsingPatternConfig {
                    name: "syslog".to_string(),
                    pattern: r"^(?P<timestamp>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(?P<host>\S+)\s+(?P<program>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s*(?P<message>.*)$".to_string(),
                    kind: PatternKind::Captures,
                    confidence: 0.9,
                    description: "BSD syslog line".to_string(),
                },
                ParsingPatternConfig {
                    name: "timestamp_level".to_string(),
                    pattern: r"^\[?(?P<timestamp>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\]?\s+\[?(?P<level>TRACE|DEBUG|INFO|NOTICE|WARN|WARNING|ERROR|CRITICAL|FATAL)\]?:?\s+(?P<message>.*)$".to_string(),
                    kind: PatternKind::Captures,
                    confidence: 0.8,
                    description: "Timestamp followed by a level".to_string(),
                },
                ParsingPatternConfig {
                    name: "key_value".to_string(),
                    pattern: r#"(?P<key>[A-Za-z_][\w.\-]*)=(?P<value>"[^"]*"|\S*)"#.to_string(),
                    kind: PatternKind::KeyValue,
                    confidence: 0.6,
                    description: "key=value pairs".to_string(),
                },
            ],
        }
    }
}

impl Default for RedactionConfig {
    fn default() -> Self {
        let recognizer = |name: &str, entity_type: &str, pattern: &str, score: f32, strategy: &str| {
            RecognizerConfig {
                name: name.to_string(),
                entity_type: entity_type.to_string(),
                pattern: pattern.to_string(),
                score,
                enabled: true,
                strategy: strategy.to_string(),
            }
        };

        let placeholders = [
            ("IP_ADDRESS", "<IP>"),
            ("MAC_ADDRESS", "<MAC>"),
            ("EMAIL_ADDRESS", "<EMAIL>"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            mode: "classic".to_string(),
            mask_char: "*".to_string(),
            mask_width: 8,
            hash_salt: "loglens".to_string(),
            hash_length: 16,
            placeholders,
            recognizers: vec![
                recognizer(
                    "email",
                    "EMAIL_ADDRESS",
                    r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                    0.95,
                    "replace",
                ),
                recognizer(
                    "ipv4",
                    "IP_ADDRESS",
                    r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
                    0.9,
                    "replace",
                ),
                recognizer(
                    "mac",
                    "MAC_ADDRESS",
                    r"\b(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}\b",
                    0.9,
                    "replace",
                ),
                recognizer(
                    "uuid",
                    "UUID",
                    r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
                    0.9,
                    "hash",
                ),
                recognizer(
                    "credit_card",
                    "CREDIT_CARD",
                    r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
                    0.8,
                    "mask",
                ),
                recognizer("ssn", "US_SSN", r"\b\d{3}-\d{2}-\d{4}\b", 0.7, "mask"),
                recognizer(
                    "fortinet_device",
                    "DEVICE_ID",
                    r"\bFGT[0-9A-Z]{8,}\b",
                    0.85,
                    "replace",
                ),
            ],
            semantic: SemanticConfig::default(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:5002".to_string(),
            language: "en".to_string(),
            confidence_threshold: 0.5,
            timeout_ms: 2000,
            default_strategy: "replace".to_string(),
            strategies: HashMap::new(),
            failure_threshold: 3,
            cooldown_secs: 30,
            workers: default_semantic_workers(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            original: ChannelConfig::default(),
            anonymized: ChannelConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            max_children: 100,
            max_clusters: ClusterLimit::limited(1000),
            similarity_threshold: 0.4,
            extra_delimiters: default_extra_delimiters(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            chunk_size: 1024,
            max_line_length: 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("~/.loglens/state.bin"),
        }
    }
}
