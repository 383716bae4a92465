//! Clustering state persistence
//!
//! File layout:
//! `magic (8) | format version (u32 LE) | BLAKE3 of payload (32) | payload`
//! where the payload is the zstd-compressed bincode encoding of both trees.

use crate::clustering::ChannelTrees;
use crate::config::ClusteringConfig;
use crate::error::{LoglensError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"LGLNSTAT";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 32;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    saved_at: DateTime<Utc>,
    crate_version: String,
    trees: ChannelTrees,
}

/// Saves and restores both clustering trees
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write both trees atomically (temp file, then rename)
    pub fn save(&self, trees: &ChannelTrees) -> Result<()> {
        let bytes = Self::encode(trees)?;

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to create state directory: {}", parent.display()),
        })?;

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to create temp state file: {}", temp_path.display()),
        })?;
        file.write_all(&bytes).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to write state file: {}", temp_path.display()),
        })?;
        file.sync_all().map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to sync state file: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| LoglensError::Io {
            source: e,
            context: format!(
                "Failed to move state file into place: {} -> {}",
                temp_path.display(),
                self.path.display()
            ),
        })?;

        tracing::info!(
            "Saved clustering state to {} ({} + {} clusters, {} bytes)",
            self.path.display(),
            trees.original.len(),
            trees.anonymized.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Read both trees and check them against the configured depths
    pub fn load(&self, config: &ClusteringConfig) -> Result<ChannelTrees> {
        if !self.path.exists() {
            return Err(LoglensError::StateNotFound {
                path: self.path.clone(),
            });
        }

        let bytes = fs::read(&self.path).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to read state file: {}", self.path.display()),
        })?;

        let mut trees = Self::decode(&bytes)?;
        trees.reconfigure(config)?;

        tracing::info!(
            "Loaded clustering state from {} ({} + {} clusters)",
            self.path.display(),
            trees.original.len(),
            trees.anonymized.len()
        );
        Ok(trees)
    }

    /// Load the state if the file exists, otherwise start with empty trees
    pub fn load_or_new(&self, config: &ClusteringConfig) -> Result<ChannelTrees> {
        if self.exists() {
            self.load(config)
        } else {
            tracing::debug!("No state at {}, starting fresh", self.path.display());
            Ok(ChannelTrees::new(config))
        }
    }

    /// Read the trees without applying any configuration
    pub fn inspect(&self) -> Result<ChannelTrees> {
        let bytes = fs::read(&self.path).map_err(|e| LoglensError::Io {
            source: e,
            context: format!("Failed to read state file: {}", self.path.display()),
        })?;
        Self::decode(&bytes)
    }

    fn encode(trees: &ChannelTrees) -> Result<Vec<u8>> {
        let state = PersistedState {
            saved_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            trees: trees.clone(),
        };

        let raw = bincode::serialize(&state)?;
        let payload = zstd::encode_all(&raw[..], COMPRESSION_LEVEL).map_err(|e| LoglensError::Io {
            source: e,
            context: "Failed to compress clustering state".to_string(),
        })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(blake3::hash(&payload).as_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<ChannelTrees> {
        if bytes.len() < HEADER_LEN {
            return Err(LoglensError::StateCorrupt(format!(
                "file too short ({} bytes)",
                bytes.len()
            )));
        }

        let (magic, rest) = bytes.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(LoglensError::StateCorrupt("bad magic".to_string()));
        }

        let (version, rest) = rest.split_at(4);
        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(version);
        let version = u32::from_le_bytes(version_bytes);
        if version != FORMAT_VERSION {
            return Err(LoglensError::StateCorrupt(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let (checksum, payload) = rest.split_at(32);
        if blake3::hash(payload).as_bytes() != checksum {
            return Err(LoglensError::StateCorrupt("checksum mismatch".to_string()));
        }

        let raw = zstd::decode_all(payload)
            .map_err(|e| LoglensError::StateCorrupt(format!("cannot decompress: {}", e)))?;
        let state: PersistedState = bincode::deserialize(&raw)
            .map_err(|e| LoglensError::StateCorrupt(format!("cannot decode: {}", e)))?;

        tracing::debug!(
            "State written by loglens {} at {}",
            state.crate_version,
            state.saved_at
        );
        Ok(state.trees)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path.with_file_name(format!("{}.tmp", name))
    }
}
