use super::tokens::TokenSequence;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroUsize;

/// Legacy "no limit" value; anything at or above it is unbounded
pub const UNBOUNDED_SENTINEL: usize = 999_999;

/// Cluster identifier, unique and stable within one tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A discovered message template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub template: TokenSequence,
    pub size: u64,
    pub last_updated: DateTime<Utc>,
}

impl Cluster {
    pub fn template_string(&self) -> String {
        self.template.render()
    }
}

/// Upper bound on the number of clusters a tree may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterLimit {
    Unbounded,
    Limited(NonZeroUsize),
}

impl ClusterLimit {
    /// Build a limit from a count; zero is clamped to one and values at or
    /// above [`UNBOUNDED_SENTINEL`] are unbounded.
    pub fn limited(count: usize) -> Self {
        if count >= UNBOUNDED_SENTINEL {
            return Self::Unbounded;
        }
        Self::Limited(NonZeroUsize::new(count).unwrap_or(NonZeroUsize::MIN))
    }

    /// True if a tree holding `count` clusters may create another one
    pub fn allows_new(&self, count: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Limited(max) => count < max.get(),
        }
    }
}

impl fmt::Display for ClusterLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Limited(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for ClusterLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unbounded => serializer.serialize_str("unbounded"),
            Self::Limited(n) => serializer.serialize_u64(n.get() as u64),
        }
    }
}

impl<'de> Deserialize<'de> for ClusterLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) if n <= 0 => Err(de::Error::custom(format!(
                "max_clusters must be positive, got {}",
                n
            ))),
            Raw::Count(n) => Ok(Self::limited(usize::try_from(n).unwrap_or(usize::MAX))),
            Raw::Text(s) if s.eq_ignore_ascii_case("unbounded") => Ok(Self::Unbounded),
            Raw::Text(s) => Err(de::Error::custom(format!(
                "max_clusters must be a positive integer or \"unbounded\", got '{}'",
                s
            ))),
        }
    }
}

/// Outcome of clustering one record on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelAssignment {
    Clustered {
        cluster_id: ClusterId,
        template: String,
        size: u64,
    },
    Unclustered {
        reason: String,
    },
    /// Template supplied by an external prompt-based parser
    External {
        template: String,
    },
}

impl ChannelAssignment {
    pub fn cluster_id(&self) -> Option<ClusterId> {
        match self {
            Self::Clustered { cluster_id, .. } => Some(*cluster_id),
            _ => None,
        }
    }

    pub fn template(&self) -> Option<&str> {
        match self {
            Self::Clustered { template, .. } | Self::External { template } => Some(template),
            Self::Unclustered { .. } => None,
        }
    }
}

/// How a record changed the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterChange {
    Created,
    /// Matched and generalized the template
    Updated,
    /// Matched without changing the template
    Unchanged,
    /// Absorbed by the lowest-scoring leaf candidate because the tree is full
    Absorbed,
}

/// Result of [`super::ClusterTree::add`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterUpdate {
    pub cluster_id: ClusterId,
    pub template: String,
    pub size: u64,
    pub change: ClusterChange,
}

impl From<ClusterUpdate> for ChannelAssignment {
    fn from(update: ClusterUpdate) -> Self {
        Self::Clustered {
            cluster_id: update.cluster_id,
            template: update.template,
            size: update.size,
        }
    }
}

/// Why a record could not be clustered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("message has no tokens")]
    EmptySequence,
    #[error("cluster limit {limit} reached and no candidate can absorb the record")]
    CapacityExhausted { limit: ClusterLimit },
}

/// Per-tree counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub unclustered: u64,
    pub load_shed: u64,
    pub leaf_overflows: u64,
}
