//! Storage layer for loglens
//!
//! Persists the clustering trees between runs

pub mod state;

pub use state::{StateStore, FORMAT_VERSION};
