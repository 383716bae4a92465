//! loglens - Log Field Extraction, Anonymization and Template Mining
//!
//! Reads heterogeneous log lines, extracts structured fields with a chain of
//! parsing strategies, redacts sensitive entities, and clusters every record
//! twice: once on its original message and once on its anonymized message.

pub mod cli;
pub mod clustering;
pub mod config;
pub mod error;
pub mod parsing;
pub mod patterns;
pub mod pipeline;
pub mod redaction;
pub mod storage;

pub use error::{LoglensError, Result};
