//! Blocking HTTP client for a Presidio-compatible analyzer service

use super::semantic::{EntityRecognizer, EntitySpan, RecognizerError};
use crate::config::SemanticConfig;
use crate::error::{LoglensError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    language: &'a str,
    score_threshold: f32,
}

#[derive(Debug, Deserialize)]
struct AnalyzerResult {
    entity_type: String,
    start: usize,
    end: usize,
    score: f32,
}

/// `POST {endpoint}/analyze` against a Presidio analyzer
pub struct PresidioRecognizer {
    client: reqwest::blocking::Client,
    analyze_url: String,
}

impl PresidioRecognizer {
    pub fn new(config: &SemanticConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LoglensError::Config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            analyze_url: format!("{}/analyze", config.endpoint.trim_end_matches('/')),
        })
    }
}

impl EntityRecognizer for PresidioRecognizer {
    fn detect_entities(
        &self,
        text: &str,
        language: &str,
        threshold: f32,
    ) -> std::result::Result<Vec<EntitySpan>, RecognizerError> {
        let response = self
            .client
            .post(&self.analyze_url)
            .json(&AnalyzeRequest {
                text,
                language,
                score_threshold: threshold,
            })
            .send()
            .map_err(|e| RecognizerError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RecognizerError::Unavailable(format!(
                "analyzer returned HTTP {}",
                response.status()
            )));
        }

        let results: Vec<AnalyzerResult> = response
            .json()
            .map_err(|e| RecognizerError::InvalidResponse(e.to_string()))?;

        Ok(to_byte_spans(text, results))
    }

    fn name(&self) -> &str {
        "presidio"
    }
}

/// The analyzer reports character offsets; convert them to byte offsets.
/// Offsets past the end of the text map to an out-of-range value so the
/// caller drops them.
fn to_byte_spans(text: &str, results: Vec<AnalyzerResult>) -> Vec<EntitySpan> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let to_byte = |chars: usize| boundaries.get(chars).copied().unwrap_or(usize::MAX);

    results
        .into_iter()
        .map(|r| EntitySpan {
            start: to_byte(r.start),
            end: to_byte(r.end),
            entity_type: r.entity_type,
            score: r.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(entity_type: &str, start: usize, end: usize) -> AnalyzerResult {
        AnalyzerResult {
            entity_type: entity_type.to_string(),
            start,
            end,
            score: 0.85,
        }
    }

    #[test]
    fn test_char_offsets_become_byte_offsets() {
        let text = "Zoë met José";
        let spans = to_byte_spans(text, vec![result("PERSON", 0, 3), result("PERSON", 8, 12)]);

        assert_eq!(&text[spans[0].start..spans[0].end], "Zoë");
        assert_eq!(&text[spans[1].start..spans[1].end], "José");
    }

    #[test]
    fn test_out_of_range_offsets() {
        let spans = to_byte_spans("abc", vec![result("X", 1, 10)]);
        assert_eq!(spans[0].end, usize::MAX);
    }

    #[test]
    fn test_analyze_url() {
        let config = SemanticConfig {
            endpoint: "http://analyzer:5002/".to_string(),
            ..SemanticConfig::default()
        };
        let recognizer = PresidioRecognizer::new(&config).unwrap();
        assert_eq!(recognizer.analyze_url, "http://analyzer:5002/analyze");
        assert_eq!(recognizer.name(), "presidio");
    }
}
