//! Dual-path anonymization
//!
//! The classic path runs the registry's regex recognizers; the semantic path
//! delegates to an external [`EntityRecognizer`]. Both always read the
//! original message and never see each other's output. In hybrid mode their
//! entity lists are merged only at the end.

mod apply;
mod classic;
mod presidio;
mod semantic;
mod types;

pub use apply::{resolve_overlaps, Redactor};
pub use classic::ClassicDetector;
pub use presidio::PresidioRecognizer;
pub use semantic::{CircuitBreaker, EntityRecognizer, EntitySpan, RecognizerError, SemanticDetector};
pub use types::{
    AnonymizedView, DetectedEntity, DetectionSource, RedactionMode, RedactionOutcome, Strategy,
    ViewChannel,
};

use crate::config::RedactionConfig;
use crate::error::{LoglensError, Result};
use crate::patterns::PatternRegistry;
use std::sync::Arc;

/// Runs the configured detection paths over a message
pub struct RedactionEngine {
    mode: RedactionMode,
    classic: ClassicDetector,
    semantic: Option<SemanticDetector>,
    redactor: Redactor,
}

impl RedactionEngine {
    /// Build the engine, creating a Presidio client when semantic detection is enabled
    pub fn from_config(config: &RedactionConfig, registry: Arc<PatternRegistry>) -> Result<Self> {
        let recognizer: Option<Arc<dyn EntityRecognizer>> = if config.semantic.enabled {
            Some(Arc::new(PresidioRecognizer::new(&config.semantic)?))
        } else {
            None
        };
        Self::new(config, registry, recognizer)
    }

    /// Build the engine with an explicit semantic collaborator
    pub fn new(
        config: &RedactionConfig,
        registry: Arc<PatternRegistry>,
        recognizer: Option<Arc<dyn EntityRecognizer>>,
    ) -> Result<Self> {
        let mode = RedactionMode::parse_mode(&config.mode)?;

        let semantic = recognizer
            .map(|r| SemanticDetector::new(&config.semantic, r))
            .transpose()?;

        if mode != RedactionMode::Classic && semantic.is_none() {
            return Err(LoglensError::Config(format!(
                "Redaction mode '{}' requires a semantic recognizer",
                mode
            )));
        }

        tracing::info!(
            "Redaction engine ready: mode={}, recognizers={}, semantic={}",
            mode,
            registry.recognizers.len(),
            semantic
                .as_ref()
                .map(|s| s.recognizer_name())
                .unwrap_or("none")
        );

        Ok(Self {
            mode,
            classic: ClassicDetector::new(registry),
            semantic,
            redactor: Redactor::new(config),
        })
    }

    pub fn mode(&self) -> RedactionMode {
        self.mode
    }

    /// Produce the anonymized view(s) of one message
    pub fn redact(&self, text: &str) -> RedactionOutcome {
        match (self.mode, self.semantic.as_ref()) {
            (RedactionMode::Semantic, Some(semantic)) => match semantic.detect(text) {
                Ok(entities) => self.outcome(vec![self.view(ViewChannel::Semantic, text, entities)]),
                Err(e) => self.degraded(text, &e),
            },
            (RedactionMode::Hybrid, Some(semantic)) => {
                let (classic, semantic) =
                    rayon::join(|| self.classic.detect(text), || semantic.detect(text));

                match semantic {
                    Ok(semantic) => {
                        let combined = combine(&classic, &semantic);
                        let mut outcome = self.outcome(vec![
                            self.view(ViewChannel::Classic, text, classic),
                            self.view(ViewChannel::Semantic, text, semantic),
                        ]);
                        outcome.combined = Some(self.view(ViewChannel::Hybrid, text, combined));
                        outcome
                    }
                    Err(e) => self.degraded(text, &e),
                }
            }
            _ => {
                let entities = self.classic.detect(text);
                self.outcome(vec![self.view(ViewChannel::Classic, text, entities)])
            }
        }
    }

    fn view(&self, channel: ViewChannel, text: &str, entities: Vec<DetectedEntity>) -> AnonymizedView {
        AnonymizedView {
            channel,
            redacted_message: self.redactor.apply(text, &entities),
            entities,
            degraded: false,
        }
    }

    fn outcome(&self, views: Vec<AnonymizedView>) -> RedactionOutcome {
        RedactionOutcome {
            mode: self.mode,
            views,
            combined: None,
            degraded: false,
        }
    }

    fn degraded(&self, text: &str, error: &RecognizerError) -> RedactionOutcome {
        tracing::warn!("Semantic redaction unavailable, using classic only: {}", error);
        let mut view = self.view(ViewChannel::Classic, text, self.classic.detect(text));
        view.degraded = true;
        RedactionOutcome {
            mode: self.mode,
            views: vec![view],
            combined: None,
            degraded: true,
        }
    }
}

/// Union of both entity lists without exact duplicates, overlaps resolved
/// longest first, then by score, then classic before semantic
fn combine(classic: &[DetectedEntity], semantic: &[DetectedEntity]) -> Vec<DetectedEntity> {
    let mut union: Vec<DetectedEntity> = classic.to_vec();
    for entity in semantic {
        let duplicate = union.iter().any(|e| {
            e.start == entity.start && e.end == entity.end && e.entity_type == entity.entity_type
        });
        if !duplicate {
            union.push(entity.clone());
        }
    }

    resolve_overlaps(
        union,
        |e| e,
        |a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.source.cmp(&b.source))
        },
    )
}
