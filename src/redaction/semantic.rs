//! Delegated (semantic) entity detection
//!
//! The actual detector is an external collaborator behind [`EntityRecognizer`].
//! Calls run on a small pool of worker threads, each bounded by a timeout and
//! guarded by a circuit breaker, so an unavailable collaborator costs at most
//! a few timeouts per cooldown.

use super::apply::resolve_overlaps;
use super::types::{DetectedEntity, DetectionSource, Strategy};
use crate::config::SemanticConfig;
use crate::error::{LoglensError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// An entity span reported by a recognizer (byte offsets)
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpan {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Why the semantic path could not produce entities
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecognizerError {
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),
    #[error("recognizer timed out after {0:?}")]
    Timeout(Duration),
    #[error("recognizer skipped, circuit open for another {0:?}")]
    CircuitOpen(Duration),
    #[error("invalid recognizer response: {0}")]
    InvalidResponse(String),
}

/// External semantic entity-recognition collaborator
pub trait EntityRecognizer: Send + Sync {
    fn detect_entities(
        &self,
        text: &str,
        language: &str,
        threshold: f32,
    ) -> std::result::Result<Vec<EntitySpan>, RecognizerError>;

    fn name(&self) -> &str;
}

/// Skips the collaborator for a cooldown after repeated failures
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
        }
    }

    /// Ok if a call may be attempted
    pub fn check(&self) -> std::result::Result<(), RecognizerError> {
        let mut open_until = self.open_until.lock().unwrap_or_else(|e| e.into_inner());
        match *open_until {
            Some(until) => {
                let now = Instant::now();
                if now < until {
                    Err(RecognizerError::CircuitOpen(until - now))
                } else {
                    *open_until = None;
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            let mut open_until = self.open_until.lock().unwrap_or_else(|e| e.into_inner());
            *open_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                "Semantic recognizer failed {} times in a row, skipping it for {:?}",
                failures,
                self.cooldown
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }
}

type Reply = std::result::Result<Vec<EntitySpan>, RecognizerError>;

struct Job {
    text: String,
    reply: mpsc::Sender<Reply>,
}

/// Fixed set of threads calling the recognizer.
///
/// Callers wait on their own reply channel with a timeout; a worker stuck in
/// a hung call only occupies itself, and a full queue is reported as
/// unavailability.
struct RecognizerWorkers {
    jobs: mpsc::SyncSender<Job>,
}

impl RecognizerWorkers {
    fn spawn(
        recognizer: Arc<dyn EntityRecognizer>,
        language: String,
        threshold: f32,
        size: usize,
    ) -> Result<Self> {
        let size = size.max(1);
        let (jobs, queue) = mpsc::sync_channel::<Job>(size * 4);
        let queue = Arc::new(Mutex::new(queue));

        for i in 0..size {
            let queue = Arc::clone(&queue);
            let recognizer = Arc::clone(&recognizer);
            let language = language.clone();
            std::thread::Builder::new()
                .name(format!("loglens-recognizer-{}", i))
                .spawn(move || loop {
                    let job = {
                        let queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                        queue.recv()
                    };
                    // Sender dropped: the detector is gone
                    let Ok(job) = job else {
                        break;
                    };
                    let result = recognizer.detect_entities(&job.text, &language, threshold);
                    // The caller is gone if it timed out
                    let _ = job.reply.send(result);
                })
                .map_err(|e| LoglensError::Io {
                    source: e,
                    context: "Failed to spawn recognizer worker".to_string(),
                })?;
        }

        Ok(Self { jobs })
    }

    fn call(&self, text: &str, timeout: Duration) -> Reply {
        let (reply, response) = mpsc::channel();
        let job = Job {
            text: text.to_string(),
            reply,
        };
        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::TrySendError::Full(_) => {
                RecognizerError::Unavailable("all recognizer workers are busy".to_string())
            }
            mpsc::TrySendError::Disconnected(_) => {
                RecognizerError::Unavailable("recognizer workers stopped".to_string())
            }
        })?;

        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(RecognizerError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(RecognizerError::Unavailable(
                "recognizer worker terminated".to_string(),
            )),
        }
    }
}

/// Semantic detection with per-entity-type strategies
pub struct SemanticDetector {
    recognizer_name: String,
    workers: RecognizerWorkers,
    threshold: f32,
    timeout: Duration,
    default_strategy: Strategy,
    strategies: HashMap<String, Strategy>,
    breaker: CircuitBreaker,
}

impl SemanticDetector {
    pub fn new(config: &SemanticConfig, recognizer: Arc<dyn EntityRecognizer>) -> Result<Self> {
        let strategies = config
            .strategies
            .iter()
            .map(|(entity_type, s)| Ok((entity_type.clone(), Strategy::parse_strategy(s)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        let default_strategy = Strategy::parse_strategy(&config.default_strategy)?;
        let recognizer_name = recognizer.name().to_string();

        Ok(Self {
            recognizer_name,
            workers: RecognizerWorkers::spawn(
                recognizer,
                config.language.clone(),
                config.confidence_threshold,
                config.workers,
            )?,
            threshold: config.confidence_threshold,
            timeout: Duration::from_millis(config.timeout_ms),
            default_strategy,
            strategies,
            breaker: CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs(config.cooldown_secs),
            ),
        })
    }

    pub fn recognizer_name(&self) -> &str {
        &self.recognizer_name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Detect entities in `text`, or report why the path is unavailable.
    /// The result is non-overlapping and sorted by start.
    pub fn detect(&self, text: &str) -> std::result::Result<Vec<DetectedEntity>, RecognizerError> {
        self.breaker.check()?;

        match self.workers.call(text, self.timeout) {
            Ok(spans) => {
                self.breaker.record_success();
                Ok(self.to_entities(text, spans))
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    fn to_entities(&self, text: &str, spans: Vec<EntitySpan>) -> Vec<DetectedEntity> {
        let entities = spans
            .into_iter()
            .filter(|span| {
                let valid = span.start < span.end
                    && span.end <= text.len()
                    && text.is_char_boundary(span.start)
                    && text.is_char_boundary(span.end);
                if !valid {
                    tracing::warn!(
                        "Dropping {} span {}..{} outside the message",
                        span.entity_type,
                        span.start,
                        span.end
                    );
                }
                valid && span.score >= self.threshold
            })
            .map(|span| DetectedEntity {
                strategy: self
                    .strategies
                    .get(&span.entity_type)
                    .copied()
                    .unwrap_or(self.default_strategy),
                entity_type: span.entity_type,
                start: span.start,
                end: span.end,
                score: span.score,
                source: DetectionSource::Semantic,
            })
            .collect();

        // Longest first, then highest score
        resolve_overlaps(
            entities,
            |e| e,
            |a, b| b.len().cmp(&a.len()).then_with(|| b.score.total_cmp(&a.score)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRecognizer(Vec<EntitySpan>);

    impl EntityRecognizer for FixedRecognizer {
        fn detect_entities(
            &self,
            _text: &str,
            _language: &str,
            _threshold: f32,
        ) -> std::result::Result<Vec<EntitySpan>, RecognizerError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct SlowRecognizer;

    impl EntityRecognizer for SlowRecognizer {
        fn detect_entities(
            &self,
            _text: &str,
            _language: &str,
            _threshold: f32,
        ) -> std::result::Result<Vec<EntitySpan>, RecognizerError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn span(entity_type: &str, start: usize, end: usize, score: f32) -> EntitySpan {
        EntitySpan {
            entity_type: entity_type.to_string(),
            start,
            end,
            score,
        }
    }

    fn semantic_config() -> SemanticConfig {
        SemanticConfig {
            enabled: true,
            timeout_ms: 50,
            failure_threshold: 2,
            cooldown_secs: 60,
            ..SemanticConfig::default()
        }
    }

    #[test]
    fn test_strategies_per_type_and_invalid_spans() {
        let mut config = semantic_config();
        config
            .strategies
            .insert("PERSON".to_string(), "hash".to_string());

        let recognizer = FixedRecognizer(vec![
            span("PERSON", 0, 5, 0.9),
            span("LOCATION", 9, 14, 0.8),
            span("PERSON", 3, 99, 0.9),
            span("NRP", 6, 8, 0.1),
        ]);
        let detector = SemanticDetector::new(&config, Arc::new(recognizer)).unwrap();

        let entities = detector.detect("Alice in Paris").unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].strategy, Strategy::Hash);
        assert_eq!(entities[1].strategy, Strategy::Replace);
        assert_eq!(entities[1].source, DetectionSource::Semantic);
    }

    #[test]
    fn test_unsorted_overlapping_spans_are_resolved() {
        let recognizer = FixedRecognizer(vec![
            span("PERSON", 10, 13, 0.9),
            span("PERSON", 0, 5, 0.9),
            span("NAME", 0, 3, 0.95),
            span("GREETING", 4, 9, 0.7),
        ]);
        let detector = SemanticDetector::new(&semantic_config(), Arc::new(recognizer)).unwrap();

        let entities = detector.detect("Alice met Bob").unwrap();
        let spans: Vec<(usize, usize)> = entities.iter().map(|e| (e.start, e.end)).collect();
        assert_eq!(spans, vec![(0, 5), (10, 13)]);
        assert!(entities.iter().all(|e| e.entity_type == "PERSON"));
    }

    #[test]
    fn test_timeout_then_circuit_opens() {
        let detector = SemanticDetector::new(&semantic_config(), Arc::new(SlowRecognizer)).unwrap();

        assert!(matches!(detector.detect("x"), Err(RecognizerError::Timeout(_))));
        assert!(!detector.breaker().is_open());
        assert!(matches!(detector.detect("x"), Err(RecognizerError::Timeout(_))));
        assert!(detector.breaker().is_open());
        assert!(matches!(detector.detect("x"), Err(RecognizerError::CircuitOpen(_))));
    }

    struct HungRecognizer;

    impl EntityRecognizer for HungRecognizer {
        fn detect_entities(
            &self,
            _text: &str,
            _language: &str,
            _threshold: f32,
        ) -> std::result::Result<Vec<EntitySpan>, RecognizerError> {
            std::thread::sleep(Duration::from_secs(3));
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "hung"
        }
    }

    #[test]
    fn test_hung_recognizer_fills_queue_instead_of_spawning() {
        let config = SemanticConfig {
            workers: 1,
            failure_threshold: 100,
            ..semantic_config()
        };
        let detector = SemanticDetector::new(&config, Arc::new(HungRecognizer)).unwrap();

        // One call occupies the only worker, four more fill the queue
        for _ in 0..5 {
            assert!(matches!(detector.detect("x"), Err(RecognizerError::Timeout(_))));
        }
        assert!(matches!(
            detector.detect("x"),
            Err(RecognizerError::Unavailable(_))
        ));
    }

    #[test]
    fn test_breaker_closes_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.check().is_ok());
    }
}
