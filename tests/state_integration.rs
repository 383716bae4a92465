// Integration tests for persisting and resuming clustering state
use loglens::clustering::{ClusterId, ClusterLimit};
use loglens::config::Config;
use loglens::error::LoglensError;
use loglens::parsing::RawLine;
use loglens::pipeline::{Pipeline, ProcessedRecord};
use loglens::storage::StateStore;
use tempfile::TempDir;

fn lines(start: u64, texts: &[&str]) -> Vec<RawLine> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| RawLine::new("svc.log", start + i as u64, *t))
        .collect()
}

#[test]
fn test_resumed_run_continues_ids_and_templates() {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(temp_dir.path().join("state.bin"));
    let config = Config::default();

    let mut first = Pipeline::from_config(&config).unwrap();
    let _ = first
        .process_batch(lines(
            1,
            &[
                "session opened for user root",
                "session opened for user alice",
                "disk quota exceeded",
            ],
        ))
        .count();
    first.save_state(&store).unwrap();
    assert!(store.exists());

    let trees = store.load(&config.clustering).unwrap();
    assert_eq!(trees.original.len(), 2);

    let mut second = Pipeline::from_config(&config).unwrap().with_trees(trees);
    let records: Vec<ProcessedRecord> = second
        .process_batch(lines(
            4,
            &["session opened for user bob", "connection reset by peer"],
        ))
        .collect();

    assert_eq!(records[0].original.cluster_id(), Some(ClusterId(1)));
    assert_eq!(
        records[0].original.template(),
        Some("session opened for user <*>")
    );
    assert_eq!(records[1].original.cluster_id(), Some(ClusterId(3)));
}

#[test]
fn test_resumed_run_matches_uninterrupted_run() {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(temp_dir.path().join("state.bin"));
    let config = Config::default();

    let head = lines(1, &["job 1 started", "job 2 started", "cache miss for key a1"]);
    let tail = lines(4, &["job 3 failed", "cache miss for key b7", "job 4 started"]);

    let mut whole = Pipeline::from_config(&config).unwrap();
    let expected: Vec<ProcessedRecord> = whole
        .process_batch(head.iter().chain(&tail).cloned())
        .collect();

    let mut first = Pipeline::from_config(&config).unwrap();
    let _ = first.process_batch(head).count();
    first.save_state(&store).unwrap();

    let trees = store.load(&config.clustering).unwrap();
    let mut second = Pipeline::from_config(&config).unwrap().with_trees(trees);
    let resumed: Vec<ProcessedRecord> = second.process_batch(tail).collect();

    assert_eq!(&expected[3..], resumed.as_slice());
}

#[test]
fn test_depth_mismatch_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(temp_dir.path().join("state.bin"));
    let config = Config::default();

    let mut pipeline = Pipeline::from_config(&config).unwrap();
    let _ = pipeline
        .process_batch(lines(1, &["worker ready"]))
        .count();
    pipeline.save_state(&store).unwrap();

    let mut deeper = Config::default();
    deeper.clustering.anonymized.depth = 6;

    let result = store.load(&deeper.clustering);
    match result {
        Err(LoglensError::StateVersionMismatch {
            channel,
            expected,
            found,
        }) => {
            assert_eq!(channel, "anonymized");
            assert_eq!(expected, 6);
            assert_eq!(found, 4);
        }
        other => panic!("expected a depth mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_other_settings_follow_configuration_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(temp_dir.path().join("state.bin"));
    let config = Config::default();

    let mut pipeline = Pipeline::from_config(&config).unwrap();
    let _ = pipeline
        .process_batch(lines(1, &["alpha beta gamma"]))
        .count();
    pipeline.save_state(&store).unwrap();

    // Capacity is a runtime setting, so a full tree can be loaded with a smaller limit
    let mut limited = Config::default();
    limited.clustering.original.max_clusters = ClusterLimit::limited(1);
    let trees = store.load(&limited.clustering).unwrap();

    let mut resumed = Pipeline::from_config(&limited).unwrap().with_trees(trees);
    let records: Vec<ProcessedRecord> = resumed
        .process_batch(lines(2, &["delta epsilon"]))
        .collect();
    assert!(records[0].original.cluster_id().is_none());
}

#[test]
fn test_corrupt_state_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("state.bin");
    std::fs::write(&path, b"definitely not a state file").unwrap();

    let store = StateStore::new(path);
    let result = store.load(&Config::default().clustering);
    assert!(matches!(result, Err(LoglensError::StateCorrupt(_))));
}

#[test]
fn test_missing_state_starts_fresh() {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(temp_dir.path().join("absent.bin"));
    let config = Config::default();

    assert!(matches!(
        store.load(&config.clustering),
        Err(LoglensError::StateNotFound { .. })
    ));
    let trees = store.load_or_new(&config.clustering).unwrap();
    assert!(trees.original.is_empty());
    assert!(trees.anonymized.is_empty());
}
