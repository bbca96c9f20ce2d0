mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{start_engine_with, ScriptedGateway};
use db::MemoryStore;
use engine::{EngineConfig, EngineError, Sequence, StandardProfile, FRAMES_PER_VISIT};
use sequencer_core::{SequenceState, SubCommand};

fn visited(target: &str, exposures: usize) -> Sequence {
    let mut sequence = Sequence::with_profile(
        "darks",
        Arc::new(StandardProfile::new().with_visit_caller("sps")),
    );
    for _ in 0..exposures {
        sequence.add(SubCommand::new(target, "expose dark exptime=30").visited(true, true));
    }
    sequence
}

#[tokio::test(start_paused = true)]
async fn test_one_visit_per_caller() {
    let gateway = ScriptedGateway::new();
    gateway.delay("expose", Duration::from_secs(30));
    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_with(
        gateway.clone(),
        store.clone(),
        EngineConfig::default(),
        &["enu_sm1", "enu_sm2"],
    )
    .await;

    let first = engine.submit(visited("enu_sm1", 1)).await.unwrap();
    assert_eq!(first.sequence().visit_id(), Some(1));

    let err = engine.submit(visited("enu_sm2", 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::VisitActive(ref caller) if caller == "sps"));
    assert!(!engine.registry().is_locked("enu_sm2"));

    first.wait().await.unwrap();
    assert!(!engine.visits().is_active("sps"));

    let second = engine.submit(visited("enu_sm2", 1)).await.unwrap();
    assert_eq!(second.sequence().visit_id(), Some(2));
    second.wait().await.unwrap();

    assert_eq!(
        gateway.calls(),
        vec![
            "enu_sm1 expose dark exptime=30 visit=1 frameId=100",
            "enu_sm2 expose dark exptime=30 visit=2 frameId=200"
        ]
    );
    assert_eq!(store.visits().len(), 2);
    let correlations = store.correlations();
    assert_eq!(correlations.len(), 2);
    assert_eq!(correlations[0].sequence_id, first.id());
    assert_eq!(correlations[0].visit_id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_frames_exhausted_fails_sequence() {
    let gateway = ScriptedGateway::new();
    let engine = start_engine_with(
        gateway.clone(),
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
        &["enu_sm1"],
    )
    .await;

    let job = engine
        .submit(visited("enu_sm1", FRAMES_PER_VISIT as usize + 1))
        .await
        .unwrap();
    let err = job.wait().await.unwrap_err();

    assert!(matches!(err, EngineError::SubCommandFailed { ref reason, .. } if reason == "visit 1 ran out of frames"));
    assert_eq!(job.state(), SequenceState::Failed);

    let calls = gateway.calls();
    assert_eq!(calls.len(), FRAMES_PER_VISIT as usize);
    assert!(calls[0].ends_with("frameId=100"));
    assert!(calls[99].ends_with("frameId=199"));
    assert!(!engine.visits().is_active("sps"));
}

#[tokio::test(start_paused = true)]
async fn test_visit_released_on_abort() {
    let gateway = ScriptedGateway::new();
    gateway.delay("expose", Duration::from_secs(50));
    let engine = start_engine_with(
        gateway,
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
        &["enu_sm1"],
    )
    .await;

    let job = engine.submit(visited("enu_sm1", 3)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(engine.visits().is_active("sps"));

    assert_eq!(job.abort().await, SequenceState::Aborted);
    assert!(!engine.visits().is_active("sps"));
    assert!(engine.submit(visited("enu_sm1", 1)).await.is_ok());
}
