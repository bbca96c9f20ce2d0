mod common;

use std::time::Duration;

use common::{start_engine, ScriptedGateway};
use engine::{EngineError, Sequence};
use sequencer_core::{ResourceKind, SequenceState, SubCommand};

fn sequence(targets: &[&str]) -> Sequence {
    let mut sequence = Sequence::new("expose");
    for target in targets {
        sequence.add(SubCommand::new(*target, "expose object exptime=5"));
    }
    sequence
}

#[tokio::test(start_paused = true)]
async fn test_disjoint_sequences_run_concurrently() {
    let gateway = ScriptedGateway::new();
    gateway.delay("expose", Duration::from_secs(5));
    let engine = start_engine(gateway, &["enu_sm1", "enu_sm2", "dcb"]).await;

    let (first, second) = tokio::join!(
        engine.submit(sequence(&["enu_sm1", "dcb"])),
        engine.submit(sequence(&["enu_sm2"]))
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.id(), second.id());
    assert_eq!(engine.registry().locked(), vec!["dcb", "enu_sm1", "enu_sm2"]);

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert!(engine.registry().locked().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_sequences_exactly_one_admitted() {
    let gateway = ScriptedGateway::new();
    gateway.delay("expose", Duration::from_secs(5));
    let engine = start_engine(gateway, &["enu_sm1", "enu_sm2", "dcb"]).await;

    let (first, second) = tokio::join!(
        engine.submit(sequence(&["enu_sm1", "dcb"])),
        engine.submit(sequence(&["enu_sm2", "dcb"]))
    );

    let (admitted, rejected) = match (first, second) {
        (Ok(job), Err(e)) | (Err(e), Ok(job)) => (job, e),
        (first, second) => panic!("expected one admission, got {first:?} and {second:?}"),
    };
    assert!(matches!(rejected, EngineError::ResourceBusy(ref names) if names == &["dcb"]));
    assert_eq!(rejected.to_string(), "dcb already busy.");

    // Nothing of the rejected request stays locked.
    let mut expected: Vec<String> = admitted.resources().to_vec();
    expected.sort();
    assert_eq!(engine.registry().locked(), expected);

    admitted.wait().await.unwrap();
    assert!(engine.submit(sequence(&["enu_sm2", "dcb"])).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_admission_is_all_or_nothing() {
    let gateway = ScriptedGateway::new();
    let engine = start_engine(gateway.clone(), &["enu_sm1", "dcb"]).await;

    let err = engine
        .submit(sequence(&["enu_sm1", "dcb", "enu_sm3", "enu_sm4"]))
        .await
        .unwrap_err();
    assert!(err.is_admission());
    assert_eq!(err.to_string(), "enu_sm3,enu_sm4 not connected.");
    assert!(engine.registry().locked().is_empty());
    assert!(engine.directory().is_empty());
    assert!(gateway.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ignored_peers_are_never_locked() {
    let gateway = ScriptedGateway::new();
    let engine = start_engine(gateway.clone(), &["dcb"]).await;

    let mut with_hub = sequence(&["dcb"]);
    with_hub.add(SubCommand::new("iic", "status"));

    let job = engine.submit(with_hub).await.unwrap();
    assert_eq!(job.resources(), ["dcb"]);
    job.wait().await.unwrap();
    assert_eq!(gateway.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resources_freed_after_tail() {
    let gateway = ScriptedGateway::new();
    gateway.fail("expose");
    let engine = start_engine(gateway.clone(), &["dcb", "enu_sm1"]).await;

    let job = engine
        .submit(
            sequence(&["enu_sm1"])
                .with_tail(["dcb arc off"])
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(job.wait().await.is_err());
    assert_eq!(job.state(), SequenceState::Failed);
    assert!(job.is_done());
    assert!(engine.registry().locked().is_empty());
    assert_eq!(gateway.calls().last().unwrap(), "dcb arc off");
}

#[tokio::test(start_paused = true)]
async fn test_topology_removal_while_locked() {
    let gateway = ScriptedGateway::new();
    gateway.delay("expose", Duration::from_secs(5));
    let engine = start_engine(gateway, &["enu_sm1"]).await;

    let job = engine.submit(sequence(&["enu_sm1"])).await.unwrap();
    engine.registry().remove("enu_sm1");

    job.wait().await.unwrap();
    assert!(!engine.registry().contains("enu_sm1"));
}

#[tokio::test(start_paused = true)]
async fn test_readded_resource_keeps_new_owner_lock() {
    let gateway = ScriptedGateway::new();
    gateway.delay("expose", Duration::from_secs(5));
    gateway.delay("slew", Duration::from_secs(30));
    let engine = start_engine(gateway, &["enu_sm1"]).await;

    let first = engine.submit(sequence(&["enu_sm1"])).await.unwrap();
    engine.registry().remove("enu_sm1");
    engine.registry().add(ResourceKind::Peer, "enu_sm1");

    let second = engine
        .submit(Sequence::new("slew").with_command(SubCommand::new("enu_sm1", "slew")))
        .await
        .unwrap();
    first.wait().await.unwrap();

    assert_eq!(second.state(), SequenceState::Executing);
    assert!(engine.registry().is_locked("enu_sm1"));
    assert!(matches!(
        engine.submit(sequence(&["enu_sm1"])).await,
        Err(EngineError::ResourceBusy(_))
    ));

    assert_eq!(second.abort().await, SequenceState::Aborted);
    second.wait().await.unwrap_err();
    assert!(!engine.registry().is_locked("enu_sm1"));
}
