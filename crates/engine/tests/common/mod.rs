#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use db::MemoryStore;
use engine::{
    CommandGateway, DispatchContext, DispatchRequest, DispatchSignal, Engine, EngineConfig,
    GatewayError,
};
use sequencer_core::{Reply, ReplyLevel, ResourceKind};

/// In-process gateway driven by command heads.
///
/// Every call is recorded as `"<target> <command>"`. Heads can be given a delay, made to fail
/// or made to panic. Abort and finish signals end the in-flight call early.
pub struct ScriptedGateway {
    default_delay: Duration,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashSet<String>>,
    panics: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            default_delay: Duration::from_millis(10),
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            panics: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn delay(&self, head: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(head.to_string(), delay);
    }

    pub fn fail(&self, head: &str) {
        self.failures.lock().unwrap().insert(head.to_string());
    }

    pub fn heal(&self, head: &str) {
        self.failures.lock().unwrap().remove(head);
    }

    pub fn panic_on(&self, head: &str) {
        self.panics.lock().unwrap().insert(head.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandGateway for ScriptedGateway {
    async fn call(
        &self,
        request: &DispatchRequest,
        ctx: &mut DispatchContext,
    ) -> Result<Reply, GatewayError> {
        let head = request.command_head().to_string();
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", request.target, request.command));

        if self.panics.lock().unwrap().contains(&head) {
            panic!("{head} blew up");
        }

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&head)
            .copied()
            .unwrap_or(self.default_delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            signal = ctx.interrupted() => {
                return Ok(match signal {
                    DispatchSignal::Abort => Reply::failed("text=\"aborted\"")
                        .with_line(ReplyLevel::Error, format!("{head} aborted")),
                    _ => Reply::ok("text=\"finished early\""),
                });
            }
        }

        if self.failures.lock().unwrap().contains(&head) {
            return Ok(Reply::failed(format!("text=\"{head} failed\""))
                .with_line(ReplyLevel::Error, format!("{head} went wrong")));
        }
        Ok(Reply::ok(format!("text=\"{head} done\"")))
    }
}

pub async fn start_engine_with(
    gateway: Arc<ScriptedGateway>,
    store: Arc<MemoryStore>,
    config: EngineConfig,
    peers: &[&str],
) -> Engine {
    let engine = Engine::builder(gateway)
        .with_store(store)
        .with_config(config)
        .build()
        .await
        .unwrap();
    for peer in peers {
        engine.registry().add(ResourceKind::Peer, peer);
    }
    engine
}

pub async fn start_engine(gateway: Arc<ScriptedGateway>, peers: &[&str]) -> Engine {
    start_engine_with(
        gateway,
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
        peers,
    )
    .await
}
