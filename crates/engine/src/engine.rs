//! Composition root: wires admission, visits, the directory and the workers together.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use db::{MemoryStore, SequenceStore};
use events::{Event, EventBus};
use sequencer_core::SequenceState;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::directory::{LookupFilter, SequenceDirectory};
use crate::error::{EngineError, Result};
use crate::gateway::CommandGateway;
use crate::job::{Job, WorkerContext};
use crate::resources::{AdmissionController, ResourceRegistry};
use crate::sequence::{ResubmitMode, Sequence};
use crate::visit::{CounterSource, IdentifierSource, VisitAllocator};

pub struct EngineBuilder {
    config: EngineConfig,
    gateway: Arc<dyn CommandGateway>,
    store: Option<Arc<dyn SequenceStore>>,
    source: Option<Arc<dyn IdentifierSource>>,
    bus: Option<EventBus>,
}

impl EngineBuilder {
    pub fn new(gateway: Arc<dyn CommandGateway>) -> Self {
        Self {
            config: EngineConfig::default(),
            gateway,
            store: None,
            source: None,
            bus: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SequenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Source of visit ids. Defaults to an in-process counter.
    pub fn with_identifier_source(mut self, source: Arc<dyn IdentifierSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sequence ids continue after the highest one the store knows.
    pub async fn build(self) -> Result<Engine> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(CounterSource::default()));
        let bus = self.bus.unwrap_or_default();

        let last_id = store.last_sequence_id().await?;
        let registry = Arc::new(ResourceRegistry::new(self.config.ignored_peers.iter().cloned()));
        let admission = Arc::new(AdmissionController::new(registry.clone(), bus.clone()));

        info!(last_id, "Sequence engine ready");
        Ok(Engine {
            directory: Arc::new(SequenceDirectory::new(self.config.retention())),
            visits: Arc::new(VisitAllocator::new(source, store.clone())),
            config: self.config,
            registry,
            admission,
            gateway: self.gateway,
            store,
            bus,
            last_id: AtomicI64::new(last_id),
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    registry: Arc<ResourceRegistry>,
    admission: Arc<AdmissionController>,
    visits: Arc<VisitAllocator>,
    directory: Arc<SequenceDirectory>,
    gateway: Arc<dyn CommandGateway>,
    store: Arc<dyn SequenceStore>,
    bus: EventBus,
    last_id: AtomicI64,
}

impl Engine {
    pub fn builder(gateway: Arc<dyn CommandGateway>) -> EngineBuilder {
        EngineBuilder::new(gateway)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn visits(&self) -> &Arc<VisitAllocator> {
        &self.visits
    }

    pub fn directory(&self) -> &Arc<SequenceDirectory> {
        &self.directory
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn next_sequence_id(&self) -> i64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Admits `sequence` and starts it in the background.
    ///
    /// Fails without side effects when a resource is missing or busy, or when the visit cannot
    /// be obtained.
    pub async fn submit(&self, mut sequence: Sequence) -> Result<Arc<Job>> {
        let id = self.next_sequence_id();
        sequence.assign(id, self.bus.clone());

        let plan = self.admission.inspect(&sequence);
        let guard = self.admission.acquire(&plan.required(), Some(id))?;

        let sequence = Arc::new(sequence);
        sequence.activate(&self.visits).await?;

        if let Err(e) = self.store.insert_sequence(&sequence.record()).await {
            warn!(sequence_id = id, error = %e, "Failed to record sequence");
            self.bus.emit(Event::Error {
                message: e.to_string(),
                context: Some(format!("sequence {id} persistence")),
            });
        }

        let job = Job::spawn(
            sequence,
            &plan,
            guard,
            WorkerContext {
                gateway: self.gateway.clone(),
                store: self.store.clone(),
                grace: self.config.dispatch_grace(),
                poll_interval: self.config.poll_interval(),
            },
        );
        self.directory.register(job.clone());

        info!(
            sequence_id = id,
            resources = %job.resources().join(","),
            dependencies = %job.dependencies().join(","),
            "Sequence submitted"
        );
        Ok(job)
    }

    /// Submits and waits for the conclusion.
    pub async fn execute(&self, sequence: Sequence) -> Result<Arc<Job>> {
        let job = self.submit(sequence).await?;
        job.wait().await?;
        Ok(job)
    }

    fn job(&self, id: i64) -> Result<Arc<Job>> {
        self.directory
            .get(id)
            .ok_or_else(|| EngineError::identification(format!("sequence {id} is unknown")))
    }

    pub async fn abort(&self, id: i64) -> Result<SequenceState> {
        Ok(self.job(id)?.abort().await)
    }

    pub async fn finish_now(&self, id: i64) -> Result<SequenceState> {
        Ok(self.job(id)?.finish_now().await)
    }

    pub fn status(&self, id: i64) -> Result<String> {
        Ok(self.job(id)?.status())
    }

    pub fn lookup(&self, filter: &LookupFilter) -> Vec<Arc<Job>> {
        self.directory.lookup(filter)
    }

    pub fn identify(&self, filter: &LookupFilter, id: Option<i64>) -> Result<Arc<Job>> {
        self.directory.identify(filter, id)
    }

    /// Group id for `name`: the newest existing one when `continue_last`, else a new one.
    pub async fn request_group_id(&self, name: &str, continue_last: bool) -> Result<i64> {
        let group_id = if continue_last {
            self.store.last_group_matching(name).await?
        } else {
            self.store.insert_group(name).await?
        };
        info!(group_id, name = %name, continue_last, "Group id issued");
        Ok(group_id)
    }

    /// Submits a copy of sequence `id`.
    pub async fn resubmit(&self, id: i64, mode: ResubmitMode) -> Result<Arc<Job>> {
        let original = self.job(id)?;
        if original.is_active() {
            return Err(EngineError::identification(format!(
                "sequence {id} is still active"
            )));
        }
        self.submit(original.sequence().duplicate(mode)).await
    }
}
