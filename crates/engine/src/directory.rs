//! Registry of submitted sequences, keyed by id.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::job::Job;

/// Which jobs a lookup returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupFilter {
    pub active_only: bool,
    pub sequence_type: Option<String>,
    /// Visit caller category the sequence's profile uses.
    pub caller: Option<String>,
}

impl LookupFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, sequence_type: impl Into<String>) -> Self {
        self.sequence_type = Some(sequence_type.into());
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    fn matches(&self, job: &Job) -> bool {
        let sequence = job.sequence();
        if self.active_only && !sequence.is_active() {
            return false;
        }
        if let Some(ref sequence_type) = self.sequence_type {
            if sequence.sequence_type() != sequence_type {
                return false;
            }
        }
        if let Some(ref caller) = self.caller {
            if sequence.profile().visit_caller() != Some(caller.as_str()) {
                return false;
            }
        }
        true
    }
}

pub struct SequenceDirectory {
    entries: RwLock<BTreeMap<i64, Arc<Job>>>,
    retention: chrono::Duration,
}

impl SequenceDirectory {
    pub fn new(retention: chrono::Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            retention,
        }
    }

    /// Adds `job`, dropping concluded entries older than the retention period first.
    pub fn register(&self, job: Arc<Job>) {
        self.cleanup();
        let id = job.id();
        self.entries.write().unwrap().insert(id, job);
        debug!(sequence_id = id, "Sequence registered");
    }

    /// Removes obsolete entries, returns how many.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, job| !job.sequence().is_obsolete(now, self.retention));

        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Evicted obsolete sequences");
        }
        removed
    }

    pub fn get(&self, id: i64) -> Option<Arc<Job>> {
        self.entries.read().unwrap().get(&id).cloned()
    }

    /// Matching jobs, newest first.
    pub fn lookup(&self, filter: &LookupFilter) -> Vec<Arc<Job>> {
        self.entries
            .read()
            .unwrap()
            .values()
            .rev()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect()
    }

    /// Resolves the one job an operator command refers to.
    ///
    /// Without an id exactly one active job must match; with an id it must be among the
    /// active matches.
    pub fn identify(&self, filter: &LookupFilter, id: Option<i64>) -> Result<Arc<Job>> {
        let filter = LookupFilter {
            active_only: true,
            ..filter.clone()
        };
        let mut actives = self.lookup(&filter);

        match id {
            None => match actives.len() {
                0 => Err(EngineError::identification("no sequence is currently active")),
                1 => Ok(actives.remove(0)),
                _ => Err(EngineError::identification(
                    "multiple sequences are active, need to provide an id",
                )),
            },
            Some(id) => {
                if let Some(pos) = actives.iter().position(|job| job.id() == id) {
                    return Ok(actives.remove(pos));
                }
                let ids: Vec<String> = actives.iter().map(|job| job.id().to_string()).collect();
                Err(EngineError::identification(format!(
                    "{} is not active, actives({})",
                    id,
                    ids.join(",")
                )))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for SequenceDirectory {
    fn default() -> Self {
        Self::new(chrono::Duration::days(7))
    }
}
