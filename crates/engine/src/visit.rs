//! Visit allocation and frame ids.
//!
//! A visit is an externally sourced id held by at most one sequence per caller category.
//! Frames are derived from it as `visit_id * 100 + k`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use db::SequenceStore;
use sequencer_core::VisitRecord;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

/// Frames available per visit.
pub const FRAMES_PER_VISIT: i64 = 100;

/// Monotonic, never reused id source.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    async fn fetch_next(&self, caller: &str) -> Result<i64>;
}

/// In-process counter, starting after `last`.
#[derive(Debug, Default)]
pub struct CounterSource {
    last: AtomicI64,
}

impl CounterSource {
    pub fn new(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }
}

#[async_trait]
impl IdentifierSource for CounterSource {
    async fn fetch_next(&self, _caller: &str) -> Result<i64> {
        Ok(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Reservation marker for a caller whose id is still being fetched.
const PENDING: i64 = -1;

type ActiveVisits = Arc<Mutex<HashMap<String, i64>>>;

pub struct VisitAllocator {
    source: Arc<dyn IdentifierSource>,
    store: Arc<dyn SequenceStore>,
    active: ActiveVisits,
}

impl VisitAllocator {
    pub fn new(source: Arc<dyn IdentifierSource>, store: Arc<dyn SequenceStore>) -> Self {
        Self {
            source,
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hands out a fresh visit for `caller`, failing if one is already active for it.
    ///
    /// Dropping the returned future mid-way gives the caller's slot back.
    pub async fn allocate(&self, caller: &str) -> Result<Visit> {
        let reservation = Reservation::take(&self.active, caller)?;

        let visit_id = match self.source.fetch_next(caller).await {
            Ok(id) => id,
            Err(e) => {
                warn!(caller = %caller, error = %e, "Could not fetch a visit id");
                return Err(match e {
                    EngineError::IdentifierSource(_) => e,
                    other => EngineError::IdentifierSource(other.to_string()),
                });
            }
        };

        reservation.fulfil(visit_id);
        let visit = Visit {
            id: visit_id,
            caller: caller.to_string(),
            locked: false,
            frames: 0,
            active: self.active.clone(),
        };
        info!(caller = %caller, visit_id, "Visit allocated");

        if let Err(e) = self
            .store
            .insert_visit(&VisitRecord::new(visit_id, caller))
            .await
        {
            warn!(visit_id, error = %e, "Failed to record visit");
        }

        Ok(visit)
    }

    pub fn is_active(&self, caller: &str) -> bool {
        self.active.lock().unwrap().contains_key(caller)
    }

    pub fn active_visit(&self, caller: &str) -> Option<i64> {
        self.active
            .lock()
            .unwrap()
            .get(caller)
            .copied()
            .filter(|id| *id != PENDING)
    }
}

/// A caller's slot while its visit id is being fetched.
struct Reservation<'a> {
    active: &'a ActiveVisits,
    caller: &'a str,
    fulfilled: bool,
}

impl<'a> Reservation<'a> {
    fn take(active: &'a ActiveVisits, caller: &'a str) -> Result<Self> {
        let mut slots = active.lock().unwrap();
        if slots.contains_key(caller) {
            return Err(EngineError::VisitActive(caller.to_string()));
        }
        slots.insert(caller.to_string(), PENDING);

        Ok(Self {
            active,
            caller,
            fulfilled: false,
        })
    }

    /// Hands the slot over to the visit `visit_id`.
    fn fulfil(mut self, visit_id: i64) {
        self.active
            .lock()
            .unwrap()
            .insert(self.caller.to_string(), visit_id);
        self.fulfilled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        let mut slots = self.active.lock().unwrap();
        if slots.get(self.caller) == Some(&PENDING) {
            slots.remove(self.caller);
        }
    }
}

/// One allocated visit. Dropping it gives the caller's slot back.
#[derive(Debug)]
pub struct Visit {
    id: i64,
    caller: String,
    locked: bool,
    frames: i64,
    active: ActiveVisits,
}

impl Visit {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn frames_used(&self) -> i64 {
        self.frames
    }

    pub fn lock(&mut self) {
        debug!(visit_id = self.id, caller = %self.caller, "Visit locked");
        self.locked = true;
    }

    /// Ends the active window and frees the caller's slot.
    pub fn unlock(&mut self) -> Result<()> {
        if !self.locked {
            return Err(EngineError::VisitNotActive(self.id));
        }
        self.locked = false;
        self.release_slot();
        debug!(visit_id = self.id, caller = %self.caller, "Visit unlocked");
        Ok(())
    }

    /// Next frame id; there are exactly [`FRAMES_PER_VISIT`] of them.
    pub fn next_frame(&mut self) -> Result<i64> {
        if self.frames >= FRAMES_PER_VISIT {
            return Err(EngineError::VisitOverflow(self.id));
        }
        let frame = self.id * FRAMES_PER_VISIT + self.frames;
        self.frames += 1;
        Ok(frame)
    }

    fn release_slot(&self) {
        let mut active = self.active.lock().unwrap();
        if active.get(&self.caller) == Some(&self.id) {
            active.remove(&self.caller);
        }
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        self.release_slot();
    }
}
