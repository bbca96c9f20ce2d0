//! RAII guard for locked resources.

use std::sync::Arc;

use tracing::debug;

use super::admission::AdmissionController;

/// Holds the names locked for one sequence and frees them on drop, including on panic
/// unwinding through the worker.
pub struct ResourceGuard {
    admission: Arc<AdmissionController>,
    names: Vec<String>,
    sequence_id: Option<i64>,
    released: bool,
}

impl ResourceGuard {
    pub(crate) fn new(
        admission: Arc<AdmissionController>,
        names: Vec<String>,
        sequence_id: Option<i64>,
    ) -> Self {
        Self {
            admission,
            names,
            sequence_id,
            released: false,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Frees now instead of on drop. Calling it twice is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.admission.free(&self.names, self.sequence_id);
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if !self.released {
            debug!(sequence_id = ?self.sequence_id, "Releasing resources in Drop");
            self.release();
        }
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("names", &self.names)
            .field("sequence_id", &self.sequence_id)
            .field("released", &self.released)
            .finish()
    }
}
