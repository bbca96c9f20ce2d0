use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use events::{Event, EventBus};
use sequencer_core::{parse_resource_name, ResourceState};
use tracing::{debug, info};

use super::guard::ResourceGuard;
use super::registry::ResourceRegistry;
use crate::error::{EngineError, Result};
use crate::sequence::Sequence;

/// Names a sequence needs before it may run.
///
/// `resources` come from the peers its sub-commands address, `dependencies` from resolving
/// command arguments onto parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePlan {
    pub resources: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
}

impl ResourcePlan {
    /// Every name to lock, resources first.
    pub fn required(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.iter().cloned().collect();
        names.extend(
            self.dependencies
                .iter()
                .filter(|d| !self.resources.contains(*d))
                .cloned(),
        );
        names
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.dependencies.is_empty()
    }
}

/// All-or-nothing locking on top of the [`ResourceRegistry`].
pub struct AdmissionController {
    registry: Arc<ResourceRegistry>,
    bus: EventBus,
}

impl AdmissionController {
    pub fn new(registry: Arc<ResourceRegistry>, bus: EventBus) -> Self {
        Self { registry, bus }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Resources `sequence` will touch. Pure: nothing is locked or looked up.
    pub fn inspect(&self, sequence: &Sequence) -> ResourcePlan {
        let mut plan = sequence.profile().derive_resources(&sequence.planned_commands());
        plan.resources.retain(|name| !self.is_ignored(name));
        plan.dependencies.retain(|name| !self.is_ignored(name));
        plan
    }

    fn is_ignored(&self, name: &str) -> bool {
        let (base, _) = parse_resource_name(name);
        self.registry.is_ignored(&base)
    }

    /// Locks every name or none of them. Returns the locked base names.
    ///
    /// Unknown names are reported before busy ones.
    pub fn request(&self, names: &[String], sequence_id: Option<i64>) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let requests: Vec<(String, ResourceState)> = names
            .iter()
            .map(|raw| parse_resource_name(raw))
            .filter(|(name, _)| seen.insert(name.clone()))
            .collect();

        let locked = self.registry.with_inventory(|inventory| {
            let mut not_connected = Vec::new();
            let mut busy = Vec::new();

            for (name, state) in &requests {
                match inventory.get(name) {
                    None => not_connected.push(name.clone()),
                    Some(resource) if !resource.is_compatible(state) => busy.push(name.clone()),
                    Some(_) => {}
                }
            }

            if !not_connected.is_empty() {
                return Err(EngineError::ResourceUnavailable(not_connected));
            }
            if !busy.is_empty() {
                return Err(EngineError::ResourceBusy(busy));
            }

            let mut locked = Vec::with_capacity(requests.len());
            for (name, state) in &requests {
                if let Some(resource) = inventory.get_mut(name) {
                    resource
                        .lock(state.clone(), sequence_id)
                        .map_err(|_| EngineError::ResourceBusy(vec![name.clone()]))?;
                    locked.push(name.clone());
                }
            }
            Ok(locked)
        })?;

        if !locked.is_empty() {
            info!(sequence_id = ?sequence_id, resources = %locked.join(","), "Locking resources");
            self.bus.emit(Event::ResourcesLocked {
                sequence_id,
                names: locked.clone(),
            });
        }
        Ok(locked)
    }

    /// Drops `sequence_id`'s locks on the names that are still present.
    ///
    /// Entries held by someone else are left alone, e.g. a resource that was removed and
    /// re-added by the topology and has since been locked by another sequence.
    pub fn free(&self, names: &[String], sequence_id: Option<i64>) {
        if names.is_empty() {
            return;
        }

        let freed = self.registry.with_inventory(|inventory| {
            let mut freed = Vec::new();
            for name in names {
                if let Some(resource) = inventory.get_mut(name) {
                    if resource.release(sequence_id) {
                        freed.push(name.clone());
                    }
                }
            }
            freed
        });

        if freed.is_empty() {
            debug!(sequence_id = ?sequence_id, "Nothing to free");
            return;
        }

        info!(sequence_id = ?sequence_id, resources = %freed.join(","), "Freeing resources");
        self.bus.emit(Event::ResourcesFreed {
            sequence_id,
            names: freed,
        });
    }

    /// Like [`Self::request`], but the locks are released when the guard drops.
    pub fn acquire(
        self: &Arc<Self>,
        names: &[String],
        sequence_id: Option<i64>,
    ) -> Result<ResourceGuard> {
        let locked = self.request(names, sequence_id)?;
        Ok(ResourceGuard::new(self.clone(), locked, sequence_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_core::ResourceKind;

    fn controller(inventory: &[&str]) -> Arc<AdmissionController> {
        let registry = Arc::new(ResourceRegistry::new(["hub"]));
        for name in inventory {
            registry.add(ResourceKind::Peer, name);
        }
        Arc::new(AdmissionController::new(registry, EventBus::new()))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_all_or_nothing() {
        let admission = controller(&["dcb", "sps"]);

        let err = admission
            .request(&names(&["dcb", "sps", "enu_sm1"]), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ResourceUnavailable(ref n) if n == &names(&["enu_sm1"])));
        assert!(admission.registry().locked().is_empty());
    }

    #[test]
    fn test_unavailable_reported_before_busy() {
        let admission = controller(&["dcb", "sps"]);
        admission.request(&names(&["dcb"]), Some(1)).unwrap();

        let err = admission
            .request(&names(&["dcb", "missing"]), Some(2))
            .unwrap_err();
        assert!(matches!(err, EngineError::ResourceUnavailable(_)));

        let err = admission.request(&names(&["sps", "dcb"]), Some(2)).unwrap_err();
        assert!(matches!(err, EngineError::ResourceBusy(ref n) if n == &names(&["dcb"])));
        assert!(!admission.registry().is_locked("sps"));
    }

    #[test]
    fn test_state_qualifier_reentry() {
        let admission = controller(&["lamp"]);

        assert_eq!(
            admission.request(&names(&["lamp.hgar"]), Some(1)).unwrap(),
            names(&["lamp"])
        );
        assert!(admission.request(&names(&["lamp.hgar"]), Some(2)).is_ok());
        assert!(matches!(
            admission.request(&names(&["lamp.neon"]), Some(3)),
            Err(EngineError::ResourceBusy(_))
        ));
        assert!(matches!(
            admission.request(&names(&["lamp"]), Some(3)),
            Err(EngineError::ResourceBusy(_))
        ));
    }

    #[test]
    fn test_free_ignores_unknown_names() {
        let admission = controller(&["dcb", "sps"]);
        let locked = admission.request(&names(&["dcb", "sps"]), None).unwrap();

        admission.registry().remove("sps");
        admission.free(&locked, None);
        admission.free(&[], None);

        assert!(!admission.registry().is_locked("dcb"));
        assert!(admission.request(&names(&["dcb"]), None).is_ok());
    }

    #[test]
    fn test_free_skips_locks_of_other_sequences() {
        let admission = controller(&["enu_sm1"]);
        let first = admission.request(&names(&["enu_sm1"]), Some(1)).unwrap();

        admission.registry().remove("enu_sm1");
        admission.registry().add(ResourceKind::Peer, "enu_sm1");
        admission.request(&names(&["enu_sm1"]), Some(2)).unwrap();

        admission.free(&first, Some(1));
        assert!(admission.registry().is_locked("enu_sm1"));
        assert!(matches!(
            admission.request(&names(&["enu_sm1"]), Some(3)),
            Err(EngineError::ResourceBusy(_))
        ));

        admission.free(&first, Some(2));
        assert!(!admission.registry().is_locked("enu_sm1"));
    }

    #[test]
    fn test_shared_state_freed_by_last_holder() {
        let admission = controller(&["lamp"]);
        let first = admission.request(&names(&["lamp.hgar"]), Some(1)).unwrap();
        let second = admission.request(&names(&["lamp.hgar"]), Some(2)).unwrap();

        admission.free(&first, Some(1));
        assert!(admission.registry().is_locked("lamp"));
        admission.free(&second, Some(2));
        assert!(!admission.registry().is_locked("lamp"));
    }

    #[test]
    fn test_guard_frees_on_drop() {
        let admission = controller(&["dcb"]);
        {
            let guard = admission.acquire(&names(&["dcb"]), Some(7)).unwrap();
            assert_eq!(guard.names(), names(&["dcb"]).as_slice());
            assert!(admission.registry().is_locked("dcb"));
        }
        assert!(!admission.registry().is_locked("dcb"));
    }

    #[test]
    fn test_plan_required_merges() {
        let plan = ResourcePlan {
            resources: ["sps".to_string(), "dcb".to_string()].into(),
            dependencies: ["rda_sm1".to_string(), "dcb".to_string()].into(),
        };
        assert_eq!(plan.required(), names(&["dcb", "sps", "rda_sm1"]));
    }
}
