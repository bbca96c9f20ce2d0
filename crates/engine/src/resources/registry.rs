use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use sequencer_core::{Resource, ResourceKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inventory change reported by the topology source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    Added {
        kind: ResourceKind,
        names: Vec<String>,
    },
    Removed {
        names: Vec<String>,
    },
    /// Full membership of one kind; entries of other kinds are left alone.
    Snapshot {
        kind: ResourceKind,
        names: Vec<String>,
    },
}

/// Named resources currently known to the engine and their lock state.
///
/// Single writer of lock state: every read-check-write goes through [`Self::with_inventory`].
pub struct ResourceRegistry {
    inventory: Mutex<HashMap<String, Resource>>,
    ignored: HashSet<String>,
}

impl ResourceRegistry {
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inventory: Mutex::new(HashMap::new()),
            ignored: ignored.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    /// Runs `f` with exclusive access to the inventory.
    pub(crate) fn with_inventory<R>(&self, f: impl FnOnce(&mut HashMap<String, Resource>) -> R) -> R {
        let mut inventory = self.inventory.lock().unwrap();
        f(&mut inventory)
    }

    /// Adds a resource; an existing entry keeps its lock state. Returns true if it was new.
    pub fn add(&self, kind: ResourceKind, name: &str) -> bool {
        if self.is_ignored(name) {
            return false;
        }

        self.with_inventory(|inventory| {
            if inventory.contains_key(name) {
                return false;
            }
            debug!(resource = %name, kind = kind.as_str(), "Resource added to inventory");
            inventory.insert(name.to_string(), Resource::new(name, kind));
            true
        })
    }

    pub fn remove(&self, name: &str) -> Option<Resource> {
        let removed = self.with_inventory(|inventory| inventory.remove(name));

        if let Some(resource) = &removed {
            if resource.is_locked() {
                warn!(resource = %name, "Locked resource left the inventory");
            } else {
                debug!(resource = %name, "Resource removed from inventory");
            }
        }
        removed
    }

    /// Makes the inventory of `kind` match `names` exactly.
    pub fn sync(&self, kind: ResourceKind, names: &[String]) {
        let wanted: HashSet<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.is_ignored(name))
            .collect();

        let (added, removed) = self.with_inventory(|inventory| {
            let stale: Vec<String> = inventory
                .values()
                .filter(|r| r.kind == kind && !wanted.contains(r.name.as_str()))
                .map(|r| r.name.clone())
                .collect();

            for name in &stale {
                if inventory.remove(name).is_some_and(|r| r.is_locked()) {
                    warn!(resource = %name, "Locked resource left the inventory");
                }
            }

            let mut added = 0;
            for name in &wanted {
                if !inventory.contains_key(*name) {
                    inventory.insert(name.to_string(), Resource::new(*name, kind));
                    added += 1;
                }
            }
            (added, stale.len())
        });

        if added > 0 || removed > 0 {
            info!(kind = kind.as_str(), added, removed, "Inventory synchronized");
        }
    }

    pub fn apply(&self, event: TopologyEvent) {
        match event {
            TopologyEvent::Added { kind, names } => {
                for name in &names {
                    self.add(kind, name);
                }
            }
            TopologyEvent::Removed { names } => {
                for name in &names {
                    self.remove(name);
                }
            }
            TopologyEvent::Snapshot { kind, names } => self.sync(kind, &names),
        }
    }

    /// Applies topology events until the sender side closes.
    pub fn spawn_topology_listener(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<TopologyEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.apply(event);
            }
            debug!("Topology source closed");
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.with_inventory(|inventory| inventory.contains_key(name))
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.with_inventory(|inventory| inventory.get(name).is_some_and(Resource::is_locked))
    }

    pub fn get(&self, name: &str) -> Option<Resource> {
        self.with_inventory(|inventory| inventory.get(name).cloned())
    }

    /// Sorted inventory names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.with_inventory(|inventory| inventory.keys().cloned().collect());
        names.sort_unstable();
        names
    }

    pub fn locked(&self) -> Vec<String> {
        let mut names: Vec<String> = self.with_inventory(|inventory| {
            inventory
                .values()
                .filter(|r| r.is_locked())
                .map(|r| r.name.clone())
                .collect()
        });
        names.sort_unstable();
        names
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("inventory", &self.names())
            .field("ignored", &self.ignored)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_core::ResourceState;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_ignored_peers_never_enter() {
        let registry = ResourceRegistry::new(["hub", "gen2"]);
        assert!(!registry.add(ResourceKind::Peer, "hub"));
        assert!(registry.add(ResourceKind::Peer, "dcb"));
        assert!(!registry.add(ResourceKind::Peer, "dcb"));

        registry.sync(ResourceKind::Peer, &names(&["gen2", "dcb", "sps"]));
        assert_eq!(registry.names(), names(&["dcb", "sps"]));
    }

    #[test]
    fn test_sync_only_touches_one_kind() {
        let registry = ResourceRegistry::default();
        registry.sync(ResourceKind::Peer, &names(&["dcb", "sps"]));
        registry.sync(ResourceKind::Part, &names(&["rda_sm1", "bia_sm1"]));

        registry.sync(ResourceKind::Part, &names(&["rda_sm1"]));
        assert_eq!(registry.names(), names(&["dcb", "rda_sm1", "sps"]));
    }

    #[test]
    fn test_sync_keeps_existing_locks() {
        let registry = ResourceRegistry::default();
        registry.sync(ResourceKind::Peer, &names(&["dcb", "sps"]));
        registry.with_inventory(|inventory| {
            inventory
                .get_mut("dcb")
                .unwrap()
                .lock(ResourceState::Nominal, Some(1))
                .unwrap()
        });

        registry.sync(ResourceKind::Peer, &names(&["dcb", "sps", "enu_sm1"]));
        assert!(registry.is_locked("dcb"));
        assert!(registry.contains("enu_sm1"));

        registry.sync(ResourceKind::Peer, &names(&["sps"]));
        assert!(!registry.contains("dcb"));
        assert!(registry.locked().is_empty());
    }

    #[tokio::test]
    async fn test_topology_listener() {
        let registry = Arc::new(ResourceRegistry::default());
        let (tx, rx) = mpsc::channel(8);
        let handle = registry.clone().spawn_topology_listener(rx);

        tx.send(TopologyEvent::Added {
            kind: ResourceKind::Peer,
            names: names(&["dcb", "sps"]),
        })
        .await
        .unwrap();
        tx.send(TopologyEvent::Removed {
            names: names(&["sps"]),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(registry.names(), names(&["dcb"]));
    }
}
