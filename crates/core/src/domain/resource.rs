use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Separator between a resource name and an optional state qualifier (`lamp.hgar`).
pub const STATE_SEPARATOR: char = '.';

/// Where an inventory entry came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A connected remote peer.
    Peer,
    /// A hardware part announced by the configuration topology.
    Part,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Part => "part",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    #[default]
    Nominal,
    Custom(String),
}

impl ResourceState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nominal => "nominal",
            Self::Custom(tag) => tag,
        }
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self, Self::Nominal)
    }
}

/// Splits `name.state` into its base name and requested state.
pub fn parse_resource_name(raw: &str) -> (String, ResourceState) {
    match raw.split_once(STATE_SEPARATOR) {
        Some((name, state)) if !state.is_empty() => {
            (name.to_string(), ResourceState::Custom(state.to_string()))
        }
        Some((name, _)) => (name.to_string(), ResourceState::Nominal),
        None => (raw.to_string(), ResourceState::Nominal),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub available: bool,
    pub state: ResourceState,
    /// Sequences currently holding the lock. More than one only on same-state re-entry.
    #[serde(default)]
    pub holders: Vec<Option<i64>>,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            available: true,
            state: ResourceState::Nominal,
            holders: Vec::new(),
        }
    }

    /// A resource already locked in the very same non-nominal state accepts the request again.
    pub fn is_compatible(&self, state: &ResourceState) -> bool {
        if !state.is_nominal() && &self.state == state {
            return true;
        }

        self.available
    }

    pub fn lock(&mut self, state: ResourceState, holder: Option<i64>) -> Result<(), CoreError> {
        if !self.available {
            if !state.is_nominal() && self.state == state {
                self.holders.push(holder);
                return Ok(());
            }

            return Err(CoreError::ResourceBusy(self.name.clone()));
        }

        self.available = false;
        self.state = state;
        self.holders.push(holder);
        Ok(())
    }

    /// Drops `holder`'s lock. Returns false when `holder` does not hold it, leaving the
    /// resource untouched. The resource is available again once its last holder left.
    pub fn release(&mut self, holder: Option<i64>) -> bool {
        let Some(index) = self.holders.iter().position(|h| *h == holder) else {
            return false;
        };
        self.holders.remove(index);

        if self.holders.is_empty() {
            self.available = true;
            self.state = ResourceState::Nominal;
        }
        true
    }

    pub fn is_locked(&self) -> bool {
        !self.available
    }

    pub fn is_held_by(&self, holder: Option<i64>) -> bool {
        self.holders.contains(&holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_name() {
        assert_eq!(
            parse_resource_name("lamp"),
            ("lamp".to_string(), ResourceState::Nominal)
        );
        assert_eq!(
            parse_resource_name("lamp.hgar"),
            ("lamp".to_string(), ResourceState::Custom("hgar".to_string()))
        );
        assert_eq!(
            parse_resource_name("lamp."),
            ("lamp".to_string(), ResourceState::Nominal)
        );
    }

    #[test]
    fn test_lock_and_free() {
        let mut resource = Resource::new("rda_sm1", ResourceKind::Part);
        assert!(resource.is_compatible(&ResourceState::Nominal));

        resource.lock(ResourceState::Nominal, Some(1)).unwrap();
        assert!(resource.is_locked());
        assert!(resource.is_held_by(Some(1)));
        assert!(!resource.is_compatible(&ResourceState::Nominal));
        assert!(resource.lock(ResourceState::Nominal, Some(2)).is_err());

        assert!(!resource.release(Some(2)));
        assert!(resource.is_locked());

        assert!(resource.release(Some(1)));
        assert!(!resource.is_locked());
        assert_eq!(resource.state, ResourceState::Nominal);
    }

    #[test]
    fn test_same_custom_state_is_reentrant() {
        let mut resource = Resource::new("lamp", ResourceKind::Peer);
        let hgar = ResourceState::Custom("hgar".to_string());

        resource.lock(hgar.clone(), Some(1)).unwrap();
        assert!(resource.is_compatible(&hgar));
        assert!(resource.lock(hgar.clone(), Some(2)).is_ok());

        let neon = ResourceState::Custom("neon".to_string());
        assert!(!resource.is_compatible(&neon));
        assert!(matches!(
            resource.lock(neon, Some(3)),
            Err(CoreError::ResourceBusy(name)) if name == "lamp"
        ));

        // Still held by the second sequence after the first one left.
        assert!(resource.release(Some(1)));
        assert!(resource.is_locked());
        assert_eq!(resource.state, hgar);
        assert!(resource.release(Some(2)));
        assert!(!resource.is_locked());
    }
}
