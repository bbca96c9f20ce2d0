//! Notification types published by the sequencer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every notification with an id and timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Sequence events
    /// A sequence was admitted and registered in the directory
    #[serde(rename = "sequence.registered")]
    SequenceRegistered {
        sequence_id: i64,
        sequence_type: String,
        name: String,
        /// Full `sequence=...` status line
        status: String,
    },

    #[serde(rename = "sequence.state_changed")]
    SequenceStateChanged {
        sequence_id: i64,
        from_state: String,
        to_state: String,
    },

    /// Terminal state reached; `output` is what the status record stores
    #[serde(rename = "sequence.concluded")]
    SequenceConcluded {
        sequence_id: i64,
        state: String,
        status_code: i32,
        output: String,
        status: String,
    },

    // Sub-command events
    /// A sub-command was planned, dispatched or cancelled
    #[serde(rename = "sub_command.updated")]
    SubCommandUpdated {
        sequence_id: i64,
        ordinal: usize,
        code: i32,
        /// Full `subCommand=...` status line
        status: String,
    },

    /// Warning reply received while the dispatch is still in flight
    #[serde(rename = "sub_command.warning")]
    SubCommandWarning {
        sequence_id: i64,
        target: String,
        text: String,
    },

    // Resource events
    #[serde(rename = "resources.locked")]
    ResourcesLocked {
        sequence_id: Option<i64>,
        names: Vec<String>,
    },

    #[serde(rename = "resources.freed")]
    ResourcesFreed {
        sequence_id: Option<i64>,
        names: Vec<String>,
    },

    // Visit events
    #[serde(rename = "visit.locked")]
    VisitLocked {
        sequence_id: i64,
        visit_id: i64,
        caller: String,
    },

    #[serde(rename = "visit.released")]
    VisitReleased {
        sequence_id: i64,
        visit_id: i64,
        caller: String,
    },

    // System events
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Sequence this notification belongs to, if any
    pub fn sequence_id(&self) -> Option<i64> {
        match self {
            Event::SequenceRegistered { sequence_id, .. }
            | Event::SequenceStateChanged { sequence_id, .. }
            | Event::SequenceConcluded { sequence_id, .. }
            | Event::SubCommandUpdated { sequence_id, .. }
            | Event::SubCommandWarning { sequence_id, .. }
            | Event::VisitLocked { sequence_id, .. }
            | Event::VisitReleased { sequence_id, .. } => Some(*sequence_id),
            Event::ResourcesLocked { sequence_id, .. } | Event::ResourcesFreed { sequence_id, .. } => {
                *sequence_id
            }
            Event::Error { .. } => None,
        }
    }

    /// Status line suitable for an operator console, if the event carries one
    pub fn status_line(&self) -> Option<&str> {
        match self {
            Event::SequenceRegistered { status, .. }
            | Event::SequenceConcluded { status, .. }
            | Event::SubCommandUpdated { status, .. } => Some(status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let envelope = EventEnvelope::new(Event::Error {
            message: "boom".to_string(),
            context: None,
        });

        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::SequenceStateChanged {
            sequence_id: 12,
            from_state: "ready".to_string(),
            to_state: "executing".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("sequence.state_changed"));
        assert!(json.contains("from_state"));
        assert!(json.contains("\"sequence_id\":12"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"resources.locked","sequence_id":null,"names":["lamp","rda_sm1"]}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::ResourcesLocked { sequence_id, names } => {
                assert_eq!(sequence_id, None);
                assert_eq!(names, vec!["lamp", "rda_sm1"]);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_sequence_id() {
        let event = Event::SubCommandUpdated {
            sequence_id: 4,
            ordinal: 1,
            code: 0,
            status: "subCommand=4,1,\"dcb arc\",0,\"\"".to_string(),
        };
        assert_eq!(event.sequence_id(), Some(4));
        assert!(event.status_line().unwrap().starts_with("subCommand=4"));

        let error_event = Event::Error {
            message: "test".to_string(),
            context: None,
        };
        assert_eq!(error_event.sequence_id(), None);
        assert_eq!(error_event.status_line(), None);
    }
}
