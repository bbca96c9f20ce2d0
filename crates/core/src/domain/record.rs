use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{StatusMachine, ACTIVE_OUTPUT};

/// Row written when a sequence is registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceRecord {
    pub id: i64,
    pub group_id: Option<i64>,
    pub sequence_type: String,
    pub name: String,
    pub comments: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

/// Row written when a sequence concludes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusRecord {
    pub sequence_id: i64,
    pub status_flag: i32,
    pub output: String,
    pub finished_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn from_status(sequence_id: i64, status: &StatusMachine) -> Self {
        let output = match status.output() {
            ACTIVE_OUTPUT => String::new(),
            text => text.replace('"', ""),
        };

        Self {
            sequence_id,
            status_flag: status.status_code(),
            output,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitRecord {
    pub visit_id: i64,
    pub caller: String,
    pub issued_at: DateTime<Utc>,
}

impl VisitRecord {
    pub fn new(visit_id: i64, caller: impl Into<String>) -> Self {
        Self {
            visit_id,
            caller: caller.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Links a visit to the sequence that consumed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationRecord {
    pub caller: String,
    pub visit_id: i64,
    pub sequence_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
