use sequencer_core::{SequenceRecord, StatusRecord};

use super::{datetime_to_timestamp, timestamp_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SequenceRow {
    pub sequence_id: i64,
    pub group_id: Option<i64>,
    pub sequence_type: String,
    pub name: String,
    pub comments: String,
    pub origin: String,
    pub created_at: i64,
}

impl SequenceRow {
    pub fn into_domain(self) -> SequenceRecord {
        SequenceRecord {
            id: self.sequence_id,
            group_id: self.group_id,
            sequence_type: self.sequence_type,
            name: self.name,
            comments: self.comments,
            origin: self.origin,
            created_at: timestamp_to_datetime(self.created_at),
        }
    }
}

impl From<&SequenceRecord> for SequenceRow {
    fn from(record: &SequenceRecord) -> Self {
        Self {
            sequence_id: record.id,
            group_id: record.group_id,
            sequence_type: record.sequence_type.clone(),
            name: record.name.clone(),
            comments: record.comments.clone(),
            origin: record.origin.clone(),
            created_at: datetime_to_timestamp(record.created_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatusRow {
    pub sequence_id: i64,
    pub status_flag: i32,
    pub output: String,
    pub finished_at: i64,
}

impl StatusRow {
    pub fn into_domain(self) -> StatusRecord {
        StatusRecord {
            sequence_id: self.sequence_id,
            status_flag: self.status_flag,
            output: self.output,
            finished_at: timestamp_to_datetime(self.finished_at),
        }
    }
}

impl From<&StatusRecord> for StatusRow {
    fn from(record: &StatusRecord) -> Self {
        Self {
            sequence_id: record.sequence_id,
            status_flag: record.status_flag,
            output: record.output.clone(),
            finished_at: datetime_to_timestamp(record.finished_at),
        }
    }
}

/// A sequence joined with its status, if it concluded.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub sequence_id: i64,
    pub group_id: Option<i64>,
    pub sequence_type: String,
    pub name: String,
    pub comments: String,
    pub origin: String,
    pub created_at: i64,
    pub status_flag: Option<i32>,
    pub output: Option<String>,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sequence: SequenceRecord,
    pub status: Option<StatusRecord>,
}

impl HistoryRow {
    pub fn into_domain(self) -> HistoryEntry {
        let status = match (self.status_flag, self.finished_at) {
            (Some(status_flag), Some(finished_at)) => Some(StatusRecord {
                sequence_id: self.sequence_id,
                status_flag,
                output: self.output.unwrap_or_default(),
                finished_at: timestamp_to_datetime(finished_at),
            }),
            _ => None,
        };

        HistoryEntry {
            sequence: SequenceRow {
                sequence_id: self.sequence_id,
                group_id: self.group_id,
                sequence_type: self.sequence_type,
                name: self.name,
                comments: self.comments,
                origin: self.origin,
                created_at: self.created_at,
            }
            .into_domain(),
            status,
        }
    }
}
