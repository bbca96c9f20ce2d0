use sequencer_core::{CorrelationRecord, VisitRecord};

use super::{datetime_to_timestamp, timestamp_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VisitRow {
    pub visit_id: i64,
    pub caller: String,
    pub issued_at: i64,
}

impl VisitRow {
    pub fn into_domain(self) -> VisitRecord {
        VisitRecord {
            visit_id: self.visit_id,
            caller: self.caller,
            issued_at: timestamp_to_datetime(self.issued_at),
        }
    }
}

impl From<&VisitRecord> for VisitRow {
    fn from(record: &VisitRecord) -> Self {
        Self {
            visit_id: record.visit_id,
            caller: record.caller.clone(),
            issued_at: datetime_to_timestamp(record.issued_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CorrelationRow {
    pub caller: String,
    pub visit_id: i64,
    pub sequence_id: i64,
}

impl CorrelationRow {
    pub fn into_domain(self) -> CorrelationRecord {
        CorrelationRecord {
            caller: self.caller,
            visit_id: self.visit_id,
            sequence_id: self.sequence_id,
        }
    }
}
