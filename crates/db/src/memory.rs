use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use sequencer_core::{CorrelationRecord, GroupRecord, SequenceRecord, StatusRecord, VisitRecord};

use crate::error::DbError;
use crate::models::HistoryEntry;
use crate::store::SequenceStore;

#[derive(Default)]
struct Tables {
    sequences: Vec<SequenceRecord>,
    statuses: Vec<StatusRecord>,
    visits: Vec<VisitRecord>,
    correlations: Vec<CorrelationRecord>,
    groups: Vec<GroupRecord>,
}

/// Process-local store. `set_failing(true)` makes every insert fail, for exercising
/// persistence failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, table: &str) -> Result<(), DbError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::insert(table, "store unavailable"));
        }
        Ok(())
    }

    pub fn sequences(&self) -> Vec<SequenceRecord> {
        self.tables.read().unwrap().sequences.clone()
    }

    pub fn statuses(&self) -> Vec<StatusRecord> {
        self.tables.read().unwrap().statuses.clone()
    }

    pub fn visits(&self) -> Vec<VisitRecord> {
        self.tables.read().unwrap().visits.clone()
    }

    pub fn correlations(&self) -> Vec<CorrelationRecord> {
        self.tables.read().unwrap().correlations.clone()
    }
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn last_sequence_id(&self) -> Result<i64, DbError> {
        let tables = self.tables.read().unwrap();
        Ok(tables.sequences.iter().map(|s| s.id).max().unwrap_or(0))
    }

    async fn insert_sequence(&self, record: &SequenceRecord) -> Result<(), DbError> {
        self.check("sequence")?;
        self.tables.write().unwrap().sequences.push(record.clone());
        Ok(())
    }

    async fn insert_status(&self, record: &StatusRecord) -> Result<(), DbError> {
        self.check("sequence_status")?;
        self.tables.write().unwrap().statuses.push(record.clone());
        Ok(())
    }

    async fn insert_visit(&self, record: &VisitRecord) -> Result<(), DbError> {
        self.check("visit")?;
        self.tables.write().unwrap().visits.push(record.clone());
        Ok(())
    }

    async fn insert_correlation(&self, record: &CorrelationRecord) -> Result<(), DbError> {
        self.check("visit_sequence")?;
        self.tables.write().unwrap().correlations.push(record.clone());
        Ok(())
    }

    async fn insert_group(&self, name: &str) -> Result<i64, DbError> {
        self.check("sequence_group")?;
        let mut tables = self.tables.write().unwrap();
        let id = tables.groups.iter().map(|g| g.id).max().unwrap_or(0) + 1;
        tables.groups.push(GroupRecord {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn last_group_matching(&self, name: &str) -> Result<i64, DbError> {
        let tables = self.tables.read().unwrap();
        tables
            .groups
            .iter()
            .filter(|g| g.name == name)
            .map(|g| g.id)
            .max()
            .ok_or_else(|| DbError::NotFound(format!("sequence group {name}")))
    }

    async fn history(&self, limit: i64) -> Result<Vec<HistoryEntry>, DbError> {
        let tables = self.tables.read().unwrap();
        let mut sequences = tables.sequences.clone();
        sequences.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(sequences
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|sequence| {
                let status = tables
                    .statuses
                    .iter()
                    .find(|s| s.sequence_id == sequence.id)
                    .cloned();
                HistoryEntry { sequence, status }
            })
            .collect())
    }
}
