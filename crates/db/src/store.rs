use async_trait::async_trait;
use sequencer_core::{CorrelationRecord, SequenceRecord, StatusRecord, VisitRecord};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbError;
use crate::models::HistoryEntry;
use crate::repositories::{GroupRepository, SequenceRepository, VisitRepository};

/// Where the engine keeps its bookkeeping.
///
/// Inserts report failures as [`DbError::Insert`]; callers decide whether that matters.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Highest sequence id recorded so far, 0 for an empty store.
    async fn last_sequence_id(&self) -> Result<i64, DbError>;

    /// Records a sequence as submitted.
    async fn insert_sequence(&self, record: &SequenceRecord) -> Result<(), DbError>;

    /// Records the outcome of a sequence.
    async fn insert_status(&self, record: &StatusRecord) -> Result<(), DbError>;

    /// Records a freshly allocated visit.
    async fn insert_visit(&self, record: &VisitRecord) -> Result<(), DbError>;

    /// Links a released visit to the sequence that used it.
    async fn insert_correlation(&self, record: &CorrelationRecord) -> Result<(), DbError>;

    /// Creates a group and returns its id.
    async fn insert_group(&self, name: &str) -> Result<i64, DbError>;

    /// Id of the newest group recorded under `name`.
    async fn last_group_matching(&self, name: &str) -> Result<i64, DbError>;

    /// Newest `limit` sequences, with their status once concluded.
    async fn history(&self, limit: i64) -> Result<Vec<HistoryEntry>, DbError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    sequences: SequenceRepository,
    visits: VisitRepository,
    groups: GroupRepository,
}

impl SqliteStore {
    /// Wraps an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sequences: SequenceRepository::new(pool.clone()),
            visits: VisitRepository::new(pool.clone()),
            groups: GroupRepository::new(pool),
        }
    }

    /// Opens `database_url`, running migrations first.
    pub async fn open(database_url: &str) -> Result<Self, DbError> {
        let pool = crate::pool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Direct access to the sequence and status tables.
    pub fn sequences(&self) -> &SequenceRepository {
        &self.sequences
    }

    /// Direct access to the visit and correlation tables.
    pub fn visits(&self) -> &VisitRepository {
        &self.visits
    }
}

#[async_trait]
impl SequenceStore for SqliteStore {
    async fn last_sequence_id(&self) -> Result<i64, DbError> {
        self.sequences.last_id().await
    }

    async fn insert_sequence(&self, record: &SequenceRecord) -> Result<(), DbError> {
        debug!(sequence_id = record.id, "Inserting sequence record");
        self.sequences
            .create(record)
            .await
            .map_err(|e| DbError::insert("sequence", e))
    }

    async fn insert_status(&self, record: &StatusRecord) -> Result<(), DbError> {
        debug!(sequence_id = record.sequence_id, flag = record.status_flag, "Inserting status record");
        self.sequences
            .create_status(record)
            .await
            .map_err(|e| DbError::insert("sequence_status", e))
    }

    async fn insert_visit(&self, record: &VisitRecord) -> Result<(), DbError> {
        self.visits
            .create(record)
            .await
            .map_err(|e| DbError::insert("visit", e))
    }

    async fn insert_correlation(&self, record: &CorrelationRecord) -> Result<(), DbError> {
        self.visits
            .create_correlation(record)
            .await
            .map_err(|e| DbError::insert("visit_sequence", e))
    }

    async fn insert_group(&self, name: &str) -> Result<i64, DbError> {
        self.groups
            .create(name)
            .await
            .map_err(|e| DbError::insert("sequence_group", e))
    }

    async fn last_group_matching(&self, name: &str) -> Result<i64, DbError> {
        self.groups
            .find_last_by_name(name)
            .await?
            .map(|group| group.id)
            .ok_or_else(|| DbError::NotFound(format!("sequence group {name}")))
    }

    async fn history(&self, limit: i64) -> Result<Vec<HistoryEntry>, DbError> {
        self.sequences.history(limit).await
    }
}
