use crate::error::DbError;
use crate::models::{HistoryEntry, HistoryRow, SequenceRow, StatusRow};
use sequencer_core::{SequenceRecord, StatusRecord};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, record: &SequenceRecord) -> Result<(), DbError> {
        let row = SequenceRow::from(record);

        sqlx::query(
            r#"
            INSERT INTO sequence (sequence_id, group_id, sequence_type, name, comments, origin, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.sequence_id)
        .bind(row.group_id)
        .bind(&row.sequence_type)
        .bind(&row.name)
        .bind(&row.comments)
        .bind(&row.origin)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_status(&self, record: &StatusRecord) -> Result<(), DbError> {
        let row = StatusRow::from(record);

        sqlx::query(
            r#"
            INSERT INTO sequence_status (sequence_id, status_flag, output, finished_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(row.sequence_id)
        .bind(row.status_flag)
        .bind(&row.output)
        .bind(row.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<SequenceRecord>, DbError> {
        let row: Option<SequenceRow> = sqlx::query_as(
            r#"
            SELECT sequence_id, group_id, sequence_type, name, comments, origin, created_at
            FROM sequence
            WHERE sequence_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn find_status(&self, sequence_id: i64) -> Result<Option<StatusRecord>, DbError> {
        let row: Option<StatusRow> = sqlx::query_as(
            r#"
            SELECT sequence_id, status_flag, output, finished_at
            FROM sequence_status
            WHERE sequence_id = ?
            "#,
        )
        .bind(sequence_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    /// Highest recorded sequence id, 0 when the table is empty.
    pub async fn last_id(&self) -> Result<i64, DbError> {
        let (last,): (Option<i64>,) = sqlx::query_as("SELECT MAX(sequence_id) FROM sequence")
            .fetch_one(&self.pool)
            .await?;

        Ok(last.unwrap_or(0))
    }

    /// Most recent sequences first, with their status when they concluded.
    pub async fn history(&self, limit: i64) -> Result<Vec<HistoryEntry>, DbError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT s.sequence_id, s.group_id, s.sequence_type, s.name, s.comments, s.origin, s.created_at,
                   st.status_flag, st.output, st.finished_at
            FROM sequence s
            LEFT JOIN sequence_status st ON st.sequence_id = s.sequence_id
            ORDER BY s.sequence_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }
}
