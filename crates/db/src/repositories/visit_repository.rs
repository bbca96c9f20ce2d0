use crate::error::DbError;
use crate::models::{CorrelationRow, VisitRow};
use sequencer_core::{CorrelationRecord, VisitRecord};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct VisitRepository {
    pool: SqlitePool,
}

impl VisitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, record: &VisitRecord) -> Result<(), DbError> {
        let row = VisitRow::from(record);

        sqlx::query("INSERT INTO visit (visit_id, caller, issued_at) VALUES (?, ?, ?)")
            .bind(row.visit_id)
            .bind(&row.caller)
            .bind(row.issued_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, visit_id: i64) -> Result<Option<VisitRecord>, DbError> {
        let row: Option<VisitRow> =
            sqlx::query_as("SELECT visit_id, caller, issued_at FROM visit WHERE visit_id = ?")
                .bind(visit_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn create_correlation(&self, record: &CorrelationRecord) -> Result<(), DbError> {
        sqlx::query("INSERT INTO visit_sequence (caller, visit_id, sequence_id) VALUES (?, ?, ?)")
            .bind(&record.caller)
            .bind(record.visit_id)
            .bind(record.sequence_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn find_correlations(
        &self,
        visit_id: i64,
    ) -> Result<Vec<CorrelationRecord>, DbError> {
        let rows: Vec<CorrelationRow> = sqlx::query_as(
            r#"
            SELECT caller, visit_id, sequence_id
            FROM visit_sequence
            WHERE visit_id = ?
            ORDER BY sequence_id
            "#,
        )
        .bind(visit_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }
}
