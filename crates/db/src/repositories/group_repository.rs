use crate::error::DbError;
use crate::models::{datetime_to_timestamp, GroupRow};
use chrono::Utc;
use sequencer_core::GroupRecord;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new group and returns its id.
    pub async fn create(&self, name: &str) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO sequence_group (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(datetime_to_timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_last_by_name(&self, name: &str) -> Result<Option<GroupRecord>, DbError> {
        let row: Option<GroupRow> = sqlx::query_as(
            r#"
            SELECT group_id, name, created_at
            FROM sequence_group
            WHERE name = ?
            ORDER BY group_id DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }
}
