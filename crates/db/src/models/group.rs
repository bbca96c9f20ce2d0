use sequencer_core::GroupRecord;

use super::timestamp_to_datetime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupRow {
    pub group_id: i64,
    pub name: String,
    pub created_at: i64,
}

impl GroupRow {
    pub fn into_domain(self) -> GroupRecord {
        GroupRecord {
            id: self.group_id,
            name: self.name,
            created_at: timestamp_to_datetime(self.created_at),
        }
    }
}
