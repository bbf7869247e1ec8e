use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::error;

use crate::entities::asset_history::{
    ActiveModel, Column, Entity as AssetHistory, HistoryAction, Model,
};
use crate::errors::ServiceError;

/// A history row about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub pool_id: i64,
    pub instance_id: Option<i64>,
    pub action: HistoryAction,
    pub holder_id: Option<i64>,
    pub operator_id: Option<i64>,
    pub quantity_delta: i32,
    pub note: Option<String>,
}

impl NewHistoryEntry {
    pub fn new(pool_id: i64, action: HistoryAction) -> Self {
        Self {
            pool_id,
            instance_id: None,
            action,
            holder_id: None,
            operator_id: None,
            quantity_delta: 0,
            note: None,
        }
    }

    pub fn instance(mut self, instance_id: i64) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn holder(mut self, holder_id: Option<i64>) -> Self {
        self.holder_id = holder_id;
        self
    }

    pub fn operator(mut self, operator_id: Option<i64>) -> Self {
        self.operator_id = operator_id;
        self
    }

    pub fn delta(mut self, quantity_delta: i32) -> Self {
        self.quantity_delta = quantity_delta;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.note = if note.is_empty() { None } else { Some(note) };
        self
    }
}

/// Append-only trail
pub struct HistoryRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> HistoryRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn append(&self, entry: NewHistoryEntry) -> Result<Model, ServiceError> {
        ActiveModel {
            pool_id: Set(entry.pool_id),
            instance_id: Set(entry.instance_id),
            action: Set(entry.action),
            holder_id: Set(entry.holder_id),
            operator_id: Set(entry.operator_id),
            quantity_delta: Set(entry.quantity_delta),
            note: Set(entry.note),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.conn)
        .await
        .map_err(|e| {
            error!(error = %e, pool_id = entry.pool_id, "Failed to append asset history");
            ServiceError::DatabaseError(e)
        })
    }

    /// Newest first. `page` is zero-based.
    pub async fn page_for_pool(
        &self,
        pool_id: i64,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<Model>, u64), ServiceError> {
        let paginator = AssetHistory::find()
            .filter(Column::PoolId.eq(pool_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(self.conn, page_size.max(1));

        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page).await?;
        Ok((rows, total))
    }

    pub async fn all_for_pool(&self, pool_id: i64) -> Result<Vec<Model>, ServiceError> {
        Ok(AssetHistory::find()
            .filter(Column::PoolId.eq(pool_id))
            .order_by_asc(Column::Id)
            .all(self.conn)
            .await?)
    }

    pub async fn delete_for_pool(&self, pool_id: i64) -> Result<u64, ServiceError> {
        let res = AssetHistory::delete_many()
            .filter(Column::PoolId.eq(pool_id))
            .exec(self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_fields() {
        let entry = NewHistoryEntry::new(3, HistoryAction::Issue)
            .holder(Some(8))
            .operator(Some(1))
            .delta(2)
            .note("issued for night shift");
        assert_eq!(entry.pool_id, 3);
        assert_eq!(entry.holder_id, Some(8));
        assert_eq!(entry.quantity_delta, 2);
        assert_eq!(entry.note.as_deref(), Some("issued for night shift"));
        assert_eq!(entry.instance_id, None);
    }

    #[test]
    fn empty_note_is_dropped() {
        let entry = NewHistoryEntry::new(3, HistoryAction::Scrap).note("");
        assert!(entry.note.is_none());
    }
}
