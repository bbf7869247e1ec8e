use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::BTreeMap;
use tracing::debug;

use crate::entities::asset_allocation::{
    ActiveModel, Column, Entity as AssetAllocation, Model,
};
use crate::errors::ServiceError;

/// One step of a FIFO return walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnStep {
    /// The whole record goes back
    Close { allocation_id: i64, quantity: i32 },
    /// Part of the record goes back: the open record keeps `remaining`, a
    /// closed copy with the same issue time carries `returned`
    Split {
        allocation_id: i64,
        remaining: i32,
        returned: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnPlan {
    pub quantity: i32,
    pub steps: Vec<ReturnStep>,
}

/// Plans returning `quantity` units against a holder's open records,
/// oldest first. Fails before anything is planned if the holder holds less.
pub fn plan_fifo_return(open: &[Model], quantity: i32) -> Result<ReturnPlan, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::InvalidQuantity(quantity));
    }

    let held: i32 = open.iter().filter(|r| r.is_open()).map(|r| r.quantity).sum();
    if held < quantity {
        return Err(ServiceError::InsufficientHoldings {
            requested: quantity,
            held,
        });
    }

    let mut ordered: Vec<&Model> = open.iter().filter(|r| r.is_open()).collect();
    ordered.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));

    let mut remaining = quantity;
    let mut steps = Vec::new();
    for record in ordered {
        if remaining <= 0 {
            break;
        }
        if record.quantity <= remaining {
            steps.push(ReturnStep::Close {
                allocation_id: record.id,
                quantity: record.quantity,
            });
            remaining -= record.quantity;
        } else {
            steps.push(ReturnStep::Split {
                allocation_id: record.id,
                remaining: record.quantity - remaining,
                returned: remaining,
            });
            remaining = 0;
        }
    }

    Ok(ReturnPlan { quantity, steps })
}

/// Custody ledger
pub struct AllocationRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AllocationRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Open records of one holder on one pool, oldest first
    pub async fn open_for(&self, pool_id: i64, holder_id: i64) -> Result<Vec<Model>, ServiceError> {
        let mut records = AssetAllocation::find()
            .filter(Column::PoolId.eq(pool_id))
            .filter(Column::HolderId.eq(holder_id))
            .filter(Column::ReturnedAt.is_null())
            .order_by_asc(Column::IssuedAt)
            .order_by_asc(Column::Id)
            .all(self.conn)
            .await?;
        records.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub async fn open_for_pool(&self, pool_id: i64) -> Result<Vec<Model>, ServiceError> {
        Ok(AssetAllocation::find()
            .filter(Column::PoolId.eq(pool_id))
            .filter(Column::ReturnedAt.is_null())
            .order_by_asc(Column::IssuedAt)
            .order_by_asc(Column::Id)
            .all(self.conn)
            .await?)
    }

    pub async fn open_for_holder(&self, holder_id: i64) -> Result<Vec<Model>, ServiceError> {
        Ok(AssetAllocation::find()
            .filter(Column::HolderId.eq(holder_id))
            .filter(Column::ReturnedAt.is_null())
            .order_by_asc(Column::PoolId)
            .all(self.conn)
            .await?)
    }

    pub async fn held_quantity(&self, pool_id: i64, holder_id: i64) -> Result<i32, ServiceError> {
        Ok(self
            .open_for(pool_id, holder_id)
            .await?
            .iter()
            .map(|r| r.quantity)
            .sum())
    }

    /// Open units per pool across every pool
    pub async fn open_totals_by_pool(&self) -> Result<BTreeMap<i64, i32>, ServiceError> {
        let open = AssetAllocation::find()
            .filter(Column::ReturnedAt.is_null())
            .all(self.conn)
            .await?;
        let mut totals = BTreeMap::new();
        for record in open {
            *totals.entry(record.pool_id).or_insert(0) += record.quantity;
        }
        Ok(totals)
    }

    /// Opens a custody record
    pub async fn issue(
        &self,
        pool_id: i64,
        holder_id: i64,
        quantity: i32,
        issued_at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }
        ActiveModel {
            pool_id: Set(pool_id),
            holder_id: Set(holder_id),
            quantity: Set(quantity),
            issued_at: Set(issued_at),
            returned_at: Set(None),
            note: Set(note),
            ..Default::default()
        }
        .insert(self.conn)
        .await
        .map_err(ServiceError::DatabaseError)
    }

    /// Plans and applies a FIFO return for one holder
    pub async fn return_fifo(
        &self,
        pool_id: i64,
        holder_id: i64,
        quantity: i32,
        returned_at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<ReturnPlan, ServiceError> {
        let open = self.open_for(pool_id, holder_id).await?;
        let plan = plan_fifo_return(&open, quantity)?;
        self.apply(&open, &plan, returned_at, note).await?;
        Ok(plan)
    }

    async fn apply(
        &self,
        open: &[Model],
        plan: &ReturnPlan,
        returned_at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<(), ServiceError> {
        for step in &plan.steps {
            match *step {
                ReturnStep::Close { allocation_id, .. } => {
                    let record = find_in(open, allocation_id)?;
                    let mut active: ActiveModel = record.clone().into();
                    active.returned_at = Set(Some(returned_at));
                    if note.is_some() {
                        active.note = Set(note.clone());
                    }
                    active.update(self.conn).await?;
                }
                ReturnStep::Split {
                    allocation_id,
                    remaining,
                    returned,
                } => {
                    let record = find_in(open, allocation_id)?;
                    let mut active: ActiveModel = record.clone().into();
                    active.quantity = Set(remaining);
                    active.update(self.conn).await?;

                    ActiveModel {
                        pool_id: Set(record.pool_id),
                        holder_id: Set(record.holder_id),
                        quantity: Set(returned),
                        issued_at: Set(record.issued_at),
                        returned_at: Set(Some(returned_at)),
                        note: Set(note.clone().or_else(|| record.note.clone())),
                        ..Default::default()
                    }
                    .insert(self.conn)
                    .await?;
                }
            }
        }
        debug!(steps = plan.steps.len(), quantity = plan.quantity, "Applied FIFO return");
        Ok(())
    }

    pub async fn delete_for_pool(&self, pool_id: i64) -> Result<u64, ServiceError> {
        let res = AssetAllocation::delete_many()
            .filter(Column::PoolId.eq(pool_id))
            .exec(self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}

fn find_in(open: &[Model], allocation_id: i64) -> Result<&Model, ServiceError> {
    open.iter()
        .find(|r| r.id == allocation_id)
        .ok_or_else(|| ServiceError::InternalError(format!(
            "allocation {} vanished during return",
            allocation_id
        )))
}
