use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use tracing::{error, warn};

use crate::entities::asset_pool::{ActiveModel, Column, Entity as AssetPool, Model, PoolStatus};
use crate::errors::ServiceError;

/// The three pool counters, checked together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    pub total: i32,
    pub stock: i32,
    pub allocated: i32,
}

impl PoolCounters {
    pub fn of(pool: &Model) -> Self {
        Self {
            total: pool.total_quantity,
            stock: pool.stock_quantity,
            allocated: pool.allocated_quantity,
        }
    }

    /// Applies deltas. Stock or custody going negative is an inventory
    /// shortage; an unbalanced result is a programming error.
    pub fn adjust(self, d_total: i32, d_stock: i32, d_allocated: i32) -> Result<Self, ServiceError> {
        let next = Self {
            total: self.total + d_total,
            stock: self.stock + d_stock,
            allocated: self.allocated + d_allocated,
        };

        if next.stock < 0 {
            return Err(ServiceError::InsufficientInventory {
                requested: -d_stock,
                available: self.stock,
            });
        }
        if next.allocated < 0 {
            return Err(ServiceError::InsufficientInventory {
                requested: -d_allocated,
                available: self.allocated,
            });
        }
        if next.total < 0 {
            return Err(ServiceError::InsufficientInventory {
                requested: -d_total,
                available: self.total,
            });
        }
        if !next.is_balanced() {
            return Err(ServiceError::InternalError(format!(
                "pool counters unbalanced: total {} != stock {} + allocated {}",
                next.total, next.stock, next.allocated
            )));
        }
        Ok(next)
    }

    pub fn is_balanced(&self) -> bool {
        self.total == self.stock + self.allocated
    }
}

/// Store for asset pools. Every counter or status write is a
/// compare-and-swap on the pool's version.
pub struct AssetPoolRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AssetPoolRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find(&self, id: i64) -> Result<Option<Model>, ServiceError> {
        AssetPool::find_by_id(id)
            .one(self.conn)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Like `find`, but a missing pool is `NotFound`
    pub async fn get(&self, id: i64) -> Result<Model, ServiceError> {
        self.find(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Asset pool", id))
    }

    pub async fn code_exists(&self, code: &str) -> Result<bool, ServiceError> {
        let count = AssetPool::find()
            .filter(Column::Code.eq(code))
            .count(self.conn)
            .await?;
        Ok(count > 0)
    }

    pub async fn insert(&self, pool: ActiveModel) -> Result<Model, ServiceError> {
        pool.insert(self.conn).await.map_err(|e| {
            error!(error = %e, "Failed to insert asset pool");
            ServiceError::DatabaseError(e)
        })
    }

    /// Applies counter deltas and re-derives the status.
    ///
    /// `retiring` marks changes that destroy units (scrap, exchange), the only
    /// ones allowed to drive the pool to `scrapped`.
    pub async fn adjust_quantities(
        &self,
        pool: &Model,
        d_total: i32,
        d_stock: i32,
        d_allocated: i32,
        retiring: bool,
    ) -> Result<Model, ServiceError> {
        let counters = PoolCounters::of(pool).adjust(d_total, d_stock, d_allocated)?;
        let status = pool
            .status
            .derive(counters.total, counters.allocated, retiring);

        let mut active: ActiveModel = pool.clone().into();
        active.total_quantity = Set(counters.total);
        active.stock_quantity = Set(counters.stock);
        active.allocated_quantity = Set(counters.allocated);
        active.status = Set(status);
        self.save_versioned(pool, active).await
    }

    pub async fn set_status(&self, pool: &Model, status: PoolStatus) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = pool.clone().into();
        active.status = Set(status);
        self.save_versioned(pool, active).await
    }

    pub async fn set_current_holder(
        &self,
        pool: &Model,
        holder_id: Option<i64>,
    ) -> Result<Model, ServiceError> {
        if pool.current_holder_id == holder_id {
            return Ok(pool.clone());
        }
        let mut active: ActiveModel = pool.clone().into();
        active.current_holder_id = Set(holder_id);
        self.save_versioned(pool, active).await
    }

    /// Holder and location move together when a unit changes rooms
    pub async fn set_placement(
        &self,
        pool: &Model,
        holder_id: Option<i64>,
        location: Option<String>,
    ) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = pool.clone().into();
        active.current_holder_id = Set(holder_id);
        active.location = Set(location);
        self.save_versioned(pool, active).await
    }

    /// Writes `changes` only if nobody else bumped the version since `pool` was read
    pub async fn save_versioned(
        &self,
        pool: &Model,
        mut changes: ActiveModel,
    ) -> Result<Model, ServiceError> {
        changes.version = Set(pool.version + 1);
        changes.updated_at = Set(Utc::now());

        AssetPool::update(changes)
            .filter(Column::Version.eq(pool.version))
            .exec(self.conn)
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => {
                    warn!(pool_id = pool.id, version = pool.version, "Lost update on asset pool");
                    ServiceError::ConcurrentModification(pool.id)
                }
                other => ServiceError::DatabaseError(other),
            })
    }

    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let res = AssetPool::delete_by_id(id).exec(self.conn).await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::not_found("Asset pool", id));
        }
        Ok(())
    }
}
