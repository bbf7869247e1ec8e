use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Query;
use crate::{
    collaborators::{HolderId, RoomId},
    entities::{
        asset_allocation, asset_history, asset_instance, asset_pool, AssetInstance, AssetPool,
        AssetType, InstanceCondition, PoolStatus,
    },
    errors::ServiceError,
    repositories::{
        AllocationRepository, AssetInstanceRepository, AssetPoolRepository, HistoryRepository,
    },
};

pub const DEFAULT_HISTORY_PAGE_SIZE: u64 = 10;
pub const DEFAULT_LIST_PAGE_SIZE: u64 = 50;

// ---------------------------------------------------------------------------
// Pool detail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDetailQuery {
    pub pool_id: i64,
    /// Zero-based page of the history trail
    #[serde(default)]
    pub history_page: u64,
    pub history_page_size: Option<u64>,
}

impl PoolDetailQuery {
    pub fn new(pool_id: i64) -> Self {
        Self {
            pool_id,
            history_page: 0,
            history_page_size: None,
        }
    }
}

/// Open custody record with the holder's display name once resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationView {
    pub allocation: asset_allocation::Model,
    pub holder_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<asset_history::Model>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl HistoryPage {
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        (self.total + self.page_size - 1) / self.page_size
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolDetail {
    pub pool: asset_pool::Model,
    pub instances: Vec<asset_instance::Model>,
    pub allocations: Vec<AllocationView>,
    pub history: HistoryPage,
}

#[async_trait]
impl Query for PoolDetailQuery {
    type Result = PoolDetail;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let pool = AssetPoolRepository::new(db_pool).get(self.pool_id).await?;
        let instances = AssetInstanceRepository::new(db_pool)
            .list_for_pool(pool.id)
            .await?;
        let allocations = AllocationRepository::new(db_pool)
            .open_for_pool(pool.id)
            .await?
            .into_iter()
            .map(|allocation| AllocationView {
                allocation,
                holder_name: None,
            })
            .collect();

        let page_size = self
            .history_page_size
            .unwrap_or(DEFAULT_HISTORY_PAGE_SIZE)
            .max(1);
        let (entries, total) = HistoryRepository::new(db_pool)
            .page_for_pool(pool.id, self.history_page, page_size)
            .await?;

        Ok(PoolDetail {
            pool,
            instances,
            allocations,
            history: HistoryPage {
                entries,
                total,
                page: self.history_page,
                page_size,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Pool list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPoolsQuery {
    pub asset_type: Option<AssetType>,
    pub status: Option<PoolStatus>,
    /// Matches name or code
    pub search: Option<String>,
    /// Pools the holder has open custody of, or is current holder of
    pub holder_id: Option<HolderId>,
    #[serde(default)]
    pub page: u64,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolPage {
    pub pools: Vec<asset_pool::Model>,
    pub total: u64,
    pub page: u64,
}

#[async_trait]
impl Query for ListPoolsQuery {
    type Result = PoolPage;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let mut query = AssetPool::find();

        if let Some(asset_type) = self.asset_type {
            query = query.filter(asset_pool::Column::AssetType.eq(asset_type));
        }
        if let Some(status) = self.status {
            query = query.filter(asset_pool::Column::Status.eq(status));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(asset_pool::Column::Name.contains(search))
                    .add(asset_pool::Column::Code.contains(search)),
            );
        }
        if let Some(holder_id) = self.holder_id {
            let mut held: Vec<i64> = AllocationRepository::new(db_pool)
                .open_for_holder(holder_id)
                .await?
                .into_iter()
                .map(|a| a.pool_id)
                .collect();
            held.dedup();
            query = query.filter(
                Condition::any()
                    .add(asset_pool::Column::CurrentHolderId.eq(holder_id))
                    .add(asset_pool::Column::Id.is_in(held)),
            );
        }

        let paginator = query
            .order_by_desc(asset_pool::Column::Id)
            .paginate(db_pool, self.page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE).max(1));
        let total = paginator.num_items().await?;
        let pools = paginator.fetch_page(self.page).await?;

        Ok(PoolPage {
            pools,
            total,
            page: self.page,
        })
    }
}

// ---------------------------------------------------------------------------
// Holder holdings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderHoldingsQuery {
    pub holder_id: HolderId,
}

/// Units of one pool a holder currently has
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub pool_id: i64,
    pub code: String,
    pub name: String,
    pub asset_type: AssetType,
    pub quantity: i32,
    pub first_issued_at: DateTime<Utc>,
}

#[async_trait]
impl Query for HolderHoldingsQuery {
    type Result = Vec<Holding>;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let open = AllocationRepository::new(db_pool)
            .open_for_holder(self.holder_id)
            .await?;

        let mut per_pool: BTreeMap<i64, (i32, DateTime<Utc>)> = BTreeMap::new();
        for record in open {
            let entry = per_pool
                .entry(record.pool_id)
                .or_insert((0, record.issued_at));
            entry.0 += record.quantity;
            entry.1 = entry.1.min(record.issued_at);
        }
        if per_pool.is_empty() {
            return Ok(Vec::new());
        }

        let pools = AssetPool::find()
            .filter(asset_pool::Column::Id.is_in(per_pool.keys().copied().collect::<Vec<_>>()))
            .order_by_asc(asset_pool::Column::Id)
            .all(db_pool)
            .await?;

        Ok(pools
            .into_iter()
            .filter_map(|pool| {
                let (quantity, first_issued_at) = per_pool.get(&pool.id).copied()?;
                Some(Holding {
                    pool_id: pool.id,
                    code: pool.code,
                    name: pool.name,
                    asset_type: pool.asset_type,
                    quantity,
                    first_issued_at,
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Instance inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceInventoryQuery {
    pub pool_id: Option<i64>,
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub include_scrapped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceInventory {
    pub instances: Vec<asset_instance::Model>,
    pub total: usize,
    pub normal: usize,
    pub abnormal: usize,
}

impl InstanceInventory {
    pub fn from_instances(instances: Vec<asset_instance::Model>) -> Self {
        let normal = instances
            .iter()
            .filter(|i| !i.condition.is_abnormal())
            .count();
        Self {
            total: instances.len(),
            abnormal: instances.len() - normal,
            normal,
            instances,
        }
    }
}

#[async_trait]
impl Query for InstanceInventoryQuery {
    type Result = InstanceInventory;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let mut query = AssetInstance::find();
        if let Some(pool_id) = self.pool_id {
            query = query.filter(asset_instance::Column::PoolId.eq(pool_id));
        }
        if let Some(room_id) = self.room_id {
            query = query.filter(asset_instance::Column::RoomId.eq(room_id));
        }
        if !self.include_scrapped {
            query = query.filter(asset_instance::Column::Condition.ne(InstanceCondition::Scrapped));
        }

        let instances = query
            .order_by_asc(asset_instance::Column::SerialNumber)
            .all(db_pool)
            .await?;
        Ok(InstanceInventory::from_instances(instances))
    }
}

// ---------------------------------------------------------------------------
// Repair count
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnderRepairCountQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepairCounts {
    pub pools: u64,
    pub instances: u64,
}

#[async_trait]
impl Query for UnderRepairCountQuery {
    type Result = RepairCounts;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let pools = AssetPool::find()
            .filter(asset_pool::Column::Status.eq(PoolStatus::UnderRepair))
            .count(db_pool)
            .await?;
        let instances = AssetInstance::find()
            .filter(asset_instance::Column::Condition.eq(InstanceCondition::UnderRepair))
            .count(db_pool)
            .await?;
        Ok(RepairCounts { pools, instances })
    }
}

// ---------------------------------------------------------------------------
// Bed slots
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BedPosition {
    Upper,
    Lower,
    Single,
}

/// Sleeping positions one unit provides
pub fn bed_positions(capacity: i32) -> &'static [BedPosition] {
    match capacity {
        2 => &[BedPosition::Upper, BedPosition::Lower],
        1 => &[BedPosition::Single],
        _ => &[],
    }
}

pub fn bed_code(serial: &str, position: BedPosition) -> String {
    format!("{}-{}", serial, position)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedSlotsQuery {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedSlot {
    pub code: String,
    pub position: BedPosition,
    pub instance_id: i64,
    pub pool_id: i64,
    pub pool_name: String,
}

#[async_trait]
impl Query for BedSlotsQuery {
    type Result = Vec<BedSlot>;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let rows = AssetInstance::find()
            .find_also_related(AssetPool)
            .filter(asset_instance::Column::RoomId.eq(self.room_id))
            .filter(asset_instance::Column::Condition.ne(InstanceCondition::Scrapped))
            .filter(asset_pool::Column::BedCapacity.gt(0))
            .order_by_asc(asset_instance::Column::SerialNumber)
            .all(db_pool)
            .await?;

        let mut slots = Vec::new();
        for (instance, pool) in rows {
            let Some(pool) = pool else { continue };
            for position in bed_positions(pool.bed_capacity) {
                slots.push(BedSlot {
                    code: bed_code(&instance.serial_number, *position),
                    position: *position,
                    instance_id: instance.id,
                    pool_id: pool.id,
                    pool_name: pool.name.clone(),
                });
            }
        }
        Ok(slots)
    }
}

// ---------------------------------------------------------------------------
// Ledger audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerAuditQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// `total != stock + allocated`
    Unbalanced {
        pool_id: i64,
        code: String,
        total: i32,
        stock: i32,
        allocated: i32,
    },
    /// `allocated` disagrees with the open custody records
    LedgerMismatch {
        pool_id: i64,
        code: String,
        allocated: i32,
        open_records: i32,
    },
    NegativeCounter {
        pool_id: i64,
        code: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub pools_checked: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks one pool against the open units the ledger holds for it
pub fn audit_pool(pool: &asset_pool::Model, open_units: i32) -> Vec<Violation> {
    let mut found = Vec::new();
    if pool.total_quantity < 0 || pool.stock_quantity < 0 || pool.allocated_quantity < 0 {
        found.push(Violation::NegativeCounter {
            pool_id: pool.id,
            code: pool.code.clone(),
        });
    }
    if !pool.is_balanced() {
        found.push(Violation::Unbalanced {
            pool_id: pool.id,
            code: pool.code.clone(),
            total: pool.total_quantity,
            stock: pool.stock_quantity,
            allocated: pool.allocated_quantity,
        });
    }
    if pool.allocated_quantity != open_units {
        found.push(Violation::LedgerMismatch {
            pool_id: pool.id,
            code: pool.code.clone(),
            allocated: pool.allocated_quantity,
            open_records: open_units,
        });
    }
    found
}

#[async_trait]
impl Query for LedgerAuditQuery {
    type Result = AuditReport;

    async fn execute(&self, db_pool: &DatabaseConnection) -> Result<Self::Result, ServiceError> {
        let open = AllocationRepository::new(db_pool)
            .open_totals_by_pool()
            .await?;
        let pools = AssetPool::find()
            .order_by_asc(asset_pool::Column::Id)
            .all(db_pool)
            .await?;

        let mut report = AuditReport {
            pools_checked: pools.len(),
            violations: Vec::new(),
        };
        for pool in &pools {
            let open_units = open.get(&pool.id).copied().unwrap_or(0);
            report.violations.extend(audit_pool(pool, open_units));
        }
        Ok(report)
    }
}
