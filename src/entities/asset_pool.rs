use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::commands::assets::AssetOperation;

/// Asset category. Decides which operations a pool accepts.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssetType {
    #[sea_orm(string_value = "equipment")]
    Equipment,
    #[sea_orm(string_value = "apparel")]
    Apparel,
    #[sea_orm(string_value = "consumable")]
    Consumable,
    #[sea_orm(string_value = "fixed_asset")]
    FixedAsset,
    #[sea_orm(string_value = "tool")]
    Tool,
    #[sea_orm(string_value = "other")]
    Other,
}

impl AssetType {
    /// Operation table per asset type.
    pub fn supports(&self, operation: AssetOperation) -> bool {
        use AssetOperation::*;
        match operation {
            Consume => *self == AssetType::Consumable,
            Repair
            | CompleteRepair
            | InstanceRepair
            | InstanceCompleteRepair
            | InstanceScrap
            | InstanceRelocate
            | BackfillInstances => *self == AssetType::FixedAsset,
            _ => true,
        }
    }

    /// Fixed assets carry one serialized instance per unit
    pub fn tracks_instances(&self) -> bool {
        *self == AssetType::FixedAsset
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PoolStatus {
    #[sea_orm(string_value = "in_stock")]
    InStock,
    #[sea_orm(string_value = "in_use")]
    InUse,
    #[sea_orm(string_value = "under_repair")]
    UnderRepair,
    #[sea_orm(string_value = "scrapped")]
    Scrapped,
}

impl PoolStatus {
    /// Status implied by the counters after a quantity change.
    ///
    /// `scrapped` is terminal and `under_repair` only ends through an explicit
    /// completion. A pool reaching zero total becomes `scrapped` only when the
    /// change itself retired units (`retiring`).
    pub fn derive(self, total: i32, allocated: i32, retiring: bool) -> PoolStatus {
        match self {
            PoolStatus::Scrapped => PoolStatus::Scrapped,
            _ if retiring && total == 0 => PoolStatus::Scrapped,
            PoolStatus::UnderRepair => PoolStatus::UnderRepair,
            _ if allocated > 0 => PoolStatus::InUse,
            _ => PoolStatus::InStock,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == PoolStatus::Scrapped
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Ownership {
    #[sea_orm(string_value = "company")]
    Company,
    #[sea_orm(string_value = "police_station")]
    PoliceStation,
    #[sea_orm(string_value = "personal")]
    Personal,
    #[sea_orm(string_value = "guard_unit")]
    GuardUnit,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AllocationMode {
    #[sea_orm(string_value = "personal")]
    Personal,
    #[sea_orm(string_value = "group")]
    Group,
}

/// Aggregate record for one equipment type or batch
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_pools")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub asset_type: AssetType,
    pub total_quantity: i32,
    pub stock_quantity: i32,
    pub allocated_quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub unit_price: Decimal,
    pub ownership: Ownership,
    pub status: PoolStatus,
    pub location: Option<String>,
    /// Last known primary holder when the pool is held as a whole
    pub current_holder_id: Option<i64>,
    pub allocation_mode: AllocationMode,
    /// Sleeping positions per unit: 0, 1 or 2
    pub bed_capacity: i32,
    pub photo_path: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every counter or status write
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::asset_instance::Entity")]
    Instances,
    #[sea_orm(has_many = "super::asset_allocation::Entity")]
    Allocations,
    #[sea_orm(has_many = "super::asset_history::Entity")]
    History,
}

impl Related<super::asset_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instances.def()
    }
}

impl Related<super::asset_allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl Related<super::asset_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// `total == stock + allocated`
    pub fn is_balanced(&self) -> bool {
        self.total_quantity == self.stock_quantity + self.allocated_quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn operation_table() {
        assert!(AssetType::Consumable.supports(AssetOperation::Consume));
        assert!(!AssetType::Equipment.supports(AssetOperation::Consume));
        assert!(AssetType::FixedAsset.supports(AssetOperation::InstanceRepair));
        assert!(!AssetType::Tool.supports(AssetOperation::Repair));
        assert!(!AssetType::Apparel.supports(AssetOperation::InstanceScrap));
        for ty in [
            AssetType::Equipment,
            AssetType::Apparel,
            AssetType::Consumable,
            AssetType::FixedAsset,
            AssetType::Tool,
            AssetType::Other,
        ] {
            assert!(ty.supports(AssetOperation::Issue));
            assert!(ty.supports(AssetOperation::Return));
            assert!(ty.supports(AssetOperation::Exchange));
            assert!(ty.supports(AssetOperation::Supplement));
            assert!(ty.supports(AssetOperation::Scrap));
        }
    }

    #[test]
    fn status_follows_allocation() {
        assert_eq!(PoolStatus::InStock.derive(5, 2, false), PoolStatus::InUse);
        assert_eq!(PoolStatus::InUse.derive(5, 0, false), PoolStatus::InStock);
        assert_eq!(PoolStatus::InUse.derive(0, 0, false), PoolStatus::InStock);
    }

    #[test]
    fn retiring_to_zero_scraps() {
        assert_eq!(PoolStatus::InStock.derive(0, 0, true), PoolStatus::Scrapped);
        assert_eq!(PoolStatus::UnderRepair.derive(0, 0, true), PoolStatus::Scrapped);
        assert_eq!(PoolStatus::InStock.derive(3, 0, true), PoolStatus::InStock);
    }

    #[test]
    fn repair_and_scrap_are_sticky() {
        assert_eq!(PoolStatus::UnderRepair.derive(4, 1, false), PoolStatus::UnderRepair);
        assert_eq!(PoolStatus::Scrapped.derive(4, 0, false), PoolStatus::Scrapped);
    }

    #[test]
    fn enums_parse_snake_case() {
        assert_eq!(AssetType::from_str("fixed_asset").unwrap(), AssetType::FixedAsset);
        assert_eq!(Ownership::GuardUnit.to_string(), "guard_unit");
        assert!(PoolStatus::from_str("broken").is_err());
    }
}
