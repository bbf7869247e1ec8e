use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

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
pub enum HistoryAction {
    #[sea_orm(string_value = "intake")]
    Intake,
    #[sea_orm(string_value = "issue")]
    Issue,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "exchange_recall")]
    ExchangeRecall,
    #[sea_orm(string_value = "exchange_reissue")]
    ExchangeReissue,
    #[sea_orm(string_value = "consume")]
    Consume,
    #[sea_orm(string_value = "supplement")]
    Supplement,
    #[sea_orm(string_value = "scrap")]
    Scrap,
    #[sea_orm(string_value = "repair")]
    Repair,
    #[sea_orm(string_value = "repair_complete")]
    RepairComplete,
    #[sea_orm(string_value = "instance_repair")]
    InstanceRepair,
    #[sea_orm(string_value = "instance_repair_complete")]
    InstanceRepairComplete,
    #[sea_orm(string_value = "instance_scrap")]
    InstanceScrap,
    #[sea_orm(string_value = "instance_relocate")]
    InstanceRelocate,
    #[sea_orm(string_value = "instance_backfill")]
    InstanceBackfill,
    #[sea_orm(string_value = "inventory_check")]
    InventoryCheck,
    #[sea_orm(string_value = "details_updated")]
    DetailsUpdated,
}

/// Append-only trail entry
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub pool_id: i64,
    pub instance_id: Option<i64>,
    pub action: HistoryAction,
    /// Who was affected
    pub holder_id: Option<i64>,
    /// Who performed the action
    pub operator_id: Option<i64>,
    pub quantity_delta: i32,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset_pool::Entity",
        from = "Column::PoolId",
        to = "super::asset_pool::Column::Id",
        on_delete = "Cascade"
    )]
    Pool,
}

impl Related<super::asset_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
