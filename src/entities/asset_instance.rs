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
pub enum InstanceCondition {
    #[sea_orm(string_value = "normal")]
    Normal,
    #[sea_orm(string_value = "damaged")]
    Damaged,
    #[sea_orm(string_value = "under_repair")]
    UnderRepair,
    #[sea_orm(string_value = "scrapped")]
    Scrapped,
}

impl InstanceCondition {
    pub fn is_abnormal(&self) -> bool {
        *self != InstanceCondition::Normal
    }
}

/// One serialized unit of a fixed-asset pool
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_instances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub pool_id: i64,
    #[sea_orm(unique)]
    pub serial_number: String,
    /// Room or place the unit sits in
    pub room_id: Option<i64>,
    pub location: Option<String>,
    pub holder_id: Option<i64>,
    pub condition: InstanceCondition,
    pub last_inspected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
