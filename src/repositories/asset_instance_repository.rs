use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use crate::entities::asset_instance::{
    ActiveModel, Column, Entity as AssetInstance, InstanceCondition, Model,
};
use crate::errors::ServiceError;

/// Date-stamped prefix used when intake doesn't name one
pub fn default_serial_prefix(date: NaiveDate) -> String {
    format!("SN-{}-", date.format("%Y%m%d"))
}

/// Joins prefix and per-unit suffix without doubling the prefix
pub fn compose_serial(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() || suffix.starts_with(prefix) {
        suffix.to_string()
    } else {
        format!("{}{}", prefix, suffix)
    }
}

/// Zero-padded ordinal suffix, 1-based
pub fn ordinal_suffix(index: usize) -> String {
    format!("{:03}", index + 1)
}

/// Where an instance sits and who answers for it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    pub room_id: Option<i64>,
    pub location: Option<String>,
    pub holder_id: Option<i64>,
}

pub struct AssetInstanceRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AssetInstanceRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find(&self, id: i64) -> Result<Option<Model>, ServiceError> {
        Ok(AssetInstance::find_by_id(id).one(self.conn).await?)
    }

    pub async fn get(&self, id: i64) -> Result<Model, ServiceError> {
        self.find(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Asset instance", id))
    }

    pub async fn find_by_serial(&self, serial: &str) -> Result<Option<Model>, ServiceError> {
        Ok(AssetInstance::find()
            .filter(Column::SerialNumber.eq(serial))
            .one(self.conn)
            .await?)
    }

    pub async fn serial_exists(&self, serial: &str) -> Result<bool, ServiceError> {
        Ok(self.find_by_serial(serial).await?.is_some())
    }

    pub async fn list_for_pool(&self, pool_id: i64) -> Result<Vec<Model>, ServiceError> {
        Ok(AssetInstance::find()
            .filter(Column::PoolId.eq(pool_id))
            .order_by_asc(Column::Id)
            .all(self.conn)
            .await?)
    }

    pub async fn count_for_pool(&self, pool_id: i64) -> Result<u64, ServiceError> {
        Ok(AssetInstance::find()
            .filter(Column::PoolId.eq(pool_id))
            .count(self.conn)
            .await?)
    }

    /// Registers a unit. Duplicate serials are a conflict.
    pub async fn create(
        &self,
        pool_id: i64,
        serial: String,
        placement: Placement,
    ) -> Result<Model, ServiceError> {
        if self.serial_exists(&serial).await? {
            return Err(ServiceError::Conflict(format!(
                "Serial number {} already exists",
                serial
            )));
        }

        let now = Utc::now();
        ActiveModel {
            pool_id: Set(pool_id),
            serial_number: Set(serial),
            room_id: Set(placement.room_id),
            location: Set(placement.location),
            holder_id: Set(placement.holder_id),
            condition: Set(InstanceCondition::Normal),
            last_inspected_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.conn)
        .await
        .map_err(ServiceError::DatabaseError)
    }

    pub async fn relocate(
        &self,
        instance: &Model,
        placement: Placement,
    ) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = instance.clone().into();
        active.room_id = Set(placement.room_id);
        active.location = Set(placement.location);
        active.holder_id = Set(placement.holder_id);
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.conn).await?)
    }

    pub async fn reassign_holder(
        &self,
        instance: &Model,
        holder_id: Option<i64>,
    ) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = instance.clone().into();
        active.holder_id = Set(holder_id);
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.conn).await?)
    }

    /// Live units of the pool nobody answers for, lowest id first
    pub async fn unassigned(&self, pool_id: i64, limit: u64) -> Result<Vec<Model>, ServiceError> {
        Ok(AssetInstance::find()
            .filter(Column::PoolId.eq(pool_id))
            .filter(Column::HolderId.is_null())
            .filter(Column::Condition.ne(InstanceCondition::Scrapped))
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(self.conn)
            .await?)
    }

    /// Live units of the pool in one holder's custody, lowest id first
    pub async fn held_by(
        &self,
        pool_id: i64,
        holder_id: i64,
        limit: u64,
    ) -> Result<Vec<Model>, ServiceError> {
        Ok(AssetInstance::find()
            .filter(Column::PoolId.eq(pool_id))
            .filter(Column::HolderId.eq(holder_id))
            .filter(Column::Condition.ne(InstanceCondition::Scrapped))
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(self.conn)
            .await?)
    }

    /// Puts up to `quantity` unassigned units in the holder's name. Returns
    /// how many were handed over; a pool short of instance rows hands fewer.
    pub async fn hand_over(
        &self,
        pool_id: i64,
        holder_id: i64,
        quantity: i32,
    ) -> Result<usize, ServiceError> {
        let units = self.unassigned(pool_id, quantity.max(0) as u64).await?;
        for unit in &units {
            self.reassign_holder(unit, Some(holder_id)).await?;
        }
        Ok(units.len())
    }

    /// Clears the holder from up to `quantity` of their units
    pub async fn take_back(
        &self,
        pool_id: i64,
        holder_id: i64,
        quantity: i32,
    ) -> Result<usize, ServiceError> {
        let units = self
            .held_by(pool_id, holder_id, quantity.max(0) as u64)
            .await?;
        for unit in &units {
            self.reassign_holder(unit, None).await?;
        }
        Ok(units.len())
    }

    pub async fn set_condition(
        &self,
        instance: &Model,
        condition: InstanceCondition,
    ) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = instance.clone().into();
        active.condition = Set(condition);
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.conn).await?)
    }

    /// Records an inventory sighting
    pub async fn mark_inspected(
        &self,
        instance: &Model,
        condition: InstanceCondition,
        at: DateTime<Utc>,
    ) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = instance.clone().into();
        active.condition = Set(condition);
        active.last_inspected_at = Set(Some(at));
        active.updated_at = Set(at);
        Ok(active.update(self.conn).await?)
    }

    pub async fn delete_for_pool(&self, pool_id: i64) -> Result<u64, ServiceError> {
        let res = AssetInstance::delete_many()
            .filter(Column::PoolId.eq(pool_id))
            .exec(self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}
