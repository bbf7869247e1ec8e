use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::{record_outcome, AssetCommand, AssetOperation, PhotoUpload};
use crate::{
    collaborators::OperatorId,
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_pool, AllocationMode, AssetType, HistoryAction, Ownership},
    errors::ServiceError,
    events::Event,
    repositories::{AssetInstanceRepository, AssetPoolRepository, HistoryRepository, NewHistoryEntry},
};

/// Edits descriptive fields of a pool. Quantities only move through the
/// ledger operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateAssetDetailsCommand {
    pub pool_id: i64,
    /// Version the caller last saw; a mismatch means someone else wrote first
    pub expected_version: Option<i32>,
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub asset_type: Option<AssetType>,
    /// Empty string clears the location
    #[validate(length(max = 200))]
    pub location: Option<String>,
    pub ownership: Option<Ownership>,
    pub unit_price: Option<Decimal>,
    pub allocation_mode: Option<AllocationMode>,
    #[validate(range(min = 0, max = 2))]
    pub bed_capacity: Option<i32>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    pub photo: Option<PhotoUpload>,
    pub operator_id: OperatorId,
}

struct Updated {
    pool: asset_pool::Model,
    changed: Vec<String>,
    replaced_photo: Option<String>,
}

#[async_trait]
impl Command for UpdateAssetDetailsCommand {
    type Result = asset_pool::Model;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.update(ctx).await;
        record_outcome(AssetOperation::UpdateDetails, &result, 0);
        let updated = result?;

        if let Some(old) = &updated.replaced_photo {
            if let Err(e) = ctx.blobs.delete_file(old).await {
                warn!(path = %old, "Failed to remove replaced photo: {}", e);
            }
        }

        if updated.changed.is_empty() {
            return Ok(updated.pool);
        }

        info!(pool_id = updated.pool.id, changed = ?updated.changed, "Asset details updated");

        ctx.event_sender
            .publish(Event::AssetDetailsUpdated {
                pool_id: updated.pool.id,
                changed: updated.changed,
            })
            .await;

        Ok(updated.pool)
    }
}

impl AssetCommand for UpdateAssetDetailsCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::UpdateDetails
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl UpdateAssetDetailsCommand {
    async fn update(&self, ctx: &CommandContext) -> Result<Updated, ServiceError> {
        self.validate()?;
        if matches!(self.unit_price, Some(price) if price < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "unit price cannot be negative".to_string(),
            ));
        }

        let new_photo = match &self.photo {
            Some(photo) => Some(photo.store(ctx.blobs.as_ref()).await?),
            None => None,
        };

        let cmd = self.clone();
        let photo_for_txn = new_photo.clone();
        let result = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                if let Some(expected) = cmd.expected_version {
                    if expected != pool.version {
                        return Err(ServiceError::ConcurrentModification(pool.id));
                    }
                }

                let mut active: asset_pool::ActiveModel = pool.clone().into();
                let mut changed = Vec::new();

                if let Some(name) = cmd.name.as_deref().map(str::trim) {
                    if name != pool.name {
                        active.name = Set(name.to_string());
                        changed.push("name".to_string());
                    }
                }
                if let Some(asset_type) = cmd.asset_type {
                    if asset_type != pool.asset_type {
                        if pool.asset_type.tracks_instances()
                            && !asset_type.tracks_instances()
                            && AssetInstanceRepository::new(txn)
                                .count_for_pool(pool.id)
                                .await?
                                > 0
                        {
                            return Err(ServiceError::InvalidOperationForType {
                                operation: AssetOperation::UpdateDetails.to_string(),
                                asset_type: pool.asset_type.to_string(),
                            });
                        }
                        active.asset_type = Set(asset_type);
                        changed.push("asset_type".to_string());
                    }
                }
                if let Some(location) = cmd.location.as_deref().map(str::trim) {
                    let location = (!location.is_empty()).then(|| location.to_string());
                    if location != pool.location {
                        active.location = Set(location);
                        changed.push("location".to_string());
                    }
                }
                if let Some(ownership) = cmd.ownership {
                    if ownership != pool.ownership {
                        active.ownership = Set(ownership);
                        changed.push("ownership".to_string());
                    }
                }
                if let Some(price) = cmd.unit_price {
                    if price != pool.unit_price {
                        active.unit_price = Set(price);
                        changed.push("unit_price".to_string());
                    }
                }
                if let Some(mode) = cmd.allocation_mode {
                    if mode != pool.allocation_mode {
                        active.allocation_mode = Set(mode);
                        changed.push("allocation_mode".to_string());
                    }
                }
                if let Some(beds) = cmd.bed_capacity {
                    if beds != pool.bed_capacity {
                        active.bed_capacity = Set(beds);
                        changed.push("bed_capacity".to_string());
                    }
                }
                if let Some(notes) = &cmd.notes {
                    if Some(notes) != pool.notes.as_ref() {
                        active.notes = Set(Some(notes.clone()));
                        changed.push("notes".to_string());
                    }
                }
                let mut replaced_photo = None;
                if let Some(path) = photo_for_txn {
                    active.photo_path = Set(Some(path));
                    replaced_photo = pool.photo_path.clone();
                    changed.push("photo".to_string());
                }

                if changed.is_empty() {
                    return Ok(Updated {
                        pool,
                        changed,
                        replaced_photo,
                    });
                }

                let pool = pools.save_versioned(&pool, active).await?;
                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(pool.id, HistoryAction::DetailsUpdated)
                            .operator(Some(cmd.operator_id))
                            .note(format!("changed: {}", changed.join(", "))),
                    )
                    .await?;

                Ok(Updated {
                    pool,
                    changed,
                    replaced_photo,
                })
            })
        })
        .await;

        if result.is_err() {
            if let Some(path) = &new_photo {
                if let Err(e) = ctx.blobs.delete_file(path).await {
                    warn!(path = %path, "Failed to remove orphaned photo: {}", e);
                }
            }
        }
        result
    }
}
