use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_instance, asset_pool, HistoryAction, InstanceCondition},
    errors::ServiceError,
    events::Event,
    repositories::{
        AllocationRepository, AssetInstanceRepository, AssetPoolRepository, HistoryRepository,
        NewHistoryEntry,
    },
};

/// Scraps one serialized unit and takes it off the pool's books
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InstanceScrapCommand {
    pub instance_id: i64,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceScrapOutcome {
    pub pool: asset_pool::Model,
    pub instance: asset_instance::Model,
    /// Set when the unit was in someone's custody
    pub released_from: Option<HolderId>,
}

#[async_trait]
impl Command for InstanceScrapCommand {
    type Result = InstanceScrapOutcome;

    #[instrument(skip(self, ctx), fields(instance_id = self.instance_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.scrap(ctx).await;
        record_outcome(AssetOperation::InstanceScrap, &result, 1);
        let outcome = result?;

        info!(
            instance_id = outcome.instance.id,
            pool_id = outcome.pool.id,
            total = outcome.pool.total_quantity,
            released_from = ?outcome.released_from,
            "Asset instance scrapped"
        );

        ctx.event_sender
            .publish(Event::InstanceScrapped {
                pool_id: outcome.pool.id,
                instance_id: outcome.instance.id,
                serial_number: outcome.instance.serial_number.clone(),
                holder_id: outcome.released_from,
            })
            .await;

        Ok(outcome)
    }
}

impl AssetCommand for InstanceScrapCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::InstanceScrap
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, result: &InstanceScrapOutcome) -> Vec<HolderId> {
        result.released_from.into_iter().collect()
    }
}

impl InstanceScrapCommand {
    async fn scrap(&self, ctx: &CommandContext) -> Result<InstanceScrapOutcome, ServiceError> {
        self.validate()?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let instances = AssetInstanceRepository::new(txn);
                let pools = AssetPoolRepository::new(txn);
                let instance = instances.get(cmd.instance_id).await?;
                let pool = pools.get(instance.pool_id).await?;
                ensure_supports(&pool, AssetOperation::InstanceScrap)?;

                if instance.condition == InstanceCondition::Scrapped {
                    return Err(ServiceError::InvalidStatus(format!(
                        "{} is already scrapped",
                        instance.serial_number
                    )));
                }

                // A unit comes out of stock when there is stock; otherwise it
                // is in custody and its holder's oldest record gives it up.
                let allocations = AllocationRepository::new(txn);
                let (pool, released_from) = if pool.stock_quantity > 0 {
                    let pool = pools.adjust_quantities(&pool, -1, -1, 0, true).await?;
                    // the holder still has a unit on the books, so an idle one
                    // goes into their name
                    if let Some(holder_id) = instance.holder_id {
                        if allocations.held_quantity(pool.id, holder_id).await? > 0 {
                            instances.hand_over(pool.id, holder_id, 1).await?;
                        }
                    }
                    (pool, None)
                } else {
                    let mut holder = None;
                    for candidate in [instance.holder_id, pool.current_holder_id]
                        .into_iter()
                        .flatten()
                    {
                        if allocations.held_quantity(pool.id, candidate).await? > 0 {
                            holder = Some(candidate);
                            break;
                        }
                    }
                    if holder.is_none() {
                        holder = allocations
                            .open_for_pool(pool.id)
                            .await?
                            .first()
                            .map(|record| record.holder_id);
                    }
                    let Some(holder_id) = holder else {
                        return Err(ServiceError::InsufficientInventory {
                            requested: 1,
                            available: 0,
                        });
                    };

                    allocations
                        .return_fifo(
                            pool.id,
                            holder_id,
                            1,
                            Utc::now(),
                            Some(format!("scrapped: {}", instance.serial_number)),
                        )
                        .await?;
                    if instance.holder_id != Some(holder_id) {
                        instances.take_back(pool.id, holder_id, 1).await?;
                    }

                    let mut pool = pools.adjust_quantities(&pool, -1, 0, -1, true).await?;
                    if pool.allocated_quantity == 0 {
                        pool = pools.set_current_holder(&pool, None).await?;
                    }
                    (pool, Some(holder_id))
                };

                let instance = instances
                    .set_condition(&instance, InstanceCondition::Scrapped)
                    .await?;

                let mut note = format!("SN: {}", instance.serial_number);
                if let Some(reason) = cmd.reason.as_deref().filter(|r| !r.is_empty()) {
                    note.push_str(&format!(" | reason: {}", reason));
                }
                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(pool.id, HistoryAction::InstanceScrap)
                            .instance(instance.id)
                            .holder(released_from)
                            .operator(Some(cmd.operator_id))
                            .delta(-1)
                            .note(note),
                    )
                    .await?;

                Ok(InstanceScrapOutcome {
                    pool,
                    instance,
                    released_from,
                })
            })
        })
        .await
    }
}
