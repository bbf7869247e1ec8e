use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::issue_asset_command::issue_units;
use super::{ensure_active, ensure_positive, ensure_supports, record_outcome, require_holder};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_allocation, asset_pool, AssetType, HistoryAction, InstanceCondition},
    errors::ServiceError,
    events::Event,
    repositories::{
        AllocationRepository, AssetInstanceRepository, AssetPoolRepository, HistoryRepository,
        NewHistoryEntry, ReturnPlan,
    },
};

const DEFAULT_REASON: &str = "old for new";

/// Old-for-new swap: recalls `quantity` held units, retires them, and issues
/// the same number of fresh units from stock
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExchangeAssetCommand {
    pub pool_id: i64,
    pub holder_id: HolderId,
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeOutcome {
    pub pool: asset_pool::Model,
    #[serde(skip)]
    pub recalled: ReturnPlan,
    pub reissued: asset_allocation::Model,
}

#[async_trait]
impl Command for ExchangeAssetCommand {
    type Result = ExchangeOutcome;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id, holder_id = self.holder_id, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.exchange(ctx).await;
        record_outcome(AssetOperation::Exchange, &result, self.quantity);
        let (outcome, holder_name) = result?;

        info!(
            pool_id = self.pool_id,
            holder_id = self.holder_id,
            quantity = self.quantity,
            total = outcome.pool.total_quantity,
            "Exchanged assets"
        );

        ctx.event_sender
            .publish(Event::AssetExchanged {
                pool_id: outcome.pool.id,
                pool_name: outcome.pool.name.clone(),
                holder_id: self.holder_id,
                holder_name,
                quantity: self.quantity,
            })
            .await;

        Ok(outcome)
    }
}

impl AssetCommand for ExchangeAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Exchange
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, _result: &ExchangeOutcome) -> Vec<HolderId> {
        vec![self.holder_id]
    }
}

impl ExchangeAssetCommand {
    async fn exchange(
        &self,
        ctx: &CommandContext,
    ) -> Result<(ExchangeOutcome, String), ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;
        let holder = require_holder(ctx, self.holder_id).await?;

        let cmd = self.clone();
        let outcome = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let allocations = AllocationRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Exchange)?;
                ensure_active(&pool, AssetOperation::Exchange)?;

                // Both sides are checked before anything moves
                let held = allocations.held_quantity(cmd.pool_id, cmd.holder_id).await?;
                if held < cmd.quantity {
                    return Err(ServiceError::InsufficientHoldings {
                        requested: cmd.quantity,
                        held,
                    });
                }
                if pool.stock_quantity < cmd.quantity {
                    return Err(ServiceError::InsufficientInventory {
                        requested: cmd.quantity,
                        available: pool.stock_quantity,
                    });
                }

                let reason = cmd
                    .reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_REASON.to_string());
                let now = Utc::now();

                let recalled = allocations
                    .return_fifo(
                        cmd.pool_id,
                        cmd.holder_id,
                        cmd.quantity,
                        now,
                        Some(format!("recalled in exchange: {}", reason)),
                    )
                    .await?;

                if pool.asset_type == AssetType::FixedAsset {
                    let instances = AssetInstanceRepository::new(txn);
                    for unit in instances
                        .held_by(pool.id, cmd.holder_id, cmd.quantity as u64)
                        .await?
                    {
                        instances
                            .set_condition(&unit, InstanceCondition::Scrapped)
                            .await?;
                    }
                }

                // Recalled units are destroyed, not restocked
                let pool = pools
                    .adjust_quantities(&pool, -cmd.quantity, 0, -cmd.quantity, true)
                    .await?;

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::ExchangeRecall)
                            .holder(Some(cmd.holder_id))
                            .operator(Some(cmd.operator_id))
                            .delta(-cmd.quantity)
                            .note(format!("recalled and retired: {}", reason)),
                    )
                    .await?;

                let (pool, reissued) = issue_units(
                    txn,
                    &pool,
                    cmd.holder_id,
                    cmd.quantity,
                    now,
                    Some(format!("exchange reissue: {}", reason)),
                    NewHistoryEntry::new(cmd.pool_id, HistoryAction::ExchangeReissue)
                        .operator(Some(cmd.operator_id))
                        .note(format!("reissued: {}", reason)),
                )
                .await?;

                Ok(ExchangeOutcome {
                    pool,
                    recalled,
                    reissued,
                })
            })
        })
        .await?;

        Ok((outcome, holder.display_name))
    }
}
