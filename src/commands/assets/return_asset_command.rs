use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{display_holder, ensure_positive, ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_pool, AssetType, HistoryAction},
    errors::ServiceError,
    events::Event,
    repositories::{
        AllocationRepository, AssetInstanceRepository, AssetPoolRepository, HistoryRepository,
        NewHistoryEntry, ReturnPlan,
    },
};

/// Takes units back from a holder, oldest custody first
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReturnAssetCommand {
    pub pool_id: i64,
    pub holder_id: HolderId,
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnOutcome {
    pub pool: asset_pool::Model,
    #[serde(skip)]
    pub plan: ReturnPlan,
}

#[async_trait]
impl Command for ReturnAssetCommand {
    type Result = ReturnOutcome;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id, holder_id = self.holder_id, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.return_units(ctx).await;
        record_outcome(AssetOperation::Return, &result, self.quantity);
        let outcome = result?;

        info!(
            pool_id = self.pool_id,
            holder_id = self.holder_id,
            quantity = self.quantity,
            records = outcome.plan.steps.len(),
            "Returned assets"
        );

        // Unknown holders may still return what the ledger says they hold
        let holder = display_holder(ctx, self.holder_id).await;
        ctx.event_sender
            .publish(Event::AssetReturned {
                pool_id: outcome.pool.id,
                pool_name: outcome.pool.name.clone(),
                holder_id: self.holder_id,
                holder_name: holder.display_name,
                quantity: self.quantity,
            })
            .await;

        Ok(outcome)
    }
}

impl AssetCommand for ReturnAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Return
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, _result: &ReturnOutcome) -> Vec<HolderId> {
        vec![self.holder_id]
    }
}

impl ReturnAssetCommand {
    async fn return_units(&self, ctx: &CommandContext) -> Result<ReturnOutcome, ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Return)?;

                let plan = AllocationRepository::new(txn)
                    .return_fifo(
                        cmd.pool_id,
                        cmd.holder_id,
                        cmd.quantity,
                        Utc::now(),
                        cmd.note.clone(),
                    )
                    .await?;

                if pool.asset_type == AssetType::FixedAsset {
                    AssetInstanceRepository::new(txn)
                        .take_back(pool.id, cmd.holder_id, cmd.quantity)
                        .await?;
                }

                let mut pool = pools
                    .adjust_quantities(&pool, 0, cmd.quantity, -cmd.quantity, false)
                    .await?;
                if pool.allocated_quantity == 0 {
                    pool = pools.set_current_holder(&pool, None).await?;
                }

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::Return)
                            .holder(Some(cmd.holder_id))
                            .operator(Some(cmd.operator_id))
                            .delta(cmd.quantity)
                            .note(cmd.note.clone().unwrap_or_default()),
                    )
                    .await?;

                Ok(ReturnOutcome { pool, plan })
            })
        })
        .await
    }
}
