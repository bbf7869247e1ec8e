use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_active, ensure_positive, ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_pool, HistoryAction},
    errors::ServiceError,
    events::Event,
    repositories::{AssetPoolRepository, HistoryRepository, NewHistoryEntry},
};

/// Uses up consumable stock. No custody records are involved.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConsumeAssetCommand {
    pub pool_id: i64,
    pub quantity: i32,
    /// Who the supplies went to, if anyone in particular
    pub holder_id: Option<HolderId>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[async_trait]
impl Command for ConsumeAssetCommand {
    type Result = asset_pool::Model;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.consume(ctx).await;
        record_outcome(AssetOperation::Consume, &result, self.quantity);
        let pool = result?;

        info!(
            pool_id = pool.id,
            quantity = self.quantity,
            stock = pool.stock_quantity,
            "Consumed assets"
        );

        ctx.event_sender
            .publish(Event::AssetConsumed {
                pool_id: pool.id,
                pool_name: pool.name.clone(),
                quantity: self.quantity,
            })
            .await;

        Ok(pool)
    }
}

impl AssetCommand for ConsumeAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Consume
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl ConsumeAssetCommand {
    async fn consume(&self, ctx: &CommandContext) -> Result<asset_pool::Model, ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Consume)?;
                ensure_active(&pool, AssetOperation::Consume)?;

                if pool.stock_quantity < cmd.quantity {
                    return Err(ServiceError::InsufficientInventory {
                        requested: cmd.quantity,
                        available: pool.stock_quantity,
                    });
                }

                // Consumed units leave the books entirely
                let pool = pools
                    .adjust_quantities(&pool, -cmd.quantity, -cmd.quantity, 0, false)
                    .await?;

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::Consume)
                            .holder(cmd.holder_id)
                            .operator(Some(cmd.operator_id))
                            .delta(-cmd.quantity)
                            .note(cmd.note.clone().unwrap_or_default()),
                    )
                    .await?;

                Ok(pool)
            })
        })
        .await
    }
}
