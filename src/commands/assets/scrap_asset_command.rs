use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_positive, ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::OperatorId,
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_pool, HistoryAction},
    errors::ServiceError,
    events::Event,
    repositories::{AssetPoolRepository, HistoryRepository, NewHistoryEntry},
};

/// Writes off units sitting in stock. Units in custody must be returned first.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScrapAssetCommand {
    pub pool_id: i64,
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    pub operator_id: OperatorId,
}

#[async_trait]
impl Command for ScrapAssetCommand {
    type Result = asset_pool::Model;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.scrap(ctx).await;
        record_outcome(AssetOperation::Scrap, &result, self.quantity);
        let pool = result?;

        info!(
            pool_id = pool.id,
            quantity = self.quantity,
            total = pool.total_quantity,
            status = %pool.status,
            "Scrapped assets"
        );

        ctx.event_sender
            .publish(Event::AssetScrapped {
                pool_id: pool.id,
                pool_name: pool.name.clone(),
                quantity: self.quantity,
            })
            .await;

        Ok(pool)
    }
}

impl AssetCommand for ScrapAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Scrap
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl ScrapAssetCommand {
    async fn scrap(&self, ctx: &CommandContext) -> Result<asset_pool::Model, ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Scrap)?;

                if pool.stock_quantity < cmd.quantity {
                    return Err(ServiceError::InsufficientInventory {
                        requested: cmd.quantity,
                        available: pool.stock_quantity,
                    });
                }

                let pool = pools
                    .adjust_quantities(&pool, -cmd.quantity, -cmd.quantity, 0, true)
                    .await?;

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::Scrap)
                            .operator(Some(cmd.operator_id))
                            .delta(-cmd.quantity)
                            .note(cmd.reason.clone().unwrap_or_default()),
                    )
                    .await?;

                Ok(pool)
            })
        })
        .await
    }
}
