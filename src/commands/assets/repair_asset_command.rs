use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::OperatorId,
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_pool, HistoryAction, PoolStatus},
    errors::ServiceError,
    events::Event,
    repositories::{AssetPoolRepository, HistoryRepository, NewHistoryEntry},
};

/// Sends a fixed-asset pool to repair. Quantities are untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RepairAssetCommand {
    pub pool_id: i64,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[async_trait]
impl Command for RepairAssetCommand {
    type Result = asset_pool::Model;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.start_repair(ctx).await;
        record_outcome(AssetOperation::Repair, &result, 0);
        let pool = result?;

        info!(pool_id = pool.id, "Asset pool sent to repair");

        ctx.event_sender
            .publish(Event::RepairStarted {
                pool_id: pool.id,
                pool_name: pool.name.clone(),
            })
            .await;

        Ok(pool)
    }
}

impl AssetCommand for RepairAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Repair
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl RepairAssetCommand {
    async fn start_repair(&self, ctx: &CommandContext) -> Result<asset_pool::Model, ServiceError> {
        self.validate()?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Repair)?;

                match pool.status {
                    PoolStatus::InStock | PoolStatus::InUse => {}
                    other => {
                        return Err(ServiceError::InvalidStatus(format!(
                            "cannot repair asset {} while it is {}",
                            pool.code, other
                        )))
                    }
                }

                let pool = pools.set_status(&pool, PoolStatus::UnderRepair).await?;

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::Repair)
                            .operator(Some(cmd.operator_id))
                            .note(cmd.note.clone().unwrap_or_default()),
                    )
                    .await?;

                Ok(pool)
            })
        })
        .await
    }
}
