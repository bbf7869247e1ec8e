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

/// Brings a pool back from repair; the status follows its counters again
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteRepairCommand {
    pub pool_id: i64,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[async_trait]
impl Command for CompleteRepairCommand {
    type Result = asset_pool::Model;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.complete(ctx).await;
        record_outcome(AssetOperation::CompleteRepair, &result, 0);
        let pool = result?;

        info!(pool_id = pool.id, status = %pool.status, "Asset pool repair completed");

        ctx.event_sender
            .publish(Event::RepairCompleted {
                pool_id: pool.id,
                pool_name: pool.name.clone(),
            })
            .await;

        Ok(pool)
    }
}

impl AssetCommand for CompleteRepairCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::CompleteRepair
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl CompleteRepairCommand {
    async fn complete(&self, ctx: &CommandContext) -> Result<asset_pool::Model, ServiceError> {
        self.validate()?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::CompleteRepair)?;

                if pool.status != PoolStatus::UnderRepair {
                    return Err(ServiceError::InvalidStatus(format!(
                        "asset {} is {}, not under repair",
                        pool.code, pool.status
                    )));
                }

                let restored = PoolStatus::InStock.derive(
                    pool.total_quantity,
                    pool.allocated_quantity,
                    false,
                );
                let pool = pools.set_status(&pool, restored).await?;

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::RepairComplete)
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
