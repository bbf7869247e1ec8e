use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{record_outcome, AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    errors::ServiceError,
    events::Event,
    repositories::{
        AllocationRepository, AssetInstanceRepository, AssetPoolRepository, HistoryRepository,
    },
};

/// Removes a pool together with its ledger, history and instance rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAssetCommand {
    pub pool_id: i64,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedAsset {
    pub pool_id: i64,
    pub code: String,
    /// Holders that still had open custody of the pool
    pub released_holders: Vec<HolderId>,
    #[serde(skip)]
    pub photo_path: Option<String>,
}

#[async_trait]
impl Command for DeleteAssetCommand {
    type Result = DeletedAsset;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let pool_id = self.pool_id;
        let result = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pool = AssetPoolRepository::new(txn).get(pool_id).await?;

                let allocations = AllocationRepository::new(txn);
                let mut released_holders: Vec<HolderId> = allocations
                    .open_for_pool(pool_id)
                    .await?
                    .into_iter()
                    .map(|a| a.holder_id)
                    .collect();
                released_holders.sort_unstable();
                released_holders.dedup();

                let ledger_rows = allocations.delete_for_pool(pool_id).await?;
                let history_rows = HistoryRepository::new(txn).delete_for_pool(pool_id).await?;
                let instance_rows = AssetInstanceRepository::new(txn)
                    .delete_for_pool(pool_id)
                    .await?;
                AssetPoolRepository::new(txn).delete(pool_id).await?;

                info!(
                    pool_id,
                    ledger_rows, history_rows, instance_rows, "Purged asset pool rows"
                );

                Ok(DeletedAsset {
                    pool_id,
                    code: pool.code,
                    released_holders,
                    photo_path: pool.photo_path,
                })
            })
        })
        .await;
        record_outcome(AssetOperation::Delete, &result, 0);
        let deleted = result?;

        if let Some(path) = &deleted.photo_path {
            if let Err(e) = ctx.blobs.delete_file(path).await {
                warn!(pool_id, path = %path, "Failed to remove asset photo: {}", e);
            }
        }

        info!(pool_id, code = %deleted.code, operator_id = self.operator_id, "Asset pool deleted");

        ctx.event_sender
            .publish(Event::AssetDeleted {
                pool_id,
                code: deleted.code.clone(),
            })
            .await;

        Ok(deleted)
    }
}

impl AssetCommand for DeleteAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Delete
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, result: &DeletedAsset) -> Vec<HolderId> {
        result.released_holders.clone()
    }
}
