use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use validator::Validate;

use super::{ensure_active, ensure_positive, ensure_supports, record_outcome, require_holder};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_allocation, asset_pool, AssetType, HistoryAction},
    errors::ServiceError,
    events::Event,
    repositories::{
        AllocationRepository, AssetInstanceRepository, AssetPoolRepository, HistoryRepository,
        NewHistoryEntry,
    },
};

/// Hands `quantity` units from stock to one holder
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IssueAssetCommand {
    pub pool_id: i64,
    pub holder_id: HolderId,
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueOutcome {
    pub pool: asset_pool::Model,
    pub allocation: asset_allocation::Model,
}

#[async_trait]
impl Command for IssueAssetCommand {
    type Result = IssueOutcome;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id, holder_id = self.holder_id, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.issue(ctx).await;
        record_outcome(AssetOperation::Issue, &result, self.quantity);
        let (outcome, holder_name) = result?;

        info!(
            pool_id = self.pool_id,
            holder_id = self.holder_id,
            quantity = self.quantity,
            stock = outcome.pool.stock_quantity,
            "Issued assets"
        );

        ctx.event_sender
            .publish(Event::AssetIssued {
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

impl AssetCommand for IssueAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Issue
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, _result: &IssueOutcome) -> Vec<HolderId> {
        vec![self.holder_id]
    }
}

impl IssueAssetCommand {
    async fn issue(&self, ctx: &CommandContext) -> Result<(IssueOutcome, String), ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;
        let holder = require_holder(ctx, self.holder_id).await?;

        let cmd = self.clone();
        let outcome = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pool = AssetPoolRepository::new(txn).get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Issue)?;
                ensure_active(&pool, AssetOperation::Issue)?;

                let (pool, allocation) = issue_units(
                    txn,
                    &pool,
                    cmd.holder_id,
                    cmd.quantity,
                    Utc::now(),
                    cmd.note.clone(),
                    NewHistoryEntry::new(cmd.pool_id, HistoryAction::Issue)
                        .operator(Some(cmd.operator_id))
                        .note(cmd.note.clone().unwrap_or_default()),
                )
                .await?;
                Ok(IssueOutcome { pool, allocation })
            })
        })
        .await?;

        Ok((outcome, holder.display_name))
    }
}

/// Moves units from stock into a new open custody record, records the
/// holder as the pool's current holder, and appends `history`. Serialized
/// units of a fixed asset are put in the holder's name as well.
pub(crate) async fn issue_units<C: ConnectionTrait>(
    conn: &C,
    pool: &asset_pool::Model,
    holder_id: HolderId,
    quantity: i32,
    issued_at: DateTime<Utc>,
    note: Option<String>,
    history: NewHistoryEntry,
) -> Result<(asset_pool::Model, asset_allocation::Model), ServiceError> {
    ensure_positive(quantity)?;
    if pool.stock_quantity < quantity {
        return Err(ServiceError::InsufficientInventory {
            requested: quantity,
            available: pool.stock_quantity,
        });
    }

    let pools = AssetPoolRepository::new(conn);
    let pool = pools
        .adjust_quantities(pool, 0, -quantity, quantity, false)
        .await?;
    let pool = pools.set_current_holder(&pool, Some(holder_id)).await?;

    let allocation = AllocationRepository::new(conn)
        .issue(pool.id, holder_id, quantity, issued_at, note)
        .await?;

    if pool.asset_type == AssetType::FixedAsset {
        let handed = AssetInstanceRepository::new(conn)
            .hand_over(pool.id, holder_id, quantity)
            .await?;
        if handed < quantity as usize {
            debug!(pool_id = pool.id, handed, quantity, "Fewer instances than issued units");
        }
    }

    HistoryRepository::new(conn)
        .append(history.holder(Some(holder_id)).delta(quantity))
        .await?;

    Ok((pool, allocation))
}
