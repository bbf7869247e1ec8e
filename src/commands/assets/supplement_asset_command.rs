use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_active, ensure_positive, ensure_supports, record_outcome, record_purchase};
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

/// Restocks a pool, optionally charging the purchase to the funds ledger
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SupplementAssetCommand {
    pub pool_id: i64,
    pub quantity: i32,
    /// Purchase price per unit; the pool's price when absent
    pub unit_price: Option<Decimal>,
    /// Record the purchase as an expense
    #[serde(default)]
    pub sync_funds: bool,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplementOutcome {
    pub pool: asset_pool::Model,
    /// Amount charged to the funds ledger, if any
    pub charged: Option<Decimal>,
}

#[async_trait]
impl Command for SupplementAssetCommand {
    type Result = SupplementOutcome;

    #[instrument(skip(self, ctx), fields(pool_id = self.pool_id, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.supplement(ctx).await;
        record_outcome(AssetOperation::Supplement, &result, self.quantity);
        let outcome = result?;

        info!(
            pool_id = self.pool_id,
            quantity = self.quantity,
            total = outcome.pool.total_quantity,
            charged = ?outcome.charged,
            "Supplemented assets"
        );

        ctx.event_sender
            .publish(Event::AssetSupplemented {
                pool_id: outcome.pool.id,
                pool_name: outcome.pool.name.clone(),
                quantity: self.quantity,
            })
            .await;

        Ok(outcome)
    }
}

impl AssetCommand for SupplementAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Supplement
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl SupplementAssetCommand {
    async fn supplement(&self, ctx: &CommandContext) -> Result<SupplementOutcome, ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;
        if matches!(self.unit_price, Some(price) if price < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "unit price cannot be negative".to_string(),
            ));
        }

        let cmd = self.clone();
        let funds = ctx.funds.clone();
        let sync_ownership = ctx.funds_sync_ownership;
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let pool = pools.get(cmd.pool_id).await?;
                ensure_supports(&pool, AssetOperation::Supplement)?;
                ensure_active(&pool, AssetOperation::Supplement)?;

                let pool = pools
                    .adjust_quantities(&pool, cmd.quantity, cmd.quantity, 0, false)
                    .await?;

                let unit_price = cmd.unit_price.unwrap_or(pool.unit_price);
                let mut charged = None;
                if cmd.sync_funds && pool.ownership == sync_ownership {
                    let amount = unit_price * Decimal::from(cmd.quantity);
                    let description = format!(
                        "Asset restock: {} x{} ({})",
                        pool.name, cmd.quantity, pool.code
                    );
                    if record_purchase(funds.as_ref(), &pool, amount, description, cmd.operator_id)
                        .await
                    {
                        charged = Some(amount);
                    }
                }

                let mut note = format!("restocked {}", cmd.quantity);
                if let Some(amount) = charged {
                    note.push_str(&format!(", charged {} to funds", amount));
                }
                if let Some(extra) = cmd.note.as_deref().filter(|n| !n.is_empty()) {
                    note.push_str(&format!(": {}", extra));
                }

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(cmd.pool_id, HistoryAction::Supplement)
                            .operator(Some(cmd.operator_id))
                            .delta(cmd.quantity)
                            .note(note),
                    )
                    .await?;

                Ok(SupplementOutcome { pool, charged })
            })
        })
        .await
    }
}
