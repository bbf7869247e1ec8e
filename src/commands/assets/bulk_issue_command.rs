use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::issue_asset_command::issue_units;
use super::{ensure_supports, record_outcome, require_holder};
use super::{AssetCommand, AssetOperation, IssueOutcome};
use crate::{
    collaborators::{HolderId, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::HistoryAction,
    errors::ServiceError,
    events::Event,
    repositories::{AssetPoolRepository, NewHistoryEntry},
};

/// One pool and the quantity the holder should receive from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkIssueLine {
    pub pool_id: i64,
    pub quantity: i32,
}

/// Kits out one holder from several pools at once, typically on onboarding
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkIssueCommand {
    pub holder_id: HolderId,
    #[validate(length(min = 1))]
    pub lines: Vec<BulkIssueLine>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

/// A line left out of the batch and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedLine {
    pub line: BulkIssueLine,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkIssueOutcome {
    pub issued: Vec<IssueOutcome>,
    pub skipped: Vec<SkippedLine>,
}

impl BulkIssueOutcome {
    pub fn issued_quantity(&self) -> i32 {
        self.issued.iter().map(|o| o.allocation.quantity).sum()
    }
}

#[async_trait]
impl Command for BulkIssueCommand {
    type Result = BulkIssueOutcome;

    #[instrument(skip(self, ctx), fields(holder_id = self.holder_id, lines = self.lines.len()))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.issue_all(ctx).await;
        let moved = result.as_ref().map(|(o, _)| o.issued_quantity()).unwrap_or(0);
        record_outcome(AssetOperation::BulkIssue, &result, moved);
        let (outcome, holder_name) = result?;

        for skipped in &outcome.skipped {
            warn!(
                pool_id = skipped.line.pool_id,
                quantity = skipped.line.quantity,
                reason = %skipped.reason,
                "Bulk issue line skipped"
            );
        }
        info!(
            holder_id = self.holder_id,
            issued = outcome.issued.len(),
            skipped = outcome.skipped.len(),
            "Bulk issued assets"
        );

        for issued in &outcome.issued {
            ctx.event_sender
                .publish(Event::AssetIssued {
                    pool_id: issued.pool.id,
                    pool_name: issued.pool.name.clone(),
                    holder_id: self.holder_id,
                    holder_name: holder_name.clone(),
                    quantity: issued.allocation.quantity,
                })
                .await;
        }

        Ok(outcome)
    }
}

impl AssetCommand for BulkIssueCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::BulkIssue
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, result: &BulkIssueOutcome) -> Vec<HolderId> {
        if result.issued.is_empty() {
            Vec::new()
        } else {
            vec![self.holder_id]
        }
    }
}

impl BulkIssueCommand {
    async fn issue_all(
        &self,
        ctx: &CommandContext,
    ) -> Result<(BulkIssueOutcome, String), ServiceError> {
        self.validate()?;
        if !self.lines.iter().any(|line| line.quantity > 0) {
            let quantity = self.lines.first().map(|l| l.quantity).unwrap_or(0);
            return Err(ServiceError::InvalidQuantity(quantity));
        }
        let holder = require_holder(ctx, self.holder_id).await?;

        let cmd = self.clone();
        let outcome = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let pools = AssetPoolRepository::new(txn);
                let issued_at = Utc::now();
                let mut outcome = BulkIssueOutcome::default();

                for line in cmd.lines.iter().filter(|l| l.quantity > 0) {
                    let skip = |reason: String| SkippedLine {
                        line: *line,
                        reason,
                    };

                    let Some(pool) = pools.find(line.pool_id).await? else {
                        outcome.skipped.push(skip("asset not found".to_string()));
                        continue;
                    };
                    if ensure_supports(&pool, AssetOperation::Issue).is_err()
                        || pool.status.is_terminal()
                    {
                        outcome
                            .skipped
                            .push(skip(format!("asset {} cannot be issued", pool.code)));
                        continue;
                    }
                    if pool.stock_quantity < line.quantity {
                        outcome.skipped.push(skip(format!(
                            "stock insufficient: {} available",
                            pool.stock_quantity
                        )));
                        continue;
                    }

                    let (pool, allocation) = issue_units(
                        txn,
                        &pool,
                        cmd.holder_id,
                        line.quantity,
                        issued_at,
                        cmd.note.clone(),
                        NewHistoryEntry::new(pool.id, HistoryAction::Issue)
                            .operator(Some(cmd.operator_id))
                            .note(cmd.note.clone().unwrap_or_else(|| "bulk issue".to_string())),
                    )
                    .await?;
                    outcome.issued.push(IssueOutcome { pool, allocation });
                }

                Ok(outcome)
            })
        })
        .await?;

        Ok((outcome, holder.display_name))
    }
}

