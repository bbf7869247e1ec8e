//! The operation engine: one command object per ledger operation.
//!
//! Every command validates, then performs all pool, ledger, instance and
//! history writes inside one transaction. Events leave only after commit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    collaborators::{FundsLedger, Holder, HolderId, OperatorId},
    commands::{Command, CommandContext},
    entities::asset_pool,
    errors::ServiceError,
    metrics,
};

pub mod backfill_instances_command;
pub mod bulk_issue_command;
pub mod complete_repair_command;
pub mod consume_asset_command;
pub mod create_asset_command;
pub mod delete_asset_command;
pub mod exchange_asset_command;
pub mod instance_repair_command;
pub mod instance_scrap_command;
pub mod inventory_scan_command;
pub mod issue_asset_command;
pub mod relocate_instance_command;
pub mod repair_asset_command;
pub mod return_asset_command;
pub mod scrap_asset_command;
pub mod supplement_asset_command;
pub mod update_asset_details_command;

pub use backfill_instances_command::{BackfillInstancesCommand, BackfillOutcome};
pub use bulk_issue_command::{BulkIssueCommand, BulkIssueLine, BulkIssueOutcome, SkippedLine};
pub use complete_repair_command::CompleteRepairCommand;
pub use consume_asset_command::ConsumeAssetCommand;
pub use create_asset_command::{CreateAssetCommand, CreatedAsset, PhotoUpload};
pub use delete_asset_command::{DeleteAssetCommand, DeletedAsset};
pub use exchange_asset_command::{ExchangeAssetCommand, ExchangeOutcome};
pub use instance_repair_command::{CompleteInstanceRepairCommand, StartInstanceRepairCommand};
pub use instance_scrap_command::{InstanceScrapCommand, InstanceScrapOutcome};
pub use inventory_scan_command::{InventoryScanCommand, ScanReport, ScannedSerial};
pub use issue_asset_command::{IssueAssetCommand, IssueOutcome};
pub use relocate_instance_command::{RelocateInstanceCommand, RelocationOutcome, RoomAssignment};
pub use repair_asset_command::RepairAssetCommand;
pub use return_asset_command::{ReturnAssetCommand, ReturnOutcome};
pub use scrap_asset_command::ScrapAssetCommand;
pub use supplement_asset_command::{SupplementAssetCommand, SupplementOutcome};
pub use update_asset_details_command::UpdateAssetDetailsCommand;

/// Every operation the engine performs
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssetOperation {
    Create,
    UpdateDetails,
    Delete,
    Issue,
    BulkIssue,
    Return,
    Exchange,
    Consume,
    Supplement,
    Scrap,
    Repair,
    CompleteRepair,
    InstanceRepair,
    InstanceCompleteRepair,
    InstanceScrap,
    InstanceRelocate,
    BackfillInstances,
    InventoryScan,
}

impl AssetOperation {
    /// Permission key checked by the gate before the command runs
    pub fn permission(&self) -> &'static str {
        match self {
            AssetOperation::Create => "asset.add",
            AssetOperation::UpdateDetails
            | AssetOperation::InstanceRelocate
            | AssetOperation::BackfillInstances => "asset.edit",
            AssetOperation::Delete => "asset.delete",
            AssetOperation::Issue | AssetOperation::BulkIssue | AssetOperation::Exchange => {
                "asset.issue"
            }
            AssetOperation::Return => "asset.return",
            AssetOperation::Consume => "asset.consume",
            AssetOperation::Supplement => "asset.supplement",
            AssetOperation::Scrap | AssetOperation::InstanceScrap => "asset.scrap",
            AssetOperation::Repair | AssetOperation::InstanceRepair => "asset.repair",
            AssetOperation::CompleteRepair | AssetOperation::InstanceCompleteRepair => {
                "asset.complete_repair"
            }
            AssetOperation::InventoryScan => "asset.inventory",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A command the asset service can gate, run and account for
pub trait AssetCommand: Command {
    fn operation(&self) -> AssetOperation;

    fn operator_id(&self) -> OperatorId;

    /// Holders whose custody changed, for cache invalidation
    fn touched_holders(&self, _result: &Self::Result) -> Vec<HolderId> {
        Vec::new()
    }
}

pub(crate) fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::InvalidQuantity(quantity));
    }
    Ok(())
}

pub(crate) fn ensure_supports(
    pool: &asset_pool::Model,
    operation: AssetOperation,
) -> Result<(), ServiceError> {
    if !pool.asset_type.supports(operation) {
        return Err(ServiceError::InvalidOperationForType {
            operation: operation.to_string(),
            asset_type: pool.asset_type.to_string(),
        });
    }
    Ok(())
}

/// Scrapped pools accept no further movement
pub(crate) fn ensure_active(
    pool: &asset_pool::Model,
    operation: AssetOperation,
) -> Result<(), ServiceError> {
    if pool.status.is_terminal() {
        return Err(ServiceError::InvalidStatus(format!(
            "cannot {} asset {} ({}): it is scrapped",
            operation, pool.name, pool.code
        )));
    }
    Ok(())
}

/// Holder that must exist for the operation to proceed
pub(crate) async fn require_holder(
    ctx: &CommandContext,
    holder_id: HolderId,
) -> Result<Holder, ServiceError> {
    ctx.holders
        .resolve_holder(holder_id)
        .await
        .map_err(|e| ServiceError::ExternalServiceError(format!("holder directory: {}", e)))?
        .ok_or_else(|| ServiceError::not_found("Holder", holder_id))
}

/// Holder for display only; unknown or unreachable holders get a placeholder
pub(crate) async fn display_holder(ctx: &CommandContext, holder_id: HolderId) -> Holder {
    match ctx.holders.resolve_holder(holder_id).await {
        Ok(Some(holder)) => holder,
        Ok(None) => Holder::unknown(holder_id),
        Err(e) => {
            warn!(holder_id, "Holder directory unavailable: {}", e);
            Holder::unknown(holder_id)
        }
    }
}

/// Mirrors a purchase into the funds ledger. Failures are logged and the
/// inventory change goes ahead. Returns whether an expense was recorded.
pub(crate) async fn record_purchase(
    funds: &dyn FundsLedger,
    pool: &asset_pool::Model,
    amount: Decimal,
    description: String,
    operator_id: OperatorId,
) -> bool {
    if amount <= Decimal::ZERO {
        return false;
    }
    match funds
        .record_expense(amount, &description, Some(operator_id))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(
                pool_id = pool.id,
                %amount,
                "Funds ledger rejected purchase, inventory change kept: {}",
                e
            );
            false
        }
    }
}

/// Metrics and logs for a finished command
pub(crate) fn record_outcome<T>(
    operation: AssetOperation,
    result: &Result<T, ServiceError>,
    quantity: i32,
) {
    match result {
        Ok(_) => metrics::record_success(operation.as_str(), quantity),
        Err(e) => {
            metrics::record_failure(operation.as_str(), e);
            if e.is_validation() {
                warn!(operation = %operation, error = %e, "Asset operation rejected");
            } else {
                error!(operation = %operation, error = %e, "Asset operation failed");
            }
        }
    }
}
