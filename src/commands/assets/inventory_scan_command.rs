use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::record_outcome;
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::OperatorId,
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_instance, HistoryAction, InstanceCondition},
    errors::ServiceError,
    events::Event,
    repositories::{AssetInstanceRepository, HistoryRepository, NewHistoryEntry},
};

/// One serial read during a stock-take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedSerial {
    pub serial: String,
    /// Condition observed on site; `normal` when absent
    pub condition: Option<InstanceCondition>,
}

impl ScannedSerial {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            condition: None,
        }
    }

    pub fn observed(serial: impl Into<String>, condition: InstanceCondition) -> Self {
        Self {
            serial: serial.into(),
            condition: Some(condition),
        }
    }
}

/// Reconciles a stock-take against the instance registry
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InventoryScanCommand {
    #[validate(length(min = 1))]
    pub scans: Vec<ScannedSerial>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub checked: Vec<asset_instance::Model>,
    /// Serials absent from the registry
    pub unknown: Vec<String>,
    /// Known serials whose instance is already scrapped
    pub skipped_scrapped: Vec<String>,
}

#[async_trait]
impl Command for InventoryScanCommand {
    type Result = ScanReport;

    #[instrument(skip(self, ctx), fields(scans = self.scans.len()))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.reconcile(ctx).await;
        record_outcome(AssetOperation::InventoryScan, &result, 0);
        let report = result?;

        if !report.unknown.is_empty() {
            warn!(unknown = ?report.unknown, "Inventory scan found unregistered serials");
        }
        info!(
            checked = report.checked.len(),
            unknown = report.unknown.len(),
            "Inventory scan reconciled"
        );

        ctx.event_sender
            .publish(Event::InventoryChecked {
                checked: report.checked.len(),
                unknown: report.unknown.len(),
            })
            .await;

        Ok(report)
    }
}

impl AssetCommand for InventoryScanCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::InventoryScan
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl InventoryScanCommand {
    async fn reconcile(&self, ctx: &CommandContext) -> Result<ScanReport, ServiceError> {
        self.validate()?;
        if self.scans.iter().any(|s| s.serial.trim().is_empty()) {
            return Err(ServiceError::ValidationError(
                "scanned serial cannot be blank".to_string(),
            ));
        }
        if let Some(scan) = self
            .scans
            .iter()
            .find(|s| s.condition == Some(InstanceCondition::Scrapped))
        {
            return Err(ServiceError::ValidationError(format!(
                "{}: scrapping goes through instance scrap, not a scan",
                scan.serial
            )));
        }

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let instances = AssetInstanceRepository::new(txn);
                let history = HistoryRepository::new(txn);
                let now = Utc::now();
                let mut report = ScanReport::default();

                for scan in &cmd.scans {
                    let serial = scan.serial.trim();
                    let Some(instance) = instances.find_by_serial(serial).await? else {
                        report.unknown.push(serial.to_string());
                        continue;
                    };
                    if instance.condition == InstanceCondition::Scrapped {
                        report.skipped_scrapped.push(serial.to_string());
                        continue;
                    }

                    let observed = scan.condition.unwrap_or(InstanceCondition::Normal);
                    let previous = instance.condition;
                    let instance = instances.mark_inspected(&instance, observed, now).await?;

                    let note = if previous == observed {
                        format!("SN: {} checked, {}", instance.serial_number, observed)
                    } else {
                        format!(
                            "SN: {} checked, {} -> {}",
                            instance.serial_number, previous, observed
                        )
                    };
                    history
                        .append(
                            NewHistoryEntry::new(instance.pool_id, HistoryAction::InventoryCheck)
                                .instance(instance.id)
                                .holder(instance.holder_id)
                                .operator(Some(cmd.operator_id))
                                .note(note),
                        )
                        .await?;
                    report.checked.push(instance);
                }

                Ok(report)
            })
        })
        .await
    }
}
