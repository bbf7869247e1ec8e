use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::OperatorId,
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_instance, HistoryAction, InstanceCondition},
    errors::ServiceError,
    events::Event,
    repositories::{
        AssetInstanceRepository, AssetPoolRepository, HistoryRepository, NewHistoryEntry,
    },
};

/// Sends one serialized unit to repair
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartInstanceRepairCommand {
    pub instance_id: i64,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

/// Marks a repaired unit as normal again
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteInstanceRepairCommand {
    pub instance_id: i64,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub operator_id: OperatorId,
}

#[async_trait]
impl Command for StartInstanceRepairCommand {
    type Result = asset_instance::Model;

    #[instrument(skip(self, ctx), fields(instance_id = self.instance_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        let cmd = self.clone();
        let result = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                transition(
                    txn,
                    cmd.instance_id,
                    AssetOperation::InstanceRepair,
                    &[InstanceCondition::Normal, InstanceCondition::Damaged],
                    InstanceCondition::UnderRepair,
                    cmd.operator_id,
                    cmd.note.as_deref(),
                )
                .await
            })
        })
        .await;
        record_outcome(AssetOperation::InstanceRepair, &result, 0);
        let instance = result?;

        info!(
            instance_id = instance.id,
            serial = %instance.serial_number,
            "Asset instance sent to repair"
        );

        ctx.event_sender
            .publish(Event::InstanceRepairStarted {
                pool_id: instance.pool_id,
                instance_id: instance.id,
                serial_number: instance.serial_number.clone(),
            })
            .await;

        Ok(instance)
    }
}

impl AssetCommand for StartInstanceRepairCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::InstanceRepair
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

#[async_trait]
impl Command for CompleteInstanceRepairCommand {
    type Result = asset_instance::Model;

    #[instrument(skip(self, ctx), fields(instance_id = self.instance_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        let cmd = self.clone();
        let result = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                transition(
                    txn,
                    cmd.instance_id,
                    AssetOperation::InstanceCompleteRepair,
                    &[InstanceCondition::UnderRepair],
                    InstanceCondition::Normal,
                    cmd.operator_id,
                    cmd.note.as_deref(),
                )
                .await
            })
        })
        .await;
        record_outcome(AssetOperation::InstanceCompleteRepair, &result, 0);
        let instance = result?;

        info!(
            instance_id = instance.id,
            serial = %instance.serial_number,
            "Asset instance repair completed"
        );

        ctx.event_sender
            .publish(Event::InstanceRepairCompleted {
                pool_id: instance.pool_id,
                instance_id: instance.id,
                serial_number: instance.serial_number.clone(),
            })
            .await;

        Ok(instance)
    }
}

impl AssetCommand for CompleteInstanceRepairCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::InstanceCompleteRepair
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

/// Condition change on one instance; no pool quantity moves
async fn transition<C: ConnectionTrait>(
    conn: &C,
    instance_id: i64,
    operation: AssetOperation,
    allowed_from: &[InstanceCondition],
    to: InstanceCondition,
    operator_id: OperatorId,
    note: Option<&str>,
) -> Result<asset_instance::Model, ServiceError> {
    let instances = AssetInstanceRepository::new(conn);
    let instance = instances.get(instance_id).await?;
    let pool = AssetPoolRepository::new(conn).get(instance.pool_id).await?;
    ensure_supports(&pool, operation)?;

    if !allowed_from.contains(&instance.condition) {
        return Err(ServiceError::InvalidStatus(format!(
            "cannot {} {} while it is {}",
            operation, instance.serial_number, instance.condition
        )));
    }

    let instance = instances.set_condition(&instance, to).await?;

    let action = match to {
        InstanceCondition::UnderRepair => HistoryAction::InstanceRepair,
        _ => HistoryAction::InstanceRepairComplete,
    };
    let mut text = format!("SN: {}", instance.serial_number);
    if let Some(note) = note.filter(|n| !n.is_empty()) {
        text.push_str(&format!(" | {}", note));
    }
    HistoryRepository::new(conn)
        .append(
            NewHistoryEntry::new(instance.pool_id, action)
                .instance(instance.id)
                .holder(instance.holder_id)
                .operator(Some(operator_id))
                .note(text),
        )
        .await?;

    Ok(instance)
}
