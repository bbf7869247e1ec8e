use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{HolderId, OperatorId, RoomId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_instance, asset_pool, HistoryAction},
    errors::ServiceError,
    events::Event,
    repositories::{
        AssetInstanceRepository, AssetPoolRepository, HistoryRepository, NewHistoryEntry,
        Placement,
    },
};

/// Location text a pool shows once its unit leaves every room
pub const UNASSIGNED_LOCATION: &str = "unassigned";

/// Target room of a relocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RoomAssignment {
    pub room_id: RoomId,
    #[validate(length(min = 1, max = 100))]
    pub label: String,
    /// Person answering for the room, if any
    pub custodian: Option<HolderId>,
}

/// Moves an instance into a room, or back to the unassigned pool when
/// `room` is `None`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelocateInstanceCommand {
    pub instance_id: i64,
    #[validate]
    pub room: Option<RoomAssignment>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelocationOutcome {
    pub pool: asset_pool::Model,
    pub instance: asset_instance::Model,
    pub previous_holder: Option<HolderId>,
    pub new_holder: Option<HolderId>,
}

#[async_trait]
impl Command for RelocateInstanceCommand {
    type Result = RelocationOutcome;

    #[instrument(skip(self, ctx), fields(instance_id = self.instance_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.relocate(ctx).await;
        record_outcome(AssetOperation::InstanceRelocate, &result, 0);
        let outcome = result?;

        info!(
            instance_id = outcome.instance.id,
            room_id = ?outcome.instance.room_id,
            holder_id = ?outcome.new_holder,
            "Asset instance relocated"
        );

        ctx.event_sender
            .publish(Event::InstanceRelocated {
                pool_id: outcome.pool.id,
                instance_id: outcome.instance.id,
                serial_number: outcome.instance.serial_number.clone(),
                room_id: outcome.instance.room_id,
                holder_id: outcome.new_holder,
            })
            .await;

        Ok(outcome)
    }
}

impl AssetCommand for RelocateInstanceCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::InstanceRelocate
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }

    fn touched_holders(&self, result: &RelocationOutcome) -> Vec<HolderId> {
        let mut holders: Vec<HolderId> = result
            .previous_holder
            .into_iter()
            .chain(result.new_holder)
            .collect();
        holders.dedup();
        holders
    }
}

impl RelocateInstanceCommand {
    async fn relocate(&self, ctx: &CommandContext) -> Result<RelocationOutcome, ServiceError> {
        self.validate()?;

        let cmd = self.clone();
        in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let instances = AssetInstanceRepository::new(txn);
                let pools = AssetPoolRepository::new(txn);
                let instance = instances.get(cmd.instance_id).await?;
                let pool = pools.get(instance.pool_id).await?;
                ensure_supports(&pool, AssetOperation::InstanceRelocate)?;

                let previous_holder = instance.holder_id;
                let (placement, location_text) = match &cmd.room {
                    Some(room) => (
                        Placement {
                            room_id: Some(room.room_id),
                            location: Some(room.label.clone()),
                            holder_id: room.custodian,
                        },
                        room.label.clone(),
                    ),
                    None => (Placement::default(), UNASSIGNED_LOCATION.to_string()),
                };
                let new_holder = placement.holder_id;

                let instance = instances.relocate(&instance, placement).await?;
                let pool = pools
                    .set_placement(&pool, new_holder, Some(location_text.clone()))
                    .await?;

                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(pool.id, HistoryAction::InstanceRelocate)
                            .instance(instance.id)
                            .holder(new_holder)
                            .operator(Some(cmd.operator_id))
                            .note(format!(
                                "SN: {} -> {}",
                                instance.serial_number, location_text
                            )),
                    )
                    .await?;

                Ok(RelocationOutcome {
                    pool,
                    instance,
                    previous_holder,
                    new_holder,
                })
            })
        })
        .await
    }
}
