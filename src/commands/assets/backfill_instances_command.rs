use async_trait::async_trait;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{ensure_supports, record_outcome};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::OperatorId,
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{asset_pool, AssetPool, AssetType, HistoryAction},
    errors::ServiceError,
    events::Event,
    repositories::{
        AssetInstanceRepository, AssetPoolRepository, HistoryRepository, NewHistoryEntry,
        Placement,
    },
};

/// Creates the missing instances of fixed-asset pools whose instance count
/// lags their total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillInstancesCommand {
    /// A single pool, or every fixed-asset pool when `None`
    pub pool_id: Option<i64>,
    pub operator_id: OperatorId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillOutcome {
    /// (pool id, instances created) for every pool that gained instances
    pub pools: Vec<(i64, usize)>,
}

impl BackfillOutcome {
    pub fn created(&self) -> usize {
        self.pools.iter().map(|(_, n)| n).sum()
    }
}

/// Serial of the `ordinal`-th (1-based) unit of a pool
pub fn backfill_serial(code: &str, ordinal: u64) -> String {
    let prefix = match code.trim_end_matches('-') {
        "" => "SN",
        trimmed => trimmed,
    };
    format!("{}-{:03}", prefix, ordinal)
}

#[async_trait]
impl Command for BackfillInstancesCommand {
    type Result = BackfillOutcome;

    #[instrument(skip(self, ctx), fields(pool_id = ?self.pool_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let cmd = self.clone();
        let result = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move { cmd.backfill(txn).await })
        })
        .await;
        let created = result.as_ref().map(|o| o.created()).unwrap_or(0);
        record_outcome(
            AssetOperation::BackfillInstances,
            &result,
            i32::try_from(created).unwrap_or(i32::MAX),
        );
        let outcome = result?;

        info!(
            pools = outcome.pools.len(),
            created = outcome.created(),
            "Backfilled asset instances"
        );

        for (pool_id, created) in &outcome.pools {
            ctx.event_sender
                .publish(Event::InstancesBackfilled {
                    pool_id: *pool_id,
                    created: *created,
                })
                .await;
        }

        Ok(outcome)
    }
}

impl AssetCommand for BackfillInstancesCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::BackfillInstances
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl BackfillInstancesCommand {
    async fn backfill<C: ConnectionTrait>(&self, conn: &C) -> Result<BackfillOutcome, ServiceError> {
        let pools = match self.pool_id {
            Some(id) => {
                let pool = AssetPoolRepository::new(conn).get(id).await?;
                ensure_supports(&pool, AssetOperation::BackfillInstances)?;
                vec![pool]
            }
            None => {
                AssetPool::find()
                    .filter(asset_pool::Column::AssetType.eq(AssetType::FixedAsset))
                    .order_by_asc(asset_pool::Column::Id)
                    .all(conn)
                    .await?
            }
        };

        let mut outcome = BackfillOutcome::default();
        for pool in pools {
            let created = self.fill_pool(conn, &pool).await?;
            if created > 0 {
                outcome.pools.push((pool.id, created));
            }
        }
        Ok(outcome)
    }

    async fn fill_pool<C: ConnectionTrait>(
        &self,
        conn: &C,
        pool: &asset_pool::Model,
    ) -> Result<usize, ServiceError> {
        let instances = AssetInstanceRepository::new(conn);
        let existing = instances.count_for_pool(pool.id).await?;
        let target = u64::try_from(pool.total_quantity).unwrap_or(0);
        if existing >= target {
            return Ok(0);
        }

        let mut created = 0;
        let mut ordinal = existing;
        while existing + (created as u64) < target {
            ordinal += 1;
            let serial = backfill_serial(&pool.code, ordinal);
            // Hand-entered serials may already occupy an ordinal
            if instances.serial_exists(&serial).await? {
                continue;
            }
            let placement = Placement {
                room_id: None,
                location: pool.location.clone(),
                holder_id: None,
            };
            let instance = instances.create(pool.id, serial, placement).await?;
            HistoryRepository::new(conn)
                .append(
                    NewHistoryEntry::new(pool.id, HistoryAction::InstanceBackfill)
                        .instance(instance.id)
                        .operator(Some(self.operator_id))
                        .note(format!("SN: {}", instance.serial_number)),
                )
                .await?;
            created += 1;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_continues_from_code() {
        assert_eq!(backfill_serial("BED-A", 4), "BED-A-004");
        assert_eq!(backfill_serial("", 12), "SN-012");
        assert_eq!(backfill_serial("X", 1000), "X-1000");
        assert_eq!(backfill_serial("SN-20240309-", 2), "SN-20240309-002");
    }

    #[test]
    fn outcome_sums_pools() {
        let outcome = BackfillOutcome {
            pools: vec![(1, 2), (7, 3)],
        };
        assert_eq!(outcome.created(), 5);
    }
}
