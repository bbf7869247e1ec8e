use futures::future::join_all;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::{
    cache::HolderHoldingsCache,
    collaborators::{HolderId, PermissionGate},
    commands::{
        assets::{display_holder, AssetCommand},
        CommandContext,
    },
    config::AppConfig,
    errors::ServiceError,
    metrics,
    queries::{
        AuditReport, BedSlot, BedSlotsQuery, HolderHoldingsQuery, Holding, InstanceInventory,
        InstanceInventoryQuery, LedgerAuditQuery, ListPoolsQuery, PoolDetail, PoolDetailQuery,
        PoolPage, Query, RepairCounts, UnderRepairCountQuery,
    },
};

/// Entry point for the presentation layer: gates, runs and reads
#[derive(Clone)]
pub struct AssetService {
    ctx: CommandContext,
    permissions: Arc<dyn PermissionGate>,
    holdings: Arc<HolderHoldingsCache>,
    history_page_size: u64,
}

impl AssetService {
    pub fn new(
        ctx: CommandContext,
        permissions: Arc<dyn PermissionGate>,
        holdings: Arc<HolderHoldingsCache>,
        history_page_size: u64,
    ) -> Self {
        Self {
            ctx,
            permissions,
            holdings,
            history_page_size,
        }
    }

    pub fn from_config(
        ctx: CommandContext,
        permissions: Arc<dyn PermissionGate>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            ctx,
            permissions,
            Arc::new(HolderHoldingsCache::new(config.holdings_cache_ttl())),
            config.history_page_size,
        )
    }

    pub fn context(&self) -> &CommandContext {
        &self.ctx
    }

    pub fn holdings_cache(&self) -> &HolderHoldingsCache {
        &self.holdings
    }

    /// Checks the operator's permission, executes the command and drops
    /// cached holdings of every holder whose custody it changed.
    #[instrument(skip(self, command), fields(operation = %command.operation(), operator_id = command.operator_id()))]
    pub async fn run<C: AssetCommand>(&self, command: C) -> Result<C::Result, ServiceError> {
        let operation = command.operation();
        let permission = operation.permission();
        if !self
            .permissions
            .is_allowed(command.operator_id(), permission)
            .await
        {
            let err = ServiceError::Forbidden(format!(
                "operator {} lacks {}",
                command.operator_id(),
                permission
            ));
            warn!(%operation, "Asset operation denied");
            metrics::record_failure(operation.as_str(), &err);
            return Err(err);
        }

        let result = command.execute(&self.ctx).await?;
        self.holdings
            .invalidate_many(&command.touched_holders(&result));
        Ok(result)
    }

    /// Pool detail with holder names filled in for the open custody records
    pub async fn pool_detail(
        &self,
        pool_id: i64,
        history_page: u64,
    ) -> Result<PoolDetail, ServiceError> {
        let mut detail = PoolDetailQuery {
            pool_id,
            history_page,
            history_page_size: Some(self.history_page_size),
        }
        .execute(self.ctx.db())
        .await?;

        let holders = join_all(
            detail
                .allocations
                .iter()
                .map(|view| display_holder(&self.ctx, view.allocation.holder_id)),
        )
        .await;
        for (view, holder) in detail.allocations.iter_mut().zip(holders) {
            view.holder_name = Some(holder.display_name);
        }
        Ok(detail)
    }

    pub async fn list_pools(&self, query: ListPoolsQuery) -> Result<PoolPage, ServiceError> {
        query.execute(self.ctx.db()).await
    }

    /// What a holder has right now, through the holdings cache
    pub async fn holdings(&self, holder_id: HolderId) -> Result<Vec<Holding>, ServiceError> {
        let db = self.ctx.db();
        self.holdings
            .get_or_load(holder_id, || async move {
                HolderHoldingsQuery { holder_id }.execute(db).await
            })
            .await
    }

    pub async fn instance_inventory(
        &self,
        query: InstanceInventoryQuery,
    ) -> Result<InstanceInventory, ServiceError> {
        query.execute(self.ctx.db()).await
    }

    pub async fn under_repair_count(&self) -> Result<RepairCounts, ServiceError> {
        UnderRepairCountQuery.execute(self.ctx.db()).await
    }

    pub async fn bed_slots(&self, room_id: i64) -> Result<Vec<BedSlot>, ServiceError> {
        BedSlotsQuery { room_id }.execute(self.ctx.db()).await
    }

    pub async fn audit(&self) -> Result<AuditReport, ServiceError> {
        LedgerAuditQuery.execute(self.ctx.db()).await
    }
}
