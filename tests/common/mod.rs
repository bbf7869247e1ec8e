#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use asset_ledger::{
    cache::HolderHoldingsCache,
    collaborators::{
        FundsLedger, HolderId, InMemoryFundsLedger, InMemoryHolderDirectory,
        InMemoryNotificationSink, LocalBlobStore, OperatorId, SentNotification,
        StaticPermissionGate,
    },
    commands::{
        assets::{CreateAssetCommand, IssueAssetCommand},
        CommandContext,
    },
    config::AppConfig,
    db,
    entities::{
        asset_allocation, asset_instance, asset_pool, AllocationMode, AssetType, Ownership,
    },
    events::{self, EventSender},
    queries::{LedgerAuditQuery, Query},
    repositories::{AllocationRepository, AssetInstanceRepository, AssetPoolRepository},
    services::AssetService,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const OPERATOR: OperatorId = 1;
/// Operator with no grants at all
pub const OUTSIDER: OperatorId = 2;

pub const ALICE: HolderId = 101;
pub const BOB: HolderId = 102;
pub const CAROL: HolderId = 103;
/// Never registered in the holder directory
pub const GHOST: HolderId = 999;

/// Ledger on a private in-memory sqlite database with in-process collaborators
pub struct TestLedger {
    pub ctx: CommandContext,
    pub service: AssetService,
    pub holders: Arc<InMemoryHolderDirectory>,
    pub funds: Arc<InMemoryFundsLedger>,
    pub notifications: Arc<InMemoryNotificationSink>,
    pub permissions: Arc<StaticPermissionGate>,
    pub blob_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_funds(Arc::new(InMemoryFundsLedger::new())).await
    }

    /// Same harness, but purchases go to `funds` instead of the in-memory ledger
    pub async fn with_funds_ledger(funds: Arc<dyn FundsLedger>) -> Self {
        let mut ledger = Self::new().await;
        ledger.ctx.funds = funds;
        ledger.service = AssetService::new(
            ledger.ctx.clone(),
            ledger.permissions.clone(),
            Arc::new(HolderHoldingsCache::new(Duration::from_secs(300))),
            10,
        );
        ledger
    }

    async fn with_funds(funds: Arc<InMemoryFundsLedger>) -> Self {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let holders = Arc::new(InMemoryHolderDirectory::with_holders([
            (ALICE, "Alice Zhang"),
            (BOB, "Bob Wang"),
            (CAROL, "Carol Liu"),
        ]));
        let notifications = Arc::new(InMemoryNotificationSink::new());
        let permissions = Arc::new(StaticPermissionGate::new());
        permissions.grant(OPERATOR, "asset.*");
        let blob_dir = tempfile::tempdir().expect("temp dir");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx, notifications.clone()));

        let ctx = CommandContext {
            db: Arc::new(pool),
            event_sender: Arc::new(EventSender::new(event_tx)),
            holders: holders.clone(),
            funds: funds.clone(),
            blobs: Arc::new(LocalBlobStore::new(blob_dir.path())),
            funds_sync_ownership: cfg.funds_sync_ownership(),
        };
        let service = AssetService::from_config(ctx.clone(), permissions.clone(), &cfg);

        Self {
            ctx,
            service,
            holders,
            funds,
            notifications,
            permissions,
            blob_dir,
            _event_task: event_task,
        }
    }

    pub fn intake(name: &str, asset_type: AssetType, quantity: i32) -> CreateAssetCommand {
        CreateAssetCommand {
            code: Some(format!("{}-CODE", name.to_uppercase().replace(' ', "-"))),
            name: name.to_string(),
            asset_type,
            quantity,
            unit_price: None,
            amount: None,
            ownership: Ownership::GuardUnit,
            allocation_mode: AllocationMode::Personal,
            bed_capacity: 0,
            location: Some("Warehouse".to_string()),
            notes: None,
            photo: None,
            serial_prefix: None,
            serial_suffixes: None,
            sync_funds: false,
            operator_id: OPERATOR,
        }
    }

    /// Creates a pool with `quantity` units in stock
    pub async fn create_pool(
        &self,
        name: &str,
        asset_type: AssetType,
        quantity: i32,
    ) -> asset_pool::Model {
        self.service
            .run(Self::intake(name, asset_type, quantity))
            .await
            .expect("create pool")
            .pool
    }

    pub async fn issue(&self, pool_id: i64, holder_id: HolderId, quantity: i32) {
        self.service
            .run(IssueAssetCommand {
                pool_id,
                holder_id,
                quantity,
                note: None,
                operator_id: OPERATOR,
            })
            .await
            .expect("issue");
    }

    pub async fn pool(&self, pool_id: i64) -> asset_pool::Model {
        AssetPoolRepository::new(self.ctx.db())
            .get(pool_id)
            .await
            .expect("pool exists")
    }

    pub async fn open_records(
        &self,
        pool_id: i64,
        holder_id: HolderId,
    ) -> Vec<asset_allocation::Model> {
        AllocationRepository::new(self.ctx.db())
            .open_for(pool_id, holder_id)
            .await
            .expect("open records")
    }

    /// Serialized units of a pool, lowest id first
    pub async fn instances(&self, pool_id: i64) -> Vec<asset_instance::Model> {
        AssetInstanceRepository::new(self.ctx.db())
            .list_for_pool(pool_id)
            .await
            .expect("instances")
    }

    /// Both ledger invariants hold for every pool
    pub async fn assert_consistent(&self) {
        let report = LedgerAuditQuery
            .execute(self.ctx.db())
            .await
            .expect("audit");
        assert!(report.is_clean(), "ledger violations: {:?}", report.violations);
    }

    /// Waits for the event loop to deliver at least `count` notifications
    pub async fn notifications_after(&self, count: usize) -> Vec<SentNotification> {
        for _ in 0..50 {
            let sent = self.notifications.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notifications.sent()
    }
}
