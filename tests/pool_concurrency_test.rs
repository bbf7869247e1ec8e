mod common;

use assert_matches::assert_matches;
use asset_ledger::{
    commands::assets::IssueAssetCommand,
    entities::{AssetType, PoolStatus},
    errors::ServiceError,
    repositories::AssetPoolRepository,
};
use common::{TestLedger, ALICE, BOB, OPERATOR};
use futures::future::join_all;

#[tokio::test]
async fn write_from_a_stale_read_loses_the_version_race() {
    let ledger = TestLedger::new().await;
    let pool = ledger.create_pool("Flashlight", AssetType::Equipment, 10).await;
    let repo = AssetPoolRepository::new(ledger.ctx.db());

    // two writers read the same version
    let first = ledger.pool(pool.id).await;
    let second = ledger.pool(pool.id).await;
    assert_eq!(first.version, second.version);

    let won = repo.adjust_quantities(&first, 0, -2, 2, false).await.unwrap();
    assert_eq!(won.version, first.version + 1);

    let lost = repo.adjust_quantities(&second, -1, -1, 0, true).await;
    assert_matches!(lost, Err(ServiceError::ConcurrentModification(id)) if id == pool.id);

    let lost = repo.set_status(&second, PoolStatus::UnderRepair).await;
    assert_matches!(lost, Err(ServiceError::ConcurrentModification(_)));

    // only the winning write is visible
    let now = ledger.pool(pool.id).await;
    assert_eq!(
        (now.total_quantity, now.stock_quantity, now.allocated_quantity),
        (10, 8, 2)
    );
    assert_eq!(now.version, won.version);
    assert_eq!(now.status, PoolStatus::InUse);

    // a re-read picks up the new version and goes through
    let retried = repo.adjust_quantities(&now, -1, -1, 0, true).await.unwrap();
    assert_eq!(retried.total_quantity, 9);
}

#[tokio::test]
async fn concurrent_issues_never_overdraw_stock() {
    let ledger = TestLedger::new().await;
    let pool = ledger.create_pool("Whistle", AssetType::Equipment, 10).await;

    let attempts = (0..20).map(|i| {
        ledger.service.run(IssueAssetCommand {
            pool_id: pool.id,
            holder_id: if i % 2 == 0 { ALICE } else { BOB },
            quantity: 1,
            note: None,
            operator_id: OPERATOR,
        })
    });
    let results = join_all(attempts).await;

    let issued = results.iter().filter(|r| r.is_ok()).count() as i32;
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(
            err,
            ServiceError::InsufficientInventory { .. } | ServiceError::ConcurrentModification(_)
        );
    }
    assert!(issued <= 10, "issued {} units out of 10", issued);

    let p = ledger.pool(pool.id).await;
    assert_eq!(p.allocated_quantity, issued);
    assert_eq!(p.stock_quantity, 10 - issued);
    let mut held = 0;
    for holder in [ALICE, BOB] {
        held += ledger
            .open_records(pool.id, holder)
            .await
            .iter()
            .map(|r| r.quantity)
            .sum::<i32>();
    }
    assert_eq!(held, issued);
    ledger.assert_consistent().await;
}
