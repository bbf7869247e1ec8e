mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use asset_ledger::{
    collaborators::{CollaboratorError, FundsLedger, OperatorId},
    commands::assets::{
        BulkIssueCommand, BulkIssueLine, CreateAssetCommand, DeleteAssetCommand, PhotoUpload,
        ReturnAssetCommand, ScrapAssetCommand, SupplementAssetCommand,
        UpdateAssetDetailsCommand,
    },
    entities::{AssetType, Ownership, PoolStatus},
    errors::ServiceError,
    queries::ListPoolsQuery,
    repositories::{AssetInstanceRepository, HistoryRepository},
};
use common::{TestLedger, ALICE, BOB, CAROL, GHOST, OPERATOR, OUTSIDER};
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mock! {
    pub Funds {}

    #[async_trait]
    impl FundsLedger for Funds {
        async fn record_expense(
            &self,
            amount: Decimal,
            description: &str,
            operator: Option<OperatorId>,
        ) -> Result<(), CollaboratorError>;
    }
}

fn funded_intake(name: &str, quantity: i32, unit_price: Decimal) -> CreateAssetCommand {
    CreateAssetCommand {
        unit_price: Some(unit_price),
        sync_funds: true,
        ..TestLedger::intake(name, AssetType::Apparel, quantity)
    }
}

#[tokio::test]
async fn operators_without_grants_are_refused() {
    let ledger = TestLedger::new().await;
    let pool = ledger.create_pool("Helmet", AssetType::Equipment, 4).await;

    let err = ledger
        .service
        .run(ScrapAssetCommand {
            pool_id: pool.id,
            quantity: 1,
            reason: None,
            operator_id: OUTSIDER,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(msg) if msg.contains("asset.scrap"));
    assert_eq!(ledger.pool(pool.id).await.total_quantity, 4);

    // a single grant opens only its own operation
    ledger.permissions.grant(OUTSIDER, "asset.scrap");
    ledger
        .service
        .run(ScrapAssetCommand {
            pool_id: pool.id,
            quantity: 1,
            reason: None,
            operator_id: OUTSIDER,
        })
        .await
        .unwrap();
    let err = ledger
        .service
        .run(ReturnAssetCommand {
            pool_id: pool.id,
            holder_id: ALICE,
            quantity: 1,
            note: None,
            operator_id: OUTSIDER,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn holdings_are_cached_until_custody_changes() {
    let ledger = TestLedger::new().await;
    let vests = ledger.create_pool("Vest", AssetType::Apparel, 10).await;
    let radios = ledger.create_pool("Radio", AssetType::Equipment, 5).await;
    ledger.issue(vests.id, ALICE, 2).await;

    let first = ledger.service.holdings(ALICE).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].quantity, 2);
    assert_eq!(ledger.service.holdings_cache().len(), 1);

    ledger.issue(vests.id, ALICE, 1).await;
    ledger.issue(radios.id, ALICE, 1).await;
    let second = ledger.service.holdings(ALICE).await.unwrap();
    let summary: Vec<(i64, i32)> = second.iter().map(|h| (h.pool_id, h.quantity)).collect();
    assert_eq!(summary, vec![(vests.id, 3), (radios.id, 1)]);

    ledger
        .service
        .run(ReturnAssetCommand {
            pool_id: vests.id,
            holder_id: ALICE,
            quantity: 3,
            note: None,
            operator_id: OPERATOR,
        })
        .await
        .unwrap();
    let third = ledger.service.holdings(ALICE).await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].pool_id, radios.id);

    assert!(ledger.service.holdings(CAROL).await.unwrap().is_empty());
}

#[tokio::test]
async fn pool_detail_names_holders_and_pages_history() {
    let ledger = TestLedger::new().await;
    let pool = ledger.create_pool("Baton", AssetType::Equipment, 30).await;
    ledger.issue(pool.id, ALICE, 1).await;
    ledger.issue(pool.id, BOB, 1).await;
    ledger.holders.insert(GHOST, "Former Guard");
    ledger.issue(pool.id, GHOST, 1).await;
    for _ in 0..9 {
        ledger.issue(pool.id, CAROL, 1).await;
    }

    let detail = ledger.service.pool_detail(pool.id, 0).await.unwrap();
    let names: Vec<Option<&str>> = detail
        .allocations
        .iter()
        .take(3)
        .map(|a| a.holder_name.as_deref())
        .collect();
    assert_eq!(
        names,
        vec![Some("Alice Zhang"), Some("Bob Wang"), Some("Former Guard")]
    );
    assert_eq!(detail.allocations.len(), 12);

    // intake plus twelve issues
    assert_eq!(detail.history.total, 13);
    assert_eq!(detail.history.entries.len(), 10);
    assert_eq!(detail.history.page_count(), 2);

    let last_page = ledger.service.pool_detail(pool.id, 1).await.unwrap();
    assert_eq!(last_page.history.entries.len(), 3);

    let missing = ledger.service.pool_detail(pool.id + 100, 0).await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn list_filters_combine() {
    let ledger = TestLedger::new().await;
    let vest = ledger.create_pool("Reflective Vest", AssetType::Apparel, 5).await;
    let boots = ledger.create_pool("Boots", AssetType::Apparel, 5).await;
    let torch = ledger.create_pool("Torch", AssetType::Tool, 2).await;
    ledger.issue(boots.id, BOB, 1).await;
    ledger
        .service
        .run(ScrapAssetCommand {
            pool_id: torch.id,
            quantity: 2,
            reason: None,
            operator_id: OPERATOR,
        })
        .await
        .unwrap();

    let apparel = ledger
        .service
        .list_pools(ListPoolsQuery {
            asset_type: Some(AssetType::Apparel),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(apparel.total, 2);

    let search = ledger
        .service
        .list_pools(ListPoolsQuery {
            search: Some("vest".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(search.pools.len(), 1);
    assert_eq!(search.pools[0].id, vest.id);

    let bobs = ledger
        .service
        .list_pools(ListPoolsQuery {
            holder_id: Some(BOB),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(bobs.pools.iter().map(|p| p.id).collect::<Vec<_>>(), vec![boots.id]);

    let scrapped = ledger
        .service
        .list_pools(ListPoolsQuery {
            status: Some(PoolStatus::Scrapped),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(scrapped.pools[0].id, torch.id);

    let paged = ledger
        .service
        .list_pools(ListPoolsQuery {
            page_size: Some(2),
            page: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.total, 3);
    assert_eq!(paged.pools.len(), 1);
}

#[tokio::test]
async fn bulk_issue_reports_what_it_left_out() {
    let ledger = TestLedger::new().await;
    let shirts = ledger.create_pool("Shirt", AssetType::Apparel, 5).await;
    let caps = ledger.create_pool("Cap", AssetType::Apparel, 1).await;
    let lamp = ledger.create_pool("Lamp", AssetType::Equipment, 1).await;
    ledger
        .service
        .run(ScrapAssetCommand {
            pool_id: lamp.id,
            quantity: 1,
            reason: None,
            operator_id: OPERATOR,
        })
        .await
        .unwrap();

    let outcome = ledger
        .service
        .run(BulkIssueCommand {
            holder_id: CAROL,
            lines: vec![
                BulkIssueLine { pool_id: shirts.id, quantity: 2 },
                BulkIssueLine { pool_id: caps.id, quantity: 3 },
                BulkIssueLine { pool_id: lamp.id, quantity: 1 },
                BulkIssueLine { pool_id: 9_999, quantity: 1 },
                BulkIssueLine { pool_id: caps.id, quantity: 0 },
            ],
            note: Some("onboarding".to_string()),
            operator_id: OPERATOR,
        })
        .await
        .unwrap();

    assert_eq!(outcome.issued.len(), 1);
    assert_eq!(outcome.issued_quantity(), 2);
    let reasons: Vec<(i64, &str)> = outcome
        .skipped
        .iter()
        .map(|s| (s.line.pool_id, s.reason.as_str()))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (caps.id, "stock insufficient: 1 available"),
            (lamp.id, "asset LAMP-CODE cannot be issued"),
            (9_999, "asset not found"),
        ]
    );
    assert_eq!(ledger.pool(caps.id).await.stock_quantity, 1);
    ledger.assert_consistent().await;

    let nothing = ledger
        .service
        .run(BulkIssueCommand {
            holder_id: CAROL,
            lines: vec![BulkIssueLine { pool_id: shirts.id, quantity: 0 }],
            note: None,
            operator_id: OPERATOR,
        })
        .await;
    assert_matches!(nothing, Err(ServiceError::InvalidQuantity(_)));
}

#[tokio::test]
async fn purchases_for_synced_ownership_reach_the_funds_ledger() {
    let ledger = TestLedger::new().await;
    let created = ledger
        .service
        .run(funded_intake("Raincoat", 4, dec!(30)))
        .await
        .unwrap();
    assert_eq!(created.charged, Some(dec!(120)));

    let restock = ledger
        .service
        .run(SupplementAssetCommand {
            pool_id: created.pool.id,
            quantity: 2,
            unit_price: Some(dec!(35)),
            sync_funds: true,
            note: None,
            operator_id: OPERATOR,
        })
        .await
        .unwrap();
    assert_eq!(restock.charged, Some(dec!(70)));
    assert_eq!(restock.pool.total_quantity, 6);

    let company = ledger
        .service
        .run(CreateAssetCommand {
            code: Some("COMPANY-COAT".to_string()),
            ownership: Ownership::Company,
            ..funded_intake("Company Coat", 2, dec!(50))
        })
        .await
        .unwrap();
    assert_eq!(company.charged, None);

    let expenses = ledger.funds.expenses();
    assert_eq!(expenses.len(), 2);
    assert_eq!(ledger.funds.total_spent(), dec!(190));
    assert!(expenses[0].description.contains("Raincoat x4"));
    assert_eq!(expenses[1].operator, Some(OPERATOR));
}

#[tokio::test]
async fn funds_failure_does_not_undo_the_intake() {
    let mut funds = MockFunds::new();
    funds
        .expect_record_expense()
        .times(1)
        .returning(|_, _, _| Err(CollaboratorError::Unavailable("ledger offline".into())));
    let ledger = TestLedger::with_funds_ledger(Arc::new(funds)).await;

    let created = ledger
        .service
        .run(funded_intake("Gloves", 10, dec!(8)))
        .await
        .unwrap();
    assert_eq!(created.charged, None);
    assert_eq!(ledger.pool(created.pool.id).await.total_quantity, 10);
}

#[tokio::test]
async fn delete_removes_every_trace_of_the_pool() {
    let ledger = TestLedger::new().await;
    let created = ledger
        .service
        .run(CreateAssetCommand {
            serial_prefix: Some("SAFE-".to_string()),
            photo: Some(PhotoUpload {
                bytes: vec![0xFF, 0xD8, 0xFF],
                extension: Some("jpg".to_string()),
            }),
            ..TestLedger::intake("Safe", AssetType::FixedAsset, 2)
        })
        .await
        .unwrap();
    let pool_id = created.pool.id;
    let photo = created.pool.photo_path.clone().unwrap();
    assert!(std::path::Path::new(&photo).exists());
    ledger.issue(pool_id, ALICE, 1).await;
    ledger.issue(pool_id, BOB, 1).await;
    ledger.service.holdings(ALICE).await.unwrap();

    let deleted = ledger
        .service
        .run(DeleteAssetCommand {
            pool_id,
            operator_id: OPERATOR,
        })
        .await
        .unwrap();
    assert_eq!(deleted.released_holders, vec![ALICE, BOB]);
    assert_eq!(deleted.code, "SAFE-CODE");

    assert!(!std::path::Path::new(&photo).exists());
    assert!(ledger.open_records(pool_id, ALICE).await.is_empty());
    assert!(HistoryRepository::new(ledger.ctx.db())
        .all_for_pool(pool_id)
        .await
        .unwrap()
        .is_empty());
    assert!(AssetInstanceRepository::new(ledger.ctx.db())
        .list_for_pool(pool_id)
        .await
        .unwrap()
        .is_empty());
    assert!(ledger.service.holdings(ALICE).await.unwrap().is_empty());

    let again = ledger
        .service
        .run(DeleteAssetCommand {
            pool_id,
            operator_id: OPERATOR,
        })
        .await;
    assert_matches!(again, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn details_update_detects_stale_forms() {
    let ledger = TestLedger::new().await;
    let pool = ledger.create_pool("Helmet", AssetType::Equipment, 3).await;

    let updated = ledger
        .service
        .run(UpdateAssetDetailsCommand {
            pool_id: pool.id,
            expected_version: Some(pool.version),
            name: Some("Riot Helmet".to_string()),
            location: Some(String::new()),
            operator_id: OPERATOR,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.name, "Riot Helmet");
    assert_eq!(updated.location, None);
    assert_eq!(updated.version, pool.version + 1);
    assert_eq!(updated.total_quantity, 3);

    let stale = ledger
        .service
        .run(UpdateAssetDetailsCommand {
            pool_id: pool.id,
            expected_version: Some(pool.version),
            name: Some("Helmet Mk2".to_string()),
            operator_id: OPERATOR,
            ..Default::default()
        })
        .await;
    assert_matches!(stale, Err(ServiceError::ConcurrentModification(id)) if id == pool.id);

    // nothing differs, so nothing is written
    let unchanged = ledger
        .service
        .run(UpdateAssetDetailsCommand {
            pool_id: pool.id,
            name: Some("Riot Helmet".to_string()),
            operator_id: OPERATOR,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(unchanged.version, updated.version);
}

#[tokio::test]
async fn fixed_assets_with_instances_keep_their_type() {
    let ledger = TestLedger::new().await;
    let created = ledger
        .service
        .run(TestLedger::intake("Bunk", AssetType::FixedAsset, 1))
        .await
        .unwrap();

    let err = ledger
        .service
        .run(UpdateAssetDetailsCommand {
            pool_id: created.pool.id,
            asset_type: Some(AssetType::Equipment),
            operator_id: OPERATOR,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperationForType { .. });
}

#[tokio::test]
async fn holders_hear_about_custody_changes() {
    let ledger = TestLedger::new().await;
    let pool = ledger.create_pool("Radio", AssetType::Equipment, 3).await;
    ledger.issue(pool.id, BOB, 2).await;
    ledger
        .service
        .run(ReturnAssetCommand {
            pool_id: pool.id,
            holder_id: BOB,
            quantity: 1,
            note: None,
            operator_id: OPERATOR,
        })
        .await
        .unwrap();

    let sent = ledger.notifications_after(2).await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.recipients == vec![BOB]));
    assert_eq!(sent[0].body, "Radio x2 issued to Bob Wang");
    assert_eq!(sent[1].title, "Equipment returned");
}
