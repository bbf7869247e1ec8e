//! Property-based tests for the ledger invariants.
//!
//! Random operation sequences run against a real sqlite ledger and a plain
//! in-test model; after every step the counters, custody records and audit
//! must agree with the model.

mod common;

use std::collections::BTreeMap;

use asset_ledger::{
    commands::assets::{
        ConsumeAssetCommand, ExchangeAssetCommand, IssueAssetCommand, ReturnAssetCommand,
        ScrapAssetCommand, SupplementAssetCommand,
    },
    entities::{asset_allocation, AssetType, PoolStatus},
    repositories::{plan_fifo_return, PoolCounters, ReturnStep},
};
use chrono::{Duration, TimeZone, Utc};
use common::{TestLedger, ALICE, BOB, OPERATOR};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Issue(usize, i32),
    Return(usize, i32),
    Exchange(usize, i32),
    Scrap(i32),
    Consume(i32),
    Supplement(i32),
}

const HOLDERS: [i64; 2] = [ALICE, BOB];

fn op_strategy() -> impl Strategy<Value = Op> {
    let holder = 0usize..HOLDERS.len();
    let qty = 1i32..5;
    prop_oneof![
        3 => (holder.clone(), qty.clone()).prop_map(|(h, q)| Op::Issue(h, q)),
        3 => (holder.clone(), qty.clone()).prop_map(|(h, q)| Op::Return(h, q)),
        1 => (holder, qty.clone()).prop_map(|(h, q)| Op::Exchange(h, q)),
        1 => qty.clone().prop_map(Op::Scrap),
        1 => qty.clone().prop_map(Op::Consume),
        1 => qty.prop_map(Op::Supplement),
    ]
}

/// What the ledger should look like, kept by hand
#[derive(Debug, Clone)]
struct Model {
    total: i32,
    stock: i32,
    allocated: i32,
    held: BTreeMap<i64, i32>,
    scrapped: bool,
}

impl Model {
    fn new(quantity: i32) -> Self {
        Self {
            total: quantity,
            stock: quantity,
            allocated: 0,
            held: HOLDERS.iter().map(|h| (*h, 0)).collect(),
            scrapped: false,
        }
    }

    /// Applies `op` if the ledger should accept it; returns whether it did
    fn apply(&mut self, op: Op) -> bool {
        match op {
            Op::Issue(h, q) => {
                if self.scrapped || q > self.stock {
                    return false;
                }
                self.stock -= q;
                self.allocated += q;
                *self.held.entry(HOLDERS[h]).or_default() += q;
            }
            Op::Return(h, q) => {
                let held = self.held[&HOLDERS[h]];
                if self.scrapped || q > held {
                    return false;
                }
                self.stock += q;
                self.allocated -= q;
                *self.held.entry(HOLDERS[h]).or_default() -= q;
            }
            Op::Exchange(h, q) => {
                let held = self.held[&HOLDERS[h]];
                if self.scrapped || q > held || q > self.stock {
                    return false;
                }
                self.total -= q;
                self.stock -= q;
                self.scrapped = self.total == 0;
            }
            Op::Scrap(q) => {
                if self.scrapped || q > self.stock {
                    return false;
                }
                self.total -= q;
                self.stock -= q;
                self.scrapped = self.total == 0;
            }
            Op::Consume(q) => {
                if self.scrapped || q > self.stock {
                    return false;
                }
                self.total -= q;
                self.stock -= q;
            }
            Op::Supplement(q) => {
                if self.scrapped {
                    return false;
                }
                self.total += q;
                self.stock += q;
            }
        }
        true
    }
}

async fn run_op(ledger: &TestLedger, pool_id: i64, op: Op) -> bool {
    let service = &ledger.service;
    let result = match op {
        Op::Issue(h, quantity) => service
            .run(IssueAssetCommand {
                pool_id,
                holder_id: HOLDERS[h],
                quantity,
                note: None,
                operator_id: OPERATOR,
            })
            .await
            .map(|_| ()),
        Op::Return(h, quantity) => service
            .run(ReturnAssetCommand {
                pool_id,
                holder_id: HOLDERS[h],
                quantity,
                note: None,
                operator_id: OPERATOR,
            })
            .await
            .map(|_| ()),
        Op::Exchange(h, quantity) => service
            .run(ExchangeAssetCommand {
                pool_id,
                holder_id: HOLDERS[h],
                quantity,
                reason: None,
                operator_id: OPERATOR,
            })
            .await
            .map(|_| ()),
        Op::Scrap(quantity) => service
            .run(ScrapAssetCommand {
                pool_id,
                quantity,
                reason: None,
                operator_id: OPERATOR,
            })
            .await
            .map(|_| ()),
        Op::Consume(quantity) => service
            .run(ConsumeAssetCommand {
                pool_id,
                holder_id: None,
                quantity,
                note: None,
                operator_id: OPERATOR,
            })
            .await
            .map(|_| ()),
        Op::Supplement(quantity) => service
            .run(SupplementAssetCommand {
                pool_id,
                quantity,
                unit_price: None,
                sync_funds: false,
                note: None,
                operator_id: OPERATOR,
            })
            .await
            .map(|_| ()),
    };
    result.is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn ledger_matches_model_after_every_step(
        initial in 1i32..10,
        ops in prop::collection::vec(op_strategy(), 1..25),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = TestLedger::new().await;
            let pool = ledger.create_pool("Battery", AssetType::Consumable, initial).await;
            let mut model = Model::new(initial);

            for op in ops {
                let expected = model.apply(op);
                let accepted = run_op(&ledger, pool.id, op).await;
                prop_assert_eq!(accepted, expected, "{:?} disagreed with {:?}", op, model);

                let p = ledger.pool(pool.id).await;
                prop_assert_eq!(
                    (p.total_quantity, p.stock_quantity, p.allocated_quantity),
                    (model.total, model.stock, model.allocated)
                );
                prop_assert_eq!(p.status == PoolStatus::Scrapped, model.scrapped);

                for holder in HOLDERS {
                    let held: i32 = ledger
                        .open_records(pool.id, holder)
                        .await
                        .iter()
                        .map(|r| r.quantity)
                        .sum();
                    prop_assert_eq!(held, model.held[&holder]);
                }
            }

            ledger.assert_consistent().await;
            Ok::<(), TestCaseError>(())
        })?;
    }
}

fn open_record(id: i64, quantity: i32, minutes: i64) -> asset_allocation::Model {
    let base = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
    asset_allocation::Model {
        id,
        pool_id: 1,
        holder_id: ALICE,
        quantity,
        issued_at: base + Duration::minutes(minutes),
        returned_at: None,
        note: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn fifo_plan_returns_exactly_what_was_asked(
        records in prop::collection::vec((1i32..10, 0i64..500), 1..8),
        take in 1i32..40,
    ) {
        let open: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(i, (q, m))| open_record(i as i64 + 1, *q, *m))
            .collect();
        let held: i32 = open.iter().map(|r| r.quantity).sum();

        match plan_fifo_return(&open, take) {
            Err(_) => prop_assert!(take > held),
            Ok(plan) => {
                prop_assert!(take <= held);
                let returned: i32 = plan
                    .steps
                    .iter()
                    .map(|s| match s {
                        ReturnStep::Close { quantity, .. } => *quantity,
                        ReturnStep::Split { returned, .. } => *returned,
                    })
                    .sum();
                prop_assert_eq!(returned, take);

                // only the last step may split, and it never empties a record
                for step in &plan.steps[..plan.steps.len() - 1] {
                    let is_close = matches!(step, ReturnStep::Close { .. });
                    prop_assert!(is_close);
                }
                if let Some(ReturnStep::Split { remaining, .. }) = plan.steps.last() {
                    prop_assert!(*remaining > 0);
                }

                // steps walk the records oldest first
                let mut ordered = open.clone();
                ordered.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
                let ids: Vec<i64> = plan
                    .steps
                    .iter()
                    .map(|s| match s {
                        ReturnStep::Close { allocation_id, .. }
                        | ReturnStep::Split { allocation_id, .. } => *allocation_id,
                    })
                    .collect();
                let expected: Vec<i64> =
                    ordered.iter().take(ids.len()).map(|r| r.id).collect();
                prop_assert_eq!(ids, expected);
            }
        }
    }

    #[test]
    fn counters_stay_balanced_or_refuse(
        stock in 0i32..50,
        allocated in 0i32..50,
        d_total in -60i32..60,
        d_allocated in -60i32..60,
    ) {
        let start = PoolCounters { total: stock + allocated, stock, allocated };
        let d_stock = d_total - d_allocated;
        match start.adjust(d_total, d_stock, d_allocated) {
            Ok(next) => {
                prop_assert!(next.is_balanced());
                prop_assert!(next.stock >= 0 && next.allocated >= 0);
            }
            Err(_) => prop_assert!(
                stock + d_stock < 0 || allocated + d_allocated < 0
            ),
        }
    }
}
