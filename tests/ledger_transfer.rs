//! Ledger transfers driven through the worker pool on the in-memory store

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use ledger_workload::engine::{BackoffPolicy, Bound, CallMetrics, Completion, WorkerPool};
use ledger_workload::ledger::{
    Account, AccountStore, InMemoryAccountStore, LedgerTransferOperation, Money, TransferLeg,
    TransferRequest,
};
use ledger_workload::workload::{TransferOptions, start_transfer_workload};

fn usd(amount: &str) -> Money {
    Money::parse(amount, "USD").unwrap()
}

fn pool() -> WorkerPool {
    WorkerPool::new(8, Arc::new(CallMetrics::default())).with_backoff(BackoffPolicy {
        max_jitter: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
    })
}

fn two_accounts(store: &InMemoryAccountStore, a: &str, b: &str) -> (Account, Account) {
    let a = Account::open("us-east-1", "alice", usd(a));
    let b = Account::open("us-east-1", "bob", usd(b));
    store.insert_account(a.clone());
    store.insert_account(b.clone());
    (a, b)
}

fn transfer(from: &Account, to: &Account, amount: &str) -> TransferRequest {
    TransferRequest::today(
        "us-east-1",
        "TEST",
        vec![
            TransferLeg::new(from.id, "us-east-1", usd(amount).negate(), "debit"),
            TransferLeg::new(to.id, "us-east-1", usd(amount), "credit"),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn replayed_request_commits_exactly_once_after_conflict() {
    let store = InMemoryAccountStore::with_regions(["us-east-1"]);
    let (a, b) = two_accounts(&store, "100.00", "0.00");
    let op = LedgerTransferOperation::new(Arc::new(store.clone()));
    let request = transfer(&a, &b, "10.00");
    let request_id = request.id();

    store.inject_conflicts(1);
    let pool = pool();
    let mut handle = pool.submit("replay", op.replay(request), Bound::Iterations(1));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.completion, Completion::IterationsExhausted);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.transient_errors, 1);

    assert_eq!(store.transaction_count(), 1);
    assert!(store.find_transaction(request_id).await.unwrap().is_some());
    assert_eq!(store.get_balance(a.id).await.unwrap(), usd("90.00"));
    assert_eq!(store.get_balance(b.id).await.unwrap(), usd("10.00"));
}

#[tokio::test]
async fn negative_balance_stops_the_task_and_changes_nothing() {
    let store = InMemoryAccountStore::with_regions(["us-east-1"]);
    let (a, b) = two_accounts(&store, "5.00", "0.00");
    let op = LedgerTransferOperation::new(Arc::new(store.clone()));

    let pool = pool();
    let mut handle = pool.submit(
        "overdraft",
        op.replay(transfer(&a, &b, "10.00")),
        Bound::Iterations(1),
    );

    let report = handle.wait().await.unwrap();
    match &report.completion {
        Completion::FatalError(msg) => assert!(msg.contains("Negative balance"), "{msg}"),
        other => panic!("unexpected completion: {other}"),
    }
    assert_eq!(report.attempts, 1);
    assert_eq!(store.get_balance(a.id).await.unwrap(), usd("5.00"));
    assert_eq!(store.transaction_count(), 0);
}

#[tokio::test]
async fn concurrent_transfer_workload_preserves_totals() {
    let store = InMemoryAccountStore::with_regions(["us-east-1", "eu-west-1"]);
    store
        .create_accounts("us-east-1", &usd("1000.00"), 12, 5)
        .await
        .unwrap();
    store
        .create_accounts("eu-west-1", &usd("1000.00"), 12, 5)
        .await
        .unwrap();
    let store: Arc<dyn AccountStore> = Arc::new(store);

    let pool = pool();
    let options = TransferOptions {
        threads: 3,
        legs: 4,
        duration: Duration::from_millis(300),
        ..Default::default()
    };
    let handles = start_transfer_workload(&pool, store.clone(), &options)
        .await
        .unwrap();
    assert_eq!(handles.len(), 6);

    let reports = pool.join_all().await;
    assert_eq!(reports.len(), 6);
    for report in &reports {
        assert_eq!(report.completion, Completion::DeadlineReached, "{}", report.id);
    }
    assert!(reports.iter().map(|r| r.iterations).sum::<u64>() > 0);

    let total = store.get_total_balance("USD").await.unwrap();
    assert_eq!(total.amount, Decimal::new(2_400_000, 2));

    for region in ["us-east-1", "eu-west-1"] {
        for account in store.find_accounts_by_region(region, 0, 100).await.unwrap() {
            assert!(!account.balance.is_negative());
        }
    }

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.rows.len(), 6);
    assert_eq!(snapshot.total.errors, snapshot.total.transient_errors);
}
