//! Ledger transfer operation
//!
//! One attempt at a balanced multi-leg transfer inside a single store
//! transaction:
//!
//! 1. reject requests with fewer than two legs
//! 2. coalesce legs into net deltas per account (zero sum per currency)
//! 3. lock the affected accounts, in account id order
//! 4. validate each account and apply its delta
//! 5. write balances and the transaction record, then commit
//!
//! The operation never retries. A serialization failure surfaces as a store
//! error and the engine's retry loop replays the same request.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::coalesce::coalesce;
use super::error::LedgerError;
use super::store::AccountStore;
use super::types::{Account, TransactionItem, TransactionRecord, TransferRequest};
use crate::engine::UnitOfWork;

#[derive(Clone)]
pub struct LedgerTransferOperation {
    store: Arc<dyn AccountStore>,
}

impl LedgerTransferOperation {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Execute the transfer once. On success the committed record is returned.
    pub async fn execute(&self, request: &TransferRequest) -> Result<TransactionRecord, LedgerError> {
        if request.legs().len() < 2 {
            return Err(LedgerError::BadRequest(
                "Must have at least two account legs".into(),
            ));
        }

        let legs = coalesce(request)?;
        let ids: Vec<Uuid> = legs.keys().copied().collect();

        // Uncommitted work is rolled back when `tx` is dropped on an early return
        let mut tx = self.store.begin().await?;
        let mut accounts: HashMap<Uuid, Account> = tx
            .lock_for_update(&ids)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut updated = Vec::with_capacity(legs.len());
        let mut items = Vec::with_capacity(legs.len());
        for (id, leg) in &legs {
            let mut account = accounts
                .remove(id)
                .ok_or(LedgerError::NoSuchAccount(*id))?;

            if account.closed {
                return Err(LedgerError::AccountClosed(*id));
            }
            if account.balance.currency != leg.amount.currency {
                return Err(LedgerError::CurrencyMismatch {
                    account: *id,
                    expected: account.balance.currency.clone(),
                    actual: leg.amount.currency.clone(),
                });
            }

            let before = account.balance.clone();
            let after = before.checked_add(&leg.amount).ok_or_else(|| {
                LedgerError::BadRequest(format!("balance overflow on account {}", id))
            })?;
            if after.is_negative() && !account.allow_negative {
                return Err(LedgerError::NegativeBalance {
                    account: *id,
                    balance: after.to_string(),
                });
            }
            account.balance = after;

            items.push(TransactionItem {
                account_id: *id,
                region: request.region().to_string(),
                amount: leg.amount.clone(),
                running_balance_before: before,
                note: leg.note.clone(),
            });
            updated.push(account);
        }

        let record = TransactionRecord {
            id: request.id(),
            region: request.region().to_string(),
            transaction_type: request.transaction_type().to_string(),
            booking_date: request.booking_date(),
            transfer_date: request.transfer_date(),
            items,
        };

        tx.apply_balance_updates(&updated).await?;
        tx.append_transaction(&record).await?;
        tx.commit().await?;

        debug!(transfer_id = %record.id, legs = record.items.len(), "Transfer committed");
        Ok(record)
    }

    /// Bind a fixed request to this operation as a replayable unit of work
    pub fn replay(&self, request: TransferRequest) -> TransferUnit {
        TransferUnit {
            operation: self.clone(),
            request,
        }
    }
}

/// A fixed request executed verbatim on every invocation
pub struct TransferUnit {
    operation: LedgerTransferOperation,
    request: TransferRequest,
}

#[async_trait]
impl UnitOfWork for TransferUnit {
    async fn run(&self) -> anyhow::Result<()> {
        self.operation.execute(&self.request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryAccountStore;
    use crate::ledger::money::Money;
    use crate::ledger::types::TransferLeg;

    fn usd(s: &str) -> Money {
        Money::parse(s, "USD").unwrap()
    }

    fn setup(balances: &[(&str, &str)]) -> (InMemoryAccountStore, Vec<Uuid>) {
        let store = InMemoryAccountStore::with_regions(["us-east-1"]);
        let ids = balances
            .iter()
            .enumerate()
            .map(|(i, (amount, currency))| {
                let account = Account::open(
                    "us-east-1",
                    format!("user:{}", i + 1),
                    Money::parse(amount, *currency).unwrap(),
                );
                let id = account.id;
                store.insert_account(account);
                id
            })
            .collect();
        (store, ids)
    }

    fn request(legs: &[(Uuid, Money)]) -> TransferRequest {
        let legs = legs
            .iter()
            .map(|(id, amount)| TransferLeg::new(*id, "us-east-1", amount.clone(), "test"))
            .collect();
        TransferRequest::today("us-east-1", "GEN", legs).unwrap()
    }

    #[tokio::test]
    async fn test_transfer_moves_money_and_records_running_balance() {
        let (store, ids) = setup(&[("100.00", "USD"), ("20.00", "USD")]);
        let op = LedgerTransferOperation::new(Arc::new(store.clone()));

        let req = request(&[(ids[0], usd("-10.00")), (ids[1], usd("10.00"))]);
        let record = op.execute(&req).await.unwrap();

        assert_eq!(record.id, req.id());
        assert_eq!(store.get_balance(ids[0]).await.unwrap(), usd("90.00"));
        assert_eq!(store.get_balance(ids[1]).await.unwrap(), usd("30.00"));

        let item = record.items.iter().find(|i| i.account_id == ids[0]).unwrap();
        assert_eq!(item.running_balance_before, usd("100.00"));
        assert_eq!(item.amount, usd("-10.00"));
        assert_eq!(store.find_transaction(req.id()).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_negative_balance_leaves_state_untouched() {
        let (store, ids) = setup(&[("5.00", "USD"), ("0.00", "USD")]);
        let op = LedgerTransferOperation::new(Arc::new(store.clone()));

        let req = request(&[(ids[0], usd("-10.00")), (ids[1], usd("10.00"))]);
        let err = op.execute(&req).await.unwrap_err();

        assert_eq!(err.code(), "NEGATIVE_BALANCE");
        assert_eq!(store.get_balance(ids[0]).await.unwrap(), usd("5.00"));
        assert_eq!(store.get_balance(ids[1]).await.unwrap(), usd("0.00"));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_allow_negative_account_may_overdraw() {
        let (store, ids) = setup(&[("5.00", "USD"), ("0.00", "USD")]);
        let mut overdraft = store.account(ids[0]).unwrap();
        overdraft.allow_negative = true;
        store.insert_account(overdraft);

        let op = LedgerTransferOperation::new(Arc::new(store.clone()));
        let req = request(&[(ids[0], usd("-10.00")), (ids[1], usd("10.00"))]);
        op.execute(&req).await.unwrap();
        assert_eq!(store.get_balance(ids[0]).await.unwrap(), usd("-5.00"));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (store, ids) = setup(&[("5.00", "USD")]);
        let op = LedgerTransferOperation::new(Arc::new(store.clone()));

        let ghost = Uuid::new_v4();
        let req = request(&[(ids[0], usd("-1.00")), (ghost, usd("1.00"))]);
        match op.execute(&req).await.unwrap_err() {
            LedgerError::NoSuchAccount(id) => assert_eq!(id, ghost),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get_balance(ids[0]).await.unwrap(), usd("5.00"));
    }

    #[tokio::test]
    async fn test_closed_account() {
        let (store, ids) = setup(&[("5.00", "USD"), ("5.00", "USD")]);
        let mut closed = store.account(ids[1]).unwrap();
        closed.closed = true;
        store.insert_account(closed);

        let op = LedgerTransferOperation::new(Arc::new(store.clone()));
        let req = request(&[(ids[0], usd("-1.00")), (ids[1], usd("1.00"))]);
        assert_eq!(op.execute(&req).await.unwrap_err().code(), "ACCOUNT_CLOSED");
    }

    #[tokio::test]
    async fn test_leg_currency_must_match_account() {
        let (store, ids) = setup(&[("5.00", "USD"), ("5.00", "EUR")]);
        let op = LedgerTransferOperation::new(Arc::new(store.clone()));

        let req = request(&[(ids[0], usd("-1.00")), (ids[1], usd("1.00"))]);
        assert_eq!(
            op.execute(&req).await.unwrap_err().code(),
            "CURRENCY_MISMATCH"
        );
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_unbalanced_request_touches_nothing() {
        let (store, ids) = setup(&[("50.00", "USD"), ("50.00", "EUR")]);
        let op = LedgerTransferOperation::new(Arc::new(store.clone()));

        let req = request(&[
            (ids[0], usd("10.00")),
            (ids[1], Money::parse("-5.00", "EUR").unwrap()),
        ]);
        match op.execute(&req).await.unwrap_err() {
            LedgerError::Unbalanced { currency, .. } => assert_eq!(currency, "EUR"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get_balance(ids[0]).await.unwrap(), usd("50.00"));
    }

    #[tokio::test]
    async fn test_replayed_request_id_is_rejected_after_commit() {
        let (store, ids) = setup(&[("50.00", "USD"), ("0.00", "USD")]);
        let op = LedgerTransferOperation::new(Arc::new(store.clone()));
        let req = request(&[(ids[0], usd("-1.00")), (ids[1], usd("1.00"))]);

        op.execute(&req).await.unwrap();
        let err = op.execute(&req).await.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_TRANSACTION");
        assert!(matches!(err, LedgerError::DuplicateTransaction(id) if id == req.id()));
        assert_eq!(store.transaction_count(), 1);
        assert_eq!(store.get_balance(ids[0]).await.unwrap(), usd("49.00"));
    }
}
