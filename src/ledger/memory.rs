//! In-memory account store
//!
//! Used for `--dry-run` and tests. Transactions are optimistic: locked reads
//! remember each account's version and commit fails with SQLSTATE `40001`
//! if any of them changed meanwhile, the same signal a serializable SQL
//! store gives under contention.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::error::LedgerError;
use super::money::Money;
use super::store::{AccountStore, LedgerTx};
use super::types::{Account, AccountSummary, TransactionRecord};
use crate::engine::classifier::SERIALIZATION_FAILURE;

const UNIQUE_VIOLATION: &str = "23505";

// ============================================================
// SIMULATED STORE ERRORS
// ============================================================

/// Store error carrying a SQLSTATE, surfaced as `sqlx::Error::Database`
#[derive(Debug, Clone)]
pub struct SqlStateError {
    code: String,
    message: String,
}

impl SqlStateError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn serialization_failure() -> Self {
        Self::new(
            SERIALIZATION_FAILURE,
            "restart transaction: TransactionRetryWithProtoRefreshError",
        )
    }
}

impl fmt::Display for SqlStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)
    }
}

impl StdError for SqlStateError {}

impl sqlx::error::DatabaseError for SqlStateError {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(&self.code))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        if self.code == UNIQUE_VIOLATION {
            sqlx::error::ErrorKind::UniqueViolation
        } else {
            sqlx::error::ErrorKind::Other
        }
    }
}

impl From<SqlStateError> for LedgerError {
    fn from(e: SqlStateError) -> Self {
        LedgerError::Database(sqlx::Error::Database(Box::new(e)))
    }
}

// ============================================================
// STORE
// ============================================================

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Versioned>,
    transactions: HashMap<Uuid, TransactionRecord>,
    regions: Vec<String>,
    gateway_region: Option<String>,
}

struct Versioned {
    account: Account,
    version: u64,
}

/// Account store held entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    state: Arc<Mutex<State>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store reporting the given cluster regions; the first is the gateway's
    pub fn with_regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut state = store.lock();
            state.regions = regions.into_iter().map(Into::into).collect();
            state.gateway_region = state.regions.first().cloned();
        }
        store
    }

    pub fn insert_account(&self, account: Account) {
        let mut state = self.lock();
        if !account.region.is_empty() && !state.regions.contains(&account.region) {
            state.regions.push(account.region.clone());
        }
        state
            .accounts
            .insert(account.id, Versioned { account, version: 0 });
    }

    pub fn account(&self, id: Uuid) -> Option<Account> {
        self.lock().accounts.get(&id).map(|v| v.account.clone())
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }

    /// Fail the next `n` commits with a serialization failure
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        Ok(Box::new(InMemoryTx {
            store: self.clone(),
            read_versions: HashMap::new(),
            updates: Vec::new(),
            records: Vec::new(),
        }))
    }

    async fn create_accounts(
        &self,
        region: &str,
        initial_balance: &Money,
        count: u64,
        _batch_size: usize,
    ) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        let start = state.accounts.len() as u64;
        for i in 0..count {
            let account = Account::open(
                region,
                format!("user:{}", start + i + 1),
                initial_balance.clone(),
            );
            state
                .accounts
                .insert(account.id, Versioned { account, version: 0 });
        }
        if !state.regions.iter().any(|r| r == region) {
            state.regions.push(region.to_string());
        }
        Ok(count)
    }

    async fn find_accounts_by_region(
        &self,
        region: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Account>, LedgerError> {
        let state = self.lock();
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|v| v.account.region == region)
            .map(|v| v.account.clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_balance(&self, id: Uuid) -> Result<Money, LedgerError> {
        self.lock()
            .accounts
            .get(&id)
            .map(|v| v.account.balance.clone())
            .ok_or(LedgerError::NoSuchAccount(id))
    }

    async fn get_balance_snapshot(&self, id: Uuid) -> Result<Money, LedgerError> {
        self.get_balance(id).await
    }

    async fn get_currencies(&self) -> Result<Vec<String>, LedgerError> {
        let state = self.lock();
        let currencies: BTreeSet<String> = state
            .accounts
            .values()
            .map(|v| v.account.balance.currency.clone())
            .collect();
        Ok(currencies.into_iter().collect())
    }

    async fn get_total_balance(&self, currency: &str) -> Result<Money, LedgerError> {
        let state = self.lock();
        let total = state
            .accounts
            .values()
            .filter(|v| v.account.balance.currency == currency)
            .map(|v| v.account.balance.amount)
            .sum::<Decimal>();
        Ok(Money::new(total, currency))
    }

    async fn account_summary(&self, region: &str) -> Result<AccountSummary, LedgerError> {
        let state = self.lock();
        let balances: Vec<Decimal> = state
            .accounts
            .values()
            .filter(|v| v.account.region == region)
            .map(|v| v.account.balance.amount)
            .collect();

        let total: Decimal = balances.iter().sum();
        let count = balances.len() as i64;
        Ok(AccountSummary {
            region: region.to_string(),
            number_of_accounts: count,
            total_balance: total,
            min_balance: balances.iter().min().copied().unwrap_or_default(),
            max_balance: balances.iter().max().copied().unwrap_or_default(),
            avg_balance: if count > 0 {
                total / Decimal::from(count)
            } else {
                Decimal::ZERO
            },
        })
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn regions(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.lock().regions.clone())
    }

    async fn gateway_region(&self) -> Result<Option<String>, LedgerError> {
        Ok(self.lock().gateway_region.clone())
    }
}

// ============================================================
// TRANSACTION
// ============================================================

struct InMemoryTx {
    store: InMemoryAccountStore,
    read_versions: HashMap<Uuid, u64>,
    updates: Vec<Account>,
    records: Vec<TransactionRecord>,
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn lock_for_update(&mut self, ids: &[Uuid]) -> Result<Vec<Account>, LedgerError> {
        let state = self.store.lock();
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(v) = state.accounts.get(id) {
                self.read_versions.insert(*id, v.version);
                accounts.push(v.account.clone());
            }
        }
        Ok(accounts)
    }

    async fn apply_balance_updates(&mut self, accounts: &[Account]) -> Result<(), LedgerError> {
        let state = self.store.lock();
        for account in accounts {
            let matched = state.accounts.get(&account.id).is_some_and(|v| {
                !v.account.closed && v.account.balance.currency == account.balance.currency
            });
            if !matched {
                return Err(LedgerError::IncorrectResultSize {
                    expected: 1,
                    actual: 0,
                });
            }
        }
        self.updates.extend(accounts.iter().cloned());
        Ok(())
    }

    async fn append_transaction(&mut self, record: &TransactionRecord) -> Result<(), LedgerError> {
        self.records.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryTx {
            store,
            read_versions,
            updates,
            records,
        } = *self;
        if store.take_injected_conflict() {
            return Err(SqlStateError::serialization_failure().into());
        }

        let mut state = store.lock();
        let stale = read_versions
            .iter()
            .any(|(id, version)| state.accounts.get(id).map(|v| v.version) != Some(*version));
        if stale {
            return Err(SqlStateError::serialization_failure().into());
        }
        if let Some(dup) = records
            .iter()
            .find(|r| state.transactions.contains_key(&r.id))
        {
            let violation = SqlStateError::new(
                UNIQUE_VIOLATION,
                format!("duplicate key value violates unique constraint \"transaction_pkey\": {}", dup.id),
            );
            return Err(LedgerError::on_insert(
                sqlx::Error::Database(Box::new(violation)),
                dup.id,
            ));
        }

        let now = chrono::Utc::now();
        for update in updates {
            if let Some(v) = state.accounts.get_mut(&update.id) {
                v.account.balance = update.balance;
                v.account.updated_at = Some(now);
                v.version += 1;
            }
        }
        for record in records {
            state.transactions.insert(record.id, record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
