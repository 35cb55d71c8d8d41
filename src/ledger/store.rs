//! Account store capability
//!
//! The transfer operation and the workloads only talk to the store through
//! these traits. [`super::pg::PgAccountStore`] is the production
//! implementation; [`super::memory::InMemoryAccountStore`] backs dry runs and
//! tests.

use async_trait::async_trait;
use uuid::Uuid;

use super::error::LedgerError;
use super::money::Money;
use super::types::{Account, AccountSummary, TransactionRecord};

/// One store transaction. Dropping it without [`LedgerTx::commit`] rolls it back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Read the given accounts under an exclusive lock held until commit or
    /// rollback. Missing ids are simply absent from the result.
    async fn lock_for_update(&mut self, ids: &[Uuid]) -> Result<Vec<Account>, LedgerError>;

    /// Persist the balances of accounts previously locked in this transaction.
    ///
    /// Every update must hit exactly one open account with the same currency,
    /// otherwise [`LedgerError::IncorrectResultSize`] is returned.
    async fn apply_balance_updates(&mut self, accounts: &[Account]) -> Result<(), LedgerError>;

    /// Insert the transaction header and its items
    async fn append_transaction(&mut self, record: &TransactionRecord) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;

    // === Bootstrap ===

    /// Create `count` open asset accounts in `region`, `batch_size` per
    /// round trip. Returns the number created.
    async fn create_accounts(
        &self,
        region: &str,
        initial_balance: &Money,
        count: u64,
        batch_size: usize,
    ) -> Result<u64, LedgerError>;

    // === Reads ===

    async fn find_accounts_by_region(
        &self,
        region: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Account>, LedgerError>;

    /// Authoritative (consistent) balance read
    async fn get_balance(&self, id: Uuid) -> Result<Money, LedgerError>;

    /// Possibly stale balance read served by the nearest replica
    async fn get_balance_snapshot(&self, id: Uuid) -> Result<Money, LedgerError>;

    async fn get_currencies(&self) -> Result<Vec<String>, LedgerError>;

    async fn get_total_balance(&self, currency: &str) -> Result<Money, LedgerError>;

    async fn account_summary(&self, region: &str) -> Result<AccountSummary, LedgerError>;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, LedgerError>;

    // === Topology ===

    /// Regions the cluster is configured with
    async fn regions(&self) -> Result<Vec<String>, LedgerError>;

    /// Region of the node serving this connection, if known
    async fn gateway_region(&self) -> Result<Option<String>, LedgerError>;
}
