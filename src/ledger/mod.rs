//! Ledger transfer protocol
//!
//! Balanced multi-leg monetary transfers over an [`AccountStore`]:
//! - [`coalesce`] - per-account net deltas, zero sum per currency
//! - [`transfer`] - the transfer operation executed as a unit of work
//! - [`pg`] - PostgreSQL-wire store
//! - [`memory`] - in-memory store for dry runs and tests

pub mod coalesce;
pub mod error;
pub mod memory;
pub mod money;
pub mod pg;
pub mod store;
pub mod transfer;
pub mod types;

pub use coalesce::{CoalescedLeg, coalesce};
pub use error::LedgerError;
pub use memory::InMemoryAccountStore;
pub use money::Money;
pub use pg::PgAccountStore;
pub use store::{AccountStore, LedgerTx};
pub use transfer::{LedgerTransferOperation, TransferUnit};
pub use types::{
    Account, AccountSummary, AccountType, TransactionItem, TransactionRecord, TransferLeg,
    TransferRequest,
};
