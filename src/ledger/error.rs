//! Ledger error types

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Ledger error types
///
/// Domain variants are always fatal for the task that hit them. Store
/// failures keep the original [`sqlx::Error`] as their source so retry
/// classification can see its SQLSTATE.
#[derive(Error, Debug)]
pub enum LedgerError {
    // === Request Errors ===
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unbalanced transaction: currency [{currency}], amount sum [{sum}]")]
    Unbalanced { currency: String, sum: Decimal },

    // === Account Errors ===
    #[error("No such account: {0}")]
    NoSuchAccount(Uuid),

    #[error("Account is closed: {0}")]
    AccountClosed(Uuid),

    #[error("Currency mismatch on account {account}: expected {expected}, got {actual}")]
    CurrencyMismatch {
        account: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Negative balance not allowed for account {account}: {balance}")]
    NegativeBalance { account: Uuid, balance: String },

    // === Store Errors ===
    #[error("Incorrect result size: expected {expected}, actual {actual}")]
    IncorrectResultSize { expected: u64, actual: u64 },

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Stable error code for logs and reports
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::BadRequest(_) => "BAD_REQUEST",
            LedgerError::Unbalanced { .. } => "UNBALANCED",
            LedgerError::NoSuchAccount(_) => "NO_SUCH_ACCOUNT",
            LedgerError::AccountClosed(_) => "ACCOUNT_CLOSED",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::NegativeBalance { .. } => "NEGATIVE_BALANCE",
            LedgerError::IncorrectResultSize { .. } => "INCORRECT_RESULT_SIZE",
            LedgerError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Map a failed transaction insert. A unique violation means the id was
    /// already committed.
    pub fn on_insert(error: sqlx::Error, transaction_id: Uuid) -> Self {
        let duplicate = error
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if duplicate {
            LedgerError::DuplicateTransaction(transaction_id)
        } else {
            LedgerError::Database(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::BadRequest("x".into()).code(), "BAD_REQUEST");
        assert_eq!(LedgerError::NoSuchAccount(Uuid::nil()).code(), "NO_SUCH_ACCOUNT");
        assert_eq!(
            LedgerError::from(sqlx::Error::RowNotFound).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_unbalanced_display_names_currency() {
        let err = LedgerError::Unbalanced {
            currency: "EUR".into(),
            sum: Decimal::new(-500, 2),
        };
        assert_eq!(
            err.to_string(),
            "Unbalanced transaction: currency [EUR], amount sum [-5.00]"
        );
    }

    #[test]
    fn test_unique_violation_on_insert_is_duplicate() {
        use crate::ledger::memory::SqlStateError;
        let id = Uuid::new_v4();
        let unique = sqlx::Error::Database(Box::new(SqlStateError::new("23505", "duplicate key")));
        let err = LedgerError::on_insert(unique, id);
        assert!(matches!(err, LedgerError::DuplicateTransaction(d) if d == id));
        assert_eq!(err.code(), "DUPLICATE_TRANSACTION");

        let other = sqlx::Error::Database(Box::new(SqlStateError::new("40001", "restart")));
        assert_eq!(LedgerError::on_insert(other, id).code(), "DATABASE_ERROR");
        assert_eq!(
            LedgerError::on_insert(sqlx::Error::PoolTimedOut, id).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_database_error_keeps_source() {
        use std::error::Error;
        let err = LedgerError::from(sqlx::Error::PoolTimedOut);
        assert!(err.source().unwrap().downcast_ref::<sqlx::Error>().is_some());
    }
}
