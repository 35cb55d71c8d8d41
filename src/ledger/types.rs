//! Ledger data types
//!
//! Requests are validated when constructed and immutable afterwards, so the
//! same request can be replayed verbatim by the retry loop.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::LedgerError;
use super::money::Money;

// ============================================================
// ACCOUNT
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn code(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
        }
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "REVENUE" => Ok(AccountType::Revenue),
            "EXPENSE" => Ok(AccountType::Expense),
            other => Err(LedgerError::BadRequest(format!(
                "unknown account type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A monetary account. The currency of `balance` never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub region: String,
    pub balance: Money,
    pub name: String,
    pub description: String,
    pub account_type: AccountType,
    pub allow_negative: bool,
    pub closed: bool,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    /// A fresh open asset account
    pub fn open(region: impl Into<String>, name: impl Into<String>, balance: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            region: region.into(),
            balance,
            name: name.into(),
            description: String::new(),
            account_type: AccountType::Asset,
            allow_negative: false,
            closed: false,
            inserted_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Selection weight for balance-weighted picks; never negative
    pub fn weight(&self) -> f64 {
        self.balance.amount.max(Decimal::ZERO).to_f64().unwrap_or(0.0)
    }
}

// ============================================================
// TRANSFER REQUEST
// ============================================================

/// One leg of a transfer: positive amount credits, negative debits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub account_id: Uuid,
    pub region: String,
    pub amount: Money,
    pub note: String,
}

impl TransferLeg {
    pub fn new(
        account_id: Uuid,
        region: impl Into<String>,
        amount: Money,
        note: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            region: region.into(),
            amount,
            note: note.into(),
        }
    }
}

/// A balanced multi-leg transfer. `id` is the idempotency key and becomes the
/// id of the resulting transaction record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRequest {
    id: Uuid,
    region: String,
    transaction_type: String,
    booking_date: NaiveDate,
    transfer_date: NaiveDate,
    legs: Vec<TransferLeg>,
}

impl TransferRequest {
    /// Validate and build a request. Balance is checked later, by the
    /// coalescer, so an unbalanced request can still be constructed.
    pub fn new(
        id: Uuid,
        region: impl Into<String>,
        transaction_type: impl Into<String>,
        booking_date: NaiveDate,
        transfer_date: NaiveDate,
        legs: Vec<TransferLeg>,
    ) -> Result<Self, LedgerError> {
        let region = region.into();
        let transaction_type = transaction_type.into();

        if legs.len() < 2 {
            return Err(LedgerError::BadRequest(
                "Must have at least two account legs".into(),
            ));
        }
        if region.trim().is_empty() {
            return Err(LedgerError::BadRequest("region is required".into()));
        }
        if transaction_type.trim().is_empty() {
            return Err(LedgerError::BadRequest("transaction type is required".into()));
        }
        if let Some(leg) = legs.iter().find(|l| l.amount.currency.trim().is_empty()) {
            return Err(LedgerError::BadRequest(format!(
                "leg for account {} has no currency",
                leg.account_id
            )));
        }

        Ok(Self {
            id,
            region,
            transaction_type,
            booking_date,
            transfer_date,
            legs,
        })
    }

    /// Request dated today with a random id
    pub fn today(
        region: impl Into<String>,
        transaction_type: impl Into<String>,
        legs: Vec<TransferLeg>,
    ) -> Result<Self, LedgerError> {
        let today = Utc::now().date_naive();
        Self::new(Uuid::new_v4(), region, transaction_type, today, today, legs)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn transaction_type(&self) -> &str {
        &self.transaction_type
    }

    pub fn booking_date(&self) -> NaiveDate {
        self.booking_date
    }

    pub fn transfer_date(&self) -> NaiveDate {
        self.transfer_date
    }

    pub fn legs(&self) -> &[TransferLeg] {
        &self.legs
    }
}

// ============================================================
// TRANSACTION RECORD
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    pub account_id: Uuid,
    pub region: String,
    pub amount: Money,
    /// Account balance read under lock, before this item was applied
    pub running_balance_before: Money,
    pub note: String,
}

/// Durable result of one successful transfer; `id` equals the request id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub region: String,
    pub transaction_type: String,
    pub booking_date: NaiveDate,
    pub transfer_date: NaiveDate,
    pub items: Vec<TransactionItem>,
}

/// Aggregate balances of one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub region: String,
    pub number_of_accounts: i64,
    pub total_balance: Decimal,
    pub min_balance: Decimal,
    pub max_balance: Decimal,
    pub avg_balance: Decimal,
}

impl fmt::Display for AccountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: accounts={}, total={}, min={}, max={}, avg={}",
            self.region,
            self.number_of_accounts,
            self.total_balance,
            self.min_balance,
            self.max_balance,
            self.avg_balance.round_dp(2)
        )
    }
}
