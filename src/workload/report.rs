//! Ledger balance sheet report

use serde::Serialize;
use std::fmt;

use crate::ledger::{AccountStore, AccountSummary, LedgerError, Money};

#[derive(Debug, Clone, Serialize)]
pub struct LedgerReport {
    pub regions: Vec<AccountSummary>,
    pub total_accounts: i64,
    pub totals: Vec<Money>,
}

impl fmt::Display for LedgerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for summary in &self.regions {
            writeln!(f, "{}", summary)?;
        }
        write!(f, "Total number of accounts: {}", self.total_accounts)?;
        for total in &self.totals {
            write!(f, "\nTotal balance for {}: {}", total.currency, total.amount)?;
        }
        Ok(())
    }
}

/// Per-region account summaries and per-currency balance totals.
///
/// In a closed system of balanced transfers the per-currency totals never
/// change, which makes this report a cheap consistency check.
pub async fn ledger_report(store: &dyn AccountStore) -> Result<LedgerReport, LedgerError> {
    let mut regions = Vec::new();
    for region in store.regions().await? {
        regions.push(store.account_summary(&region).await?);
    }
    let total_accounts = regions.iter().map(|s| s.number_of_accounts).sum();

    let mut totals = Vec::new();
    for currency in store.get_currencies().await? {
        totals.push(store.get_total_balance(&currency).await?);
    }

    Ok(LedgerReport {
        regions,
        total_accounts,
        totals,
    })
}
