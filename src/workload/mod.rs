//! Ledger workloads
//!
//! Generators that bind ledger operations to region-local account pools and
//! submit them to a [`crate::engine::WorkerPool`].

pub mod balance;
pub mod init;
pub mod random;
pub mod report;
pub mod supervise;
pub mod transfer;

use crate::ledger::{AccountStore, LedgerError};

pub use balance::{BalanceOptions, BalanceWork, start_balance_workload};
pub use init::{InitOptions, init_accounts};
pub use report::{LedgerReport, ledger_report};
pub use supervise::{SuperviseOptions, SuperviseOutcome, supervise};
pub use transfer::{TransferOptions, TransferWork, start_transfer_workload};

/// Resolve a region selector against the store's regions.
///
/// - `all` - every known region
/// - `gateway` - the region of the node serving this connection
/// - `r1,r2,...` - the listed regions, each of which must exist
pub async fn resolve_regions(
    store: &dyn AccountStore,
    selector: &str,
) -> Result<Vec<String>, LedgerError> {
    let selector = selector.trim();
    let available = store.regions().await?;

    match selector {
        "all" => Ok(available),
        "gateway" => match store.gateway_region().await? {
            Some(region) => Ok(vec![region]),
            None => Err(LedgerError::BadRequest(
                "gateway region is not known to the store".into(),
            )),
        },
        list => {
            let mut resolved = Vec::new();
            for region in list.split(',').map(str::trim).filter(|r| !r.is_empty()) {
                if !available.iter().any(|a| a == region) {
                    return Err(LedgerError::BadRequest(format!(
                        "No such region [{}] in {:?}",
                        region, available
                    )));
                }
                if !resolved.iter().any(|r: &String| r == region) {
                    resolved.push(region.to_string());
                }
            }
            if resolved.is_empty() {
                return Err(LedgerError::BadRequest("no regions given".into()));
            }
            Ok(resolved)
        }
    }
}
