//! Account bootstrap

use tracing::info;

use super::resolve_regions;
use crate::ledger::{AccountStore, LedgerError, Money};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub initial_balance: Money,
    /// Accounts per region
    pub accounts: u64,
    pub batch_size: usize,
    pub regions: String,
}

/// Create `accounts` accounts in every resolved region. Returns the total created.
pub async fn init_accounts(store: &dyn AccountStore, options: &InitOptions) -> Result<u64, LedgerError> {
    let regions = resolve_regions(store, &options.regions).await?;
    info!(
        accounts_per_region = options.accounts,
        regions = ?regions,
        initial_balance = %options.initial_balance,
        "Creating accounts"
    );

    let mut total = 0;
    for region in &regions {
        let created = store
            .create_accounts(
                region,
                &options.initial_balance,
                options.accounts,
                options.batch_size,
            )
            .await?;
        info!(region = %region, created, "Region accounts created");
        total += created;
    }

    info!(total, "Ready for business");
    Ok(total)
}
