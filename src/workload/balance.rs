//! Balance read workload (read-only)

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::resolve_regions;
use crate::engine::{Bound, TaskHandle, UnitOfWork, WorkerPool};
use crate::ledger::{Account, AccountStore, LedgerError};

#[derive(Debug, Clone)]
pub struct BalanceOptions {
    pub threads: usize,
    pub regions: String,
    pub limit: u64,
    pub duration: Duration,
    /// Read possibly stale balances from the nearest replica
    pub follower_reads: bool,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            regions: "all".into(),
            limit: 5000,
            duration: Duration::from_secs(45 * 60),
            follower_reads: false,
        }
    }
}

/// Reads the balance of one random account per invocation
pub struct BalanceWork {
    store: Arc<dyn AccountStore>,
    accounts: Arc<Vec<Account>>,
    follower_reads: bool,
}

impl BalanceWork {
    pub fn new(store: Arc<dyn AccountStore>, accounts: Arc<Vec<Account>>, follower_reads: bool) -> Self {
        Self {
            store,
            accounts,
            follower_reads,
        }
    }
}

#[async_trait]
impl UnitOfWork for BalanceWork {
    async fn run(&self) -> anyhow::Result<()> {
        if self.accounts.is_empty() {
            return Err(LedgerError::BadRequest("no accounts to read".into()).into());
        }
        let index = rand::thread_rng().gen_range(0..self.accounts.len());
        let id = self.accounts[index].id;

        let balance = if self.follower_reads {
            self.store.get_balance_snapshot(id).await?
        } else {
            self.store.get_balance(id).await?
        };

        if balance.is_negative() {
            warn!(account = %id, balance = %balance, "Negative balance detected");
        }
        Ok(())
    }
}

/// Submit `threads` duration-bound balance readers per resolved region.
pub async fn start_balance_workload(
    pool: &WorkerPool,
    store: Arc<dyn AccountStore>,
    options: &BalanceOptions,
) -> Result<Vec<TaskHandle>, LedgerError> {
    let regions = resolve_regions(store.as_ref(), &options.regions).await?;
    info!(count = regions.len(), regions = ?regions, "Resolved regions");

    let mut handles = Vec::new();
    for region in &regions {
        let accounts = store
            .find_accounts_by_region(region, 0, options.limit)
            .await?;
        if accounts.is_empty() {
            warn!(region = %region, "No accounts found, skipping region");
            continue;
        }
        info!(region = %region, accounts = accounts.len(), "Region accounts loaded");

        let work: Arc<dyn UnitOfWork> = Arc::new(BalanceWork::new(
            store.clone(),
            Arc::new(accounts),
            options.follower_reads,
        ));
        for n in 1..=options.threads {
            let id = format!("balance reader #{} ({})", n, region);
            handles.push(pool.submit_shared(&id, work.clone(), Bound::Duration(options.duration)));
        }
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CallMetrics, Completion};
    use crate::ledger::{InMemoryAccountStore, Money};

    #[tokio::test]
    async fn test_balance_workload_reads_until_deadline() {
        let store = InMemoryAccountStore::with_regions(["us-east-1", "eu-west-1"]);
        store
            .create_accounts("us-east-1", &Money::parse("10.00", "USD").unwrap(), 5, 5)
            .await
            .unwrap();

        let metrics = Arc::new(CallMetrics::default());
        let pool = WorkerPool::new(4, metrics.clone());
        let options = BalanceOptions {
            threads: 2,
            duration: Duration::from_millis(100),
            follower_reads: true,
            ..Default::default()
        };

        // eu-west-1 has no accounts and is skipped
        let mut handles = start_balance_workload(&pool, Arc::new(store), &options)
            .await
            .unwrap();
        assert_eq!(handles.len(), 2);

        for handle in &mut handles {
            let report = handle.wait().await.unwrap();
            assert_eq!(report.completion, Completion::DeadlineReached);
            assert!(report.iterations > 0);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.total.errors, 0);
    }

    #[tokio::test]
    async fn test_empty_pool_is_fatal() {
        let work = BalanceWork::new(Arc::new(InMemoryAccountStore::new()), Arc::new(Vec::new()), false);
        assert!(work.run().await.is_err());
    }
}
