//! Transfer workload
//!
//! Per region, a fixed pool of accounts is loaded once. Every invocation of
//! the unit of work builds a fresh request: even legs are debits picked by
//! balance-weighted selection, odd legs are credits picked uniformly, and no
//! account appears twice in one request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::random;
use super::resolve_regions;
use crate::engine::{Bound, TaskHandle, UnitOfWork, WorkerPool};
use crate::ledger::{
    Account, AccountStore, LedgerError, LedgerTransferOperation, TransferLeg, TransferRequest,
};

/// Transaction type stamped on generated transfers
pub const TRANSACTION_TYPE: &str = "GEN";

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Workers per region
    pub threads: usize,
    /// Region selector, see [`resolve_regions`]
    pub regions: String,
    /// Max accounts loaded per region
    pub limit: u64,
    /// Legs per request, must be even
    pub legs: usize,
    pub duration: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            regions: "all".into(),
            limit: 5000,
            legs: 2,
            duration: Duration::from_secs(45 * 60),
        }
    }
}

/// Generates and executes one random transfer per invocation
pub struct TransferWork {
    operation: LedgerTransferOperation,
    accounts: Arc<Vec<Account>>,
    legs: usize,
    request_region: String,
}

impl TransferWork {
    pub fn new(
        operation: LedgerTransferOperation,
        accounts: Arc<Vec<Account>>,
        legs: usize,
        request_region: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            accounts,
            legs,
            request_region: request_region.into(),
        }
    }

    /// Build a random balanced request over this work's account pool
    pub fn next_request(&self) -> Result<TransferRequest, LedgerError> {
        if self.legs < 2 || self.legs % 2 != 0 {
            return Err(LedgerError::BadRequest(format!(
                "Number of legs must be an even number of at least 2: {}",
                self.legs
            )));
        }
        let Some(first) = self.accounts.first() else {
            return Err(LedgerError::BadRequest("no accounts to transfer between".into()));
        };
        if self.accounts.len() < self.legs {
            return Err(LedgerError::BadRequest(format!(
                "{} legs need at least as many accounts, have {}",
                self.legs,
                self.accounts.len()
            )));
        }

        let mut rng = rand::thread_rng();
        let currency = first.balance.currency.as_str();
        let amount = random::money_between(&mut rng, 100, 1000, currency);

        let mut candidates: Vec<&Account> = self.accounts.iter().collect();
        let mut legs = Vec::with_capacity(self.legs);
        for i in 0..self.legs {
            let debit = i % 2 == 0;
            let picked = if debit {
                random::pick_weighted(&mut rng, &candidates)
            } else {
                random::pick_uniform(&mut rng, &candidates)
            };
            let Some(index) = picked else {
                break;
            };
            let account = candidates.swap_remove(index);
            legs.push(TransferLeg::new(
                account.id,
                account.region.clone(),
                if debit { amount.negate() } else { amount.clone() },
                random::note(&mut rng),
            ));
        }

        TransferRequest::today(self.request_region.clone(), TRANSACTION_TYPE, legs)
    }
}

#[async_trait]
impl UnitOfWork for TransferWork {
    async fn run(&self) -> anyhow::Result<()> {
        let request = self.next_request()?;
        self.operation.execute(&request).await?;
        Ok(())
    }
}

/// Load accounts per resolved region and submit `threads` duration-bound
/// transfer workers for each. Regions without accounts are skipped.
pub async fn start_transfer_workload(
    pool: &WorkerPool,
    store: Arc<dyn AccountStore>,
    options: &TransferOptions,
) -> Result<Vec<TaskHandle>, LedgerError> {
    if options.legs < 2 || options.legs % 2 != 0 {
        return Err(LedgerError::BadRequest(format!(
            "Number of legs must be a multiple of 2: {}",
            options.legs
        )));
    }

    let regions = resolve_regions(store.as_ref(), &options.regions).await?;
    info!(count = regions.len(), regions = ?regions, "Resolved regions");
    let Some(request_region) = regions.first().cloned() else {
        return Ok(Vec::new());
    };

    let operation = LedgerTransferOperation::new(store.clone());
    let mut handles = Vec::new();
    for region in &regions {
        let accounts = store
            .find_accounts_by_region(region, 0, options.limit)
            .await?;
        if accounts.len() < options.legs {
            warn!(region = %region, accounts = accounts.len(), legs = options.legs, "Not enough accounts, skipping region");
            continue;
        }
        info!(region = %region, accounts = accounts.len(), "Region accounts loaded");

        let work: Arc<dyn UnitOfWork> = Arc::new(TransferWork::new(
            operation.clone(),
            Arc::new(accounts),
            options.legs,
            request_region.clone(),
        ));
        for n in 1..=options.threads {
            let id = format!("transfer writer #{} ({})", n, region);
            handles.push(pool.submit_shared(&id, work.clone(), Bound::Duration(options.duration)));
        }
    }
    Ok(handles)
}
