//! Transfer coalescing
//!
//! Folds the legs of a request into one net delta per account and verifies
//! that every currency sums to exactly zero. Runs before any account is read.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::error::LedgerError;
use super::money::Money;
use super::types::TransferRequest;

/// Net effect of a request on one account
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescedLeg {
    pub amount: Money,
    /// Note of the last leg on this account
    pub note: String,
    pub region: String,
}

/// Net delta per account, keyed and iterated in account id order.
pub fn coalesce(request: &TransferRequest) -> Result<BTreeMap<Uuid, CoalescedLeg>, LedgerError> {
    let mut legs: BTreeMap<Uuid, CoalescedLeg> = BTreeMap::new();
    let mut sums: BTreeMap<&str, Decimal> = BTreeMap::new();

    for leg in request.legs() {
        match legs.get_mut(&leg.account_id) {
            Some(acc) => {
                let net = acc.amount.checked_add(&leg.amount).ok_or_else(|| {
                    if acc.amount.currency != leg.amount.currency {
                        LedgerError::CurrencyMismatch {
                            account: leg.account_id,
                            expected: acc.amount.currency.clone(),
                            actual: leg.amount.currency.clone(),
                        }
                    } else {
                        LedgerError::BadRequest(format!(
                            "amount overflow on account {}",
                            leg.account_id
                        ))
                    }
                })?;
                acc.amount = net;
                acc.note = leg.note.clone();
            }
            None => {
                legs.insert(
                    leg.account_id,
                    CoalescedLeg {
                        amount: leg.amount.clone(),
                        note: leg.note.clone(),
                        region: leg.region.clone(),
                    },
                );
            }
        }

        let sum = sums.entry(leg.amount.currency.as_str()).or_insert(Decimal::ZERO);
        *sum = sum.checked_add(leg.amount.amount).ok_or_else(|| {
            LedgerError::BadRequest(format!("amount overflow in {}", leg.amount.currency))
        })?;
    }

    // The sum of debits must equal the sum of credits, per currency
    if let Some((currency, sum)) = sums.iter().find(|(_, sum)| !sum.is_zero()) {
        return Err(LedgerError::Unbalanced {
            currency: currency.to_string(),
            sum: *sum,
        });
    }

    Ok(legs)
}
