//! Random selection helpers for workload generators

use rand::Rng;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rust_decimal::Decimal;

use crate::ledger::{Account, Money};

const NOTES: &[&str] = &[
    "rent",
    "groceries",
    "invoice settlement",
    "refund",
    "salary",
    "transfer between own accounts",
    "subscription",
    "gift",
];

/// Uniform amount with two decimals in `[min, max]` (both in minor units, e.g. cents)
pub fn money_between<R: Rng + ?Sized>(rng: &mut R, min_cents: i64, max_cents: i64, currency: &str) -> Money {
    let (lo, hi) = if min_cents <= max_cents {
        (min_cents, max_cents)
    } else {
        (max_cents, min_cents)
    };
    Money::new(Decimal::new(rng.gen_range(lo..=hi), 2), currency)
}

/// Index of a uniformly chosen candidate
pub fn pick_uniform<R: Rng + ?Sized>(rng: &mut R, candidates: &[&Account]) -> Option<usize> {
    if candidates.is_empty() {
        None
    } else {
        Some(rng.gen_range(0..candidates.len()))
    }
}

/// Index of a candidate chosen with probability proportional to its balance.
///
/// Falls back to a uniform pick when no candidate has a positive balance.
pub fn pick_weighted<R: Rng + ?Sized>(rng: &mut R, candidates: &[&Account]) -> Option<usize> {
    match WeightedIndex::new(candidates.iter().map(|a| a.weight())) {
        Ok(dist) => Some(dist.sample(rng)),
        Err(_) => pick_uniform(rng, candidates),
    }
}

pub fn note<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    NOTES[rng.gen_range(0..NOTES.len())]
}
