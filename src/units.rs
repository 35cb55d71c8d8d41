//! Human-friendly quantity parsing
//!
//! Workload commands take durations like `45m` or `1h30m` and counts like `10k`.
//! Both are parsed here so every entry point accepts the same notation.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("Empty expression")]
    Empty,

    #[error("Invalid duration expression: {0}")]
    InvalidDuration(String),

    #[error("Invalid count expression: {0}")]
    InvalidCount(String),

    #[error("Count out of range: {0}")]
    CountOverflow(String),
}

// ============================================================
// DURATIONS
// ============================================================

/// Parse a duration expression.
///
/// Accepts one or more `<number><unit>` terms where unit is one of
/// `ms`, `s`, `m`, `h`, `d` (e.g. `45m`, `1h30m`, `90s`, `500ms`).
/// A bare number is taken as seconds.
pub fn parse_duration(expr: &str) -> Result<Duration, UnitsError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(UnitsError::Empty);
    }

    if let Ok(secs) = expr.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || UnitsError::InvalidDuration(expr.to_string());

    let mut total = Duration::ZERO;
    let mut rest = expr;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let term = match unit.to_ascii_lowercase().as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "d" => Duration::from_secs(value.saturating_mul(86_400)),
            _ => return Err(invalid()),
        };
        total = total.saturating_add(term);
    }

    Ok(total)
}

/// Format a duration compactly, e.g. `1h30m5s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}s"));
    }
    out
}

// ============================================================
// COUNTS
// ============================================================

/// Parse a count with an optional multiplier suffix: `k` (thousand) or `m` (million).
///
/// Fractions are allowed with a suffix (`1.5k` = 1500) but must resolve to a whole number.
pub fn parse_count(expr: &str) -> Result<u64, UnitsError> {
    let expr = expr.trim().replace('_', "");
    if expr.is_empty() {
        return Err(UnitsError::Empty);
    }

    let (number, factor) = match expr.chars().last() {
        Some('k' | 'K') => (&expr[..expr.len() - 1], 1_000u64),
        Some('m' | 'M') => (&expr[..expr.len() - 1], 1_000_000u64),
        _ => (expr.as_str(), 1u64),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(factor)
            .ok_or_else(|| UnitsError::CountOverflow(expr.clone()));
    }

    let fractional: f64 = number
        .parse()
        .map_err(|_| UnitsError::InvalidCount(expr.clone()))?;
    let scaled = fractional * factor as f64;
    if !scaled.is_finite() || scaled < 0.0 || scaled.fract() != 0.0 {
        return Err(UnitsError::InvalidCount(expr.clone()));
    }
    if scaled > u64::MAX as f64 {
        return Err(UnitsError::CountOverflow(expr.clone()));
    }
    Ok(scaled as u64)
}
