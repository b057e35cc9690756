//! Integer arithmetic and display helpers for ledger units.
//!
//! Ledger values exceed f64 precision, so amounts stay in U256 until the
//! final display string. f64 conversion exists only for fiat display.

use alloy::primitives::utils::{parse_units, ParseUnits};
use alloy::primitives::U256;
use thiserror::Error;

/// Decimals of the native asset.
pub const NATIVE_DECIMALS: u8 = 18;

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

/// Decimal places shown for ledger amounts.
pub const DISPLAY_DECIMALS: u8 = 4;

/// Why a user-entered amount was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,
    #[error("Amount must be greater than zero")]
    NotPositive,
    #[error("Invalid amount '{0}'")]
    Malformed(String),
}

/// Power of 10 as U256.
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Parse a decimal string into base units, rejecting zero and negatives.
///
/// Example: `parse_amount("0.1", 18)` = 10^17
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(AmountError::NotPositive);
    }

    let value = match parse_units(trimmed, decimals) {
        Ok(ParseUnits::U256(v)) => v,
        Ok(ParseUnits::I256(v)) if !v.is_negative() => v.into_raw(),
        Ok(ParseUnits::I256(_)) => return Err(AmountError::NotPositive),
        Err(_) => return Err(AmountError::Malformed(trimmed.to_string())),
    };

    if value.is_zero() {
        return Err(AmountError::NotPositive);
    }
    Ok(value)
}

/// Apply basis points increase (e.g., for a fee margin).
/// Returns: value * (10000 + basis_points) / 10000
///
/// Example: apply_basis_points_up(1000, 1000) = 1100 (10% margin)
#[inline(always)]
pub fn apply_basis_points_up(value: U256, basis_points: u32) -> U256 {
    let factor = U256::from(10000u64 + basis_points as u64);
    value.saturating_mul(factor) / BPS_DENOMINATOR
}

/// Share of a value in basis points.
/// Returns: value * basis_points / 10000
#[inline(always)]
pub fn bps_of(value: U256, basis_points: u32) -> U256 {
    value.saturating_mul(U256::from(basis_points)) / BPS_DENOMINATOR
}

/// Local estimate of the native value of `units` of yield:
/// `units * locked / (market + units)`.
///
/// Zero when nothing is locked or the denominator is zero.
pub fn estimate_yield_value(units: U256, locked: U256, market: U256) -> U256 {
    let denominator = market.saturating_add(units);
    if locked.is_zero() || denominator.is_zero() {
        return U256::ZERO;
    }
    units.saturating_mul(locked) / denominator
}

/// Format base units with a fixed number of decimal places (truncated).
///
/// Example: format_fixed(1_234_567_000_000_000_000, 18, 4) = "1.2345"
pub fn format_fixed(value: U256, decimals: u8, places: u8) -> String {
    let places = places.min(decimals);
    let unit = pow10(decimals);
    let whole = value / unit;
    let frac = (value % unit) / pow10(decimals - places);

    if places == 0 {
        return whole.to_string();
    }
    format!("{}.{:0>width$}", whole, frac.to_string(), width = places as usize)
}

/// Format a native amount for display (4 decimals).
pub fn format_native(value: U256) -> String {
    format_fixed(value, NATIVE_DECIMALS, DISPLAY_DECIMALS)
}

/// Format an integer count with thousands separators.
///
/// Example: format_count(1234567) = "1,234,567"
pub fn format_count(value: U256) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Convert base units to f64 (display/fiat only, never for computation).
pub fn to_f64(value: U256, decimals: u8) -> f64 {
    let unit = pow10(decimals);
    let whole = value / unit;
    let frac = value % unit;
    let whole_f = if whole <= U256::from(u128::MAX) {
        whole.to::<u128>() as f64
    } else {
        f64::INFINITY
    };
    // frac < 10^decimals <= 10^255, but practically 10^18
    let frac_f = if frac <= U256::from(u128::MAX) {
        frac.to::<u128>() as f64 / 10f64.powi(decimals as i32)
    } else {
        0.0
    };
    whole_f + frac_f
}

/// Format a fiat value with two decimals.
pub fn format_fiat(value: f64) -> String {
    format!("${:.2}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ether(n: u64) -> U256 {
        U256::from(n) * pow10(18)
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("0.1", 18).unwrap(), pow10(17));
        assert_eq!(parse_amount(" 2 ", 18).unwrap(), ether(2));
        assert_eq!(parse_amount("1.5", 18).unwrap(), ether(3) / U256::from(2));
    }

    #[test]
    fn test_parse_amount_rejects() {
        assert_eq!(parse_amount("0", 18), Err(AmountError::NotPositive));
        assert_eq!(parse_amount("0.0", 18), Err(AmountError::NotPositive));
        assert_eq!(parse_amount("-1", 18), Err(AmountError::NotPositive));
        assert_eq!(parse_amount("", 18), Err(AmountError::Empty));
        assert!(matches!(parse_amount("abc", 18), Err(AmountError::Malformed(_))));
        assert!(matches!(parse_amount("1.2.3", 18), Err(AmountError::Malformed(_))));
    }

    #[test]
    fn test_apply_basis_points_up() {
        assert_eq!(apply_basis_points_up(U256::from(1000), 1000), U256::from(1100));
        assert_eq!(apply_basis_points_up(U256::from(1000), 0), U256::from(1000));
    }

    #[test]
    fn test_bps_of() {
        assert_eq!(bps_of(U256::from(1000), 1500), U256::from(150));
    }

    #[test]
    fn test_estimate_yield_value() {
        // 100 units, 1000 locked, 900 market: 100 * 1000 / 1000 = 100
        assert_eq!(
            estimate_yield_value(U256::from(100), U256::from(1000), U256::from(900)),
            U256::from(100)
        );
        assert_eq!(
            estimate_yield_value(U256::from(100), U256::ZERO, U256::from(900)),
            U256::ZERO
        );
        assert_eq!(estimate_yield_value(U256::ZERO, U256::from(5), U256::ZERO), U256::ZERO);
    }

    #[test]
    fn test_format_fixed() {
        assert_eq!(format_fixed(U256::from(1_234_567_000_000_000_000u128), 18, 4), "1.2345");
        assert_eq!(format_native(U256::ZERO), "0.0000");
        assert_eq!(format_native(pow10(14)), "0.0001");
        assert_eq!(format_fixed(U256::from(42), 0, 4), "42");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(U256::from(0)), "0");
        assert_eq!(format_count(U256::from(999)), "999");
        assert_eq!(format_count(U256::from(1000)), "1,000");
        assert_eq!(format_count(U256::from(1_234_567)), "1,234,567");
    }

    #[test]
    fn test_to_f64() {
        assert!((to_f64(ether(3) / U256::from(2), 18) - 1.5).abs() < 1e-12);
        assert_eq!(format_fiat(1234.5), "$1234.50");
    }
}
