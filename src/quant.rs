// Unit conversion and basis-point arithmetic
// Converts between human decimal amounts and atomic units, and applies
// slippage / price-impact bounds without floating point on amounts

use anyhow::{bail, ensure, Context, Result};

pub const BPS_DENOMINATOR: u128 = 10_000;

/// Parse a decimal string such as `"98.5"` into atomic units with `decimals` places.
pub fn to_atomic(amount: &str, decimals: u32) -> Result<u128> {
    let amount = amount.trim();
    ensure!(!amount.is_empty(), "amount must not be empty");
    ensure!(!amount.starts_with('-'), "amount {amount} must not be negative");

    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    ensure!(
        frac.len() as u32 <= decimals,
        "amount {amount} has more than {decimals} decimal places"
    );
    ensure!(
        whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()),
        "amount {amount} is not a decimal number"
    );

    let scale = 10u128
        .checked_pow(decimals)
        .context("decimals out of range")?;
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().with_context(|| format!("parse {amount}"))?
    };
    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = decimals as usize);
        padded.parse().with_context(|| format!("parse {amount}"))?
    };

    match whole.checked_mul(scale).and_then(|w| w.checked_add(frac_units)) {
        Some(v) => Ok(v),
        None => bail!("amount {amount} overflows"),
    }
}

/// Render atomic units as a decimal string, trimming trailing zeros.
pub fn from_atomic(units: u128, decimals: u32) -> String {
    if decimals == 0 {
        return units.to_string();
    }
    let Some(scale) = 10u128.checked_pow(decimals) else {
        return units.to_string();
    };
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Amount reduced by `bps` basis points, rounded down.
pub fn apply_slippage(amount: u128, bps: u32) -> u128 {
    let bps = (bps as u128).min(BPS_DENOMINATOR);
    mul_div(amount, BPS_DENOMINATOR - bps, BPS_DENOMINATOR)
}

/// Price impact fraction expressed in whole basis points, rounded up.
pub fn fraction_to_bps(fraction: f64) -> u32 {
    if !fraction.is_finite() || fraction <= 0.0 {
        return 0;
    }
    // epsilon keeps exact values like 0.015 from rounding up to the next bp
    let bps = (fraction * BPS_DENOMINATOR as f64 - 1e-6).ceil();
    if bps >= u32::MAX as f64 {
        u32::MAX
    } else {
        bps as u32
    }
}

/// `value * num / den` without intermediate overflow for the amounts we handle.
pub fn mul_div(value: u128, num: u128, den: u128) -> u128 {
    if den == 0 {
        return 0;
    }
    match value.checked_mul(num) {
        Some(v) => v / den,
        None => (value / den) * num + (value % den) * num / den,
    }
}
