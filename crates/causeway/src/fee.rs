//! Exact fee-rate arithmetic for the bridge exchange.
//!
//! A fee rate arrives as an `f64` (e.g. 0.1 for 10%). All math here treats
//! `1 + rate` as the exact binary rational behind that float and then stays
//! in integers, so quoting can round strictly upward and coverage checks are
//! exact. Returns None for a non-finite or negative rate (and for the
//! theoretical overflow of a u128 result); callers map that to their own
//! error.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

/// Exact value of a non-negative finite f64 as numerator/denominator.
fn ratio_of(x: f64) -> Option<(BigUint, BigUint)> {
    if !x.is_finite() || x < 0.0 {
        return None;
    }
    if x == 0.0 {
        return Some((BigUint::zero(), BigUint::one()));
    }
    let (mantissa, exponent, _sign) = num_traits::float::FloatCore::integer_decode(x);
    let mantissa = BigUint::from(mantissa);
    if exponent >= 0 {
        Some((mantissa << exponent as usize, BigUint::one()))
    } else {
        Some((mantissa, BigUint::one() << (-exponent) as usize))
    }
}

/// `1 + rate` as an exact rational.
fn rate_factor(fee_rate: f64) -> Option<(BigUint, BigUint)> {
    ratio_of(1.0 + fee_rate)
}

/// Amount a depositor must transfer so that `gas_price * gas` plus the fee
/// margin is always covered: `gas_price * gas * (1 + fee_rate)`, truncated,
/// plus one whole `gas_price` unit whenever truncation lost anything. Never
/// under-quotes.
pub(crate) fn required_transfer_amount(gas_price: u128, gas: u64, fee_rate: f64) -> Option<u128> {
    let (num, den) = rate_factor(fee_rate)?;
    let fee = BigUint::from(gas_price) * BigUint::from(gas);
    let exact = fee * num;
    let mut amount = &exact / &den;
    if &amount * &den < exact {
        amount += BigUint::from(gas_price);
    }
    amount.to_u128()
}

/// Fee budget implied by a deposit: `deposit / (1 + fee_rate)` as an exact
/// rational `(numerator, denominator)`.
fn fee_budget(deposit: u128, fee_rate: f64) -> Option<(BigUint, BigUint)> {
    let (num, den) = rate_factor(fee_rate)?;
    Some((BigUint::from(deposit) * den, num))
}

/// Gas price implied by spending the whole fee budget over `gas` units,
/// truncated toward zero.
pub(crate) fn derive_gas_price(deposit: u128, fee_rate: f64, gas: u64) -> Option<u128> {
    if gas == 0 {
        return None;
    }
    let (num, den) = fee_budget(deposit, fee_rate)?;
    (num / (den * BigUint::from(gas))).to_u128()
}

/// Whether the deposit's fee budget covers `gas * gas_price`.
pub(crate) fn covers_transaction_fee(
    deposit: u128,
    fee_rate: f64,
    gas: u64,
    gas_price: u128,
) -> Option<bool> {
    let (num, den) = fee_budget(deposit, fee_rate)?;
    let cost = BigUint::from(gas) * BigUint::from(gas_price) * den;
    Some(num >= cost)
}
