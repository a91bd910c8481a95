//! Pip-size conversions shared across providers and position math
//!
//! A pip is the standardized price increment for a quote precision: the
//! fourth decimal place for 4/5-digit symbols, the second for 2/3-digit
//! (JPY-style) symbols. Deriving it from the symbol's digits keeps one
//! definition instead of scattering 0.0010 constants around.

use rust_decimal::Decimal;

/// Pip size for a symbol quoted with `digits` decimal places
pub fn pip_size(digits: u32) -> Decimal {
    if digits <= 3 {
        Decimal::new(1, 2) // 0.01
    } else {
        Decimal::new(1, 4) // 0.0001
    }
}

/// Price distance of `count` pips for a symbol with `digits` decimal places
pub fn pips(count: i64, digits: u32) -> Decimal {
    pip_size(digits) * Decimal::from(count)
}

/// Distance between two prices expressed in pips
pub fn price_to_pips(distance: Decimal, digits: u32) -> Decimal {
    distance / pip_size(digits)
}
