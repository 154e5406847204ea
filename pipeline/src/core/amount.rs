//! Currency amount parsing and rounding.
//!
//! Money is always `Decimal`; nothing here touches floating point.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

/// Amounts must stay strictly below this magnitude (10^15), so VAT and total
/// arithmetic on accepted amounts cannot overflow.
pub const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000_000;

/// Parse a raw amount string.
///
/// Accepts an optional sign, an optional leading currency symbol (`£`, `€`, `$`)
/// and `,` thousands separators. Rejects more significant fractional digits
/// than `precision` (trailing zeros don't count): rounding an extracted value
/// would be a silent correction. Rejects magnitudes of [`MAX_AMOUNT_UNITS`]
/// or more.
pub fn parse_amount(raw: &str, precision: u32) -> Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty amount".to_string());
    }

    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed).trim_start()),
    };
    let rest = rest
        .strip_prefix(['£', '€', '$'])
        .unwrap_or(rest)
        .trim_start();
    let digits: String = rest.chars().filter(|ch| *ch != ',').collect();

    if digits.is_empty()
        || !digits
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch == '.')
        || digits.matches('.').count() > 1
    {
        return Err(format!("'{raw}' is not a decimal amount"));
    }

    let value = Decimal::from_str(&digits).map_err(|err| format!("'{raw}': {err}"))?;
    if value.abs() >= Decimal::from(MAX_AMOUNT_UNITS) {
        return Err(format!("'{raw}' is out of range"));
    }
    if value.normalize().scale() > precision {
        return Err(format!(
            "'{raw}' has more than {precision} decimal places"
        ));
    }
    Ok(if negative { -value } else { value })
}

/// Round half away from zero and fix the scale to exactly `precision` digits.
pub fn round_currency(value: Decimal, precision: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(precision);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

/// VAT due on `net` at `rate_percent`, rounded to currency precision.
/// `None` when the product is out of `Decimal` range.
pub fn vat_for(net: Decimal, rate_percent: Decimal, precision: u32) -> Option<Decimal> {
    net.checked_mul(rate_percent)
        .and_then(|gross| gross.checked_div(Decimal::ONE_HUNDRED))
        .map(|vat| round_currency(vat, precision))
}

/// True when `left` and `right` differ by no more than `tolerance`.
pub fn within_tolerance(left: Decimal, right: Decimal, tolerance: Decimal) -> bool {
    left.checked_sub(right)
        .is_some_and(|difference| difference.abs() <= tolerance)
}
