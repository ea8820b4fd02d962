//! crates/trip_tracker_core/src/amounts.rs
//!
//! Money handling: cent rounding, GST splitting for receipts and earnings parsing.
//!
//! GST is 10%. A GST-inclusive total therefore carries total/11 of tax.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ValidationError;

/// 0.10
pub const GST_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
/// 1.10
const GST_MULTIPLIER: Decimal = Decimal::from_parts(11, 0, 0, false, 1);
/// 11
const GST_DIVISOR: Decimal = Decimal::from_parts(11, 0, 0, false, 0);
/// Largest amount accepted on a receipt.
pub const MAX_RECEIPT_AMOUNT: u32 = 10_000_000;

/// Largest trip earnings the `trips.earnings` column (`NUMERIC(12,2)`) holds.
pub const MAX_EARNINGS: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Rounds to two decimal places, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Subtotal, GST and total of a receipt, all rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptAmounts {
    pub subtotal: Decimal,
    pub gst: Decimal,
    pub total: Decimal,
}

/// Which figure the user typed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountMode {
    Total,
    Subtotal,
}

/// A receipt amount as entered: either GST-inclusive or GST-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum AmountEntry {
    Total(Decimal),
    Subtotal(Decimal),
}

impl AmountEntry {
    pub fn mode(&self) -> AmountMode {
        match self {
            AmountEntry::Total(_) => AmountMode::Total,
            AmountEntry::Subtotal(_) => AmountMode::Subtotal,
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            AmountEntry::Total(value) | AmountEntry::Subtotal(value) => *value,
        }
    }

    /// Splits the entered figure into subtotal, GST and total.
    pub fn resolve(&self) -> ReceiptAmounts {
        match *self {
            AmountEntry::Total(value) => {
                let total = round_cents(value);
                let gst = round_cents(total / GST_DIVISOR);
                let subtotal = round_cents(total - gst);
                ReceiptAmounts { subtotal, gst, total }
            }
            AmountEntry::Subtotal(value) => {
                let subtotal = round_cents(value);
                let gst = round_cents(subtotal * GST_RATE);
                let total = round_cents(subtotal + gst);
                ReceiptAmounts { subtotal, gst, total }
            }
        }
    }

    /// Converts the entered figure when the user flips between total and
    /// subtotal entry. Non-positive values are carried over unchanged.
    pub fn switch_to(self, mode: AmountMode) -> AmountEntry {
        match (self, mode) {
            (AmountEntry::Subtotal(sub), AmountMode::Total) if sub > Decimal::ZERO => {
                AmountEntry::Total(round_cents(sub * GST_MULTIPLIER))
            }
            (AmountEntry::Subtotal(sub), AmountMode::Total) => AmountEntry::Total(sub),
            (AmountEntry::Total(total), AmountMode::Subtotal) if total > Decimal::ZERO => {
                AmountEntry::Subtotal(round_cents(total / GST_MULTIPLIER))
            }
            (AmountEntry::Total(total), AmountMode::Subtotal) => AmountEntry::Subtotal(total),
            (entry, _) => entry,
        }
    }
}

/// Cleans free-form amount input: keeps digits and the first decimal point,
/// and cuts the fraction to two places.
pub fn sanitize_amount_input(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    match cleaned.split_once('.') {
        Some((whole, fraction)) => {
            let fraction: String = fraction.chars().filter(|c| *c != '.').take(2).collect();
            format!("{whole}.{fraction}")
        }
        None => cleaned,
    }
}

/// Parses a receipt amount: must be positive and no larger than [`MAX_RECEIPT_AMOUNT`].
pub fn parse_receipt_amount(input: &str) -> Result<Decimal, ValidationError> {
    let sanitized = sanitize_amount_input(input);
    let value = Decimal::from_str(&sanitized).map_err(|_| ValidationError::AmountRequired)?;
    if value <= Decimal::ZERO {
        return Err(ValidationError::AmountRequired);
    }
    if value > Decimal::from(MAX_RECEIPT_AMOUNT) {
        return Err(ValidationError::AmountOutOfRange {
            max: MAX_RECEIPT_AMOUNT,
        });
    }
    Ok(value)
}

/// Parses trip earnings. Blank input means "not entered" and is kept absent
/// rather than coerced to zero.
pub fn parse_earnings(input: Option<&str>) -> Result<Option<Decimal>, ValidationError> {
    let Some(raw) = input.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    let value = Decimal::from_str(raw.trim_start_matches('$'))
        .map_err(|_| ValidationError::InvalidEarnings(raw.to_string()))?;
    let rounded = round_cents(value);
    if (value.is_sign_negative() && !value.is_zero()) || rounded > MAX_EARNINGS {
        return Err(ValidationError::InvalidEarnings(raw.to_string()));
    }
    Ok(Some(rounded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn total_inclusive_entry_splits_out_gst() {
        let amounts = AmountEntry::Total(dec("110.00")).resolve();
        assert_eq!(amounts.subtotal, dec("100.00"));
        assert_eq!(amounts.gst, dec("10.00"));
        assert_eq!(amounts.total, dec("110.00"));
    }

    #[test]
    fn subtotal_entry_adds_gst() {
        let amounts = AmountEntry::Subtotal(dec("100.00")).resolve();
        assert_eq!(amounts.gst, dec("10.00"));
        assert_eq!(amounts.total, dec("110.00"));
    }

    #[test]
    fn switching_modes_back_and_forth_stays_within_a_cent() {
        for raw in ["110.00", "99.99", "0.01", "12.34", "1234567.89"] {
            let original = AmountEntry::Total(dec(raw));
            let round_trip = original
                .switch_to(AmountMode::Subtotal)
                .switch_to(AmountMode::Total);
            let diff = (round_trip.value() - original.value()).abs();
            assert!(diff <= dec("0.01"), "{raw} drifted to {}", round_trip.value());
        }
        let subtotal = AmountEntry::Subtotal(dec("100.00"));
        assert_eq!(
            subtotal.switch_to(AmountMode::Total),
            AmountEntry::Total(dec("110.00"))
        );
        assert_eq!(
            subtotal.switch_to(AmountMode::Total).switch_to(AmountMode::Subtotal),
            subtotal
        );
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_cents(dec("0.005")), dec("0.01"));
        assert_eq!(round_cents(dec("-0.005")), dec("-0.01"));
        assert_eq!(round_cents(dec("2.344")), dec("2.34"));
    }

    #[test]
    fn sanitize_strips_noise_and_extra_decimals() {
        assert_eq!(sanitize_amount_input(" $1,234.567 "), "1234.56");
        assert_eq!(sanitize_amount_input("1.2.3"), "1.23");
        assert_eq!(sanitize_amount_input("42"), "42");
    }

    #[test]
    fn receipt_amount_bounds() {
        assert_eq!(parse_receipt_amount("0"), Err(ValidationError::AmountRequired));
        assert_eq!(parse_receipt_amount(""), Err(ValidationError::AmountRequired));
        assert!(matches!(
            parse_receipt_amount("10000001"),
            Err(ValidationError::AmountOutOfRange { .. })
        ));
        assert_eq!(parse_receipt_amount("25.5").unwrap(), dec("25.5"));
    }

    #[test]
    fn earnings_blank_is_absent_not_zero() {
        assert_eq!(parse_earnings(None).unwrap(), None);
        assert_eq!(parse_earnings(Some("   ")).unwrap(), None);
        assert_eq!(parse_earnings(Some("42.5")).unwrap(), Some(dec("42.50")));
        assert_eq!(parse_earnings(Some("$10.005")).unwrap(), Some(dec("10.01")));
        assert!(parse_earnings(Some("-3")).is_err());
        assert!(parse_earnings(Some("lots")).is_err());
    }

    #[test]
    fn earnings_must_fit_the_stored_precision() {
        assert_eq!(MAX_EARNINGS, dec("9999999999.99"));
        assert_eq!(
            parse_earnings(Some("9999999999.99")).unwrap(),
            Some(dec("9999999999.99"))
        );
        assert!(matches!(
            parse_earnings(Some("99999999999999")),
            Err(ValidationError::InvalidEarnings(_))
        ));
        assert!(parse_earnings(Some("9999999999.995")).is_err());
    }
}
