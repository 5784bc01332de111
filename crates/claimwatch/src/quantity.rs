//! Storage quantities with power-of-1024 units.
//!
//! A [`Quantity`] is always held normalized to an exact signed byte count, so
//! addition, subtraction, and ordering never mix units. Literals such as
//! `"150Gi"` are parsed with [`str::parse`]; decimal fractions are exact and
//! fractional bytes round up, the same way the cluster rounds resource
//! requests. Formatting picks the largest binary unit that keeps the
//! magnitude at or above one and rounds to two places; the serde form is the
//! exact literal from [`Quantity::to_literal`] instead.

use core::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WatchError;

/// Longest numeric part accepted in a literal. Keeps every intermediate product inside i128.
const MAX_NUMBER_DIGITS: usize = 24;

/// Binary (power-of-1024) storage units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Unit {
    /// Plain bytes, written without a suffix.
    Bytes,
    /// 1024 bytes
    Ki,
    /// 1024^2 bytes
    Mi,
    /// 1024^3 bytes
    Gi,
    /// 1024^4 bytes
    Ti,
    /// 1024^5 bytes
    Pi,
    /// 1024^6 bytes
    Ei,
}

impl Unit {
    /// Returns the number of bytes in one unit.
    pub fn factor(&self) -> i128 {
        match self {
            Unit::Bytes => 1,
            Unit::Ki => 1 << 10,
            Unit::Mi => 1 << 20,
            Unit::Gi => 1 << 30,
            Unit::Ti => 1 << 40,
            Unit::Pi => 1 << 50,
            Unit::Ei => 1 << 60,
        }
    }

    /// Returns the literal suffix for this unit.
    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::Bytes => "",
            Unit::Ki => "Ki",
            Unit::Mi => "Mi",
            Unit::Gi => "Gi",
            Unit::Ti => "Ti",
            Unit::Pi => "Pi",
            Unit::Ei => "Ei",
        }
    }

    /// Returns the unit for a binary suffix, or None if unsupported.
    pub fn from_suffix(suffix: &str) -> Option<Unit> {
        Unit::all().iter().copied().find(|u| u.suffix() == suffix)
    }

    /// Returns all units in ascending order.
    pub fn all() -> &'static [Unit] {
        &[
            Unit::Bytes,
            Unit::Ki,
            Unit::Mi,
            Unit::Gi,
            Unit::Ti,
            Unit::Pi,
            Unit::Ei,
        ]
    }

    fn next(&self) -> Option<Unit> {
        let all = Unit::all();
        all.iter()
            .position(|u| u == self)
            .and_then(|i| all.get(i + 1))
            .copied()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Bytes => write!(f, "B"),
            other => write!(f, "{}", other.suffix()),
        }
    }
}

/// Decimal SI suffixes the cluster also accepts for storage requests.
fn decimal_factor(suffix: &str) -> Option<i128> {
    match suffix {
        "k" => Some(1_000),
        "M" => Some(1_000_000),
        "G" => Some(1_000_000_000),
        "T" => Some(1_000_000_000_000),
        "P" => Some(1_000_000_000_000_000),
        "E" => Some(1_000_000_000_000_000_000),
        _ => None,
    }
}

/// An immutable storage size, normalized to bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    bytes: i128,
}

impl Quantity {
    /// The zero quantity.
    pub const ZERO: Quantity = Quantity { bytes: 0 };

    /// Creates a quantity from a byte count.
    pub fn from_bytes(bytes: i128) -> Self {
        Self { bytes }
    }

    /// Creates a quantity of `value` whole units.
    pub fn new(value: i64, unit: Unit) -> Self {
        Self {
            bytes: value as i128 * unit.factor(),
        }
    }

    /// Returns the size in bytes.
    pub fn bytes(&self) -> i128 {
        self.bytes
    }

    /// Returns true if the quantity is below zero.
    pub fn is_negative(&self) -> bool {
        self.bytes < 0
    }

    /// Returns the largest unit that keeps the magnitude at or above one.
    pub fn display_unit(&self) -> Unit {
        let magnitude = self.bytes.abs();
        Unit::all()
            .iter()
            .rev()
            .copied()
            .find(|u| magnitude >= u.factor())
            .unwrap_or(Unit::Bytes)
    }

    /// Returns the magnitude expressed in `unit`. Lossy; use for display and ratios only.
    pub fn as_unit(&self, unit: Unit) -> f64 {
        self.bytes as f64 / unit.factor() as f64
    }

    /// Returns `self / max * 100`, or 0.0 when `max` is not positive.
    pub fn percent_of(&self, max: &Quantity) -> f64 {
        if max.bytes <= 0 {
            return 0.0;
        }
        (self.bytes as f64 / max.bytes as f64) * 100.0
    }

    /// Exact literal: whole multiples of the largest binary unit that divides
    /// the byte count, else bare bytes. Parses back to the same quantity.
    pub fn to_literal(&self) -> String {
        if self.bytes == 0 {
            return "0".to_string();
        }
        let unit = Unit::all()
            .iter()
            .rev()
            .copied()
            .find(|u| self.bytes % u.factor() == 0)
            .unwrap_or(Unit::Bytes);
        format!("{}{}", self.bytes / unit.factor(), unit.suffix())
    }

    /// Parses a size literal such as `"150Gi"`, `"1.5Ti"`, `"10G"` or `"4096"`.
    pub fn parse(text: &str) -> Result<Self, WatchError> {
        if text.is_empty() {
            return Err(WatchError::malformed(text, "empty literal"));
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, suffix) = text.split_at(split);

        if number.is_empty() {
            return Err(WatchError::malformed(text, "missing number"));
        }
        if number.len() > MAX_NUMBER_DIGITS {
            return Err(WatchError::malformed(text, "number out of range"));
        }

        let factor = match Unit::from_suffix(suffix) {
            Some(unit) => unit.factor(),
            None => decimal_factor(suffix)
                .ok_or_else(|| WatchError::malformed(text, format!("unknown unit suffix {:?}", suffix)))?,
        };

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if fraction.contains('.') {
            return Err(WatchError::malformed(text, "more than one decimal point"));
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(WatchError::malformed(text, "missing digits"));
        }

        let digits = format!("{}{}", whole, fraction);
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| WatchError::malformed(text, "invalid digits"))?;
        let scale = 10i128.pow(fraction.len() as u32);

        // Fractional bytes round up.
        let rounded = mantissa
            .checked_mul(factor)
            .and_then(|scaled| scaled.checked_add(scale - 1))
            .ok_or_else(|| WatchError::malformed(text, "number out of range"))?;

        Ok(Self {
            bytes: rounded / scale,
        })
    }
}

impl FromStr for Quantity {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl TryFrom<String> for Quantity {
    type Error = WatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Quantity::parse(&value)
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.to_literal()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut unit = self.display_unit();
        let factor = unit.factor();
        if self.bytes % factor == 0 {
            return write!(f, "{}{}", self.bytes / factor, unit.suffix());
        }
        // Rounding may carry into the next unit, as with 1Mi less one byte.
        if (self.as_unit(unit).abs() * 100.0).round() >= 102_400.0 {
            if let Some(next) = unit.next() {
                unit = next;
            }
        }
        let rendered = format!("{:.2}", self.as_unit(unit));
        let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
        write!(f, "{}{}", trimmed, unit.suffix())
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            bytes: self.bytes.saturating_add(rhs.bytes),
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        *self = *self + rhs;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity {
            bytes: self.bytes.saturating_sub(rhs.bytes),
        }
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        *self = *self - rhs;
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity { bytes: -self.bytes }
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Quantity {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(q("1Ki").bytes(), 1024);
        assert_eq!(q("1Mi").bytes(), 1024 * 1024);
        assert_eq!(q("150Gi").bytes(), 150 * (1i128 << 30));
        assert_eq!(q("2Ti").bytes(), 2 * (1i128 << 40));
        assert_eq!(q("1Pi").bytes(), 1i128 << 50);
        assert_eq!(q("1Ei").bytes(), 1i128 << 60);
    }

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(q("4096").bytes(), 4096);
        assert_eq!(q("0").bytes(), 0);
    }

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(q("1k").bytes(), 1000);
        assert_eq!(q("10G").bytes(), 10_000_000_000);
        assert_eq!(q("3T").bytes(), 3_000_000_000_000);
    }

    #[test]
    fn test_parse_fraction_exact() {
        assert_eq!(q("1.5Gi").bytes(), 3 * (1i128 << 29));
        assert_eq!(q("0.5Ki").bytes(), 512);
        assert_eq!(q(".5Ki").bytes(), 512);
        assert_eq!(q("2.Mi").bytes(), 2 * (1i128 << 20));
    }

    #[test]
    fn test_parse_fractional_bytes_round_up() {
        // 0.3 * 1024 = 307.2
        assert_eq!(q("0.3Ki").bytes(), 308);
        assert_eq!(q("1.5").bytes(), 2);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "", "Gi", "12Qi", "12gi", "1.2.3Gi", "-5Gi", "+5Gi", "1e3", " 5Gi", "5Gi ", "5 Gi", ".", ".Gi",
            "1Kii", "ten",
        ] {
            let err = Quantity::parse(bad).unwrap_err();
            assert!(
                matches!(err, WatchError::MalformedQuantity { .. }),
                "expected MalformedQuantity for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = Quantity::parse("9999999999999999999999999999Ei").unwrap_err();
        assert!(matches!(err, WatchError::MalformedQuantity { .. }));
    }

    #[test]
    fn test_arithmetic_normalizes_units() {
        let total = q("1Gi") + q("512Mi");
        assert_eq!(total, q("1.5Gi"));
        assert_eq!(q("1Gi") - q("1024Mi"), Quantity::ZERO);
    }

    #[test]
    fn test_subtract_can_go_negative() {
        let diff = q("10Gi") - q("20Gi");
        assert!(diff.is_negative());
        assert_eq!(diff, -q("10Gi"));
    }

    #[test]
    fn test_ordering_across_units() {
        assert!(q("1Ti") > q("1023Gi"));
        assert!(q("1024Mi") == q("1Gi"));
        assert!(q("1G") < q("1Gi"));
    }

    #[test]
    fn test_display_largest_unit() {
        assert_eq!(q("160Gi").to_string(), "160Gi");
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("1.5Gi").to_string(), "1.5Gi");
        assert_eq!(q("2048Gi").to_string(), "2Ti");
        assert_eq!(q("512").to_string(), "512");
        assert_eq!(Quantity::ZERO.to_string(), "0");
        assert_eq!((-q("10Gi")).to_string(), "-10Gi");
    }

    #[test]
    fn test_display_rounds_to_two_places() {
        assert_eq!(q("10G").to_string(), "9.31Gi");
    }

    #[test]
    fn test_display_carries_into_next_unit() {
        let almost = q("1Mi") - Quantity::from_bytes(1);
        assert_eq!(almost.to_string(), "1Mi");
        let almost = q("1Gi") - Quantity::from_bytes(1);
        assert_eq!(almost.to_string(), "1Gi");
        assert_eq!(q("1023Ki").to_string(), "1023Ki");
    }

    #[test]
    fn test_literal_is_exact() {
        assert_eq!(q("150Gi").to_literal(), "150Gi");
        assert_eq!(q("10G").to_literal(), "9765625Ki");
        assert_eq!(q("161061273599").to_literal(), "161061273599");
        assert_eq!(q("1.5Gi").to_literal(), "1536Mi");
        assert_eq!(Quantity::ZERO.to_literal(), "0");
    }

    #[test]
    fn test_percent_of() {
        let pct = q("75Gi").percent_of(&q("150Gi"));
        assert!((pct - 50.0).abs() < 1e-9);
        assert_eq!(q("1Gi").percent_of(&Quantity::ZERO), 0.0);
    }

    #[test]
    fn test_sum() {
        let all = vec![q("50Gi"), q("50Gi"), q("50Gi")];
        let total: Quantity = all.iter().sum();
        assert_eq!(total, q("150Gi"));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&q("150Gi")).unwrap();
        assert_eq!(json, "\"150Gi\"");
        let back: Quantity = serde_json::from_str("\"1.5Ti\"").unwrap();
        assert_eq!(back, q("1536Gi"));
        assert!(serde_json::from_str::<Quantity>("\"lots\"").is_err());
    }

    #[test]
    fn test_serde_round_trip_is_exact() {
        for literal in ["10G", "161061273599", "1.5Gi", "0.3Ki", "7T"] {
            let original = q(literal);
            let json = serde_json::to_string(&original).unwrap();
            let back: Quantity = serde_json::from_str(&json).unwrap();
            assert_eq!(back, original, "{} serialized as {}", literal, json);
        }
    }

    #[test]
    fn test_unit_from_suffix() {
        assert_eq!(Unit::from_suffix("Gi"), Some(Unit::Gi));
        assert_eq!(Unit::from_suffix(""), Some(Unit::Bytes));
        assert_eq!(Unit::from_suffix("G"), None);
    }
}
