//! Decimal helpers for prices and amounts
//!
//! All money fields travel as decimal strings with 18 fractional digits and
//! are held as `rust_decimal::Decimal` in memory. Binary floating point never
//! touches the match path, so two nodes computing the same fills format the
//! same bytes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Fractional digits carried by every wire-level amount and price.
pub const WIRE_SCALE: u32 = 18;

/// One whole token expressed in base units (10^18).
pub const BASE_UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Format a decimal with exactly 18 fractional digits.
///
/// Mirrors the canonical wire rendering, e.g. `50` becomes
/// `"50.000000000000000000"`.
pub fn format_fixed(value: Decimal) -> String {
    let mut v = value;
    v.rescale(WIRE_SCALE);
    v.to_string()
}

/// Parse a decimal string; empty or malformed input maps to zero.
///
/// Inbound payloads are externally produced, so a bad amount is treated as
/// "nothing left" rather than an error — validation of required fields
/// happens separately at ingest.
pub fn parse_or_zero(s: &str) -> Decimal {
    s.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

/// Convert a token amount to integer base units (`amount * 10^18`),
/// truncating any sub-unit residue. Negative amounts map to zero.
pub fn base_units(amount: Decimal) -> u128 {
    if amount <= Decimal::ZERO {
        return 0;
    }
    let scaled = amount * Decimal::from(1_000_000_000_000_000_000u64);
    scaled.trunc().to_u128().unwrap_or(0)
}

/// Serde adapter: `Decimal` as an 18-digit decimal string.
pub mod decimal_str {
    use super::format_fixed;
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_fixed(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Decimal::ZERO);
        }
        s.parse::<Decimal>().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `u128` as a decimal string (JSON numbers cap at 64 bits).
pub mod u128_str {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_fixed_pads_to_18_digits() {
        assert_eq!(format_fixed(dec!(50)), "50.000000000000000000");
        assert_eq!(format_fixed(dec!(1.5)), "1.500000000000000000");
        assert_eq!(format_fixed(Decimal::ZERO), "0.000000000000000000");
    }

    #[test]
    fn test_format_fixed_is_deterministic() {
        let a = parse_or_zero("0.100000000000000000");
        let b = parse_or_zero("0.1");
        assert_eq!(format_fixed(a), format_fixed(b));
    }

    #[test]
    fn test_parse_or_zero_handles_garbage() {
        assert_eq!(parse_or_zero(""), Decimal::ZERO);
        assert_eq!(parse_or_zero("not-a-number"), Decimal::ZERO);
        assert_eq!(parse_or_zero("2.75"), dec!(2.75));
    }

    #[test]
    fn test_base_units() {
        assert_eq!(base_units(dec!(1)), BASE_UNITS_PER_TOKEN);
        assert_eq!(base_units(dec!(0.5)), BASE_UNITS_PER_TOKEN / 2);
        assert_eq!(base_units(dec!(-3)), 0);
        assert_eq!(base_units(Decimal::ZERO), 0);
    }

    #[test]
    fn test_base_units_truncates_sub_unit_residue() {
        // 18 fractional digits is the finest granularity; anything below
        // one base unit is dropped, not rounded.
        let tiny = parse_or_zero("0.000000000000000001");
        assert_eq!(base_units(tiny), 1);
    }
}
