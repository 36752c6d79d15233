//! Conversions between raw integer token amounts and human decimal amounts.

use num_bigint::BigUint;

use crate::error::UnitsError;

/// 10^decimals
pub fn pow10(decimals: u8) -> BigUint {
    BigUint::from(10u32).pow(decimals as u32)
}

/// Parse a decimal string ("12.5") into raw units at `decimals` precision.
pub fn parse_units(text: &str, decimals: u8) -> Result<BigUint, UnitsError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(UnitsError::Empty);
    }
    if text.starts_with('-') {
        return Err(UnitsError::Negative);
    }

    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Malformed(text.to_string()));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(UnitsError::Malformed(text.to_string()));
    }

    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooManyDecimals { max: decimals });
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(frac);
    for _ in frac.len()..decimals as usize {
        digits.push('0');
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(BigUint::from(0u32));
    }

    BigUint::parse_bytes(digits.as_bytes(), 10).ok_or_else(|| UnitsError::Malformed(text.to_string()))
}

/// Render raw units as a decimal string, trimming trailing fractional zeros.
pub fn format_units(raw: &BigUint, decimals: u8) -> String {
    let digits = raw.to_str_radix(10);
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Lossy conversion of raw units to a float in asset terms.
pub fn to_float(raw: &BigUint, decimals: u8) -> f64 {
    biguint_to_f64(raw) / 10f64.powi(decimals as i32)
}

pub(crate) fn biguint_to_f64(value: &BigUint) -> f64 {
    value
        .to_u64_digits()
        .iter()
        .rev()
        .fold(0.0, |acc, &digit| acc * 18_446_744_073_709_551_616.0 + digit as f64)
}

/// Serialize `BigUint` as a base-10 string so JSON consumers never lose precision.
pub mod decimal_string {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(deserializer)?;
        BigUint::parse_bytes(text.trim().as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid integer: {:?}", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1", 6).unwrap(), BigUint::from(1_000_000u64));
        assert_eq!(parse_units("12.5", 6).unwrap(), BigUint::from(12_500_000u64));
        assert_eq!(parse_units(".25", 2).unwrap(), BigUint::from(25u32));
        assert_eq!(parse_units("0.000", 6).unwrap(), BigUint::from(0u32));
        assert_eq!(parse_units("3.10", 1).unwrap(), BigUint::from(31u32));
        assert_eq!(
            parse_units("1000", 18).unwrap(),
            BigUint::from(1000u32) * pow10(18)
        );
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert_eq!(parse_units("", 6), Err(UnitsError::Empty));
        assert_eq!(parse_units("-1", 6), Err(UnitsError::Negative));
        assert!(matches!(parse_units("1e5", 6), Err(UnitsError::Malformed(_))));
        assert!(matches!(parse_units(".", 6), Err(UnitsError::Malformed(_))));
        assert_eq!(
            parse_units("0.1234567", 6),
            Err(UnitsError::TooManyDecimals { max: 6 })
        );
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(&BigUint::from(12_500_000u64), 6), "12.5");
        assert_eq!(format_units(&BigUint::from(1u32), 6), "0.000001");
        assert_eq!(format_units(&BigUint::from(0u32), 6), "0");
        assert_eq!(format_units(&BigUint::from(42u32), 0), "42");
    }

    #[test]
    fn test_to_float_large_values() {
        let raw = BigUint::from(1_234_567u64) * pow10(18);
        assert!((to_float(&raw, 18) - 1_234_567.0).abs() < 1e-6);
        assert_eq!(to_float(&BigUint::from(0u32), 18), 0.0);
    }
}
