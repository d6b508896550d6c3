use bigdecimal::BigDecimal;
use num_bigint::BigInt;

/// Base units -> display units. Exact; the scale is just moved.
pub fn to_display(raw: &BigInt, decimals: u32) -> BigDecimal {
    BigDecimal::new(raw.clone(), decimals as i64)
}

/// Display units -> base units, truncating anything below one base unit.
pub fn from_display(amount: &BigDecimal, decimals: u32) -> BigInt {
    let scaled = amount * BigDecimal::new(BigInt::from(1), -(decimals as i64));
    let (digits, scale) = scaled.with_scale(0).into_bigint_and_exponent();
    debug_assert_eq!(scale, 0);
    digits
}

/// Rounded display string used by the bot and the API summaries.
pub fn format_amount(amount: &BigDecimal, places: i64) -> String {
    amount.with_scale_round(places, bigdecimal::RoundingMode::HalfUp).to_string()
}

/// Serialize big integers as decimal strings so JSON consumers never lose
/// precision.
pub mod bigint_string {
    use num_bigint::BigInt;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigInt, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigInt, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<BigInt>().map_err(D::Error::custom)
    }
}
