use std::str::FromStr;

use alloy_primitives::U256;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Integer quantity in the token's smallest unit together with the number
/// of decimals used to display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    #[serde(with = "tagged_uint")]
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        TokenAmount { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        TokenAmount {
            raw: U256::ZERO,
            decimals,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    /// Human amount as a float, `raw / 10^decimals`.
    pub fn to_f64(&self) -> f64 {
        let value = self
            .raw
            .as_limbs()
            .iter()
            .rev()
            .fold(0.0_f64, |acc, limb| acc * 2f64.powi(64) + *limb as f64);

        value / 10f64.powi(i32::from(self.decimals))
    }

    /// Exact human amount.
    pub fn to_decimal(&self) -> Result<BigDecimal, Error> {
        let value = BigDecimal::from_str(&format!("{}e-{}", self.raw, self.decimals))?;
        Ok(value)
    }

    /// Parses a human amount such as `"12.5"` into smallest units. Fractions
    /// finer than one smallest unit are rejected.
    pub fn from_decimal(value: &BigDecimal, decimals: u8) -> Result<TokenAmount, Error> {
        if value < &BigDecimal::from(0) {
            return Err(Error::invalid_input(
                format!("negative amount {}", value),
                "Please enter a valid amount greater than 0.",
            ));
        }

        let scaled = value * pow10(decimals)?;
        let integral = scaled.with_scale(0);

        if integral != scaled {
            return Err(Error::invalid_input(
                format!("amount {} has more than {} decimals", value, decimals),
                format!("Amounts support at most {} decimal places.", decimals),
            ));
        }

        let (digits, _) = integral.into_bigint_and_exponent();
        let raw = U256::from_str(&digits.to_string())?;

        Ok(TokenAmount { raw, decimals })
    }
}

pub fn pow10(decimals: u8) -> Result<BigDecimal, Error> {
    let value = BigDecimal::from_str(&format!("1e{}", decimals))?;
    Ok(value)
}

/// JSON encoding for integers that do not fit a float without loss:
/// `{"__type":"bigint","value":"<decimal digits>"}`.
///
/// Decoding also accepts a bare JSON integer or a decimal string so older
/// records stay readable.
pub mod tagged_uint {
    use std::str::FromStr;

    use alloy_primitives::U256;
    use serde::{de, ser::SerializeStruct, Deserialize, Deserializer, Serializer};

    pub const TYPE_TAG: &str = "bigint";

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("BigInt", 2)?;
        state.serialize_field("__type", TYPE_TAG)?;
        state.serialize_field("value", &value.to_string())?;
        state.end()
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Tagged {
            #[serde(rename = "__type")]
            kind: String,
            value: String,
        },
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Encoded::deserialize(deserializer)? {
            Encoded::Tagged { kind, value } => {
                if kind != TYPE_TAG {
                    return Err(de::Error::custom(format!("unexpected type tag {}", kind)));
                }
                parse_decimal(&value).map_err(de::Error::custom)
            },
            Encoded::Text(value) => parse_decimal(&value).map_err(de::Error::custom),
            Encoded::Number(value) => Ok(U256::from(value)),
        }
    }

    fn parse_decimal(value: &str) -> Result<U256, String> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid bigint digits {:?}", value));
        }
        U256::from_str(value).map_err(|e| e.to_string())
    }
}
