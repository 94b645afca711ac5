use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A validated catalog item
///
/// `upc` is the natural key and the record's only identity: two records with
/// the same `upc` are the same item no matter how the other fields differ.
/// Serializes to exactly the output store schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub availability: Availability,
    pub upc: String,
    #[serde(with = "price_number")]
    pub price_excl_tax: Decimal,
    #[serde(with = "price_number")]
    pub tax: Decimal,
}

/// Canonical stock status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    InStock { available: Option<u32> },
    OutOfStock,
    /// Text that matched neither canonical form, whitespace-collapsed
    Other(String),
}

impl FromStr for Availability {
    type Err = std::convert::Infallible;

    /// Parses whitespace-collapsed availability text
    ///
    /// `In stock (22 available)`, `In stock`, and `Out of stock` are matched
    /// case-insensitively; anything else is kept verbatim.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let lower = text.to_ascii_lowercase();

        if lower.starts_with("out of stock") {
            return Ok(Self::OutOfStock);
        }

        if let Some(rest) = lower.strip_prefix("in stock") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(Self::InStock { available: None });
            }
            let count = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .and_then(|r| r.trim().strip_suffix("available"))
                .and_then(|r| r.trim().parse::<u32>().ok());
            if let Some(count) = count {
                return Ok(Self::InStock {
                    available: Some(count),
                });
            }
        }

        Ok(Self::Other(text.to_string()))
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InStock {
                available: Some(count),
            } => write!(f, "In stock ({} available)", count),
            Self::InStock { available: None } => f.write_str("In stock"),
            Self::OutOfStock => f.write_str("Out of stock"),
            Self::Other(text) => f.write_str(text),
        }
    }
}

impl Serialize for Availability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Availability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(text.parse().unwrap_or(Self::Other(text)))
    }
}

/// Prices are fixed-point in memory and plain JSON numbers on disk
mod price_number {
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let number = value
            .to_f64()
            .ok_or_else(|| serde::ser::Error::custom(format!("price {} out of range", value)))?;
        serializer.serialize_f64(number)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let number = f64::deserialize(deserializer)?;
        // f64 Display is the shortest text that round-trips, so 51.77 stays 51.77
        let value = Decimal::from_str(&number.to_string()).map_err(de::Error::custom)?;
        if value.is_sign_negative() {
            return Err(de::Error::custom(format!("negative price {}", value)));
        }
        Ok(value)
    }
}
