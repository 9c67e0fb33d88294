pub mod error;
pub mod kafka;
pub mod telemetry;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub use error::ApiError;

/// Column headers every import file must carry, in the order they are
/// serialized onto the queue.
pub const CSV_HEADERS: [&str; 4] = ["Title", "Description", "Price", "Count"];

/// One parsed CSV row in transit between the file parser and the batch
/// consumer. Numeric fields stay text so no precision is lost on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestionMessage {
    pub title: String,
    pub description: String,
    pub price: String,
    pub count: String,
}

/// A row that passed validation and is ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub count: i32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Price must be a non-negative decimal, got {0:?}")]
    InvalidPrice(String),

    #[error("Count must be a non-negative integer, got {0:?}")]
    InvalidCount(String),
}

/// Largest declared precision Postgres accepts for `NUMERIC(p, s)`.
pub const MAX_PRICE_DIGITS: usize = 1000;

/// Parses plain decimal text: digits with an optional fraction, no sign other
/// than `+`, no exponent. Negative prices are rejected by the caller.
fn parse_price(text: &str) -> Option<BigDecimal> {
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((_, "")) => return None,
        Some(parts) => parts,
        None => (unsigned, ""),
    };

    let plain = |digits: &str| digits.bytes().all(|b| b.is_ascii_digit());
    if integer.is_empty() || !plain(integer) || !plain(fraction) {
        return None;
    }
    if integer.len() + fraction.len() > MAX_PRICE_DIGITS {
        return None;
    }

    BigDecimal::from_str(unsigned).ok()
}

impl IngestionMessage {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        price: impl Into<String>,
        count: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            price: price.into(),
            count: count.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn validate(&self) -> Result<CatalogItem, ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Empty("Title"));
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::Empty("Description"));
        }

        let price = parse_price(self.price.trim())
            .filter(|price| *price >= BigDecimal::zero())
            .ok_or_else(|| ValidationError::InvalidPrice(self.price.clone()))?;

        let count = self
            .count
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|count| *count >= 0)
            .ok_or_else(|| ValidationError::InvalidCount(self.count.clone()))?;

        Ok(CatalogItem {
            title: self.title.clone(),
            description: self.description.clone(),
            price,
            count,
        })
    }
}
