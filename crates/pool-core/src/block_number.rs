//! Block numbers stay `u64` in memory and cross the API boundary as decimal strings.
//!
//! Use on `Option<u64>` fields with
//! `#[serde(default, skip_serializing_if = "Option::is_none", with = "pool_core::block_number")]`.
//! Deserialization accepts a decimal string, a `0x`-prefixed hex string, or a JSON number.

use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(number) => serializer.serialize_str(&number.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBlock {
    Number(u64),
    Text(String),
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match Option::<RawBlock>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawBlock::Number(number)) => Ok(Some(number)),
        Some(RawBlock::Text(text)) => parse(&text).map(Some).map_err(de::Error::custom),
    }
}

/// Parse a block number from its decimal or `0x` hex text form.
pub fn parse(text: &str) -> Result<u64, String> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid block number '{}': {}", text, e))
}
