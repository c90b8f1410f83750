//! EVM address validation and canonicalization.
//!
//! Addresses are case-insensitive on chain, so every [`Address`] is stored in
//! its canonical lower-case `0x`-prefixed form. Set membership, equality and
//! shard-key derivation all operate on that form.

use alloy_primitives::Address as RawAddress;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

/// Length of a `0x`-prefixed hex address.
const ADDRESS_LEN: usize = 42;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("Address too short or long: {0}")]
    InvalidLength(String),
}

/// Canonical (lower-case) EVM address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string. A missing `0x` prefix is added.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();

        let normalized = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            format!("0x{}", &trimmed[2..])
        } else {
            format!("0x{}", trimmed)
        };

        if normalized.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(input.to_string()));
        }

        // alloy rejects non-hex bodies; mixed case is accepted without checksum checks
        normalized
            .to_ascii_lowercase()
            .parse::<RawAddress>()
            .map_err(|_| AddressError::InvalidFormat(input.to_string()))?;

        Ok(Self(normalized.to_ascii_lowercase()))
    }

    /// Canonical `0x`-prefixed lower-case form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits after the `0x` marker.
    pub fn hex_body(&self) -> &str {
        &self.0[2..]
    }

    /// Shard key: the first `len` hex digits after `0x`.
    pub fn shard_key(&self, len: usize) -> &str {
        let body = self.hex_body();
        &body[..len.min(body.len())]
    }

    /// Case-insensitive comparison against a raw string.
    pub fn matches(&self, raw: &str) -> bool {
        raw.trim().eq_ignore_ascii_case(&self.0)
            || raw.trim().eq_ignore_ascii_case(self.hex_body())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a list of raw addresses, dropping duplicates and keeping first-seen order.
pub fn parse_and_dedupe<'a, I>(raw: I) -> Result<Vec<Address>, AddressError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();

    for item in raw {
        let address = Address::parse(item)?;
        if seen.insert(address.clone()) {
            result.push(address);
        }
    }

    Ok(result)
}
