//! Amount Conversion Module
//!
//! Unified handling of monetary quantities. All balances and hub-facing
//! amounts are arbitrary-precision integers in canonical 18-decimal units;
//! on-chain amounts use the asset's native decimals. All conversions MUST
//! go through this module.
//!
//! ## Design Principles
//! 1. No floats anywhere near money
//! 2. Explicit error handling: no silent truncation on parse
//! 3. Decimal strings at every boundary (JSON, Postgres TEXT, Redis payloads)

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

/// Canonical number of decimals for hub-side balances.
pub const CANONICAL_DECIMALS: u32 = 18;

/// Slippage is expressed in decibasis points: 1 bp = 10 dbps.
pub const DBPS_MULTIPLIER: u64 = 1_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid amount string: {0}")]
    InvalidAmount(String),

    #[error("Slippage out of range: {0} dbps")]
    SlippageOutOfRange(u32),
}

/// An unsigned monetary amount in integer units of some decimal base.
///
/// Internal value is private to force construction through audited parsing.
/// Serialises as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    pub fn into_inner(self) -> BigUint {
        self.0
    }

    /// Saturating subtraction: returns zero when `other` exceeds `self`.
    pub fn saturating_sub(&self, other: &Self) -> Self {
        if other.0 >= self.0 {
            Self::zero()
        } else {
            Self(&self.0 - &other.0)
        }
    }

    pub fn checked_add(&self, other: &Self) -> Self {
        Self(&self.0 + &other.0)
    }

    pub fn min(&self, other: &Self) -> Self {
        if self.0 <= other.0 { self.clone() } else { other.clone() }
    }

    /// Rescale between decimal bases. Scaling down truncates toward zero.
    pub fn rescale(&self, from_decimals: u32, to_decimals: u32) -> Self {
        if from_decimals == to_decimals {
            return self.clone();
        }
        if to_decimals > from_decimals {
            let factor = BigUint::from(10u32).pow(to_decimals - from_decimals);
            Self(&self.0 * factor)
        } else {
            let factor = BigUint::from(10u32).pow(from_decimals - to_decimals);
            Self(&self.0 / factor)
        }
    }

    /// Floor of `self × (1 − slippage_dbps / DBPS_MULTIPLIER)`.
    ///
    /// Every recorded operation must receive at least this much on the
    /// destination, otherwise the quote is rejected.
    pub fn min_received(&self, slippage_dbps: u32) -> Result<Self, AmountError> {
        if u64::from(slippage_dbps) > DBPS_MULTIPLIER {
            return Err(AmountError::SlippageOutOfRange(slippage_dbps));
        }
        let keep = BigUint::from(DBPS_MULTIPLIER - u64::from(slippage_dbps));
        Ok(Self(&self.0 * keep / BigUint::from(DBPS_MULTIPLIER)))
    }
}

impl Deref for Amount {
    type Target = BigUint;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl From<BigUint> for Amount {
    fn from(v: BigUint) -> Self {
        Self(v)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AmountError::InvalidAmount(s.to_string()));
        }
        BigUint::from_str(trimmed)
            .map(Self)
            .map_err(|_| AmountError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Convenience constructor for whole token amounts in canonical units.
/// `canonical(100)` is 100·10^18.
pub fn canonical(whole: u64) -> Amount {
    Amount(BigUint::from(whole) * BigUint::from(10u32).pow(CANONICAL_DECIMALS))
}
