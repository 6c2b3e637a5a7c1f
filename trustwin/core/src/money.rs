// Copyright (c) 2024 The Botho Foundation

//! Fixed-point money arithmetic.
//!
//! All amounts are carried as integer micro-units (6 decimals, the USDT
//! TRC20 base unit). Percentages are basis points. Nothing in the ledger
//! ever touches binary floating point.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::error::{LotteryError, LotteryResult};

/// Micro-units per whole currency unit.
pub const MICROS_PER_UNIT: u64 = 1_000_000;

/// Number of decimal places carried by [`Amount`].
pub const DECIMALS: usize = 6;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// A non-negative monetary amount in micro-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Build an amount from raw micro-units.
    pub const fn from_micros(micros: u64) -> Self {
        Amount(micros)
    }

    /// Build an amount from whole currency units.
    pub fn from_units(units: u64) -> LotteryResult<Self> {
        units
            .checked_mul(MICROS_PER_UNIT)
            .map(Amount)
            .ok_or(LotteryError::Overflow)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// `self * bps / 10_000`, rounded half-up to the nearest micro-unit.
    pub fn share(self, bps: u32) -> Amount {
        Amount(mul_bps_round_half_up(self.0 as u128, bps))
    }
}

/// Multiply `value` by a basis-point fraction, rounding half-up exactly once.
///
/// Saturates at `u64::MAX`; with `bps <= 10_000` and `value` built from a
/// `u64` product the result always fits.
pub fn mul_bps_round_half_up(value: u128, bps: u32) -> u64 {
    let denominator = BPS_DENOMINATOR as u128;
    let scaled = value * bps as u128 + denominator / 2;
    u64::try_from(scaled / denominator).unwrap_or(u64::MAX)
}

impl fmt::Display for Amount {
    /// Renders at least two decimals, trimming trailing zeros beyond that:
    /// `4.00`, `0.125`, `12.000001`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / MICROS_PER_UNIT;
        let frac = format!("{:06}", self.0 % MICROS_PER_UNIT);
        let trimmed = frac.trim_end_matches('0');
        let frac = if trimmed.len() < 2 { &frac[..2] } else { trimmed };
        write!(f, "{}.{}", units, frac)
    }
}

impl FromStr for Amount {
    type Err = LotteryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || LotteryError::ParseAmount(s.to_string());

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(bad());
        }
        if frac.len() > DECIMALS {
            return Err(bad());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(bad());
        }

        let units: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| bad())?
        };
        let frac_micros: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac, width = DECIMALS)
                .parse()
                .map_err(|_| bad())?
        };

        units
            .checked_mul(MICROS_PER_UNIT)
            .and_then(|m| m.checked_add(frac_micros))
            .map(Amount)
            .ok_or(LotteryError::Overflow)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
