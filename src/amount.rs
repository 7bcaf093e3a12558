//! Canonical money unit.
//!
//! Every payout, wage and rate in the engine is an [`Amount`]: a whole number of hundredths of the
//! settlement token. Conversion to the chain's smallest unit happens once, at the gateway boundary,
//! through [`Amount::to_base_units`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Hundredths per whole token.
pub const CENTS_PER_UNIT: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: u64) -> Self {
        Amount(cents)
    }

    pub const fn from_units(units: u64) -> Self {
        Amount(units * CENTS_PER_UNIT)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Half of this amount, rounding half-cents up.
    pub fn half(self) -> Amount {
        Amount((self.0 + 1) / 2)
    }

    /// `hours × self`, rounded to the nearest cent. `self` is read as a per-hour rate.
    pub fn for_hours(self, hours: f64) -> Result<Amount> {
        if !hours.is_finite() || hours < 0.0 {
            return Err(EngineError::InvalidArgument(format!("hours must be a non-negative number, got {hours}")));
        }
        Ok(Amount((hours * self.0 as f64).round() as u64))
    }

    /// Convert to the chain's smallest unit given the token's decimal places.
    pub fn to_base_units(self, decimals: u32) -> Result<u128> {
        if decimals < 2 {
            return Err(EngineError::Configuration(format!(
                "token decimals must be at least 2, got {decimals}"
            )));
        }
        10u128
            .checked_pow(decimals - 2)
            .and_then(|scale| (self.0 as u128).checked_mul(scale))
            .ok_or_else(|| EngineError::Configuration(format!("amount {self} overflows {decimals} decimals")))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / CENTS_PER_UNIT, self.0 % CENTS_PER_UNIT)
    }
}

impl FromStr for Amount {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || EngineError::InvalidArgument(format!("'{s}' is not a valid amount"));
        if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
            return Err(invalid());
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let frac_cents: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        whole
            .checked_mul(CENTS_PER_UNIT)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

/// Round an hour count to two decimals, the precision hours are stored at.
pub fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}
