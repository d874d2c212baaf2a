//! Integer-paise prices
//!
//! The venue quotes every price as an unsigned 32-bit count of paise. The
//! raw integer is what travels on the wire and what lands in storage; the
//! decimal rupee value is derived on demand so no precision is ever lost
//! to floating point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places between paise and rupees.
pub const PRICE_SCALE: u32 = 2;

/// A venue price in paise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u32);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Wrap a raw paise value as decoded from the wire.
    pub const fn from_raw(paise: u32) -> Self {
        Self(paise)
    }

    /// Raw paise value.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Rupee value with two decimal places.
    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(i64::from(self.0), PRICE_SCALE)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Price {
    fn from(paise: u32) -> Self {
        Self(paise)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_decimal())
    }
}
