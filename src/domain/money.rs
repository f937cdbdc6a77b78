use crate::error::{PipelineError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// Number of fractional digits every stored amount is kept at.
pub const CURRENCY_SCALE: u32 = 2;

/// A non-negative fixed-point currency amount with 2 decimal places.
///
/// This wraps `rust_decimal::Decimal` so that money can only enter the
/// pipeline through validating constructors, and comparisons stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Accepts zero or positive amounts with at most 2 decimal places.
    pub fn new(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(PipelineError::ValidationError(
                "Amount must not be negative".to_string(),
            ));
        }
        if value.normalize().scale() > CURRENCY_SCALE {
            return Err(PipelineError::ValidationError(format!(
                "Amount {value} has more than {CURRENCY_SCALE} decimal places"
            )));
        }
        let mut value = value;
        value.rescale(CURRENCY_SCALE);
        Ok(Self(value))
    }

    /// Like [`Money::new`] but additionally rejects zero.
    pub fn positive(value: Decimal) -> Result<Self> {
        let money = Self::new(value)?;
        if money.is_zero() {
            Err(PipelineError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        } else {
            Ok(money)
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Takes `percent` of this amount, rounded half-even to cents.
    pub fn percent(&self, percent: Decimal) -> Self {
        let mut share = (self.0 * percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointNearestEven);
        share.rescale(CURRENCY_SCALE);
        Self(share)
    }

    /// Subtraction that refuses to go below zero.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self.0 >= rhs.0 {
            Some(Self(self.0 - rhs.0))
        } else {
            None
        }
    }
}

impl TryFrom<Decimal> for Money {
    type Error = PipelineError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

// Callers guarantee rhs <= self; use `checked_sub` when that is not known.
impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// How a service fee is divided between the rider and the platform.
///
/// The bill amount is never part of a split: it passes through to the biller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub rider_share: Money,
    pub platform_share: Money,
}

/// Fixed ratio policy; the platform receives whatever the rider does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharePolicy {
    rider_percent: Decimal,
}

impl SharePolicy {
    pub fn new(rider_percent: Decimal) -> Result<Self> {
        if rider_percent < Decimal::ZERO || rider_percent > Decimal::ONE_HUNDRED {
            return Err(PipelineError::ValidationError(format!(
                "Rider share {rider_percent}% is outside 0..=100"
            )));
        }
        Ok(Self { rider_percent })
    }

    pub fn rider_percent(&self) -> Decimal {
        self.rider_percent
    }

    pub fn platform_percent(&self) -> Decimal {
        Decimal::ONE_HUNDRED - self.rider_percent
    }

    pub fn split(&self, service_fee: Money) -> Split {
        let rider_share = service_fee.percent(self.rider_percent);
        Split {
            rider_share,
            platform_share: service_fee - rider_share,
        }
    }
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self {
            rider_percent: Decimal::from(70),
        }
    }
}
