//! Consumer-expressed demand for values.

use std::fmt;
use std::ops::{Add, AddAssign};

/// How many values a consumer is willing to receive.
///
/// Demand accumulates: requesting `Max(1)` twice yields `Max(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Demand {
    /// No values requested.
    #[default]
    None,
    /// Up to `n` values (always non-zero; use [`Demand::max`]).
    Max(usize),
    /// Any number of values.
    Unlimited,
}

impl Demand {
    /// Demand for up to `n` values. `0` normalises to [`Demand::None`].
    #[must_use]
    pub const fn max(n: usize) -> Self {
        if n == 0 {
            Self::None
        } else {
            Self::Max(n)
        }
    }

    /// Returns true if at least one value may be delivered.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        !matches!(self, Self::None | Self::Max(0))
    }
}

impl Add for Demand {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Unlimited, _) | (_, Self::Unlimited) => Self::Unlimited,
            (Self::None, other) | (other, Self::None) => other,
            (Self::Max(a), Self::Max(b)) => a.checked_add(b).map_or(Self::Unlimited, Self::Max),
        }
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Max(n) => write!(f, "max({n})"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}
