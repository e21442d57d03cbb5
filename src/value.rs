use derive_more::derive::Add;
use derive_more::derive::Display;
use derive_more::derive::From;
use derive_more::derive::Into;
use derive_more::derive::Neg;
use derive_more::derive::Sub;
use serde::Deserialize;
use serde::Serialize;

/// Wiggle room for comparisons against zero.
pub const EPSILON: f64 = 6.2e-12;

#[derive(
    Clone, Copy, Debug, Default, Display, From, Into, Add, Sub, Neg, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Value(pub f64);

impl Value {
    /// Result of [`evaluate`](crate::Chromosome::evaluate) on a faulted chromosome.
    pub const FAILED: Value = Value(f64::NAN);

    pub const fn is_failed(self) -> bool {
        self.0.is_nan()
    }

    pub fn abs(self) -> Value {
        Self(self.0.abs())
    }

    pub fn approx_eq(self, other: Value) -> bool {
        (self.0 - other.0).abs() < EPSILON
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}
