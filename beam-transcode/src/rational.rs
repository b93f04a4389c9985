//! Exact time base arithmetic.
//!
//! Timestamps are plain integers whose meaning depends on a rational time
//! base. Rebasing goes through 128-bit integers and rounds half away from
//! zero, so long streams do not accumulate drift the way float math does.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

/// A time base `num/den` seconds per tick. Serialized as `[num, den]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Rational {
    num: i32,
    den: i32,
}

impl Rational {
    /// Builds a time base, moving the sign onto the numerator.
    pub const fn new(num: i32, den: i32) -> Self {
        if den < 0 {
            Self {
                num: -num,
                den: -den,
            }
        } else {
            Self { num, den }
        }
    }

    pub fn numerator(&self) -> i32 {
        self.num
    }

    pub fn denominator(&self) -> i32 {
        self.den
    }

    /// Time bases must be strictly positive to be usable for rebasing.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.den == 0 {
            return Err(TranscodeError::config(format!(
                "time base {} has a zero denominator",
                self
            )));
        }
        if self.num <= 0 {
            return Err(TranscodeError::config(format!(
                "time base {} must be positive",
                self
            )));
        }
        Ok(())
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Reciprocal, e.g. a frame rate from a time base.
    pub fn invert(&self) -> Self {
        Self::new(self.den, self.num)
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<[i32; 2]> for Rational {
    fn from([num, den]: [i32; 2]) -> Self {
        Self::new(num, den)
    }
}

impl From<Rational> for [i32; 2] {
    fn from(r: Rational) -> Self {
        [r.num, r.den]
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num, den)
    }
}

/// Integer division rounding half away from zero. `d` must be non-zero.
fn div_round(n: i128, d: i128) -> i128 {
    let (n, d) = if d < 0 { (-n, -d) } else { (n, d) };
    if n >= 0 {
        (2 * n + d) / (2 * d)
    } else {
        -((2 * -n + d) / (2 * d))
    }
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Converts `t` ticks of `from` into ticks of `to`.
///
/// Both time bases are expected to have passed [`Rational::validate`].
pub fn rescale(t: i64, from: Rational, to: Rational) -> i64 {
    if from == to {
        return t;
    }
    let n = t as i128 * from.num as i128 * to.den as i128;
    let d = from.den as i128 * to.num as i128;
    if d == 0 {
        return 0;
    }
    saturate(div_round(n, d))
}

/// Rebases a duration. An unknown (zero) duration becomes one rebased source
/// tick, never less than one destination tick.
pub fn rescale_duration(d: i64, from: Rational, to: Rational) -> i64 {
    if d == 0 {
        return rescale(1, from, to).max(1);
    }
    rescale(d, from, to)
}

/// A timestamp tagged with its time base, ordered by the instant it denotes.
#[derive(Clone, Copy, Debug)]
pub struct Timestamp {
    pub value: i64,
    pub time_base: Rational,
}

impl Timestamp {
    pub fn new(value: i64, time_base: Rational) -> Self {
        Self { value, time_base }
    }

    pub fn rebase(&self, to: Rational) -> Self {
        Self::new(rescale(self.value, self.time_base, to), to)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 * self.time_base.num as f64 / self.time_base.den as f64
    }

    fn scaled(&self, other: &Timestamp) -> i128 {
        self.value as i128 * self.time_base.num as i128 * other.time_base.den as i128
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // denominators are kept positive by Rational::new
        self.scaled(other).cmp(&other.scaled(self))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}@{} ({:.3}s)", self.value, self.time_base, self.as_secs_f64())
    }
}

#[cfg(test)]
#[path = "rational_test.rs"]
mod rational_test;
