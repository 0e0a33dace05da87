//! Scalar abstraction shared by the real time-step solve and the phasor
//! steady-state solve.

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use num_complex::Complex64;

/// Field element the factorization routines operate on.
pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    fn zero() -> Self;
    fn one() -> Self;
    /// Absolute value (modulus for complex numbers).
    fn magnitude(self) -> f64;
    fn from_real(value: f64) -> Self;
}

impl Scalar for f64 {
    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn magnitude(self) -> f64 {
        self.abs()
    }

    fn from_real(value: f64) -> Self {
        value
    }
}

impl Scalar for Complex64 {
    fn zero() -> Self {
        Complex64::new(0.0, 0.0)
    }

    fn one() -> Self {
        Complex64::new(1.0, 0.0)
    }

    fn magnitude(self) -> f64 {
        self.norm()
    }

    fn from_real(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }
}

/// A pivot fell below the singularity threshold during elimination.
///
/// `index` is the row in the caller's (unpermuted) numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroPivot {
    pub index: usize,
}
