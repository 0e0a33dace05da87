//! Rational transfer functions discretized with the bilinear transform.
//!
//! `G(s) = K N(s) / D(s)` with coefficients in ascending powers of `s`.
//! Substituting `s = (2/dt) (1 - z^-1) / (1 + z^-1)` gives a difference
//! equation evaluated in transposed direct form II. Output limits clamp the
//! output, and the states are updated with the clamped value so the block
//! does not wind up.

/// Output limits of a control block.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Limits {
    #[serde(default = "neg_inf")]
    pub lo: f64,
    #[serde(default = "pos_inf")]
    pub hi: f64,
}

fn neg_inf() -> f64 {
    f64::NEG_INFINITY
}

fn pos_inf() -> f64 {
    f64::INFINITY
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }
}

impl Limits {
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lo).min(self.hi)
    }

    pub fn is_valid(&self) -> bool {
        self.lo <= self.hi
    }
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn poly_pow(base: &[f64], exp: usize) -> Vec<f64> {
    (0..exp).fold(vec![1.0], |acc, _| poly_mul(&acc, base))
}

fn trim(coeffs: &[f64]) -> &[f64] {
    let end = coeffs.iter().rposition(|&c| c != 0.0).map_or(0, |p| p + 1);
    &coeffs[..end]
}

/// Why a transfer function could not be discretized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Denominator is identically zero
    EmptyDenominator,
    /// Numerator degree exceeds denominator degree
    Improper,
    /// Discrete leading coefficient vanished
    Degenerate,
}

/// Discrete-time realization of a rational transfer function.
#[derive(Debug, Clone)]
pub struct DiscreteTransfer {
    b: Vec<f64>,
    a: Vec<f64>,
    state: Vec<f64>,
    limits: Limits,
}

impl DiscreteTransfer {
    pub fn new(
        gain: f64,
        numerator: &[f64],
        denominator: &[f64],
        dt: f64,
        limits: Limits,
    ) -> Result<Self, TransferError> {
        let den = trim(denominator);
        let num = trim(numerator);
        if den.is_empty() {
            return Err(TransferError::EmptyDenominator);
        }
        if num.len() > den.len() {
            return Err(TransferError::Improper);
        }
        let order = den.len() - 1;
        let k = 2.0 / dt;

        let mut b = vec![0.0; order + 1];
        let mut a = vec![0.0; order + 1];
        for i in 0..=order {
            let term = poly_mul(
                &poly_pow(&[1.0, -1.0], i),
                &poly_pow(&[1.0, 1.0], order - i),
            );
            let scale = k.powi(i as i32);
            for (j, t) in term.iter().enumerate() {
                if let Some(&n) = num.get(i) {
                    b[j] += gain * n * scale * t;
                }
                a[j] += den[i] * scale * t;
            }
        }

        let a0 = a[0];
        if a0 == 0.0 || !a0.is_finite() {
            return Err(TransferError::Degenerate);
        }
        b.iter_mut().for_each(|c| *c /= a0);
        a.iter_mut().for_each(|c| *c /= a0);

        Ok(Self {
            b,
            a,
            state: vec![0.0; order],
            limits,
        })
    }

    pub fn order(&self) -> usize {
        self.state.len()
    }

    /// Advance one step with input `x`, returning the (limited) output.
    pub fn step(&mut self, x: f64) -> f64 {
        let n = self.order();
        let raw = self.b[0] * x + self.state.first().copied().unwrap_or(0.0);
        let y = self.limits.clamp(raw);
        for i in 0..n {
            let next = if i + 1 < n { self.state[i + 1] } else { 0.0 };
            self.state[i] = next + self.b[i + 1] * x - self.a[i + 1] * y;
        }
        y
    }

    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_integrator_is_trapezoidal() {
        let dt = 1e-3;
        let mut tf = DiscreteTransfer::new(1.0, &[1.0], &[0.0, 1.0], dt, Limits::default()).unwrap();
        let mut y = 0.0;
        for _ in 0..10 {
            y = tf.step(1.0);
        }
        assert_relative_eq!(y, 9.5 * dt, max_relative = 1e-12);
    }

    #[test]
    fn test_lag_settles_to_gain() {
        let dt = 1e-3;
        let mut tf = DiscreteTransfer::new(2.0, &[1.0], &[1.0, 0.01], dt, Limits::default()).unwrap();
        let mut y = 0.0;
        for _ in 0..1000 {
            y = tf.step(1.0);
        }
        assert_relative_eq!(y, 2.0, max_relative = 1e-6);
    }

    #[test]
    fn test_output_limits_prevent_windup() {
        let dt = 1e-3;
        let limits = Limits { lo: -1.0, hi: 1.0 };
        let mut tf = DiscreteTransfer::new(100.0, &[1.0], &[0.0, 1.0], dt, limits).unwrap();
        for _ in 0..1000 {
            assert!(tf.step(1.0) <= 1.0);
        }
        // Output leaves the limit once the input reverses
        tf.step(-1.0);
        assert!(tf.step(-1.0) < 1.0);
    }

    #[test]
    fn test_improper_rejected() {
        assert_eq!(
            DiscreteTransfer::new(1.0, &[0.0, 1.0], &[1.0], 1e-3, Limits::default()).unwrap_err(),
            TransferError::Improper
        );
        assert_eq!(
            DiscreteTransfer::new(1.0, &[1.0], &[0.0, 0.0], 1e-3, Limits::default()).unwrap_err(),
            TransferError::EmptyDenominator
        );
    }

    #[test]
    fn test_static_gain() {
        let mut tf = DiscreteTransfer::new(3.0, &[2.0], &[4.0], 1e-3, Limits::default()).unwrap();
        assert_relative_eq!(tf.step(1.0), 1.5);
        assert_eq!(tf.order(), 0);
    }
}
