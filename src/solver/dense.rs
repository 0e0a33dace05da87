//! Small dense matrices for coupled-branch inversion and the compensation
//! Jacobian.

use std::ops::{Index, IndexMut};

use super::scalar::{Scalar, ZeroPivot};

/// Pivots smaller than this (relative to the largest column entry) are
/// treated as zero.
const DENSE_PIVOT_EPS: f64 = 1e-14;

/// Row-major square matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix<T: Scalar> {
    size: usize,
    data: Vec<T>,
}

impl<T: Scalar> DenseMatrix<T> {
    /// Create a zero matrix.
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![T::zero(); size * size],
        }
    }

    /// Create an identity matrix.
    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size);
        for i in 0..size {
            m[(i, i)] = T::one();
        }
        m
    }

    /// Build from nested rows. Returns `None` unless the rows form a square.
    pub fn from_rows(rows: &[Vec<T>]) -> Option<Self> {
        let size = rows.len();
        if rows.iter().any(|r| r.len() != size) {
            return None;
        }
        Some(Self {
            size,
            data: rows.iter().flatten().copied().collect(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Check symmetry to a relative tolerance.
    pub fn is_symmetric(&self, rel_tol: f64) -> bool {
        for i in 0..self.size {
            for j in (i + 1)..self.size {
                let a = self[(i, j)];
                let b = self[(j, i)];
                let scale = a.magnitude().max(b.magnitude()).max(f64::MIN_POSITIVE);
                if (a - b).magnitude() > rel_tol * scale {
                    return false;
                }
            }
        }
        true
    }

    /// Entry-wise `self * alpha + other * beta`.
    pub fn combine(&self, alpha: T, other: &Self, beta: T) -> Self {
        Self {
            size: self.size,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| a * alpha + b * beta)
                .collect(),
        }
    }

    /// Matrix-vector product.
    pub fn mul_vec(&self, x: &[T]) -> Vec<T> {
        (0..self.size)
            .map(|i| {
                let mut acc = T::zero();
                for j in 0..self.size {
                    acc += self[(i, j)] * x[j];
                }
                acc
            })
            .collect()
    }

    /// Solve `self * x = b` by Gaussian elimination with partial pivoting.
    pub fn solve(&self, b: &[T]) -> Result<Vec<T>, ZeroPivot> {
        let n = self.size;
        let mut lu = self.data.clone();
        let mut x = b.to_vec();

        for k in 0..n {
            let mut max_val = lu[k * n + k].magnitude();
            let mut max_row = k;
            for i in (k + 1)..n {
                let val = lu[i * n + k].magnitude();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            let scale = (0..n)
                .map(|j| lu[max_row * n + j].magnitude())
                .fold(0.0, f64::max);
            if max_val <= DENSE_PIVOT_EPS * scale || max_val == 0.0 {
                return Err(ZeroPivot { index: k });
            }

            if max_row != k {
                for j in 0..n {
                    lu.swap(k * n + j, max_row * n + j);
                }
                x.swap(k, max_row);
            }

            let pivot = lu[k * n + k];
            for i in (k + 1)..n {
                let factor = lu[i * n + k] / pivot;
                if factor == T::zero() {
                    continue;
                }
                for j in (k + 1)..n {
                    let ukj = lu[k * n + j];
                    lu[i * n + j] -= factor * ukj;
                }
                let xk = x[k];
                x[i] -= factor * xk;
            }
        }

        for i in (0..n).rev() {
            let mut acc = x[i];
            for j in (i + 1)..n {
                acc -= lu[i * n + j] * x[j];
            }
            x[i] = acc / lu[i * n + i];
        }

        Ok(x)
    }

    /// Matrix inverse, column by column.
    pub fn inverse(&self) -> Result<Self, ZeroPivot> {
        let n = self.size;
        let mut inv = Self::zeros(n);
        let mut unit = vec![T::zero(); n];
        for j in 0..n {
            unit.iter_mut().for_each(|u| *u = T::zero());
            unit[j] = T::one();
            let col = self.solve(&unit)?;
            for (i, v) in col.into_iter().enumerate() {
                inv[(i, j)] = v;
            }
        }
        Ok(inv)
    }
}

impl<T: Scalar> Index<(usize, usize)> for DenseMatrix<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        &self.data[row * self.size + col]
    }
}

impl<T: Scalar> IndexMut<(usize, usize)> for DenseMatrix<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        &mut self.data[row * self.size + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    #[test]
    fn test_solve_with_pivoting() {
        let m = DenseMatrix::from_rows(&[vec![0.0, 2.0], vec![3.0, 1.0]]).unwrap();
        let x = m.solve(&[4.0, 5.0]).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = DenseMatrix::from_rows(&[
            vec![4.0, 1.0, 0.5],
            vec![1.0, 3.0, 0.2],
            vec![0.5, 0.2, 2.0],
        ])
        .unwrap();
        let inv = m.inverse().unwrap();
        let col = inv.mul_vec(&[1.0, 0.0, 0.0]);
        let back = m.mul_vec(&col);
        assert_relative_eq!(back[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(back[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(back[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_detected() {
        let m = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
        assert!(m.solve(&[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_complex_solve() {
        let j = Complex64::new(0.0, 1.0);
        let m = DenseMatrix::from_rows(&[vec![j, Complex64::new(1.0, 0.0)], vec![Complex64::new(1.0, 0.0), j]])
            .unwrap();
        let b = vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
        let x = m.solve(&b).unwrap();
        let r = m.mul_vec(&x);
        assert_relative_eq!(r[0].re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[1].norm(), 0.0, epsilon = 1e-12);
    }
}
