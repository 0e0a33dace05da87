//! Sparse symmetric LDLᵀ factorization with a fixed pivot order.
//!
//! The pivot order is chosen once, by minimum degree (Tinney scheme 2) over
//! the union of every connection the matrix can ever hold. Rows marked as
//! *tail* (switch terminals) are ordered after all other rows, so a switch
//! toggle only changes the trailing block:
//!
//! ```text
//!   [ A_bb  A_bt ]     base pivots are eliminated once; the reduced
//!   [ A_tb  A_tt ]     tail  A_tt - A_tb A_bb^-1 A_bt  is cached
//! ```
//!
//! Switch stamps are added to the cached reduced tail, which is then
//! eliminated. A full factorization runs exactly the same operations in
//! the same order, so both paths give bit-identical factors.

use std::collections::{BTreeMap, BTreeSet};

use super::scalar::{Scalar, ZeroPivot};

/// Cancellation noise a tail stamp can leave in a pivot, per unit of the
/// stamp's magnitude.
const TAIL_ROUNDOFF: f64 = 64.0 * f64::EPSILON;

/// Pivot order of the unknowns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    /// `perm[position] = row`
    perm: Vec<usize>,
    /// `inv[row] = position`
    inv: Vec<usize>,
    /// Number of pivots before the tail
    base: usize,
}

impl Ordering {
    pub fn position(&self, row: usize) -> usize {
        self.inv[row]
    }

    pub fn row(&self, position: usize) -> usize {
        self.perm[position]
    }

    pub fn base_len(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }
}

/// Minimum-degree ordering of an `n`-row symmetric pattern.
///
/// At every stage the remaining row with the fewest neighbours in the
/// elimination graph is taken (lowest index on ties), and its neighbours
/// are joined to each other as fill. Rows with `tail[row]` set are only
/// taken once every other row has been ordered.
pub fn minimum_degree(n: usize, edges: &[(usize, usize)], tail: &[bool]) -> Ordering {
    let mut graph: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for &(a, b) in edges {
        if a != b {
            graph[a].insert(b);
            graph[b].insert(a);
        }
    }

    let mut eliminated = vec![false; n];
    let mut perm = Vec::with_capacity(n);
    let is_tail = |row: usize| tail.get(row).copied().unwrap_or(false);
    let base = (0..n).filter(|&r| !is_tail(r)).count();

    for stage in 0..n {
        let want_tail = stage >= base;
        let pick = (0..n)
            .filter(|&r| !eliminated[r] && is_tail(r) == want_tail)
            .min_by_key(|&r| (graph[r].len(), r));
        let Some(pivot) = pick else { break };

        let neighbours: Vec<usize> = graph[pivot].iter().copied().collect();
        for (i, &a) in neighbours.iter().enumerate() {
            graph[a].remove(&pivot);
            for &b in &neighbours[i + 1..] {
                graph[a].insert(b);
                graph[b].insert(a);
            }
        }
        graph[pivot].clear();
        eliminated[pivot] = true;
        perm.push(pivot);
    }

    let mut inv = vec![0; n];
    for (pos, &row) in perm.iter().enumerate() {
        inv[row] = pos;
    }
    Ordering { perm, inv, base }
}

/// Symmetric matrix held as diagonal plus strictly upper rows, in pivot
/// positions.
#[derive(Debug, Clone)]
struct Upper<T: Scalar> {
    diag: Vec<T>,
    rows: Vec<BTreeMap<usize, T>>,
}

impl<T: Scalar> Upper<T> {
    fn zeros(n: usize) -> Self {
        Self {
            diag: vec![T::zero(); n],
            rows: vec![BTreeMap::new(); n],
        }
    }

    fn add(&mut self, p: usize, q: usize, value: T) {
        if p == q {
            self.diag[p] += value;
        } else {
            let (lo, hi) = if p < q { (p, q) } else { (q, p) };
            *self.rows[lo].entry(hi).or_insert_with(T::zero) += value;
        }
    }
}

/// Sparse LDLᵀ factors with a cached partial elimination.
#[derive(Debug, Clone)]
pub struct SparseLdl<T: Scalar> {
    ordering: Ordering,
    pivot_tolerance: f64,
    /// Matrix without the tail-only stamps
    matrix: Upper<T>,
    /// Reduced tail rows after eliminating the base pivots
    cached: Option<Upper<T>>,
    /// `lower[k]` holds `(position, l)` for column k of L
    lower: Vec<Vec<(usize, T)>>,
    pivots: Vec<T>,
    factored: bool,
}

impl<T: Scalar> SparseLdl<T> {
    /// Create an empty matrix over `n` rows with the given pattern.
    pub fn new(n: usize, edges: &[(usize, usize)], tail: &[bool], pivot_tolerance: f64) -> Self {
        Self {
            ordering: minimum_degree(n, edges, tail),
            pivot_tolerance,
            matrix: Upper::zeros(n),
            cached: None,
            lower: vec![Vec::new(); n],
            pivots: vec![T::zero(); n],
            factored: false,
        }
    }

    pub fn size(&self) -> usize {
        self.ordering.len()
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    /// Add `value` to entry `(i, j)` and, for `i != j`, to `(j, i)`.
    pub fn add(&mut self, i: usize, j: usize, value: T) {
        let p = self.ordering.position(i);
        let q = self.ordering.position(j);
        self.matrix.add(p, q, value);
        self.cached = None;
        self.factored = false;
    }

    /// Stamp an admittance `y` between rows `i` and `j` (`None` = a row
    /// outside the matrix).
    pub fn stamp(&mut self, i: Option<usize>, j: Option<usize>, y: T) {
        if let Some(i) = i {
            self.add(i, i, y);
        }
        if let Some(j) = j {
            self.add(j, j, y);
        }
        if let (Some(i), Some(j)) = (i, j) {
            self.add(i, j, -y);
        }
    }

    pub fn is_factored(&self) -> bool {
        self.factored
    }

    fn eliminate(
        &mut self,
        work: &mut Upper<T>,
        range: std::ops::Range<usize>,
        floor: &[f64],
    ) -> Result<(), ZeroPivot> {
        for k in range {
            let dk = work.diag[k];
            if dk == T::zero() || dk.magnitude() <= floor[k] {
                return Err(ZeroPivot {
                    index: self.ordering.row(k),
                });
            }
            let row: Vec<(usize, T)> = std::mem::take(&mut work.rows[k]).into_iter().collect();
            for (n, &(j, a_kj)) in row.iter().enumerate() {
                let f = a_kj / dk;
                work.diag[j] -= f * a_kj;
                for &(m, a_km) in &row[n + 1..] {
                    *work.rows[j].entry(m).or_insert_with(T::zero) -= f * a_km;
                }
            }
            self.lower[k] = row.into_iter().map(|(j, a_kj)| (j, a_kj / dk)).collect();
            self.pivots[k] = dk;
        }
        Ok(())
    }

    /// Smallest acceptable pivot magnitude per position, relative to the
    /// diagonal without tail stamps.
    fn pivot_floor(&self) -> Vec<f64> {
        self.matrix
            .diag
            .iter()
            .map(|d| self.pivot_tolerance * d.magnitude())
            .collect()
    }

    /// Eliminate the base pivots and cache the reduced tail.
    fn factor_base(&mut self) -> Result<(), ZeroPivot> {
        let base = self.ordering.base_len();
        let mut work = self.matrix.clone();
        let floor = self.pivot_floor();
        self.eliminate(&mut work, 0..base, &floor)?;
        self.cached = Some(work);
        Ok(())
    }

    fn factor_tail(&mut self, extra: &[(usize, usize, T)]) -> Result<(), ZeroPivot> {
        let base = self.ordering.base_len();
        let n = self.size();
        let mut work = match &self.cached {
            Some(cached) => cached.clone(),
            None => return Err(ZeroPivot { index: 0 }),
        };
        // Tail stamps only raise the floor by their own rounding noise, so a
        // switch does not hide the conductance left behind its terminals.
        let mut floor = self.pivot_floor();
        for &(i, j, value) in extra {
            let p = self.ordering.position(i);
            let q = self.ordering.position(j);
            work.add(p, q, value);
            if p == q {
                floor[p] += TAIL_ROUNDOFF * value.magnitude();
            }
        }
        self.eliminate(&mut work, base..n, &floor)
    }

    /// Factorize with additional tail-only entries `(i, j, value)`,
    /// reusing the cached base elimination when it is still valid.
    pub fn refactor(&mut self, extra: &[(usize, usize, T)]) -> Result<(), ZeroPivot> {
        self.factored = false;
        if self.cached.is_none() {
            self.factor_base()?;
        }
        self.factor_tail(extra)?;
        self.factored = true;
        Ok(())
    }

    /// Factorize from scratch, ignoring any cached elimination.
    pub fn factor(&mut self, extra: &[(usize, usize, T)]) -> Result<(), ZeroPivot> {
        self.cached = None;
        self.refactor(extra)
    }

    /// Solve `A x = b` with the current factors.
    pub fn solve(&self, b: &[T]) -> Vec<T> {
        let n = self.size();
        let mut y: Vec<T> = (0..n).map(|p| b[self.ordering.row(p)]).collect();
        for k in 0..n {
            let yk = y[k];
            for &(j, l) in &self.lower[k] {
                y[j] -= l * yk;
            }
        }
        for k in 0..n {
            y[k] = y[k] / self.pivots[k];
        }
        for k in (0..n).rev() {
            let mut acc = y[k];
            for &(j, l) in &self.lower[k] {
                acc -= l * y[j];
            }
            y[k] = acc;
        }
        let mut x = vec![T::zero(); n];
        for (p, value) in y.into_iter().enumerate() {
            x[self.ordering.row(p)] = value;
        }
        x
    }

    /// Entries of L plus the diagonal (fill-in diagnostic).
    pub fn factor_nonzeros(&self) -> usize {
        self.size() + self.lower.iter().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn ladder(n: usize) -> (Vec<(usize, usize)>, SparseLdl<f64>) {
        let edges: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        let mut ldl = SparseLdl::new(n, &edges, &vec![false; n], 1e-12);
        for &(a, b) in &edges {
            ldl.stamp(Some(a), Some(b), 1.0);
        }
        ldl.stamp(Some(0), None, 1.0);
        (edges, ldl)
    }

    #[test]
    fn test_star_ordering_eliminates_leaves_first() {
        // Hub 0 connected to 1..4: eliminating the hub first would fill everything
        let edges = [(0, 1), (0, 2), (0, 3), (0, 4)];
        let ord = minimum_degree(5, &edges, &[false; 5]);
        assert_eq!(ord.row(4), 0);
        assert_eq!(ord.row(0), 1);
    }

    #[test]
    fn test_tail_rows_ordered_last() {
        let edges = [(0, 1), (1, 2), (2, 3)];
        let ord = minimum_degree(4, &edges, &[true, false, false, false]);
        assert_eq!(ord.base_len(), 3);
        assert_eq!(ord.row(3), 0);
    }

    #[test]
    fn test_ladder_solve() {
        let (_, mut ldl) = ladder(4);
        ldl.factor(&[]).unwrap();
        // Inject 1 A at the far end: 1 ohm per rung, 4 ohm total path
        let x = ldl.solve(&[0.0, 0.0, 0.0, 1.0]);
        assert_relative_eq!(x[3], 4.0, max_relative = 1e-12);
        assert_relative_eq!(x[0], 1.0, max_relative = 1e-12);
        // No fill on a chain
        assert_eq!(ldl.factor_nonzeros(), 4 + 3);
    }

    #[test]
    fn test_incremental_matches_full() {
        let n = 5;
        let edges: Vec<(usize, usize)> = vec![(0, 1), (1, 2), (2, 3), (3, 4), (1, 4)];
        let tail = [false, false, false, true, true];
        let mut ldl = SparseLdl::new(n, &edges, &tail, 1e-12);
        for &(a, b) in &edges[..4] {
            ldl.stamp(Some(a), Some(b), 2.0);
        }
        ldl.stamp(Some(0), None, 0.5);
        let switch = [(1, 1, 1e6), (4, 4, 1e6), (1, 4, -1e6)];
        let rhs = [1.0, 0.0, -2.0, 0.5, 0.0];

        ldl.refactor(&switch).unwrap();
        let reused = ldl.solve(&rhs);
        ldl.refactor(&[]).unwrap();
        ldl.refactor(&switch).unwrap();
        let again = ldl.solve(&rhs);
        ldl.factor(&switch).unwrap();
        let full = ldl.solve(&rhs);
        assert_eq!(reused, full);
        assert_eq!(again, full);
    }

    #[test]
    fn test_floating_row_is_zero_pivot() {
        // Row 2 has no connection at all
        let edges = [(0, 1)];
        let mut ldl: SparseLdl<f64> = SparseLdl::new(3, &edges, &[false; 3], 1e-8);
        ldl.stamp(Some(0), Some(1), 1.0);
        ldl.stamp(Some(0), None, 1.0);
        assert_eq!(ldl.factor(&[]), Err(ZeroPivot { index: 2 }));
    }

    #[test]
    fn test_isolated_pair_is_zero_pivot() {
        // Rows 1 and 2 form a subnetwork with no path to ground
        let edges = [(1, 2)];
        let mut ldl: SparseLdl<f64> = SparseLdl::new(3, &edges, &[false; 3], 1e-8);
        ldl.stamp(Some(0), None, 1.0);
        ldl.stamp(Some(1), Some(2), 1.0);
        assert!(ldl.factor(&[]).is_err());
    }

    #[test]
    fn test_stiff_tail_stamp_keeps_weak_pivot() {
        // 1 kohm loads on both sides of a 1 uohm tail link
        let edges = [(0, 1)];
        let tail = [true, true];
        let mut ldl: SparseLdl<f64> = SparseLdl::new(2, &edges, &tail, 1e-8);
        ldl.stamp(Some(0), None, 1e-3);
        ldl.stamp(Some(1), None, 1e-3);
        let link = [(0, 0, 1e6), (1, 1, 1e6), (0, 1, -1e6)];
        ldl.refactor(&link).unwrap();
        let x = ldl.solve(&[0.1, 0.0]);
        assert_relative_eq!(x[1], 50.0, max_relative = 1e-6);
    }

    #[test]
    fn test_pair_floating_behind_tail_link_is_zero_pivot() {
        let edges = [(0, 1), (1, 2)];
        let tail = [false, true, true];
        let mut ldl: SparseLdl<f64> = SparseLdl::new(3, &edges, &tail, 1e-8);
        ldl.stamp(Some(0), None, 1.0);
        ldl.stamp(Some(1), Some(2), 0.37);
        let link = [(1, 1, 1e6), (2, 2, 1e6), (1, 2, -1e6)];
        assert!(ldl.refactor(&link).is_err());
    }

    #[test]
    fn test_complex_symmetric_solve() {
        let edges = [(0, 1)];
        let mut ldl: SparseLdl<Complex64> = SparseLdl::new(2, &edges, &[false; 2], 1e-12);
        let y = Complex64::new(0.0, -2.0);
        ldl.stamp(Some(0), Some(1), y);
        ldl.stamp(Some(1), None, Complex64::new(1.0, 0.0));
        ldl.factor(&[]).unwrap();
        let x = ldl.solve(&[Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)]);
        // v1 = 1 (through the 1 S shunt), v0 = v1 + 1 / y
        assert_relative_eq!(x[1].re, 1.0, max_relative = 1e-12);
        assert_relative_eq!(x[0].im, 0.5, max_relative = 1e-12);
        assert_relative_eq!(x[0].re, 1.0, max_relative = 1e-12);
    }
}
