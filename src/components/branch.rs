//! Lumped series R-L-C branch.
//!
//! In discrete time the branch is replaced by its trapezoidal companion
//! model: an equivalent conductance in parallel with a history current.
//!
//! ```text
//!   R_eq   = R + 2L/dt + dt/(2C)
//!   e_hist = -(2L/dt - dt/2C) * i(n-1) - vL(n-1) + vC(n-1)
//!   i(n)   = (v(n) - e_hist) / R_eq
//! ```
//!
//! so `G_eq = 1/R_eq` and `I_hist = -G_eq * e_hist`. A pure capacitor reduces
//! to `G_eq = 2C/dt`, a pure inductor to `G_eq = dt/2L`. A capacitance of
//! zero means "no capacitor" (a short), not an open circuit.

use crate::network::{BranchId, NodeId};

/// A series R-L-C branch with trapezoidal companion state.
#[derive(Debug, Clone)]
pub struct SeriesRlc {
    pub id: BranchId,
    pub name: String,
    pub nodes: [NodeId; 2], // [from, to]
    pub resistance: f64,
    pub inductance: f64,
    pub capacitance: f64,

    // Companion coefficients, fixed while dt is unchanged
    dt: f64,
    a: f64,
    b: f64,
    g: f64,

    // State after the last committed step
    /// Branch current (from -> to)
    pub current: f64,
    /// Voltage across the inductive part
    v_l: f64,
    /// Voltage across the capacitive part
    v_c: f64,
    /// History voltage for the step in progress
    e_hist: f64,
}

impl SeriesRlc {
    /// Create a new branch with zero initial state.
    pub fn new(
        id: BranchId,
        name: String,
        nodes: [NodeId; 2],
        resistance: f64,
        inductance: f64,
        capacitance: f64,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            resistance,
            inductance,
            capacitance,
            dt: 0.0,
            a: 0.0,
            b: 0.0,
            g: 0.0,
            current: 0.0,
            v_l: 0.0,
            v_c: 0.0,
            e_hist: 0.0,
        }
    }

    /// Compute the companion conductance for time step `dt`.
    ///
    /// Only recomputed when `dt` changes.
    pub fn prepare(&mut self, dt: f64) {
        if dt == self.dt {
            return;
        }
        self.dt = dt;
        self.a = if self.inductance > 0.0 {
            2.0 * self.inductance / dt
        } else {
            0.0
        };
        self.b = if self.capacitance > 0.0 {
            dt / (2.0 * self.capacitance)
        } else {
            0.0
        };
        self.g = 1.0 / (self.resistance + self.a + self.b);
    }

    /// Equivalent companion conductance.
    pub fn conductance(&self) -> f64 {
        self.g
    }

    /// Recompute the history term from the last committed state.
    pub fn update_history(&mut self) {
        self.e_hist = -(self.a - self.b) * self.current - self.v_l + self.v_c;
    }

    /// History current in parallel with the conductance, flowing from -> to.
    pub fn history_current(&self) -> f64 {
        -self.g * self.e_hist
    }

    /// Commit the step given the solved branch voltage `v = v(from) - v(to)`.
    pub fn advance(&mut self, v: f64) {
        let i_new = self.g * (v - self.e_hist);
        self.v_l = if self.inductance > 0.0 {
            self.a * (i_new - self.current) - self.v_l
        } else {
            0.0
        };
        if self.capacitance > 0.0 {
            self.v_c += self.b * (i_new + self.current);
        }
        self.current = i_new;
    }

    /// Current that would flow for branch voltage `v` in the step in progress.
    pub fn current_for(&self, v: f64) -> f64 {
        self.g * (v - self.e_hist)
    }

    /// Set initial state from a branch current, a capacitor voltage and the
    /// voltage across the whole branch.
    ///
    /// The inductor voltage is whatever remains of the branch voltage.
    pub fn set_initial(&mut self, current: f64, capacitor_voltage: f64, branch_voltage: f64) {
        self.current = current;
        self.v_c = if self.capacitance > 0.0 {
            capacitor_voltage
        } else {
            0.0
        };
        self.v_l = if self.inductance > 0.0 {
            branch_voltage - self.resistance * current - self.v_c
        } else {
            0.0
        };
    }

    /// Voltage across the capacitive part.
    pub fn capacitor_voltage(&self) -> f64 {
        self.v_c
    }

    /// Energy stored in the inductor and capacitor.
    pub fn stored_energy(&self) -> f64 {
        0.5 * self.inductance * self.current * self.current
            + 0.5 * self.capacitance * self.v_c * self.v_c
    }

    /// True for a capacitor-only branch.
    pub fn is_pure_capacitor(&self) -> bool {
        self.resistance == 0.0 && self.inductance == 0.0 && self.capacitance > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn branch(r: f64, l: f64, c: f64) -> SeriesRlc {
        SeriesRlc::new(BranchId(0), "B1".to_string(), [NodeId(1), NodeId(0)], r, l, c)
    }

    #[test]
    fn test_pure_element_conductances() {
        let dt = 50e-6;
        let mut c = branch(0.0, 0.0, 1e-6);
        c.prepare(dt);
        assert_relative_eq!(c.conductance(), 2.0 * 1e-6 / dt, max_relative = 1e-12);

        let mut l = branch(0.0, 0.1, 0.0);
        l.prepare(dt);
        assert_relative_eq!(l.conductance(), dt / (2.0 * 0.1), max_relative = 1e-12);

        let mut r = branch(10.0, 0.0, 0.0);
        r.prepare(dt);
        assert_relative_eq!(r.conductance(), 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_capacitor_matches_two_c_over_dt_recursion() {
        // i(n) = 2C/dt (v(n) - v(n-1)) - i(n-1)
        let dt = 1e-4;
        let cap = 2e-6;
        let mut c = branch(0.0, 0.0, cap);
        c.prepare(dt);

        let volts = [1.0, 1.5, 0.25, -0.5];
        let mut v_prev = 0.0;
        let mut i_prev = 0.0;
        for &v in &volts {
            c.update_history();
            c.advance(v);
            let expected = 2.0 * cap / dt * (v - v_prev) - i_prev;
            assert_relative_eq!(c.current, expected, max_relative = 1e-12);
            assert_relative_eq!(c.capacitor_voltage(), v, max_relative = 1e-12);
            v_prev = v;
            i_prev = expected;
        }
    }

    #[test]
    fn test_inductor_dc_ramp() {
        // Constant voltage across L: i grows by v*dt/L per step
        let dt = 1e-4;
        let mut l = branch(0.0, 0.1, 0.0);
        l.prepare(dt);
        l.set_initial(0.0, 0.0, 10.0);
        for step in 1..=5 {
            l.update_history();
            l.advance(10.0);
            assert_relative_eq!(l.current, 10.0 * dt / 0.1 * step as f64, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_history_current_sign() {
        // A charged capacitor pushes current out of its from node
        let mut c = branch(0.0, 0.0, 1e-6);
        c.prepare(1e-5);
        c.set_initial(0.0, 5.0, 5.0);
        c.update_history();
        assert!(c.history_current() < 0.0);
        // Holding the voltage keeps the current at zero
        assert_relative_eq!(c.current_for(5.0), 0.0, epsilon = 1e-12);
    }
}
