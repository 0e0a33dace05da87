//! Constant-parameter distributed line (Bergeron model).
//!
//! A lossless line of surge impedance `Z` and travel time `tau` is seen
//! from each end as a resistor `Zc` in parallel with a current source
//! whose value depends on the far end `tau` seconds ago. Series losses are
//! lumped as R/4 at each end and R/2 in the middle:
//!
//! ```text
//!   Zc = Z + R/4,   h = (Z - R/4) / (Z + R/4)
//!   I_k(t) = -(1+h)/2 * (v_m(t-tau)/Zc + h i_m(t-tau))
//!            -(1-h)/2 * (v_k(t-tau)/Zc + h i_k(t-tau))
//! ```
//!
//! Past terminal samples live in a ring buffer. When `tau` is not an
//! integer multiple of the step, the delayed value is linearly
//! interpolated between the two neighbouring samples.

use super::history::HistoryBuffer;
use crate::network::{BranchId, NodeId};

/// Interpolation fractions closer than this to 0 or 1 snap to a whole step.
const FRACTION_SNAP: f64 = 1e-9;

/// Terminal voltages and currents (into the line) at both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LineSample {
    pub v: [f64; 2],
    pub i: [f64; 2],
}

impl LineSample {
    fn lerp(self, older: LineSample, frac: f64) -> LineSample {
        let mix = |a: f64, b: f64| (1.0 - frac) * a + frac * b;
        LineSample {
            v: [mix(self.v[0], older.v[0]), mix(self.v[1], older.v[1])],
            i: [mix(self.i[0], older.i[0]), mix(self.i[1], older.i[1])],
        }
    }
}

/// Single-conductor Bergeron line between `nodes[0]` (k) and `nodes[1]` (m).
#[derive(Debug, Clone)]
pub struct BergeronLine {
    pub id: BranchId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub surge_impedance: f64,
    pub travel_time: f64,
    pub resistance: f64,

    dt: f64,
    zc: f64,
    h: f64,
    /// Whole steps of the delay
    delay_steps: usize,
    /// Fractional remainder of the delay
    fraction: f64,
    history: HistoryBuffer<LineSample>,
    hist: [f64; 2],
    /// Currents into the line at each end after the last committed step
    pub currents: [f64; 2],
}

impl BergeronLine {
    pub fn new(
        id: BranchId,
        name: String,
        nodes: [NodeId; 2],
        surge_impedance: f64,
        travel_time: f64,
        resistance: f64,
    ) -> Self {
        let zc = surge_impedance + resistance / 4.0;
        Self {
            id,
            name,
            nodes,
            surge_impedance,
            travel_time,
            resistance,
            dt: 0.0,
            zc,
            h: (surge_impedance - resistance / 4.0) / zc,
            delay_steps: 1,
            fraction: 0.0,
            history: HistoryBuffer::new(3, LineSample::default()),
            hist: [0.0; 2],
            currents: [0.0; 2],
        }
    }

    /// Size the history buffer for time step `dt`.
    ///
    /// Returns `false` when the travel time is shorter than one step.
    pub fn prepare(&mut self, dt: f64) -> bool {
        if self.travel_time < dt * (1.0 - FRACTION_SNAP) {
            return false;
        }
        if dt == self.dt {
            return true;
        }
        let ratio = self.travel_time / dt;
        let mut whole = ratio.floor();
        let mut frac = ratio - whole;
        if frac < FRACTION_SNAP {
            frac = 0.0;
        } else if 1.0 - frac < FRACTION_SNAP {
            whole += 1.0;
            frac = 0.0;
        }
        self.delay_steps = (whole as usize).max(1);
        self.fraction = frac;
        self.history = HistoryBuffer::new(self.delay_steps + 2, LineSample::default());
        self.dt = dt;
        true
    }

    /// Characteristic conductance seen at each end.
    pub fn conductance(&self) -> f64 {
        1.0 / self.zc
    }

    /// Delay expressed in steps (whole and fractional parts).
    pub fn delay(&self) -> (usize, f64) {
        (self.delay_steps, self.fraction)
    }

    /// Number of past samples held.
    pub fn history_len(&self) -> usize {
        self.history.capacity()
    }

    fn delayed_sample(&self) -> LineSample {
        let newer = self.history.back(self.delay_steps);
        if self.fraction == 0.0 {
            newer
        } else {
            newer.lerp(self.history.back(self.delay_steps + 1), self.fraction)
        }
    }

    /// Compute both end history currents from the samples `tau` ago.
    pub fn update_history(&mut self) {
        let past = self.delayed_sample();
        let zc = self.zc;
        let h = self.h;
        let wave = |end: usize| past.v[end] / zc + h * past.i[end];
        let far = (1.0 + h) / 2.0;
        let near = (1.0 - h) / 2.0;
        self.hist = [
            -far * wave(1) - near * wave(0),
            -far * wave(0) - near * wave(1),
        ];
    }

    /// History currents, each flowing from its end node into the line.
    pub fn history_currents(&self) -> [f64; 2] {
        self.hist
    }

    /// Commit the step given the solved end voltages.
    pub fn advance(&mut self, v: [f64; 2]) {
        let g = self.conductance();
        self.currents = [g * v[0] + self.hist[0], g * v[1] + self.hist[1]];
        self.history.push(LineSample {
            v,
            i: self.currents,
        });
    }

    /// Fill the history with samples, `sample_at(k)` giving the state `k`
    /// steps before the initial time (k = 0 is the initial time itself).
    pub fn set_initial(&mut self, mut sample_at: impl FnMut(usize) -> LineSample) {
        self.history.fill_with(|k| sample_at(k - 1));
        let now = self.history.back(1);
        self.currents = now.i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(tau: f64, r: f64) -> BergeronLine {
        BergeronLine::new(BranchId(0), "L1".to_string(), [NodeId(1), NodeId(2)], 400.0, tau, r)
    }

    #[test]
    fn test_travel_time_below_step_rejected() {
        let mut l = line(20e-6, 0.0);
        assert!(!l.prepare(50e-6));
        assert!(l.prepare(10e-6));
    }

    #[test]
    fn test_fractional_delay() {
        let mut l = line(125e-6, 0.0);
        assert!(l.prepare(50e-6));
        let (whole, frac) = l.delay();
        assert_eq!(whole, 2);
        assert_relative_eq!(frac, 0.5, epsilon = 1e-9);
        assert!(l.history_len() >= 3);
    }

    #[test]
    fn test_lossless_wave_arrives_after_travel_time() {
        let dt = 10e-6;
        let mut l = line(30e-6, 0.0);
        assert!(l.prepare(dt));

        // Energize end k with 1 V for one step, far end shorted to ground
        l.update_history();
        l.advance([1.0, 0.0]);
        assert_relative_eq!(l.currents[0], 1.0 / 400.0, max_relative = 1e-12);

        for _ in 0..2 {
            l.update_history();
            assert_eq!(l.history_currents()[1], 0.0);
            l.advance([0.0, 0.0]);
        }
        // Three steps later the wave reaches end m: I_m = -(v_k/Z + i_k)
        l.update_history();
        assert_relative_eq!(l.history_currents()[1], -2.0 / 400.0, max_relative = 1e-12);
    }

    #[test]
    fn test_interpolated_history() {
        let dt = 10e-6;
        let mut l = line(15e-6, 0.0);
        assert!(l.prepare(dt));
        l.update_history();
        l.advance([1.0, 0.0]);
        l.update_history();
        l.advance([0.0, 0.0]);
        // Half of the pulse has arrived after 1.5 steps
        l.update_history();
        let past = -(1.0 / 400.0 + 1.0 / 400.0);
        assert_relative_eq!(l.history_currents()[1], 0.5 * past, max_relative = 1e-12);
    }
}
