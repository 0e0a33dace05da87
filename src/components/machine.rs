//! Three-phase synchronous machine, transient-EMF model.
//!
//! The stator is an internal EMF behind `ra + j xd'` per phase. The EMF is
//! a balanced set rotating with the rotor:
//!
//! ```text
//!   e_k = E'q * Vpk * cos(w0 t + delta - 2 pi k / 3)
//! ```
//!
//! and the rotor obeys (per unit on the machine base)
//!
//! ```text
//!   2H d(dw)/dt    = Pm - Pe - D dw
//!   d(delta)/dt    = w0 dw
//!   Td0' dE'q/dt   = Efd - E'q - (xd - xd') id
//! ```
//!
//! The network sees each phase as a trapezoidal R-L companion with a
//! Norton injection. States are integrated with Heun's method from the
//! terminal currents of step n, producing the EMF used in step n+1.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::network::{BlockId, MachineId, NodeId};

/// Nameplate and per-unit data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineParams {
    /// Three-phase rating in MVA
    pub rating_mva: f64,
    /// Rated line-to-line RMS voltage in kV
    pub voltage_kv: f64,
    /// Rated frequency in Hz
    pub frequency: f64,
    /// Armature resistance (pu)
    pub ra: f64,
    /// Synchronous d-axis reactance (pu)
    pub xd: f64,
    /// Transient d-axis reactance (pu)
    pub xd_prime: f64,
    /// Open-circuit transient time constant (s)
    pub td0_prime: f64,
    /// Inertia constant (s)
    pub inertia: f64,
    /// Damping (pu power per pu speed)
    #[serde(default)]
    pub damping: f64,
}

impl MachineParams {
    /// Check parameter ranges, naming the first offending field.
    pub fn validate(&self) -> std::result::Result<(), (&'static str, &'static str)> {
        if self.rating_mva <= 0.0 {
            return Err(("mva", "rating must be positive"));
        }
        if self.voltage_kv <= 0.0 {
            return Err(("kv", "rated voltage must be positive"));
        }
        if self.frequency <= 0.0 {
            return Err(("f", "frequency must be positive"));
        }
        if self.ra < 0.0 {
            return Err(("ra", "resistance cannot be negative"));
        }
        if self.xd_prime <= 0.0 {
            return Err(("xdp", "transient reactance must be positive"));
        }
        if self.xd < self.xd_prime {
            return Err(("xd", "synchronous reactance must not be below xd'"));
        }
        if self.td0_prime <= 0.0 {
            return Err(("tdop", "time constant must be positive"));
        }
        if self.inertia <= 0.0 {
            return Err(("h", "inertia must be positive"));
        }
        if self.damping < 0.0 {
            return Err(("d", "damping cannot be negative"));
        }
        Ok(())
    }
}

/// Rotor and field state vector.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RotorState {
    delta: f64,
    speed_dev: f64,
    eq_prime: f64,
}

/// A synchronous machine connected to three terminal nodes.
#[derive(Debug, Clone)]
pub struct SynchronousMachine {
    pub id: MachineId,
    pub name: String,
    pub terminals: [NodeId; 3],
    pub params: MachineParams,

    /// Field voltage setpoint (pu)
    pub field_voltage: f64,
    /// Mechanical power setpoint (pu)
    pub mechanical_power: f64,
    /// Control block driving the field voltage
    pub field_signal: Option<BlockId>,
    /// Control block driving the mechanical power
    pub power_signal: Option<BlockId>,

    omega0: f64,
    v_peak: f64,
    i_peak: f64,
    s_base: f64,
    r_ohm: f64,
    l_henry: f64,

    dt: f64,
    g: f64,
    b: f64,

    state: RotorState,
    emf: [f64; 3],
    hist: [f64; 3],
    v_rl: [f64; 3],
    /// Phase currents into the network after the last committed step
    pub currents: [f64; 3],
    /// Electrical power (pu) at the last committed step
    pub electrical_power: f64,
}

impl SynchronousMachine {
    /// Create a machine at rest in the frame: rotor angle `delta` (rad),
    /// internal EMF `eq_prime` (pu), zero speed deviation.
    pub fn new(
        id: MachineId,
        name: String,
        terminals: [NodeId; 3],
        params: MachineParams,
        delta: f64,
        eq_prime: f64,
    ) -> Self {
        let s_base = params.rating_mva * 1e6;
        let v_ll = params.voltage_kv * 1e3;
        let z_base = v_ll * v_ll / s_base;
        let omega0 = 2.0 * PI * params.frequency;
        let v_peak = v_ll * (2.0f64 / 3.0).sqrt();
        Self {
            id,
            name,
            terminals,
            field_voltage: eq_prime,
            mechanical_power: 0.0,
            field_signal: None,
            power_signal: None,
            omega0,
            v_peak,
            i_peak: 2.0 * s_base / (3.0 * v_peak),
            s_base,
            r_ohm: params.ra * z_base,
            l_henry: params.xd_prime * z_base / omega0,
            params,
            dt: 0.0,
            g: 0.0,
            b: 0.0,
            state: RotorState {
                delta,
                speed_dev: 0.0,
                eq_prime,
            },
            emf: [0.0; 3],
            hist: [0.0; 3],
            v_rl: [0.0; 3],
            currents: [0.0; 3],
            electrical_power: 0.0,
        }
    }

    pub fn prepare(&mut self, dt: f64) {
        if dt == self.dt {
            return;
        }
        let a = 2.0 * self.l_henry / dt;
        self.g = 1.0 / (self.r_ohm + a);
        self.b = a - self.r_ohm;
        self.dt = dt;
    }

    /// Rated angular frequency (rad/s).
    pub fn omega0(&self) -> f64 {
        self.omega0
    }

    /// Series impedance of one phase in ohms: `(R, L)`.
    pub fn phase_impedance(&self) -> (f64, f64) {
        (self.r_ohm, self.l_henry)
    }

    /// Peak phase voltage corresponding to 1 pu EMF.
    pub fn peak_phase_voltage(&self) -> f64 {
        self.v_peak
    }

    pub fn rotor_angle(&self) -> f64 {
        self.state.delta
    }

    pub fn speed_deviation(&self) -> f64 {
        self.state.speed_dev
    }

    pub fn eq_prime(&self) -> f64 {
        self.state.eq_prime
    }

    /// Speed in pu of synchronous speed.
    pub fn speed(&self) -> f64 {
        1.0 + self.state.speed_dev
    }

    fn angles(&self, t: f64, delta: f64) -> [f64; 3] {
        let theta = self.omega0 * t + delta;
        [theta, theta - 2.0 * PI / 3.0, theta + 2.0 * PI / 3.0]
    }

    /// Set the EMF used in the step at time `t` from the current state.
    pub fn set_emf_for(&mut self, t: f64) {
        let theta = self.angles(t, self.state.delta);
        let amp = self.state.eq_prime * self.v_peak;
        self.emf = [amp * theta[0].cos(), amp * theta[1].cos(), amp * theta[2].cos()];
    }

    /// EMF of the step in progress.
    pub fn emf(&self) -> [f64; 3] {
        self.emf
    }

    /// Companion conductance, terminal to ground, per phase.
    pub fn conductance(&self) -> f64 {
        self.g
    }

    pub fn update_history(&mut self) {
        for k in 0..3 {
            self.hist[k] = self.g * (self.v_rl[k] + self.b * self.currents[k]);
        }
    }

    /// Norton current injected into terminal `k` (on top of `-g v_k`).
    pub fn norton_injection(&self, k: usize) -> f64 {
        self.g * self.emf[k] + self.hist[k]
    }

    /// Commit the electrical step at time `t`, then integrate the rotor to
    /// `t + dt` and prepare the EMF for the next step.
    pub fn advance(&mut self, v_term: [f64; 3], t: f64) {
        for k in 0..3 {
            self.v_rl[k] = self.emf[k] - v_term[k];
            self.currents[k] = self.g * self.v_rl[k] + self.hist[k];
        }
        let (pe, id) = self.air_gap_quantities(t);
        self.electrical_power = pe;
        self.integrate(pe, id);
        self.set_emf_for(t + self.dt);
    }

    /// Electrical power and d-axis current (both pu) at time `t`.
    fn air_gap_quantities(&self, t: f64) -> (f64, f64) {
        let theta = self.angles(t, self.state.delta);
        let mut power = 0.0;
        let mut id = 0.0;
        for k in 0..3 {
            power += self.emf[k] * self.currents[k];
            id += self.currents[k] * theta[k].sin();
        }
        (power / self.s_base, 2.0 / 3.0 * id / self.i_peak)
    }

    fn derivative(&self, x: RotorState, pe: f64, id: f64) -> RotorState {
        let p = &self.params;
        RotorState {
            delta: self.omega0 * x.speed_dev,
            speed_dev: (self.mechanical_power - pe - p.damping * x.speed_dev) / (2.0 * p.inertia),
            eq_prime: (self.field_voltage - x.eq_prime - (p.xd - p.xd_prime) * id) / p.td0_prime,
        }
    }

    fn integrate(&mut self, pe: f64, id: f64) {
        let dt = self.dt;
        let x0 = self.state;
        let k1 = self.derivative(x0, pe, id);
        let predictor = RotorState {
            delta: x0.delta + dt * k1.delta,
            speed_dev: x0.speed_dev + dt * k1.speed_dev,
            eq_prime: x0.eq_prime + dt * k1.eq_prime,
        };
        let k2 = self.derivative(predictor, pe, id);
        self.state = RotorState {
            delta: x0.delta + 0.5 * dt * (k1.delta + k2.delta),
            speed_dev: x0.speed_dev + 0.5 * dt * (k1.speed_dev + k2.speed_dev),
            eq_prime: x0.eq_prime + 0.5 * dt * (k1.eq_prime + k2.eq_prime),
        };
    }

    /// Set the initial stator state at `t0` and derive the operating point.
    ///
    /// `currents` are phase currents into the network and `v_term` the
    /// terminal voltages. Setpoints that are not given explicitly are chosen
    /// so that the rotor starts in equilibrium.
    pub fn set_initial(
        &mut self,
        currents: [f64; 3],
        v_term: [f64; 3],
        t0: f64,
        field_voltage: Option<f64>,
        mechanical_power: Option<f64>,
    ) {
        self.set_emf_for(t0);
        self.currents = currents;
        for k in 0..3 {
            self.v_rl[k] = self.emf[k] - v_term[k];
        }
        let (pe, id) = self.air_gap_quantities(t0);
        self.electrical_power = pe;
        let p = &self.params;
        self.field_voltage =
            field_voltage.unwrap_or(self.state.eq_prime + (p.xd - p.xd_prime) * id);
        self.mechanical_power = mechanical_power.unwrap_or(pe);
    }

    /// Prepare the EMF for the first step after `t0`.
    pub fn start(&mut self, t0: f64) {
        let (pe, id) = self.air_gap_quantities(t0);
        self.integrate(pe, id);
        self.set_emf_for(t0 + self.dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> MachineParams {
        MachineParams {
            rating_mva: 100.0,
            voltage_kv: 13.8,
            frequency: 60.0,
            ra: 0.003,
            xd: 1.8,
            xd_prime: 0.3,
            td0_prime: 8.0,
            inertia: 3.5,
            damping: 0.0,
        }
    }

    fn machine() -> SynchronousMachine {
        let mut m = SynchronousMachine::new(
            MachineId(0),
            "G1".to_string(),
            [NodeId(1), NodeId(2), NodeId(3)],
            params(),
            0.0,
            1.0,
        );
        m.prepare(50e-6);
        m
    }

    #[test]
    fn test_balanced_emf() {
        let mut m = machine();
        m.set_emf_for(0.0);
        let e = m.emf();
        assert_relative_eq!(e[0], m.peak_phase_voltage(), max_relative = 1e-12);
        assert_relative_eq!(e[0] + e[1] + e[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_open_circuit_equilibrium() {
        let mut m = machine();
        m.set_initial([0.0; 3], [0.0; 3], 0.0, None, None);
        assert_relative_eq!(m.field_voltage, 1.0, max_relative = 1e-12);
        assert_relative_eq!(m.mechanical_power, 0.0, epsilon = 1e-12);
        m.start(0.0);
        for n in 1..100 {
            let t = n as f64 * 50e-6;
            m.update_history();
            // Open terminals: terminal voltage equals the EMF, no current
            let e = m.emf();
            m.advance(e, t);
        }
        assert_relative_eq!(m.speed(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(m.eq_prime(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_accelerates_with_mechanical_power() {
        let mut m = machine();
        m.set_initial([0.0; 3], [0.0; 3], 0.0, None, Some(0.5));
        m.start(0.0);
        assert!(m.speed_deviation() > 0.0);
        // 2H d(dw)/dt = Pm
        assert_relative_eq!(m.speed_deviation(), 0.5 / 7.0 * 50e-6, max_relative = 1e-9);
    }

    #[test]
    fn test_parameter_validation() {
        let mut p = params();
        p.xd = 0.1;
        assert_eq!(p.validate().unwrap_err().0, "xd");
        assert!(params().validate().is_ok());
    }
}
