//! Sinusoidal steady-state initialization.
//!
//! Before stepping, the network can be solved in the phasor domain at the
//! common frequency of its sources. A quantity with phasor `X` has the time
//! function `x(t) = Re(X e^{jwt})`, so a source `A cos(wt + phi)` has the
//! phasor `A e^{j phi}`. From the node phasors every element state the
//! trapezoidal recursions need (branch currents, capacitor voltages, line
//! histories over `[-tau, 0]`, switch currents, machine currents) is
//! evaluated at t = 0 and earlier.
//!
//! Element equivalents:
//! - series branch: `1 / (R + jwL + 1/(jwC))`
//! - coupled branch: `(R + jwL)^-1`
//! - line: exact lossless two-port, `Y11 = -j cot(wt)/Z`, `Y12 = j / (Z sin(wt))`
//! - closed switch: `1 / r_switch`
//! - machine: EMF behind `1 / (R + jwL)` per phase
//! - nonlinear elements: open

use std::f64::consts::PI;

use num_complex::Complex64;
use tracing::{debug, warn};

use crate::components::{Branch, LineSample, SourceKind, Switch, Waveform};
use crate::error::{EmtpError, Result};
use crate::network::{Network, NodeId};

use super::admittance::{AdmittanceSystem, NodeLayout};
use super::dense::DenseMatrix;

/// Relative tolerance for two source frequencies to count as equal.
const FREQUENCY_TOL: f64 = 1e-9;

fn j() -> Complex64 {
    Complex64::new(0.0, 1.0)
}

/// Node voltage phasors at one angular frequency.
#[derive(Debug, Clone)]
pub struct SteadyState {
    pub omega: f64,
    /// Indexed by node, ground included
    pub voltages: Vec<Complex64>,
    switch_resistance: f64,
}

/// Common angular frequency of the active sinusoidal sources, falling back
/// to the machines' rated frequency.
///
/// Returns `None` when the network has nothing to define a frequency.
pub fn network_frequency(network: &Network) -> Result<Option<f64>> {
    let mut omega: Option<(f64, String)> = None;
    let mut agree = |w: f64, who: &str| -> Result<()> {
        match omega {
            Some((w0, ref first)) if (w - w0).abs() > FREQUENCY_TOL * w0 => Err(EmtpError::simulation_param(format!(
                "steady-state initialization needs a single frequency: '{first}' runs at {:.6} Hz, '{who}' at {:.6} Hz",
                w0 / (2.0 * PI),
                w / (2.0 * PI)
            ))),
            Some(_) => Ok(()),
            None => {
                omega = Some((w, who.to_string()));
                Ok(())
            }
        }
    };
    for source in network.sources.iter().filter(|s| s.is_active(0.0)) {
        if let Some(w) = source.waveform.angular_frequency().filter(|w| *w > 0.0) {
            agree(w, &source.name)?;
        }
    }
    for m in &network.machines {
        agree(m.omega0(), &m.name)?;
    }
    Ok(omega.map(|(w, _)| w))
}

/// Phasor of a source at t = 0 (zero for non-sinusoidal sources).
fn source_phasor(waveform: &Waveform) -> Option<Complex64> {
    match waveform {
        Waveform::Cosine {
            amplitude,
            frequency,
            phase_deg,
        } if *frequency > 0.0 => Some(Complex64::from_polar(*amplitude, phase_deg.to_radians())),
        _ => None,
    }
}

fn line_admittances(z: f64, tau: f64, omega: f64) -> Option<(Complex64, Complex64)> {
    let theta = omega * tau;
    let s = theta.sin();
    if s.abs() < 1e-9 {
        return None;
    }
    let y11 = -j() * (theta.cos() / s) / z;
    let y12 = j() / (z * s);
    Some((y11, y12))
}

fn series_admittance(r: f64, l: f64, c: f64, omega: f64) -> Complex64 {
    let mut z = Complex64::new(r, omega * l);
    if c > 0.0 {
        z += Complex64::new(0.0, -1.0 / (omega * c));
    }
    z.inv()
}

fn coupled_impedance(r: &DenseMatrix<f64>, l: &DenseMatrix<f64>, omega: f64) -> DenseMatrix<Complex64> {
    let n = r.size();
    let mut z = DenseMatrix::zeros(n);
    for a in 0..n {
        for b in 0..n {
            z[(a, b)] = Complex64::new(r[(a, b)], omega * l[(a, b)]);
        }
    }
    z
}

fn machine_emf(eq_prime: f64, v_peak: f64, delta: f64) -> [Complex64; 3] {
    let amp = eq_prime * v_peak;
    [0.0, -2.0 * PI / 3.0, 2.0 * PI / 3.0].map(|shift| Complex64::from_polar(amp, delta + shift))
}

impl SteadyState {
    /// Solve the network phasors at angular frequency `omega`.
    pub fn solve(network: &Network, omega: f64, switch_resistance: f64, pivot_tolerance: f64) -> Result<Self> {
        let layout = NodeLayout::new(network);
        let mut system: AdmittanceSystem<Complex64> =
            AdmittanceSystem::new(layout, &network.incidence(), pivot_tolerance);

        for branch in &network.branches {
            match branch {
                Branch::Series(b) => {
                    let y = series_admittance(b.resistance, b.inductance, b.capacitance, omega);
                    if !y.is_finite() {
                        return Err(EmtpError::invalid_parameter(
                            &b.name,
                            "l",
                            "branch is series resonant at the steady-state frequency",
                        ));
                    }
                    system.stamp_admittance(b.nodes[0], b.nodes[1], y);
                }
                Branch::Coupled(b) => {
                    let y = coupled_impedance(&b.resistance, &b.inductance, omega)
                        .inverse()
                        .map_err(|_| EmtpError::invalid_parameter(&b.name, "l", "impedance matrix is singular"))?;
                    system.stamp_coupled(&b.from, &b.to, &y);
                }
                Branch::Line(b) => {
                    let (y11, y12) = line_admittances(b.surge_impedance, b.travel_time, omega).ok_or_else(|| {
                        EmtpError::invalid_parameter(
                            &b.name,
                            "tau",
                            "line is a whole number of half wavelengths at the steady-state frequency",
                        )
                    })?;
                    system.add_self(b.nodes[0], y11);
                    system.add_self(b.nodes[1], y11);
                    system.couple(b.nodes[0], b.nodes[1], y12);
                }
            }
        }

        let y_switch = Complex64::new(Switch::closed_conductance(switch_resistance), 0.0);
        system.set_switches(
            network
                .switches
                .iter()
                .filter(|s| s.closed)
                .map(|s| (s.nodes, y_switch)),
        );

        let mut voltages = vec![Complex64::new(0.0, 0.0); network.node_count()];
        for m in &network.machines {
            let (r, l) = m.phase_impedance();
            let y = Complex64::new(r, omega * l).inv();
            let emf = machine_emf(m.eq_prime(), m.peak_phase_voltage(), m.rotor_angle());
            for (k, &node) in m.terminals.iter().enumerate() {
                system.add_self(node, y);
                system.inject(node, y * emf[k]);
            }
        }

        for source in &network.sources {
            let phasor = if source.is_active(0.0) {
                source_phasor(&source.waveform)
            } else {
                None
            };
            if phasor.is_none() && source.is_active(0.0) {
                warn!(
                    source = %source.name,
                    "non-sinusoidal source ignored by steady-state initialization"
                );
            }
            let value = phasor.unwrap_or_default();
            match source.kind {
                SourceKind::Voltage => voltages[source.node.0] = value,
                SourceKind::Current => system.inject(source.node, value),
            }
        }

        system.factor().map_err(|pivot| EmtpError::SingularMatrix {
            bus: network.node_name(system.pivot_node(pivot)).to_string(),
            time: 0.0,
        })?;
        system.solve(&mut voltages);
        debug!(
            frequency = omega / (2.0 * PI),
            nodes = voltages.len() - 1,
            "steady-state phasors solved"
        );

        Ok(Self {
            omega,
            voltages,
            switch_resistance,
        })
    }

    /// Instantaneous value of a phasor at time `t`.
    pub fn at(&self, phasor: Complex64, t: f64) -> f64 {
        (phasor * Complex64::from_polar(1.0, self.omega * t)).re
    }

    pub fn node(&self, node: NodeId) -> Complex64 {
        self.voltages[node.0]
    }

    fn across(&self, a: NodeId, b: NodeId) -> Complex64 {
        self.node(a) - self.node(b)
    }

    /// Set every element state of `network` to the steady state at t = 0
    /// and write the node voltages at t = 0 into `voltages`.
    pub fn apply(&self, network: &mut Network, dt: f64, voltages: &mut [f64]) -> Result<()> {
        for (v, phasor) in voltages.iter_mut().zip(&self.voltages) {
            *v = self.at(*phasor, 0.0);
        }
        let omega = self.omega;

        for branch in &mut network.branches {
            match branch {
                Branch::Series(b) => {
                    let v = self.across(b.nodes[0], b.nodes[1]);
                    let i = series_admittance(b.resistance, b.inductance, b.capacitance, omega) * v;
                    let vc = if b.capacitance > 0.0 {
                        self.at(i / (j() * omega * b.capacitance), 0.0)
                    } else {
                        0.0
                    };
                    b.set_initial(self.at(i, 0.0), vc, self.at(v, 0.0));
                }
                Branch::Coupled(b) => {
                    let v: Vec<Complex64> = b
                        .from
                        .iter()
                        .zip(&b.to)
                        .map(|(&f, &t)| self.across(f, t))
                        .collect();
                    let y = coupled_impedance(&b.resistance, &b.inductance, omega)
                        .inverse()
                        .map_err(|_| EmtpError::invalid_parameter(&b.name, "l", "impedance matrix is singular"))?;
                    let i = y.mul_vec(&v);
                    let currents: Vec<f64> = i.iter().map(|x| self.at(*x, 0.0)).collect();
                    let volts: Vec<f64> = v.iter().map(|x| self.at(*x, 0.0)).collect();
                    b.set_initial(&currents, &volts);
                }
                Branch::Line(b) => {
                    let Some((y11, y12)) = line_admittances(b.surge_impedance, b.travel_time, omega) else {
                        return Err(EmtpError::invalid_parameter(&b.name, "tau", "line resonant at steady state"));
                    };
                    let vk = self.node(b.nodes[0]);
                    let vm = self.node(b.nodes[1]);
                    let ik = y11 * vk + y12 * vm;
                    let im = y12 * vk + y11 * vm;
                    b.set_initial(|k| {
                        let t = -(k as f64) * dt;
                        LineSample {
                            v: [self.at(vk, t), self.at(vm, t)],
                            i: [self.at(ik, t), self.at(im, t)],
                        }
                    });
                }
            }
        }

        for sw in network.switches.iter_mut().filter(|s| s.closed) {
            let i = self.across(sw.nodes[0], sw.nodes[1]) * Switch::closed_conductance(self.switch_resistance);
            sw.previous_current = self.at(i, -dt);
            sw.current = self.at(i, 0.0);
        }

        for el in &mut network.nonlinear {
            let v = self.across(el.nodes[0], el.nodes[1]);
            let flux = self.at(v / (j() * omega), 0.0);
            el.set_initial(self.at(v, 0.0), flux);
        }

        for (m, setpoint) in network.machines.iter_mut().zip(&network.machine_setpoints) {
            let (r, l) = m.phase_impedance();
            let y = Complex64::new(r, omega * l).inv();
            let emf = machine_emf(m.eq_prime(), m.peak_phase_voltage(), m.rotor_angle());
            let mut currents = [0.0; 3];
            let mut v_term = [0.0; 3];
            for k in 0..3 {
                let v = self.node(m.terminals[k]);
                currents[k] = self.at(y * (emf[k] - v), 0.0);
                v_term[k] = self.at(v, 0.0);
            }
            m.set_initial(currents, v_term, 0.0, setpoint.field_voltage, setpoint.mechanical_power);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkDescription;
    use approx::assert_relative_eq;

    fn cosine(amplitude: f64, frequency: f64) -> Waveform {
        Waveform::Cosine {
            amplitude,
            frequency,
            phase_deg: 0.0,
        }
    }

    #[test]
    fn test_rl_phasor() {
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source("E", "S", SourceKind::Voltage, cosine(100.0, 50.0)))
            .with_branch(NetworkDescription::series("RL", "S", "0", 10.0, 0.1, 0.0));
        let mut net = Network::load(&desc).unwrap();
        let omega = network_frequency(&net).unwrap().unwrap();
        assert_relative_eq!(omega, 2.0 * PI * 50.0, max_relative = 1e-12);

        let ss = SteadyState::solve(&net, omega, 1e-6, 1e-8).unwrap();
        let mut v = vec![0.0; net.node_count()];
        ss.apply(&mut net, 50e-6, &mut v).unwrap();
        let z = Complex64::new(10.0, omega * 0.1);
        let expected = (Complex64::new(100.0, 0.0) / z).re;
        let Branch::Series(b) = &net.branches[0] else {
            panic!("series branch expected")
        };
        assert_relative_eq!(b.current, expected, max_relative = 1e-12);
        assert_relative_eq!(v[1], 100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_mixed_frequencies_rejected() {
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source("E1", "A", SourceKind::Voltage, cosine(1.0, 50.0)))
            .with_source(NetworkDescription::source("E2", "B", SourceKind::Voltage, cosine(1.0, 60.0)))
            .with_branch(NetworkDescription::series("R", "A", "B", 1.0, 0.0, 0.0));
        let net = Network::load(&desc).unwrap();
        assert!(matches!(
            network_frequency(&net),
            Err(EmtpError::InvalidSimulationParam { .. })
        ));
    }

    #[test]
    fn test_dc_only_has_no_frequency() {
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source(
                "E",
                "A",
                SourceKind::Voltage,
                Waveform::Dc { amplitude: 1.0 },
            ))
            .with_branch(NetworkDescription::series("R", "A", "0", 1.0, 0.0, 0.0));
        let net = Network::load(&desc).unwrap();
        assert_eq!(network_frequency(&net).unwrap(), None);
    }

    #[test]
    fn test_eighth_wave_line_input_impedance() {
        // Z_in = Z (R + jZ tan) / (Z + jR tan) has magnitude Z at 45 degrees
        let f = 50.0;
        let tau = 1.0 / (8.0 * f);
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source("I", "K", SourceKind::Current, cosine(1.0, f)))
            .with_branch(crate::network::BranchRecord::Line {
                name: "L".to_string(),
                from: "K".to_string(),
                to: "M".to_string(),
                surge_impedance: 100.0,
                travel_time: tau,
                resistance: 0.0,
            })
            .with_branch(NetworkDescription::series("R", "M", "0", 50.0, 0.0, 0.0));
        let net = Network::load(&desc).unwrap();
        let ss = SteadyState::solve(&net, 2.0 * PI * f, 1e-6, 1e-8).unwrap();
        let k = net.find_node("K").unwrap();
        assert_relative_eq!(ss.node(k).norm(), 100.0, max_relative = 1e-9);
    }
}
