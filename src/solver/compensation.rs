//! Compensation-method solution of nonlinear elements.
//!
//! The linear network is solved with every nonlinear element open, giving
//! the open-circuit voltages `v0`. Seen from the element terminals the
//! network is then a Thevenin equivalent `v = v0 - Z i`, where column `j`
//! of `Z` is the response to a unit current through element `j`:
//!
//! ```text
//!   x_j  = Y^-1 (e_a(j) - e_b(j))
//!   Z_kj = x_j[a(k)] - x_j[b(k)]
//! ```
//!
//! Newton's method solves `F(v) = v - v0 + Z i(v) = 0` with the dense
//! Jacobian `I + Z diag(di/dv)`, after which the converged currents are
//! superposed on the linear solution: `V -= sum_j x_j i_j`.

use crate::components::NonlinearElement;

use super::admittance::AdmittanceSystem;
use super::dense::DenseMatrix;

/// Result of the nonlinear iteration of one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NonlinearOutcome {
    Converged { iterations: usize },
    /// Iteration limit reached; `residual` is the last voltage correction
    NotConverged { iterations: usize, residual: f64 },
}

impl NonlinearOutcome {
    pub fn iterations(&self) -> usize {
        match *self {
            NonlinearOutcome::Converged { iterations } | NonlinearOutcome::NotConverged { iterations, .. } => {
                iterations
            }
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, NonlinearOutcome::Converged { .. })
    }
}

/// Iteration limits.
#[derive(Debug, Clone, Copy)]
pub struct NewtonSettings {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub dt: f64,
}

/// Thevenin columns cached between refactorizations.
#[derive(Debug, Clone, Default)]
pub struct Compensation {
    columns: Option<Vec<Vec<f64>>>,
    thevenin: Option<DenseMatrix<f64>>,
}

impl Compensation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached columns; required after every refactorization.
    pub fn invalidate(&mut self) {
        self.columns = None;
        self.thevenin = None;
    }

    fn ensure_columns(&mut self, system: &AdmittanceSystem<f64>, elements: &[NonlinearElement]) {
        if self.columns.is_some() {
            return;
        }
        let columns: Vec<Vec<f64>> = elements
            .iter()
            .map(|e| system.unit_response(e.nodes[0], e.nodes[1]))
            .collect();
        let n = elements.len();
        let mut z = DenseMatrix::zeros(n);
        for (j, x) in columns.iter().enumerate() {
            for (k, e) in elements.iter().enumerate() {
                z[(k, j)] = system.response_at(x, e.nodes[0]) - system.response_at(x, e.nodes[1]);
            }
        }
        self.columns = Some(columns);
        self.thevenin = Some(z);
    }

    /// Solve the nonlinear elements of one step.
    ///
    /// `voltages` holds the open-circuit solution on entry and the
    /// compensated solution on return. The returned currents flow from
    /// `nodes[0]` to `nodes[1]` of each element.
    pub fn solve(
        &mut self,
        system: &AdmittanceSystem<f64>,
        elements: &[NonlinearElement],
        voltages: &mut [f64],
        settings: NewtonSettings,
    ) -> (NonlinearOutcome, Vec<f64>) {
        let n = elements.len();
        if n == 0 {
            return (NonlinearOutcome::Converged { iterations: 0 }, Vec::new());
        }
        self.ensure_columns(system, elements);
        let (Some(columns), Some(z)) = (&self.columns, &self.thevenin) else {
            return (NonlinearOutcome::Converged { iterations: 0 }, vec![0.0; n]);
        };

        let v0: Vec<f64> = elements
            .iter()
            .map(|e| voltages[e.nodes[0].0] - voltages[e.nodes[1].0])
            .collect();
        let mut v: Vec<f64> = elements.iter().map(|e| e.voltage).collect();
        let mut currents = vec![0.0; n];
        let mut outcome = NonlinearOutcome::NotConverged {
            iterations: 0,
            residual: f64::INFINITY,
        };

        for iteration in 1..=settings.max_iterations {
            let mut slopes = vec![0.0; n];
            for (k, e) in elements.iter().enumerate() {
                let (i, g) = e.evaluate(v[k], settings.dt);
                currents[k] = i;
                slopes[k] = g;
            }
            let zi = z.mul_vec(&currents);
            let residual: Vec<f64> = (0..n).map(|k| -(v[k] - v0[k] + zi[k])).collect();
            let mut jacobian = DenseMatrix::identity(n);
            for k in 0..n {
                for j in 0..n {
                    jacobian[(k, j)] += z[(k, j)] * slopes[j];
                }
            }
            let Ok(delta) = jacobian.solve(&residual) else {
                break;
            };
            let max_delta = delta.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
            for k in 0..n {
                v[k] += delta[k];
            }
            outcome = if max_delta < settings.tolerance {
                NonlinearOutcome::Converged { iterations: iteration }
            } else {
                NonlinearOutcome::NotConverged {
                    iterations: iteration,
                    residual: max_delta,
                }
            };
            if outcome.is_converged() || !max_delta.is_finite() {
                break;
            }
        }

        // Currents consistent with the final voltages
        for (k, e) in elements.iter().enumerate() {
            currents[k] = e.evaluate(v[k], settings.dt).0;
        }
        let layout = system.layout();
        for (x, &i) in columns.iter().zip(&currents) {
            for (row, dv) in x.iter().enumerate() {
                voltages[layout.unknown_node(row).0] -= dv * i;
            }
        }
        (outcome, currents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Characteristic, SourceKind, Waveform};
    use crate::network::{Network, NetworkDescription, NodeId, NonlinearId, NonlinearRecord};
    use crate::solver::admittance::NodeLayout;
    use approx::assert_relative_eq;

    fn settings() -> NewtonSettings {
        NewtonSettings {
            tolerance: 1e-9,
            max_iterations: 50,
            dt: 1e-6,
        }
    }

    /// 10 V behind 1 ohm feeding OUT, element from OUT to ground.
    fn thevenin_case(characteristic: Characteristic) -> (Network, AdmittanceSystem<f64>, NodeId) {
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source(
                "E",
                "IN",
                SourceKind::Voltage,
                Waveform::Dc { amplitude: 10.0 },
            ))
            .with_branch(NetworkDescription::series("R1", "IN", "OUT", 1.0, 0.0, 0.0))
            .with_branch(NetworkDescription::series("R2", "OUT", "0", 1e6, 0.0, 0.0))
            .with_nonlinear(NonlinearRecord {
                name: "NL".to_string(),
                from: "OUT".to_string(),
                to: "0".to_string(),
                characteristic,
            });
        let net = Network::load(&desc).unwrap();
        let input = net.find_node("IN").unwrap();
        let out = net.find_node("OUT").unwrap();
        let mut sys = AdmittanceSystem::new(NodeLayout::new(&net), &net.incidence(), 1e-8);
        sys.stamp_admittance(input, out, 1.0);
        sys.stamp_admittance(out, NodeId::GROUND, 1e-6);
        sys.factor().unwrap();
        (net, sys, out)
    }

    #[test]
    fn test_linear_element_matches_resistor() {
        // A 1 ohm piecewise-linear element halves the 10 V source
        let (net, sys, out) = thevenin_case(Characteristic::PiecewiseLinear {
            points: vec![[1.0, 1.0], [2.0, 2.0]],
        });
        let mut v = vec![0.0; net.node_count()];
        v[net.find_node("IN").unwrap().0] = 10.0;
        sys.solve(&mut v);
        let mut comp = Compensation::new();
        let (outcome, currents) = comp.solve(&sys, &net.nonlinear, &mut v, settings());
        assert!(outcome.is_converged());
        assert_relative_eq!(v[out.0], 10.0 / (2.0 + 1e-6), max_relative = 1e-9);
        assert_relative_eq!(currents[0], v[out.0], max_relative = 1e-9);
    }

    #[test]
    fn test_diode_clamps() {
        let (net, sys, out) = thevenin_case(Characteristic::Diode {
            saturation_current: 1e-14,
            emission: 1.0,
            v_crit: 0.8,
        });
        let mut v = vec![0.0; net.node_count()];
        v[net.find_node("IN").unwrap().0] = 10.0;
        sys.solve(&mut v);
        let mut comp = Compensation::new();
        let (outcome, currents) = comp.solve(&sys, &net.nonlinear, &mut v, settings());
        assert!(outcome.is_converged(), "{outcome:?}");
        // Linear extrapolation above v_crit keeps the clamp within a volt of it
        assert!(v[out.0] > 0.8 && v[out.0] < 2.0, "clamped at {}", v[out.0]);
        // KCL at OUT: source current equals diode plus shunt current
        assert_relative_eq!(10.0 - v[out.0], currents[0] + v[out.0] * 1e-6, max_relative = 1e-6);
    }

    #[test]
    fn test_iteration_limit_reported() {
        let (net, sys, _) = thevenin_case(Characteristic::Diode {
            saturation_current: 1e-14,
            emission: 1.0,
            v_crit: 0.8,
        });
        let mut v = vec![0.0; net.node_count()];
        v[net.find_node("IN").unwrap().0] = 10.0;
        sys.solve(&mut v);
        let mut comp = Compensation::new();
        let limited = NewtonSettings {
            max_iterations: 1,
            ..settings()
        };
        let (outcome, _) = comp.solve(&sys, &net.nonlinear, &mut v, limited);
        assert!(matches!(
            outcome,
            NonlinearOutcome::NotConverged { iterations: 1, residual } if residual > 1e-9
        ));
        assert_eq!(net.nonlinear[0].id, NonlinearId(0));
    }
}
