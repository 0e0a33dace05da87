//! Nonlinear elements solved by the compensation method.
//!
//! Each element is a two-terminal branch with a current that depends on
//! its own terminal voltage. The solver asks for `i(v)` and `di/dv` and
//! iterates on the Thevenin equivalent seen by the element.
//!
//! Supported characteristics:
//! - Piecewise-linear v-i curve, odd-symmetric through the origin
//! - Metal-oxide arrester `i = p (|v| / v_ref)^q sign(v)`
//! - Shockley diode with linear extrapolation above `v_crit`
//! - Saturable inductor: piecewise-linear current-flux curve, flux obtained
//!   by trapezoidal integration of the terminal voltage

use serde::{Deserialize, Serialize};

use crate::network::{NodeId, NonlinearId};
use crate::THERMAL_VOLTAGE;

/// Conductance floor keeping the Jacobian well conditioned.
const MIN_CONDUCTANCE: f64 = 1e-12;

/// Nonlinear v-i (or flux-current) characteristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Characteristic {
    /// `(v, i)` breakpoints in the first quadrant, ascending in `v`
    PiecewiseLinear { points: Vec<[f64; 2]> },
    /// Exponential arrester characteristic
    Arrester { v_ref: f64, p: f64, q: f64 },
    /// Junction diode
    Diode {
        #[serde(default = "default_is")]
        saturation_current: f64,
        #[serde(default = "default_emission")]
        emission: f64,
        #[serde(default = "default_vcrit")]
        v_crit: f64,
    },
    /// `(i, flux)` breakpoints in the first quadrant, ascending
    Saturable { points: Vec<[f64; 2]> },
}

fn default_is() -> f64 {
    1e-14
}

fn default_emission() -> f64 {
    1.0
}

fn default_vcrit() -> f64 {
    0.7
}

impl Characteristic {
    /// Check the characteristic is physically meaningful.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Characteristic::PiecewiseLinear { points } | Characteristic::Saturable { points } => {
                if points.is_empty() {
                    return Err("at least one breakpoint is required".to_string());
                }
                let strict_y = matches!(self, Characteristic::Saturable { .. });
                let mut prev = [0.0, 0.0];
                for p in points {
                    let y_ok = if strict_y { p[1] > prev[1] } else { p[1] >= prev[1] };
                    if !(p[0] > prev[0]) || !y_ok {
                        return Err("breakpoints must be ascending and monotone".to_string());
                    }
                    prev = *p;
                }
                Ok(())
            }
            Characteristic::Arrester { v_ref, p, q } => {
                if *v_ref <= 0.0 || *p <= 0.0 || *q < 1.0 {
                    Err("arrester needs v_ref > 0, p > 0 and q >= 1".to_string())
                } else {
                    Ok(())
                }
            }
            Characteristic::Diode {
                saturation_current,
                emission,
                v_crit,
            } => {
                if *saturation_current <= 0.0 || *emission <= 0.0 || *v_crit <= 0.0 {
                    Err("diode parameters must be positive".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Odd-symmetric piecewise-linear function through the origin.
///
/// Returns the value and slope; beyond the last breakpoint the last
/// segment is extended.
fn odd_piecewise(points: &[[f64; 2]], x: f64) -> (f64, f64) {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let ax = x.abs();
    let mut x0 = 0.0;
    let mut y0 = 0.0;
    for p in points {
        if ax <= p[0] {
            let slope = (p[1] - y0) / (p[0] - x0);
            return (sign * (y0 + slope * (ax - x0)), slope);
        }
        x0 = p[0];
        y0 = p[1];
    }
    let n = points.len();
    let (xa, ya) = if n >= 2 {
        (points[n - 2][0], points[n - 2][1])
    } else {
        (0.0, 0.0)
    };
    let slope = (y0 - ya) / (x0 - xa);
    (sign * (y0 + slope * (ax - x0)), slope)
}

/// Flux-current curve given as `(i, flux)` pairs, evaluated as current of flux.
fn saturation_current(points: &[[f64; 2]], flux: f64) -> (f64, f64) {
    let sign = if flux < 0.0 { -1.0 } else { 1.0 };
    let af = flux.abs();
    let mut f0 = 0.0;
    let mut i0 = 0.0;
    let mut slope = 0.0;
    for p in points {
        slope = (p[0] - i0) / (p[1] - f0);
        if af <= p[1] {
            return (sign * (i0 + slope * (af - f0)), slope);
        }
        i0 = p[0];
        f0 = p[1];
    }
    (sign * (i0 + slope * (af - f0)), slope)
}

/// A nonlinear branch between two nodes.
#[derive(Debug, Clone)]
pub struct NonlinearElement {
    pub id: NonlinearId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub characteristic: Characteristic,
    /// Terminal voltage at the last committed step
    pub voltage: f64,
    /// Current (from -> to) at the last committed step
    pub current: f64,
    /// Flux linkage (saturable inductors only)
    pub flux: f64,
}

impl NonlinearElement {
    pub fn new(id: NonlinearId, name: String, nodes: [NodeId; 2], characteristic: Characteristic) -> Self {
        Self {
            id,
            name,
            nodes,
            characteristic,
            voltage: 0.0,
            current: 0.0,
            flux: 0.0,
        }
    }

    fn flux_at(&self, v: f64, dt: f64) -> f64 {
        self.flux + 0.5 * dt * (self.voltage + v)
    }

    /// Current and incremental conductance at terminal voltage `v` for the
    /// step in progress.
    pub fn evaluate(&self, v: f64, dt: f64) -> (f64, f64) {
        let (i, g) = match &self.characteristic {
            Characteristic::PiecewiseLinear { points } => odd_piecewise(points, v),
            Characteristic::Arrester { v_ref, p, q } => {
                let ratio = v.abs() / v_ref;
                let i = p * ratio.powf(*q) * v.signum();
                let g = p * q / v_ref * ratio.powf(q - 1.0);
                (i, g)
            }
            Characteristic::Diode {
                saturation_current,
                emission,
                v_crit,
            } => diode(*saturation_current, emission * THERMAL_VOLTAGE, *v_crit, v),
            Characteristic::Saturable { points } => {
                let (i, di_dflux) = saturation_current(points, self.flux_at(v, dt));
                (i, di_dflux * 0.5 * dt)
            }
        };
        (i, g.max(MIN_CONDUCTANCE))
    }

    /// Commit the converged terminal voltage and current.
    pub fn commit(&mut self, v: f64, i: f64, dt: f64) {
        if matches!(self.characteristic, Characteristic::Saturable { .. }) {
            self.flux = self.flux_at(v, dt);
        }
        self.voltage = v;
        self.current = i;
    }

    /// Set the initial terminal voltage and flux (e.g. from steady state).
    pub fn set_initial(&mut self, voltage: f64, flux: f64) {
        self.voltage = voltage;
        self.flux = flux;
    }
}

/// Shockley diode with linear extrapolation above `v_crit`.
fn diode(is: f64, n_vt: f64, v_crit: f64, v: f64) -> (f64, f64) {
    if v > v_crit {
        let e = (v_crit / n_vt).exp();
        let i_crit = is * (e - 1.0);
        let g_crit = is / n_vt * e;
        (i_crit + g_crit * (v - v_crit), g_crit)
    } else if v < -5.0 * n_vt {
        (-is, MIN_CONDUCTANCE)
    } else {
        let e = (v / n_vt).exp();
        (is * (e - 1.0), is / n_vt * e)
    }
}
