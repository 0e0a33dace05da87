//! Voltage and current sources.
//!
//! Sources are connected between a node and ground. A voltage source fixes
//! its node voltage (the node leaves the unknown set); a current source
//! injects into its node. Each source is active only inside
//! `t_start <= t < t_stop` and contributes zero outside that window.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::network::{BlockId, NodeId, SourceId};

/// Whether a source imposes a voltage or injects a current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Voltage,
    Current,
}

/// Source time function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Waveform {
    /// Constant value
    Dc { amplitude: f64 },
    /// `A cos(2 pi f t + phase)`, phase in degrees
    Cosine {
        amplitude: f64,
        frequency: f64,
        #[serde(default)]
        phase_deg: f64,
    },
    /// Step to `A` at `t_start`
    Step { amplitude: f64 },
    /// Linear rise to `A` over `rise_time`, then flat
    Ramp { amplitude: f64, rise_time: f64 },
    /// Double exponential `A (e^{-alpha t} - e^{-beta t})`
    Surge { amplitude: f64, alpha: f64, beta: f64 },
    /// Driven by a control signal, scaled by `gain`
    Tacs {
        signal: String,
        #[serde(default = "unit_gain")]
        gain: f64,
    },
}

fn unit_gain() -> f64 {
    1.0
}

impl Waveform {
    /// Value at time `t`, where `elapsed = t - t_start`.
    ///
    /// `control` carries the (lagged) control signal for TACS-driven sources.
    pub fn value(&self, t: f64, elapsed: f64, control: f64) -> f64 {
        match self {
            Waveform::Dc { amplitude } | Waveform::Step { amplitude } => *amplitude,
            Waveform::Cosine {
                amplitude,
                frequency,
                phase_deg,
            } => amplitude * (2.0 * PI * frequency * t + phase_deg.to_radians()).cos(),
            Waveform::Ramp {
                amplitude,
                rise_time,
            } => {
                if *rise_time <= 0.0 || elapsed >= *rise_time {
                    *amplitude
                } else {
                    amplitude * elapsed / rise_time
                }
            }
            Waveform::Surge {
                amplitude,
                alpha,
                beta,
            } => amplitude * ((-alpha * elapsed).exp() - (-beta * elapsed).exp()),
            Waveform::Tacs { gain, .. } => gain * control,
        }
    }

    /// Angular frequency for sinusoidal waveforms.
    pub fn angular_frequency(&self) -> Option<f64> {
        match self {
            Waveform::Cosine { frequency, .. } => Some(2.0 * PI * frequency),
            _ => None,
        }
    }

    /// Name of the driving control signal, if any.
    pub fn control_signal(&self) -> Option<&str> {
        match self {
            Waveform::Tacs { signal, .. } => Some(signal),
            _ => None,
        }
    }
}

/// A node-to-ground source.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub node: NodeId,
    pub kind: SourceKind,
    pub waveform: Waveform,
    pub t_start: f64,
    pub t_stop: f64,
    /// Resolved control block for TACS-driven sources
    pub control: Option<BlockId>,
}

impl Source {
    pub fn new(
        id: SourceId,
        name: String,
        node: NodeId,
        kind: SourceKind,
        waveform: Waveform,
        t_start: f64,
        t_stop: f64,
    ) -> Self {
        Self {
            id,
            name,
            node,
            kind,
            waveform,
            t_start,
            t_stop,
            control: None,
        }
    }

    /// Check whether the source is switched in at time `t`.
    pub fn is_active(&self, t: f64) -> bool {
        t >= self.t_start && t < self.t_stop
    }

    /// Source value at `t` (zero outside the activation window).
    pub fn value(&self, t: f64, control: f64) -> f64 {
        if self.is_active(t) {
            self.waveform.value(t, t - self.t_start, control)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn source(waveform: Waveform, t_start: f64, t_stop: f64) -> Source {
        Source::new(
            SourceId(0),
            "V1".to_string(),
            NodeId(1),
            SourceKind::Voltage,
            waveform,
            t_start,
            t_stop,
        )
    }

    #[test]
    fn test_activation_window() {
        let s = source(Waveform::Dc { amplitude: 100.0 }, 1e-3, 2e-3);
        assert_eq!(s.value(0.0, 0.0), 0.0);
        assert_eq!(s.value(1e-3, 0.0), 100.0);
        assert_eq!(s.value(2e-3, 0.0), 0.0);
    }

    #[test]
    fn test_cosine_phase() {
        let s = source(
            Waveform::Cosine {
                amplitude: 10.0,
                frequency: 50.0,
                phase_deg: -90.0,
            },
            0.0,
            f64::INFINITY,
        );
        assert_relative_eq!(s.value(0.0, 0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(s.value(0.005, 0.0), 10.0, max_relative = 1e-12);
    }

    #[test]
    fn test_ramp_and_surge() {
        let ramp = Waveform::Ramp {
            amplitude: 4.0,
            rise_time: 2.0,
        };
        assert_relative_eq!(ramp.value(1.0, 1.0, 0.0), 2.0);
        assert_relative_eq!(ramp.value(5.0, 5.0, 0.0), 4.0);

        let surge = Waveform::Surge {
            amplitude: 1.0,
            alpha: 1e4,
            beta: 1e6,
        };
        assert_eq!(surge.value(0.0, 0.0, 0.0), 0.0);
        assert!(surge.value(1e-5, 1e-5, 0.0) > 0.5);
    }

    #[test]
    fn test_tacs_driven() {
        let w = Waveform::Tacs {
            signal: "CTRL".to_string(),
            gain: 2.0,
        };
        assert_eq!(w.value(0.0, 0.0, 3.0), 6.0);
        assert_eq!(w.control_signal(), Some("CTRL"));
    }
}
