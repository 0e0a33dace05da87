//! Ideal switches.
//!
//! A closed switch is a small resistance; an open switch contributes
//! nothing to the admittance matrix, so its current is exactly zero.
//!
//! Transition rules:
//! - Timed: closed at start when `t_close <= 0`; closes once `t >= t_close`;
//!   after `t_open` it opens at the first current zero, i.e. when the last
//!   committed current is within the current margin or has changed sign
//!   since the step before.
//! - Controlled: closed while the (one-step lagged) control signal is
//!   positive.
//! - Measuring: permanently closed, used as a current probe.

use serde::{Deserialize, Serialize};

use crate::network::{BlockId, NodeId, SwitchId};

/// How a switch decides its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SwitchControl {
    Timed {
        t_close: f64,
        #[serde(default = "super::never")]
        t_open: f64,
        #[serde(default)]
        current_margin: f64,
    },
    Controlled {
        signal: String,
    },
    Measuring,
}

/// A switch between two nodes.
#[derive(Debug, Clone)]
pub struct Switch {
    pub id: SwitchId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub control: SwitchControl,
    /// Resolved control block for controlled switches
    pub signal: Option<BlockId>,
    pub closed: bool,
    /// Current (from -> to) at the last committed step
    pub current: f64,
    /// Current one step earlier
    pub previous_current: f64,
}

impl Switch {
    /// Create a switch in its initial state.
    pub fn new(id: SwitchId, name: String, nodes: [NodeId; 2], control: SwitchControl) -> Self {
        let closed = match &control {
            SwitchControl::Timed { t_close, t_open, .. } => *t_close <= 0.0 && *t_open > 0.0,
            SwitchControl::Controlled { .. } => false,
            SwitchControl::Measuring => true,
        };
        Self {
            id,
            name,
            nodes,
            control,
            signal: None,
            closed,
            current: 0.0,
            previous_current: 0.0,
        }
    }

    /// The smaller terminal node, used to order transition batches.
    pub fn bus_order_key(&self) -> NodeId {
        self.nodes[0].min(self.nodes[1])
    }

    fn at_current_zero(&self, margin: f64) -> bool {
        self.current.abs() <= margin
            || (self.current.signum() != self.previous_current.signum()
                && self.previous_current != 0.0)
    }

    /// Desired state at time `t`, given the lagged control signal value.
    pub fn desired_state(&self, t: f64, control_value: f64) -> bool {
        match &self.control {
            SwitchControl::Timed {
                t_close,
                t_open,
                current_margin,
            } => {
                if self.closed {
                    !(t >= *t_open && self.at_current_zero(*current_margin))
                } else {
                    t >= *t_close && t < *t_open
                }
            }
            SwitchControl::Controlled { .. } => control_value > 0.0,
            SwitchControl::Measuring => true,
        }
    }

    /// Conductance stamped while closed.
    pub fn closed_conductance(resistance: f64) -> f64 {
        1.0 / resistance
    }

    /// Record the current of a committed step.
    pub fn commit_current(&mut self, current: f64) {
        self.previous_current = self.current;
        self.current = current;
    }

    /// Set the open/closed state.
    pub fn set_state(&mut self, closed: bool) {
        self.closed = closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(t_close: f64, t_open: f64, margin: f64) -> Switch {
        Switch::new(
            SwitchId(0),
            "SW1".to_string(),
            [NodeId(2), NodeId(1)],
            SwitchControl::Timed {
                t_close,
                t_open,
                current_margin: margin,
            },
        )
    }

    #[test]
    fn test_initial_state() {
        assert!(timed(0.0, f64::INFINITY, 0.0).closed);
        assert!(timed(-1.0, f64::INFINITY, 0.0).closed);
        assert!(!timed(1e-3, f64::INFINITY, 0.0).closed);
    }

    #[test]
    fn test_closed_conductance() {
        assert_eq!(Switch::closed_conductance(1e-6), 1e6);
        assert_eq!(Switch::closed_conductance(0.5), 2.0);
    }

    #[test]
    fn test_timed_close() {
        let sw = timed(1e-3, f64::INFINITY, 0.0);
        assert!(!sw.desired_state(0.5e-3, 0.0));
        assert!(sw.desired_state(1e-3, 0.0));
    }

    #[test]
    fn test_opens_only_at_current_zero() {
        let mut sw = timed(0.0, 1e-3, 0.0);
        sw.commit_current(5.0);
        sw.commit_current(3.0);
        assert!(sw.desired_state(2e-3, 0.0));
        // Sign change between the last two steps
        sw.commit_current(-1.0);
        assert!(!sw.desired_state(2e-3, 0.0));
        // Never before t_open
        assert!(sw.desired_state(0.5e-3, 0.0));
    }

    #[test]
    fn test_current_margin() {
        let mut sw = timed(0.0, 1e-3, 0.5);
        sw.commit_current(2.0);
        sw.commit_current(0.4);
        assert!(!sw.desired_state(1e-3, 0.0));
    }

    #[test]
    fn test_controlled_and_measuring() {
        let ctl = Switch::new(
            SwitchId(1),
            "SW2".to_string(),
            [NodeId(1), NodeId(3)],
            SwitchControl::Controlled {
                signal: "TRIP".to_string(),
            },
        );
        assert!(!ctl.closed);
        assert!(ctl.desired_state(0.0, 1.0));
        assert!(!ctl.desired_state(0.0, 0.0));
        assert_eq!(ctl.bus_order_key(), NodeId(1));

        let meas = Switch::new(SwitchId(2), "M".to_string(), [NodeId(1), NodeId(2)], SwitchControl::Measuring);
        assert!(meas.closed);
        assert!(meas.desired_state(10.0, -1.0));
    }
}
