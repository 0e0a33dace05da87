//! Network description tables.
//!
//! This is the validated-input contract between the data-input layer (the
//! case-file parser, or any caller holding JSON) and [`super::Network::load`].
//! Elements refer to nodes by name; `0`, `GND` and the empty string denote
//! ground.

use serde::{Deserialize, Serialize};

use crate::components::{Characteristic, MachineParams, SourceKind, SwitchControl, Waveform};
use crate::error::Result;
use crate::tacs::ControlRecord;

fn one() -> usize {
    1
}

fn never() -> f64 {
    f64::INFINITY
}

/// A multi-phase bus whose conductors are `NAME_A`, `NAME_B`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusRecord {
    pub name: String,
    #[serde(default = "one")]
    pub phases: usize,
}

impl BusRecord {
    /// Node names of the bus conductors in phase order.
    pub fn node_names(&self) -> Vec<String> {
        if self.phases <= 1 {
            return vec![self.name.clone()];
        }
        (0..self.phases)
            .map(|k| format!("{}_{}", self.name, (b'A' + k as u8) as char))
            .collect()
    }
}

/// A linear branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchRecord {
    /// Series R-L-C (any of the three may be zero; C = 0 means no capacitor)
    Series {
        name: String,
        from: String,
        to: String,
        #[serde(default)]
        resistance: f64,
        #[serde(default)]
        inductance: f64,
        #[serde(default)]
        capacitance: f64,
        #[serde(default)]
        initial_current: Option<f64>,
        #[serde(default)]
        capacitor_voltage: Option<f64>,
    },
    /// Mutually coupled R-L phases, `from[k] -> to[k]`
    Coupled {
        name: String,
        from: Vec<String>,
        to: Vec<String>,
        resistance: Vec<Vec<f64>>,
        inductance: Vec<Vec<f64>>,
    },
    /// Single-conductor constant-parameter line
    Line {
        name: String,
        from: String,
        to: String,
        surge_impedance: f64,
        travel_time: f64,
        /// Total series resistance, lumped R/4-R/2-R/4
        #[serde(default)]
        resistance: f64,
    },
}

impl BranchRecord {
    pub fn name(&self) -> &str {
        match self {
            BranchRecord::Series { name, .. } | BranchRecord::Coupled { name, .. } | BranchRecord::Line { name, .. } => {
                name
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub name: String,
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub control: SwitchControl,
}

/// A node-to-ground source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub name: String,
    pub node: String,
    pub kind: SourceKind,
    #[serde(flatten)]
    pub waveform: Waveform,
    #[serde(default)]
    pub t_start: f64,
    #[serde(default = "never")]
    pub t_stop: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonlinearRecord {
    pub name: String,
    pub from: String,
    pub to: String,
    pub characteristic: Characteristic,
}

/// A three-phase synchronous machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub name: String,
    pub terminals: [String; 3],
    #[serde(flatten)]
    pub params: MachineParams,
    /// Initial rotor angle in degrees
    #[serde(default)]
    pub angle_deg: f64,
    /// Field voltage (pu); derived from the initial state when omitted
    #[serde(default)]
    pub field_voltage: Option<f64>,
    /// Mechanical power (pu); derived from the initial state when omitted
    #[serde(default)]
    pub mechanical_power: Option<f64>,
    #[serde(default)]
    pub field_signal: Option<String>,
    #[serde(default)]
    pub power_signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialVoltage {
    pub node: String,
    pub value: f64,
}

/// Everything needed to build a [`super::Network`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkDescription {
    pub buses: Vec<BusRecord>,
    pub branches: Vec<BranchRecord>,
    pub switches: Vec<SwitchRecord>,
    pub sources: Vec<SourceRecord>,
    pub nonlinear: Vec<NonlinearRecord>,
    pub machines: Vec<MachineRecord>,
    pub controls: Vec<ControlRecord>,
    pub initial_voltages: Vec<InitialVoltage>,
    /// Node names reported as voltage columns; empty means every node
    pub outputs: Vec<String>,
}

impl NetworkDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a description from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_branch(mut self, branch: BranchRecord) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn with_switch(mut self, switch: SwitchRecord) -> Self {
        self.switches.push(switch);
        self
    }

    pub fn with_source(mut self, source: SourceRecord) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_nonlinear(mut self, element: NonlinearRecord) -> Self {
        self.nonlinear.push(element);
        self
    }

    pub fn with_machine(mut self, machine: MachineRecord) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn with_control(mut self, control: ControlRecord) -> Self {
        self.controls.push(control);
        self
    }

    /// Series R-L-C branch without initial conditions.
    pub fn series(name: &str, from: &str, to: &str, r: f64, l: f64, c: f64) -> BranchRecord {
        BranchRecord::Series {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            resistance: r,
            inductance: l,
            capacitance: c,
            initial_current: None,
            capacitor_voltage: None,
        }
    }

    /// Timed switch.
    pub fn timed_switch(name: &str, from: &str, to: &str, t_close: f64, t_open: f64) -> SwitchRecord {
        SwitchRecord {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            control: SwitchControl::Timed {
                t_close,
                t_open,
                current_margin: 0.0,
            },
        }
    }

    /// Always-on source.
    pub fn source(name: &str, node: &str, kind: SourceKind, waveform: Waveform) -> SourceRecord {
        SourceRecord {
            name: name.to_string(),
            node: node.to_string(),
            kind,
            waveform,
            t_start: 0.0,
            t_stop: f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_node_names() {
        let bus = BusRecord {
            name: "GEN".to_string(),
            phases: 3,
        };
        assert_eq!(bus.node_names(), vec!["GEN_A", "GEN_B", "GEN_C"]);
        let single = BusRecord {
            name: "X".to_string(),
            phases: 1,
        };
        assert_eq!(single.node_names(), vec!["X"]);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "branches": [
                {"type": "series", "name": "RL", "from": "A", "to": "0", "resistance": 10.0, "inductance": 0.1},
                {"type": "line", "name": "L1", "from": "A", "to": "B", "surge_impedance": 400.0, "travel_time": 1e-3}
            ],
            "switches": [
                {"name": "SW", "from": "S", "to": "A", "mode": "timed", "t_close": 0.0}
            ],
            "sources": [
                {"name": "E", "node": "S", "kind": "voltage", "shape": "dc", "amplitude": 100.0}
            ]
        }"#;
        let desc = NetworkDescription::from_json(json).unwrap();
        assert_eq!(desc.branches.len(), 2);
        assert_eq!(desc.branches[0].name(), "RL");
        assert!(matches!(
            desc.switches[0].control,
            SwitchControl::Timed { t_open, .. } if t_open.is_infinite()
        ));
        assert_eq!(desc.sources[0].t_stop, f64::INFINITY);
        assert!(desc.machines.is_empty());
    }

    #[test]
    fn test_bad_json_is_configuration_error() {
        let err = NetworkDescription::from_json("{\"branches\": 3}").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
