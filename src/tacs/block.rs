//! Control block definitions and their per-step evaluation.

use serde::{Deserialize, Serialize};

use super::transfer::{DiscreteTransfer, Limits};
use crate::components::HistoryBuffer;
use crate::error::{EmtpError, Result};
use crate::network::{BranchId, MachineId, NodeId, SwitchId};

/// Declarative description of a control block, as found in a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockSpec {
    // Measurements taken from the committed network state
    NodeVoltage {
        node: String,
    },
    SwitchCurrent {
        switch: String,
    },
    SwitchStatus {
        switch: String,
    },
    BranchCurrent {
        branch: String,
        #[serde(default)]
        phase: usize,
    },
    MachineSpeed {
        machine: String,
    },
    MachineAngle {
        machine: String,
    },
    MachinePower {
        machine: String,
    },

    // Signal sources
    Time,
    Constant {
        value: f64,
    },
    Cosine {
        amplitude: f64,
        frequency: f64,
        #[serde(default)]
        phase_deg: f64,
    },
    Step {
        amplitude: f64,
        #[serde(default)]
        t_start: f64,
    },
    Pulse {
        amplitude: f64,
        period: f64,
        width: f64,
        #[serde(default)]
        delay: f64,
    },

    // Dynamic blocks
    Transfer {
        #[serde(default = "unity")]
        gain: f64,
        numerator: Vec<f64>,
        denominator: Vec<f64>,
        #[serde(default)]
        limits: Limits,
    },
    Integrator {
        #[serde(default = "unity")]
        k: f64,
        #[serde(default)]
        limits: Limits,
    },
    Lag {
        #[serde(default = "unity")]
        k: f64,
        time_constant: f64,
        #[serde(default)]
        limits: Limits,
    },
    Delay {
        time: f64,
    },

    // Algebraic blocks
    Gain {
        k: f64,
    },
    Limiter {
        limits: Limits,
    },
    Abs,
    Product,
    Compare {
        #[serde(default)]
        threshold: f64,
    },
    And,
    Or,
    Not,
    Max,
    Min,
}

fn unity() -> f64 {
    1.0
}

impl BlockSpec {
    /// Whether the block consumes input signals.
    pub fn takes_inputs(&self) -> bool {
        !matches!(
            self,
            BlockSpec::NodeVoltage { .. }
                | BlockSpec::SwitchCurrent { .. }
                | BlockSpec::SwitchStatus { .. }
                | BlockSpec::BranchCurrent { .. }
                | BlockSpec::MachineSpeed { .. }
                | BlockSpec::MachineAngle { .. }
                | BlockSpec::MachinePower { .. }
                | BlockSpec::Time
                | BlockSpec::Constant { .. }
                | BlockSpec::Cosine { .. }
                | BlockSpec::Step { .. }
                | BlockSpec::Pulse { .. }
        )
    }

    /// Rational-function form of the dynamic blocks.
    pub(crate) fn transfer_form(&self) -> Option<(f64, Vec<f64>, Vec<f64>, Limits)> {
        match self {
            BlockSpec::Transfer {
                gain,
                numerator,
                denominator,
                limits,
            } => Some((*gain, numerator.clone(), denominator.clone(), *limits)),
            BlockSpec::Integrator { k, limits } => Some((*k, vec![1.0], vec![0.0, 1.0], *limits)),
            BlockSpec::Lag {
                k,
                time_constant,
                limits,
            } => Some((*k, vec![1.0], vec![1.0, *time_constant], *limits)),
            _ => None,
        }
    }
}

/// Network quantity a measurement block reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Probe {
    NodeVoltage(NodeId),
    SwitchCurrent(SwitchId),
    SwitchStatus(SwitchId),
    BranchCurrent(BranchId, usize),
    MachineSpeed(MachineId),
    MachineAngle(MachineId),
    MachinePower(MachineId),
}

/// Committed network state visible to the control blocks.
pub trait Measurements {
    fn node_voltage(&self, node: NodeId) -> f64;
    fn switch_current(&self, id: SwitchId) -> f64;
    fn switch_closed(&self, id: SwitchId) -> bool;
    fn branch_current(&self, id: BranchId, phase: usize) -> f64;
    fn machine_speed(&self, id: MachineId) -> f64;
    fn machine_angle(&self, id: MachineId) -> f64;
    fn machine_power(&self, id: MachineId) -> f64;
}

impl Probe {
    pub fn read(&self, m: &dyn Measurements) -> f64 {
        match *self {
            Probe::NodeVoltage(node) => m.node_voltage(node),
            Probe::SwitchCurrent(id) => m.switch_current(id),
            Probe::SwitchStatus(id) => {
                if m.switch_closed(id) {
                    1.0
                } else {
                    0.0
                }
            }
            Probe::BranchCurrent(id, phase) => m.branch_current(id, phase),
            Probe::MachineSpeed(id) => m.machine_speed(id),
            Probe::MachineAngle(id) => m.machine_angle(id),
            Probe::MachinePower(id) => m.machine_power(id),
        }
    }
}

/// Transport delay with linear interpolation between stored inputs.
#[derive(Debug, Clone)]
pub struct DelayLine {
    time: f64,
    steps: usize,
    frac: f64,
    buffer: HistoryBuffer<f64>,
}

impl DelayLine {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            steps: 1,
            frac: 0.0,
            buffer: HistoryBuffer::new(3, 0.0),
        }
    }

    /// Size the buffer for step `dt`. Fails when the delay is shorter than a step.
    pub fn prepare(&mut self, dt: f64) -> bool {
        if self.time < dt {
            return false;
        }
        let ratio = self.time / dt;
        self.steps = ratio.floor() as usize;
        self.frac = ratio - self.steps as f64;
        self.buffer = HistoryBuffer::new(self.steps + 2, 0.0);
        true
    }

    pub fn output(&self) -> f64 {
        let near = self.buffer.back(self.steps);
        let far = self.buffer.back(self.steps + 1);
        near + self.frac * (far - near)
    }

    pub fn push(&mut self, input: f64) {
        self.buffer.push(input);
    }
}

/// Runtime behaviour of a control block.
#[derive(Debug, Clone)]
pub enum BlockKind {
    Probe(Probe),
    Time,
    Constant(f64),
    Cosine {
        amplitude: f64,
        omega: f64,
        phase: f64,
    },
    Step {
        amplitude: f64,
        t_start: f64,
    },
    Pulse {
        amplitude: f64,
        period: f64,
        width: f64,
        delay: f64,
    },
    /// Realized on `prepare`, once the step is known
    Transfer {
        gain: f64,
        numerator: Vec<f64>,
        denominator: Vec<f64>,
        limits: Limits,
        realized: Option<DiscreteTransfer>,
    },
    Delay(DelayLine),
    Gain(f64),
    Limiter(Limits),
    Abs,
    Product,
    Compare(f64),
    And,
    Or,
    Not,
    Max,
    Min,
}

impl BlockKind {
    /// Build the runtime form of block `name`; measurement blocks must be
    /// given their resolved probe.
    pub fn from_spec(name: &str, spec: &BlockSpec, probe: Option<Probe>) -> Result<Self> {
        let transfer = || {
            let (gain, numerator, denominator, limits) = spec
                .transfer_form()
                .ok_or_else(|| EmtpError::invalid_parameter(name, "block", "not a transfer block"))?;
            Ok::<BlockKind, EmtpError>(BlockKind::Transfer {
                gain,
                numerator,
                denominator,
                limits,
                realized: None,
            })
        };
        let kind = match spec {
            BlockSpec::NodeVoltage { .. }
            | BlockSpec::SwitchCurrent { .. }
            | BlockSpec::SwitchStatus { .. }
            | BlockSpec::BranchCurrent { .. }
            | BlockSpec::MachineSpeed { .. }
            | BlockSpec::MachineAngle { .. }
            | BlockSpec::MachinePower { .. } => {
                let probe = probe.ok_or_else(|| {
                    EmtpError::invalid_parameter(name, "probe", "measurement block is not bound to the network")
                })?;
                BlockKind::Probe(probe)
            }
            BlockSpec::Transfer { .. } | BlockSpec::Integrator { .. } | BlockSpec::Lag { .. } => transfer()?,
            BlockSpec::Constant { value } => BlockKind::Constant(*value),
            BlockSpec::Cosine {
                amplitude,
                frequency,
                phase_deg,
            } => BlockKind::Cosine {
                amplitude: *amplitude,
                omega: 2.0 * std::f64::consts::PI * frequency,
                phase: phase_deg.to_radians(),
            },
            BlockSpec::Step { amplitude, t_start } => BlockKind::Step {
                amplitude: *amplitude,
                t_start: *t_start,
            },
            BlockSpec::Pulse {
                amplitude,
                period,
                width,
                delay,
            } => BlockKind::Pulse {
                amplitude: *amplitude,
                period: *period,
                width: *width,
                delay: *delay,
            },
            BlockSpec::Delay { time } => BlockKind::Delay(DelayLine::new(*time)),
            BlockSpec::Gain { k } => BlockKind::Gain(*k),
            BlockSpec::Limiter { limits } => BlockKind::Limiter(*limits),
            BlockSpec::Abs => BlockKind::Abs,
            BlockSpec::Product => BlockKind::Product,
            BlockSpec::Compare { threshold } => BlockKind::Compare(*threshold),
            BlockSpec::And => BlockKind::And,
            BlockSpec::Or => BlockKind::Or,
            BlockSpec::Not => BlockKind::Not,
            BlockSpec::Max => BlockKind::Max,
            BlockSpec::Min => BlockKind::Min,
            BlockSpec::Time => BlockKind::Time,
        };
        Ok(kind)
    }
}

/// One signed connection into a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub from: usize,
    pub sign: f64,
}

/// A control block with resolved inputs.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub kind: BlockKind,
    pub inputs: Vec<Connection>,
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl Block {
    pub fn has_feedthrough(&self) -> bool {
        !self.inputs.is_empty() && !matches!(self.kind, BlockKind::Delay(_))
    }

    /// Output at `t` given the current block outputs.
    ///
    /// Dynamic blocks advance their internal state.
    pub fn evaluate(&mut self, t: f64, outputs: &[f64], m: &dyn Measurements) -> f64 {
        let signed = |c: &Connection| c.sign * outputs[c.from];
        let sum: f64 = self.inputs.iter().map(signed).sum();
        match &mut self.kind {
            BlockKind::Probe(probe) => probe.read(m),
            BlockKind::Time => t,
            BlockKind::Constant(value) => *value,
            BlockKind::Cosine {
                amplitude,
                omega,
                phase,
            } => *amplitude * (*omega * t + *phase).cos(),
            BlockKind::Step { amplitude, t_start } => {
                if t >= *t_start {
                    *amplitude
                } else {
                    0.0
                }
            }
            BlockKind::Pulse {
                amplitude,
                period,
                width,
                delay,
            } => {
                let on = t >= *delay && (t - *delay) % *period < *width;
                if on {
                    *amplitude
                } else {
                    0.0
                }
            }
            BlockKind::Transfer { realized, .. } => match realized {
                Some(tf) => tf.step(sum),
                None => 0.0,
            },
            BlockKind::Delay(line) => line.output(),
            BlockKind::Gain(k) => *k * sum,
            BlockKind::Limiter(limits) => limits.clamp(sum),
            BlockKind::Abs => sum.abs(),
            BlockKind::Product => {
                if self.inputs.is_empty() {
                    0.0
                } else {
                    self.inputs.iter().map(signed).product()
                }
            }
            BlockKind::Compare(threshold) => flag(sum >= *threshold),
            BlockKind::And => flag(!self.inputs.is_empty() && self.inputs.iter().all(|c| signed(c) > 0.0)),
            BlockKind::Or => flag(self.inputs.iter().any(|c| signed(c) > 0.0)),
            BlockKind::Not => flag(sum <= 0.0),
            BlockKind::Max => self.inputs.iter().map(signed).reduce(f64::max).unwrap_or(0.0),
            BlockKind::Min => self.inputs.iter().map(signed).reduce(f64::min).unwrap_or(0.0),
        }
    }

    /// Store this step's input in the delay line, if any.
    pub fn latch(&mut self, outputs: &[f64]) {
        if let BlockKind::Delay(line) = &mut self.kind {
            let sum: f64 = self.inputs.iter().map(|c| c.sign * outputs[c.from]).sum();
            line.push(sum);
        }
    }
}
