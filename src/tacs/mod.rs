//! Control-system sub-network (TACS).
//!
//! Blocks with signed summing inputs are solved once per step, after the
//! network solution of that step has been committed. Their outputs drive
//! controlled switches, sources and machine inputs at the *next* step.
//!
//! # Example
//!
//! ```ignore
//! let mut controls = ControlSystem::build(&records, |spec, name| network.resolve_probe(spec, name))?;
//! controls.prepare(dt)?;
//! controls.solve(t, &measurements);
//! let trip = controls.output(controls.find("TRIP").unwrap());
//! ```

pub mod block;
pub mod graph;
pub mod transfer;

pub use block::{Block, BlockKind, BlockSpec, Connection, DelayLine, Measurements, Probe};
pub use graph::{evaluation_order, EvaluationOrder};
pub use transfer::{DiscreteTransfer, Limits, TransferError};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EmtpError, Result};
use crate::network::BlockId;

/// A signed reference to another block's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    pub signal: String,
    #[serde(default)]
    pub negate: bool,
}

impl ControlInput {
    pub fn new(signal: impl Into<String>, negate: bool) -> Self {
        Self {
            signal: signal.into(),
            negate,
        }
    }
}

/// A named control block with its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub name: String,
    #[serde(flatten)]
    pub block: BlockSpec,
    #[serde(default)]
    pub inputs: Vec<ControlInput>,
}

fn check_parameters(record: &ControlRecord) -> Result<()> {
    let bad = |param: &str, message: &str| Err(EmtpError::invalid_parameter(&record.name, param, message));
    match &record.block {
        BlockSpec::Pulse { period, width, .. } => {
            if *period <= 0.0 {
                return bad("period", "must be positive");
            }
            if *width < 0.0 {
                return bad("width", "must not be negative");
            }
        }
        BlockSpec::Delay { time } if *time <= 0.0 => return bad("time", "must be positive"),
        BlockSpec::Lag { time_constant, .. } if *time_constant < 0.0 => {
            return bad("time_constant", "must not be negative")
        }
        BlockSpec::Limiter { limits } if !limits.is_valid() => return bad("limits", "lo exceeds hi"),
        _ => {}
    }
    if let Some((_, _, _, limits)) = record.block.transfer_form() {
        if !limits.is_valid() {
            return bad("limits", "lo exceeds hi");
        }
    }
    Ok(())
}

/// The control blocks of a network with their evaluation order and outputs.
#[derive(Debug, Clone, Default)]
pub struct ControlSystem {
    blocks: Vec<Block>,
    order: Vec<usize>,
    outputs: Vec<f64>,
    index: HashMap<String, BlockId>,
}

impl ControlSystem {
    /// Build the block network.
    ///
    /// `resolve` maps a measurement block to the network quantity it reads
    /// and returns `None` for every other block kind.
    pub fn build<F>(records: &[ControlRecord], mut resolve: F) -> Result<Self>
    where
        F: FnMut(&BlockSpec, &str) -> Result<Option<Probe>>,
    {
        let mut index = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.name.clone(), BlockId(i)).is_some() {
                return Err(EmtpError::DuplicateElement {
                    name: record.name.clone(),
                });
            }
        }

        let mut blocks = Vec::with_capacity(records.len());
        for record in records {
            check_parameters(record)?;
            if !record.block.takes_inputs() && !record.inputs.is_empty() {
                return Err(EmtpError::invalid_parameter(
                    &record.name,
                    "inputs",
                    "block takes no inputs",
                ));
            }
            let inputs = record
                .inputs
                .iter()
                .map(|input| {
                    let from = index.get(&input.signal).ok_or_else(|| EmtpError::UnknownSignal {
                        signal: input.signal.clone(),
                        element: record.name.clone(),
                    })?;
                    Ok(Connection {
                        from: from.0,
                        sign: if input.negate { -1.0 } else { 1.0 },
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let probe = resolve(&record.block, &record.name)?;
            blocks.push(Block {
                name: record.name.clone(),
                kind: BlockKind::from_spec(&record.name, &record.block, probe)?,
                inputs,
            });
        }

        let feeds: Vec<Vec<usize>> = blocks
            .iter()
            .map(|b| {
                if b.has_feedthrough() {
                    b.inputs.iter().map(|c| c.from).collect()
                } else {
                    Vec::new()
                }
            })
            .collect();
        let sorted = evaluation_order(&feeds);
        if !sorted.looped.is_empty() {
            let names: Vec<&str> = sorted.looped.iter().map(|&i| blocks[i].name.as_str()).collect();
            warn!(
                blocks = ?names,
                "algebraic loop in control blocks; back edges use the previous step's value"
            );
        }
        debug!(blocks = blocks.len(), "control system built");

        Ok(Self {
            outputs: vec![0.0; blocks.len()],
            order: sorted.order,
            blocks,
            index,
        })
    }

    /// Discretize the dynamic blocks for step `dt`.
    pub fn prepare(&mut self, dt: f64) -> Result<()> {
        for block in &mut self.blocks {
            match &mut block.kind {
                BlockKind::Transfer {
                    gain,
                    numerator,
                    denominator,
                    limits,
                    realized,
                } => {
                    let tf = DiscreteTransfer::new(*gain, numerator, denominator, dt, *limits).map_err(|e| {
                        let message = match e {
                            TransferError::EmptyDenominator => "denominator is zero",
                            TransferError::Improper => "numerator order exceeds denominator order",
                            TransferError::Degenerate => "transfer function degenerates at this time step",
                        };
                        EmtpError::invalid_parameter(&block.name, "denominator", message)
                    })?;
                    *realized = Some(tf);
                }
                BlockKind::Delay(line) => {
                    if !line.prepare(dt) {
                        return Err(EmtpError::invalid_parameter(
                            &block.name,
                            "time",
                            "delay is shorter than the time step",
                        ));
                    }
                }
                _ => {}
            }
        }
        self.outputs.iter_mut().for_each(|o| *o = 0.0);
        Ok(())
    }

    /// Solve all blocks at time `t` from the committed network state.
    pub fn solve(&mut self, t: f64, measurements: &dyn Measurements) {
        for &i in &self.order {
            let value = self.blocks[i].evaluate(t, &self.outputs, measurements);
            self.outputs[i] = value;
        }
        for block in &mut self.blocks {
            block.latch(&self.outputs);
        }
    }

    pub fn find(&self, name: &str) -> Option<BlockId> {
        self.index.get(name).copied()
    }

    /// Latest output of a block.
    pub fn output(&self, id: BlockId) -> f64 {
        self.outputs.get(id.0).copied().unwrap_or(0.0)
    }

    pub fn name(&self, id: BlockId) -> &str {
        &self.blocks[id.0].name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block indices in evaluation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}
