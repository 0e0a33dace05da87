//! Element models and their companion circuits.
//!
//! This module provides models for all supported network elements:
//! - Branches: series R-L-C, mutually coupled R-L, Bergeron line
//! - Sources: node-to-ground voltage and current sources
//! - Switches: timed, controlled, measuring
//! - Nonlinear: piecewise-linear, arrester, diode, saturable inductor
//! - Machines: three-phase synchronous machine
//!
//! Reactive elements are discretized with the trapezoidal rule into an
//! equivalent conductance plus a history current that is recomputed every
//! step from the previous step's state.

mod branch;
mod coupled;
mod history;
mod line;
mod machine;
mod nonlinear;
mod sources;
mod switch;

pub use branch::SeriesRlc;
pub use coupled::CoupledRl;
pub use history::HistoryBuffer;
pub use line::{BergeronLine, LineSample};
pub use machine::{MachineParams, SynchronousMachine};
pub use nonlinear::{Characteristic, NonlinearElement};
pub use sources::{Source, SourceKind, Waveform};
pub use switch::{Switch, SwitchControl};

use crate::network::{BranchId, NodeId};

/// Default for open-ended times ("never").
pub(crate) fn never() -> f64 {
    f64::INFINITY
}

/// A linear branch with companion state.
#[derive(Debug, Clone)]
pub enum Branch {
    Series(SeriesRlc),
    Coupled(CoupledRl),
    Line(BergeronLine),
}

impl Branch {
    pub fn id(&self) -> BranchId {
        match self {
            Branch::Series(b) => b.id,
            Branch::Coupled(b) => b.id,
            Branch::Line(b) => b.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Branch::Series(b) => &b.name,
            Branch::Coupled(b) => &b.name,
            Branch::Line(b) => &b.name,
        }
    }

    /// All nodes the branch touches.
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Branch::Series(b) => b.nodes.to_vec(),
            Branch::Coupled(b) => b.from.iter().chain(&b.to).copied().collect(),
            Branch::Line(b) => b.nodes.to_vec(),
        }
    }

    /// Pairs of nodes coupled by this branch's admittance stamps.
    pub fn couplings(&self) -> Vec<(NodeId, NodeId)> {
        match self {
            Branch::Series(b) => vec![(b.nodes[0], b.nodes[1])],
            Branch::Coupled(b) => {
                let terminals: Vec<NodeId> = b.from.iter().chain(&b.to).copied().collect();
                let mut pairs = Vec::new();
                for (i, &a) in terminals.iter().enumerate() {
                    for &c in &terminals[i + 1..] {
                        pairs.push((a, c));
                    }
                }
                pairs
            }
            // Each end is a conductance to ground
            Branch::Line(b) => vec![(b.nodes[0], NodeId::GROUND), (b.nodes[1], NodeId::GROUND)],
        }
    }

    /// Number of current columns reported for this branch.
    pub fn current_count(&self) -> usize {
        match self {
            Branch::Series(_) => 1,
            Branch::Coupled(b) => b.phases(),
            Branch::Line(_) => 2,
        }
    }

    /// Committed current for phase/end `k`.
    pub fn current(&self, k: usize) -> f64 {
        match self {
            Branch::Series(b) => b.current,
            Branch::Coupled(b) => b.currents.get(k).copied().unwrap_or(0.0),
            Branch::Line(b) => b.currents.get(k).copied().unwrap_or(0.0),
        }
    }

    /// Energy stored in lumped reactive parts.
    pub fn stored_energy(&self) -> f64 {
        match self {
            Branch::Series(b) => b.stored_energy(),
            Branch::Coupled(b) => b.stored_energy(),
            Branch::Line(_) => 0.0,
        }
    }

    pub fn update_history(&mut self) {
        match self {
            Branch::Series(b) => b.update_history(),
            Branch::Coupled(b) => b.update_history(),
            Branch::Line(b) => b.update_history(),
        }
    }
}
