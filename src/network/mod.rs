//! Network topology model.
//!
//! A [`NetworkDescription`] (bus, branch, switch, source, nonlinear,
//! machine and control tables) is validated and numbered into a
//! [`Network`]: ground is node 0, every other node is numbered from 1 in
//! order of first appearance, and each element kind gets its own dense
//! index space.

pub mod description;
mod graph;
mod types;
pub mod validate;

pub use description::{
    BranchRecord, BusRecord, InitialVoltage, MachineRecord, NetworkDescription, NonlinearRecord, SourceRecord,
    SwitchRecord,
};
pub use graph::{BranchInitial, Edge, EdgeOwner, MachineSetpoint, Network};
pub use types::{BlockId, BranchId, Bus, MachineId, NodeId, NonlinearId, SourceId, SwitchId};
