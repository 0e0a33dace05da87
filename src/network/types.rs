//! Core identifier types for network representation.

use std::fmt;

/// A unique identifier for a node (one conductor of a bus).
///
/// Node 0 is always ground. Nodes are numbered from 1 in the order they
/// first appear in the network description; matrix rows are indexed from
/// zero, so node `n` maps to row `n - 1` when it is an unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The ground node (always index 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Check if this is the ground node.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "N{}", self.0)
        }
    }
}

macro_rules! element_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

element_id!(
    /// Index of a branch (series RLC, coupled RL, or line).
    BranchId,
    "B"
);
element_id!(
    /// Index of a switch in the switch registry.
    SwitchId,
    "S"
);
element_id!(
    /// Index of a voltage or current source.
    SourceId,
    "V"
);
element_id!(
    /// Index of a nonlinear element.
    NonlinearId,
    "NL"
);
element_id!(
    /// Index of a synchronous machine.
    MachineId,
    "M"
);
element_id!(
    /// Index of a control (TACS) block.
    BlockId,
    "T"
);

/// A bus: a named group of phase conductors.
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub name: String,
    pub nodes: Vec<NodeId>,
}

impl Bus {
    /// Number of electrical phases carried by the bus.
    pub fn phase_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(NodeId::GROUND.to_string(), "GND");
        assert_eq!(NodeId(4).to_string(), "N4");
        assert_eq!(SwitchId(2).to_string(), "S2");
        assert_eq!(BlockId(0).to_string(), "T0");
    }
}
