//! Nodal admittance assembly with known-voltage partitioning.
//!
//! Nodes driven by an ideal voltage source are *known*: their voltage is
//! imposed and they leave the unknown set. Writing the system as
//!
//! ```text
//!   [ Y_aa  Y_ab ] [ V_a ]   [ I_a ]
//!   [ Y_ba  Y_bb ] [ V_b ] = [ I_b ]
//! ```
//!
//! only `Y_aa` is factorized and `Y_ab V_b` moves to the right-hand side.
//! Switch stamps are kept apart from the fixed stamps so that a toggle only
//! refactorizes the switch-terminal block (see [`super::sparse`]).

use crate::components::SourceKind;
use crate::network::{Edge, EdgeOwner, Network, NodeId, SourceId};

use super::dense::DenseMatrix;
use super::scalar::{Scalar, ZeroPivot};
use super::sparse::SparseLdl;

/// How a node's voltage is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Ground,
    /// Imposed by a voltage source
    Known(SourceId),
    /// Row of the factorized block
    Unknown(usize),
}

/// Partition of the network nodes into ground, known and unknown.
#[derive(Debug, Clone)]
pub struct NodeLayout {
    roles: Vec<NodeRole>,
    unknowns: Vec<NodeId>,
}

impl NodeLayout {
    pub fn new(network: &Network) -> Self {
        let n = network.node_count();
        let mut roles = vec![NodeRole::Unknown(0); n];
        roles[0] = NodeRole::Ground;
        for source in &network.sources {
            if source.kind == SourceKind::Voltage && !source.node.is_ground() {
                roles[source.node.0] = NodeRole::Known(source.id);
            }
        }
        let mut unknowns = Vec::new();
        for (node, role) in roles.iter_mut().enumerate() {
            if let NodeRole::Unknown(row) = role {
                *row = unknowns.len();
                unknowns.push(NodeId(node));
            }
        }
        Self { roles, unknowns }
    }

    pub fn role(&self, node: NodeId) -> NodeRole {
        self.roles.get(node.0).copied().unwrap_or(NodeRole::Ground)
    }

    /// Matrix row of an unknown node.
    pub fn unknown(&self, node: NodeId) -> Option<usize> {
        match self.role(node) {
            NodeRole::Unknown(row) => Some(row),
            _ => None,
        }
    }

    pub fn is_known(&self, node: NodeId) -> bool {
        matches!(self.role(node), NodeRole::Known(_))
    }

    pub fn unknown_count(&self) -> usize {
        self.unknowns.len()
    }

    pub fn unknown_node(&self, row: usize) -> NodeId {
        self.unknowns[row]
    }

    pub fn node_count(&self) -> usize {
        self.roles.len()
    }
}

/// Assembled admittance matrix, its factors and the right-hand side.
#[derive(Debug, Clone)]
pub struct AdmittanceSystem<T: Scalar> {
    layout: NodeLayout,
    ldl: SparseLdl<T>,
    /// `(row, known node, y)`: `rhs[row] -= y * V[node]`
    known: Vec<(usize, NodeId, T)>,
    switch_known: Vec<(usize, NodeId, T)>,
    switch_entries: Vec<(usize, usize, T)>,
    rhs: Vec<T>,
}

impl<T: Scalar> AdmittanceSystem<T> {
    /// Create an empty system whose sparsity pattern covers `edges`.
    ///
    /// Terminals of switch edges are ordered last.
    pub fn new(layout: NodeLayout, edges: &[Edge], pivot_tolerance: f64) -> Self {
        let n = layout.unknown_count();
        let mut pattern = Vec::with_capacity(edges.len());
        let mut tail = vec![false; n];
        for edge in edges {
            let a = layout.unknown(edge.a);
            let b = layout.unknown(edge.b);
            if let (Some(a), Some(b)) = (a, b) {
                pattern.push((a, b));
            }
            if matches!(edge.owner, EdgeOwner::Switch(_)) {
                for row in [a, b].into_iter().flatten() {
                    tail[row] = true;
                }
            }
        }
        Self {
            ldl: SparseLdl::new(n, &pattern, &tail, pivot_tolerance),
            rhs: vec![T::zero(); n],
            layout,
            known: Vec::new(),
            switch_known: Vec::new(),
            switch_entries: Vec::new(),
        }
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// `Y[a, a] += y`.
    pub fn add_self(&mut self, a: NodeId, y: T) {
        if let Some(i) = self.layout.unknown(a) {
            self.ldl.add(i, i, y);
        }
    }

    /// `Y[a, b] += y` and `Y[b, a] += y`.
    ///
    /// When `a == b` (two distinct terminals on one node) both land on the
    /// diagonal.
    pub fn couple(&mut self, a: NodeId, b: NodeId, y: T) {
        if a == b {
            self.add_self(a, y + y);
            return;
        }
        match (self.layout.unknown(a), self.layout.unknown(b)) {
            (Some(i), Some(j)) => self.ldl.add(i, j, y),
            (Some(i), None) if self.layout.is_known(b) => self.known.push((i, b, y)),
            (None, Some(j)) if self.layout.is_known(a) => self.known.push((j, a, y)),
            _ => {}
        }
    }

    /// Two-terminal admittance between `a` and `b`.
    pub fn stamp_admittance(&mut self, a: NodeId, b: NodeId, y: T) {
        self.add_self(a, y);
        self.add_self(b, y);
        self.couple(a, b, -y);
    }

    /// Coupled branch with phase `k` between `from[k]` and `to[k]` and
    /// phase admittance matrix `g`.
    pub fn stamp_coupled(&mut self, from: &[NodeId], to: &[NodeId], g: &DenseMatrix<T>) {
        let terminals: Vec<(NodeId, usize, bool)> = from
            .iter()
            .enumerate()
            .map(|(k, &n)| (n, k, true))
            .chain(to.iter().enumerate().map(|(k, &n)| (n, k, false)))
            .collect();
        for (x, &(nx, px, sx)) in terminals.iter().enumerate() {
            self.add_self(nx, g[(px, px)]);
            for &(ny, py, sy) in &terminals[x + 1..] {
                let value = if sx == sy { g[(px, py)] } else { -g[(px, py)] };
                self.couple(nx, ny, value);
            }
        }
    }

    /// Replace the set of closed-switch stamps.
    pub fn set_switches(&mut self, closed: impl IntoIterator<Item = ([NodeId; 2], T)>) {
        self.switch_entries.clear();
        self.switch_known.clear();
        for ([a, b], y) in closed {
            let ia = self.layout.unknown(a);
            let ib = self.layout.unknown(b);
            for row in [ia, ib].into_iter().flatten() {
                self.switch_entries.push((row, row, y));
            }
            match (ia, ib) {
                (Some(i), Some(j)) => self.switch_entries.push((i, j, -y)),
                (Some(i), None) if self.layout.is_known(b) => self.switch_known.push((i, b, -y)),
                (None, Some(j)) if self.layout.is_known(a) => self.switch_known.push((j, a, -y)),
                _ => {}
            }
        }
    }

    /// Factorize from scratch.
    pub fn factor(&mut self) -> Result<(), ZeroPivot> {
        self.ldl.factor(&self.switch_entries)
    }

    /// Refactorize the switch block, reusing the cached elimination.
    pub fn refactor(&mut self) -> Result<(), ZeroPivot> {
        self.ldl.refactor(&self.switch_entries)
    }

    pub fn is_factored(&self) -> bool {
        self.ldl.is_factored()
    }

    /// Node whose pivot vanished.
    pub fn pivot_node(&self, pivot: ZeroPivot) -> NodeId {
        self.layout.unknown_node(pivot.index)
    }

    pub fn clear_rhs(&mut self) {
        self.rhs.iter_mut().for_each(|r| *r = T::zero());
    }

    /// Current injected into node `a` from ground.
    pub fn inject(&mut self, a: NodeId, current: T) {
        if let Some(i) = self.layout.unknown(a) {
            self.rhs[i] += current;
        }
    }

    /// Current source in parallel with a branch, flowing `from -> to`.
    pub fn stamp_current(&mut self, from: NodeId, to: NodeId, current: T) {
        self.inject(from, -current);
        self.inject(to, current);
    }

    /// Solve for the unknown node voltages.
    ///
    /// `voltages` is indexed by node; known entries must already hold
    /// their imposed values and unknown entries are overwritten.
    pub fn solve(&self, voltages: &mut [T]) {
        let mut b = self.rhs.clone();
        for &(row, node, y) in self.known.iter().chain(&self.switch_known) {
            b[row] -= y * voltages[node.0];
        }
        let x = self.ldl.solve(&b);
        for (row, value) in x.into_iter().enumerate() {
            voltages[self.layout.unknown_node(row).0] = value;
        }
        voltages[0] = T::zero();
    }

    /// Unknown-node response `Y_aa^-1 (e_a - e_b)` to a unit current
    /// injected at `a` and drawn from `b`.
    pub fn unit_response(&self, a: NodeId, b: NodeId) -> Vec<T> {
        let mut e = vec![T::zero(); self.layout.unknown_count()];
        if let Some(i) = self.layout.unknown(a) {
            e[i] += T::one();
        }
        if let Some(j) = self.layout.unknown(b) {
            e[j] -= T::one();
        }
        self.ldl.solve(&e)
    }

    /// Value of a response vector at `node` (zero for known nodes).
    pub fn response_at(&self, response: &[T], node: NodeId) -> T {
        self.layout.unknown(node).map_or(T::zero(), |i| response[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Waveform;
    use crate::network::NetworkDescription;
    use approx::assert_relative_eq;

    fn divider() -> Network {
        // 10 V -> 1 ohm -> OUT -> 1 ohm -> ground
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source(
                "E",
                "IN",
                SourceKind::Voltage,
                Waveform::Dc { amplitude: 10.0 },
            ))
            .with_branch(NetworkDescription::series("R1", "IN", "OUT", 1.0, 0.0, 0.0))
            .with_branch(NetworkDescription::series("R2", "OUT", "0", 1.0, 0.0, 0.0));
        Network::load(&desc).unwrap()
    }

    #[test]
    fn test_layout_partitions_nodes() {
        let net = divider();
        let layout = NodeLayout::new(&net);
        let input = net.find_node("IN").unwrap();
        let out = net.find_node("OUT").unwrap();
        assert!(layout.is_known(input));
        assert_eq!(layout.unknown(out), Some(0));
        assert_eq!(layout.unknown_count(), 1);
        assert_eq!(layout.role(NodeId::GROUND), NodeRole::Ground);
    }

    #[test]
    fn test_known_voltage_moves_to_rhs() {
        let net = divider();
        let input = net.find_node("IN").unwrap();
        let out = net.find_node("OUT").unwrap();
        let mut sys: AdmittanceSystem<f64> = AdmittanceSystem::new(NodeLayout::new(&net), &net.incidence(), 1e-8);
        sys.stamp_admittance(input, out, 1.0);
        sys.stamp_admittance(out, NodeId::GROUND, 1.0);
        sys.factor().unwrap();
        let mut v = vec![0.0; net.node_count()];
        v[input.0] = 10.0;
        sys.solve(&mut v);
        assert_relative_eq!(v[out.0], 5.0, max_relative = 1e-12);
        assert_eq!(v[input.0], 10.0);
    }

    #[test]
    fn test_switch_stamp_toggles() {
        let desc = NetworkDescription::new()
            .with_branch(NetworkDescription::series("R1", "A", "0", 1.0, 0.0, 0.0))
            .with_branch(NetworkDescription::series("R2", "B", "0", 1.0, 0.0, 0.0))
            .with_switch(NetworkDescription::timed_switch("SW", "A", "B", 1.0, f64::INFINITY));
        let net = Network::load(&desc).unwrap();
        let a = net.find_node("A").unwrap();
        let b = net.find_node("B").unwrap();
        let mut sys: AdmittanceSystem<f64> = AdmittanceSystem::new(NodeLayout::new(&net), &net.incidence(), 1e-8);
        sys.stamp_admittance(a, NodeId::GROUND, 1.0);
        sys.stamp_admittance(b, NodeId::GROUND, 1.0);
        sys.factor().unwrap();
        sys.inject(a, 2.0);

        let mut v = vec![0.0; net.node_count()];
        sys.solve(&mut v);
        assert_relative_eq!(v[a.0], 2.0, max_relative = 1e-12);
        assert_eq!(v[b.0], 0.0);

        sys.set_switches([([a, b], 1e6)]);
        sys.refactor().unwrap();
        sys.solve(&mut v);
        assert_relative_eq!(v[a.0], 1.0, max_relative = 1e-5);
        assert_relative_eq!(v[b.0], 1.0, max_relative = 1e-5);
    }

    #[test]
    fn test_coupled_stamp_matches_two_resistors() {
        // Diagonal G stamps like two independent conductances
        let desc = NetworkDescription::new()
            .with_branch(crate::network::BranchRecord::Coupled {
                name: "T".to_string(),
                from: vec!["A".into(), "B".into()],
                to: vec!["0".into(), "0".into()],
                resistance: vec![vec![2.0, 0.0], vec![0.0, 4.0]],
                inductance: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
            });
        let net = Network::load(&desc).unwrap();
        let a = net.find_node("A").unwrap();
        let b = net.find_node("B").unwrap();
        let g = DenseMatrix::from_rows(&[vec![0.5, 0.0], vec![0.0, 0.25]]).unwrap();
        let mut sys: AdmittanceSystem<f64> = AdmittanceSystem::new(NodeLayout::new(&net), &net.incidence(), 1e-8);
        sys.stamp_coupled(&[a, b], &[NodeId::GROUND, NodeId::GROUND], &g);
        sys.factor().unwrap();
        sys.inject(a, 1.0);
        sys.inject(b, 1.0);
        let mut v = vec![0.0; net.node_count()];
        sys.solve(&mut v);
        assert_relative_eq!(v[a.0], 2.0, max_relative = 1e-12);
        assert_relative_eq!(v[b.0], 4.0, max_relative = 1e-12);
    }

    #[test]
    fn test_unit_response() {
        let net = divider();
        let out = net.find_node("OUT").unwrap();
        let input = net.find_node("IN").unwrap();
        let mut sys: AdmittanceSystem<f64> = AdmittanceSystem::new(NodeLayout::new(&net), &net.incidence(), 1e-8);
        sys.stamp_admittance(input, out, 1.0);
        sys.stamp_admittance(out, NodeId::GROUND, 1.0);
        sys.factor().unwrap();
        // Thevenin impedance at OUT is 1 || 1
        let r = sys.unit_response(out, NodeId::GROUND);
        assert_relative_eq!(sys.response_at(&r, out), 0.5, max_relative = 1e-12);
        assert_eq!(sys.response_at(&r, input), 0.0);
    }
}
