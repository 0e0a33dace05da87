//! Network topology and element registry.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::description::{BranchRecord, NetworkDescription};
use super::types::{BlockId, BranchId, Bus, MachineId, NodeId, NonlinearId, SourceId, SwitchId};
use super::validate;
use crate::components::{
    BergeronLine, Branch, CoupledRl, NonlinearElement, SeriesRlc, Source, Switch, SwitchControl,
    SynchronousMachine, Waveform,
};
use crate::error::{EmtpError, Result};
use crate::solver::DenseMatrix;
use crate::tacs::{BlockSpec, ControlSystem, Probe};

/// Initial state of a series branch given in the description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchInitial {
    pub branch: BranchId,
    pub current: f64,
    pub capacitor_voltage: Option<f64>,
}

/// Field and mechanical setpoints of a machine given in the description.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MachineSetpoint {
    pub field_voltage: Option<f64>,
    pub mechanical_power: Option<f64>,
}

/// Element owning an edge of the network graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOwner {
    Branch(BranchId),
    Switch(SwitchId),
    Nonlinear(NonlinearId),
    Machine(MachineId),
}

/// A pair of nodes coupled by an element's admittance stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub a: NodeId,
    pub b: NodeId,
    pub owner: EdgeOwner,
}

/// A validated network ready for simulation.
#[derive(Debug, Clone)]
pub struct Network {
    pub buses: Vec<Bus>,
    pub branches: Vec<Branch>,
    pub switches: Vec<Switch>,
    pub sources: Vec<Source>,
    pub nonlinear: Vec<NonlinearElement>,
    pub machines: Vec<SynchronousMachine>,
    pub controls: ControlSystem,

    /// `.ic` node voltages
    pub initial_voltages: Vec<(NodeId, f64)>,
    pub branch_initial: Vec<BranchInitial>,
    /// Indexed by machine
    pub machine_setpoints: Vec<MachineSetpoint>,
    /// Node voltages reported at each sample
    pub outputs: Vec<NodeId>,

    node_names: Vec<String>,
    node_map: HashMap<String, NodeId>,
    adjacency: Vec<BTreeSet<NodeId>>,
    names: HashMap<String, NamedElement>,
}

/// What a name in the element namespace refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamedElement {
    Element(EdgeOwner),
    Source(SourceId),
}

fn is_ground_name(name: &str) -> bool {
    name.is_empty() || name == "0" || name.eq_ignore_ascii_case("GND")
}

/// Node numbering built in first-appearance order.
struct NodeTable {
    names: Vec<String>,
    map: HashMap<String, NodeId>,
}

impl NodeTable {
    fn new() -> Self {
        let mut map = HashMap::new();
        map.insert("0".to_string(), NodeId::GROUND);
        Self {
            names: vec!["0".to_string()],
            map,
        }
    }

    fn intern(&mut self, name: &str) -> NodeId {
        if is_ground_name(name) {
            return NodeId::GROUND;
        }
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = NodeId(self.names.len());
        self.names.push(name.to_string());
        self.map.insert(name.to_string(), id);
        id
    }
}

impl Network {
    /// Build and validate a network from its description.
    ///
    /// Nodes are created by the elements that connect to them (and by
    /// declared buses); sources, initial conditions, outputs and control
    /// measurements must refer to existing nodes.
    pub fn load(desc: &NetworkDescription) -> Result<Self> {
        let mut nodes = NodeTable::new();
        let mut names: HashMap<String, NamedElement> = HashMap::new();
        let mut claim = |name: &str, owner: NamedElement| -> Result<()> {
            if names.insert(name.to_string(), owner).is_some() {
                return Err(EmtpError::DuplicateElement { name: name.to_string() });
            }
            Ok(())
        };

        let buses: Vec<Bus> = desc
            .buses
            .iter()
            .map(|b| Bus {
                name: b.name.clone(),
                nodes: b.node_names().iter().map(|n| nodes.intern(n)).collect(),
            })
            .collect();

        let mut branches = Vec::with_capacity(desc.branches.len());
        let mut branch_initial = Vec::new();
        for (i, record) in desc.branches.iter().enumerate() {
            validate::check_branch(record)?;
            let id = BranchId(i);
            claim(record.name(), NamedElement::Element(EdgeOwner::Branch(id)))?;
            let branch = match record {
                BranchRecord::Series {
                    name,
                    from,
                    to,
                    resistance,
                    inductance,
                    capacitance,
                    initial_current,
                    capacitor_voltage,
                } => {
                    if initial_current.is_some() || capacitor_voltage.is_some() {
                        branch_initial.push(BranchInitial {
                            branch: id,
                            current: initial_current.unwrap_or(0.0),
                            capacitor_voltage: *capacitor_voltage,
                        });
                    }
                    Branch::Series(SeriesRlc::new(
                        id,
                        name.clone(),
                        [nodes.intern(from), nodes.intern(to)],
                        *resistance,
                        *inductance,
                        *capacitance,
                    ))
                }
                BranchRecord::Coupled {
                    name,
                    from,
                    to,
                    resistance,
                    inductance,
                } => {
                    let matrix = |rows: &[Vec<f64>]| {
                        DenseMatrix::from_rows(rows)
                            .ok_or_else(|| EmtpError::invalid_parameter(name, "r", "matrix must be square"))
                    };
                    Branch::Coupled(CoupledRl::new(
                        id,
                        name.clone(),
                        from.iter().map(|n| nodes.intern(n)).collect(),
                        to.iter().map(|n| nodes.intern(n)).collect(),
                        matrix(resistance)?,
                        matrix(inductance)?,
                    ))
                }
                BranchRecord::Line {
                    name,
                    from,
                    to,
                    surge_impedance,
                    travel_time,
                    resistance,
                } => Branch::Line(BergeronLine::new(
                    id,
                    name.clone(),
                    [nodes.intern(from), nodes.intern(to)],
                    *surge_impedance,
                    *travel_time,
                    *resistance,
                )),
            };
            branches.push(branch);
        }

        let mut switches = Vec::with_capacity(desc.switches.len());
        for (i, record) in desc.switches.iter().enumerate() {
            validate::check_switch(record)?;
            let id = SwitchId(i);
            claim(&record.name, NamedElement::Element(EdgeOwner::Switch(id)))?;
            switches.push(Switch::new(
                id,
                record.name.clone(),
                [nodes.intern(&record.from), nodes.intern(&record.to)],
                record.control.clone(),
            ));
        }

        let mut nonlinear = Vec::with_capacity(desc.nonlinear.len());
        for (i, record) in desc.nonlinear.iter().enumerate() {
            record
                .characteristic
                .validate()
                .map_err(|message| EmtpError::invalid_parameter(&record.name, "characteristic", message))?;
            let id = NonlinearId(i);
            claim(&record.name, NamedElement::Element(EdgeOwner::Nonlinear(id)))?;
            nonlinear.push(NonlinearElement::new(
                id,
                record.name.clone(),
                [nodes.intern(&record.from), nodes.intern(&record.to)],
                record.characteristic.clone(),
            ));
        }

        let mut machines = Vec::with_capacity(desc.machines.len());
        let mut machine_setpoints = Vec::with_capacity(desc.machines.len());
        for (i, record) in desc.machines.iter().enumerate() {
            record
                .params
                .validate()
                .map_err(|(param, message)| EmtpError::invalid_parameter(&record.name, param, message))?;
            let id = MachineId(i);
            claim(&record.name, NamedElement::Element(EdgeOwner::Machine(id)))?;
            let terminals = [
                nodes.intern(&record.terminals[0]),
                nodes.intern(&record.terminals[1]),
                nodes.intern(&record.terminals[2]),
            ];
            let mut machine = SynchronousMachine::new(
                id,
                record.name.clone(),
                terminals,
                record.params.clone(),
                record.angle_deg.to_radians(),
                record.field_voltage.unwrap_or(1.0),
            );
            machine.mechanical_power = record.mechanical_power.unwrap_or(0.0);
            machines.push(machine);
            machine_setpoints.push(MachineSetpoint {
                field_voltage: record.field_voltage,
                mechanical_power: record.mechanical_power,
            });
        }

        let NodeTable {
            names: node_names,
            map: node_map,
        } = nodes;
        let lookup = |name: &str, element: &str| -> Result<NodeId> {
            if is_ground_name(name) {
                return Ok(NodeId::GROUND);
            }
            node_map.get(name).copied().ok_or_else(|| EmtpError::BusNotFound {
                bus: name.to_string(),
                element: element.to_string(),
            })
        };

        let mut sources = Vec::with_capacity(desc.sources.len());
        for (i, record) in desc.sources.iter().enumerate() {
            validate::check_source(record)?;
            let id = SourceId(i);
            claim(&record.name, NamedElement::Source(id))?;
            sources.push(Source::new(
                id,
                record.name.clone(),
                lookup(&record.node, &record.name)?,
                record.kind,
                record.waveform.clone(),
                record.t_start,
                record.t_stop,
            ));
        }

        let initial_voltages = desc
            .initial_voltages
            .iter()
            .map(|ic| Ok((lookup(&ic.node, "initial conditions")?, ic.value)))
            .collect::<Result<Vec<_>>>()?;
        let outputs = if desc.outputs.is_empty() {
            (1..node_names.len()).map(NodeId).collect()
        } else {
            desc.outputs
                .iter()
                .map(|n| lookup(n, "output"))
                .collect::<Result<Vec<_>>>()?
        };

        let mut network = Network {
            buses,
            branches,
            switches,
            sources,
            nonlinear,
            machines,
            controls: ControlSystem::default(),
            initial_voltages,
            branch_initial,
            machine_setpoints,
            outputs,
            adjacency: Vec::new(),
            node_names,
            node_map,
            names,
        };
        network.adjacency = network.build_adjacency();

        let controls = ControlSystem::build(&desc.controls, |spec, block| network.resolve_probe(spec, block))?;
        network.controls = controls;
        network.bind_signals()?;
        network.bind_machine_signals(desc)?;

        validate::validate_topology(&network)?;
        debug!(
            nodes = network.node_count() - 1,
            branches = network.branches.len(),
            switches = network.switches.len(),
            controls = network.controls.len(),
            "network loaded"
        );
        Ok(network)
    }

    fn build_adjacency(&self) -> Vec<BTreeSet<NodeId>> {
        let mut adjacency = vec![BTreeSet::new(); self.node_names.len()];
        let mut connect = |a: NodeId, b: NodeId| {
            adjacency[a.0].insert(b);
            adjacency[b.0].insert(a);
        };
        for branch in &self.branches {
            match branch {
                Branch::Line(line) => connect(line.nodes[0], line.nodes[1]),
                _ => {
                    for (a, b) in branch.couplings() {
                        connect(a, b);
                    }
                }
            }
        }
        for sw in &self.switches {
            connect(sw.nodes[0], sw.nodes[1]);
        }
        for el in &self.nonlinear {
            connect(el.nodes[0], el.nodes[1]);
        }
        for m in &self.machines {
            for &t in &m.terminals {
                connect(t, NodeId::GROUND);
            }
        }
        adjacency
    }

    /// Map a measurement block onto the quantity it reads.
    pub fn resolve_probe(&self, spec: &BlockSpec, block: &str) -> Result<Option<Probe>> {
        let missing = |name: &str| EmtpError::ElementNotFound {
            name: name.to_string(),
            element: block.to_string(),
        };
        let probe = match spec {
            BlockSpec::NodeVoltage { node } => {
                let id = self.find_node(node).ok_or_else(|| EmtpError::BusNotFound {
                    bus: node.clone(),
                    element: block.to_string(),
                })?;
                Probe::NodeVoltage(id)
            }
            BlockSpec::SwitchCurrent { switch } => {
                Probe::SwitchCurrent(self.find_switch(switch).ok_or_else(|| missing(switch))?)
            }
            BlockSpec::SwitchStatus { switch } => {
                Probe::SwitchStatus(self.find_switch(switch).ok_or_else(|| missing(switch))?)
            }
            BlockSpec::BranchCurrent { branch, phase } => {
                let id = self.find_branch(branch).ok_or_else(|| missing(branch))?;
                if *phase >= self.branches[id.0].current_count() {
                    return Err(EmtpError::invalid_parameter(block, "phase", "branch has no such phase"));
                }
                Probe::BranchCurrent(id, *phase)
            }
            BlockSpec::MachineSpeed { machine } => {
                Probe::MachineSpeed(self.find_machine(machine).ok_or_else(|| missing(machine))?)
            }
            BlockSpec::MachineAngle { machine } => {
                Probe::MachineAngle(self.find_machine(machine).ok_or_else(|| missing(machine))?)
            }
            BlockSpec::MachinePower { machine } => {
                Probe::MachinePower(self.find_machine(machine).ok_or_else(|| missing(machine))?)
            }
            _ => return Ok(None),
        };
        Ok(Some(probe))
    }

    /// Resolve the control signals named by switches, sources and machines.
    fn bind_signals(&mut self) -> Result<()> {
        let controls = &self.controls;
        let signal = |name: &str, element: &str| -> Result<BlockId> {
            controls.find(name).ok_or_else(|| EmtpError::UnknownSignal {
                signal: name.to_string(),
                element: element.to_string(),
            })
        };
        for sw in &mut self.switches {
            if let SwitchControl::Controlled { signal: name } = &sw.control {
                sw.signal = Some(signal(name, &sw.name)?);
            }
        }
        for source in &mut self.sources {
            if let Waveform::Tacs { signal: name, .. } = &source.waveform {
                source.control = Some(signal(name, &source.name)?);
            }
        }
        Ok(())
    }

    /// Bind machine inputs to control blocks.
    fn bind_machine_signals(&mut self, desc: &NetworkDescription) -> Result<()> {
        for (machine, record) in self.machines.iter_mut().zip(&desc.machines) {
            let lookup = |name: &String| {
                self.controls.find(name).ok_or_else(|| EmtpError::UnknownSignal {
                    signal: name.clone(),
                    element: record.name.clone(),
                })
            };
            machine.field_signal = record.field_signal.as_ref().map(&lookup).transpose()?;
            machine.power_signal = record.power_signal.as_ref().map(&lookup).transpose()?;
        }
        Ok(())
    }

    // ============ Queries ============

    /// Number of nodes including ground.
    pub fn node_count(&self) -> usize {
        self.node_names.len()
    }

    pub fn node_name(&self, node: NodeId) -> &str {
        self.node_names.get(node.0).map(String::as_str).unwrap_or("?")
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        if is_ground_name(name) {
            return Some(NodeId::GROUND);
        }
        self.node_map.get(name).copied()
    }

    pub fn find_bus(&self, name: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.name == name)
    }

    pub fn find_branch(&self, name: &str) -> Option<BranchId> {
        match self.names.get(name) {
            Some(NamedElement::Element(EdgeOwner::Branch(id))) => Some(*id),
            _ => None,
        }
    }

    pub fn find_switch(&self, name: &str) -> Option<SwitchId> {
        match self.names.get(name) {
            Some(NamedElement::Element(EdgeOwner::Switch(id))) => Some(*id),
            _ => None,
        }
    }

    pub fn find_nonlinear(&self, name: &str) -> Option<NonlinearId> {
        match self.names.get(name) {
            Some(NamedElement::Element(EdgeOwner::Nonlinear(id))) => Some(*id),
            _ => None,
        }
    }

    pub fn find_machine(&self, name: &str) -> Option<MachineId> {
        match self.names.get(name) {
            Some(NamedElement::Element(EdgeOwner::Machine(id))) => Some(*id),
            _ => None,
        }
    }

    pub fn find_source(&self, name: &str) -> Option<SourceId> {
        match self.names.get(name) {
            Some(NamedElement::Source(id)) => Some(*id),
            _ => None,
        }
    }

    /// Nodes sharing an element with `node`, in ascending order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(node.0)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Node pairs coupled by admittance stamps, switches included whatever
    /// their state. Nonlinear elements are solved by compensation and do not
    /// appear.
    pub fn incidence(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for branch in &self.branches {
            for (a, b) in branch.couplings() {
                edges.push(Edge {
                    a,
                    b,
                    owner: EdgeOwner::Branch(branch.id()),
                });
            }
        }
        for sw in &self.switches {
            edges.push(Edge {
                a: sw.nodes[0],
                b: sw.nodes[1],
                owner: EdgeOwner::Switch(sw.id),
            });
        }
        for m in &self.machines {
            for &t in &m.terminals {
                edges.push(Edge {
                    a: t,
                    b: NodeId::GROUND,
                    owner: EdgeOwner::Machine(m.id),
                });
            }
        }
        edges
    }

    pub fn switch_closed(&self, id: SwitchId) -> bool {
        self.switches.get(id.0).map_or(false, |s| s.closed)
    }

    pub fn switch_current(&self, id: SwitchId) -> f64 {
        self.switches.get(id.0).map_or(0.0, |s| s.current)
    }

    /// Energy stored in the lumped reactive elements.
    pub fn stored_energy(&self) -> f64 {
        self.branches.iter().map(Branch::stored_energy).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::SourceKind;
    use crate::network::description::{InitialVoltage, SwitchRecord};
    use crate::tacs::{ControlInput, ControlRecord};

    fn rl_case() -> NetworkDescription {
        NetworkDescription::new()
            .with_source(NetworkDescription::source(
                "E",
                "SRC",
                SourceKind::Voltage,
                Waveform::Dc { amplitude: 100.0 },
            ))
            .with_switch(NetworkDescription::timed_switch("SW", "SRC", "LOAD", 0.0, f64::INFINITY))
            .with_branch(NetworkDescription::series("RL", "LOAD", "0", 10.0, 0.1, 0.0))
    }

    #[test]
    fn test_load_numbers_nodes_in_order() {
        let net = Network::load(&rl_case()).unwrap();
        assert_eq!(net.node_count(), 3);
        // Branches are numbered before switches
        assert_eq!(net.find_node("LOAD"), Some(NodeId(1)));
        assert_eq!(net.find_node("SRC"), Some(NodeId(2)));
        assert_eq!(net.find_node("GND"), Some(NodeId::GROUND));
        assert_eq!(net.neighbors(NodeId(1)), vec![NodeId::GROUND, NodeId(2)]);
        assert_eq!(net.incidence().len(), 2);
        assert!(net.switch_closed(net.find_switch("SW").unwrap()));
        assert_eq!(net.outputs, vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_dangling_source_reference() {
        let desc = rl_case().with_source(NetworkDescription::source(
            "I2",
            "NOWHERE",
            SourceKind::Current,
            Waveform::Dc { amplitude: 1.0 },
        ));
        let err = Network::load(&desc).unwrap_err();
        assert!(matches!(err, EmtpError::BusNotFound { ref bus, .. } if bus == "NOWHERE"));
    }

    #[test]
    fn test_dangling_initial_condition() {
        let mut desc = rl_case();
        desc.initial_voltages.push(InitialVoltage {
            node: "MISSING".to_string(),
            value: 1.0,
        });
        assert!(matches!(Network::load(&desc), Err(EmtpError::BusNotFound { .. })));
    }

    #[test]
    fn test_duplicate_names() {
        let desc = rl_case().with_branch(NetworkDescription::series("SW", "LOAD", "0", 1.0, 0.0, 0.0));
        assert!(matches!(
            Network::load(&desc),
            Err(EmtpError::DuplicateElement { ref name }) if name == "SW"
        ));
    }

    #[test]
    fn test_topology_errors() {
        let self_loop = NetworkDescription::new().with_branch(NetworkDescription::series("R", "A", "A", 1.0, 0.0, 0.0));
        assert!(matches!(Network::load(&self_loop), Err(EmtpError::InvalidTopology { .. })));

        let two_sources = rl_case().with_source(NetworkDescription::source(
            "E2",
            "SRC",
            SourceKind::Voltage,
            Waveform::Dc { amplitude: 1.0 },
        ));
        assert!(matches!(Network::load(&two_sources), Err(EmtpError::InvalidTopology { .. })));

        let grounded = rl_case().with_source(NetworkDescription::source(
            "E0",
            "0",
            SourceKind::Voltage,
            Waveform::Dc { amplitude: 1.0 },
        ));
        assert!(matches!(Network::load(&grounded), Err(EmtpError::InvalidTopology { .. })));

        let shorted = rl_case().with_switch(NetworkDescription::timed_switch("FAULT", "SRC", "0", 0.01, 0.02));
        assert!(matches!(Network::load(&shorted), Err(EmtpError::InvalidTopology { .. })));

        let mut unused_bus = rl_case();
        unused_bus.buses.push(crate::network::BusRecord {
            name: "SPARE".to_string(),
            phases: 1,
        });
        assert!(matches!(Network::load(&unused_bus), Err(EmtpError::InvalidTopology { .. })));
    }

    #[test]
    fn test_controlled_switch_binding() {
        let mut desc = rl_case();
        desc.switches.push(SwitchRecord {
            name: "BRK".to_string(),
            from: "LOAD".to_string(),
            to: "X".to_string(),
            control: SwitchControl::Controlled {
                signal: "TRIP".to_string(),
            },
        });
        desc.branches.push(NetworkDescription::series("RX", "X", "0", 5.0, 0.0, 0.0));
        assert!(matches!(Network::load(&desc), Err(EmtpError::UnknownSignal { .. })));

        desc.controls.push(ControlRecord {
            name: "I".to_string(),
            block: BlockSpec::SwitchCurrent { switch: "SW".to_string() },
            inputs: vec![],
        });
        desc.controls.push(ControlRecord {
            name: "TRIP".to_string(),
            block: BlockSpec::Compare { threshold: 5.0 },
            inputs: vec![ControlInput::new("I", false)],
        });
        let net = Network::load(&desc).unwrap();
        let brk = net.find_switch("BRK").unwrap();
        assert_eq!(net.switches[brk.0].signal, net.controls.find("TRIP"));
    }

    #[test]
    fn test_missing_measured_switch() {
        let desc = rl_case().with_control(ControlRecord {
            name: "I".to_string(),
            block: BlockSpec::SwitchCurrent { switch: "NOPE".to_string() },
            inputs: vec![],
        });
        assert!(matches!(Network::load(&desc), Err(EmtpError::ElementNotFound { .. })));
    }
}
