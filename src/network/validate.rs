//! Network validation.
//!
//! Parameter checks run on the description records before any element is
//! built; topology checks run on the assembled [`Network`].

use std::collections::HashSet;

use super::description::{BranchRecord, SourceRecord, SwitchRecord};
use super::types::NodeId;
use super::Network;
use crate::components::{Branch, SourceKind, SwitchControl, Waveform};
use crate::error::{EmtpError, Result};

/// Relative tolerance for the symmetry of coupled R and L matrices.
const SYMMETRY_TOL: f64 = 1e-9;

fn check_square(name: &str, param: &str, m: &[Vec<f64>], n: usize) -> Result<()> {
    if m.len() != n || m.iter().any(|row| row.len() != n) {
        return Err(EmtpError::invalid_parameter(
            name,
            param,
            format!("matrix must be {n}x{n}"),
        ));
    }
    for i in 0..n {
        if m[i][i] < 0.0 {
            return Err(EmtpError::invalid_parameter(name, param, "diagonal entries cannot be negative"));
        }
        for j in 0..i {
            let scale = m[i][j].abs().max(m[j][i].abs()).max(f64::MIN_POSITIVE);
            if (m[i][j] - m[j][i]).abs() > SYMMETRY_TOL * scale {
                return Err(EmtpError::invalid_parameter(name, param, "matrix must be symmetric"));
            }
        }
    }
    Ok(())
}

/// Check the physical parameters of a branch record.
pub fn check_branch(record: &BranchRecord) -> Result<()> {
    match record {
        BranchRecord::Series {
            name,
            resistance,
            inductance,
            capacitance,
            ..
        } => {
            for (param, value) in [("r", resistance), ("l", inductance), ("c", capacitance)] {
                if *value < 0.0 || !value.is_finite() {
                    return Err(EmtpError::invalid_parameter(name, param, "must be finite and non-negative"));
                }
            }
            if *resistance == 0.0 && *inductance == 0.0 && *capacitance == 0.0 {
                return Err(EmtpError::invalid_parameter(name, "r", "series branch needs R, L or C"));
            }
            Ok(())
        }
        BranchRecord::Coupled {
            name,
            from,
            to,
            resistance,
            inductance,
        } => {
            let n = from.len();
            if n != to.len() || !(2..=3).contains(&n) {
                return Err(EmtpError::invalid_parameter(
                    name,
                    "phases",
                    "coupled branches have two or three phases",
                ));
            }
            check_square(name, "r", resistance, n)?;
            check_square(name, "l", inductance, n)?;
            if (0..n).all(|i| resistance[i][i] == 0.0 && inductance[i][i] == 0.0) {
                return Err(EmtpError::invalid_parameter(name, "l", "coupled branch has no impedance"));
            }
            Ok(())
        }
        BranchRecord::Line {
            name,
            surge_impedance,
            travel_time,
            resistance,
            ..
        } => {
            if *surge_impedance <= 0.0 {
                return Err(EmtpError::invalid_parameter(name, "z", "surge impedance must be positive"));
            }
            if *travel_time <= 0.0 {
                return Err(EmtpError::invalid_parameter(name, "tau", "travel time must be positive"));
            }
            if *resistance < 0.0 {
                return Err(EmtpError::invalid_parameter(name, "r", "resistance cannot be negative"));
            }
            Ok(())
        }
    }
}

pub fn check_switch(record: &SwitchRecord) -> Result<()> {
    if let SwitchControl::Timed {
        t_close,
        t_open,
        current_margin,
    } = &record.control
    {
        if *t_open <= *t_close {
            return Err(EmtpError::invalid_parameter(
                &record.name,
                "topen",
                "opening time must be after closing time",
            ));
        }
        if *current_margin < 0.0 {
            return Err(EmtpError::invalid_parameter(&record.name, "imar", "current margin cannot be negative"));
        }
    }
    Ok(())
}

pub fn check_source(record: &SourceRecord) -> Result<()> {
    let bad = |param: &str, message: &str| Err(EmtpError::invalid_parameter(&record.name, param, message));
    if record.t_stop <= record.t_start {
        return bad("tstop", "source must stop after it starts");
    }
    match &record.waveform {
        Waveform::Cosine { frequency, .. } if *frequency < 0.0 => bad("freq", "frequency cannot be negative"),
        Waveform::Ramp { rise_time, .. } if *rise_time < 0.0 => bad("rise", "rise time cannot be negative"),
        Waveform::Surge { alpha, beta, .. } if *alpha < 0.0 || *beta < 0.0 => {
            bad("alpha", "decay constants cannot be negative")
        }
        _ => Ok(()),
    }
}

/// Topology checks on an assembled network.
///
/// Checks:
/// - No element connects a node to itself
/// - Sources are not connected to ground only, and no node carries two
///   voltage sources
/// - No switch joins two nodes whose voltages are both imposed
/// - Every node is connected to at least one element
pub fn validate_topology(network: &Network) -> Result<()> {
    for branch in &network.branches {
        let pairs: Vec<(NodeId, NodeId)> = match branch {
            Branch::Coupled(b) => b.from.iter().copied().zip(b.to.iter().copied()).collect(),
            Branch::Series(b) => vec![(b.nodes[0], b.nodes[1])],
            Branch::Line(b) => vec![(b.nodes[0], b.nodes[1])],
        };
        for (a, b) in pairs {
            if a == b {
                return Err(EmtpError::topology(format!(
                    "branch '{}' connects node '{}' to itself",
                    branch.name(),
                    network.node_name(a)
                )));
            }
        }
    }
    for sw in &network.switches {
        if sw.nodes[0] == sw.nodes[1] {
            return Err(EmtpError::topology(format!(
                "switch '{}' connects node '{}' to itself",
                sw.name,
                network.node_name(sw.nodes[0])
            )));
        }
    }
    for el in &network.nonlinear {
        if el.nodes[0] == el.nodes[1] {
            return Err(EmtpError::topology(format!(
                "nonlinear element '{}' connects node '{}' to itself",
                el.name,
                network.node_name(el.nodes[0])
            )));
        }
    }
    for m in &network.machines {
        let t = m.terminals;
        if t.iter().any(|n| n.is_ground()) || t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
            return Err(EmtpError::topology(format!(
                "machine '{}' needs three distinct ungrounded terminals",
                m.name
            )));
        }
    }

    let mut imposed: HashSet<NodeId> = HashSet::new();
    for source in &network.sources {
        if source.node.is_ground() {
            return Err(EmtpError::topology(format!("source '{}' is connected to ground only", source.name)));
        }
        if source.kind == SourceKind::Voltage && !imposed.insert(source.node) {
            return Err(EmtpError::topology(format!(
                "node '{}' is driven by more than one voltage source",
                network.node_name(source.node)
            )));
        }
    }
    for sw in &network.switches {
        let known = |n: NodeId| n.is_ground() || imposed.contains(&n);
        if known(sw.nodes[0]) && known(sw.nodes[1]) {
            return Err(EmtpError::topology(format!(
                "switch '{}' joins two nodes with imposed voltages",
                sw.name
            )));
        }
    }

    for node in 1..network.node_count() {
        let id = NodeId(node);
        if network.neighbors(id).is_empty() {
            return Err(EmtpError::topology(format!(
                "node '{}' has no connected element",
                network.node_name(id)
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkDescription;

    #[test]
    fn test_negative_resistance_rejected() {
        let rec = NetworkDescription::series("R1", "A", "0", -1.0, 0.0, 0.0);
        let err = check_branch(&rec).unwrap_err();
        assert!(matches!(err, EmtpError::InvalidParameter { ref param, .. } if param == "r"));
    }

    #[test]
    fn test_empty_series_branch_rejected() {
        let rec = NetworkDescription::series("X", "A", "0", 0.0, 0.0, 0.0);
        assert!(check_branch(&rec).is_err());
        let pure_c = NetworkDescription::series("C1", "A", "0", 0.0, 0.0, 1e-6);
        assert!(check_branch(&pure_c).is_ok());
    }

    #[test]
    fn test_asymmetric_coupling_rejected() {
        let rec = BranchRecord::Coupled {
            name: "T1".to_string(),
            from: vec!["A".into(), "B".into()],
            to: vec!["0".into(), "0".into()],
            resistance: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            inductance: vec![vec![1.0, 0.5], vec![0.4, 1.0]],
        };
        assert!(matches!(
            check_branch(&rec),
            Err(EmtpError::InvalidParameter { ref param, .. }) if param == "l"
        ));
    }

    #[test]
    fn test_switch_open_before_close_rejected() {
        let rec = NetworkDescription::timed_switch("SW", "A", "B", 0.02, 0.01);
        assert!(check_switch(&rec).is_err());
        let ok = NetworkDescription::timed_switch("SW", "A", "B", 0.0, 0.01);
        assert!(check_switch(&ok).is_ok());
    }
}
