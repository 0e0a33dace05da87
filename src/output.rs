//! Per-step output samples and sinks.
//!
//! Every emitted step produces one [`StepSample`] whose values follow the
//! column order of the run's [`OutputLayout`]: node voltages, branch
//! currents, switch currents, nonlinear-element currents, machine
//! quantities and finally control-block outputs.

use std::io::Write;

use crate::error::{EmtpError, Result};
use crate::network::{BlockId, BranchId, MachineId, Network, NodeId, NonlinearId, SwitchId};
use crate::tacs::ControlSystem;

/// Significant digits written by [`ColumnWriter`]: enough to round-trip an `f64`.
pub const SIGNIFICANT_DIGITS: usize = 17;

/// A reported quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    NodeVoltage(NodeId),
    BranchCurrent(BranchId, usize),
    SwitchCurrent(SwitchId),
    NonlinearCurrent(NonlinearId),
    MachineSpeed(MachineId),
    MachineAngle(MachineId),
    MachinePower(MachineId),
    Control(BlockId),
}

/// Column labels and the quantity behind each column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputLayout {
    labels: Vec<String>,
    quantities: Vec<Quantity>,
}

impl OutputLayout {
    /// Columns for a network and its control system.
    ///
    /// Node voltages cover `network.outputs`, or every node when that list
    /// is empty.
    pub fn new(network: &Network, controls: &ControlSystem) -> Self {
        let mut layout = Self::default();
        let nodes: Vec<NodeId> = if network.outputs.is_empty() {
            (1..network.node_count()).map(NodeId).collect()
        } else {
            network.outputs.clone()
        };
        for node in nodes {
            layout.push(format!("V({})", network.node_name(node)), Quantity::NodeVoltage(node));
        }
        for branch in &network.branches {
            let count = branch.current_count();
            for k in 0..count {
                let label = if count == 1 {
                    format!("I({})", branch.name())
                } else {
                    format!("I({}.{})", branch.name(), k + 1)
                };
                layout.push(label, Quantity::BranchCurrent(branch.id(), k));
            }
        }
        for sw in &network.switches {
            layout.push(format!("I({})", sw.name), Quantity::SwitchCurrent(sw.id));
        }
        for el in &network.nonlinear {
            layout.push(format!("I({})", el.name), Quantity::NonlinearCurrent(el.id));
        }
        for m in &network.machines {
            layout.push(format!("SPEED({})", m.name), Quantity::MachineSpeed(m.id));
            layout.push(format!("ANGLE({})", m.name), Quantity::MachineAngle(m.id));
            layout.push(format!("PE({})", m.name), Quantity::MachinePower(m.id));
        }
        for i in 0..controls.len() {
            let id = BlockId(i);
            layout.push(format!("T({})", controls.name(id)), Quantity::Control(id));
        }
        layout
    }

    fn push(&mut self, label: String, quantity: Quantity) {
        self.labels.push(label);
        self.quantities.push(quantity);
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn quantities(&self) -> &[Quantity] {
        &self.quantities
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Column index of a label such as `V(BUS1)`.
    pub fn column(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Read every column from the committed state.
    pub fn collect(&self, network: &Network, controls: &ControlSystem, voltages: &[f64]) -> Vec<f64> {
        self.quantities
            .iter()
            .map(|q| match *q {
                Quantity::NodeVoltage(node) => voltages.get(node.0).copied().unwrap_or(0.0),
                Quantity::BranchCurrent(id, k) => network.branches.get(id.0).map_or(0.0, |b| b.current(k)),
                Quantity::SwitchCurrent(id) => network.switch_current(id),
                Quantity::NonlinearCurrent(id) => network.nonlinear.get(id.0).map_or(0.0, |e| e.current),
                Quantity::MachineSpeed(id) => network.machines.get(id.0).map_or(0.0, |m| m.speed()),
                Quantity::MachineAngle(id) => network.machines.get(id.0).map_or(0.0, |m| m.rotor_angle()),
                Quantity::MachinePower(id) => network.machines.get(id.0).map_or(0.0, |m| m.electrical_power),
                Quantity::Control(id) => controls.output(id),
            })
            .collect()
    }
}

/// Condition attached to an emitted sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepWarning {
    /// The nonlinear iteration stopped at its limit and the best estimate
    /// was kept
    NotConverged { time: f64, iterations: usize, residual: f64 },
}

/// Values of all output columns at one time point.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSample {
    pub step: usize,
    pub time: f64,
    pub values: Vec<f64>,
    pub warning: Option<StepWarning>,
}

impl StepSample {
    pub fn value(&self, column: usize) -> f64 {
        self.values.get(column).copied().unwrap_or(f64::NAN)
    }
}

/// Destination for emitted samples.
pub trait OutputSink {
    /// Called once before the first sample.
    fn begin(&mut self, _layout: &OutputLayout) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, sample: &StepSample) -> Result<()>;

    /// Called once after the last sample, also when the run failed.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every sample in memory.
#[derive(Debug, Clone, Default)]
pub struct SampleRecorder {
    pub layout: OutputLayout,
    pub samples: Vec<StepSample>,
}

impl SampleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time series of one column.
    pub fn series(&self, label: &str) -> Option<Vec<f64>> {
        let column = self.layout.column(label)?;
        Some(self.samples.iter().map(|s| s.value(column)).collect())
    }
}

impl OutputSink for SampleRecorder {
    fn begin(&mut self, layout: &OutputLayout) -> Result<()> {
        self.layout = layout.clone();
        Ok(())
    }

    fn record(&mut self, sample: &StepSample) -> Result<()> {
        self.samples.push(sample.clone());
        Ok(())
    }
}

/// Whitespace-separated text columns, one line per sample, at full
/// precision. Flagged samples carry a trailing `#` comment.
pub struct ColumnWriter<W: Write> {
    writer: W,
}

fn output_error(e: std::io::Error) -> EmtpError {
    EmtpError::OutputError { message: e.to_string() }
}

impl<W: Write> ColumnWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for ColumnWriter<W> {
    fn begin(&mut self, layout: &OutputLayout) -> Result<()> {
        let mut line = String::from("t");
        for label in layout.labels() {
            line.push(' ');
            line.push_str(label);
        }
        writeln!(self.writer, "{line}").map_err(output_error)
    }

    fn record(&mut self, sample: &StepSample) -> Result<()> {
        let precision = SIGNIFICANT_DIGITS - 1;
        let mut line = format!("{:.*e}", precision, sample.time);
        for v in &sample.values {
            line.push(' ');
            line.push_str(&format!("{:.*e}", precision, v));
        }
        if let Some(StepWarning::NotConverged { iterations, residual, .. }) = sample.warning {
            line.push_str(&format!(" # not converged after {iterations} iterations, residual {residual:.3e}"));
        }
        writeln!(self.writer, "{line}").map_err(output_error)
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().map_err(output_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{SourceKind, Waveform};
    use crate::error::ErrorKind;
    use crate::network::NetworkDescription;

    fn network() -> Network {
        let desc = NetworkDescription::new()
            .with_source(NetworkDescription::source(
                "E",
                "SRC",
                SourceKind::Voltage,
                Waveform::Dc { amplitude: 1.0 },
            ))
            .with_branch(NetworkDescription::series("R1", "SRC", "LOAD", 1.0, 0.0, 0.0))
            .with_branch(NetworkDescription::series("R2", "LOAD", "0", 1.0, 0.0, 0.0))
            .with_switch(NetworkDescription::timed_switch("SW", "LOAD", "0", 1.0, f64::INFINITY));
        Network::load(&desc).unwrap()
    }

    fn sample(time: f64, values: Vec<f64>) -> StepSample {
        StepSample {
            step: 0,
            time,
            values,
            warning: None,
        }
    }

    #[test]
    fn test_layout_columns() {
        let net = network();
        let layout = OutputLayout::new(&net, &net.controls);
        let labels: Vec<&str> = layout.labels().iter().map(String::as_str).collect();
        assert_eq!(labels, ["V(SRC)", "V(LOAD)", "I(R1)", "I(R2)", "I(SW)"]);
        assert_eq!(layout.column("I(SW)"), Some(4));
    }

    #[test]
    fn test_column_writer_full_precision() {
        let net = network();
        let layout = OutputLayout::new(&net, &net.controls);
        let mut writer = ColumnWriter::new(Vec::new());
        writer.begin(&layout).unwrap();
        let third = 1.0 / 3.0;
        writer.record(&sample(0.0, vec![third, 0.0, 0.0, 0.0, 0.0])).unwrap();
        writer.finish().unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("t V(SRC) V(LOAD) I(R1) I(R2) I(SW)"));
        let row = lines.next().unwrap();
        let parsed: f64 = row.split_whitespace().nth(1).unwrap().parse().unwrap();
        assert_eq!(parsed, third);
    }

    #[test]
    fn test_warning_is_written() {
        let mut writer = ColumnWriter::new(Vec::new());
        let mut s = sample(1e-3, vec![1.0]);
        s.warning = Some(StepWarning::NotConverged {
            time: 1e-3,
            iterations: 5,
            residual: 0.1,
        });
        writer.record(&s).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.contains("# not converged after 5 iterations"));
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_io_failure_is_output_error() {
        let mut writer = ColumnWriter::new(Broken);
        let err = writer.record(&sample(0.0, vec![1.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);
    }

    #[test]
    fn test_recorder_series() {
        let net = network();
        let layout = OutputLayout::new(&net, &net.controls);
        let mut rec = SampleRecorder::new();
        rec.begin(&layout).unwrap();
        rec.record(&sample(0.0, vec![1.0, 0.5, 0.5, 0.5, 0.0])).unwrap();
        rec.record(&sample(1.0, vec![1.0, 0.25, 0.75, 0.25, 0.5])).unwrap();
        assert_eq!(rec.series("V(LOAD)"), Some(vec![0.5, 0.25]));
        assert_eq!(rec.series("V(NOPE)"), None);
    }
}
