//! Time-step simulator.
//!
//! A run moves through the phases
//!
//! ```text
//!   Initializing -> Stepping -> NonlinearIteration -> Advancing -> Stepping ...
//!                                                              \-> Terminating
//! ```
//!
//! Each step from `t - dt` to `t`:
//!
//! 1. Recompute the history terms of every reactive element from the
//!    committed state of the previous step.
//! 2. Apply all switch transitions due at `t` as one batch, in ascending
//!    bus order, followed by a single refactorization.
//! 3. Impose the source-driven node voltages, assemble the history and
//!    current-source injections, and solve the linear network.
//! 4. Solve the nonlinear elements by compensation.
//! 5. Check for overflow, then commit branch, switch, nonlinear and
//!    machine state.
//! 6. Solve the control system at `t`. Its outputs drive switches, sources
//!    and machines in the next step.

use std::mem;

use tracing::{debug, error, info, info_span, warn};

use crate::components::{Branch, LineSample, Source, SourceKind, Switch, SynchronousMachine};
use crate::error::{EmtpError, Result};
use crate::network::{BranchId, MachineId, Network, NodeId, SwitchId};
use crate::output::{OutputLayout, OutputSink, SampleRecorder, StepSample, StepWarning};
use crate::tacs::{ControlSystem, Measurements};

use super::admittance::{AdmittanceSystem, NodeLayout};
use super::compensation::{Compensation, NewtonSettings, NonlinearOutcome};
use super::config::{ConvergencePolicy, Initialization, SimulationConfig};
use super::scalar::ZeroPivot;
use super::steady_state::{network_frequency, SteadyState};

/// Where the simulator is in its per-step cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    Initializing,
    Stepping,
    NonlinearIteration,
    Advancing,
    Terminating,
}

/// Step counter on the fixed time grid `t = step * dt`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationClock {
    pub dt: f64,
    /// Last completed step
    pub step: usize,
    /// Number of steps in the run
    pub steps: usize,
}

impl SimulationClock {
    pub fn new(dt: f64, steps: usize) -> Self {
        Self { dt, step: 0, steps }
    }

    /// Time of the last completed step.
    pub fn time(&self) -> f64 {
        self.step as f64 * self.dt
    }

    pub fn is_done(&self) -> bool {
        self.step >= self.steps
    }
}

/// Outcome of one call to [`Simulator::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Present when this step falls on the output interval
    pub sample: Option<StepSample>,
    /// Nonlinear iterations used by the step
    pub iterations: usize,
    pub warning: Option<StepWarning>,
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub layout: OutputLayout,
    /// All samples computed before the run ended
    pub samples: Vec<StepSample>,
    /// The error that stopped the run early, if any
    pub failure: Option<EmtpError>,
}

impl RunOutput {
    pub fn series(&self, label: &str) -> Option<Vec<f64>> {
        let column = self.layout.column(label)?;
        Some(self.samples.iter().map(|s| s.value(column)).collect())
    }
}

/// Committed network state as seen by the control blocks.
struct Probes<'a> {
    network: &'a Network,
    voltages: &'a [f64],
}

impl Measurements for Probes<'_> {
    fn node_voltage(&self, node: NodeId) -> f64 {
        self.voltages.get(node.0).copied().unwrap_or(0.0)
    }

    fn switch_current(&self, id: SwitchId) -> f64 {
        self.network.switch_current(id)
    }

    fn switch_closed(&self, id: SwitchId) -> bool {
        self.network.switch_closed(id)
    }

    fn branch_current(&self, id: BranchId, phase: usize) -> f64 {
        self.network.branches.get(id.0).map_or(0.0, |b| b.current(phase))
    }

    fn machine_speed(&self, id: MachineId) -> f64 {
        self.network.machines.get(id.0).map_or(0.0, |m| m.speed())
    }

    fn machine_angle(&self, id: MachineId) -> f64 {
        self.network.machines.get(id.0).map_or(0.0, |m| m.rotor_angle())
    }

    fn machine_power(&self, id: MachineId) -> f64 {
        self.network.machines.get(id.0).map_or(0.0, |m| m.electrical_power)
    }
}

fn source_value(source: &Source, controls: &ControlSystem, t: f64) -> f64 {
    let control = source.control.map_or(0.0, |id| controls.output(id));
    source.value(t, control)
}

fn apply_machine_controls(machines: &mut [SynchronousMachine], controls: &ControlSystem) {
    for m in machines {
        if let Some(id) = m.field_signal {
            m.field_voltage = controls.output(id);
        }
        if let Some(id) = m.power_signal {
            m.mechanical_power = controls.output(id);
        }
    }
}

/// The transient simulator.
pub struct Simulator {
    network: Network,
    /// Control blocks, held apart from the network so they can read it
    controls: ControlSystem,
    config: SimulationConfig,
    system: AdmittanceSystem<f64>,
    compensation: Compensation,
    layout: OutputLayout,
    /// Node voltages of the last committed step, ground included
    voltages: Vec<f64>,
    clock: SimulationClock,
    phase: SolverPhase,
    /// Warning to attach to the next emitted sample
    pending_warning: Option<StepWarning>,
    factorizations: usize,
}

impl Simulator {
    /// Build the companion network, factorize it and establish the state
    /// at t = 0.
    pub fn new(mut network: Network, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let dt = config.time_step;
        let mut controls = mem::take(&mut network.controls);

        for branch in &mut network.branches {
            match branch {
                Branch::Series(b) => b.prepare(dt),
                Branch::Coupled(b) => b.prepare(dt).map_err(|_| {
                    EmtpError::invalid_parameter(&b.name, "l", "R + 2L/dt is singular at this time step")
                })?,
                Branch::Line(b) => {
                    if !b.prepare(dt) {
                        return Err(EmtpError::invalid_parameter(
                            &b.name,
                            "tau",
                            "travel time is shorter than the time step",
                        ));
                    }
                }
            }
        }
        for m in &mut network.machines {
            m.prepare(dt);
        }
        controls.prepare(dt)?;

        let layout = OutputLayout::new(&network, &controls);
        let system = AdmittanceSystem::new(NodeLayout::new(&network), &network.incidence(), config.pivot_tolerance);
        let steps = config.step_count();

        let mut sim = Self {
            voltages: vec![0.0; network.node_count()],
            network,
            controls,
            system,
            compensation: Compensation::new(),
            layout,
            clock: SimulationClock::new(dt, steps),
            phase: SolverPhase::Initializing,
            pending_warning: None,
            factorizations: 0,
            config,
        };
        sim.assemble();
        sim.stamp_switches();
        sim.factorize(0.0, true)?;
        sim.initialize()?;
        sim.phase = if sim.clock.is_done() {
            SolverPhase::Terminating
        } else {
            SolverPhase::Stepping
        };
        Ok(sim)
    }

    /// Stamp every fixed companion conductance.
    fn assemble(&mut self) {
        let system = &mut self.system;
        for branch in &self.network.branches {
            match branch {
                Branch::Series(b) => system.stamp_admittance(b.nodes[0], b.nodes[1], b.conductance()),
                Branch::Coupled(b) => system.stamp_coupled(&b.from, &b.to, b.conductance()),
                Branch::Line(b) => {
                    system.add_self(b.nodes[0], b.conductance());
                    system.add_self(b.nodes[1], b.conductance());
                }
            }
        }
        for m in &self.network.machines {
            for &t in &m.terminals {
                system.add_self(t, m.conductance());
            }
        }
    }

    fn stamp_switches(&mut self) {
        let g = Switch::closed_conductance(self.config.switch_resistance);
        self.system.set_switches(
            self.network
                .switches
                .iter()
                .filter(|s| s.closed)
                .map(|s| (s.nodes, g)),
        );
    }

    fn singular(&self, pivot: ZeroPivot, time: f64) -> EmtpError {
        EmtpError::SingularMatrix {
            bus: self.network.node_name(self.system.pivot_node(pivot)).to_string(),
            time,
        }
    }

    /// Factorize (`full`) or refactorize the switch block.
    fn factorize(&mut self, time: f64, full: bool) -> Result<()> {
        let result = if full { self.system.factor() } else { self.system.refactor() };
        result.map_err(|pivot| self.singular(pivot, time))?;
        self.compensation.invalidate();
        self.factorizations += 1;
        Ok(())
    }

    fn set_known_voltages(&mut self, t: f64) {
        for source in &self.network.sources {
            if source.kind == SourceKind::Voltage {
                self.voltages[source.node.0] = source_value(source, &self.controls, t);
            }
        }
    }

    fn initialize(&mut self) -> Result<()> {
        let span = info_span!("initialize", mode = ?self.config.initialization);
        let _enter = span.enter();

        let steady = match self.config.initialization {
            Initialization::Zero => None,
            Initialization::SteadyState => match network_frequency(&self.network)? {
                Some(omega) => Some(SteadyState::solve(
                    &self.network,
                    omega,
                    self.config.switch_resistance,
                    self.config.pivot_tolerance,
                )?),
                None => {
                    warn!("no sinusoidal source or machine defines a frequency; starting from rest");
                    None
                }
            },
        };

        match steady {
            Some(ss) => {
                if !self.network.initial_voltages.is_empty() {
                    warn!("initial node voltages are ignored by steady-state initialization");
                }
                ss.apply(&mut self.network, self.config.time_step, &mut self.voltages)?;
                self.set_known_voltages(0.0);
            }
            None => self.initialize_at_rest(),
        }

        self.controls.solve(
            0.0,
            &Probes {
                network: &self.network,
                voltages: &self.voltages,
            },
        );
        apply_machine_controls(&mut self.network.machines, &self.controls);
        for m in &mut self.network.machines {
            m.start(0.0);
        }
        debug!(
            unknowns = self.system.layout().unknown_count(),
            steps = self.clock.steps,
            "initial state established"
        );
        Ok(())
    }

    /// Zero state apart from explicit node voltages and branch conditions.
    fn initialize_at_rest(&mut self) {
        for &(node, value) in &self.network.initial_voltages {
            self.voltages[node.0] = value;
        }
        self.set_known_voltages(0.0);
        let v = &self.voltages;
        let across = |a: NodeId, b: NodeId| v[a.0] - v[b.0];

        for branch in &mut self.network.branches {
            match branch {
                Branch::Series(b) => {
                    let initial = self.network.branch_initial.iter().find(|ic| ic.branch == b.id);
                    let v_branch = across(b.nodes[0], b.nodes[1]);
                    let current = initial.map_or(0.0, |ic| ic.current);
                    let default_vc = if b.is_pure_capacitor() { v_branch } else { 0.0 };
                    let vc = initial.and_then(|ic| ic.capacitor_voltage).unwrap_or(default_vc);
                    b.set_initial(current, vc, v_branch);
                }
                Branch::Coupled(b) => {
                    let volts: Vec<f64> = b.from.iter().zip(&b.to).map(|(&a, &b)| across(a, b)).collect();
                    b.set_initial(&vec![0.0; volts.len()], &volts);
                }
                Branch::Line(b) => {
                    let ends = [v[b.nodes[0].0], v[b.nodes[1].0]];
                    b.set_initial(|_| LineSample { v: ends, i: [0.0; 2] });
                }
            }
        }
        for el in &mut self.network.nonlinear {
            el.set_initial(across(el.nodes[0], el.nodes[1]), 0.0);
        }
        for (m, setpoint) in self.network.machines.iter_mut().zip(&self.network.machine_setpoints) {
            let v_term = m.terminals.map(|n| v[n.0]);
            m.set_initial([0.0; 3], v_term, 0.0, setpoint.field_voltage, setpoint.mechanical_power);
        }
    }

    /// Advance one time step.
    ///
    /// A step-time error is logged with its time, ends the run and is
    /// returned; samples emitted before it remain valid.
    pub fn step(&mut self) -> Result<StepReport> {
        if self.phase == SolverPhase::Terminating {
            return Ok(StepReport {
                sample: None,
                iterations: 0,
                warning: None,
            });
        }
        let t = (self.clock.step + 1) as f64 * self.clock.dt;
        match self.advance_step(t) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(time = t, error = %e, "step failed");
                self.phase = SolverPhase::Terminating;
                Err(e)
            }
        }
    }

    fn advance_step(&mut self, t: f64) -> Result<StepReport> {
        self.phase = SolverPhase::Stepping;
        let dt = self.clock.dt;

        for branch in &mut self.network.branches {
            branch.update_history();
        }
        for m in &mut self.network.machines {
            m.update_history();
        }

        self.resolve_switches(t)?;
        self.set_known_voltages(t);
        self.assemble_rhs(t);
        self.system.solve(&mut self.voltages);

        self.phase = SolverPhase::NonlinearIteration;
        let mut warning = None;
        let (outcome, nonlinear_currents) = self.compensation.solve(
            &self.system,
            &self.network.nonlinear,
            &mut self.voltages,
            NewtonSettings {
                tolerance: self.config.tolerance,
                max_iterations: self.config.max_iterations,
                dt,
            },
        );
        if let NonlinearOutcome::NotConverged { iterations, residual } = outcome {
            match self.config.convergence_policy {
                ConvergencePolicy::Abort => return Err(EmtpError::convergence_failure(iterations, residual, t)),
                ConvergencePolicy::AcceptBestEstimate => {
                    warn!(
                        time = t,
                        iterations,
                        residual,
                        "nonlinear iteration did not converge; keeping best estimate"
                    );
                    warning = Some(StepWarning::NotConverged {
                        time: t,
                        iterations,
                        residual,
                    });
                }
            }
        }
        self.check_overflow(t)?;

        self.phase = SolverPhase::Advancing;
        self.commit(t, &nonlinear_currents);
        self.controls.solve(
            t,
            &Probes {
                network: &self.network,
                voltages: &self.voltages,
            },
        );

        self.clock.step += 1;
        if warning.is_some() {
            self.pending_warning = warning;
        }
        let sample = if self.clock.step % self.config.output_interval == 0 {
            let mut sample = self.current_sample();
            sample.warning = self.pending_warning.take();
            Some(sample)
        } else {
            None
        };
        self.phase = if self.clock.is_done() {
            SolverPhase::Terminating
        } else {
            SolverPhase::Stepping
        };
        Ok(StepReport {
            sample,
            iterations: outcome.iterations(),
            warning,
        })
    }

    /// Apply the switch transitions due at `t` as one batch.
    fn resolve_switches(&mut self, t: f64) -> Result<()> {
        let mut changes: Vec<(NodeId, SwitchId, bool)> = self
            .network
            .switches
            .iter()
            .filter_map(|sw| {
                let control = sw.signal.map_or(0.0, |id| self.controls.output(id));
                let desired = sw.desired_state(t, control);
                (desired != sw.closed).then(|| (sw.bus_order_key(), sw.id, desired))
            })
            .collect();
        changes.sort_by_key(|&(key, id, _)| (key, id));

        for &(_, id, closed) in &changes {
            let sw = &mut self.network.switches[id.0];
            sw.set_state(closed);
            debug!(
                switch = %sw.name,
                time = t,
                action = if closed { "close" } else { "open" },
                "switch operated"
            );
        }
        if !changes.is_empty() {
            self.stamp_switches();
        }
        if self.config.refactor_every_step {
            self.factorize(t, true)?;
        } else if !changes.is_empty() {
            self.factorize(t, false)?;
            debug!(time = t, switches = changes.len(), "switch block refactorized");
        }
        Ok(())
    }

    fn assemble_rhs(&mut self, t: f64) {
        let system = &mut self.system;
        system.clear_rhs();
        for branch in &self.network.branches {
            match branch {
                Branch::Series(b) => system.stamp_current(b.nodes[0], b.nodes[1], b.history_current()),
                Branch::Coupled(b) => {
                    for (k, &h) in b.history_currents().iter().enumerate() {
                        system.stamp_current(b.from[k], b.to[k], h);
                    }
                }
                Branch::Line(b) => {
                    let hist = b.history_currents();
                    system.stamp_current(b.nodes[0], NodeId::GROUND, hist[0]);
                    system.stamp_current(b.nodes[1], NodeId::GROUND, hist[1]);
                }
            }
        }
        for m in &self.network.machines {
            for (k, &node) in m.terminals.iter().enumerate() {
                system.inject(node, m.norton_injection(k));
            }
        }
        for source in &self.network.sources {
            if source.kind == SourceKind::Current {
                system.inject(source.node, source_value(source, &self.controls, t));
            }
        }
    }

    fn check_overflow(&self, t: f64) -> Result<()> {
        let limit = self.config.voltage_limit;
        for (node, &v) in self.voltages.iter().enumerate().skip(1) {
            if !v.is_finite() || v.abs() > limit {
                return Err(EmtpError::NumericalOverflow {
                    bus: self.network.node_name(NodeId(node)).to_string(),
                    value: v,
                    time: t,
                });
            }
        }
        Ok(())
    }

    /// Commit the solved step into every element's state.
    fn commit(&mut self, t: f64, nonlinear_currents: &[f64]) {
        let dt = self.clock.dt;
        let v = &self.voltages;
        let across = |a: NodeId, b: NodeId| v[a.0] - v[b.0];

        for branch in &mut self.network.branches {
            match branch {
                Branch::Series(b) => b.advance(across(b.nodes[0], b.nodes[1])),
                Branch::Coupled(b) => {
                    let volts: Vec<f64> = b.from.iter().zip(&b.to).map(|(&a, &b)| across(a, b)).collect();
                    b.advance(&volts);
                }
                Branch::Line(b) => b.advance([v[b.nodes[0].0], v[b.nodes[1].0]]),
            }
        }

        let g_switch = Switch::closed_conductance(self.config.switch_resistance);
        for sw in &mut self.network.switches {
            let current = if sw.closed {
                g_switch * across(sw.nodes[0], sw.nodes[1])
            } else {
                0.0
            };
            sw.commit_current(current);
        }

        for (el, &i) in self.network.nonlinear.iter_mut().zip(nonlinear_currents) {
            el.commit(across(el.nodes[0], el.nodes[1]), i, dt);
        }

        apply_machine_controls(&mut self.network.machines, &self.controls);
        for m in &mut self.network.machines {
            let v_term = m.terminals.map(|n| v[n.0]);
            m.advance(v_term, t);
        }
    }

    /// Sample of the last committed step.
    pub fn current_sample(&self) -> StepSample {
        StepSample {
            step: self.clock.step,
            time: self.clock.time(),
            values: self.layout.collect(&self.network, &self.controls, &self.voltages),
            warning: None,
        }
    }

    /// Run to the end, streaming samples (t = 0 first) into `sink`.
    pub fn run_with(&mut self, sink: &mut dyn OutputSink) -> Result<()> {
        let span = info_span!("run", steps = self.clock.steps, dt = self.clock.dt);
        let _enter = span.enter();

        sink.begin(&self.layout)?;
        if self.clock.step == 0 {
            sink.record(&self.current_sample())?;
        }
        while !self.is_finished() {
            match self.step() {
                Ok(report) => {
                    if let Some(sample) = report.sample {
                        sink.record(&sample)?;
                    }
                }
                Err(e) => {
                    sink.finish()?;
                    return Err(e);
                }
            }
        }
        sink.finish()?;
        info!(
            steps = self.clock.step,
            factorizations = self.factorizations,
            "run finished"
        );
        Ok(())
    }

    /// Run to the end, keeping samples in memory.
    pub fn run(&mut self) -> RunOutput {
        let mut recorder = SampleRecorder::new();
        let failure = self.run_with(&mut recorder).err();
        RunOutput {
            layout: recorder.layout,
            samples: recorder.samples,
            failure,
        }
    }

    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SolverPhase::Terminating
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// Time of the last completed step.
    pub fn time(&self) -> f64 {
        self.clock.time()
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Get a reference to the network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn controls(&self) -> &ControlSystem {
        &self.controls
    }

    /// Node voltages indexed by [`NodeId`].
    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    /// Get the current voltage at a node by name.
    pub fn node_voltage(&self, name: &str) -> Option<f64> {
        let node = self.network.find_node(name)?;
        Some(self.voltages[node.0])
    }

    /// Number of factorizations so far, the initial one included.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }
}
