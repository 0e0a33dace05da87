//! Lowering of a parsed case into run parameters and a network description.

use std::collections::HashMap;
use std::f64::consts::PI;

use tracing::debug;

use super::ast::*;
use crate::components::{Characteristic, MachineParams, SourceKind, SwitchControl, Waveform};
use crate::error::{EmtpError, Result};
use crate::network::{
    BranchRecord, BusRecord, InitialVoltage, MachineRecord, NetworkDescription, NonlinearRecord, SourceRecord,
    SwitchRecord,
};
use crate::solver::{ConvergencePolicy, Initialization, SimulationConfig};
use crate::tacs::{BlockSpec, ControlInput, ControlRecord, Limits};
use crate::THERMAL_VOLTAGE;

/// A case ready to simulate.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub config: SimulationConfig,
    pub network: NetworkDescription,
}

/// Unit conventions selected by `xopt` and `copt`.
#[derive(Debug, Clone, Copy, Default)]
struct Units {
    xopt: f64,
    copt: f64,
}

impl Units {
    /// Henries from an inductance field (ohms of reactance at `xopt` Hz when set).
    fn inductance(&self, value: f64) -> f64 {
        if self.xopt > 0.0 {
            value / (2.0 * PI * self.xopt)
        } else {
            value
        }
    }

    /// Farads from a capacitance field (microsiemens at `copt` Hz when set).
    fn capacitance(&self, value: f64) -> f64 {
        if self.copt > 0.0 {
            value * 1e-6 / (2.0 * PI * self.copt)
        } else {
            value
        }
    }
}

fn option_error(option: &OptionDef, message: &str) -> EmtpError {
    EmtpError::parse(option.line, format!("option '{}': {message}", option.key))
}

fn lower_options(options: &[OptionDef]) -> Result<(SimulationConfig, Units)> {
    let mut config = SimulationConfig::new();
    let mut units = Units::default();
    for option in options {
        let number = || option.value.as_number().ok_or_else(|| option_error(option, "expected a number"));
        let count = || {
            let v = number()?;
            if v < 0.0 || v.fract() != 0.0 {
                return Err(option_error(option, "expected a whole number"));
            }
            Ok(v as usize)
        };
        let word = || {
            option
                .value
                .as_word()
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| option_error(option, "expected a keyword"))
        };
        match option.key.as_str() {
            "dt" | "deltat" => config.time_step = number()?,
            "tmax" => config.end_time = number()?,
            "tol" | "epsiln" => config.tolerance = number()?,
            "maxit" => config.max_iterations = count()?,
            "iout" => config.output_interval = count()?,
            "tolmat" => config.pivot_tolerance = number()?,
            "vlimit" => config.voltage_limit = number()?,
            "rsw" => config.switch_resistance = number()?,
            "xopt" => units.xopt = number()?,
            "copt" => units.copt = number()?,
            "refactor" => config.refactor_every_step = number()? != 0.0,
            "init" => {
                config.initialization = match word()?.as_str() {
                    "zero" | "rest" => Initialization::Zero,
                    "steady" | "steady_state" => Initialization::SteadyState,
                    _ => return Err(option_error(option, "expected zero or steady")),
                }
            }
            "policy" => {
                config.convergence_policy = match word()?.as_str() {
                    "abort" => ConvergencePolicy::Abort,
                    "accept" | "continue" => ConvergencePolicy::AcceptBestEstimate,
                    _ => return Err(option_error(option, "expected abort or accept")),
                }
            }
            _ => return Err(option_error(option, "unknown option")),
        }
    }
    Ok((config, units))
}

/// Accessors for one element card with errors naming the card.
struct Card<'a> {
    def: &'a ElementDef,
}

impl<'a> Card<'a> {
    fn error(&self, message: impl Into<String>) -> EmtpError {
        EmtpError::invalid_element(&self.def.name, self.def.line, message)
    }

    fn name(&self) -> String {
        self.def.name.clone()
    }

    fn node(&self, index: usize) -> Result<String> {
        self.def
            .args
            .get(index)
            .and_then(Arg::as_name)
            .map(str::to_string)
            .ok_or_else(|| self.error(format!("argument {} must be a node name", index + 1)))
    }

    fn word(&self, index: usize) -> Option<String> {
        match self.def.args.get(index) {
            Some(Arg::Word(w)) => Some(w.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn param(&self, key: &str) -> Result<Option<f64>> {
        match self.def.params.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_number()
                .map(Some)
                .ok_or_else(|| self.error(format!("parameter '{key}' must be a number"))),
        }
    }

    fn param_or(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self.param(key)?.unwrap_or(default))
    }

    fn required(&self, key: &str) -> Result<f64> {
        self.param(key)?
            .ok_or_else(|| self.error(format!("missing parameter '{key}'")))
    }

    fn signal(&self, key: &str) -> Result<Option<String>> {
        match self.def.params.get(key) {
            None => Ok(None),
            Some(ParamValue::Word(w)) => Ok(Some(w.clone())),
            Some(ParamValue::Number(_)) => Err(self.error(format!("parameter '{key}' must name a signal"))),
        }
    }

    /// Reject parameters outside `allowed`.
    fn allow(&self, allowed: &[&str]) -> Result<()> {
        match self.def.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(self.error(format!("unknown parameter '{key}'"))),
            None => Ok(()),
        }
    }

    /// Positional value of a two-terminal element.
    fn value(&self) -> Result<f64> {
        self.def
            .args
            .get(2)
            .and_then(Arg::as_number)
            .ok_or_else(|| self.error("argument 3 must be a value"))
    }
}

fn is_ground(name: &str) -> bool {
    name == "0" || name.eq_ignore_ascii_case("GND")
}

fn series(card: &Card, r: f64, l: f64, c: f64, i0: Option<f64>, vc: Option<f64>) -> Result<BranchRecord> {
    Ok(BranchRecord::Series {
        name: card.name(),
        from: card.node(0)?,
        to: card.node(1)?,
        resistance: r,
        inductance: l,
        capacitance: c,
        initial_current: i0,
        capacitor_voltage: vc,
    })
}

/// Symmetric matrix from lower-triangle parameters such as `r21=`.
fn coupling_matrix(card: &Card, prefix: char, n: usize) -> Result<Vec<Vec<f64>>> {
    let mut m = vec![vec![0.0; n]; n];
    for (key, value) in &card.def.params {
        let mut chars = key.chars();
        if chars.next() != Some(prefix) {
            continue;
        }
        let digits: Vec<usize> = chars.filter_map(|c| c.to_digit(10)).map(|d| d as usize).collect();
        let [i, j] = digits[..] else {
            return Err(card.error(format!("malformed matrix entry '{key}'")));
        };
        if key.len() != 3 || i == 0 || j == 0 || i > n || j > n {
            return Err(card.error(format!("matrix entry '{key}' out of range for {n} phases")));
        }
        let v = value
            .as_number()
            .ok_or_else(|| card.error(format!("parameter '{key}' must be a number")))?;
        m[i - 1][j - 1] = v;
        m[j - 1][i - 1] = v;
    }
    Ok(m)
}

fn lower_coupled(card: &Card, units: Units) -> Result<BranchRecord> {
    let args = &card.def.args;
    if args.len() % 2 != 0 || args.len() > 18 {
        return Err(card.error("expected node pairs for up to 9 phases"));
    }
    if let Some(key) = card
        .def
        .params
        .keys()
        .find(|k| !(k.starts_with('r') || k.starts_with('l')))
    {
        return Err(card.error(format!("unknown parameter '{key}'")));
    }
    let n = args.len() / 2;
    let mut from = Vec::with_capacity(n);
    let mut to = Vec::with_capacity(n);
    for k in 0..n {
        from.push(card.node(2 * k)?);
        to.push(card.node(2 * k + 1)?);
    }
    let resistance = coupling_matrix(card, 'r', n)?;
    let inductance = coupling_matrix(card, 'l', n)?
        .into_iter()
        .map(|row| row.into_iter().map(|x| units.inductance(x)).collect())
        .collect();
    Ok(BranchRecord::Coupled {
        name: card.name(),
        from,
        to,
        resistance,
        inductance,
    })
}

fn lower_line(card: &Card) -> Result<BranchRecord> {
    card.allow(&["z", "tau", "v", "len", "lp", "cp", "r", "rp"])?;
    let length = card.param("len")?;
    let (z, tau) = match (card.param("z")?, card.param("tau")?, card.param("v")?) {
        (Some(z), Some(tau), _) => (z, tau),
        (Some(z), None, Some(v)) => {
            let len = length.ok_or_else(|| card.error("v= needs len="))?;
            (z, len / v)
        }
        _ => {
            let lp = card.required("lp")?;
            let cp = card.required("cp")?;
            let len = card.required("len")?;
            ((lp / cp).sqrt(), len * (lp * cp).sqrt())
        }
    };
    let resistance = match (card.param("r")?, card.param("rp")?) {
        (Some(r), _) => r,
        (None, Some(rp)) => rp * length.ok_or_else(|| card.error("rp= needs len="))?,
        (None, None) => 0.0,
    };
    Ok(BranchRecord::Line {
        name: card.name(),
        from: card.node(0)?,
        to: card.node(1)?,
        surge_impedance: z,
        travel_time: tau,
        resistance,
    })
}

fn lower_switch(card: &Card) -> Result<SwitchRecord> {
    card.allow(&["tclose", "topen", "imar", "tacs"])?;
    let control = if card.word(2).as_deref() == Some("MEASURING") {
        SwitchControl::Measuring
    } else if let Some(signal) = card.signal("tacs")? {
        SwitchControl::Controlled { signal }
    } else {
        SwitchControl::Timed {
            t_close: card.param_or("tclose", 0.0)?,
            t_open: card.param_or("topen", f64::INFINITY)?,
            current_margin: card.param_or("imar", 0.0)?,
        }
    };
    if card.def.args.len() > 3 || (card.def.args.len() == 3 && control != SwitchControl::Measuring) {
        return Err(card.error("unexpected argument after the switch nodes"));
    }
    Ok(SwitchRecord {
        name: card.name(),
        from: card.node(0)?,
        to: card.node(1)?,
        control,
    })
}

fn lower_source(card: &Card, kind: SourceKind) -> Result<SourceRecord> {
    let node = card.node(0)?;
    if !is_ground(&card.node(1)?) {
        return Err(card.error("sources connect a node to ground; the second node must be 0"));
    }
    let shape = card.word(2).ok_or_else(|| card.error("missing waveform keyword"))?;
    let waveform = match shape.as_str() {
        "DC" => {
            card.allow(&["amp", "tstart", "tstop"])?;
            let amplitude = match card.def.args.get(3).and_then(Arg::as_number) {
                Some(v) => v,
                None => card.required("amp")?,
            };
            Waveform::Dc { amplitude }
        }
        "COS" => {
            card.allow(&["amp", "freq", "phase", "tstart", "tstop"])?;
            Waveform::Cosine {
                amplitude: card.required("amp")?,
                frequency: card.required("freq")?,
                phase_deg: card.param_or("phase", 0.0)?,
            }
        }
        "STEP" => {
            card.allow(&["amp", "tstart", "tstop"])?;
            Waveform::Step {
                amplitude: card.required("amp")?,
            }
        }
        "RAMP" => {
            card.allow(&["amp", "rise", "tstart", "tstop"])?;
            Waveform::Ramp {
                amplitude: card.required("amp")?,
                rise_time: card.required("rise")?,
            }
        }
        "SURGE" => {
            card.allow(&["amp", "alpha", "beta", "tstart", "tstop"])?;
            Waveform::Surge {
                amplitude: card.required("amp")?,
                alpha: card.required("alpha")?,
                beta: card.required("beta")?,
            }
        }
        "TACS" => {
            card.allow(&["signal", "gain", "tstart", "tstop"])?;
            Waveform::Tacs {
                signal: card
                    .signal("signal")?
                    .ok_or_else(|| card.error("missing parameter 'signal'"))?,
                gain: card.param_or("gain", 1.0)?,
            }
        }
        other => return Err(card.error(format!("unknown waveform '{other}'"))),
    };
    Ok(SourceRecord {
        name: card.name(),
        node,
        kind,
        waveform,
        t_start: card.param_or("tstart", 0.0)?,
        t_stop: card.param_or("tstop", f64::INFINITY)?,
    })
}

fn characteristic(model: &ModelDef) -> Result<Characteristic> {
    let param = |key: &str| model.params.get(key).copied();
    let bad = |message: &str| EmtpError::parse(model.line, format!("model '{}': {message}", model.name));
    let pairs = || {
        if model.values.len() < 2 || model.values.len() % 2 != 0 {
            return Err(bad("expected an even number of breakpoint values"));
        }
        Ok(model.values.chunks(2).map(|p| [p[0], p[1]]).collect::<Vec<_>>())
    };
    Ok(match model.model_type {
        ModelType::Diode => {
            let vt = param("vt").unwrap_or(THERMAL_VOLTAGE);
            Characteristic::Diode {
                saturation_current: param("is").unwrap_or(1e-14),
                emission: param("n").unwrap_or(1.0) * vt / THERMAL_VOLTAGE,
                v_crit: param("vcrit").unwrap_or(0.7),
            }
        }
        ModelType::Arrester => Characteristic::Arrester {
            v_ref: param("vref").ok_or_else(|| bad("missing vref"))?,
            p: param("p").ok_or_else(|| bad("missing p"))?,
            q: param("q").ok_or_else(|| bad("missing q"))?,
        },
        ModelType::PiecewiseLinear => Characteristic::PiecewiseLinear { points: pairs()? },
        // Written as flux-current pairs, stored current first
        ModelType::Flux => Characteristic::Saturable {
            points: pairs()?.into_iter().map(|[flux, i]| [i, flux]).collect(),
        },
    })
}

fn lookup_model<'m>(card: &Card, models: &'m HashMap<String, ModelDef>, name: &str) -> Result<&'m ModelDef> {
    models.get(name).ok_or_else(|| EmtpError::UndefinedModel {
        model: name.to_string(),
        element: card.name(),
    })
}

fn lower_nonlinear(card: &Card, models: &HashMap<String, ModelDef>) -> Result<NonlinearRecord> {
    card.allow(&[])?;
    let characteristic = match (card.def.kind, card.def.args.get(2)) {
        (ElementKind::Diode, None) => characteristic(&ModelDef {
            name: card.name(),
            model_type: ModelType::Diode,
            params: HashMap::new(),
            values: Vec::new(),
            line: card.def.line,
        })?,
        (_, Some(Arg::Word(name))) => {
            let model = lookup_model(card, models, name)?;
            if card.def.kind == ElementKind::Diode && model.model_type != ModelType::Diode {
                return Err(card.error(format!("model '{name}' is not a diode model")));
            }
            characteristic(model)?
        }
        _ => return Err(card.error("argument 3 must name a model")),
    };
    Ok(NonlinearRecord {
        name: card.name(),
        from: card.node(0)?,
        to: card.node(1)?,
        characteristic,
    })
}

fn lower_machine(card: &Card) -> Result<MachineRecord> {
    card.allow(&[
        "mva", "kv", "f", "ra", "xd", "xdp", "tdop", "h", "d", "angle", "efd", "pm", "efd_tacs", "pm_tacs",
    ])?;
    if card.def.args.len() != 3 {
        return Err(card.error("a machine has exactly three terminals"));
    }
    Ok(MachineRecord {
        name: card.name(),
        terminals: [card.node(0)?, card.node(1)?, card.node(2)?],
        params: MachineParams {
            rating_mva: card.required("mva")?,
            voltage_kv: card.required("kv")?,
            frequency: card.required("f")?,
            ra: card.param_or("ra", 0.0)?,
            xd: card.required("xd")?,
            xd_prime: card.required("xdp")?,
            td0_prime: card.required("tdop")?,
            inertia: card.required("h")?,
            damping: card.param_or("d", 0.0)?,
        },
        angle_deg: card.param_or("angle", 0.0)?,
        field_voltage: card.param("efd")?,
        mechanical_power: card.param("pm")?,
        field_signal: card.signal("efd_tacs")?,
        power_signal: card.signal("pm_tacs")?,
    })
}

fn limits(card: &Card) -> Result<Limits> {
    Ok(Limits {
        lo: card.param_or("lo", f64::NEG_INFINITY)?,
        hi: card.param_or("hi", f64::INFINITY)?,
    })
}

/// Coefficients `n0 n1 ...` of a transfer-function card.
fn coefficients(card: &Card, prefix: char) -> Result<Vec<f64>> {
    let mut indexed = Vec::new();
    for (key, value) in &card.def.params {
        let Some(index) = key.strip_prefix(prefix).and_then(|i| i.parse::<usize>().ok()) else {
            continue;
        };
        let v = value
            .as_number()
            .ok_or_else(|| card.error(format!("parameter '{key}' must be a number")))?;
        indexed.push((index, v));
    }
    let order = indexed.iter().map(|&(i, _)| i + 1).max().unwrap_or(0);
    let mut coeffs = vec![0.0; order];
    for (i, v) in indexed {
        coeffs[i] = v;
    }
    Ok(coeffs)
}

fn needs_target(kind: &str) -> bool {
    matches!(kind, "NODE" | "SWITCHI" | "SWSTAT" | "BRANCHI" | "SPEED" | "ANGLE" | "POWER")
}

fn lower_control(card: &Card) -> Result<ControlRecord> {
    let kind = card.word(0).ok_or_else(|| card.error("missing block kind"))?;
    let target = || card.node(1);
    let block = match kind.as_str() {
        "NODE" => BlockSpec::NodeVoltage { node: target()? },
        "SWITCHI" => BlockSpec::SwitchCurrent { switch: target()? },
        "SWSTAT" => BlockSpec::SwitchStatus { switch: target()? },
        "BRANCHI" => {
            let phase = card.param_or("phase", 1.0)?;
            if phase < 1.0 || phase.fract() != 0.0 {
                return Err(card.error("phase= counts from 1"));
            }
            BlockSpec::BranchCurrent {
                branch: target()?,
                phase: phase as usize - 1,
            }
        }
        "SPEED" => BlockSpec::MachineSpeed { machine: target()? },
        "ANGLE" => BlockSpec::MachineAngle { machine: target()? },
        "POWER" => BlockSpec::MachinePower { machine: target()? },
        "TIME" => BlockSpec::Time,
        "CONST" => BlockSpec::Constant {
            value: card.required("value")?,
        },
        "COS" => BlockSpec::Cosine {
            amplitude: card.required("amp")?,
            frequency: card.required("freq")?,
            phase_deg: card.param_or("phase", 0.0)?,
        },
        "STEP" => BlockSpec::Step {
            amplitude: card.required("amp")?,
            t_start: card.param_or("tstart", 0.0)?,
        },
        "PULSE" => BlockSpec::Pulse {
            amplitude: card.required("amp")?,
            period: card.required("period")?,
            width: card.required("width")?,
            delay: card.param_or("delay", 0.0)?,
        },
        "TF" => BlockSpec::Transfer {
            gain: card.param_or("k", 1.0)?,
            numerator: coefficients(card, 'n')?,
            denominator: coefficients(card, 'd')?,
            limits: limits(card)?,
        },
        "GAIN" => BlockSpec::Gain {
            k: card.required("k")?,
        },
        "INT" => BlockSpec::Integrator {
            k: card.param_or("k", 1.0)?,
            limits: limits(card)?,
        },
        "LAG" => BlockSpec::Lag {
            k: card.param_or("k", 1.0)?,
            time_constant: card.required("t")?,
            limits: limits(card)?,
        },
        "LIMIT" => BlockSpec::Limiter { limits: limits(card)? },
        "ABS" => BlockSpec::Abs,
        "MUL" => BlockSpec::Product,
        "CMP" => BlockSpec::Compare {
            threshold: card.param_or("th", 0.0)?,
        },
        "AND" => BlockSpec::And,
        "OR" => BlockSpec::Or,
        "NOT" => BlockSpec::Not,
        "MAX" => BlockSpec::Max,
        "MIN" => BlockSpec::Min,
        "DELAY" => BlockSpec::Delay {
            time: card.required("t")?,
        },
        other => return Err(card.error(format!("unknown control block kind '{other}'"))),
    };
    // Measurement blocks name their target before any inputs
    let first_input = if needs_target(&kind) { 2 } else { 1 };
    if !block.takes_inputs() && card.def.args.len() > first_input {
        return Err(card.error(format!("{kind} blocks take no inputs")));
    }

    let inputs = card.def.args[first_input.min(card.def.args.len())..]
        .iter()
        .map(|arg| match arg {
            Arg::Signal { name, negate } => Ok(ControlInput::new(name.clone(), *negate)),
            Arg::Word(name) => Ok(ControlInput::new(name.clone(), false)),
            Arg::Number { text, .. } => Err(card.error(format!("'{text}' is not a signal name"))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ControlRecord {
        name: card.name(),
        block,
        inputs,
    })
}

/// Lower a parsed case.
pub fn lower(ast: &CaseAst) -> Result<Case> {
    let (config, units) = lower_options(&ast.options)?;
    let mut network = NetworkDescription::new();

    network.buses = ast
        .buses
        .iter()
        .map(|b| BusRecord {
            name: b.name.clone(),
            phases: b.phases,
        })
        .collect();
    network.initial_voltages = ast
        .initial_conditions
        .iter()
        .map(|ic| InitialVoltage {
            node: ic.node.clone(),
            value: ic.value,
        })
        .collect();
    network.outputs = ast.outputs.clone();

    for def in &ast.elements {
        let card = Card { def };
        match def.kind {
            ElementKind::Resistor => {
                card.allow(&[])?;
                network.branches.push(series(&card, card.value()?, 0.0, 0.0, None, None)?);
            }
            ElementKind::Inductor => {
                card.allow(&["i0"])?;
                let l = units.inductance(card.value()?);
                network.branches.push(series(&card, 0.0, l, 0.0, card.param("i0")?, None)?);
            }
            ElementKind::Capacitor => {
                card.allow(&["vc"])?;
                let c = units.capacitance(card.value()?);
                network.branches.push(series(&card, 0.0, 0.0, c, None, card.param("vc")?)?);
            }
            ElementKind::Rlc => {
                card.allow(&["r", "l", "c", "i0", "vc"])?;
                let r = card.param_or("r", 0.0)?;
                let l = units.inductance(card.param_or("l", 0.0)?);
                let c = units.capacitance(card.param_or("c", 0.0)?);
                network
                    .branches
                    .push(series(&card, r, l, c, card.param("i0")?, card.param("vc")?)?);
            }
            ElementKind::Coupled => network.branches.push(lower_coupled(&card, units)?),
            ElementKind::Line => network.branches.push(lower_line(&card)?),
            ElementKind::Switch => network.switches.push(lower_switch(&card)?),
            ElementKind::VoltageSource => network.sources.push(lower_source(&card, SourceKind::Voltage)?),
            ElementKind::CurrentSource => network.sources.push(lower_source(&card, SourceKind::Current)?),
            ElementKind::Diode | ElementKind::Nonlinear => {
                network.nonlinear.push(lower_nonlinear(&card, &ast.models)?)
            }
            ElementKind::Machine => network.machines.push(lower_machine(&card)?),
            ElementKind::Tacs => network.controls.push(lower_control(&card)?),
        }
    }

    debug!(
        branches = network.branches.len(),
        switches = network.switches.len(),
        sources = network.sources.len(),
        controls = network.controls.len(),
        "case lowered"
    );
    Ok(Case { config, network })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse;
    use approx::assert_relative_eq;

    fn load(input: &str) -> Result<Case> {
        lower(&parse(input)?)
    }

    #[test]
    fn test_options() {
        let case = load(".options dt=50u tmax=20m iout=4 maxit=10 init=steady policy=accept refactor=1\n").unwrap();
        assert_relative_eq!(case.config.time_step, 50e-6);
        assert_relative_eq!(case.config.end_time, 20e-3);
        assert_eq!(case.config.output_interval, 4);
        assert_eq!(case.config.max_iterations, 10);
        assert_eq!(case.config.initialization, Initialization::SteadyState);
        assert_eq!(case.config.convergence_policy, ConvergencePolicy::AcceptBestEstimate);
        assert!(case.config.refactor_every_step);
    }

    #[test]
    fn test_bad_options() {
        let err = load("\n.options speed=3\n").unwrap_err();
        assert!(matches!(err, EmtpError::ParseError { line: 2, .. }));
        assert!(load(".options maxit=2.5\n").is_err());
        assert!(load(".options init=warm\n").is_err());
    }

    #[test]
    fn test_series_elements_and_units() {
        let case = load(
            ".options xopt=60 copt=60\n\
             R1 A B 10\n\
             L1 B 0 37.699 i0=2\n\
             C1 A 0 377 vc=5\n\
             RLC F1 A 0 r=1 l=3.7699 c=0\n",
        )
        .unwrap();
        let branches = &case.network.branches;
        assert_eq!(branches.len(), 4);
        let BranchRecord::Series { inductance, initial_current, .. } = &branches[1] else {
            panic!("expected a series branch");
        };
        assert_relative_eq!(*inductance, 0.1, max_relative = 1e-4);
        assert_eq!(*initial_current, Some(2.0));
        let BranchRecord::Series { capacitance, capacitor_voltage, .. } = &branches[2] else {
            panic!("expected a series branch");
        };
        assert_relative_eq!(*capacitance, 1e-6, max_relative = 1e-4);
        assert_eq!(*capacitor_voltage, Some(5.0));
        assert_eq!(branches[3].name(), "F1");
    }

    #[test]
    fn test_coupled_matrix_is_symmetric() {
        let case = load("COUPLED TX A1 B1 A2 B2 r11=1 r22=1 l11=10m l22=10m l21=5m\n").unwrap();
        let BranchRecord::Coupled { from, inductance, resistance, .. } = &case.network.branches[0] else {
            panic!("expected a coupled branch");
        };
        assert_eq!(from, &["A1", "A2"]);
        assert_relative_eq!(resistance[1][1], 1.0);
        assert_relative_eq!(inductance[0][1], 5e-3);
        assert_relative_eq!(inductance[1][0], 5e-3);
        assert!(load("COUPLED TX A1 B1 A2 B2 l31=1\n").is_err());
    }

    #[test]
    fn test_line_forms() {
        let case = load(
            "LINE L1 A B z=400 tau=1m\n\
             LINE L2 A B z=400 v=300000 len=150k rp=0.01\n\
             LINE L3 A B lp=1u cp=10p len=1k\n",
        )
        .unwrap();
        let lines: Vec<(f64, f64, f64)> = case
            .network
            .branches
            .iter()
            .map(|b| match b {
                BranchRecord::Line {
                    surge_impedance,
                    travel_time,
                    resistance,
                    ..
                } => (*surge_impedance, *travel_time, *resistance),
                _ => panic!("expected a line"),
            })
            .collect();
        assert_relative_eq!(lines[0].1, 1e-3);
        assert_relative_eq!(lines[1].1, 0.5e-3);
        assert_relative_eq!(lines[1].2, 1500.0);
        assert_relative_eq!(lines[2].0, 316.227766, max_relative = 1e-6);
        assert_relative_eq!(lines[2].1, 1e3 * (1e-6f64 * 10e-12).sqrt(), max_relative = 1e-9);
    }

    #[test]
    fn test_switch_forms() {
        let case = load(
            "SW1 A B tclose=2m topen=10m imar=1\n\
             SW S2 A B MEASURING\n\
             SW S3 A B tacs=TRIP\n",
        )
        .unwrap();
        let s = &case.network.switches;
        assert_eq!(
            s[0].control,
            SwitchControl::Timed {
                t_close: 2e-3,
                t_open: 10e-3,
                current_margin: 1.0
            }
        );
        assert_eq!(s[1].control, SwitchControl::Measuring);
        assert_eq!(
            s[2].control,
            SwitchControl::Controlled {
                signal: "TRIP".to_string()
            }
        );
        assert!(load("SW S4 A B 5\n").is_err());
    }

    #[test]
    fn test_sources() {
        let case = load(
            "V1 SRC 0 COS amp=100 freq=60 phase=-90 tstart=1m\n\
             I1 N 0 DC 2\n\
             V2 X 0 SURGE amp=1M alpha=14k beta=5M\n",
        )
        .unwrap();
        let s = &case.network.sources;
        assert_eq!(s[0].kind, SourceKind::Voltage);
        assert_eq!(
            s[0].waveform,
            Waveform::Cosine {
                amplitude: 100.0,
                frequency: 60.0,
                phase_deg: -90.0
            }
        );
        assert_relative_eq!(s[0].t_start, 1e-3);
        assert!(s[0].t_stop.is_infinite());
        assert_eq!(s[1].waveform, Waveform::Dc { amplitude: 2.0 });

        let err = load("V1 A B DC 1\n").unwrap_err();
        assert!(matches!(err, EmtpError::InvalidElement { .. }));
        assert!(load("V1 A 0 SQUARE amp=1\n").is_err());
    }

    #[test]
    fn test_nonlinear_models() {
        let case = load(
            ".model ZNO ARR vref=100k p=1 q=30\n\
             .model CORE FLUX (1 0.1 1.2 10)\n\
             .model DX D is=1e-12 n=2\n\
             NONLIN MOV1 A 0 ZNO\n\
             NONLIN SAT1 B 0 CORE\n\
             D1 A B DX\n\
             D2 B 0\n",
        )
        .unwrap();
        let nl = &case.network.nonlinear;
        assert!(matches!(nl[0].characteristic, Characteristic::Arrester { q, .. } if q == 30.0));
        assert_eq!(
            nl[1].characteristic,
            Characteristic::Saturable {
                points: vec![[0.1, 1.0], [10.0, 1.2]]
            }
        );
        assert!(matches!(
            nl[2].characteristic,
            Characteristic::Diode { emission, .. } if emission == 2.0
        ));
        assert!(matches!(
            nl[3].characteristic,
            Characteristic::Diode { saturation_current, .. } if saturation_current == 1e-14
        ));

        let err = load("NONLIN X A 0 NOPE\n").unwrap_err();
        assert!(matches!(err, EmtpError::UndefinedModel { ref model, .. } if model == "NOPE"));
        assert!(load(".model Z ARR vref=1 p=1 q=2\nD1 A 0 Z\n").is_err());
    }

    #[test]
    fn test_machine() {
        let case = load(
            "MACHINE G1 GA GB GC mva=100 kv=13.8 f=60 xd=1.8 xdp=0.3 tdop=8 h=3 angle=10 pm_tacs=GOV\n",
        )
        .unwrap();
        let m = &case.network.machines[0];
        assert_eq!(m.terminals, ["GA", "GB", "GC"]);
        assert_relative_eq!(m.params.voltage_kv, 13.8);
        assert_eq!(m.power_signal.as_deref(), Some("GOV"));
        assert_eq!(m.field_voltage, None);
        assert!(load("MACHINE G1 GA GB GC mva=100\n").is_err());
    }

    #[test]
    fn test_controls() {
        let case = load(
            "TACS VM NODE BUS\n\
             TACS ERR GAIN +REF -VM k=2\n\
             TACS FILT TF ERR k=1 n0=1 d0=1 d1=0.01 hi=5\n\
             TACS I2 BRANCHI TX phase=2\n",
        )
        .unwrap();
        let c = &case.network.controls;
        assert_eq!(c[0].block, BlockSpec::NodeVoltage { node: "BUS".to_string() });
        assert!(c[0].inputs.is_empty());
        assert_eq!(c[1].inputs, vec![ControlInput::new("REF", false), ControlInput::new("VM", true)]);
        let BlockSpec::Transfer {
            numerator,
            denominator,
            limits,
            ..
        } = &c[2].block
        else {
            panic!("expected a transfer block");
        };
        assert_eq!(numerator, &[1.0]);
        assert_eq!(denominator, &[1.0, 0.01]);
        assert_eq!(limits.hi, 5.0);
        assert_eq!(
            c[3].block,
            BlockSpec::BranchCurrent {
                branch: "TX".to_string(),
                phase: 1
            }
        );
        assert!(load("TACS T0 TIME X\n").is_err());
        assert!(load("TACS Q WOBBLE\n").is_err());
    }

    #[test]
    fn test_directives_carried() {
        let case = load(".bus B3 phases=3\n.ic A 5\n.output A B\nR1 A B 1\n").unwrap();
        assert_eq!(case.network.buses[0].phases, 3);
        assert_eq!(case.network.initial_voltages[0].node, "A");
        assert_eq!(case.network.outputs, ["A", "B"]);
    }
}
