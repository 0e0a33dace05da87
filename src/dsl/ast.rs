//! Abstract syntax tree of a case file.
//!
//! The parser only checks structure: which element kind a card declares,
//! its positional arguments and its `key=value` parameters. Meaning is
//! given to them when the case is lowered into a network description.

use std::collections::HashMap;

/// Complete parse of a case file.
#[derive(Debug, Clone, Default)]
pub struct CaseAst {
    /// `.options` parameters in file order
    pub options: Vec<OptionDef>,
    /// `.bus` declarations
    pub buses: Vec<BusDef>,
    /// `.ic` initial node voltages
    pub initial_conditions: Vec<InitialCondition>,
    /// `.output` node names in order
    pub outputs: Vec<String>,
    /// `.model` definitions by name
    pub models: HashMap<String, ModelDef>,
    /// Element cards in file order
    pub elements: Vec<ElementDef>,
}

impl CaseAst {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value given for an option.
    pub fn option(&self, key: &str) -> Option<&ParamValue> {
        self.options.iter().rev().find(|o| o.key == key).map(|o| &o.value)
    }
}

/// One `key=value` of an `.options` card.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDef {
    /// Lower-cased key
    pub key: String,
    pub value: ParamValue,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusDef {
    pub name: String,
    pub phases: usize,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialCondition {
    pub node: String,
    pub value: f64,
    pub line: usize,
}

/// Right-hand side of a `key=value` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Word(String),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Word(_) => None,
        }
    }

    pub fn as_word(&self) -> Option<&str> {
        match self {
            ParamValue::Word(w) => Some(w),
            ParamValue::Number(_) => None,
        }
    }
}

/// A positional argument of an element card.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A node name, keyword or signal name
    Word(String),
    /// A numeric literal; `text` is kept so that `0` can name ground
    Number { text: String, value: f64 },
    /// A signed control input
    Signal { name: String, negate: bool },
}

impl Arg {
    /// The argument read as a name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Arg::Word(w) => Some(w),
            Arg::Number { text, .. } => Some(text),
            Arg::Signal { .. } => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Arg::Number { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// An element card.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    pub kind: ElementKind,
    /// Unique element name
    pub name: String,
    /// Positional arguments after the name
    pub args: Vec<Arg>,
    /// `key=value` parameters, keys lower-cased
    pub params: HashMap<String, ParamValue>,
    /// Source line number for error reporting
    pub line: usize,
}

/// Element kinds of the case file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Resistor,
    Inductor,
    Capacitor,
    /// Series R-L-C with named parameters
    Rlc,
    /// Mutually coupled R-L phases
    Coupled,
    /// Distributed-parameter line
    Line,
    Switch,
    VoltageSource,
    CurrentSource,
    Diode,
    /// Nonlinear element with a `.model` characteristic
    Nonlinear,
    Machine,
    /// Control block
    Tacs,
}

impl ElementKind {
    /// Element kind from a single-letter prefix of the element name.
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix.to_ascii_uppercase() {
            'R' => Some(Self::Resistor),
            'L' => Some(Self::Inductor),
            'C' => Some(Self::Capacitor),
            'V' => Some(Self::VoltageSource),
            'I' => Some(Self::CurrentSource),
            'D' => Some(Self::Diode),
            _ => None,
        }
    }

    /// Element kind from a keyword that precedes the element name.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "R" => Some(Self::Resistor),
            "L" => Some(Self::Inductor),
            "C" => Some(Self::Capacitor),
            "V" => Some(Self::VoltageSource),
            "I" => Some(Self::CurrentSource),
            "D" => Some(Self::Diode),
            "RLC" => Some(Self::Rlc),
            "COUPLED" => Some(Self::Coupled),
            "LINE" => Some(Self::Line),
            "SW" | "SWITCH" => Some(Self::Switch),
            "NONLIN" => Some(Self::Nonlinear),
            "MACHINE" | "SM" => Some(Self::Machine),
            "TACS" => Some(Self::Tacs),
            _ => None,
        }
    }

    /// Minimum number of positional arguments.
    pub fn min_args(&self) -> usize {
        match self {
            Self::Resistor | Self::Inductor | Self::Capacitor => 3,
            Self::Rlc | Self::Line | Self::Switch | Self::Diode => 2,
            Self::VoltageSource | Self::CurrentSource => 3,
            Self::Coupled => 2,
            Self::Nonlinear => 3,
            Self::Machine => 3,
            Self::Tacs => 1,
        }
    }
}

/// A `.model` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    pub name: String,
    pub model_type: ModelType,
    /// Named parameters, keys lower-cased
    pub params: HashMap<String, f64>,
    /// Positional values, e.g. the breakpoints of a piecewise-linear curve
    pub values: Vec<f64>,
    pub line: usize,
}

/// Characteristic families of `.model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Diode,
    Arrester,
    PiecewiseLinear,
    Flux,
}

impl ModelType {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "D" | "DIODE" => Some(Self::Diode),
            "ARR" | "MOV" => Some(Self::Arrester),
            "PWL" => Some(Self::PiecewiseLinear),
            "FLUX" | "SAT" => Some(Self::Flux),
            _ => None,
        }
    }
}
