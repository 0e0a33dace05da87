//! Error types for the transients solver.
//!
//! This module provides a unified error type [`EmtpError`] that covers
//! case-file parsing, network validation, and every failure that can
//! surface while stepping a simulation. [`EmtpError::kind`] groups the
//! variants into the classes callers act on.

use thiserror::Error;

/// Result type alias using [`EmtpError`].
pub type Result<T> = std::result::Result<T, EmtpError>;

/// Coarse classification of an [`EmtpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed case-file text.
    Parse,
    /// Bad topology or parameters, detected before stepping begins.
    Configuration,
    /// Degenerate network topology (floating node or isolated subnetwork).
    SingularMatrix,
    /// Nonlinear iteration failed inside a step.
    Convergence,
    /// State diverged past the configured sanity bound.
    NumericOverflow,
    /// Sample sink failure.
    Output,
}

/// Unified error type for all solver operations.
#[derive(Error, Debug)]
pub enum EmtpError {
    // ============ Case File Errors ============
    /// Error during lexical analysis
    #[error("Lexer error at line {line}, column {column}: {message}")]
    LexerError {
        line: usize,
        column: usize,
        message: String,
    },

    /// Error during parsing
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Invalid element card
    #[error("Invalid element '{name}' at line {line}: {message}")]
    InvalidElement {
        name: String,
        line: usize,
        message: String,
    },

    /// Unknown element type
    #[error("Unknown element type '{element_type}' at line {line}")]
    UnknownElementType { element_type: String, line: usize },

    /// Duplicate model name
    #[error("Duplicate model name '{name}'")]
    DuplicateModel { name: String },

    /// Undefined model reference
    #[error("Undefined model '{model}' referenced by element '{element}'")]
    UndefinedModel { model: String, element: String },

    // ============ Configuration Errors ============
    /// Dangling bus reference
    #[error("Bus '{bus}' referenced by '{element}' does not exist")]
    BusNotFound { bus: String, element: String },

    /// Reference to an element that does not exist
    #[error("Element '{name}' referenced by '{element}' does not exist")]
    ElementNotFound { name: String, element: String },

    /// Two elements share a name
    #[error("Duplicate element name '{name}'")]
    DuplicateElement { name: String },

    /// Parameter outside its physical range
    #[error("Invalid parameter '{param}' for element '{element}': {message}")]
    InvalidParameter {
        element: String,
        param: String,
        message: String,
    },

    /// Invalid network topology
    #[error("Invalid network topology: {message}")]
    InvalidTopology { message: String },

    /// Invalid run parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    /// Reference to a control signal that does not exist
    #[error("Unknown control signal '{signal}' referenced by '{element}'")]
    UnknownSignal { signal: String, element: String },

    /// Malformed JSON description or configuration
    #[error("Invalid description: {0}")]
    Description(#[from] serde_json::Error),

    // ============ Simulation Errors ============
    /// A pivot vanished during factorization
    #[error("Singular admittance matrix at bus '{bus}' (t = {time:.6e} s): floating node or isolated subnetwork")]
    SingularMatrix { bus: String, time: f64 },

    /// Nonlinear iteration did not converge
    #[error("Nonlinear iteration did not converge after {iterations} iterations (residual: {residual:.2e}) at t = {time:.6e} s")]
    ConvergenceFailure {
        iterations: usize,
        residual: f64,
        time: f64,
    },

    /// Numerical overflow detected
    #[error("Numerical overflow at bus '{bus}' (value: {value:.2e}) at t = {time:.6e} s")]
    NumericalOverflow { bus: String, value: f64, time: f64 },

    // ============ Output Errors ============
    /// Error writing samples
    #[error("Output error: {message}")]
    OutputError { message: String },

    // ============ WASM Errors ============
    /// WASM-specific error
    #[cfg(feature = "wasm")]
    #[error("WASM error: {message}")]
    WasmError { message: String },
}

impl EmtpError {
    /// Create a lexer error
    pub fn lexer(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::LexerError {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid element error
    pub fn invalid_element(name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::InvalidElement {
            name: name.into(),
            line,
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        element: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            element: element.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create an invalid topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create an invalid simulation parameter error
    pub fn simulation_param(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Create a convergence failure error
    pub fn convergence_failure(iterations: usize, residual: f64, time: f64) -> Self {
        Self::ConvergenceFailure {
            iterations,
            residual,
            time,
        }
    }

    /// The class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LexerError { .. }
            | Self::ParseError { .. }
            | Self::InvalidElement { .. }
            | Self::UnknownElementType { .. }
            | Self::DuplicateModel { .. }
            | Self::UndefinedModel { .. } => ErrorKind::Parse,
            Self::BusNotFound { .. }
            | Self::ElementNotFound { .. }
            | Self::DuplicateElement { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidTopology { .. }
            | Self::InvalidSimulationParam { .. }
            | Self::UnknownSignal { .. }
            | Self::Description(_) => ErrorKind::Configuration,
            Self::SingularMatrix { .. } => ErrorKind::SingularMatrix,
            Self::ConvergenceFailure { .. } => ErrorKind::Convergence,
            Self::NumericalOverflow { .. } => ErrorKind::NumericOverflow,
            Self::OutputError { .. } => ErrorKind::Output,
            #[cfg(feature = "wasm")]
            Self::WasmError { .. } => ErrorKind::Output,
        }
    }

    /// Simulation time at which a step-time error occurred.
    pub fn time(&self) -> Option<f64> {
        match self {
            Self::SingularMatrix { time, .. }
            | Self::ConvergenceFailure { time, .. }
            | Self::NumericalOverflow { time, .. } => Some(*time),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(EmtpError::parse(3, "bad").kind(), ErrorKind::Parse);
        assert_eq!(
            EmtpError::invalid_parameter("R1", "r", "negative").kind(),
            ErrorKind::Configuration
        );
        let err = EmtpError::convergence_failure(50, 1e-3, 0.01);
        assert_eq!(err.kind(), ErrorKind::Convergence);
        assert_eq!(err.time(), Some(0.01));
    }

    #[test]
    fn test_singular_message_names_bus() {
        let err = EmtpError::SingularMatrix {
            bus: "FLOAT".to_string(),
            time: 0.0,
        };
        assert!(err.to_string().contains("FLOAT"));
        assert_eq!(err.kind(), ErrorKind::SingularMatrix);
    }
}
