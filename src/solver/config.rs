//! Run parameters.

use serde::{Deserialize, Serialize};

use crate::error::{EmtpError, Result};

use super::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_PIVOT_TOLERANCE, DEFAULT_SWITCH_RESISTANCE, DEFAULT_TOLERANCE,
    DEFAULT_VOLTAGE_LIMIT,
};

/// What to do when the nonlinear iteration of a step does not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePolicy {
    /// Stop the run with a convergence error
    #[default]
    Abort,
    /// Keep the last iterate and flag the step
    AcceptBestEstimate,
}

/// How the state at t = 0 is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    /// Everything at rest apart from explicit initial conditions
    #[default]
    Zero,
    /// Sinusoidal steady state at the source frequency
    SteadyState,
}

fn default_time_step() -> f64 {
    50e-6
}

fn default_end_time() -> f64 {
    20e-3
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_output_interval() -> usize {
    1
}

fn default_pivot_tolerance() -> f64 {
    DEFAULT_PIVOT_TOLERANCE
}

fn default_voltage_limit() -> f64 {
    DEFAULT_VOLTAGE_LIMIT
}

fn default_switch_resistance() -> f64 {
    DEFAULT_SWITCH_RESISTANCE
}

/// Configuration for a transient run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed time step (s)
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    /// Last simulated time (s)
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    /// Nonlinear convergence threshold on the voltage correction (V)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Emit a sample every this many steps
    #[serde(default = "default_output_interval")]
    pub output_interval: usize,
    /// Relative pivot threshold for singularity detection
    #[serde(default = "default_pivot_tolerance")]
    pub pivot_tolerance: f64,
    #[serde(default)]
    pub convergence_policy: ConvergencePolicy,
    /// Node voltages beyond this magnitude abort the run (V)
    #[serde(default = "default_voltage_limit")]
    pub voltage_limit: f64,
    #[serde(default)]
    pub initialization: Initialization,
    /// Resistance of a closed switch (ohm)
    #[serde(default = "default_switch_resistance")]
    pub switch_resistance: f64,
    /// Factorize from scratch every step instead of reusing factors
    #[serde(default)]
    pub refactor_every_step: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_step: default_time_step(),
            end_time: default_end_time(),
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_interval: 1,
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
            convergence_policy: ConvergencePolicy::Abort,
            voltage_limit: DEFAULT_VOLTAGE_LIMIT,
            initialization: Initialization::Zero,
            switch_resistance: DEFAULT_SWITCH_RESISTANCE,
            refactor_every_step: false,
        }
    }
}

impl SimulationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    pub fn with_end_time(mut self, end_time: f64) -> Self {
        self.end_time = end_time;
        self
    }

    /// Set the convergence tolerance (in volts).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the maximum nonlinear iterations per step.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_output_interval(mut self, interval: usize) -> Self {
        self.output_interval = interval;
        self
    }

    pub fn with_pivot_tolerance(mut self, tolerance: f64) -> Self {
        self.pivot_tolerance = tolerance;
        self
    }

    pub fn with_convergence_policy(mut self, policy: ConvergencePolicy) -> Self {
        self.convergence_policy = policy;
        self
    }

    pub fn with_voltage_limit(mut self, limit: f64) -> Self {
        self.voltage_limit = limit;
        self
    }

    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.initialization = initialization;
        self
    }

    pub fn with_switch_resistance(mut self, resistance: f64) -> Self {
        self.switch_resistance = resistance;
        self
    }

    pub fn with_refactor_every_step(mut self, refactor: bool) -> Self {
        self.refactor_every_step = refactor;
        self
    }

    /// Number of steps after t = 0.
    pub fn step_count(&self) -> usize {
        (self.end_time / self.time_step + 1e-9).floor() as usize
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64, what: &str| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(EmtpError::simulation_param(format!("{what} must be positive, got {value}")))
            }
        };
        positive(self.time_step, "time step")?;
        positive(self.tolerance, "tolerance")?;
        positive(self.pivot_tolerance, "pivot tolerance")?;
        positive(self.voltage_limit, "voltage limit")?;
        positive(self.switch_resistance, "switch resistance")?;
        if !(self.end_time >= 0.0 && self.end_time.is_finite()) {
            return Err(EmtpError::simulation_param(format!(
                "end time must be non-negative, got {}",
                self.end_time
            )));
        }
        if self.max_iterations == 0 {
            return Err(EmtpError::simulation_param("at least one nonlinear iteration is required"));
        }
        if self.output_interval == 0 {
            return Err(EmtpError::simulation_param("output interval must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults_validate() {
        let config = SimulationConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.convergence_policy, ConvergencePolicy::Abort);
    }

    #[test]
    fn test_step_count() {
        let config = SimulationConfig::new().with_time_step(50e-6).with_end_time(1e-3);
        assert_eq!(config.step_count(), 20);
        let none = SimulationConfig::new().with_end_time(0.0);
        assert_eq!(none.step_count(), 0);
    }

    #[test]
    fn test_invalid_parameters() {
        let bad_dt = SimulationConfig::new().with_time_step(0.0);
        assert_eq!(bad_dt.validate().unwrap_err().kind(), ErrorKind::Configuration);
        assert!(SimulationConfig::new().with_end_time(-1.0).validate().is_err());
        assert!(SimulationConfig::new().with_output_interval(0).validate().is_err());
        assert!(SimulationConfig::new().with_max_iterations(0).validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            SimulationConfig::from_json(r#"{"time_step": 1e-6, "convergence_policy": "accept_best_estimate"}"#)
                .unwrap();
        assert_eq!(config.time_step, 1e-6);
        assert_eq!(config.convergence_policy, ConvergencePolicy::AcceptBestEstimate);
        assert_eq!(config.output_interval, 1);
        assert_eq!(config.initialization, Initialization::Zero);
    }
}
