//! Numerical engine.
//!
//! Every reactive element is replaced by its trapezoidal companion model: a
//! conductance in parallel with a history current source. The resulting
//! real nodal admittance matrix
//!
//! ```text
//!   [ Y_uu  Y_uk ] [ v_u ]   [ i_u ]
//!   [ Y_ku  Y_kk ] [ v_k ] = [ i_k ]
//! ```
//!
//! is partitioned into unknown node voltages `v_u` and the voltages `v_k`
//! imposed by voltage sources. Only `Y_uu` is factorized; the known part is
//! moved to the right-hand side as `i_u - Y_uk v_k`.
//!
//! `Y_uu` is factorized once with a sparse LDL^T decomposition in
//! minimum-degree order and the factors are reused until a switch changes
//! state. Switch terminals are ordered last so that a switch event only
//! repeats the elimination of the trailing rows.

mod admittance;
mod compensation;
mod config;
mod dense;
mod scalar;
mod simulator;
mod sparse;
mod steady_state;


pub use admittance::{AdmittanceSystem, NodeLayout, NodeRole};
pub use compensation::{Compensation, NewtonSettings, NonlinearOutcome};
pub use config::{ConvergencePolicy, Initialization, SimulationConfig};
pub use dense::DenseMatrix;
pub use scalar::{Scalar, ZeroPivot};
pub use simulator::{RunOutput, SimulationClock, Simulator, SolverPhase, StepReport};
pub use sparse::{minimum_degree, Ordering, SparseLdl};
pub use steady_state::{network_frequency, SteadyState};

/// Convergence tolerance for the nonlinear iteration (V).
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Maximum nonlinear iterations per time step.
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Relative pivot threshold below which the matrix is treated as singular.
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-8;

/// Node voltage magnitude treated as numerical overflow (V).
pub const DEFAULT_VOLTAGE_LIMIT: f64 = 1e12;

/// Resistance of a closed switch (ohm).
pub const DEFAULT_SWITCH_RESISTANCE: f64 = 1e-6;
