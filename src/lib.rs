//! # EMTP Core
//!
//! A time-domain electromagnetic transients solver for power networks.
//!
//! This library provides:
//! - A case-file language for describing networks and run parameters
//! - Trapezoidal companion models for lumped branches, coupled phases and
//!   travelling-wave lines
//! - A sparse nodal solver that reuses its factorization across steps and
//!   refactorizes only the switch block when topology changes
//! - Compensation-based iteration for a small set of nonlinear branches
//! - Synchronous machines and a control-system (TACS) layer coupled to the
//!   network with a one-step lag
//!
//! ## Architecture
//!
//! - [`dsl`] - Parser and lowering for the case-file language
//! - [`network`] - Network description, node numbering and topology checks
//! - [`components`] - Element models and their companion circuits
//! - [`tacs`] - Control blocks and their evaluation order
//! - [`solver`] - Admittance assembly, factorization and the time-step loop
//! - [`output`] - Output columns and sample sinks
//!
//! ## Usage
//!
//! ```no_run
//! use emtp_core::{load_case, Network, Simulator};
//!
//! # fn main() -> emtp_core::Result<()> {
//! let case = load_case(&std::fs::read_to_string("energize.emt").unwrap())?;
//! let network = Network::load(&case.network)?;
//! let mut sim = Simulator::new(network, case.config)?;
//! let out = sim.run();
//! for (t, v) in out.samples.iter().map(|s| s.time).zip(out.series("V(BUS)").unwrap_or_default()) {
//!     println!("{t:e} {v:e}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Solution Method
//!
//! With a fixed step dt, every inductor and capacitor becomes a conductance
//! in parallel with a history current source. Each step:
//!
//! 1. Update history sources from the previous step
//! 2. Apply due switch operations in bus order and refactorize if any changed
//! 3. Solve the nodal equations for the unknown voltages
//! 4. Correct for nonlinear branches by compensation
//! 5. Commit element states, then advance the machines and the control system

pub mod components;
pub mod dsl;
pub mod error;
pub mod network;
pub mod output;
pub mod solver;
pub mod tacs;

// Re-export main types for convenience
pub use dsl::{load_case, Case};
pub use error::{EmtpError, ErrorKind, Result};
pub use network::{Network, NetworkDescription};
pub use solver::{SimulationConfig, Simulator};

// WASM bindings
#[cfg(feature = "wasm")]
mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::WasmSimulator;

/// Thermal voltage at room temperature (approximately 26mV)
pub const THERMAL_VOLTAGE: f64 = 0.0258;
