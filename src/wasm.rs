//! WASM bindings for EMTP Core.
//!
//! Runs a case file in the browser and hands samples back as flat rows of
//! `[t, column0, column1, ..]`.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { WasmSimulator } from 'emtp_core';
//!
//! await init();
//!
//! const sim = new WasmSimulator(`
//!   .options dt=10u tmax=20m
//!   VS  SRC 0 COS amp=100 freq=60
//!   R1  SRC A 10
//!   C1  A   0 10u
//! `);
//!
//! const width = sim.labels().length + 1;
//! while (!sim.finished) {
//!   const rows = sim.step_block(500);
//!   plot(rows, width);
//! }
//! ```

use wasm_bindgen::prelude::*;

use crate::dsl;
use crate::error::EmtpError;
use crate::network::Network;
use crate::output::StepSample;
use crate::solver::Simulator;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

impl From<EmtpError> for JsValue {
    fn from(e: EmtpError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

/// A transient run driven from JavaScript.
#[wasm_bindgen]
pub struct WasmSimulator {
    simulator: Simulator,
    /// The t = 0 sample has not been handed out yet
    initial_pending: bool,
}

fn push_row(rows: &mut Vec<f64>, sample: &StepSample) {
    rows.push(sample.time);
    rows.extend_from_slice(&sample.values);
}

#[wasm_bindgen]
impl WasmSimulator {
    /// Parse a case file and establish the state at t = 0.
    ///
    /// # Example
    /// ```javascript
    /// const sim = new WasmSimulator(caseText);
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(case_text: &str) -> Result<WasmSimulator, JsValue> {
        let case = dsl::load_case(case_text)?;
        let network = Network::load(&case.network)?;
        let simulator = Simulator::new(network, case.config)?;
        Ok(WasmSimulator {
            simulator,
            initial_pending: true,
        })
    }

    /// Column labels, not counting the leading time column.
    #[wasm_bindgen]
    pub fn labels(&self) -> Vec<String> {
        self.simulator.layout().labels().to_vec()
    }

    /// Advance up to `steps` time steps and return the emitted rows.
    ///
    /// The first call also returns the t = 0 row. A failing step is
    /// thrown; rows emitted before it in the same call are lost.
    #[wasm_bindgen]
    pub fn step_block(&mut self, steps: usize) -> Result<Vec<f64>, JsValue> {
        let mut rows = Vec::new();
        if self.initial_pending {
            push_row(&mut rows, &self.simulator.current_sample());
            self.initial_pending = false;
        }
        for _ in 0..steps {
            if self.simulator.is_finished() {
                break;
            }
            if let Some(sample) = self.simulator.step()?.sample {
                push_row(&mut rows, &sample);
            }
        }
        Ok(rows)
    }

    /// Run to the end and return every remaining row.
    #[wasm_bindgen]
    pub fn run(&mut self) -> Result<Vec<f64>, JsValue> {
        self.step_block(usize::MAX)
    }

    /// Latest value of one column.
    #[wasm_bindgen]
    pub fn value(&self, label: &str) -> Result<f64, JsValue> {
        let column = self.simulator.layout().column(label).ok_or_else(|| EmtpError::WasmError {
            message: format!("no output column '{label}'"),
        })?;
        Ok(self.simulator.current_sample().value(column))
    }

    /// Voltage at a named node, or `undefined` if the node doesn't exist.
    #[wasm_bindgen]
    pub fn node_voltage(&self, node_name: &str) -> Option<f64> {
        self.simulator.node_voltage(node_name)
    }

    /// Time of the last completed step.
    #[wasm_bindgen(getter)]
    pub fn time(&self) -> f64 {
        self.simulator.time()
    }

    #[wasm_bindgen(getter)]
    pub fn finished(&self) -> bool {
        self.simulator.is_finished()
    }
}

/// Get the library version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
