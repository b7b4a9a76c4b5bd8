//! wasm-bindgen facade over `mutual_core` for the browser front end.
//!
//! Every call takes plain numbers and returns serde-serialized payloads, so the
//! rendering layer never sees Rust types.

mod bifurcation;
mod runner;
mod shared;
mod system;

pub use bifurcation::compute_bifurcation_diagram;
pub use runner::WasmSimulationRunner;
pub use system::WasmModel;
