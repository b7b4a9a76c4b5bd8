//! Bifurcation diagram binding.

use crate::shared::serialize;
use mutual_core::bifurcation::sweep;
use wasm_bindgen::prelude::*;

/// Ghosting and engaged branches for `decay` over `[coupling_start, coupling_end]`.
#[wasm_bindgen]
pub fn compute_bifurcation_diagram(
    decay: f64,
    coupling_start: f64,
    coupling_end: f64,
    sample_count: u32,
) -> Result<JsValue, JsValue> {
    let diagram = sweep(decay, (coupling_start, coupling_end), sample_count as usize)
        .map_err(|e| JsValue::from_str(&format!("Bifurcation sweep failed: {}", e)))?;
    serialize(&diagram)
}
