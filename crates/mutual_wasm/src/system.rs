//! Model wrapper exposing simulation, equilibria and phase-plane geometry.

use crate::shared::{integrator_settings, parse_state, serialize, to_js_error};
use anyhow::Context;
use js_sys::Float64Array;
use mutual_core::equilibrium::{
    equilibria, predicted_regime, refine_equilibrium, NewtonSettings,
};
use mutual_core::integrator::simulate;
use mutual_core::phase::{flow_field, nullclines, FlowField, DEFAULT_FLOW_GRID};
use mutual_core::{ModelParameters, MutualInterest};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmModel {
    pub(crate) parameters: ModelParameters,
}

#[wasm_bindgen]
impl WasmModel {
    #[wasm_bindgen(constructor)]
    pub fn new(decay: f64, coupling: f64) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();

        let parameters = ModelParameters::new(decay, coupling)
            .map_err(|e| JsValue::from_str(&format!("Invalid parameters: {}", e)))?;
        Ok(WasmModel { parameters })
    }

    pub fn decay(&self) -> f64 {
        self.parameters.decay()
    }

    pub fn coupling(&self) -> f64 {
        self.parameters.coupling()
    }

    pub fn set_coupling(&mut self, coupling: f64) -> Result<(), JsValue> {
        self.parameters = self
            .parameters
            .with_coupling(coupling)
            .map_err(|e| JsValue::from_str(&format!("Invalid parameters: {}", e)))?;
        Ok(())
    }

    /// Rate of change at `state` as `[dI_A/dt, dI_B/dt]`.
    pub fn rate(&self, state: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        let state = parse_state(&state).map_err(to_js_error)?;
        Ok(MutualInterest::new(self.parameters).rate(state).as_array().to_vec())
    }

    /// Row-major Jacobian at `state`.
    pub fn compute_jacobian(&self, state: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        let state = parse_state(&state).map_err(to_js_error)?;
        let jacobian = MutualInterest::new(self.parameters).jacobian(state);
        Ok(vec![
            jacobian[(0, 0)],
            jacobian[(0, 1)],
            jacobian[(1, 0)],
            jacobian[(1, 1)],
        ])
    }

    pub fn simulate(
        &self,
        initial_state: Vec<f64>,
        t_start: f64,
        t_end: f64,
        sample_count: u32,
        relative_tolerance: f64,
        absolute_tolerance: f64,
    ) -> Result<JsValue, JsValue> {
        let run = || -> anyhow::Result<_> {
            let state = parse_state(&initial_state)?;
            let settings = integrator_settings(relative_tolerance, absolute_tolerance, 0)?;
            simulate(
                self.parameters,
                state,
                (t_start, t_end),
                sample_count as usize,
                &settings,
            )
            .context("Simulation failed")
        };
        let trajectory = run().map_err(to_js_error)?;
        serialize(&trajectory)
    }

    pub fn equilibria(&self) -> Result<JsValue, JsValue> {
        serialize(&equilibria(&self.parameters))
    }

    pub fn predicted_regime(&self) -> Result<JsValue, JsValue> {
        serialize(&predicted_regime(&self.parameters))
    }

    pub fn refine_equilibrium(
        &self,
        initial_guess: Vec<f64>,
        max_steps: u32,
        damping: f64,
    ) -> Result<JsValue, JsValue> {
        let settings = NewtonSettings {
            max_steps: max_steps as usize,
            damping,
            ..NewtonSettings::default()
        };
        let guess = parse_state(&initial_guess).map_err(to_js_error)?;
        let result = refine_equilibrium(&self.parameters, guess, settings)
            .map_err(|e| JsValue::from_str(&format!("Equilibrium solve failed: {}", e)))?;
        serialize(&result)
    }

    pub fn nullclines(&self, resolution: u32) -> Result<JsValue, JsValue> {
        serialize(&nullclines(&self.parameters, resolution as usize))
    }

    pub fn flow_field(&self, grid_size: u32) -> Result<JsValue, JsValue> {
        serialize(&self.field(grid_size))
    }

    /// Flow field packed as `[I_A, I_B, dI_A, dI_B]` per grid point, rows of constant `I_B`.
    pub fn flow_field_buffer(&self, grid_size: u32) -> Float64Array {
        Float64Array::from(pack_flow_field(&self.field(grid_size)).as_slice())
    }
}

impl WasmModel {
    fn field(&self, grid_size: u32) -> FlowField {
        let grid = if grid_size == 0 {
            DEFAULT_FLOW_GRID
        } else {
            grid_size as usize
        };
        flow_field(&self.parameters, grid)
    }
}

pub(crate) fn pack_flow_field(field: &FlowField) -> Vec<f64> {
    let mut packed = Vec::with_capacity(field.samples.len() * 4);
    for sample in &field.samples {
        packed.extend_from_slice(&sample.state.as_array());
        packed.extend_from_slice(&sample.rate.as_array());
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::{pack_flow_field, WasmModel};
    use mutual_core::phase::DEFAULT_FLOW_GRID;

    #[test]
    fn default_grid_is_used_for_zero_size() {
        let model = WasmModel::new(1.0, 1.5).expect("model");
        let field = model.field(0);
        assert_eq!(field.grid_size, DEFAULT_FLOW_GRID);
    }

    #[test]
    fn packed_field_interleaves_state_and_rate() {
        let model = WasmModel::new(1.0, 1.5).expect("model");
        let field = model.field(3);
        let packed = pack_flow_field(&field);
        assert_eq!(packed.len(), 9 * 4);
        // Second grid point is (0.5, 0): rate = (-0.5, 0.75).
        assert_eq!(&packed[4..8], &[0.5, 0.0, -0.5, 0.75]);
    }

    #[test]
    fn rate_and_jacobian_accept_two_component_states() {
        let model = WasmModel::new(1.0, 1.5).expect("model");
        let rate = model.rate(vec![0.0, 0.0]).expect("rate");
        assert_eq!(rate, vec![0.0, 0.0]);
        let jacobian = model.compute_jacobian(vec![0.0, 0.0]).expect("jacobian");
        assert_eq!(jacobian, vec![-1.0, 1.5, 1.5, -1.0]);
    }

    #[test]
    fn set_coupling_keeps_decay() {
        let mut model = WasmModel::new(0.8, 0.2).expect("model");
        model.set_coupling(2.0).expect("valid coupling");
        assert_eq!(model.decay(), 0.8);
        assert_eq!(model.coupling(), 2.0);
    }
}
