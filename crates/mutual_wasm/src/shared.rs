//! Conversions shared by the bindings.

use anyhow::{bail, Context, Result};
use mutual_core::integrator::IntegratorSettings;
use mutual_core::State;
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::JsValue;

pub(crate) fn parse_state(values: &[f64]) -> Result<State> {
    if values.len() != 2 {
        bail!(
            "State must have exactly 2 components (I_A, I_B), got {}.",
            values.len()
        );
    }
    Ok(State::new(values[0], values[1]))
}

/// Integrator settings from the tolerances exposed to JS; non-positive values keep the defaults.
pub(crate) fn integrator_settings(
    relative_tolerance: f64,
    absolute_tolerance: f64,
    max_steps: u32,
) -> Result<IntegratorSettings> {
    let defaults = IntegratorSettings::default();
    let settings = IntegratorSettings {
        relative_tolerance: if relative_tolerance > 0.0 {
            relative_tolerance
        } else {
            defaults.relative_tolerance
        },
        absolute_tolerance: if absolute_tolerance > 0.0 {
            absolute_tolerance
        } else {
            defaults.absolute_tolerance
        },
        max_steps: if max_steps > 0 {
            max_steps as usize
        } else {
            defaults.max_steps
        },
        ..defaults
    };
    settings
        .validate()
        .context("Invalid integrator settings")?;
    Ok(settings)
}

pub(crate) fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{:#}", err))
}

pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}
