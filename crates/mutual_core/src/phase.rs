//! Phase-plane geometry: nullclines and the sampled flow field on `[0, 1]²`.

use crate::model::{ModelParameters, MutualInterest, State};
use serde::{Deserialize, Serialize};

/// Distance kept from the pole at `I = 1` when sampling nullclines.
pub const POLE_MARGIN: f64 = 1e-4;

/// Grid size used by phase portraits when the caller has no preference.
pub const DEFAULT_FLOW_GRID: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nullclines {
    /// Points where `dI_A/dt = 0`.
    pub interest_a: Vec<State>,
    /// Points where `dI_B/dt = 0`.
    pub interest_b: Vec<State>,
}

/// Samples both nullclines at `resolution` points of the free coordinate.
///
/// For the `I_A` nullcline the free coordinate is `I_A` and
/// `I_B = decay * I_A / (coupling * (1 - I_A))`; the `I_B` nullcline is its
/// mirror image. The free coordinate stops [`POLE_MARGIN`] short of 1 and
/// points whose dependent coordinate leaves `[0, 1]` are dropped.
pub fn nullclines(parameters: &ModelParameters, resolution: usize) -> Nullclines {
    let curve = nullcline_curve(parameters, resolution);
    Nullclines {
        interest_a: curve
            .iter()
            .map(|&(free, dependent)| State::new(free, dependent))
            .collect(),
        interest_b: curve
            .iter()
            .map(|&(free, dependent)| State::new(dependent, free))
            .collect(),
    }
}

/// (free, dependent) pairs of one nullcline; both nullclines share it by symmetry.
fn nullcline_curve(parameters: &ModelParameters, resolution: usize) -> Vec<(f64, f64)> {
    let samples = resolution.max(2);
    let upper = 1.0 - POLE_MARGIN;
    let last = (samples - 1) as f64;
    let decay = parameters.decay();
    let coupling = parameters.coupling();

    // Without coupling the rate is -decay * I, which vanishes only on the axis I = 0.
    if coupling == 0.0 {
        return (0..samples)
            .map(|i| (0.0, upper * (i as f64 / last)))
            .collect();
    }

    (0..samples)
        .map(|i| upper * (i as f64 / last))
        .filter_map(|free| {
            let dependent = decay * free / (coupling * (1.0 - free));
            (dependent.is_finite() && (0.0..=1.0).contains(&dependent))
                .then_some((free, dependent))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowSample {
    pub state: State,
    pub rate: State,
}

/// The vector field on a regular grid over the unit square.
///
/// Samples are stored row by row: `I_A` varies fastest, `I_B` selects the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowField {
    pub grid_size: usize,
    pub samples: Vec<FlowSample>,
}

impl FlowField {
    pub fn get(&self, column: usize, row: usize) -> Option<&FlowSample> {
        if column >= self.grid_size || row >= self.grid_size {
            return None;
        }
        self.samples.get(row * self.grid_size + column)
    }

    /// Largest rate magnitude on the grid, handy for normalising arrows.
    pub fn max_speed(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.rate.norm())
            .fold(0.0, f64::max)
    }
}

pub fn flow_field(parameters: &ModelParameters, grid_size: usize) -> FlowField {
    let n = grid_size.max(2);
    let last = (n - 1) as f64;
    let system = MutualInterest::new(*parameters);
    let mut samples = Vec::with_capacity(n * n);
    for row in 0..n {
        let b = row as f64 / last;
        for column in 0..n {
            let state = State::new(column as f64 / last, b);
            samples.push(FlowSample {
                state,
                rate: system.rate(state),
            });
        }
    }
    FlowField {
        grid_size: n,
        samples,
    }
}
