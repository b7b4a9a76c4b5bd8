//! The mutual interest vector field.
//!
//! ```text
//! dI_A/dt = -decay * I_A + coupling * I_B * (1 - I_A)
//! dI_B/dt = -decay * I_B + coupling * I_A * (1 - I_B)
//! ```
//!
//! Interest levels live conceptually in `[0, 1]`, but every evaluation here is
//! total: states outside the unit square are accepted so that trial stages of
//! the integrator can probe them.

use crate::error::{Error, Result};
use crate::traits::{lit, DynamicalSystem, Scalar};
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Decay (α) and coupling (β) of the model. Validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameters")]
pub struct ModelParameters {
    decay: f64,
    coupling: f64,
}

#[derive(Deserialize)]
struct RawParameters {
    decay: f64,
    coupling: f64,
}

impl TryFrom<RawParameters> for ModelParameters {
    type Error = Error;

    fn try_from(raw: RawParameters) -> Result<Self> {
        ModelParameters::new(raw.decay, raw.coupling)
    }
}

impl ModelParameters {
    pub fn new(decay: f64, coupling: f64) -> Result<Self> {
        if !decay.is_finite() || decay <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "decay",
                value: decay,
                reason: "must be finite and positive",
            });
        }
        if !coupling.is_finite() || coupling < 0.0 {
            return Err(Error::InvalidParameter {
                name: "coupling",
                value: coupling,
                reason: "must be finite and non-negative",
            });
        }
        Ok(Self { decay, coupling })
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn coupling(&self) -> f64 {
        self.coupling
    }

    /// Returns a copy with a different coupling strength.
    pub fn with_coupling(&self, coupling: f64) -> Result<Self> {
        Self::new(self.decay, coupling)
    }

    /// Coupling value at which the ghosting and engaged equilibria exchange stability.
    pub fn critical_coupling(&self) -> f64 {
        self.decay
    }

    /// `I* = 1 - decay / coupling`, present only when `coupling > decay`.
    pub fn engaged_level(&self) -> Option<f64> {
        (self.coupling > self.decay).then(|| 1.0 - self.decay / self.coupling)
    }
}

/// Interest levels `(I_A, I_B)` of the two agents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub interest_a: f64,
    pub interest_b: f64,
}

impl State {
    pub const ORIGIN: State = State {
        interest_a: 0.0,
        interest_b: 0.0,
    };

    pub const fn new(interest_a: f64, interest_b: f64) -> Self {
        Self {
            interest_a,
            interest_b,
        }
    }

    pub const fn symmetric(level: f64) -> Self {
        Self::new(level, level)
    }

    pub fn as_array(&self) -> [f64; 2] {
        [self.interest_a, self.interest_b]
    }

    /// The same state with the roles of the two agents exchanged.
    pub fn swapped(&self) -> Self {
        Self::new(self.interest_b, self.interest_a)
    }

    pub fn is_finite(&self) -> bool {
        self.interest_a.is_finite() && self.interest_b.is_finite()
    }

    pub fn in_unit_square(&self) -> bool {
        (0.0..=1.0).contains(&self.interest_a) && (0.0..=1.0).contains(&self.interest_b)
    }

    pub fn norm(&self) -> f64 {
        self.interest_a.hypot(self.interest_b)
    }

    pub fn distance(&self, other: &State) -> f64 {
        (self.interest_a - other.interest_a).hypot(self.interest_b - other.interest_b)
    }
}

impl From<[f64; 2]> for State {
    fn from(values: [f64; 2]) -> Self {
        Self::new(values[0], values[1])
    }
}

impl From<State> for [f64; 2] {
    fn from(state: State) -> Self {
        state.as_array()
    }
}

/// The coupled two-agent system for a fixed parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutualInterest {
    parameters: ModelParameters,
}

impl MutualInterest {
    pub fn new(parameters: ModelParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    /// Instantaneous rate of change at `state`.
    pub fn rate(&self, state: State) -> State {
        let mut out = [0.0; 2];
        self.apply(0.0, &state.as_array(), &mut out);
        State::from(out)
    }

    /// Euclidean norm of the rate of change; near zero at equilibria.
    pub fn rate_norm(&self, state: State) -> f64 {
        self.rate(state).norm()
    }

    /// Analytic Jacobian of the vector field at `state`.
    pub fn jacobian(&self, state: State) -> Matrix2<f64> {
        let ModelParameters { decay, coupling } = self.parameters;
        let State {
            interest_a: a,
            interest_b: b,
        } = state;
        Matrix2::new(
            -decay - coupling * b,
            coupling * (1.0 - a),
            coupling * (1.0 - b),
            -decay - coupling * a,
        )
    }
}

impl<T: Scalar> DynamicalSystem<T> for MutualInterest {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let decay: T = lit(self.parameters.decay);
        let coupling: T = lit(self.parameters.coupling);
        let one = T::one();
        out[0] = -decay * x[0] + coupling * x[1] * (one - x[0]);
        out[1] = -decay * x[1] + coupling * x[0] * (one - x[1]);
    }
}
