//! Error taxonomy shared by every operation in the crate.

use crate::integrator::Trajectory;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A parameter or setting was outside its admissible domain.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// A range whose end does not exceed its start (or is otherwise malformed).
    #[error("invalid {what} range [{start}, {end}]: {reason}")]
    InvalidRange {
        what: &'static str,
        start: f64,
        end: f64,
        reason: &'static str,
    },

    #[error(transparent)]
    Integration(Box<IntegrationFailure>),

    #[error("Newton solver failed to converge in {steps} steps (‖f(x)‖ = {residual_norm}).")]
    Convergence { steps: usize, residual_norm: f64 },

    #[error("Jacobian is singular at ({interest_a}, {interest_b}).")]
    SingularJacobian { interest_a: f64, interest_b: f64 },

    /// The simulation was stopped through its cancellation token.
    #[error("simulation cancelled at t = {reached_time}")]
    Cancelled {
        reached_time: f64,
        partial: Trajectory,
    },
}

impl Error {
    /// The trajectory computed before the failure, if the error carries one.
    pub fn partial_trajectory(&self) -> Option<&Trajectory> {
        match self {
            Error::Integration(failure) => Some(&failure.partial),
            Error::Cancelled { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Why the adaptive stepper gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The internal step-count ceiling was reached before the end of the span.
    StepLimit,
    /// The step size shrank below what the time resolution can represent.
    StepSizeUnderflow,
    /// Trial steps kept producing non-finite values until the step size underflowed.
    NonFinite,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepLimit => write!(f, "step limit reached"),
            FailureReason::StepSizeUnderflow => write!(f, "step size underflow"),
            FailureReason::NonFinite => write!(f, "state became non-finite"),
        }
    }
}

/// Adaptive integration could not meet the requested tolerances.
#[derive(Debug, Error)]
#[error("integration failed at t = {reached_time} after {steps} steps: {reason}")]
pub struct IntegrationFailure {
    pub reached_time: f64,
    pub steps: usize,
    pub reason: FailureReason,
    pub partial: Trajectory,
}

impl From<IntegrationFailure> for Error {
    fn from(failure: IntegrationFailure) -> Self {
        Error::Integration(Box::new(failure))
    }
}
