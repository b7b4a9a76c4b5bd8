pub mod bifurcation;
pub mod equilibrium;
pub mod error;
pub mod integrator;
pub mod model;
pub mod phase;
pub mod solvers;
/// The `mutual_core` crate is the numeric engine behind the mutual interest model,
/// a pair of coupled ODEs describing how two agents' interest decays on its own and
/// is sustained by the other's interest.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction) and `DynamicalSystem` (vector fields).
/// - **Model**: `ModelParameters`, `State` and the `MutualInterest` vector field with its Jacobian.
/// - **Solvers / Integrator**: an embedded Dormand-Prince 5(4) stepper and the adaptive
///   `simulate` driver that resamples the solution onto evenly spaced times.
/// - **Equilibrium**: closed-form fixed points classified from the Jacobian's eigenvalues.
/// - **Phase**: nullclines and the nominal flow field over the unit square.
/// - **Bifurcation**: ghosting and engaged branches swept over the coupling strength.
pub mod traits;

pub use error::{Error, FailureReason, IntegrationFailure, Result};
pub use model::{ModelParameters, MutualInterest, State};
