use crate::error::{Error, Result};
use crate::model::{ModelParameters, MutualInterest, State};
use nalgebra::{Matrix2, Vector2};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Round-off allowance, in units of machine epsilon, on the normalized trace
/// and determinant before a linearization is treated as non-hyperbolic.
const MARGINAL_ULPS: f64 = 4.0;

/// Linear stability of a fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stability {
    Stable,
    Unstable,
    /// Dominant eigenvalue on the imaginary axis (the transcritical point).
    Marginal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equilibrium {
    pub state: State,
    pub stability: Stability,
    /// Row-major Jacobian at `state`.
    pub jacobian: [f64; 4],
    pub eigenvalues: Vec<Complex<f64>>,
    pub parameters: ModelParameters,
}

impl Equilibrium {
    pub fn is_stable(&self) -> bool {
        self.stability == Stability::Stable
    }

    /// Largest real part among the eigenvalues.
    pub fn dominant_real_part(&self) -> f64 {
        self.eigenvalues
            .iter()
            .map(|l| l.re)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// The two fixed point families of the model for one parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSet {
    /// The origin, where both agents have lost interest.
    pub ghosting: Equilibrium,
    /// `(I*, I*)` with `I* = 1 - decay / coupling`; only present when `coupling > decay`.
    pub engaged: Option<Equilibrium>,
}

impl EquilibriumSet {
    /// The stable equilibrium, if any. At the critical coupling there is none.
    pub fn stable(&self) -> Option<&Equilibrium> {
        if self.ghosting.is_stable() {
            Some(&self.ghosting)
        } else {
            self.engaged.as_ref().filter(|e| e.is_stable())
        }
    }
}

/// Long-run outcome of the interaction for a parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "regime", rename_all = "snake_case")]
pub enum Regime {
    /// Interest of both agents decays to zero.
    Ghosting,
    /// `coupling == decay`: the equilibria coincide at the origin.
    Critical,
    /// Both agents settle at the same positive interest level.
    Engagement { level: f64 },
}

pub fn equilibria(parameters: &ModelParameters) -> EquilibriumSet {
    let ghosting = classify_state(parameters, State::ORIGIN);
    let engaged = parameters
        .engaged_level()
        .map(|level| classify_state(parameters, State::symmetric(level)));
    EquilibriumSet { ghosting, engaged }
}

/// Linearizes the model at `state`, reporting the Jacobian's eigenvalues and the stability they imply.
///
/// `state` is assumed to be a fixed point; the classification is meaningless otherwise.
pub fn classify_state(parameters: &ModelParameters, state: State) -> Equilibrium {
    let system = MutualInterest::new(*parameters);
    let jacobian = system.jacobian(state);
    let eigenvalues: Vec<Complex<f64>> = jacobian.complex_eigenvalues().iter().copied().collect();
    let stability = classify_jacobian(&jacobian);

    Equilibrium {
        state,
        stability,
        jacobian: row_major(&jacobian),
        eigenvalues,
        parameters: *parameters,
    }
}

/// Sign of the dominant eigenvalue real part, read off the trace and determinant.
///
/// The matrix is scaled to unit magnitude first, so the marginal band only
/// absorbs rounding and does not depend on the size of the parameters.
fn classify_jacobian(jacobian: &Matrix2<f64>) -> Stability {
    let scale = jacobian.amax();
    if scale == 0.0 || !scale.is_finite() {
        return Stability::Marginal;
    }
    let m = jacobian / scale;
    let trace = m[(0, 0)] + m[(1, 1)];
    let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    let trace_band = MARGINAL_ULPS * f64::EPSILON * (m[(0, 0)].abs() + m[(1, 1)].abs());
    let det_band = MARGINAL_ULPS
        * f64::EPSILON
        * ((m[(0, 0)] * m[(1, 1)]).abs() + (m[(0, 1)] * m[(1, 0)]).abs());

    if det < -det_band || trace > trace_band {
        // A saddle, or both eigenvalues (or their common real part) positive.
        Stability::Unstable
    } else if det > det_band && trace < -trace_band {
        Stability::Stable
    } else {
        Stability::Marginal
    }
}

fn row_major(matrix: &Matrix2<f64>) -> [f64; 4] {
    [
        matrix[(0, 0)],
        matrix[(0, 1)],
        matrix[(1, 0)],
        matrix[(1, 1)],
    ]
}

pub fn predicted_regime(parameters: &ModelParameters) -> Regime {
    match parameters.engaged_level() {
        Some(level) => Regime::Engagement { level },
        None if parameters.coupling() == parameters.decay() => Regime::Critical,
        None => Regime::Ghosting,
    }
}

/// Locates a fixed point near `initial_guess` with damped Newton iteration and
/// classifies it.
pub fn refine_equilibrium(
    parameters: &ModelParameters,
    initial_guess: State,
    settings: NewtonSettings,
) -> Result<Equilibrium> {
    if settings.max_steps == 0 {
        return Err(Error::InvalidParameter {
            name: "max_steps",
            value: 0.0,
            reason: "must be greater than zero",
        });
    }
    if settings.damping <= 0.0 || settings.damping.is_nan() {
        return Err(Error::InvalidParameter {
            name: "damping",
            value: settings.damping,
            reason: "must be positive",
        });
    }
    if settings.tolerance <= 0.0 || settings.tolerance.is_nan() {
        return Err(Error::InvalidParameter {
            name: "tolerance",
            value: settings.tolerance,
            reason: "must be positive",
        });
    }
    if !initial_guess.is_finite() {
        return Err(Error::InvalidParameter {
            name: "initial_guess",
            value: f64::NAN,
            reason: "must be finite",
        });
    }

    let system = MutualInterest::new(*parameters);
    let mut state = initial_guess;
    let mut residual = system.rate(state);
    let mut residual_norm = residual.norm();
    let mut iterations = 0usize;

    loop {
        if residual_norm <= settings.tolerance {
            break;
        }

        if iterations >= settings.max_steps || !residual_norm.is_finite() {
            return Err(Error::Convergence {
                steps: iterations,
                residual_norm,
            });
        }

        let rhs = Vector2::new(residual.interest_a, residual.interest_b);
        let delta = system
            .jacobian(state)
            .lu()
            .solve(&rhs)
            .ok_or(Error::SingularJacobian {
                interest_a: state.interest_a,
                interest_b: state.interest_b,
            })?;

        state = State::new(
            state.interest_a - settings.damping * delta[0],
            state.interest_b - settings.damping * delta[1],
        );
        iterations += 1;
        residual = system.rate(state);
        residual_norm = residual.norm();
    }

    Ok(classify_state(parameters, state))
}

#[cfg(test)]
mod tests {
    use super::{
        classify_jacobian, equilibria, predicted_regime, refine_equilibrium, NewtonSettings,
        Regime, Stability,
    };
    use crate::error::Error;
    use crate::model::{ModelParameters, State};
    use approx::assert_relative_eq;
    use nalgebra::Matrix2;

    fn params(decay: f64, coupling: f64) -> ModelParameters {
        ModelParameters::new(decay, coupling).expect("valid parameters")
    }

    #[test]
    fn weak_coupling_has_only_stable_ghosting() {
        let set = equilibria(&params(1.0, 0.6));
        assert_eq!(set.ghosting.state, State::ORIGIN);
        assert_eq!(set.ghosting.stability, Stability::Stable);
        assert!(set.engaged.is_none());
        // Eigenvalues at the origin are -decay ± coupling.
        let mut re: Vec<f64> = set.ghosting.eigenvalues.iter().map(|l| l.re).collect();
        re.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_relative_eq!(re[0], -1.6, epsilon = 1e-12);
        assert_relative_eq!(re[1], -0.4, epsilon = 1e-12);
    }

    #[test]
    fn strong_coupling_exchanges_stability() {
        let set = equilibria(&params(1.0, 1.5));
        assert_eq!(set.ghosting.stability, Stability::Unstable);
        let engaged = set.engaged.as_ref().expect("engaged equilibrium");
        assert_eq!(engaged.stability, Stability::Stable);
        assert_relative_eq!(engaged.state.interest_a, 1.0 / 3.0, epsilon = 1e-15);
        assert_eq!(engaged.state.interest_a, engaged.state.interest_b);
        // Eigenvalues at the engaged point are -coupling ± decay.
        assert_relative_eq!(engaged.dominant_real_part(), -0.5, epsilon = 1e-12);
        assert_eq!(set.stable().map(|e| e.state), Some(engaged.state));
    }

    #[test]
    fn critical_coupling_is_marginal() {
        let set = equilibria(&params(1.0, 1.0));
        assert_eq!(set.ghosting.stability, Stability::Marginal);
        assert!(!set.ghosting.is_stable());
        assert!(set.engaged.is_none());
        assert!(set.stable().is_none());
        assert_eq!(predicted_regime(&params(1.0, 1.0)), Regime::Critical);
    }

    #[test]
    fn jacobian_is_reported_row_major() {
        let set = equilibria(&params(1.0, 1.5));
        assert_eq!(set.ghosting.jacobian, [-1.0, 1.5, 1.5, -1.0]);
    }

    #[test]
    fn classify_jacobian_reads_trace_and_determinant() {
        let spiral = Matrix2::new(-1.0, 2.0, -2.0, -1.0);
        assert_eq!(classify_jacobian(&spiral), Stability::Stable);
        let saddle = Matrix2::new(-3.0, 0.0, 0.0, 0.5);
        assert_eq!(classify_jacobian(&saddle), Stability::Unstable);
        let source = Matrix2::new(0.5, 1.0, 0.0, 0.25);
        assert_eq!(classify_jacobian(&source), Stability::Unstable);
        let zero_eigenvalue = Matrix2::new(-1.0, 1.0, 1.0, -1.0);
        assert_eq!(classify_jacobian(&zero_eigenvalue), Stability::Marginal);
        let center = Matrix2::new(0.0, 1.0, -1.0, 0.0);
        assert_eq!(classify_jacobian(&center), Stability::Marginal);
    }

    #[test]
    fn tiny_parameters_keep_their_stability() {
        let set = equilibria(&params(1e-13, 0.0));
        assert_eq!(set.ghosting.stability, Stability::Stable);
        let set = equilibria(&params(1e-13, 5e-14));
        assert_eq!(set.ghosting.stability, Stability::Stable);

        let set = equilibria(&params(1e-13, 2e-13));
        assert_eq!(set.ghosting.stability, Stability::Unstable);
        let engaged = set.engaged.expect("engaged equilibrium");
        assert_eq!(engaged.stability, Stability::Stable);
        assert_relative_eq!(engaged.state.interest_a, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn coupling_just_off_critical_is_hyperbolic() {
        let below = equilibria(&params(1.0, 1.0 - 1e-13));
        assert_eq!(below.ghosting.stability, Stability::Stable);
        assert!(below.engaged.is_none());

        let above = equilibria(&params(1.0, 1.0 + 1e-13));
        assert_eq!(above.ghosting.stability, Stability::Unstable);
        let engaged = above.engaged.as_ref().expect("engaged equilibrium");
        assert_eq!(engaged.stability, Stability::Stable);
        assert_eq!(above.stable().map(|e| e.state), Some(engaged.state));
    }

    #[test]
    fn predicted_regime_tracks_coupling() {
        assert_eq!(predicted_regime(&params(1.0, 0.6)), Regime::Ghosting);
        match predicted_regime(&params(1.0, 1.5)) {
            Regime::Engagement { level } => assert_relative_eq!(level, 1.0 / 3.0),
            other => panic!("expected engagement, got {other:?}"),
        }
    }

    #[test]
    fn newton_refinement_recovers_closed_form_points() {
        let p = params(1.0, 1.5);
        let engaged = refine_equilibrium(&p, State::new(0.5, 0.2), NewtonSettings::default())
            .expect("newton should converge");
        assert_relative_eq!(engaged.state.interest_a, 1.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(engaged.state.interest_b, 1.0 / 3.0, epsilon = 1e-10);
        assert_eq!(engaged.stability, Stability::Stable);

        let ghosting = refine_equilibrium(&p, State::new(0.01, -0.02), NewtonSettings::default())
            .expect("newton should converge");
        assert!(ghosting.state.norm() < 1e-10);
        assert_eq!(ghosting.stability, Stability::Unstable);
    }

    #[test]
    fn newton_refinement_reports_failures() {
        let p = params(1.0, 1.5);
        let settings = NewtonSettings {
            max_steps: 1,
            ..NewtonSettings::default()
        };
        let err = refine_equilibrium(&p, State::new(0.9, 0.1), settings).expect_err("one step");
        assert!(matches!(err, Error::Convergence { steps: 1, .. }));

        let err = refine_equilibrium(
            &p,
            State::new(0.5, 0.5),
            NewtonSettings {
                damping: 0.0,
                ..NewtonSettings::default()
            },
        )
        .expect_err("zero damping");
        assert!(matches!(err, Error::InvalidParameter { name: "damping", .. }));
    }
}
