use crate::traits::{lit, DynamicalSystem, Scalar};

// Dormand-Prince 5(4) tableau.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

const A: [&[f64]; 7] = [
    &[],
    &[1.0 / 5.0],
    &[3.0 / 40.0, 9.0 / 40.0],
    &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
    &[
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
    ],
    &[
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
    ],
    &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];

// 5th order weights (identical to the last row of A, so the last stage is FSAL).
const B: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];

// Difference between the 5th and embedded 4th order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

// Continuous extension: row i holds the coefficients of theta, theta^2,
// theta^3, theta^4 multiplying stage i. Rows sum to B.
const DENSE: [[f64; 4]; 7] = [
    [
        1.0,
        -8048581381.0 / 2820520608.0,
        8663915743.0 / 2820520608.0,
        -12715105075.0 / 11282082432.0,
    ],
    [0.0, 0.0, 0.0, 0.0],
    [
        0.0,
        131558114200.0 / 32700410799.0,
        -68118460800.0 / 10900136933.0,
        87487479700.0 / 32700410799.0,
    ],
    [
        0.0,
        -1754552775.0 / 470086768.0,
        14199869525.0 / 1410260304.0,
        -10690763975.0 / 1880347072.0,
    ],
    [
        0.0,
        127303824393.0 / 49829197408.0,
        -318862633887.0 / 49829197408.0,
        701980252875.0 / 199316789632.0,
    ],
    [
        0.0,
        -282668133.0 / 205662961.0,
        2019193451.0 / 616988883.0,
        -1453857185.0 / 822651844.0,
    ],
    [
        0.0,
        40617522.0 / 29380423.0,
        -110615467.0 / 29380423.0,
        69997945.0 / 29380423.0,
    ],
];

/// Dormand-Prince 5(4) embedded Runge-Kutta stepper.
///
/// The stepper only proposes steps; accepting or rejecting them is the caller's
/// decision. After an accepted step, [`DormandPrince::accept`] recycles the last
/// stage as the first stage of the next step (first same as last).
pub struct DormandPrince<T: Scalar> {
    k: [Vec<T>; 7],
    tmp: Vec<T>,
    primed: bool,
}

impl<T: Scalar> DormandPrince<T> {
    /// Order of the propagated solution.
    pub const ORDER: usize = 5;
    /// Order of the embedded solution used for the error estimate.
    pub const ERROR_ORDER: usize = 4;

    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
            primed: false,
        }
    }

    /// Evaluates the first stage at `(t, state)`; needed after any jump in state.
    pub fn prime(&mut self, system: &impl DynamicalSystem<T>, t: T, state: &[T]) {
        system.apply(t, state, &mut self.k[0]);
        self.primed = true;
    }

    /// Derivative at the start of the current step.
    pub fn start_derivative(&self) -> &[T] {
        &self.k[0]
    }

    /// Derivative at the end of the last attempted step.
    pub fn end_derivative(&self) -> &[T] {
        &self.k[6]
    }

    /// Proposes a step of size `dt` from `(t, state)`.
    /// out: 5th order solution at t + dt
    /// error: local error estimate (difference to the embedded 4th order solution)
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
        error: &mut [T],
    ) {
        if !self.primed {
            self.prime(system, t, state);
        }

        for stage in 1..6 {
            let row = A[stage];
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (j, &a) in row.iter().enumerate() {
                    acc = acc + lit::<T>(a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            let (_, rest) = self.k.split_at_mut(stage);
            system.apply(t + lit::<T>(C[stage]) * dt, &self.tmp, &mut rest[0]);
        }

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, &b) in B.iter().enumerate().take(6) {
                acc = acc + lit::<T>(b) * self.k[j][i];
            }
            out[i] = state[i] + dt * acc;
        }

        // k7 = f(t + dt, y1)
        system.apply(t + dt, out, &mut self.k[6]);

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, &e) in E.iter().enumerate() {
                acc = acc + lit::<T>(e) * self.k[j][i];
            }
            error[i] = dt * acc;
        }
    }

    /// 4th order dense output inside the last attempted step, built from its stages.
    /// Must be called before [`DormandPrince::accept`].
    /// state: solution at the start of the step
    /// theta: position inside the step, in [0, 1]
    pub fn interpolate(&self, state: &[T], dt: T, theta: T, out: &mut [T]) {
        let mut powers = [T::zero(); 4];
        let mut p = T::one();
        for power in powers.iter_mut() {
            p = p * theta;
            *power = p;
        }
        let weights: [T; 7] = std::array::from_fn(|stage| {
            DENSE[stage]
                .iter()
                .zip(&powers)
                .fold(T::zero(), |acc, (&c, &p)| acc + lit::<T>(c) * p)
        });
        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, &w) in weights.iter().enumerate() {
                acc = acc + w * self.k[j][i];
            }
            out[i] = state[i] + dt * acc;
        }
    }

    /// Marks the last attempted step as accepted.
    pub fn accept(&mut self) {
        self.k.swap(0, 6);
    }
}

#[cfg(test)]
mod tests {
    use super::DormandPrince;
    use crate::traits::DynamicalSystem;

    struct Decay;

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }
    }

    struct Polynomial;

    impl DynamicalSystem<f64> for Polynomial {
        fn dimension(&self) -> usize {
            1
        }

        // x' = 4 t^3, exact solution t^4 lies inside the 5th order method's reach.
        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = 4.0 * t * t * t;
        }
    }

    #[test]
    fn tableau_rows_are_consistent() {
        for (stage, row) in super::A.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            assert!(
                (sum - super::C[stage]).abs() < 1e-12,
                "row {stage} sums to {sum}, expected {}",
                super::C[stage]
            );
        }
        let weights: f64 = super::B.iter().sum();
        assert!((weights - 1.0).abs() < 1e-12);
        let error_weights: f64 = super::E.iter().sum();
        assert!(error_weights.abs() < 1e-12);
    }

    #[test]
    fn single_step_matches_exponential() {
        let mut stepper = DormandPrince::<f64>::new(1);
        let mut out = [0.0];
        let mut err = [0.0];
        stepper.attempt(&Decay, 0.0, &[1.0], 0.1, &mut out, &mut err);
        assert!((out[0] - (-0.1f64).exp()).abs() < 1e-8);
        assert!(err[0].abs() < 1e-7);
        assert!((stepper.end_derivative()[0] + out[0]).abs() < 1e-15);
    }

    #[test]
    fn quartic_is_integrated_exactly() {
        let mut stepper = DormandPrince::<f64>::new(1);
        let mut out = [0.0];
        let mut err = [0.0];
        stepper.attempt(&Polynomial, 0.0, &[0.0], 1.0, &mut out, &mut err);
        assert!((out[0] - 1.0).abs() < 1e-12, "got {}", out[0]);
    }

    #[test]
    fn accept_recycles_last_stage() {
        let mut stepper = DormandPrince::<f64>::new(1);
        let mut out = [0.0];
        let mut err = [0.0];
        stepper.attempt(&Decay, 0.0, &[1.0], 0.2, &mut out, &mut err);
        let end = stepper.end_derivative()[0];
        stepper.accept();
        assert_eq!(stepper.start_derivative()[0], end);
    }

    #[test]
    fn dense_weights_reduce_to_step_weights() {
        for (row, &b) in super::DENSE.iter().zip(&super::B) {
            let sum: f64 = row.iter().sum();
            assert!((sum - b).abs() < 1e-14, "row sums to {sum}, expected {b}");
        }
    }

    #[test]
    fn dense_output_follows_the_exponential_inside_a_step() {
        let mut stepper = DormandPrince::<f64>::new(1);
        let mut out = [0.0];
        let mut err = [0.0];
        let dt = 0.1;
        stepper.attempt(&Decay, 0.0, &[1.0], dt, &mut out, &mut err);

        let mut dense = [0.0];
        stepper.interpolate(&[1.0], dt, 0.0, &mut dense);
        assert_eq!(dense[0], 1.0);
        stepper.interpolate(&[1.0], dt, 1.0, &mut dense);
        assert!((dense[0] - out[0]).abs() < 1e-14);
        for theta in [0.25, 0.5, 0.75] {
            stepper.interpolate(&[1.0], dt, theta, &mut dense);
            let exact = (-theta * dt).exp();
            assert!(
                (dense[0] - exact).abs() < 1e-6,
                "theta {theta}: {} vs {exact}",
                dense[0]
            );
        }
    }
}
