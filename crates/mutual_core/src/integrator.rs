//! Adaptive time integration of the mutual interest model.
//!
//! Steps are taken with the embedded Dormand-Prince pair under a mixed
//! relative/absolute error norm. Accepted steps are resampled onto
//! `sample_count` evenly spaced times with the method's 4th order dense output.
//! Values are never clamped to the unit square.

use crate::error::{Error, FailureReason, IntegrationFailure, Result};
use crate::model::{ModelParameters, MutualInterest, State};
use crate::solvers::DormandPrince;
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// Ceiling on attempted (accepted plus rejected) steps.
    pub max_steps: usize,
    #[serde(default)]
    pub initial_step: Option<f64>,
    #[serde(default)]
    pub max_step: Option<f64>,
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-8,
            absolute_tolerance: 1e-10,
            max_steps: 100_000,
            initial_step: None,
            max_step: None,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

impl IntegratorSettings {
    pub fn with_tolerances(relative_tolerance: f64, absolute_tolerance: f64) -> Self {
        Self {
            relative_tolerance,
            absolute_tolerance,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidParameter {
                    name,
                    value,
                    reason: "must be finite and positive",
                })
            }
        };
        positive("relative_tolerance", self.relative_tolerance)?;
        positive("absolute_tolerance", self.absolute_tolerance)?;
        if self.max_steps == 0 {
            return Err(Error::InvalidParameter {
                name: "max_steps",
                value: 0.0,
                reason: "must be greater than zero",
            });
        }
        if let Some(h) = self.initial_step {
            positive("initial_step", h)?;
        }
        if let Some(h) = self.max_step {
            positive("max_step", h)?;
        }
        if !(self.safety > 0.0 && self.safety <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "safety",
                value: self.safety,
                reason: "must lie in (0, 1]",
            });
        }
        if !(self.min_factor > 0.0 && self.min_factor < 1.0) {
            return Err(Error::InvalidParameter {
                name: "min_factor",
                value: self.min_factor,
                reason: "must lie in (0, 1)",
            });
        }
        if !(self.max_factor > 1.0 && self.max_factor.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "max_factor",
                value: self.max_factor,
                reason: "must be finite and greater than one",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub t: f64,
    pub state: State,
}

/// Time-ordered samples of a solution. Only the integrator appends to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
}

impl Trajectory {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, t: f64, state: State) {
        self.samples.push(TrajectorySample { t, state });
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrajectorySample> {
        self.samples.iter()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.t).collect()
    }

    pub fn last(&self) -> Option<&TrajectorySample> {
        self.samples.last()
    }

    pub fn final_state(&self) -> Option<State> {
        self.samples.last().map(|s| s.state)
    }

    /// Largest distance of any sample from the unit square; zero if none leaves it.
    pub fn max_excursion(&self) -> f64 {
        let outside = |v: f64| (-v).max(v - 1.0).max(0.0);
        self.samples
            .iter()
            .map(|s| outside(s.state.interest_a).max(outside(s.state.interest_b)))
            .fold(0.0, f64::max)
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a TrajectorySample;
    type IntoIter = std::slice::Iter<'a, TrajectorySample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Shared flag checked between integration steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationProgress {
    pub done: bool,
    pub t: f64,
    pub t_end: f64,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub samples: usize,
    pub step_size: f64,
}

/// Resumable integration of one initial value problem.
///
/// `run_steps` advances a bounded number of step attempts so that callers can
/// report progress or stop early; [`simulate`] drives a runner to completion.
pub struct SimulationRunner {
    system: MutualInterest,
    settings: IntegratorSettings,
    stepper: DormandPrince<f64>,
    t: f64,
    t_start: f64,
    t_end: f64,
    state: [f64; 2],
    candidate: [f64; 2],
    error: [f64; 2],
    step_size: f64,
    sample_count: usize,
    next_sample: usize,
    trajectory: Trajectory,
    accepted_steps: usize,
    rejected_steps: usize,
    last_rejection_non_finite: bool,
    done: bool,
    cancellation: Option<CancellationToken>,
}

impl SimulationRunner {
    pub fn new(
        parameters: ModelParameters,
        initial_state: State,
        time_span: (f64, f64),
        sample_count: usize,
        settings: IntegratorSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let (t_start, t_end) = time_span;
        if !t_start.is_finite() || !t_end.is_finite() || t_end <= t_start {
            return Err(Error::InvalidRange {
                what: "time span",
                start: t_start,
                end: t_end,
                reason: "bounds must be finite with end > start",
            });
        }
        if sample_count < 2 {
            return Err(Error::InvalidParameter {
                name: "sample_count",
                value: sample_count as f64,
                reason: "at least two samples are required",
            });
        }
        if !initial_state.is_finite() {
            return Err(Error::InvalidParameter {
                name: "initial_state",
                value: if initial_state.interest_a.is_finite() {
                    initial_state.interest_b
                } else {
                    initial_state.interest_a
                },
                reason: "must be finite",
            });
        }

        let system = MutualInterest::new(parameters);
        let state = initial_state.as_array();
        let mut stepper = DormandPrince::new(2);
        stepper.prime(&system, t_start, &state);

        let span = t_end - t_start;
        let step_size = match settings.initial_step {
            Some(h) => h.min(span),
            None => select_initial_step(
                &system,
                t_start,
                &state,
                stepper.start_derivative(),
                span,
                &settings,
            ),
        };

        let mut trajectory = Trajectory::with_capacity(sample_count);
        trajectory.push(t_start, initial_state);

        debug!(
            decay = parameters.decay(),
            coupling = parameters.coupling(),
            t_start,
            t_end,
            sample_count,
            step_size,
            "starting simulation"
        );

        Ok(Self {
            system,
            settings,
            stepper,
            t: t_start,
            t_start,
            t_end,
            state,
            candidate: [0.0; 2],
            error: [0.0; 2],
            step_size,
            sample_count,
            next_sample: 1,
            trajectory,
            accepted_steps: 0,
            rejected_steps: 0,
            last_rejection_non_finite: false,
            done: false,
            cancellation: None,
        })
    }

    /// Attaches a token that stops the runner between steps once cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn progress(&self) -> SimulationProgress {
        SimulationProgress {
            done: self.done,
            t: self.t,
            t_end: self.t_end,
            accepted_steps: self.accepted_steps,
            rejected_steps: self.rejected_steps,
            samples: self.trajectory.len(),
            step_size: self.step_size,
        }
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn into_trajectory(self) -> Trajectory {
        self.trajectory
    }

    /// Performs up to `batch_size` step attempts.
    pub fn run_steps(&mut self, batch_size: usize) -> Result<SimulationProgress> {
        for _ in 0..batch_size {
            if self.done {
                break;
            }
            if self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                return Err(self.cancelled());
            }
            if self.accepted_steps + self.rejected_steps >= self.settings.max_steps {
                return Err(self.fail(FailureReason::StepLimit));
            }

            let remaining = self.t_end - self.t;
            let mut h = self.step_size.min(remaining);
            if let Some(max_step) = self.settings.max_step {
                h = h.min(max_step);
            }
            let min_step = 10.0 * f64::EPSILON * self.t.abs().max(1.0);
            if h < min_step {
                let reason = if self.last_rejection_non_finite {
                    FailureReason::NonFinite
                } else {
                    FailureReason::StepSizeUnderflow
                };
                return Err(self.fail(reason));
            }

            self.stepper.attempt(
                &self.system,
                self.t,
                &self.state,
                h,
                &mut self.candidate,
                &mut self.error,
            );
            let err_norm = self.error_norm();
            let exponent = -1.0 / (DormandPrince::<f64>::ERROR_ORDER as f64 + 1.0);

            if !err_norm.is_finite() {
                self.rejected_steps += 1;
                self.last_rejection_non_finite = true;
                self.step_size = h * self.settings.min_factor;
                trace!(t = self.t, h, "rejected non-finite step");
                continue;
            }

            if err_norm > 1.0 {
                self.rejected_steps += 1;
                self.last_rejection_non_finite = false;
                let factor = (self.settings.safety * err_norm.powf(exponent))
                    .max(self.settings.min_factor);
                self.step_size = h * factor;
                trace!(t = self.t, h, err_norm, "rejected step");
                continue;
            }

            let t_next = if remaining - h <= min_step {
                self.t_end
            } else {
                self.t + h
            };
            self.emit_samples(t_next);
            self.t = t_next;
            self.state = self.candidate;
            self.stepper.accept();
            self.accepted_steps += 1;
            self.last_rejection_non_finite = false;

            let factor = if err_norm == 0.0 {
                self.settings.max_factor
            } else {
                (self.settings.safety * err_norm.powf(exponent))
                    .clamp(self.settings.min_factor, self.settings.max_factor)
            };
            self.step_size = h * factor;

            if self.t >= self.t_end {
                self.done = true;
                debug!(
                    accepted = self.accepted_steps,
                    rejected = self.rejected_steps,
                    "simulation finished"
                );
            }
        }
        Ok(self.progress())
    }

    fn error_norm(&self) -> f64 {
        let rtol = self.settings.relative_tolerance;
        let atol = self.settings.absolute_tolerance;
        let sum: f64 = (0..2)
            .map(|i| {
                let scale = atol + rtol * self.state[i].abs().max(self.candidate[i].abs());
                let ratio = self.error[i] / scale;
                ratio * ratio
            })
            .sum();
        (sum / 2.0).sqrt()
    }

    fn sample_time(&self, index: usize) -> f64 {
        if index + 1 == self.sample_count {
            return self.t_end;
        }
        let fraction = index as f64 / (self.sample_count - 1) as f64;
        self.t_start + (self.t_end - self.t_start) * fraction
    }

    /// Records every pending sample time in `(self.t, t_next]`.
    fn emit_samples(&mut self, t_next: f64) {
        let h = t_next - self.t;
        let mut dense = [0.0; 2];
        while self.next_sample < self.sample_count {
            let ts = self.sample_time(self.next_sample);
            if ts > t_next {
                break;
            }
            let state = if ts == t_next {
                State::from(self.candidate)
            } else {
                let theta = (ts - self.t) / h;
                self.stepper.interpolate(&self.state, h, theta, &mut dense);
                State::from(dense)
            };
            self.trajectory.push(ts, state);
            self.next_sample += 1;
        }
    }

    fn fail(&mut self, reason: FailureReason) -> Error {
        self.done = true;
        warn!(
            t = self.t,
            accepted = self.accepted_steps,
            rejected = self.rejected_steps,
            %reason,
            "integration failed"
        );
        IntegrationFailure {
            reached_time: self.t,
            steps: self.accepted_steps + self.rejected_steps,
            reason,
            partial: std::mem::take(&mut self.trajectory),
        }
        .into()
    }

    fn cancelled(&mut self) -> Error {
        self.done = true;
        warn!(t = self.t, "simulation cancelled");
        Error::Cancelled {
            reached_time: self.t,
            partial: std::mem::take(&mut self.trajectory),
        }
    }
}

/// Starting step size from the local scale of the solution and its derivatives.
fn select_initial_step(
    system: &MutualInterest,
    t0: f64,
    y0: &[f64; 2],
    f0: &[f64],
    span: f64,
    settings: &IntegratorSettings,
) -> f64 {
    let scale: Vec<f64> = y0
        .iter()
        .map(|y| settings.absolute_tolerance + y.abs() * settings.relative_tolerance)
        .collect();
    let rms = |values: &[f64]| -> f64 {
        let sum: f64 = values
            .iter()
            .zip(&scale)
            .map(|(v, s)| (v / s) * (v / s))
            .sum();
        (sum / values.len() as f64).sqrt()
    };

    let d0 = rms(y0);
    let d1 = rms(f0);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    }
    .min(span);

    let y1 = [y0[0] + h0 * f0[0], y0[1] + h0 * f0[1]];
    let mut f1 = [0.0; 2];
    system.apply(t0 + h0, &y1, &mut f1);
    let diff = [f1[0] - f0[0], f1[1] - f0[1]];
    let d2 = rms(&diff) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        let order = DormandPrince::<f64>::ERROR_ORDER as f64 + 1.0;
        (0.01 / d1.max(d2)).powf(1.0 / order)
    };

    (100.0 * h0).min(h1).min(span)
}

/// Integrates the model over `time_span` and samples the solution at
/// `sample_count` evenly spaced times (both ends included).
pub fn simulate(
    parameters: ModelParameters,
    initial_state: State,
    time_span: (f64, f64),
    sample_count: usize,
    settings: &IntegratorSettings,
) -> Result<Trajectory> {
    let mut runner =
        SimulationRunner::new(parameters, initial_state, time_span, sample_count, *settings)?;
    while !runner.is_done() {
        runner.run_steps(settings.max_steps)?;
    }
    Ok(runner.into_trajectory())
}

/// Like [`simulate`], but stops with [`Error::Cancelled`] once `token` is cancelled.
pub fn simulate_with_cancellation(
    parameters: ModelParameters,
    initial_state: State,
    time_span: (f64, f64),
    sample_count: usize,
    settings: &IntegratorSettings,
    token: CancellationToken,
) -> Result<Trajectory> {
    let mut runner =
        SimulationRunner::new(parameters, initial_state, time_span, sample_count, *settings)?
            .with_cancellation(token);
    while !runner.is_done() {
        runner.run_steps(settings.max_steps)?;
    }
    Ok(runner.into_trajectory())
}

/// Runs one independent simulation per initial state, preserving order.
pub fn simulate_batch(
    parameters: ModelParameters,
    initial_states: &[State],
    time_span: (f64, f64),
    sample_count: usize,
    settings: &IntegratorSettings,
) -> Vec<Result<Trajectory>> {
    initial_states
        .iter()
        .map(|&state| simulate(parameters, state, time_span, sample_count, settings))
        .collect()
}
