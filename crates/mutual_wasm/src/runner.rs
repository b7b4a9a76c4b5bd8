//! Stepped simulation runner so the UI can show progress on long spans.

use crate::shared::{integrator_settings, parse_state, serialize, to_js_error};
use anyhow::bail;
use mutual_core::integrator::{
    CancellationToken, SimulationProgress, SimulationRunner, Trajectory,
};
use mutual_core::ModelParameters;
use wasm_bindgen::prelude::*;

/// What is left of a run that failed or was cancelled.
struct StoppedRun {
    progress: SimulationProgress,
    message: String,
    partial: Trajectory,
}

enum RunState {
    Running(SimulationRunner),
    Stopped(StoppedRun),
}

#[wasm_bindgen]
pub struct WasmSimulationRunner {
    state: RunState,
    token: CancellationToken,
}

#[wasm_bindgen]
impl WasmSimulationRunner {
    #[wasm_bindgen(constructor)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        decay: f64,
        coupling: f64,
        initial_state: Vec<f64>,
        t_start: f64,
        t_end: f64,
        sample_count: u32,
        relative_tolerance: f64,
        absolute_tolerance: f64,
        max_steps: u32,
    ) -> Result<WasmSimulationRunner, JsValue> {
        console_error_panic_hook::set_once();

        let token = CancellationToken::new();
        let build = || -> anyhow::Result<SimulationRunner> {
            let parameters = ModelParameters::new(decay, coupling)?;
            let state = parse_state(&initial_state)?;
            let settings = integrator_settings(relative_tolerance, absolute_tolerance, max_steps)?;
            let runner = SimulationRunner::new(
                parameters,
                state,
                (t_start, t_end),
                sample_count as usize,
                settings,
            )?;
            Ok(runner.with_cancellation(token.clone()))
        };
        let runner = build().map_err(to_js_error)?;
        Ok(WasmSimulationRunner {
            state: RunState::Running(runner),
            token,
        })
    }

    pub fn is_done(&self) -> bool {
        match &self.state {
            RunState::Running(runner) => runner.is_done(),
            RunState::Stopped(_) => true,
        }
    }

    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let progress = advance_runner(self, batch_size).map_err(to_js_error)?;
        serialize(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        match &self.state {
            RunState::Running(runner) => serialize(&runner.progress()),
            RunState::Stopped(stopped) => serialize(&stopped.progress),
        }
    }

    /// Samples produced so far: the full trajectory once `is_done()`, or the
    /// partial one after a failure or `cancel()`.
    pub fn get_result(&self) -> Result<JsValue, JsValue> {
        serialize(self.trajectory())
    }

    /// Why the run stopped early, if it did.
    pub fn get_error(&self) -> Option<String> {
        match &self.state {
            RunState::Running(_) => None,
            RunState::Stopped(stopped) => Some(stopped.message.clone()),
        }
    }

    /// Stops an unfinished run, keeping the samples computed so far.
    pub fn cancel(&mut self) {
        self.token.cancel();
        if !self.is_done() {
            // The runner notices the token on its next attempt and hands back the partial run.
            let _ = advance_runner(self, 1);
        }
    }
}

impl WasmSimulationRunner {
    fn trajectory(&self) -> &Trajectory {
        match &self.state {
            RunState::Running(runner) => runner.trajectory(),
            RunState::Stopped(stopped) => &stopped.partial,
        }
    }
}

/// Advances the wrapped runner. A failed or cancelled run is replaced by its
/// partial trajectory and cannot be resumed.
fn advance_runner(
    wrapper: &mut WasmSimulationRunner,
    batch_size: u32,
) -> anyhow::Result<SimulationProgress> {
    let runner = match &mut wrapper.state {
        RunState::Running(runner) => runner,
        RunState::Stopped(stopped) => bail!("Simulation stopped: {}", stopped.message),
    };
    match runner.run_steps(batch_size as usize) {
        Ok(progress) => Ok(progress),
        Err(err) => {
            let partial = err.partial_trajectory().cloned().unwrap_or_default();
            let progress = SimulationProgress {
                done: true,
                samples: partial.len(),
                ..runner.progress()
            };
            wrapper.state = RunState::Stopped(StoppedRun {
                progress,
                message: err.to_string(),
                partial,
            });
            Err(anyhow::Error::new(err).context("Simulation failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{advance_runner, RunState, StoppedRun, WasmSimulationRunner};

    fn stopped(wrapper: &WasmSimulationRunner) -> &StoppedRun {
        match &wrapper.state {
            RunState::Stopped(stopped) => stopped,
            RunState::Running(_) => panic!("runner is still running"),
        }
    }

    fn runner(max_steps: u32) -> WasmSimulationRunner {
        WasmSimulationRunner::new(
            1.0,
            1.5,
            vec![0.05, 0.9],
            0.0,
            30.0,
            200,
            1e-8,
            1e-10,
            max_steps,
        )
        .expect("runner")
    }

    #[test]
    fn runner_reaches_end_of_span() {
        let mut wrapper = runner(0);
        while !wrapper.is_done() {
            advance_runner(&mut wrapper, 25).expect("advance");
        }
        assert_eq!(wrapper.trajectory().len(), 200);
        let last = wrapper.trajectory().final_state().expect("samples");
        assert!((last.interest_a - 1.0 / 3.0).abs() < 1e-3);
        assert!(wrapper.get_error().is_none());
    }

    #[test]
    fn failed_runner_keeps_partial_trajectory() {
        let mut wrapper = runner(3);
        let err = loop {
            match advance_runner(&mut wrapper, 10) {
                Ok(progress) => assert!(!progress.done),
                Err(err) => break err,
            }
        };
        assert!(format!("{err:#}").contains("step limit"));
        assert!(wrapper.is_done());

        let stopped = stopped(&wrapper);
        assert!(stopped.progress.done);
        assert_eq!(stopped.progress.samples, stopped.partial.len());
        assert_eq!(stopped.partial.samples()[0].t, 0.0);
        assert!(wrapper.trajectory().len() >= 1);
        assert!(wrapper.get_error().is_some_and(|m| m.contains("step limit")));

        let again = advance_runner(&mut wrapper, 1).expect_err("stopped runner");
        assert!(again.to_string().contains("Simulation stopped"));
    }

    #[test]
    fn cancel_keeps_samples_computed_so_far() {
        let mut wrapper = runner(0);
        let before = advance_runner(&mut wrapper, 50).expect("advance");
        assert!(!wrapper.is_done());

        wrapper.cancel();
        assert!(wrapper.is_done());
        assert!(wrapper.get_error().is_some_and(|m| m.contains("cancelled")));
        let stopped = stopped(&wrapper);
        assert_eq!(stopped.partial.len(), before.samples);
        assert_eq!(stopped.progress.t, before.t);
        assert_eq!(wrapper.trajectory().len(), before.samples);
    }

    #[test]
    fn cancel_after_completion_keeps_full_result() {
        let mut wrapper = runner(0);
        while !wrapper.is_done() {
            advance_runner(&mut wrapper, 100).expect("advance");
        }
        wrapper.cancel();
        assert!(wrapper.get_error().is_none());
        assert_eq!(wrapper.trajectory().len(), 200);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::WasmSimulationRunner;
    use mutual_core::integrator::{SimulationProgress, Trajectory};
    use serde_wasm_bindgen::from_value;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn runner_reports_progress_and_result() {
        let mut runner = WasmSimulationRunner::new(
            1.0,
            0.6,
            vec![0.6, 0.6],
            0.0,
            10.0,
            50,
            0.0,
            0.0,
            0,
        )
        .expect("runner");
        let mut last: Option<SimulationProgress> = None;
        while !runner.is_done() {
            let value = runner.run_steps(10).expect("run steps");
            last = Some(from_value(value).expect("progress"));
        }
        let progress = last.expect("at least one batch");
        assert!(progress.done);
        assert_eq!(progress.samples, 50);

        let trajectory: Trajectory = from_value(runner.get_result().expect("result"))
            .expect("trajectory");
        assert_eq!(trajectory.len(), 50);
    }

    #[wasm_bindgen_test]
    fn cancelled_runner_still_reports_its_partial_run() {
        let mut runner = WasmSimulationRunner::new(
            1.0,
            1.5,
            vec![0.1, 0.1],
            0.0,
            10.0,
            50,
            0.0,
            0.0,
            0,
        )
        .expect("runner");
        runner.cancel();
        assert!(runner.run_steps(10).is_err());

        let progress: SimulationProgress =
            from_value(runner.get_progress().expect("progress")).expect("progress");
        assert!(progress.done);
        assert_eq!(progress.t, 0.0);
        let partial: Trajectory =
            from_value(runner.get_result().expect("result")).expect("trajectory");
        assert_eq!(partial.len(), 1);
        assert!(runner.get_error().is_some());
    }
}
