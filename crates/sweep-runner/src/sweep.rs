//! The sweep loop: configurations × repetitions, one measured trial each.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::measurement::{MeasurementBackend, MeasurementSession, MeasurementSettings};
use crate::plan::{Configuration, RunIdAllocator, SweepPlan};
use crate::trial::OptimizerCommand;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub trials: u64,
    pub first_run_id: u64,
    pub last_run_id: u64,
}

pub struct Sweep<B: MeasurementBackend> {
    plan: SweepPlan,
    executor: OptimizerCommand,
    backend: B,
    settings: MeasurementSettings,
    delay: Duration,
    ids: RunIdAllocator,
}

impl<B: MeasurementBackend> Sweep<B> {
    pub fn new(
        plan: SweepPlan,
        executor: OptimizerCommand,
        backend: B,
        settings: MeasurementSettings,
    ) -> Self {
        Self {
            plan,
            executor,
            backend,
            settings,
            delay: Duration::ZERO,
            ids: RunIdAllocator::new(),
        }
    }

    /// Validates `config` and wires every component from it.
    pub fn from_config(config: &SweepConfig, backend: B) -> Result<Self, SweepError> {
        config.validate()?;
        Ok(Self::new(
            config.plan()?,
            config.optimizer_command(),
            backend,
            config.measurement.clone(),
        )
        .with_delay(config.delay()?)
        .with_first_run_id(config.sweep.first_run_id))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_first_run_id(mut self, first_run_id: u64) -> Self {
        self.ids = RunIdAllocator::starting_at(first_run_id);
        self
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The identifier the next trial would receive, `None` once `u64::MAX`
    /// has been used.
    pub fn next_run_id(&self) -> Option<u64> {
        self.ids.peek()
    }

    /// Runs every trial in order and stops at the first fatal error.
    ///
    /// The whole id range is checked up front, so a sweep that would run past
    /// `u64::MAX` fails before any trial starts.
    pub fn run(&mut self) -> Result<SweepReport, SweepError> {
        let first_run_id = self
            .ids
            .peek()
            .ok_or_else(|| SweepError::InvalidConfig("run ids are exhausted".to_string()))?;
        let last_run_id = self.plan.last_run_id(first_run_id).ok_or_else(|| {
            SweepError::InvalidConfig(format!(
                "first_run_id {} leaves no room for {} trials before u64::MAX",
                first_run_id,
                self.plan.total_trials()
            ))
        })?;
        info!(
            configurations = self.plan.len(),
            repetitions = self.plan.repetitions(),
            total_trials = self.plan.total_trials(),
            first_run_id,
            "starting sweep"
        );
        let mut trials: u64 = 0;
        for (index, configuration) in self.plan.configurations().enumerate() {
            info!(
                index = index + 1,
                population_size = configuration.population_size,
                crossover_probability = configuration.crossover_probability,
                "configuration"
            );
            for _ in 0..self.plan.repetitions() {
                if !self.delay.is_zero() {
                    debug!(delay_ms = self.delay.as_millis() as u64, "settling before trial");
                    thread::sleep(self.delay);
                }
                let run_id = self.ids.allocate().ok_or_else(|| {
                    SweepError::InvalidConfig("run ids are exhausted".to_string())
                })?;
                info!(run_id, %configuration, "starting trial");
                run_trial(
                    &self.executor,
                    &mut self.backend,
                    &self.settings,
                    configuration,
                    run_id,
                )
                .inspect_err(|err| error!(run_id, error = %err, "aborting sweep"))?;
                trials += 1;
                info!(run_id, "trial completed");
            }
        }
        info!(trials, "sweep complete");
        Ok(SweepReport {
            trials,
            first_run_id,
            last_run_id,
        })
    }
}

/// One measured trial. The session is closed before a trial error is
/// returned.
fn run_trial<B: MeasurementBackend + ?Sized>(
    executor: &OptimizerCommand,
    backend: &mut B,
    settings: &MeasurementSettings,
    configuration: Configuration,
    run_id: u64,
) -> Result<(), SweepError> {
    let metadata = settings.session(run_id, configuration);
    let session = MeasurementSession::begin(backend, &metadata).map_err(|source| {
        SweepError::MeasurementStart {
            run_id,
            configuration,
            source,
        }
    })?;
    let outcome = executor.execute(&configuration, run_id);
    let closed = session.end();
    match (outcome, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(source)) => Err(SweepError::MeasurementStop {
            run_id,
            configuration,
            source,
        }),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(stop_err)) => {
            warn!(
                run_id,
                error = %stop_err,
                "measurement session close failed after trial failure"
            );
            Err(err)
        }
    }
}
