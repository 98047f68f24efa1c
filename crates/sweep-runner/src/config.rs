//! Sweep configuration document.
//!
//! Defaults describe the reference sweep: 3 population sizes, 3 crossover
//! probabilities, 10 repetitions each. A YAML file may override any subset
//! of fields.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use crate::measurement::MeasurementSettings;
use crate::plan::SweepPlan;
use crate::trial::OptimizerCommand;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub sweep: SweepSection,
    pub optimizer: OptimizerSection,
    pub measurement: MeasurementSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepSection {
    pub population_sizes: Vec<u64>,
    pub crossover_probs: Vec<f64>,
    pub repetitions: u32,
    /// Pause before every trial, in seconds.
    pub delay_secs: f64,
    pub first_run_id: u64,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            population_sizes: vec![1 << 6, 1 << 10, 1 << 14],
            crossover_probs: vec![0.2, 0.01, 0.8],
            repetitions: 10,
            delay_secs: 5.0,
            first_run_id: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerSection {
    pub binary: PathBuf,
    /// Appended after the `-p/-c/-i` flags on every invocation.
    pub extra_args: Vec<String>,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("./sphere_sbx"),
            extra_args: Vec::new(),
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep config {}", path.display()))?;
        let config: SweepConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse sweep config {}", path.display()))?;
        Ok(config)
    }

    /// Checks every field that can be checked before a trial runs.
    pub fn validate(&self) -> Result<(), SweepError> {
        let plan = self.plan()?;
        self.delay()?;
        if self.sweep.first_run_id == 0 {
            return Err(SweepError::InvalidConfig(
                "first_run_id must be positive".to_string(),
            ));
        }
        if plan.last_run_id(self.sweep.first_run_id).is_none() {
            return Err(SweepError::InvalidConfig(format!(
                "first_run_id {} leaves no room for {} trials before u64::MAX",
                self.sweep.first_run_id,
                plan.total_trials()
            )));
        }
        if self.optimizer.binary.as_os_str().is_empty() {
            return Err(SweepError::InvalidConfig(
                "optimizer binary must not be empty".to_string(),
            ));
        }
        self.measurement.validate()
    }

    pub fn plan(&self) -> Result<SweepPlan, SweepError> {
        SweepPlan::new(
            self.sweep.population_sizes.clone(),
            self.sweep.crossover_probs.clone(),
            self.sweep.repetitions,
        )
    }

    pub fn delay(&self) -> Result<Duration, SweepError> {
        let secs = self.sweep.delay_secs;
        if !secs.is_finite() || secs < 0.0 {
            return Err(SweepError::InvalidConfig(format!(
                "delay_secs must be a non-negative number (got {})",
                secs
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|_| {
            SweepError::InvalidConfig(format!("delay_secs is too large (got {})", secs))
        })
    }

    pub fn optimizer_command(&self) -> OptimizerCommand {
        OptimizerCommand::new(&self.optimizer.binary)
            .with_extra_args(self.optimizer.extra_args.clone())
    }
}

pub const CONFIG_TEMPLATE: &str = "\
sweep:
  population_sizes: [64, 1024, 16384]
  crossover_probs: [0.2, 0.01, 0.8]
  repetitions: 10
  delay_secs: 5                       # settle time before every trial
  first_run_id: 1                     # raise to continue an interrupted sweep
optimizer:
  binary: ./sphere_sbx                # invoked as: <binary> -p <pop> -c <cx> -i <id>
  extra_args: []                      # e.g. ['-m', '0.01']
measurement:
  project_name: OneMax_Experiment
  output_dir: .
  log_level: critical                 # debug | info | warning | error | critical
  save_to_file: true
  tracking_mode: process              # process | machine
  carbon_intensity_g_per_kwh: 475.0
";
