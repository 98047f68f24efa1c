//! Invocation of the external optimizer for one trial.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use crate::error::SweepError;
use crate::plan::Configuration;

/// The optimizer binary plus any fixed trailing arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerCommand {
    binary: PathBuf,
    extra_args: Vec<String>,
}

impl OptimizerCommand {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `-p <population> -c <crossover> -i <run_id>` followed by the extra
    /// arguments.
    pub fn args(&self, configuration: &Configuration, run_id: u64) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            configuration.population_size.to_string(),
            "-c".to_string(),
            configuration.crossover_probability.to_string(),
            "-i".to_string(),
            run_id.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn command(&self, configuration: &Configuration, run_id: u64) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(configuration, run_id));
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd
    }

    /// Runs the optimizer to completion. Anything but exit status 0 is an
    /// error.
    pub fn execute(&self, configuration: &Configuration, run_id: u64) -> Result<(), SweepError> {
        debug!(
            run_id,
            binary = %self.binary.display(),
            args = ?self.args(configuration, run_id),
            "launching optimizer"
        );
        let status = self
            .command(configuration, run_id)
            .status()
            .map_err(|source| SweepError::Spawn {
                run_id,
                configuration: *configuration,
                binary: self.binary.clone(),
                source,
            })?;
        check_status(status, configuration, run_id)
    }
}

fn check_status(
    status: ExitStatus,
    configuration: &Configuration,
    run_id: u64,
) -> Result<(), SweepError> {
    if status.success() {
        return Ok(());
    }
    Err(SweepError::TrialFailed {
        run_id,
        configuration: *configuration,
        code: status.code(),
    })
}
