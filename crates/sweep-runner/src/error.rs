use std::path::PathBuf;

use thiserror::Error;

use crate::plan::Configuration;

/// Fatal conditions that stop a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid sweep configuration: {0}")]
    InvalidConfig(String),

    #[error("run {run_id} ({configuration}): measurement session could not start: {source}")]
    MeasurementStart {
        run_id: u64,
        configuration: Configuration,
        #[source]
        source: MeasurementError,
    },

    #[error("run {run_id} ({configuration}): measurement session could not be closed: {source}")]
    MeasurementStop {
        run_id: u64,
        configuration: Configuration,
        #[source]
        source: MeasurementError,
    },

    #[error("run {run_id} ({configuration}): failed to launch {}: {source}", .binary.display())]
    Spawn {
        run_id: u64,
        configuration: Configuration,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run {run_id} ({configuration}): optimizer {}", describe_exit(.code))]
    TrialFailed {
        run_id: u64,
        configuration: Configuration,
        code: Option<i32>,
    },
}

impl SweepError {
    /// Run identifier the error is attributed to, if it happened inside a trial.
    pub fn run_id(&self) -> Option<u64> {
        match self {
            SweepError::InvalidConfig(_) => None,
            SweepError::MeasurementStart { run_id, .. }
            | SweepError::MeasurementStop { run_id, .. }
            | SweepError::Spawn { run_id, .. }
            | SweepError::TrialFailed { run_id, .. } => Some(*run_id),
        }
    }

    /// Short machine-readable code for JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            SweepError::InvalidConfig(_) => "invalid_config",
            SweepError::MeasurementStart { .. } => "measurement_start_failed",
            SweepError::MeasurementStop { .. } => "measurement_stop_failed",
            SweepError::Spawn { .. } => "optimizer_spawn_failed",
            SweepError::TrialFailed { .. } => "trial_failed",
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Errors raised by a [`crate::measurement::MeasurementBackend`].
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("a measurement session is already active")]
    AlreadyActive,

    #[error("no measurement session is active")]
    NotActive,

    #[error("measurement output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode measurement record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}
