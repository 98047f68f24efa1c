//! Measurement sessions bracketing each trial.

mod powercap;
mod tracker;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MeasurementError, SweepError};
use crate::plan::Configuration;

pub use powercap::{energy_delta_uj, PowercapReader, ZoneReading};
pub use tracker::{EnergyTracker, MeasurementRecord, RECORD_FILE};

/// Verbosity of the measurement backend's own diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerLogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl TrackerLogLevel {
    /// Whether a message at `level` passes a backend configured at `self`.
    pub fn allows(self, level: TrackerLogLevel) -> bool {
        level >= self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Attribute consumption to the tracked process tree.
    Process,
    /// Attribute all consumption on the host.
    Machine,
}

impl TrackingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackingMode::Process => "process",
            TrackingMode::Machine => "machine",
        }
    }
}

/// Backend settings shared by every session of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeasurementSettings {
    pub project_name: String,
    pub output_dir: PathBuf,
    pub log_level: TrackerLogLevel,
    pub save_to_file: bool,
    pub tracking_mode: TrackingMode,
    pub carbon_intensity_g_per_kwh: f64,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            project_name: "OneMax_Experiment".to_string(),
            output_dir: PathBuf::from("."),
            log_level: TrackerLogLevel::Critical,
            save_to_file: true,
            tracking_mode: TrackingMode::Process,
            carbon_intensity_g_per_kwh: 475.0,
        }
    }
}

impl MeasurementSettings {
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.project_name.trim().is_empty() {
            return Err(SweepError::InvalidConfig(
                "measurement project_name must not be empty".to_string(),
            ));
        }
        let intensity = self.carbon_intensity_g_per_kwh;
        if !intensity.is_finite() || intensity < 0.0 {
            return Err(SweepError::InvalidConfig(format!(
                "carbon_intensity_g_per_kwh must be a non-negative number (got {})",
                intensity
            )));
        }
        Ok(())
    }

    /// Metadata for the session wrapping one trial.
    pub fn session(&self, run_id: u64, configuration: Configuration) -> SessionMetadata {
        SessionMetadata {
            project_name: self.project_name.clone(),
            output_dir: self.output_dir.clone(),
            log_level: self.log_level,
            save_to_file: self.save_to_file,
            tracking_mode: self.tracking_mode,
            run_id,
            configuration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub project_name: String,
    pub output_dir: PathBuf,
    pub log_level: TrackerLogLevel,
    pub save_to_file: bool,
    pub tracking_mode: TrackingMode,
    pub run_id: u64,
    pub configuration: Configuration,
}

/// Energy/emissions tracker driven through a start/stop contract.
///
/// `start` must leave the backend fully initialised or fail. Every
/// successful `start` is followed by exactly one `stop`.
pub trait MeasurementBackend {
    fn start(&mut self, metadata: &SessionMetadata) -> Result<(), MeasurementError>;
    fn stop(&mut self) -> Result<(), MeasurementError>;
}

impl<B: MeasurementBackend + ?Sized> MeasurementBackend for Box<B> {
    fn start(&mut self, metadata: &SessionMetadata) -> Result<(), MeasurementError> {
        (**self).start(metadata)
    }

    fn stop(&mut self) -> Result<(), MeasurementError> {
        (**self).stop()
    }
}

/// An open session. The backend is stopped by [`MeasurementSession::end`],
/// or on drop if `end` was never reached.
pub struct MeasurementSession<'a, B: MeasurementBackend + ?Sized> {
    backend: &'a mut B,
    run_id: u64,
    done: bool,
}

impl<'a, B: MeasurementBackend + ?Sized> MeasurementSession<'a, B> {
    pub fn begin(
        backend: &'a mut B,
        metadata: &SessionMetadata,
    ) -> Result<Self, MeasurementError> {
        backend.start(metadata)?;
        Ok(Self {
            backend,
            run_id: metadata.run_id,
            done: false,
        })
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn end(mut self) -> Result<(), MeasurementError> {
        self.done = true;
        self.backend.stop()
    }
}

impl<B: MeasurementBackend + ?Sized> Drop for MeasurementSession<'_, B> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.backend.stop() {
                warn!(run_id = self.run_id, error = %err, "measurement session release failed");
            }
        }
    }
}
