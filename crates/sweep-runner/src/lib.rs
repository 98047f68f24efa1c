//! Energy-measured parameter sweeps over an external optimizer binary.
//!
//! A sweep enumerates population size × crossover probability, runs the
//! optimizer a fixed number of times per configuration, and brackets every
//! run with a measurement session so each trial's energy use is recorded
//! separately.

pub mod config;
pub mod error;
pub mod measurement;
pub mod plan;
pub mod sweep;
pub mod trial;

pub use config::{SweepConfig, CONFIG_TEMPLATE};
pub use error::{MeasurementError, SweepError};
pub use measurement::{
    EnergyTracker, MeasurementBackend, MeasurementSession, MeasurementSettings, SessionMetadata,
    TrackerLogLevel, TrackingMode,
};
pub use plan::{Configuration, RunIdAllocator, SweepPlan};
pub use sweep::{Sweep, SweepReport};
pub use trial::OptimizerCommand;
