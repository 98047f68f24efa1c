use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::powercap::{energy_delta_uj, PowercapReader, ZoneReading};
use super::{
    MeasurementBackend, MeasurementSettings, SessionMetadata, TrackerLogLevel, TrackingMode,
};
use crate::error::MeasurementError;

/// File the tracker appends one JSON line to per session.
pub const RECORD_FILE: &str = "emissions.jsonl";

const JOULES_PER_KWH: f64 = 3.6e6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub run_id: u64,
    pub population_size: u64,
    pub crossover_probability: f64,
    pub duration_s: f64,
    pub cpu_energy_j: Option<f64>,
    pub energy_consumed_kwh: Option<f64>,
    pub emissions_kg: Option<f64>,
    pub carbon_intensity_g_per_kwh: f64,
    /// Mode the session asked for.
    pub tracking_mode: TrackingMode,
    pub energy_source: &'static str,
    /// What the energy figures actually cover. RAPL package counters are
    /// machine-wide, so this is `package` even in `process` mode.
    pub energy_scope: &'static str,
}

struct ActiveSession {
    metadata: SessionMetadata,
    started_at: DateTime<Utc>,
    clock: Instant,
    energy: Option<Vec<ZoneReading>>,
    output_path: Option<PathBuf>,
}

/// Built-in backend: wall-clock duration plus RAPL package energy when the
/// host exposes it, converted to emissions with a fixed carbon intensity.
pub struct EnergyTracker {
    powercap: PowercapReader,
    carbon_intensity_g_per_kwh: f64,
    active: Option<ActiveSession>,
    last_record: Option<MeasurementRecord>,
}

impl EnergyTracker {
    pub fn new(settings: &MeasurementSettings) -> Self {
        Self::with_powercap(settings, PowercapReader::system())
    }

    pub fn with_powercap(settings: &MeasurementSettings, powercap: PowercapReader) -> Self {
        Self {
            powercap,
            carbon_intensity_g_per_kwh: settings.carbon_intensity_g_per_kwh,
            active: None,
            last_record: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn last_record(&self) -> Option<&MeasurementRecord> {
        self.last_record.as_ref()
    }
}

impl MeasurementBackend for EnergyTracker {
    fn start(&mut self, metadata: &SessionMetadata) -> Result<(), MeasurementError> {
        if self.active.is_some() {
            return Err(MeasurementError::AlreadyActive);
        }
        let output_path = if metadata.save_to_file {
            Some(prepare_output(&metadata.output_dir)?)
        } else {
            None
        };
        let energy = self.powercap.sample();
        if energy.is_none() {
            note(
                metadata.log_level,
                TrackerLogLevel::Warning,
                "energy counters unavailable; recording duration only",
            );
        }
        note(
            metadata.log_level,
            TrackerLogLevel::Info,
            &format!(
                "[{}] tracking run {} in {} mode",
                metadata.project_name,
                metadata.run_id,
                metadata.tracking_mode.as_str()
            ),
        );
        if energy.is_some() && metadata.tracking_mode == TrackingMode::Process {
            note(
                metadata.log_level,
                TrackerLogLevel::Info,
                "RAPL counters are package-wide; energy includes other processes",
            );
        }
        self.active = Some(ActiveSession {
            metadata: metadata.clone(),
            started_at: Utc::now(),
            clock: Instant::now(),
            energy,
            output_path,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MeasurementError> {
        let session = self.active.take().ok_or(MeasurementError::NotActive)?;
        let duration_s = session.clock.elapsed().as_secs_f64();
        let cpu_energy_j = match (&session.energy, self.powercap.sample()) {
            (Some(before), Some(after)) => Some(energy_delta_uj(before, &after) as f64 / 1e6),
            _ => None,
        };
        let energy_consumed_kwh = cpu_energy_j.map(|j| j / JOULES_PER_KWH);
        let emissions_kg =
            energy_consumed_kwh.map(|kwh| kwh * self.carbon_intensity_g_per_kwh / 1000.0);
        let metadata = &session.metadata;
        let record = MeasurementRecord {
            timestamp: session.started_at,
            project_name: metadata.project_name.clone(),
            run_id: metadata.run_id,
            population_size: metadata.configuration.population_size,
            crossover_probability: metadata.configuration.crossover_probability,
            duration_s,
            cpu_energy_j,
            energy_consumed_kwh,
            emissions_kg,
            carbon_intensity_g_per_kwh: self.carbon_intensity_g_per_kwh,
            tracking_mode: metadata.tracking_mode,
            energy_source: if cpu_energy_j.is_some() {
                "rapl"
            } else {
                "unavailable"
            },
            energy_scope: if cpu_energy_j.is_some() {
                "package"
            } else {
                "none"
            },
        };
        if let Some(path) = &session.output_path {
            if let Err(err) = append_record(path, &record) {
                note(
                    metadata.log_level,
                    TrackerLogLevel::Critical,
                    &format!("failed to persist run {}: {}", metadata.run_id, err),
                );
                return Err(err);
            }
        }
        note(
            metadata.log_level,
            TrackerLogLevel::Debug,
            &format!("run {} measured over {:.3}s", metadata.run_id, duration_s),
        );
        self.last_record = Some(record);
        Ok(())
    }
}

/// Creates the output directory and checks the record file can be appended
/// to, so a bad location fails at session start rather than after the trial.
fn prepare_output(dir: &Path) -> Result<PathBuf, MeasurementError> {
    fs::create_dir_all(dir).map_err(|source| MeasurementError::Output {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(RECORD_FILE);
    open_append(&path)?;
    Ok(path)
}

fn open_append(path: &Path) -> Result<fs::File, MeasurementError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| MeasurementError::Output {
            path: path.to_path_buf(),
            source,
        })
}

fn append_record(path: &Path, record: &MeasurementRecord) -> Result<(), MeasurementError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = open_append(path)?;
    file.write_all(&line)
        .and_then(|_| file.sync_all())
        .map_err(|source| MeasurementError::Output {
            path: path.to_path_buf(),
            source,
        })
}

fn note(configured: TrackerLogLevel, level: TrackerLogLevel, message: &str) {
    if !configured.allows(level) {
        return;
    }
    match level {
        TrackerLogLevel::Debug => debug!(target: "sweep_runner::tracker", "{}", message),
        TrackerLogLevel::Info => info!(target: "sweep_runner::tracker", "{}", message),
        TrackerLogLevel::Warning => warn!(target: "sweep_runner::tracker", "{}", message),
        TrackerLogLevel::Error | TrackerLogLevel::Critical => {
            error!(target: "sweep_runner::tracker", "{}", message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Configuration;
    use serde_json::Value;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "sweep_tracker_test_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("temp root");
        root
    }

    fn fake_powercap(root: &Path, energy_uj: u64) -> PowercapReader {
        let zone = root.join("powercap").join("intel-rapl:0");
        fs::create_dir_all(&zone).expect("zone");
        fs::write(zone.join("energy_uj"), format!("{}\n", energy_uj)).expect("energy");
        fs::write(zone.join("max_energy_range_uj"), "262143328850\n").expect("max");
        PowercapReader::at(root.join("powercap"))
    }

    fn settings(output_dir: &Path) -> MeasurementSettings {
        MeasurementSettings {
            output_dir: output_dir.to_path_buf(),
            ..MeasurementSettings::default()
        }
    }

    fn config() -> Configuration {
        Configuration {
            population_size: 1024,
            crossover_probability: 0.8,
        }
    }

    #[test]
    fn session_appends_one_record_with_energy() {
        let root = temp_root("energy");
        let out = root.join("out");
        let settings = settings(&out);
        let powercap = fake_powercap(&root, 1_000_000);
        let mut tracker = EnergyTracker::with_powercap(&settings, powercap);

        tracker.start(&settings.session(7, config())).expect("start");
        assert!(tracker.is_active());
        fs::write(
            root.join("powercap").join("intel-rapl:0").join("energy_uj"),
            "4600000\n",
        )
        .expect("advance counter");
        tracker.stop().expect("stop");
        assert!(!tracker.is_active());

        let record = tracker.last_record().expect("record");
        assert_eq!(record.run_id, 7);
        assert_eq!(record.energy_source, "rapl");
        assert_eq!(record.cpu_energy_j, Some(3.6));
        let kwh = record.energy_consumed_kwh.expect("kwh");
        assert!((kwh - 1e-6).abs() < 1e-12);
        let kg = record.emissions_kg.expect("emissions");
        assert!((kg - 475e-9).abs() < 1e-15);

        let text = fs::read_to_string(out.join(RECORD_FILE)).expect("record file");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(parsed["project_name"], "OneMax_Experiment");
        assert_eq!(parsed["population_size"], 1024);
        assert_eq!(parsed["tracking_mode"], "process");
        assert_eq!(parsed["energy_scope"], "package");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_counters_still_record_duration() {
        let root = temp_root("nocounters");
        let settings = settings(&root);
        let mut tracker =
            EnergyTracker::with_powercap(&settings, PowercapReader::at(root.join("absent")));
        tracker.start(&settings.session(1, config())).expect("start");
        tracker.stop().expect("stop");
        let record = tracker.last_record().expect("record");
        assert_eq!(record.energy_source, "unavailable");
        assert_eq!(record.energy_scope, "none");
        assert!(record.energy_consumed_kwh.is_none());
        assert!(record.duration_s >= 0.0);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn save_to_file_false_writes_nothing() {
        let root = temp_root("nosave");
        let out = root.join("never");
        let settings = MeasurementSettings {
            save_to_file: false,
            ..settings(&out)
        };
        let mut tracker =
            EnergyTracker::with_powercap(&settings, PowercapReader::at(root.join("absent")));
        tracker.start(&settings.session(1, config())).expect("start");
        tracker.stop().expect("stop");
        assert!(!out.exists());
        assert!(tracker.last_record().is_some());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unusable_output_dir_fails_start() {
        let root = temp_root("badout");
        let blocker = root.join("file");
        fs::write(&blocker, "not a directory").expect("blocker");
        let settings = settings(&blocker.join("sub"));
        let mut tracker =
            EnergyTracker::with_powercap(&settings, PowercapReader::at(root.join("absent")));
        let err = tracker
            .start(&settings.session(1, config()))
            .expect_err("start must fail");
        assert!(matches!(err, MeasurementError::Output { .. }));
        assert!(!tracker.is_active());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn start_and_stop_must_alternate() {
        let root = temp_root("alternate");
        let settings = settings(&root);
        let mut tracker =
            EnergyTracker::with_powercap(&settings, PowercapReader::at(root.join("absent")));
        assert!(matches!(tracker.stop(), Err(MeasurementError::NotActive)));
        tracker.start(&settings.session(1, config())).expect("start");
        assert!(matches!(
            tracker.start(&settings.session(2, config())),
            Err(MeasurementError::AlreadyActive)
        ));
        tracker.stop().expect("stop");
        let _ = fs::remove_dir_all(root);
    }
}
