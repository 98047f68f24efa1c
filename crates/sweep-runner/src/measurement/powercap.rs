use std::fs;
use std::path::{Path, PathBuf};

const SYSTEM_POWERCAP: &str = "/sys/class/powercap";

/// One RAPL package counter sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneReading {
    pub zone: String,
    pub energy_uj: u64,
    pub max_energy_range_uj: u64,
}

/// Reads package-level RAPL counters (`intel-rapl:N`) under a powercap root.
/// Subzones (`intel-rapl:N:M`) are skipped since their energy is already
/// included in the package counter.
#[derive(Debug, Clone)]
pub struct PowercapReader {
    root: PathBuf,
}

impl PowercapReader {
    pub fn system() -> Self {
        Self::at(SYSTEM_POWERCAP)
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `None` when no package counter is readable (missing driver, or the
    /// counters are root-only on this kernel).
    pub fn sample(&self) -> Option<Vec<ZoneReading>> {
        let entries = fs::read_dir(&self.root).ok()?;
        let mut readings = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_package_zone(&name) {
                continue;
            }
            if let Some(reading) = read_zone(&entry.path(), name) {
                readings.push(reading);
            }
        }
        if readings.is_empty() {
            return None;
        }
        readings.sort_by(|a, b| a.zone.cmp(&b.zone));
        Some(readings)
    }
}

fn is_package_zone(name: &str) -> bool {
    match name.strip_prefix("intel-rapl:") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn read_zone(dir: &Path, zone: String) -> Option<ZoneReading> {
    let energy_uj = read_counter(&dir.join("energy_uj"))?;
    let max_energy_range_uj = read_counter(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX);
    Some(ZoneReading {
        zone,
        energy_uj,
        max_energy_range_uj,
    })
}

fn read_counter(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Energy consumed between two samples, in microjoules, summed over the
/// zones present in both. A counter that went backwards wrapped once.
pub fn energy_delta_uj(start: &[ZoneReading], end: &[ZoneReading]) -> u64 {
    let mut total: u64 = 0;
    for after in end {
        let Some(before) = start.iter().find(|z| z.zone == after.zone) else {
            continue;
        };
        let delta = if after.energy_uj >= before.energy_uj {
            after.energy_uj - before.energy_uj
        } else {
            after
                .max_energy_range_uj
                .saturating_sub(before.energy_uj)
                .saturating_add(after.energy_uj)
        };
        total = total.saturating_add(delta);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(zone: &str, energy_uj: u64, max: u64) -> ZoneReading {
        ZoneReading {
            zone: zone.to_string(),
            energy_uj,
            max_energy_range_uj: max,
        }
    }

    #[test]
    fn package_zone_names() {
        assert!(is_package_zone("intel-rapl:0"));
        assert!(is_package_zone("intel-rapl:12"));
        assert!(!is_package_zone("intel-rapl:0:1"));
        assert!(!is_package_zone("intel-rapl"));
        assert!(!is_package_zone("dtpm"));
    }

    #[test]
    fn delta_sums_matching_zones() {
        let start = vec![reading("intel-rapl:0", 100, 1_000), reading("intel-rapl:1", 50, 1_000)];
        let end = vec![
            reading("intel-rapl:0", 400, 1_000),
            reading("intel-rapl:1", 70, 1_000),
            reading("intel-rapl:2", 9_999, 1_000_000),
        ];
        assert_eq!(energy_delta_uj(&start, &end), 320);
    }

    #[test]
    fn delta_handles_wraparound() {
        let start = vec![reading("intel-rapl:0", 900, 1_000)];
        let end = vec![reading("intel-rapl:0", 150, 1_000)];
        assert_eq!(energy_delta_uj(&start, &end), 250);
    }

    #[test]
    fn sample_reads_fake_powercap_tree() {
        let root = std::env::temp_dir().join(format!(
            "sweep_powercap_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        for (zone, energy) in [("intel-rapl:1", "2000\n"), ("intel-rapl:0", "1000\n")] {
            let dir = root.join(zone);
            fs::create_dir_all(&dir).expect("zone dir");
            fs::write(dir.join("energy_uj"), energy).expect("energy");
            fs::write(dir.join("max_energy_range_uj"), "262143328850\n").expect("max");
        }
        let sub = root.join("intel-rapl:0:0");
        fs::create_dir_all(&sub).expect("subzone dir");
        fs::write(sub.join("energy_uj"), "5\n").expect("sub energy");

        let readings = PowercapReader::at(&root).sample().expect("readings");
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0], reading("intel-rapl:0", 1000, 262_143_328_850));
        assert_eq!(readings[1].energy_uj, 2000);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn sample_is_none_without_counters() {
        let root = std::env::temp_dir().join("sweep_powercap_test_missing_root");
        assert!(PowercapReader::at(root).sample().is_none());
    }
}
