//! Per-flight analysis pass and the single-file / folder-mode drivers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::AggregateResult;
use crate::classify::{classify_samples, ClassifiedSample, FlightState};
use crate::igc::{parse_records, Track};
use crate::kinematics::{extract_samples, resolve_altitude_source};
use crate::thermals::{detect_thermals, ThermalSegment};
use crate::{AltitudeSource, AnalysisConfig, AnalysisError};

/// Diagnostic sink for a run. Every method defaults to doing nothing.
pub trait Progress: Sync {
    fn config(&self, _config: &AnalysisConfig) {}
    fn folder_scanned(&self, _dir: &Path, _files: usize) {}
    fn malformed_record(&self, _source: &str, _line: usize, _reason: &str) {}
    fn short_track(&self, _source: &str, _fixes: usize, _window: usize) {}
    fn flight_done(&self, _done: usize, _total: usize, _flight: &FlightAnalysis) {}
    fn file_failed(&self, _source: &str, _error: &AnalysisError) {}
}

/// Reports nothing.
pub struct Silent;

impl Progress for Silent {}

/// Emits `tracing` events.
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn config(&self, config: &AnalysisConfig) {
        info!(
            "Window {} fixes, {} speed bins ({:.2}..{:.2} m/s), LD max {}, altitude {}",
            config.avg_window,
            config.speed_bins.len().saturating_sub(1),
            config.speed_bins.first().copied().unwrap_or(f64::NAN),
            config.speed_bins.last().copied().unwrap_or(f64::NAN),
            config.ld_max,
            config.altitude_source.as_str()
        );
    }

    fn folder_scanned(&self, dir: &Path, files: usize) {
        if files == 0 {
            warn!("No IGC files found in {}", dir.display());
        } else {
            info!("Found {} IGC files in {}", files, dir.display());
        }
    }

    fn malformed_record(&self, source: &str, line: usize, reason: &str) {
        debug!("{}:{}: skipped record ({})", source, line, reason);
    }

    fn short_track(&self, source: &str, fixes: usize, window: usize) {
        warn!(
            "{}: {} fixes is shorter than the {}-fix window; no samples",
            source, fixes, window
        );
    }

    fn flight_done(&self, done: usize, total: usize, flight: &FlightAnalysis) {
        let (thermal, glide, undefined) = flight.state_counts();
        info!(
            "IGC file {}/{} parsed: {} ({} samples: {} thermal, {} glide, {} undefined)",
            done,
            total,
            flight.track.source,
            flight.samples.len(),
            thermal,
            glide,
            undefined
        );
    }

    fn file_failed(&self, source: &str, error: &AnalysisError) {
        warn!("Skipping {}: {}", source, error);
    }
}

/// Everything derived from one flight log.
#[derive(Clone, Debug, Serialize)]
pub struct FlightAnalysis {
    pub track: Track,
    /// Altitude channel actually used after resolving `auto`.
    pub altitude_source: AltitudeSource,
    pub samples: Vec<ClassifiedSample>,
    pub thermals: Vec<ThermalSegment>,
}

impl FlightAnalysis {
    /// (thermal, glide, undefined) sample counts.
    pub fn state_counts(&self) -> (usize, usize, usize) {
        self.samples
            .iter()
            .fold((0, 0, 0), |(t, g, u), cs| match cs.state {
                FlightState::Thermal => (t + 1, g, u),
                FlightState::Glide => (t, g + 1, u),
                FlightState::Undefined => (t, g, u + 1),
            })
    }

    pub fn is_short(&self) -> bool {
        self.samples.is_empty()
    }
}

pub fn analyze_track(track: Track, config: &AnalysisConfig) -> FlightAnalysis {
    let altitude_source = resolve_altitude_source(&track, config.altitude_source);
    let samples = classify_samples(
        extract_samples(&track, config.avg_window, altitude_source),
        &config.thresholds,
    );
    let thermals = detect_thermals(&track.source, &samples, &config.thresholds);
    FlightAnalysis {
        track,
        altitude_source,
        samples,
        thermals,
    }
}

pub struct SingleRun {
    pub flight: FlightAnalysis,
    pub aggregate: AggregateResult,
}

pub fn load_track(path: &Path) -> Result<Track, AnalysisError> {
    let data = fs::read(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_records(&data, &path.display().to_string())
}

fn analyze_file(
    path: &Path,
    config: &AnalysisConfig,
    progress: &dyn Progress,
) -> Result<FlightAnalysis, AnalysisError> {
    let track = load_track(path)?;
    for record in &track.report.malformed {
        progress.malformed_record(&track.source, record.line, &record.reason);
    }
    let flight = analyze_track(track, config);
    if flight.is_short() {
        progress.short_track(&flight.track.source, flight.track.len(), config.avg_window);
    }
    Ok(flight)
}

/// Analyse one log. Any read or parse failure is returned.
pub fn run_single(
    path: &Path,
    config: &AnalysisConfig,
    progress: &dyn Progress,
) -> Result<SingleRun, AnalysisError> {
    config.validate()?;
    progress.config(config);
    let mut aggregate = AggregateResult::new(config)?;
    let flight = analyze_file(path, config, progress)?;
    aggregate.add_flight(&flight);
    progress.flight_done(1, 1, &flight);
    Ok(SingleRun { flight, aggregate })
}

/// Regular files under `dir` with an `igc` extension (any case), sorted.
pub fn discover_logs(dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
    if !dir.is_dir() {
        return Err(AnalysisError::NotADirectory(dir.to_path_buf()));
    }
    let io_err = |source: std::io::Error| AnalysisError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_igc = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("igc"));
        if is_igc && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Analyse every log in `dir` in parallel and merge the results. Files that
/// fail are recorded in the provenance and skipped.
pub fn run_folder(
    dir: &Path,
    config: &AnalysisConfig,
    progress: &dyn Progress,
) -> Result<AggregateResult, AnalysisError> {
    config.validate()?;
    progress.config(config);
    let files = discover_logs(dir)?;
    progress.folder_scanned(dir, files.len());

    let empty = AggregateResult::new(config)?;
    let total = files.len();
    let done = AtomicUsize::new(0);

    let result = files
        .par_iter()
        .map(|path| {
            let mut partial = empty.clone();
            match analyze_file(path, config, progress) {
                Ok(flight) => {
                    partial.add_flight(&flight);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    progress.flight_done(n, total, &flight);
                }
                Err(err) => {
                    done.fetch_add(1, Ordering::Relaxed);
                    let source = path.display().to_string();
                    progress.file_failed(&source, &err);
                    partial.record_failure(source, err.to_string());
                }
            }
            partial
        })
        .reduce(
            || empty.clone(),
            |mut acc, partial| {
                acc.merge(partial);
                acc
            },
        );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::fixtures::{circling, straight};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Progress for Recorder {
        fn short_track(&self, source: &str, fixes: usize, window: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("short {source} {fixes}/{window}"));
        }
    }

    #[test]
    fn circling_flight_yields_thermal_and_no_glides() {
        let flight = analyze_track(circling(60, 10.0, 15.0, 2.0), &AnalysisConfig::default());
        assert_eq!(flight.altitude_source, AltitudeSource::Pressure);
        assert_eq!(flight.state_counts(), (46, 0, 0));
        assert_eq!(flight.thermals.len(), 1);
    }

    #[test]
    fn gps_only_logs_resolve_to_gnss_altitude() {
        let mut track = straight(30, 9.0, -1.0);
        for fix in &mut track.fixes {
            fix.pressure_altitude = 0.0;
        }
        let flight = analyze_track(track, &AnalysisConfig::default());
        assert_eq!(flight.altitude_source, AltitudeSource::Gps);
        assert!(flight
            .samples
            .iter()
            .all(|cs| (cs.sample.smoothed.climb_rate + 1.0).abs() < 1e-9));
    }

    #[test]
    fn short_track_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.igc");
        fs::write(
            &path,
            "AXXX001\r\nHFDTE010722\r\n\
             B1000004600000N00800000EA0100001000\r\n\
             B1000014600010N00800000EA0100001000\r\n",
        )
        .unwrap();
        let recorder = Recorder::default();
        let run = run_single(&path, &AnalysisConfig::default(), &recorder).unwrap();
        assert!(run.flight.is_short());
        assert_eq!(run.aggregate.provenance.short_tracks, 1);
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].ends_with("2/15"));
    }

    #[test]
    fn single_mode_surfaces_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.igc");
        assert!(matches!(
            run_single(&missing, &AnalysisConfig::default(), &Silent),
            Err(AnalysisError::Io { .. })
        ));

        let garbage = dir.path().join("garbage.igc");
        fs::write(&garbage, "hello world\n").unwrap();
        assert!(matches!(
            run_single(&garbage, &AnalysisConfig::default(), &Silent),
            Err(AnalysisError::UnsupportedFormat(_))
        ));

        let mut bad = AnalysisConfig::default();
        bad.avg_window = 0;
        assert!(matches!(
            run_single(&garbage, &bad, &Silent),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[test]
    fn folder_mode_requires_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.igc");
        fs::write(&file, "A\n").unwrap();
        assert!(matches!(
            run_folder(&file, &AnalysisConfig::default(), &Silent),
            Err(AnalysisError::NotADirectory(_))
        ));
        assert!(matches!(
            run_folder(&dir.path().join("nope"), &AnalysisConfig::default(), &Silent),
            Err(AnalysisError::NotADirectory(_))
        ));
    }

    #[test]
    fn discovery_is_case_insensitive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.IGC", "a.igc", "c.Igc", "notes.txt", "igc"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("sub.igc")).unwrap();
        let names: Vec<String> = discover_logs(dir.path())
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["a.igc", "b.IGC", "c.Igc"]);
    }
}
