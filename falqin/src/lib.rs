//! Kinematic feature extraction, flight-state classification and glide-polar
//! statistics for paragliding IGC flight logs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod aggregate;
pub mod classify;
pub mod igc;
pub mod kinematics;
pub mod pipeline;
pub mod stats;
pub mod thermals;

pub use aggregate::{
    AggregateResult, BinSummary, FileFailure, GlidePoint, Histogram2d, JointDistribution,
    Provenance, SpeedBins, ThermalPoint,
};
pub use classify::{classify, classify_samples, ClassifiedSample, FlightState, Thresholds};
pub use igc::{parse_records, Fix, FixValidity, ParseReport, Track};
pub use kinematics::{extract_samples, Sample, Smoothed};
pub use pipeline::{
    analyze_track, run_folder, run_single, FlightAnalysis, Progress, Silent, SingleRun,
    TracingProgress,
};
pub use thermals::{detect_thermals, ThermalSegment, TurnDirection};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported log format: {0}")]
    UnsupportedFormat(String),
    #[error("no usable position fixes in {0}")]
    NoFixes(String),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Which altitude channel drives climb rate and thermal height gain.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AltitudeSource {
    Auto,
    Pressure,
    Gps,
}

impl Default for AltitudeSource {
    fn default() -> Self {
        AltitudeSource::Auto
    }
}

impl AltitudeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AltitudeSource::Auto => "auto",
            AltitudeSource::Pressure => "pressure",
            AltitudeSource::Gps => "gps",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Trailing rolling-window length, in fixes.
    pub avg_window: usize,
    /// Ground-speed bin edges (m/s), strictly increasing.
    pub speed_bins: Vec<f64>,
    /// Largest glide ratio kept; the boundary itself is kept.
    pub ld_max: f64,
    /// Bins with fewer retained points are flagged as low confidence.
    pub min_bin_samples: usize,
    pub altitude_source: AltitudeSource,
    pub thresholds: Thresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            avg_window: 15,
            speed_bins: default_speed_bins(),
            ld_max: 14.0,
            min_bin_samples: 30,
            altitude_source: AltitudeSource::Auto,
            thresholds: Thresholds::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.avg_window == 0 {
            return Err(AnalysisError::InvalidParameter(
                "avg_window must be at least 1".into(),
            ));
        }
        if self.speed_bins.len() < 2 {
            return Err(AnalysisError::InvalidParameter(
                "speed_bins needs at least two edges".into(),
            ));
        }
        if self.speed_bins.iter().any(|e| !e.is_finite()) {
            return Err(AnalysisError::InvalidParameter(
                "speed_bins edges must be finite".into(),
            ));
        }
        if self.speed_bins.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AnalysisError::InvalidParameter(
                "speed_bins edges must be strictly increasing".into(),
            ));
        }
        if !(self.ld_max.is_finite() && self.ld_max > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "ld_max must be a positive number, got {}",
                self.ld_max
            )));
        }
        self.thresholds.validate()
    }

    /// SHA-256 of the JSON encoding, recorded in run provenance.
    pub fn fingerprint(&self) -> Result<String, AnalysisError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| AnalysisError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

/// 19 edges from 7.25 to 16.25 m/s, 18 bins of 0.5 m/s.
pub fn default_speed_bins() -> Vec<f64> {
    linspace(7.25, 16.25, 19)
}

/// `count` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bins_are_half_metre_steps() {
        let bins = default_speed_bins();
        assert_eq!(bins.len(), 19);
        assert_eq!(bins[0], 7.25);
        assert_eq!(bins[1], 7.75);
        assert_eq!(bins[18], 16.25);
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert!(AnalysisConfig::default().validate().is_ok());

        let mut cfg = AnalysisConfig::default();
        cfg.avg_window = 0;
        assert!(matches!(
            cfg.validate(),
            Err(AnalysisError::InvalidParameter(_))
        ));

        let mut cfg = AnalysisConfig::default();
        cfg.speed_bins = vec![8.0, 8.0, 9.0];
        assert!(cfg.validate().is_err());

        let mut cfg = AnalysisConfig::default();
        cfg.ld_max = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fingerprint_tracks_config_changes() {
        let a = AnalysisConfig::default();
        let mut b = AnalysisConfig::default();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        b.ld_max = 12.0;
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn partial_json_config_uses_defaults() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"avg_window": 9, "altitude_source": "gps"}"#).unwrap();
        assert_eq!(cfg.avg_window, 9);
        assert_eq!(cfg.altitude_source, AltitudeSource::Gps);
        assert_eq!(cfg.ld_max, 14.0);
        assert_eq!(cfg.speed_bins.len(), 19);
    }
}
