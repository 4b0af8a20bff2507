//! Per-sample flight-state classification from smoothed kinematics.

use serde::{Deserialize, Serialize};

use crate::kinematics::Sample;
use crate::AnalysisError;

pub const DEFAULT_HEADING_RATE_THRESHOLD: f64 = 10.0;
pub const DEFAULT_GROUND_SPEED_THRESHOLD: f64 = 3.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FlightState {
    Undefined,
    Glide,
    Thermal,
}

impl FlightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightState::Undefined => "undefined",
            FlightState::Glide => "glide",
            FlightState::Thermal => "thermal",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// |turn rate| at or above this counts as turning (deg/s).
    pub heading_rate: f64,
    /// Gliding requires a ground speed strictly above this (m/s).
    pub ground_speed: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            heading_rate: DEFAULT_HEADING_RATE_THRESHOLD,
            ground_speed: DEFAULT_GROUND_SPEED_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.heading_rate.is_finite() && self.heading_rate >= 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "heading-rate threshold must be a non-negative number, got {}",
                self.heading_rate
            )));
        }
        if !(self.ground_speed.is_finite() && self.ground_speed >= 0.0) {
            return Err(AnalysisError::InvalidParameter(format!(
                "ground-speed threshold must be a non-negative number, got {}",
                self.ground_speed
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedSample {
    pub sample: Sample,
    pub state: FlightState,
}

/// Thermal: climbing while turning at least the heading-rate threshold.
/// Glide: turning less than the threshold and faster than the speed threshold.
pub fn classify(sample: &Sample, thresholds: &Thresholds) -> FlightState {
    let s = &sample.smoothed;
    let turn = s.heading_rate.abs();
    if s.climb_rate > 0.0 && turn >= thresholds.heading_rate {
        FlightState::Thermal
    } else if turn < thresholds.heading_rate && s.ground_speed > thresholds.ground_speed {
        FlightState::Glide
    } else {
        FlightState::Undefined
    }
}

pub fn classify_samples(samples: Vec<Sample>, thresholds: &Thresholds) -> Vec<ClassifiedSample> {
    samples
        .into_iter()
        .map(|sample| ClassifiedSample {
            state: classify(&sample, thresholds),
            sample,
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn sample_with(ground_speed: f64, heading_rate: f64, climb_rate: f64) -> Sample {
    use crate::igc::{Fix, FixValidity};
    use crate::kinematics::Smoothed;

    Sample {
        index: 0,
        fix: Fix {
            time_s: 0,
            latitude: 46.0,
            longitude: 8.0,
            pressure_altitude: 1000.0,
            gps_altitude: 1000.0,
            validity: FixValidity::ThreeD,
        },
        elapsed_s: 1.0,
        ground_speed: Some(ground_speed),
        heading: None,
        heading_rate: Some(heading_rate),
        climb_rate: Some(climb_rate),
        gps_climb_rate: Some(climb_rate),
        smoothed: Smoothed {
            ground_speed,
            heading: None,
            heading_rate,
            climb_rate,
            gps_climb_rate: climb_rate,
        },
    }
}
