//! Grouping of consecutive thermal samples into individual thermals.

use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedSample, FlightState, Thresholds};

/// A thermal must complete more than one full turn.
const MIN_TURNS: f64 = 1.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TurnDirection {
    Left,
    Right,
}

impl TurnDirection {
    fn of(rate: f64) -> Self {
        if rate < 0.0 {
            TurnDirection::Left
        } else {
            TurnDirection::Right
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnDirection::Left => "left",
            TurnDirection::Right => "right",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThermalSegment {
    pub source: String,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time_s: u32,
    pub duration_s: u32,
    pub height_gain_m: f64,
    pub turn_count: f64,
    /// Mean smoothed heading rate (deg/s, signed).
    pub avg_turn_rate: f64,
    pub direction: TurnDirection,
    pub avg_climb_rate: f64,
    pub avg_gps_climb_rate: f64,
}

/// Split thermal-labelled samples into runs of adjacent fixes circling in
/// one direction, keeping runs that gained GNSS height over more than one turn.
pub fn detect_thermals(
    source: &str,
    samples: &[ClassifiedSample],
    thresholds: &Thresholds,
) -> Vec<ThermalSegment> {
    let mut out = Vec::new();
    let mut run: Vec<&ClassifiedSample> = Vec::new();

    for cs in samples {
        if cs.state != FlightState::Thermal {
            flush_run(source, &mut run, thresholds, &mut out);
            continue;
        }
        if let Some(last) = run.last() {
            let adjacent = last.sample.index + 1 == cs.sample.index;
            let same_direction = TurnDirection::of(last.sample.smoothed.heading_rate)
                == TurnDirection::of(cs.sample.smoothed.heading_rate);
            if !(adjacent && same_direction) {
                flush_run(source, &mut run, thresholds, &mut out);
            }
        }
        run.push(cs);
    }
    flush_run(source, &mut run, thresholds, &mut out);
    out
}

fn flush_run(
    source: &str,
    run: &mut Vec<&ClassifiedSample>,
    thresholds: &Thresholds,
    out: &mut Vec<ThermalSegment>,
) {
    if let Some(segment) = summarize_run(source, run) {
        if segment.height_gain_m > 0.0
            && segment.turn_count > MIN_TURNS
            && segment.avg_turn_rate.abs() > thresholds.heading_rate
        {
            out.push(segment);
        }
    }
    run.clear();
}

fn summarize_run(source: &str, run: &[&ClassifiedSample]) -> Option<ThermalSegment> {
    let first = &run.first()?.sample;
    let last = &run.last()?.sample;
    let n = run.len() as f64;

    let turned_deg: f64 = run
        .iter()
        .filter_map(|cs| cs.sample.heading_rate.map(|r| r.abs() * cs.sample.elapsed_s))
        .sum();
    let avg_turn_rate = run.iter().map(|cs| cs.sample.smoothed.heading_rate).sum::<f64>() / n;

    Some(ThermalSegment {
        source: source.to_string(),
        start_index: first.index,
        end_index: last.index,
        start_time_s: first.time_s(),
        duration_s: last.time_s() - first.time_s(),
        height_gain_m: last.fix.gps_altitude - first.fix.gps_altitude,
        turn_count: turned_deg / 360.0,
        avg_turn_rate,
        direction: TurnDirection::of(avg_turn_rate),
        avg_climb_rate: run.iter().map(|cs| cs.sample.smoothed.climb_rate).sum::<f64>() / n,
        avg_gps_climb_rate: run
            .iter()
            .map(|cs| cs.sample.smoothed.gps_climb_rate)
            .sum::<f64>()
            / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_samples, sample_with};
    use crate::kinematics::extract_samples;
    use crate::kinematics::fixtures::{circling, straight};
    use crate::AltitudeSource;

    fn thermal_run(start: usize, len: usize, rate: f64, climb: f64) -> Vec<ClassifiedSample> {
        (0..len)
            .map(|k| {
                let mut s = sample_with(6.0, rate, climb);
                s.index = start + k;
                s.fix.time_s = (start + k) as u32;
                s.fix.pressure_altitude = 1000.0 + climb * k as f64;
                s.fix.gps_altitude = 1100.0 + climb * k as f64;
                ClassifiedSample {
                    sample: s,
                    state: FlightState::Thermal,
                }
            })
            .collect()
    }

    #[test]
    fn circling_climb_is_one_right_hand_thermal() {
        let track = circling(60, 10.0, 15.0, 2.0);
        let samples = classify_samples(
            extract_samples(&track, 15, AltitudeSource::Auto),
            &Thresholds::default(),
        );
        let thermals = detect_thermals("circling", &samples, &Thresholds::default());
        assert_eq!(thermals.len(), 1);
        let t = &thermals[0];
        assert_eq!((t.start_index, t.end_index), (14, 59));
        assert_eq!(t.duration_s, 45);
        assert!((t.height_gain_m - 90.0).abs() < 1e-9);
        assert_eq!(t.direction, TurnDirection::Right);
        assert!((t.turn_count - 46.0 * 15.0 / 360.0).abs() < 0.01);
        assert!((t.avg_climb_rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn direction_change_and_gaps_split_thermals() {
        let mut samples = thermal_run(0, 40, 15.0, 1.5);
        samples.extend(thermal_run(40, 40, -15.0, 1.5));
        samples.extend(thermal_run(85, 40, -15.0, 1.5));
        let thermals = detect_thermals("t", &samples, &Thresholds::default());
        let spans: Vec<(usize, usize, TurnDirection)> = thermals
            .iter()
            .map(|t| (t.start_index, t.end_index, t.direction))
            .collect();
        assert_eq!(
            spans,
            vec![
                (0, 39, TurnDirection::Right),
                (40, 79, TurnDirection::Left),
                (85, 124, TurnDirection::Left),
            ]
        );
    }

    #[test]
    fn short_or_sinking_runs_are_rejected() {
        // 20 s at 15 deg/s is under one full turn
        let short = thermal_run(0, 20, 15.0, 1.0);
        assert!(detect_thermals("t", &short, &Thresholds::default()).is_empty());

        let mut flat = thermal_run(0, 40, 15.0, 1.0);
        for cs in &mut flat {
            cs.sample.fix.gps_altitude = 1100.0;
        }
        assert!(detect_thermals("t", &flat, &Thresholds::default()).is_empty());
    }

    #[test]
    fn height_gain_is_measured_on_gnss_altitude() {
        let mut baro_only = thermal_run(0, 40, 15.0, 1.5);
        for cs in &mut baro_only {
            cs.sample.fix.gps_altitude = 1100.0;
        }
        assert!(detect_thermals("t", &baro_only, &Thresholds::default()).is_empty());

        let mut gnss_only = thermal_run(0, 40, 15.0, 1.5);
        for (k, cs) in gnss_only.iter_mut().enumerate() {
            cs.sample.fix.pressure_altitude = 1000.0;
            cs.sample.fix.gps_altitude = 1100.0 + 2.0 * k as f64;
        }
        let thermals = detect_thermals("t", &gnss_only, &Thresholds::default());
        assert_eq!(thermals.len(), 1);
        assert!((thermals[0].height_gain_m - 78.0).abs() < 1e-9);
    }

    #[test]
    fn gliding_flight_has_no_thermals() {
        let track = straight(60, 8.0, -1.0);
        let samples = classify_samples(
            extract_samples(&track, 15, AltitudeSource::Auto),
            &Thresholds::default(),
        );
        assert!(detect_thermals("s", &samples, &Thresholds::default()).is_empty());
    }
}
