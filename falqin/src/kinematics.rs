//! Instantaneous and rolling-window kinematics from consecutive fixes.
//!
//! Instantaneous values at fix `i` describe the interval from fix `i - 1`
//! to fix `i`, so fix 0 has none. Undefined values are carried as NaN in the
//! signal arrays and skipped by the rolling means. The window is trailing:
//! the sample at fix `i` averages fixes `i - w + 1 ..= i`, which means the
//! first `w - 1` fixes of a track produce no sample.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::igc::{Fix, Track};
use crate::AltitudeSource;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Below this displacement the forward azimuth is meaningless.
const MIN_HEADING_DISPLACEMENT_M: f64 = 1e-6;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Smoothed {
    pub ground_speed: f64,
    /// Circular mean; `None` when no heading in the window is defined.
    pub heading: Option<f64>,
    pub heading_rate: f64,
    pub climb_rate: f64,
    pub gps_climb_rate: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Index of the aligned fix within its track.
    pub index: usize,
    pub fix: Fix,
    /// Seconds since the previous fix (0 for the first fix).
    pub elapsed_s: f64,
    pub ground_speed: Option<f64>,
    pub heading: Option<f64>,
    pub heading_rate: Option<f64>,
    pub climb_rate: Option<f64>,
    pub gps_climb_rate: Option<f64>,
    pub smoothed: Smoothed,
}

impl Sample {
    pub fn time_s(&self) -> u32 {
        self.fix.time_s
    }
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from the first point to the second, in `[0, 360)`.
pub fn forward_azimuth(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    if haversine_distance(lat1, lon1, lat2, lon2) < MIN_HEADING_DISPLACEMENT_M {
        return None;
    }
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();
    let x = dlon.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    Some(normalize_heading(x.atan2(y).to_degrees()))
}

pub fn normalize_heading(deg: f64) -> f64 {
    let h = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}

/// Shortest signed arc from `from` to `to`, in `(-180, 180]`.
pub fn circular_difference(from: f64, to: f64) -> f64 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Heading rate in deg/s across an interval of `elapsed_s` seconds.
pub fn heading_rate(from: f64, to: f64, elapsed_s: f64) -> Option<f64> {
    if elapsed_s > 0.0 {
        Some(circular_difference(from, to) / elapsed_s)
    } else {
        None
    }
}

/// Pressure unless the logger recorded none, in which case GNSS.
pub fn resolve_altitude_source(track: &Track, requested: AltitudeSource) -> AltitudeSource {
    match requested {
        AltitudeSource::Auto => {
            if track.has_pressure_altitude() {
                AltitudeSource::Pressure
            } else {
                AltitudeSource::Gps
            }
        }
        other => other,
    }
}

struct Signals {
    elapsed: Array1<f64>,
    ground_speed: Array1<f64>,
    heading: Array1<f64>,
    heading_rate: Array1<f64>,
    climb_rate: Array1<f64>,
    gps_climb_rate: Array1<f64>,
}

fn instantaneous_signals(fixes: &[Fix], source: AltitudeSource) -> Signals {
    let n = fixes.len();
    let mut elapsed = Array1::<f64>::zeros(n);
    let mut ground_speed = Array1::<f64>::from_elem(n, f64::NAN);
    let mut heading = Array1::<f64>::from_elem(n, f64::NAN);
    let mut heading_rate_sig = Array1::<f64>::from_elem(n, f64::NAN);
    let mut climb_rate = Array1::<f64>::from_elem(n, f64::NAN);
    let mut gps_climb_rate = Array1::<f64>::from_elem(n, f64::NAN);

    let primary = |f: &Fix| match source {
        AltitudeSource::Gps => f.gps_altitude,
        _ => f.pressure_altitude,
    };

    for i in 1..n {
        let (a, b) = (&fixes[i - 1], &fixes[i]);
        let dt = f64::from(b.time_s.saturating_sub(a.time_s));
        elapsed[i] = dt;

        let distance = haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude);
        if dt > 0.0 {
            ground_speed[i] = distance / dt;
            climb_rate[i] = (primary(b) - primary(a)) / dt;
            gps_climb_rate[i] = (b.gps_altitude - a.gps_altitude) / dt;
        } else {
            ground_speed[i] = 0.0;
            climb_rate[i] = 0.0;
            gps_climb_rate[i] = 0.0;
        }

        if let Some(h) = forward_azimuth(a.latitude, a.longitude, b.latitude, b.longitude) {
            heading[i] = h;
        }
        let prev = heading[i - 1];
        let cur = heading[i];
        if prev.is_finite() && cur.is_finite() {
            if let Some(rate) = heading_rate(prev, cur, dt) {
                heading_rate_sig[i] = rate;
            }
        }
    }

    Signals {
        elapsed,
        ground_speed,
        heading,
        heading_rate: heading_rate_sig,
        climb_rate,
        gps_climb_rate,
    }
}

/// Mean of the finite values in each trailing window of length `window`.
fn rolling_nanmean(signal: &Array1<f64>, window: usize) -> Vec<Option<f64>> {
    signal
        .windows(window)
        .into_iter()
        .map(|win| {
            let (sum, count) = win
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count == 0 {
                None
            } else {
                Some(sum / count as f64)
            }
        })
        .collect()
}

fn rolling_circular_mean(headings: &Array1<f64>, window: usize) -> Vec<Option<f64>> {
    headings
        .windows(window)
        .into_iter()
        .map(|win| {
            let (s, c, count) = win.iter().filter(|v| v.is_finite()).fold(
                (0.0, 0.0, 0usize),
                |(s, c, n), deg| {
                    let rad = deg.to_radians();
                    (s + rad.sin(), c + rad.cos(), n + 1)
                },
            );
            if count == 0 || s.hypot(c) < 1e-9 {
                None
            } else {
                Some(normalize_heading(s.atan2(c).to_degrees()))
            }
        })
        .collect()
}

fn finite(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// Derive one sample per fix from fix `window - 1` onwards.
pub fn extract_samples(track: &Track, window: usize, source: AltitudeSource) -> Vec<Sample> {
    let window = window.max(1);
    if track.fixes.len() < window {
        return Vec::new();
    }
    let source = resolve_altitude_source(track, source);
    let signals = instantaneous_signals(&track.fixes, source);

    let speed = rolling_nanmean(&signals.ground_speed, window);
    let heading = rolling_circular_mean(&signals.heading, window);
    let rate = rolling_nanmean(&signals.heading_rate, window);
    let climb = rolling_nanmean(&signals.climb_rate, window);
    let gps_climb = rolling_nanmean(&signals.gps_climb_rate, window);

    (0..speed.len())
        .map(|k| {
            let i = k + window - 1;
            Sample {
                index: i,
                fix: track.fixes[i],
                elapsed_s: signals.elapsed[i],
                ground_speed: finite(signals.ground_speed[i]),
                heading: finite(signals.heading[i]),
                heading_rate: finite(signals.heading_rate[i]),
                climb_rate: finite(signals.climb_rate[i]),
                gps_climb_rate: finite(signals.gps_climb_rate[i]),
                smoothed: Smoothed {
                    ground_speed: speed[k].unwrap_or(0.0),
                    heading: heading[k],
                    heading_rate: rate[k].unwrap_or(0.0),
                    climb_rate: climb[k].unwrap_or(0.0),
                    gps_climb_rate: gps_climb[k].unwrap_or(0.0),
                },
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::{circling, straight};
    use super::*;

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn azimuth_cardinal_directions() {
        assert_eq!(forward_azimuth(46.0, 8.0, 46.1, 8.0), Some(0.0));
        let east = forward_azimuth(0.0, 8.0, 0.0, 8.1).unwrap();
        assert!((east - 90.0).abs() < 1e-9);
        let south = forward_azimuth(46.1, 8.0, 46.0, 8.0).unwrap();
        assert!((south - 180.0).abs() < 1e-9);
        let west = forward_azimuth(0.0, 8.1, 0.0, 8.0).unwrap();
        assert!((west - 270.0).abs() < 1e-9);
        assert_eq!(forward_azimuth(46.0, 8.0, 46.0, 8.0), None);
    }

    #[test]
    fn heading_rate_wraps_around_north() {
        assert_eq!(heading_rate(359.0, 1.0, 1.0), Some(2.0));
        assert_eq!(heading_rate(1.0, 359.0, 1.0), Some(-2.0));
        assert_eq!(heading_rate(350.0, 10.0, 4.0), Some(5.0));
        assert_eq!(circular_difference(0.0, 180.0), 180.0);
        assert_eq!(heading_rate(10.0, 20.0, 0.0), None);
    }

    #[test]
    fn cold_start_drops_first_window() {
        let short = straight(14, 8.0, 0.0);
        assert!(extract_samples(&short, 15, AltitudeSource::Auto).is_empty());

        let exact = straight(15, 8.0, 0.0);
        let samples = extract_samples(&exact, 15, AltitudeSource::Auto);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].index, 14);

        let longer = straight(40, 8.0, 0.0);
        assert_eq!(extract_samples(&longer, 15, AltitudeSource::Auto).len(), 26);
    }

    #[test]
    fn first_fix_has_no_instantaneous_values() {
        let track = straight(3, 8.0, 0.0);
        let samples = extract_samples(&track, 1, AltitudeSource::Auto);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].ground_speed, None);
        assert_eq!(samples[0].heading, None);
        assert_eq!(samples[0].smoothed.ground_speed, 0.0);
        assert_eq!(samples[1].heading_rate, None);
        assert_eq!(samples[2].heading_rate, Some(0.0));
    }

    #[test]
    fn straight_line_kinematics() {
        let track = straight(30, 8.0, -1.0);
        let samples = extract_samples(&track, 15, AltitudeSource::Auto);
        for s in &samples {
            assert!((s.smoothed.ground_speed - 8.0).abs() < 1e-6);
            assert_eq!(s.smoothed.heading_rate, 0.0);
            assert!((s.smoothed.climb_rate + 1.0).abs() < 1e-9);
            assert!(s.smoothed.heading.unwrap() < 1e-9);
        }
    }

    #[test]
    fn circling_kinematics() {
        let track = circling(60, 10.0, 15.0, 2.0);
        let samples = extract_samples(&track, 15, AltitudeSource::Auto);
        assert_eq!(samples.len(), 46);
        for s in &samples {
            assert!((s.smoothed.heading_rate - 15.0).abs() < 0.05);
            assert!((s.smoothed.climb_rate - 2.0).abs() < 1e-9);
            assert!((s.smoothed.ground_speed - 10.0).abs() < 0.1);
        }

        let left = circling(30, 10.0, -15.0, 2.0);
        let samples = extract_samples(&left, 15, AltitudeSource::Auto);
        assert!(samples
            .iter()
            .all(|s| (s.smoothed.heading_rate + 15.0).abs() < 0.05));
    }

    #[test]
    fn zero_duration_interval_is_zero_speed() {
        let mut track = straight(3, 8.0, 0.0);
        track.fixes[2].time_s = track.fixes[1].time_s;
        let samples = extract_samples(&track, 1, AltitudeSource::Auto);
        assert_eq!(samples[2].ground_speed, Some(0.0));
        assert_eq!(samples[2].climb_rate, Some(0.0));
        assert_eq!(samples[2].heading_rate, None);
    }

    #[test]
    fn auto_source_falls_back_to_gps() {
        let mut track = straight(20, 8.0, 0.0);
        for (k, f) in track.fixes.iter_mut().enumerate() {
            f.pressure_altitude = 0.0;
            f.gps_altitude = 1000.0 - 0.5 * k as f64;
        }
        assert_eq!(
            resolve_altitude_source(&track, AltitudeSource::Auto),
            AltitudeSource::Gps
        );
        let samples = extract_samples(&track, 5, AltitudeSource::Auto);
        assert!(samples
            .iter()
            .all(|s| (s.smoothed.climb_rate + 0.5).abs() < 1e-9));
    }
}
