//! Cross-flight accumulation of glide-polar and thermal statistics.
//!
//! Everything an [`AggregateResult`] holds is kept in a canonical order, so
//! folding flights or merging partial results gives the same state no matter
//! the order or grouping they arrive in.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::classify::FlightState;
use crate::pipeline::FlightAnalysis;
use crate::stats::{describe, Describe};
use crate::thermals::ThermalSegment;
use crate::{linspace, AnalysisConfig, AnalysisError};

/// Glide ratio is only defined while sinking faster than this (m/s).
pub const MIN_SINK_RATE: f64 = 0.01;
/// Glides at or above this ground speed (m/s) are not binned.
pub const MAX_GLIDE_SPEED: f64 = 20.0;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeedBins {
    edges: Vec<f64>,
}

impl SpeedBins {
    pub fn new(edges: Vec<f64>) -> Result<Self, AnalysisError> {
        if edges.len() < 2 || edges.iter().any(|e| !e.is_finite()) {
            return Err(AnalysisError::InvalidParameter(
                "speed bins need at least two finite edges".into(),
            ));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AnalysisError::InvalidParameter(
                "speed bin edges must be strictly increasing".into(),
            ));
        }
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bin `i` covers `[edges[i], edges[i + 1])`.
    pub fn locate(&self, speed: f64) -> Option<usize> {
        if !speed.is_finite() {
            return None;
        }
        let idx = self.edges.partition_point(|e| *e <= speed);
        if idx == 0 || idx == self.edges.len() {
            None
        } else {
            Some(idx - 1)
        }
    }

    pub fn bounds(&self, bin: usize) -> (f64, f64) {
        (self.edges[bin], self.edges[bin + 1])
    }

    pub fn centre(&self, bin: usize) -> f64 {
        let (low, high) = self.bounds(bin);
        (low + high) / 2.0
    }

    pub fn label(&self, bin: usize) -> String {
        let (low, high) = self.bounds(bin);
        format!("{:.2} - {:.2} m/s", low, high)
    }
}

/// Ground speed over GNSS sink rate; `None` unless actually sinking.
pub fn glide_ratio(ground_speed: f64, gps_climb_rate: f64) -> Option<f64> {
    if gps_climb_rate < -MIN_SINK_RATE {
        Some(ground_speed / -gps_climb_rate)
    } else {
        None
    }
}

/// The `ld_max` boundary itself is retained.
pub fn within_ld_max(ratio: f64, ld_max: f64) -> bool {
    ratio <= ld_max
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlidePoint {
    pub ground_speed: f64,
    pub glide_ratio: f64,
    pub climb_rate: f64,
    pub gps_climb_rate: f64,
}

fn cmp_glide(a: &GlidePoint, b: &GlidePoint) -> Ordering {
    a.glide_ratio
        .total_cmp(&b.glide_ratio)
        .then(a.ground_speed.total_cmp(&b.ground_speed))
        .then(a.climb_rate.total_cmp(&b.climb_rate))
        .then(a.gps_climb_rate.total_cmp(&b.gps_climb_rate))
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThermalPoint {
    pub climb_rate: f64,
    /// Signed smoothed heading rate (deg/s).
    pub heading_rate: f64,
}

fn cmp_thermal(a: &ThermalPoint, b: &ThermalPoint) -> Ordering {
    a.climb_rate
        .total_cmp(&b.climb_rate)
        .then(a.heading_rate.total_cmp(&b.heading_rate))
}

/// (climb rate, heading rate) pairs of every thermal sample.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JointDistribution {
    points: Vec<ThermalPoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Histogram2d {
    /// Edges over |heading rate| (deg/s).
    pub turn_edges: Vec<f64>,
    /// Edges over climb rate (m/s).
    pub climb_edges: Vec<f64>,
    /// `counts[turn_bin][climb_bin]`.
    pub counts: Vec<Vec<u64>>,
}

impl JointDistribution {
    pub fn points(&self) -> &[ThermalPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn extend(&mut self, other: impl IntoIterator<Item = ThermalPoint>) {
        self.points.extend(other);
        self.points.sort_by(cmp_thermal);
    }

    /// Equal-width count histogram of |heading rate| against climb rate over
    /// the data range.
    pub fn histogram(&self, turn_bins: usize, climb_bins: usize) -> Option<Histogram2d> {
        if self.points.is_empty() || turn_bins == 0 || climb_bins == 0 {
            return None;
        }
        let turn: Vec<f64> = self.points.iter().map(|p| p.heading_rate.abs()).collect();
        let climb: Vec<f64> = self.points.iter().map(|p| p.climb_rate).collect();
        let (t_lo, t_hi) = data_range(&turn);
        let (c_lo, c_hi) = data_range(&climb);

        let mut counts = vec![vec![0u64; climb_bins]; turn_bins];
        for (t, c) in turn.iter().zip(climb.iter()) {
            let i = equal_width_index(*t, t_lo, t_hi, turn_bins);
            let j = equal_width_index(*c, c_lo, c_hi, climb_bins);
            counts[i][j] += 1;
        }
        Some(Histogram2d {
            turn_edges: linspace(t_lo, t_hi, turn_bins + 1),
            climb_edges: linspace(c_lo, c_hi, climb_bins + 1),
            counts,
        })
    }
}

fn data_range(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi > lo {
        (lo, hi)
    } else {
        (lo - 0.5, hi + 0.5)
    }
}

/// The top edge falls into the last bin.
fn equal_width_index(value: f64, lo: f64, hi: f64, bins: usize) -> usize {
    let frac = (value - lo) / (hi - lo);
    ((frac * bins as f64).floor().max(0.0) as usize).min(bins - 1)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileFailure {
    pub source: String,
    pub reason: String,
}

/// Counters explaining where every fix and sample went.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    pub flights: usize,
    pub failed_files: Vec<FileFailure>,
    /// Flights shorter than the rolling window.
    pub short_tracks: usize,
    pub fixes: usize,
    pub malformed_records: usize,
    pub out_of_order_fixes: usize,
    pub samples: usize,
    pub thermal_samples: usize,
    pub glide_samples: usize,
    pub undefined_samples: usize,
    pub excluded_no_sink: usize,
    pub excluded_ld_max: usize,
    pub excluded_too_fast: usize,
    pub excluded_out_of_bins: usize,
}

impl Provenance {
    fn merge(&mut self, other: Provenance) {
        self.flights += other.flights;
        self.failed_files.extend(other.failed_files);
        self.failed_files.sort();
        self.short_tracks += other.short_tracks;
        self.fixes += other.fixes;
        self.malformed_records += other.malformed_records;
        self.out_of_order_fixes += other.out_of_order_fixes;
        self.samples += other.samples;
        self.thermal_samples += other.thermal_samples;
        self.glide_samples += other.glide_samples;
        self.undefined_samples += other.undefined_samples;
        self.excluded_no_sink += other.excluded_no_sink;
        self.excluded_ld_max += other.excluded_ld_max;
        self.excluded_too_fast += other.excluded_too_fast;
        self.excluded_out_of_bins += other.excluded_out_of_bins;
    }

    /// Glide samples that made it into a speed bin.
    pub fn retained_glide_samples(&self) -> usize {
        self.glide_samples
            - self.excluded_no_sink
            - self.excluded_ld_max
            - self.excluded_too_fast
            - self.excluded_out_of_bins
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BinSummary {
    pub index: usize,
    pub label: String,
    pub low: f64,
    pub high: f64,
    pub centre: f64,
    pub count: usize,
    pub low_confidence: bool,
    pub glide_ratio: Option<Describe>,
    pub climb_rate: Option<Describe>,
    pub gps_climb_rate: Option<Describe>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AggregateResult {
    /// Fingerprint of the configuration every contribution was built with.
    pub config_hash: String,
    pub bins: SpeedBins,
    pub ld_max: f64,
    pub min_bin_samples: usize,
    /// Retained glide points per speed bin.
    pub glide_points: Vec<Vec<GlidePoint>>,
    pub thermal_distribution: JointDistribution,
    pub thermals: Vec<ThermalSegment>,
    pub provenance: Provenance,
}

impl AggregateResult {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let bins = SpeedBins::new(config.speed_bins.clone())?;
        Ok(Self {
            config_hash: config.fingerprint()?,
            glide_points: vec![Vec::new(); bins.len()],
            bins,
            ld_max: config.ld_max,
            min_bin_samples: config.min_bin_samples,
            thermal_distribution: JointDistribution::default(),
            thermals: Vec::new(),
            provenance: Provenance::default(),
        })
    }

    /// Fold one analysed flight in.
    pub fn add_flight(&mut self, flight: &FlightAnalysis) {
        let p = &mut self.provenance;
        p.flights += 1;
        p.fixes += flight.track.len();
        p.malformed_records += flight.track.report.malformed.len();
        p.out_of_order_fixes += flight.track.report.out_of_order;
        if flight.samples.is_empty() {
            p.short_tracks += 1;
        }

        let mut touched = vec![false; self.bins.len()];
        let mut thermal_points = Vec::new();
        for cs in &flight.samples {
            p.samples += 1;
            let s = &cs.sample.smoothed;
            match cs.state {
                FlightState::Undefined => p.undefined_samples += 1,
                FlightState::Thermal => {
                    p.thermal_samples += 1;
                    thermal_points.push(ThermalPoint {
                        climb_rate: s.climb_rate,
                        heading_rate: s.heading_rate,
                    });
                }
                FlightState::Glide => {
                    p.glide_samples += 1;
                    let ratio = match glide_ratio(s.ground_speed, s.gps_climb_rate) {
                        Some(r) => r,
                        None => {
                            p.excluded_no_sink += 1;
                            continue;
                        }
                    };
                    if !within_ld_max(ratio, self.ld_max) {
                        p.excluded_ld_max += 1;
                        continue;
                    }
                    if s.ground_speed >= MAX_GLIDE_SPEED {
                        p.excluded_too_fast += 1;
                        continue;
                    }
                    match self.bins.locate(s.ground_speed) {
                        Some(bin) => {
                            self.glide_points[bin].push(GlidePoint {
                                ground_speed: s.ground_speed,
                                glide_ratio: ratio,
                                climb_rate: s.climb_rate,
                                gps_climb_rate: s.gps_climb_rate,
                            });
                            touched[bin] = true;
                        }
                        None => p.excluded_out_of_bins += 1,
                    }
                }
            }
        }

        for (bin, points) in self.glide_points.iter_mut().enumerate() {
            if touched[bin] {
                points.sort_by(cmp_glide);
            }
        }
        if !thermal_points.is_empty() {
            self.thermal_distribution.extend(thermal_points);
        }
        if !flight.thermals.is_empty() {
            self.thermals.extend(flight.thermals.iter().cloned());
            sort_thermals(&mut self.thermals);
        }
    }

    /// Record a file that could not be turned into a flight.
    pub fn record_failure(&mut self, source: impl Into<String>, reason: impl Into<String>) {
        self.provenance.failed_files.push(FileFailure {
            source: source.into(),
            reason: reason.into(),
        });
        self.provenance.failed_files.sort();
    }

    /// Multiset union with another result built from the same configuration.
    ///
    /// # Panics
    ///
    /// If `other` was built from a different configuration.
    pub fn merge(&mut self, other: AggregateResult) {
        assert_eq!(
            self.config_hash, other.config_hash,
            "cannot merge results from different configurations"
        );
        for (mine, theirs) in self.glide_points.iter_mut().zip(other.glide_points) {
            if !theirs.is_empty() {
                mine.extend(theirs);
                mine.sort_by(cmp_glide);
            }
        }
        if !other.thermal_distribution.is_empty() {
            self.thermal_distribution
                .extend(other.thermal_distribution.points);
        }
        if !other.thermals.is_empty() {
            self.thermals.extend(other.thermals);
            sort_thermals(&mut self.thermals);
        }
        self.provenance.merge(other.provenance);
    }

    pub fn glide_counts(&self) -> Vec<usize> {
        self.glide_points.iter().map(Vec::len).collect()
    }

    pub fn low_confidence_bins(&self) -> Vec<usize> {
        self.glide_points
            .iter()
            .enumerate()
            .filter(|(_, points)| points.len() < self.min_bin_samples)
            .map(|(bin, _)| bin)
            .collect()
    }

    pub fn bin_summaries(&self) -> Vec<BinSummary> {
        self.glide_points
            .iter()
            .enumerate()
            .map(|(bin, points)| {
                let (low, high) = self.bins.bounds(bin);
                let column = |f: fn(&GlidePoint) -> f64| -> Vec<f64> {
                    points.iter().map(f).collect()
                };
                BinSummary {
                    index: bin,
                    label: self.bins.label(bin),
                    low,
                    high,
                    centre: self.bins.centre(bin),
                    count: points.len(),
                    low_confidence: points.len() < self.min_bin_samples,
                    glide_ratio: describe(&column(|p| p.glide_ratio)),
                    climb_rate: describe(&column(|p| p.climb_rate)),
                    gps_climb_rate: describe(&column(|p| p.gps_climb_rate)),
                }
            })
            .collect()
    }

    /// All retained glide ratios, ascending.
    pub fn retained_glide_ratios(&self) -> Vec<f64> {
        let mut ratios: Vec<f64> = self
            .glide_points
            .iter()
            .flatten()
            .map(|p| p.glide_ratio)
            .collect();
        ratios.sort_by(f64::total_cmp);
        ratios
    }

    /// For each threshold, the fraction of retained glides reaching it.
    pub fn glide_success_curve(&self, thresholds: &[f64]) -> Vec<(f64, f64)> {
        let ratios = self.retained_glide_ratios();
        let n = ratios.len();
        thresholds
            .iter()
            .map(|&t| {
                if n == 0 {
                    return (t, 0.0);
                }
                let below = ratios.partition_point(|r| *r < t);
                (t, (n - below) as f64 / n as f64)
            })
            .collect()
    }
}

fn cmp_thermal_segment(a: &ThermalSegment, b: &ThermalSegment) -> Ordering {
    a.source
        .cmp(&b.source)
        .then(a.start_index.cmp(&b.start_index))
        .then(a.end_index.cmp(&b.end_index))
        .then(a.start_time_s.cmp(&b.start_time_s))
        .then(a.duration_s.cmp(&b.duration_s))
        .then(a.direction.cmp(&b.direction))
        .then(a.height_gain_m.total_cmp(&b.height_gain_m))
        .then(a.turn_count.total_cmp(&b.turn_count))
        .then(a.avg_turn_rate.total_cmp(&b.avg_turn_rate))
        .then(a.avg_climb_rate.total_cmp(&b.avg_climb_rate))
        .then(a.avg_gps_climb_rate.total_cmp(&b.avg_gps_climb_rate))
}

fn sort_thermals(thermals: &mut [ThermalSegment]) {
    thermals.sort_by(cmp_thermal_segment);
}
