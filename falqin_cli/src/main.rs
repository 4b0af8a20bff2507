use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use falqin::aggregate::glide_ratio;
use falqin::pipeline::load_track;
use falqin::stats::Describe;
use falqin::{
    linspace, run_folder, run_single, AggregateResult, AltitudeSource, AnalysisConfig,
    BinSummary, FlightAnalysis, FlightState, Provenance, TracingProgress, Track,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Glide polar and thermal statistics from IGC flight logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify flight phases and build speed-binned glide statistics
    Analyze(AnalyzeArgs),
    /// Report header fields, record counts and parser drops for IGC files
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// IGC file, or a directory of IGC files with `--folder`
    #[arg(value_hint = ValueHint::AnyPath)]
    input: PathBuf,

    /// Treat INPUT as a directory and aggregate every .igc file in it
    #[arg(long, action = ArgAction::SetTrue)]
    folder: bool,

    /// JSON configuration file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Rolling window length in fixes
    #[arg(long)]
    window: Option<usize>,

    /// Speed bin edges in m/s (comma separated, strictly increasing)
    #[arg(long, conflicts_with = "bin_range")]
    speed_bins: Option<String>,

    /// Equal-width speed bins as `low,high,count`
    #[arg(long)]
    bin_range: Option<String>,

    /// Discard glide ratios above this
    #[arg(long)]
    ld_max: Option<f64>,

    /// Bins with fewer retained glides are flagged low-confidence
    #[arg(long)]
    min_bin_samples: Option<usize>,

    /// Altitude channel for climb rates
    #[arg(long, value_enum)]
    altitude_source: Option<AltitudeSourceOpt>,

    /// Turn-rate threshold in deg/s
    #[arg(long)]
    heading_rate_threshold: Option<f64>,

    /// Minimum ground speed for gliding in m/s
    #[arg(long)]
    ground_speed_threshold: Option<f64>,

    /// Per-bin summary CSV (`-` for stdout)
    #[arg(short, long, default_value = "speed_bins.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Classified samples CSV (single-file mode only)
    #[arg(long, value_hint = ValueHint::FilePath)]
    samples: Option<PathBuf>,

    /// Thermal (climb rate, turn rate) pairs CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    thermal_points: Option<PathBuf>,

    /// Detected thermals CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    thermals: Option<PathBuf>,

    /// Retained glide points per bin CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    glide_points: Option<PathBuf>,

    /// Turn rate vs climb rate histogram CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    heatmap: Option<PathBuf>,

    /// Heatmap resolution as `turn_bins,climb_bins`
    #[arg(long, default_value = "20,20")]
    heatmap_bins: String,

    /// Glide success curve CSV (share of glides reaching each ratio)
    #[arg(long, value_hint = ValueHint::FilePath)]
    success_curve: Option<PathBuf>,

    /// Threshold step for the success curve
    #[arg(long, default_value_t = 0.5)]
    success_step: f64,

    /// Run summary JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary: Option<PathBuf>,

    /// Report stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// IGC files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Report output path
    #[arg(short, long, default_value = "inspect.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AltitudeSourceOpt {
    Auto,
    Pressure,
    Gps,
}

impl From<AltitudeSourceOpt> for AltitudeSource {
    fn from(value: AltitudeSourceOpt) -> Self {
        match value {
            AltitudeSourceOpt::Auto => AltitudeSource::Auto,
            AltitudeSourceOpt::Pressure => AltitudeSource::Pressure,
            AltitudeSourceOpt::Gps => AltitudeSource::Gps,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Analyze(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn build_config(args: &AnalyzeArgs) -> Result<AnalysisConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(window) = args.window {
        config.avg_window = window;
    }
    if let Some(edges) = args.speed_bins.as_ref() {
        config.speed_bins = parse_float_list(edges)?;
    }
    if let Some(range) = args.bin_range.as_ref() {
        config.speed_bins = parse_bin_range(range)?;
    }
    if let Some(ld_max) = args.ld_max {
        config.ld_max = ld_max;
    }
    if let Some(min) = args.min_bin_samples {
        config.min_bin_samples = min;
    }
    if let Some(source) = args.altitude_source {
        config.altitude_source = source.into();
    }
    if let Some(rate) = args.heading_rate_threshold {
        config.thresholds.heading_rate = rate;
    }
    if let Some(speed) = args.ground_speed_threshold {
        config.thresholds.ground_speed = speed;
    }
    config.validate()?;
    Ok(config)
}

fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid configuration", path.display()))
}

fn parse_float_list(input: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .with_context(|| format!("invalid number '{}'", trimmed))?;
        out.push(value);
    }
    Ok(out)
}

/// `low,high,count` to `count` equal-width bins.
fn parse_bin_range(input: &str) -> Result<Vec<f64>> {
    let parts: Vec<&str> = input.split(',').map(str::trim).collect();
    let [low, high, count] = parts.as_slice() else {
        return Err(anyhow!("--bin-range expects low,high,count"));
    };
    let low: f64 = low
        .parse()
        .with_context(|| format!("invalid bin range start '{}'", low))?;
    let high: f64 = high
        .parse()
        .with_context(|| format!("invalid bin range end '{}'", high))?;
    let count: usize = count
        .parse()
        .with_context(|| format!("invalid bin count '{}'", count))?;
    if count == 0 || !(high > low) {
        return Err(anyhow!("--bin-range needs high > low and at least one bin"));
    }
    Ok(linspace(low, high, count + 1))
}

fn parse_pair(input: &str) -> Result<(usize, usize)> {
    let (a, b) = input
        .split_once(',')
        .ok_or_else(|| anyhow!("expected two comma separated counts, got '{}'", input))?;
    let a: usize = a.trim().parse().with_context(|| format!("invalid count '{}'", a))?;
    let b: usize = b.trim().parse().with_context(|| format!("invalid count '{}'", b))?;
    if a == 0 || b == 0 {
        return Err(anyhow!("histogram bin counts must be > 0"));
    }
    Ok((a, b))
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let config = build_config(&args)?;
    let heatmap_bins = parse_pair(&args.heatmap_bins)?;
    if !(args.success_step > 0.0) {
        return Err(anyhow!("--success-step must be > 0"));
    }

    let t_run = Instant::now();
    let (flight, aggregate) = if args.folder {
        let aggregate = run_folder(&args.input, &config, &TracingProgress)
            .with_context(|| format!("failed to analyse folder {}", args.input.display()))?;
        (None, aggregate)
    } else {
        let run = run_single(&args.input, &config, &TracingProgress)
            .with_context(|| format!("failed to analyse {}", args.input.display()))?;
        (Some(run.flight), run.aggregate)
    };
    if args.profile || args.verbose {
        info!(
            "Analysis stage: {:.1} ms ({} flights)",
            t_run.elapsed().as_secs_f64() * 1000.0,
            aggregate.provenance.flights
        );
    }
    log_provenance(&aggregate.provenance);

    let summaries = aggregate.bin_summaries();
    let low = aggregate.low_confidence_bins();
    if !low.is_empty() {
        warn!(
            "{} of {} speed bins have fewer than {} glide samples",
            low.len(),
            summaries.len(),
            aggregate.min_bin_samples
        );
    }

    let t_out = Instant::now();
    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_bin_rows(&summaries, &mut writer)?;
    } else {
        let mut writer = create_csv(&args.output)?;
        write_bin_rows(&summaries, &mut writer)?;
        info!("Wrote speed bin summary: {}", args.output.display());
    }

    if let Some(path) = args.samples.as_ref() {
        match flight.as_ref() {
            Some(flight) => {
                write_samples_csv(flight, path)?;
                info!("Wrote samples: {}", path.display());
            }
            None => warn!("--samples is ignored in folder mode"),
        }
    }
    if let Some(path) = args.thermal_points.as_ref() {
        write_thermal_points_csv(&aggregate, path)?;
        info!("Wrote thermal points: {}", path.display());
    }
    if let Some(path) = args.thermals.as_ref() {
        write_thermals_csv(&aggregate, path)?;
        info!("Wrote thermals: {}", path.display());
    }
    if let Some(path) = args.glide_points.as_ref() {
        write_glide_points_csv(&aggregate, path)?;
        info!("Wrote glide points: {}", path.display());
    }
    if let Some(path) = args.heatmap.as_ref() {
        if write_heatmap_csv(&aggregate, heatmap_bins, path)? {
            info!("Wrote heatmap: {}", path.display());
        } else {
            warn!("No thermal samples; skipping heatmap {}", path.display());
        }
    }
    if let Some(path) = args.success_curve.as_ref() {
        let thresholds = success_thresholds(aggregate.ld_max, args.success_step);
        write_success_curve_csv(&aggregate, &thresholds, path)?;
        info!("Wrote glide success curve: {}", path.display());
    }
    if let Some(path) = args.summary.as_ref() {
        let summary = RunSummary::new(&args, &config, flight.as_ref(), &aggregate, summaries);
        let text = serde_json::to_string_pretty(&summary)?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote run summary: {}", path.display());
    }
    if args.profile || args.verbose {
        info!(
            "Output stage: {:.1} ms",
            t_out.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

fn log_provenance(p: &Provenance) {
    info!(
        "{} flights, {} samples: {} thermal, {} glide, {} undefined",
        p.flights, p.samples, p.thermal_samples, p.glide_samples, p.undefined_samples
    );
    info!(
        "Glide samples retained {} (no sink {}, above LD max {}, too fast {}, outside bins {})",
        p.retained_glide_samples(),
        p.excluded_no_sink,
        p.excluded_ld_max,
        p.excluded_too_fast,
        p.excluded_out_of_bins
    );
    if p.malformed_records > 0 || p.out_of_order_fixes > 0 {
        info!(
            "Parser dropped {} malformed records and {} out-of-order fixes",
            p.malformed_records, p.out_of_order_fixes
        );
    }
    if p.short_tracks > 0 {
        warn!("{} flights were shorter than the rolling window", p.short_tracks);
    }
    for failure in &p.failed_files {
        warn!("Failed: {} ({})", failure.source, failure.reason);
    }
}

fn create_csv(path: &Path) -> Result<csv::Writer<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(csv::Writer::from_writer(file))
}

fn fmt3(value: f64) -> String {
    format!("{:.3}", value)
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(fmt3).unwrap_or_default()
}

fn describe_cells(d: Option<&Describe>) -> [String; 6] {
    match d {
        Some(d) => [
            fmt3(d.mean),
            fmt3(d.median),
            fmt_opt(d.std_dev),
            fmt3(d.q1),
            fmt3(d.q3),
            fmt3(d.iqr),
        ],
        None => Default::default(),
    }
}

fn write_bin_rows<W: Write>(summaries: &[BinSummary], writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = vec![
        "bin".to_string(),
        "speed_low_mps".into(),
        "speed_high_mps".into(),
        "speed_centre_mps".into(),
        "count".into(),
        "low_confidence".into(),
    ];
    for prefix in ["glide_ratio", "climb_rate", "gps_climb_rate"] {
        for stat in ["mean", "median", "std", "q1", "q3", "iqr"] {
            header.push(format!("{}_{}", prefix, stat));
        }
    }
    writer.write_record(&header)?;

    for s in summaries {
        let mut row = vec![
            s.label.clone(),
            fmt3(s.low),
            fmt3(s.high),
            fmt3(s.centre),
            s.count.to_string(),
            s.low_confidence.to_string(),
        ];
        for d in [&s.glide_ratio, &s.climb_rate, &s.gps_climb_rate] {
            row.extend(describe_cells(d.as_ref()));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_samples_csv(flight: &FlightAnalysis, path: &Path) -> Result<()> {
    let mut writer = create_csv(path)?;
    writer.write_record([
        "index",
        "time_s",
        "latitude",
        "longitude",
        "pressure_altitude_m",
        "gps_altitude_m",
        "ground_speed_mps",
        "heading_deg",
        "heading_rate_dps",
        "climb_rate_mps",
        "smoothed_ground_speed_mps",
        "smoothed_heading_deg",
        "smoothed_heading_rate_dps",
        "smoothed_climb_rate_mps",
        "smoothed_gps_climb_rate_mps",
        "glide_ratio",
        "state",
    ])?;
    for cs in &flight.samples {
        let s = &cs.sample;
        let ratio = match cs.state {
            FlightState::Glide => {
                glide_ratio(s.smoothed.ground_speed, s.smoothed.gps_climb_rate)
            }
            _ => None,
        };
        writer.write_record([
            s.index.to_string(),
            s.time_s().to_string(),
            format!("{:.6}", s.fix.latitude),
            format!("{:.6}", s.fix.longitude),
            fmt3(s.fix.pressure_altitude),
            fmt3(s.fix.gps_altitude),
            fmt_opt(s.ground_speed),
            fmt_opt(s.heading),
            fmt_opt(s.heading_rate),
            fmt_opt(s.climb_rate),
            fmt3(s.smoothed.ground_speed),
            fmt_opt(s.smoothed.heading),
            fmt3(s.smoothed.heading_rate),
            fmt3(s.smoothed.climb_rate),
            fmt3(s.smoothed.gps_climb_rate),
            fmt_opt(ratio),
            cs.state.as_str().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_thermal_points_csv(aggregate: &AggregateResult, path: &Path) -> Result<()> {
    let mut writer = create_csv(path)?;
    writer.write_record(["climb_rate_mps", "heading_rate_dps"])?;
    for p in aggregate.thermal_distribution.points() {
        writer.write_record([fmt3(p.climb_rate), fmt3(p.heading_rate)])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_thermals_csv(aggregate: &AggregateResult, path: &Path) -> Result<()> {
    let mut writer = create_csv(path)?;
    writer.write_record([
        "source",
        "start_index",
        "end_index",
        "start_time_s",
        "duration_s",
        "height_gain_m",
        "turns",
        "avg_turn_rate_dps",
        "direction",
        "avg_climb_rate_mps",
        "avg_gps_climb_rate_mps",
    ])?;
    for t in &aggregate.thermals {
        writer.write_record([
            t.source.clone(),
            t.start_index.to_string(),
            t.end_index.to_string(),
            t.start_time_s.to_string(),
            t.duration_s.to_string(),
            fmt3(t.height_gain_m),
            fmt3(t.turn_count),
            fmt3(t.avg_turn_rate),
            t.direction.as_str().to_string(),
            fmt3(t.avg_climb_rate),
            fmt3(t.avg_gps_climb_rate),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_glide_points_csv(aggregate: &AggregateResult, path: &Path) -> Result<()> {
    let mut writer = create_csv(path)?;
    writer.write_record([
        "bin",
        "ground_speed_mps",
        "glide_ratio",
        "climb_rate_mps",
        "gps_climb_rate_mps",
    ])?;
    for (bin, points) in aggregate.glide_points.iter().enumerate() {
        let label = aggregate.bins.label(bin);
        for p in points {
            writer.write_record([
                label.clone(),
                fmt3(p.ground_speed),
                fmt3(p.glide_ratio),
                fmt3(p.climb_rate),
                fmt3(p.gps_climb_rate),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Returns `false` when there is nothing to bin.
fn write_heatmap_csv(
    aggregate: &AggregateResult,
    (turn_bins, climb_bins): (usize, usize),
    path: &Path,
) -> Result<bool> {
    let Some(hist) = aggregate
        .thermal_distribution
        .histogram(turn_bins, climb_bins)
    else {
        return Ok(false);
    };
    let mut writer = create_csv(path)?;
    writer.write_record([
        "turn_rate_low_dps",
        "turn_rate_high_dps",
        "climb_rate_low_mps",
        "climb_rate_high_mps",
        "count",
    ])?;
    for (i, row) in hist.counts.iter().enumerate() {
        for (j, count) in row.iter().enumerate() {
            writer.write_record([
                fmt3(hist.turn_edges[i]),
                fmt3(hist.turn_edges[i + 1]),
                fmt3(hist.climb_edges[j]),
                fmt3(hist.climb_edges[j + 1]),
                count.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(true)
}

fn success_thresholds(ld_max: f64, step: f64) -> Vec<f64> {
    let count = (ld_max / step).floor() as usize + 1;
    (0..count).map(|i| i as f64 * step).collect()
}

fn write_success_curve_csv(
    aggregate: &AggregateResult,
    thresholds: &[f64],
    path: &Path,
) -> Result<()> {
    let mut writer = create_csv(path)?;
    writer.write_record(["glide_ratio", "fraction_reaching"])?;
    for (t, fraction) in aggregate.glide_success_curve(thresholds) {
        writer.write_record([fmt3(t), format!("{:.4}", fraction)])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct FlightSummary {
    source: String,
    date: Option<NaiveDate>,
    start_time: Option<DateTime<Utc>>,
    pilot: Option<String>,
    glider_type: Option<String>,
    altitude_source: AltitudeSource,
    fixes: usize,
    duration_s: u32,
    thermal_samples: usize,
    glide_samples: usize,
    undefined_samples: usize,
    thermals: usize,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    generated_at: DateTime<Utc>,
    input: String,
    folder: bool,
    config: &'a AnalysisConfig,
    config_hash: &'a str,
    provenance: &'a Provenance,
    flight: Option<FlightSummary>,
    bins: Vec<BinSummary>,
}

impl<'a> RunSummary<'a> {
    fn new(
        args: &AnalyzeArgs,
        config: &'a AnalysisConfig,
        flight: Option<&FlightAnalysis>,
        aggregate: &'a AggregateResult,
        bins: Vec<BinSummary>,
    ) -> Self {
        let flight = flight.map(|f| {
            let (thermal, glide, undefined) = f.state_counts();
            FlightSummary {
                source: f.track.source.clone(),
                date: f.track.date,
                start_time: f.track.start_time(),
                pilot: f.track.pilot.clone(),
                glider_type: f.track.glider_type.clone(),
                altitude_source: f.altitude_source,
                fixes: f.track.len(),
                duration_s: f.track.duration_s(),
                thermal_samples: thermal,
                glide_samples: glide,
                undefined_samples: undefined,
                thermals: f.thermals.len(),
            }
        });
        Self {
            generated_at: Utc::now(),
            input: args.input.display().to_string(),
            folder: args.folder,
            config,
            config_hash: &aggregate.config_hash,
            provenance: &aggregate.provenance,
            flight,
            bins,
        }
    }
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let t_parse = Instant::now();
    let mut sections: Vec<(usize, String)> = args
        .inputs
        .par_iter()
        .enumerate()
        .map(|(idx, path)| {
            let body = match load_track(path) {
                Ok(track) => inspect_track(&track),
                Err(err) => format!("  error: {}\n", err),
            };
            (idx, format!("FILE: {}\n{}\n", path.display(), body))
        })
        .collect();
    sections.sort_by_key(|(idx, _)| *idx);
    if args.verbose {
        info!(
            "Parsed {} files in {:.1} ms",
            sections.len(),
            t_parse.elapsed().as_secs_f64() * 1000.0
        );
    }

    let report: String = sections.into_iter().map(|(_, s)| s).collect();
    fs::write(&args.output, report)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Inspection report written: {}", args.output.display());
    Ok(())
}

fn inspect_track(track: &Track) -> String {
    let mut out = String::new();
    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "n/a".into());
    let r = &track.report;

    out.push_str(&format!(
        "  date: {}\n",
        track.date.map_or("n/a".into(), |d| d.to_string())
    ));
    out.push_str(&format!("  pilot: {}\n", text(&track.pilot)));
    out.push_str(&format!("  glider_type: {}\n", text(&track.glider_type)));
    out.push_str(&format!("  glider_id: {}\n", text(&track.glider_id)));
    out.push_str(&format!("  lines: {}\n", r.lines));
    out.push_str(&format!("  b_records: {}\n", r.b_records));
    out.push_str(&format!("  fixes: {}\n", track.len()));
    out.push_str(&format!("  malformed: {}\n", r.malformed.len()));
    for m in r.malformed.iter().take(10) {
        out.push_str(&format!("    - line {}: {}\n", m.line, m.reason));
    }
    out.push_str(&format!("  out_of_order_dropped: {}\n", r.out_of_order));
    out.push_str(&format!("  void_fixes: {}\n", r.void_fixes));
    if let Some(start) = track.start_time() {
        out.push_str(&format!("  start: {}\n", start.to_rfc3339()));
    }
    out.push_str(&format!("  timespan_s: {}\n", track.duration_s()));
    out.push_str(&format!(
        "  pressure_altitude: {}\n",
        if track.has_pressure_altitude() {
            altitude_range(track.fixes.iter().map(|f| f.pressure_altitude))
        } else {
            "absent".into()
        }
    ));
    out.push_str(&format!(
        "  gps_altitude: {}\n",
        altitude_range(track.fixes.iter().map(|f| f.gps_altitude))
    ));
    out
}

fn altitude_range(values: impl Iterator<Item = f64>) -> String {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo.is_finite() {
        format!("{:.0}..{:.0} m", lo, hi)
    } else {
        "n/a".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_args(extra: &[&str]) -> AnalyzeArgs {
        let mut argv = vec!["falqin", "analyze", "flight.igc"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Analyze(args) => args,
            Command::Inspect(_) => unreachable!(),
        }
    }

    #[test]
    fn flags_override_defaults() {
        let args = analyze_args(&[
            "--window",
            "20",
            "--bin-range",
            "8,12,8",
            "--ld-max",
            "12",
            "--altitude-source",
            "gps",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.avg_window, 20);
        assert_eq!(config.speed_bins.len(), 9);
        assert_eq!(config.speed_bins[1], 8.5);
        assert_eq!(config.ld_max, 12.0);
        assert_eq!(config.altitude_source, AltitudeSource::Gps);
        assert_eq!(config.min_bin_samples, 30);
    }

    #[test]
    fn threshold_flags_override_classifier() {
        let config = build_config(&analyze_args(&[
            "--heading-rate-threshold",
            "12.5",
            "--ground-speed-threshold",
            "4",
        ]))
        .unwrap();
        assert_eq!(config.thresholds.heading_rate, 12.5);
        assert_eq!(config.thresholds.ground_speed, 4.0);

        let defaults = build_config(&analyze_args(&[])).unwrap();
        assert_eq!(defaults.thresholds.heading_rate, 10.0);
        assert_eq!(defaults.thresholds.ground_speed, 3.0);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        assert!(build_config(&analyze_args(&["--window", "0"])).is_err());
        assert!(build_config(&analyze_args(&["--speed-bins", "9,8"])).is_err());
        assert!(Cli::try_parse_from([
            "falqin",
            "analyze",
            "x.igc",
            "--speed-bins",
            "8,9",
            "--bin-range",
            "8,9,2"
        ])
        .is_err());
    }

    #[test]
    fn list_parsers() {
        assert_eq!(parse_float_list("7.5, 8,8.5,").unwrap(), vec![7.5, 8.0, 8.5]);
        assert!(parse_float_list("7.5,x").is_err());
        assert_eq!(parse_bin_range("0,2,4").unwrap(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert!(parse_bin_range("0,2").is_err());
        assert!(parse_bin_range("2,0,4").is_err());
        assert_eq!(parse_pair("20, 10").unwrap(), (20, 10));
        assert!(parse_pair("0,10").is_err());
    }

    #[test]
    fn success_thresholds_cover_ld_max() {
        let t = success_thresholds(14.0, 0.5);
        assert_eq!(t.len(), 29);
        assert_eq!(t[0], 0.0);
        assert_eq!(t[28], 14.0);
    }
}
