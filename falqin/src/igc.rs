//! IGC flight-recorder log parsing: `B` position records plus the few `H`
//! header fields the analysis reports on.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::AnalysisError;

const B_RECORD_MIN_LEN: usize = 35;
const SECONDS_PER_DAY: u32 = 86_400;
/// A backwards clock step from at least 23:00 to before 01:00 is a UTC
/// midnight rollover; any other backwards step is a bad fix.
const ROLLOVER_LATE_S: u32 = 23 * 3600;
const ROLLOVER_EARLY_S: u32 = 3600;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FixValidity {
    /// `A`: 3D GNSS fix.
    ThreeD,
    /// `V`: 2D fix or no GNSS data.
    NoThreeD,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    /// Seconds since UTC midnight of the flight date; later days add 86 400.
    pub time_s: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub pressure_altitude: f64,
    pub gps_altitude: f64,
    pub validity: FixValidity,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MalformedRecord {
    pub line: usize,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseReport {
    pub lines: usize,
    pub b_records: usize,
    pub malformed: Vec<MalformedRecord>,
    /// Fixes dropped because their time did not advance.
    pub out_of_order: usize,
    pub void_fixes: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub source: String,
    pub date: Option<NaiveDate>,
    pub pilot: Option<String>,
    pub glider_type: Option<String>,
    pub glider_id: Option<String>,
    pub fixes: Vec<Fix>,
    pub report: ParseReport,
}

impl Track {
    pub fn new(source: impl Into<String>, fixes: Vec<Fix>) -> Self {
        Self {
            source: source.into(),
            date: None,
            pilot: None,
            glider_type: None,
            glider_id: None,
            fixes,
            report: ParseReport::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let first = self.fixes.first()?;
        fix_timestamp(self.date?, first)
    }

    pub fn duration_s(&self) -> u32 {
        match (self.fixes.first(), self.fixes.last()) {
            (Some(a), Some(b)) => b.time_s.saturating_sub(a.time_s),
            _ => 0,
        }
    }

    /// Loggers without a barometric sensor write zero pressure altitude.
    pub fn has_pressure_altitude(&self) -> bool {
        self.fixes.iter().any(|f| f.pressure_altitude != 0.0)
    }
}

pub fn fix_timestamp(date: NaiveDate, fix: &Fix) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight) + Duration::seconds(i64::from(fix.time_s)))
}

/// Parse one IGC log. Malformed `B` records are dropped and tallied in the
/// track's [`ParseReport`]; the call only fails when the content is not an
/// IGC log at all or leaves no usable fix.
pub fn parse_records(input: &[u8], source: &str) -> Result<Track, AnalysisError> {
    let text = String::from_utf8_lossy(input);
    let mut track = Track::new(source, Vec::new());
    let mut saw_header = false;
    let mut saw_position = false;
    let mut day_offset = 0u32;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        track.report.lines += 1;
        match line.as_bytes().first() {
            Some(b'A') => saw_header = true,
            Some(b'H') => parse_header(line, &mut track),
            Some(b'B') => {
                saw_position = true;
                track.report.b_records += 1;
                let fix = match parse_b_record(line) {
                    Ok(fix) => fix,
                    Err(reason) => {
                        track.report.malformed.push(MalformedRecord {
                            line: idx + 1,
                            reason: reason.to_string(),
                        });
                        continue;
                    }
                };
                let time_of_day = fix.time_s;
                let mut fix = Fix {
                    time_s: time_of_day + day_offset,
                    ..fix
                };
                if let Some(prev) = track.fixes.last() {
                    if fix.time_s <= prev.time_s
                        && prev.time_s % SECONDS_PER_DAY >= ROLLOVER_LATE_S
                        && time_of_day < ROLLOVER_EARLY_S
                    {
                        day_offset += SECONDS_PER_DAY;
                        fix.time_s += SECONDS_PER_DAY;
                    }
                    if fix.time_s <= prev.time_s {
                        track.report.out_of_order += 1;
                        continue;
                    }
                }
                if fix.validity == FixValidity::NoThreeD {
                    track.report.void_fixes += 1;
                }
                track.fixes.push(fix);
            }
            _ => {}
        }
    }

    if !saw_header && !saw_position {
        return Err(AnalysisError::UnsupportedFormat(source.to_string()));
    }
    if track.fixes.is_empty() {
        return Err(AnalysisError::NoFixes(source.to_string()));
    }
    Ok(track)
}

fn parse_b_record(line: &str) -> Result<Fix, &'static str> {
    let bytes = line.as_bytes();
    if bytes.len() < B_RECORD_MIN_LEN {
        return Err("record shorter than 35 bytes");
    }
    if !bytes[..B_RECORD_MIN_LEN].is_ascii() {
        return Err("non-ASCII bytes in fixed fields");
    }

    let hh = parse_digits(&line[1..3]).ok_or("bad hour")?;
    let mm = parse_digits(&line[3..5]).ok_or("bad minute")?;
    let ss = parse_digits(&line[5..7]).ok_or("bad second")?;
    if hh > 23 || mm > 59 || ss > 59 {
        return Err("time out of range");
    }

    let latitude = parse_coordinate(&line[7..14], 2, bytes[14], b'N', b'S')
        .ok_or("bad latitude")?;
    if latitude.abs() > 90.0 {
        return Err("latitude out of range");
    }
    let longitude = parse_coordinate(&line[15..23], 3, bytes[23], b'E', b'W')
        .ok_or("bad longitude")?;
    if longitude.abs() > 180.0 {
        return Err("longitude out of range");
    }

    let validity = match bytes[24] {
        b'A' => FixValidity::ThreeD,
        b'V' => FixValidity::NoThreeD,
        _ => return Err("bad fix validity flag"),
    };
    let pressure_altitude = parse_altitude(&line[25..30]).ok_or("bad pressure altitude")?;
    let gps_altitude = parse_altitude(&line[30..35]).ok_or("bad GNSS altitude")?;

    Ok(Fix {
        time_s: hh * 3600 + mm * 60 + ss,
        latitude,
        longitude,
        pressure_altitude,
        gps_altitude,
        validity,
    })
}

/// `DDMMmmm` / `DDDMMmmm`: degrees, minutes, thousandths of a minute.
fn parse_coordinate(
    field: &str,
    degree_digits: usize,
    hemisphere: u8,
    positive: u8,
    negative: u8,
) -> Option<f64> {
    let degrees = parse_digits(&field[..degree_digits])?;
    let minutes = parse_digits(&field[degree_digits..degree_digits + 2])?;
    let thousandths = parse_digits(&field[degree_digits + 2..])?;
    if minutes >= 60 {
        return None;
    }
    let value = degrees as f64 + (minutes as f64 + thousandths as f64 / 1000.0) / 60.0;
    match hemisphere {
        h if h == positive => Some(value),
        h if h == negative => Some(-value),
        _ => None,
    }
}

fn parse_altitude(field: &str) -> Option<f64> {
    let digits = field.strip_prefix('-').unwrap_or(field);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse::<i32>().ok().map(f64::from)
}

fn parse_digits(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn parse_header(line: &str, track: &mut Track) {
    let Some(code) = line.get(2..5) else {
        return;
    };
    let rest = line.get(5..).unwrap_or("");
    match code {
        "DTE" => {
            let value = rest.strip_prefix("DATE:").unwrap_or(rest).trim_start();
            track.date = value.get(..6).and_then(parse_ddmmyy);
        }
        "PLT" => track.pilot = header_value(rest),
        "GTY" => track.glider_type = header_value(rest),
        "GID" => track.glider_id = header_value(rest),
        _ => {}
    }
}

fn header_value(rest: &str) -> Option<String> {
    let value = rest.rsplit(':').next().unwrap_or(rest).trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_ddmmyy(field: &str) -> Option<NaiveDate> {
    let day = parse_digits(field.get(0..2)?)?;
    let month = parse_digits(field.get(2..4)?)?;
    let yy = parse_digits(field.get(4..6)?)? as i32;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "AXCT7a8b9c0d\r\n\
HFDTEDATE:150719,01\r\n\
HFPLTPILOTINCHARGE:Jane Doe\r\n\
HFGTYGLIDERTYPE:Ozone Zeno\r\n\
HFGIDGLIDERID:\r\n\
B1101354728234N01036567EA0123401300\r\n\
B1101364728240S01036570WA-001201310\r\n\
B1101364728250N01036580EA0123601320\r\n\
B11013X4728250N01036580EA0123601320\r\n\
B110138472\r\n\
B1101394760250N01036580EA0123601320\r\n\
B1101404728260N01036590EV0123801330\r\n\
LXCTsome comment\r\n";

    #[test]
    fn parses_headers_and_fixes() {
        let track = parse_records(SAMPLE.as_bytes(), "sample.igc").unwrap();
        assert_eq!(track.source, "sample.igc");
        assert_eq!(track.date, NaiveDate::from_ymd_opt(2019, 7, 15));
        assert_eq!(track.pilot.as_deref(), Some("Jane Doe"));
        assert_eq!(track.glider_type.as_deref(), Some("Ozone Zeno"));
        assert_eq!(track.glider_id, None);

        assert_eq!(track.len(), 3);
        let first = track.fixes[0];
        assert_eq!(first.time_s, 11 * 3600 + 60 + 35);
        assert!((first.latitude - (47.0 + 28.234 / 60.0)).abs() < 1e-12);
        assert!((first.longitude - (10.0 + 36.567 / 60.0)).abs() < 1e-12);
        assert_eq!(first.pressure_altitude, 1234.0);
        assert_eq!(first.gps_altitude, 1300.0);

        let second = track.fixes[1];
        assert!(second.latitude < 0.0);
        assert!(second.longitude < 0.0);
        assert_eq!(second.pressure_altitude, -12.0);

        assert_eq!(track.fixes[2].validity, FixValidity::NoThreeD);
    }

    #[test]
    fn tallies_dropped_records() {
        let track = parse_records(SAMPLE.as_bytes(), "sample.igc").unwrap();
        let report = &track.report;
        assert_eq!(report.b_records, 7);
        assert_eq!(report.out_of_order, 1);
        assert_eq!(report.void_fixes, 1);
        // bad second, short record, minutes >= 60
        let lines: Vec<usize> = report.malformed.iter().map(|m| m.line).collect();
        assert_eq!(lines, vec![9, 10, 11]);
    }

    #[test]
    fn midnight_rollover_keeps_time_increasing() {
        let log = "AXXX\n\
HFDTE311219\n\
B2359584728234N01036567EA0123401300\n\
B2359594728234N01036567EA0123401300\n\
B0000004728234N01036567EA0123401300\n\
B0000014728234N01036567EA0123401300\n";
        let track = parse_records(log.as_bytes(), "night.igc").unwrap();
        let times: Vec<u32> = track.fixes.iter().map(|f| f.time_s).collect();
        assert_eq!(times, vec![86_398, 86_399, 86_400, 86_401]);
        assert_eq!(track.duration_s(), 3);
        let start = track.start_time().unwrap();
        assert_eq!(start.to_rfc3339(), "2019-12-31T23:59:58+00:00");
    }

    #[test]
    fn backwards_glitch_is_dropped_not_rolled_over() {
        let log = "AXXX\n\
HFDTE150623\n\
B1400004728234N01036567EA0123401300\n\
B1400014728234N01036567EA0123401300\n\
B0100004728234N01036567EA0123401300\n\
B1400024728234N01036567EA0123401300\n\
B1400034728234N01036567EA0123401300\n";
        let track = parse_records(log.as_bytes(), "glitch.igc").unwrap();
        let times: Vec<u32> = track.fixes.iter().map(|f| f.time_s).collect();
        assert_eq!(times, vec![50_400, 50_401, 50_402, 50_403]);
        assert_eq!(track.report.out_of_order, 1);
        assert_eq!(track.duration_s(), 3);
    }

    #[test]
    fn duration_of_unordered_fixes_does_not_underflow() {
        let fix = |time_s| Fix {
            time_s,
            latitude: 47.0,
            longitude: 10.0,
            pressure_altitude: 1000.0,
            gps_altitude: 1000.0,
            validity: FixValidity::ThreeD,
        };
        let track = Track::new("hand-built", vec![fix(100), fix(40)]);
        assert_eq!(track.duration_s(), 0);
    }

    #[test]
    fn rejects_non_igc_content() {
        let err = parse_records(b"hello\nworld\n", "notes.txt").unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat(_)));
    }

    #[test]
    fn recognized_log_without_fixes_is_no_fixes() {
        let err = parse_records(b"AXXX\nHFDTE010120\nB12\n", "empty.igc").unwrap_err();
        assert!(matches!(err, AnalysisError::NoFixes(_)));
    }

    #[test]
    fn detects_missing_pressure_altitude() {
        let log = "AXXX\n\
B1000004728234N01036567EA0000001300\n\
B1000014728234N01036567EA0000001301\n";
        let track = parse_records(log.as_bytes(), "nobaro.igc").unwrap();
        assert!(!track.has_pressure_altitude());
    }
}
