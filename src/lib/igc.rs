//! Minimal IGC flight-log decoder.
//!
//! Only the records the service needs are interpreted: the `H` header lines
//! carrying the flight date, pilot, glider type and glider id, and the `B`
//! fix lines carrying time and position. Every other record type is ignored.

use chrono::{NaiveDate, NaiveTime};

use crate::error::{Result, TrackError};

const EARTH_RADIUS_KM: f64 = 6371.0;
const MIN_FIX_LEN: usize = 24;

/// A decoded flight log.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightLog {
    pub date: Option<NaiveDate>,
    pub pilot: String,
    pub glider: String,
    pub glider_id: String,
    pub points: Vec<GeoPoint>,
}

impl FlightLog {
    pub fn first_fix_time(&self) -> Option<NaiveTime> {
        self.points.first().map(|point| point.time)
    }

    pub fn path_length(&self) -> f64 {
        path_length(&self.points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub time: NaiveTime,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometres.
    pub fn distance(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Sum of the distances between consecutive points, in kilometres.
pub fn path_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].distance(&pair[1]))
        .sum()
}

/// Turns raw track-file content into a [`FlightLog`].
pub trait TrackDecoder: Send + Sync {
    fn decode(&self, source: &str) -> Result<FlightLog>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IgcDecoder;

impl TrackDecoder for IgcDecoder {
    fn decode(&self, source: &str) -> Result<FlightLog> {
        let mut log = FlightLog {
            date: None,
            pilot: String::new(),
            glider: String::new(),
            glider_id: String::new(),
            points: Vec::new(),
        };
        let mut recognised = false;

        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }
            match line.as_bytes()[0] {
                b'A' => recognised = true,
                b'H' => {
                    recognised = true;
                    apply_header(&mut log, line, index + 1)?;
                }
                b'B' => {
                    recognised = true;
                    log.points.push(parse_fix(line, index + 1)?);
                }
                _ => {}
            }
        }

        if !recognised {
            return Err(TrackError::MalformedInput(
                "content contains no IGC records".to_string(),
            ));
        }
        Ok(log)
    }
}

fn apply_header(log: &mut FlightLog, line: &str, line_no: usize) -> Result<()> {
    // H + source byte + three-letter subtype, e.g. `HFPLTPILOTINCHARGE: Jane`.
    let Some(subtype) = line.get(2..5) else {
        return Ok(());
    };
    let value = header_value(line);
    match subtype {
        "DTE" => log.date = Some(parse_header_date(line, line_no)?),
        "PLT" => log.pilot = value,
        "GTY" => log.glider = value,
        "GID" => log.glider_id = value,
        _ => {}
    }
    Ok(())
}

fn header_value(line: &str) -> String {
    match line.split_once(':') {
        Some((_, value)) => value.trim().to_string(),
        None => line.get(5..).unwrap_or_default().trim().to_string(),
    }
}

fn parse_header_date(line: &str, line_no: usize) -> Result<NaiveDate> {
    // Both `HFDTE020718` and `HFDTEDATE:020718,01` appear in the wild.
    let digits: String = line
        .get(5..)
        .unwrap_or_default()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 6 {
        return Err(malformed(line_no, "header date must be DDMMYY"));
    }
    let day = number(&digits[0..2], line_no)?;
    let month = number(&digits[2..4], line_no)?;
    let year = number(&digits[4..6], line_no)?;
    let year = if year < 80 { 2000 + year } else { 1900 + year };
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| malformed(line_no, "header date is not a calendar date"))
}

fn parse_fix(line: &str, line_no: usize) -> Result<GeoPoint> {
    if line.len() < MIN_FIX_LEN || !line.is_ascii() {
        return Err(malformed(line_no, "fix record is too short"));
    }

    let hours = number(&line[1..3], line_no)?;
    let minutes = number(&line[3..5], line_no)?;
    let seconds = number(&line[5..7], line_no)?;
    let time = NaiveTime::from_hms_opt(hours, minutes, seconds)
        .ok_or_else(|| malformed(line_no, "fix time is out of range"))?;

    let latitude = coordinate(&line[7..9], &line[9..14], line_no)?;
    let latitude = match &line[14..15] {
        "N" => latitude,
        "S" => -latitude,
        _ => return Err(malformed(line_no, "latitude hemisphere must be N or S")),
    };

    let longitude = coordinate(&line[15..18], &line[18..23], line_no)?;
    let longitude = match &line[23..24] {
        "E" => longitude,
        "W" => -longitude,
        _ => return Err(malformed(line_no, "longitude hemisphere must be E or W")),
    };

    Ok(GeoPoint {
        time,
        latitude,
        longitude,
    })
}

/// Degrees plus `MMmmm` thousandths of minutes.
fn coordinate(degrees: &str, minutes: &str, line_no: usize) -> Result<f64> {
    let degrees = number(degrees, line_no)? as f64;
    let thousandths = number(minutes, line_no)? as f64;
    Ok(degrees + thousandths / 1000.0 / 60.0)
}

fn number(digits: &str, line_no: usize) -> Result<u32> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(line_no, "expected digits"));
    }
    digits
        .parse::<u32>()
        .map_err(|_| malformed(line_no, "expected digits"))
}

fn malformed(line_no: usize, reason: &str) -> TrackError {
    TrackError::MalformedInput(format!("line {line_no}: {reason}"))
}
