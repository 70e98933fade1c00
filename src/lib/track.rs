use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    igc::FlightLog,
    marker::Marker,
    sequencer::track_key,
    store::DocumentStore,
};

/// A stored flight track. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(rename = "H_date")]
    pub h_date: DateTime<Utc>,
    pub pilot: String,
    pub glider: String,
    pub glider_id: String,
    pub track_length: String,
    /// Original encoded input the track was decoded from.
    #[serde(rename = "track_src_url")]
    pub source: String,
    pub timestamp: Marker,
}

impl Track {
    pub fn from_log(
        id: String,
        marker: Marker,
        log: &FlightLog,
        source: String,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let h_date = log
            .date
            .map(|date| {
                date.and_time(log.first_fix_time().unwrap_or_default())
                    .and_utc()
            })
            .unwrap_or(submitted_at);
        Self {
            id,
            h_date,
            pilot: log.pilot.clone(),
            glider: log.glider.clone(),
            glider_id: log.glider_id.clone(),
            track_length: format!("{:.2}", log.path_length()),
            source,
            timestamp: marker,
        }
    }

    pub fn field(&self, field: TrackField) -> String {
        match field {
            TrackField::Pilot => self.pilot.clone(),
            TrackField::Glider => self.glider.clone(),
            TrackField::GliderId => self.glider_id.clone(),
            TrackField::TrackLength => self.track_length.clone(),
            TrackField::HDate => self.h_date.to_rfc3339(),
            TrackField::TrackSrcUrl => self.source.clone(),
        }
    }
}

/// Single-field projections exposed as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackField {
    Pilot,
    Glider,
    GliderId,
    TrackLength,
    HDate,
    TrackSrcUrl,
}

impl TrackField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackField::Pilot => "pilot",
            TrackField::Glider => "glider",
            TrackField::GliderId => "glider_id",
            TrackField::TrackLength => "track_length",
            TrackField::HDate => "H_date",
            TrackField::TrackSrcUrl => "track_src_url",
        }
    }
}

impl fmt::Display for TrackField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pilot" => Ok(TrackField::Pilot),
            "glider" => Ok(TrackField::Glider),
            "glider_id" => Ok(TrackField::GliderId),
            "track_length" => Ok(TrackField::TrackLength),
            "H_date" => Ok(TrackField::HDate),
            "track_src_url" => Ok(TrackField::TrackSrcUrl),
            other => Err(format!("unknown track field '{other}'")),
        }
    }
}

/// Resolves a sequence position to its stored track. Storage failures are
/// logged and reported as an unresolved position.
pub fn resolve_position(store: &dyn DocumentStore<Track>, position: u64) -> Option<Track> {
    let key = track_key(position);
    match store.find(&key) {
        Ok(track) => track,
        Err(err) => {
            warn!(target: "paragliding.store", "failed to load track {key}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igc::GeoPoint;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn log_with_date(date: Option<NaiveDate>) -> FlightLog {
        let time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        FlightLog {
            date,
            pilot: "Ann".into(),
            glider: "Ozone".into(),
            glider_id: "OZ-1".into(),
            points: vec![
                GeoPoint {
                    time,
                    latitude: 0.0,
                    longitude: 0.0,
                },
                GeoPoint {
                    time,
                    latitude: 0.0,
                    longitude: 1.0,
                },
            ],
        }
    }

    #[test]
    fn header_date_combines_with_first_fix() {
        let submitted = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let log = log_with_date(NaiveDate::from_ymd_opt(2018, 7, 2));
        let track = Track::from_log(
            "igc1".into(),
            Marker::from_u64(1),
            &log,
            "raw".into(),
            submitted,
        );
        assert_eq!(
            track.h_date,
            Utc.with_ymd_and_hms(2018, 7, 2, 9, 30, 0).unwrap()
        );
        assert_eq!(track.track_length, "111.19");
        assert_eq!(track.field(TrackField::TrackSrcUrl), "raw");
        assert_eq!(track.field(TrackField::GliderId), "OZ-1");
    }

    #[test]
    fn missing_header_date_uses_submission_time() {
        let submitted = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let track = Track::from_log(
            "igc2".into(),
            Marker::from_u64(2),
            &log_with_date(None),
            String::new(),
            submitted,
        );
        assert_eq!(track.h_date, submitted);
        assert_eq!(track.field(TrackField::HDate), "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn field_names_match_the_json_keys() {
        for name in [
            "pilot",
            "glider",
            "glider_id",
            "track_length",
            "H_date",
            "track_src_url",
        ] {
            let field: TrackField = name.parse().unwrap();
            assert_eq!(field.as_str(), name);
        }
        assert!("altitude".parse::<TrackField>().is_err());
    }
}
