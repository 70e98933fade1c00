use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Custom epoch (2018-01-01T00:00:00Z) expressed in milliseconds.
const EPOCH_MILLIS: u64 = 1_514_764_800_000;
const SEQUENCE_BITS: u8 = 16;

/// Produces insertion markers that are strictly increasing for the lifetime of
/// the clock, even when the wall clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct MarkerClock {
    last: u64,
}

impl MarkerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes after `last` so a reloaded clock never repeats a marker.
    pub fn resume(last: Marker) -> Self {
        Self { last: last.0 }
    }

    pub fn next_marker(&mut self) -> Marker {
        let now = current_millis().saturating_sub(EPOCH_MILLIS) << SEQUENCE_BITS;
        let next = if now > self.last {
            now
        } else {
            self.last + 1
        };
        self.last = next;
        Marker(next)
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(EPOCH_MILLIS)
}

/// Opaque ordering token attached to every stored track.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Marker(u64);

impl Marker {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Marker").field(&format_args!("{self}")).finish()
    }
}

impl FromStr for Marker {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16).map(Marker)
    }
}

impl Serialize for Marker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Marker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse::<Marker>()
            .map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}
