use std::fmt;

use chrono::NaiveTime;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wall-clock time accepted as `HH:MM` or `HH:MM:SS` on input,
/// always written back as `HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime(pub NaiveTime);

impl ClockTime {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()
            .map(ClockTime)
    }

    pub fn into_inner(self) -> NaiveTime {
        self.0
    }
}

impl From<NaiveTime> for ClockTime {
    fn from(t: NaiveTime) -> Self {
        ClockTime(t)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.format("%H:%M:%S").to_string())
    }
}

struct ClockTimeVisitor;

impl<'de> Visitor<'de> for ClockTimeVisitor {
    type Value = ClockTime;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a time formatted as HH:MM or HH:MM:SS")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<ClockTime, E> {
        ClockTime::parse(value).ok_or_else(|| E::custom(format!("invalid time '{}'", value)))
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ClockTimeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_short_and_long_forms() {
        let short: ClockTime = serde_json::from_str("\"09:05\"").unwrap();
        let long: ClockTime = serde_json::from_str("\"09:05:00\"").unwrap();
        assert_eq!(short, long);
        assert_eq!(serde_json::to_string(&short).unwrap(), "\"09:05:00\"");
        assert!(serde_json::from_str::<ClockTime>("\"25:00\"").is_err());
    }
}
