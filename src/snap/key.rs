use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KEY_FORMAT: &str = "%Y%m%d-%H%M";
const KEY_LEN: usize = 13;

/// One upstream source, identified by its hour offset from "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    pub fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn label(self) -> String {
        self.to_string()
    }

    /// Slots `0..count` in fetch order.
    pub fn all(count: u8) -> impl Iterator<Item = Slot> {
        (0..count).map(Slot::new)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// `YYYYMMDD-HHMM` name of a stored record. Fixed width, so string order is time order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimestampKey(String);

impl TimestampKey {
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.format(KEY_FORMAT).to_string())
    }

    /// Key for `slot` when the cycle runs at wall-clock `now`.
    pub fn derive(now: NaiveDateTime, slot: Slot) -> Self {
        Self::from_datetime(now - TimeDelta::hours(i64::from(slot.index())))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != KEY_LEN {
            return None;
        }
        let parsed = NaiveDateTime::parse_from_str(raw, KEY_FORMAT).ok()?;
        let key = Self::from_datetime(parsed);
        (key.0 == raw).then_some(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimestampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TimestampKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid timestamp key `{value}`"))
    }
}

impl From<TimestampKey> for String {
    fn from(key: TimestampKey) -> Self {
        key.0
    }
}
