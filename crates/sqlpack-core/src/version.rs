//! Migration version tokens.
//!
//! A version is a 12-digit `YYYYMMDDHHmm` timestamp taken from the script
//! filename. It is both the ordering key and the identity recorded in the
//! ledger.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Number of digits in a version token.
pub const VERSION_DIGITS: usize = 12;

const VERSION_FORMAT: &str = "%Y%m%d%H%M";

/// A validated `YYYYMMDDHHmm` migration version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Version(u64);

impl Version {
    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the timestamp this version encodes.
    #[must_use]
    pub fn timestamp(self) -> NaiveDateTime {
        // Every constructed Version was validated against VERSION_FORMAT.
        NaiveDateTime::parse_from_str(&self.to_string(), VERSION_FORMAT)
            .unwrap_or_default()
    }
}

/// Why a string is not a valid version token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidVersion {
    /// Wrong number of characters.
    #[error("expected {VERSION_DIGITS} digits (YYYYMMDDHHmm), got {0} characters")]
    Length(usize),

    /// Contains something other than ASCII digits.
    #[error("expected only digits (YYYYMMDDHHmm)")]
    NotNumeric,

    /// Digits do not form a real date and time.
    #[error("'{0}' is not a valid YYYYMMDDHHmm timestamp")]
    NotATimestamp(String),
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let length = s.chars().count();
        if length != VERSION_DIGITS {
            return Err(InvalidVersion::Length(length));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidVersion::NotNumeric);
        }
        NaiveDateTime::parse_from_str(s, VERSION_FORMAT)
            .map_err(|_| InvalidVersion::NotATimestamp(s.to_string()))?;
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| InvalidVersion::NotNumeric)
    }
}

impl TryFrom<u64> for Version {
    type Error = InvalidVersion;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        format!("{value:012}").parse()
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012}", self.0)
    }
}
