// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log severity levels.

use std::fmt;
use std::str::FromStr;

/// Ordinal severity of a log call.
///
/// Ordinals run from 0 (`Default`) to 8 (`Emergency`). Each level renders as
/// its identifier in uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Level {
    /// No assigned level
    #[default]
    Default = 0,
    /// Debug or trace information
    Debug = 1,
    /// Routine information
    Info = 2,
    /// Normal but significant events
    Notice = 3,
    /// Might cause problems
    Warning = 4,
    /// Likely to cause problems
    Error = 5,
    /// Severe problems or brief outage
    Critical = 6,
    /// Needs immediate action
    Alert = 7,
    /// One or more systems are down
    Emergency = 8,
}

impl Level {
    pub const ALL: [Level; 9] = [
        Level::Default,
        Level::Debug,
        Level::Info,
        Level::Notice,
        Level::Warning,
        Level::Error,
        Level::Critical,
        Level::Alert,
        Level::Emergency,
    ];

    /// Canonical uppercase name used in rendered records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Default => "DEFAULT",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Notice => "NOTICE",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
            Level::Alert => "ALERT",
            Level::Emergency => "EMERGENCY",
        }
    }

    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseLevelError(trimmed.to_string()))
    }
}

impl TryFrom<u8> for Level {
    type Error = ParseLevelError;

    fn try_from(ordinal: u8) -> Result<Self, ParseLevelError> {
        Level::ALL
            .get(usize::from(ordinal))
            .copied()
            .ok_or_else(|| ParseLevelError(ordinal.to_string()))
    }
}

/// Name of an arbitrary ordinal; empty for ordinals outside the taxonomy.
#[must_use]
pub fn level_name(ordinal: u8) -> &'static str {
    Level::try_from(ordinal).map_or("", Level::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        let names: Vec<&str> = Level::ALL.iter().map(|l| l.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "DEFAULT",
                "DEBUG",
                "INFO",
                "NOTICE",
                "WARNING",
                "ERROR",
                "CRITICAL",
                "ALERT",
                "EMERGENCY"
            ]
        );
    }

    #[test]
    fn test_ordinals_are_sequential() {
        for (i, level) in Level::ALL.iter().enumerate() {
            assert_eq!(usize::from(level.ordinal()), i);
            assert_eq!(Level::try_from(i as u8), Ok(*level));
        }
        assert!(Level::try_from(9).is_err());
        assert_eq!(
            Level::try_from(200u8),
            Err(ParseLevelError("200".to_string()))
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("warning".parse::<Level>(), Ok(Level::Warning));
        assert_eq!(" Info ".parse::<Level>(), Ok(Level::Info));
        assert_eq!("EMERGENCY".parse::<Level>(), Ok(Level::Emergency));
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_unknown_ordinal_name_is_empty() {
        assert_eq!(level_name(2), "INFO");
        assert_eq!(level_name(42), "");
    }

    #[test]
    fn test_ordering_follows_severity() {
        assert!(Level::Debug < Level::Error);
        assert!(Level::Alert < Level::Emergency);
        assert_eq!(Level::default(), Level::Default);
    }
}
