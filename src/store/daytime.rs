//! Wall-clock time-of-day values for queue schedule windows.
//!
//! Stored in the database as `HH:MM:SS` text. A window is the half-open
//! interval `[start, end)`; when `end < start` the window wraps midnight, and
//! `start == end` denotes an empty window.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};
use thiserror::Error;

/// Errors produced when parsing or validating a time-of-day value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DayTimeError {
    /// The string did not have the `HH:MM:SS` shape.
    #[error("invalid time format: {0:?}, expected HH:MM:SS")]
    Format(String),

    /// A component was outside its valid range.
    #[error("{component} must be between 0 and {max}, got {value}")]
    OutOfRange {
        /// Which component was invalid (`hour`, `minute`, `second`).
        component: &'static str,
        /// Maximum permitted value for the component.
        max: u8,
        /// The offending value.
        value: i64,
    },
}

/// A wall-clock time of day with second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayTime {
    hour: u8,
    minute: u8,
    second: u8,
}

impl DayTime {
    /// Creates a time-of-day value, validating each component.
    ///
    /// # Errors
    ///
    /// Returns [`DayTimeError::OutOfRange`] when a component is out of range.
    pub fn new(hour: u8, minute: u8, second: u8) -> Result<Self, DayTimeError> {
        if hour > 23 {
            return Err(DayTimeError::OutOfRange {
                component: "hour",
                max: 23,
                value: i64::from(hour),
            });
        }
        if minute > 59 {
            return Err(DayTimeError::OutOfRange {
                component: "minute",
                max: 59,
                value: i64::from(minute),
            });
        }
        if second > 59 {
            return Err(DayTimeError::OutOfRange {
                component: "second",
                max: 59,
                value: i64::from(second),
            });
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Seconds elapsed since midnight.
    #[must_use]
    pub fn seconds_of_day(&self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60 + u32::from(self.second)
    }

    /// Whether `now` falls inside the half-open window `[start, end)`.
    ///
    /// `end < start` is interpreted as a window wrapping midnight (for
    /// example `22:00:00–06:00:00` is active at 23:00 and at 05:00);
    /// `start == end` is an empty window.
    #[must_use]
    pub fn window_contains(start: Self, end: Self, now: Self) -> bool {
        let (s, e, n) = (
            start.seconds_of_day(),
            end.seconds_of_day(),
            now.seconds_of_day(),
        );
        match s.cmp(&e) {
            std::cmp::Ordering::Equal => false,
            std::cmp::Ordering::Less => s <= n && n < e,
            std::cmp::Ordering::Greater => n >= s || n < e,
        }
    }
}

impl fmt::Display for DayTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl FromStr for DayTime {
    type Err = DayTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(h), Some(m), Some(sec), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DayTimeError::Format(s.to_string()));
        };

        let parse =
            |text: &str| text.parse::<u8>().map_err(|_| DayTimeError::Format(s.to_string()));

        Self::new(parse(h)?, parse(m)?, parse(sec)?)
    }
}

impl Type<Sqlite> for DayTime {
    fn type_info() -> SqliteTypeInfo {
        <&str as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for DayTime {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Text(Cow::Owned(self.to_string())));
        Ok(IsNull::No)
    }
}

impl<'r> Decode<'r, Sqlite> for DayTime {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let text = <&str as Decode<Sqlite>>::decode(value)?;
        Ok(text.parse()?)
    }
}
