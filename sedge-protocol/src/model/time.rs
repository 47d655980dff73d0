use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::OutOfRangeError;

/// Microseconds between the unix epoch and 2000-01-01T00:00:00Z.
const POSTGRES_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;
const MICROS_PER_DAY: u64 = 86_400_000_000;

/// A point in time, stored as microseconds since 2000-01-01T00:00:00Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime {
    pub(crate) micros: i64,
}

/// A calendar date and time without a timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDatetime {
    pub(crate) micros: i64,
}

/// A calendar date, stored as days since 2000-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDate {
    pub(crate) days: i32,
}

/// A time of day, microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime {
    pub(crate) micros: u64,
}

/// An absolute time span in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    pub(crate) micros: i64,
}

/// A calendar-aware time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelativeDuration {
    pub(crate) micros: i64,
    pub(crate) days: i32,
    pub(crate) months: i32,
}

/// A time span measured in whole days and months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateDuration {
    pub(crate) days: i32,
    pub(crate) months: i32,
}

impl Datetime {
    pub const MIN: Datetime = Datetime { micros: i64::MIN };
    pub const MAX: Datetime = Datetime { micros: i64::MAX };

    pub fn from_postgres_micros(micros: i64) -> Datetime {
        Datetime { micros }
    }
    pub fn to_postgres_micros(self) -> i64 {
        self.micros
    }
    pub fn from_unix_micros(micros: i64) -> Result<Datetime, OutOfRangeError> {
        let micros = micros
            .checked_sub(POSTGRES_EPOCH_UNIX_MICROS)
            .ok_or(OutOfRangeError)?;
        Ok(Datetime { micros })
    }
    pub fn to_unix_micros(self) -> Result<i64, OutOfRangeError> {
        self.micros
            .checked_add(POSTGRES_EPOCH_UNIX_MICROS)
            .ok_or(OutOfRangeError)
    }
    pub fn now() -> Datetime {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before 1970");
        Datetime::from_unix_micros(since_unix.as_micros() as i64)
            .expect("system clock is in representable range")
    }
}

impl LocalDatetime {
    pub fn from_postgres_micros(micros: i64) -> LocalDatetime {
        LocalDatetime { micros }
    }
    pub fn to_postgres_micros(self) -> i64 {
        self.micros
    }
}

impl LocalDate {
    pub fn from_postgres_days(days: i32) -> LocalDate {
        LocalDate { days }
    }
    pub fn to_postgres_days(self) -> i32 {
        self.days
    }
}

impl LocalTime {
    pub const MIDNIGHT: LocalTime = LocalTime { micros: 0 };

    pub fn try_from_micros(micros: u64) -> Result<LocalTime, OutOfRangeError> {
        if micros < MICROS_PER_DAY {
            Ok(LocalTime { micros })
        } else {
            Err(OutOfRangeError)
        }
    }
    pub fn to_micros(self) -> u64 {
        self.micros
    }
}

impl Duration {
    pub const ZERO: Duration = Duration { micros: 0 };

    pub fn from_micros(micros: i64) -> Duration {
        Duration { micros }
    }
    pub fn micros(self) -> i64 {
        self.micros
    }
    pub fn is_negative(self) -> bool {
        self.micros < 0
    }
    pub fn abs_duration(self) -> std::time::Duration {
        std::time::Duration::from_micros(self.micros.unsigned_abs())
    }
}

impl TryFrom<std::time::Duration> for Duration {
    type Error = OutOfRangeError;
    fn try_from(value: std::time::Duration) -> Result<Duration, OutOfRangeError> {
        let micros = i64::try_from(value.as_micros()).map_err(|_| OutOfRangeError)?;
        Ok(Duration { micros })
    }
}

impl RelativeDuration {
    pub fn try_new(months: i32, days: i32, micros: i64) -> RelativeDuration {
        RelativeDuration {
            months,
            days,
            micros,
        }
    }
    pub fn months(self) -> i32 {
        self.months
    }
    pub fn days(self) -> i32 {
        self.days
    }
    pub fn micros(self) -> i64 {
        self.micros
    }
}

impl DateDuration {
    pub fn new(months: i32, days: i32) -> DateDuration {
        DateDuration { months, days }
    }
    pub fn months(self) -> i32 {
        self.months
    }
    pub fn days(self) -> i32 {
        self.days
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let micros = self.micros.unsigned_abs();
        if self.micros < 0 {
            write!(f, "-")?;
        }
        let secs = micros / 1_000_000;
        let sub = micros % 1_000_000;
        if sub == 0 {
            write!(f, "PT{secs}S")
        } else {
            let text = format!("{sub:06}");
            write!(f, "PT{}.{}S", secs, text.trim_end_matches('0'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_epoch_conversions() {
        let dt = Datetime::from_unix_micros(POSTGRES_EPOCH_UNIX_MICROS).unwrap();
        assert_eq!(dt.to_postgres_micros(), 0);
        assert_eq!(dt.to_unix_micros().unwrap(), POSTGRES_EPOCH_UNIX_MICROS);
    }

    #[test]
    fn local_time_bounds() {
        assert!(LocalTime::try_from_micros(0).is_ok());
        assert!(LocalTime::try_from_micros(MICROS_PER_DAY - 1).is_ok());
        assert_eq!(
            LocalTime::try_from_micros(MICROS_PER_DAY),
            Err(OutOfRangeError)
        );
    }

    #[test]
    fn duration_display() {
        assert_eq!(Duration::from_micros(1_000_000).to_string(), "PT1S");
        assert_eq!(Duration::from_micros(-1_500_000).to_string(), "-PT1.5S");
    }
}
