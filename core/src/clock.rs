//! Generator clock: wall time in the bank's timezone, or a simulated
//! clock that advances by a fixed step per event (tests, backfills).

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Jakarta, UTC+07:00.
pub const DEFAULT_TZ_OFFSET_MINUTES: i32 = 420;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrxClock {
    Wall {
        offset: FixedOffset,
    },
    Simulated {
        current: NaiveDateTime,
        step: Duration,
    },
}

impl TrxClock {
    pub fn wall(offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self::Wall { offset }
    }

    pub fn simulated(start: NaiveDateTime, step: Duration) -> Self {
        Self::Simulated { current: start, step }
    }

    /// Local timestamp for the next event. A simulated clock advances
    /// by its step after every call.
    pub fn next_timestamp(&mut self) -> NaiveDateTime {
        match self {
            Self::Wall { offset } => {
                let now: DateTime<FixedOffset> = Utc::now().with_timezone(offset);
                now.naive_local()
            }
            Self::Simulated { current, step } => {
                let ts = *current;
                *current += *step;
                ts
            }
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated { .. })
    }
}

/// Serializable clock selection carried in generator config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    #[default]
    Wall,
    Simulated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn simulated_clock_steps_per_event() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let mut clock = TrxClock::simulated(start, Duration::seconds(30));
        assert_eq!(clock.next_timestamp(), start);
        assert_eq!(clock.next_timestamp(), start + Duration::seconds(30));
        assert!(clock.is_simulated());
    }

    #[test]
    fn invalid_offset_falls_back_to_utc() {
        let clock = TrxClock::wall(100_000);
        assert_eq!(
            clock,
            TrxClock::Wall {
                offset: FixedOffset::east_opt(0).unwrap()
            }
        );
    }
}
