use anyhow::{bail, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

const SECS_PER_MIN: u64 = 60;
const SECS_PER_HOUR: u64 = SECS_PER_MIN * 60;
const SECS_PER_DAY: u64 = SECS_PER_HOUR * 24;

/// One entry of a task's `when` list.
///
/// Serialized as `{"every": {...}}` or `{"daily": "HH:MM[:SS]"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledTime {
    Every(DurationSpec),
    Daily(TimeOfDay),
}

impl ScheduledTime {
    pub fn every(spec: DurationSpec) -> Self {
        ScheduledTime::Every(spec)
    }

    pub fn daily(s: &str) -> Result<Self> {
        Ok(ScheduledTime::Daily(s.parse()?))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ScheduledTime::Every(spec) => match spec.checked_duration() {
                None => bail!("'every' schedule overflows: {spec:?}"),
                Some(duration) if duration.is_zero() => {
                    bail!("'every' schedule must have a non-zero duration")
                }
                Some(_) => Ok(()),
            },
            ScheduledTime::Daily(_) => Ok(()),
        }
    }

    pub fn is_every(&self) -> bool {
        matches!(self, ScheduledTime::Every(_))
    }

    /// Period used for catch-up detection; a daily entry counts as one day.
    pub fn period(&self) -> Duration {
        match self {
            ScheduledTime::Every(spec) => spec.duration(),
            ScheduledTime::Daily(_) => Duration::from_secs(SECS_PER_DAY),
        }
    }

    /// Delay from `now` until the next firing.
    pub fn next_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        match self {
            ScheduledTime::Every(spec) => spec.duration(),
            ScheduledTime::Daily(time) => time.delay_from(now),
        }
    }

    pub fn next_delay_from_now(&self) -> Duration {
        self.next_delay(&Local::now())
    }
}

impl Display for ScheduledTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduledTime::Every(spec) => write!(f, "{spec}"),
            ScheduledTime::Daily(time) => write!(f, "Daily at {time}."),
        }
    }
}

/// A fixed period. `ms-test` is a millisecond component intended for tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(rename = "ms-test", default, skip_serializing_if = "is_zero")]
    pub millis: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl DurationSpec {
    pub fn from_secs(seconds: u64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            millis,
            ..Default::default()
        }
    }

    /// Whole seconds, `None` on overflow.
    pub fn total_secs(&self) -> Option<u64> {
        self.seconds
            .checked_add(self.minutes.checked_mul(SECS_PER_MIN)?)?
            .checked_add(self.hours.checked_mul(SECS_PER_HOUR)?)?
            .checked_add(self.days.checked_mul(SECS_PER_DAY)?)
    }

    pub fn checked_duration(&self) -> Option<Duration> {
        Duration::from_secs(self.total_secs()?).checked_add(Duration::from_millis(self.millis))
    }

    /// The period, saturating at `Duration::MAX`. Validated specs never saturate.
    pub fn duration(&self) -> Duration {
        self.checked_duration().unwrap_or(Duration::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.duration().is_zero()
    }
}

impl Display for DurationSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Every {} days, {} hours, {} minutes, {} seconds; ({} total ms)",
            self.days,
            self.hours,
            self.minutes,
            self.seconds,
            self.duration().as_millis()
        )
    }
}

/// Local wall-clock time of day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOfDay(pub NaiveTime);

impl TimeOfDay {
    /// Delay until the next occurrence of this time at or after `now`.
    pub fn delay_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        let now = now.naive_local();
        let mut next = now.date().and_time(self.0);
        while next < now {
            next += chrono::Duration::days(1);
        }
        (next - now).to_std().unwrap_or_default()
    }
}

impl FromStr for TimeOfDay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let layout = match s.matches(':').count() {
            1 => "%H:%M",
            2 => "%H:%M:%S",
            _ => bail!("time of day does not look like a 24-hour time: '{s}'"),
        };
        match NaiveTime::parse_from_str(s, layout) {
            Ok(t) => Ok(TimeOfDay(t)),
            Err(e) => bail!("could not parse time of day from '{s}': {e}"),
        }
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<TimeOfDay>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 10)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap();
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn test_duration_spec() {
        let spec = DurationSpec {
            days: 1,
            hours: 2,
            minutes: 3,
            seconds: 4,
            millis: 5,
        };
        assert_eq!(spec.total_secs(), Some(86_400 + 7_200 + 180 + 4));
        assert_eq!(spec.duration(), Duration::from_millis(93_784_005));
        assert!(DurationSpec::default().is_empty());
        assert!(ScheduledTime::every(DurationSpec::default()).validate().is_err());
    }

    #[test]
    fn test_duration_overflow_is_rejected() {
        let every: ScheduledTime =
            serde_json::from_str(r#"{"every": {"days": 300000000000000}}"#).unwrap();
        let ScheduledTime::Every(spec) = &every else {
            panic!("expected an every entry");
        };

        assert_eq!(spec.total_secs(), None);
        assert_eq!(spec.duration(), Duration::MAX);
        assert!(every.validate().is_err());
        assert!(ScheduledTime::every(DurationSpec::from_secs(u64::MAX)).validate().is_ok());
    }

    #[test]
    fn test_time_of_day_parse() {
        assert_eq!(
            "13:05".parse::<TimeOfDay>().unwrap().to_string(),
            "13:05:00"
        );
        assert_eq!(
            "01:02:03".parse::<TimeOfDay>().unwrap().to_string(),
            "01:02:03"
        );
        assert!("1305".parse::<TimeOfDay>().is_err());
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("1:2:3:4".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn test_daily_next_delay() {
        let when = ScheduledTime::daily("12:00").unwrap();
        assert_eq!(when.next_delay(&at(11, 0, 0)), Duration::from_secs(3600));
        assert_eq!(when.next_delay(&at(12, 0, 0)), Duration::ZERO);
        assert_eq!(
            when.next_delay(&at(13, 0, 0)),
            Duration::from_secs(23 * 3600)
        );
        assert_eq!(when.period(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_json_shape() {
        let every: ScheduledTime =
            serde_json::from_str(r#"{"every": {"hours": 2, "ms-test": 10}}"#).unwrap();
        assert_eq!(
            every.period(),
            Duration::from_secs(7200) + Duration::from_millis(10)
        );

        let daily: ScheduledTime = serde_json::from_str(r#"{"daily": "03:30"}"#).unwrap();
        assert!(!daily.is_every());
        assert_eq!(
            serde_json::to_string(&daily).unwrap(),
            r#"{"daily":"03:30:00"}"#
        );
    }
}
