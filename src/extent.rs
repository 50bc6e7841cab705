//! Read windows
//!
//! A [`ReadExtent`] turns the configured window type into the concrete
//! [`ReadInterval`] of each cycle. Frequency extents catch up on missed cycles
//! by moving the start back to the previous read end of the same equipment.

use crate::config::{ConfigError, ExtentConfig};
use chrono::{Duration, NaiveDateTime};
use std::fmt;

/// Pattern used when logging intervals
pub const REFERENCE_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// A closed `[start, end]` read window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ReadInterval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t <= self.end
    }

    /// True when `[start, end]` intersects the window; an open end runs forever
    pub fn overlaps(&self, start: NaiveDateTime, end: Option<NaiveDateTime>) -> bool {
        start <= self.end && end.map_or(true, |e| e >= self.start)
    }

    /// True when `[start, end]` lies completely inside the window
    pub fn encloses(&self, start: NaiveDateTime, end: Option<NaiveDateTime>) -> bool {
        self.contains(start) && end.map_or(false, |e| self.contains(e))
    }

    /// Render both bounds with `format`
    pub fn format_with(&self, format: &str) -> (String, String) {
        (
            self.start.format(format).to_string(),
            self.end.format(format).to_string(),
        )
    }
}

impl fmt::Display for ReadInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.format(REFERENCE_FORMAT),
            self.end.format(REFERENCE_FORMAT)
        )
    }
}

/// How each cycle's read window is computed
#[derive(Debug, Clone, PartialEq)]
pub enum ReadExtent {
    /// The same window every cycle
    Fixed {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// `[now - read_past, now]`
    Relative { read_past: Duration },
    /// `[now - every * (1 + buffer), now]`, extended back to the previous read end
    Frequency {
        every: Duration,
        buffer: f64,
        limit: Option<Duration>,
    },
}

impl ReadExtent {
    /// Build from the `[extent]` section; fixed bounds use `date_format`
    pub fn from_config(config: &ExtentConfig, date_format: &str) -> Result<Self, ConfigError> {
        match config.kind.to_lowercase().as_str() {
            "fixed" => {
                let parse = |name: &str, value: &Option<String>| {
                    let value = value.as_deref().ok_or_else(|| {
                        ConfigError::Invalid(format!("fixed extent is missing {}", name))
                    })?;
                    NaiveDateTime::parse_from_str(value, date_format).map_err(|e| {
                        ConfigError::Invalid(format!("extent {} '{}': {}", name, value, e))
                    })
                };
                let start = parse("start", &config.start)?;
                let end = parse("end", &config.end)?;
                if end < start {
                    return Err(ConfigError::Invalid("extent end precedes start".into()));
                }
                Ok(ReadExtent::Fixed { start, end })
            }
            "relative" => Ok(ReadExtent::Relative {
                read_past: seconds(config.read_past_secs)?,
            }),
            "frequency" => {
                if config.every_secs == 0 {
                    return Err(ConfigError::Invalid("extent every_secs must be > 0".into()));
                }
                if config.buffer.is_nan() || config.buffer < 0.0 {
                    return Err(ConfigError::Invalid("extent buffer must be >= 0".into()));
                }
                Ok(ReadExtent::Frequency {
                    every: seconds(config.every_secs)?,
                    buffer: config.buffer,
                    limit: config.limit_secs.filter(|s| *s > 0).map(seconds).transpose()?,
                })
            }
            other => Err(ConfigError::Invalid(format!(
                "unknown extent type: {}",
                other
            ))),
        }
    }

    /// Schedule period in seconds, for frequency extents only
    pub fn frequency_secs(&self) -> Option<u64> {
        match self {
            ReadExtent::Frequency { every, .. } => u64::try_from(every.num_seconds()).ok(),
            _ => None,
        }
    }

    /// Window of the cycle running at `now`, given the previous read end
    pub fn interval_at(&self, now: NaiveDateTime, last_end: Option<NaiveDateTime>) -> ReadInterval {
        match self {
            ReadExtent::Fixed { start, end } => ReadInterval::new(*start, *end),
            ReadExtent::Relative { read_past } => ReadInterval::new(now - *read_past, now),
            ReadExtent::Frequency {
                every,
                buffer,
                limit,
            } => {
                let scaled = every.num_milliseconds() as f64 * (1.0 + buffer);
                let read_back = Duration::milliseconds(scaled as i64);
                let mut start = now - read_back;

                if let Some(last) = last_end.filter(|last| *last < start) {
                    let earliest = limit.map(|l| now - l);
                    start = match earliest {
                        Some(earliest) if last < earliest => earliest.min(start),
                        _ => last,
                    };
                    tracing::info!(
                        start = %start.format(REFERENCE_FORMAT),
                        "Start time moved back to previous read end"
                    );
                }

                ReadInterval::new(start, now)
            }
        }
    }
}

fn seconds(secs: u64) -> Result<Duration, ConfigError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::Invalid(format!("duration out of range: {}s", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn frequency(limit: Option<i64>) -> ReadExtent {
        ReadExtent::Frequency {
            every: Duration::minutes(10),
            buffer: 0.5,
            limit: limit.map(Duration::minutes),
        }
    }

    #[test]
    fn test_interval_display() {
        let interval = ReadInterval::new(at("2024-03-01 10:00:00"), at("2024-03-01 10:15:30"));
        assert_eq!(
            interval.to_string(),
            "[2024-03-01T10-00-00.000, 2024-03-01T10-15-30.000]"
        );
        assert_eq!(interval.duration(), Duration::seconds(930));
    }

    #[test]
    fn test_overlap() {
        let interval = ReadInterval::new(at("2024-03-01 10:00:00"), at("2024-03-01 11:00:00"));

        assert!(interval.overlaps(at("2024-03-01 09:00:00"), Some(at("2024-03-01 10:30:00"))));
        assert!(interval.overlaps(at("2024-03-01 09:00:00"), None));
        assert!(!interval.overlaps(at("2024-03-01 08:00:00"), Some(at("2024-03-01 09:00:00"))));
        assert!(!interval.overlaps(at("2024-03-01 11:00:01"), None));

        assert!(interval.encloses(at("2024-03-01 10:10:00"), Some(at("2024-03-01 10:20:00"))));
        assert!(!interval.encloses(at("2024-03-01 10:10:00"), None));
        assert!(!interval.encloses(at("2024-03-01 09:10:00"), Some(at("2024-03-01 10:20:00"))));
    }

    #[test]
    fn test_relative_and_fixed() {
        let now = at("2024-03-01 12:00:00");
        let relative = ReadExtent::Relative {
            read_past: Duration::hours(2),
        };
        assert_eq!(
            relative.interval_at(now, Some(at("2024-02-01 00:00:00"))),
            ReadInterval::new(at("2024-03-01 10:00:00"), now)
        );
        assert_eq!(relative.frequency_secs(), None);

        let fixed = ReadExtent::Fixed {
            start: at("2024-01-01 00:00:00"),
            end: at("2024-01-02 00:00:00"),
        };
        assert_eq!(fixed.interval_at(now, None).end, at("2024-01-02 00:00:00"));
    }

    #[test]
    fn test_frequency_buffer() {
        let extent = frequency(None);
        let now = at("2024-03-01 12:00:00");

        let interval = extent.interval_at(now, None);
        assert_eq!(interval.start, at("2024-03-01 11:45:00"));
        assert_eq!(extent.frequency_secs(), Some(600));

        // previous end inside the window does not move the start
        let interval = extent.interval_at(now, Some(at("2024-03-01 11:50:00")));
        assert_eq!(interval.start, at("2024-03-01 11:45:00"));
    }

    #[test]
    fn test_frequency_catch_up() {
        let now = at("2024-03-01 12:00:00");
        let last = Some(at("2024-03-01 09:00:00"));

        assert_eq!(frequency(None).interval_at(now, last).start, at("2024-03-01 09:00:00"));
        assert_eq!(
            frequency(Some(60)).interval_at(now, last).start,
            at("2024-03-01 11:00:00")
        );
        assert_eq!(
            frequency(Some(600)).interval_at(now, last).start,
            at("2024-03-01 09:00:00")
        );
    }

    #[test]
    fn test_from_config() {
        let config = ExtentConfig::default();
        let extent = ReadExtent::from_config(&config, "%Y-%m-%dT%H-%M-%S").unwrap();
        assert_eq!(extent.frequency_secs(), Some(300));

        let config = ExtentConfig {
            kind: "fixed".into(),
            start: Some("2024-01-01T00-00-00".into()),
            end: Some("2024-01-02T00-00-00".into()),
            ..Default::default()
        };
        let extent = ReadExtent::from_config(&config, "%Y-%m-%dT%H-%M-%S").unwrap();
        assert!(matches!(extent, ReadExtent::Fixed { .. }));

        let config = ExtentConfig {
            kind: "fixed".into(),
            start: Some("yesterday".into()),
            end: Some("2024-01-02T00-00-00".into()),
            ..Default::default()
        };
        assert!(ReadExtent::from_config(&config, "%Y-%m-%dT%H-%M-%S").is_err());

        let config = ExtentConfig {
            kind: "sliding".into(),
            ..Default::default()
        };
        assert!(ReadExtent::from_config(&config, "%Y-%m-%dT%H-%M-%S").is_err());
    }
}
