use chrono::{DateTime, Duration, Months, SecondsFormat, Utc};

use crate::error::{Result, SchedulerError};

/// Base recurrence frequency, RFC 5545 flavoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freq {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl std::fmt::Display for Freq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Freq::Secondly => "SECONDLY",
            Freq::Minutely => "MINUTELY",
            Freq::Hourly => "HOURLY",
            Freq::Daily => "DAILY",
            Freq::Weekly => "WEEKLY",
            Freq::Monthly => "MONTHLY",
            Freq::Yearly => "YEARLY",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Freq {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SECONDLY" => Ok(Freq::Secondly),
            "MINUTELY" => Ok(Freq::Minutely),
            "HOURLY" => Ok(Freq::Hourly),
            "DAILY" => Ok(Freq::Daily),
            "WEEKLY" => Ok(Freq::Weekly),
            "MONTHLY" => Ok(Freq::Monthly),
            "YEARLY" => Ok(Freq::Yearly),
            other => Err(SchedulerError::MalformedRule(format!(
                "unknown FREQ: {other}"
            ))),
        }
    }
}

/// A recurrence specification with a round-trippable text form:
///
/// `FREQ=DAILY[;INTERVAL=2][;COUNT=10][;UNTIL=2026-12-31T00:00:00Z]`
///
/// Keys are accepted in any order; unknown keys are rejected. `Display`
/// emits the canonical order above and omits `INTERVAL=1`.
///
/// Evaluation is pure: [`RecurrenceRule::next`] touches no clock and has no
/// side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub freq: Freq,
    /// Steps between occurrences, at least 1.
    pub interval: u32,
    /// Total occurrences in the series (the series start is occurrence 1).
    pub count: Option<u32>,
    /// Inclusive upper bound on occurrence times.
    pub until: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    pub fn new(freq: Freq) -> Self {
        Self {
            freq,
            interval: 1,
            count: None,
            until: None,
        }
    }

    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Compute the occurrence strictly after `current`, anchored at the
    /// optional series `start`.
    ///
    /// Returns `Ok(None)` when the series is exhausted (`COUNT` consumed or
    /// `UNTIL` passed). A rule that fails to advance the trigger time fails
    /// fast with `MalformedRule` instead of looping.
    pub fn next(
        &self,
        current: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        let candidate = self.advance(current)?;
        if candidate <= current {
            return Err(SchedulerError::MalformedRule(
                "rule does not advance the trigger time".into(),
            ));
        }

        if let Some(until) = self.until {
            if candidate > until {
                return Ok(None);
            }
        }

        if let Some(count) = self.count {
            // A stateless occurrence ordinal needs an anchor to count from.
            let start = start.ok_or_else(|| {
                SchedulerError::MalformedRule("COUNT requires a series start time".into())
            })?;
            if self.ordinal_of(candidate, start)? > u64::from(count) {
                return Ok(None);
            }
        }

        Ok(Some(candidate))
    }

    /// One freq × interval step forward from `from`.
    fn advance(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let n = i64::from(self.interval);
        let stepped = match self.freq {
            Freq::Secondly => from.checked_add_signed(Duration::seconds(n)),
            Freq::Minutely => from.checked_add_signed(Duration::minutes(n)),
            Freq::Hourly => from.checked_add_signed(Duration::hours(n)),
            Freq::Daily => from.checked_add_signed(Duration::days(n)),
            Freq::Weekly => from.checked_add_signed(Duration::weeks(n)),
            Freq::Monthly => from.checked_add_months(Months::new(self.interval)),
            Freq::Yearly => {
                from.checked_add_months(Months::new(self.interval.saturating_mul(12)))
            }
        };
        stepped.ok_or_else(|| SchedulerError::MalformedRule("trigger time overflow".into()))
    }

    /// Occurrence number of `candidate` within the series anchored at
    /// `start` (which is occurrence 1).
    fn ordinal_of(&self, candidate: DateTime<Utc>, start: DateTime<Utc>) -> Result<u64> {
        let step_secs = match self.freq {
            Freq::Secondly => 1,
            Freq::Minutely => 60,
            Freq::Hourly => 3_600,
            Freq::Daily => 86_400,
            Freq::Weekly => 604_800,
            // Calendar-length steps: walk the series. Bounded by COUNT,
            // which is the only caller context for ordinals.
            Freq::Monthly | Freq::Yearly => {
                let cap = self.count.map(u64::from).unwrap_or(u64::MAX);
                let mut t = start;
                let mut ordinal: u64 = 1;
                while t < candidate {
                    t = self.advance(t)?;
                    ordinal += 1;
                    if ordinal > cap {
                        break;
                    }
                }
                return Ok(ordinal);
            }
        } * i64::from(self.interval);

        let delta = (candidate - start).num_seconds();
        if delta <= 0 || step_secs == 0 {
            return Ok(1);
        }
        Ok((delta / step_secs) as u64 + 1)
    }
}

impl std::fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FREQ={}", self.freq)?;
        if self.interval > 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RecurrenceRule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        let mut freq = None;
        let mut interval: u32 = 1;
        let mut count = None;
        let mut until = None;

        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                SchedulerError::MalformedRule(format!("expected KEY=VALUE, got: {part}"))
            })?;
            match key {
                "FREQ" => freq = Some(value.parse::<Freq>()?),
                "INTERVAL" => {
                    interval = value.parse().map_err(|_| {
                        SchedulerError::MalformedRule(format!("bad INTERVAL: {value}"))
                    })?;
                    if interval == 0 {
                        return Err(SchedulerError::MalformedRule(
                            "INTERVAL must be at least 1".into(),
                        ));
                    }
                }
                "COUNT" => {
                    let c: u32 = value.parse().map_err(|_| {
                        SchedulerError::MalformedRule(format!("bad COUNT: {value}"))
                    })?;
                    if c == 0 {
                        return Err(SchedulerError::MalformedRule(
                            "COUNT must be at least 1".into(),
                        ));
                    }
                    count = Some(c);
                }
                "UNTIL" => {
                    until = Some(
                        DateTime::parse_from_rfc3339(value)
                            .map(|d| d.with_timezone(&Utc))
                            .map_err(|e| {
                                SchedulerError::MalformedRule(format!("bad UNTIL: {e}"))
                            })?,
                    );
                }
                other => {
                    return Err(SchedulerError::MalformedRule(format!(
                        "unknown rule part: {other}"
                    )));
                }
            }
        }

        let freq =
            freq.ok_or_else(|| SchedulerError::MalformedRule("missing FREQ".into()))?;
        Ok(Self {
            freq,
            interval,
            count,
            until,
        })
    }
}
