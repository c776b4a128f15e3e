//! Date durations and report intervals
//!
//! A [`DateInterval`] walks a calendar in fixed steps ("every 2 weeks from
//! 2024/01/01"). Interval and budget/forecast stages use it to decide which
//! period a posting belongs to and to step from one period to the next.

use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while stepping through date intervals
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("Invalid date interval: neither start, nor finish, nor duration")]
    UnboundedPeriod,
    #[error("Cannot {0} an uninitialized date interval")]
    Uninitialized(&'static str),
    #[error("Cannot increment a date interval without a duration")]
    NoDuration,
    #[error("Date out of range")]
    OutOfRange,
    #[error("Invalid period expression: {0}")]
    InvalidPeriod(String),
}

pub type DateResult<T> = Result<T, DateError>;

/// Unit of a [`DateDuration`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipQuantum {
    Days,
    Weeks,
    Months,
    Quarters,
    Years,
}

impl SkipQuantum {
    fn singular(self) -> &'static str {
        match self {
            SkipQuantum::Days => "day",
            SkipQuantum::Weeks => "week",
            SkipQuantum::Months => "month",
            SkipQuantum::Quarters => "quarter",
            SkipQuantum::Years => "year",
        }
    }
}

/// A calendar step such as "3 months"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateDuration {
    pub quantum: SkipQuantum,
    pub length: u32,
}

impl DateDuration {
    pub fn new(quantum: SkipQuantum, length: u32) -> Self {
        Self { quantum, length }
    }

    pub fn days(length: u32) -> Self {
        Self::new(SkipQuantum::Days, length)
    }

    pub fn weeks(length: u32) -> Self {
        Self::new(SkipQuantum::Weeks, length)
    }

    pub fn months(length: u32) -> Self {
        Self::new(SkipQuantum::Months, length)
    }

    pub fn quarters(length: u32) -> Self {
        Self::new(SkipQuantum::Quarters, length)
    }

    pub fn years(length: u32) -> Self {
        Self::new(SkipQuantum::Years, length)
    }

    /// `date` moved forward by this duration. Month based steps clamp to
    /// the last day of a shorter month.
    pub fn add(&self, date: NaiveDate) -> DateResult<NaiveDate> {
        let moved = match self.quantum {
            SkipQuantum::Days => date.checked_add_days(Days::new(self.length.into())),
            SkipQuantum::Weeks => date.checked_add_days(Days::new(u64::from(self.length) * 7)),
            SkipQuantum::Months => date.checked_add_months(Months::new(self.length)),
            SkipQuantum::Quarters => date.checked_add_months(Months::new(self.length * 3)),
            SkipQuantum::Years => date.checked_add_months(Months::new(self.length * 12)),
        };
        moved.ok_or(DateError::OutOfRange)
    }

    pub fn subtract(&self, date: NaiveDate) -> DateResult<NaiveDate> {
        let moved = match self.quantum {
            SkipQuantum::Days => date.checked_sub_days(Days::new(self.length.into())),
            SkipQuantum::Weeks => date.checked_sub_days(Days::new(u64::from(self.length) * 7)),
            SkipQuantum::Months => date.checked_sub_months(Months::new(self.length)),
            SkipQuantum::Quarters => date.checked_sub_months(Months::new(self.length * 3)),
            SkipQuantum::Years => date.checked_sub_months(Months::new(self.length * 12)),
        };
        moved.ok_or(DateError::OutOfRange)
    }

    /// Start of the `quantum` that contains `date`
    pub fn find_nearest(date: NaiveDate, quantum: SkipQuantum, week_start: Weekday) -> NaiveDate {
        match quantum {
            SkipQuantum::Days => date,
            SkipQuantum::Weeks => {
                let back = (7 + date.weekday().num_days_from_sunday()
                    - week_start.num_days_from_sunday())
                    % 7;
                date - chrono::Duration::days(back.into())
            }
            SkipQuantum::Months => date.with_day(1).unwrap_or(date),
            SkipQuantum::Quarters => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            SkipQuantum::Years => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }
}

impl fmt::Display for DateDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.length > 1 { "s" } else { "" };
        write!(f, "{} {}{}", self.length, self.quantum.singular(), plural)
    }
}

/// A range of dates; `end` is exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub begin: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(begin: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { begin, end }
    }
}

/// A possibly repeating span of time.
///
/// `start`/`finish` are the real bounds after alignment, `next` is the
/// start of the following period and `end_of_duration` the exclusive end
/// of the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateInterval {
    pub range: Option<DateRange>,
    start: Option<NaiveDate>,
    finish: Option<NaiveDate>,
    aligned: bool,
    next: Option<NaiveDate>,
    pub duration: Option<DateDuration>,
    end_of_duration: Option<NaiveDate>,
    pub week_start: Weekday,
}

impl Default for DateInterval {
    fn default() -> Self {
        Self {
            range: None,
            start: None,
            finish: None,
            aligned: false,
            next: None,
            duration: None,
            end_of_duration: None,
            week_start: Weekday::Sun,
        }
    }
}

impl DateInterval {
    /// A repeating interval with no bounds yet
    pub fn every(duration: DateDuration) -> Self {
        Self { duration: Some(duration), ..Self::default() }
    }

    /// A one-off span with an exclusive end
    pub fn between(begin: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { range: Some(DateRange::new(begin, end)), ..Self::default() }
    }

    pub fn with_range(mut self, begin: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.range = Some(DateRange::new(begin, end));
        self
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }

    /// Parse a period expression such as `monthly`, `every 2 weeks`,
    /// `quarterly from 2024/01/01 to 2025/01/01` or `in 2024`.
    pub fn parse(text: &str) -> DateResult<Self> {
        parse_period(text)
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn finish(&self) -> Option<NaiveDate> {
        self.finish
    }

    pub fn next(&self) -> Option<NaiveDate> {
        self.next
    }

    pub fn end_of_duration(&self) -> Option<NaiveDate> {
        self.end_of_duration
    }

    pub fn begin(&self) -> Option<NaiveDate> {
        self.start.or_else(|| self.range.and_then(|r| r.begin))
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.finish.or_else(|| self.range.and_then(|r| r.end))
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_some()
    }

    /// Last day of the current period
    pub fn inclusive_end(&self) -> Option<NaiveDate> {
        self.end_of_duration.and_then(|d| d.pred_opt())
    }

    pub fn resolve_end(&mut self) -> DateResult<()> {
        if let (Some(start), None, Some(duration)) =
            (self.start, self.end_of_duration, self.duration)
        {
            self.end_of_duration = Some(duration.add(start)?);
        }
        if let (Some(finish), Some(end)) = (self.finish, self.end_of_duration) {
            if end > finish {
                self.end_of_duration = Some(finish);
            }
        }
        if self.start.is_some() && self.next.is_none() {
            self.next = self.end_of_duration;
        }
        Ok(())
    }

    /// Align the interval so that its current period is the one on or
    /// before `date`.
    pub fn stabilize(&mut self, date: Option<NaiveDate>) -> DateResult<()> {
        if let Some(date) = date {
            debug!(target: "times.interval", "stabilize: with date = {}", date);
        }

        if let (Some(date), false) = (date, self.aligned) {
            if let Some(duration) = self.duration {
                debug!(target: "times.interval", "stabilize: aligning with a duration: {}", duration);
                let initial_start = self.begin();
                let initial_finish = self.end();

                let when = self.start.unwrap_or(date);
                self.start = Some(match duration.quantum {
                    SkipQuantum::Months | SkipQuantum::Quarters | SkipQuantum::Years => {
                        DateDuration::find_nearest(when, duration.quantum, self.week_start)
                    }
                    SkipQuantum::Weeks => {
                        // Start far enough back that the walk below lands on the
                        // right week without skipping through years of periods.
                        let period = i64::from(duration.length.max(1)) * 7;
                        let back = when - chrono::Duration::days(period + 400 % period);
                        DateDuration::find_nearest(back, duration.quantum, self.week_start)
                    }
                    SkipQuantum::Days => when,
                });
                debug!(target: "times.interval", "stabilize: beginning start date = {:?}", self.start);

                while let Some(start) = self.start.filter(|s| *s < date) {
                    let mut next = self.clone();
                    next.increment()?;
                    match next.start {
                        Some(next_start) if next_start <= date && next_start > start => {
                            *self = next;
                        }
                        _ => {
                            self.end_of_duration = None;
                            self.next = None;
                            break;
                        }
                    }
                }
                debug!(target: "times.interval", "stabilize: proposed start date = {:?}", self.start);

                if let Some(initial_start) = initial_start {
                    if self.start.map_or(true, |s| s < initial_start) {
                        self.resolve_end()?;
                        self.start = Some(initial_start);
                        debug!(target: "times.interval", "stabilize: start reset to initial start");
                    }
                }
                if let Some(initial_finish) = initial_finish {
                    if self.finish.map_or(true, |f| f > initial_finish) {
                        self.finish = Some(initial_finish);
                        debug!(target: "times.interval", "stabilize: finish reset to initial finish");
                    }
                }
            } else if let Some(range) = self.range {
                self.start = range.begin;
                self.finish = range.end;
            }
            self.aligned = true;
        }

        match self.duration {
            None if self.start.is_none() && self.finish.is_none() => Err(DateError::UnboundedPeriod),
            None => Ok(()),
            Some(_) => self.resolve_end(),
        }
    }

    /// Find the current or next period containing `date`. With
    /// `allow_shift` the interval may move forward in time to find it.
    pub fn find_period(&mut self, date: NaiveDate, allow_shift: bool) -> DateResult<bool> {
        self.stabilize(Some(date))?;

        if self.finish.map_or(false, |f| date > f) {
            return Ok(false);
        }
        let start = self.start.ok_or(DateError::Uninitialized("find a period in"))?;
        if date < start {
            return Ok(false);
        }
        let end_of_duration = match self.end_of_duration {
            Some(end) if date < end => return Ok(true),
            Some(end) => end,
            None => return Ok(false),
        };
        let duration = match self.duration {
            Some(duration) => duration,
            None => return Ok(false),
        };

        let mut scan = start;
        let mut end_of_scan = end_of_duration;
        while date >= scan && self.finish.map_or(true, |f| scan < f) {
            if date < end_of_scan {
                self.start = Some(scan);
                self.end_of_duration = Some(end_of_scan);
                self.next = None;
                self.resolve_end()?;
                return Ok(true);
            } else if !allow_shift {
                break;
            }
            scan = duration.add(scan)?;
            end_of_scan = duration.add(scan)?;
        }
        Ok(false)
    }

    /// True when `date` falls in the current period
    pub fn within_period(&mut self, date: NaiveDate) -> DateResult<bool> {
        self.find_period(date, false)
    }

    /// Step to the following period. Past `finish` the interval becomes
    /// invalid (no start).
    pub fn increment(&mut self) -> DateResult<()> {
        if self.start.is_none() {
            return Err(DateError::Uninitialized("increment"));
        }
        self.stabilize(None)?;
        let duration = self.duration.ok_or(DateError::NoDuration)?;
        let next = self.next.ok_or(DateError::Uninitialized("advance"))?;

        if self.finish.map_or(false, |f| next >= f) {
            self.start = None;
        } else {
            self.start = Some(next);
            self.end_of_duration = Some(duration.add(next)?);
        }
        self.next = None;
        self.resolve_end()
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(duration) => write!(f, "every {}", duration)?,
            None => f.write_str("once")?,
        }
        if let Some(begin) = self.begin() {
            write!(f, " from {}", begin.format("%Y/%m/%d"))?;
        }
        if let Some(end) = self.end() {
            write!(f, " to {}", end.format("%Y/%m/%d"))?;
        }
        Ok(())
    }
}

static EVERY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^every\s+(?:(\d+)\s+)?(day|week|month|quarter|year)s?$")
        .unwrap_or_else(|e| panic!("invalid period regex: {}", e))
});

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?)\s*(?:(?:from|since)\s+(\S+))?\s*(?:(?:to|until)\s+(\S+))?\s*(?:in\s+(\d{4}))?$")
        .unwrap_or_else(|e| panic!("invalid period regex: {}", e))
});

fn parse_day(text: &str) -> DateResult<NaiveDate> {
    ["%Y/%m/%d", "%Y-%m-%d", "%Y.%m.%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .ok_or_else(|| DateError::InvalidPeriod(text.to_string()))
}

fn parse_duration(text: &str) -> DateResult<Option<DateDuration>> {
    let duration = match text {
        "" => return Ok(None),
        "daily" => DateDuration::days(1),
        "weekly" => DateDuration::weeks(1),
        "biweekly" => DateDuration::weeks(2),
        "monthly" => DateDuration::months(1),
        "bimonthly" => DateDuration::months(2),
        "quarterly" => DateDuration::quarters(1),
        "yearly" | "annually" => DateDuration::years(1),
        other => {
            let caps = EVERY_RE
                .captures(other)
                .ok_or_else(|| DateError::InvalidPeriod(other.to_string()))?;
            let length = match caps.get(1) {
                Some(n) => n
                    .as_str()
                    .parse::<u32>()
                    .map_err(|_| DateError::InvalidPeriod(other.to_string()))?,
                None => 1,
            };
            let quantum = match &caps[2] {
                "day" => SkipQuantum::Days,
                "week" => SkipQuantum::Weeks,
                "month" => SkipQuantum::Months,
                "quarter" => SkipQuantum::Quarters,
                _ => SkipQuantum::Years,
            };
            DateDuration::new(quantum, length)
        }
    };
    if duration.length == 0 {
        return Err(DateError::InvalidPeriod(text.to_string()));
    }
    Ok(Some(duration))
}

fn parse_period(text: &str) -> DateResult<DateInterval> {
    let lowered = text.trim().to_lowercase();
    let caps = RANGE_RE
        .captures(&lowered)
        .ok_or_else(|| DateError::InvalidPeriod(text.to_string()))?;

    let mut interval = DateInterval {
        duration: parse_duration(caps.get(1).map_or("", |m| m.as_str()))?,
        ..DateInterval::default()
    };

    let mut begin = caps.get(2).map(|m| parse_day(m.as_str())).transpose()?;
    let mut end = caps.get(3).map(|m| parse_day(m.as_str())).transpose()?;
    if let Some(year) = caps.get(4) {
        let year: i32 =
            year.as_str().parse().map_err(|_| DateError::InvalidPeriod(text.to_string()))?;
        begin = NaiveDate::from_ymd_opt(year, 1, 1);
        end = NaiveDate::from_ymd_opt(year + 1, 1, 1);
    }
    if begin.is_some() || end.is_some() {
        interval.range = Some(DateRange::new(begin, end));
    }
    if interval.duration.is_none() && interval.range.is_none() {
        return Err(DateError::InvalidPeriod(text.to_string()));
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_duration_arithmetic_clamps_month_end() {
        assert_eq!(DateDuration::months(1).add(d(2024, 1, 31)).unwrap(), d(2024, 2, 29));
        assert_eq!(DateDuration::years(1).add(d(2024, 2, 29)).unwrap(), d(2025, 2, 28));
        assert_eq!(DateDuration::weeks(2).subtract(d(2024, 1, 15)).unwrap(), d(2024, 1, 1));
        assert_eq!(DateDuration::quarters(1).to_string(), "1 quarter");
        assert_eq!(DateDuration::days(3).to_string(), "3 days");
    }

    #[test]
    fn test_find_nearest() {
        let date = d(2024, 5, 15); // Wednesday
        assert_eq!(DateDuration::find_nearest(date, SkipQuantum::Weeks, Weekday::Sun), d(2024, 5, 12));
        assert_eq!(DateDuration::find_nearest(date, SkipQuantum::Weeks, Weekday::Mon), d(2024, 5, 13));
        assert_eq!(DateDuration::find_nearest(date, SkipQuantum::Months, Weekday::Sun), d(2024, 5, 1));
        assert_eq!(DateDuration::find_nearest(date, SkipQuantum::Quarters, Weekday::Sun), d(2024, 4, 1));
        assert_eq!(DateDuration::find_nearest(date, SkipQuantum::Years, Weekday::Sun), d(2024, 1, 1));
    }

    #[test]
    fn test_monthly_find_period() {
        let mut interval = DateInterval::every(DateDuration::months(1));
        assert!(interval.find_period(d(2024, 3, 17), true).unwrap());
        assert_eq!(interval.start(), Some(d(2024, 3, 1)));
        assert_eq!(interval.end_of_duration(), Some(d(2024, 4, 1)));
        assert_eq!(interval.inclusive_end(), Some(d(2024, 3, 31)));

        assert!(!interval.within_period(d(2024, 4, 2)).unwrap());
        assert!(interval.find_period(d(2024, 5, 2), true).unwrap());
        assert_eq!(interval.start(), Some(d(2024, 5, 1)));
    }

    #[test]
    fn test_increment_stops_at_finish() {
        let mut interval = DateInterval::every(DateDuration::months(1))
            .with_range(Some(d(2024, 1, 1)), Some(d(2024, 3, 1)));
        interval.stabilize(Some(d(2024, 1, 1))).unwrap();
        assert_eq!(interval.start(), Some(d(2024, 1, 1)));

        interval.increment().unwrap();
        assert_eq!(interval.start(), Some(d(2024, 2, 1)));
        interval.increment().unwrap();
        assert!(!interval.is_valid());
        assert_eq!(interval.increment(), Err(DateError::Uninitialized("increment")));
    }

    #[test]
    fn test_begin_before_first_period_keeps_initial_start() {
        let mut interval = DateInterval::every(DateDuration::months(1))
            .with_range(Some(d(2024, 1, 15)), None);
        interval.stabilize(Some(d(2024, 1, 20))).unwrap();
        assert_eq!(interval.start(), Some(d(2024, 1, 15)));
        assert_eq!(interval.end_of_duration(), Some(d(2024, 2, 1)));
    }

    #[test]
    fn test_unbounded_period_is_rejected() {
        let mut interval = DateInterval::default();
        assert_eq!(interval.stabilize(Some(d(2024, 1, 1))), Err(DateError::UnboundedPeriod));
    }

    #[test]
    fn test_weekly_alignment() {
        let mut interval = DateInterval::every(DateDuration::weeks(1));
        assert!(interval.find_period(d(2024, 5, 15), true).unwrap());
        assert_eq!(interval.start(), Some(d(2024, 5, 12)));
        assert_eq!(interval.end_of_duration(), Some(d(2024, 5, 19)));
    }

    #[test]
    fn test_parse_period_expressions() {
        let monthly = DateInterval::parse("monthly").unwrap();
        assert_eq!(monthly.duration, Some(DateDuration::months(1)));
        assert!(monthly.range.is_none());

        let every = DateInterval::parse("every 2 weeks from 2024/01/01").unwrap();
        assert_eq!(every.duration, Some(DateDuration::weeks(2)));
        assert_eq!(every.begin(), Some(d(2024, 1, 1)));

        let year = DateInterval::parse("in 2023").unwrap();
        assert!(year.duration.is_none());
        assert_eq!(year.range, Some(DateRange::new(Some(d(2023, 1, 1)), Some(d(2024, 1, 1)))));

        assert!(matches!(DateInterval::parse("fortnightly"), Err(DateError::InvalidPeriod(_))));
        assert!(DateInterval::parse("every 0 days").is_err());
    }
}
