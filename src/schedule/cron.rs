//! Cron schedules: structured descriptors, compilation to expression text,
//! parsing and next-fire computation.
//!
//! Expressions have five fields (`minute hour day month weekday`) or six
//! with a leading seconds field. Day-of-month and weekday must both match.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("invalid cron expression `{expression}`: {reason}")]
    Invalid { expression: String, reason: String },
    #[error("unsupported timezone: {0}")]
    Timezone(String),
}

/// One field of a structured schedule.
#[derive(Clone)]
pub enum CronField {
    /// `*`
    Any,
    Value(u32),
    /// Joined with `,`.
    List(Vec<u32>),
    /// `*/N`
    Every { every: u32 },
    /// `A-B`
    Range { from: u32, to: u32 },
    /// `A-B/N`
    EveryRange { every: u32, from: u32, to: u32 },
    /// Literal text such as `mon-fri`.
    Raw(String),
    /// Evaluated once when the schedule is compiled.
    Lazy(Arc<dyn Fn() -> CronField + Send + Sync>),
}

impl CronField {
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> CronField + Send + Sync + 'static,
    {
        CronField::Lazy(Arc::new(f))
    }

    pub fn compile(&self) -> String {
        match self {
            CronField::Any => "*".into(),
            CronField::Value(v) => v.to_string(),
            CronField::List(vs) => vs.iter().map(u32::to_string).collect::<Vec<_>>().join(","),
            CronField::Every { every } => format!("*/{}", every),
            CronField::Range { from, to } => format!("{}-{}", from, to),
            CronField::EveryRange { every, from, to } => format!("{}-{}/{}", from, to, every),
            CronField::Raw(s) => s.clone(),
            CronField::Lazy(f) => f().compile(),
        }
    }
}

impl fmt::Debug for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Lazy(_) => f.write_str("Lazy(..)"),
            other => write!(f, "{}", other.compile()),
        }
    }
}

impl Default for CronField {
    fn default() -> Self {
        CronField::Any
    }
}

impl From<u32> for CronField {
    fn from(v: u32) -> Self {
        CronField::Value(v)
    }
}

impl From<Vec<u32>> for CronField {
    fn from(vs: Vec<u32>) -> Self {
        CronField::List(vs)
    }
}

impl From<&str> for CronField {
    fn from(s: &str) -> Self {
        match s.trim() {
            "*" => CronField::Any,
            other => CronField::Raw(other.to_string()),
        }
    }
}

/// Structured schedule. `second` is omitted from the compiled text when unset.
#[derive(Clone, Debug, Default)]
pub struct CronSyntax {
    pub second: Option<CronField>,
    pub minute: CronField,
    pub hour: CronField,
    pub day: CronField,
    pub month: CronField,
    pub week_day: CronField,
}

impl CronSyntax {
    pub fn compile(&self) -> String {
        let second = match &self.second {
            Some(s) => format!("{} ", s.compile()),
            None => String::new(),
        };
        format!(
            "{}{} {} {} {} {}",
            second,
            self.minute.compile(),
            self.hour.compile(),
            self.day.compile(),
            self.month.compile(),
            self.week_day.compile()
        )
    }
}

/// A task schedule as given at registration.
#[derive(Clone, Debug)]
pub enum Schedule {
    Expression(String),
    Syntax(CronSyntax),
}

impl Schedule {
    pub fn compile(&self) -> String {
        match self {
            Schedule::Expression(s) => s.trim().to_string(),
            Schedule::Syntax(syntax) => syntax.compile(),
        }
    }
}

impl From<&str> for Schedule {
    fn from(s: &str) -> Self {
        Schedule::Expression(s.to_string())
    }
}

impl From<String> for Schedule {
    fn from(s: String) -> Self {
        Schedule::Expression(s)
    }
}

impl From<CronSyntax> for Schedule {
    fn from(s: CronSyntax) -> Self {
        Schedule::Syntax(s)
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[] };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY: FieldSpec = FieldSpec { name: "day", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"],
};
// 7 is accepted as Sunday.
const WEEKDAY: FieldSpec = FieldSpec {
    name: "weekday",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

impl FieldSpec {
    fn value(&self, token: &str) -> Result<u32, String> {
        let lower = token.to_ascii_lowercase();
        if let Some(pos) = self.names.iter().position(|n| *n == lower) {
            return Ok(pos as u32 + self.min);
        }
        let v: u32 = token
            .parse()
            .map_err(|_| format!("{}: `{}` is not a number", self.name, token))?;
        if v < self.min || v > self.max {
            return Err(format!("{}: {} out of range {}-{}", self.name, v, self.min, self.max));
        }
        Ok(v)
    }

    /// Parse one field into a bit mask.
    fn parse(&self, field: &str) -> Result<u64, String> {
        let mut mask = 0u64;
        for part in field.split(',') {
            if part.is_empty() {
                return Err(format!("{}: empty list item", self.name));
            }
            let (range, step) = match part.split_once('/') {
                Some((r, s)) => {
                    let step: u32 = s
                        .parse()
                        .map_err(|_| format!("{}: bad step `{}`", self.name, s))?;
                    if step == 0 {
                        return Err(format!("{}: step must be positive", self.name));
                    }
                    (r, Some(step))
                }
                None => (part, None),
            };
            let (from, to) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                (self.value(a)?, self.value(b)?)
            } else {
                let v = self.value(range)?;
                // `a/n` runs from a to the end of the range.
                (v, if step.is_some() { self.max } else { v })
            };
            if from > to {
                return Err(format!("{}: range {}-{} is reversed", self.name, from, to));
            }
            let step = step.unwrap_or(1);
            let mut v = from;
            while v <= to {
                mask |= 1 << v;
                match v.checked_add(step) {
                    Some(next) => v = next,
                    None => break,
                }
            }
        }
        if self.name == "weekday" && mask & (1 << 7) != 0 {
            mask = (mask & !(1 << 7)) | 1;
        }
        Ok(mask)
    }
}

/// A validated expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: u64,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let invalid = |reason: String| CronError::Invalid {
            expression: expression.to_string(),
            reason,
        };
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (second, rest) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => return Err(invalid(format!("expected 5 or 6 fields, got {}", n))),
        };
        Ok(CronExpression {
            source: fields.join(" "),
            seconds: SECOND.parse(second).map_err(invalid)?,
            minutes: MINUTE.parse(rest[0]).map_err(invalid)?,
            hours: HOUR.parse(rest[1]).map_err(invalid)?,
            days: DAY.parse(rest[2]).map_err(invalid)?,
            months: MONTH.parse(rest[3]).map_err(invalid)?,
            weekdays: WEEKDAY.parse(rest[4]).map_err(invalid)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        bit(self.months, date.month())
            && bit(self.days, date.day())
            && bit(self.weekdays, date.weekday().num_days_from_sunday())
    }

    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let t = at.naive_local();
        self.date_matches(t.date())
            && bit(self.hours, t.hour())
            && bit(self.minutes, t.minute())
            && bit(self.seconds, t.second())
    }

    /// First matching instant strictly after `after`, searched up to five
    /// years ahead. Local times skipped by a DST gap never match.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local().with_nanosecond(0)? + Duration::seconds(1);
        let limit = start + Duration::days(5 * 366);
        let mut t = start;
        while t <= limit {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.date_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !bit(self.seconds, t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            if let Some(found) = tz.from_local_datetime(&t).earliest() {
                return Some(found);
            }
            t += Duration::seconds(1);
        }
        None
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn bit(mask: u64, v: u32) -> bool {
    mask & (1 << v) != 0
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (y, m) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)
}

/// True when `expression` parses.
pub fn validate(expression: &str) -> bool {
    CronExpression::parse(expression).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn structured_fields_compile() {
        let every_five = CronSyntax {
            minute: CronField::Every { every: 5 },
            ..Default::default()
        };
        assert_eq!(every_five.compile(), "*/5 * * * *");

        let ranged = CronSyntax {
            minute: CronField::Value(0),
            hour: CronField::EveryRange { every: 2, from: 1, to: 10 },
            day: CronField::Range { from: 1, to: 5 },
            ..Default::default()
        };
        assert_eq!(ranged.compile(), "0 1-10/2 1-5 * *");
        assert!(validate(&ranged.compile()));

        let with_seconds = CronSyntax {
            second: Some(CronField::Value(30)),
            minute: CronField::List(vec![0, 15, 45]),
            hour: CronField::lazy(|| CronField::Value(3)),
            ..Default::default()
        };
        assert_eq!(with_seconds.compile(), "30 0,15,45 3 * * *");
    }

    #[test]
    fn parse_accepts_names_steps_and_sunday_seven() {
        assert!(validate("*/5 * * * *"));
        assert!(validate("0 0 9 * jan-mar mon-fri"));
        let a = CronExpression::parse("0 0 * * 7").unwrap();
        let b = CronExpression::parse("0 0 * * 0").unwrap();
        assert_eq!(a.weekdays, b.weekdays);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(!validate("* * * *"));
        assert!(!validate("61 * * * *"));
        assert!(!validate("*/0 * * * *"));
        assert!(!validate("5-1 * * * *"));
        assert!(!validate("a b c d e"));
        assert!(!validate("1,,2 * * * *"));
        assert!(!validate("1-5/99999999999 * * * *"));
    }

    #[test]
    fn oversized_steps_keep_only_the_start() {
        assert!(validate("1-5/4294967295 * * * *"));
        let expr = CronExpression::parse("1-5/4294967295 * * * *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 1, 1, 10, 2, 0)), Some(utc(2024, 1, 1, 11, 1, 0)));
    }

    #[test]
    fn next_after_every_five_minutes() {
        let expr = CronExpression::parse("*/5 * * * *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 1, 1, 10, 2, 13)), Some(utc(2024, 1, 1, 10, 5, 0)));
        assert_eq!(expr.next_after(&utc(2024, 1, 1, 10, 5, 0)), Some(utc(2024, 1, 1, 10, 10, 0)));
        assert_eq!(expr.next_after(&utc(2024, 1, 1, 23, 58, 0)), Some(utc(2024, 1, 2, 0, 0, 0)));
    }

    #[test]
    fn next_after_with_seconds_and_calendar_fields() {
        let expr = CronExpression::parse("*/20 * * * * *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 1, 1, 0, 0, 41)), Some(utc(2024, 1, 1, 0, 1, 0)));

        // Noon on the 29th of February.
        let leap = CronExpression::parse("0 12 29 2 *").unwrap();
        assert_eq!(leap.next_after(&utc(2023, 3, 1, 0, 0, 0)), Some(utc(2024, 2, 29, 12, 0, 0)));

        // Monday 2024-01-01 09:00 matches weekday 1.
        let weekday = CronExpression::parse("0 9 * * mon").unwrap();
        assert_eq!(weekday.next_after(&utc(2023, 12, 30, 0, 0, 0)), Some(utc(2024, 1, 1, 9, 0, 0)));
    }

    #[test]
    fn next_after_in_fixed_offset() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let expr = CronExpression::parse("0 8 * * *").unwrap();
        let now = offset.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let next = expr.next_after(&now).unwrap();
        assert_eq!(next, offset.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap());
        assert!(expr.matches(&next));
    }

    #[test]
    fn impossible_dates_never_fire() {
        let expr = CronExpression::parse("0 0 31 2 *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 1, 1, 0, 0, 0)), None);
    }
}
