//! Declarative filter translation.
//!
//! A filter maps field names to `{operator, value}` pairs. [`FilterTranslator`]
//! resolves each field to one or more columns, builds a condition per
//! column, and combines the lot into a single [`Fragment`] that the query
//! builder splices into its WHERE list.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Datelike, Days, FixedOffset, Months, NaiveDate, TimeZone, Utc, Weekday};
use serde::Deserialize;
use tracing::debug;

use crate::binder::Bindings;
use crate::condition::{compile, Clause, CompareOp, Condition, Conjunction, Fragment};
use crate::connection::Escape;
use crate::error::{QueryError, Result};
use crate::value::{SqlValue, ToSqlValue};

// ============================================================================
// Configuration
// ============================================================================

/// Calendar rules for relative date periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DateFilterConfig {
    /// First day of the week for `thisweek`/`lastweek`.
    #[serde(default = "default_week_start")]
    pub week_start: Weekday,
    /// Offset of the server's local calendar from UTC, in seconds.
    #[serde(default)]
    pub utc_offset_seconds: i32,
}

const fn default_week_start() -> Weekday {
    Weekday::Mon
}

impl Default for DateFilterConfig {
    fn default() -> Self {
        Self {
            week_start: default_week_start(),
            utc_offset_seconds: 0,
        }
    }
}

impl DateFilterConfig {
    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_seconds).ok_or_else(|| {
            QueryError::InvalidFilter(format!(
                "utc offset {} is out of range",
                self.utc_offset_seconds
            ))
        })
    }

    /// Today's date in the configured calendar.
    pub fn today(&self) -> Result<NaiveDate> {
        Ok(Utc::now().with_timezone(&self.offset()?).date_naive())
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// Inclusive `[low, high]`; either bound may be null.
    Range,
    /// Membership in a list.
    In,
    /// Substring match: `%value%`.
    Like,
    /// Prefix match: `value%`.
    LikeCode,
    /// Any whitespace-separated word matches.
    Likes,
    /// Every whitespace-separated word matches.
    LikesAll,
    /// Relative or absolute date period.
    Date,
}

impl FromStr for FilterOp {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            "range" => Ok(Self::Range),
            "in" => Ok(Self::In),
            "like" => Ok(Self::Like),
            "likecode" => Ok(Self::LikeCode),
            "likes" => Ok(Self::Likes),
            "likesall" => Ok(Self::LikesAll),
            "date" => Ok(Self::Date),
            other => Err(QueryError::InvalidFilter(format!("unknown operator '{other}'"))),
        }
    }
}

impl TryFrom<String> for FilterOp {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Symbolic date periods accepted by [`FilterOp::Date`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePeriod {
    /// The current day.
    Today,
    /// The day before today.
    Yesterday,
    /// The current week, starting on the configured weekday.
    ThisWeek,
    /// The week before the current one.
    LastWeek,
    /// The current calendar month.
    ThisMonth,
    /// The previous calendar month.
    LastMonth,
    /// The current calendar year.
    ThisYear,
    /// The previous calendar year.
    LastYear,
    /// Explicit `[start, end]`; either may be omitted.
    Range,
    /// Exactly one day.
    On,
    /// Up to and including a day.
    UpTo,
    /// From a day onwards.
    From,
}

impl FromStr for DatePeriod {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "thisweek" => Ok(Self::ThisWeek),
            "lastweek" => Ok(Self::LastWeek),
            "thismonth" => Ok(Self::ThisMonth),
            "lastmonth" => Ok(Self::LastMonth),
            "thisyear" => Ok(Self::ThisYear),
            "lastyear" => Ok(Self::LastYear),
            "range" => Ok(Self::Range),
            "=" => Ok(Self::On),
            "<=" => Ok(Self::UpTo),
            ">=" => Ok(Self::From),
            other => Err(QueryError::InvalidFilter(format!("unknown date period '{other}'"))),
        }
    }
}

/// How a date column stores its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFormat {
    /// Unix seconds.
    #[default]
    Timestamp,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DD HH:MM:SS`
    DateTime,
}

// ============================================================================
// Filter input
// ============================================================================

/// A filter value: a single scalar or a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// A list (for `in`, `range`, and date ranges).
    List(Vec<SqlValue>),
    /// A single value.
    Single(SqlValue),
}

impl Default for FilterValue {
    fn default() -> Self {
        Self::Single(SqlValue::Null)
    }
}

static NULL: SqlValue = SqlValue::Null;

impl FilterValue {
    fn is_absent(&self) -> bool {
        match self {
            Self::Single(v) => v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty()),
            Self::List(vals) => vals.iter().all(SqlValue::is_null),
        }
    }

    fn first(&self) -> &SqlValue {
        match self {
            Self::Single(v) => v,
            Self::List(vals) => vals.first().unwrap_or(&NULL),
        }
    }

    fn nth(&self, idx: usize) -> &SqlValue {
        match self {
            Self::Single(v) if idx == 0 => v,
            Self::List(vals) => vals.get(idx).unwrap_or(&NULL),
            Self::Single(_) => &NULL,
        }
    }

    fn items(&self) -> Vec<SqlValue> {
        match self {
            Self::Single(v) => vec![v.clone()],
            Self::List(vals) => vals.iter().filter(|v| !v.is_null()).cloned().collect(),
        }
    }
}

/// One field's filter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldFilter {
    /// Operator.
    #[serde(rename = "operator")]
    pub op: FilterOp,
    /// Operand. For [`FilterOp::Date`] the first element names the period.
    #[serde(default)]
    pub value: FilterValue,
}

impl FieldFilter {
    /// Creates a filter with a single value.
    pub fn new(op: FilterOp, value: impl ToSqlValue) -> Self {
        Self {
            op,
            value: FilterValue::Single(value.to_sql_value()),
        }
    }

    /// Creates a filter with a list operand.
    #[must_use]
    pub const fn list(op: FilterOp, values: Vec<SqlValue>) -> Self {
        Self {
            op,
            value: FilterValue::List(values),
        }
    }
}

/// The column(s) a filter field resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldColumns {
    /// Target columns, combined with `OR`.
    pub columns: Vec<String>,
    /// Storage format used when the field is filtered by date.
    #[serde(default)]
    pub date_format: DateFormat,
}

impl FieldColumns {
    /// A field backed by a single column.
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            columns: vec![name.into()],
            date_format: DateFormat::default(),
        }
    }

    /// A field fanning out to several columns.
    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: names.into_iter().map(Into::into).collect(),
            date_format: DateFormat::default(),
        }
    }

    /// Sets the date storage format.
    #[must_use]
    pub const fn date_format(mut self, format: DateFormat) -> Self {
        self.date_format = format;
        self
    }
}

// ============================================================================
// Date resolution
// ============================================================================

/// A closed day interval; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    /// First day included.
    pub start: Option<NaiveDate>,
    /// Last day included.
    pub end: Option<NaiveDate>,
}

fn invalid_date() -> QueryError {
    QueryError::InvalidFilter(String::from("date out of range"))
}

fn month_start(date: NaiveDate) -> Result<NaiveDate> {
    date.with_day(1).ok_or_else(invalid_date)
}

fn month_end(first: NaiveDate) -> Result<NaiveDate> {
    first
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .ok_or_else(invalid_date)
}

fn parse_day(value: &SqlValue) -> Result<Option<NaiveDate>> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Text(s) if s.trim().is_empty() => Ok(None),
        SqlValue::Text(s) => {
            let day = s.trim().get(..10).unwrap_or(s.trim());
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| QueryError::InvalidFilter(format!("invalid date '{s}'")))
        }
        other => Err(QueryError::InvalidFilter(format!("invalid date '{other}'"))),
    }
}

/// Resolves a period to a closed day range relative to `today`.
pub fn resolve_period(
    period: DatePeriod,
    args: (&SqlValue, &SqlValue),
    today: NaiveDate,
    config: &DateFilterConfig,
) -> Result<DayRange> {
    let day = |n: u64| today.checked_sub_days(Days::new(n)).ok_or_else(invalid_date);
    let closed = |start, end| DayRange {
        start: Some(start),
        end: Some(end),
    };
    let range = match period {
        DatePeriod::Today => closed(today, today),
        DatePeriod::Yesterday => {
            let y = day(1)?;
            closed(y, y)
        }
        DatePeriod::ThisWeek | DatePeriod::LastWeek => {
            let since = (7 + today.weekday().num_days_from_monday()
                - config.week_start.num_days_from_monday())
                % 7;
            let mut start = day(u64::from(since))?;
            if period == DatePeriod::LastWeek {
                start = start.checked_sub_days(Days::new(7)).ok_or_else(invalid_date)?;
            }
            let end = start.checked_add_days(Days::new(6)).ok_or_else(invalid_date)?;
            closed(start, end)
        }
        DatePeriod::ThisMonth => {
            let first = month_start(today)?;
            closed(first, month_end(first)?)
        }
        DatePeriod::LastMonth => {
            let first = month_start(today)?
                .checked_sub_months(Months::new(1))
                .ok_or_else(invalid_date)?;
            closed(first, month_end(first)?)
        }
        DatePeriod::ThisYear | DatePeriod::LastYear => {
            let year = if period == DatePeriod::ThisYear {
                today.year()
            } else {
                today.year() - 1
            };
            let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid_date)?;
            let last = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(invalid_date)?;
            closed(first, last)
        }
        DatePeriod::Range => DayRange {
            start: parse_day(args.0)?,
            end: parse_day(args.1)?,
        },
        DatePeriod::On => {
            let d = parse_day(args.0)?;
            DayRange { start: d, end: d }
        }
        DatePeriod::UpTo => DayRange {
            start: None,
            end: parse_day(args.0)?,
        },
        DatePeriod::From => DayRange {
            start: parse_day(args.0)?,
            end: None,
        },
    };
    Ok(range)
}

fn day_start_timestamp(day: NaiveDate, offset: &FixedOffset) -> Result<i64> {
    let midnight = day.and_hms_opt(0, 0, 0).ok_or_else(invalid_date)?;
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.timestamp())
        .ok_or_else(invalid_date)
}

/// Turns a day range into column predicates for the given storage format.
///
/// `Date` columns get closed bounds; `Timestamp` and `DateTime` columns get
/// an exclusive upper bound on the day after `end`.
pub fn date_conditions(
    range: DayRange,
    format: DateFormat,
    config: &DateFilterConfig,
) -> Result<Vec<Condition>> {
    let offset = config.offset()?;
    let next_day = |d: NaiveDate| d.checked_add_days(Days::new(1)).ok_or_else(invalid_date);
    let mut out = Vec::with_capacity(2);
    match format {
        DateFormat::Timestamp => {
            if let Some(start) = range.start {
                out.push(Condition::gte(day_start_timestamp(start, &offset)?));
            }
            if let Some(end) = range.end {
                out.push(Condition::lt(day_start_timestamp(next_day(end)?, &offset)?));
            }
        }
        DateFormat::Date => {
            if let Some(start) = range.start {
                out.push(Condition::gte(start));
            }
            if let Some(end) = range.end {
                out.push(Condition::lte(end));
            }
        }
        DateFormat::DateTime => {
            let at_midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).ok_or_else(invalid_date);
            if let Some(start) = range.start {
                out.push(Condition::gte(at_midnight(start)?));
            }
            if let Some(end) = range.end {
                out.push(Condition::lt(at_midnight(next_day(end)?)?));
            }
        }
    }
    Ok(out)
}

// ============================================================================
// Translator
// ============================================================================

/// Translates declarative filters into a single WHERE fragment.
#[derive(Debug, Clone)]
pub struct FilterTranslator<'a> {
    fields: &'a BTreeMap<String, FieldColumns>,
    config: DateFilterConfig,
    today: Option<NaiveDate>,
}

impl<'a> FilterTranslator<'a> {
    /// Creates a translator over a field-to-column map.
    #[must_use]
    pub fn new(fields: &'a BTreeMap<String, FieldColumns>) -> Self {
        Self {
            fields,
            config: DateFilterConfig::default(),
            today: None,
        }
    }

    /// Sets the calendar rules.
    #[must_use]
    pub const fn with_config(mut self, config: DateFilterConfig) -> Self {
        self.config = config;
        self
    }

    /// Pins "today" instead of reading the clock.
    #[must_use]
    pub const fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Builds the combined fragment, or `None` when every field was skipped.
    ///
    /// Fields are visited in name order; fields without a column mapping and
    /// fields whose value is null or empty are skipped.
    pub fn translate(
        &self,
        filters: &BTreeMap<String, FieldFilter>,
        mode: Conjunction,
        escape: &dyn Escape,
    ) -> Result<Option<Fragment>> {
        let today = match self.today {
            Some(day) => day,
            None => self.config.today()?,
        };

        let mut clauses = Vec::new();
        let mut fields = 0_usize;
        for (field, filter) in filters {
            let Some(target) = self.fields.get(field) else {
                debug!(field = %field, "filter field has no column mapping, skipped");
                continue;
            };
            if filter.value.is_absent() || target.columns.is_empty() {
                continue;
            }
            let (inner, conditions) = self.column_conditions(filter, target, today)?;
            if conditions.is_empty() {
                continue;
            }

            let wrap_field = target.columns.len() > 1;
            if wrap_field {
                clauses.push(Clause::Open(mode));
            }
            for column in &target.columns {
                let conj = if wrap_field { Conjunction::Or } else { mode };
                push_column(&mut clauses, conj, inner, column, &conditions);
            }
            if wrap_field {
                clauses.push(Clause::Close);
            }
            fields += 1;
        }

        if fields == 0 {
            return Ok(None);
        }
        let mut bindings = Bindings::new();
        let sql = compile(&clauses, escape, &mut bindings);
        Ok(Some(Fragment::with_bindings(format!("({sql})"), bindings)))
    }

    fn column_conditions(
        &self,
        filter: &FieldFilter,
        target: &FieldColumns,
        today: NaiveDate,
    ) -> Result<(Conjunction, Vec<Condition>)> {
        let value = &filter.value;
        let words = || -> Vec<Condition> {
            value
                .first()
                .to_text()
                .unwrap_or_default()
                .split_whitespace()
                .map(|w| Condition::like(format!("%{w}%")))
                .collect()
        };
        let single = |op| vec![Condition::compare(op, value.first())];

        let out = match filter.op {
            FilterOp::Eq => (Conjunction::And, single(CompareOp::Eq)),
            FilterOp::Ne => (Conjunction::And, single(CompareOp::Ne)),
            FilterOp::Gt => (Conjunction::And, single(CompareOp::Gt)),
            FilterOp::Gte => (Conjunction::And, single(CompareOp::Gte)),
            FilterOp::Lt => (Conjunction::And, single(CompareOp::Lt)),
            FilterOp::Lte => (Conjunction::And, single(CompareOp::Lte)),
            FilterOp::Range => {
                let mut conds = Vec::new();
                if !value.nth(0).is_null() {
                    conds.push(Condition::gte(value.nth(0)));
                }
                if !value.nth(1).is_null() {
                    conds.push(Condition::lte(value.nth(1)));
                }
                (Conjunction::And, conds)
            }
            FilterOp::In => (Conjunction::And, vec![Condition::In(value.items())]),
            FilterOp::Like => {
                let text = value.first().to_text().unwrap_or_default();
                (Conjunction::And, vec![Condition::like(format!("%{text}%"))])
            }
            FilterOp::LikeCode => {
                let text = value.first().to_text().unwrap_or_default();
                (Conjunction::And, vec![Condition::like(format!("{text}%"))])
            }
            FilterOp::Likes => (Conjunction::Or, words()),
            FilterOp::LikesAll => (Conjunction::And, words()),
            FilterOp::Date => {
                let period: DatePeriod = value
                    .nth(0)
                    .as_str()
                    .ok_or_else(|| QueryError::InvalidFilter(String::from("missing date period")))?
                    .parse()?;
                let range = resolve_period(period, (value.nth(1), value.nth(2)), today, &self.config)?;
                (
                    Conjunction::And,
                    date_conditions(range, target.date_format, &self.config)?,
                )
            }
        };
        Ok(out)
    }
}

fn push_column(
    clauses: &mut Vec<Clause>,
    conjunction: Conjunction,
    inner: Conjunction,
    column: &str,
    conditions: &[Condition],
) {
    let predicate = |conjunction, condition: &Condition| Clause::Predicate {
        conjunction,
        key: column.to_string(),
        condition: condition.clone(),
    };
    if let [only] = conditions {
        clauses.push(predicate(conjunction, only));
        return;
    }
    clauses.push(Clause::Open(conjunction));
    clauses.extend(conditions.iter().map(|c| predicate(inner, c)));
    clauses.push(Clause::Close);
}
