//! Calendar schedules for day conditions
//!
//! A schedule is written as three whitespace-separated fields,
//! `"<days> <months> <weekdays>"`, each being `*`, a single number `N` or an
//! inclusive range `N-M`. Weekdays run 1 (Monday) to 7 (Sunday).

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::condition::{ConditionError, ConditionResult};

const DAYS: (u32, u32) = (1, 31);
const MONTHS: (u32, u32) = (1, 12);
const WEEKDAYS: (u32, u32) = (1, 7);

/// Parsed form of a `"days months weekdays"` schedule
///
/// Serializes back to the exact text it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DaySchedule {
    format: String,
    days: FieldRange,
    months: FieldRange,
    weekdays: FieldRange,
}

/// Inclusive span accepted by one field
///
/// Every field form (`*`, `N`, `N-M`) is a single span, so nothing is
/// expanded until an accessor asks for the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldRange {
    first: u32,
    last: u32,
}

impl FieldRange {
    fn contains(&self, value: u32) -> bool {
        (self.first..=self.last).contains(&value)
    }

    /// Values of the span that exist on the calendar
    fn values(&self, (min, max): (u32, u32)) -> BTreeSet<u32> {
        (self.first.max(min)..=self.last.min(max)).collect()
    }
}

impl DaySchedule {
    /// Parse a schedule
    ///
    /// Only the syntax is checked here; [`DaySchedule::validate`] checks that
    /// every number lies in its field's range.
    pub fn parse(format: &str) -> ConditionResult<Self> {
        let fields: Vec<&str> = format.split_whitespace().collect();
        let [days, months, weekdays] = fields.as_slice() else {
            return Err(ConditionError::InvalidConfig(format!(
                "day format {format:?} must have exactly 3 fields"
            )));
        };

        Ok(Self {
            format: format.to_string(),
            days: parse_field(days, DAYS)?,
            months: parse_field(months, MONTHS)?,
            weekdays: parse_field(weekdays, WEEKDAYS)?,
        })
    }

    /// Check every field against its calendar range
    pub fn validate(&self) -> ConditionResult<()> {
        check_range("days", self.days, DAYS)?;
        check_range("months", self.months, MONTHS)?;
        check_range("weekdays", self.weekdays, WEEKDAYS)
    }

    /// Whether the date falls on this schedule
    pub fn matches(&self, date: NaiveDate) -> bool {
        self.days.contains(date.day())
            && self.months.contains(date.month())
            && self.weekdays.contains(date.weekday().number_from_monday())
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Days of the month, 1-based
    pub fn days(&self) -> BTreeSet<u32> {
        self.days.values(DAYS)
    }

    /// Months, 1-based
    pub fn months(&self) -> BTreeSet<u32> {
        self.months.values(MONTHS)
    }

    /// Weekdays in Monday-first order
    pub fn weekdays(&self) -> Vec<Weekday> {
        self.weekdays
            .values(WEEKDAYS)
            .into_iter()
            .filter_map(|n| match n {
                1 => Some(Weekday::Mon),
                2 => Some(Weekday::Tue),
                3 => Some(Weekday::Wed),
                4 => Some(Weekday::Thu),
                5 => Some(Weekday::Fri),
                6 => Some(Weekday::Sat),
                7 => Some(Weekday::Sun),
                _ => None,
            })
            .collect()
    }
}

fn parse_field(field: &str, (min, max): (u32, u32)) -> ConditionResult<FieldRange> {
    let invalid = || ConditionError::InvalidConfig(format!("invalid day format field {field:?}"));

    if field == "*" {
        return Ok(FieldRange { first: min, last: max });
    }

    if let Some((left, right)) = field.split_once('-') {
        let first: u32 = left.parse().map_err(|_| invalid())?;
        let last: u32 = right.parse().map_err(|_| invalid())?;
        if first > last {
            return Err(invalid());
        }
        return Ok(FieldRange { first, last });
    }

    let single: u32 = field.parse().map_err(|_| invalid())?;
    Ok(FieldRange {
        first: single,
        last: single,
    })
}

fn check_range(name: &str, range: FieldRange, (min, max): (u32, u32)) -> ConditionResult<()> {
    if range.first >= min && range.last <= max {
        Ok(())
    } else {
        Err(ConditionError::InvalidConfig(format!(
            "{name} should contain values between {min} and {max}"
        )))
    }
}

impl TryFrom<String> for DaySchedule {
    type Error = ConditionError;

    fn try_from(format: String) -> Result<Self, Self::Error> {
        Self::parse(&format)
    }
}

impl From<DaySchedule> for String {
    fn from(schedule: DaySchedule) -> Self {
        schedule.format
    }
}

impl fmt::Display for DaySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_friday() {
        let schedule = DaySchedule::parse("* * 5").unwrap();
        assert_eq!(schedule.days().len(), 31);
        assert_eq!(schedule.months().len(), 12);
        assert_eq!(schedule.weekdays(), vec![Weekday::Fri]);
    }

    #[test]
    fn test_seven_is_sunday() {
        let schedule = DaySchedule::parse("* * 6-7").unwrap();
        assert_eq!(schedule.weekdays(), vec![Weekday::Sat, Weekday::Sun]);

        // 2024-06-09 was a Sunday
        let sunday = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        assert!(schedule.matches(sunday));
        assert!(!schedule.matches(sunday.pred_opt().unwrap().pred_opt().unwrap()));
    }

    #[test]
    fn test_all_fields_must_match() {
        let schedule = DaySchedule::parse("1-15 6 *").unwrap();
        assert!(schedule.matches(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()));
        assert!(!schedule.matches(NaiveDate::from_ymd_opt(2024, 6, 20).unwrap()));
        assert!(!schedule.matches(NaiveDate::from_ymd_opt(2024, 7, 10).unwrap()));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(DaySchedule::parse("* *").is_err());
        assert!(DaySchedule::parse("* * * *").is_err());
        assert!(DaySchedule::parse("x * *").is_err());
        assert!(DaySchedule::parse("5-1 * *").is_err());
        assert!(DaySchedule::parse("1- * *").is_err());
    }

    #[test]
    fn test_out_of_range_fails_validation() {
        let schedule = DaySchedule::parse("0-3 * *").unwrap();
        assert!(schedule.validate().is_err());

        let schedule = DaySchedule::parse("* 13 *").unwrap();
        assert!(schedule.validate().is_err());

        let schedule = DaySchedule::parse("* * 8").unwrap();
        assert!(schedule.validate().is_err());

        assert!(DaySchedule::parse("1-31 1-12 1-7").unwrap().validate().is_ok());
    }

    #[test]
    fn test_huge_range_is_rejected_without_expanding() {
        let schedule = DaySchedule::parse("1-4000000000 * *").unwrap();
        assert!(schedule.validate().is_err());
        assert_eq!(schedule.days().len(), 31);

        let condition = serde_json::json!({"type": "day", "format": "1-4000000000 * *"});
        assert!(crate::Condition::from_value(condition).is_err());
    }

    #[test]
    fn test_serializes_as_original_text() {
        let schedule = DaySchedule::parse("1 2-3 *").unwrap();
        assert_eq!(
            serde_json::to_value(&schedule).unwrap(),
            serde_json::json!("1 2-3 *")
        );
    }
}
