use std::fmt;

use chrono::{Datelike, Duration, Months, NaiveDate};

pub const MAX_WEEK: i32 = 53;

// Field order makes the derived `Ord` chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpiWeek {
    pub year: i32,
    pub week: i32,
}

impl fmt::Display for EpiWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_label(self.year, self.week))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpiRange {
    pub start: EpiWeek,
    pub end: EpiWeek,
}

impl EpiRange {
    pub fn spans_years(&self) -> bool {
        self.start.year != self.end.year
    }
}

pub fn format_label(year: i32, week: i32) -> String {
    format!("{year}-{week:02}")
}

pub fn week_and_year_of(date: NaiveDate) -> EpiWeek {
    let first_sunday = first_sunday_of_year(date);

    if date < first_sunday {
        return EpiWeek {
            year: date.year() - 1,
            week: MAX_WEEK,
        };
    }

    let week = ((date - first_sunday).num_days() / 7) as i32 + 1;
    if week > MAX_WEEK {
        return EpiWeek {
            year: date.year() + 1,
            week: 1,
        };
    }

    EpiWeek {
        year: date.year(),
        week,
    }
}

/// Month subtraction clamps to the last day of shorter months.
pub fn range_covering_last_months(reference: NaiveDate, months: u32) -> EpiRange {
    let earliest = reference
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN);

    EpiRange {
        start: week_and_year_of(earliest),
        end: week_and_year_of(reference),
    }
}

fn first_sunday_of_year(date: NaiveDate) -> NaiveDate {
    let first_day = date - Duration::days(i64::from(date.ordinal0()));
    let offset = (7 - first_day.weekday().num_days_from_sunday()) % 7;
    first_day + Duration::days(i64::from(offset))
}
