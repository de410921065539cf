use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::epiweek;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub week: i32,
    pub year: i32,
    /// Start of the week as epoch milliseconds (`data_iniSE` upstream).
    pub week_start_ms: i64,
    pub estimated_cases: f64,
    pub estimated_cases_min: f64,
    pub estimated_cases_max: f64,
    pub notified_cases: i64,
    pub probability_rt1: f64,
    pub incidence_per_100k: f64,
    pub alert_level: i32,
    pub effective_reproduction_number: f64,
    pub population: i64,
    pub receptivity: i32,
    pub transmission: i32,
    pub incidence_level: i32,
    pub accumulated_notifications_year: i64,
}

impl AlertRecord {
    pub fn key(&self) -> (i32, i32) {
        (self.week, self.year)
    }

    pub fn label(&self) -> String {
        epiweek::format_label(self.year, self.week)
    }

    pub fn week_start_date(&self) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(self.week_start_ms).map(|dt| dt.date_naive())
    }

    pub fn level(&self) -> AlertLevel {
        AlertLevel::from_code(self.alert_level)
    }

    pub fn estimate_within_bounds(&self) -> bool {
        self.estimated_cases_min <= self.estimated_cases
            && self.estimated_cases <= self.estimated_cases_max
    }
}

/// Unrecognised codes order below every known level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertLevel {
    Unknown(i32),
    Green,
    Yellow,
    Orange,
    Red,
}

impl AlertLevel {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AlertLevel::Green,
            2 => AlertLevel::Yellow,
            3 => AlertLevel::Orange,
            4 => AlertLevel::Red,
            other => AlertLevel::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AlertLevel::Green => 1,
            AlertLevel::Yellow => 2,
            AlertLevel::Orange => 3,
            AlertLevel::Red => 4,
            AlertLevel::Unknown(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AlertLevel::Green => "normal",
            AlertLevel::Yellow => "attention",
            AlertLevel::Orange => "transmission",
            AlertLevel::Red => "emergency",
            AlertLevel::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Green => write!(f, "green"),
            AlertLevel::Yellow => write!(f, "yellow"),
            AlertLevel::Orange => write!(f, "orange"),
            AlertLevel::Red => write!(f, "red"),
            AlertLevel::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    #[serde(flatten)]
    pub record: AlertRecord,
    pub label: String,
    pub week_start_date: Option<NaiveDate>,
}

impl From<AlertRecord> for AlertView {
    fn from(record: AlertRecord) -> Self {
        Self {
            label: record.label(),
            week_start_date: record.week_start_date(),
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub semana_epidemiologica: String,
    pub casos_est: f64,
    pub casos_notificados: i64,
    pub nivel_alerta: i32,
}

impl From<&AlertRecord> for AlertSummary {
    fn from(record: &AlertRecord) -> Self {
        Self {
            semana_epidemiologica: record.label(),
            casos_est: record.estimated_cases,
            casos_notificados: record.notified_cases,
            nivel_alerta: record.alert_level,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone)]
pub struct AlertLevelSummary {
    pub level: AlertLevel,
    pub weeks: usize,
}

#[cfg(test)]
pub(crate) fn sample_record(week: i32, year: i32) -> AlertRecord {
    AlertRecord {
        week,
        year,
        week_start_ms: 1_702_166_400_000,
        estimated_cases: 120.0,
        estimated_cases_min: 110.0,
        estimated_cases_max: 140.0,
        notified_cases: 115,
        probability_rt1: 0.42,
        incidence_per_100k: 4.8,
        alert_level: 1,
        effective_reproduction_number: 0.97,
        population: 2_315_560,
        receptivity: 1,
        transmission: 0,
        incidence_level: 0,
        accumulated_notifications_year: 3_210,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_pads_single_digit_weeks() {
        assert_eq!(sample_record(3, 2024).label(), "2024-03");
        assert_eq!(sample_record(50, 2023).label(), "2023-50");
    }

    #[test]
    fn week_start_date_is_computed_from_millis() {
        let record = sample_record(50, 2023);
        assert_eq!(
            record.week_start_date(),
            NaiveDate::from_ymd_opt(2023, 12, 10)
        );
    }

    #[test]
    fn estimate_bounds_check() {
        let mut record = sample_record(10, 2023);
        assert!(record.estimate_within_bounds());
        record.estimated_cases = 150.0;
        assert!(!record.estimate_within_bounds());
    }

    #[test]
    fn alert_levels_round_trip_codes() {
        for code in 1..=4 {
            assert_eq!(AlertLevel::from_code(code).code(), code);
        }
        assert_eq!(AlertLevel::from_code(9), AlertLevel::Unknown(9));
        assert_eq!(AlertLevel::Red.to_string(), "red");
    }

    #[test]
    fn view_serializes_camel_case_with_derived_fields() {
        let view = AlertView::from(sample_record(50, 2023));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["notifiedCases"], 115);
        assert_eq!(json["label"], "2023-50");
        assert_eq!(json["weekStartDate"], "2023-12-10");
    }

    #[test]
    fn summary_uses_label() {
        let summary = AlertSummary::from(&sample_record(7, 2024));
        assert_eq!(summary.semana_epidemiologica, "2024-07");
        assert_eq!(summary.casos_notificados, 115);
    }
}
