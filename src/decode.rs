use std::io;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};
use serde::{de, Deserialize, Deserializer};

use crate::epiweek::MAX_WEEK;
use crate::error::SyncError;
use crate::models::AlertRecord;

// The same column can arrive as 2315560, 2315560.0 or "2315560.0".
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

fn round_lenient(value: LenientNumber) -> Result<i64, String> {
    let decimal = match value {
        LenientNumber::Int(value) => return Ok(value),
        LenientNumber::Float(value) => value,
        LenientNumber::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{text}' is not a decimal number"))?,
    };

    if !decimal.is_finite() || decimal.abs() >= i64::MAX as f64 {
        return Err(format!("{decimal} cannot be represented as an integer"));
    }

    Ok(decimal.round() as i64)
}

pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = LenientNumber::deserialize(deserializer)?;
    round_lenient(value).map_err(de::Error::custom)
}

pub fn lenient_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_i64(deserializer)?;
    i32::try_from(value).map_err(|_| de::Error::custom(format!("{value} is out of range")))
}

/// `data_iniSE` is epoch milliseconds in the JSON feed and an ISO date in
/// the CSV export.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WeekStart {
    Millis(i64),
    Text(String),
}

impl WeekStart {
    fn to_millis(&self) -> Result<i64, SyncError> {
        match self {
            WeekStart::Millis(ms) => Ok(*ms),
            WeekStart::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Ok(ms);
                }
                let date = text
                    .get(..10)
                    .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
                    .ok_or_else(|| SyncError::Decode(format!("invalid data_iniSE '{text}'")))?;
                Ok(date.and_time(NaiveTime::default()).and_utc().timestamp_millis())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawAlert {
    #[serde(rename = "data_iniSE")]
    week_start: WeekStart,
    #[serde(rename = "SE")]
    se: i64,
    #[serde(rename = "casos_est")]
    estimated_cases: f64,
    #[serde(rename = "casos_est_min")]
    estimated_cases_min: f64,
    #[serde(rename = "casos_est_max")]
    estimated_cases_max: f64,
    #[serde(rename = "casos", deserialize_with = "lenient_i64")]
    notified_cases: i64,
    #[serde(rename = "p_rt1")]
    probability_rt1: f64,
    #[serde(rename = "p_inc100k")]
    incidence_per_100k: f64,
    #[serde(rename = "nivel")]
    alert_level: i32,
    #[serde(rename = "Rt")]
    effective_reproduction_number: f64,
    #[serde(rename = "pop", deserialize_with = "lenient_i64")]
    population: i64,
    #[serde(rename = "receptivo", deserialize_with = "lenient_i32")]
    receptivity: i32,
    #[serde(rename = "transmissao", deserialize_with = "lenient_i32")]
    transmission: i32,
    #[serde(rename = "nivel_inc", deserialize_with = "lenient_i32")]
    incidence_level: i32,
    #[serde(rename = "notif_accum_year", deserialize_with = "lenient_i64")]
    accumulated_notifications_year: i64,
}

impl RawAlert {
    pub fn into_record(self) -> Result<AlertRecord, SyncError> {
        let week_start_ms = self.week_start.to_millis()?;
        let (week, year) = split_week(self.se, week_start_ms)?;

        Ok(AlertRecord {
            week,
            year,
            week_start_ms,
            estimated_cases: self.estimated_cases,
            estimated_cases_min: self.estimated_cases_min,
            estimated_cases_max: self.estimated_cases_max,
            notified_cases: self.notified_cases,
            probability_rt1: self.probability_rt1,
            incidence_per_100k: self.incidence_per_100k,
            alert_level: self.alert_level,
            effective_reproduction_number: self.effective_reproduction_number,
            population: self.population,
            receptivity: self.receptivity,
            transmission: self.transmission,
            incidence_level: self.incidence_level,
            accumulated_notifications_year: self.accumulated_notifications_year,
        })
    }
}

/// `SE` is either `YYYYWW` or a bare week number. A bare week takes the
/// calendar year of the week start, except where the week straddles New
/// Year: week 1 starting in December belongs to the next year, and a late
/// week starting in January to the previous one.
fn split_week(se: i64, week_start_ms: i64) -> Result<(i32, i32), SyncError> {
    let (week, year) = if se >= 100 {
        (se % 100, se / 100)
    } else {
        let start = DateTime::from_timestamp_millis(week_start_ms).ok_or_else(|| {
            SyncError::Decode(format!("data_iniSE {week_start_ms} is out of range"))
        })?;
        let year = i64::from(start.year());
        match (se, start.month()) {
            (1, 12) => (se, year + 1),
            (week, 1) if week >= i64::from(MAX_WEEK - 1) => (se, year - 1),
            _ => (se, year),
        }
    };

    if !(1..=i64::from(MAX_WEEK)).contains(&week) {
        return Err(SyncError::Decode(format!("SE {se} has no valid week number")));
    }
    let year = i32::try_from(year)
        .map_err(|_| SyncError::Decode(format!("SE {se} has no valid year")))?;

    Ok((week as i32, year))
}

pub fn decode_alerts(body: &str) -> Result<Vec<AlertRecord>, SyncError> {
    let raw: Vec<RawAlert> =
        serde_json::from_str(body).map_err(|e| SyncError::Decode(e.to_string()))?;
    raw.into_iter().map(RawAlert::into_record).collect()
}

pub fn decode_csv<R: io::Read>(reader: R) -> Result<Vec<AlertRecord>, SyncError> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for result in reader.deserialize::<RawAlert>() {
        let raw = result.map_err(|e| SyncError::Decode(e.to_string()))?;
        records.push(raw.into_record()?);
    }

    Ok(records)
}

#[derive(Deserialize)]
struct ErrorBody {
    error_message: Option<String>,
}

pub fn upstream_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|error| error.error_message)
        .filter(|message| !message.trim().is_empty())
}
