use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::decode::{decode_alerts, upstream_error_message};
use crate::epiweek::MAX_WEEK;
use crate::error::SyncError;
use crate::models::AlertRecord;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekRange {
    pub start_week: i32,
    pub end_week: i32,
    pub start_year: i32,
    pub end_year: i32,
}

impl WeekRange {
    pub fn single_year(year: i32, start_week: i32, end_week: i32) -> Self {
        Self {
            start_week,
            end_week,
            start_year: year,
            end_year: year,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        for (name, week) in [("start week", self.start_week), ("end week", self.end_week)] {
            if !(1..=MAX_WEEK).contains(&week) {
                return Err(SyncError::Validation(format!(
                    "{name} {week} must be between 1 and {MAX_WEEK}"
                )));
            }
        }
        for (name, year) in [("start year", self.start_year), ("end year", self.end_year)] {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(SyncError::Validation(format!(
                    "{name} {year} must be between {MIN_YEAR} and {MAX_YEAR}"
                )));
            }
        }
        if self.end_week < self.start_week {
            return Err(SyncError::Validation(format!(
                "end week {} is before start week {}",
                self.end_week, self.start_week
            )));
        }
        if self.end_year < self.start_year {
            return Err(SyncError::Validation(format!(
                "end year {} is before start year {}",
                self.end_year, self.start_year
            )));
        }
        Ok(())
    }
}

pub trait AlertSource {
    async fn fetch_range(&self, range: &WeekRange) -> Result<Vec<AlertRecord>, SyncError>;
}

pub struct InfoDengueClient {
    client: Client,
    base_url: String,
    geocode: String,
    disease: String,
    timeout: Duration,
}

impl InfoDengueClient {
    pub fn new(
        base_url: &str,
        geocode: &str,
        disease: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            geocode: geocode.to_string(),
            disease: disease.to_string(),
            timeout,
        })
    }

    fn query(&self, range: &WeekRange) -> Vec<(&'static str, String)> {
        vec![
            ("geocode", self.geocode.clone()),
            ("disease", self.disease.clone()),
            ("format", "json".to_string()),
            ("ew_start", range.start_week.to_string()),
            ("ew_end", range.end_week.to_string()),
            ("ey_start", range.start_year.to_string()),
            ("ey_end", range.end_year.to_string()),
        ]
    }

    fn transport_error(&self, error: reqwest::Error) -> SyncError {
        let message = if error.is_timeout() {
            format!("no response within {}s", self.timeout.as_secs())
        } else {
            error.to_string()
        };
        warn!("InfoDengue request failed: {message}");

        SyncError::Upstream {
            status: error.status().map(|s| s.as_u16()),
            message,
        }
    }
}

impl AlertSource for InfoDengueClient {
    async fn fetch_range(&self, range: &WeekRange) -> Result<Vec<AlertRecord>, SyncError> {
        info!(
            geocode = %self.geocode,
            ew_start = range.start_week,
            ew_end = range.end_week,
            ey_start = range.start_year,
            ey_end = range.end_year,
            "Requesting alerts from InfoDengue"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&self.query(range))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let message = upstream_error_message(&body)
                .unwrap_or_else(|| format!("provider answered {status}"));
            warn!(status = status.as_u16(), "InfoDengue rejected request: {message}");
            return Err(SyncError::Upstream {
                status: Some(status.as_u16()),
                message,
            });
        }

        decode_alerts(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_ranges() {
        assert!(WeekRange::single_year(2024, 1, 53).validate().is_ok());
        assert!(WeekRange {
            start_week: 10,
            end_week: 20,
            start_year: 2023,
            end_year: 2024,
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn rejects_weeks_outside_bounds() {
        for (start, end) in [(54, 54), (0, 10), (1, 54)] {
            let result = WeekRange::single_year(2024, start, end).validate();
            assert!(matches!(result, Err(SyncError::Validation(_))), "{start}..{end}");
        }
    }

    #[test]
    fn rejects_inverted_spans() {
        assert!(matches!(
            WeekRange::single_year(2024, 10, 5).validate(),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            WeekRange {
                start_week: 1,
                end_week: 5,
                start_year: 2024,
                end_year: 2023,
            }
            .validate(),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn rejects_years_outside_bounds() {
        assert!(WeekRange::single_year(1999, 1, 5).validate().is_err());
        assert!(WeekRange::single_year(10_000, 1, 5).validate().is_err());
    }

    async fn serve_provider() -> String {
        use axum::{http::StatusCode, routing::get, Json, Router};
        use serde_json::json;

        let app = Router::new()
            .route(
                "/bad",
                get(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error_message": "bad geocode" })),
                    )
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!([]))
                }),
            )
            .route("/junk", get(|| async { Json(json!({ "error": "nope" })) }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}")
    }

    async fn fetch_from(base_url: &str, path: &str) -> Result<Vec<AlertRecord>, SyncError> {
        let client = InfoDengueClient::new(
            &format!("{base_url}{path}"),
            "3106200",
            "dengue",
            Duration::from_secs(1),
        )
        .unwrap();
        client.fetch_range(&WeekRange::single_year(2024, 1, 5)).await
    }

    #[tokio::test]
    async fn provider_failures_map_to_sync_errors() {
        let base_url = serve_provider().await;

        match fetch_from(&base_url, "/bad").await {
            Err(SyncError::Upstream { status, message }) => {
                assert_eq!(status, Some(400));
                assert_eq!(message, "bad geocode");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }

        match fetch_from(&base_url, "/slow").await {
            Err(SyncError::Upstream { status, message }) => {
                assert_eq!(status, None);
                assert_eq!(message, "no response within 1s");
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        assert!(matches!(
            fetch_from(&base_url, "/junk").await,
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    fn query_carries_every_parameter() {
        let client = InfoDengueClient::new(
            "https://info.dengue.mat.br/api/alertcity",
            "3106200",
            "dengue",
            Duration::from_secs(5),
        )
        .unwrap();
        let query = client.query(&WeekRange::single_year(2023, 28, 53));

        assert_eq!(
            query,
            vec![
                ("geocode", "3106200".to_string()),
                ("disease", "dengue".to_string()),
                ("format", "json".to_string()),
                ("ew_start", "28".to_string()),
                ("ew_end", "53".to_string()),
                ("ey_start", "2023".to_string()),
                ("ey_end", "2023".to_string()),
            ]
        );
    }
}
