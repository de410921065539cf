use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::info;

use crate::epiweek::{self, EpiRange, MAX_WEEK};
use crate::error::SyncError;
use crate::models::{AlertRecord, ReconcileSummary};
use crate::upstream::{AlertSource, WeekRange};

/// `apply` must commit the whole plan or nothing.
pub trait AlertStore {
    async fn load_all(&self) -> Result<Vec<AlertRecord>, SyncError>;
    async fn apply(&self, plan: &ReconcilePlan) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub inserts: Vec<AlertRecord>,
    pub updates: Vec<AlertRecord>,
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn has_changes(&self) -> bool {
        !self.inserts.is_empty() || !self.updates.is_empty()
    }

    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            inserted: self.inserts.len(),
            updated: self.updates.len(),
            unchanged: self.unchanged,
        }
    }
}

/// A key seen twice in `incoming` keeps its last occurrence.
pub fn plan_reconcile(existing: &[AlertRecord], incoming: &[AlertRecord]) -> ReconcilePlan {
    let stored: HashMap<(i32, i32), &AlertRecord> =
        existing.iter().map(|record| (record.key(), record)).collect();

    let mut positions: HashMap<(i32, i32), usize> = HashMap::new();
    let mut latest: Vec<&AlertRecord> = Vec::new();
    for record in incoming {
        match positions.get(&record.key()) {
            Some(&index) => latest[index] = record,
            None => {
                positions.insert(record.key(), latest.len());
                latest.push(record);
            }
        }
    }

    let mut plan = ReconcilePlan::default();
    for record in latest {
        match stored.get(&record.key()) {
            None => plan.inserts.push(record.clone()),
            Some(current) if *current == record => plan.unchanged += 1,
            Some(_) => plan.updates.push(record.clone()),
        }
    }

    plan
}

pub fn split_by_year(range: &EpiRange) -> Vec<WeekRange> {
    if !range.spans_years() {
        return vec![WeekRange::single_year(
            range.start.year,
            range.start.week,
            range.end.week,
        )];
    }

    let mut segments = vec![WeekRange::single_year(
        range.start.year,
        range.start.week,
        MAX_WEEK,
    )];
    for year in range.start.year + 1..range.end.year {
        segments.push(WeekRange::single_year(year, 1, MAX_WEEK));
    }
    segments.push(WeekRange::single_year(range.end.year, 1, range.end.week));
    segments
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub records: Vec<AlertRecord>,
    pub summary: ReconcileSummary,
}

pub struct AlertSynchronizer<S> {
    source: S,
}

impl<S: AlertSource> AlertSynchronizer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub async fn fetch_alerts(
        &self,
        start_week: i32,
        end_week: i32,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<AlertRecord>, SyncError> {
        let range = WeekRange {
            start_week,
            end_week,
            start_year,
            end_year,
        };
        range.validate()?;

        let records = self.source.fetch_range(&range).await?;
        info!(
            "Fetched {} alerts for weeks {start_week}-{end_week} of {start_year}-{end_year}",
            records.len()
        );
        Ok(records)
    }

    pub async fn fetch_week(&self, week: i32, year: i32) -> Result<Option<AlertRecord>, SyncError> {
        let records = self.fetch_alerts(week, week, year, year).await?;
        Ok(records
            .into_iter()
            .find(|record| record.key() == (week, year)))
    }

    pub async fn fetch_last_n_months(
        &self,
        reference: NaiveDate,
        months: u32,
    ) -> Result<Vec<AlertRecord>, SyncError> {
        let range = epiweek::range_covering_last_months(reference, months);
        info!("Fetching alerts from {} to {}", range.start, range.end);

        let mut records = Vec::new();
        for segment in split_by_year(&range) {
            let fetched = self
                .fetch_alerts(
                    segment.start_week,
                    segment.end_week,
                    segment.start_year,
                    segment.end_year,
                )
                .await?;
            records.extend(fetched);
        }

        records.sort_by_key(|record| (record.year, record.week));
        Ok(records)
    }

    pub async fn reconcile<St: AlertStore>(
        &self,
        store: &St,
        incoming: &[AlertRecord],
    ) -> Result<ReconcileSummary, SyncError> {
        let existing = store.load_all().await?;
        let plan = plan_reconcile(&existing, incoming);

        if plan.has_changes() {
            store.apply(&plan).await?;
        }

        let summary = plan.summary();
        info!(
            "Reconciled {} alerts: {} inserted, {} updated, {} unchanged",
            incoming.len(),
            summary.inserted,
            summary.updated,
            summary.unchanged
        );
        Ok(summary)
    }

    pub async fn sync_last_n_months<St: AlertStore>(
        &self,
        store: &St,
        reference: NaiveDate,
        months: u32,
    ) -> Result<SyncOutcome, SyncError> {
        let records = self.fetch_last_n_months(reference, months).await?;
        let summary = self.reconcile(store, &records).await?;
        Ok(SyncOutcome { records, summary })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::models::sample_record;

    /// Serves one record per requested week, newest first.
    #[derive(Default)]
    struct FakeSource {
        calls: Mutex<Vec<WeekRange>>,
        failure: Option<u16>,
    }

    impl AlertSource for FakeSource {
        async fn fetch_range(&self, range: &WeekRange) -> Result<Vec<AlertRecord>, SyncError> {
            self.calls.lock().unwrap().push(*range);
            if let Some(status) = self.failure {
                return Err(SyncError::Upstream {
                    status: Some(status),
                    message: "provider unavailable".to_string(),
                });
            }

            let mut records = Vec::new();
            for year in range.start_year..=range.end_year {
                for week in range.start_week..=range.end_week {
                    records.push(sample_record(week, year));
                }
            }
            records.reverse();
            Ok(records)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<AlertRecord>>,
        fail_on: Option<(i32, i32)>,
    }

    impl MemoryStore {
        fn with_rows(rows: Vec<AlertRecord>) -> Self {
            Self {
                rows: Mutex::new(rows),
                fail_on: None,
            }
        }

        fn snapshot(&self) -> Vec<AlertRecord> {
            self.rows.lock().unwrap().clone()
        }
    }

    impl AlertStore for MemoryStore {
        async fn load_all(&self) -> Result<Vec<AlertRecord>, SyncError> {
            Ok(self.snapshot())
        }

        async fn apply(&self, plan: &ReconcilePlan) -> Result<(), SyncError> {
            let mut rows = self.rows.lock().unwrap();
            let mut staged = rows.clone();

            for record in plan.inserts.iter().chain(plan.updates.iter()) {
                if self.fail_on == Some(record.key()) {
                    return Err(SyncError::Store("constraint violated".into()));
                }
                match staged.iter_mut().find(|row| row.key() == record.key()) {
                    Some(row) => *row = record.clone(),
                    None => staged.push(record.clone()),
                }
            }

            *rows = staged;
            Ok(())
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[tokio::test]
    async fn fetch_alerts_validates_before_calling_upstream() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());

        let result = synchronizer.fetch_alerts(54, 54, 2024, 2024).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));

        let result = synchronizer.fetch_alerts(10, 5, 2024, 2024).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));

        let result = synchronizer.fetch_alerts(1, 5, 1999, 2024).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));

        assert!(synchronizer.source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_errors_propagate_unchanged() {
        let synchronizer = AlertSynchronizer::new(FakeSource {
            failure: Some(503),
            ..Default::default()
        });

        let result = synchronizer.fetch_alerts(1, 10, 2024, 2024).await;
        match result {
            Err(SyncError::Upstream { status, message }) => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "provider unavailable");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_week_returns_matching_record() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let record = synchronizer.fetch_week(12, 2024).await.unwrap().unwrap();
        assert_eq!(record.key(), (12, 2024));
    }

    #[tokio::test]
    async fn last_months_within_one_year_is_a_single_call() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let records = synchronizer
            .fetch_last_n_months(date(2024, 8, 20), 3)
            .await
            .unwrap();

        let calls = synchronizer.source.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].start_year, 2024);
        assert_eq!(records.len() as i32, calls[0].end_week - calls[0].start_week + 1);
    }

    #[tokio::test]
    async fn last_months_across_new_year_splits_and_sorts() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let records = synchronizer
            .fetch_last_n_months(date(2024, 1, 10), 6)
            .await
            .unwrap();

        let calls = synchronizer.source.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                WeekRange::single_year(2023, 28, 53),
                WeekRange::single_year(2024, 1, 1),
            ]
        );

        assert_eq!(records.first().map(AlertRecord::key), Some((28, 2023)));
        assert_eq!(records.last().map(AlertRecord::key), Some((1, 2024)));
        assert!(records
            .windows(2)
            .all(|pair| (pair[0].year, pair[0].week) < (pair[1].year, pair[1].week)));
    }

    #[test]
    fn spans_longer_than_a_year_cover_full_years_in_between() {
        let range = epiweek::range_covering_last_months(date(2024, 3, 15), 30);
        let segments = split_by_year(&range);

        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].start_year, 2021);
        assert_eq!(segments[0].end_week, MAX_WEEK);
        assert_eq!(segments[1], WeekRange::single_year(2022, 1, MAX_WEEK));
        assert_eq!(segments[2], WeekRange::single_year(2023, 1, MAX_WEEK));
        assert_eq!(segments[3].start_year, 2024);
        assert_eq!(segments[3].start_week, 1);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let store = MemoryStore::default();
        let incoming: Vec<AlertRecord> = (1..=5).map(|week| sample_record(week, 2024)).collect();

        let first = synchronizer.reconcile(&store, &incoming).await.unwrap();
        assert_eq!(
            first,
            ReconcileSummary {
                inserted: 5,
                updated: 0,
                unchanged: 0
            }
        );

        let second = synchronizer.reconcile(&store, &incoming).await.unwrap();
        assert_eq!(
            second,
            ReconcileSummary {
                inserted: 0,
                updated: 0,
                unchanged: 5
            }
        );
        assert_eq!(store.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn reconcile_updates_in_place() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let mut existing = sample_record(10, 2023);
        existing.notified_cases = 5;
        let store = MemoryStore::with_rows(vec![existing, sample_record(11, 2023)]);

        let mut incoming = sample_record(10, 2023);
        incoming.notified_cases = 8;

        let summary = synchronizer.reconcile(&store, &[incoming]).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted, 0);

        let rows = store.snapshot();
        let matching: Vec<_> = rows.iter().filter(|r| r.key() == (10, 2023)).collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].notified_cases, 8);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn failed_commit_leaves_store_untouched() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let original = vec![sample_record(1, 2024)];
        let store = MemoryStore {
            rows: Mutex::new(original.clone()),
            fail_on: Some((3, 2024)),
        };

        let mut changed = sample_record(1, 2024);
        changed.alert_level = 3;
        let incoming = vec![changed, sample_record(2, 2024), sample_record(3, 2024)];

        let result = synchronizer.reconcile(&store, &incoming).await;
        assert!(matches!(result, Err(SyncError::Store(_))));
        assert_eq!(store.snapshot(), original);
    }

    #[test]
    fn duplicate_keys_keep_the_last_occurrence() {
        let mut first = sample_record(4, 2024);
        first.notified_cases = 1;
        let mut second = sample_record(4, 2024);
        second.notified_cases = 2;

        let plan = plan_reconcile(&[], &[first, second]);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].notified_cases, 2);
    }

    #[tokio::test]
    async fn sync_fetches_and_stores() {
        let synchronizer = AlertSynchronizer::new(FakeSource::default());
        let store = MemoryStore::default();

        let outcome = synchronizer
            .sync_last_n_months(&store, date(2024, 1, 10), 6)
            .await
            .unwrap();

        assert_eq!(outcome.summary.inserted, outcome.records.len());
        assert_eq!(store.snapshot().len(), outcome.records.len());
    }
}
