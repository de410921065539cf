use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::decode;
use crate::epiweek::EpiWeek;
use crate::error::SyncError;
use crate::models::AlertRecord;
use crate::sync::{AlertStore, ReconcilePlan};

const SELECT_ALERTS: &str = "SELECT week, year, week_start_ms, estimated_cases, \
     estimated_cases_min, estimated_cases_max, notified_cases, probability_rt1, \
     incidence_per_100k, alert_level, effective_reproduction_number, population, \
     receptivity, transmission, incidence_level, accumulated_notifications_year \
     FROM dengue_surveillance.alerts";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn alert_from_row(row: &PgRow) -> AlertRecord {
    AlertRecord {
        week: row.get("week"),
        year: row.get("year"),
        week_start_ms: row.get("week_start_ms"),
        estimated_cases: row.get("estimated_cases"),
        estimated_cases_min: row.get("estimated_cases_min"),
        estimated_cases_max: row.get("estimated_cases_max"),
        notified_cases: row.get("notified_cases"),
        probability_rt1: row.get("probability_rt1"),
        incidence_per_100k: row.get("incidence_per_100k"),
        alert_level: row.get("alert_level"),
        effective_reproduction_number: row.get("effective_reproduction_number"),
        population: row.get("population"),
        receptivity: row.get("receptivity"),
        transmission: row.get("transmission"),
        incidence_level: row.get("incidence_level"),
        accumulated_notifications_year: row.get("accumulated_notifications_year"),
    }
}

/// Inserts `alert`, or overwrites the row already holding its key when a
/// concurrent pass got there first.
async fn insert_alert(conn: &mut PgConnection, alert: &AlertRecord) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dengue_surveillance.alerts
        (id, week, year, week_start_ms, estimated_cases, estimated_cases_min,
         estimated_cases_max, notified_cases, probability_rt1, incidence_per_100k,
         alert_level, effective_reproduction_number, population, receptivity,
         transmission, incidence_level, accumulated_notifications_year)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (week, year) DO UPDATE
        SET week_start_ms = EXCLUDED.week_start_ms,
            estimated_cases = EXCLUDED.estimated_cases,
            estimated_cases_min = EXCLUDED.estimated_cases_min,
            estimated_cases_max = EXCLUDED.estimated_cases_max,
            notified_cases = EXCLUDED.notified_cases,
            probability_rt1 = EXCLUDED.probability_rt1,
            incidence_per_100k = EXCLUDED.incidence_per_100k,
            alert_level = EXCLUDED.alert_level,
            effective_reproduction_number = EXCLUDED.effective_reproduction_number,
            population = EXCLUDED.population,
            receptivity = EXCLUDED.receptivity,
            transmission = EXCLUDED.transmission,
            incidence_level = EXCLUDED.incidence_level,
            accumulated_notifications_year = EXCLUDED.accumulated_notifications_year,
            updated_at = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(alert.week)
    .bind(alert.year)
    .bind(alert.week_start_ms)
    .bind(alert.estimated_cases)
    .bind(alert.estimated_cases_min)
    .bind(alert.estimated_cases_max)
    .bind(alert.notified_cases)
    .bind(alert.probability_rt1)
    .bind(alert.incidence_per_100k)
    .bind(alert.alert_level)
    .bind(alert.effective_reproduction_number)
    .bind(alert.population)
    .bind(alert.receptivity)
    .bind(alert.transmission)
    .bind(alert.incidence_level)
    .bind(alert.accumulated_notifications_year)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn update_alert(conn: &mut PgConnection, alert: &AlertRecord) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE dengue_surveillance.alerts
        SET week_start_ms = $3,
            estimated_cases = $4,
            estimated_cases_min = $5,
            estimated_cases_max = $6,
            notified_cases = $7,
            probability_rt1 = $8,
            incidence_per_100k = $9,
            alert_level = $10,
            effective_reproduction_number = $11,
            population = $12,
            receptivity = $13,
            transmission = $14,
            incidence_level = $15,
            accumulated_notifications_year = $16,
            updated_at = now()
        WHERE week = $1 AND year = $2
        "#,
    )
    .bind(alert.week)
    .bind(alert.year)
    .bind(alert.week_start_ms)
    .bind(alert.estimated_cases)
    .bind(alert.estimated_cases_min)
    .bind(alert.estimated_cases_max)
    .bind(alert.notified_cases)
    .bind(alert.probability_rt1)
    .bind(alert.incidence_per_100k)
    .bind(alert.alert_level)
    .bind(alert.effective_reproduction_number)
    .bind(alert.population)
    .bind(alert.receptivity)
    .bind(alert.transmission)
    .bind(alert.incidence_level)
    .bind(alert.accumulated_notifications_year)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl AlertStore for PgAlertStore {
    async fn load_all(&self) -> Result<Vec<AlertRecord>, SyncError> {
        let rows = sqlx::query(SELECT_ALERTS).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(alert_from_row).collect())
    }

    async fn apply(&self, plan: &ReconcilePlan) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await?;

        for alert in &plan.inserts {
            insert_alert(&mut *tx, alert).await?;
        }
        for alert in &plan.updates {
            if update_alert(&mut *tx, alert).await? == 0 {
                // Row vanished since the scan; nothing in this subsystem
                // deletes, so treat it as a fresh insert.
                insert_alert(&mut *tx, alert).await?;
            }
        }

        // Dropping `tx` on an early return rolls the batch back.
        tx.commit().await?;
        Ok(())
    }
}

pub async fn list_alerts(pool: &PgPool) -> anyhow::Result<Vec<AlertRecord>> {
    let query = format!("{SELECT_ALERTS} ORDER BY year DESC, week DESC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(alert_from_row).collect())
}

pub async fn fetch_latest(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<AlertRecord>> {
    let query = format!("{SELECT_ALERTS} ORDER BY year DESC, week DESC LIMIT $1");
    let rows = sqlx::query(&query).bind(limit.max(0)).fetch_all(pool).await?;
    Ok(rows.iter().map(alert_from_row).collect())
}

pub async fn fetch_alert(pool: &PgPool, week: i32, year: i32) -> anyhow::Result<Option<AlertRecord>> {
    let query = format!("{SELECT_ALERTS} WHERE week = $1 AND year = $2");
    let row = sqlx::query(&query)
        .bind(week)
        .bind(year)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(alert_from_row))
}

pub async fn fetch_between(
    pool: &PgPool,
    start: EpiWeek,
    end: EpiWeek,
) -> anyhow::Result<Vec<AlertRecord>> {
    let query = format!(
        "{SELECT_ALERTS} WHERE (year, week) >= ($1, $2) AND (year, week) <= ($3, $4) \
         ORDER BY year, week"
    );
    let rows = sqlx::query(&query)
        .bind(start.year)
        .bind(start.week)
        .bind(end.year)
        .bind(end.week)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(alert_from_row).collect())
}

/// Direct creation. Returns `false` when the `(week, year)` key is taken.
pub async fn create_alert(pool: &PgPool, alert: &AlertRecord) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO dengue_surveillance.alerts
        (id, week, year, week_start_ms, estimated_cases, estimated_cases_min,
         estimated_cases_max, notified_cases, probability_rt1, incidence_per_100k,
         alert_level, effective_reproduction_number, population, receptivity,
         transmission, incidence_level, accumulated_notifications_year)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (week, year) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(alert.week)
    .bind(alert.year)
    .bind(alert.week_start_ms)
    .bind(alert.estimated_cases)
    .bind(alert.estimated_cases_min)
    .bind(alert.estimated_cases_max)
    .bind(alert.notified_cases)
    .bind(alert.probability_rt1)
    .bind(alert.incidence_per_100k)
    .bind(alert.alert_level)
    .bind(alert.effective_reproduction_number)
    .bind(alert.population)
    .bind(alert.receptivity)
    .bind(alert.transmission)
    .bind(alert.incidence_level)
    .bind(alert.accumulated_notifications_year)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub fn read_csv(csv_path: &std::path::Path) -> anyhow::Result<Vec<AlertRecord>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let records = decode::decode_csv(std::io::BufReader::new(file))?;
    Ok(records)
}
