use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

pub const DEFAULT_INFODENGUE_URL: &str = "https://info.dengue.mat.br/api/alertcity";

/// Belo Horizonte's IBGE code.
pub const DEFAULT_GEOCODE: &str = "3106200";

pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub infodengue_url: String,
    pub geocode: String,
    pub disease: String,
    pub upstream_timeout: Duration,
    pub sync_months: u32,
    pub port: u16,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set to a production Postgres instance")?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            infodengue_url: try_load("INFODENGUE_URL", DEFAULT_INFODENGUE_URL)?,
            geocode: try_load("DENGUE_GEOCODE", DEFAULT_GEOCODE)?,
            disease: try_load("DENGUE_DISEASE", "dengue")?,
            upstream_timeout: Duration::from_secs(try_load("UPSTREAM_TIMEOUT_SECS", "30")?),
            sync_months: try_load("SYNC_MONTHS", "6")?,
            port: try_load("PORT", "5190")?,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("environment variable {key} has an invalid value '{raw}': {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let months: u32 = try_load("DENGUE_SYNC_TEST_UNSET_MONTHS", "6").unwrap();
        assert_eq!(months, 6);
    }

    #[test]
    fn unparsable_defaults_are_reported() {
        let result: anyhow::Result<u16> = try_load("DENGUE_SYNC_TEST_UNSET_PORT", "not-a-port");
        let message = result.unwrap_err().to_string();
        assert!(message.contains("DENGUE_SYNC_TEST_UNSET_PORT"));
    }
}
