use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

const GOOGLE_GEOCODING_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const SFMOVIES_DATASET_URL: &str = "https://data.sfgov.org/resource/yitu-d5am.json";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub google_api_key: String,
    pub geocoding_url: String,
    pub geocode_locality: String,
    pub geocode_delay: Duration,
    pub geocode_concurrency: usize,
    pub dataset_url: String,
    pub dataset_page_size: u32,
    pub refresh_stale_after: jiff::SignedDuration,
    /// `None` disables the background refresh check in `serve`.
    pub refresh_check_interval: Option<Duration>,
    pub max_locations: u64,
    pub max_suggestions: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port: u16 = parse_var(&lookup, "PORT", 3000)?;

        let geocode_delay_ms: u64 = parse_var(&lookup, "GEOCODE_DELAY_MS", 100)?;
        let stale_after_hours: i64 = parse_var(&lookup, "REFRESH_STALE_AFTER_HOURS", 24)?;
        let check_interval_minutes: u64 =
            parse_var(&lookup, "REFRESH_CHECK_INTERVAL_MINUTES", 60)?;

        let geocode_concurrency: usize = parse_var(&lookup, "GEOCODE_CONCURRENCY", 1)?;
        let dataset_page_size: u32 = parse_var(&lookup, "DATASET_PAGE_SIZE", 1000)?;
        if dataset_page_size == 0 {
            anyhow::bail!("DATASET_PAGE_SIZE must be greater than zero");
        }

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            database_url: var("DATABASE_URL", "sqlite://reelsites.db?mode=rwc"),
            google_api_key: var("GOOGLE_API_KEY", ""),
            geocoding_url: var("GEOCODING_URL", GOOGLE_GEOCODING_URL),
            geocode_locality: var("GEOCODE_LOCALITY", "San Francisco"),
            geocode_delay: Duration::from_millis(geocode_delay_ms),
            geocode_concurrency: geocode_concurrency.max(1),
            dataset_url: var("DATASET_URL", SFMOVIES_DATASET_URL),
            dataset_page_size,
            refresh_stale_after: jiff::SignedDuration::from_hours(stale_after_hours),
            refresh_check_interval: (check_interval_minutes > 0)
                .then(|| Duration::from_secs(check_interval_minutes * 60)),
            max_locations: parse_var(&lookup, "MAX_LOCATIONS", 200)?,
            max_suggestions: parse_var(&lookup, "MAX_SUGGESTIONS", 10)?,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key}={raw:?}")),
        None => Ok(default),
    }
}
