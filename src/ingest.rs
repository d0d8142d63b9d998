use std::{pin::pin, sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use jiff::{SignedDuration, Timestamp};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dataset::DatasetSource,
    error::AppResult,
    geocoder::{GeocodeFailure, Geocoder},
    models::{Coordinates, DatasetRecord, NormalizedRecord, RefreshStats},
    store::Store,
};

/// How geocoding calls are scheduled against the provider's quota.
#[derive(Clone, Copy, Debug)]
pub struct GeocodePacing {
    /// Minimum spacing between any two calls, across all workers.
    pub delay: Duration,
    /// Calls allowed in flight at once.
    pub concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub locality: String,
    pub page_size: u32,
    pub stale_after: SignedDuration,
    pub pacing: GeocodePacing,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locality: config.geocode_locality.clone(),
            page_size: config.dataset_page_size,
            stale_after: config.refresh_stale_after,
            pacing: GeocodePacing {
                delay: config.geocode_delay,
                concurrency: config.geocode_concurrency,
            },
        }
    }
}

/// True when no refresh has ever completed or the last one is at least `stale_after` old.
pub fn refresh_due(now: Timestamp, last_refresh: Option<Timestamp>, stale_after: SignedDuration) -> bool {
    match last_refresh {
        None => true,
        Some(last) => now.duration_since(last) >= stale_after,
    }
}

pub struct Pipeline {
    store: Store,
    source: Arc<dyn DatasetSource>,
    geocoder: Arc<dyn Geocoder>,
    settings: PipelineSettings,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    guard: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        store: Store,
        source: Arc<dyn DatasetSource>,
        geocoder: Arc<dyn Geocoder>,
        settings: PipelineSettings,
    ) -> Self {
        // A zero delay yields no quota, i.e. unpaced calls.
        let limiter = Quota::with_period(settings.pacing.delay).map(RateLimiter::direct);
        Self { store, source, geocoder, settings, limiter, guard: Mutex::new(()) }
    }

    /// Runs a full refresh only when the last one is missing or stale.
    pub async fn refresh_if_stale(&self) -> AppResult<Option<RefreshStats>> {
        // Checked under the guard so a caller that waited on a running refresh sees its result.
        let _running = self.guard.lock().await;

        let last_refresh = self.store.latest_refresh().await?;
        if !refresh_due(Timestamp::now(), last_refresh, self.settings.stale_after) {
            info!(last_refresh = ?last_refresh, "database already up to date");
            return Ok(None);
        }
        self.refresh().await.map(Some)
    }

    /// Replaces the whole catalog with a fresh pass over the dataset.
    pub async fn full_refresh(&self) -> AppResult<RefreshStats> {
        let _running = self.guard.lock().await;
        self.refresh().await
    }

    /// Callers must hold `guard`.
    async fn refresh(&self) -> AppResult<RefreshStats> {
        info!("starting full refresh");
        self.store.clear_catalog().await?;

        let mut stats = RefreshStats::default();
        let page_size = self.settings.page_size;
        let mut offset: u64 = 0;

        loop {
            let page = self
                .source
                .fetch_page(page_size, offset)
                .await
                .map_err(|err| err.context(format!("fetching dataset page at offset {offset}")))?;
            info!(offset = offset, records = page.len(), "fetched dataset page");
            if page.is_empty() {
                break;
            }

            stats.pages += 1;
            stats.records += page.len();
            self.ingest_page(page, &mut stats).await?;
            offset += u64::from(page_size);
        }

        let now = Timestamp::now();
        self.store.record_refresh(now).await?;
        info!(
            refreshed_at = %now,
            pages = stats.pages,
            records = stats.records,
            incomplete = stats.incomplete,
            movies = stats.movies_created,
            locations = stats.locations_saved,
            geocode_failures = stats.geocode_failures,
            "refresh complete"
        );
        Ok(stats)
    }

    async fn ingest_page(&self, page: Vec<Value>, stats: &mut RefreshStats) -> AppResult<()> {
        // Movies are settled in record order so the first record for a movie always wins,
        // whatever order the geocoding calls below complete in.
        let mut candidates = Vec::with_capacity(page.len());
        for raw in page {
            let record = match serde_json::from_value::<DatasetRecord>(raw) {
                Ok(record) => record,
                Err(err) => {
                    debug!(error = %err, "malformed record skipped");
                    stats.incomplete += 1;
                    continue;
                },
            };
            let Some(normalized) = NormalizedRecord::from_dataset(record) else {
                debug!("data incomplete, record skipped");
                stats.incomplete += 1;
                continue;
            };
            let (movie, created) = self.store.find_or_create_movie(&normalized.movie).await?;
            if created {
                stats.movies_created += 1;
            }
            candidates.push((movie, normalized.location));
        }

        let mut geocoded = pin!(
            stream::iter(candidates)
                .map(|(movie, location)| async move {
                    let result = self.geocode(&location.description).await;
                    (movie, location, result)
                })
                .buffered(self.settings.pacing.concurrency.max(1))
        );

        while let Some((movie, location, result)) = geocoded.next().await {
            match result {
                Ok(coordinates) => {
                    let coordinates = coordinates.rounded();
                    debug!(
                        title = %movie.title,
                        location = %location.description,
                        lat = coordinates.lat,
                        lng = coordinates.lng,
                        "geocoding successful"
                    );
                    self.store.insert_location(movie.id, &location, coordinates).await?;
                    stats.locations_saved += 1;
                },
                Err(failure) => {
                    warn!(
                        title = %movie.title,
                        location = %location.description,
                        error = %failure,
                        "geocoding failed, location dropped"
                    );
                    stats.geocode_failures += 1;
                },
            }
        }

        Ok(())
    }

    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeFailure> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        self.geocoder.geocode(address, &self.settings.locality).await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex as StdMutex};

    use async_trait::async_trait;
    use sea_orm::EntityTrait;
    use serde_json::json;

    use super::*;
    use crate::{
        entities::{location, movie},
        error::AppError,
        models::BoundingBox,
    };

    struct PagedSource {
        records: Vec<Value>,
        requests: StdMutex<Vec<(u32, u64)>>,
        fail: bool,
    }

    impl PagedSource {
        fn new(records: Vec<Value>) -> Self {
            Self { records, requests: StdMutex::new(Vec::new()), fail: false }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::new(vec![]) }
        }

        fn requests(&self) -> Vec<(u32, u64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DatasetSource for PagedSource {
        async fn fetch_page(&self, limit: u32, offset: u64) -> AppResult<Vec<Value>> {
            self.requests.lock().unwrap().push((limit, offset));
            if self.fail {
                return Err(AppError::from(anyhow::anyhow!("dataset unavailable")));
            }
            Ok(self.records.iter().skip(offset as usize).take(limit as usize).cloned().collect())
        }
    }

    /// Resolves addresses from a fixed table; anything else is a provider failure.
    struct TableGeocoder {
        known: HashMap<&'static str, Coordinates>,
        calls: StdMutex<Vec<(String, String)>>,
    }

    impl TableGeocoder {
        fn new(known: &[(&'static str, f64, f64)]) -> Self {
            Self {
                known: known.iter().map(|&(a, lat, lng)| (a, Coordinates { lat, lng })).collect(),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Geocoder for TableGeocoder {
        async fn geocode(&self, address: &str, locality: &str) -> Result<Coordinates, GeocodeFailure> {
            self.calls.lock().unwrap().push((address.to_string(), locality.to_string()));
            self.known.get(address).copied().ok_or_else(|| GeocodeFailure::Provider {
                status: "REQUEST_DENIED".to_string(),
                message: None,
            })
        }
    }

    fn settings(page_size: u32) -> PipelineSettings {
        PipelineSettings {
            locality: "San Francisco".to_string(),
            page_size,
            stale_after: SignedDuration::from_hours(24),
            pacing: GeocodePacing { delay: Duration::ZERO, concurrency: 1 },
        }
    }

    async fn pipeline(
        source: Arc<PagedSource>,
        geocoder: Arc<TableGeocoder>,
        settings: PipelineSettings,
    ) -> (Pipeline, Store) {
        let store = Store::new(crate::db::memory().await);
        (Pipeline::new(store.clone(), source, geocoder, settings), store)
    }

    const EVERYWHERE: BoundingBox = BoundingBox { south: -90.0, west: -180.0, north: 90.0, east: 180.0 };

    #[test]
    fn refresh_due_rules() {
        let now = Timestamp::from_second(1_700_000_000).unwrap();
        let day = SignedDuration::from_hours(24);

        assert!(refresh_due(now, None, day));
        assert!(refresh_due(now, Some(now - day), day));
        assert!(refresh_due(now, Some(now - SignedDuration::from_hours(48)), day));
        assert!(!refresh_due(now, Some(now - SignedDuration::from_hours(23)), day));
        assert!(!refresh_due(now, Some(now), day));
    }

    #[tokio::test]
    async fn golden_gate_end_to_end() {
        let source = Arc::new(PagedSource::new(vec![json!({
            "title": "Test Movie 1", "locations": "Golden Gate Bridge", "release_year": "0099"
        })]));
        let geocoder = Arc::new(TableGeocoder::new(&[("Golden Gate Bridge", 37.8199, -122.4789)]));
        let (pipeline, store) = pipeline(source, geocoder.clone(), settings(1000)).await;

        let stats = pipeline.full_refresh().await.unwrap();
        assert_eq!(stats.locations_saved, 1);
        assert_eq!(
            geocoder.calls(),
            [("Golden Gate Bridge".to_string(), "San Francisco".to_string())]
        );

        let bounds = BoundingBox { south: 35.0, west: -130.0, north: 40.0, east: -120.0 };
        let rows = store.locations_in_bounds(bounds, None, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        let (loc, movie) = &rows[0];
        assert_eq!((loc.latitude, loc.longitude), (37.8199, -122.4789));
        assert_eq!(movie.title, "Test Movie 1");
        assert_eq!(movie.release_year, 99);
    }

    #[tokio::test]
    async fn incomplete_records_leave_store_untouched() {
        let source = Arc::new(PagedSource::new(vec![
            json!({"title": "No Location", "release_year": "2001"}),
            json!({"locations": "City Hall", "release_year": "2001"}),
            json!({"title": "No Year", "locations": "City Hall"}),
        ]));
        let geocoder = Arc::new(TableGeocoder::new(&[("City Hall", 37.7793, -122.4193)]));
        let (pipeline, store) = pipeline(source, geocoder.clone(), settings(1000)).await;

        let stats = pipeline.full_refresh().await.unwrap();

        assert_eq!(stats.incomplete, 3);
        assert!(geocoder.calls().is_empty());
        assert!(movie::Entity::find().all(store.db()).await.unwrap().is_empty());
        assert!(location::Entity::find().all(store.db()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn odd_typed_record_is_skipped_and_rest_of_page_kept() {
        let source = Arc::new(PagedSource::new(vec![
            json!({"title": "Vertigo", "locations": "Fort Point", "release_year": "1958"}),
            json!({"title": "Bullitt", "locations": "Taylor Street", "release_year": "1968", "actor_1": 7}),
            json!({"title": 42, "locations": "City Hall", "release_year": "2001"}),
            json!("not a record"),
            json!({"title": "Dirty Harry", "locations": "City Hall", "release_year": "1971"}),
        ]));
        let geocoder = Arc::new(TableGeocoder::new(&[
            ("Fort Point", 37.8106, -122.4771),
            ("Taylor Street", 37.7946, -122.4135),
            ("City Hall", 37.7793, -122.4193),
        ]));
        let (pipeline, store) = pipeline(source, geocoder.clone(), settings(2)).await;

        let stats = pipeline.full_refresh().await.unwrap();

        assert_eq!(stats.records, 5);
        assert_eq!(stats.incomplete, 3);
        assert_eq!(stats.locations_saved, 2);
        assert_eq!(geocoder.calls().len(), 2);
        let titles: Vec<String> =
            movie::Entity::find().all(store.db()).await.unwrap().into_iter().map(|m| m.title).collect();
        assert_eq!(titles, ["Vertigo", "Dirty Harry"]);
        assert!(store.latest_refresh().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_movies_keep_first_fields() {
        let source = Arc::new(PagedSource::new(vec![
            json!({"title": "Vertigo", "locations": "Fort Point", "release_year": "1958",
                   "director": "Alfred Hitchcock"}),
            json!({"title": "Vertigo", "locations": "Mission Dolores", "release_year": "1958",
                   "director": "Not Hitchcock", "writer": "Alec Coppel"}),
        ]));
        let geocoder = Arc::new(TableGeocoder::new(&[
            ("Fort Point", 37.8106, -122.4771),
            ("Mission Dolores", 37.7642, -122.4269),
        ]));
        let (pipeline, store) = pipeline(source, geocoder, settings(1000)).await;

        let stats = pipeline.full_refresh().await.unwrap();

        let movies = movie::Entity::find().all(store.db()).await.unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].director.as_deref(), Some("Alfred Hitchcock"));
        assert_eq!(movies[0].writer, None);
        assert_eq!(stats.movies_created, 1);
        assert_eq!(store.locations_in_bounds(EVERYWHERE, None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_geocode_drops_location_keeps_movie() {
        let source = Arc::new(PagedSource::new(vec![json!({
            "title": "Bullitt", "locations": "Somewhere unmappable", "release_year": "1968",
            "fun_facts": "Famous car chase", "actor_1": "Steve McQueen"
        })]));
        let geocoder = Arc::new(TableGeocoder::new(&[]));
        let (pipeline, store) = pipeline(source, geocoder, settings(1000)).await;

        let stats = pipeline.full_refresh().await.unwrap();

        assert_eq!(stats.geocode_failures, 1);
        assert_eq!(stats.locations_saved, 0);
        assert_eq!(movie::Entity::find().all(store.db()).await.unwrap().len(), 1);
        assert!(location::Entity::find().all(store.db()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pages_until_empty_and_records_refresh() {
        let records = (0..5)
            .map(|i| json!({"title": format!("Movie {i}"), "locations": "City Hall", "release_year": "2000"}))
            .collect();
        let source = Arc::new(PagedSource::new(records));
        let geocoder = Arc::new(TableGeocoder::new(&[("City Hall", 37.7793, -122.4193)]));
        let (pipeline, store) = pipeline(source.clone(), geocoder, settings(2)).await;

        let stats = pipeline.full_refresh().await.unwrap();

        assert_eq!(source.requests(), [(2, 0), (2, 2), (2, 4), (2, 6)]);
        assert_eq!(stats.pages, 3);
        assert_eq!(stats.records, 5);
        assert_eq!(stats.locations_saved, 5);
        assert!(store.latest_refresh().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn full_refresh_replaces_previous_catalog() {
        let source = Arc::new(PagedSource::new(vec![json!({
            "title": "Vertigo", "locations": "Fort Point", "release_year": "1958"
        })]));
        let geocoder = Arc::new(TableGeocoder::new(&[("Fort Point", 37.8106, -122.4771)]));
        let (pipeline, store) = pipeline(source, geocoder, settings(1000)).await;

        pipeline.full_refresh().await.unwrap();
        pipeline.full_refresh().await.unwrap();

        assert_eq!(movie::Entity::find().all(store.db()).await.unwrap().len(), 1);
        assert_eq!(location::Entity::find().all(store.db()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dataset_failure_halts_without_recording() {
        let source = Arc::new(PagedSource::failing());
        let geocoder = Arc::new(TableGeocoder::new(&[]));
        let (pipeline, store) = pipeline(source, geocoder, settings(1000)).await;

        let err = pipeline.full_refresh().await.unwrap_err();
        assert_eq!(err.to_string(), "fetching dataset page at offset 0");
        assert_eq!(store.latest_refresh().await.unwrap(), None);
    }

    #[tokio::test]
    async fn conditional_refresh_skips_when_fresh() {
        let source = Arc::new(PagedSource::new(vec![]));
        let geocoder = Arc::new(TableGeocoder::new(&[]));
        let (pipeline, store) = pipeline(source.clone(), geocoder, settings(1000)).await;

        assert!(pipeline.refresh_if_stale().await.unwrap().is_some());
        assert_eq!(source.requests().len(), 1);

        assert!(pipeline.refresh_if_stale().await.unwrap().is_none());
        assert_eq!(source.requests().len(), 1);

        store.record_refresh(Timestamp::now() - SignedDuration::from_hours(30)).await.unwrap();
        assert!(pipeline.refresh_if_stale().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn simultaneous_conditional_refreshes_run_once() {
        let source = Arc::new(PagedSource::new(vec![json!({
            "title": "Vertigo", "locations": "Fort Point", "release_year": "1958"
        })]));
        let geocoder = Arc::new(TableGeocoder::new(&[("Fort Point", 37.8106, -122.4771)]));
        let (pipeline, store) = pipeline(source.clone(), geocoder, settings(1000)).await;

        let (a, b) = tokio::join!(pipeline.refresh_if_stale(), pipeline.refresh_if_stale());

        let ran = [a.unwrap(), b.unwrap()].iter().filter(|stats| stats.is_some()).count();
        assert_eq!(ran, 1);
        assert_eq!(source.requests().len(), 2);
        assert_eq!(location::Entity::find().all(store.db()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conditional_refresh_runs_when_stale() {
        let source = Arc::new(PagedSource::new(vec![]));
        let geocoder = Arc::new(TableGeocoder::new(&[]));
        let (pipeline, store) = pipeline(source.clone(), geocoder, settings(1000)).await;

        store.record_refresh(Timestamp::now() - SignedDuration::from_hours(25)).await.unwrap();
        assert!(pipeline.refresh_if_stale().await.unwrap().is_some());
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_geocoding_keeps_results_and_pacing() {
        let records = ["Fort Point", "City Hall", "Coit Tower", "Nowhere"]
            .iter()
            .map(|place| json!({"title": "Vertigo", "locations": place, "release_year": "1958"}))
            .collect();
        let source = Arc::new(PagedSource::new(records));
        let geocoder = Arc::new(TableGeocoder::new(&[
            ("Fort Point", 37.8106, -122.4771),
            ("City Hall", 37.7793, -122.4193),
            ("Coit Tower", 37.8024, -122.4058),
        ]));
        let mut settings = settings(1000);
        settings.pacing = GeocodePacing { delay: Duration::from_millis(20), concurrency: 3 };
        let (pipeline, store) = pipeline(source, geocoder.clone(), settings).await;

        let started = std::time::Instant::now();
        let stats = pipeline.full_refresh().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(geocoder.calls().len(), 4);
        assert_eq!(stats.locations_saved, 3);
        assert_eq!(stats.geocode_failures, 1);
        assert_eq!(store.locations_in_bounds(EVERYWHERE, None, 10).await.unwrap().len(), 3);
    }
}
