//! Read side of the API. Every operation parses its raw parameters first; anything that does not
//! parse produces the empty response rather than an error.

use tracing::warn;

use crate::{
    error::AppResult,
    models::{BoundingBox, LocationDetail, LocationSummary, TitleSuggestion},
    store::Store,
};

/// Parses `south,west,north,east`. Exactly four finite decimals, no empty tokens.
pub fn parse_bounds(raw: &str) -> Option<BoundingBox> {
    let mut values = [0.0_f64; 4];
    let mut tokens = raw.split(',');
    for slot in values.iter_mut() {
        *slot = parse_decimal(tokens.next()?)?;
    }
    if tokens.next().is_some() {
        return None;
    }
    let [south, west, north, east] = values;
    Some(BoundingBox { south, west, north, east })
}

fn parse_decimal(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Location ids are positive integers written in plain decimal, optionally padded with whitespace.
pub fn parse_location_id(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok().filter(|id| *id > 0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocationSearch {
    pub bounds: BoundingBox,
    pub title_prefix: Option<String>,
}

impl LocationSearch {
    pub fn parse(bounds: Option<&str>, movie_title: Option<&str>) -> Option<Self> {
        Some(Self {
            bounds: parse_bounds(bounds?)?,
            title_prefix: movie_title.map(str::to_string),
        })
    }
}

#[derive(Clone)]
pub struct QueryService {
    store: Store,
    max_locations: u64,
    max_suggestions: u64,
}

impl QueryService {
    pub fn new(store: Store, max_locations: u64, max_suggestions: u64) -> Self {
        Self { store, max_locations, max_suggestions }
    }

    pub async fn locations(&self, bounds: Option<&str>, movie_title: Option<&str>) -> Vec<LocationSummary> {
        let Some(search) = LocationSearch::parse(bounds, movie_title) else {
            return Vec::new();
        };
        or_empty("locations", self.search(&search).await)
    }

    async fn search(&self, search: &LocationSearch) -> AppResult<Vec<LocationSummary>> {
        let rows = self
            .store
            .locations_in_bounds(search.bounds, search.title_prefix.as_deref(), self.max_locations)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(loc, movie)| LocationSummary {
                location_id: loc.id,
                movie_title: movie.title,
                latitude: loc.latitude,
                longitude: loc.longitude,
            })
            .collect())
    }

    pub async fn location_detail(&self, location_id: Option<&str>) -> Option<LocationDetail> {
        let id = parse_location_id(location_id?)?;
        let row = match self.store.location_with_movie(id).await {
            Ok(row) => row,
            Err(err) => {
                warn!(location_id = id, error = %err, "location detail lookup failed");
                None
            },
        };
        let (loc, movie) = row?;
        Some(LocationDetail {
            location_id: loc.id,
            title: movie.title,
            release_year: movie.release_year,
            production_company: movie.production_company,
            distributor: movie.distributor,
            director: movie.director,
            writer: movie.writer,
            locations: loc.description,
            latitude: loc.latitude,
            longitude: loc.longitude,
            fun_facts: loc.fun_facts,
            actor_1: loc.actor_1,
            actor_2: loc.actor_2,
            actor_3: loc.actor_3,
        })
    }

    /// A missing term lists movies unfiltered; a present one (even empty) is a prefix filter.
    pub async fn title_autocomplete(&self, term: Option<&str>) -> Vec<TitleSuggestion> {
        let movies = self.store.movies_by_title_prefix(term, self.max_suggestions).await;
        or_empty("title_autocomplete", movies)
            .into_iter()
            .map(|m| TitleSuggestion::new(m.title))
            .collect()
    }
}

fn or_empty<T>(operation: &str, result: AppResult<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|err| {
        warn!(operation = operation, error = %err, "query failed, answering with no results");
        Vec::new()
    })
}
