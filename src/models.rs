use serde::{Deserialize, Serialize};

/// One raw row of the film locations dataset. Every field may be missing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DatasetRecord {
    pub title: Option<String>,
    pub locations: Option<String>,
    pub release_year: Option<ReleaseYear>,
    pub production_company: Option<String>,
    pub distributor: Option<String>,
    pub director: Option<String>,
    pub writer: Option<String>,
    pub fun_facts: Option<String>,
    pub actor_1: Option<String>,
    pub actor_2: Option<String>,
    pub actor_3: Option<String>,
}

/// The dataset publishes years as strings (`"0099"`), but numbers are accepted too.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ReleaseYear {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

impl ReleaseYear {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ReleaseYear::Number(n) => i32::try_from(*n).ok(),
            ReleaseYear::Text(s) => s.trim().parse().ok(),
            ReleaseYear::Other(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewMovie {
    pub title: String,
    pub release_year: i32,
    pub production_company: Option<String>,
    pub distributor: Option<String>,
    pub director: Option<String>,
    pub writer: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewLocation {
    pub description: String,
    pub fun_facts: Option<String>,
    pub actors: [Option<String>; 3],
}

/// A dataset record that carries everything needed to attempt ingestion.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedRecord {
    pub movie: NewMovie,
    pub location: NewLocation,
}

impl NormalizedRecord {
    /// Returns `None` when title, location or a parseable release year is missing.
    pub fn from_dataset(record: DatasetRecord) -> Option<Self> {
        let title = record.title?;
        let description = record.locations?;
        let release_year = record.release_year?.as_i32()?;

        Some(Self {
            movie: NewMovie {
                title,
                release_year,
                production_company: record.production_company,
                distributor: record.distributor,
                director: record.director,
                writer: record.writer,
            },
            location: NewLocation {
                description,
                fun_facts: record.fun_facts,
                actors: [record.actor_1, record.actor_2, record.actor_3],
            },
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Stored coordinates keep four decimal places (roughly 11 m).
    pub fn rounded(self) -> Self {
        Self { lat: round4(self.lat), lng: round4(self.lng) }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Inclusive south/west/north/east box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationSummary {
    pub location_id: i32,
    pub movie_title: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationDetail {
    pub location_id: i32,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Release Year")]
    pub release_year: i32,
    #[serde(rename = "Production Company")]
    pub production_company: Option<String>,
    #[serde(rename = "Distributor")]
    pub distributor: Option<String>,
    #[serde(rename = "Director")]
    pub director: Option<String>,
    #[serde(rename = "Writer")]
    pub writer: Option<String>,
    #[serde(rename = "Locations")]
    pub locations: String,
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    #[serde(rename = "Fun Facts")]
    pub fun_facts: Option<String>,
    #[serde(rename = "Actor 1")]
    pub actor_1: Option<String>,
    #[serde(rename = "Actor 2")]
    pub actor_2: Option<String>,
    #[serde(rename = "Actor 3")]
    pub actor_3: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TitleSuggestion {
    pub label: String,
    pub value: String,
}

impl TitleSuggestion {
    pub fn new(title: String) -> Self {
        Self { label: title.clone(), value: title }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RefreshStats {
    pub pages: usize,
    pub records: usize,
    pub incomplete: usize,
    pub movies_created: usize,
    pub locations_saved: usize,
    pub geocode_failures: usize,
}
