use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::models::Coordinates;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GeocodeFailure {
    #[error("no match")]
    NoMatch,
    #[error("provider returned {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Provider { status: String, message: Option<String> },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request failed: {0}")]
    Transport(String),
}

/// Turns a free-text address into coordinates. Failures are values, never panics or errors
/// that abort the caller.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str, locality: &str) -> Result<Coordinates, GeocodeFailure>;
}

pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleGeocoder {
    pub fn new(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        if api_key.trim().is_empty() {
            tracing::warn!("no GOOGLE_API_KEY provided, geocoding requests will be denied");
        }
        Self { client, api_key, base_url }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str, locality: &str) -> Result<Coordinates, GeocodeFailure> {
        let components = format!("locality:{locality}");
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("address", address),
                ("components", components.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GeocodeFailure::Transport(e.to_string()))?;

        let body = resp.text().await.map_err(|e| GeocodeFailure::Transport(e.to_string()))?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Coordinates, GeocodeFailure> {
    if body.trim().is_empty() {
        return Err(GeocodeFailure::Malformed("empty body".to_string()));
    }
    let resp: GeocodeResponse =
        serde_json::from_str(body).map_err(|e| GeocodeFailure::Malformed(e.to_string()))?;

    match resp.status.as_str() {
        "OK" => resp
            .results
            .into_iter()
            .next()
            .map(|r| Coordinates { lat: r.geometry.location.lat, lng: r.geometry.location.lng })
            .ok_or(GeocodeFailure::NoMatch),
        "ZERO_RESULTS" => Err(GeocodeFailure::NoMatch),
        _ => Err(GeocodeFailure::Provider { status: resp.status, message: resp.error_message }),
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[cfg(test)]
mod tests {
    use httptest::{
        Expectation, Server,
        matchers::{all_of, contains, request, url_decoded},
        responders::{json_encoded, status_code},
    };
    use serde_json::json;

    use super::*;

    fn geocoder(server: &Server) -> GoogleGeocoder {
        GoogleGeocoder::new(
            reqwest::Client::new(),
            "test-key".to_string(),
            server.url("/maps/api/geocode/json").to_string(),
        )
    }

    #[tokio::test]
    async fn resolves_first_result() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/maps/api/geocode/json"),
                request::query(url_decoded(contains(("key", "test-key")))),
                request::query(url_decoded(contains(("address", "Golden Gate Bridge")))),
                request::query(url_decoded(contains(("components", "locality:San Francisco")))),
            ])
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": [
                    {"geometry": {"location": {"lat": 37.8199286, "lng": -122.4782551}}},
                    {"geometry": {"location": {"lat": 0.0, "lng": 0.0}}}
                ]
            }))),
        );

        let coords = geocoder(&server).geocode("Golden Gate Bridge", "San Francisco").await;
        assert_eq!(coords, Ok(Coordinates { lat: 37.8199286, lng: -122.4782551 }));
    }

    #[tokio::test]
    async fn zero_results_is_no_match() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(json_encoded(json!({"status": "ZERO_RESULTS", "results": []}))),
        );

        let result = geocoder(&server).geocode("Nowhere", "San Francisco").await;
        assert_eq!(result, Err(GeocodeFailure::NoMatch));
    }

    #[tokio::test]
    async fn provider_errors_carry_reason() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(json_encoded(json!({
                    "status": "OVER_QUERY_LIMIT",
                    "error_message": "You have exceeded your daily request quota.",
                    "results": []
                }))),
        );

        let result = geocoder(&server).geocode("City Hall", "San Francisco").await;
        assert_eq!(
            result,
            Err(GeocodeFailure::Provider {
                status: "OVER_QUERY_LIMIT".to_string(),
                message: Some("You have exceeded your daily request quota.".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn http_errors_are_transport_failures() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(status_code(503)),
        );

        let result = geocoder(&server).geocode("City Hall", "San Francisco").await;
        assert!(matches!(result, Err(GeocodeFailure::Transport(_))));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_value() {
        let geocoder = GoogleGeocoder::new(
            reqwest::Client::new(),
            String::new(),
            "http://127.0.0.1:1/geocode".to_string(),
        );
        let result = geocoder.geocode("City Hall", "San Francisco").await;
        assert!(matches!(result, Err(GeocodeFailure::Transport(_))));
    }

    #[test]
    fn malformed_bodies() {
        assert!(matches!(parse_response(""), Err(GeocodeFailure::Malformed(_))));
        assert!(matches!(parse_response("{}"), Err(GeocodeFailure::Malformed(_))));
        assert!(matches!(parse_response("<html>"), Err(GeocodeFailure::Malformed(_))));
        assert!(matches!(
            parse_response(r#"{"status":"OK","results":[{"geometry":{}}]}"#),
            Err(GeocodeFailure::Malformed(_))
        ));
    }

    #[test]
    fn ok_without_results_is_no_match() {
        assert_eq!(parse_response(r#"{"status":"OK","results":[]}"#), Err(GeocodeFailure::NoMatch));
    }
}
