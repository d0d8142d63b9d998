use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use crate::AppState;

type Params = Query<HashMap<String, String>>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sfmovies/services/locations", get(locations))
        .route("/sfmovies/services/location_detail", get(location_detail))
        .route("/sfmovies/services/title_autocomplete", get(title_autocomplete))
        .with_state(state)
}

pub async fn locations(State(state): State<Arc<AppState>>, Query(q): Params) -> Response {
    let found = state.queries.locations(param(&q, "bounds"), param(&q, "movie_title")).await;
    respond(encode(&found, "[]"), param(&q, "callback"))
}

pub async fn location_detail(State(state): State<Arc<AppState>>, Query(q): Params) -> Response {
    let body = match state.queries.location_detail(param(&q, "location_id")).await {
        Some(detail) => encode(&detail, "{}"),
        None => "{}".to_string(),
    };
    respond(body, param(&q, "callback"))
}

pub async fn title_autocomplete(State(state): State<Arc<AppState>>, Query(q): Params) -> Response {
    let suggestions = state.queries.title_autocomplete(param(&q, "term")).await;
    respond(encode(&suggestions, "[]"), param(&q, "callback"))
}

fn param<'a>(q: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    q.get(name).map(String::as_str)
}

fn encode<T: Serialize>(value: &T, empty: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to encode response");
        empty.to_string()
    })
}

/// Always 200. With a `callback` the payload is wrapped as `callback(payload)` for script tags.
fn respond(json: String, callback: Option<&str>) -> Response {
    let body = match callback {
        Some(callback) => format!("{callback}({json})"),
        None => json,
    };
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
