use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::AppResult;

/// A paginated source of film location records. An empty page means the end.
///
/// Records come back undecoded so one malformed row cannot fail the page it arrived in.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch_page(&self, limit: u32, offset: u64) -> AppResult<Vec<Value>>;
}

/// Socrata (SODA) JSON endpoint for the film locations dataset.
pub struct SodaClient {
    client: reqwest::Client,
    url: String,
}

impl SodaClient {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl DatasetSource for SodaClient {
    async fn fetch_page(&self, limit: u32, offset: u64) -> AppResult<Vec<Value>> {
        debug!(limit = limit, offset = offset, "fetching dataset page");
        let records: Vec<Value> = self
            .client
            .get(&self.url)
            .query(&[("$limit", limit as u64), ("$offset", offset)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(records)
    }
}
