//! HTTP item source.
//!
//! The export endpoint returns one JSON object keyed by filter key, each
//! entry being a list of `{url, date}` records. Only records dated inside
//! the 7-week window are kept.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{SourceClient, SourceError};
use crate::domain::Item;

/// Default export endpoint
pub const DEFAULT_SOURCE_URL: &str = "https://infoslocales.ccmbg.com/export.php";

/// Length of the date window in days (7 weeks)
pub const WINDOW_DAYS: u64 = 7 * 7;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw record as served by the export endpoint
#[derive(Debug, Deserialize)]
struct SourceRecord {
    url: String,
    date: String,
}

/// Last day of the window starting at `start` (inclusive)
pub fn window_end(start: NaiveDate) -> NaiveDate {
    start
        .checked_add_days(Days::new(WINDOW_DAYS))
        .unwrap_or(NaiveDate::MAX)
}

/// Keep the items whose date falls in `[start, start + 7 weeks]`, in order.
///
/// Items with an unparseable date are dropped.
pub fn select_window(items: impl IntoIterator<Item = Item>, start: NaiveDate) -> Vec<Item> {
    let end = window_end(start);
    items
        .into_iter()
        .filter(|item| match item.date() {
            Some(date) => date >= start && date <= end,
            None => {
                debug!(locator = %item.locator, date = %item.date_label, "Skipping item with unreadable date");
                false
            }
        })
        .collect()
}

/// Source client backed by the HTTP export endpoint
pub struct HttpSourceClient {
    url: String,
    client: reqwest::Client,
}

impl Default for HttpSourceClient {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_URL)
    }
}

impl HttpSourceClient {
    /// Create a client for the given export URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(
        &self,
        filter_key: &str,
        window_start: NaiveDate,
    ) -> Result<Vec<Item>, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let records = match body.get(filter_key) {
            Some(serde_json::Value::Array(records)) => records.clone(),
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(SourceError::Decode(format!(
                    "entry for '{}' is not a list: {}",
                    filter_key, other
                )))
            }
        };

        let candidates = records.into_iter().filter_map(|value| {
            match serde_json::from_value::<SourceRecord>(value) {
                Ok(record) => Some(Item::new(record.url, record.date)),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed source record");
                    None
                }
            }
        });

        let items = select_window(candidates, window_start);
        debug!(count = items.len(), "Fetched items");
        Ok(items)
    }
}
