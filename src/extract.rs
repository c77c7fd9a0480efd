use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;
use crate::normalize::decode_payload;
use crate::raw_store::RawStore;

pub const DEFAULT_BASE_URL: &str = "https://www.ec.europa.eu/agrifood/api/beef/production";

/// Filter sent to the production endpoint. Every list is comma-joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionQuery {
    pub member_state_codes: Vec<String>,
    pub years: Vec<i32>,
    pub categories: Vec<String>,
    pub months: Vec<u32>,
}

impl ProductionQuery {
    pub fn for_period(
        member_state_codes: Vec<String>,
        categories: Vec<String>,
        year: i32,
        month: u32,
    ) -> Self {
        Self {
            member_state_codes,
            years: vec![year],
            categories,
            months: vec![month],
        }
    }

    pub fn url(&self, base_url: &str) -> Result<Url, PipelineError> {
        let years = join(&self.years);
        let months = join(&self.months);
        let states = self.member_state_codes.join(",");
        let categories = self.categories.join(",");
        Url::parse_with_params(
            base_url,
            &[
                ("memberStateCodes", states.as_str()),
                ("years", years.as_str()),
                ("categories", categories.as_str()),
                ("months", months.as_str()),
            ],
        )
        .map_err(|err| PipelineError::InvalidConfig(format!("bad base url {base_url}: {err}")))
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// The month before `today`, as `(year, month)`.
pub fn previous_month(today: NaiveDate) -> (i32, u32) {
    if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    }
}

/// Raw store key for a payload fetched at `now`.
pub fn object_key_for(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S.json").to_string()
}

pub trait DatasetClient: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError>;
}

#[derive(Clone)]
pub struct AgrifoodHttpClient {
    client: Client,
}

impl AgrifoodHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("agridata/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PipelineError::UpstreamHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PipelineError::UpstreamHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl DatasetClient for AgrifoodHttpClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| PipelineError::UpstreamHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "upstream request failed".to_string());
            return Err(PipelineError::UpstreamStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| PipelineError::UpstreamHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub bucket: String,
    pub object_key: String,
    pub url: String,
    pub records: usize,
    pub bytes: usize,
}

/// Fetches one upstream payload and persists it unchanged to the raw store.
pub fn extract<C: DatasetClient, S: RawStore>(
    client: &C,
    store: &S,
    bucket: &str,
    base_url: &str,
    query: &ProductionQuery,
    now: DateTime<Utc>,
) -> Result<ExtractReport, PipelineError> {
    let url = query.url(base_url)?;
    info!(%url, "fetching production data");
    let body = client.fetch(url.as_str())?;
    let records = decode_payload(&body)?.len();

    let object_key = object_key_for(now);
    store.write(bucket, &object_key, &body)?;
    info!(bucket, object_key = %object_key, records, bytes = body.len(), "raw payload stored");

    Ok(ExtractReport {
        bucket: bucket.to_string(),
        object_key,
        url: url.to_string(),
        records,
        bytes: body.len(),
    })
}
