//! Google Cloud Storage reader over the JSON API.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{matches_suffix, ObjectStore};
use crate::debug_log;
use crate::errors::{PipelineError, Result};

/// Public JSON API endpoint.
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Blocking GCS client. Objects are downloaded whole with `alt=media`.
#[derive(Clone)]
pub struct GcsStore {
    client: Client,
    endpoint: Url,
}

impl GcsStore {
    /// Builds a new client.
    ///
    /// # Arguments
    /// * `endpoint` - API root, usually [`DEFAULT_GCS_ENDPOINT`]; emulators use their own
    /// * `access_token` - OAuth bearer token; `None` works for public buckets
    pub fn new(endpoint: &str, access_token: Option<&str>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/')).map_err(|err| {
            PipelineError::Configuration(format!("invalid storage endpoint {endpoint}: {err}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(PipelineError::Configuration(format!(
                "storage endpoint {endpoint} cannot be used as a base URL"
            )));
        }
        let mut headers = HeaderMap::new();
        if let Some(token) = access_token.map(str::trim).filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                PipelineError::Configuration("invalid storage access token".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                PipelineError::Configuration(format!("failed to build storage HTTP client: {err}"))
            })?;
        Ok(Self { client, endpoint })
    }

    fn objects_url(&self, bucket: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", bucket, "o"]);
        }
        url
    }

    /// Download URL for one object; the name is encoded as a single path segment.
    pub fn media_url(&self, bucket: &str, object: &str) -> Url {
        let mut url = self.objects_url(bucket);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(object);
        }
        url.query_pairs_mut().append_pair("alt", "media");
        url
    }

    fn storage_error(object: String, err: impl ToString) -> PipelineError {
        PipelineError::Storage {
            object,
            reason: err.to_string(),
        }
    }
}

impl ObjectStore for GcsStore {
    fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        let url = self.media_url(bucket, object);
        let location = format!("gs://{bucket}/{object}");
        debug_log!("fetching {}", location);
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|err| Self::storage_error(location.clone(), err))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PipelineError::not_found(bucket, object));
        }
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Self::storage_error(location, format!("{status}: {body}")));
        }
        let bytes = resp
            .bytes()
            .map_err(|err| Self::storage_error(location.clone(), err))?;
        debug_log!("fetched {} ({} bytes)", location, bytes.len());
        Ok(bytes.to_vec())
    }

    fn list(&self, bucket: &str, suffixes: &[&str]) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.objects_url(bucket);
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("fields", "items(name),nextPageToken");
                if let Some(token) = page_token.as_deref() {
                    query.append_pair("pageToken", token);
                }
            }
            let location = format!("gs://{bucket}");
            let resp = self
                .client
                .get(url)
                .send()
                .map_err(|err| Self::storage_error(location.clone(), err))?;
            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                return Err(PipelineError::not_found(bucket, ""));
            }
            if !status.is_success() {
                let body = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                return Err(Self::storage_error(location, format!("{status}: {body}")));
            }
            let page: ListPage = resp
                .json()
                .map_err(|err| Self::storage_error(location, err))?;
            names.extend(
                page.items
                    .into_iter()
                    .map(|item| item.name)
                    .filter(|name| matches_suffix(name, suffixes)),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(names)
    }
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}
