//! Blocking client for the subset of the Chroma v1 REST API the pipeline needs.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::debug_log;
use crate::errors::{PipelineError, Result};
use crate::uploader::VectorSink;

/// Collection the upload binary writes into.
pub const DEFAULT_COLLECTION: &str = "props";

/// Connection to one Chroma server.
#[derive(Clone)]
pub struct ChromaClient {
    client: Client,
    base: String,
}

impl ChromaClient {
    /// Builds a client for `http://{host}:{port}`. No request is made until the first call.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(PipelineError::Configuration(
                "missing Chroma host".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                PipelineError::Configuration(format!("failed to build Chroma HTTP client: {err}"))
            })?;
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{port}", host.trim_end_matches('/'))
        } else {
            format!("http://{host}:{port}")
        };
        Ok(Self { client, base })
    }

    /// Server root, e.g. `http://localhost:8000`.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base, path.trim_start_matches('/'))
    }

    fn unreachable(&self, err: reqwest::Error) -> PipelineError {
        PipelineError::Connectivity {
            endpoint: self.base.clone(),
            reason: err.to_string(),
        }
    }

    fn check(operation: &'static str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        Err(PipelineError::Database {
            operation,
            status: status.as_u16(),
            body,
        })
    }

    /// Confirms the server answers; returns its nanosecond clock.
    pub fn heartbeat(&self) -> Result<u64> {
        let resp = self
            .client
            .get(self.url("heartbeat"))
            .send()
            .map_err(|err| self.unreachable(err))?;
        let beat: Heartbeat = Self::check("heartbeat", resp)?
            .json()
            .map_err(|err| self.unreachable(err))?;
        Ok(beat.nanoseconds)
    }

    /// Names and ids of every collection on the server.
    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let resp = self
            .client
            .get(self.url("collections"))
            .send()
            .map_err(|err| self.unreachable(err))?;
        Self::check("list collections", resp)?
            .json()
            .map_err(|err| self.unreachable(err))
    }

    /// Returns the named collection, creating it if absent.
    pub fn get_or_create_collection(&self, name: &str) -> Result<ChromaCollection> {
        let request = CreateCollection {
            name,
            get_or_create: true,
        };
        let resp = self
            .client
            .post(self.url("collections"))
            .json(&request)
            .send()
            .map_err(|err| self.unreachable(err))?;
        let info: CollectionInfo = Self::check("create collection", resp)?
            .json()
            .map_err(|err| self.unreachable(err))?;
        info!("using collection {} ({})", info.name, info.id);
        Ok(ChromaCollection {
            client: self.clone(),
            id: info.id,
            name: info.name,
        })
    }
}

/// Collection summary as returned by the server.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Server-assigned id used in collection URLs.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct Heartbeat {
    #[serde(rename = "nanosecond heartbeat")]
    nanoseconds: u64,
}

#[derive(Serialize)]
struct CreateCollection<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Serialize)]
struct AddRecords<'a> {
    ids: &'a [String],
    embeddings: &'a [Vec<f32>],
    documents: &'a [String],
}

/// Handle to one collection; the write target for [`crate::BatchUploader`].
#[derive(Clone)]
pub struct ChromaCollection {
    client: ChromaClient,
    id: String,
    name: String,
}

impl ChromaCollection {
    /// Server-assigned id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn add_url(&self) -> String {
        self.client.url(&format!("collections/{}/add", self.id))
    }
}

impl VectorSink for ChromaCollection {
    fn add(&mut self, ids: &[String], embeddings: &[Vec<f32>], documents: &[String]) -> Result<()> {
        if ids.len() != embeddings.len() || ids.len() != documents.len() {
            return Err(PipelineError::Configuration(format!(
                "add called with {} ids, {} embeddings and {} documents",
                ids.len(),
                embeddings.len(),
                documents.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }
        let request = AddRecords {
            ids,
            embeddings,
            documents,
        };
        debug_log!("adding {} records to {}", ids.len(), self.name);
        let resp = self
            .client
            .client
            .post(self.add_url())
            .json(&request)
            .send()
            .map_err(|err| self.client.unreachable(err))?;
        ChromaClient::check("add", resp)?;
        Ok(())
    }
}
