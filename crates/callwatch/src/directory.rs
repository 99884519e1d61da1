//! Student directory lookups.
//!
//! A lookup asks the school's directory which student and parent a phone
//! number belongs to. The debouncer never propagates lookup failures: every
//! [`LookupError`] is treated as "no match".

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::call::CallState;
use crate::config::DirectoryConfig;
use crate::error::{Error, Result};
use crate::phone::normalize;
use crate::policy::StudentMatch;

/// Errors a lookup can settle with.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No directory source is configured.
    #[error("student directory not configured: {0}")]
    NotConfigured(String),

    /// The directory rejected our credentials.
    #[error("student directory rejected credentials")]
    Unauthorized,

    /// The directory answered with a non-success status.
    #[error("student directory returned status {0}")]
    Status(u16),

    /// The request never completed.
    #[error("student directory unreachable: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("malformed directory response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The lookup task ended without reporting a result.
    #[error("lookup abandoned before completion")]
    Abandoned,
}

/// Request body sent to the directory's phone search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupRequest {
    /// Phone number being looked up.
    pub phone_number: String,
    /// Call state that triggered the lookup.
    pub event: CallState,
}

impl LookupRequest {
    /// Build the request for a number and state.
    #[must_use]
    pub fn new(phone_number: impl Into<String>, event: CallState) -> Self {
        Self {
            phone_number: phone_number.into(),
            event,
        }
    }
}

/// Response body from the directory's phone search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupResponse {
    /// Student name(s) linked to the number.
    pub student_names: Option<String>,
    /// Parent name linked to the number.
    pub parent_name: Option<String>,
}

impl From<LookupResponse> for StudentMatch {
    fn from(response: LookupResponse) -> Self {
        StudentMatch::from_parts(response.student_names, response.parent_name)
    }
}

/// Decode a directory response body.
///
/// # Errors
///
/// Returns [`LookupError::Malformed`] if the body is not a JSON object of the
/// expected shape.
pub fn parse_lookup_response(body: &str) -> std::result::Result<StudentMatch, LookupError> {
    let response: LookupResponse = serde_json::from_str(body)?;
    Ok(response.into())
}

/// A source of student records keyed by phone number.
#[async_trait::async_trait]
pub trait StudentDirectory: Send + Sync + std::fmt::Debug {
    /// Look up the student linked to `phone_number`.
    ///
    /// An unknown number resolves to an empty [`StudentMatch`], not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory could not be queried.
    async fn lookup(
        &self,
        phone_number: &str,
        state: CallState,
    ) -> std::result::Result<StudentMatch, LookupError>;
}

/// Directory backed by an in-memory table.
///
/// Loaded from a JSON object mapping phone numbers (in any format) to
/// response bodies:
///
/// ```json
/// { "021-555-0100": { "student_names": "Amit", "parent_name": "Raj" } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    records: HashMap<String, StudentMatch>,
}

impl StaticDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the record for a number.
    pub fn insert(&mut self, phone_number: &str, student: StudentMatch) {
        self.records.insert(normalize(Some(phone_number)), student);
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with_record(mut self, phone_number: &str, student: StudentMatch) -> Self {
        self.insert(phone_number, student);
        self
    }

    /// Parse a directory from fixture JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not an object of response bodies.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, LookupResponse> = serde_json::from_str(json)?;
        let mut directory = Self::new();
        for (number, response) in raw {
            directory.insert(&number, response.into());
        }
        Ok(directory)
    }

    /// Load a directory from a fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::directory_load(path, e.to_string()))?;
        Self::from_json(&json).map_err(|e| Error::directory_load(path, e.to_string()))
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the directory has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl StudentDirectory for StaticDirectory {
    async fn lookup(
        &self,
        phone_number: &str,
        state: CallState,
    ) -> std::result::Result<StudentMatch, LookupError> {
        let key = normalize(Some(phone_number));
        let found = self.records.get(&key).cloned().unwrap_or_default();
        debug!(phone_number = %key, %state, complete = found.is_complete(), "directory lookup");
        Ok(found)
    }
}

/// Path of the phone search endpoint, relative to the API base URL.
const LOOKUP_PATH: &str = "get-student-search-list-by-phone";

/// Directory served by the school's HTTP API.
///
/// Each lookup POSTs a [`LookupRequest`] to
/// `{api_url}get-student-search-list-by-phone` with a bearer token and
/// decodes the reply with [`parse_lookup_response`].
#[derive(Clone)]
pub struct HttpDirectory {
    client: Client,
    endpoint: String,
    token: String,
}

impl std::fmt::Debug for HttpDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDirectory")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpDirectory {
    /// Create a directory client for the API at `api_url`.
    ///
    /// A missing trailing slash on `api_url` is added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryClient`] if the HTTP client cannot be built.
    pub fn new(api_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::DirectoryClient(e.to_string()))?;

        let base = api_url.trim();
        let endpoint = if base.ends_with('/') {
            format!("{base}{LOOKUP_PATH}")
        } else {
            format!("{base}/{LOOKUP_PATH}")
        };
        info!(%endpoint, "student directory client initialized");

        Ok(Self {
            client,
            endpoint,
            token: token.into(),
        })
    }

    /// Full URL of the phone search endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl StudentDirectory for HttpDirectory {
    async fn lookup(
        &self,
        phone_number: &str,
        state: CallState,
    ) -> std::result::Result<StudentMatch, LookupError> {
        let request = LookupRequest::new(phone_number, state);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(LookupError::Unauthorized);
        }
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        let found = parse_lookup_response(&body)?;
        debug!(phone_number, %state, complete = found.is_complete(), "directory lookup");
        Ok(found)
    }
}

/// Directory used when nothing is configured; every lookup fails.
#[derive(Debug, Clone)]
pub struct UnconfiguredDirectory {
    reason: String,
}

impl UnconfiguredDirectory {
    /// Create a directory that fails with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl StudentDirectory for UnconfiguredDirectory {
    async fn lookup(
        &self,
        _phone_number: &str,
        _state: CallState,
    ) -> std::result::Result<StudentMatch, LookupError> {
        Err(LookupError::NotConfigured(self.reason.clone()))
    }
}

/// Build the directory described by the configuration.
///
/// A fixture takes precedence over the HTTP API.
///
/// # Errors
///
/// Returns an error if a configured fixture cannot be loaded or the HTTP
/// client cannot be built.
pub fn from_config(config: &DirectoryConfig) -> Result<Box<dyn StudentDirectory>> {
    if let Some(path) = &config.fixture_path {
        return Ok(Box::new(StaticDirectory::load(path)?));
    }

    match (&config.api_url, &config.token) {
        (Some(api_url), Some(token)) => Ok(Box::new(HttpDirectory::new(
            api_url,
            token.clone(),
            config.request_timeout(),
        )?)),
        (None, _) => Ok(Box::new(UnconfiguredDirectory::new("no API base URL"))),
        (Some(_), None) => Ok(Box::new(UnconfiguredDirectory::new("no auth token"))),
    }
}
