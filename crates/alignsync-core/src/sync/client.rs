//! Remote service client
//!
//! [`RemoteService`] is the whole surface the coordinator talks to;
//! [`HttpRemote`] implements it over HTTP with `reqwest`. Transport errors
//! are classified here and never leave this module as `reqwest` types:
//!
//! - 401, 403 → [`Error::Permission`]
//! - 404 → [`Error::NotFound`]
//! - timeout → [`Error::Timeout`]
//! - anything else → [`Error::Network`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::dto::{JournalEntryDto, LinksResponse, ProjectDto, TokenDto, TokensResponse};
use crate::error::{Error, Result};
use crate::models::{AlignmentSide, Link, ProjectState};

/// Operations offered by the remote alignment service
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Every project visible to the user
    async fn list_projects(&self) -> Result<Vec<ProjectDto>>;

    async fn get_project(&self, project_id: &str) -> Result<ProjectDto>;

    /// Create or update a project; returns the stored version
    async fn save_project(&self, project: &ProjectDto) -> Result<ProjectDto>;

    /// Tokens of a project, optionally of one side only
    async fn get_tokens(&self, project_id: &str, side: Option<AlignmentSide>) -> Result<Vec<TokenDto>>;

    async fn save_tokens(&self, project_id: &str, tokens: &[TokenDto]) -> Result<()>;

    /// The authoritative link set of a project
    async fn get_links(&self, project_id: &str) -> Result<Vec<Link>>;

    /// Apply a unit of journal entries remotely
    async fn send_journal(&self, project_id: &str, entries: &[JournalEntryDto]) -> Result<()>;

    /// Publish or withdraw a project; returns the stored version, whose
    /// `updatedAt` reflects the state change
    async fn set_state(&self, project_id: &str, state: ProjectState) -> Result<ProjectDto>;

    async fn delete_project(&self, project_id: &str) -> Result<()>;
}

/// HTTP implementation of [`RemoteService`]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client for `base_url` (e.g. `https://example.org`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("alignsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.build().map_err(classify)?;
        let what = format!("{} {}", request.method(), request.url().path());
        debug!(request = %what, "Sending request");

        let response = self.client.execute(request).await.map_err(|e| {
            warn!(request = %what, error = %e, "Request failed");
            classify(e)
        })?;
        check_status(&what, response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(classify)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.send(self.request(Method::POST, path).json(body)).await
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn list_projects(&self) -> Result<Vec<ProjectDto>> {
        self.send_json(self.request(Method::GET, "/api/projects")).await
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectDto> {
        self.send_json(self.request(Method::GET, &format!("/api/projects/{}", project_id)))
            .await
    }

    async fn save_project(&self, project: &ProjectDto) -> Result<ProjectDto> {
        let response = self.post("/api/projects", project).await?;
        response.json().await.map_err(classify)
    }

    async fn get_tokens(&self, project_id: &str, side: Option<AlignmentSide>) -> Result<Vec<TokenDto>> {
        let mut request = self.request(Method::GET, &format!("/api/projects/{}/tokens", project_id));
        if let Some(side) = side {
            request = request.query(&[("side", side.as_str())]);
        }
        let response: TokensResponse = self.send_json(request).await?;
        Ok(response.tokens)
    }

    async fn save_tokens(&self, project_id: &str, tokens: &[TokenDto]) -> Result<()> {
        self.post(&format!("/api/projects/{}/tokens", project_id), tokens)
            .await?;
        Ok(())
    }

    async fn get_links(&self, project_id: &str) -> Result<Vec<Link>> {
        let response: LinksResponse = self
            .send_json(self.request(
                Method::GET,
                &format!("/api/projects/{}/alignment_links", project_id),
            ))
            .await?;
        Ok(response.links)
    }

    async fn send_journal(&self, project_id: &str, entries: &[JournalEntryDto]) -> Result<()> {
        self.post(&format!("/api/projects/{}/alignment_links", project_id), entries)
            .await?;
        Ok(())
    }

    async fn set_state(&self, project_id: &str, state: ProjectState) -> Result<ProjectDto> {
        // The body is the bare state string, e.g. "PUBLISHED"
        let response = self
            .post(&format!("/api/projects/{}/state", project_id), &state)
            .await?;
        response.json().await.map_err(classify)
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/api/projects/{}", project_id)))
            .await?;
        Ok(())
    }
}

async fn check_status(what: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("{} returned {}", what, status)
    } else {
        format!("{} returned {}: {}", what, status, body)
    };
    Err(match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Error::Permission(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::Timeout(message),
        _ => Error::Network(message),
    })
}

fn classify(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(error.to_string())
    } else if error.is_decode() {
        Error::Network(format!("unexpected response body: {}", error))
    } else {
        Error::Network(error.to_string())
    }
}
