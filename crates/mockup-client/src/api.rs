//! HTTP client for the mockup service.
//!
//! [`StudioClient`] wraps `reqwest` and maps non-2xx responses onto
//! [`ClientError`]. The [`Backend`] trait is the subset the editor session
//! needs, so the session can run against something other than a live
//! server.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use mockup_shared::constants::USER_ID_HEADER;
use mockup_shared::protocol::{
    ChatRequest, CreateProjectRequest, ErrorBody, FrameDraft, RenameProjectRequest,
    ReplaceFramesRequest, ReplaceFramesResponse,
};
use mockup_store::{Profile, Project, ProjectSnapshot};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, Result};

/// Raw body of a generation response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn profile(&self) -> Result<Profile>;

    async fn project(&self, id: Uuid) -> Result<ProjectSnapshot>;

    /// Start a generation. Fails before any body is read when the service
    /// rejects the request.
    async fn chat(&self, request: &ChatRequest) -> Result<ByteStream>;

    async fn replace_frames(
        &self,
        project_id: Uuid,
        frames: &[FrameDraft],
    ) -> Result<ReplaceFramesResponse>;
}

#[derive(Debug, Clone)]
pub struct StudioClient {
    http: Client,
    base_url: String,
    user_id: Uuid,
}

impl StudioClient {
    pub fn new(base_url: impl Into<String>, user_id: Uuid) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::BaseUrl(base_url));
        }

        let http = Client::builder()
            .user_agent(concat!("mockup-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            user_id,
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(USER_ID_HEADER, self.user_id.to_string())
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        json(self.request(reqwest::Method::GET, "/projects").send().await?).await
    }

    pub async fn create_project(&self, name: Option<String>) -> Result<Project> {
        let res = self
            .request(reqwest::Method::POST, "/projects")
            .json(&CreateProjectRequest { name })
            .send()
            .await?;
        json(res).await
    }

    pub async fn rename_project(&self, id: Uuid, name: impl Into<String>) -> Result<Project> {
        let res = self
            .request(reqwest::Method::PATCH, &format!("/projects/{id}"))
            .json(&RenameProjectRequest { name: name.into() })
            .send()
            .await?;
        json(res).await
    }

    pub async fn delete_project(&self, id: Uuid) -> Result<()> {
        let res = self
            .request(reqwest::Method::DELETE, &format!("/projects/{id}"))
            .send()
            .await?;
        check(res).await.map(drop)
    }
}

#[async_trait]
impl Backend for StudioClient {
    async fn profile(&self) -> Result<Profile> {
        json(self.request(reqwest::Method::GET, "/profile").send().await?).await
    }

    async fn project(&self, id: Uuid) -> Result<ProjectSnapshot> {
        let res = self
            .request(reqwest::Method::GET, &format!("/projects/{id}"))
            .send()
            .await?;
        json(res).await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ByteStream> {
        let res = self
            .request(reqwest::Method::POST, "/chat")
            .json(request)
            .send()
            .await?;
        let res = check(res).await?;
        debug!(project = %request.project_id, "generation stream opened");

        Ok(Box::pin(res.bytes_stream().map_err(ClientError::from)))
    }

    async fn replace_frames(
        &self,
        project_id: Uuid,
        frames: &[FrameDraft],
    ) -> Result<ReplaceFramesResponse> {
        let res = self
            .request(reqwest::Method::PUT, &format!("/projects/{project_id}/frames"))
            .json(&ReplaceFramesRequest {
                frames: frames.to_vec(),
            })
            .send()
            .await?;
        json(res).await
    }
}

/// Pass 2xx responses through; turn anything else into an error.
async fn check(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    if status == StatusCode::PAYMENT_REQUIRED {
        return Err(ClientError::InsufficientCredits);
    }

    let text = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn json<T: DeserializeOwned>(res: Response) -> Result<T> {
    Ok(check(res).await?.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = StudioClient::new("http://localhost:8080/", Uuid::nil()).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_base_url_needs_scheme() {
        let err = StudioClient::new("localhost:8080", Uuid::nil()).unwrap_err();
        assert!(matches!(err, ClientError::BaseUrl(_)));
    }
}
