use std::time::Duration;

use engine_logging::{engine_debug, short_id};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracker_core::{CrawlRequest, JobId, JobRequest, UploadRequest};

use crate::{ApiError, ApiErrorKind, ArtifactList, JobApi, StatusReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8181".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct CrawlBody<'a> {
    url: &'a str,
    knowledge_type: &'a str,
    tags: &'a [String],
    max_depth: u32,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    #[serde(rename = "progressId", alias = "progress_id")]
    progress_id: JobId,
}

/// [`JobApi`] over the knowledge-base HTTP API.
#[derive(Debug, Clone)]
pub struct ReqwestJobApi {
    settings: ApiSettings,
    client: reqwest::Client,
}

impl ReqwestJobApi {
    pub fn new(settings: ApiSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::new(ApiErrorKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn start_crawl(&self, crawl: &CrawlRequest) -> Result<JobId, ApiError> {
        let body = CrawlBody {
            url: crawl.url.trim(),
            knowledge_type: &crawl.knowledge_type,
            tags: &crawl.tags,
            max_depth: crawl.max_depth,
        };
        let response = self
            .client
            .post(self.url("/api/knowledge-items/crawl"))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_progress_id(response).await
    }

    async fn start_upload(&self, upload: &UploadRequest) -> Result<JobId, ApiError> {
        let bytes = tokio::fs::read(&upload.path).await.map_err(|err| {
            ApiError::new(
                ApiErrorKind::InvalidRequest,
                format!("cannot read {}: {err}", upload.path.display()),
            )
        })?;
        let tags = serde_json::to_string(&upload.tags)
            .map_err(|err| ApiError::new(ApiErrorKind::InvalidRequest, err.to_string()))?;
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(upload.file_name()))
            .text("knowledge_type", upload.knowledge_type.clone())
            .text("tags", tags);
        let response = self
            .client
            .post(self.url("/api/documents/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_progress_id(response).await
    }
}

#[async_trait::async_trait]
impl JobApi for ReqwestJobApi {
    async fn initiate(&self, request: &JobRequest) -> Result<JobId, ApiError> {
        request
            .validate()
            .map_err(|err| ApiError::new(ApiErrorKind::InvalidRequest, err.to_string()))?;
        match request {
            JobRequest::Crawl(crawl) => self.start_crawl(crawl).await,
            JobRequest::Upload(upload) => self.start_upload(upload).await,
        }
    }

    async fn status(&self, job_id: &str) -> Result<Option<StatusReport>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/crawl-progress/{job_id}")))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            engine_debug!("Progress {} not found on server", short_id(job_id));
            return Ok(None);
        }
        let response = ensure_success(response)?;
        response.json().await.map(Some).map_err(map_reqwest_error)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/api/knowledge-items/stop/{job_id}")))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        ensure_success(response).map(|_| ())
    }

    async fn list_artifacts(&self) -> Result<ArtifactList, ApiError> {
        let response = self
            .client
            .get(self.url("/api/knowledge-items"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        ensure_success(response)?
            .json()
            .await
            .map_err(map_reqwest_error)
    }
}

async fn read_progress_id(response: reqwest::Response) -> Result<JobId, ApiError> {
    let body: InitiateResponse = ensure_success(response)?
        .json()
        .await
        .map_err(map_reqwest_error)?;
    if body.progress_id.trim().is_empty() {
        return Err(ApiError::new(
            ApiErrorKind::InvalidResponse,
            "empty progress id",
        ));
    }
    Ok(body.progress_id)
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::new(
            ApiErrorKind::HttpStatus(status.as_u16()),
            status.to_string(),
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(ApiErrorKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return ApiError::new(ApiErrorKind::InvalidResponse, err.to_string());
    }
    ApiError::new(ApiErrorKind::Network, err.to_string())
}
