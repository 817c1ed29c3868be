use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Crawl,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub url: String,
    pub knowledge_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub max_depth: u32,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            knowledge_type: "technical".to_string(),
            tags: Vec::new(),
            max_depth: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub path: PathBuf,
    pub knowledge_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl UploadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            knowledge_type: "technical".to_string(),
            tags: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

/// Original request parameters of a job, kept so the job can be re-issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobRequest {
    Crawl(CrawlRequest),
    Upload(UploadRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Crawl(_) => JobKind::Crawl,
            JobRequest::Upload(_) => JobKind::Upload,
        }
    }

    /// Display label for progress cards: the crawl URL or the uploaded file name.
    pub fn source(&self) -> String {
        match self {
            JobRequest::Crawl(crawl) => crawl.url.clone(),
            JobRequest::Upload(upload) => upload.file_name(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            JobRequest::Crawl(crawl) => {
                let raw = crawl.url.trim();
                if raw.is_empty() {
                    return Err(ValidationError::EmptyUrl);
                }
                let parsed = Url::parse(raw).map_err(|err| ValidationError::InvalidUrl {
                    url: raw.to_string(),
                    reason: err.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ValidationError::UnsupportedScheme(parsed.scheme().to_string()));
                }
                if crawl.max_depth == 0 {
                    return Err(ValidationError::ZeroDepth);
                }
                Ok(())
            }
            JobRequest::Upload(upload) => {
                if upload.path.as_os_str().is_empty() {
                    return Err(ValidationError::EmptyPath);
                }
                Ok(())
            }
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
