use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

/// Representation requested from the CI server's `api/<format>` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    #[default]
    Json,
    Python,
}

impl ApiFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiFormat::Json => "json",
            ApiFormat::Python => "python",
        }
    }
}

/// Where the CI server lives and which job to read history from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CiSettings {
    pub base_url: String,
    pub job_name: String,
    #[serde(default)]
    pub api_format: ApiFormat,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid CI server URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("CI job name is empty")]
    EmptyJob,

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Read-only HTTP access to one job on the CI server.
pub struct CiClient {
    client: reqwest::Client,
    job_url: String,
    api_format: ApiFormat,
}

impl CiClient {
    pub fn new(settings: &CiSettings) -> Result<Self, ClientError> {
        let base = settings.base_url.trim().trim_end_matches('/');
        Url::parse(base).map_err(|source| ClientError::BaseUrl {
            url: settings.base_url.clone(),
            source,
        })?;

        let job = settings.job_name.trim();
        if job.is_empty() {
            return Err(ClientError::EmptyJob);
        }
        // Folder jobs are addressed as job/<folder>/job/<name>.
        let job_path = job
            .split('/')
            .map(|segment| format!("job/{}", urlencoding::encode(segment)))
            .collect::<Vec<_>>()
            .join("/");

        let client = reqwest::Client::builder()
            .user_agent(concat!("previewdiff/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            job_url: format!("{}/{}", base, job_path),
            api_format: settings.api_format,
        })
    }

    pub fn api_format(&self) -> ApiFormat {
        self.api_format
    }

    /// `<base>/job/<job>/lastStableBuild/api/<format>`
    pub fn last_stable_metadata_url(&self) -> String {
        format!(
            "{}/lastStableBuild/api/{}",
            self.job_url,
            self.api_format.as_str()
        )
    }

    /// Fetch URL for an artifact of the last stable build.
    pub fn last_stable_artifact_url(&self, relative_path: &str) -> Result<Url, url::ParseError> {
        let encoded = relative_path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Url::parse(&format!(
            "{}/lastStableBuild/artifact/{}",
            self.job_url, encoded
        ))
    }

    /// GET the last stable build's metadata as text.
    pub async fn fetch_last_stable_metadata(&self) -> Result<String, String> {
        let url = self.last_stable_metadata_url();
        info!("Fetching build metadata: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch '{}': {}", url, e))?;

        check_status(&url, &response)?;

        response
            .text()
            .await
            .map_err(|e| format!("Failed to read response body from '{}': {}", url, e))
    }

    /// GET raw bytes by URL.
    pub async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, String> {
        info!("Downloading {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Failed to fetch '{}': {}", url, e))?;

        check_status(url.as_str(), &response)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read response body from '{}': {}", url, e))?;
        Ok(bytes.to_vec())
    }
}

fn check_status(url: &str, response: &reqwest::Response) -> Result<(), String> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(format!(
        "HTTP error fetching '{}': {} {}",
        url,
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    ))
}
