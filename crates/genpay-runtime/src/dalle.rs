//! DALL·E Task Provider
//!
//! Implementation of `GenerationProvider` for the DALL·E labs task API.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use genpay_core::{
    error::{GenerateError, Result},
    provider::{
        ArtifactStream, GenerationArtifact, GenerationProvider, JobHandle, JobId, JobSnapshot,
        JobStatus, ProviderFactory,
    },
};
use serde::{Deserialize, Serialize};

/// DALL·E provider configuration
#[derive(Clone, Debug)]
pub struct DalleConfig {
    /// API base URL
    pub base_url: String,

    /// Bearer token
    pub api_key: String,

    /// Images requested per prompt
    pub batch_size: u8,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DalleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://labs.openai.com/api/labs".into(),
            api_key: String::new(),
            batch_size: 4,
            timeout_secs: 60,
        }
    }
}

impl DalleConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = std::env::var("DALLE_BASE_URL").unwrap_or(defaults.base_url);
        let api_key = std::env::var("DALLE_API_KEY").unwrap_or_default();
        let batch_size = std::env::var("DALLE_BATCH_SIZE")
            .ok()
            .and_then(|b| b.parse().ok())
            .unwrap_or(defaults.batch_size);

        Self {
            base_url,
            api_key,
            batch_size,
            ..defaults
        }
    }
}

impl ProviderFactory for DalleConfig {
    fn connect(&self) -> Result<Arc<dyn GenerationProvider>> {
        Ok(Arc::new(DalleProvider::from_config(self.clone())?))
    }
}

#[derive(Serialize)]
struct TaskRequest<'a> {
    task_type: &'static str,
    prompt: TaskPrompt<'a>,
}

#[derive(Serialize)]
struct TaskPrompt<'a> {
    caption: &'a str,
    batch_size: u8,
}

#[derive(Deserialize)]
struct Task {
    id: String,
    status: String,
    #[serde(default)]
    generations: Option<Generations>,
}

#[derive(Deserialize)]
struct Generations {
    data: Vec<GenerationData>,
}

#[derive(Deserialize)]
struct GenerationData {
    id: String,
}

/// DALL·E generation provider
pub struct DalleProvider {
    http: reqwest::Client,
    config: DalleConfig,
}

impl DalleProvider {
    /// Create from configuration
    pub fn from_config(config: DalleConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(GenerateError::ProviderSetup("DALLE_API_KEY not set".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerateError::ProviderSetup(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(DalleConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Convert a task body to a job snapshot
    fn convert_task(task: Task) -> JobSnapshot {
        JobSnapshot {
            id: JobId::new(task.id),
            status: JobStatus::parse(&task.status),
            artifacts: task
                .generations
                .map(|g| {
                    g.data
                        .into_iter()
                        .map(|d| GenerationArtifact::new(d.id))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => GenerateError::Auth(body),
            429 => GenerateError::RateLimited(body),
            500..=599 => GenerateError::ProviderUnavailable(format!("{status}: {body}")),
            _ => GenerateError::Provider(format!("{status}: {body}")),
        })
    }

    async fn read_task(response: reqwest::Response) -> Result<Task> {
        Self::check(response)
            .await?
            .json::<Task>()
            .await
            .map_err(transport)
    }
}

fn transport(e: reqwest::Error) -> GenerateError {
    if e.is_timeout() || e.is_connect() {
        GenerateError::ProviderUnavailable(e.to_string())
    } else {
        GenerateError::Provider(e.to_string())
    }
}

#[async_trait]
impl GenerationProvider for DalleProvider {
    async fn submit(&self, prompt: &str) -> Result<JobHandle> {
        let request = TaskRequest {
            task_type: "text2im",
            prompt: TaskPrompt {
                caption: prompt,
                batch_size: self.config.batch_size,
            },
        };

        let response = self
            .http
            .post(self.url("tasks"))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let task = Self::read_task(response).await?;

        tracing::debug!(task_id = %task.id, "Submitted DALL·E task");
        Ok(JobHandle {
            id: JobId::new(task.id),
        })
    }

    async fn status(&self, job: &JobId) -> Result<JobSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("tasks/{job}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(transport)?;

        Ok(Self::convert_task(Self::read_task(response).await?))
    }

    async fn download(&self, artifact: &GenerationArtifact) -> Result<ArtifactStream> {
        let id = artifact.cache_key()?;
        let response = self
            .http
            .get(self.url(&format!("generations/{id}/download")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(transport)?;
        let response = Self::check(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(transport));
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.config.api_key.is_empty())
    }

    fn name(&self) -> &str {
        "DALL·E"
    }
}
