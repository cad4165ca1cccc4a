//! Artifact Delivery
//!
//! ```text
//!  download ──▶ {dir}/{artifact}.{ext} ──▶ reopen ──▶ send_photo ──▶ (delete)
//! ```
//!
//! Artifacts are handled one by one and independently: a failed download or
//! send is logged and the next artifact still goes out. File handles are
//! scoped to each step and a partial file is removed when its download fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use genpay_core::{GenerateError, GenerationArtifact, GenerationProvider, UserId};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::config::{ArtifactRetention, GenerateConfig};
use crate::deadline::within;
use crate::error::Result;
use crate::messenger::{Attachment, Messenger};

/// Per-job delivery summary
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Ids of artifacts forwarded to the user
    pub delivered: Vec<String>,
    /// Ids of artifacts that could not be forwarded
    pub failed: Vec<String>,
}

impl DeliveryReport {
    /// No artifact reached the user
    pub fn nothing_delivered(&self) -> bool {
        self.delivered.is_empty()
    }
}

pub struct Deliverer {
    messenger: Arc<dyn Messenger>,
    dir: PathBuf,
    extension: String,
    retention: ArtifactRetention,
}

impl Deliverer {
    pub fn new(messenger: Arc<dyn Messenger>, config: &GenerateConfig) -> Self {
        Self {
            messenger,
            dir: config.artifact_dir.clone(),
            extension: config.artifact_extension.clone(),
            retention: config.retention,
        }
    }

    /// Where the local copy of `key` lives
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{}", self.extension))
    }

    /// Forward every artifact to `user`
    ///
    /// Only a missing artifact directory fails the whole batch.
    pub async fn deliver_all(
        &self,
        provider: &dyn GenerationProvider,
        user: &UserId,
        artifacts: &[GenerationArtifact],
        deadline: Instant,
    ) -> Result<DeliveryReport> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut report = DeliveryReport::default();
        for artifact in artifacts {
            match self.deliver_one(provider, user, artifact, deadline).await {
                Ok(()) => {
                    tracing::info!(user = %user, artifact = %artifact.id, "Artifact delivered");
                    report.delivered.push(artifact.id.clone());
                }
                Err(e) => {
                    tracing::warn!(user = %user, artifact = %artifact.id, error = %e, "Artifact delivery failed");
                    report.failed.push(artifact.id.clone());
                }
            }
        }
        Ok(report)
    }

    async fn deliver_one(
        &self,
        provider: &dyn GenerationProvider,
        user: &UserId,
        artifact: &GenerationArtifact,
        deadline: Instant,
    ) -> Result<()> {
        let key = artifact.cache_key()?;
        let path = self.path_for(key);

        if let Err(e) = fetch(provider, artifact, &path, deadline).await {
            discard(&path).await;
            return Err(e.into());
        }

        let sent = match File::open(&path).await {
            Ok(file) => {
                self.messenger
                    .send_photo(
                        user,
                        Attachment {
                            file_name: format!("{key}.{}", self.extension),
                            reader: Box::pin(file),
                        },
                    )
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if sent.is_err() || self.retention == ArtifactRetention::DeleteAfterSend {
            discard(&path).await;
        }
        sent.map(|_| ())
    }
}

/// Stream the artifact into `path`; the file is closed when this returns
async fn fetch(
    provider: &dyn GenerationProvider,
    artifact: &GenerationArtifact,
    path: &Path,
    deadline: Instant,
) -> std::result::Result<(), GenerateError> {
    let mut stream = within(deadline, "download", provider.download(artifact)).await?;
    let mut file = File::create(path).await?;

    within(deadline, "download", async {
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok::<_, GenerateError>(())
    })
    .await
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove artifact copy");
        }
    }
}
