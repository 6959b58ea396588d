//! Resolves model artifacts to files in a local cache, downloading them on
//! first use.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, warn};

use crate::error::ProvisionError;

/// Identifies one artifact file inside a remote model repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

impl ArtifactId {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: "main".to_string(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Cache location relative to the cache root:
    /// `<repo with "/" as "--">/<revision>/<filename>`.
    pub fn cache_relative_path(&self) -> Result<PathBuf, ProvisionError> {
        let repo = sanitize_component(&self.repo_id.replace('/', "--"))?;
        let revision = sanitize_component(&self.revision)?;
        let filename = sanitize_component(&self.filename.replace('/', "__"))?;
        Ok(PathBuf::from(repo).join(revision).join(filename))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.repo_id, self.filename, self.revision)
    }
}

fn sanitize_component(raw: &str) -> Result<String, ProvisionError> {
    let mut out: String = raw
        .trim()
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    while out.ends_with('.') || out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() || out.chars().all(|c| c == '.') {
        return Err(ProvisionError::InvalidArtifact(format!(
            "unusable path component {raw:?}"
        )));
    }
    Ok(out)
}

/// Remote store holding model artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Downloads `artifact` into `dest`, which the caller later moves into
    /// place. `dest`'s parent directory exists.
    async fn fetch(
        &self,
        artifact: &ArtifactId,
        credential: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProvisionError>;
}

pub struct ModelProvisioner {
    cache_dir: PathBuf,
    store: Arc<dyn ArtifactStore>,
    credential: Option<String>,
    // Serializes provisioning so one artifact is fetched at most once.
    gate: Mutex<()>,
}

impl ModelProvisioner {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        store: Arc<dyn ArtifactStore>,
        credential: Option<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            store,
            credential,
            gate: Mutex::new(()),
        }
    }

    pub fn cache_path(&self, artifact: &ArtifactId) -> Result<PathBuf, ProvisionError> {
        Ok(self.cache_dir.join(artifact.cache_relative_path()?))
    }

    pub async fn provision(&self, artifact: &ArtifactId) -> Result<PathBuf, ProvisionError> {
        let target = self.cache_path(artifact)?;
        let _guard = self.gate.lock().await;

        if is_cached(&target).await {
            debug!(path = %target.display(), "artifact cache hit");
            return Ok(target);
        }

        let parent = target
            .parent()
            .ok_or_else(|| ProvisionError::InvalidArtifact(artifact.to_string()))?;
        fs::create_dir_all(parent).await?;

        let partial = partial_path(&target);
        info!(%artifact, authenticated = self.credential.is_some(), "fetching model artifact");

        if let Err(err) = self
            .store
            .fetch(artifact, self.credential.as_deref(), &partial)
            .await
        {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "could not remove partial download");
                }
            }
            return Err(err);
        }

        fs::rename(&partial, &target).await?;
        info!(path = %target.display(), "model artifact cached");
        Ok(target)
    }
}

async fn is_cached(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// Downloads artifacts over HTTP from a Hugging Face compatible hub.
pub struct HubStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HubStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn download_url(&self, artifact: &ArtifactId) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint.trim_end_matches('/'),
            artifact.repo_id,
            artifact.revision,
            artifact.filename
        )
    }
}

#[async_trait]
impl ArtifactStore for HubStore {
    async fn fetch(
        &self,
        artifact: &ArtifactId,
        credential: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProvisionError> {
        let url = self.download_url(artifact);
        let mut request = self.client.get(&url);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| ProvisionError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProvisionError::Auth(format!("{url} returned {status}")));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisionError::NotFound(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(ProvisionError::Network(format!("{url} returned {status}")));
        }

        let expected = response.content_length();
        if let Some(total) = expected {
            info!(%artifact, size_mb = total / 1024 / 1024, "download started");
        }

        let mut file = fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProvisionError::Network(format!("download interrupted: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if let Some(total) = expected {
            if written != total {
                return Err(ProvisionError::Network(format!(
                    "download incomplete: got {written} bytes, expected {total}"
                )));
            }
        }
        if written == 0 {
            return Err(ProvisionError::Network(format!("{url} returned an empty body")));
        }

        Ok(())
    }
}
