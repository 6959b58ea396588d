use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, bail};
use tokio::sync::Semaphore;

use crate::provision::ArtifactId;

const DEFAULT_REPO: &str = "bartowski/Meta-Llama-3.1-8B-Instruct-GGUF";
const DEFAULT_FILE: &str = "Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf";
const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub artifact: ArtifactId,
    pub cache_dir: PathBuf,
    pub hub_endpoint: String,
    pub hub_token: Option<String>,
    pub context_size: u32,
    pub threads: usize,
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub max_queue_depth: usize,
    /// `None` disables the per-completion timeout.
    pub request_timeout: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            artifact: ArtifactId::new(DEFAULT_REPO, DEFAULT_FILE),
            cache_dir: default_cache_dir(),
            hub_endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            hub_token: None,
            context_size: 4096,
            threads: default_threads(),
            max_new_tokens: 512,
            temperature: 0.7,
            max_queue_depth: 8,
            request_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset keys fall
    /// back to defaults; set but unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_addr = parse_or(&lookup, "SERVER_ADDR", defaults.listen_addr)?;

        let repo_id = lookup("MODEL_REPO").unwrap_or(defaults.artifact.repo_id);
        let filename = lookup("MODEL_FILE").unwrap_or(defaults.artifact.filename);
        let revision = lookup("MODEL_REVISION").unwrap_or(defaults.artifact.revision);
        if repo_id.trim().is_empty() {
            bail!("MODEL_REPO must not be empty");
        }
        if filename.trim().is_empty() {
            bail!("MODEL_FILE must not be empty");
        }
        let artifact = ArtifactId::new(repo_id, filename).with_revision(revision);

        let cache_dir = lookup("MODEL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);
        let hub_endpoint = lookup("HF_ENDPOINT")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or(defaults.hub_endpoint);
        let hub_token = ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"]
            .into_iter()
            .filter_map(|key| lookup(key))
            .find(|t| !t.trim().is_empty());

        let context_size = parse_or(&lookup, "CONTEXT_SIZE", defaults.context_size)?;
        let threads = parse_or(&lookup, "THREADS", defaults.threads)?;
        let max_new_tokens = parse_or(&lookup, "MAX_NEW_TOKENS", defaults.max_new_tokens)?;
        let temperature: f32 = parse_or(&lookup, "TEMPERATURE", defaults.temperature)?;
        let max_queue_depth = parse_or(&lookup, "MAX_QUEUE_DEPTH", defaults.max_queue_depth)?;

        if context_size == 0 || threads == 0 || max_new_tokens == 0 || max_queue_depth == 0 {
            bail!("CONTEXT_SIZE, THREADS, MAX_NEW_TOKENS and MAX_QUEUE_DEPTH must be positive");
        }
        if max_queue_depth > Semaphore::MAX_PERMITS {
            bail!(
                "MAX_QUEUE_DEPTH must be at most {}, got {max_queue_depth}",
                Semaphore::MAX_PERMITS
            );
        }
        if !temperature.is_finite() || temperature < 0.0 {
            bail!("TEMPERATURE must be a non-negative number, got {temperature}");
        }

        let request_timeout = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("REQUEST_TIMEOUT_SECS has invalid value {raw:?}"))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => defaults.request_timeout,
        };

        Ok(Self {
            listen_addr,
            artifact,
            cache_dir,
            hub_endpoint,
            hub_token,
            context_size,
            threads,
            max_new_tokens,
            temperature,
            max_queue_depth,
            request_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("axiom").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
