use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::Semaphore,
    task::{self, JoinHandle},
    time,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    error::{InferenceError, RuntimeError},
    model::{
        ChatRequest, CompletionResult, GenerationParams, LoadParams,
        loader::{InferenceRuntime, ModelHandle},
        prompt::{render_prompt, stop_markers},
        state::{ServerState, StateCell, StatusSnapshot},
    },
    provision::{ArtifactId, ModelProvisioner},
};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub load: LoadParams,
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub max_queue_depth: usize,
    pub request_timeout: Option<Duration>,
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            load: LoadParams {
                context_size: config.context_size,
                threads: config.threads,
            },
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            max_queue_depth: config.max_queue_depth,
            request_timeout: config.request_timeout,
        }
    }
}

/// Owns the single served model and gates every completion on its state.
pub struct InferenceServer {
    settings: EngineSettings,
    runtime: Arc<dyn InferenceRuntime>,
    state: StateCell,
    // Admitted completions, running or waiting for the model lock.
    queue: Arc<Semaphore>,
    started: AtomicBool,
}

impl InferenceServer {
    pub fn new(settings: EngineSettings, runtime: Arc<dyn InferenceRuntime>) -> Self {
        let queue = Arc::new(Semaphore::new(settings.max_queue_depth));
        Self {
            settings,
            runtime,
            state: StateCell::new(),
            queue,
            started: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.state.snapshot()
    }

    pub async fn wait_until_settled(&self) -> StatusSnapshot {
        self.state.settled().await
    }

    /// Spawns provisioning and loading. Only the first call starts anything.
    pub fn start(
        self: &Arc<Self>,
        provisioner: Arc<ModelProvisioner>,
        artifact: ArtifactId,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("model startup already triggered");
            return None;
        }
        let server = Arc::clone(self);
        Some(tokio::spawn(async move {
            let next = match server.provision_and_load(&provisioner, &artifact).await {
                Ok(handle) => {
                    info!(model = %handle.metadata().name, "model ready");
                    ServerState::Ready(Arc::new(handle))
                }
                Err(reason) => {
                    error!(%artifact, %reason, "model failed to load");
                    ServerState::Failed(reason)
                }
            };
            server.state.transition(next);
        }))
    }

    async fn provision_and_load(
        &self,
        provisioner: &ModelProvisioner,
        artifact: &ArtifactId,
    ) -> Result<ModelHandle, String> {
        let path = provisioner
            .provision(artifact)
            .await
            .map_err(|e| format!("provisioning failed: {e}"))?;
        self.load_from(path).await.map_err(|e| e.to_string())
    }

    async fn load_from(&self, path: PathBuf) -> Result<ModelHandle, RuntimeError> {
        let runtime = Arc::clone(&self.runtime);
        let params = self.settings.load;
        info!(path = %path.display(), context_size = params.context_size, threads = params.threads, "loading model");
        task::spawn_blocking(move || ModelHandle::load(runtime.as_ref(), &path, &params))
            .await
            .map_err(|e| RuntimeError::Load(format!("load task failed: {e}")))?
    }

    pub async fn complete(&self, request: ChatRequest) -> Result<CompletionResult, InferenceError> {
        let Some(handle) = self.state.ready_handle() else {
            debug!("completion rejected, model not ready");
            return Err(InferenceError::NotReady);
        };

        let permit = Arc::clone(&self.queue).try_acquire_owned().map_err(|_| {
            warn!(limit = self.settings.max_queue_depth, "completion queue full");
            InferenceError::Busy
        })?;

        let prompt = render_prompt(&request.messages);
        let params = self.generation_params(&request);

        // The permit is released when the generation ends, even after the
        // caller has stopped waiting.
        let job = task::spawn_blocking(move || {
            let _permit = permit;
            handle.generate(&prompt, &params)
        });

        let joined = match self.settings.request_timeout {
            Some(limit) => time::timeout(limit, job).await.map_err(|_| {
                warn!(timeout_ms = limit.as_millis() as u64, "completion timed out");
                InferenceError::Timeout(limit)
            })?,
            None => job.await,
        };

        let text = joined
            .map_err(|e| InferenceError::GenerationFailure(format!("inference task failed: {e}")))?
            .inspect_err(|e| error!(error = %e, "generation failed"))?;

        Ok(CompletionResult::assistant(text))
    }

    fn generation_params(&self, request: &ChatRequest) -> GenerationParams {
        GenerationParams {
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_new_tokens),
            temperature: request.temperature.unwrap_or(self.settings.temperature),
            stop: stop_markers(),
        }
    }
}
