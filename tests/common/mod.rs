#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use axiom_llm_service::{
    ArtifactId, ArtifactStore, EngineSettings, InferenceServer, ModelProvisioner, ProvisionError,
    error::RuntimeError,
    model::{GenerationParams, InferenceRuntime, LoadParams, LoadedModel},
};

/// Records every invocation and checks that none overlap.
#[derive(Default)]
pub struct CallLog {
    pub loads: AtomicUsize,
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub params: Mutex<Vec<GenerationParams>>,
}

pub struct StubRuntime {
    pub log: Arc<CallLog>,
    pub reply: String,
    pub delay: Duration,
    pub fail_load: bool,
    pub fail_generation: bool,
}

impl StubRuntime {
    pub fn replying(reply: &str) -> Self {
        Self {
            log: Arc::new(CallLog::default()),
            reply: reply.to_string(),
            delay: Duration::ZERO,
            fail_load: false,
            fail_generation: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl InferenceRuntime for StubRuntime {
    fn load(&self, _: &Path, _: &LoadParams) -> Result<Box<dyn LoadedModel>, RuntimeError> {
        self.log.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(RuntimeError::Load("corrupt weights".into()));
        }
        Ok(Box::new(StubModel {
            log: self.log.clone(),
            reply: self.reply.clone(),
            delay: self.delay,
            fail: self.fail_generation,
        }))
    }
}

struct StubModel {
    log: Arc<CallLog>,
    reply: String,
    delay: Duration,
    fail: bool,
}

impl LoadedModel for StubModel {
    fn generate(&mut self, prompt: &str, params: &GenerationParams) -> Result<String, RuntimeError> {
        let now = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_active.fetch_max(now, Ordering::SeqCst);
        self.log.calls.fetch_add(1, Ordering::SeqCst);
        self.log.prompts.lock().push(prompt.to_string());
        self.log.params.lock().push(params.clone());

        std::thread::sleep(self.delay);

        self.log.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(RuntimeError::Generation("out of memory".into()));
        }
        Ok(self.reply.clone())
    }
}

pub enum StoreBehavior {
    Serve(Vec<u8>),
    Fail(ProvisionError),
    /// Writes some bytes, then fails.
    Truncate,
}

pub struct StubStore {
    pub fetches: AtomicUsize,
    pub credentials: Mutex<Vec<Option<String>>>,
    behavior: StoreBehavior,
}

impl StubStore {
    pub fn new(behavior: StoreBehavior) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            credentials: Mutex::new(Vec::new()),
            behavior,
        }
    }

    pub fn serving(bytes: &[u8]) -> Self {
        Self::new(StoreBehavior::Serve(bytes.to_vec()))
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for StubStore {
    async fn fetch(
        &self,
        _artifact: &ArtifactId,
        credential: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProvisionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().push(credential.map(str::to_string));
        match &self.behavior {
            StoreBehavior::Serve(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(())
            }
            StoreBehavior::Fail(err) => Err(err.clone()),
            StoreBehavior::Truncate => {
                tokio::fs::write(dest, b"half").await?;
                Err(ProvisionError::Network("connection reset".into()))
            }
        }
    }
}

pub fn artifact() -> ArtifactId {
    ArtifactId::new("org/tiny-llama", "tiny.gguf")
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        load: LoadParams {
            context_size: 2048,
            threads: 2,
        },
        max_new_tokens: 64,
        temperature: 0.7,
        max_queue_depth: 32,
        request_timeout: Some(Duration::from_secs(30)),
    }
}

/// Starts an engine against `store` and waits for the model to settle.
pub async fn settled_engine(
    settings: EngineSettings,
    runtime: StubRuntime,
    store: Arc<StubStore>,
    cache: &Path,
) -> Arc<InferenceServer> {
    let engine = Arc::new(InferenceServer::new(settings, Arc::new(runtime)));
    let provisioner = Arc::new(ModelProvisioner::new(cache, store, None));
    engine
        .start(provisioner, artifact())
        .expect("first start spawns")
        .await
        .expect("startup task");
    engine
}
