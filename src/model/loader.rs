use std::{fs, path::Path};

use parking_lot::Mutex;

use crate::{
    error::RuntimeError,
    model::{GenerationParams, LoadParams, ModelMetadata},
};

/// Native inference runtime able to load a model file.
pub trait InferenceRuntime: Send + Sync {
    fn load(&self, path: &Path, params: &LoadParams) -> Result<Box<dyn LoadedModel>, RuntimeError>;
}

/// A model resident in memory. Implementations need not be safe for
/// concurrent use; [`ModelHandle`] serializes every call.
pub trait LoadedModel: Send {
    fn generate(&mut self, prompt: &str, params: &GenerationParams) -> Result<String, RuntimeError>;
}

pub struct ModelHandle {
    metadata: ModelMetadata,
    model: Mutex<Box<dyn LoadedModel>>,
}

impl ModelHandle {
    pub fn load(
        runtime: &dyn InferenceRuntime,
        path: &Path,
        params: &LoadParams,
    ) -> Result<Self, RuntimeError> {
        let size_bytes = fs::metadata(path)
            .map_err(|e| RuntimeError::Load(format!("{}: {e}", path.display())))?
            .len();
        let model = runtime.load(path, params)?;

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            metadata: ModelMetadata {
                name,
                path: path.to_path_buf(),
                size_bytes,
                context_size: params.context_size,
            },
            model: Mutex::new(model),
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Runs one generation while holding the model lock. Blocks.
    pub fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, RuntimeError> {
        let mut model = self.model.lock();
        model.generate(prompt, params)
    }
}

/// Stand-in used when the binary is built without a native backend.
pub struct UnavailableRuntime;

impl InferenceRuntime for UnavailableRuntime {
    fn load(&self, _path: &Path, _params: &LoadParams) -> Result<Box<dyn LoadedModel>, RuntimeError> {
        Err(RuntimeError::Load(
            "no inference backend compiled in, rebuild with --features llama-backend".into(),
        ))
    }
}
