//! llama.cpp backend for GGUF models.

use std::{
    num::NonZeroU32,
    path::Path,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{AddBos, LlamaModel, Special, params::LlamaModelParams},
    sampling::LlamaSampler,
};
use tracing::{debug, info};

use crate::{
    error::RuntimeError,
    model::{
        GenerationParams, LoadParams,
        loader::{InferenceRuntime, LoadedModel},
        prompt::find_stop,
    },
};

pub struct LlamaRuntime;

impl InferenceRuntime for LlamaRuntime {
    fn load(&self, path: &Path, params: &LoadParams) -> Result<Box<dyn LoadedModel>, RuntimeError> {
        let backend = LlamaBackend::init()
            .map_err(|e| RuntimeError::Load(format!("llama.cpp backend init failed: {e}")))?;

        let model_params = LlamaModelParams::default();
        #[cfg(any(feature = "cuda", feature = "metal"))]
        let model_params = model_params.with_n_gpu_layers(1000);

        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| RuntimeError::Load(format!("{}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            parameters = model.n_params(),
            vocab = model.n_vocab(),
            "llama.cpp model loaded"
        );

        Ok(Box::new(LlamaLoadedModel {
            backend,
            model,
            params: *params,
        }))
    }
}

struct LlamaLoadedModel {
    backend: LlamaBackend,
    model: LlamaModel,
    params: LoadParams,
}

impl LlamaLoadedModel {
    fn context_params(&self) -> LlamaContextParams {
        let threads = i32::try_from(self.params.threads).unwrap_or(i32::MAX);
        LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.params.context_size))
            .with_n_batch(self.params.context_size)
            .with_n_threads(threads)
            .with_n_threads_batch(threads)
    }

    fn sampler(temperature: f32) -> LlamaSampler {
        if temperature <= 0.0 {
            return LlamaSampler::greedy();
        }
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        LlamaSampler::chain_simple([LlamaSampler::temp(temperature), LlamaSampler::dist(seed)])
    }
}

impl LoadedModel for LlamaLoadedModel {
    fn generate(&mut self, prompt: &str, params: &GenerationParams) -> Result<String, RuntimeError> {
        let start = Instant::now();

        // The prompt already carries <|begin_of_text|>.
        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Never)
            .map_err(|e| RuntimeError::Generation(format!("tokenization failed: {e}")))?;

        let n_ctx = self.params.context_size as usize;
        if tokens.is_empty() || tokens.len() >= n_ctx {
            return Err(RuntimeError::Generation(format!(
                "prompt is {} tokens, context window is {n_ctx}",
                tokens.len()
            )));
        }

        let mut ctx = self
            .model
            .new_context(&self.backend, self.context_params())
            .map_err(|e| RuntimeError::Generation(format!("context creation failed: {e}")))?;

        let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
        let last = tokens.len() - 1;
        for (pos, token) in tokens.iter().enumerate() {
            batch
                .add(*token, pos as i32, &[0], pos == last)
                .map_err(|e| RuntimeError::Generation(e.to_string()))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| RuntimeError::Generation(format!("prompt decode failed: {e}")))?;

        let mut sampler = Self::sampler(params.temperature);
        let budget = params.max_tokens.min(n_ctx - tokens.len());
        let mut pos = tokens.len() as i32;
        let mut bytes: Vec<u8> = Vec::new();
        let mut generated = 0usize;

        while generated < budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                break;
            }
            generated += 1;

            let piece = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| RuntimeError::Generation(format!("detokenization failed: {e}")))?;
            bytes.extend_from_slice(&piece);
            if find_stop(&String::from_utf8_lossy(&bytes), &params.stop).is_some() {
                break;
            }

            batch.clear();
            batch
                .add(token, pos, &[0], true)
                .map_err(|e| RuntimeError::Generation(e.to_string()))?;
            pos += 1;
            ctx.decode(&mut batch)
                .map_err(|e| RuntimeError::Generation(format!("decode failed: {e}")))?;
        }

        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(cut) = find_stop(&text, &params.stop) {
            text.truncate(cut);
        }

        debug!(
            prompt_tokens = tokens.len(),
            generated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(text)
    }
}
