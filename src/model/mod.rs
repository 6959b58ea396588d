mod engine;
mod loader;
pub mod prompt;
mod state;
mod types;

#[cfg(feature = "llama-backend")]
pub mod llama;

pub use engine::{EngineSettings, InferenceServer};
pub use loader::{InferenceRuntime, LoadedModel, ModelHandle, UnavailableRuntime};
pub use state::StatusSnapshot;
pub use types::{
    ChatRequest, CompletionResult, ConversationTurn, GenerationParams, LoadParams, ModelMetadata,
    Role,
};
