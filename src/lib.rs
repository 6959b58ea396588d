pub mod config;
pub mod error;
pub mod model;
pub mod provision;
pub mod server;

pub use config::AppConfig;
pub use error::{InferenceError, ProvisionError, ServiceError};
pub use model::{ChatRequest, CompletionResult, EngineSettings, InferenceServer};
pub use provision::{ArtifactId, ArtifactStore, HubStore, ModelProvisioner};
pub use server::build_router;
