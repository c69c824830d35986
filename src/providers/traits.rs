//! Provider trait for model-loading collaborators

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ModelGraph;

/// Provider error types
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to load base image '{path}': {source}")]
    ImageLoad {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Contract every model-loading collaborator implements: produce a decoded
/// model graph with per-primitive UVs and material assets
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn load(&self) -> ProviderResult<ModelGraph>;
}
