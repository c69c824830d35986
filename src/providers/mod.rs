//! Model-loading collaborator boundary
//!
//! The customizer consumes an already-decoded `ModelGraph`; actual model
//! file parsing (glTF and friends) lives outside this crate. A JSON
//! manifest provider ships in-crate for the CLI driver and tests.

pub mod manifest;
pub mod traits;

pub use manifest::ManifestProvider;
pub use traits::{ModelProvider, ProviderError, ProviderResult};
