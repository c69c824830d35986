//! Compositing engine: atlas cache, blend primitives, region compositor,
//! export pipeline

pub mod atlas;
pub mod blend;
pub mod compositor;
pub mod export;

pub use atlas::{AtlasCache, AtlasEntry};
pub use compositor::{outline_region, CompositeFrame, Compositor};
pub use export::{ExportArtifact, ExportError, ExportKind, Exporter};
