//! Domain models: model graph boundary types, UV regions, layers, transforms

pub mod layer;
pub mod model;
pub mod region;
pub mod transform;

pub use layer::{BlendMode, FitMode, Layer, LayerImage, LayerStack, LayerStackError};
pub use model::{Material, Mesh, ModelGraph, Primitive};
pub use region::{MaterialRegion, PixelRect, UvBounds};
pub use transform::LayerTransform;
