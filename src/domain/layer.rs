//! Layer stack: ordered image layers with independent transforms
//!
//! Paint order is vector order. An optional "Surface" layer sits pinned at
//! index 0, non-editable, drawn with `stretch`; user actions can never
//! reorder or delete it.

use std::sync::Arc;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::transform::LayerTransform;

/// Layer stack mutation errors
#[derive(Debug, Error)]
pub enum LayerStackError {
    #[error("Layer not found: {0}")]
    NotFound(Uuid),
    #[error("The surface layer cannot be {0}")]
    SurfaceLocked(&'static str),
    #[error("Target index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Policy governing how a layer's image is sized within its region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Fill the region rect exactly, ignoring aspect ratio. Reserved for
    /// pre-authored base art that matches the UV layout pixel-for-pixel.
    Stretch,
    /// True aspect preserved, region fully covered, excess cropped
    Cover,
    /// True aspect preserved, fits entirely inside the region
    Contain,
}

impl Default for FitMode {
    fn default() -> Self {
        FitMode::Contain
    }
}

/// Blend modes for layer compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Normal alpha blending
    #[default]
    Normal,
    /// Multiply blending (darkens)
    Multiply,
    /// Screen blending (lightens)
    Screen,
    /// Overlay blending (contrast)
    Overlay,
}

/// Decode state of a layer's raster image
///
/// Decoding is asynchronous; a `Pending` or `Failed` layer is simply
/// absent from composite passes until it becomes `Ready`.
#[derive(Debug, Clone)]
pub enum LayerImage {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed(String),
}

impl LayerImage {
    /// The decoded image, if present and non-zero-sized
    pub fn drawable(&self) -> Option<&Arc<RgbaImage>> {
        match self {
            LayerImage::Ready(img) if img.width() > 0 && img.height() > 0 => Some(img),
            _ => None,
        }
    }
}

/// One image layer with its own transform and fit policy
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: Uuid,
    pub display_name: String,
    pub image: LayerImage,
    pub transform: LayerTransform,
    pub fit_mode: FitMode,
    pub blend_mode: BlendMode,
    /// 0 = transparent, 255 = opaque; applied before blending
    pub opacity: u8,
    pub editable: bool,
}

impl Layer {
    /// A user layer whose image is still decoding
    pub fn pending(display_name: impl Into<String>) -> Layer {
        Layer {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            image: LayerImage::Pending,
            transform: LayerTransform::default(),
            fit_mode: FitMode::default(),
            blend_mode: BlendMode::default(),
            opacity: 255,
            editable: true,
        }
    }

    /// A user layer with an already-decoded image
    pub fn from_image(display_name: impl Into<String>, image: Arc<RgbaImage>) -> Layer {
        Layer {
            image: LayerImage::Ready(image),
            ..Layer::pending(display_name)
        }
    }

    /// The non-editable pre-authored base layer, pinned at index 0 and
    /// drawn with `stretch`
    pub fn surface(image: Arc<RgbaImage>) -> Layer {
        Layer {
            display_name: "Surface".to_string(),
            fit_mode: FitMode::Stretch,
            editable: false,
            ..Layer::from_image("Surface", image)
        }
    }
}

/// Ordered layer list; index 0 may hold a pinned surface layer
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new() -> LayerStack {
        LayerStack { layers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn get(&self, id: Uuid) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Whether index 0 holds the pinned surface layer
    pub fn has_surface(&self) -> bool {
        self.layers.first().map(|l| !l.editable).unwrap_or(false)
    }

    /// Editable layers only, in paint order
    pub fn user_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|l| l.editable)
    }

    /// Append a user layer on top of the paint order
    pub fn push(&mut self, layer: Layer) -> Uuid {
        let id = layer.id;
        self.layers.push(layer);
        id
    }

    /// Install the surface layer at index 0, replacing any previous one
    pub fn set_surface(&mut self, layer: Layer) -> Uuid {
        let id = layer.id;
        if self.has_surface() {
            self.layers[0] = layer;
        } else {
            self.layers.insert(0, layer);
        }
        id
    }

    /// Remove a layer; the surface layer is refused
    pub fn delete(&mut self, id: Uuid) -> Result<Layer, LayerStackError> {
        let index = self.index_of(id).ok_or(LayerStackError::NotFound(id))?;
        if !self.layers[index].editable {
            return Err(LayerStackError::SurfaceLocked("deleted"));
        }
        Ok(self.layers.remove(index))
    }

    /// Clone a layer directly above the original, with a fresh id
    pub fn duplicate(&mut self, id: Uuid) -> Result<Uuid, LayerStackError> {
        let index = self.index_of(id).ok_or(LayerStackError::NotFound(id))?;
        if !self.layers[index].editable {
            return Err(LayerStackError::SurfaceLocked("duplicated"));
        }
        let mut copy = self.layers[index].clone();
        copy.id = Uuid::new_v4();
        copy.display_name = format!("{} copy", copy.display_name);
        let new_id = copy.id;
        self.layers.insert(index + 1, copy);
        Ok(new_id)
    }

    /// Move a layer to a new paint-order index; index 0 is reserved while
    /// a surface layer is present
    pub fn move_layer(&mut self, id: Uuid, new_index: usize) -> Result<(), LayerStackError> {
        let index = self.index_of(id).ok_or(LayerStackError::NotFound(id))?;
        if !self.layers[index].editable {
            return Err(LayerStackError::SurfaceLocked("reordered"));
        }
        let floor = if self.has_surface() { 1 } else { 0 };
        if new_index < floor || new_index >= self.layers.len() {
            return Err(LayerStackError::IndexOutOfRange {
                index: new_index,
                len: self.layers.len(),
            });
        }
        let layer = self.layers.remove(index);
        self.layers.insert(new_index, layer);
        Ok(())
    }
}
