//! Canonical atlas buffer cache
//!
//! One square working buffer per matched material, seeded once from the
//! material's base image (stretched, ignoring aspect ratio) or flat color.
//! The cache persists across redraws triggered by transform edits and is
//! rebuilt only on model reload or explicit material reset, so the expensive
//! base-image draw happens once and redraw cost stays independent of edit
//! count.

use std::collections::HashMap;
use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::model::Material;

/// One cached canonical buffer with the source dimensions captured at build
pub struct AtlasEntry {
    pub material_id: String,
    canonical: RgbaImage,
    /// True pixel dimensions of the material's source texture; equal to the
    /// canvas size for flat-color materials
    pub source_width: u32,
    pub source_height: u32,
}

impl AtlasEntry {
    /// A fresh mutable copy for one composite pass. The canonical buffer is
    /// never handed out mutably, keeping the cache pristine.
    pub fn working_copy(&self) -> RgbaImage {
        self.canonical.clone()
    }

    pub fn canvas_size(&self) -> u32 {
        self.canonical.width()
    }
}

/// Per-material cache of canonical square buffers
pub struct AtlasCache {
    entries: RwLock<HashMap<String, Arc<AtlasEntry>>>,
    canvas_size: u32,
}

impl AtlasCache {
    pub fn new(canvas_size: u32) -> AtlasCache {
        AtlasCache {
            entries: RwLock::new(HashMap::new()),
            canvas_size,
        }
    }

    pub fn canvas_size(&self) -> u32 {
        self.canvas_size
    }

    /// Build (or return the cached) entry for a material.
    ///
    /// A readable base image is stretched non-uniformly to fill the square
    /// buffer exactly; its true dimensions are recorded for the compositor's
    /// distortion compensation. Otherwise the buffer is a flat fill of the
    /// material's base color.
    pub fn entry_for(&self, material: &Material) -> Arc<AtlasEntry> {
        if let Some(entry) = self.entries.read().get(&material.id) {
            return entry.clone();
        }

        let entry = Arc::new(self.build(material));
        self.entries
            .write()
            .insert(material.id.clone(), entry.clone());
        entry
    }

    /// Cached entry, if one was already built
    pub fn get(&self, material_id: &str) -> Option<Arc<AtlasEntry>> {
        self.entries.read().get(material_id).cloned()
    }

    /// Drop one material's entry so the next access rebuilds it
    pub fn reset(&self, material_id: &str) {
        if self.entries.write().remove(material_id).is_some() {
            debug!(material_id = %material_id, "Atlas entry reset");
        }
    }

    /// Drop everything (model unload)
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn build(&self, material: &Material) -> AtlasEntry {
        let size = self.canvas_size;
        match material.base_image.as_deref() {
            Some(base) if base.width() > 0 && base.height() > 0 => {
                let canonical =
                    imageops::resize(base, size, size, imageops::FilterType::Lanczos3);
                info!(
                    material_id = %material.id,
                    source_width = base.width(),
                    source_height = base.height(),
                    canvas = size,
                    "Built canonical atlas buffer from base image"
                );
                AtlasEntry {
                    material_id: material.id.clone(),
                    canonical,
                    source_width: base.width(),
                    source_height: base.height(),
                }
            }
            _ => {
                let color = Rgba(material.base_color.0);
                let canonical = RgbaImage::from_pixel(size, size, color);
                info!(
                    material_id = %material.id,
                    canvas = size,
                    "Built canonical atlas buffer from flat base color"
                );
                AtlasEntry {
                    material_id: material.id.clone(),
                    canonical,
                    source_width: size,
                    source_height: size,
                }
            }
        }
    }
}
