//! Boundary types for the model-loading collaborator
//!
//! The customizer never parses model files itself; a `ModelProvider`
//! hands it this already-decoded graph: meshes with per-primitive UV
//! coordinates, and materials with an optional base image or flat color.

use std::sync::Arc;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// A loaded model: named meshes plus the materials they reference
#[derive(Debug, Clone)]
pub struct ModelGraph {
    pub name: String,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
}

impl ModelGraph {
    /// Look up a material by id
    pub fn material(&self, id: &str) -> Option<&Material> {
        self.materials.iter().find(|m| m.id == id)
    }
}

/// One mesh of the model, holding one or more primitive groups
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
}

/// A primitive group: the vertices assigned to one material
#[derive(Debug, Clone)]
pub struct Primitive {
    pub material_id: String,
    /// Per-vertex normalized UV coordinates (V increases upward)
    pub uvs: Vec<[f64; 2]>,
}

impl Primitive {
    /// Whether this primitive carries any UV data at all
    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }
}

/// A material as exposed by the model: base image when readable,
/// flat color otherwise
#[derive(Debug, Clone)]
pub struct Material {
    pub id: String,
    pub name: String,
    pub base_image: Option<Arc<RgbaImage>>,
    pub base_color: BaseColor,
}

impl Material {
    /// True pixel dimensions of the base image, if the material has one
    pub fn source_dimensions(&self) -> Option<(u32, u32)> {
        self.base_image
            .as_ref()
            .map(|img| (img.width(), img.height()))
    }
}

/// Flat RGBA fill color for materials without a readable base image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseColor(pub [u8; 4]);

impl BaseColor {
    pub const WHITE: BaseColor = BaseColor([255, 255, 255, 255]);

    /// Parse a `#rrggbb` or `#rrggbbaa` hex string
    pub fn from_hex(hex: &str) -> Option<BaseColor> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 && hex.len() != 8 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        let a = if hex.len() == 8 {
            u8::from_str_radix(&hex[6..8], 16).ok()?
        } else {
            255
        };
        Some(BaseColor([r, g, b, a]))
    }
}

impl Default for BaseColor {
    fn default() -> Self {
        BaseColor::WHITE
    }
}
