//! Layer transform record
//!
//! Offsets are fractions of the region size so a transform survives a
//! canvas-resolution change unchanged; scales are clamped by the caller
//! against the configured range; rotation is radians about the region
//! center.

use serde::{Deserialize, Serialize};

/// Position, scale, and rotation of one layer within its region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerTransform {
    /// Horizontal offset as a fraction of region width
    #[serde(default)]
    pub offset_x: f64,
    /// Vertical offset as a fraction of region height (positive = down)
    #[serde(default)]
    pub offset_y: f64,
    #[serde(default = "default_scale")]
    pub scale_x: f64,
    #[serde(default = "default_scale")]
    pub scale_y: f64,
    /// Rotation in radians about the region center
    #[serde(default)]
    pub rotation: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for LayerTransform {
    fn default() -> Self {
        LayerTransform {
            offset_x: 0.0,
            offset_y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
        }
    }
}

impl LayerTransform {
    /// Whether the scales are positive and finite
    pub fn is_valid(&self) -> bool {
        self.scale_x.is_finite()
            && self.scale_y.is_finite()
            && self.scale_x > 0.0
            && self.scale_y > 0.0
            && self.offset_x.is_finite()
            && self.offset_y.is_finite()
            && self.rotation.is_finite()
    }
}
