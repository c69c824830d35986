//! UV region types and coordinate-space conversion
//!
//! Three coordinate spaces meet here: normalized UV space (V up),
//! canonical-buffer pixel space (V down, square), and the original
//! source-texture pixel space (true aspect ratio). `MaterialRegion`
//! owns the conversions between them so the rest of the crate never
//! repeats the math.

use serde::{Deserialize, Serialize};

/// Normalized UV-space bounding box (0..1, V increases upward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvBounds {
    pub min_u: f64,
    pub min_v: f64,
    pub max_u: f64,
    pub max_v: f64,
}

impl UvBounds {
    /// Bounding box of a set of UV points, or `None` for an empty set
    pub fn from_points<'a, I>(points: I) -> Option<UvBounds>
    where
        I: IntoIterator<Item = &'a [f64; 2]>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = UvBounds {
            min_u: first[0],
            min_v: first[1],
            max_u: first[0],
            max_v: first[1],
        };
        for p in iter {
            bounds.min_u = bounds.min_u.min(p[0]);
            bounds.min_v = bounds.min_v.min(p[1]);
            bounds.max_u = bounds.max_u.max(p[0]);
            bounds.max_v = bounds.max_v.max(p[1]);
        }
        Some(bounds)
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &UvBounds) -> UvBounds {
        UvBounds {
            min_u: self.min_u.min(other.min_u),
            min_v: self.min_v.min(other.min_v),
            max_u: self.max_u.max(other.max_u),
            max_v: self.max_v.max(other.max_v),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_u - self.min_u
    }

    pub fn height(&self) -> f64 {
        self.max_v - self.min_v
    }

    /// Zero or negative extent on either axis
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Axis-aligned rectangle in canonical-buffer pixels (Y down)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl PixelRect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    /// Aspect ratio as drawn on the canonical buffer (distorted)
    pub fn aspect(&self) -> f64 {
        self.w / self.h
    }
}

/// The customizable UV rectangle assigned to one material
///
/// Computed once per model load by the resolver and immutable after;
/// holds the mesh name it came from as a weak back-reference only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRegion {
    pub material_id: String,
    pub mesh_name: String,
    pub bounds: UvBounds,
    /// True pixel dimensions of the original source texture, captured once
    pub source_width: u32,
    pub source_height: u32,
    /// Set when the resolver substituted this region because no keyword matched
    pub fallback: bool,
}

impl MaterialRegion {
    /// UV bounds converted to canonical-buffer pixels.
    ///
    /// V increases upward in UV space but downward in raster space, so the
    /// rect's top edge comes from `max_v`. Returns `None` for a rect with
    /// non-positive width or height; callers skip it rather than crash.
    pub fn pixel_rect(&self, canvas_size: u32) -> Option<PixelRect> {
        let canvas = canvas_size as f64;
        let rect = PixelRect {
            x: self.bounds.min_u * canvas,
            y: (1.0 - self.bounds.max_v) * canvas,
            w: self.bounds.width() * canvas,
            h: self.bounds.height() * canvas,
        };
        if rect.w <= 0.0 || rect.h <= 0.0 {
            None
        } else {
            Some(rect)
        }
    }

    /// Aspect-ratio correction for the square canonical buffer.
    ///
    /// Stretching the (possibly non-square) source texture into a square
    /// buffer scales U and V unevenly; because the buffer's width equals its
    /// height, the correction collapses to the raw source aspect ratio.
    pub fn distortion_factor(&self) -> f64 {
        if self.source_height == 0 {
            return 1.0;
        }
        self.source_width as f64 / self.source_height as f64
    }

    /// Aspect the region would have without the square-buffer stretch
    pub fn true_aspect(&self, canvas_size: u32) -> Option<f64> {
        let rect = self.pixel_rect(canvas_size)?;
        Some(rect.aspect() * self.distortion_factor())
    }

    /// Print-accurate output dimensions, measured against the original
    /// source texture rather than the canonical buffer
    pub fn print_dimensions(&self) -> (u32, u32) {
        let w = (self.bounds.width() * self.source_width as f64).round() as u32;
        let h = (self.bounds.height() * self.source_height as f64).round() as u32;
        (w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bounds: UvBounds, sw: u32, sh: u32) -> MaterialRegion {
        MaterialRegion {
            material_id: "m0".to_string(),
            mesh_name: "wrap".to_string(),
            bounds,
            source_width: sw,
            source_height: sh,
            fallback: false,
        }
    }

    #[test]
    fn test_bounds_from_points() {
        let points = [[0.2, 0.3], [0.8, 0.1], [0.5, 0.9]];
        let bounds = UvBounds::from_points(points.iter()).unwrap();
        assert_eq!(bounds.min_u, 0.2);
        assert_eq!(bounds.min_v, 0.1);
        assert_eq!(bounds.max_u, 0.8);
        assert_eq!(bounds.max_v, 0.9);
        let empty: [[f64; 2]; 0] = [];
        assert!(UvBounds::from_points(empty.iter()).is_none());
    }

    #[test]
    fn test_pixel_rect_flips_v() {
        // Top half of UV space (v in [0.5, 1.0]) maps to the top half of
        // the raster buffer (y in [0, 512)).
        let r = region(
            UvBounds { min_u: 0.0, min_v: 0.5, max_u: 1.0, max_v: 1.0 },
            1024,
            1024,
        );
        let rect = r.pixel_rect(1024).unwrap();
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 0.0);
        assert_eq!(rect.w, 1024.0);
        assert_eq!(rect.h, 512.0);
    }

    #[test]
    fn test_degenerate_rect_skipped() {
        let r = region(
            UvBounds { min_u: 0.3, min_v: 0.4, max_u: 0.3, max_v: 0.9 },
            512,
            512,
        );
        assert!(r.bounds.is_degenerate());
        assert!(r.pixel_rect(1024).is_none());
    }

    #[test]
    fn test_distortion_factor_is_source_aspect() {
        let r = region(
            UvBounds { min_u: 0.0, min_v: 0.0, max_u: 1.0, max_v: 1.0 },
            1141,
            8359,
        );
        let df = r.distortion_factor();
        assert!((df - 1141.0 / 8359.0).abs() < 1e-12);
    }

    #[test]
    fn test_true_aspect_undoes_square_stretch() {
        // Full-UV region of a 2:1 source: the square buffer shows it 1:1,
        // the true aspect must come back as 2.0.
        let r = region(
            UvBounds { min_u: 0.0, min_v: 0.0, max_u: 1.0, max_v: 1.0 },
            2000,
            1000,
        );
        assert!((r.true_aspect(2048).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_print_dimensions_reference_case() {
        let r = region(
            UvBounds { min_u: 0.0, min_v: 0.0, max_u: 1.0, max_v: 0.498 },
            1141,
            8359,
        );
        let (w, h) = r.print_dimensions();
        assert_eq!(w, 1141);
        assert!((h as i64 - 4163).abs() <= 1);
    }
}
