//! Distortion-compensated region compositor
//!
//! The canonical buffer is square; the true region and its UV rectangle
//! generally are not. Atlas construction stretched the source texture to fit
//! the square, silently distorting angles and circles, so overlays drawn here
//! must be sized against the region's *true* aspect and converted back into
//! canonical pixels through the distortion factor. Drawing is inverse-mapped
//! per destination pixel (bilinear sampling, row-parallel) and clipped
//! strictly to the region rect.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{FitMode, Layer, LayerStack, MaterialRegion, PixelRect};
use super::atlas::AtlasEntry;
use super::blend::{bilinear_sample, blend_pixel, MaskFn};

/// Result of one composite pass
///
/// Presentation is the observer's concern; this is just the buffer, the
/// region rect it was clipped to, and pass statistics.
pub struct CompositeFrame {
    pub material_id: String,
    pub image: RgbaImage,
    pub rect: Option<PixelRect>,
    pub layers_drawn: usize,
    pub layers_skipped: usize,
}

/// Region compositor over a cached canonical atlas buffer
#[derive(Debug, Clone, Default)]
pub struct Compositor;

impl Compositor {
    pub fn new() -> Compositor {
        Compositor
    }

    /// Render the layer stack into a working copy of the cached atlas,
    /// clipped to the region.
    ///
    /// A degenerate region rect skips all drawing and returns the untouched
    /// copy. A layer whose image is still decoding, failed, or zero-sized is
    /// skipped for this pass only; the remaining layers still draw.
    pub fn composite(
        &self,
        atlas: &AtlasEntry,
        region: &MaterialRegion,
        stack: &LayerStack,
        mask: Option<&MaskFn>,
    ) -> CompositeFrame {
        let mut image = atlas.working_copy();
        let canvas_size = atlas.canvas_size();

        let Some(rect) = region.pixel_rect(canvas_size) else {
            warn!(
                material_id = %region.material_id,
                "Region rect is degenerate, skipping composite pass"
            );
            return CompositeFrame {
                material_id: region.material_id.clone(),
                image,
                rect: None,
                layers_drawn: 0,
                layers_skipped: stack.len(),
            };
        };

        let distortion = distortion_factor(atlas);
        let mut drawn = 0;
        let mut skipped = 0;

        for layer in stack.iter() {
            match layer.image.drawable() {
                Some(src) => {
                    draw_layer(&mut image, layer, src, rect, distortion, mask);
                    drawn += 1;
                }
                None => {
                    debug!(
                        layer = %layer.display_name,
                        "Layer image not drawable yet, skipping for this pass"
                    );
                    skipped += 1;
                }
            }
        }

        debug!(
            material_id = %region.material_id,
            layers_drawn = drawn,
            layers_skipped = skipped,
            "Composite pass complete"
        );

        CompositeFrame {
            material_id: region.material_id.clone(),
            image,
            rect: Some(rect),
            layers_drawn: drawn,
            layers_skipped: skipped,
        }
    }
}

/// Aspect-ratio correction from stretching the source into a square buffer.
/// Width equals height on the canonical buffer, so this collapses to the raw
/// source aspect ratio.
fn distortion_factor(atlas: &AtlasEntry) -> f64 {
    if atlas.source_height == 0 {
        return 1.0;
    }
    atlas.source_width as f64 / atlas.source_height as f64
}

/// Draw rectangle size in canonical pixels for a layer image under a fit
/// policy.
///
/// `cover` and `contain` compare the image's aspect to the region's true
/// aspect (undistorted), then convert the winning dimension back into
/// canonical pixels through the distortion factor. `stretch` is exactly the
/// rect, reserved for pre-authored art matching the UV layout.
pub(crate) fn fit_dimensions(
    fit: FitMode,
    image_width: f64,
    image_height: f64,
    rect: PixelRect,
    distortion: f64,
) -> (f64, f64) {
    match fit {
        FitMode::Stretch => (rect.w, rect.h),
        FitMode::Cover => {
            let image_aspect = image_width / image_height;
            let true_aspect = rect.aspect() * distortion;
            if image_aspect > true_aspect {
                // Image is wider than the true region: heights match, width
                // overflows and gets cropped by the region clip.
                (rect.h * image_aspect / distortion, rect.h)
            } else {
                (rect.w, rect.w * distortion / image_aspect)
            }
        }
        FitMode::Contain => {
            let image_aspect = image_width / image_height;
            let true_aspect = rect.aspect() * distortion;
            let (w, h) = if image_aspect > true_aspect {
                (rect.w, rect.w * distortion / image_aspect)
            } else {
                (rect.h * image_aspect / distortion, rect.h)
            };
            // Guard against float drift pushing a dimension past the rect.
            (w.min(rect.w), h.min(rect.h))
        }
    }
}

/// Inverse-map one layer into the working buffer.
///
/// Forward placement: the draw rect is centered in the region rect, offset by
/// transform fractions in layer-local axes, then rotated and scaled about the
/// region rect's center. Each destination pixel inside the clip is mapped
/// back through the inverse (un-rotate, un-scale) and bilinearly sampled.
fn draw_layer(
    image: &mut RgbaImage,
    layer: &Layer,
    src: &RgbaImage,
    rect: PixelRect,
    distortion: f64,
    mask: Option<&MaskFn>,
) {
    let canvas_w = image.width() as i64;
    let canvas_h = image.height() as i64;

    let (dw, dh) = fit_dimensions(
        layer.fit_mode,
        src.width() as f64,
        src.height() as f64,
        rect,
        distortion,
    );
    if dw <= 0.0 || dh <= 0.0 {
        return;
    }

    let t = &layer.transform;
    if !t.is_valid() {
        warn!(layer = %layer.display_name, "Layer transform invalid, skipping draw");
        return;
    }
    let dx = rect.x + (rect.w - dw) / 2.0 + t.offset_x * rect.w;
    let dy = rect.y + (rect.h - dh) / 2.0 + t.offset_y * rect.h;

    let (cx, cy) = rect.center();
    let cos_r = t.rotation.cos();
    let sin_r = t.rotation.sin();
    let inv_sx = 1.0 / t.scale_x;
    let inv_sy = 1.0 / t.scale_y;

    let src_w = src.width() as f64;
    let src_h = src.height() as f64;

    // Clip strictly to the region rect so one region never bleeds into
    // another material's slot of the shared buffer.
    let x0 = rect.x.floor().max(0.0) as i64;
    let y0 = rect.y.floor().max(0.0) as i64;
    let x1 = ((rect.x + rect.w).ceil() as i64).min(canvas_w);
    let y1 = ((rect.y + rect.h).ceil() as i64).min(canvas_h);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let mode = layer.blend_mode;
    let opacity = layer.opacity;
    let row_bytes = canvas_w as usize * 4;

    // Process rows in parallel using Rayon
    let buf: &mut [u8] = &mut *image;
    buf.par_chunks_mut(row_bytes)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let py = y as f64 + 0.5 - cy;
            for x in x0..x1 {
                if !rect.contains(x as f64 + 0.5, y as f64 + 0.5) {
                    continue;
                }
                let px = x as f64 + 0.5 - cx;

                // Inverse of rotate-then-scale about the rect center.
                let rx = cos_r * px + sin_r * py;
                let ry = -sin_r * px + cos_r * py;
                let lx = cx + rx * inv_sx;
                let ly = cy + ry * inv_sy;

                let u = (lx - dx) / dw;
                let v = (ly - dy) / dh;
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }

                let sample = bilinear_sample(src, u * (src_w - 1.0), v * (src_h - 1.0));
                let coverage = mask.map(|m| m(u, v)).unwrap_or(1.0);

                let i = x as usize * 4;
                let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                let blended = blend_pixel(base, sample, mode, opacity, coverage);
                row[i..i + 4].copy_from_slice(&blended.0);
            }
        });
}

/// Draw the region rect outline into a buffer, for visual diagnostics
pub fn outline_region(image: &mut RgbaImage, rect: PixelRect) {
    let w = rect.w.round().max(1.0) as u32;
    let h = rect.h.round().max(1.0) as u32;
    draw_hollow_rect_mut(
        image,
        Rect::at(rect.x.round() as i32, rect.y.round() as i32).of_size(w, h),
        Rgba([255, 0, 255, 255]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BaseColor, Material};
    use crate::domain::{BlendMode, LayerTransform, UvBounds};
    use crate::engine::atlas::AtlasCache;
    use std::sync::Arc;

    fn flat_atlas(canvas: u32, color: [u8; 4]) -> Arc<AtlasEntry> {
        let cache = AtlasCache::new(canvas);
        cache.entry_for(&Material {
            id: "m0".to_string(),
            name: "outside".to_string(),
            base_image: None,
            base_color: BaseColor(color),
        })
    }

    fn textured_atlas(canvas: u32, source_w: u32, source_h: u32) -> Arc<AtlasEntry> {
        let cache = AtlasCache::new(canvas);
        cache.entry_for(&Material {
            id: "m0".to_string(),
            name: "outside".to_string(),
            base_image: Some(Arc::new(RgbaImage::from_pixel(
                source_w,
                source_h,
                Rgba([255, 255, 255, 255]),
            ))),
            base_color: BaseColor::default(),
        })
    }

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

    fn red_image(w: u32, h: u32) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    const FULL: UvBounds = UvBounds { min_u: 0.0, min_v: 0.0, max_u: 1.0, max_v: 1.0 };
    const LEFT_HALF: UvBounds = UvBounds { min_u: 0.0, min_v: 0.0, max_u: 0.5, max_v: 1.0 };

    #[test]
    fn test_stretch_fills_rect_exactly_any_aspect() {
        let rect = PixelRect { x: 10.0, y: 20.0, w: 100.0, h: 50.0 };
        for (iw, ih) in [(10.0, 1000.0), (1000.0, 10.0), (64.0, 64.0)] {
            assert_eq!(fit_dimensions(FitMode::Stretch, iw, ih, rect, 0.25), (100.0, 50.0));
        }
    }

    #[test]
    fn test_contain_never_exceeds_and_touches_one_axis() {
        let rect = PixelRect { x: 0.0, y: 0.0, w: 300.0, h: 120.0 };
        for distortion in [0.25, 1.0, 3.5] {
            for (iw, ih) in [(100.0, 400.0), (400.0, 100.0), (128.0, 128.0)] {
                let (w, h) = fit_dimensions(FitMode::Contain, iw, ih, rect, distortion);
                assert!(w <= rect.w + 1e-9 && h <= rect.h + 1e-9);
                assert!(
                    (w - rect.w).abs() < 1e-6 || (h - rect.h).abs() < 1e-6,
                    "contain must touch at least one bound (got {w}x{h})"
                );
            }
        }
    }

    #[test]
    fn test_cover_reaches_both_bounds() {
        let rect = PixelRect { x: 0.0, y: 0.0, w: 300.0, h: 120.0 };
        for distortion in [0.25, 1.0, 3.5] {
            for (iw, ih) in [(100.0, 400.0), (400.0, 100.0), (128.0, 128.0)] {
                let (w, h) = fit_dimensions(FitMode::Cover, iw, ih, rect, distortion);
                assert!(w >= rect.w - 1e-6 && h >= rect.h - 1e-6);
            }
        }
    }

    #[test]
    fn test_contain_compensates_square_stretch() {
        // Source texture 1000x2000 stretched into a 1000x1000 canvas: a
        // square image contained in the full region must come out 1000x500
        // on the canvas so it reads square once mapped back.
        let rect = PixelRect { x: 0.0, y: 0.0, w: 1000.0, h: 1000.0 };
        let (w, h) = fit_dimensions(FitMode::Contain, 256.0, 256.0, rect, 0.5);
        assert!((w - 1000.0).abs() < 1e-6);
        assert!((h - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_stretch_layer_paints_whole_region_and_nothing_else() {
        let atlas = flat_atlas(128, [0, 0, 0, 255]);
        let r = region(LEFT_HALF, 128, 128);
        let mut stack = LayerStack::new();
        let mut layer = Layer::from_image("art", red_image(7, 31));
        layer.fit_mode = FitMode::Stretch;
        stack.push(layer);

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        assert_eq!(frame.layers_drawn, 1);
        // Inside the region (left half of the canvas).
        assert_eq!(frame.image.get_pixel(5, 64).0, [255, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(63, 5).0, [255, 0, 0, 255]);
        // Outside the region stays the atlas base.
        assert_eq!(frame.image.get_pixel(64, 64).0, [0, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(127, 127).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_scaled_layer_clips_to_region() {
        let atlas = flat_atlas(128, [0, 0, 0, 255]);
        let r = region(LEFT_HALF, 128, 128);
        let mut stack = LayerStack::new();
        let mut layer = Layer::from_image("art", red_image(16, 16));
        layer.fit_mode = FitMode::Stretch;
        layer.transform = LayerTransform { scale_x: 10.0, scale_y: 10.0, ..Default::default() };
        stack.push(layer);

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        // Even scaled far past the region, nothing bleeds into the other
        // material's slot of the shared buffer.
        assert_eq!(frame.image.get_pixel(64, 64).0, [0, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(100, 10).0, [0, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(10, 64).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_pending_layer_skipped_others_draw() {
        let atlas = flat_atlas(64, [0, 0, 0, 255]);
        let r = region(FULL, 64, 64);
        let mut stack = LayerStack::new();
        stack.push(Layer::pending("loading"));
        let mut layer = Layer::from_image("art", red_image(8, 8));
        layer.fit_mode = FitMode::Stretch;
        stack.push(layer);

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        assert_eq!(frame.layers_drawn, 1);
        assert_eq!(frame.layers_skipped, 1);
        assert_eq!(frame.image.get_pixel(32, 32).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_degenerate_region_returns_untouched_copy() {
        let atlas = flat_atlas(64, [9, 9, 9, 255]);
        let r = region(
            UvBounds { min_u: 0.25, min_v: 0.0, max_u: 0.25, max_v: 1.0 },
            64,
            64,
        );
        let mut stack = LayerStack::new();
        stack.push(Layer::from_image("art", red_image(8, 8)));

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        assert!(frame.rect.is_none());
        assert_eq!(frame.layers_drawn, 0);
        assert_eq!(frame.image.get_pixel(16, 16).0, [9, 9, 9, 255]);
    }

    #[test]
    fn test_offset_moves_layer_by_region_fraction() {
        let atlas = flat_atlas(100, [0, 0, 0, 255]);
        let r = region(FULL, 100, 100);
        let mut stack = LayerStack::new();
        let mut layer = Layer::from_image("art", red_image(10, 10));
        layer.fit_mode = FitMode::Contain;
        layer.transform = LayerTransform {
            scale_x: 0.2,
            scale_y: 0.2,
            offset_x: 0.25,
            ..Default::default()
        };
        stack.push(layer);

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        // The offset translation happens before the scale about the rect
        // center, so the 0.25-region push is scaled down too: the 20x20
        // effective patch centers at x=55, y=50.
        assert_eq!(frame.image.get_pixel(55, 50).0, [255, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(75, 50).0, [0, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(30, 50).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_rotation_quarter_turn_moves_offset_layer() {
        // A layer pushed right then rotated 90 degrees about the region
        // center must end up below (raster Y grows downward).
        let atlas = flat_atlas(100, [0, 0, 0, 255]);
        let r = region(FULL, 100, 100);
        let mut stack = LayerStack::new();
        let mut layer = Layer::from_image("art", red_image(10, 10));
        layer.fit_mode = FitMode::Contain;
        layer.transform = LayerTransform {
            scale_x: 0.2,
            scale_y: 0.2,
            offset_x: 0.25,
            rotation: std::f64::consts::FRAC_PI_2,
            ..Default::default()
        };
        stack.push(layer);

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        // Scaled offset lands the patch center at (50, 55) after the turn.
        assert_eq!(frame.image.get_pixel(50, 55).0, [255, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(75, 50).0, [0, 0, 0, 255]);
        assert_eq!(frame.image.get_pixel(50, 30).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_blend_mode_multiply_darkens_base() {
        let atlas = flat_atlas(32, [100, 100, 100, 255]);
        let r = region(FULL, 32, 32);
        let mut stack = LayerStack::new();
        let mut layer = Layer::from_image(
            "shade",
            Arc::new(RgbaImage::from_pixel(8, 8, Rgba([128, 128, 128, 255]))),
        );
        layer.fit_mode = FitMode::Stretch;
        layer.blend_mode = BlendMode::Multiply;
        stack.push(layer);

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        assert!(frame.image.get_pixel(16, 16).0[0] < 100);
    }

    #[test]
    fn test_feather_mask_fades_layer_edges() {
        let atlas = flat_atlas(64, [0, 0, 0, 255]);
        let r = region(FULL, 64, 64);
        let mut stack = LayerStack::new();
        let mut layer = Layer::from_image("art", red_image(8, 8));
        layer.fit_mode = FitMode::Stretch;
        stack.push(layer);

        let mask = crate::engine::blend::feather_mask(0.5);
        let frame = Compositor::new().composite(&atlas, &r, &stack, Some(&mask));
        let center = frame.image.get_pixel(32, 32).0[0];
        let edge = frame.image.get_pixel(1, 32).0[0];
        assert!(center > 200);
        assert!(edge < center);
    }

    #[test]
    fn test_fallback_region_composites_without_crash() {
        // A resolver-substituted fallback region must flow through the
        // compositor like any other.
        let atlas = textured_atlas(64, 30, 120);
        let mut r = region(FULL, 30, 120);
        r.fallback = true;
        let mut stack = LayerStack::new();
        stack.push(Layer::from_image("art", red_image(8, 8)));

        let frame = Compositor::new().composite(&atlas, &r, &stack, None);
        assert!(frame.rect.is_some());
        assert_eq!(frame.layers_drawn, 1);
    }
}
