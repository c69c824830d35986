//! Pixel blend primitives
//!
//! One explicit alpha-blend entry point (source pixel, coverage from an
//! optional mask, blend-mode enum) over plain `Rgba<u8>` values, plus the
//! bilinear sampler the compositor's inverse mapping uses. Nothing here is
//! tied to a drawing API.

use image::{Rgba, RgbaImage};

use crate::domain::BlendMode;

/// Mask function over normalized draw-rect coordinates (0..1 on both axes),
/// returning coverage in 0..1
pub type MaskFn = dyn Fn(f64, f64) -> f64 + Sync;

/// Blend `overlay` onto `base` with the given mode, layer opacity, and mask
/// coverage. Opacity and coverage attenuate the overlay's alpha before the
/// mode math runs.
pub fn blend_pixel(
    base: Rgba<u8>,
    overlay: Rgba<u8>,
    mode: BlendMode,
    opacity: u8,
    coverage: f64,
) -> Rgba<u8> {
    let alpha_scale = (opacity as f64 / 255.0) * coverage.clamp(0.0, 1.0);
    let alpha = (overlay.0[3] as f64 / 255.0) * alpha_scale;
    if alpha <= 0.0 {
        return base;
    }

    match mode {
        BlendMode::Normal => blend_normal(base, overlay, alpha),
        BlendMode::Multiply => blend_multiply(base, overlay, alpha),
        BlendMode::Screen => blend_screen(base, overlay, alpha),
        BlendMode::Overlay => blend_overlay(base, overlay, alpha),
    }
}

/// Normal alpha blending
fn blend_normal(base: Rgba<u8>, overlay: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let inv_alpha = 1.0 - alpha;
    Rgba([
        (overlay.0[0] as f64 * alpha + base.0[0] as f64 * inv_alpha) as u8,
        (overlay.0[1] as f64 * alpha + base.0[1] as f64 * inv_alpha) as u8,
        (overlay.0[2] as f64 * alpha + base.0[2] as f64 * inv_alpha) as u8,
        255,
    ])
}

/// Multiply blend mode
fn blend_multiply(base: Rgba<u8>, overlay: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let mut result = [0u8; 4];
    for i in 0..3 {
        let multiplied = (base.0[i] as u32 * overlay.0[i] as u32) / 255;
        result[i] = (multiplied as f64 * alpha + base.0[i] as f64 * (1.0 - alpha)) as u8;
    }
    result[3] = 255;
    Rgba(result)
}

/// Screen blend mode
fn blend_screen(base: Rgba<u8>, overlay: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let mut result = [0u8; 4];
    for i in 0..3 {
        let screened = 255 - ((255 - base.0[i] as u32) * (255 - overlay.0[i] as u32)) / 255;
        result[i] = (screened as f64 * alpha + base.0[i] as f64 * (1.0 - alpha)) as u8;
    }
    result[3] = 255;
    Rgba(result)
}

/// Overlay blend mode
fn blend_overlay(base: Rgba<u8>, overlay: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let mut result = [0u8; 4];
    for i in 0..3 {
        let b = base.0[i] as f64 / 255.0;
        let o = overlay.0[i] as f64 / 255.0;

        let overlayed = if b < 0.5 {
            2.0 * b * o
        } else {
            1.0 - 2.0 * (1.0 - b) * (1.0 - o)
        };

        let blended = overlayed * alpha + b * (1.0 - alpha);
        result[i] = (blended * 255.0).clamp(0.0, 255.0) as u8;
    }
    result[3] = 255;
    Rgba(result)
}

/// Bilinear interpolation for smooth pixel sampling
pub fn bilinear_sample(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (width, height) = image.dimensions();

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let dx = x - x0 as f64;
    let dy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut result = [0u8; 4];
    for i in 0..4 {
        let v00 = p00.0[i] as f64;
        let v10 = p10.0[i] as f64;
        let v01 = p01.0[i] as f64;
        let v11 = p11.0[i] as f64;

        let value = v00 * (1.0 - dx) * (1.0 - dy)
            + v10 * dx * (1.0 - dy)
            + v01 * (1.0 - dx) * dy
            + v11 * dx * dy;

        result[i] = value.clamp(0.0, 255.0) as u8;
    }

    Rgba(result)
}

/// Edge-feather mask: full coverage in the interior, fading linearly to zero
/// over `feather` (as a fraction of the rect's half-extent) at each edge
pub fn feather_mask(feather: f64) -> impl Fn(f64, f64) -> f64 + Sync {
    move |u: f64, v: f64| {
        if feather <= 0.0 {
            return 1.0;
        }
        let edge_u = (u.min(1.0 - u) * 2.0 / feather).clamp(0.0, 1.0);
        let edge_v = (v.min(1.0 - v) * 2.0 / feather).clamp(0.0, 1.0);
        edge_u * edge_v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPAQUE: Rgba<u8> = Rgba([200, 100, 50, 255]);
    const BASE: Rgba<u8> = Rgba([40, 80, 120, 255]);

    #[test]
    fn test_normal_full_alpha_replaces_base() {
        let out = blend_pixel(BASE, OPAQUE, BlendMode::Normal, 255, 1.0);
        assert_eq!(out.0[..3], [200, 100, 50]);
        assert_eq!(out.0[3], 255);
    }

    #[test]
    fn test_zero_coverage_leaves_base() {
        let out = blend_pixel(BASE, OPAQUE, BlendMode::Normal, 255, 0.0);
        assert_eq!(out, BASE);
        let out = blend_pixel(BASE, OPAQUE, BlendMode::Multiply, 0, 1.0);
        assert_eq!(out, BASE);
    }

    #[test]
    fn test_multiply_darkens_screen_lightens() {
        let gray = Rgba([128, 128, 128, 255]);
        let multiplied = blend_pixel(gray, gray, BlendMode::Multiply, 255, 1.0);
        assert!(multiplied.0[0] < 128);
        let screened = blend_pixel(gray, gray, BlendMode::Screen, 255, 1.0);
        assert!(screened.0[0] > 128);
    }

    #[test]
    fn test_opacity_halves_contribution() {
        let out = blend_pixel(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]), BlendMode::Normal, 128, 1.0);
        assert!((out.0[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_bilinear_sample_center() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 0, Rgba([200, 200, 200, 255]));
        img.put_pixel(0, 1, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 1, Rgba([200, 200, 200, 255]));

        let result = bilinear_sample(&img, 0.5, 0.5);
        // Should be average of all 4 pixels = 150
        assert!((result.0[0] as i32 - 150).abs() < 5);
    }

    #[test]
    fn test_feather_mask_interior_and_edges() {
        let mask = feather_mask(0.2);
        assert_eq!(mask(0.5, 0.5), 1.0);
        assert_eq!(mask(0.0, 0.5), 0.0);
        let partial = mask(0.05, 0.5);
        assert!(partial > 0.0 && partial < 1.0);
        // Zero feather means full coverage everywhere.
        let none = feather_mask(0.0);
        assert_eq!(none(0.0, 0.0), 1.0);
    }
}
