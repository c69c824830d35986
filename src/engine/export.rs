//! Export/print pipeline
//!
//! Crops a full-resolution composite to the region rect and rescales it to
//! the true physical aspect ratio, measured against the *original* source
//! texture rather than the square canonical buffer. The final rasterize is
//! the only step permitted to change pixel dimensions; it is correct because
//! both the crop and the target size already encode the true aspect.

use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use image::{imageops, DynamicImage, RgbaImage};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::MaterialRegion;
use super::compositor::CompositeFrame;

/// Export errors; each aborts only the export it names
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No region available for export")]
    NoRegion,
    #[error("Output dimensions degenerate after downscale: {width}x{height}")]
    DegenerateOutput { width: u32, height: u32 },
    #[error("Failed to encode output: {0}")]
    Encode(#[from] image::ImageError),
}

/// Which artifact an export produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// The whole canonical buffer as composited
    FullComposite,
    /// The composite cropped to the region rect, canonical aspect
    RegionCrop,
    /// The region crop rescaled to the true physical aspect ratio
    PrintCrop,
}

impl ExportKind {
    pub fn slug(&self) -> &'static str {
        match self {
            ExportKind::FullComposite => "full",
            ExportKind::RegionCrop => "region",
            ExportKind::PrintCrop => "print",
        }
    }
}

/// One exported raster blob, handed off opaque to persistence collaborators
pub struct ExportArtifact {
    pub kind: ExportKind,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Bytes,
}

impl ExportArtifact {
    /// Data-URL form for direct handoff to a web shell
    pub fn data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Export pipeline over composite frames
#[derive(Debug, Clone)]
pub struct Exporter {
    max_dimension: u32,
}

impl Exporter {
    pub fn new(max_dimension: u32) -> Exporter {
        Exporter { max_dimension }
    }

    /// Export the full canonical composite unchanged
    pub fn export_full(&self, frame: &CompositeFrame) -> Result<ExportArtifact, ExportError> {
        self.finish(ExportKind::FullComposite, &frame.material_id, frame.image.clone())
    }

    /// Export the composite cropped to the region rect, still at canonical
    /// (distorted) aspect
    pub fn export_region_crop(
        &self,
        frame: &CompositeFrame,
    ) -> Result<ExportArtifact, ExportError> {
        let crop = crop_to_rect(frame).ok_or(ExportError::NoRegion)?;
        self.finish(ExportKind::RegionCrop, &frame.material_id, crop)
    }

    /// Export the print-accurate crop: region crop rescaled to the true
    /// output size computed against the original source texture
    pub fn export_print(
        &self,
        frame: &CompositeFrame,
        region: &MaterialRegion,
    ) -> Result<ExportArtifact, ExportError> {
        let crop = crop_to_rect(frame).ok_or(ExportError::NoRegion)?;

        let (mut out_w, mut out_h) = region.print_dimensions();
        if out_w == 0 || out_h == 0 {
            return Err(ExportError::DegenerateOutput { width: out_w, height: out_h });
        }

        // Hard platform ceiling: uniform downscale only, never upscale.
        if out_w > self.max_dimension || out_h > self.max_dimension {
            let scale = (self.max_dimension as f64 / out_w as f64)
                .min(self.max_dimension as f64 / out_h as f64);
            let scaled_w = (out_w as f64 * scale).round() as u32;
            let scaled_h = (out_h as f64 * scale).round() as u32;
            debug!(
                from_width = out_w,
                from_height = out_h,
                to_width = scaled_w,
                to_height = scaled_h,
                "Print output exceeds platform ceiling, downscaling uniformly"
            );
            out_w = scaled_w;
            out_h = scaled_h;
        }
        if out_w == 0 || out_h == 0 {
            return Err(ExportError::DegenerateOutput { width: out_w, height: out_h });
        }

        // The single dimension-changing step of the pipeline.
        let output = imageops::resize(&crop, out_w, out_h, imageops::FilterType::Lanczos3);
        self.finish(ExportKind::PrintCrop, &frame.material_id, output)
    }

    fn finish(
        &self,
        kind: ExportKind,
        material_id: &str,
        image: RgbaImage,
    ) -> Result<ExportArtifact, ExportError> {
        let (width, height) = image.dimensions();
        let bytes = encode_png(&image)?;
        let filename = format!(
            "{}_{}_{}.png",
            kind.slug(),
            material_id,
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );

        info!(
            kind = kind.slug(),
            material_id = %material_id,
            width = width,
            height = height,
            bytes = bytes.len(),
            "Export complete"
        );

        Ok(ExportArtifact {
            kind,
            filename,
            width,
            height,
            bytes: Bytes::from(bytes),
        })
    }
}

/// Crop a frame's buffer to its region rect, clamped to the canvas
fn crop_to_rect(frame: &CompositeFrame) -> Option<RgbaImage> {
    let rect = frame.rect?;
    let canvas_w = frame.image.width();
    let canvas_h = frame.image.height();

    let x = rect.x.round().max(0.0) as u32;
    let y = rect.y.round().max(0.0) as u32;
    let w = (rect.w.round() as u32).min(canvas_w.saturating_sub(x));
    let h = (rect.h.round() as u32).min(canvas_h.saturating_sub(y));
    if w == 0 || h == 0 {
        return None;
    }

    Some(imageops::crop_imm(&frame.image, x, y, w, h).to_image())
}

/// Encode image to PNG bytes (preserves RGBA transparency)
fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let dynamic = DynamicImage::ImageRgba8(image.clone());
    let mut buffer = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder.encode(
        dynamic.as_bytes(),
        dynamic.width(),
        dynamic.height(),
        dynamic.color().into(),
    )?;
    Ok(buffer)
}
