//! Session-scoped customizer context
//!
//! One `CustomizerSession` owns everything a loaded model needs: the model
//! graph, its resolved regions, the atlas cache, per-material layer stacks,
//! the decode queue, and the observer list. It is created on model load,
//! dropped on unload, and passed explicitly to collaborators instead of
//! living in global state.
//!
//! Ordering guarantee: transform mutations are never batched; every mutator
//! recomposites synchronously before returning, so observers never see torn
//! state between the edit frame and the baked texture.

pub mod decode;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::{
    BlendMode, FitMode, Layer, LayerImage, LayerStack, LayerStackError, LayerTransform,
    MaterialRegion, ModelGraph,
};
use crate::engine::blend::feather_mask;
use crate::engine::{AtlasCache, CompositeFrame, Compositor, ExportArtifact, ExportError, ExportKind, Exporter};
use crate::resolver::{resolve_regions, RegionMatcher, ResolveError};
use decode::{DecodeError, DecodeQueue};

/// Session-level errors; none are fatal to the running session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No region available")]
    NoActiveRegion,
    #[error("No active layer selected")]
    NoActiveLayer,
    #[error(transparent)]
    Layer(#[from] LayerStackError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Subscriber to composite results
///
/// The compositor emits frames; presentation decisions (binding the buffer
/// as a material color map, showing status text) belong to the subscriber.
pub trait CompositeObserver: Send + Sync {
    fn composite_ready(&self, frame: &CompositeFrame);

    /// User-visible status text, e.g. an aborted export
    fn status(&self, _message: &str) {}
}

/// The session context: model, regions, atlas cache, layer stacks, observers
pub struct CustomizerSession {
    settings: Settings,
    model: ModelGraph,
    matcher: RegionMatcher,
    regions: Vec<MaterialRegion>,
    active_region: usize,
    atlas: AtlasCache,
    stacks: HashMap<String, LayerStack>,
    active_layer: Option<Uuid>,
    compositor: Compositor,
    exporter: Exporter,
    observers: Vec<Arc<dyn CompositeObserver>>,
    decode: DecodeQueue,
    edge_feather: Option<f64>,
    current: Option<Arc<CompositeFrame>>,
}

impl CustomizerSession {
    /// Create a session for a loaded model: resolve regions, seed the atlas
    /// cache for each matched material, and run the first composite pass.
    pub fn new(model: ModelGraph, settings: Settings) -> Result<CustomizerSession, SessionError> {
        let matcher = RegionMatcher::from_settings(&settings.resolver.rules);
        let canvas_size = settings.canvas.size;
        let regions = resolve_regions(&model, &matcher, canvas_size)?;
        let atlas = AtlasCache::new(canvas_size);

        // Seed each matched material's canonical buffer once; redraw cost
        // stays independent of edit count afterwards.
        let mut stacks = HashMap::new();
        for region in &regions {
            if let Some(material) = model.material(&region.material_id) {
                atlas.entry_for(material);
            }
            stacks.insert(region.material_id.clone(), LayerStack::new());
        }

        info!(
            model = %model.name,
            regions = regions.len(),
            canvas = canvas_size,
            "Customizer session created"
        );

        let exporter = Exporter::new(settings.export.max_dimension);
        let mut session = CustomizerSession {
            settings,
            model,
            matcher,
            regions,
            active_region: 0,
            atlas,
            stacks,
            active_layer: None,
            compositor: Compositor::new(),
            exporter,
            observers: Vec::new(),
            decode: DecodeQueue::new(),
            edge_feather: None,
            current: None,
        };
        session.recomposite()?;
        Ok(session)
    }

    pub fn add_observer(&mut self, observer: Arc<dyn CompositeObserver>) {
        self.observers.push(observer);
    }

    /// The region edits currently target
    pub fn active_region(&self) -> Option<&MaterialRegion> {
        self.regions.get(self.active_region)
    }

    pub fn regions(&self) -> &[MaterialRegion] {
        &self.regions
    }

    /// Switch editing to another resolved region's material
    pub fn select_region(&mut self, material_id: &str) -> Result<(), SessionError> {
        let index = self
            .regions
            .iter()
            .position(|r| r.material_id == material_id)
            .ok_or(SessionError::NoActiveRegion)?;
        self.active_region = index;
        self.active_layer = None;
        self.recomposite()?;
        Ok(())
    }

    /// The active region's layer stack, read-only
    pub fn stack(&self) -> Option<&LayerStack> {
        let region = self.active_region()?;
        self.stacks.get(&region.material_id)
    }

    fn stack_mut(&mut self) -> Result<&mut LayerStack, SessionError> {
        let material_id = self
            .active_region()
            .map(|r| r.material_id.clone())
            .ok_or(SessionError::NoActiveRegion)?;
        self.stacks
            .get_mut(&material_id)
            .ok_or(SessionError::NoActiveRegion)
    }

    /// Install the pre-authored surface layer at index 0 of the active stack
    pub fn seed_surface_layer(&mut self, image: Arc<RgbaImage>) -> Result<Uuid, SessionError> {
        let id = self.stack_mut()?.set_surface(Layer::surface(image));
        self.recomposite()?;
        Ok(id)
    }

    /// Add a user layer from an already-decoded image and make it active
    pub fn add_layer_image(
        &mut self,
        name: impl Into<String>,
        image: Arc<RgbaImage>,
    ) -> Result<Uuid, SessionError> {
        let id = self.stack_mut()?.push(Layer::from_image(name, image));
        self.active_layer = Some(id);
        self.recomposite()?;
        Ok(id)
    }

    /// Add a user layer decoding from a file; absent from composite passes
    /// until the decode completes
    pub fn add_layer_from_path(
        &mut self,
        name: impl Into<String>,
        path: PathBuf,
    ) -> Result<Uuid, SessionError> {
        let id = self.stack_mut()?.push(Layer::pending(name));
        self.active_layer = Some(id);
        self.decode.spawn_path(id, path);
        self.recomposite()?;
        Ok(id)
    }

    /// Add a user layer decoding from encoded bytes
    pub fn add_layer_from_bytes(
        &mut self,
        name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Uuid, SessionError> {
        let id = self.stack_mut()?.push(Layer::pending(name));
        self.active_layer = Some(id);
        self.decode.spawn_bytes(id, bytes);
        self.recomposite()?;
        Ok(id)
    }

    /// Collect finished decodes without blocking; recomposites once if any
    /// layer changed state. Returns the number of layers updated.
    pub fn poll_decodes(&mut self) -> Result<usize, SessionError> {
        let results = self.decode.drain_ready();
        let updated = self.apply_decode_results(results)?;
        Ok(updated)
    }

    /// Await every outstanding decode, then recomposite once
    pub async fn wait_for_decodes(&mut self) -> Result<usize, SessionError> {
        let results = self.decode.join_all().await;
        let updated = self.apply_decode_results(results)?;
        Ok(updated)
    }

    fn apply_decode_results(
        &mut self,
        results: Vec<(Uuid, Result<RgbaImage, DecodeError>)>,
    ) -> Result<usize, SessionError> {
        if results.is_empty() {
            return Ok(0);
        }
        let mut updated = 0;
        for (layer_id, result) in results {
            if self.apply_decoded(layer_id, result) {
                updated += 1;
            }
        }
        if updated > 0 {
            self.recomposite()?;
        }
        Ok(updated)
    }

    /// Flip one layer from `Pending` to `Ready` or `Failed`. The caller
    /// recomposites; returns whether a layer was found and updated.
    fn apply_decoded(&mut self, layer_id: Uuid, result: Result<RgbaImage, DecodeError>) -> bool {
        for stack in self.stacks.values_mut() {
            if let Some(layer) = stack.get_mut(layer_id) {
                layer.image = match result {
                    Ok(image) => LayerImage::Ready(Arc::new(image)),
                    Err(e) => {
                        warn!(layer_id = %layer_id, error = %e, "Layer decode failed");
                        LayerImage::Failed(e.to_string())
                    }
                };
                return true;
            }
        }
        warn!(layer_id = %layer_id, "Decode finished for a layer that no longer exists");
        false
    }

    /// Remove a layer; clears the selection if it was active
    pub fn delete_layer(&mut self, id: Uuid) -> Result<(), SessionError> {
        self.stack_mut()?.delete(id)?;
        if self.active_layer == Some(id) {
            self.active_layer = None;
        }
        self.recomposite()?;
        Ok(())
    }

    pub fn duplicate_layer(&mut self, id: Uuid) -> Result<Uuid, SessionError> {
        let new_id = self.stack_mut()?.duplicate(id)?;
        self.active_layer = Some(new_id);
        self.recomposite()?;
        Ok(new_id)
    }

    pub fn move_layer(&mut self, id: Uuid, new_index: usize) -> Result<(), SessionError> {
        self.stack_mut()?.move_layer(id, new_index)?;
        self.recomposite()?;
        Ok(())
    }

    /// Select a layer for transform editing; the surface layer is refused
    pub fn select_layer(&mut self, id: Option<Uuid>) -> Result<(), SessionError> {
        match id {
            None => {
                self.active_layer = None;
                Ok(())
            }
            Some(id) => {
                let stack = self.stack().ok_or(SessionError::NoActiveRegion)?;
                let layer = stack.get(id).ok_or(LayerStackError::NotFound(id))?;
                if !layer.editable {
                    return Err(LayerStackError::SurfaceLocked("selected").into());
                }
                self.active_layer = Some(id);
                Ok(())
            }
        }
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        let id = self.active_layer?;
        self.stack()?.get(id)
    }

    /// The active layer's transform, for edit-frame rendering
    pub fn active_transform(&self) -> Option<LayerTransform> {
        self.active_layer().map(|l| l.transform)
    }

    fn active_layer_mut(&mut self) -> Result<&mut Layer, SessionError> {
        let id = self.active_layer.ok_or(SessionError::NoActiveLayer)?;
        self.stack_mut()?
            .get_mut(id)
            .ok_or(SessionError::NoActiveLayer)
    }

    /// Replace the active layer's transform wholesale (slider input); scales
    /// are clamped to the configured range
    pub fn set_transform(&mut self, transform: LayerTransform) -> Result<(), SessionError> {
        let clamp = self.settings.transform.clone();
        let layer = self.active_layer_mut()?;
        layer.transform = LayerTransform {
            scale_x: clamp.clamp_scale(transform.scale_x),
            scale_y: clamp.clamp_scale(transform.scale_y),
            ..transform
        };
        self.recomposite()?;
        Ok(())
    }

    pub fn set_offset(&mut self, offset_x: f64, offset_y: f64) -> Result<(), SessionError> {
        let layer = self.active_layer_mut()?;
        layer.transform.offset_x = offset_x;
        layer.transform.offset_y = offset_y;
        self.recomposite()?;
        Ok(())
    }

    pub fn set_scale(&mut self, scale_x: f64, scale_y: f64) -> Result<(), SessionError> {
        let clamp = self.settings.transform.clone();
        let layer = self.active_layer_mut()?;
        layer.transform.scale_x = clamp.clamp_scale(scale_x);
        layer.transform.scale_y = clamp.clamp_scale(scale_y);
        self.recomposite()?;
        Ok(())
    }

    pub fn set_rotation(&mut self, rotation: f64) -> Result<(), SessionError> {
        self.active_layer_mut()?.transform.rotation = rotation;
        self.recomposite()?;
        Ok(())
    }

    pub fn set_fit_mode(&mut self, fit_mode: FitMode) -> Result<(), SessionError> {
        self.active_layer_mut()?.fit_mode = fit_mode;
        self.recomposite()?;
        Ok(())
    }

    pub fn set_blend_mode(&mut self, blend_mode: BlendMode) -> Result<(), SessionError> {
        self.active_layer_mut()?.blend_mode = blend_mode;
        self.recomposite()?;
        Ok(())
    }

    pub fn set_opacity(&mut self, opacity: u8) -> Result<(), SessionError> {
        self.active_layer_mut()?.opacity = opacity;
        self.recomposite()?;
        Ok(())
    }

    /// Feather layer edges over this fraction of the region (None disables)
    pub fn set_edge_feather(&mut self, feather: Option<f64>) -> Result<(), SessionError> {
        self.edge_feather = feather;
        self.recomposite()?;
        Ok(())
    }

    /// Drop the active material's canonical buffer so the next pass rebuilds
    /// it from the model
    pub fn reset_material(&mut self) -> Result<(), SessionError> {
        let material_id = self
            .active_region()
            .map(|r| r.material_id.clone())
            .ok_or(SessionError::NoActiveRegion)?;
        self.atlas.reset(&material_id);
        self.recomposite()?;
        Ok(())
    }

    /// Run a full composite pass for the active region and notify observers.
    ///
    /// The layer stack is treated as a read-only snapshot for the pass; the
    /// cached canonical buffer is copied, never mutated.
    pub fn recomposite(&mut self) -> Result<Arc<CompositeFrame>, SessionError> {
        let region = self
            .regions
            .get(self.active_region)
            .cloned()
            .ok_or(SessionError::NoActiveRegion)?;
        let material = self
            .model
            .material(&region.material_id)
            .ok_or(SessionError::NoActiveRegion)?;
        let atlas = self.atlas.entry_for(material);
        let stack = self
            .stacks
            .get(&region.material_id)
            .ok_or(SessionError::NoActiveRegion)?;

        let frame = match self.edge_feather {
            Some(feather) => {
                let mask = feather_mask(feather);
                self.compositor.composite(&atlas, &region, stack, Some(&mask))
            }
            None => self.compositor.composite(&atlas, &region, stack, None),
        };

        let frame = Arc::new(frame);
        for observer in &self.observers {
            observer.composite_ready(&frame);
        }
        self.current = Some(frame.clone());
        Ok(frame)
    }

    /// The most recent composite, for pull-based hosts
    pub fn current_composite(&self) -> Option<Arc<CompositeFrame>> {
        self.current.clone()
    }

    /// Export one artifact kind with the region fallback chain: active
    /// region, re-resolution from the retained model graph, first available
    /// region. Failure aborts only this export and leaves editor state
    /// untouched.
    pub fn export(&mut self, kind: ExportKind) -> Result<ExportArtifact, SessionError> {
        let region = match self.export_region() {
            Some(region) => region,
            None => {
                let message = "Export aborted: no region available";
                for observer in &self.observers {
                    observer.status(message);
                }
                warn!("{message}");
                return Err(ExportError::NoRegion.into());
            }
        };

        // Recomposite at full canonical resolution against the chained
        // region; the chain may have produced a region that is not the
        // active one.
        let Some(material) = self.model.material(&region.material_id) else {
            let message = "Export aborted: region material not in model";
            for observer in &self.observers {
                observer.status(message);
            }
            warn!("{message}");
            return Err(ExportError::NoRegion.into());
        };
        let atlas = self.atlas.entry_for(material);
        let empty = LayerStack::new();
        let stack = self.stacks.get(&region.material_id).unwrap_or(&empty);
        let frame = match self.edge_feather {
            Some(feather) => {
                let mask = feather_mask(feather);
                self.compositor.composite(&atlas, &region, stack, Some(&mask))
            }
            None => self.compositor.composite(&atlas, &region, stack, None),
        };

        let artifact = match kind {
            ExportKind::FullComposite => self.exporter.export_full(&frame),
            ExportKind::RegionCrop => self.exporter.export_region_crop(&frame),
            ExportKind::PrintCrop => self.exporter.export_print(&frame, &region),
        };

        match artifact {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                let message = format!("Export aborted: {e}");
                for observer in &self.observers {
                    observer.status(&message);
                }
                Err(e.into())
            }
        }
    }

    /// All three artifacts: full composite, region crop, print crop
    pub fn export_all(&mut self) -> Result<Vec<ExportArtifact>, SessionError> {
        Ok(vec![
            self.export(ExportKind::FullComposite)?,
            self.export(ExportKind::RegionCrop)?,
            self.export(ExportKind::PrintCrop)?,
        ])
    }

    fn export_region(&self) -> Option<MaterialRegion> {
        if let Some(region) = self.active_region() {
            return Some(region.clone());
        }
        // Recompute directly from the retained model graph.
        if let Ok(resolved) =
            resolve_regions(&self.model, &self.matcher, self.settings.canvas.size)
        {
            if let Some(region) = resolved.into_iter().next() {
                return Some(region);
            }
        }
        self.regions.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BaseColor, Material, Mesh, Primitive};
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_model() -> ModelGraph {
        ModelGraph {
            name: "cue".to_string(),
            meshes: vec![Mesh {
                name: "wrap".to_string(),
                primitives: vec![Primitive {
                    material_id: "m_outside".to_string(),
                    uvs: vec![[0.0, 0.0], [1.0, 1.0]],
                }],
            }],
            materials: vec![Material {
                id: "m_outside".to_string(),
                name: "outside".to_string(),
                base_image: Some(Arc::new(RgbaImage::from_pixel(
                    100,
                    400,
                    Rgba([30, 30, 30, 255]),
                ))),
                base_color: BaseColor::default(),
            }],
        }
    }

    fn small_settings() -> Settings {
        let mut settings = Settings::default();
        settings.canvas.size = 64;
        settings
    }

    fn red(w: u32, h: u32) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    struct CountingObserver {
        frames: AtomicUsize,
        statuses: AtomicUsize,
    }

    impl CompositeObserver for CountingObserver {
        fn composite_ready(&self, _frame: &CompositeFrame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        fn status(&self, _message: &str) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_session_resolves_region_and_composites() {
        let session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        let region = session.active_region().unwrap();
        assert_eq!(region.material_id, "m_outside");
        assert_eq!(region.source_width, 100);
        assert_eq!(region.source_height, 400);
        assert!(session.current_composite().is_some());
    }

    #[test]
    fn test_every_mutation_recomposites_synchronously() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        let observer = Arc::new(CountingObserver {
            frames: AtomicUsize::new(0),
            statuses: AtomicUsize::new(0),
        });
        session.add_observer(observer.clone());

        session.add_layer_image("art", red(8, 8)).unwrap();
        session.set_rotation(0.3).unwrap();
        session.set_scale(1.5, 1.5).unwrap();
        assert_eq!(observer.frames.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_scale_clamped_to_configured_range() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        session.add_layer_image("art", red(8, 8)).unwrap();
        session.set_scale(1000.0, 0.0001).unwrap();
        let t = session.active_transform().unwrap();
        assert_eq!(t.scale_x, session.settings.transform.scale_max);
        assert_eq!(t.scale_y, session.settings.transform.scale_min);
    }

    #[test]
    fn test_delete_only_layer_clears_selection() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        session.seed_surface_layer(red(16, 16)).unwrap();
        let id = session.add_layer_image("art", red(8, 8)).unwrap();
        assert!(session.active_layer().is_some());

        session.delete_layer(id).unwrap();
        assert!(session.active_layer().is_none());
        assert!(session.active_transform().is_none());
    }

    #[test]
    fn test_surface_layer_cannot_be_selected() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        let surface = session.seed_surface_layer(red(16, 16)).unwrap();
        assert!(matches!(
            session.select_layer(Some(surface)),
            Err(SessionError::Layer(LayerStackError::SurfaceLocked(_)))
        ));
    }

    #[test]
    fn test_fallback_region_flows_through_compositor() {
        // Model with no keyword match: resolver substitutes a fallback
        // region and the session must composite on it without crashing.
        let model = ModelGraph {
            name: "plain".to_string(),
            meshes: vec![Mesh {
                name: "body".to_string(),
                primitives: vec![Primitive {
                    material_id: "m0".to_string(),
                    uvs: vec![[0.0, 0.0], [1.0, 1.0]],
                }],
            }],
            materials: vec![Material {
                id: "m0".to_string(),
                name: "plastic".to_string(),
                base_image: None,
                base_color: BaseColor([80, 80, 80, 255]),
            }],
        };
        let mut session = CustomizerSession::new(model, small_settings()).unwrap();
        assert!(session.active_region().unwrap().fallback);

        session.add_layer_image("art", red(8, 8)).unwrap();
        let frame = session.current_composite().unwrap();
        assert_eq!(frame.layers_drawn, 1);
    }

    #[tokio::test]
    async fn test_pending_layer_joins_after_decode() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();

        let source = RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255]));
        let mut png = Vec::new();
        image::codecs::png::PngEncoder::new(&mut png)
            .encode(source.as_raw(), 4, 4, image::ColorType::Rgba8)
            .unwrap();

        session.add_layer_from_bytes("decoding", png).unwrap();
        // The pending layer is absent from the pass that ran on add.
        assert_eq!(session.current_composite().unwrap().layers_drawn, 0);
        assert_eq!(session.current_composite().unwrap().layers_skipped, 1);

        let updated = session.wait_for_decodes().await.unwrap();
        assert_eq!(updated, 1);
        assert_eq!(session.current_composite().unwrap().layers_drawn, 1);
    }

    #[tokio::test]
    async fn test_failed_decode_excludes_only_that_layer() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        session.add_layer_image("good", red(8, 8)).unwrap();
        session.add_layer_from_bytes("bad", vec![1, 2, 3]).unwrap();

        session.wait_for_decodes().await.unwrap();
        let frame = session.current_composite().unwrap();
        assert_eq!(frame.layers_drawn, 1);
        assert_eq!(frame.layers_skipped, 1);
    }

    #[test]
    fn test_export_all_produces_three_artifacts() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        session.add_layer_image("art", red(8, 8)).unwrap();
        let artifacts = session.export_all().unwrap();
        assert_eq!(artifacts.len(), 3);
        assert_eq!(artifacts[0].kind, ExportKind::FullComposite);
        assert_eq!(artifacts[1].kind, ExportKind::RegionCrop);
        assert_eq!(artifacts[2].kind, ExportKind::PrintCrop);
        // Print crop recovers the true 100x400 source aspect of the full-UV
        // region.
        assert_eq!(artifacts[2].width, 100);
        assert_eq!(artifacts[2].height, 400);
    }

    #[test]
    fn test_export_failure_surfaces_status_and_preserves_state() {
        let mut session = CustomizerSession::new(test_model(), small_settings()).unwrap();
        let observer = Arc::new(CountingObserver {
            frames: AtomicUsize::new(0),
            statuses: AtomicUsize::new(0),
        });
        session.add_observer(observer.clone());
        session.add_layer_image("art", red(8, 8)).unwrap();

        // Force the no-region path.
        session.regions.clear();
        session.model.meshes.clear();
        let result = session.export(ExportKind::PrintCrop);
        assert!(matches!(
            result,
            Err(SessionError::Export(ExportError::NoRegion))
        ));
        assert_eq!(observer.statuses.load(Ordering::SeqCst), 1);
        // Editor state untouched: the layer stack still holds the layer.
        assert_eq!(session.stacks.get("m_outside").unwrap().len(), 1);
    }
}
