//! UV-Customizer offline pipeline driver
//!
//! Loads a model manifest, applies an optional layer plan, composites the
//! customizable region, and writes the three export artifacts (full
//! composite, region crop, print-accurate crop) to the output directory.
//! Serves as the reference host for the collaborator boundaries.
//!
//! Usage: uv-customizer <model-manifest.json> [layer-plan.json]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::info;

use uv_customizer::config::Settings;
use uv_customizer::domain::{BlendMode, FitMode, LayerTransform};
use uv_customizer::engine::{outline_region, CompositeFrame};
use uv_customizer::providers::{ManifestProvider, ModelProvider};
use uv_customizer::session::{CompositeObserver, CustomizerSession};

/// One planned layer in the driver's JSON layer plan
#[derive(Debug, Deserialize)]
struct PlannedLayer {
    image: PathBuf,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fit: Option<FitMode>,
    #[serde(default)]
    blend: Option<BlendMode>,
    #[serde(default)]
    opacity: Option<u8>,
    #[serde(default)]
    transform: Option<LayerTransform>,
    #[serde(default)]
    surface: bool,
}

/// Logs every composite pass the session emits
struct LogObserver;

impl CompositeObserver for LogObserver {
    fn composite_ready(&self, frame: &CompositeFrame) {
        info!(
            material_id = %frame.material_id,
            layers_drawn = frame.layers_drawn,
            layers_skipped = frame.layers_skipped,
            "Composite ready"
        );
    }

    fn status(&self, message: &str) {
        info!(status = %message, "Session status");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uv_customizer=info".parse().unwrap()),
        )
        .json()
        .init();

    let mut args = std::env::args().skip(1);
    let Some(manifest_path) = args.next() else {
        bail!("usage: uv-customizer <model-manifest.json> [layer-plan.json]");
    };
    let plan_path = args.next();

    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        "Starting UV-Customizer v{} (canvas {})",
        env!("CARGO_PKG_VERSION"),
        settings.canvas.size
    );

    let provider = ManifestProvider::new(&manifest_path);
    let model = provider
        .load()
        .await
        .with_context(|| format!("Failed to load model manifest {manifest_path}"))?;

    let output_dir = settings.export.output_dir.clone();
    let mut session =
        CustomizerSession::new(model, settings).context("Failed to create session")?;
    session.add_observer(Arc::new(LogObserver));

    if let Some(plan_path) = plan_path {
        apply_layer_plan(&mut session, &plan_path)
            .await
            .with_context(|| format!("Failed to apply layer plan {plan_path}"))?;
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;

    for artifact in session.export_all().context("Export failed")? {
        let path = output_dir.join(&artifact.filename);
        std::fs::write(&path, &artifact.bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(
            path = %path.display(),
            width = artifact.width,
            height = artifact.height,
            "Wrote export artifact"
        );
    }

    // Region outline diagnostic over the final composite.
    if std::env::var("CUSTOMIZER_DEBUG_OUTLINE").is_ok() {
        if let Some(frame) = session.current_composite() {
            if let Some(rect) = frame.rect {
                let mut debug_image = frame.image.clone();
                outline_region(&mut debug_image, rect);
                let path = output_dir.join("debug_region_outline.png");
                debug_image
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), "Wrote region outline diagnostic");
            }
        }
    }

    Ok(())
}

/// Read a JSON layer plan and install each layer in the session, waiting for
/// all decodes before the final composite
async fn apply_layer_plan(
    session: &mut CustomizerSession,
    plan_path: &str,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(plan_path)?;
    let plan: Vec<PlannedLayer> = serde_json::from_str(&content)?;
    let plan_dir = PathBuf::from(plan_path)
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();

    for planned in plan {
        let image_path = plan_dir.join(&planned.image);
        let name = planned.name.clone().unwrap_or_else(|| {
            planned
                .image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "layer".to_string())
        });

        if planned.surface {
            let image = Arc::new(image::open(&image_path)?.to_rgba8());
            session.seed_surface_layer(image)?;
            continue;
        }

        let id = session.add_layer_from_path(&name, image_path)?;
        session.select_layer(Some(id))?;
        if let Some(fit) = planned.fit {
            session.set_fit_mode(fit)?;
        }
        if let Some(blend) = planned.blend {
            session.set_blend_mode(blend)?;
        }
        if let Some(opacity) = planned.opacity {
            session.set_opacity(opacity)?;
        }
        if let Some(transform) = planned.transform {
            session.set_transform(transform)?;
        }
    }

    let decoded = session.wait_for_decodes().await?;
    info!(layers = decoded, "Layer plan applied");
    Ok(())
}
