//! JSON manifest model provider
//!
//! Loads a model graph from a manifest file: mesh/primitive UV arrays plus
//! material entries pointing at base image files (resolved relative to the
//! manifest) or flat hex colors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::domain::model::{BaseColor, Material, Mesh, ModelGraph, Primitive};
use super::traits::{ModelProvider, ProviderError, ProviderResult};

/// On-disk manifest schema
#[derive(Debug, Deserialize)]
struct ManifestDoc {
    name: String,
    materials: Vec<MaterialDoc>,
    meshes: Vec<MeshDoc>,
}

#[derive(Debug, Deserialize)]
struct MaterialDoc {
    id: String,
    name: String,
    #[serde(default)]
    base_image: Option<PathBuf>,
    #[serde(default)]
    base_color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeshDoc {
    name: String,
    primitives: Vec<PrimitiveDoc>,
}

#[derive(Debug, Deserialize)]
struct PrimitiveDoc {
    material: String,
    #[serde(default)]
    uvs: Vec<[f64; 2]>,
}

/// Loads a `ModelGraph` from a JSON manifest on disk
pub struct ManifestProvider {
    path: PathBuf,
}

impl ManifestProvider {
    pub fn new(path: impl Into<PathBuf>) -> ManifestProvider {
        ManifestProvider { path: path.into() }
    }

    fn parse(path: &Path) -> ProviderResult<ModelGraph> {
        let content = std::fs::read_to_string(path)?;
        let doc: ManifestDoc = serde_json::from_str(&content)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut materials = Vec::with_capacity(doc.materials.len());
        for mat in doc.materials {
            let base_image = match &mat.base_image {
                Some(rel) => {
                    let image_path = base_dir.join(rel);
                    let image = image::open(&image_path)
                        .map_err(|source| ProviderError::ImageLoad {
                            path: image_path.display().to_string(),
                            source,
                        })?
                        .to_rgba8();
                    Some(Arc::new(image))
                }
                None => None,
            };
            let base_color = match &mat.base_color {
                Some(hex) => BaseColor::from_hex(hex).ok_or_else(|| {
                    ProviderError::Invalid(format!(
                        "material '{}' has malformed base_color '{}'",
                        mat.id, hex
                    ))
                })?,
                None => BaseColor::default(),
            };
            materials.push(Material {
                id: mat.id,
                name: mat.name,
                base_image,
                base_color,
            });
        }

        let meshes = doc
            .meshes
            .into_iter()
            .map(|mesh| Mesh {
                name: mesh.name,
                primitives: mesh
                    .primitives
                    .into_iter()
                    .map(|prim| Primitive {
                        material_id: prim.material,
                        uvs: prim.uvs,
                    })
                    .collect(),
            })
            .collect();

        Ok(ModelGraph {
            name: doc.name,
            meshes,
            materials,
        })
    }
}

#[async_trait]
impl ModelProvider for ManifestProvider {
    async fn load(&self) -> ProviderResult<ModelGraph> {
        let path = self.path.clone();
        // Manifest parsing and base-image decoding are file-bound work.
        let model = tokio::task::spawn_blocking(move || Self::parse(&path))
            .await
            .map_err(|e| ProviderError::TaskJoin(e.to_string()))??;

        info!(
            model = %model.name,
            meshes = model.meshes.len(),
            materials = model.materials.len(),
            "Loaded model manifest"
        );
        Ok(model)
    }
}
