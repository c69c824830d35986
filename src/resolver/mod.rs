//! UV region resolver
//!
//! Scans the loaded model graph for the "target" customizable material via a
//! ranked keyword matcher, unions the UV bounding boxes of all primitive
//! groups sharing a matched material, and falls back to the first
//! mesh+material pair exposing UV data when nothing matches. Pure function of
//! the model graph; no side effects beyond diagnostics.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RuleSettings;
use crate::domain::{MaterialRegion, ModelGraph, UvBounds};

/// Region resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Model '{0}' exposes no UV data on any mesh/material pair")]
    NoUvData(String),
}

/// One keyword rule: case-insensitive substring, higher priority wins
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub keyword: String,
    pub priority: i32,
}

impl From<&RuleSettings> for MatchRule {
    fn from(rule: &RuleSettings) -> Self {
        MatchRule {
            keyword: rule.keyword.clone(),
            priority: rule.priority,
        }
    }
}

/// Default rule set, derived from the customizable-material naming
/// conventions of the models this crate targets.
static DEFAULT_RULES: Lazy<Vec<MatchRule>> = Lazy::new(|| {
    vec![
        MatchRule { keyword: "outside".to_string(), priority: 30 },
        MatchRule { keyword: "custom".to_string(), priority: 20 },
        MatchRule { keyword: "wrap".to_string(), priority: 10 },
    ]
});

/// Ranked keyword matcher over mesh and material names
///
/// Testable independent of any rendering library: it sees only strings.
#[derive(Debug, Clone)]
pub struct RegionMatcher {
    rules: Vec<MatchRule>,
}

impl RegionMatcher {
    pub fn new(rules: Vec<MatchRule>) -> RegionMatcher {
        RegionMatcher { rules }
    }

    pub fn from_settings(rules: &[RuleSettings]) -> RegionMatcher {
        RegionMatcher::new(rules.iter().map(MatchRule::from).collect())
    }

    /// Best matching priority for a mesh/material name pair, if any rule's
    /// keyword appears (case-insensitively) in either name
    pub fn score(&self, mesh_name: &str, material_name: &str) -> Option<i32> {
        let mesh = mesh_name.to_lowercase();
        let material = material_name.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| {
                let kw = rule.keyword.to_lowercase();
                mesh.contains(&kw) || material.contains(&kw)
            })
            .map(|rule| rule.priority)
            .max()
    }
}

impl Default for RegionMatcher {
    fn default() -> Self {
        RegionMatcher::new(DEFAULT_RULES.clone())
    }
}

/// One matched material before degeneracy filtering
struct Candidate {
    material_id: String,
    mesh_name: String,
    score: i32,
    model_order: usize,
    bounds: Option<UvBounds>,
}

/// Resolve the customizable regions of a model.
///
/// Primitive groups sharing a matched material are unioned into one bounding
/// box across all meshes. Candidates with a degenerate union are skipped with
/// a diagnostic and the next candidate is tried. When no rule matches at all,
/// the first mesh+material pair exposing UV data becomes a flagged fallback
/// region. Returns regions ordered best-first.
pub fn resolve_regions(
    model: &ModelGraph,
    matcher: &RegionMatcher,
    canvas_size: u32,
) -> Result<Vec<MaterialRegion>, ResolveError> {
    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    let mut order = 0usize;

    for mesh in &model.meshes {
        for prim in &mesh.primitives {
            let material_name = model
                .material(&prim.material_id)
                .map(|m| m.name.as_str())
                .unwrap_or(&prim.material_id);

            let Some(score) = matcher.score(&mesh.name, material_name) else {
                continue;
            };

            let prim_bounds = UvBounds::from_points(prim.uvs.iter());
            let entry = candidates
                .entry(prim.material_id.clone())
                .or_insert_with(|| {
                    order += 1;
                    Candidate {
                        material_id: prim.material_id.clone(),
                        mesh_name: mesh.name.clone(),
                        score,
                        model_order: order,
                        bounds: None,
                    }
                });
            entry.score = entry.score.max(score);
            entry.bounds = match (entry.bounds, prim_bounds) {
                (Some(a), Some(b)) => Some(a.union(&b)),
                (a, b) => a.or(b),
            };
        }
    }

    // Highest priority first; ties broken by model order for determinism.
    let mut ranked: Vec<Candidate> = candidates.into_values().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.model_order.cmp(&b.model_order)));

    let mut regions = Vec::new();
    for candidate in ranked {
        match candidate.bounds {
            Some(bounds) if !bounds.is_degenerate() => {
                debug!(
                    material_id = %candidate.material_id,
                    mesh = %candidate.mesh_name,
                    score = candidate.score,
                    "Resolved customizable region"
                );
                regions.push(build_region(model, candidate.material_id, candidate.mesh_name, bounds, false, canvas_size));
            }
            _ => {
                warn!(
                    material_id = %candidate.material_id,
                    mesh = %candidate.mesh_name,
                    "Matched material has a degenerate UV bounding box, skipping"
                );
            }
        }
    }

    if !regions.is_empty() {
        return Ok(regions);
    }

    // No usable match: fall back to the first mesh+material pair with UVs.
    for mesh in &model.meshes {
        for prim in &mesh.primitives {
            if !prim.has_uvs() {
                continue;
            }
            if let Some(bounds) = UvBounds::from_points(prim.uvs.iter()) {
                if bounds.is_degenerate() {
                    continue;
                }
                warn!(
                    model = %model.name,
                    material_id = %prim.material_id,
                    mesh = %mesh.name,
                    "No keyword rule matched; using first UV-bearing material as fallback region"
                );
                return Ok(vec![build_region(
                    model,
                    prim.material_id.clone(),
                    mesh.name.clone(),
                    bounds,
                    true,
                    canvas_size,
                )]);
            }
        }
    }

    Err(ResolveError::NoUvData(model.name.clone()))
}

fn build_region(
    model: &ModelGraph,
    material_id: String,
    mesh_name: String,
    bounds: UvBounds,
    fallback: bool,
    canvas_size: u32,
) -> MaterialRegion {
    // A material with only a flat color records the canvas size as its
    // source dimensions: no stretch happened, so distortion factor is 1.
    let (source_width, source_height) = model
        .material(&material_id)
        .and_then(|m| m.source_dimensions())
        .unwrap_or((canvas_size, canvas_size));

    MaterialRegion {
        material_id,
        mesh_name,
        bounds,
        source_width,
        source_height,
        fallback,
    }
}
