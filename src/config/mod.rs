//! Configuration module for the customizer core

use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::path::PathBuf;

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub canvas: CanvasSettings,
    pub transform: TransformSettings,
    pub frame: FrameSettings,
    pub export: ExportSettings,
    pub resolver: ResolverSettings,
}

/// Canonical working-canvas configuration
///
/// A single `size` knob keeps the canonical buffer square by construction;
/// the distortion-compensation math in the compositor depends on that.
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasSettings {
    pub size: u32,
}

/// Layer transform limits and pointer feel
#[derive(Debug, Clone, Deserialize)]
pub struct TransformSettings {
    pub scale_min: f64,
    pub scale_max: f64,
    /// Multiplier mapping edit-frame drag distance to region-fraction offset.
    /// The screen frame and true texture-space motion are not 1:1.
    pub move_feel: f64,
}

impl TransformSettings {
    /// Clamp a scale factor into the configured range
    pub fn clamp_scale(&self, scale: f64) -> f64 {
        scale.clamp(self.scale_min, self.scale_max)
    }
}

/// Screen-space edit frame geometry
#[derive(Debug, Clone, Deserialize)]
pub struct FrameSettings {
    /// Side length of the square edit frame, in screen pixels
    pub size: f64,
    /// Hit radius around each handle, in screen pixels
    pub handle_radius: f64,
    /// Distance of the rotation handle above the frame's top edge
    pub rotation_handle_offset: f64,
}

/// Export pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExportSettings {
    /// Hard ceiling on either output dimension; exports are uniformly
    /// downscaled (never upscaled) to satisfy it
    pub max_dimension: u32,
    pub output_dir: PathBuf,
}

/// Region matcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSettings {
    pub rules: Vec<RuleSettings>,
}

/// One keyword rule for the ranked region matcher
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSettings {
    pub keyword: String,
    pub priority: i32,
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with CUSTOMIZER_)
    /// 2. config/local.toml (gitignored)
    /// 3. config/default.toml
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local overrides (gitignored)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment variables (CUSTOMIZER_CANVAS__SIZE, etc.)
            .add_source(
                Environment::with_prefix("CUSTOMIZER")
                    .separator("__")
                    .try_parsing(true)
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            canvas: CanvasSettings { size: 2048 },
            transform: TransformSettings {
                scale_min: 0.1,
                scale_max: 4.0,
                move_feel: 2.0,
            },
            frame: FrameSettings {
                size: 200.0,
                handle_radius: 14.0,
                rotation_handle_offset: 36.0,
            },
            export: ExportSettings {
                max_dimension: 8192,
                output_dir: PathBuf::from("output"),
            },
            resolver: ResolverSettings {
                rules: vec![
                    RuleSettings { keyword: "outside".to_string(), priority: 30 },
                    RuleSettings { keyword: "custom".to_string(), priority: 20 },
                    RuleSettings { keyword: "wrap".to_string(), priority: 10 },
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_sane() {
        let settings = Settings::default();
        assert_eq!(settings.canvas.size, 2048);
        assert!(settings.transform.scale_min < settings.transform.scale_max);
        assert!(!settings.resolver.rules.is_empty());
    }

    #[test]
    fn test_clamp_scale() {
        let transform = Settings::default().transform;
        assert_eq!(transform.clamp_scale(100.0), transform.scale_max);
        assert_eq!(transform.clamp_scale(0.0), transform.scale_min);
        assert_eq!(transform.clamp_scale(1.0), 1.0);
    }
}
