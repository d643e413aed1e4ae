use crate::compose::DEFAULT_OVERLAY_SCALE;
use crate::error::Result;
use crate::types::Rational;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name used when no destination is configured.
pub const DEFAULT_OUTPUT_NAME: &str = "composite.mp4";

/// User-tunable export settings. Every field has a default, so partial JSON
/// files load cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    pub scale_factor: f64,
    pub frame_rate: Rational,
    pub output_path: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_OVERLAY_SCALE,
            frame_rate: Rational::FPS_30,
            output_path: None,
        }
    }
}

impl ExportSettings {
    /// Configured destination, or the fixed scratch location.
    pub fn resolved_output_path(&self) -> PathBuf {
        self.output_path.clone().unwrap_or_else(default_output_path)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let settings: ExportSettings = serde_json::from_str(&data)?;
        Ok(settings)
    }
}

/// `<temp>/pipcut/composite.mp4`, overwritten on every run.
pub fn default_output_path() -> PathBuf {
    std::env::temp_dir().join("pipcut").join(DEFAULT_OUTPUT_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let settings = ExportSettings::default();
        assert_eq!(settings.scale_factor, 0.25);
        assert_eq!(settings.frame_rate, Rational::FPS_30);
        assert_eq!(settings.resolved_output_path(), default_output_path());
        assert!(default_output_path().ends_with("pipcut/composite.mp4"));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let settings = ExportSettings {
            scale_factor: 0.5,
            frame_rate: Rational::new(24, 1),
            output_path: Some(dir.path().join("out.mp4")),
        };
        settings.save_to_file(&path).unwrap();

        let loaded = ExportSettings::load_from_file(&path).unwrap();
        assert_eq!(settings, loaded);
        assert_eq!(loaded.resolved_output_path(), dir.path().join("out.mp4"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "scale_factor": 0.4 }"#).unwrap();

        let loaded = ExportSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.scale_factor, 0.4);
        assert_eq!(loaded.frame_rate, Rational::FPS_30);
        assert!(loaded.output_path.is_none());
    }

    #[test]
    fn load_nonexistent_file_returns_error() {
        assert!(ExportSettings::load_from_file("/tmp/does_not_exist_pipcut.json").is_err());
    }
}
