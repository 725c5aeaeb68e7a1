//! Configuration storage for the guider.
//!
//! Provides centralized storage for the guide window origin, the null
//! position and the steering unit's setup-to-true calibration.
//! All config is stored in ~/.cf_config/ by default.

use crate::image_size::ImageSize;
use crate::setup_to_true::{SetupToTrue, SetupToTrueError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const GUIDER_CONFIG_FILE: &str = "guider.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} = {value} is outside {range}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: String,
    },

    #[error("invalid setup-to-true calibration: {0}")]
    Transform(#[from] SetupToTrueError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Persisted guider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiderConfig {
    /// Guide window origin column
    pub guide_raster_x0: usize,
    /// Guide window origin row
    pub guide_raster_y0: usize,
    /// Null position, full-frame pixels
    pub hole_null_x: f64,
    pub hole_null_y: f64,
    #[serde(default)]
    pub setup_to_true: SetupToTrue,
}

impl Default for GuiderConfig {
    fn default() -> Self {
        Self {
            guide_raster_x0: 304,
            guide_raster_y0: 240,
            hole_null_x: 320.0,
            hole_null_y: 256.0,
            setup_to_true: SetupToTrue::identity(),
        }
    }
}

impl GuiderConfig {
    /// Check the origin keeps a `guide`-sized window inside `frame` and the
    /// null position lies on the frame.
    pub fn validate(&self, frame: ImageSize, guide: ImageSize) -> ConfigResult<()> {
        let (max_x0, max_y0) = frame.max_origin_for(guide).ok_or(ConfigError::OutOfRange {
            field: "guide window",
            value: guide.width.max(guide.height) as f64,
            range: format!("frame {frame}"),
        })?;

        if self.guide_raster_x0 > max_x0 {
            return Err(ConfigError::OutOfRange {
                field: "guide_raster_x0",
                value: self.guide_raster_x0 as f64,
                range: format!("[0, {max_x0}]"),
            });
        }
        if self.guide_raster_y0 > max_y0 {
            return Err(ConfigError::OutOfRange {
                field: "guide_raster_y0",
                value: self.guide_raster_y0 as f64,
                range: format!("[0, {max_y0}]"),
            });
        }
        for (field, value, limit) in [
            ("hole_null_x", self.hole_null_x, frame.width),
            ("hole_null_y", self.hole_null_y, frame.height),
        ] {
            if !(0.0..=limit as f64).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    range: format!("[0, {limit}]"),
                });
            }
        }
        self.setup_to_true.validate()?;
        Ok(())
    }
}

/// Configuration storage manager.
///
/// Manages loading and saving of guider configuration files from a
/// centralized directory (defaults to ~/.cf_config/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.cf_config)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".cf_config"),
        })
    }

    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn guider_config_path(&self) -> PathBuf {
        self.root_path.join(GUIDER_CONFIG_FILE)
    }

    /// Load the guider config from its default location.
    ///
    /// Returns `Ok(None)` if no file exists. Values are not range-checked
    /// here; call [`GuiderConfig::validate`] with the sensor geometry.
    pub fn load_guider_config(&self) -> ConfigResult<Option<GuiderConfig>> {
        let path = self.guider_config_path();
        if !path.exists() {
            return Ok(None);
        }
        load_guider_config_file(&path).map(Some)
    }

    /// Save the guider config, creating the directory if needed.
    pub fn save_guider_config(&self, config: &GuiderConfig) -> ConfigResult<PathBuf> {
        std::fs::create_dir_all(&self.root_path)?;
        let path = self.guider_config_path();
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, config)?;
        debug!("saved guider config to {}", path.display());
        Ok(path)
    }

    /// Delete the guider config.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_guider_config(&self) -> std::io::Result<bool> {
        let path = self.guider_config_path();
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".cf_config")))
    }
}

/// Load a guider config from an explicit path.
pub fn load_guider_config_file(path: &Path) -> ConfigResult<GuiderConfig> {
    let reader = BufReader::new(File::open(path)?);
    let config: GuiderConfig = serde_json::from_reader(reader)?;
    debug!("loaded guider config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FRAME: ImageSize = ImageSize::from_width_height(640, 512);
    const GUIDE: ImageSize = ImageSize::from_width_height(32, 32);

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("cfg"));
        assert!(storage.load_guider_config().unwrap().is_none());
        assert!(!storage.delete_guider_config().unwrap());
    }

    #[test]
    fn test_save_and_load_guider_config() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("cfg"));

        let config = GuiderConfig {
            guide_raster_x0: 100,
            guide_raster_y0: 50,
            hole_null_x: 116.5,
            hole_null_y: 66.0,
            setup_to_true: SetupToTrue::identity().with_description("lab"),
        };
        let path = storage.save_guider_config(&config).unwrap();
        assert!(path.ends_with("guider.json"));

        let loaded = storage.load_guider_config().unwrap().unwrap();
        assert_eq!(loaded, config);
        assert!(storage.delete_guider_config().unwrap());
    }

    #[test]
    fn test_setup_to_true_defaults_to_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guider.json");
        std::fs::write(
            &path,
            r#"{"guide_raster_x0": 10, "guide_raster_y0": 20, "hole_null_x": 1.0, "hole_null_y": 2.0}"#,
        )
        .unwrap();

        let config = load_guider_config_file(&path).unwrap();
        assert_eq!(config.setup_to_true, SetupToTrue::identity());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guider.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_guider_config_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(GuiderConfig::default().validate(FRAME, GUIDE).is_ok());

        let edge = GuiderConfig {
            guide_raster_x0: 608,
            guide_raster_y0: 480,
            hole_null_x: 640.0,
            hole_null_y: 0.0,
            ..GuiderConfig::default()
        };
        assert!(edge.validate(FRAME, GUIDE).is_ok());

        let bad_origin = GuiderConfig {
            guide_raster_x0: 609,
            ..GuiderConfig::default()
        };
        assert!(matches!(
            bad_origin.validate(FRAME, GUIDE),
            Err(ConfigError::OutOfRange {
                field: "guide_raster_x0",
                ..
            })
        ));

        let bad_null = GuiderConfig {
            hole_null_y: -0.5,
            ..GuiderConfig::default()
        };
        assert!(matches!(
            bad_null.validate(FRAME, GUIDE),
            Err(ConfigError::OutOfRange {
                field: "hole_null_y",
                ..
            })
        ));
    }
}
