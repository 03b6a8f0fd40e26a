use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Pages kept materialized on each side of the current page.
    pub window_radius: usize,
    /// Intersection ratio a page container must rise past to become the current page.
    pub visibility_threshold: f32,
    pub default_scale: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub page_gap: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window_radius: 5,
            visibility_threshold: 0.1,
            default_scale: 1.0,
            min_scale: 0.25,
            max_scale: 4.0,
            page_gap: 8.0,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML config; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.visibility_threshold > 0.0 && self.visibility_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "visibility_threshold must be in (0, 1], got {}",
                self.visibility_threshold
            )));
        }
        for (name, value) in [
            ("default_scale", self.default_scale),
            ("min_scale", self.min_scale),
            ("max_scale", self.max_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.min_scale > self.max_scale {
            return Err(ConfigError::Invalid(format!(
                "min_scale {} exceeds max_scale {}",
                self.min_scale, self.max_scale
            )));
        }
        if !self.page_gap.is_finite() || self.page_gap < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "page_gap must be non-negative, got {}",
                self.page_gap
            )));
        }
        Ok(())
    }

    pub fn clamp_scale(&self, scale: f32) -> f32 {
        scale.clamp(self.min_scale, self.max_scale)
    }
}
