//! Service configuration loaded from YAML.

use elevtile_analytics::{
    DerivativeParams, SlopeUnits, DEFAULT_BINS, DEFAULT_HILLSHADE_BUFFER_PX, DEFAULT_SUN_ALTITUDE_DEG,
    DEFAULT_SUN_AZIMUTH_DEG,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Settings for [`ElevationService`](crate::ElevationService) and the CLI.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Root of the GeoTIFF pyramid, laid out as `{z}/{x}/{y}.tif`.
    pub tile_dir: PathBuf,
    /// Decoded tiles kept in memory.
    pub tile_cache_size: usize,
    /// Histogram buckets when a request does not specify them.
    pub default_bins: usize,
    /// Halo pulled from neighbouring tiles for the buffered hillshade.
    pub hillshade_buffer_px: usize,
    /// Hillshade light bearing in degrees clockwise from north.
    pub sun_azimuth_deg: f64,
    /// Hillshade light elevation in degrees above the horizon.
    pub sun_altitude_deg: f64,
    /// Vertical exaggeration for every derivative.
    pub z_factor: f64,
    /// Units of slope renders.
    pub slope_units: SlopeUnits,
    /// Reject tile coordinates beyond `2^zoom - 1` instead of only beyond 32767.
    pub strict_tile_bounds: bool,
    /// Extra `*.pg` ramp definitions loaded at startup.
    pub ramp_dir: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tile_dir: PathBuf::from("tiles"),
            tile_cache_size: 64,
            default_bins: DEFAULT_BINS,
            hillshade_buffer_px: DEFAULT_HILLSHADE_BUFFER_PX,
            sun_azimuth_deg: DEFAULT_SUN_AZIMUTH_DEG,
            sun_altitude_deg: DEFAULT_SUN_ALTITUDE_DEG,
            z_factor: 1.0,
            slope_units: SlopeUnits::RiseOverRun,
            strict_tile_bounds: false,
            ramp_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        // serde_yaml reads an empty document as null rather than an empty map
        let config: ServerConfig = if text.trim().is_empty() {
            ServerConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_bins < 1 {
            return Err(ConfigError::Invalid("default_bins should be at least 1".into()));
        }
        if self.tile_cache_size < 1 {
            return Err(ConfigError::Invalid("tile_cache_size should be at least 1".into()));
        }
        if !(0.0..=90.0).contains(&self.sun_altitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "sun_altitude_deg should be between 0 and 90, got {}",
                self.sun_altitude_deg
            )));
        }
        if !self.sun_azimuth_deg.is_finite() {
            return Err(ConfigError::Invalid("sun_azimuth_deg should be finite".into()));
        }
        if !self.z_factor.is_finite() || self.z_factor == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "z_factor should be finite and non-zero, got {}",
                self.z_factor
            )));
        }
        Ok(())
    }

    /// Derivative parameters with the given neighbourhood buffer.
    pub fn derivative_params(&self, neighborhood_buffer: usize) -> DerivativeParams {
        DerivativeParams {
            neighborhood_buffer,
            sun_azimuth_deg: self.sun_azimuth_deg,
            sun_altitude_deg: self.sun_altitude_deg,
            z_factor: self.z_factor,
            slope_units: self.slope_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(ServerConfig::from_yaml_str("").unwrap(), ServerConfig::default());
        assert_eq!(ServerConfig::from_yaml_str("{}").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let yaml = "
tile_dir: /srv/elevation
default_bins: 10
hillshade_buffer_px: 32
slope_units: degrees
strict_tile_bounds: true
ramp_dir: ramps
";
        let config = ServerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.tile_dir, PathBuf::from("/srv/elevation"));
        assert_eq!(config.default_bins, 10);
        assert_eq!(config.hillshade_buffer_px, 32);
        assert_eq!(config.slope_units, SlopeUnits::Degrees);
        assert!(config.strict_tile_bounds);
        assert_eq!(config.ramp_dir, Some(PathBuf::from("ramps")));
        assert_eq!(config.sun_azimuth_deg, 315.0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(ServerConfig::from_yaml_str("default_bins: 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(ServerConfig::from_yaml_str("sun_altitude_deg: 120"), Err(ConfigError::Invalid(_))));
        assert!(matches!(ServerConfig::from_yaml_str("z_factor: 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(ServerConfig::from_yaml_str("no_such_field: 1"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_derivative_params() {
        let config = ServerConfig {
            z_factor: 2.0,
            ..ServerConfig::default()
        };
        let params = config.derivative_params(100);
        assert_eq!(params.neighborhood_buffer, 100);
        assert_eq!(params.z_factor, 2.0);
        assert_eq!(params.sun_altitude_deg, 45.0);
    }
}
