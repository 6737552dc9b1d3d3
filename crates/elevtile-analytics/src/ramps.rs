//! Named colour ramps.
//!
//! The built-in ramps are compiled into the binary and parsed once per
//! process; further ramps can be loaded from a directory of `*.pg` files at
//! startup. After that the registry is only read.

use crate::colormap::{ColorRamp, ColorStops, Palette};
use crate::{AnalyticsError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Default ramp for elevation renders.
pub const ARCTIC: &str = "arctic";
/// Fallback ramp for elevation renders given an unknown colormap name.
pub const MBY: &str = "mby";
/// Default ramp for slope, aspect, TRI and TPI renders.
pub const GRAY_DK: &str = "gray_dk";
/// Default ramp for hillshade renders.
pub const BW_LINEAR: &str = "00_bw_linear";

/// Extension of ramp definition files.
pub const RAMP_EXTENSION: &str = "pg";

const BUILTIN: &[(&str, &str)] = &[
    (ARCTIC, include_str!("../ramps/arctic.pg")),
    (MBY, include_str!("../ramps/mby.pg")),
    (GRAY_DK, include_str!("../ramps/gray_dk.pg")),
    (BW_LINEAR, include_str!("../ramps/00_bw_linear.pg")),
];

/// Immutable set of named continuous ramps.
#[derive(Debug, Clone, Default)]
pub struct RampRegistry {
    ramps: BTreeMap<String, Arc<ColorStops>>,
}

impl RampRegistry {
    /// Registry holding only the built-in ramps.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::default();
        for (name, text) in BUILTIN {
            registry.insert(name, ColorStops::parse(text)?);
        }
        Ok(registry)
    }

    /// Process-wide built-in registry, parsed on first use.
    pub fn shared() -> Result<Arc<RampRegistry>> {
        static SHARED: OnceLock<std::result::Result<Arc<RampRegistry>, String>> = OnceLock::new();
        SHARED
            .get_or_init(|| RampRegistry::builtin().map(Arc::new).map_err(|e| e.to_string()))
            .clone()
            .map_err(|reason| AnalyticsError::RampParse { line: 0, reason })
    }

    /// Add or replace a ramp.
    pub fn insert(&mut self, name: &str, stops: ColorStops) {
        self.ramps.insert(name.to_string(), Arc::new(stops));
    }

    /// Load every `*.pg` file in `dir`, named after the file stem.
    ///
    /// Files that fail to parse are skipped with a warning. Returns the
    /// number of ramps loaded.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let mut loaded = 0;
        let mut entries: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == RAMP_EXTENSION))
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            match ColorStops::parse(&text) {
                Ok(stops) => {
                    debug!("loaded ramp '{}' from {}", name, path.display());
                    self.insert(name, stops);
                    loaded += 1;
                }
                Err(err) => warn!("skipping ramp {}: {}", path.display(), err),
            }
        }
        Ok(loaded)
    }

    /// A registered ramp.
    pub fn get(&self, name: &str) -> Option<Arc<ColorStops>> {
        self.ramps.get(name).cloned()
    }

    /// A registered ramp, or [`AnalyticsError::UnknownRamp`].
    pub fn require(&self, name: &str) -> Result<Arc<ColorStops>> {
        self.get(name).ok_or_else(|| AnalyticsError::UnknownRamp(name.to_string()))
    }

    /// Registered ramp names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ramps.keys().map(String::as_str)
    }

    /// Resolve a colormap name.
    ///
    /// Palette keywords and registered ramp names resolve to themselves. A
    /// missing name resolves to `default`, an unrecognised one to
    /// `fallback`; both of those must be registered ramps.
    pub fn resolve(&self, name: Option<&str>, default: &str, fallback: &str) -> Result<ColorRamp> {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(ColorRamp::Continuous(self.require(default)?));
        };
        if let Some(palette) = Palette::from_name(name) {
            return Ok(ColorRamp::Discrete(palette));
        }
        if let Some(stops) = self.get(name) {
            return Ok(ColorRamp::Continuous(stops));
        }
        debug!("unrecognised colormap '{}', using '{}'", name, fallback);
        Ok(ColorRamp::Continuous(self.require(fallback)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ramps_parse() {
        let registry = RampRegistry::builtin().unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec![BW_LINEAR, ARCTIC, GRAY_DK, MBY]);
    }

    #[test]
    fn test_shared_is_parsed_once() {
        let a = RampRegistry::shared().unwrap();
        let b = RampRegistry::shared().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_resolution() {
        let registry = RampRegistry::builtin().unwrap();
        let arctic = registry.get(ARCTIC).unwrap();
        let mby = registry.get(MBY).unwrap();

        assert_eq!(registry.resolve(None, ARCTIC, MBY).unwrap(), ColorRamp::Continuous(arctic.clone()));
        assert_eq!(registry.resolve(Some("arctic"), ARCTIC, MBY).unwrap(), ColorRamp::Continuous(arctic));
        assert_eq!(registry.resolve(Some("fire"), ARCTIC, MBY).unwrap(), ColorRamp::Discrete(Palette::Fire));
        assert_eq!(registry.resolve(Some("gray_dk"), ARCTIC, MBY).unwrap(), ColorRamp::Continuous(registry.get(GRAY_DK).unwrap()));
        assert_eq!(registry.resolve(Some("no-such-ramp"), ARCTIC, MBY).unwrap(), ColorRamp::Continuous(mby));
        assert!(matches!(registry.resolve(None, "missing", MBY), Err(AnalyticsError::UnknownRamp(_))));
    }

    #[test]
    fn test_load_dir() {
        let dir = std::env::temp_dir().join(format!("elevtile-ramps-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sea.pg"), "0 0 0 50 255\n1 0 0 100 255\n2 0 0 150 255\n3 0 0 200 255\n4 0 0 250 255\n").unwrap();
        std::fs::write(dir.join("broken.pg"), "0 0 0 0\n").unwrap();
        std::fs::write(dir.join("notes.txt"), "not a ramp").unwrap();

        let mut registry = RampRegistry::builtin().unwrap();
        assert_eq!(registry.load_dir(&dir).unwrap(), 1);
        assert!(registry.get("sea").is_some());
        assert!(registry.get("broken").is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
