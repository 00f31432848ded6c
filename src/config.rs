//! Top-level configuration, loadable from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::field::NoiseParams;
use crate::grid::{GridConfig, MaintenanceConfig};
use crate::march::MarchConfig;

/// Everything needed to build, maintain and march a grid
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub grid: GridConfig,
    pub maintenance: MaintenanceConfig,
    pub march: MarchConfig,
    /// Procedural scene used by the demo binary
    pub scene: NoiseParams,
}

impl RenderConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Launch(format!("invalid config {}: {}", path.display(), e)))?;
        config.grid.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Launch(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");
        let mut config = RenderConfig::default();
        config.grid.levels = 3;
        config.maintenance.levels_per_cycle = Some(1);
        config.save(&path).unwrap();
        assert_eq!(RenderConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "march": { "max_steps": 64 } }"#).unwrap();
        let config = RenderConfig::load(&path).unwrap();
        assert_eq!(config.march.max_steps, 64);
        assert_eq!(config.march.step_size, MarchConfig::default().step_size);
        assert_eq!(config.grid, GridConfig::default());
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "grid": { "levels": 12, "resolution": 64, "base_half_width": 1.0, "center": [0, 0, 0], "seed": 1 } }"#).unwrap();
        assert!(matches!(RenderConfig::load(&path), Err(Error::Launch(_))));
    }
}
