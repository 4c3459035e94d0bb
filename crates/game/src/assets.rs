use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::level::LevelData;
use crate::physics::{BodyDesc, BodyKind, BodyShape};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("unknown level '{0}'")]
    UnknownLevel(String),
    #[error("invalid model '{id}': {reason}")]
    InvalidModel { id: String, reason: String },
    #[error("failed to read asset catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse asset catalog: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Physical description of a model, as far as replication cares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelDesc {
    pub kind: BodyKind,
    #[serde(default)]
    pub shape: BodyShape,
    #[serde(default = "default_mass")]
    pub mass: f32,
}

fn default_mass() -> f32 {
    1.0
}

impl ModelDesc {
    pub fn body(&self) -> BodyDesc {
        BodyDesc {
            kind: self.kind,
            shape: self.shape,
            mass: self.mass,
        }
    }

    fn validate(&self, id: &str) -> Result<(), AssetError> {
        let invalid = |reason: &str| AssetError::InvalidModel {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        if !self.mass.is_finite() || self.mass < 0.0 {
            return Err(invalid("mass must be a finite, non-negative number"));
        }

        let dims_ok = match self.shape {
            BodyShape::Cuboid { half_extents } => half_extents.iter().all(|&e| e > 0.0),
            BodyShape::Ball { radius } => radius > 0.0,
            BodyShape::Cylinder { radius, height } => radius > 0.0 && height > 0.0,
        };
        if !dims_ok {
            return Err(invalid("shape dimensions must be positive"));
        }

        Ok(())
    }
}

/// Where models and levels come from. Called from loader worker threads.
pub trait AssetSource: Send + Sync {
    fn load_model(&self, id: &str) -> Result<ModelDesc, AssetError>;
    fn load_level(&self, id: &str) -> Result<LevelData, AssetError>;
}

/// TOML-described set of models and levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetCatalog {
    #[serde(default)]
    pub models: BTreeMap<String, ModelDesc>,
    #[serde(default)]
    pub levels: BTreeMap<String, LevelData>,
}

impl AssetCatalog {
    pub fn from_toml_str(content: &str) -> Result<Self, AssetError> {
        let catalog: AssetCatalog = toml::from_str(content)?;
        for (id, model) in &catalog.models {
            model.validate(id)?;
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&content)?;
        log::info!(
            "Loaded asset catalog {} ({} models, {} levels)",
            path.display(),
            catalog.models.len(),
            catalog.levels.len()
        );
        Ok(catalog)
    }

    /// Catalog compiled into the crate: one model per body kind and the arena level.
    pub fn builtin() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "soldier.model".to_string(),
            ModelDesc {
                kind: BodyKind::Character,
                shape: BodyShape::Cylinder {
                    radius: 0.4,
                    height: 1.8,
                },
                mass: 80.0,
            },
        );
        models.insert(
            "buggy.model".to_string(),
            ModelDesc {
                kind: BodyKind::Vehicle,
                shape: BodyShape::Cuboid {
                    half_extents: [1.0, 0.5, 2.0],
                },
                mass: 400.0,
            },
        );
        models.insert(
            "crate.model".to_string(),
            ModelDesc {
                kind: BodyKind::Rigid,
                shape: BodyShape::Cuboid {
                    half_extents: [0.4, 0.4, 0.4],
                },
                mass: 10.0,
            },
        );
        models.insert(
            "house.model".to_string(),
            ModelDesc {
                kind: BodyKind::Static,
                shape: BodyShape::Cuboid {
                    half_extents: [4.0, 3.0, 4.0],
                },
                mass: 0.0,
            },
        );

        let mut levels = BTreeMap::new();
        levels.insert("arena".to_string(), LevelData::arena());

        Self { models, levels }
    }
}

impl AssetSource for AssetCatalog {
    fn load_model(&self, id: &str) -> Result<ModelDesc, AssetError> {
        self.models
            .get(id)
            .copied()
            .ok_or_else(|| AssetError::UnknownModel(id.to_string()))
    }

    fn load_level(&self, id: &str) -> Result<LevelData, AssetError> {
        self.levels
            .get(id)
            .cloned()
            .ok_or_else(|| AssetError::UnknownLevel(id.to_string()))
    }
}
