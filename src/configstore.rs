//! YAML-backed storage for `vendor.yml` (`spec.md` §3).

use std::path::PathBuf;

use crate::error::VendorResult;
use crate::model::VendorConfig;

pub trait ConfigStore {
    fn load(&self) -> VendorResult<VendorConfig>;
    fn save(&self, config: &VendorConfig) -> VendorResult<()>;
    fn exists(&self) -> bool;
}

pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> VendorResult<VendorConfig> {
        if !self.path.exists() {
            return Err(crate::error::VendorError::not_initialized());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let config: VendorConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn save(&self, config: &VendorConfig) -> VendorResult<()> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(config)?;
        crate::cache::atomic_write(&self.path, yaml.as_bytes())
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}
