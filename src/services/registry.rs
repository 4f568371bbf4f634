use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use thiserror::Error;

use crate::core::config::Settings;
use crate::services::platform::{
    CanvasBinding, ClassroomBinding, HttpConfig, ManualBinding, Platform, PlatformBinding,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no platform binding registered for {0}")]
    UnknownPlatform(String),
}

/// Read-only lookup from platform identifier to its binding.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    bindings: HashMap<Platform, Arc<dyn PlatformBinding>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, binding: Arc<dyn PlatformBinding>) -> Self {
        self.bindings.insert(binding.platform(), binding);
        self
    }

    /// All three HTTP bindings against one backend.
    pub fn http(config: &HttpConfig) -> anyhow::Result<Self> {
        Ok(Self::new()
            .with_binding(Arc::new(ClassroomBinding::new(config)?))
            .with_binding(Arc::new(CanvasBinding::new(config)?))
            .with_binding(Arc::new(ManualBinding::new(config)?)))
    }

    pub fn resolve(&self, platform: Platform) -> Result<Arc<dyn PlatformBinding>, RegistryError> {
        self.bindings
            .get(&platform)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownPlatform(platform.to_string()))
    }

    pub fn resolve_str(&self, identifier: &str) -> Result<Arc<dyn PlatformBinding>, RegistryError> {
        let platform = identifier
            .parse::<Platform>()
            .map_err(|_| RegistryError::UnknownPlatform(identifier.to_string()))?;
        self.resolve(platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL.into_iter().filter(|platform| self.bindings.contains_key(platform)).collect()
    }
}

/// Process-wide registry, built from settings on first use.
pub(crate) fn global(settings: &Settings) -> anyhow::Result<Arc<PlatformRegistry>> {
    static REGISTRY: OnceLock<Arc<PlatformRegistry>> = OnceLock::new();

    if let Some(registry) = REGISTRY.get() {
        return Ok(registry.clone());
    }

    let registry = PlatformRegistry::http(&HttpConfig::from_settings(settings))
        .context("Failed to build platform registry")?;
    Ok(REGISTRY.get_or_init(|| Arc::new(registry)).clone())
}
