use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid GPU config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("page_bits={0} is outside 12..=20")]
    PageBits(u32),
    #[error("physical_memory_bytes must be non-zero")]
    EmptyMemory,
}

/// Construction-time configuration of a [`crate::Gpu`].
///
/// Register layouts are fixed by the hardware classes and are not configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpuConfig {
    /// Size of guest physical RAM.
    pub physical_memory_bytes: u64,
    /// log2 of the GPU page size.
    pub page_bits: u32,
    /// Back guest RAM with lazily allocated chunks instead of one buffer.
    pub sparse_memory: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            physical_memory_bytes: 64 * 1024 * 1024,
            page_bits: tegra_memory::DEFAULT_PAGE_BITS,
            sparse_memory: false,
        }
    }
}

impl GpuConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(12..=20).contains(&self.page_bits) {
            return Err(ConfigError::PageBits(self.page_bits));
        }
        if self.physical_memory_bytes == 0 {
            return Err(ConfigError::EmptyMemory);
        }
        Ok(())
    }
}
