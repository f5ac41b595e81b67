//! Configuration — protocol constants and scanner policy
//!
//! State that would otherwise be process-global (protocol
//! tag, processing cost estimate, trace cache location, request pacing) is
//! passed explicitly through these structs.

use crate::annotation::{ProtocolTag, DEFAULT_PROTOCOL_TAG};
use crate::error::{OrganismError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Protocol-level settings shared by the builder, verifier and walker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// 4-byte tag opening every annotation (hex in JSON)
    #[serde(with = "hex::serde")]
    pub protocol_tag: ProtocolTag,
    /// Change below this value is not worth a record and goes to the ledger
    pub change_dust_limit: u64,
    /// Caller-side estimate of the processing cost of spawn and feed
    /// transitions, paid from the caller's own funds
    pub processing_fee: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_tag: DEFAULT_PROTOCOL_TAG,
            change_dust_limit: 546,
            processing_fee: 1_000,
        }
    }
}

/// Lineage scanning policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory holding one cached trace per lineage
    pub trace_dir: PathBuf,
    /// Fixed pause between ledger requests (milliseconds)
    pub request_delay_ms: u64,
    /// Lineages traced at the same time
    pub max_concurrent: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            trace_dir: PathBuf::from("organism-traces"),
            request_delay_ms: 250,
            max_concurrent: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: ProtocolConfig,
    pub scan: ScanConfig,
}

impl Config {
    /// Load from a JSON file, falling back to defaults when it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| OrganismError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| OrganismError::Config(format!("{}: {}", path.display(), e)))?;
        if config.scan.max_concurrent == 0 {
            return Err(OrganismError::Config(
                "scan.max_concurrent must be at least 1".to_string(),
            ));
        }
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| OrganismError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| OrganismError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(&config.protocol.protocol_tag, b"ORGN");
        assert_eq!(config.protocol.change_dust_limit, 546);
        assert!(config.scan.max_concurrent > 0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"protocol": {"processing_fee": 2500}}"#).unwrap();
        assert_eq!(config.protocol.processing_fee, 2_500);
        assert_eq!(config.protocol.protocol_tag, DEFAULT_PROTOCOL_TAG);
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("organism-config-{}.json", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.protocol.protocol_tag = *b"TEST";
        config.scan.request_delay_ms = 0;
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join(format!("organism-missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    }
}
