//! Configuration for the core crate
//!
//! This module provides configuration options for the chain engine,
//! including block-scheduling tunables, payload limits, compaction
//! settings and cryptographic settings.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

/// Hash algorithm to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256
    Sha256,

    /// Blake2s
    Blake2s,

    /// Keccak-256
    Keccak256,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

/// Block-scheduling tunables
///
/// These drive the pure decision functions in the scheduler: a block is
/// forced after `max_seconds_interval`, or created earlier once both the
/// minimum interval and the minimum queue size are reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPolicyConfig {
    /// Minimum seconds between blocks when the queue threshold is met
    pub min_seconds_interval: u64,

    /// Minimum pending-queue size for early block creation
    pub min_queue_size: usize,

    /// Seconds after which a block is forced regardless of queue size
    pub max_seconds_interval: u64,

    /// Seconds between replication checks
    pub replicate_interval: u64,
}

impl Default for BlockPolicyConfig {
    fn default() -> Self {
        BlockPolicyConfig {
            min_seconds_interval: 15,
            min_queue_size: 10,
            max_seconds_interval: 300,
            replicate_interval: 150,
        }
    }
}

/// Payload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum serialized size of a single operation payload, in bytes
    pub max_operation_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            // Megabyte-scale ceiling for a single operation
            max_operation_size: 1024 * 1024,
        }
    }
}

/// Compaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Merge coefficient. Must satisfy
    /// `coefficient >= 1 / expected_subchain_size` for the chain length
    /// to stay logarithmic in the total operation count.
    pub coefficient: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig { coefficient: 1.0 }
    }
}

/// Cryptographic settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Hash algorithm for content hashing
    pub hash_algorithm: HashAlgorithm,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        CryptoConfig {
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Identity name of the chain operator (block signer)
    pub operator_id: String,

    /// Unique identifier of this deployment
    pub instance_id: Uuid,

    /// Block-scheduling tunables
    pub policy: BlockPolicyConfig,

    /// Payload limits
    pub limits: LimitsConfig,

    /// Compaction settings
    pub compaction: CompactionConfig,

    /// Cryptographic settings
    pub crypto: CryptoConfig,

    /// Log level
    pub log_level: String,

    /// Whether to enable debug mode
    pub debug_mode: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            operator_id: "opledger".to_string(),
            instance_id: crate::utils::generate_uuid(),
            policy: BlockPolicyConfig::default(),
            limits: LimitsConfig::default(),
            compaction: CompactionConfig::default(),
            crypto: CryptoConfig::default(),
            log_level: "info".to_string(),
            debug_mode: false,
        }
    }
}

impl ChainConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &str) -> Result<Self, crate::error::ChainError> {
        let file = std::fs::File::open(path)
            .map_err(crate::error::ChainError::Io)?;

        let config = serde_json::from_reader(file)
            .map_err(crate::error::ChainError::Json)?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: &str) -> Result<(), crate::error::ChainError> {
        let file = std::fs::File::create(path)
            .map_err(crate::error::ChainError::Io)?;

        serde_json::to_writer_pretty(file, self)
            .map_err(crate::error::ChainError::Json)?;

        Ok(())
    }

    /// Create a development configuration
    pub fn development() -> Self {
        let mut config = Self::default();
        config.debug_mode = true;
        config.log_level = "debug".to_string();
        config
    }

    /// Create a production configuration
    pub fn production() -> Self {
        let mut config = Self::default();
        config.debug_mode = false;
        config.log_level = "info".to_string();
        config
    }

    /// Create a testing configuration with short intervals and a small
    /// queue threshold
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.debug_mode = true;
        config.log_level = "debug".to_string();
        config.policy.min_seconds_interval = 1;
        config.policy.min_queue_size = 2;
        config.policy.max_seconds_interval = 10;
        config.policy.replicate_interval = 5;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ChainConfig::default();

        // Check default values
        assert_eq!(config.policy.min_seconds_interval, 15);
        assert_eq!(config.policy.min_queue_size, 10);
        assert_eq!(config.policy.max_seconds_interval, 300);
        assert_eq!(config.policy.replicate_interval, 150);
        assert_eq!(config.limits.max_operation_size, 1024 * 1024);
        assert_eq!(config.compaction.coefficient, 1.0);
        assert_eq!(config.crypto.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.log_level, "info");
        assert!(!config.debug_mode);
    }

    #[test]
    fn test_testing_config() {
        let config = ChainConfig::testing();

        assert!(config.debug_mode);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.policy.min_queue_size, 2);
        assert_eq!(config.policy.max_seconds_interval, 10);
    }

    #[test]
    fn test_config_serialization() {
        let config = ChainConfig::default();

        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: ChainConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.operator_id, config.operator_id);
        assert_eq!(deserialized.instance_id, config.instance_id);
        assert_eq!(deserialized.policy.min_queue_size, config.policy.min_queue_size);
        assert_eq!(deserialized.limits.max_operation_size, config.limits.max_operation_size);
        assert_eq!(deserialized.crypto.hash_algorithm, config.crypto.hash_algorithm);
    }

    #[test]
    fn test_config_file_io() {
        let config = ChainConfig::default();

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        config.to_file(path).unwrap();
        let loaded = ChainConfig::from_file(path).unwrap();

        assert_eq!(loaded.operator_id, config.operator_id);
        assert_eq!(loaded.instance_id, config.instance_id);
        assert_eq!(loaded.policy.replicate_interval, config.policy.replicate_interval);
    }
}
