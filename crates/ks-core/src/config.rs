use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KeystoreError, KsResult};
use crate::types::SeedClass;

/// Default character device exposed by the keystore driver
pub const DEFAULT_DEVICE: &str = "/dev/keystore";

/// Top-level client configuration (loaded from keystore.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub transport: TransportConfig,
    pub log: LogConfig,
    pub smoke: SmokeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Backend device path (default: /dev/keystore)
    pub device: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    /// Seed class the self-test registers against
    pub seed: SeedClass,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            seed: SeedClass::User,
        }
    }
}

impl KeystoreConfig {
    /// Read a config file. A missing file yields defaults.
    pub fn load(path: &Path) -> KsResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| KeystoreError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[transport]
device = "/dev/keystore-test"

[log]
level = "debug"
format = "json"

[smoke]
seed = "device"
"#;
        let config: KeystoreConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.transport.device, PathBuf::from("/dev/keystore-test"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.smoke.seed, SeedClass::Device);
    }

    #[test]
    fn test_parse_defaults() {
        let config: KeystoreConfig = toml::from_str("").unwrap();

        assert_eq!(config.transport.device, PathBuf::from("/dev/keystore"));
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        assert_eq!(config.smoke.seed, SeedClass::User);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[log]
level = "trace"
"#;
        let config: KeystoreConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.log.level, "trace");
        // Defaults
        assert_eq!(config.log.format, "text");
        assert_eq!(config.transport.device, PathBuf::from(DEFAULT_DEVICE));
    }

    #[test]
    fn test_bad_seed_rejected() {
        let toml_str = r#"
[smoke]
seed = "root"
"#;
        assert!(toml::from_str::<KeystoreConfig>(toml_str).is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = KeystoreConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: KeystoreConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.transport.device, parsed.transport.device);
        assert_eq!(config.log.level, parsed.log.level);
        assert_eq!(config.smoke.seed, parsed.smoke.seed);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport]\ndevice = \"/tmp/ks.sock\"").unwrap();

        let config = KeystoreConfig::load(file.path()).unwrap();
        assert_eq!(config.transport.device, PathBuf::from("/tmp/ks.sock"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeystoreConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.transport.device, PathBuf::from(DEFAULT_DEVICE));
    }

    #[test]
    fn test_load_garbage_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport\ndevice = ").unwrap();

        let err = KeystoreConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, KeystoreError::Config(_)));
        assert_eq!(err.code(), -libc::EINVAL);
    }
}
