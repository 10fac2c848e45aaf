//! Configuration file for tlscap
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//!
//! Command-line flags are applied on top by the binary.

use crate::kernel::CapabilityPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default directory holding the compiled probe objects
pub const DEFAULT_BPF_DIR: &str = "/usr/share/tlscap/bpf";

/// Default payload capacity of the fixed-layout records
pub const DEFAULT_DATA_CAPACITY: usize = 4096;

/// Largest payload capacity accepted in configuration
pub const MAX_DATA_CAPACITY: usize = 1 << 20;

/// Configuration file errors
#[derive(Debug, Error)]
pub enum FileConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type FileConfigResult<T> = Result<T, FileConfigError>;

/// Complete file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub sensor: SensorSettings,
    pub capture: CaptureSettings,
    pub paths: PathSettings,
    pub decode: DecodeSettings,
    pub kernel: KernelSettings,
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Grace period for modules to detach on shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            shutdown_timeout_ms: 3000,
        }
    }
}

/// Capture settings shared by every module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Only capture this PID (0 = all)
    pub pid: u64,

    /// Only capture this UID (0 = all)
    pub uid: u64,

    /// Render payloads as a hex dump
    pub hex: bool,

    /// Do not derive library paths from client binaries
    pub no_search: bool,

    /// Directory holding `<backend>_kern_{core,noncore}.o`
    pub bpf_dir: String,

    /// Thread-name filter; empty passes everything
    pub comm_filter: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            pid: 0,
            uid: 0,
            hex: false,
            no_search: false,
            bpf_dir: DEFAULT_BPF_DIR.to_string(),
            comm_filter: String::new(),
        }
    }
}

/// Explicit library and binary paths; empty means unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub curl: String,
    pub libssl: String,
    pub pthread: String,
    pub wget: String,
    pub gnutls: String,
    pub firefox: String,
    pub nspr: String,
    pub gobin: String,
}

/// Record decoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeSettings {
    /// Payload capacity of the fixed-layout records; must match the probe objects
    pub data_capacity: usize,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            data_capacity: DEFAULT_DATA_CAPACITY,
        }
    }
}

/// Kernel capability settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSettings {
    /// What to assume when the kernel version cannot be read
    pub capability_policy: CapabilityPolicy,
}

/// Treat an empty setting as unset
pub fn non_empty_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. TLSCAP_CONFIG environment variable
    /// 3. ~/.config/tlscap/config.toml
    /// 4. /etc/tlscap/config.toml
    /// 5. Default values
    pub fn load(&self) -> FileConfigResult<FileConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                self.load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                FileConfig::default()
            }
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok());
        self.validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("TLSCAP_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("TLSCAP_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("tlscap").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        let path = PathBuf::from("/etc/tlscap/config.toml");
        if path.exists() {
            return Some(path);
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> FileConfigResult<FileConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn validate(&self, config: &FileConfig) -> FileConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.sensor.log_level.to_lowercase().as_str()) {
            return Err(FileConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.sensor.log_level, valid_levels
            )));
        }

        let capacity = config.decode.data_capacity;
        if capacity == 0 || capacity > MAX_DATA_CAPACITY {
            return Err(FileConfigError::ValidationError(format!(
                "Invalid data capacity: {}. Must be between 1 and {}",
                capacity, MAX_DATA_CAPACITY
            )));
        }

        if config.capture.bpf_dir.trim().is_empty() {
            return Err(FileConfigError::ValidationError(
                "bpf_dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Apply `TLSCAP_*` overrides read through `lookup`
fn apply_overrides<F>(config: &mut FileConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("TLSCAP_LOG_LEVEL") {
        config.sensor.log_level = val;
    }
    if let Some(val) = lookup("TLSCAP_BPF_DIR") {
        config.capture.bpf_dir = val;
    }
    if let Some(val) = lookup("TLSCAP_HEX") {
        config.capture.hex = val.parse().unwrap_or(config.capture.hex);
    }
    if let Some(val) = lookup("TLSCAP_CAPABILITY_POLICY") {
        match val.parse() {
            Ok(policy) => config.kernel.capability_policy = policy,
            Err(e) => warn!("Ignoring TLSCAP_CAPABILITY_POLICY: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FileConfig::default();
        assert_eq!(config.sensor.log_level, "info");
        assert_eq!(config.sensor.shutdown_timeout_ms, 3000);
        assert_eq!(config.capture.bpf_dir, DEFAULT_BPF_DIR);
        assert_eq!(config.decode.data_capacity, 4096);
        assert_eq!(config.kernel.capability_policy, CapabilityPolicy::FailOpen);
        assert!(config.paths.libssl.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [sensor]
            log_level = "debug"
        "#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sensor.log_level, "debug");
        // Other fields should be default
        assert_eq!(config.decode.data_capacity, DEFAULT_DATA_CAPACITY);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [sensor]
            log_level = "trace"
            shutdown_timeout_ms = 500

            [capture]
            pid = 4242
            hex = true
            comm_filter = "curl*"

            [paths]
            libssl = "/opt/ssl/lib/libssl.so.3"
            gobin = "/usr/local/bin/hello"

            [decode]
            data_capacity = 16384

            [kernel]
            capability_policy = "fail-closed"
        "#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sensor.shutdown_timeout_ms, 500);
        assert_eq!(config.capture.pid, 4242);
        assert!(config.capture.hex);
        assert_eq!(config.capture.comm_filter, "curl*");
        assert_eq!(
            non_empty_path(&config.paths.libssl),
            Some(PathBuf::from("/opt/ssl/lib/libssl.so.3"))
        );
        assert_eq!(non_empty_path(&config.paths.curl), None);
        assert_eq!(config.decode.data_capacity, 16384);
        assert_eq!(config.kernel.capability_policy, CapabilityPolicy::FailClosed);
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = FileConfig {
            sensor: SensorSettings {
                log_level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_data_capacity() {
        let mut config = FileConfig::default();
        config.decode.data_capacity = 0;
        assert!(ConfigLoader::new().validate(&config).is_err());

        config.decode.data_capacity = MAX_DATA_CAPACITY + 1;
        assert!(ConfigLoader::new().validate(&config).is_err());

        config.decode.data_capacity = 8192;
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TLSCAP_LOG_LEVEL", "warn"),
            ("TLSCAP_BPF_DIR", "/tmp/bpf"),
            ("TLSCAP_HEX", "true"),
            ("TLSCAP_CAPABILITY_POLICY", "fail-closed"),
        ]
        .into_iter()
        .collect();

        let mut config = FileConfig::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.sensor.log_level, "warn");
        assert_eq!(config.capture.bpf_dir, "/tmp/bpf");
        assert!(config.capture.hex);
        assert_eq!(config.kernel.capability_policy, CapabilityPolicy::FailClosed);
    }

    #[test]
    fn test_bad_env_override_keeps_value() {
        let mut config = FileConfig::default();
        apply_overrides(&mut config, |key| match key {
            "TLSCAP_HEX" => Some("maybe".to_string()),
            "TLSCAP_CAPABILITY_POLICY" => Some("sometimes".to_string()),
            _ => None,
        });
        assert!(!config.capture.hex);
        assert_eq!(config.kernel.capability_policy, CapabilityPolicy::FailOpen);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nno_search = true\n\n[paths]\nnspr = \"/usr/lib/libnspr4.so\"").unwrap();

        let config = ConfigLoader::new().load_from_file(file.path()).unwrap();
        assert!(config.capture.no_search);
        assert_eq!(config.paths.nspr, "/usr/lib/libnspr4.so");
    }

    #[test]
    fn test_load_from_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture\npid = ").unwrap();

        let result = ConfigLoader::new().load_from_file(file.path());
        assert!(matches!(result, Err(FileConfigError::ParseError(_))));
    }

    #[test]
    fn test_serialize_config() {
        let config = FileConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[sensor]"));
        assert!(toml_str.contains("capability_policy = \"fail-open\""));
    }
}
