//! Go `crypto/tls` configuration

use crate::discovery::is_go_binary;
use std::any::Any;
use std::path::{Path, PathBuf};
use tlscap_core::backend::{BackendConfig, CommonKnobs, ConfigError, ConfigResult};
use tlscap_core::kernel::KernelCapabilityProbe;
use tracing::info;

/// Go TLS backend configuration.
///
/// The target binary has no auto-discovery and no default.
#[derive(Debug, Clone, Default)]
pub struct GoTlsConfig {
    pub knobs: CommonKnobs,
    pub capability: KernelCapabilityProbe,

    /// Binary built with the Go toolchain (`--gobin`)
    pub path: Option<PathBuf>,
}

impl GoTlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The validated Go binary, available after `check()`
    pub fn binary_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl BackendConfig for GoTlsConfig {
    fn check(&mut self) -> ConfigResult<()> {
        let path = self.path.as_deref().ok_or_else(|| ConfigError::PathNotFound {
            artifact: "go binary".to_string(),
            tried: vec!["<--gobin not set>".to_string()],
        })?;

        if path.is_dir() {
            return Err(ConfigError::InvalidFlags(format!(
                "--gobin {} is a directory",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(ConfigError::PathNotFound {
                artifact: "go binary".to_string(),
                tried: vec![path.display().to_string()],
            });
        }
        if !is_go_binary(path)? {
            return Err(ConfigError::NotGoBinary(path.to_path_buf()));
        }

        info!("Go TLS: using {}", path.display());
        Ok(())
    }

    fn knobs(&self) -> &CommonKnobs {
        &self.knobs
    }

    fn knobs_mut(&mut self) -> &mut CommonKnobs {
        &mut self.knobs
    }

    fn capability(&self) -> &KernelCapabilityProbe {
        &self.capability
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
