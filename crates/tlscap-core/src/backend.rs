//! Backend configuration capability
//!
//! Each capture backend owns a configuration type with its own library paths.
//! The orchestrator only sees them through [`BackendConfig`]: the common knob
//! set it injects, and a `check()` step that resolves every shared library the
//! backend needs before any probe is loaded.

use crate::kernel::KernelCapabilityProbe;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{artifact} not found (tried: {})", .tried.join(", "))]
    PathNotFound { artifact: String, tried: Vec<String> },

    #[error("Invalid flag combination: {0}")]
    InvalidFlags(String),

    #[error("{0} is not a Go binary (no .go.buildinfo section)")]
    NotGoBinary(PathBuf),

    #[error("Failed to parse ELF {path}: {reason}")]
    Elf { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings shared by every backend, injected by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonKnobs {
    /// Only capture this PID (0 = all)
    pub pid: u64,
    /// Only capture this UID (0 = all)
    pub uid: u64,
    /// Render payloads as a hex dump
    pub hex: bool,
    /// Verbose module logging
    pub debug: bool,
    /// Disable library derivation from reference binaries
    pub no_search: bool,
}

/// Per-backend configuration capability
pub trait BackendConfig: Send + Sync + fmt::Debug {
    /// Validate the configuration and resolve required library paths.
    fn check(&mut self) -> ConfigResult<()>;

    fn knobs(&self) -> &CommonKnobs;

    fn knobs_mut(&mut self) -> &mut CommonKnobs;

    /// Kernel capability probe used for the eBPF tier decision
    fn capability(&self) -> &KernelCapabilityProbe;

    /// Whether the BTF / global-variable probe programs can be used
    fn enable_global_var(&self) -> bool {
        self.capability().enable_global_var()
    }

    fn as_any(&self) -> &dyn Any;

    fn pid(&self) -> u64 {
        self.knobs().pid
    }

    fn uid(&self) -> u64 {
        self.knobs().uid
    }

    fn hex(&self) -> bool {
        self.knobs().hex
    }

    fn debug(&self) -> bool {
        self.knobs().debug
    }

    fn no_search(&self) -> bool {
        self.knobs().no_search
    }

    fn set_pid(&mut self, pid: u64) {
        self.knobs_mut().pid = pid;
    }

    fn set_uid(&mut self, uid: u64) {
        self.knobs_mut().uid = uid;
    }

    fn set_hex(&mut self, hex: bool) {
        self.knobs_mut().hex = hex;
    }

    fn set_debug(&mut self, debug: bool) {
        self.knobs_mut().debug = debug;
    }

    fn set_no_search(&mut self, no_search: bool) {
        self.knobs_mut().no_search = no_search;
    }
}

/// A configuration whose `check()` has succeeded.
///
/// This is the only form a module's `init` accepts, so an unchecked or failed
/// configuration can never reach probe loading.
#[derive(Debug)]
pub struct ValidatedConfig(Box<dyn BackendConfig>);

impl ValidatedConfig {
    pub fn validate(mut config: Box<dyn BackendConfig>) -> ConfigResult<Self> {
        config.check()?;
        Ok(Self(config))
    }

    pub fn get(&self) -> &dyn BackendConfig {
        self.0.as_ref()
    }

    pub fn knobs(&self) -> &CommonKnobs {
        self.0.knobs()
    }

    /// Downcast to the concrete backend configuration
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

/// Which step of the resolution chain produced a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Explicit,
    Derived,
    Default,
}

/// A resolved library or binary path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    pub from: ResolvedFrom,
}

/// Resolve an artifact by precedence: explicit path, then a path derived from a
/// reference binary (skipped when `no_search` is set), then the first existing
/// default.
pub fn resolve_artifact<F>(
    artifact: &str,
    explicit: Option<&Path>,
    no_search: bool,
    derive: F,
    defaults: &[&str],
) -> ConfigResult<Resolution>
where
    F: FnOnce() -> Option<PathBuf>,
{
    let mut tried = Vec::new();

    if let Some(path) = explicit {
        if path.is_file() {
            debug!("{}: using explicit path {}", artifact, path.display());
            return Ok(Resolution {
                path: path.to_path_buf(),
                from: ResolvedFrom::Explicit,
            });
        }
        warn!("{}: explicit path {} does not exist", artifact, path.display());
        tried.push(path.display().to_string());
    }

    if no_search {
        tried.push("<auto-discovery disabled>".to_string());
    } else {
        match derive() {
            Some(path) if path.is_file() => {
                debug!("{}: derived {}", artifact, path.display());
                return Ok(Resolution {
                    path,
                    from: ResolvedFrom::Derived,
                });
            }
            Some(path) => tried.push(path.display().to_string()),
            None => tried.push("<reference binary>".to_string()),
        }
    }

    for candidate in defaults {
        let path = Path::new(candidate);
        if path.is_file() {
            debug!("{}: using default {}", artifact, candidate);
            return Ok(Resolution {
                path: path.to_path_buf(),
                from: ResolvedFrom::Default,
            });
        }
        tried.push(candidate.to_string());
    }

    Err(ConfigError::PathNotFound {
        artifact: artifact.to_string(),
        tried,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[derive(Debug, Default)]
    struct DummyConfig {
        knobs: CommonKnobs,
        capability: KernelCapabilityProbe,
        fail: bool,
    }

    impl BackendConfig for DummyConfig {
        fn check(&mut self) -> ConfigResult<()> {
            if self.fail {
                return Err(ConfigError::InvalidFlags("dummy".into()));
            }
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

    #[test]
    fn test_knob_setters() {
        let mut config = DummyConfig::default();
        config.set_pid(42);
        config.set_uid(1000);
        config.set_hex(true);
        config.set_debug(true);
        config.set_no_search(true);
        assert_eq!(
            config.knobs(),
            &CommonKnobs {
                pid: 42,
                uid: 1000,
                hex: true,
                debug: true,
                no_search: true,
            }
        );
    }

    #[test]
    fn test_validate_rejects_failed_check() {
        let config = DummyConfig {
            fail: true,
            ..Default::default()
        };
        assert!(ValidatedConfig::validate(Box::new(config)).is_err());
    }

    #[test]
    fn test_validated_downcast() {
        let validated = ValidatedConfig::validate(Box::new(DummyConfig::default())).unwrap();
        assert!(validated.downcast_ref::<DummyConfig>().is_some());
        assert!(validated.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_explicit_beats_derived_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("libssl.so.3");
        let derived = dir.path().join("libssl.so.1.1");
        let default = dir.path().join("libssl.so");
        for p in [&explicit, &derived, &default] {
            File::create(p).unwrap();
        }
        let default_str = default.to_string_lossy().to_string();

        let res = resolve_artifact(
            "libssl",
            Some(&explicit),
            false,
            || Some(derived.clone()),
            &[&default_str],
        )
        .unwrap();
        assert_eq!(res.from, ResolvedFrom::Explicit);
        assert_eq!(res.path, explicit);

        let res = resolve_artifact("libssl", None, false, || Some(derived.clone()), &[
            &default_str,
        ])
        .unwrap();
        assert_eq!(res.from, ResolvedFrom::Derived);
    }

    #[test]
    fn test_missing_explicit_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let derived = dir.path().join("libgnutls.so.30");
        File::create(&derived).unwrap();

        let res = resolve_artifact(
            "libgnutls",
            Some(Path::new("/nonexistent/libgnutls.so")),
            false,
            || Some(derived.clone()),
            &[],
        )
        .unwrap();
        assert_eq!(res.from, ResolvedFrom::Derived);
    }

    #[test]
    fn test_no_search_skips_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let derived = dir.path().join("libnspr4.so");
        let default = dir.path().join("default-libnspr4.so");
        File::create(&derived).unwrap();
        File::create(&default).unwrap();
        let default_str = default.to_string_lossy().to_string();

        let res = resolve_artifact(
            "libnspr4",
            None,
            true,
            || panic!("derivation must not run"),
            &[&default_str],
        )
        .unwrap();
        assert_eq!(res.from, ResolvedFrom::Default);
        assert_eq!(res.path, default);
    }

    #[test]
    fn test_all_missing_names_artifact() {
        let err = resolve_artifact(
            "libssl",
            None,
            false,
            || None,
            &["/nonexistent/libssl.so.3"],
        )
        .unwrap_err();
        match err {
            ConfigError::PathNotFound { artifact, tried } => {
                assert_eq!(artifact, "libssl");
                assert!(tried.contains(&"/nonexistent/libssl.so.3".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
