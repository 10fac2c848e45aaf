//! GnuTLS configuration

use super::{reference_binary, LibraryDeriver, DEFAULT_WGET};
use crate::discovery::LibraryLocator;
use std::any::Any;
use std::path::{Path, PathBuf};
use tlscap_core::backend::{resolve_artifact, BackendConfig, CommonKnobs, ConfigResult};
use tlscap_core::kernel::KernelCapabilityProbe;
use tracing::info;

/// Common libgnutls locations
pub static LIBGNUTLS_PATHS: &[&str] = &[
    "/lib/x86_64-linux-gnu/libgnutls.so.30",
    "/usr/lib/x86_64-linux-gnu/libgnutls.so.30",
    "/lib/aarch64-linux-gnu/libgnutls.so.30",
    "/usr/lib/aarch64-linux-gnu/libgnutls.so.30",
    "/usr/lib64/libgnutls.so.30",
    "/usr/lib/libgnutls.so.30",
];

/// GnuTLS backend configuration
#[derive(Debug, Clone)]
pub struct GnuTlsConfig {
    pub knobs: CommonKnobs,
    pub capability: KernelCapabilityProbe,

    /// Reference binary used to find libgnutls (`--wget`)
    pub wget: Option<PathBuf>,
    /// Explicit libgnutls path (`--gnutls`)
    pub gnutls: Option<PathBuf>,

    locator: Option<LibraryLocator>,
    defaults: &'static [&'static str],
    resolved: Option<PathBuf>,
}

impl Default for GnuTlsConfig {
    fn default() -> Self {
        Self {
            knobs: CommonKnobs::default(),
            capability: KernelCapabilityProbe::host(),
            wget: None,
            gnutls: None,
            locator: None,
            defaults: LIBGNUTLS_PATHS,
            resolved: None,
        }
    }
}

impl GnuTlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locator(mut self, locator: LibraryLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Resolved libgnutls, available after `check()`
    pub fn gnutls_path(&self) -> Option<&Path> {
        self.resolved.as_deref()
    }
}

impl BackendConfig for GnuTlsConfig {
    fn check(&mut self) -> ConfigResult<()> {
        let wget = reference_binary(self.wget.as_deref(), DEFAULT_WGET);
        let mut deriver = LibraryDeriver::new(self.locator.as_ref());

        let resolution = resolve_artifact(
            "libgnutls",
            self.gnutls.as_deref(),
            self.knobs.no_search,
            || deriver.derive(&wget, "libgnutls.so"),
            self.defaults,
        )?;
        info!("GnuTLS: using {} ({:?})", resolution.path.display(), resolution.from);

        self.resolved = Some(resolution.path);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tlscap_core::backend::ConfigError;

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("libgnutls.so.30");
        File::create(&explicit).unwrap();

        let mut config = GnuTlsConfig {
            gnutls: Some(explicit.clone()),
            locator: Some(LibraryLocator::default()),
            defaults: &[],
            ..Default::default()
        };
        config.check().unwrap();
        assert_eq!(config.gnutls_path(), Some(explicit.as_path()));
    }

    #[test]
    fn test_no_search_skips_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libgnutls.so.30");
        File::create(&lib).unwrap();
        let locator = LibraryLocator::with_entries(
            vec![("libgnutls.so.30".into(), lib)],
            vec![],
        );

        let mut config = GnuTlsConfig {
            knobs: CommonKnobs {
                no_search: true,
                ..Default::default()
            },
            locator: Some(locator),
            defaults: &[],
            ..Default::default()
        };
        match config.check() {
            Err(ConfigError::PathNotFound { tried, .. }) => {
                assert_eq!(tried, vec!["<auto-discovery disabled>".to_string()]);
            }
            other => panic!("expected PathNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found() {
        let mut config = GnuTlsConfig {
            wget: Some(PathBuf::from("/nonexistent/wget")),
            locator: Some(LibraryLocator::default()),
            defaults: &[],
            ..Default::default()
        };
        assert!(matches!(
            config.check(),
            Err(ConfigError::PathNotFound { artifact, .. }) if artifact == "libgnutls"
        ));
    }
}
