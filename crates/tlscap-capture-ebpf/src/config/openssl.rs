//! OpenSSL / BoringSSL configuration

use super::{reference_binary, LibraryDeriver, DEFAULT_CURL};
use crate::discovery::LibraryLocator;
use std::any::Any;
use std::path::{Path, PathBuf};
use tlscap_core::backend::{resolve_artifact, BackendConfig, CommonKnobs, ConfigResult};
use tlscap_core::kernel::KernelCapabilityProbe;
use tracing::{info, warn};

/// Common libssl locations
pub static LIBSSL_PATHS: &[&str] = &[
    "/usr/lib/x86_64-linux-gnu/libssl.so.3",
    "/usr/lib/x86_64-linux-gnu/libssl.so.1.1",
    "/lib/x86_64-linux-gnu/libssl.so.3",
    "/lib/x86_64-linux-gnu/libssl.so.1.1",
    "/usr/lib/aarch64-linux-gnu/libssl.so.3",
    "/usr/lib/aarch64-linux-gnu/libssl.so.1.1",
    "/usr/lib64/libssl.so.3",
    "/usr/lib64/libssl.so.1.1",
    "/usr/lib/libssl.so.3",
    "/usr/lib/libssl.so",
];

/// Common libpthread locations
pub static LIBPTHREAD_PATHS: &[&str] = &[
    "/lib/x86_64-linux-gnu/libpthread.so.0",
    "/usr/lib/x86_64-linux-gnu/libpthread.so.0",
    "/lib/aarch64-linux-gnu/libpthread.so.0",
    "/usr/lib/aarch64-linux-gnu/libpthread.so.0",
    "/lib64/libpthread.so.0",
    "/usr/lib64/libpthread.so.0",
    "/usr/lib/libpthread.so.0",
];

/// OpenSSL backend configuration
#[derive(Debug, Clone)]
pub struct OpenSslConfig {
    pub knobs: CommonKnobs,
    pub capability: KernelCapabilityProbe,

    /// Reference binary used to find libssl (`--curl`)
    pub curl: Option<PathBuf>,
    /// Explicit libssl path (`--libssl`)
    pub libssl: Option<PathBuf>,
    /// Explicit libpthread path (`--pthread`)
    pub pthread: Option<PathBuf>,

    locator: Option<LibraryLocator>,
    libssl_defaults: &'static [&'static str],
    pthread_defaults: &'static [&'static str],
    resolved_libssl: Option<PathBuf>,
    resolved_pthread: Option<PathBuf>,
}

impl Default for OpenSslConfig {
    fn default() -> Self {
        Self {
            knobs: CommonKnobs::default(),
            capability: KernelCapabilityProbe::host(),
            curl: None,
            libssl: None,
            pthread: None,
            locator: None,
            libssl_defaults: LIBSSL_PATHS,
            pthread_defaults: LIBPTHREAD_PATHS,
            resolved_libssl: None,
            resolved_pthread: None,
        }
    }
}

impl OpenSslConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this locator instead of the host linker cache
    pub fn with_locator(mut self, locator: LibraryLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Replace the default path lists searched last
    pub fn with_defaults(
        mut self,
        libssl: &'static [&'static str],
        pthread: &'static [&'static str],
    ) -> Self {
        self.libssl_defaults = libssl;
        self.pthread_defaults = pthread;
        self
    }

    /// Resolved libssl, available after `check()`
    pub fn libssl_path(&self) -> Option<&Path> {
        self.resolved_libssl.as_deref()
    }

    /// Resolved libpthread; `None` when it could not be found
    pub fn pthread_path(&self) -> Option<&Path> {
        self.resolved_pthread.as_deref()
    }
}

impl BackendConfig for OpenSslConfig {
    fn check(&mut self) -> ConfigResult<()> {
        let curl = reference_binary(self.curl.as_deref(), DEFAULT_CURL);
        let mut deriver = LibraryDeriver::new(self.locator.as_ref());

        let libssl = resolve_artifact(
            "libssl",
            self.libssl.as_deref(),
            self.knobs.no_search,
            || deriver.derive(&curl, "libssl.so"),
            self.libssl_defaults,
        )?;
        info!("OpenSSL: using {} ({:?})", libssl.path.display(), libssl.from);

        // glibc >= 2.34 ships pthread inside libc
        let pthread = match resolve_artifact(
            "libpthread",
            self.pthread.as_deref(),
            self.knobs.no_search,
            || deriver.derive(&curl, "libpthread.so"),
            self.pthread_defaults,
        ) {
            Ok(resolution) => Some(resolution.path),
            Err(e) => {
                warn!("{}; connect probe disabled", e);
                None
            }
        };

        self.resolved_libssl = Some(libssl.path);
        self.resolved_pthread = pthread;
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

    fn isolated() -> OpenSslConfig {
        OpenSslConfig {
            curl: Some(PathBuf::from("/nonexistent/curl")),
            locator: Some(LibraryLocator::default()),
            ..Default::default()
        }
        .with_defaults(&[], &[])
    }

    #[test]
    fn test_explicit_paths() {
        let dir = tempfile::tempdir().unwrap();
        let libssl = dir.path().join("libssl.so.3");
        let pthread = dir.path().join("libpthread.so.0");
        File::create(&libssl).unwrap();
        File::create(&pthread).unwrap();

        let mut config = OpenSslConfig {
            libssl: Some(libssl.clone()),
            pthread: Some(pthread.clone()),
            ..isolated()
        };
        config.check().unwrap();

        assert_eq!(config.libssl_path(), Some(libssl.as_path()));
        assert_eq!(config.pthread_path(), Some(pthread.as_path()));
    }

    #[test]
    fn test_missing_libssl_is_fatal() {
        let mut config = isolated();
        match config.check() {
            Err(ConfigError::PathNotFound { artifact, .. }) => assert_eq!(artifact, "libssl"),
            other => panic!("expected PathNotFound, got {:?}", other),
        }
        assert_eq!(config.libssl_path(), None);
    }

    #[test]
    fn test_missing_pthread_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let libssl = dir.path().join("libssl.so.3");
        File::create(&libssl).unwrap();

        let mut config = OpenSslConfig {
            libssl: Some(libssl),
            ..isolated()
        };
        config.check().unwrap();
        assert!(config.libssl_path().is_some());
        assert_eq!(config.pthread_path(), None);
    }

    #[test]
    fn test_nonexistent_explicit_falls_through() {
        let mut config = OpenSslConfig {
            libssl: Some(PathBuf::from("/nonexistent/libssl.so.3")),
            ..isolated()
        };
        match config.check() {
            Err(ConfigError::PathNotFound { tried, .. }) => {
                assert_eq!(tried[0], "/nonexistent/libssl.so.3");
            }
            other => panic!("expected PathNotFound, got {:?}", other),
        }
    }
}
