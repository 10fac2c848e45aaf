//! Per-backend configurations
//!
//! Each backend resolves its own libraries in `check()`; the orchestrator
//! only injects the common knobs through [`BackendConfig`].

mod gnutls;
mod gotls;
mod nspr;
mod openssl;

pub use gnutls::GnuTlsConfig;
pub use gotls::GoTlsConfig;
pub use nspr::NsprConfig;
pub use openssl::OpenSslConfig;

use crate::discovery::LibraryLocator;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CURL: &str = "/usr/bin/curl";
pub const DEFAULT_WGET: &str = "/usr/bin/wget";
pub const DEFAULT_FIREFOX: &str = "/usr/lib/firefox/firefox";

/// The reference binary to derive libraries from
fn reference_binary(explicit: Option<&Path>, default: &str) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Library derivation for one `check()`: the injected locator, or the host
/// linker cache, read at most once
struct LibraryDeriver<'a> {
    injected: Option<&'a LibraryLocator>,
    host: Option<LibraryLocator>,
}

impl<'a> LibraryDeriver<'a> {
    fn new(injected: Option<&'a LibraryLocator>) -> Self {
        Self {
            injected,
            host: None,
        }
    }

    /// Derive the `prefix` library from `binary`
    fn derive(&mut self, binary: &Path, prefix: &str) -> Option<PathBuf> {
        if !binary.is_file() {
            debug!("Reference binary {} not found", binary.display());
            return None;
        }
        let locator = match self.injected {
            Some(locator) => locator,
            None => self.host.get_or_insert_with(LibraryLocator::host),
        };
        locator.derive_from_binary(binary, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_binary_default() {
        assert_eq!(reference_binary(None, DEFAULT_CURL), PathBuf::from("/usr/bin/curl"));
        assert_eq!(
            reference_binary(Some(Path::new("/opt/curl")), DEFAULT_CURL),
            PathBuf::from("/opt/curl")
        );
    }

    #[test]
    fn test_derive_missing_binary() {
        let locator = LibraryLocator::default();
        let mut deriver = LibraryDeriver::new(Some(&locator));
        assert_eq!(deriver.derive(Path::new("/nonexistent/curl"), "libssl.so"), None);
    }

    #[test]
    fn test_host_cache_not_read_without_reference_binary() {
        let mut deriver = LibraryDeriver::new(None);
        assert_eq!(deriver.derive(Path::new("/nonexistent/curl"), "libssl.so"), None);
        assert_eq!(deriver.derive(Path::new("/nonexistent/curl"), "libpthread.so"), None);
        assert!(deriver.host.is_none());
    }

    #[test]
    fn test_injected_locator_skips_host_cache() {
        let exe = std::env::current_exe().unwrap();
        let locator = LibraryLocator::default();
        let mut deriver = LibraryDeriver::new(Some(&locator));
        assert_eq!(deriver.derive(&exe, "libnotthere.so"), None);
        assert!(deriver.host.is_none());
    }
}
