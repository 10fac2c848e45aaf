//! NSS / NSPR configuration

use super::{reference_binary, LibraryDeriver, DEFAULT_FIREFOX};
use crate::discovery::LibraryLocator;
use std::any::Any;
use std::path::{Path, PathBuf};
use tlscap_core::backend::{resolve_artifact, BackendConfig, CommonKnobs, ConfigResult};
use tlscap_core::kernel::KernelCapabilityProbe;
use tracing::info;

/// Common libnspr4 locations
pub static LIBNSPR_PATHS: &[&str] = &[
    "/usr/lib/firefox/libnspr4.so",
    "/lib/x86_64-linux-gnu/libnspr4.so",
    "/usr/lib/x86_64-linux-gnu/libnspr4.so",
    "/usr/lib/aarch64-linux-gnu/libnspr4.so",
    "/usr/lib64/libnspr4.so",
    "/usr/lib/libnspr4.so",
];

/// NSPR backend configuration
#[derive(Debug, Clone)]
pub struct NsprConfig {
    pub knobs: CommonKnobs,
    pub capability: KernelCapabilityProbe,

    /// Reference binary used to find libnspr4 (`--firefox`)
    pub firefox: Option<PathBuf>,
    /// Explicit libnspr4 path (`--nspr`)
    pub nspr: Option<PathBuf>,

    locator: Option<LibraryLocator>,
    defaults: &'static [&'static str],
    resolved: Option<PathBuf>,
}

impl Default for NsprConfig {
    fn default() -> Self {
        Self {
            knobs: CommonKnobs::default(),
            capability: KernelCapabilityProbe::host(),
            firefox: None,
            nspr: None,
            locator: None,
            defaults: LIBNSPR_PATHS,
            resolved: None,
        }
    }
}

impl NsprConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locator(mut self, locator: LibraryLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Resolved libnspr4, available after `check()`
    pub fn nspr_path(&self) -> Option<&Path> {
        self.resolved.as_deref()
    }
}

impl BackendConfig for NsprConfig {
    fn check(&mut self) -> ConfigResult<()> {
        let firefox = reference_binary(self.firefox.as_deref(), DEFAULT_FIREFOX);
        let mut deriver = LibraryDeriver::new(self.locator.as_ref());

        let resolution = resolve_artifact(
            "libnspr4",
            self.nspr.as_deref(),
            self.knobs.no_search,
            || deriver.derive(&firefox, "libnspr4.so"),
            self.defaults,
        )?;
        info!("NSPR: using {} ({:?})", resolution.path.display(), resolution.from);

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
