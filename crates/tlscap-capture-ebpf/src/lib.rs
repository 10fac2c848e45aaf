//! eBPF uprobe capture backends for tlscap
//!
//! One [`TlsCaptureModule`] per TLS library family. Probe objects are loaded
//! at runtime from a directory of compiled `<backend>_kern_{core,noncore}.o`
//! files; records come back through a ring buffer.

pub mod backend;
pub mod config;
pub mod discovery;
pub mod events;
pub mod module;
pub mod types;

#[cfg(target_os = "linux")]
pub mod loader;

pub use backend::Backend;
pub use config::{GnuTlsConfig, GoTlsConfig, NsprConfig, OpenSslConfig};
pub use module::TlsCaptureModule;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tlscap_core::module::{ModuleError, ModuleResult, ProbePlan, ProbeSubsystem, RawRecord};
use tlscap_core::registry::{ModuleRegistry, RegistryError};
use tokio::sync::mpsc;

/// Settings every capture module is constructed with
#[derive(Debug, Clone)]
pub struct ModuleSettings {
    /// Directory holding the compiled probe objects
    pub bpf_dir: PathBuf,
    /// Payload capacity of the fixed-layout records
    pub data_capacity: usize,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            bpf_dir: PathBuf::from("/usr/share/tlscap/bpf"),
            data_capacity: types::SSL_DATA_DEFAULT_LEN,
        }
    }
}

/// Stand-in on platforms without eBPF
#[derive(Debug, Default)]
pub struct UnsupportedProbes;

#[async_trait]
impl ProbeSubsystem for UnsupportedProbes {
    async fn attach(&mut self, _plan: &ProbePlan) -> ModuleResult<mpsc::Receiver<RawRecord>> {
        Err(ModuleError::NotSupported(
            "eBPF capture is only available on Linux".into(),
        ))
    }

    async fn detach(&mut self) -> ModuleResult<()> {
        Ok(())
    }
}

/// Probe subsystem for this platform
pub fn probe_subsystem(bpf_dir: &Path) -> Box<dyn ProbeSubsystem> {
    #[cfg(target_os = "linux")]
    {
        Box::new(loader::AyaProbes::new(bpf_dir))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = bpf_dir;
        Box::new(UnsupportedProbes)
    }
}

/// Register every backend under its module name
pub fn register_all(
    registry: &mut ModuleRegistry,
    settings: &ModuleSettings,
) -> Result<(), RegistryError> {
    for backend in Backend::ALL {
        let settings = settings.clone();
        registry.register(backend.name(), move || {
            Box::new(
                TlsCaptureModule::new(backend, probe_subsystem(&settings.bpf_dir))
                    .with_data_capacity(settings.data_capacity),
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let mut registry = ModuleRegistry::new();
        register_all(&mut registry, &ModuleSettings::default()).unwrap();

        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["gnutls", "gotls", "nspr", "openssl"]
        );
        for backend in Backend::ALL {
            assert_eq!(registry.instantiate(backend.name()).unwrap().name(), backend.name());
        }

        assert!(matches!(
            register_all(&mut registry, &ModuleSettings::default()),
            Err(RegistryError::Duplicate(name)) if name == "openssl"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_probes() {
        let plan = ProbePlan {
            object: "openssl_kern_core.o".into(),
            events_map: types::EVENTS_MAP.into(),
            probes: vec![],
            pid: None,
            uid: None,
        };
        let mut probes = UnsupportedProbes;
        assert!(matches!(
            probes.attach(&plan).await,
            Err(ModuleError::NotSupported(_))
        ));
        probes.detach().await.unwrap();
    }
}
