//! The four TLS library families and what each one instruments

use crate::config::{GnuTlsConfig, GoTlsConfig, NsprConfig, OpenSslConfig};
use crate::events::{GoTlsEvent, SslDataEvent};
use crate::types::EVENTS_MAP;
use std::fmt;
use std::path::Path;
use tlscap_core::backend::ValidatedConfig;
use tlscap_core::events::{CaptureEvent, DecodeError};
use tlscap_core::module::{ModuleError, ModuleResult, ProbeKind, ProbePlan, ProbeSpec};

/// Go function that writes plaintext records
pub const GOTLS_WRITE_SYMBOL: &str = "crypto/tls.(*Conn).writeRecordLocked";

/// Capture backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    OpenSsl,
    GnuTls,
    Nspr,
    GoTls,
}

impl Backend {
    /// Every backend, in start order
    pub const ALL: [Backend; 4] = [Self::OpenSsl, Self::GnuTls, Self::Nspr, Self::GoTls];

    /// Module name used for registry lookup
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenSsl => "openssl",
            Self::GnuTls => "gnutls",
            Self::Nspr => "nspr",
            Self::GoTls => "gotls",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Probe object for the chosen tier
    pub fn object_name(&self, global_var: bool) -> String {
        let tier = if global_var { "core" } else { "noncore" };
        format!("{}_kern_{}.o", self.name(), tier)
    }

    /// Build the probe plan from a validated configuration of this backend
    pub fn probe_plan(&self, config: &ValidatedConfig, global_var: bool) -> ModuleResult<ProbePlan> {
        let mismatch = || ModuleError::ConfigMismatch {
            module: self.name().to_string(),
        };
        let unresolved = |what: &str| {
            ModuleError::InitializationFailed(format!("{} was not resolved", what))
        };

        let probes = match self {
            Self::OpenSsl => {
                let c = config.downcast_ref::<OpenSslConfig>().ok_or_else(mismatch)?;
                let libssl = c.libssl_path().ok_or_else(|| unresolved("libssl"))?;
                openssl_probes(libssl, c.pthread_path())
            }
            Self::GnuTls => {
                let c = config.downcast_ref::<GnuTlsConfig>().ok_or_else(mismatch)?;
                gnutls_probes(c.gnutls_path().ok_or_else(|| unresolved("libgnutls"))?)
            }
            Self::Nspr => {
                let c = config.downcast_ref::<NsprConfig>().ok_or_else(mismatch)?;
                nspr_probes(c.nspr_path().ok_or_else(|| unresolved("libnspr4"))?)
            }
            Self::GoTls => {
                let c = config.downcast_ref::<GoTlsConfig>().ok_or_else(mismatch)?;
                gotls_probes(c.binary_path().ok_or_else(|| unresolved("go binary"))?)
            }
        };

        let knobs = config.knobs();
        Ok(ProbePlan {
            object: self.object_name(global_var),
            events_map: EVENTS_MAP.to_string(),
            probes,
            pid: filter_id("pid", knobs.pid)?,
            uid: filter_id("uid", knobs.uid)?,
        })
    }

    /// Decode one raw record into a fresh event owned by the caller
    pub fn decode(&self, raw: &[u8], data_capacity: usize) -> Result<Box<dyn CaptureEvent>, DecodeError> {
        match self {
            Self::GoTls => Ok(Box::new(GoTlsEvent::decode(self.name(), raw)?)),
            _ => Ok(Box::new(SslDataEvent::decode(self.name(), raw, data_capacity)?)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 0 means no filter
fn filter_id(what: &str, value: u64) -> ModuleResult<Option<u32>> {
    if value == 0 {
        return Ok(None);
    }
    u32::try_from(value)
        .map(Some)
        .map_err(|_| ModuleError::InitializationFailed(format!("{} {} out of range", what, value)))
}

/// Entry and return probes on each symbol
fn entry_and_return(target: &Path, symbols: &[&str]) -> Vec<ProbeSpec> {
    symbols
        .iter()
        .flat_map(|symbol| {
            [
                ProbeSpec::new(format!("uprobe_{}", symbol), *symbol, target, ProbeKind::Entry),
                ProbeSpec::new(format!("uretprobe_{}", symbol), *symbol, target, ProbeKind::Return),
            ]
        })
        .collect()
}

fn openssl_probes(libssl: &Path, pthread: Option<&Path>) -> Vec<ProbeSpec> {
    let mut probes = entry_and_return(libssl, &["SSL_write", "SSL_read"]);
    if let Some(pthread) = pthread {
        probes.push(ProbeSpec::new("probe_connect", "connect", pthread, ProbeKind::Entry));
    }
    probes
}

fn gnutls_probes(lib: &Path) -> Vec<ProbeSpec> {
    entry_and_return(lib, &["gnutls_record_send", "gnutls_record_recv"])
}

fn nspr_probes(lib: &Path) -> Vec<ProbeSpec> {
    entry_and_return(lib, &["PR_Write", "PR_Send", "PR_Read", "PR_Recv"])
}

fn gotls_probes(binary: &Path) -> Vec<ProbeSpec> {
    vec![ProbeSpec::new(
        "gotls_write_register",
        GOTLS_WRITE_SYMBOL,
        binary,
        ProbeKind::Entry,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;
    use tlscap_core::backend::CommonKnobs;
    use tlscap_core::kernel::{KernelCapabilityProbe, KernelVersion};

    fn validated_openssl(pid: u64, with_pthread: bool) -> (tempfile::TempDir, ValidatedConfig) {
        let dir = tempfile::tempdir().unwrap();
        let libssl = dir.path().join("libssl.so.3");
        File::create(&libssl).unwrap();
        let pthread = if with_pthread {
            let path = dir.path().join("libpthread.so.0");
            File::create(&path).unwrap();
            Some(path)
        } else {
            None
        };

        let mut config = OpenSslConfig::new().with_defaults(&[], &[]);
        config.libssl = Some(libssl);
        config.pthread = pthread;
        config.curl = Some(PathBuf::from("/nonexistent/curl"));
        config.knobs = CommonKnobs {
            pid,
            no_search: true,
            ..Default::default()
        };
        config.capability = KernelCapabilityProbe::fixed(KernelVersion::new(6, 1, 0));
        let validated = ValidatedConfig::validate(Box::new(config)).unwrap();
        (dir, validated)
    }

    #[test]
    fn test_names_round_trip() {
        for backend in Backend::ALL {
            assert_eq!(Backend::from_name(backend.name()), Some(backend));
        }
        assert_eq!(Backend::from_name("boringssl"), None);
        assert_eq!(Backend::GoTls.to_string(), "gotls");
    }

    #[test]
    fn test_object_name_by_tier() {
        assert_eq!(Backend::OpenSsl.object_name(true), "openssl_kern_core.o");
        assert_eq!(Backend::Nspr.object_name(false), "nspr_kern_noncore.o");
    }

    #[test]
    fn test_openssl_plan() {
        let (_dir, config) = validated_openssl(4242, true);
        let plan = Backend::OpenSsl.probe_plan(&config, true).unwrap();

        assert_eq!(plan.object, "openssl_kern_core.o");
        assert_eq!(plan.events_map, EVENTS_MAP);
        assert_eq!(plan.pid, Some(4242));
        assert_eq!(plan.uid, None);
        let programs: Vec<&str> = plan.probes.iter().map(|p| p.program.as_str()).collect();
        assert_eq!(
            programs,
            vec![
                "uprobe_SSL_write",
                "uretprobe_SSL_write",
                "uprobe_SSL_read",
                "uretprobe_SSL_read",
                "probe_connect"
            ]
        );
    }

    #[test]
    fn test_openssl_plan_without_pthread() {
        let (_dir, config) = validated_openssl(0, false);
        let openssl = config.downcast_ref::<OpenSslConfig>().unwrap();
        assert_eq!(openssl.pthread_path(), None);

        let plan = Backend::OpenSsl.probe_plan(&config, false).unwrap();
        assert_eq!(plan.object, "openssl_kern_noncore.o");
        assert_eq!(plan.pid, None);
        assert!(plan.probes.iter().all(|p| p.symbol != "connect"));
    }

    #[test]
    fn test_config_mismatch() {
        let (_dir, config) = validated_openssl(0, false);
        assert!(matches!(
            Backend::GnuTls.probe_plan(&config, true),
            Err(ModuleError::ConfigMismatch { module }) if module == "gnutls"
        ));
    }

    #[test]
    fn test_pid_out_of_range() {
        let (_dir, config) = validated_openssl(u64::from(u32::MAX) + 1, false);
        assert!(matches!(
            Backend::OpenSsl.probe_plan(&config, true),
            Err(ModuleError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_gotls_and_nspr_probes() {
        let probes = gotls_probes(Path::new("/srv/app"));
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].symbol, GOTLS_WRITE_SYMBOL);
        assert_eq!(probes[0].kind, ProbeKind::Entry);

        let probes = nspr_probes(Path::new("/usr/lib/libnspr4.so"));
        assert_eq!(probes.len(), 8);
        assert_eq!(probes[1].kind, ProbeKind::Return);
        assert_eq!(probes[1].symbol, "PR_Write");
    }

    #[test]
    fn test_decode_dispatch() {
        assert!(matches!(
            Backend::GoTls.decode(&[0u8; 10], 4096),
            Err(DecodeError::ShortRead { needed: 4132, .. })
        ));
        assert!(matches!(
            Backend::GnuTls.decode(&[0u8; 10], 4096),
            Err(DecodeError::ShortRead { needed: 4140, .. })
        ));

        let event = Backend::Nspr.decode(&[0u8; 4140], 4096).unwrap();
        assert_eq!(event.module(), "nspr");
        assert!(event.payload().is_empty());
    }
}
