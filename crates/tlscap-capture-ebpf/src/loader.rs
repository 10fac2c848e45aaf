//! eBPF program loader and probe subsystem backed by aya

#![cfg(target_os = "linux")]

use async_trait::async_trait;
use aya::maps::{MapData, RingBuf};
use aya::programs::UProbe;
use aya::{Ebpf, EbpfLoader};
use std::path::{Path, PathBuf};
use tlscap_core::module::{ModuleError, ModuleResult, ProbePlan, ProbeSubsystem, RawRecord};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Records buffered between the ring buffer and the capture loop
const RECORD_CHANNEL_CAPACITY: usize = 1024;

/// Global the core-tier objects read for uid filtering
const TARGET_UID_GLOBAL: &str = "target_uid";

/// Check if eBPF is available on this system
pub fn check_ebpf_available() -> bool {
    if !Path::new("/sys/fs/bpf").exists() {
        warn!("BPF filesystem not mounted at /sys/fs/bpf");
        return false;
    }
    true
}

/// Whether the kernel exposes BTF type information
pub fn has_btf() -> bool {
    Path::new("/sys/kernel/btf/vmlinux").exists()
}

const CAP_SYS_ADMIN: u32 = 21;
const CAP_PERFMON: u32 = 38;
const CAP_BPF: u32 = 39;

/// Check if running as root
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Whether this process may load and attach eBPF programs
pub fn can_load_bpf() -> bool {
    if is_root() {
        return true;
    }
    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => effective_caps(&status).is_some_and(caps_allow_bpf),
        Err(e) => {
            debug!("Failed to read /proc/self/status: {}", e);
            false
        }
    }
}

/// The `CapEff` mask from a `/proc/<pid>/status` document
fn effective_caps(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|mask| u64::from_str_radix(mask.trim(), 16).ok())
}

/// CAP_BPF with CAP_PERFMON, or CAP_SYS_ADMIN on kernels predating them
fn caps_allow_bpf(mask: u64) -> bool {
    let has = |cap: u32| mask & (1u64 << cap) != 0;
    (has(CAP_BPF) && has(CAP_PERFMON)) || has(CAP_SYS_ADMIN)
}

/// Bump memlock rlimit for eBPF (required on older kernels)
fn bump_memlock_rlimit() -> bool {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to remove limit on locked memory (ret={})", ret);
        false
    } else {
        true
    }
}

/// Loads probe objects from a directory and attaches uprobes
pub struct AyaProbes {
    bpf_dir: PathBuf,
    ebpf: Option<Ebpf>,
    pump: Option<JoinHandle<()>>,
}

impl AyaProbes {
    pub fn new(bpf_dir: impl Into<PathBuf>) -> Self {
        Self {
            bpf_dir: bpf_dir.into(),
            ebpf: None,
            pump: None,
        }
    }

    fn load(&self, object: &Path, uid: Option<u32>) -> ModuleResult<Ebpf> {
        let uid = uid.unwrap_or(0);
        let mut loader = EbpfLoader::new();
        loader.set_global(TARGET_UID_GLOBAL, &uid, false);
        loader.load_file(object).map_err(|e| {
            ModuleError::InitializationFailed(format!(
                "Failed to load {}: {}",
                object.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl ProbeSubsystem for AyaProbes {
    async fn attach(&mut self, plan: &ProbePlan) -> ModuleResult<mpsc::Receiver<RawRecord>> {
        if self.ebpf.is_some() {
            return Err(ModuleError::InitializationFailed(
                "probes already attached".into(),
            ));
        }
        if !can_load_bpf() {
            return Err(ModuleError::PermissionDenied(
                "loading eBPF programs requires root (or CAP_BPF and CAP_PERFMON)".into(),
            ));
        }
        bump_memlock_rlimit();

        let object = self.bpf_dir.join(&plan.object);
        if !object.is_file() {
            return Err(ModuleError::NotSupported(format!(
                "probe object {} not found",
                object.display()
            )));
        }

        info!("Loading eBPF object {}", object.display());
        let mut ebpf = self.load(&object, plan.uid)?;

        let pid = plan
            .pid
            .map(|pid| {
                i32::try_from(pid).map_err(|_| {
                    ModuleError::InitializationFailed(format!("pid {} out of range", pid))
                })
            })
            .transpose()?;

        for probe in &plan.probes {
            let program: &mut UProbe = ebpf
                .program_mut(&probe.program)
                .ok_or_else(|| {
                    ModuleError::InitializationFailed(format!(
                        "{} program not found",
                        probe.program
                    ))
                })?
                .try_into()
                .map_err(|e| {
                    ModuleError::InitializationFailed(format!(
                        "{} is not a uprobe program: {}",
                        probe.program, e
                    ))
                })?;
            program.load().map_err(|e| {
                ModuleError::InitializationFailed(format!(
                    "Failed to load {}: {}",
                    probe.program, e
                ))
            })?;
            program
                .attach(Some(probe.symbol.as_str()), 0, &probe.target, pid)
                .map_err(|e| ModuleError::AttachFailed {
                    program: probe.program.clone(),
                    symbol: probe.symbol.clone(),
                    target: probe.target.clone(),
                    reason: e.to_string(),
                })?;
            info!(
                "Attached {} ({:?}) to {} in {}",
                probe.program,
                probe.kind,
                probe.symbol,
                probe.target.display()
            );
        }

        let map = ebpf.take_map(&plan.events_map).ok_or_else(|| {
            ModuleError::InitializationFailed(format!("{} map not found", plan.events_map))
        })?;
        let ring_buf = RingBuf::try_from(map).map_err(|e| {
            ModuleError::InitializationFailed(format!("Failed to create ring buffer: {}", e))
        })?;
        let async_fd = AsyncFd::new(ring_buf)?;

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        self.pump = Some(tokio::spawn(pump_records(async_fd, tx)));
        self.ebpf = Some(ebpf);
        Ok(rx)
    }

    async fn detach(&mut self) -> ModuleResult<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        // dropping the object detaches every link and closes the maps
        if self.ebpf.take().is_some() {
            info!("Detached probes");
        }
        Ok(())
    }
}

/// Copy ring buffer records into the channel until either side closes
async fn pump_records(mut async_fd: AsyncFd<RingBuf<MapData>>, tx: mpsc::Sender<RawRecord>) {
    loop {
        let batch = {
            let mut guard = match async_fd.readable_mut().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("RingBuf async fd error: {}", e);
                    break;
                }
            };
            let ring = guard.get_inner_mut();
            let mut batch = Vec::new();
            while let Some(item) = ring.next() {
                batch.push(item.to_vec());
            }
            guard.clear_ready();
            batch
        };

        for record in batch {
            if tx.send(record).await.is_err() {
                debug!("Record channel closed, stopping ring buffer pump");
                return;
            }
        }
    }
}
