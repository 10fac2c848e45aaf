//! Capture module and kernel probe interfaces
//!
//! A capture module is one cryptographic backend. It is initialized with a
//! validated configuration, then `run` on its own task until the shared
//! shutdown signal fires. The kernel side (loading bytecode, attaching
//! uprobes, reading the ring buffer) sits behind [`ProbeSubsystem`].

use crate::backend::ValidatedConfig;
use crate::events::RenderOptions;
use crate::shutdown::Shutdown;
use crate::sink::EventSink;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Module lifecycle errors
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Failed to attach {program} to {symbol} in {}: {reason}", .target.display())]
    AttachFailed {
        program: String,
        symbol: String,
        target: PathBuf,
        reason: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Module {module} was given a configuration of the wrong type")]
    ConfigMismatch { module: String },

    #[error("Module {0} has not been initialized")]
    NotInitialized(String),

    #[error("Record channel closed unexpectedly")]
    ChannelClosed,

    #[error("Probe subsystem error: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ModuleResult<T> = Result<T, ModuleError>;

/// Raw record as delivered by the kernel
pub type RawRecord = Vec<u8>;

/// Where in the hooked function a probe fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Entry,
    Return,
}

/// One uprobe to attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Program name inside the bytecode object
    pub program: String,
    /// Symbol in the target to hook
    pub symbol: String,
    /// Library or binary that defines the symbol
    pub target: PathBuf,
    pub kind: ProbeKind,
}

impl ProbeSpec {
    pub fn new(
        program: impl Into<String>,
        symbol: impl Into<String>,
        target: impl Into<PathBuf>,
        kind: ProbeKind,
    ) -> Self {
        Self {
            program: program.into(),
            symbol: symbol.into(),
            target: target.into(),
            kind,
        }
    }
}

/// Everything the probe subsystem needs to instrument one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePlan {
    /// Bytecode object file name (tier already chosen)
    pub object: String,
    /// Ring buffer map carrying raw records
    pub events_map: String,
    pub probes: Vec<ProbeSpec>,
    /// Only trace this process
    pub pid: Option<u32>,
    /// Only trace this user
    pub uid: Option<u32>,
}

/// Kernel probe subsystem: loads bytecode, attaches probes, streams records
#[async_trait]
pub trait ProbeSubsystem: Send {
    /// Load and attach everything in `plan`, returning the record stream.
    async fn attach(&mut self, plan: &ProbePlan) -> ModuleResult<mpsc::Receiver<RawRecord>>;

    /// Detach probes and release all kernel-side resources
    async fn detach(&mut self) -> ModuleResult<()>;
}

/// Shared resources handed to a module at init
#[derive(Clone)]
pub struct ModuleContext {
    pub shutdown: Shutdown,
    pub sink: Arc<dyn EventSink>,
    pub render: RenderOptions,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("shutdown", &self.shutdown)
            .field("render", &self.render)
            .finish_non_exhaustive()
    }
}

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Records decoded and emitted
    pub events_captured: u64,
    /// Records dropped by the decoder
    pub events_dropped: u64,
    /// Payload bytes emitted
    pub bytes_captured: u64,
}

/// One capture backend
#[async_trait]
pub trait CaptureModule: Send {
    /// Stable name used for registry lookup and log correlation
    fn name(&self) -> &str;

    /// Resolve targets, load and attach probes.
    async fn init(&mut self, ctx: ModuleContext, config: ValidatedConfig) -> ModuleResult<()>;

    /// Capture until shutdown, then detach.
    async fn run(&mut self) -> ModuleResult<()>;

    fn stats(&self) -> CaptureStats {
        CaptureStats::default()
    }
}
