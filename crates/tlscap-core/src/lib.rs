//! tlscap core - module lifecycle, backend configuration, and event decoding
//!
//! This crate holds everything that does not touch the kernel:
//!
//! - **Backend**: configuration capability and library path resolution
//! - **Kernel**: version probe deciding the probe program tier
//! - **Events**: record decoding helpers and rendering
//! - **Orchestrator**: registry lookup, validation, init and shutdown of modules

pub mod backend;
pub mod config;
pub mod events;
pub mod filter;
pub mod kernel;
pub mod module;
pub mod orchestrator;
pub mod registry;
pub mod shutdown;
pub mod sink;

// Re-export commonly used types
pub use backend::{
    resolve_artifact, BackendConfig, CommonKnobs, ConfigError, ConfigResult, Resolution,
    ResolvedFrom, ValidatedConfig,
};
pub use config::{ConfigLoader, FileConfig};
pub use events::{CaptureEvent, Comm, DecodeError, Direction, EventRecord, RenderOptions};
pub use filter::CommFilter;
pub use kernel::{CapabilityPolicy, KernelCapabilityProbe, KernelVersion};
pub use module::{
    CaptureModule, CaptureStats, ModuleContext, ModuleError, ModuleResult, ProbeKind, ProbePlan,
    ProbeSpec, ProbeSubsystem, RawRecord,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunSummary};
pub use registry::{ModuleRegistry, RegistryError};
pub use sink::{EventSink, JsonSink, MemorySink, TextSink};

/// tlscap version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
