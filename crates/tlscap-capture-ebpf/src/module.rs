//! Capture module driving one backend

use crate::backend::Backend;
use crate::types::SSL_DATA_DEFAULT_LEN;
use async_trait::async_trait;
use tlscap_core::backend::ValidatedConfig;
use tlscap_core::module::{
    CaptureModule, CaptureStats, ModuleContext, ModuleError, ModuleResult, ProbeSubsystem,
    RawRecord,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// State between a successful `init` and `run`
struct Attached {
    ctx: ModuleContext,
    records: mpsc::Receiver<RawRecord>,
    hex: bool,
    debug: bool,
}

/// One TLS backend: resolves its probe plan, attaches it, then decodes and
/// emits records until shutdown
pub struct TlsCaptureModule {
    backend: Backend,
    data_capacity: usize,
    probes: Box<dyn ProbeSubsystem>,
    attached: Option<Attached>,
    stats: CaptureStats,
}

impl TlsCaptureModule {
    pub fn new(backend: Backend, probes: Box<dyn ProbeSubsystem>) -> Self {
        Self {
            backend,
            data_capacity: SSL_DATA_DEFAULT_LEN,
            probes,
            attached: None,
            stats: CaptureStats::default(),
        }
    }

    /// Payload capacity of the fixed-layout records; must match the probe objects
    pub fn with_data_capacity(mut self, data_capacity: usize) -> Self {
        self.data_capacity = data_capacity;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn handle_record(&mut self, ctx: &ModuleContext, raw: &[u8], hex: bool, debug: bool) {
        if debug {
            debug!("Record of {} bytes", raw.len());
        }
        match self.backend.decode(raw, self.data_capacity) {
            Ok(event) => {
                self.stats.events_captured += 1;
                self.stats.bytes_captured += event.payload().len() as u64;
                ctx.sink.emit(event.as_ref(), &ctx.render, hex);
            }
            Err(e) => {
                self.stats.events_dropped += 1;
                warn!(
                    "Dropping record ({} dropped so far): {}",
                    self.stats.events_dropped, e
                );
            }
        }
    }
}

#[async_trait]
impl CaptureModule for TlsCaptureModule {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn init(&mut self, ctx: ModuleContext, config: ValidatedConfig) -> ModuleResult<()> {
        if self.attached.is_some() {
            return Err(ModuleError::InitializationFailed(format!(
                "{} is already initialized",
                self.backend
            )));
        }

        let global_var = config.get().enable_global_var();
        let plan = self.backend.probe_plan(&config, global_var)?;
        info!(
            "{}: loading {} with {} probe(s)",
            self.backend,
            plan.object,
            plan.probes.len()
        );

        let records = self.probes.attach(&plan).await?;
        let knobs = config.knobs();
        self.attached = Some(Attached {
            ctx,
            records,
            hex: knobs.hex,
            debug: knobs.debug,
        });
        Ok(())
    }

    async fn run(&mut self) -> ModuleResult<()> {
        let Attached {
            ctx,
            mut records,
            hex,
            debug,
        } = self
            .attached
            .take()
            .ok_or_else(|| ModuleError::NotInitialized(self.backend.name().to_string()))?;
        let mut shutdown = ctx.shutdown.clone();

        info!("{}: capturing", self.backend);
        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break Ok(()),
                record = records.recv() => match record {
                    Some(raw) => self.handle_record(&ctx, &raw, hex, debug),
                    None => break Err(ModuleError::ChannelClosed),
                },
            }
        };

        if let Err(e) = self.probes.detach().await {
            warn!("{}: detach failed: {}", self.backend, e);
        }
        info!(
            "{}: stopped after {} events ({} dropped)",
            self.backend, self.stats.events_captured, self.stats.events_dropped
        );
        result
    }

    fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }
}
