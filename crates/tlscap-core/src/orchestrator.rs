//! Module orchestration - from requested names to running capture tasks
//!
//! For each requested module, in order: look it up, bind the global knobs
//! into its configuration, validate, initialize, and spawn its capture loop.
//! All modules share one shutdown signal. A lookup miss stops the start
//! sequence; validation and init failures only skip that module.

use crate::backend::{BackendConfig, CommonKnobs, ValidatedConfig};
use crate::events::RenderOptions;
use crate::module::{CaptureStats, ModuleContext, ModuleResult};
use crate::registry::ModuleRegistry;
use crate::shutdown;
use crate::sink::EventSink;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Global knobs injected into every module configuration
    pub knobs: CommonKnobs,

    /// Rendering settings shared by all modules
    pub render: RenderOptions,

    /// How long to wait for modules to detach after shutdown
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            knobs: CommonKnobs::default(),
            render: RenderOptions::default(),
            shutdown_timeout: Duration::from_millis(3000),
        }
    }
}

/// What happened to the requested modules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Module names in the order they were requested
    pub requested: Vec<String>,
    /// Modules whose capture loop was spawned
    pub started: Vec<String>,
    /// Modules skipped because `check()` failed
    pub failed_validation: Vec<String>,
    /// Modules skipped because `init()` failed
    pub failed_init: Vec<String>,
    /// Name (or config) lookup that stopped the start sequence
    pub stopped_at: Option<String>,
    /// Modules whose capture loop ended with an error
    pub run_errors: Vec<String>,
    /// Modules still running after the shutdown grace period
    pub aborted: Vec<String>,
}

/// Binds settings into module configs and drives the module lifecycle
pub struct Orchestrator {
    registry: ModuleRegistry,
    configs: HashMap<String, Box<dyn BackendConfig>>,
    sink: Arc<dyn EventSink>,
    config: OrchestratorConfig,
}

/// Inject the global knob set through the config's setters
fn bind_knobs(config: &mut dyn BackendConfig, knobs: &CommonKnobs) {
    config.set_pid(knobs.pid);
    config.set_uid(knobs.uid);
    config.set_debug(knobs.debug);
    config.set_hex(knobs.hex);
    config.set_no_search(knobs.no_search);
}

impl Orchestrator {
    pub fn new(registry: ModuleRegistry, sink: Arc<dyn EventSink>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            configs: HashMap::new(),
            sink,
            config,
        }
    }

    /// Provide the configuration for a module
    pub fn add_config(&mut self, module: impl Into<String>, config: Box<dyn BackendConfig>) {
        self.configs.insert(module.into(), config);
    }

    pub fn with_config(mut self, module: impl Into<String>, config: Box<dyn BackendConfig>) -> Self {
        self.add_config(module, config);
        self
    }

    /// Start the requested modules, wait for `termination`, then shut down.
    ///
    /// If no module started, returns immediately without awaiting
    /// `termination`.
    pub async fn run<F>(mut self, requested: &[&str], termination: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let mut summary = RunSummary {
            requested: requested.iter().map(|name| name.to_string()).collect(),
            ..Default::default()
        };
        let (trigger, signal) = shutdown::channel();
        let ctx = ModuleContext {
            shutdown: signal,
            sink: self.sink.clone(),
            render: self.config.render.clone(),
        };

        let mut tasks: JoinSet<(String, ModuleResult<()>, CaptureStats)> = JoinSet::new();

        for &name in requested {
            let Some(descriptor) = self.registry.get(name) else {
                warn!("Can't find module: {}", name);
                summary.stopped_at = Some(name.to_string());
                break;
            };
            let mut module = descriptor.instantiate();
            info!("Starting {} module", module.name());

            let Some(mut config) = self.configs.remove(name) else {
                warn!("Can't find configuration for module {}", name);
                summary.stopped_at = Some(name.to_string());
                break;
            };

            bind_knobs(config.as_mut(), &self.config.knobs);

            // library discovery reads ELF files and runs ldconfig
            let validated =
                match tokio::task::spawn_blocking(move || ValidatedConfig::validate(config)).await {
                    Ok(Ok(validated)) => validated,
                    Ok(Err(e)) => {
                        error!("Module {} configuration invalid: {}", name, e);
                        summary.failed_validation.push(name.to_string());
                        continue;
                    }
                    Err(e) => {
                        error!("Module {} configuration check panicked: {}", name, e);
                        summary.failed_validation.push(name.to_string());
                        continue;
                    }
                };

            if let Err(e) = module.init(ctx.clone(), validated).await {
                error!("Module {} failed to initialize: {}", name, e);
                summary.failed_init.push(name.to_string());
                continue;
            }

            let task_name = name.to_string();
            let span = info_span!("module", name = %task_name);
            tasks.spawn(
                async move {
                    let result = module.run().await;
                    if let Err(e) = &result {
                        error!("Capture loop ended with error: {}", e);
                    }
                    (task_name, result, module.stats())
                }
                .instrument(span),
            );
            summary.started.push(name.to_string());
        }

        if summary.started.is_empty() {
            info!("No modules started");
            return summary;
        }

        info!("{} module(s) running", summary.started.len());
        termination.await;

        info!("Shutting down modules...");
        trigger.trigger();

        let mut finished = Vec::new();
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, result, stats)) => {
                        info!(
                            "Module {} stopped: {} events, {} bytes, {} dropped",
                            name, stats.events_captured, stats.bytes_captured, stats.events_dropped
                        );
                        if result.is_err() {
                            summary.run_errors.push(name.clone());
                        }
                        finished.push(name);
                    }
                    Err(e) => error!("Module task failed: {}", e),
                }
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            summary.aborted = summary
                .started
                .iter()
                .filter(|name| !finished.contains(name))
                .cloned()
                .collect();
            warn!(
                "Modules did not stop within {:?}, aborting: {}",
                self.config.shutdown_timeout,
                summary.aborted.join(", ")
            );
            tasks.abort_all();
        }

        summary
    }
}
