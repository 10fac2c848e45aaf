//! tlscap - TLS plaintext capture
//!
//! Attaches uprobes to TLS library read/write functions and prints what the
//! traced processes send and receive, before encryption and after decryption.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tlscap_capture_ebpf::{
    register_all, Backend, GnuTlsConfig, GoTlsConfig, ModuleSettings, NsprConfig, OpenSslConfig,
};
use tlscap_core::config::{non_empty_path, FileConfig, PathSettings, MAX_DATA_CAPACITY};
use tlscap_core::{
    BackendConfig, CapabilityPolicy, CommFilter, CommonKnobs, ConfigLoader, EventSink, JsonSink,
    KernelCapabilityProbe, ModuleRegistry, Orchestrator, OrchestratorConfig, RenderOptions,
    RunSummary, TextSink,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tlscap")]
#[command(version)]
#[command(about = "Capture SSL/TLS plaintext without a CA certificate", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TLSCAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    capture: CaptureArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Knobs shared by every capture module
#[derive(Args, Debug, Default)]
struct CaptureArgs {
    /// Only capture this pid (0 = all)
    #[arg(short, long, global = true)]
    pid: Option<u64>,

    /// Only capture this uid (0 = all)
    #[arg(short, long, global = true)]
    uid: Option<u64>,

    /// Print payloads as a hex dump
    #[arg(long, global = true)]
    hex: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Disable library auto-discovery
    #[arg(long = "nosearch", global = true)]
    no_search: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture plaintext from OpenSSL, GnuTLS, NSPR and Go TLS
    #[command(visible_aliases = ["openssl", "gnutls", "nss"])]
    Tls(TlsArgs),

    /// Show platform and eBPF capabilities
    Status,
}

#[derive(Args, Debug, Default)]
struct TlsArgs {
    /// curl binary used to find libssl
    #[arg(long)]
    curl: Option<PathBuf>,

    /// libssl.so path
    #[arg(long)]
    libssl: Option<PathBuf>,

    /// libpthread.so path
    #[arg(long)]
    pthread: Option<PathBuf>,

    /// wget binary used to find libgnutls
    #[arg(long)]
    wget: Option<PathBuf>,

    /// libgnutls.so path
    #[arg(long)]
    gnutls: Option<PathBuf>,

    /// firefox binary used to find libnspr4
    #[arg(long)]
    firefox: Option<PathBuf>,

    /// libnspr4.so path
    #[arg(long)]
    nspr: Option<PathBuf>,

    /// Go binary to capture (required for Go TLS)
    #[arg(long)]
    gobin: Option<PathBuf>,

    /// Directory of compiled probe objects
    #[arg(long)]
    bpf_dir: Option<PathBuf>,

    /// Only render payloads from this thread name (trailing `*` for a prefix)
    #[arg(long)]
    comm_filter: Option<String>,

    /// Payload capacity of the kernel records
    #[arg(long, value_parser = parse_data_capacity)]
    data_capacity: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_data_capacity(value: &str) -> Result<usize, String> {
    let capacity: usize = value.parse().map_err(|e| format!("{}", e))?;
    if capacity == 0 || capacity > MAX_DATA_CAPACITY {
        return Err(format!("must be between 1 and {}", MAX_DATA_CAPACITY));
    }
    Ok(capacity)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration file
    let file_config = load_config(cli.config.clone());

    // -v first, then --debug, then the config file
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else if cli.capture.debug {
        Level::DEBUG
    } else {
        match file_config.sensor.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Tls(args) => {
            let settings = merge_tls_config(&file_config, &cli.capture, args);
            tls_command(settings, cli.format).await
        }
        Commands::Status => status_command(&file_config).await,
    }
}

/// Load configuration from file/env, with fallback to defaults
fn load_config(cli_path: Option<PathBuf>) -> FileConfig {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            warn!("Failed to load configuration: {}, using defaults", e);
            FileConfig::default()
        }
    }
}

/// Everything the capture run needs, after merging CLI and config file
#[derive(Debug, Clone, PartialEq)]
struct TlsSettings {
    knobs: CommonKnobs,
    bpf_dir: PathBuf,
    data_capacity: usize,
    comm_filter: String,
    policy: CapabilityPolicy,
    shutdown_timeout: Duration,
    curl: Option<PathBuf>,
    libssl: Option<PathBuf>,
    pthread: Option<PathBuf>,
    wget: Option<PathBuf>,
    gnutls: Option<PathBuf>,
    firefox: Option<PathBuf>,
    nspr: Option<PathBuf>,
    gobin: Option<PathBuf>,
}

/// Merge CLI arguments with config file settings.
/// CLI arguments take precedence when explicitly provided.
fn merge_tls_config(config: &FileConfig, capture: &CaptureArgs, args: TlsArgs) -> TlsSettings {
    let paths: &PathSettings = &config.paths;
    let pick = |cli: Option<PathBuf>, file: &str| cli.or_else(|| non_empty_path(file));

    TlsSettings {
        knobs: CommonKnobs {
            pid: capture.pid.unwrap_or(config.capture.pid),
            uid: capture.uid.unwrap_or(config.capture.uid),
            hex: capture.hex || config.capture.hex,
            debug: capture.debug,
            no_search: capture.no_search || config.capture.no_search,
        },
        bpf_dir: args
            .bpf_dir
            .unwrap_or_else(|| PathBuf::from(&config.capture.bpf_dir)),
        data_capacity: args.data_capacity.unwrap_or(config.decode.data_capacity),
        comm_filter: args
            .comm_filter
            .unwrap_or_else(|| config.capture.comm_filter.clone()),
        policy: config.kernel.capability_policy,
        shutdown_timeout: Duration::from_millis(config.sensor.shutdown_timeout_ms),
        curl: pick(args.curl, &paths.curl),
        libssl: pick(args.libssl, &paths.libssl),
        pthread: pick(args.pthread, &paths.pthread),
        wget: pick(args.wget, &paths.wget),
        gnutls: pick(args.gnutls, &paths.gnutls),
        firefox: pick(args.firefox, &paths.firefox),
        nspr: pick(args.nspr, &paths.nspr),
        gobin: pick(args.gobin, &paths.gobin),
    }
}

/// One configuration per backend, keyed by module name
fn backend_configs(settings: &TlsSettings) -> Vec<(Backend, Box<dyn BackendConfig>)> {
    let capability = KernelCapabilityProbe::host().with_policy(settings.policy);

    let mut openssl = OpenSslConfig::new();
    openssl.capability = capability.clone();
    openssl.curl = settings.curl.clone();
    openssl.libssl = settings.libssl.clone();
    openssl.pthread = settings.pthread.clone();

    let mut gnutls = GnuTlsConfig::new();
    gnutls.capability = capability.clone();
    gnutls.wget = settings.wget.clone();
    gnutls.gnutls = settings.gnutls.clone();

    let mut nspr = NsprConfig::new();
    nspr.capability = capability.clone();
    nspr.firefox = settings.firefox.clone();
    nspr.nspr = settings.nspr.clone();

    let mut gotls = GoTlsConfig::new();
    gotls.capability = capability;
    gotls.path = settings.gobin.clone();

    vec![
        (Backend::OpenSsl, Box::new(openssl)),
        (Backend::GnuTls, Box::new(gnutls)),
        (Backend::Nspr, Box::new(nspr)),
        (Backend::GoTls, Box::new(gotls)),
    ]
}

async fn tls_command(settings: TlsSettings, format: OutputFormat) -> anyhow::Result<()> {
    info!("tlscap v{}", tlscap_core::VERSION);
    info!("Platform: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    let mut registry = ModuleRegistry::new();
    register_all(
        &mut registry,
        &ModuleSettings {
            bpf_dir: settings.bpf_dir.clone(),
            data_capacity: settings.data_capacity,
        },
    )?;

    let sink: Arc<dyn EventSink> = match format {
        OutputFormat::Text => Arc::new(TextSink::new()),
        OutputFormat::Json => Arc::new(JsonSink::new()),
    };
    let render = RenderOptions {
        filter: CommFilter::from_setting(&settings.comm_filter),
        color: format == OutputFormat::Text && std::io::stdout().is_terminal(),
    };

    let mut orchestrator = Orchestrator::new(
        registry,
        sink,
        OrchestratorConfig {
            knobs: settings.knobs.clone(),
            render,
            shutdown_timeout: settings.shutdown_timeout,
        },
    );
    for (backend, config) in backend_configs(&settings) {
        orchestrator.add_config(backend.name(), config);
    }

    eprintln!("tlscap pid: {}", std::process::id());

    let modules: Vec<&str> = Backend::ALL.iter().map(|b| b.name()).collect();
    let summary = orchestrator.run(&modules, termination()).await;
    log_summary(&summary);

    info!("tlscap stopped");
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    if summary.started.is_empty() {
        warn!("No module started (requested: {})", summary.requested.join(", "));
    } else {
        info!("Modules run: {}", summary.started.join(", "));
    }
    if !summary.failed_validation.is_empty() {
        info!("Invalid configuration: {}", summary.failed_validation.join(", "));
    }
    if !summary.failed_init.is_empty() {
        info!("Failed to initialize: {}", summary.failed_init.join(", "));
    }
    if let Some(name) = &summary.stopped_at {
        warn!("Start sequence stopped at {}", name);
    }
    for line in exit_warnings(summary) {
        warn!("{}", line);
    }
}

/// How modules that did not stop cleanly ended
fn exit_warnings(summary: &RunSummary) -> Vec<String> {
    let errored = summary
        .run_errors
        .iter()
        .map(|name| format!("Module {} capture loop ended with an error", name));
    let aborted = summary
        .aborted
        .iter()
        .map(|name| format!("Module {} aborted after the shutdown grace period", name));
    errored.chain(aborted).collect()
}

/// Resolves on SIGINT or SIGTERM
async fn termination() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT, stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

async fn status_command(config: &FileConfig) -> anyhow::Result<()> {
    println!();
    println!("tlscap v{}", tlscap_core::VERSION);
    println!();

    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    #[cfg(target_os = "linux")]
    {
        use tlscap_capture_ebpf::loader;

        println!();
        println!("Linux Capabilities:");
        println!("  Running as root: {}", loader::is_root());
        println!("  May load eBPF: {}", loader::can_load_bpf());
        println!("  eBPF supported: {}", loader::check_ebpf_available());
        println!("  BTF available: {}", loader::has_btf());
    }

    let probe = KernelCapabilityProbe::host().with_policy(config.kernel.capability_policy);
    match probe.host_version() {
        Ok(version) => println!("  Kernel: {}", version),
        Err(e) => println!("  Kernel: unknown ({})", e),
    }
    let global_var = probe.enable_global_var();
    println!(
        "  Probe tier: {}",
        if global_var { "core" } else { "noncore" }
    );

    let bpf_dir = PathBuf::from(&config.capture.bpf_dir);
    println!();
    println!("Probe objects ({}):", bpf_dir.display());
    for backend in Backend::ALL {
        let object = backend.object_name(global_var);
        let found = bpf_dir.join(&object).is_file();
        println!(
            "  {:<8} {} {}",
            backend.name(),
            object,
            if found { "found" } else { "missing" }
        );
    }
    println!();

    Ok(())
}
