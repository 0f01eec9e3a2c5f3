//! container-gate: Domain-to-container request gate daemon
//!
//! This is the main entry point for the gate service. The browser host
//! connects over the IPC socket, forwards intercepted requests and relays
//! user intents.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./container-gate
//!
//! # Run with custom configuration
//! ./container-gate -c /path/to/config.json
//!
//! # Run with environment overrides
//! CONTAINER_GATE_LOG_LEVEL=debug ./container-gate
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use container_gate::config::{apply_env_overrides, load_config_with_env, Config};
use container_gate::error::ConfigError;
use container_gate::gate::RequestGate;
use container_gate::ipc::{IpcHandler, IpcServer};
use container_gate::partition::{ContainerProvider, MemoryProvider, TempPartitionManager};
use container_gate::rules::{DomainWalker, RuleEngine};
use container_gate::store::{JsonFileStore, PersistedState, StateStore};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/container-gate/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("container-gate v{}", container_gate::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"container-gate v{}

Domain-to-container rule engine and request gate.

USAGE:
    container-gate [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/container-gate/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    CONTAINER_GATE_LOG_LEVEL          Override log level (trace, debug, info, warn, error)
    CONTAINER_GATE_IPC_SOCKET         Override IPC socket path
    CONTAINER_GATE_STATE_PATH         Override state file path
    CONTAINER_GATE_DEFAULT_PARTITION  Override default cookie store id

If the configuration file does not exist, built-in defaults are used.

EXAMPLE:
    container-gate -g -c ./gate.json
    container-gate -c ./gate.json
"#,
        container_gate::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "tokio=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Load configuration, falling back to defaults when the file is absent
fn load_configuration(args: &Args) -> Result<Config> {
    match load_config_with_env(&args.config_path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound { .. }) => {
            let mut config = Config::default();
            apply_env_overrides(&mut config)?;
            Ok(config)
        }
        Err(e) => Err(anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )),
    }
}

/// Load persisted state.
///
/// An unreadable state file is left untouched and persistence is disabled
/// for this run.
fn load_state(config: &Config) -> (PersistedState, Option<Arc<dyn StateStore>>) {
    if !config.store.persist {
        info!("State persistence disabled");
        return (PersistedState::default(), None);
    }

    let store = JsonFileStore::new(&config.store.state_path);
    match store.load() {
        Ok(state) => {
            info!(
                "Loaded state from {:?}: {} rules, {} temporary containers",
                store.path(),
                state.rules.rule_count(),
                state.temp_containers.len()
            );
            (state, Some(Arc::new(store)))
        }
        Err(e) => {
            warn!(
                "Failed to load state from {:?}, starting empty without persistence: {}",
                store.path(),
                e
            );
            (PersistedState::default(), None)
        }
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        container_gate::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_configuration(&args)?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("container-gate v{}", container_gate::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    // Seed the container provider
    let memory = Arc::new(MemoryProvider::new());
    for seed in &config.containers {
        memory.insert(seed.clone().into());
    }
    let provider: Arc<dyn ContainerProvider> = memory;

    let (persisted, store) = load_state(&config);

    // Rule engine over the persisted rules
    let walker = DomainWalker::with_suffixes(&config.gate.extra_public_suffixes);
    let rule_engine = Arc::new(RuleEngine::with_walker(persisted.rules, walker));

    // Temporary partitions from a previous run have no tabs left
    let temps = Arc::new(TempPartitionManager::new(
        Arc::clone(&provider),
        config.gate.temp_name_prefix.clone(),
    ));
    for orphan in temps.restore(&persisted.temp_containers) {
        rule_engine.update(|state| state.forget_partition(&orphan));
        if let Err(e) = provider.remove(&orphan).await {
            warn!(partition = %orphan, "Failed to remove stale temporary container: {}", e);
        }
    }

    let gate = Arc::new(RequestGate::new(&config.gate, Arc::clone(&rule_engine), temps));

    let mut handler = IpcHandler::new(Arc::clone(&gate), Arc::clone(&provider));
    if let Some(store) = store {
        handler = handler.with_store(store);
    }
    let ipc_handler = Arc::new(handler);

    match ipc_handler.sync_owner_labels().await {
        Ok(0) => {}
        Ok(n) => info!("Refreshed {} owner labels", n),
        Err(e) => warn!("Failed to refresh owner labels: {}", e),
    }
    ipc_handler.persist();

    let stats = rule_engine.snapshot().stats();
    info!(
        "Rule engine ready: {} rules, {} exclusion lists, {} blend lists (version {})",
        stats.domain_rules, stats.exclusions, stats.blends, stats.version
    );

    let ipc_server = IpcServer::new(config.ipc.clone(), Arc::clone(&ipc_handler));
    let ipc_shutdown = ipc_server.shutdown_sender();

    // Spawn IPC server
    let mut ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let server_finished = tokio::select! {
        _ = &mut ipc_handle => {
            info!("IPC server stopped");
            true
        }
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            false
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            false
        }
    };

    // Graceful shutdown
    info!("Shutting down...");

    if !server_finished {
        let _ = ipc_shutdown.send(());
        if tokio::time::timeout(std::time::Duration::from_secs(5), ipc_handle)
            .await
            .is_err()
        {
            warn!("IPC server did not stop within 5s");
        }
    }

    ipc_handler.persist();

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
