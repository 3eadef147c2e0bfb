//! fraudsift daemon
//!
//! Wires the pieces together: configuration, logging, the plugin manager,
//! the queue backend, the processing orchestrator, and the admin HTTP
//! surface, then runs until a shutdown signal arrives.

use clap::Parser;
use fraudsift::api::{serve, ApiState};
use fraudsift::core::config::CoreConfig;
use fraudsift::core::error_handling::log_error_with_context;
use fraudsift::core::logging::init_logging;
use fraudsift::core::services::ServiceRegistry;
use fraudsift::core::shutdown::ShutdownCoordinator;
use fraudsift::notifications::api::{Event, SystemEvent, SystemEventType};
use fraudsift::pipeline::{OrchestratorConfig, ProcessingOrchestrator, SourcePump};
use fraudsift::queue::api::build_queue;
use fraudsift::scoring::RiskScoringOrchestrator;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "fraudsift",
    version,
    about = "Plugin-based anti-fraud processing core for real-estate listings"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Plugin directory to scan for manifests (overrides config)
    #[arg(long, value_name = "DIR")]
    plugin_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error, off
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: json or text
    #[arg(long)]
    log_format: Option<String>,

    /// Also append logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<String>,

    /// Leave loaded plugins disabled; enable them via the admin API
    #[arg(long)]
    no_enable: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match CoreConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fraudsift: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = &args.plugin_dir {
        config.plugins.directory = dir.clone();
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    let log_format = args.log_format.as_deref().unwrap_or(&config.log.format);
    let log_file = args.log_file.as_deref().or(config.log.file.as_deref());
    if let Err(e) = init_logging(Some(log_level), Some(log_format), log_file) {
        eprintln!("fraudsift: failed to initialise logging: {}", e);
        std::process::exit(1);
    }

    let pid = std::process::id();
    log::info!(
        "fraudsift {} starting, pid={}, api_version={}",
        fraudsift::core::version::core_version(),
        pid,
        fraudsift::get_core_api_version()
    );

    // Shutdown coordination must be live before anything long-running starts
    let (coordinator, mut shutdown_rx) = ShutdownCoordinator::new();
    coordinator.install_signal_handlers();

    let services = ServiceRegistry::with_plugin_config(
        fraudsift::get_core_api_version(),
        fraudsift::plugin::api::PluginManagerConfig {
            shutdown_deadline: Duration::from_secs(config.plugins.shutdown_deadline_secs),
            hook_timeout: Duration::from_secs(config.plugins.hook_timeout_secs),
        },
    );

    // Discover and load plugins
    {
        let mut manager = services.plugin_manager().await;
        let report = manager.load_from_directory(&config.plugins.directory).await;
        for failure in &report.failed {
            log::warn!(
                "Plugin load failure ({}): {}",
                failure
                    .plugin_id
                    .as_deref()
                    .unwrap_or("unknown"),
                failure.error
            );
        }
        if !args.no_enable {
            for plugin_id in &report.loaded {
                if let Err(e) = manager.enable(plugin_id).await {
                    log::warn!("Could not enable plugin '{}': {}", plugin_id, e);
                }
            }
        }
        log::info!(
            "{} plugin(s) loaded from {}",
            report.loaded.len(),
            config.plugins.directory.display()
        );
    }

    // Queue backend
    let queue = build_queue(&config);
    if let Err(e) = queue.connect().await {
        log_error_with_context(&e, "Queue connection");
        std::process::exit(1);
    }

    // Orchestrators
    let registry = services.plugin_manager().await.registry().clone();
    let scoring = RiskScoringOrchestrator::new(registry.clone())
        .with_confidence_threshold(config.pipeline.confidence_threshold)
        .with_scoring_deadline(Duration::from_secs(config.pipeline.scoring_deadline_secs));
    let orchestrator = ProcessingOrchestrator::new(
        registry.clone(),
        queue.clone(),
        scoring,
        OrchestratorConfig {
            listing_deadline: Duration::from_secs(config.pipeline.listing_deadline_secs),
        },
    );
    if let Err(e) = orchestrator.start().await {
        log_error_with_context(&e, "Orchestrator startup");
        std::process::exit(1);
    }

    // Source plugins feed the raw topic on a fixed sweep interval
    let pump = SourcePump::new(registry, queue.clone());
    let pump_shutdown = coordinator.subscribe();
    let pump_interval = Duration::from_secs(config.pipeline.source_poll_secs);
    let pump_task = tokio::spawn(async move {
        pump.run_periodically(pump_interval, pump_shutdown).await;
    });

    system_event(&services, SystemEventType::Startup, pid).await;

    // Admin API runs until shutdown
    let api_state = ApiState {
        services: services.clone(),
        orchestrator: orchestrator.clone(),
    };
    let api_host = config.api.host.clone();
    let api_port = config.api.port;
    let api_task = tokio::spawn(async move {
        if let Err(e) = serve(api_state, &api_host, api_port).await {
            log::error!("Admin API failed: {}", e);
        }
    });

    // Run until a shutdown signal arrives
    let _ = shutdown_rx.recv().await;
    log::info!("Shutdown requested; draining");

    if let Err(e) = orchestrator.stop().await {
        log::warn!("Error stopping orchestrator: {}", e);
    }
    let _ = pump_task.await;
    if let Err(e) = queue.disconnect().await {
        log::warn!("Error disconnecting queue: {}", e);
    }
    api_task.abort();

    system_event(&services, SystemEventType::Shutdown, pid).await;
    log::info!("fraudsift stopped");
}

async fn system_event(
    services: &std::sync::Arc<ServiceRegistry>,
    event_type: SystemEventType,
    pid: u32,
) {
    let message = match event_type {
        SystemEventType::Startup => format!("System started, pid={}", pid),
        _ => format!("System shutting down, pid={}", pid),
    };
    let mut bus = services.notification_manager().await;
    let _ = bus
        .publish(Event::System(SystemEvent::with_message(event_type, message)))
        .await;
}
