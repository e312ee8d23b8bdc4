//! `crane` – crane supervisory API
//!
//! This binary wires the supervisory stack together:
//!
//! 1. Loads `~/.crane/config.toml` (or `$CRANE_CONFIG`) and the deployment
//!    environment overrides.
//! 2. Connects to the MQTT broker and feeds the state topic into the
//!    digital twin.
//! 3. Serves the command/query API and the realtime WebSocket feed.
//! 4. On **Ctrl-C** closes realtime clients, disconnects from the broker and
//!    exits.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use crane_cockpit::{ApiContext, CockpitServer, QueryFacade};
use crane_middleware::{BusClient, CommandPublisher, MqttBus, TelemetryIngest};
use crane_twin::{DigitalTwinStore, RealtimeFanout};
use crane_types::CraneError;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long shutdown waits for the broker connection to close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("crane-api");

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            error!(error = %e, path = %config::config_path().display(), "cannot start");
            return ExitCode::FAILURE;
        }
    };
    info!(config = ?cfg, "configuration loaded");

    match run(cfg).await {
        Ok(()) => {
            println!("{}", "  ✓ Crane API stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Fatal".red().bold(), e);
            error!(error = %e, "crane API exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config) -> Result<(), CraneError> {
    let store = Arc::new(DigitalTwinStore::new());
    let fanout = Arc::new(RealtimeFanout::new(
        Arc::clone(&store),
        cfg.realtime.channel_capacity,
    ));

    // ── Bus ───────────────────────────────────────────────────────────────
    let settings = cfg.mqtt_settings();
    let (mqtt, event_loop) = MqttBus::connect(&settings);
    let bus: Arc<dyn BusClient> = Arc::new(mqtt);
    let ingest = TelemetryIngest::new(Arc::clone(&store), settings.state_topic.clone());

    // ── API ───────────────────────────────────────────────────────────────
    let api = ApiContext {
        publisher: CommandPublisher::new(Arc::clone(&bus), cfg.mqtt.cmd_topic.clone()),
        query: QueryFacade::new(Arc::clone(&store), Arc::clone(&bus)),
    };
    let server = CockpitServer::new(api, Arc::clone(&fanout)).with_port(cfg.api_port);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mqtt_task = tokio::spawn(event_loop.run(ingest, shutdown_rx.clone()));
    let mut server_task = tokio::spawn(server.run(shutdown_rx));

    println!("  Broker      {}", bus.url().bold());
    println!("  Commands →  {}", cfg.mqtt.cmd_topic.bold());
    println!("  State    ←  {}", cfg.mqtt.state_topic.bold());
    println!(
        "  API         {}",
        format!("http://localhost:{}/api", cfg.api_port).bold()
    );
    println!(
        "  Realtime    {}",
        format!("ws://localhost:{}/updates", cfg.api_port).bold()
    );
    println!();
    println!("  Press {} to stop.\n", "Ctrl-C".bold().cyan());

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler; running until the server stops");
            std::future::pending::<()>().await;
        }
    };

    let finished = tokio::select! {
        result = &mut server_task => Some(result),
        () = ctrl_c => {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            None
        }
    };

    // ── Shutdown ──────────────────────────────────────────────────────────
    let _ = shutdown_tx.send(true);
    fanout.close_all();

    match tokio::time::timeout(SHUTDOWN_GRACE, mqtt_task).await {
        Ok(Ok(())) => info!("bus connection closed"),
        Ok(Err(e)) => warn!(error = %e, "bus task failed"),
        Err(_) => warn!("bus did not close within {SHUTDOWN_GRACE:?}"),
    }

    let server_result = match finished {
        Some(result) => result,
        None => server_task.await,
    };
    match server_result {
        Ok(result) => result,
        Err(e) => Err(CraneError::Io(format!("API server task failed: {e}"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______                    "#.bold().cyan());
    println!("{}", r#"  / ____/________ _____  ___ "#.bold().cyan());
    println!("{}", r#" / /   / ___/ __ `/ __ \/ _ \"#.bold().cyan());
    println!("{}", r#"/ /___/ /  / /_/ / / / /  __/"#.bold().cyan());
    println!("{}", r#"\____/_/   \__,_/_/ /_/\___/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Crane API".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Supervisory control for quay crane lighting and trolley");
    println!();
}
