//! Spiral Memory Engine server — hosts a `MemoryStore` behind the metrics &
//! explorer HTTP/WebSocket surface (spec §4.H, §6).

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use spiral_core::bus::{Event, EventBus, Topic};
use spiral_core::config::Config;
use spiral_core::StartupError;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use spiral_server::{http, AppState};

/// Parse `--config <PATH>`, returning the config file path (default `./spiral.toml`).
/// Exits the process if `--help`/`--version` is requested.
fn parse_args() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("spiral.toml");
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("spiral-server {}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("USAGE:");
                println!("    spiral-server [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help            Print help information");
                println!("    -V, --version         Print version information");
                println!("    --config <PATH>       Config file (default: spiral.toml)");
                println!();
                println!("EXIT CODES:");
                println!("    1   configuration error");
                println!("    2   storage backend unavailable");
                println!("    3   on-disk schema version mismatch");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("spiral-server {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = PathBuf::from(&args[i]);
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'spiral-server --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

#[tokio::main]
async fn main() {
    let config_path = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = Config::load(&config_path);
    info!(mode = ?config.mode, storage_backend = ?config.storage_backend, "spiral-server starting");

    let signing_key = config.event_signing_key.as_ref().map(|k| k.clone().into_bytes());
    let bus = Arc::new(EventBus::new(config.event_history_capacity, signing_key));

    let store = match spiral_core::init_store(&config, bus.clone()).await {
        Ok(store) => store,
        Err(StartupError::Config(e)) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
        Err(StartupError::SchemaMismatch { expected, found }) => {
            error!(expected, found, "on-disk schema version mismatch");
            std::process::exit(3);
        }
        Err(StartupError::Backend(e)) => {
            error!(error = %e, "storage backend unavailable");
            std::process::exit(2);
        }
    };

    // Periodic system_tick: the only thing that advances the GC scheduler, deferred
    // associations, and stats rebuilder (spec §2/§4.E — no internal timers).
    {
        let tick_bus = bus.clone();
        let interval_ms = config.system_tick_interval_ms.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                tick_bus.emit(Event::new(Topic::SystemTick, serde_json::json!({})));
            }
        });
    }

    let port = config.metrics_port;
    let state = AppState::new(store, bus, config.metrics_jwt_secret.clone());

    if let Err(e) = http::serve(state, port).await {
        error!(error = %e, "server error");
        std::process::exit(2);
    }

    info!("spiral-server shut down");
}
