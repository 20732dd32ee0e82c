//! Flowgate server binary.
//!
//! ```text
//! --config flowgate.toml
//!     → config::load_config
//!     → observability::logging::init
//!     → http::create_server (demo /health endpoint)
//!     → listen until Ctrl+C / SIGTERM, then drain
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Method;
use axum::BoxError;
use clap::Parser;

use flowgate::config::{self, AppConfig};
use flowgate::flow::{AppEndpoint, EndpointHandler, EventObserver, HandlerInput, HandlerOutput};
use flowgate::http::{create_server, initial_state, Endpoint};
use flowgate::{lifecycle, observability};

#[derive(Parser)]
#[command(name = "flowgate")]
#[command(about = "Serve endpoints through the typical server flow", long_about = None)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for open connections on shutdown.
    #[arg(long, default_value_t = 10)]
    drain_secs: u64,
}

fn health_endpoint() -> Endpoint<Instant> {
    AppEndpoint::exact("/health").with_handler(
        Method::GET,
        EndpointHandler::new((), |input: HandlerInput<Instant, Body>| async move {
            let uptime_secs = input.state.map(|started| started.elapsed().as_secs()).unwrap_or_default();
            let body = serde_json::json!({ "status": "ok", "uptime_secs": uptime_secs });
            Ok::<_, BoxError>(HandlerOutput::json(&body)?)
        }),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    observability::logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "flowgate starting");

    let events: EventObserver = Arc::new(|event| {
        tracing::debug!(event = event.name(), "Server event");
    });
    let creation = config
        .creation_options(vec![health_endpoint()])?
        .with_create_state(initial_state(Instant::now()))
        .with_events(events);

    let server = create_server(creation)?;
    tracing::info!(
        shape = ?server.shape(),
        security = ?server.security(),
        host = %config.listener.host,
        port = config.listener.port,
        "Configuration loaded"
    );

    let running = server.listen(&config.listener.host, config.listener.port).await?;

    lifecycle::termination_signal().await;
    tracing::info!("Shutting down");
    running.shutdown(Duration::from_secs(cli.drain_secs)).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
