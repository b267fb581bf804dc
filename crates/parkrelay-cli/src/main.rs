//! `parkrelay` – parking-lot event relay.
//!
//! 1. Loads `~/.parkrelay/config.toml` (writing the defaults on first run)
//!    and applies `PARKRELAY_*` overrides.
//! 2. Starts the MQTT broker listener, which streams sensor and gate events
//!    to every connected browser.
//! 3. Serves the HTTP/WebSocket gateway, relaying browser text to the
//!    intent service and the broker.
//! 4. Stops both on **Ctrl-C**.

mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use parkrelay_gateway::GatewayServer;
use parkrelay_middleware::{ConnectionRegistry, broker};
use parkrelay_runtime::{DialogflowClient, RelayContext, init_tracing};
use parkrelay_types::RelayError;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;

fn main() -> ExitCode {
    // The OTLP exporter must be set up before the Tokio runtime exists.
    let _guard = init_tracing("parkrelay");

    print_banner();

    let cfg = load_config();
    info!(?cfg, "configuration");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), RelayError> {
    // ── Shutdown signal ───────────────────────────────────────────────────
    let (stop_tx, shutdown) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let stop_for_ctrlc = Arc::clone(&stop_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = stop_for_ctrlc.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    // ── Broker link ───────────────────────────────────────────────────────
    let registry = Arc::new(ConnectionRegistry::new());
    let broker_config = cfg.broker.to_broker_config();
    info!(host = %broker_config.host, port = broker_config.port, "connecting to MQTT broker");
    let (publisher, listener) = broker::connect(&broker_config);
    let listener_task = tokio::spawn(listener.run(Arc::clone(&registry), shutdown.clone()));

    // ── Intent service ────────────────────────────────────────────────────
    if cfg.intent.project_id.is_empty() {
        warn!("no intent project id configured; chatbot replies will fall back");
    }
    let mut intent = DialogflowClient::new(&cfg.intent.endpoint, &cfg.intent.project_id)
        .with_language_code(&cfg.intent.language_code);
    if !cfg.intent.access_token.is_empty() {
        intent = intent.with_access_token(cfg.intent.access_token.as_str());
    }
    if let Some(secs) = cfg.intent.timeout_secs {
        intent = intent.with_timeout(Duration::from_secs(secs));
    }

    // ── Relay context + gateway ───────────────────────────────────────────
    let ctx = Arc::new(
        RelayContext::new(registry, Arc::new(publisher), Arc::new(intent))
            .with_topics(cfg.broker.topics.clone())
            .with_session_scope(cfg.session_scope),
    );
    info!(scope = %ctx.session_scope(), "intent sessions");

    println!(
        "  Relay listening on {}\n",
        format!("http://localhost:{}", cfg.port).bold()
    );
    let served = GatewayServer::new(ctx).with_port(cfg.port).run(shutdown).await;

    // Make sure the listener stops even if the gateway failed to bind.
    let _ = stop_tx.send(true);
    match listener_task.await {
        Ok(exit) => info!(?exit, "broker listener stopped"),
        Err(e) => error!(error = %e, "broker listener task panicked"),
    }

    println!("{}", "  ✓ parkrelay stopped.".green());
    served
}

fn load_config() -> Config {
    let path = config::config_path();
    let mut cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        Ok(None) => {
            let cfg = Config::default();
            match config::save_to(&cfg, &path) {
                Ok(()) => info!(path = %path.display(), "wrote default config"),
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            cfg
        }
        Err(e) => {
            error!(error = %e, "config error; using defaults");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg
}

fn print_banner() {
    println!();
    println!("{}", "  ┌─┐┌─┐┬─┐┬┌─┬─┐┌─┐┬  ┌─┐┬ ┬".bold().cyan());
    println!("{}", "  ├─┘├─┤├┬┘├┴┐├┬┘├┤ │  ├─┤└┬┘".bold().cyan());
    println!("{}", "  ┴  ┴ ┴┴└─┴ ┴┴└─└─┘┴─┘┴ ┴ ┴ ".bold().cyan());
    println!(
        "  {} {}",
        "parkrelay".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  MQTT ⇄ WebSocket relay for parking-lot sensors");
    println!();
}
