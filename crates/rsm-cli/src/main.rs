mod cli;
mod config;
mod format;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use reqwest::Url;

use rsm_core::{DefaultFormatter, IngestEvent, StderrTelemetry, Telemetry, start_watcher};
use rsm_index::HttpIndexClient;
use rsm_registry::HttpRegistryClient;
use rsm_state::JsonFileStateStore;

use crate::cli::Cli;
use crate::format::format_event_line;
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};

/// Resolve a URL the user must ultimately supply: CLI flag / env var (already
/// folded in by clap) first, then the config file, then an error naming every
/// place it could have come from.
fn resolve_url(flag: Option<Url>, from_config: Option<String>, flag_name: &str, env_name: &str) -> anyhow::Result<Url> {
    if let Some(url) = flag {
        return Ok(url);
    }
    if let Some(raw) = from_config {
        return Url::parse(&raw)
            .map_err(|err| anyhow::anyhow!("invalid {flag_name} in config file: {err}"));
    }
    let path = config::config_path().ok();
    let path = path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<unresolvable>".to_string());
    anyhow::bail!("{flag_name} not set: pass --{flag_name}, set {env_name}, or add \"{flag_name}\" to {path}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let defaults = config::load_defaults().unwrap_or_else(|err| {
        eprintln!("warning: failed to read config file: {err:#}");
        config::CliDefaults::default()
    });

    let registry_url = resolve_url(cli.registry_url.clone(), defaults.registry_url.clone(), "registry-url", "RSM_REGISTRY_URL")?;
    let index_url = resolve_url(cli.index_url.clone(), defaults.index_url.clone(), "index-url", "RSM_INDEX_URL")?;
    let index_name = defaults.index_name.clone().unwrap_or_else(|| cli.index_name.clone());
    let lost_index_name = defaults.lost_index_name.clone().unwrap_or_else(|| cli.lost_index_name.clone());

    let state_path = match cli.state_path.clone() {
        Some(path) => path,
        None => JsonFileStateStore::default_path()?,
    };

    let http = reqwest::Client::new();
    let registry = HttpRegistryClient::new(http.clone(), registry_url);
    let index = HttpIndexClient::new(http, index_url, index_name, lost_index_name);
    let state = JsonFileStateStore::new(state_path);
    let formatter = Arc::new(DefaultFormatter);
    let telemetry: Arc<dyn Telemetry> = Arc::new(StderrTelemetry);

    let handle = start_watcher(cli.watcher_config(), registry, index, state, formatter, telemetry).await?;
    let mut events = handle.subscribe();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown, shutdown_tx);

    println!("rsm {} watching for changes", env!("CARGO_PKG_VERSION"));

    let mut immediate_exit = false;

    loop {
        tokio::select! {
            ev = shutdown_rx.recv() => {
                match ev {
                    Some(ShutdownEvent::Graceful) => {
                        eprintln!("stop requested — finishing current work before exiting (press CTRL+C again to exit immediately)");
                        handle.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        eprintln!("stop requested again — exiting immediately");
                        immediate_exit = true;
                        break;
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if matches!(evt, IngestEvent::Stopped) {
                    if let Some(line) = format_event_line(&evt) {
                        println!("{line}");
                    }
                    break;
                }
                if let Some(line) = format_event_line(&evt) {
                    println!("{line}");
                }
            }
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    handle.wait().await?;
    Ok(())
}
