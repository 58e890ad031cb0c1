//! bridged - simulation backend for live viewers
//!
//! Serves a neural model over TCP: snapshots on request, probes installed on
//! demand, samples streamed back in step batches. Each viewer gets its own
//! session thread with its own simulator.
//!
//! Storage locations (config file, log file):
//! - Linux: ~/.local/share/neurobridge/
//! - Windows: %APPDATA%\neurobridge\
//! - MacOS: ~/Library/Application Support/neurobridge/

use std::fs::{self, OpenOptions};
use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, info, warn};

use neurobridge::model::Model;
use neurobridge::model_file;

mod config;
mod driver;
mod probes;
mod server;
mod session;

use config::{AppPaths, BackendConfig, Cli, USAGE};
use server::Server;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match Cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("bridged: {e}\n\n{USAGE}");
            process::exit(2);
        }
    };
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }

    let paths = match AppPaths::new() {
        Ok(paths) => Some(paths),
        Err(e) => {
            eprintln!("bridged: {e}; using defaults");
            None
        }
    };
    let cfg = cli.resolve(paths.as_ref())?;
    init_logging(&cfg, paths.as_ref())?;

    let model = Arc::new(load_model(&cfg)?);
    info!(
        objects = model.len(),
        neurons = model.n_neurons(model.root()),
        "model loaded"
    );

    let server = Server::bind(&cfg, Arc::clone(&model))?;
    info!("bridged listening on {}", server.local_addr()?);

    let running = Arc::new(AtomicBool::new(true));
    let listener = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || server.run(running))?
    };

    shutdown_signal().await;
    info!("shutdown requested");
    running.store(false, Ordering::SeqCst);

    match tokio::task::spawn_blocking(move || listener.join()).await? {
        Ok(()) => info!("bridged stopped"),
        Err(_) => error!("listener thread panicked"),
    }
    Ok(())
}

fn load_model(cfg: &BackendConfig) -> Result<Model, Box<dyn std::error::Error>> {
    match &cfg.model_path {
        Some(path) => {
            info!("Model file: {:?}", path);
            Ok(model_file::load(path)?)
        }
        None => {
            info!("no model file configured; serving the demo model");
            Ok(Model::demo())
        }
    }
}

/// Log to the configured file, the default log file, or stderr for `-`.
fn init_logging(cfg: &BackendConfig, paths: Option<&AppPaths>) -> Result<(), Box<dyn std::error::Error>> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(cfg.level())
        .with_thread_names(true);

    let path = match (&cfg.log_file, paths) {
        _ if cfg.logs_to_stderr() => None,
        (Some(path), _) => Some(path.clone()),
        (None, Some(paths)) => {
            paths.ensure()?;
            Some(paths.log_file())
        }
        (None, None) => None,
    };

    match path {
        Some(path) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
            eprintln!("bridged: logging to {}", path.display());
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Ctrl-C handler failed: {e}");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler failed: {e}");
        }
    }
}
