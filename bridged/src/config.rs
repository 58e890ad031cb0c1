//! Backend configuration: JSON file, then command-line overrides.
//!
//! Default locations:
//! - Linux: ~/.local/share/neurobridge/
//! - Windows: %APPDATA%\neurobridge\
//! - MacOS: ~/Library/Application Support/neurobridge/

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use neurobridge::schema::DEFAULT_DT;
use neurobridge::wire::DEFAULT_MAX_FRAME_BYTES;

pub const DEFAULT_PORT: u16 = 6001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a data directory")]
    NoDataDir,
    #[error("config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Usage(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// JSON model file; the built-in demo model is served when absent.
    pub model_path: Option<PathBuf>,
    /// `-` logs to stderr; `None` uses the data directory.
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub default_dt: f64,
    pub poll_interval_ms: u64,
    pub accept_unframed_handshake: bool,
    pub max_frame_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            model_path: None,
            log_file: None,
            log_level: "info".to_string(),
            default_dt: DEFAULT_DT,
            poll_interval_ms: 50,
            accept_unframed_handshake: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl BackendConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn logs_to_stderr(&self) -> bool {
        self.log_file.as_deref() == Some(Path::new("-"))
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, ConfigError> {
        let base = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(Self {
            data_dir: base.join("neurobridge"),
        })
    }

    /// Create the data directory if needed.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.data_dir).map_err(|source| ConfigError::Io {
            path: self.data_dir.clone(),
            source,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("bridged.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("bridged.log")
    }
}

/// Parsed command line. `None` fields leave the config untouched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub accept_unframed: bool,
    pub help: bool,
}

pub const USAGE: &str = "\
bridged: serves a neural model to viewer clients (default 127.0.0.1:6001)
Usage: bridged [options]

Options:
  --config <file>       JSON config (default <data dir>/neurobridge/bridged.json)
  --host <host>         Listen address
  --port <port>         Listen port
  --model <file>        JSON model file (default: built-in demo model)
  --log-file <file|->   Log destination, `-` for stderr
  --log-level <level>   error | warn | info | debug | trace
  --accept-unframed     Accept one raw JSON request before framing starts
  -h, --help            Show this help";

impl Cli {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, ConfigError> {
        let mut cli = Cli::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| ConfigError::Usage(format!("{name} needs a value")))
            };
            match arg.as_str() {
                "--config" => cli.config = Some(value("--config")?.into()),
                "--host" => cli.host = Some(value("--host")?),
                "--port" => {
                    let raw = value("--port")?;
                    let port = raw
                        .parse()
                        .map_err(|_| ConfigError::Usage(format!("invalid port `{raw}`")))?;
                    cli.port = Some(port);
                }
                "--model" => cli.model = Some(value("--model")?.into()),
                "--log-file" => cli.log_file = Some(value("--log-file")?.into()),
                "--log-level" => {
                    let level = value("--log-level")?;
                    if level.parse::<Level>().is_err() {
                        return Err(ConfigError::Usage(format!("invalid log level `{level}`")));
                    }
                    cli.log_level = Some(level);
                }
                "--accept-unframed" => cli.accept_unframed = true,
                "-h" | "--help" => cli.help = true,
                other => return Err(ConfigError::Usage(format!("unknown argument `{other}`"))),
            }
        }
        Ok(cli)
    }

    /// Resolve the effective config: explicit file, else the default file if
    /// present, else defaults; then apply flags.
    pub fn resolve(&self, paths: Option<&AppPaths>) -> Result<BackendConfig, ConfigError> {
        let mut cfg = match (&self.config, paths.map(AppPaths::config_file)) {
            (Some(path), _) => BackendConfig::load(path)?,
            (None, Some(default)) if default.exists() => BackendConfig::load(&default)?,
            _ => BackendConfig::default(),
        };
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(model) = &self.model {
            cfg.model_path = Some(model.clone());
        }
        if let Some(log_file) = &self.log_file {
            cfg.log_file = Some(log_file.clone());
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        if self.accept_unframed {
            cfg.accept_unframed_handshake = true;
        }
        Ok(cfg)
    }
}
