//! Viewer settings, loaded from JSON.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use neurobridge::schema::DEFAULT_DT;
use neurobridge::wire::DEFAULT_MAX_FRAME_BYTES;

use crate::layout::LayoutAlgorithm;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub addr: String,
    pub dt: f64,
    pub sample_every: u64,
    /// Samples requested per scrub past the cached horizon.
    pub step_n: u64,
    /// Width of the plot window, in samples.
    pub show_n_last_steps: usize,
    pub show_whole_simulation: bool,
    pub allow_scrubbing: bool,
    /// Cache cap per series, in samples.
    pub retention: usize,
    pub node_radius: f64,
    pub head_length: f64,
    pub layout: LayoutAlgorithm,
    pub layout_dim: usize,
    pub layout_extent: f64,
    pub poll_interval_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6001".to_string(),
            dt: DEFAULT_DT,
            sample_every: 1,
            step_n: 100,
            show_n_last_steps: 100,
            show_whole_simulation: false,
            allow_scrubbing: true,
            retention: 10_000,
            node_radius: 0.5,
            head_length: 0.25,
            layout: LayoutAlgorithm::Spring,
            layout_dim: 3,
            layout_extent: 10.0,
            poll_interval_ms: 10,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ViewerSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn sample_every(&self) -> u64 {
        self.sample_every.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_defaults() {
        let s: ViewerSettings =
            serde_json::from_str(r#"{ "sample_every": 0, "layout": "HIERARCHICAL", "allow_scrubbing": false }"#)
                .unwrap();
        assert_eq!(s.sample_every(), 1);
        assert_eq!(s.layout, LayoutAlgorithm::Hierarchical);
        assert!(!s.allow_scrubbing);
        assert_eq!(s.addr, "127.0.0.1:6001");
        assert_eq!(s.retention, 10_000);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ViewerSettings::load(Path::new("/nonexistent/bridge-view.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
