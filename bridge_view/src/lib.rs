//! # bridge_view
//!
//! Viewer side of the neurobridge protocol. A [`context::SessionContext`]
//! owns one backend connection and everything derived from it:
//!
//! - [`mirror`]: the network snapshot as a nested `petgraph` graph
//! - [`view`]: the mirror flattened for drawing, subnetworks collapsed or expanded
//! - [`cache`]: recorded samples keyed by `(source, access_path)`
//! - [`axes`] / [`expr`] / [`color`]: in-scene plots fed through small expressions
//! - [`coloring`]: static and per-tick node/edge coloring
//! - [`timeline`]: frame changes to cache windows and step requests
//! - [`layout`] / [`scene`]: positions and the scene objects drawn from them
//!
//! The host (a 3D editor, or the headless `bridge-view` binary) polls the
//! context from its timer and forwards frame changes; nothing here blocks.

pub mod axes;
pub mod cache;
pub mod color;
pub mod coloring;
pub mod connection;
pub mod context;
pub mod expr;
pub mod layout;
pub mod mirror;
pub mod scene;
pub mod settings;
pub mod timeline;
pub mod view;

pub mod prelude {
    pub use crate::axes::{Axes, AxesRegistry, Line, Locator, SourceBinding, Window};
    pub use crate::cache::SimulationCache;
    pub use crate::coloring::{Coloring, DynamicMapping};
    pub use crate::connection::{ClientError, MemoryTransport, TcpTransport, Transport};
    pub use crate::context::{SessionContext, Status};
    pub use crate::layout::{BuiltinLayout, LayoutAlgorithm, LayoutOracle};
    pub use crate::mirror::MirrorGraph;
    pub use crate::scene::{RecordingScene, Reconciler, SceneAdapter};
    pub use crate::settings::ViewerSettings;
    pub use crate::timeline::{TimelineAction, TimelineDriver};
}
