//! # neurobridge
//!
//! Shared core of a live-introspection bridge between a neural simulation backend
//! and one or more 3D viewer clients.
//!
//! The backend (`bridged`) owns a [`model::Model`] and a [`simulator::Simulator`];
//! viewers (`bridge_view`) mirror the model graph, install probes on demand and
//! stream recorded samples into in-scene plots. Both ends speak the length-prefixed
//! protocol defined in [`wire`] and [`schema`].
//!
//! ## Quick Start
//!
//! ```
//! use neurobridge::prelude::*;
//!
//! let mut b = ModelBuilder::new("model");
//! let a = b.node("a", NodeOutput::constant(vec![0.5]));
//! let ens = b.ensemble("b", EnsembleParams { n_neurons: 10, ..EnsembleParams::default() });
//! b.connect(a, ens, ConnectionParams::default());
//! let model = b.build().unwrap();
//!
//! let resolver = NameResolver::new(&model);
//! assert_eq!(resolver.name(ens), Some("b"));
//!
//! let snapshot = ModelAdapter::new(&model, &resolver).snapshot();
//! assert_eq!(snapshot.n_neurons, 10);
//! ```
//!
//! ## Modules
//!
//! - [`wire`]: length-prefixed framing and partial-frame buffering
//! - [`schema`]: the five message families and the network snapshot body
//! - [`access_path`]: parsing of `probeable.<attr>` style access paths
//! - [`model`] / [`model_file`]: model description, builder and JSON model files
//! - [`resolver`]: deterministic canonical names for every reachable object
//! - [`snapshot`]: read-only network snapshot builder
//! - [`simulator`]: reference simulator with probes and tuning curves

#[path = "core/wire.rs"]
pub mod wire;

#[path = "core/schema.rs"]
pub mod schema;

#[path = "core/access_path.rs"]
pub mod access_path;

#[path = "core/model.rs"]
pub mod model;

#[path = "core/model_file.rs"]
pub mod model_file;

#[path = "core/resolver.rs"]
pub mod resolver;

#[path = "core/snapshot.rs"]
pub mod snapshot;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/neurons.rs"]
pub mod neurons;

#[path = "core/solver.rs"]
pub mod solver;

#[path = "core/simulator.rs"]
pub mod simulator;

/// Prelude module for convenient imports.
///
/// ```
/// use neurobridge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::access_path::AccessPath;
    pub use crate::model::{
        ConnectionParams, Endpoint, EnsembleParams, Function, Model, ModelBuilder, NodeOutput,
        ObjectId, ObjectKind, Target, Transform,
    };
    pub use crate::neurons::NeuronType;
    pub use crate::resolver::NameResolver;
    pub use crate::schema::{Message, NetworkSnapshot, Observe, PlotLines, Sample, Simulation};
    pub use crate::simulator::{ProbeSpec, Simulator};
    pub use crate::snapshot::ModelAdapter;
    pub use crate::wire::{FrameBuffer, WireError};
}
