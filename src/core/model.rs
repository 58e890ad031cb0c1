//! Static description of a neural model: networks, ensembles, nodes,
//! connections and declared probes.
//!
//! Objects live in an arena and are addressed by [`ObjectId`]. The arena is
//! immutable once built; sessions share it read-only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access_path::Scope;
use crate::neurons::NeuronType;
use crate::solver::Solver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Network,
    Ensemble,
    Node,
    Connection,
    Neurons,
    Probe,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Network => "Network",
            ObjectKind::Ensemble => "Ensemble",
            ObjectKind::Node => "Node",
            ObjectKind::Connection => "Connection",
            ObjectKind::Neurons => "Neurons",
            ObjectKind::Probe => "Probe",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can be probed or connected: an object, or the neurons of an ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Object(ObjectId),
    Neurons(ObjectId),
}

impl Target {
    pub fn id(&self) -> ObjectId {
        match *self {
            Target::Object(id) | Target::Neurons(id) => id,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Target::Object(_) => Scope::Object,
            Target::Neurons(_) => Scope::Neurons,
        }
    }

    pub fn with_scope(id: ObjectId, scope: Scope) -> Self {
        match scope {
            Scope::Object => Target::Object(id),
            Scope::Neurons => Target::Neurons(id),
        }
    }
}

/// A connection endpoint: a target, optionally restricted to `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub target: Target,
    pub slice: Option<(usize, usize)>,
}

impl Endpoint {
    pub fn neurons(ensemble: ObjectId) -> Self {
        Self {
            target: Target::Neurons(ensemble),
            slice: None,
        }
    }

    pub fn sliced(mut self, start: usize, end: usize) -> Self {
        self.slice = Some((start, end));
        self
    }
}

impl From<ObjectId> for Endpoint {
    fn from(id: ObjectId) -> Self {
        Self {
            target: Target::Object(id),
            slice: None,
        }
    }
}

impl From<Target> for Endpoint {
    fn from(target: Target) -> Self {
        Self {
            target,
            slice: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleParams {
    pub n_neurons: usize,
    pub dimensions: usize,
    pub radius: f64,
    pub neuron_type: NeuronType,
    /// Uniform range the per-neuron maximum firing rates are drawn from.
    pub max_rates: [f64; 2],
    /// Uniform range the per-neuron intercepts are drawn from.
    pub intercepts: [f64; 2],
    pub seed: Option<u64>,
}

impl Default for EnsembleParams {
    fn default() -> Self {
        Self {
            n_neurons: 50,
            dimensions: 1,
            radius: 1.0,
            neuron_type: NeuronType::default(),
            max_rates: [200.0, 400.0],
            intercepts: [-1.0, 0.9],
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeOutput {
    Constant {
        value: Vec<f64>,
    },
    Sine {
        #[serde(default = "one")]
        frequency: f64,
        #[serde(default = "one")]
        amplitude: f64,
        #[serde(default)]
        phase: f64,
    },
    /// Forwards its input unchanged.
    Passthrough {
        size: usize,
    },
}

fn one() -> f64 {
    1.0
}

impl NodeOutput {
    pub fn constant(value: Vec<f64>) -> Self {
        NodeOutput::Constant { value }
    }

    pub fn sine(frequency: f64) -> Self {
        NodeOutput::Sine {
            frequency,
            amplitude: 1.0,
            phase: 0.0,
        }
    }

    pub fn size_in(&self) -> usize {
        match self {
            NodeOutput::Passthrough { size } => *size,
            _ => 0,
        }
    }

    pub fn size_out(&self) -> usize {
        match self {
            NodeOutput::Constant { value } => value.len(),
            NodeOutput::Sine { .. } => 1,
            NodeOutput::Passthrough { size } => *size,
        }
    }

    pub fn evaluate(&self, t: f64, input: &[f64]) -> Vec<f64> {
        match self {
            NodeOutput::Constant { value } => value.clone(),
            NodeOutput::Sine {
                frequency,
                amplitude,
                phase,
            } => vec![amplitude * (2.0 * std::f64::consts::PI * frequency * t + phase).sin()],
            NodeOutput::Passthrough { .. } => input.to_vec(),
        }
    }
}

impl fmt::Display for NodeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutput::Constant { value } => write!(f, "Constant({value:?})"),
            NodeOutput::Sine {
                frequency,
                amplitude,
                phase,
            } => write!(
                f,
                "Sine(frequency={frequency}, amplitude={amplitude}, phase={phase})"
            ),
            NodeOutput::Passthrough { size } => write!(f, "Passthrough(size={size})"),
        }
    }
}

/// Function computed across a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    #[default]
    Identity,
    Square,
    Negate,
    Abs,
    Sin,
    /// Product of a two-dimensional input.
    Product,
}

impl Function {
    pub fn size_out(&self, size_in: usize) -> usize {
        match self {
            Function::Product => 1,
            _ => size_in,
        }
    }

    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        match self {
            Function::Identity => x.to_vec(),
            Function::Square => x.iter().map(|v| v * v).collect(),
            Function::Negate => x.iter().map(|v| -v).collect(),
            Function::Abs => x.iter().map(|v| v.abs()).collect(),
            Function::Sin => x.iter().map(|v| v.sin()).collect(),
            Function::Product => vec![x.iter().product()],
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Identity => "identity",
            Function::Square => "square",
            Function::Negate => "negate",
            Function::Abs => "abs",
            Function::Sin => "sin",
            Function::Product => "product",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Transform {
    Scalar(f64),
    /// Row-major, `size_out × size_mid`.
    Matrix(Vec<Vec<f64>>),
}

impl Default for Transform {
    fn default() -> Self {
        Transform::Scalar(1.0)
    }
}

impl Transform {
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        match self {
            Transform::Scalar(s) => x.iter().map(|v| s * v).collect(),
            Transform::Matrix(m) => m
                .iter()
                .map(|row| row.iter().zip(x).map(|(a, b)| a * b).sum())
                .collect(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Transform::Scalar(s) if *s == 1.0)
    }

    /// Dense `size_out × size_mid` form.
    pub fn dense(&self, size_mid: usize) -> Vec<Vec<f64>> {
        match self {
            Transform::Scalar(s) => (0..size_mid)
                .map(|i| (0..size_mid).map(|j| if i == j { *s } else { 0.0 }).collect())
                .collect(),
            Transform::Matrix(m) => m.clone(),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Scalar(s) => write!(f, "{s}"),
            Transform::Matrix(m) => write!(
                f,
                "Dense(shape=({}, {}))",
                m.len(),
                m.first().map_or(0, Vec::len)
            ),
        }
    }
}

pub const DEFAULT_SYNAPSE_TAU: f64 = 0.005;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub label: Option<String>,
    pub function: Function,
    pub transform: Transform,
    /// Lowpass time constant; `None` passes the signal through unfiltered.
    pub synapse: Option<f64>,
    pub solver: Solver,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            label: None,
            function: Function::Identity,
            transform: Transform::default(),
            synapse: Some(DEFAULT_SYNAPSE_TAU),
            solver: Solver::default(),
        }
    }
}

pub fn synapse_label(synapse: Option<f64>) -> String {
    match synapse {
        Some(tau) => format!("Lowpass(tau={tau})"),
        None => "None".to_string(),
    }
}

/// Public attribute of a network holding model objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    One(ObjectId),
    Many(Vec<ObjectId>),
}

#[derive(Debug, Clone)]
pub struct Network {
    pub label: Option<String>,
    pub class_type: String,
    pub parent: Option<ObjectId>,
    pub ensembles: Vec<ObjectId>,
    pub nodes: Vec<ObjectId>,
    pub connections: Vec<ObjectId>,
    pub networks: Vec<ObjectId>,
    pub probes: Vec<ObjectId>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Network {
    fn new(label: Option<String>, class_type: &str, parent: Option<ObjectId>) -> Self {
        Self {
            label,
            class_type: class_type.to_string(),
            parent,
            ensembles: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            networks: Vec::new(),
            probes: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// The fixed child lists in traversal order.
    pub fn child_lists(&self) -> [(&'static str, &[ObjectId]); 5] {
        [
            ("ensembles", &self.ensembles),
            ("nodes", &self.nodes),
            ("connections", &self.connections),
            ("networks", &self.networks),
            ("probes", &self.probes),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Ensemble {
    pub label: Option<String>,
    pub params: EnsembleParams,
    pub parent: ObjectId,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub label: Option<String>,
    pub output: NodeOutput,
    pub parent: ObjectId,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub label: Option<String>,
    pub pre: Endpoint,
    pub post: Endpoint,
    pub function: Function,
    pub transform: Transform,
    pub synapse: Option<f64>,
    pub solver: Solver,
    pub parent: ObjectId,
}

/// A probe declared by the model itself (as opposed to one installed by a viewer).
#[derive(Debug, Clone)]
pub struct Probe {
    pub label: Option<String>,
    pub target: Target,
    pub attr: String,
    pub sample_every: u64,
    pub parent: ObjectId,
}

#[derive(Debug, Clone)]
pub enum ModelObject {
    Network(Network),
    Ensemble(Ensemble),
    Node(Node),
    Connection(Connection),
    Probe(Probe),
}

impl ModelObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ModelObject::Network(_) => ObjectKind::Network,
            ModelObject::Ensemble(_) => ObjectKind::Ensemble,
            ModelObject::Node(_) => ObjectKind::Node,
            ModelObject::Connection(_) => ObjectKind::Connection,
            ModelObject::Probe(_) => ObjectKind::Probe,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            ModelObject::Network(n) => n.label.as_deref(),
            ModelObject::Ensemble(e) => e.label.as_deref(),
            ModelObject::Node(n) => n.label.as_deref(),
            ModelObject::Connection(c) => c.label.as_deref(),
            ModelObject::Probe(p) => p.label.as_deref(),
        }
    }

    pub fn parent(&self) -> Option<ObjectId> {
        match self {
            ModelObject::Network(n) => n.parent,
            ModelObject::Ensemble(e) => Some(e.parent),
            ModelObject::Node(n) => Some(n.parent),
            ModelObject::Connection(c) => Some(c.parent),
            ModelObject::Probe(p) => Some(p.parent),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown reference `{0}`")]
    UnknownReference(String),
    #[error("duplicate binding `{0}`")]
    DuplicateBinding(String),
    #[error("{what} must be {expected}")]
    WrongKind { what: String, expected: &'static str },
    #[error("{what}: expected size {expected}, found {found}")]
    SizeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
    #[error("slice [{start}:{end}] out of range for size {size}")]
    SliceOutOfRange {
        start: usize,
        end: usize,
        size: usize,
    },
    #[error("`{attr}` is not probeable on {kind}")]
    NotProbeable { attr: String, kind: ObjectKind },
    #[error("invalid ensemble parameters: {0}")]
    InvalidEnsemble(String),
    #[error("unbalanced begin_network/end_network")]
    UnbalancedNetworks,
}

#[derive(Debug, Clone)]
pub struct Model {
    objects: Vec<ModelObject>,
    root: ObjectId,
    bindings: Vec<(String, ObjectId)>,
    seed: u64,
}

impl Model {
    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Externally supplied variable names, in declaration order.
    pub fn bindings(&self) -> &[(String, ObjectId)] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.objects.len()).map(ObjectId)
    }

    pub fn get(&self, id: ObjectId) -> Option<&ModelObject> {
        self.objects.get(id.0)
    }

    pub fn kind(&self, id: ObjectId) -> Option<ObjectKind> {
        self.get(id).map(ModelObject::kind)
    }

    pub fn network(&self, id: ObjectId) -> Option<&Network> {
        match self.get(id) {
            Some(ModelObject::Network(n)) => Some(n),
            _ => None,
        }
    }

    pub fn ensemble(&self, id: ObjectId) -> Option<&Ensemble> {
        match self.get(id) {
            Some(ModelObject::Ensemble(e)) => Some(e),
            _ => None,
        }
    }

    pub fn node(&self, id: ObjectId) -> Option<&Node> {
        match self.get(id) {
            Some(ModelObject::Node(n)) => Some(n),
            _ => None,
        }
    }

    pub fn connection(&self, id: ObjectId) -> Option<&Connection> {
        match self.get(id) {
            Some(ModelObject::Connection(c)) => Some(c),
            _ => None,
        }
    }

    pub fn probe(&self, id: ObjectId) -> Option<&Probe> {
        match self.get(id) {
            Some(ModelObject::Probe(p)) => Some(p),
            _ => None,
        }
    }

    pub fn ensembles(&self) -> impl Iterator<Item = (ObjectId, &Ensemble)> {
        self.objects.iter().enumerate().filter_map(|(i, o)| match o {
            ModelObject::Ensemble(e) => Some((ObjectId(i), e)),
            _ => None,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = (ObjectId, &Node)> {
        self.objects.iter().enumerate().filter_map(|(i, o)| match o {
            ModelObject::Node(n) => Some((ObjectId(i), n)),
            _ => None,
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = (ObjectId, &Connection)> {
        self.objects.iter().enumerate().filter_map(|(i, o)| match o {
            ModelObject::Connection(c) => Some((ObjectId(i), c)),
            _ => None,
        })
    }

    pub fn probes(&self) -> impl Iterator<Item = (ObjectId, &Probe)> {
        self.objects.iter().enumerate().filter_map(|(i, o)| match o {
            ModelObject::Probe(p) => Some((ObjectId(i), p)),
            _ => None,
        })
    }

    pub fn target_kind(&self, target: Target) -> Option<ObjectKind> {
        match target {
            Target::Object(id) => self.kind(id),
            Target::Neurons(id) => self.ensemble(id).map(|_| ObjectKind::Neurons),
        }
    }

    pub fn size_in(&self, target: Target) -> usize {
        match target {
            Target::Neurons(id) => self.ensemble(id).map_or(0, |e| e.params.n_neurons),
            Target::Object(id) => match self.get(id) {
                Some(ModelObject::Ensemble(e)) => e.params.dimensions,
                Some(ModelObject::Node(n)) => n.output.size_in(),
                Some(ModelObject::Connection(c)) => self.endpoint_size_out(&c.pre),
                _ => 0,
            },
        }
    }

    pub fn size_out(&self, target: Target) -> usize {
        match target {
            Target::Neurons(id) => self.ensemble(id).map_or(0, |e| e.params.n_neurons),
            Target::Object(id) => match self.get(id) {
                Some(ModelObject::Ensemble(e)) => e.params.dimensions,
                Some(ModelObject::Node(n)) => n.output.size_out(),
                Some(ModelObject::Connection(c)) => self.endpoint_size_in(&c.post),
                _ => 0,
            },
        }
    }

    /// Width of the signal leaving a pre endpoint.
    pub fn endpoint_size_out(&self, ep: &Endpoint) -> usize {
        match ep.slice {
            Some((start, end)) => end.saturating_sub(start),
            None => self.size_out(ep.target),
        }
    }

    /// Width of the signal entering a post endpoint.
    pub fn endpoint_size_in(&self, ep: &Endpoint) -> usize {
        match ep.slice {
            Some((start, end)) => end.saturating_sub(start),
            None => self.size_in(ep.target),
        }
    }

    /// `(size_in, size_mid, size_out)` of a connection.
    pub fn connection_sizes(&self, conn: &Connection) -> (usize, usize, usize) {
        let size_in = self.endpoint_size_out(&conn.pre);
        let size_mid = conn.function.size_out(size_in);
        let size_out = self.endpoint_size_in(&conn.post);
        (size_in, size_mid, size_out)
    }

    pub fn has_weights(&self, conn: &Connection) -> bool {
        let decoded = matches!(conn.pre.target, Target::Object(id) if self.ensemble(id).is_some());
        decoded || !conn.transform.is_identity()
    }

    pub fn probeable(&self, target: Target) -> &'static [&'static str] {
        match target {
            Target::Neurons(id) => self
                .ensemble(id)
                .map_or(&[], |e| e.params.neuron_type.probeable()),
            Target::Object(id) => match self.kind(id) {
                Some(ObjectKind::Ensemble) => &["decoded_output", "input"],
                Some(ObjectKind::Node) => &["output"],
                Some(ObjectKind::Connection) => &["output", "input", "weights"],
                _ => &[],
            },
        }
    }

    /// Total neuron count of a network and all of its subnetworks.
    pub fn n_neurons(&self, network: ObjectId) -> usize {
        let Some(net) = self.network(network) else {
            return 0;
        };
        let own: usize = net
            .ensembles
            .iter()
            .filter_map(|id| self.ensemble(*id))
            .map(|e| e.params.n_neurons)
            .sum();
        own + net.networks.iter().map(|n| self.n_neurons(*n)).sum::<usize>()
    }

    /// The closest enclosing network of an object.
    pub fn parent_network(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id).and_then(ModelObject::parent)
    }

    /// A small model exercising every object kind; served when no model file is given.
    pub fn demo() -> Model {
        let mut b = ModelBuilder::new("model").with_seed(1);
        let stim = b.node("stim", NodeOutput::sine(1.0));
        let a = b.ensemble(
            "a",
            EnsembleParams {
                n_neurons: 50,
                ..EnsembleParams::default()
            },
        );
        let sq = b.ensemble(
            "squared",
            EnsembleParams {
                n_neurons: 40,
                neuron_type: NeuronType::LifRate {
                    tau_rc: 0.02,
                    tau_ref: 0.002,
                },
                ..EnsembleParams::default()
            },
        );
        b.connect(stim, a, ConnectionParams::default());
        b.connect(
            a,
            sq,
            ConnectionParams {
                function: Function::Square,
                ..ConnectionParams::default()
            },
        );
        b.connect(
            sq,
            sq,
            ConnectionParams {
                label: Some("recurrent".to_string()),
                transform: Transform::Scalar(0.5),
                synapse: Some(0.1),
                ..ConnectionParams::default()
            },
        );

        let layer = b.begin_network("layer", "EnsembleArray");
        let input = b.add_node(layer, None, NodeOutput::Passthrough { size: 2 });
        let e0 = b.add_ensemble(layer, None, EnsembleParams::default());
        let e1 = b.add_ensemble(layer, None, EnsembleParams::default());
        b.connect(Endpoint::from(input).sliced(0, 1), e0, ConnectionParams::default());
        b.connect(Endpoint::from(input).sliced(1, 2), e1, ConnectionParams::default());
        b.set_attribute(layer, "input", Attribute::One(input));
        b.set_attribute(layer, "ea_ensembles", Attribute::Many(vec![e0, e1]));
        b.end_network();

        b.connect(
            a,
            Endpoint::from(input).sliced(0, 1),
            ConnectionParams::default(),
        );
        b.connect(
            Endpoint::neurons(a).sliced(0, 2),
            Endpoint::from(input),
            ConnectionParams {
                transform: Transform::Scalar(0.001),
                ..ConnectionParams::default()
            },
        );
        b.build()
            .unwrap_or_else(|e| unreachable!("demo model is well formed: {e}"))
    }
}

/// Incremental construction of a [`Model`].
///
/// Objects are added to the network on top of the builder's stack unless an
/// explicit parent is given.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    objects: Vec<ModelObject>,
    stack: Vec<ObjectId>,
    bindings: Vec<(String, ObjectId)>,
    seed: u64,
    /// Parents named by add_* calls that are not networks.
    orphans: Vec<ObjectId>,
}

impl ModelBuilder {
    /// Start a model whose root network is bound to `root_var`.
    pub fn new(root_var: &str) -> Self {
        let root = ObjectId(0);
        Self {
            objects: vec![ModelObject::Network(Network::new(None, "Network", None))],
            stack: vec![root],
            bindings: vec![(root_var.to_string(), root)],
            seed: 0,
            orphans: Vec::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn root(&self) -> ObjectId {
        ObjectId(0)
    }

    pub fn current(&self) -> ObjectId {
        self.stack.last().copied().unwrap_or(ObjectId(0))
    }

    pub fn bind(&mut self, var: &str, id: ObjectId) {
        self.bindings.push((var.to_string(), id));
    }

    fn push(&mut self, obj: ModelObject) -> ObjectId {
        self.objects.push(obj);
        ObjectId(self.objects.len() - 1)
    }

    fn attach(&mut self, parent: ObjectId, f: impl FnOnce(&mut Network)) {
        match self.objects.get_mut(parent.0) {
            Some(ModelObject::Network(n)) => f(n),
            _ => self.orphans.push(parent),
        }
    }

    pub fn add_ensemble(
        &mut self,
        parent: ObjectId,
        label: Option<&str>,
        params: EnsembleParams,
    ) -> ObjectId {
        let id = self.push(ModelObject::Ensemble(Ensemble {
            label: label.map(str::to_string),
            params,
            parent,
        }));
        self.attach(parent, |n| n.ensembles.push(id));
        id
    }

    pub fn add_node(&mut self, parent: ObjectId, label: Option<&str>, output: NodeOutput) -> ObjectId {
        let id = self.push(ModelObject::Node(Node {
            label: label.map(str::to_string),
            output,
            parent,
        }));
        self.attach(parent, |n| n.nodes.push(id));
        id
    }

    pub fn add_connection(
        &mut self,
        parent: ObjectId,
        pre: impl Into<Endpoint>,
        post: impl Into<Endpoint>,
        params: ConnectionParams,
    ) -> ObjectId {
        let id = self.push(ModelObject::Connection(Connection {
            label: params.label,
            pre: pre.into(),
            post: post.into(),
            function: params.function,
            transform: params.transform,
            synapse: params.synapse,
            solver: params.solver,
            parent,
        }));
        self.attach(parent, |n| n.connections.push(id));
        id
    }

    pub fn add_probe(
        &mut self,
        parent: ObjectId,
        target: Target,
        attr: &str,
        sample_every: u64,
    ) -> ObjectId {
        let id = self.push(ModelObject::Probe(Probe {
            label: None,
            target,
            attr: attr.to_string(),
            sample_every: sample_every.max(1),
            parent,
        }));
        self.attach(parent, |n| n.probes.push(id));
        id
    }

    pub fn add_network(&mut self, parent: ObjectId, label: Option<&str>, class_type: &str) -> ObjectId {
        let id = self.push(ModelObject::Network(Network::new(
            label.map(str::to_string),
            class_type,
            Some(parent),
        )));
        self.attach(parent, |n| n.networks.push(id));
        id
    }

    pub fn set_attribute(&mut self, network: ObjectId, name: &str, attr: Attribute) {
        let name = name.to_string();
        self.attach(network, |n| {
            n.attributes.insert(name, attr);
        });
    }

    pub fn ensemble(&mut self, var: &str, params: EnsembleParams) -> ObjectId {
        let id = self.add_ensemble(self.current(), Some(var), params);
        self.bind(var, id);
        id
    }

    pub fn node(&mut self, var: &str, output: NodeOutput) -> ObjectId {
        let id = self.add_node(self.current(), Some(var), output);
        self.bind(var, id);
        id
    }

    pub fn connect(
        &mut self,
        pre: impl Into<Endpoint>,
        post: impl Into<Endpoint>,
        params: ConnectionParams,
    ) -> ObjectId {
        self.add_connection(self.current(), pre, post, params)
    }

    pub fn probe(&mut self, target: Target, attr: &str, sample_every: u64) -> ObjectId {
        self.add_probe(self.current(), target, attr, sample_every)
    }

    /// Open a subnetwork; later objects land in it until [`Self::end_network`].
    pub fn begin_network(&mut self, var: &str, class_type: &str) -> ObjectId {
        let id = self.add_network(self.current(), Some(var), class_type);
        self.bind(var, id);
        self.stack.push(id);
        id
    }

    pub fn end_network(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        } else {
            // Remembered so build() can report it.
            self.stack.clear();
        }
    }

    pub fn build(self) -> Result<Model, ModelError> {
        if self.stack.len() != 1 {
            return Err(ModelError::UnbalancedNetworks);
        }
        if let Some(id) = self.orphans.first() {
            return Err(ModelError::WrongKind {
                what: format!("parent object {}", id.0),
                expected: "a network",
            });
        }
        let model = Model {
            objects: self.objects,
            root: ObjectId(0),
            bindings: self.bindings,
            seed: self.seed,
        };
        validate(&model)?;
        Ok(model)
    }
}

fn validate(model: &Model) -> Result<(), ModelError> {
    for (id, ens) in model.ensembles() {
        validate_ensemble(id, &ens.params)?;
    }

    for (id, conn) in model.connections() {
        let what = format!("connection {}", id.0);
        check_endpoint(model, &conn.pre, true, &what)?;
        check_endpoint(model, &conn.post, false, &what)?;

        if matches!(conn.pre.target, Target::Neurons(_)) && conn.function != Function::Identity {
            return Err(ModelError::WrongKind {
                what: format!("{what} function"),
                expected: "identity when leaving neurons",
            });
        }

        let (size_in, size_mid, size_out) = model.connection_sizes(conn);
        if conn.function == Function::Product && size_in != 2 {
            return Err(ModelError::SizeMismatch {
                what: format!("{what} product input"),
                expected: 2,
                found: size_in,
            });
        }
        match &conn.transform {
            Transform::Scalar(_) if size_mid != size_out => {
                return Err(ModelError::SizeMismatch {
                    what: format!("{what} output"),
                    expected: size_mid,
                    found: size_out,
                });
            }
            Transform::Matrix(m) => {
                if m.len() != size_out {
                    return Err(ModelError::SizeMismatch {
                        what: format!("{what} transform rows"),
                        expected: size_out,
                        found: m.len(),
                    });
                }
                if let Some(row) = m.iter().find(|r| r.len() != size_mid) {
                    return Err(ModelError::SizeMismatch {
                        what: format!("{what} transform columns"),
                        expected: size_mid,
                        found: row.len(),
                    });
                }
            }
            _ => {}
        }
    }

    for (_, probe) in model.probes() {
        let kind = model
            .target_kind(probe.target)
            .ok_or_else(|| ModelError::UnknownReference(format!("{:?}", probe.target)))?;
        if !model.probeable(probe.target).contains(&probe.attr.as_str()) {
            return Err(ModelError::NotProbeable {
                attr: probe.attr.clone(),
                kind,
            });
        }
    }
    Ok(())
}

fn validate_ensemble(id: ObjectId, p: &EnsembleParams) -> Result<(), ModelError> {
    let fail = |msg: String| Err(ModelError::InvalidEnsemble(format!("object {}: {msg}", id.0)));
    if p.dimensions == 0 {
        return fail("dimensions must be positive".to_string());
    }
    if p.radius <= 0.0 {
        return fail("radius must be positive".to_string());
    }
    if p.intercepts[0] > p.intercepts[1] || p.intercepts[1] >= 1.0 || p.intercepts[0] < -1.0 {
        return fail(format!("intercepts {:?} must lie in [-1, 1)", p.intercepts));
    }
    if p.max_rates[0] <= 0.0 || p.max_rates[0] > p.max_rates[1] {
        return fail(format!("max_rates {:?} must be positive", p.max_rates));
    }
    let limit = match p.neuron_type {
        NeuronType::Lif { tau_ref, .. }
        | NeuronType::LifRate { tau_ref, .. }
        | NeuronType::Sigmoid { tau_ref } => Some(1.0 / tau_ref),
        NeuronType::RectifiedLinear => None,
    };
    if let Some(limit) = limit {
        if p.max_rates[1] >= limit {
            return fail(format!(
                "max rate {} exceeds the refractory limit {limit}",
                p.max_rates[1]
            ));
        }
    }
    Ok(())
}

fn check_endpoint(model: &Model, ep: &Endpoint, is_pre: bool, what: &str) -> Result<(), ModelError> {
    let kind = model
        .target_kind(ep.target)
        .ok_or_else(|| ModelError::UnknownReference(format!("{what}: {:?}", ep.target)))?;
    let ok = match kind {
        ObjectKind::Ensemble | ObjectKind::Neurons => true,
        ObjectKind::Node => {
            if is_pre {
                true
            } else {
                model.size_in(ep.target) > 0
            }
        }
        _ => false,
    };
    if !ok {
        return Err(ModelError::WrongKind {
            what: format!("{what} {}", if is_pre { "pre" } else { "post" }),
            expected: "an ensemble, neurons, or a node accepting input",
        });
    }
    let full = if is_pre {
        model.size_out(ep.target)
    } else {
        model.size_in(ep.target)
    };
    if let Some((start, end)) = ep.slice {
        if start >= end || end > full {
            return Err(ModelError::SliceOutOfRange {
                start,
                end,
                size: full,
            });
        }
    }
    Ok(())
}
