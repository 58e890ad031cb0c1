//! JSON model files.
//!
//! A file mirrors the network hierarchy. Objects may carry a `var` binding,
//! which both names them for references inside the file and seeds the name
//! resolver. References accept a var name or a hierarchical path
//! (`layer.ensembles[1]`), optionally followed by `.neurons` and a slice:
//!
//! ```json
//! { "var": "model",
//!   "nodes": [{ "var": "stim", "output": { "type": "sine", "frequency": 2.0 } }],
//!   "ensembles": [{ "var": "a", "n_neurons": 20 }],
//!   "connections": [{ "pre": "stim", "post": "a" }] }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{
    Attribute, ConnectionParams, Endpoint, EnsembleParams, Function, Model, ModelBuilder,
    ModelError, NodeOutput, ObjectId, Target, Transform, DEFAULT_SYNAPSE_TAU,
};
use crate::solver::Solver;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    #[serde(default)]
    pub seed: u64,
    #[serde(flatten)]
    pub network: NetworkFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkFile {
    pub var: Option<String>,
    pub label: Option<String>,
    pub class_type: Option<String>,
    pub ensembles: Vec<EnsembleFile>,
    pub nodes: Vec<NodeFile>,
    pub connections: Vec<ConnectionFile>,
    pub networks: Vec<NetworkFile>,
    pub probes: Vec<ProbeFile>,
    /// Public attributes: name → reference or list of references.
    pub attributes: BTreeMap<String, AttributeFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleFile {
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(flatten)]
    pub params: EnsembleParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFile {
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub output: NodeOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionFile {
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub pre: String,
    pub post: String,
    #[serde(default)]
    pub function: Function,
    #[serde(default)]
    pub transform: Transform,
    /// `null` disables filtering.
    #[serde(default = "default_synapse")]
    pub synapse: Option<f64>,
    #[serde(default)]
    pub solver: Solver,
}

fn default_synapse() -> Option<f64> {
    Some(DEFAULT_SYNAPSE_TAU)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeFile {
    #[serde(default)]
    pub var: Option<String>,
    pub target: String,
    pub attr: String,
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,
}

fn default_sample_every() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeFile {
    One(String),
    Many(Vec<String>),
}

pub fn load(path: &Path) -> Result<Model, ModelError> {
    let text = std::fs::read_to_string(path)?;
    from_json(&text)
}

pub fn from_json(text: &str) -> Result<Model, ModelError> {
    let file: ModelFile = serde_json::from_str(text)?;
    file.build()
}

/// Names visible to references while a file is being built.
struct Scope {
    names: HashMap<String, ObjectId>,
}

impl Scope {
    fn define(&mut self, name: String, id: ObjectId) -> Result<(), ModelError> {
        if self.names.contains_key(&name) {
            return Err(ModelError::DuplicateBinding(name));
        }
        self.names.insert(name, id);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<ObjectId, ModelError> {
        self.names
            .get(name.trim())
            .copied()
            .ok_or_else(|| ModelError::UnknownReference(name.to_string()))
    }

    /// Parse `name[.neurons][[start:end]]`.
    fn endpoint(&self, text: &str) -> Result<Endpoint, ModelError> {
        let text = text.trim();
        let (base, slice) = match split_slice(text) {
            Some((base, start, end)) => (base, Some((start, end))),
            None => (text, None),
        };
        let target = match base.strip_suffix(".neurons") {
            Some(owner) if !self.names.contains_key(base) => Target::Neurons(self.lookup(owner)?),
            _ => Target::Object(self.lookup(base)?),
        };
        Ok(Endpoint { target, slice })
    }
}

fn split_slice(text: &str) -> Option<(&str, usize, usize)> {
    let inner = text.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    let (start, end) = inner[open + 1..].split_once(':')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    Some((&text[..open], start, end))
}

impl ModelFile {
    pub fn build(&self) -> Result<Model, ModelError> {
        let root_var = self.network.var.as_deref().unwrap_or("model");
        let mut b = ModelBuilder::new(root_var).with_seed(self.seed);
        let root = b.root();
        let mut scope = Scope {
            names: HashMap::new(),
        };
        scope.define(root_var.to_string(), root)?;

        let mut networks = Vec::new();
        declare(&mut b, &mut scope, root, root_var, &self.network, &mut networks)?;

        for (id, path, net) in &networks {
            for (name, attr) in &net.attributes {
                let attr = match attr {
                    AttributeFile::One(r) => Attribute::One(scope.lookup(r)?),
                    AttributeFile::Many(rs) => Attribute::Many(
                        rs.iter()
                            .map(|r| scope.lookup(r))
                            .collect::<Result<_, _>>()?,
                    ),
                };
                if let Attribute::One(target) = &attr {
                    // `net.attr` becomes a usable reference, unless it is also a var.
                    scope.names.entry(format!("{path}.{name}")).or_insert(*target);
                }
                b.set_attribute(*id, name, attr);
            }
        }

        for (id, path, net) in &networks {
            for (i, c) in net.connections.iter().enumerate() {
                let pre = scope.endpoint(&c.pre)?;
                let post = scope.endpoint(&c.post)?;
                let cid = b.add_connection(
                    *id,
                    pre,
                    post,
                    ConnectionParams {
                        label: c.label.clone().or_else(|| c.var.clone()),
                        function: c.function,
                        transform: c.transform.clone(),
                        synapse: c.synapse,
                        solver: c.solver,
                    },
                );
                register(&mut b, &mut scope, cid, c.var.as_deref(), path, "connections", i)?;
            }
        }

        for (id, path, net) in &networks {
            for (i, p) in net.probes.iter().enumerate() {
                let target = scope.endpoint(&p.target)?.target;
                let pid = b.add_probe(*id, target, &p.attr, p.sample_every);
                register(&mut b, &mut scope, pid, p.var.as_deref(), path, "probes", i)?;
            }
        }

        b.build()
    }
}

fn register(
    b: &mut ModelBuilder,
    scope: &mut Scope,
    id: ObjectId,
    var: Option<&str>,
    net_path: &str,
    list: &str,
    index: usize,
) -> Result<(), ModelError> {
    if let Some(var) = var {
        scope.define(var.to_string(), id)?;
        b.bind(var, id);
    }
    scope
        .names
        .entry(format!("{net_path}.{list}[{index}]"))
        .or_insert(id);
    Ok(())
}

/// Create every ensemble, node and subnetwork below `id`, depth first.
fn declare<'f>(
    b: &mut ModelBuilder,
    scope: &mut Scope,
    id: ObjectId,
    path: &str,
    net: &'f NetworkFile,
    out: &mut Vec<(ObjectId, String, &'f NetworkFile)>,
) -> Result<(), ModelError> {
    out.push((id, path.to_string(), net));

    for (i, e) in net.ensembles.iter().enumerate() {
        let label = e.label.as_deref().or(e.var.as_deref());
        let eid = b.add_ensemble(id, label, e.params);
        register(b, scope, eid, e.var.as_deref(), path, "ensembles", i)?;
    }
    for (i, n) in net.nodes.iter().enumerate() {
        let label = n.label.as_deref().or(n.var.as_deref());
        let nid = b.add_node(id, label, n.output.clone());
        register(b, scope, nid, n.var.as_deref(), path, "nodes", i)?;
    }
    for (i, sub) in net.networks.iter().enumerate() {
        let label = sub.label.as_deref().or(sub.var.as_deref());
        let class_type = sub.class_type.as_deref().unwrap_or("Network");
        let sid = b.add_network(id, label, class_type);
        register(b, scope, sid, sub.var.as_deref(), path, "networks", i)?;
        let sub_path = match sub.var.as_deref() {
            Some(var) => var.to_string(),
            None => format!("{path}.networks[{i}]"),
        };
        declare(b, scope, sid, &sub_path, sub, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectKind;

    const FILE: &str = r#"{
        "var": "model",
        "seed": 3,
        "nodes": [{ "var": "stim", "output": { "type": "constant", "value": [0.2, -0.4] } }],
        "ensembles": [
            { "var": "a", "n_neurons": 20, "dimensions": 2 },
            { "n_neurons": 10, "neuron_type": { "type": "RectifiedLinear" } }
        ],
        "networks": [{
            "var": "layer",
            "class_type": "EnsembleArray",
            "ensembles": [{}, {}],
            "attributes": { "output": "layer.ensembles[1]" },
            "connections": [{ "pre": "model.ensembles[1]", "post": "layer.ensembles[0]" }]
        }],
        "connections": [
            { "var": "c1", "pre": "stim", "post": "a" },
            { "pre": "a[0:1]", "post": "model.ensembles[1]", "function": "square", "synapse": null },
            { "pre": "a.neurons", "post": "layer.output", "transform": [[0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001, 0.001]] }
        ],
        "probes": [{ "target": "c1", "attr": "weights", "sample_every": 5 }]
    }"#;

    #[test]
    fn loads_nested_file_with_references() {
        let model = from_json(FILE).unwrap();
        assert_eq!(model.seed(), 3);
        assert_eq!(model.n_neurons(model.root()), 20 + 10 + 50 + 50);
        assert_eq!(model.connections().count(), 4);

        let vars: Vec<&str> = model.bindings().iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(vars, ["model", "a", "stim", "layer", "c1"]);

        let (_, sliced) = model.connections().nth(1).unwrap();
        assert_eq!(sliced.pre.slice, Some((0, 1)));
        assert_eq!(sliced.synapse, None);
        assert_eq!(sliced.function, Function::Square);

        let (_, from_neurons) = model.connections().nth(2).unwrap();
        assert!(matches!(from_neurons.pre.target, Target::Neurons(_)));

        let (_, probe) = model.probes().next().unwrap();
        assert_eq!(probe.sample_every, 5);
        assert_eq!(model.kind(probe.target.id()), Some(ObjectKind::Connection));
    }

    #[test]
    fn dangling_references_fail() {
        let err = from_json(r#"{ "connections": [{ "pre": "x", "post": "y" }] }"#).unwrap_err();
        assert!(matches!(err, ModelError::UnknownReference(name) if name == "x"));
    }

    #[test]
    fn duplicate_vars_fail() {
        let err = from_json(
            r#"{ "ensembles": [{ "var": "a" }], "nodes": [{ "var": "a", "output": { "type": "sine" } }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateBinding(_)));
    }

    #[test]
    fn slice_suffix_needs_a_colon() {
        assert_eq!(split_slice("a[1:3]"), Some(("a", 1, 3)));
        assert_eq!(split_slice("net.ensembles[0]"), None);
        assert_eq!(split_slice("net.ensembles[0][0:2]"), Some(("net.ensembles[0]", 0, 2)));
    }
}
