//! Viewer-side mirror of the backend model, rebuilt from every `NetworkSchema`.
//!
//! Each network is a petgraph `DiGraph` of its own ensembles/nodes plus one
//! node per direct subnetwork; subnetworks hang off `networks`. A connection is
//! stored in the deepest network that contains both of its endpoints, attached
//! to the endpoint itself or to the child-network node that contains it. Edges
//! always remember the real `pre`/`post` names.
//!
//! `DiGraph` keeps parallel edges and self-loops, so two connections between
//! the same pair of objects stay distinct.

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value};

use neurobridge::access_path::segments;
use neurobridge::model::ObjectKind;
use neurobridge::schema::{ConnectionSnapshot, NetworkSnapshot};

pub type Attrs = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorNode {
    pub name: String,
    /// `Ensemble`, `Node` or `Network`.
    pub kind: String,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEdge {
    pub name: String,
    pub pre: String,
    pub post: String,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Default)]
pub struct MirrorGraph {
    name: String,
    attrs: Attrs,
    graph: DiGraph<MirrorNode, MirrorEdge>,
    index: HashMap<String, NodeIndex>,
    networks: BTreeMap<String, MirrorGraph>,
}

impl MirrorGraph {
    pub fn from_snapshot(snap: &NetworkSnapshot) -> Self {
        let mut root = Self::structure(snap);
        let mut connections = Vec::new();
        collect_connections(snap, &mut connections);
        for (name, conn) in connections {
            root.place_edge(name, conn);
        }
        root
    }

    /// Nodes and subnetworks, no edges yet.
    fn structure(snap: &NetworkSnapshot) -> Self {
        let mut g = Self {
            name: snap.network_name.clone(),
            attrs: network_attrs(snap),
            ..Self::default()
        };
        for (name, node) in &snap.nodes {
            let attrs = to_attrs(node);
            g.add_node(name, &node.kind, attrs);
        }
        for (name, sub) in &snap.networks {
            let child = Self::structure(sub);
            g.add_node(name, ObjectKind::Network.as_str(), child.attrs.clone());
            g.networks.insert(name.clone(), child);
        }
        g
    }

    fn add_node(&mut self, name: &str, kind: &str, attrs: Attrs) {
        let idx = self.graph.add_node(MirrorNode {
            name: name.to_string(),
            kind: kind.to_string(),
            attrs,
        });
        self.index.insert(name.to_string(), idx);
    }

    fn place_edge(&mut self, name: String, conn: &ConnectionSnapshot) {
        let pre_path = self.path_to(&conn.pre).unwrap_or_default();
        let post_path = self.path_to(&conn.post).unwrap_or_default();
        let common = pre_path
            .iter()
            .zip(&post_path)
            .take_while(|(a, b)| a == b)
            .count();

        let mut level = &mut *self;
        for net in &pre_path[..common] {
            match level.networks.get_mut(net) {
                Some(next) => level = next,
                None => return,
            }
        }
        // Endpoints outside the tree (should not happen) are left dangling.
        let pre = pre_path.get(common).unwrap_or(&conn.pre).clone();
        let post = post_path.get(common).unwrap_or(&conn.post).clone();
        let (Some(&a), Some(&b)) = (level.index.get(&pre), level.index.get(&post)) else {
            return;
        };
        level.graph.add_edge(
            a,
            b,
            MirrorEdge {
                name,
                pre: conn.pre.clone(),
                post: conn.post.clone(),
                attrs: to_attrs(conn),
            },
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn graph(&self) -> &DiGraph<MirrorNode, MirrorEdge> {
        &self.graph
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct subnetworks.
    pub fn networks(&self) -> &BTreeMap<String, MirrorGraph> {
        &self.networks
    }

    /// Every subnetwork at any depth, parents before children.
    pub fn all_networks(&self) -> Vec<&MirrorGraph> {
        let mut out = Vec::new();
        for sub in self.networks.values() {
            out.push(sub);
            out.extend(sub.all_networks());
        }
        out
    }

    pub fn network(&self, name: &str) -> Option<&MirrorGraph> {
        if name == self.name {
            return Some(self);
        }
        self.networks.values().find_map(|n| n.network(name))
    }

    /// Lookup at any depth.
    pub fn node(&self, name: &str) -> Option<&MirrorNode> {
        if let Some(idx) = self.index.get(name) {
            return self.graph.node_weight(*idx);
        }
        self.networks.values().find_map(|n| n.node(name))
    }

    /// Names of the networks leading to `name`, outermost first; empty for
    /// objects of this network.
    pub fn path_to(&self, name: &str) -> Option<Vec<String>> {
        if self.index.contains_key(name) && !self.networks.contains_key(name) {
            return Some(Vec::new());
        }
        for (sub_name, sub) in &self.networks {
            if sub_name == name {
                return Some(Vec::new());
            }
            if let Some(mut path) = sub.path_to(name) {
                path.insert(0, sub_name.clone());
                return Some(path);
            }
        }
        None
    }

    /// Name of the network that directly contains `name`.
    pub fn containing_network(&self, name: &str) -> Option<&str> {
        let path = self.path_to(name)?;
        Some(path.last().map_or(self.name.as_str(), |last| {
            self.network(last).map_or(self.name.as_str(), MirrorGraph::name)
        }))
    }

    /// Leaf objects (ensembles and nodes) at any depth, with their network path.
    pub fn leaves(&self) -> Vec<(Vec<String>, &MirrorNode)> {
        let mut out: Vec<(Vec<String>, &MirrorNode)> = self
            .graph
            .node_weights()
            .filter(|n| !self.networks.contains_key(&n.name))
            .map(|n| (Vec::new(), n))
            .collect();
        for (sub_name, sub) in &self.networks {
            for (mut path, node) in sub.leaves() {
                path.insert(0, sub_name.clone());
                out.push((path, node));
            }
        }
        out
    }

    /// Every connection at any depth.
    pub fn edges(&self) -> Vec<&MirrorEdge> {
        let mut out: Vec<&MirrorEdge> = self.graph.edge_weights().collect();
        for sub in self.networks.values() {
            out.extend(sub.edges());
        }
        out
    }

    /// Linear scan; edges are keyed on their endpoints, not their names.
    pub fn get_edge_by_name(&self, name: &str) -> Option<(&str, &str, &MirrorEdge)> {
        for edge in self.graph.edge_references() {
            let data = edge.weight();
            if data.name == name {
                let src = &self.graph[edge.source()].name;
                let dst = &self.graph[edge.target()].name;
                return Some((src, dst, data));
            }
        }
        self.networks.values().find_map(|n| n.get_edge_by_name(name))
    }

    /// Attributes of a node or edge, whichever carries `name`.
    pub fn attrs_of(&self, name: &str) -> Option<&Attrs> {
        self.node(name)
            .map(|n| &n.attrs)
            .or_else(|| self.get_edge_by_name(name).map(|(_, _, e)| &e.attrs))
    }

    /// Read a static attribute path (`neurons.size_in`, `neuron_type`, ...).
    pub fn attribute(&self, name: &str, access_path: &str) -> Option<&Value> {
        let attrs = self.attrs_of(name)?;
        let segs = segments(access_path);
        let (first, rest) = segs.split_first()?;
        let mut value = attrs.get(*first)?;
        for seg in rest {
            value = match value {
                Value::Object(m) => m.get(*seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }
}

fn collect_connections<'a>(snap: &'a NetworkSnapshot, out: &mut Vec<(String, &'a ConnectionSnapshot)>) {
    for (name, conn) in &snap.connections {
        out.push((name.clone(), conn));
    }
    for sub in snap.networks.values() {
        collect_connections(sub, out);
    }
}

fn to_attrs<T: serde::Serialize>(value: &T) -> Attrs {
    match serde_json::to_value(value) {
        Ok(Value::Object(m)) => m,
        _ => Attrs::new(),
    }
}

fn network_attrs(snap: &NetworkSnapshot) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("type".to_string(), Value::from(snap.kind.clone()));
    attrs.insert("class_type".to_string(), Value::from(snap.class_type.clone()));
    attrs.insert("network_name".to_string(), Value::from(snap.network_name.clone()));
    attrs.insert(
        "parent_network".to_string(),
        snap.parent_network.clone().map_or(Value::Null, Value::from),
    );
    attrs.insert("n_neurons".to_string(), Value::from(snap.n_neurons));
    attrs
}
