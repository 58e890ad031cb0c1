//! View projection: the mirror flattened for drawing, with every subnetwork
//! that is not expanded collapsed into a single node.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};

use neurobridge::model::ObjectKind;

use crate::mirror::MirrorGraph;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewNode {
    pub name: String,
    pub kind: String,
    /// Network the node is drawn inside.
    pub network: String,
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewEdge {
    /// Name of the underlying connection.
    pub name: String,
    pub pre: String,
    pub post: String,
}

#[derive(Debug, Clone, Default)]
pub struct ViewGraph {
    pub graph: DiGraph<ViewNode, ViewEdge>,
    index: HashMap<String, NodeIndex>,
}

impl ViewGraph {
    pub fn node(&self, name: &str) -> Option<&ViewNode> {
        self.index.get(name).and_then(|i| self.graph.node_weight(*i))
    }

    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|n| n.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn add(&mut self, node: ViewNode) {
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(name, idx);
    }
}

/// Project `mirror` with the networks in `expanded` opened up.
///
/// Never mutates the mirror. Edges whose endpoints fall into the same
/// collapsed network disappear unless the connection was a self-loop.
pub fn project(mirror: &MirrorGraph, expanded: &BTreeSet<String>) -> ViewGraph {
    let mut view = ViewGraph::default();
    add_level(mirror, expanded, &mut view);

    for edge in mirror.edges() {
        let (Some(pre), Some(post)) = (
            representative(mirror, expanded, &edge.pre),
            representative(mirror, expanded, &edge.post),
        ) else {
            continue;
        };
        if pre == post && edge.pre != edge.post {
            continue;
        }
        let (Some(a), Some(b)) = (view.index_of(&pre), view.index_of(&post)) else {
            continue;
        };
        view.graph.add_edge(
            a,
            b,
            ViewEdge {
                name: edge.name.clone(),
                pre,
                post,
            },
        );
    }
    view
}

fn add_level(level: &MirrorGraph, expanded: &BTreeSet<String>, view: &mut ViewGraph) {
    for node in level.graph().node_weights() {
        let is_network = node.kind == ObjectKind::Network.as_str();
        if is_network && expanded.contains(&node.name) {
            continue;
        }
        view.add(ViewNode {
            name: node.name.clone(),
            kind: node.kind.clone(),
            network: level.name().to_string(),
            collapsed: is_network,
        });
    }
    for (name, sub) in level.networks() {
        if expanded.contains(name) {
            add_level(sub, expanded, view);
        }
    }
}

/// The visible node standing in for `name`: the outermost collapsed network
/// on its path, else the object itself.
fn representative(mirror: &MirrorGraph, expanded: &BTreeSet<String>, name: &str) -> Option<String> {
    let path = mirror.path_to(name)?;
    Some(
        path.into_iter()
            .find(|net| !expanded.contains(net))
            .unwrap_or_else(|| name.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurobridge::model::Model;
    use neurobridge::resolver::NameResolver;
    use neurobridge::snapshot::ModelAdapter;

    fn mirror() -> MirrorGraph {
        let model = Model::demo();
        let names = NameResolver::new(&model);
        MirrorGraph::from_snapshot(&ModelAdapter::new(&model, &names).snapshot())
    }

    fn edges(view: &ViewGraph) -> Vec<(String, String)> {
        let mut v: Vec<_> = view
            .graph
            .edge_weights()
            .map(|e| (e.pre.clone(), e.post.clone()))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn collapsed_network_absorbs_its_edges() {
        let m = mirror();
        let view = project(&m, &BTreeSet::new());
        let mut names: Vec<&str> = view.node_names().collect();
        names.sort();
        assert_eq!(names, ["a", "layer", "squared", "stim"]);
        assert!(view.node("layer").unwrap().collapsed);

        // Inner `input -> ea_ensembles[i]` edges vanish; the self-loop stays.
        assert_eq!(
            edges(&view),
            vec![
                ("a".to_string(), "layer".to_string()),
                ("a".to_string(), "layer".to_string()),
                ("a".to_string(), "squared".to_string()),
                ("squared".to_string(), "squared".to_string()),
                ("stim".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn expanded_network_shows_its_members() {
        let m = mirror();
        let expanded: BTreeSet<String> = ["layer".to_string()].into();
        let view = project(&m, &expanded);
        assert!(view.node("layer").is_none());
        assert_eq!(view.node("layer.input").unwrap().network, "layer");
        assert_eq!(view.len(), 3 + 1 + 2);
        let e = edges(&view);
        assert!(e.contains(&("layer.input".to_string(), "layer.ea_ensembles[0]".to_string())));
        assert_eq!(e.iter().filter(|(p, q)| p == "a" && q == "layer.input").count(), 2);
    }

    #[test]
    fn projection_leaves_the_mirror_alone() {
        let m = mirror();
        let before = m.graph().node_count();
        let _ = project(&m, &["layer".to_string()].into());
        assert_eq!(m.graph().node_count(), before);
    }
}
