//! Layout oracle: positions for the view graph.

use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::TAU;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use neurobridge::prng::Prng;

use crate::view::ViewGraph;

pub type Positions = BTreeMap<String, [f64; 3]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutAlgorithm {
    #[default]
    Spring,
    KamadaKawai,
    Circular,
    Shell,
    Random,
    Planar,
    Spectral,
    Spiral,
    Bipartite,
    Multipartite,
    Hierarchical,
}

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("layout {0:?} is not available")]
    Unsupported(LayoutAlgorithm),
    #[error("nothing to lay out")]
    EmptyGraph,
    #[error("layouts are 2D or 3D, not {0}D")]
    Dimension(usize),
}

pub trait LayoutOracle {
    fn layout(&self, view: &ViewGraph, algorithm: LayoutAlgorithm, dim: usize) -> Result<Positions, LayoutError>;
}

/// Pure-Rust layouts. Output is centered but not yet rescaled.
#[derive(Debug, Clone)]
pub struct BuiltinLayout {
    pub seed: u64,
    pub iterations: usize,
}

impl Default for BuiltinLayout {
    fn default() -> Self {
        Self {
            seed: 0,
            iterations: 50,
        }
    }
}

impl LayoutOracle for BuiltinLayout {
    fn layout(&self, view: &ViewGraph, algorithm: LayoutAlgorithm, dim: usize) -> Result<Positions, LayoutError> {
        if dim != 2 && dim != 3 {
            return Err(LayoutError::Dimension(dim));
        }
        if view.is_empty() {
            return Err(LayoutError::EmptyGraph);
        }
        let coords = match algorithm {
            LayoutAlgorithm::Circular => circular(view),
            LayoutAlgorithm::Shell => shell(view),
            LayoutAlgorithm::Spiral => spiral(view),
            LayoutAlgorithm::Random => random(view, dim, self.seed),
            LayoutAlgorithm::Spring => spring(view, dim, self.seed, self.iterations),
            LayoutAlgorithm::Hierarchical => hierarchical(view),
            LayoutAlgorithm::Bipartite => bipartite(view),
            LayoutAlgorithm::Multipartite => multipartite(view),
            LayoutAlgorithm::KamadaKawai | LayoutAlgorithm::Planar | LayoutAlgorithm::Spectral => {
                return Err(LayoutError::Unsupported(algorithm))
            }
        };
        Ok(view
            .graph
            .node_indices()
            .map(|i| (view.graph[i].name.clone(), coords[i.index()]))
            .collect())
    }
}

/// Center on the mean and scale so the largest coordinate is `extent`.
pub fn rescale(positions: &mut Positions, extent: f64) {
    let n = positions.len();
    if n == 0 {
        return;
    }
    let mut mean = [0.0; 3];
    for p in positions.values() {
        for d in 0..3 {
            mean[d] += p[d] / n as f64;
        }
    }
    let mut lim: f64 = 0.0;
    for p in positions.values_mut() {
        for d in 0..3 {
            p[d] -= mean[d];
            lim = lim.max(p[d].abs());
        }
    }
    if lim > 0.0 {
        let s = extent / lim;
        for p in positions.values_mut() {
            for v in p.iter_mut() {
                *v *= s;
            }
        }
    }
}

fn on_circle(i: usize, n: usize, radius: f64) -> [f64; 3] {
    let theta = TAU * i as f64 / n.max(1) as f64;
    [radius * theta.cos(), radius * theta.sin(), 0.0]
}

fn circular(view: &ViewGraph) -> Vec<[f64; 3]> {
    let n = view.len();
    (0..n).map(|i| on_circle(i, n, 1.0)).collect()
}

/// Place groups on columns `x = group`, spread vertically.
fn columns(view: &ViewGraph, group: impl Fn(NodeIndex) -> usize) -> Vec<[f64; 3]> {
    let mut count: BTreeMap<usize, usize> = BTreeMap::new();
    for i in view.graph.node_indices() {
        *count.entry(group(i)).or_default() += 1;
    }
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    view.graph
        .node_indices()
        .map(|i| {
            let g = group(i);
            let k = seen.entry(g).or_default();
            let total = count[&g];
            let y = *k as f64 - (total as f64 - 1.0) / 2.0;
            *k += 1;
            [g as f64, y, 0.0]
        })
        .collect()
}

fn shell(view: &ViewGraph) -> Vec<[f64; 3]> {
    let mut shells: BTreeMap<&str, Vec<NodeIndex>> = BTreeMap::new();
    for i in view.graph.node_indices() {
        shells.entry(view.graph[i].network.as_str()).or_default().push(i);
    }
    let mut out = vec![[0.0; 3]; view.len()];
    for (k, members) in shells.values().enumerate() {
        let radius = if k == 0 && members.len() == 1 { 0.0 } else { k as f64 + 1.0 };
        for (j, i) in members.iter().enumerate() {
            out[i.index()] = on_circle(j, members.len(), radius);
        }
    }
    out
}

fn spiral(view: &ViewGraph) -> Vec<[f64; 3]> {
    (0..view.len())
        .map(|i| {
            let theta = 0.5 + 0.8 * i as f64;
            [theta * theta.cos(), theta * theta.sin(), 0.0]
        })
        .collect()
}

fn random(view: &ViewGraph, dim: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = Prng::new(seed);
    (0..view.len())
        .map(|_| {
            let mut p = [0.0; 3];
            for v in p.iter_mut().take(dim) {
                *v = rng.next_f64_01();
            }
            p
        })
        .collect()
}

/// Fruchterman-Reingold with a linearly cooling temperature.
fn spring(view: &ViewGraph, dim: usize, seed: u64, iterations: usize) -> Vec<[f64; 3]> {
    let n = view.len();
    let mut pos = random(view, dim, seed);
    if n == 1 {
        return pos;
    }
    let k = (1.0 / n as f64).powf(1.0 / dim as f64);
    let edges: Vec<(usize, usize)> = view
        .graph
        .edge_references()
        .filter(|e| e.source() != e.target())
        .map(|e| (e.source().index(), e.target().index()))
        .collect();

    let mut temperature = 0.1;
    let cooling = temperature / (iterations.max(1) as f64 + 1.0);
    for _ in 0..iterations {
        let mut disp = vec![[0.0; 3]; n];
        for a in 0..n {
            for b in 0..n {
                if a == b {
                    continue;
                }
                let delta = sub(pos[a], pos[b]);
                let d = norm(delta).max(0.01);
                let f = k * k / d;
                for c in 0..dim {
                    disp[a][c] += delta[c] / d * f;
                }
            }
        }
        for &(a, b) in &edges {
            let delta = sub(pos[a], pos[b]);
            let d = norm(delta).max(0.01);
            let f = d * d / k;
            for c in 0..dim {
                disp[a][c] -= delta[c] / d * f;
                disp[b][c] += delta[c] / d * f;
            }
        }
        for (p, d) in pos.iter_mut().zip(&disp) {
            let len = norm(*d);
            if len > 0.0 {
                let step = len.min(temperature);
                for c in 0..dim {
                    p[c] += d[c] / len * step;
                }
            }
        }
        temperature -= cooling;
    }
    pos
}

/// BFS levels from the sources; unreached nodes seed further passes.
fn hierarchical(view: &ViewGraph) -> Vec<[f64; 3]> {
    let g = &view.graph;
    let mut level: Vec<Option<usize>> = vec![None; g.node_count()];
    let sources: Vec<NodeIndex> = g
        .node_indices()
        .filter(|i| g.edges_directed(*i, Direction::Incoming).all(|e| e.source() == *i))
        .collect();
    let mut seeds: VecDeque<NodeIndex> = sources.into_iter().chain(g.node_indices()).collect();

    while let Some(seed) = seeds.pop_front() {
        if level[seed.index()].is_some() {
            continue;
        }
        level[seed.index()] = Some(0);
        let mut queue = VecDeque::from([seed]);
        while let Some(u) = queue.pop_front() {
            let next = level[u.index()].unwrap_or(0) + 1;
            for v in g.neighbors_directed(u, Direction::Outgoing) {
                if level[v.index()].is_none() {
                    level[v.index()] = Some(next);
                    queue.push_back(v);
                }
            }
        }
    }
    columns(view, |i| level[i.index()].unwrap_or(0))
        .into_iter()
        .map(|[x, y, z]| [y, -x, z])
        .collect()
}

/// Two-coloring by BFS parity over undirected edges.
fn bipartite(view: &ViewGraph) -> Vec<[f64; 3]> {
    let g = &view.graph;
    let mut side: Vec<Option<usize>> = vec![None; g.node_count()];
    for start in g.node_indices() {
        if side[start.index()].is_some() {
            continue;
        }
        side[start.index()] = Some(0);
        let mut queue = VecDeque::from([start]);
        while let Some(u) = queue.pop_front() {
            let s = side[u.index()].unwrap_or(0);
            for v in g.neighbors_undirected(u) {
                if side[v.index()].is_none() {
                    side[v.index()] = Some(1 - s);
                    queue.push_back(v);
                }
            }
        }
    }
    columns(view, |i| side[i.index()].unwrap_or(0))
}

/// One column per object kind.
fn multipartite(view: &ViewGraph) -> Vec<[f64; 3]> {
    let kinds: BTreeMap<&str, usize> = {
        let mut names: Vec<&str> = view.graph.node_weights().map(|n| n.kind.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.into_iter().enumerate().map(|(i, k)| (k, i)).collect()
    };
    columns(view, |i| kinds.get(view.graph[i].kind.as_str()).copied().unwrap_or(0))
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(a: [f64; 3]) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorGraph;
    use crate::view::project;
    use neurobridge::model::Model;
    use neurobridge::resolver::NameResolver;
    use neurobridge::snapshot::ModelAdapter;
    use std::collections::BTreeSet;

    fn demo_view() -> ViewGraph {
        let model = Model::demo();
        let names = NameResolver::new(&model);
        let mirror = MirrorGraph::from_snapshot(&ModelAdapter::new(&model, &names).snapshot());
        project(&mirror, &BTreeSet::new())
    }

    #[test]
    fn every_supported_algorithm_places_every_node() {
        let view = demo_view();
        let oracle = BuiltinLayout::default();
        for algo in [
            LayoutAlgorithm::Circular,
            LayoutAlgorithm::Shell,
            LayoutAlgorithm::Spiral,
            LayoutAlgorithm::Random,
            LayoutAlgorithm::Spring,
            LayoutAlgorithm::Hierarchical,
            LayoutAlgorithm::Bipartite,
            LayoutAlgorithm::Multipartite,
        ] {
            for dim in [2, 3] {
                let pos = oracle.layout(&view, algo, dim).unwrap();
                assert_eq!(pos.len(), view.len(), "{algo:?}");
                assert!(pos.values().flatten().all(|v| v.is_finite()), "{algo:?}");
                if dim == 2 {
                    assert!(pos.values().all(|p| p[2] == 0.0), "{algo:?}");
                }
            }
        }
    }

    #[test]
    fn unsupported_and_invalid_requests() {
        let view = demo_view();
        let oracle = BuiltinLayout::default();
        for algo in [LayoutAlgorithm::KamadaKawai, LayoutAlgorithm::Planar, LayoutAlgorithm::Spectral] {
            assert_eq!(oracle.layout(&view, algo, 2), Err(LayoutError::Unsupported(algo)));
        }
        assert_eq!(oracle.layout(&view, LayoutAlgorithm::Circular, 4), Err(LayoutError::Dimension(4)));
        assert_eq!(
            oracle.layout(&ViewGraph::default(), LayoutAlgorithm::Circular, 2),
            Err(LayoutError::EmptyGraph)
        );
    }

    #[test]
    fn hierarchical_puts_sources_on_top() {
        let pos = BuiltinLayout::default()
            .layout(&demo_view(), LayoutAlgorithm::Hierarchical, 2)
            .unwrap();
        assert!(pos["stim"][1] > pos["a"][1]);
        assert!(pos["a"][1] > pos["squared"][1]);
        assert_eq!(pos["squared"][1], pos["layer"][1]);
    }

    #[test]
    fn spring_is_seeded() {
        let view = demo_view();
        let a = BuiltinLayout { seed: 5, iterations: 30 };
        let first = a.layout(&view, LayoutAlgorithm::Spring, 3).unwrap();
        assert_eq!(first, a.layout(&view, LayoutAlgorithm::Spring, 3).unwrap());
        let other = BuiltinLayout { seed: 6, iterations: 30 }
            .layout(&view, LayoutAlgorithm::Spring, 3)
            .unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn rescale_centers_and_fits_extent() {
        let mut pos = BuiltinLayout::default()
            .layout(&demo_view(), LayoutAlgorithm::Circular, 2)
            .unwrap();
        rescale(&mut pos, 10.0);
        let lim = pos.values().flatten().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!((lim - 10.0).abs() < 1e-9);
        let mean_x: f64 = pos.values().map(|p| p[0]).sum::<f64>() / pos.len() as f64;
        assert!(mean_x.abs() < 1e-9);
    }

    #[test]
    fn algorithm_names_match_settings_spelling() {
        let a: LayoutAlgorithm = serde_json::from_str("\"KAMADA_KAWAI\"").unwrap();
        assert_eq!(a, LayoutAlgorithm::KamadaKawai);
        assert_eq!(serde_json::to_string(&LayoutAlgorithm::Multipartite).unwrap(), "\"MULTIPARTITE\"");
    }
}
