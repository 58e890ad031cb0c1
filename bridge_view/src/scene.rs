//! Scene adapter and the reconciler that keeps scene objects in step with
//! the view graph.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::axes::AxesDrawing;
use crate::color::Rgb;
use crate::coloring::Colors;
use crate::layout::Positions;
use crate::view::ViewGraph;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Shortest rotation taking `from` onto `to`.
    pub fn rotation_between(from: [f64; 3], to: [f64; 3]) -> Quat {
        let (Some(a), Some(b)) = (normalize(from), normalize(to)) else {
            return Quat::IDENTITY;
        };
        let d = dot(a, b);
        if d >= 1.0 - 1e-12 {
            return Quat::IDENTITY;
        }
        if d <= -1.0 + 1e-12 {
            // Opposite: half turn about any axis orthogonal to `a`.
            let axis = normalize(cross(a, [1.0, 0.0, 0.0]))
                .or_else(|| normalize(cross(a, [0.0, 1.0, 0.0])))
                .unwrap_or([0.0, 0.0, 1.0]);
            return Quat {
                w: 0.0,
                x: axis[0],
                y: axis[1],
                z: axis[2],
            };
        }
        let c = cross(a, b);
        Quat {
            w: 1.0 + d,
            x: c[0],
            y: c[1],
            z: c[2],
        }
        .normalized()
    }

    pub fn normalized(self) -> Quat {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n == 0.0 {
            return Quat::IDENTITY;
        }
        Quat {
            w: self.w / n,
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
        }
    }

    pub fn rotate(&self, v: [f64; 3]) -> [f64; 3] {
        let u = [self.x, self.y, self.z];
        let t = scale(cross(u, v), 2.0);
        add(add(v, scale(t, self.w)), cross(u, t))
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: [f64; 3]) -> Option<[f64; 3]> {
    let n = norm(a);
    (n > 1e-12).then(|| scale(a, 1.0 / n))
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshKind {
    Sphere { radius: f64 },
    Cube { size: f64 },
    /// Along +X from the object origin: shaft, then head.
    Arrow {
        shaft_length: f64,
        head_length: f64,
        radius: f64,
    },
    Loop { radius: f64 },
    Curve { points: Vec<[f64; 3]> },
    Label { text: String },
}

/// What a host scene must offer. Calls on unknown names are ignored.
pub trait SceneAdapter {
    fn exists(&self, name: &str) -> bool;
    fn create(&mut self, name: &str, mesh: MeshKind);
    fn update_mesh(&mut self, name: &str, mesh: MeshKind);
    fn set_location(&mut self, name: &str, location: [f64; 3]);
    fn set_rotation(&mut self, name: &str, rotation: Quat);
    fn set_weight(&mut self, name: &str, weight: f64);
    fn set_color(&mut self, name: &str, color: Rgb);
    fn destroy(&mut self, name: &str);
    fn names(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub mesh: MeshKind,
    pub location: [f64; 3],
    pub rotation: Quat,
    pub weight: f64,
    pub color: Rgb,
}

/// In-memory scene for tests and the headless binary.
#[derive(Debug, Clone, Default)]
pub struct RecordingScene {
    pub objects: BTreeMap<String, SceneObject>,
    pub created: usize,
    pub destroyed: usize,
}

impl RecordingScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SceneObject> {
        self.objects.get(name)
    }
}

impl SceneAdapter for RecordingScene {
    fn exists(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    fn create(&mut self, name: &str, mesh: MeshKind) {
        self.created += 1;
        self.objects.insert(
            name.to_string(),
            SceneObject {
                mesh,
                location: [0.0; 3],
                rotation: Quat::IDENTITY,
                weight: 1.0,
                color: Rgb::default(),
            },
        );
    }

    fn update_mesh(&mut self, name: &str, mesh: MeshKind) {
        if let Some(o) = self.objects.get_mut(name) {
            o.mesh = mesh;
        }
    }

    fn set_location(&mut self, name: &str, location: [f64; 3]) {
        if let Some(o) = self.objects.get_mut(name) {
            o.location = location;
        }
    }

    fn set_rotation(&mut self, name: &str, rotation: Quat) {
        if let Some(o) = self.objects.get_mut(name) {
            o.rotation = rotation;
        }
    }

    fn set_weight(&mut self, name: &str, weight: f64) {
        if let Some(o) = self.objects.get_mut(name) {
            o.weight = weight;
        }
    }

    fn set_color(&mut self, name: &str, color: Rgb) {
        if let Some(o) = self.objects.get_mut(name) {
            o.color = color;
        }
    }

    fn destroy(&mut self, name: &str) {
        if self.objects.remove(name).is_some() {
            self.destroyed += 1;
        }
    }

    fn names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Creates, updates and removes the scene objects it owns; objects put in
/// the scene by anyone else are left alone.
#[derive(Debug, Clone)]
pub struct Reconciler {
    pub node_radius: f64,
    pub head_length: f64,
    owned: BTreeSet<String>,
    axes_owned: BTreeMap<String, BTreeSet<String>>,
}

impl Reconciler {
    pub fn new(node_radius: f64, head_length: f64) -> Self {
        Self {
            node_radius,
            head_length,
            owned: BTreeSet::new(),
            axes_owned: BTreeMap::new(),
        }
    }

    fn upsert(
        &self,
        scene: &mut dyn SceneAdapter,
        name: &str,
        mesh: MeshKind,
        stats: &mut ReconcileStats,
    ) {
        if scene.exists(name) {
            scene.update_mesh(name, mesh);
            stats.updated += 1;
        } else {
            scene.create(name, mesh);
            stats.created += 1;
        }
    }

    /// One object per view node and per view edge, positioned from `positions`.
    pub fn reconcile(
        &mut self,
        scene: &mut dyn SceneAdapter,
        view: &ViewGraph,
        positions: &Positions,
        colors: &Colors,
    ) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let mut live = BTreeSet::new();

        for node in view.graph.node_weights() {
            let Some(pos) = positions.get(&node.name) else {
                warn!(node = %node.name, "no layout position; not drawn");
                continue;
            };
            let mesh = if node.collapsed {
                MeshKind::Cube {
                    size: 2.0 * self.node_radius,
                }
            } else {
                MeshKind::Sphere {
                    radius: self.node_radius,
                }
            };
            self.upsert(scene, &node.name, mesh, &mut stats);
            scene.set_location(&node.name, *pos);
            scene.set_color(&node.name, colors.get(&node.name).copied().unwrap_or_default());
            live.insert(node.name.clone());
        }

        for edge in view.graph.edge_weights() {
            let (Some(s), Some(t)) = (positions.get(&edge.pre), positions.get(&edge.post)) else {
                continue;
            };
            let dir = sub(*t, *s);
            let mesh = match normalize(dir) {
                Some(unit) if edge.pre != edge.post => {
                    let shaft = (norm(dir) - self.node_radius - self.head_length).max(0.0);
                    self.upsert(
                        scene,
                        &edge.name,
                        MeshKind::Arrow {
                            shaft_length: shaft,
                            head_length: self.head_length,
                            radius: self.node_radius * 0.1,
                        },
                        &mut stats,
                    );
                    scene.set_location(&edge.name, add(*s, scale(unit, self.node_radius)));
                    scene.set_rotation(&edge.name, Quat::rotation_between([1.0, 0.0, 0.0], dir));
                    None
                }
                _ => Some(MeshKind::Loop {
                    radius: self.node_radius,
                }),
            };
            if let Some(mesh) = mesh {
                self.upsert(scene, &edge.name, mesh, &mut stats);
                scene.set_location(&edge.name, add(*s, [0.0, self.node_radius, 0.0]));
                scene.set_rotation(&edge.name, Quat::IDENTITY);
            }
            scene.set_color(&edge.name, colors.get(&edge.name).copied().unwrap_or_default());
            live.insert(edge.name.clone());
        }

        for stale in self.owned.difference(&live) {
            scene.destroy(stale);
            stats.removed += 1;
        }
        self.owned = live;
        debug!(?stats, "scene reconciled");
        stats
    }

    /// Recolor owned objects only; used on timeline ticks.
    pub fn apply_colors(&self, scene: &mut dyn SceneAdapter, colors: &Colors) {
        for (name, color) in colors {
            if self.owned.contains(name) {
                scene.set_color(name, *color);
            }
        }
    }

    pub fn apply_weights(&self, scene: &mut dyn SceneAdapter, weights: &BTreeMap<String, f64>) {
        for (name, weight) in weights {
            if self.owned.contains(name) {
                scene.set_weight(name, *weight);
            }
        }
    }

    /// Draw axes as curves and tick labels in a cube of side `size` at `origin`.
    pub fn draw_axes(&mut self, scene: &mut dyn SceneAdapter, drawing: &AxesDrawing, origin: [f64; 3], size: f64) {
        let mut stats = ReconcileStats::default();
        let mut live = BTreeSet::new();
        let place = |p: [f64; 3]| add(origin, scale(p, size));

        let title = format!("{}/title", drawing.name);
        self.upsert(scene, &title, MeshKind::Label { text: drawing.title.clone() }, &mut stats);
        scene.set_location(&title, place([0.5, 1.1, 0.0]));
        live.insert(title);

        for curve in &drawing.curves {
            let name = format!("{}/{}", drawing.name, curve.name);
            let points = curve.points.iter().map(|p| place(*p)).collect();
            self.upsert(scene, &name, MeshKind::Curve { points }, &mut stats);
            scene.set_color(&name, curve.color);
            live.insert(name);
        }

        for (axis, ticks) in drawing.ticks.iter().enumerate() {
            let span = match (ticks.first(), ticks.last()) {
                (Some(a), Some(b)) if b.value != a.value => Some((a.value, b.value - a.value)),
                _ => None,
            };
            for (i, tick) in ticks.iter().enumerate() {
                let name = format!("{}/{}{}", drawing.name, ["x", "y", "z"][axis], i);
                let frac = span.map_or(0.5, |(lo, w)| (tick.value - lo) / w);
                let mut at = [0.0; 3];
                at[axis] = frac;
                self.upsert(scene, &name, MeshKind::Label { text: tick.label.clone() }, &mut stats);
                scene.set_location(&name, place(at));
                live.insert(name);
            }
        }

        let owned = self.axes_owned.entry(drawing.name.clone()).or_default();
        for stale in owned.difference(&live) {
            scene.destroy(stale);
        }
        *owned = live;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{ViewEdge, ViewNode};

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        (0..3).all(|i| (a[i] - b[i]).abs() < 1e-9)
    }

    fn view(edges: &[(&str, &str, &str)], nodes: &[&str]) -> ViewGraph {
        let mut v = ViewGraph::default();
        let mut idx = BTreeMap::new();
        for n in nodes {
            idx.insert(
                n.to_string(),
                v.graph.add_node(ViewNode {
                    name: n.to_string(),
                    kind: "Ensemble".to_string(),
                    network: "model".to_string(),
                    collapsed: false,
                }),
            );
        }
        for (name, pre, post) in edges {
            v.graph.add_edge(
                idx[*pre],
                idx[*post],
                ViewEdge {
                    name: name.to_string(),
                    pre: pre.to_string(),
                    post: post.to_string(),
                },
            );
        }
        v
    }

    #[test]
    fn rotation_maps_x_onto_direction() {
        for dir in [[0.0, 3.0, 0.0], [1.0, 1.0, 1.0], [-2.0, 0.0, 0.0], [0.0, 0.0, -1.0]] {
            let q = Quat::rotation_between([1.0, 0.0, 0.0], dir);
            let expected = normalize(dir).unwrap();
            assert!(close(q.rotate([1.0, 0.0, 0.0]), expected), "{dir:?}");
        }
        assert_eq!(Quat::rotation_between([1.0, 0.0, 0.0], [0.0; 3]), Quat::IDENTITY);
    }

    #[test]
    fn arrow_geometry_follows_endpoints() {
        let v = view(&[("c0", "a", "b"), ("c1", "b", "b")], &["a", "b"]);
        let positions: Positions = [
            ("a".to_string(), [0.0, 0.0, 0.0]),
            ("b".to_string(), [0.0, 4.0, 0.0]),
        ]
        .into();
        let mut scene = RecordingScene::new();
        let mut rec = Reconciler::new(0.5, 0.25);
        let stats = rec.reconcile(&mut scene, &v, &positions, &Colors::new());
        assert_eq!(stats.created, 4);

        let arrow = scene.get("c0").unwrap();
        assert_eq!(
            arrow.mesh,
            MeshKind::Arrow {
                shaft_length: 3.25,
                head_length: 0.25,
                radius: 0.05
            }
        );
        assert!(close(arrow.location, [0.0, 0.5, 0.0]));
        assert!(close(arrow.rotation.rotate([1.0, 0.0, 0.0]), [0.0, 1.0, 0.0]));
        assert!(matches!(scene.get("c1").unwrap().mesh, MeshKind::Loop { .. }));
    }

    #[test]
    fn short_edges_clamp_and_stale_objects_go() {
        let positions: Positions = [
            ("a".to_string(), [0.0, 0.0, 0.0]),
            ("b".to_string(), [0.5, 0.0, 0.0]),
        ]
        .into();
        let mut scene = RecordingScene::new();
        scene.create("foreign", MeshKind::Cube { size: 1.0 });
        let mut rec = Reconciler::new(0.5, 0.25);
        rec.reconcile(&mut scene, &view(&[("c0", "a", "b")], &["a", "b"]), &positions, &Colors::new());
        assert!(matches!(
            scene.get("c0").unwrap().mesh,
            MeshKind::Arrow { shaft_length, .. } if shaft_length == 0.0
        ));

        let stats = rec.reconcile(&mut scene, &view(&[], &["a"]), &positions, &Colors::new());
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.removed, 2);
        assert_eq!(scene.names(), vec!["a".to_string(), "foreign".to_string()]);
    }

    #[test]
    fn recolor_touches_only_owned_objects() {
        let positions: Positions = [("a".to_string(), [0.0; 3])].into();
        let mut scene = RecordingScene::new();
        scene.create("foreign", MeshKind::Cube { size: 1.0 });
        let mut rec = Reconciler::new(0.5, 0.25);
        rec.reconcile(&mut scene, &view(&[], &["a"]), &positions, &Colors::new());
        let red = Rgb::new(1.0, 0.0, 0.0);
        let colors: Colors = [("a".to_string(), red), ("foreign".to_string(), red)].into();
        rec.apply_colors(&mut scene, &colors);
        rec.apply_weights(&mut scene, &[("a".to_string(), 0.3)].into());
        assert_eq!(scene.get("a").unwrap().color, red);
        assert_eq!(scene.get("a").unwrap().weight, 0.3);
        assert_eq!(scene.get("foreign").unwrap().color, Rgb::default());
    }
}
