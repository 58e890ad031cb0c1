//! Deterministic canonical names for model objects.
//!
//! Names come from three sources, in priority order:
//! 1. externally supplied bindings (variable names not starting with `_`),
//! 2. public network attributes, `<net>.<attr>` or `<net>.<attr>[i]`,
//! 3. the fixed child lists, `<net>.ensembles[i]`, `<net>.nodes[i]`, ...
//!
//! The first name reached for an object wins. Walking the same model twice
//! yields the same table. A path name already claimed by another object gets
//! a `_<n>` suffix, so every reachable object ends up named.

use std::collections::HashMap;

use tracing::warn;

use crate::model::{Attribute, Endpoint, Model, ObjectId, Target};

pub const ROOT_NAME: &str = "model";

#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    names: HashMap<ObjectId, String>,
    objects: HashMap<String, ObjectId>,
    order: Vec<ObjectId>,
}

impl NameResolver {
    pub fn new(model: &Model) -> Self {
        let mut r = Self::default();
        for (var, id) in model.bindings() {
            if var.starts_with('_') || model.get(*id).is_none() {
                continue;
            }
            // A binding that loses a clash is named by the walk instead.
            if !r.objects.contains_key(var) {
                r.assign(*id, var.clone());
            }
        }
        r.assign(model.root(), ROOT_NAME.to_string());
        r.walk(model, model.root());
        r
    }

    fn assign(&mut self, id: ObjectId, name: String) {
        if self.names.contains_key(&id) {
            return;
        }
        let name = if self.objects.contains_key(&name) {
            let unique = (1usize..)
                .map(|n| format!("{name}_{n}"))
                .find(|candidate| !self.objects.contains_key(candidate))
                .unwrap_or_default();
            warn!(object = id.0, taken = %name, renamed = %unique, "name already in use; disambiguated");
            unique
        } else {
            name
        };
        self.objects.insert(name.clone(), id);
        self.names.insert(id, name);
        self.order.push(id);
    }

    fn walk(&mut self, model: &Model, net_id: ObjectId) {
        let Some(net) = model.network(net_id) else {
            return;
        };
        let Some(prefix) = self.names.get(&net_id).cloned() else {
            return;
        };

        for (attr, value) in &net.attributes {
            match value {
                Attribute::One(id) => self.assign(*id, format!("{prefix}.{attr}")),
                Attribute::Many(ids) => {
                    for (i, id) in ids.iter().enumerate() {
                        self.assign(*id, format!("{prefix}.{attr}[{i}]"));
                    }
                }
            }
        }

        for (list, ids) in net.child_lists() {
            for (i, id) in ids.iter().enumerate() {
                self.assign(*id, format!("{prefix}.{list}[{i}]"));
            }
        }

        for sub in &net.networks {
            self.walk(model, *sub);
        }
    }

    pub fn name(&self, id: ObjectId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn object(&self, name: &str) -> Option<ObjectId> {
        self.objects.get(name).copied()
    }

    /// Neurons are named after their ensemble.
    pub fn target_name(&self, target: Target) -> Option<&str> {
        self.name(target.id())
    }

    /// Slices are named after the object they view.
    pub fn endpoint_name(&self, endpoint: &Endpoint) -> Option<&str> {
        self.target_name(endpoint.target)
    }

    /// Names in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &str)> {
        self.order
            .iter()
            .filter_map(|id| self.name(*id).map(|n| (*id, n)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionParams, EnsembleParams, ModelBuilder, NodeOutput};

    fn nested() -> (Model, Vec<ObjectId>) {
        let mut b = ModelBuilder::new("net");
        let a = b.node("a", NodeOutput::constant(vec![1.0]));
        let hidden = b.add_ensemble(b.root(), None, EnsembleParams::default());
        b.bind("_tmp", hidden);
        let sub = b.begin_network("sub", "EnsembleArray");
        let e0 = b.add_ensemble(sub, None, EnsembleParams::default());
        let e1 = b.add_ensemble(sub, None, EnsembleParams::default());
        b.set_attribute(sub, "output", Attribute::One(e1));
        b.end_network();
        let c = b.connect(a, e0, ConnectionParams::default());
        (b.build().unwrap(), vec![a, hidden, sub, e0, e1, c])
    }

    #[test]
    fn bindings_then_attributes_then_lists() {
        let (model, ids) = nested();
        let r = NameResolver::new(&model);
        assert_eq!(r.name(model.root()), Some("net"));
        assert_eq!(r.name(ids[0]), Some("a"));
        // Underscore bindings are private.
        assert_eq!(r.name(ids[1]), Some("net.ensembles[0]"));
        assert_eq!(r.name(ids[2]), Some("sub"));
        assert_eq!(r.name(ids[3]), Some("sub.ensembles[0]"));
        assert_eq!(r.name(ids[4]), Some("sub.output"));
        assert_eq!(r.name(ids[5]), Some("net.connections[0]"));
    }

    #[test]
    fn total_and_invertible() {
        let model = Model::demo();
        let r = NameResolver::new(&model);
        assert_eq!(r.len(), model.len());
        for id in model.ids() {
            let name = r.name(id).unwrap();
            assert_eq!(r.object(name), Some(id));
        }
    }

    #[test]
    fn idempotent_across_walks() {
        let model = Model::demo();
        let first: Vec<(ObjectId, String)> = NameResolver::new(&model)
            .iter()
            .map(|(id, n)| (id, n.to_string()))
            .collect();
        let second: Vec<(ObjectId, String)> = NameResolver::new(&model)
            .iter()
            .map(|(id, n)| (id, n.to_string()))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn unbound_root_is_model() {
        let mut b = ModelBuilder::new("_root");
        let e = b.add_ensemble(b.root(), None, EnsembleParams::default());
        let model = b.build().unwrap();
        let r = NameResolver::new(&model);
        assert_eq!(r.name(model.root()), Some("model"));
        assert_eq!(r.name(e), Some("model.ensembles[0]"));
        assert_eq!(r.target_name(Target::Neurons(e)), Some("model.ensembles[0]"));
    }

    #[test]
    fn clashing_binding_leaves_every_object_named() {
        let mut b = ModelBuilder::new("_root");
        let e = b.add_ensemble(b.root(), None, EnsembleParams::default());
        let sub = b.begin_network("sub", "Network");
        let inner = b.add_ensemble(sub, None, EnsembleParams::default());
        b.end_network();
        b.bind("model", e);
        b.bind("sub", inner);
        let model = b.build().unwrap();
        let r = NameResolver::new(&model);

        assert_eq!(r.name(e), Some("model"));
        assert_eq!(r.name(model.root()), Some("model_1"));
        assert_eq!(r.len(), model.len());
        for id in model.ids() {
            let name = r.name(id).unwrap();
            assert_eq!(r.object(name), Some(id));
        }
    }
}
