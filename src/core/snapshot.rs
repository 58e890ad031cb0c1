use std::collections::BTreeMap;

use crate::model::{synapse_label, Model, ObjectId, ObjectKind, Target};
use crate::resolver::NameResolver;
use crate::schema::{ConnectionSnapshot, NetworkSnapshot, NeuronsSnapshot, NodeSnapshot};

/// A read-only view that serializes the model for `NetworkSchema` responses.
///
/// Design intent:
/// - Snapshotting never builds or steps a simulator.
/// - Endpoints are emitted as resolver names; callables and solvers only as strings.
pub struct ModelAdapter<'a> {
    model: &'a Model,
    names: &'a NameResolver,
}

impl<'a> ModelAdapter<'a> {
    pub fn new(model: &'a Model, names: &'a NameResolver) -> Self {
        Self { model, names }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        self.network(self.model.root())
    }

    fn name(&self, id: ObjectId) -> String {
        self.names
            .name(id)
            .map_or_else(|| format!("<unnamed {}>", id.0), str::to_string)
    }

    fn network(&self, id: ObjectId) -> NetworkSnapshot {
        let name = self.name(id);
        let Some(net) = self.model.network(id) else {
            return NetworkSnapshot::empty(&name);
        };

        let mut nodes = BTreeMap::new();
        for child in net.ensembles.iter().chain(&net.nodes) {
            if let Some(node) = self.node(*child, &name) {
                nodes.insert(self.name(*child), node);
            }
        }
        let connections = net
            .connections
            .iter()
            .filter_map(|c| Some((self.name(*c), self.connection(*c, &name)?)))
            .collect();
        let networks = net
            .networks
            .iter()
            .map(|n| (self.name(*n), self.network(*n)))
            .collect();

        NetworkSnapshot {
            kind: ObjectKind::Network.as_str().to_string(),
            class_type: net.class_type.clone(),
            parent_network: net.parent.map(|p| self.name(p)),
            network_name: name,
            n_neurons: self.model.n_neurons(id),
            nodes,
            connections,
            networks,
        }
    }

    fn node(&self, id: ObjectId, network_name: &str) -> Option<NodeSnapshot> {
        let target = Target::Object(id);
        let mut snap = NodeSnapshot {
            kind: String::new(),
            class_type: String::new(),
            label: None,
            network_name: network_name.to_string(),
            size_in: self.model.size_in(target),
            size_out: self.model.size_out(target),
            probeable: strings(self.model.probeable(target)),
            neuron_type: None,
            n_neurons: None,
            dimensions: None,
            radius: None,
            neurons: None,
        };

        if let Some(ens) = self.model.ensemble(id) {
            let neurons = Target::Neurons(id);
            snap.kind = ObjectKind::Ensemble.as_str().to_string();
            snap.label = ens.label.clone();
            snap.neuron_type = Some(ens.params.neuron_type.to_string());
            snap.n_neurons = Some(ens.params.n_neurons);
            snap.dimensions = Some(ens.params.dimensions);
            snap.radius = Some(ens.params.radius);
            snap.neurons = Some(NeuronsSnapshot {
                size_in: self.model.size_in(neurons),
                size_out: self.model.size_out(neurons),
                probeable: strings(self.model.probeable(neurons)),
            });
        } else if let Some(node) = self.model.node(id) {
            snap.kind = ObjectKind::Node.as_str().to_string();
            snap.label = node.label.clone();
        } else {
            return None;
        }
        snap.class_type = snap.kind.clone();
        Some(snap)
    }

    fn connection(&self, id: ObjectId, network_name: &str) -> Option<ConnectionSnapshot> {
        let conn = self.model.connection(id)?;
        let (size_in, size_mid, size_out) = self.model.connection_sizes(conn);
        let endpoint = |ep| {
            self.names
                .endpoint_name(ep)
                .map_or_else(|| self.name(ep.target.id()), str::to_string)
        };
        Some(ConnectionSnapshot {
            kind: ObjectKind::Connection.as_str().to_string(),
            class_type: ObjectKind::Connection.as_str().to_string(),
            label: conn.label.clone(),
            network_name: network_name.to_string(),
            pre: endpoint(&conn.pre),
            post: endpoint(&conn.post),
            size_in,
            size_mid,
            size_out,
            probeable: strings(self.model.probeable(Target::Object(id))),
            has_weights: self.model.has_weights(conn),
            function_info: conn.function.to_string(),
            solver: conn.solver.to_string(),
            synapse: synapse_label(conn.synapse),
            transform: conn.transform.to_string(),
        })
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionParams, EnsembleParams, ModelBuilder, NodeOutput};
    use crate::schema::Message;

    #[test]
    fn simple_model_snapshot() {
        let mut b = ModelBuilder::new("model");
        let a = b.node("A", NodeOutput::constant(vec![0.5]));
        let e = b.ensemble(
            "B",
            EnsembleParams {
                n_neurons: 10,
                ..EnsembleParams::default()
            },
        );
        b.connect(a, e, ConnectionParams::default());
        let model = b.build().unwrap();
        let names = NameResolver::new(&model);
        let snap = ModelAdapter::new(&model, &names).snapshot();

        assert_eq!(snap.network_name, "model");
        assert_eq!(snap.parent_network, None);
        assert_eq!(snap.n_neurons, 10);
        assert_eq!(snap.nodes.keys().collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(snap.nodes["B"].n_neurons, Some(10));
        assert_eq!(snap.nodes["A"].size_out, 1);

        let conn = &snap.connections["model.connections[0]"];
        assert_eq!((conn.pre.as_str(), conn.post.as_str()), ("A", "B"));
        assert_eq!(conn.synapse, "Lowpass(tau=0.005)");
        assert!(!conn.has_weights);
    }

    #[test]
    fn nested_networks_and_neuron_endpoints() {
        let model = Model::demo();
        let names = NameResolver::new(&model);
        let snap = ModelAdapter::new(&model, &names).snapshot();

        let layer = &snap.networks["layer"];
        assert_eq!(layer.parent_network.as_deref(), Some("model"));
        assert_eq!(layer.class_type, "EnsembleArray");
        assert_eq!(layer.n_neurons, 100);
        assert!(layer.nodes.contains_key("layer.ea_ensembles[0]"));

        // Neurons and slices are reported by the owning object's name.
        assert!(snap
            .connections
            .values()
            .any(|c| c.pre == "a" && c.post == "layer.input" && c.has_weights));
        let squared = &snap.nodes["squared"];
        assert_eq!(squared.neurons.as_ref().map(|n| n.size_in), Some(40));
        assert_eq!(
            squared.neurons.as_ref().map(|n| n.probeable.len()),
            Some(2)
        );
    }

    #[test]
    fn snapshot_round_trips_through_the_envelope() {
        let model = Model::demo();
        let names = NameResolver::new(&model);
        let snap = ModelAdapter::new(&model, &names).snapshot();
        let msg = Message::NetworkSchema(Some(snap.clone()));
        let back = Message::from_payload(&msg.to_payload().unwrap()).unwrap();
        assert_eq!(back, Message::NetworkSchema(Some(snap)));
    }
}
