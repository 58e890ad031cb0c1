//! Message families carried inside the length-prefixed envelope.
//!
//! Every payload is a JSON object `{"schema": <family>, "data": <body>}`. The
//! envelope is decoded in two passes so that an unknown family can be told apart
//! from a malformed body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::WireError;

pub const SCHEMA_NETWORK: &str = "NetworkSchema";
pub const SCHEMA_OBSERVE: &str = "Observe";
pub const SCHEMA_SIMULATION: &str = "Simulation";
pub const SCHEMA_SIMULATION_STEPS: &str = "SimulationSteps";
pub const SCHEMA_PLOT_LINES: &str = "PlotLines";

pub const DEFAULT_DT: f64 = 0.001;

fn default_sample_every() -> u64 {
    1
}

fn default_dt() -> f64 {
    DEFAULT_DT
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `None` is the viewer's request, `Some` the backend's answer.
    NetworkSchema(Option<NetworkSnapshot>),
    Observe(Observe),
    Simulation(Simulation),
    SimulationSteps(Vec<StepRecord>),
    /// Without `data` this is a schedule request; with `data` a computed result.
    PlotLines(PlotLines),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema: String,
    #[serde(default)]
    data: Value,
}

impl Message {
    pub fn schema(&self) -> &'static str {
        match self {
            Message::NetworkSchema(_) => SCHEMA_NETWORK,
            Message::Observe(_) => SCHEMA_OBSERVE,
            Message::Simulation(_) => SCHEMA_SIMULATION,
            Message::SimulationSteps(_) => SCHEMA_SIMULATION_STEPS,
            Message::PlotLines(_) => SCHEMA_PLOT_LINES,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, WireError> {
        let data = match self {
            Message::NetworkSchema(None) => Value::Null,
            Message::NetworkSchema(Some(net)) => serde_json::to_value(net)?,
            Message::Observe(o) => serde_json::to_value(o)?,
            Message::Simulation(s) => serde_json::to_value(s)?,
            Message::SimulationSteps(steps) => serde_json::to_value(steps)?,
            Message::PlotLines(p) => serde_json::to_value(p)?,
        };
        let env = Envelope {
            schema: self.schema().to_string(),
            data,
        };
        Ok(serde_json::to_vec(&env)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, WireError> {
        let text = String::from_utf8(payload.to_vec())?;
        let env: Envelope = serde_json::from_str(&text)?;
        let msg = match env.schema.as_str() {
            SCHEMA_NETWORK => match env.data {
                Value::Null => Message::NetworkSchema(None),
                Value::Object(ref m) if m.is_empty() => Message::NetworkSchema(None),
                data => Message::NetworkSchema(Some(serde_json::from_value(data)?)),
            },
            SCHEMA_OBSERVE => Message::Observe(serde_json::from_value(env.data)?),
            SCHEMA_SIMULATION => Message::Simulation(serde_json::from_value(env.data)?),
            SCHEMA_SIMULATION_STEPS => {
                Message::SimulationSteps(serde_json::from_value(env.data)?)
            }
            SCHEMA_PLOT_LINES => Message::PlotLines(serde_json::from_value(env.data)?),
            other => return Err(WireError::UnknownSchema(other.to_string())),
        };
        Ok(msg)
    }
}

/// Recursive body of a `NetworkSchema` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_type: String,
    pub network_name: String,
    #[serde(default)]
    pub parent_network: Option<String>,
    #[serde(default)]
    pub n_neurons: usize,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSnapshot>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSnapshot>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSnapshot>,
}

impl NetworkSnapshot {
    pub fn empty(name: &str) -> Self {
        Self {
            kind: "Network".to_string(),
            class_type: "Network".to_string(),
            network_name: name.to_string(),
            parent_network: None,
            n_neurons: 0,
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
            networks: BTreeMap::new(),
        }
    }
}

/// An ensemble or a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_type: String,
    #[serde(default)]
    pub label: Option<String>,
    pub network_name: String,
    pub size_in: usize,
    pub size_out: usize,
    #[serde(default)]
    pub probeable: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neuron_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_neurons: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neurons: Option<NeuronsSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronsSnapshot {
    pub size_in: usize,
    pub size_out: usize,
    #[serde(default)]
    pub probeable: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_type: String,
    #[serde(default)]
    pub label: Option<String>,
    pub network_name: String,
    pub pre: String,
    pub post: String,
    pub size_in: usize,
    pub size_mid: usize,
    pub size_out: usize,
    #[serde(default)]
    pub probeable: Vec<String>,
    #[serde(default)]
    pub has_weights: bool,
    #[serde(default)]
    pub function_info: String,
    #[serde(default)]
    pub solver: String,
    #[serde(default)]
    pub synapse: String,
    #[serde(default)]
    pub transform: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observe {
    pub source: String,
    pub access_path: String,
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,
    #[serde(default = "default_dt")]
    pub dt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimAction {
    Step,
    Reset,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub action: SimAction,
    #[serde(default)]
    pub until: u64,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,
    #[serde(default)]
    pub observe: Vec<Observe>,
    #[serde(default)]
    pub plot_lines: Vec<PlotLines>,
}

impl Simulation {
    pub fn step(until: u64, dt: f64, sample_every: u64) -> Self {
        Self {
            action: SimAction::Step,
            until,
            dt,
            sample_every,
            observe: Vec::new(),
            plot_lines: Vec::new(),
        }
    }

    pub fn reset(dt: f64, observe: Vec<Observe>, plot_lines: Vec<PlotLines>) -> Self {
        Self {
            action: SimAction::Reset,
            until: 0,
            dt,
            sample_every: 1,
            observe,
            plot_lines,
        }
    }

    pub fn stop() -> Self {
        Self {
            action: SimAction::Stop,
            until: 0,
            dt: DEFAULT_DT,
            sample_every: 1,
            observe: Vec::new(),
            plot_lines: Vec::new(),
        }
    }
}

/// One recorded step of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u64,
    pub node_name: String,
    /// access path -> sampled value
    pub parameters: BTreeMap<String, Sample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotLines {
    pub source: String,
    pub access_path: String,
    pub step: u64,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_points: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<f64>>>,
}

impl PlotLines {
    pub fn request(source: &str, access_path: &str, step: u64) -> Self {
        Self {
            source: source.to_string(),
            access_path: access_path.to_string(),
            step,
            id: None,
            n_points: None,
            data: None,
        }
    }
}

/// One sampled value as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
    Scalar(f64),
    Missing,
}

impl Sample {
    pub fn len(&self) -> usize {
        match self {
            Sample::Vector(v) => v.len(),
            Sample::Matrix(m) => m.len(),
            Sample::Scalar(_) => 1,
            Sample::Missing => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened view in row-major order.
    pub fn flatten(&self) -> Vec<f64> {
        match self {
            Sample::Vector(v) => v.clone(),
            Sample::Matrix(m) => m.iter().flatten().copied().collect(),
            Sample::Scalar(x) => vec![*x],
            Sample::Missing => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_schema_is_distinct_from_malformed_body() {
        let unknown = br#"{"schema":"Teleport","data":{}}"#;
        assert!(matches!(
            Message::from_payload(unknown),
            Err(WireError::UnknownSchema(s)) if s == "Teleport"
        ));

        let malformed = br#"{"schema":"Observe","data":{"source":3}}"#;
        assert!(matches!(
            Message::from_payload(malformed),
            Err(WireError::Json(_))
        ));

        assert!(Message::from_payload(b"not json").unwrap_err().is_protocol());
    }

    #[test]
    fn simulation_defaults_fill_missing_fields() {
        let msg =
            Message::from_payload(br#"{"schema":"Simulation","data":{"action":"step","until":5}}"#)
                .unwrap();
        let Message::Simulation(sim) = msg else {
            panic!("expected Simulation");
        };
        assert_eq!(sim.action, SimAction::Step);
        assert_eq!(sim.until, 5);
        assert_eq!(sim.sample_every, 1);
        assert_eq!(sim.dt, DEFAULT_DT);
        assert!(sim.observe.is_empty());
    }

    #[test]
    fn network_schema_request_has_null_body() {
        let payload = Message::NetworkSchema(None).to_payload().unwrap();
        let v: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(v["schema"], "NetworkSchema");
        assert!(v["data"].is_null());

        let empty_obj = br#"{"schema":"NetworkSchema","data":{}}"#;
        assert_eq!(
            Message::from_payload(empty_obj).unwrap(),
            Message::NetworkSchema(None)
        );
    }

    #[test]
    fn samples_tolerate_nulls_and_matrices() {
        let json = r#"[{"step":0,"node_name":"b","parameters":{
            "probeable.decoded_output":[0.5],
            "probeable.weights":[[1.0,2.0],[3.0,4.0]],
            "probeable.missing":null}}]"#;
        let steps: Vec<StepRecord> = serde_json::from_str(json).unwrap();
        let params = &steps[0].parameters;
        assert_eq!(params["probeable.decoded_output"], Sample::Vector(vec![0.5]));
        assert_eq!(params["probeable.weights"].flatten(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(params["probeable.missing"], Sample::Missing);
    }
}
