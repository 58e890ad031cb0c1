//! Reference simulator.
//!
//! Built once from a [`Model`] plus a fixed set of probes; probes cannot be
//! added afterwards, a new simulator has to be constructed instead. Every
//! random quantity is drawn from a per-ensemble [`Prng`] stream, so two
//! simulators built from the same model and probes produce identical samples.
//!
//! One step, with `t = (n + 1) · dt`:
//! 1. sum last step's filtered connection outputs into their targets,
//! 2. evaluate nodes,
//! 3. compute neuron currents, activities and decoded values,
//! 4. evaluate connections and apply their synapses,
//! 5. record probes whose `sample_every` divides the step label `n`.

use std::collections::HashMap;

use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::model::{Function, Model, NodeOutput, ObjectId, ObjectKind, Target, Transform};
use crate::neurons::{NeuronState, NeuronType};
use crate::prng::Prng;
use crate::schema::Sample;
use crate::solver::{self, Solver};

pub const DEFAULT_CURVE_POINTS: usize = 50;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("decoder solve failed for a population of {n_neurons} neurons")]
    Solver { n_neurons: usize },
    #[error("time step must be positive, got {0}")]
    InvalidDt(f64),
    #[error("unknown probe target {0:?}")]
    UnknownTarget(Target),
    #[error("`{attr}` is not probeable on {kind}")]
    NotProbeable { attr: String, kind: ObjectKind },
    #[error("object {0} is not an ensemble")]
    NotAnEnsemble(usize),
}

/// A probe to install when the simulator is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeSpec {
    pub target: Target,
    pub attr: String,
    pub sample_every: u64,
}

impl ProbeSpec {
    pub fn new(target: Target, attr: &str, sample_every: u64) -> Self {
        Self {
            target,
            attr: attr.to_string(),
            sample_every: sample_every.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeHandle(usize);

/// Recorded samples with the step label of each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeData {
    pub steps: Vec<u64>,
    pub samples: Vec<Sample>,
}

impl ProbeData {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    DecodedOutput,
    EnsembleInput,
    NeuronOutput,
    NeuronInput,
    Voltage,
    NodeOutput,
    ConnOutput,
    ConnInput,
    ConnWeights,
}

impl Attr {
    fn resolve(kind: ObjectKind, attr: &str) -> Option<Self> {
        Some(match (kind, attr) {
            (ObjectKind::Ensemble, "decoded_output") => Attr::DecodedOutput,
            (ObjectKind::Ensemble, "input") => Attr::EnsembleInput,
            (ObjectKind::Neurons, "output") => Attr::NeuronOutput,
            (ObjectKind::Neurons, "input") => Attr::NeuronInput,
            (ObjectKind::Neurons, "voltage") => Attr::Voltage,
            (ObjectKind::Node, "output") => Attr::NodeOutput,
            (ObjectKind::Connection, "output") => Attr::ConnOutput,
            (ObjectKind::Connection, "input") => Attr::ConnInput,
            (ObjectKind::Connection, "weights") => Attr::ConnWeights,
            _ => return None,
        })
    }
}

struct ProbeSim {
    index: usize,
    attr: Attr,
    sample_every: u64,
    data: ProbeData,
}

struct EnsembleSim {
    neuron_type: NeuronType,
    radius: f64,
    gain: Vec<f64>,
    bias: Vec<f64>,
    /// Unit encoders, `n × dims`.
    encoders: Vec<Vec<f64>>,
    eval_points: Vec<Vec<f64>>,
    /// Identity decoders, `n × dims`.
    decoders: Vec<Vec<f64>>,
    input: Vec<f64>,
    neuron_input: Vec<f64>,
    current: Vec<f64>,
    activities: Vec<f64>,
    decoded: Vec<f64>,
    state: NeuronState,
}

fn n_eval_points(dims: usize) -> usize {
    (500 * dims).clamp(750, 4000)
}

impl EnsembleSim {
    fn build(model: &Model, id: ObjectId) -> Option<Self> {
        let ens = model.ensemble(id)?;
        let p = &ens.params;
        let mut rng = match p.seed {
            Some(seed) => Prng::new(seed),
            None => Prng::derive(model.seed(), id.0 as u64),
        };
        let n = p.n_neurons;
        let encoders: Vec<Vec<f64>> = (0..n).map(|_| rng.unit_vector(p.dimensions)).collect();
        let max_rates: Vec<f64> = (0..n)
            .map(|_| rng.gen_range_f64(p.max_rates[0], p.max_rates[1]))
            .collect();
        let intercepts: Vec<f64> = (0..n)
            .map(|_| rng.gen_range_f64(p.intercepts[0], p.intercepts[1]))
            .collect();
        let (gain, bias) = p.neuron_type.gain_bias(&max_rates, &intercepts);
        let eval_points = (0..n_eval_points(p.dimensions))
            .map(|_| rng.ball_point(p.dimensions, p.radius))
            .collect();

        Some(Self {
            neuron_type: p.neuron_type,
            radius: p.radius,
            gain,
            bias,
            encoders,
            eval_points,
            decoders: Vec::new(),
            input: vec![0.0; p.dimensions],
            neuron_input: vec![0.0; n],
            current: vec![0.0; n],
            activities: vec![0.0; n],
            decoded: vec![0.0; p.dimensions],
            state: NeuronState::new(n),
        })
    }

    fn n_neurons(&self) -> usize {
        self.gain.len()
    }

    fn currents(&self, x: &[f64]) -> Vec<f64> {
        self.encoders
            .iter()
            .zip(self.gain.iter().zip(&self.bias))
            .map(|(e, (g, b))| {
                let proj: f64 = e.iter().zip(x).map(|(e, x)| e * x).sum();
                g * proj / self.radius + b
            })
            .collect()
    }

    fn rates(&self, x: &[f64]) -> Vec<f64> {
        self.currents(x)
            .into_iter()
            .map(|j| self.neuron_type.rate(j))
            .collect()
    }

    fn eval_activities(&self) -> Vec<Vec<f64>> {
        self.eval_points.iter().map(|x| self.rates(x)).collect()
    }
}

/// `Σ_i a_i · d_i` for decoders `n × d`.
fn decode(decoders: &[Vec<f64>], activities: &[f64], out: &mut [f64]) {
    out.iter_mut().for_each(|o| *o = 0.0);
    for (row, &a) in decoders.iter().zip(activities) {
        if a == 0.0 {
            continue;
        }
        for (o, d) in out.iter_mut().zip(row) {
            *o += a * d;
        }
    }
}

struct NodeSim {
    output: NodeOutput,
    input: Vec<f64>,
    value: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
enum Port {
    Ensemble(usize),
    Neurons(usize),
    Node(usize),
}

struct ConnSim {
    pre: Port,
    pre_slice: Option<(usize, usize)>,
    post: Port,
    post_offset: usize,
    function: Function,
    transform: Transform,
    /// `n × size_mid` when the connection decodes from an ensemble.
    decoders: Option<Vec<Vec<f64>>>,
    /// Lowpass smoothing factor `1 - e^{-dt/τ}`.
    alpha: Option<f64>,
    input: Vec<f64>,
    output: Vec<f64>,
    filtered: Vec<f64>,
    weights: Vec<Vec<f64>>,
}

/// A decoder solve: ensemble index plus one target vector per eval point.
struct SolveJob {
    ensemble: usize,
    solver: Solver,
    targets: Vec<Vec<f64>>,
}

pub struct Simulator {
    dt: f64,
    n_steps: u64,
    ensembles: Vec<EnsembleSim>,
    ensemble_index: HashMap<ObjectId, usize>,
    nodes: Vec<NodeSim>,
    node_index: HashMap<ObjectId, usize>,
    conns: Vec<ConnSim>,
    conn_index: HashMap<ObjectId, usize>,
    probes: Vec<ProbeSim>,
    declared: HashMap<ObjectId, ProbeHandle>,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("dt", &self.dt)
            .field("n_steps", &self.n_steps)
            .field("ensembles", &self.ensembles.len())
            .field("probes", &self.probes.len())
            .finish()
    }
}

impl Simulator {
    /// Build a simulator with `probes` installed, followed by any probes the
    /// model declares itself. Handles come back in the order of `probes`.
    pub fn new(
        model: &Model,
        probes: &[ProbeSpec],
        dt: f64,
    ) -> Result<(Self, Vec<ProbeHandle>), SimError> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(SimError::InvalidDt(dt));
        }

        let mut ensembles = Vec::new();
        let mut ensemble_index = HashMap::new();
        for (id, _) in model.ensembles() {
            if let Some(ens) = EnsembleSim::build(model, id) {
                ensemble_index.insert(id, ensembles.len());
                ensembles.push(ens);
            }
        }

        let mut nodes = Vec::new();
        let mut node_index = HashMap::new();
        for (id, node) in model.nodes() {
            node_index.insert(id, nodes.len());
            nodes.push(NodeSim {
                output: node.output.clone(),
                input: vec![0.0; node.output.size_in()],
                value: vec![0.0; node.output.size_out()],
            });
        }

        let port = |target: Target| -> Result<Port, SimError> {
            match target {
                Target::Neurons(id) => ensemble_index.get(&id).map(|i| Port::Neurons(*i)),
                Target::Object(id) => ensemble_index
                    .get(&id)
                    .map(|i| Port::Ensemble(*i))
                    .or_else(|| node_index.get(&id).map(|i| Port::Node(*i))),
            }
            .ok_or(SimError::UnknownTarget(target))
        };

        // Identity decoders for every ensemble, then one solve per decoded connection.
        let mut jobs: Vec<SolveJob> = ensembles
            .iter()
            .enumerate()
            .map(|(i, e)| SolveJob {
                ensemble: i,
                solver: Solver::default(),
                targets: e.eval_points.clone(),
            })
            .collect();

        let mut conns = Vec::new();
        let mut conn_index = HashMap::new();
        let mut conn_jobs = Vec::new();
        for (id, conn) in model.connections() {
            let (size_in, size_mid, size_out) = model.connection_sizes(conn);
            let pre = port(conn.pre.target)?;
            let post = port(conn.post.target)?;
            if let Port::Ensemble(e) = pre {
                let slice = conn.pre.slice;
                let targets = ensembles[e]
                    .eval_points
                    .iter()
                    .map(|x| conn.function.apply(slice_of(x, slice)))
                    .collect();
                conn_jobs.push((conns.len(), jobs.len()));
                jobs.push(SolveJob {
                    ensemble: e,
                    solver: conn.solver,
                    targets,
                });
            }
            conn_index.insert(id, conns.len());
            conns.push(ConnSim {
                pre,
                pre_slice: conn.pre.slice,
                post,
                post_offset: conn.post.slice.map_or(0, |(start, _)| start),
                function: conn.function,
                transform: conn.transform.clone(),
                decoders: None,
                alpha: conn.synapse.filter(|tau| *tau > 0.0).map(|tau| 1.0 - (-dt / tau).exp()),
                input: vec![0.0; size_in],
                output: vec![0.0; size_out],
                filtered: vec![0.0; size_out],
                weights: conn.transform.dense(size_mid),
            });
        }

        let mut solved = solve_all(&ensembles, &jobs)?;
        for (conn, job) in conn_jobs.into_iter().rev() {
            let decoders = solved.swap_remove(job);
            let c = &mut conns[conn];
            c.weights = matmul_t(&c.weights, &decoders);
            c.decoders = Some(decoders);
        }
        for (ens, decoders) in ensembles.iter_mut().zip(solved) {
            ens.decoders = decoders;
        }

        let mut sim = Self {
            dt,
            n_steps: 0,
            ensembles,
            ensemble_index,
            nodes,
            node_index,
            conns,
            conn_index,
            probes: Vec::new(),
            declared: HashMap::new(),
        };

        let mut handles = Vec::with_capacity(probes.len());
        for spec in probes {
            handles.push(sim.install(model, spec)?);
        }
        for (id, probe) in model.probes() {
            let spec = ProbeSpec::new(probe.target, &probe.attr, probe.sample_every);
            let handle = sim.install(model, &spec)?;
            sim.declared.insert(id, handle);
        }
        Ok((sim, handles))
    }

    fn install(&mut self, model: &Model, spec: &ProbeSpec) -> Result<ProbeHandle, SimError> {
        let kind = model
            .target_kind(spec.target)
            .ok_or(SimError::UnknownTarget(spec.target))?;
        let attr = Attr::resolve(kind, &spec.attr)
            .filter(|_| model.probeable(spec.target).contains(&spec.attr.as_str()))
            .ok_or_else(|| SimError::NotProbeable {
                attr: spec.attr.clone(),
                kind,
            })?;
        let id = spec.target.id();
        let index = match kind {
            ObjectKind::Ensemble | ObjectKind::Neurons => self.ensemble_index.get(&id),
            ObjectKind::Node => self.node_index.get(&id),
            ObjectKind::Connection => self.conn_index.get(&id),
            _ => None,
        }
        .copied()
        .ok_or(SimError::UnknownTarget(spec.target))?;

        self.probes.push(ProbeSim {
            index,
            attr,
            sample_every: spec.sample_every.max(1),
            data: ProbeData::default(),
        });
        Ok(ProbeHandle(self.probes.len() - 1))
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Number of completed steps; also the label the next step will carry.
    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    pub fn time(&self) -> f64 {
        self.n_steps as f64 * self.dt
    }

    /// Handle of a probe the model declared itself.
    pub fn declared_probe(&self, probe: ObjectId) -> Option<ProbeHandle> {
        self.declared.get(&probe).copied()
    }

    pub fn data(&self, probe: ProbeHandle) -> Option<&ProbeData> {
        self.probes.get(probe.0).map(|p| &p.data)
    }

    /// Drain everything recorded since the previous call.
    pub fn take_data(&mut self, probe: ProbeHandle) -> ProbeData {
        self.probes
            .get_mut(probe.0)
            .map(|p| std::mem::take(&mut p.data))
            .unwrap_or_default()
    }

    pub fn run_steps(&mut self, n: u64) {
        for _ in 0..n {
            self.step();
        }
    }

    pub fn step(&mut self) {
        let t = (self.n_steps + 1) as f64 * self.dt;

        for ens in &mut self.ensembles {
            ens.input.iter_mut().for_each(|v| *v = 0.0);
            ens.neuron_input.iter_mut().for_each(|v| *v = 0.0);
        }
        for node in &mut self.nodes {
            node.input.iter_mut().for_each(|v| *v = 0.0);
        }
        for conn in &self.conns {
            let dst = match conn.post {
                Port::Ensemble(i) => &mut self.ensembles[i].input,
                Port::Neurons(i) => &mut self.ensembles[i].neuron_input,
                Port::Node(i) => &mut self.nodes[i].input,
            };
            for (k, v) in conn.filtered.iter().enumerate() {
                if let Some(d) = dst.get_mut(conn.post_offset + k) {
                    *d += v;
                }
            }
        }

        for node in &mut self.nodes {
            node.value = node.output.evaluate(t, &node.input);
        }

        let dt = self.dt;
        for ens in &mut self.ensembles {
            let mut current = ens.currents(&ens.input);
            for (j, extra) in current.iter_mut().zip(&ens.neuron_input) {
                *j += extra;
            }
            ens.neuron_type
                .step(dt, &current, &mut ens.activities, &mut ens.state);
            ens.current = current;
            decode(&ens.decoders, &ens.activities, &mut ens.decoded);
        }

        for conn in &mut self.conns {
            let mid = match (conn.pre, &conn.decoders) {
                (Port::Ensemble(i), Some(decoders)) => {
                    let ens = &self.ensembles[i];
                    conn.input = slice_of(&ens.decoded, conn.pre_slice).to_vec();
                    let mut mid = vec![0.0; decoders.first().map_or(0, Vec::len)];
                    decode(decoders, &ens.activities, &mut mid);
                    mid
                }
                (pre, _) => {
                    let signal = match pre {
                        Port::Ensemble(i) => &self.ensembles[i].decoded,
                        Port::Neurons(i) => &self.ensembles[i].activities,
                        Port::Node(i) => &self.nodes[i].value,
                    };
                    conn.input = slice_of(signal, conn.pre_slice).to_vec();
                    conn.function.apply(&conn.input)
                }
            };
            conn.output = conn.transform.apply(&mid);
            match conn.alpha {
                Some(alpha) => {
                    for (y, u) in conn.filtered.iter_mut().zip(&conn.output) {
                        *y += alpha * (u - *y);
                    }
                }
                None => conn.filtered.clone_from(&conn.output),
            }
        }

        let label = self.n_steps;
        for p in &mut self.probes {
            if label % p.sample_every != 0 {
                continue;
            }
            let sample = match p.attr {
                Attr::DecodedOutput => Sample::Vector(self.ensembles[p.index].decoded.clone()),
                Attr::EnsembleInput => Sample::Vector(self.ensembles[p.index].input.clone()),
                Attr::NeuronOutput => Sample::Vector(self.ensembles[p.index].activities.clone()),
                Attr::NeuronInput => Sample::Vector(self.ensembles[p.index].current.clone()),
                Attr::Voltage => Sample::Vector(self.ensembles[p.index].state.voltage.clone()),
                Attr::NodeOutput => Sample::Vector(self.nodes[p.index].value.clone()),
                Attr::ConnOutput => Sample::Vector(self.conns[p.index].filtered.clone()),
                Attr::ConnInput => Sample::Vector(self.conns[p.index].input.clone()),
                Attr::ConnWeights => Sample::Matrix(self.conns[p.index].weights.clone()),
            };
            p.data.steps.push(label);
            p.data.samples.push(sample);
        }
        self.n_steps += 1;
    }

    fn ensemble(&self, id: ObjectId) -> Result<&EnsembleSim, SimError> {
        self.ensemble_index
            .get(&id)
            .map(|i| &self.ensembles[*i])
            .ok_or(SimError::NotAnEnsemble(id.0))
    }

    /// Rates along the first represented axis, `n_points × (1 + n_neurons)`.
    pub fn tuning_curves(&self, ensemble: ObjectId, n_points: usize) -> Result<Vec<Vec<f64>>, SimError> {
        let ens = self.ensemble(ensemble)?;
        let dims = ens.encoders.first().map_or(1, Vec::len);
        Ok(curve_grid(-ens.radius, ens.radius, n_points, |x| {
            let mut point = vec![0.0; dims];
            if let Some(first) = point.first_mut() {
                *first = x;
            }
            ens.rates(&point)
        }))
    }

    /// Rates against the input projected on each neuron's encoder, in `[-1, 1]`.
    pub fn response_curves(&self, ensemble: ObjectId, n_points: usize) -> Result<Vec<Vec<f64>>, SimError> {
        let ens = self.ensemble(ensemble)?;
        Ok(curve_grid(-1.0, 1.0, n_points, |x| {
            ens.gain
                .iter()
                .zip(&ens.bias)
                .map(|(g, b)| ens.neuron_type.rate(g * x + b))
                .collect()
        }))
    }
}

fn curve_grid(lo: f64, hi: f64, n_points: usize, rates: impl Fn(f64) -> Vec<f64>) -> Vec<Vec<f64>> {
    let denom = n_points.saturating_sub(1).max(1) as f64;
    (0..n_points)
        .map(|i| {
            let x = lo + (hi - lo) * i as f64 / denom;
            let mut row = vec![x];
            row.extend(rates(x));
            row
        })
        .collect()
}

fn slice_of(x: &[f64], slice: Option<(usize, usize)>) -> &[f64] {
    match slice {
        Some((start, end)) => x.get(start..end).unwrap_or(&[]),
        None => x,
    }
}

/// `a · bᵀ` for `a: r × k`, `b: n × k`.
fn matmul_t(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = a.first().or(b.first()).map_or(0, Vec::len);
    let product = solver::to_matrix(a, k) * solver::to_matrix(b, k).transpose();
    solver::from_matrix(&product)
}

fn solve_one(ensembles: &[EnsembleSim], job: &SolveJob) -> Result<Vec<Vec<f64>>, SimError> {
    let ens = &ensembles[job.ensemble];
    if ens.n_neurons() == 0 {
        return Ok(Vec::new());
    }
    job.solver.solve(&ens.eval_activities(), &job.targets)
}

#[cfg(not(feature = "parallel"))]
fn solve_all(ensembles: &[EnsembleSim], jobs: &[SolveJob]) -> Result<Vec<Vec<Vec<f64>>>, SimError> {
    jobs.iter().map(|job| solve_one(ensembles, job)).collect()
}

#[cfg(feature = "parallel")]
fn solve_all(ensembles: &[EnsembleSim], jobs: &[SolveJob]) -> Result<Vec<Vec<Vec<f64>>>, SimError> {
    jobs.par_iter().map(|job| solve_one(ensembles, job)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionParams, EnsembleParams, ModelBuilder};

    fn const_into_ensemble(value: f64) -> (Model, ObjectId, ObjectId) {
        let mut b = ModelBuilder::new("model").with_seed(5);
        let a = b.node("a", NodeOutput::constant(vec![value]));
        let e = b.ensemble("b", EnsembleParams::default());
        b.connect(a, e, ConnectionParams::default());
        (b.build().unwrap(), a, e)
    }

    fn last(data: &ProbeData) -> f64 {
        match data.samples.last() {
            Some(Sample::Vector(v)) => v[0],
            other => panic!("unexpected sample {other:?}"),
        }
    }

    #[test]
    fn decoded_output_tracks_constant_input() {
        let (model, _, e) = const_into_ensemble(0.5);
        let (mut sim, handles) = Simulator::new(
            &model,
            &[ProbeSpec::new(Target::Object(e), "decoded_output", 1)],
            0.001,
        )
        .unwrap();
        sim.run_steps(500);
        // Average the spiking estimate over the last 100 steps.
        let data = sim.data(handles[0]).unwrap();
        let tail: f64 = data.samples[400..]
            .iter()
            .map(|s| s.flatten()[0])
            .sum::<f64>()
            / 100.0;
        assert!((tail - 0.5).abs() < 0.15, "{tail}");
        assert_eq!(data.steps.first(), Some(&0));
        assert_eq!(data.steps.last(), Some(&499));
    }

    #[test]
    fn sample_every_keeps_multiples_of_the_step_label() {
        let (model, a, _) = const_into_ensemble(0.2);
        let (mut sim, handles) = Simulator::new(
            &model,
            &[ProbeSpec::new(Target::Object(a), "output", 2)],
            0.001,
        )
        .unwrap();
        sim.run_steps(6);
        assert_eq!(sim.data(handles[0]).unwrap().steps, vec![0, 2, 4]);
        assert_eq!(last(sim.data(handles[0]).unwrap()), 0.2);
        assert_eq!(sim.n_steps(), 6);
    }

    #[test]
    fn identical_builds_are_deterministic() {
        let model = Model::demo();
        let specs: Vec<ProbeSpec> = model
            .ensembles()
            .map(|(id, _)| ProbeSpec::new(Target::Neurons(id), "output", 1))
            .collect();
        let run = || {
            let (mut sim, handles) = Simulator::new(&model, &specs, 0.001).unwrap();
            sim.run_steps(30);
            handles
                .iter()
                .map(|h| sim.take_data(*h))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn take_data_drains_incrementally() {
        let (model, a, _) = const_into_ensemble(0.1);
        let (mut sim, handles) =
            Simulator::new(&model, &[ProbeSpec::new(Target::Object(a), "output", 1)], 0.001)
                .unwrap();
        sim.run_steps(3);
        assert_eq!(sim.take_data(handles[0]).steps, vec![0, 1, 2]);
        sim.run_steps(2);
        assert_eq!(sim.take_data(handles[0]).steps, vec![3, 4]);
    }

    #[test]
    fn unprobeable_attributes_are_rejected() {
        let (model, _, e) = const_into_ensemble(0.0);
        let err = Simulator::new(&model, &[ProbeSpec::new(Target::Object(e), "voltage", 1)], 0.001)
            .unwrap_err();
        assert!(matches!(err, SimError::NotProbeable { .. }));
        assert!(matches!(
            Simulator::new(&model, &[], 0.0),
            Err(SimError::InvalidDt(_))
        ));
    }

    #[test]
    fn tuning_curve_grid_shape() {
        let (model, _, e) = const_into_ensemble(0.0);
        let (sim, _) = Simulator::new(&model, &[], 0.001).unwrap();
        let grid = sim.tuning_curves(e, 11).unwrap();
        assert_eq!(grid.len(), 11);
        assert!(grid.iter().all(|row| row.len() == 1 + 50));
        assert_eq!(grid[0][0], -1.0);
        assert_eq!(grid[10][0], 1.0);

        let resp = sim.response_curves(e, 5).unwrap();
        assert_eq!(resp.len(), 5);
        // Response curves are monotone in the projected input.
        for k in 1..=50 {
            assert!(resp[4][k] >= resp[0][k]);
        }
    }

    #[test]
    fn weights_cover_decoded_connections() {
        let mut b = ModelBuilder::new("model");
        let e1 = b.ensemble("e1", EnsembleParams { n_neurons: 8, ..EnsembleParams::default() });
        let e2 = b.ensemble("e2", EnsembleParams { n_neurons: 8, ..EnsembleParams::default() });
        let c = b.connect(e1, e2, ConnectionParams::default());
        let two = b.build().unwrap();
        let (mut sim, handles) =
            Simulator::new(&two, &[ProbeSpec::new(Target::Object(c), "weights", 1)], 0.001)
                .unwrap();
        sim.step();
        match &sim.data(handles[0]).unwrap().samples[0] {
            Sample::Matrix(m) => {
                assert_eq!(m.len(), 1);
                assert_eq!(m[0].len(), 8);
            }
            other => panic!("expected a matrix, got {other:?}"),
        }
    }
}
