//! Simulation driver: lazy simulator construction, batched stepping,
//! scheduled one-shot plots.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use neurobridge::access_path::AccessPath;
use neurobridge::model::Model;
use neurobridge::resolver::NameResolver;
use neurobridge::schema::{Message, PlotLines, Sample, StepRecord};
use neurobridge::simulator::{ProbeHandle, SimError, Simulator, DEFAULT_CURVE_POINTS};

use crate::probes::ProbeRegistry;

/// A `PlotLines` request waiting for its step.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPlot {
    pub request: PlotLines,
}

struct Running {
    sim: Simulator,
    handles: Vec<ProbeHandle>,
}

pub struct SimulationDriver {
    dt: f64,
    running: Option<Running>,
    scheduled: Vec<ScheduledPlot>,
}

impl SimulationDriver {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            running: None,
            scheduled: Vec::new(),
        }
    }

    pub fn has_simulator(&self) -> bool {
        self.running.is_some()
    }

    pub fn n_steps(&self) -> u64 {
        self.running.as_ref().map_or(0, |r| r.sim.n_steps())
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Takes effect the next time a simulator is built.
    pub fn set_dt(&mut self, dt: f64) {
        if dt > 0.0 && dt.is_finite() {
            self.dt = dt;
        }
    }

    pub fn scheduled(&self) -> &[ScheduledPlot] {
        &self.scheduled
    }

    fn ensure_simulator(&mut self, model: &Model, probes: &ProbeRegistry) -> Result<(), SimError> {
        if self.running.is_none() {
            let (sim, handles) = Simulator::new(model, &probes.specs(), self.dt)?;
            info!(dt = self.dt, probes = handles.len(), "simulator built");
            self.running = Some(Running { sim, handles });
        }
        Ok(())
    }

    /// Advance to step `until`, emitting scheduled plots as their step comes
    /// up and one `SimulationSteps` message at the end.
    pub fn step(
        &mut self,
        model: &Model,
        names: &NameResolver,
        probes: &ProbeRegistry,
        until: u64,
        emit: &mut dyn FnMut(Message),
    ) -> Result<(), SimError> {
        let cur = self.n_steps();
        if until <= cur {
            warn!(until, n_steps = cur, "step target already reached; nothing to do");
            emit(Message::SimulationSteps(Vec::new()));
            return Ok(());
        }
        self.ensure_simulator(model, probes)?;

        for label in cur..until {
            self.fire_scheduled(names, label, emit);
            if let Some(r) = self.running.as_mut() {
                r.sim.step();
            }
        }
        debug!(from = cur, until, "advanced simulator");

        let records = self.collect(probes);
        emit(Message::SimulationSteps(records));
        Ok(())
    }

    fn fire_scheduled(&mut self, names: &NameResolver, label: u64, emit: &mut dyn FnMut(Message)) {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|p| p.request.step == label);
        self.scheduled = rest;
        for plot in due {
            if let Some(msg) = self.compute_plot(names, &plot.request) {
                emit(msg);
            }
        }
    }

    /// Drain every probe and group the samples per `(step, source)`.
    fn collect(&mut self, probes: &ProbeRegistry) -> Vec<StepRecord> {
        let Some(r) = self.running.as_mut() else {
            return Vec::new();
        };
        let mut grouped: BTreeMap<(u64, String), BTreeMap<String, Sample>> = BTreeMap::new();
        for (probe, handle) in probes.iter().zip(&r.handles) {
            let data = r.sim.take_data(*handle);
            for (step, sample) in data.steps.into_iter().zip(data.samples) {
                grouped
                    .entry((step, probe.source.clone()))
                    .or_default()
                    .insert(probe.access_path.clone(), sample);
            }
        }
        grouped
            .into_iter()
            .map(|((step, node_name), parameters)| StepRecord {
                step,
                node_name,
                parameters,
            })
            .collect()
    }

    /// Queue a plot, or compute it right away when its step has passed.
    pub fn schedule(&mut self, names: &NameResolver, request: PlotLines, emit: &mut dyn FnMut(Message)) {
        if self.running.is_some() && request.step < self.n_steps() {
            if let Some(msg) = self.compute_plot(names, &request) {
                emit(msg);
            }
            return;
        }
        debug!(source = %request.source, step = request.step, "plot scheduled");
        self.scheduled.push(ScheduledPlot { request });
    }

    fn compute_plot(&self, names: &NameResolver, req: &PlotLines) -> Option<Message> {
        let sim = &self.running.as_ref()?.sim;
        let Some(id) = names.object(&req.source) else {
            warn!(source = %req.source, "plot for unknown source dropped");
            return None;
        };
        let n_points = req.n_points.unwrap_or(DEFAULT_CURVE_POINTS);
        let grid = match AccessPath::parse(&req.access_path) {
            AccessPath::TuningCurves => sim.tuning_curves(id, n_points),
            AccessPath::ResponseCurves => sim.response_curves(id, n_points),
            _ => {
                warn!(path = %req.access_path, "only tuning and response curves can be plotted");
                return None;
            }
        };
        match grid {
            Ok(data) => Some(Message::PlotLines(PlotLines {
                n_points: Some(n_points),
                data: Some(data),
                ..req.clone()
            })),
            Err(e) => {
                warn!(source = %req.source, "plot failed: {e}");
                None
            }
        }
    }

    /// Forget the simulator and every pending plot.
    pub fn reset(&mut self) {
        self.running = None;
        self.scheduled.clear();
    }

    /// Drop pending plots; the simulator is left alone.
    pub fn stop(&mut self) -> usize {
        let dropped = self.scheduled.len();
        self.scheduled.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurobridge::schema::Observe;

    fn setup(sample_every: u64) -> (Model, NameResolver, ProbeRegistry) {
        let model = Model::demo();
        let names = NameResolver::new(&model);
        let mut probes = ProbeRegistry::new();
        probes
            .observe(
                &model,
                &names,
                &Observe {
                    source: "a".to_string(),
                    access_path: "probeable/decoded_output".to_string(),
                    sample_every,
                    dt: 0.001,
                },
                false,
            )
            .unwrap();
        (model, names, probes)
    }

    fn run(driver: &mut SimulationDriver, f: impl FnOnce(&mut SimulationDriver, &mut dyn FnMut(Message))) -> Vec<Message> {
        let mut out = Vec::new();
        f(driver, &mut |m| out.push(m));
        out
    }

    fn steps(msg: &Message) -> Vec<u64> {
        match msg {
            Message::SimulationSteps(records) => records.iter().map(|r| r.step).collect(),
            other => panic!("expected steps, got {other:?}"),
        }
    }

    #[test]
    fn consecutive_batches_continue_the_step_count() {
        let (model, names, probes) = setup(2);
        let mut d = SimulationDriver::new(0.001);
        let first = run(&mut d, |d, emit| d.step(&model, &names, &probes, 6, emit).unwrap());
        let second = run(&mut d, |d, emit| d.step(&model, &names, &probes, 10, emit).unwrap());
        assert_eq!(steps(&first[0]), vec![0, 2, 4]);
        assert_eq!(steps(&second[0]), vec![6, 8]);
    }

    #[test]
    fn reaching_back_is_an_empty_reply() {
        let (model, names, probes) = setup(1);
        let mut d = SimulationDriver::new(0.001);
        let out = run(&mut d, |d, emit| d.step(&model, &names, &probes, 0, emit).unwrap());
        assert_eq!(out, vec![Message::SimulationSteps(Vec::new())]);
        assert!(!d.has_simulator());
        assert_eq!(d.n_steps(), 0);
    }

    #[test]
    fn scheduled_plot_fires_once_at_its_step() {
        let (model, names, probes) = setup(1);
        let mut d = SimulationDriver::new(0.001);
        let req = PlotLines::request("a", "neurons.tuning_curves", 2);
        let out = run(&mut d, |d, emit| {
            d.schedule(&names, req, emit);
            d.step(&model, &names, &probes, 5, emit).unwrap();
        });
        assert_eq!(out.len(), 2);
        match &out[0] {
            Message::PlotLines(p) => {
                let data = p.data.as_ref().unwrap();
                assert_eq!(data.len(), DEFAULT_CURVE_POINTS);
                assert_eq!(data[0].len(), 1 + 50);
            }
            other => panic!("expected plot first, got {other:?}"),
        }
        assert!(d.scheduled().is_empty());

        // A step that already passed is answered immediately.
        let late = PlotLines::request("squared", "neurons/response_curves", 1);
        let out = run(&mut d, |d, emit| d.schedule(&names, late, emit));
        assert!(matches!(&out[..], [Message::PlotLines(p)] if p.data.is_some()));
    }

    #[test]
    fn stop_and_reset_drop_pending_plots() {
        let (model, names, probes) = setup(1);
        let mut d = SimulationDriver::new(0.001);
        run(&mut d, |d, emit| {
            d.schedule(&names, PlotLines::request("a", "neurons.tuning_curves", 9), emit)
        });
        assert_eq!(d.stop(), 1);
        run(&mut d, |d, emit| d.step(&model, &names, &probes, 3, emit).unwrap());
        d.reset();
        assert!(!d.has_simulator());
        assert_eq!(d.n_steps(), 0);
    }
}
