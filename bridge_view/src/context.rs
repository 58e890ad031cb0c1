//! Per-connection viewer state: mirror, cache, plots, colors and timeline,
//! driven by polling the transport from the host's timer.

use std::collections::BTreeSet;

use tracing::{error, info, warn};

use neurobridge::schema::{Message, Observe, PlotLines, Simulation};

use crate::axes::AxesRegistry;
use crate::cache::{normalize_path, SimulationCache};
use crate::coloring::{Coloring, Colors};
use crate::connection::{ClientError, Transport};
use crate::layout::{rescale, LayoutError, LayoutOracle, Positions};
use crate::mirror::MirrorGraph;
use crate::scene::{ReconcileStats, Reconciler, SceneAdapter};
use crate::settings::ViewerSettings;
use crate::timeline::{TimelineAction, TimelineDriver};
use crate::view::{project, ViewGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    /// Connected, snapshot requested but not yet received.
    AwaitingSnapshot,
    Ready,
}

pub struct SessionContext<T: Transport> {
    pub settings: ViewerSettings,
    transport: Option<T>,
    status: Status,
    mirror: MirrorGraph,
    pub cache: SimulationCache,
    pub axes: AxesRegistry,
    pub timeline: TimelineDriver,
    pub node_coloring: Coloring,
    pub edge_coloring: Coloring,
    expanded: BTreeSet<String>,
    observed: Vec<Observe>,
    plots: Vec<PlotLines>,
    reconciler: Reconciler,
    view: ViewGraph,
    positions: Positions,
    last_error: Option<String>,
}

impl<T: Transport> SessionContext<T> {
    pub fn new(settings: ViewerSettings, transport: T) -> Self {
        Self {
            cache: SimulationCache::new(settings.sample_every()),
            timeline: TimelineDriver::new(&settings),
            reconciler: Reconciler::new(settings.node_radius, settings.head_length),
            settings,
            transport: Some(transport),
            status: Status::AwaitingSnapshot,
            mirror: MirrorGraph::default(),
            axes: AxesRegistry::new(),
            node_coloring: Coloring::default(),
            edge_coloring: Coloring::default(),
            expanded: BTreeSet::new(),
            observed: Vec::new(),
            plots: Vec::new(),
            view: ViewGraph::default(),
            positions: Positions::new(),
            last_error: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn mirror(&self) -> &MirrorGraph {
        &self.mirror
    }

    pub fn view(&self) -> &ViewGraph {
        &self.view
    }

    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    pub fn observed(&self) -> &[Observe] {
        &self.observed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Drop everything learned from the backend after a transport failure.
    fn disconnect(&mut self, err: &ClientError) {
        error!("connection lost: {err}");
        self.transport = None;
        self.status = Status::Disconnected;
        self.mirror = MirrorGraph::default();
        self.view = ViewGraph::default();
        self.positions.clear();
        self.cache.clear();
        self.timeline.reset();
        self.observed.clear();
        self.plots.clear();
        self.last_error = Some(err.to_string());
    }

    fn send(&mut self, msg: Message) -> Result<(), ClientError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ClientError::Disconnected);
        };
        if let Err(e) = transport.send(&msg) {
            self.disconnect(&e);
            return Err(e);
        }
        Ok(())
    }

    pub fn request_snapshot(&mut self) -> Result<(), ClientError> {
        self.send(Message::NetworkSchema(None))?;
        self.status = Status::AwaitingSnapshot;
        Ok(())
    }

    /// Ask for a probe; remembered so a reset can re-apply it.
    pub fn observe(&mut self, source: &str, access_path: &str) -> Result<(), ClientError> {
        let req = Observe {
            source: source.to_string(),
            access_path: access_path.to_string(),
            sample_every: self.settings.sample_every(),
            dt: self.settings.dt,
        };
        self.send(Message::Observe(req.clone()))?;
        let path = normalize_path(access_path);
        if !self
            .observed
            .iter()
            .any(|o| o.source == source && normalize_path(&o.access_path) == path)
        {
            self.observed.push(req);
        }
        Ok(())
    }

    pub fn step(&mut self, until: u64) -> Result<(), ClientError> {
        self.send(Message::Simulation(Simulation::step(
            until,
            self.settings.dt,
            self.settings.sample_every(),
        )))
    }

    /// Restart the simulation with the same probes and scheduled plots.
    pub fn reset(&mut self) -> Result<(), ClientError> {
        self.cache.clear();
        self.timeline.reset();
        let msg = Simulation::reset(self.settings.dt, self.observed.clone(), self.plots.clone());
        self.send(Message::Simulation(msg))
    }

    pub fn stop(&mut self) -> Result<(), ClientError> {
        self.send(Message::Simulation(Simulation::stop()))
    }

    pub fn schedule_plot(&mut self, source: &str, access_path: &str, step: u64) -> Result<(), ClientError> {
        let req = PlotLines::request(source, access_path, step);
        self.send(Message::PlotLines(req.clone()))?;
        self.plots.push(req);
        Ok(())
    }

    /// Drain and apply everything the backend sent. Returns the number of
    /// messages handled.
    pub fn poll(&mut self) -> Result<usize, ClientError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ClientError::Disconnected);
        };
        let messages = match transport.poll() {
            Ok(messages) => messages,
            Err(e) => {
                self.disconnect(&e);
                return Err(e);
            }
        };
        let n = messages.len();
        for msg in messages {
            self.handle(msg);
        }
        Ok(n)
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::NetworkSchema(Some(snapshot)) => {
                self.mirror = MirrorGraph::from_snapshot(&snapshot);
                self.expanded.retain(|n| self.mirror.network(n).is_some());
                self.view = project(&self.mirror, &self.expanded);
                self.positions.clear();
                self.status = Status::Ready;
                info!(network = %self.mirror.name(), nodes = self.view.len(), "snapshot received");
            }
            Message::SimulationSteps(records) => {
                let stored = self.cache.ingest(&records);
                self.cache.truncate(self.settings.retention);
                if self.timeline.on_steps() {
                    info!(stored, "steps arrived; resuming playback");
                }
            }
            Message::PlotLines(plot) if plot.data.is_some() => {
                self.cache.store_plot(&plot);
            }
            other => warn!(schema = other.schema(), "unexpected message from backend; dropped"),
        }
    }

    pub fn expand(&mut self, network: &str) -> bool {
        if self.mirror.network(network).is_none() {
            return false;
        }
        self.expanded.insert(network.to_string());
        self.view = project(&self.mirror, &self.expanded);
        true
    }

    pub fn collapse(&mut self, network: &str) -> bool {
        let removed = self.expanded.remove(network);
        if removed {
            self.view = project(&self.mirror, &self.expanded);
        }
        removed
    }

    fn static_colors(&self) -> Colors {
        let nodes: Vec<&str> = self.view.node_names().collect();
        let edges: Vec<&str> = self.view.graph.edge_weights().map(|e| e.name.as_str()).collect();
        let index = self.cache.simulation_cache_steps().saturating_sub(1);
        let mut colors = self
            .node_coloring
            .apply(nodes, &self.mirror, &self.cache, index, self.settings.dt)
            .colors;
        colors.extend(
            self.edge_coloring
                .apply(edges, &self.mirror, &self.cache, index, self.settings.dt)
                .colors,
        );
        colors
    }

    /// Lay out the current view and push it into the scene.
    pub fn layout_and_draw(
        &mut self,
        scene: &mut dyn SceneAdapter,
        oracle: &dyn LayoutOracle,
    ) -> Result<ReconcileStats, LayoutError> {
        let mut positions = oracle.layout(&self.view, self.settings.layout, self.settings.layout_dim)?;
        rescale(&mut positions, self.settings.layout_extent);
        self.positions = positions;
        let colors = self.static_colors();
        Ok(self.reconciler.reconcile(scene, &self.view, &self.positions, &colors))
    }

    /// Host callback for "current frame changed".
    pub fn on_frame(&mut self, frame: u64, scene: &mut dyn SceneAdapter) -> Result<TimelineAction, ClientError> {
        let action = self.timeline.on_frame(frame, self.cache.simulation_cache_steps());
        let window = match action {
            TimelineAction::Request { until } => {
                self.step(until)?;
                return Ok(action);
            }
            TimelineAction::Ignore | TimelineAction::Waiting => return Ok(action),
            TimelineAction::Clamp { window, .. } | TimelineAction::Refresh { window } => window,
        };

        let index = window.end.saturating_sub(1);
        let dt = self.settings.dt;
        for coloring in [&self.node_coloring, &self.edge_coloring] {
            if !coloring.is_dynamic() {
                continue;
            }
            let names: Vec<&str> = self
                .view
                .node_names()
                .chain(self.view.graph.edge_weights().map(|e| e.name.as_str()))
                .collect();
            let pass = coloring.apply(names, &self.mirror, &self.cache, index, dt);
            self.reconciler.apply_colors(scene, &pass.colors);
        }

        self.axes.refresh_all(&self.cache, window, dt);
        for (i, axes) in self.axes.iter().enumerate() {
            let origin = [0.0, -(self.settings.layout_extent + 2.0) * (i as f64 + 1.0), 0.0];
            self.reconciler.draw_axes(scene, &axes.draw(), origin, self.settings.layout_extent);
        }
        Ok(action)
    }
}
