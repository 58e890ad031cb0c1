//! One viewer session: a recv-dispatch-respond loop over a blocking socket.
//!
//! Each session owns its probe registry and simulator; only the model is
//! shared, read-only.

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use neurobridge::model::Model;
use neurobridge::resolver::NameResolver;
use neurobridge::schema::{Message, Observe, SimAction, Simulation};
use neurobridge::simulator::SimError;
use neurobridge::snapshot::ModelAdapter;
use neurobridge::wire::{write_message, FrameBuffer, WireError};

use crate::driver::SimulationDriver;
use crate::probes::{Installed, ProbeRegistry};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("simulator: {0}")]
    Simulator(#[from] SimError),
}

/// Session knobs taken from the backend config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub default_dt: f64,
    pub poll_interval: Duration,
    pub max_frame_bytes: usize,
    pub accept_unframed_handshake: bool,
}

pub struct Session {
    model: Arc<Model>,
    names: NameResolver,
    probes: ProbeRegistry,
    driver: SimulationDriver,
}

impl Session {
    pub fn new(model: Arc<Model>, default_dt: f64) -> Self {
        let names = NameResolver::new(&model);
        debug!(objects = names.len(), "names resolved");
        Self {
            model,
            names,
            probes: ProbeRegistry::new(),
            driver: SimulationDriver::new(default_dt),
        }
    }

    pub fn names(&self) -> &NameResolver {
        &self.names
    }

    pub fn probes(&self) -> &ProbeRegistry {
        &self.probes
    }

    pub fn driver(&self) -> &SimulationDriver {
        &self.driver
    }

    /// Process one request; replies go to `emit` in the order they are produced.
    ///
    /// Only a simulator that cannot be built is an error; everything else is
    /// logged and dropped.
    pub fn handle(&mut self, msg: Message, emit: &mut dyn FnMut(Message)) -> Result<(), SessionError> {
        match msg {
            Message::NetworkSchema(None) => {
                let snapshot = ModelAdapter::new(&self.model, &self.names).snapshot();
                emit(Message::NetworkSchema(Some(snapshot)));
            }
            Message::Observe(req) => self.observe(&req),
            Message::Simulation(sim) => self.simulation(sim, emit)?,
            Message::PlotLines(req) if req.data.is_none() => {
                self.driver.schedule(&self.names, req, emit);
            }
            other => warn!(schema = other.schema(), "backend-only message received; dropped"),
        }
        Ok(())
    }

    fn observe(&mut self, req: &Observe) {
        if !self.driver.has_simulator() {
            self.driver.set_dt(req.dt);
        }
        let locked = self.driver.has_simulator();
        match self.probes.observe(&self.model, &self.names, req, locked) {
            Ok(Installed::New) => info!(
                source = %req.source,
                path = %req.access_path,
                sample_every = req.sample_every,
                "probe installed"
            ),
            Ok(Installed::Existing) => debug!(source = %req.source, path = %req.access_path, "probe reused"),
            Err(e) => warn!(source = %req.source, path = %req.access_path, "observe rejected: {e}"),
        }
    }

    fn simulation(&mut self, sim: Simulation, emit: &mut dyn FnMut(Message)) -> Result<(), SessionError> {
        match sim.action {
            SimAction::Step => {
                if !self.driver.has_simulator() {
                    self.driver.set_dt(sim.dt);
                }
                self.driver
                    .step(&self.model, &self.names, &self.probes, sim.until, emit)?;
            }
            SimAction::Reset => {
                self.driver.reset();
                self.probes.clear();
                self.driver.set_dt(sim.dt);
                for req in &sim.observe {
                    self.observe(req);
                }
                for plot in sim.plot_lines {
                    self.driver.schedule(&self.names, plot, emit);
                }
                info!(
                    probes = self.probes.len(),
                    scheduled = self.driver.scheduled().len(),
                    "simulation reset"
                );
            }
            SimAction::Stop => {
                let dropped = self.driver.stop();
                info!(dropped, "stop: pending plots discarded");
                emit(Message::SimulationSteps(Vec::new()));
            }
        }
        Ok(())
    }
}

/// Serve one connection until the viewer leaves, a transport error occurs or
/// `running` is cleared.
pub fn run_session(
    stream: TcpStream,
    model: Arc<Model>,
    opts: &SessionOptions,
    running: &AtomicBool,
) -> Result<(), SessionError> {
    stream.set_read_timeout(Some(opts.poll_interval))?;
    stream.set_nodelay(true)?;
    let mut reader = stream.try_clone()?;
    let mut writer = stream;

    let mut session = Session::new(model, opts.default_dt);
    let mut frames =
        FrameBuffer::new(opts.max_frame_bytes).with_unframed_handshake(opts.accept_unframed_handshake);
    let mut buf = vec![0u8; 64 * 1024];

    while running.load(Ordering::SeqCst) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                info!("viewer disconnected");
                return Ok(());
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(e.into()),
        };
        frames.extend(&buf[..n]);

        loop {
            let payload = match frames.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) if e.is_protocol() => {
                    warn!("unreadable request dropped: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let msg = match Message::from_payload(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(bytes = payload.len(), "request dropped: {e}");
                    continue;
                }
            };
            debug!(schema = msg.schema(), "request");

            let mut send_error = None;
            session.handle(msg, &mut |reply| {
                if send_error.is_none() {
                    if let Err(e) = write_message(&mut writer, &reply) {
                        send_error = Some(e);
                    }
                }
            })?;
            if let Some(e) = send_error {
                return Err(e.into());
            }
        }
    }
    info!("session closed by shutdown");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurobridge::schema::PlotLines;

    fn session() -> Session {
        Session::new(Arc::new(Model::demo()), 0.001)
    }

    fn handle(s: &mut Session, msg: Message) -> Vec<Message> {
        let mut out = Vec::new();
        s.handle(msg, &mut |m| out.push(m)).unwrap();
        out
    }

    fn observe(source: &str, path: &str) -> Observe {
        Observe {
            source: source.to_string(),
            access_path: path.to_string(),
            sample_every: 1,
            dt: 0.002,
        }
    }

    #[test]
    fn snapshot_request_is_answered() {
        let mut s = session();
        let out = handle(&mut s, Message::NetworkSchema(None));
        assert!(matches!(&out[..], [Message::NetworkSchema(Some(snap))] if snap.network_name == "model"));
    }

    #[test]
    fn observe_after_step_is_rejected_until_reset() {
        let mut s = session();
        handle(&mut s, Message::Observe(observe("a", "probeable/decoded_output")));
        assert_eq!(s.driver().dt(), 0.002);
        handle(&mut s, Message::Simulation(Simulation::step(2, 0.002, 1)));
        handle(&mut s, Message::Observe(observe("squared", "probeable/decoded_output")));
        assert_eq!(s.probes().len(), 1);

        let reset = Simulation::reset(
            0.001,
            vec![
                observe("a", "probeable/decoded_output"),
                observe("squared", "probeable/decoded_output"),
            ],
            Vec::new(),
        );
        handle(&mut s, Message::Simulation(reset));
        assert_eq!(s.probes().len(), 2);
        assert!(!s.driver().has_simulator());
    }

    #[test]
    fn stop_acknowledges_with_empty_steps() {
        let mut s = session();
        handle(
            &mut s,
            Message::PlotLines(PlotLines::request("a", "neurons.tuning_curves", 50)),
        );
        assert_eq!(s.driver().scheduled().len(), 1);
        let out = handle(&mut s, Message::Simulation(Simulation::stop()));
        assert_eq!(out, vec![Message::SimulationSteps(Vec::new())]);
        assert!(s.driver().scheduled().is_empty());
    }

    #[test]
    fn viewer_bound_messages_are_dropped() {
        let mut s = session();
        assert!(handle(&mut s, Message::SimulationSteps(Vec::new())).is_empty());
        let mut result = PlotLines::request("a", "neurons.tuning_curves", 0);
        result.data = Some(vec![vec![0.0]]);
        assert!(handle(&mut s, Message::PlotLines(result)).is_empty());
        assert!(s.driver().scheduled().is_empty());
    }
}
