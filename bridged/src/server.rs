//! Listener: accepts viewers and runs one session thread per connection.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, info_span, warn};

use neurobridge::model::Model;

use crate::config::BackendConfig;
use crate::session::{run_session, SessionOptions};

pub struct Server {
    listener: TcpListener,
    model: Arc<Model>,
    opts: SessionOptions,
}

impl Server {
    pub fn bind(cfg: &BackendConfig, model: Arc<Model>) -> io::Result<Self> {
        let listener = TcpListener::bind(cfg.addr())?;
        // Polled so the running flag is honored between accepts.
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            model,
            opts: SessionOptions {
                default_dt: cfg.default_dt,
                poll_interval: cfg.poll_interval(),
                max_frame_bytes: cfg.max_frame_bytes,
                accept_unframed_handshake: cfg.accept_unframed_handshake,
            },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `running` is cleared, then join every session thread.
    pub fn run(self, running: Arc<AtomicBool>) {
        let mut sessions: Vec<JoinHandle<()>> = Vec::new();
        let mut next_id = 0u64;

        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    next_id += 1;
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(%peer, "could not switch socket to blocking: {e}");
                        continue;
                    }
                    info!(%peer, session = next_id, "viewer connected");

                    let model = Arc::clone(&self.model);
                    let opts = self.opts.clone();
                    let running = Arc::clone(&running);
                    let span = info_span!("session", id = next_id, %peer);
                    let spawned = thread::Builder::new()
                        .name(format!("session-{next_id}"))
                        .spawn(move || {
                            let _enter = span.enter();
                            if let Err(e) = run_session(stream, model, &opts, &running) {
                                error!("session ended: {e}");
                            }
                        });
                    match spawned {
                        Ok(handle) => sessions.push(handle),
                        Err(e) => error!(%peer, "could not spawn session thread: {e}"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    sessions.retain(|h| !h.is_finished());
                    thread::sleep(self.opts.poll_interval);
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    thread::sleep(self.opts.poll_interval.max(Duration::from_millis(10)));
                }
            }
        }

        info!(sessions = sessions.len(), "listener stopping; joining sessions");
        for handle in sessions {
            if handle.join().is_err() {
                error!("session thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    use neurobridge::model::{ConnectionParams, EnsembleParams, ModelBuilder, NodeOutput};
    use neurobridge::schema::{Message, Observe, PlotLines, Sample, Simulation, StepRecord};
    use neurobridge::wire::{encode_frame, read_frame, write_message, DEFAULT_MAX_FRAME_BYTES};

    struct Running {
        addr: SocketAddr,
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl Drop for Running {
        fn drop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(t) = self.thread.take() {
                t.join().unwrap();
            }
        }
    }

    fn small_model() -> Model {
        let mut b = ModelBuilder::new("model").with_seed(7);
        let a = b.node("A", NodeOutput::constant(vec![0.5]));
        let ens = b.ensemble(
            "B",
            EnsembleParams {
                n_neurons: 10,
                ..EnsembleParams::default()
            },
        );
        b.connect(a, ens, ConnectionParams::default());
        b.build().unwrap()
    }

    fn start(accept_unframed: bool) -> Running {
        let cfg = BackendConfig {
            port: 0,
            poll_interval_ms: 10,
            accept_unframed_handshake: accept_unframed,
            ..BackendConfig::default()
        };
        let server = Server::bind(&cfg, Arc::new(small_model())).unwrap();
        let addr = server.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::spawn(move || server.run(flag));
        Running {
            addr,
            running,
            thread: Some(thread),
        }
    }

    fn connect(server: &Running) -> TcpStream {
        let stream = TcpStream::connect(server.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(20))).unwrap();
        stream
    }

    fn send(stream: &mut TcpStream, msg: Message) {
        write_message(stream, &msg).unwrap();
    }

    fn recv(stream: &mut TcpStream) -> Message {
        let payload = read_frame(stream, DEFAULT_MAX_FRAME_BYTES).unwrap();
        Message::from_payload(&payload).unwrap()
    }

    fn recv_steps(stream: &mut TcpStream) -> Vec<StepRecord> {
        match recv(stream) {
            Message::SimulationSteps(records) => records,
            other => panic!("expected SimulationSteps, got {other:?}"),
        }
    }

    fn observe_b(sample_every: u64) -> Observe {
        Observe {
            source: "B".to_string(),
            access_path: "probeable/decoded_output".to_string(),
            sample_every,
            dt: 0.001,
        }
    }

    fn decoded(record: &StepRecord) -> &Sample {
        &record.parameters["probeable.decoded_output"]
    }

    #[test]
    fn connect_and_snapshot() {
        let server = start(false);
        let mut s = connect(&server);
        send(&mut s, Message::NetworkSchema(None));
        let Message::NetworkSchema(Some(snap)) = recv(&mut s) else {
            panic!("expected a snapshot");
        };
        assert_eq!(snap.nodes.keys().map(String::as_str).collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(snap.nodes["B"].n_neurons, Some(10));
        assert_eq!(snap.n_neurons, 10);
        let conn = snap.connections.values().next().unwrap();
        assert_eq!((conn.pre.as_str(), conn.post.as_str()), ("A", "B"));
    }

    #[test]
    fn probe_step_and_subsampling() {
        let server = start(false);

        let mut s = connect(&server);
        send(&mut s, Message::Observe(observe_b(1)));
        send(&mut s, Message::Simulation(Simulation::step(5, 0.001, 1)));
        let records = recv_steps(&mut s);
        assert_eq!(records.iter().map(|r| r.step).collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
        assert!(records.iter().all(|r| r.node_name == "B" && decoded(r).len() == 1));

        let mut s2 = connect(&server);
        send(&mut s2, Message::Observe(observe_b(2)));
        send(&mut s2, Message::Simulation(Simulation::step(6, 0.001, 2)));
        let records = recv_steps(&mut s2);
        assert_eq!(records.iter().map(|r| r.step).collect::<Vec<_>>(), [0, 2, 4]);
    }

    #[test]
    fn reset_reapplies_observations() {
        let server = start(false);
        let mut s = connect(&server);
        send(&mut s, Message::Observe(observe_b(1)));
        send(&mut s, Message::Simulation(Simulation::step(5, 0.001, 1)));
        let first = recv_steps(&mut s);

        send(
            &mut s,
            Message::Simulation(Simulation::reset(0.001, vec![observe_b(1)], Vec::new())),
        );
        send(&mut s, Message::Simulation(Simulation::step(3, 0.001, 1)));
        let again = recv_steps(&mut s);
        assert_eq!(again.iter().map(|r| r.step).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(&again[..], &first[..3]);
    }

    #[test]
    fn scheduled_tuning_curves_arrive_before_samples() {
        let server = start(false);
        let mut s = connect(&server);
        send(&mut s, Message::Observe(observe_b(1)));
        send(
            &mut s,
            Message::PlotLines(PlotLines::request("B", "neurons.tuning_curves", 2)),
        );
        send(&mut s, Message::Simulation(Simulation::step(5, 0.001, 1)));

        let Message::PlotLines(plot) = recv(&mut s) else {
            panic!("expected the plot first");
        };
        let grid = plot.data.unwrap();
        assert!(!grid.is_empty());
        assert!(grid.iter().all(|row| row.len() == 1 + 10));
        assert_eq!(recv_steps(&mut s).len(), 5);
    }

    #[test]
    fn bad_frames_do_not_end_the_session() {
        let server = start(false);
        let mut s = connect(&server);
        s.write_all(&encode_frame(b"{ not json").unwrap()).unwrap();
        s.write_all(&encode_frame(br#"{"schema":"Nope","data":null}"#).unwrap())
            .unwrap();
        send(&mut s, Message::Simulation(Simulation::step(0, 0.001, 1)));
        assert!(recv_steps(&mut s).is_empty());
        send(&mut s, Message::Simulation(Simulation::stop()));
        assert!(recv_steps(&mut s).is_empty());
    }

    #[test]
    fn unframed_handshake_when_enabled() {
        let server = start(true);
        let mut s = connect(&server);
        s.write_all(&Message::NetworkSchema(None).to_payload().unwrap())
            .unwrap();
        assert!(matches!(recv(&mut s), Message::NetworkSchema(Some(_))));
        // Framed from here on.
        send(&mut s, Message::NetworkSchema(None));
        assert!(matches!(recv(&mut s), Message::NetworkSchema(Some(_))));
    }

    #[test]
    fn shutdown_joins_open_sessions() {
        let mut server = start(false);
        let _idle = connect(&server);
        server.running.store(false, Ordering::SeqCst);
        server.thread.take().unwrap().join().unwrap();
    }
}
