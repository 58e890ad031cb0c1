//! bridge-view - headless viewer
//!
//! Connects to a backend, mirrors its network, lays it out into an in-memory
//! scene and optionally probes and steps the simulation, then prints what it
//! saw. Useful for smoke-testing a backend without a 3D host.

use std::io;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use bridge_view::prelude::*;

const USAGE: &str = "\
bridge-view: headless viewer for a bridged backend
Usage: bridge-view [options]

Options:
  --addr <host:port>       Backend address (default from settings, 127.0.0.1:6001)
  --settings <file>        JSON viewer settings
  --observe <source:path>  Probe to install, repeatable (e.g. a:probeable.decoded_output)
  --steps <n>              Scrub the timeline to step n
  --timeout <secs>         How long to wait for each answer (default 5)
  -h, --help               Show this help";

#[derive(Debug, Default)]
struct Cli {
    addr: Option<String>,
    settings: Option<PathBuf>,
    observe: Vec<(String, String)>,
    steps: u64,
    timeout: Option<u64>,
    help: bool,
}

impl Cli {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut cli = Cli::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |name: &str| args.next().ok_or_else(|| format!("{name} needs a value"));
            match arg.as_str() {
                "--addr" => cli.addr = Some(value("--addr")?),
                "--settings" => cli.settings = Some(value("--settings")?.into()),
                "--observe" => {
                    let raw = value("--observe")?;
                    let (source, path) = raw
                        .split_once(':')
                        .ok_or_else(|| format!("--observe expects source:path, got `{raw}`"))?;
                    cli.observe.push((source.to_string(), path.to_string()));
                }
                "--steps" => {
                    let raw = value("--steps")?;
                    cli.steps = raw.parse().map_err(|_| format!("invalid step count `{raw}`"))?;
                }
                "--timeout" => {
                    let raw = value("--timeout")?;
                    cli.timeout = Some(raw.parse().map_err(|_| format!("invalid timeout `{raw}`"))?);
                }
                "-h" | "--help" => cli.help = true,
                other => return Err(format!("unknown argument `{other}`")),
            }
        }
        Ok(cli)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match Cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("bridge-view: {e}\n\n{USAGE}");
            process::exit(2);
        }
    };
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let mut settings = match &cli.settings {
        Some(path) => ViewerSettings::load(path)?,
        None => ViewerSettings::default(),
    };
    if let Some(addr) = cli.addr {
        settings.addr = addr;
    }
    let timeout = Duration::from_secs(cli.timeout.unwrap_or(5));

    let transport = TcpTransport::connect(settings.addr.as_str(), settings.max_frame_bytes)?;
    info!("connected to {}", transport.peer());
    let mut ctx = SessionContext::new(settings, transport);
    let mut scene = RecordingScene::new();

    ctx.request_snapshot()?;
    wait_for(&mut ctx, timeout, |ctx| ctx.status() == Status::Ready)?;
    let stats = ctx.layout_and_draw(&mut scene, &BuiltinLayout::default())?;
    info!(created = stats.created, "scene built");

    for (source, path) in &cli.observe {
        ctx.observe(source, path)?;
    }
    if cli.steps > 0 {
        if let TimelineAction::Request { until } = ctx.on_frame(cli.steps, &mut scene)? {
            info!(until, "stepping");
            wait_for(&mut ctx, timeout, |ctx| !ctx.timeline.is_paused())?;
        }
        ctx.on_frame(cli.steps, &mut scene)?;
    }

    let mirror = ctx.mirror();
    println!("network: {}", mirror.name());
    println!("  objects: {}", mirror.leaves().len());
    println!("  connections: {}", mirror.edges().len());
    println!("  subnetworks: {}", mirror.all_networks().len());
    println!(
        "view: {} nodes, {} edges, {} scene objects",
        ctx.view().len(),
        ctx.view().graph.edge_count(),
        scene.objects.len()
    );
    for (source, path) in ctx.cache.keys() {
        let len = ctx.cache.series(source, path).map_or(0, |s| s.len());
        println!("  {source} {path}: {len} samples");
    }
    Ok(())
}

fn wait_for<T: Transport>(
    ctx: &mut SessionContext<T>,
    timeout: Duration,
    done: impl Fn(&SessionContext<T>) -> bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = Instant::now() + timeout;
    let poll = ctx.settings.poll_interval();
    while !done(ctx) {
        if Instant::now() >= deadline {
            warn!("gave up waiting after {timeout:?}");
            return Err(format!("no answer from backend within {timeout:?}").into());
        }
        ctx.poll()?;
        thread::sleep(poll);
    }
    Ok(())
}
