mod script;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use formsync_engine::{ConnectionEvent, ReplicationConfig, ReplicationEngine};
use formsync_sim::{HeadlessSimulation, SimObject};
use formsync_tools::WorldInspector;
use script::{Directive, Step};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "formsync-cli", about = "Replay server message scripts through the replication engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and default configuration
    Info,
    /// Replay a JSON-lines script against the headless simulation
    Replay {
        /// Script with one message or directive per line
        script: PathBuf,
        /// Frames to run after the last line
        #[arg(short, long, default_value = "10")]
        ticks: u32,
        /// Simulated milliseconds per frame
        #[arg(long, default_value = "100")]
        dt_ms: u64,
        /// JSON replication config; defaults apply to missing fields
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

type Engine = ReplicationEngine<HeadlessSimulation>;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("formsync-cli v{}", env!("CARGO_PKG_VERSION"));
            let config = ReplicationConfig::default();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Replay {
            script,
            ticks,
            dt_ms,
            config,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => ReplicationConfig::default(),
            };
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let steps = script::parse(&source)?;
            let dt = Duration::from_millis(dt_ms.max(1));
            let mut engine = ReplicationEngine::new(config, HeadlessSimulation::new());
            replay(&mut engine, steps, dt, ticks);
            report(&mut engine);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<ReplicationConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn frame(engine: &mut Engine, dt: Duration) {
    let mut errors = engine.tick(dt);
    errors.extend(engine.update());
    for error in errors {
        tracing::warn!(%error, "continuation failed");
    }
}

fn replay(engine: &mut Engine, steps: Vec<Step>, dt: Duration, ticks: u32) {
    let total = steps.len();
    for step in steps {
        match step {
            Step::Message(message) => {
                let kind = message.kind();
                if let Err(error) = engine.handle(*message) {
                    tracing::warn!(kind, %error, "message rejected");
                }
            }
            Step::Directive(directive) => run_directive(engine, directive, dt),
        }
    }
    for _ in 0..ticks {
        frame(engine, dt);
    }
    tracing::info!(steps = total, ticks, "replay finished");
}

fn run_directive(engine: &mut Engine, directive: Directive, dt: Duration) {
    match directive {
        Directive::Wait { secs } => {
            let frames = (secs.max(0.0) / dt.as_secs_f32()).ceil() as u32;
            for _ in 0..frames {
                frame(engine, dt);
            }
        }
        Directive::Connect => engine.on_connection(ConnectionEvent::Accepted),
        Directive::Disconnect => engine.on_connection(ConnectionEvent::Disconnected),
        Directive::Spawn {
            id,
            base_type,
            name,
            pos,
        } => {
            let mut object = SimObject::new(base_type).at(pos);
            if let Some(name) = name {
                object = object.named(&name);
            }
            engine.sim_mut().spawn(id, object);
        }
        Directive::SpawnPlayer { id, pos } => engine.sim_mut().spawn_player(id, pos),
        Directive::Despawn { id } => {
            engine.sim_mut().despawn(id);
        }
        Directive::BindView { slot, id } => engine.sim_mut().bind_view(slot, id),
    }
}

fn report(engine: &mut Engine) {
    let world = engine.world();
    println!("{}", WorldInspector::summary(world, engine.ids()));
    for slot in WorldInspector::list_forms(world) {
        if let Some(info) = WorldInspector::inspect_form(world, slot) {
            println!("  {info}");
        }
    }
    println!(
        "Bootstrap: phase={:?} inventory_generation={}",
        engine.bootstrap().phase(),
        engine.bootstrap().inventory_generation()
    );
    println!("Simulation commands: {}", engine.sim().calls().len());
    for outgoing in engine.drain_outbound() {
        match serde_json::to_string(&outgoing.message) {
            Ok(json) => println!("  -> {:?} {json}", outgoing.reliability),
            Err(error) => tracing::warn!(%error, "outbound message not serializable"),
        }
    }
}
