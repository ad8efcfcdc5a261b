//! rstchart - statechart runner
//!
//! Loads a machine definition, runs it as an actor against a sequence of
//! events and prints the resulting state.

use clap::Parser;
use rstchart::{
    create_actor, ActorOptions, Event, Machine, Observer, PersistedSnapshot, RuntimeConfig,
    TimerDriver, TokioClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rstchart")]
#[command(about = "Run a statechart definition against a sequence of events")]
#[command(version)]
struct Cli {
    /// Machine definition (JSON file)
    machine: PathBuf,

    /// Events to send in order, as NAME or NAME=<json payload>
    events: Vec<String>,

    /// Actor input (JSON)
    #[arg(short, long)]
    input: Option<String>,

    /// Persisted snapshot to resume from (JSON file)
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Milliseconds to wait for delayed transitions after the last event
    #[arg(long, default_value_t = 0)]
    settle_ms: u64,

    /// Print the persisted snapshot instead of the state value
    #[arg(long)]
    persist: bool,
}

fn parse_event(arg: &str) -> Result<Event, serde_json::Error> {
    match arg.split_once('=') {
        Some((name, payload)) => Ok(Event::new(name).with_data(serde_json::from_str(payload)?)),
        None => Ok(Event::new(arg)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration (from file if RSTCHART_CONFIG is set, then env overrides)
    let config = match RuntimeConfig::load() {
        Ok(c) => c,
        Err(e) => {
            if std::env::var("RSTCHART_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            RuntimeConfig::default()
        }
    };

    let machine = Machine::parse(&std::fs::read_to_string(&cli.machine)?)?;
    tracing::info!(machine = %machine.id(), checksum = %machine.definition().checksum, "loaded machine");

    let mut options = ActorOptions::new()
        .with_config(config)
        .with_clock(Arc::new(TokioClock::new()));
    if let Some(input) = &cli.input {
        options = options.with_input(serde_json::from_str(input)?);
    }
    if let Some(path) = &cli.restore {
        let snapshot: PersistedSnapshot = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        options = options.with_snapshot(snapshot);
    }

    let actor = create_actor(Arc::new(machine), options)?;
    actor.subscribe(
        Observer::new()
            .on_next(|snapshot| {
                if let Some(s) = snapshot.as_machine() {
                    tracing::debug!(value = ?s.value, status = %s.status, "snapshot");
                }
            })
            .on_error(|e| tracing::error!("Actor failed: {}", e)),
    );
    actor.start()?;
    let driver = TimerDriver::spawn(actor.system().clone());

    for arg in &cli.events {
        let event = parse_event(arg)?;
        tracing::info!(event = %event.name, "sending");
        actor.send(event)?;
    }

    if cli.settle_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;
    }
    driver.shutdown().await;

    let output = if cli.persist {
        serde_json::to_value(actor.persisted()?)?
    } else {
        let snapshot = actor.get_snapshot();
        match snapshot.as_machine() {
            Some(s) => serde_json::json!({
                "value": s.value,
                "context": s.context,
                "status": s.status,
                "output": s.output,
            }),
            None => snapshot.context().clone(),
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
