//! `detsan` — replays a JSONL event trace through the detector core and
//! writes the race report. The engine itself needs a runnable entry
//! point, structured logging, and (optionally) the monitoring surface
//! alongside it.
//!
//! Each line of the trace is one JSON-encoded [`detsan_abi::Event`] (the
//! same shape `detsan-core::abi`'s `__csan_*` shim would have built from a
//! real instrumentor's callbacks). Events are dispatched to a single
//! [`Engine`] in file order — the serial-replay correctness reference;
//! see [`detsan_core::dispatch::sequencer`] for the sharded alternative.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use memmap2::Mmap;

use detsan_core::config::Config;
use detsan_core::dispatch::Dispatcher;
use detsan_core::metrics::Metrics;
use detsan_core::sink;
use detsan_core::symbol::NullSymbolizer;
use detsan_core::{Engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "detsan")]
#[command(about = "Determinacy race detector: replays an instrumented event trace")]
struct Args {
    /// Path to a newline-delimited JSON event trace. `-` or omitted reads
    /// stdin, for piping straight from an instrumentor or a CSI shim.
    #[arg(value_name = "TRACE")]
    trace: Option<PathBuf>,

    /// Print the closing summary line pair even when the output
    /// destination is a file — the summary is otherwise only guaranteed
    /// on the configured output stream.
    #[arg(long)]
    echo_summary: bool,
}

/// Reads the whole trace into memory: `memmap2`-backed when a real file is
/// given (avoids copying a potentially large trace before we've even
/// started replaying it), a plain read when it's piped on stdin.
fn read_trace(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            let file = std::fs::File::open(p).with_context(|| format!("opening trace {}", p.display()))?;
            let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", p.display()))?;
            Ok(String::from_utf8_lossy(&mmap).into_owned())
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading event trace from stdin")?;
            Ok(buf)
        }
    }
}

fn replay(engine: &mut Engine, trace: &str) -> anyhow::Result<u64> {
    let mut dispatcher = Dispatcher::new(std::mem::replace(engine, Engine::new(EngineConfig::default())));
    let mut malformed = 0u64;
    for (lineno, line) in BufReader::new(trace.as_bytes()).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(event) => dispatcher.dispatch(&event),
            Err(err) => {
                // A malformed *line* is a trace-format problem, not a
                // protocol violation in the *event stream* (unmatched
                // sync, unknown bag) — those still abort via `fatal!`
                // once the event reaches the engine. A bad line is
                // skipped and logged instead.
                malformed += 1;
                warn!("trace line {}: not a valid event ({err}), skipping", lineno + 1);
            }
        }
    }
    *engine = dispatcher.into_engine();
    Ok(malformed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load();

    let run_id = uuid::Uuid::new_v4();
    info!("detsan run {run_id} starting at {}", Utc::now().to_rfc3339());

    if config.engine.disabled {
        info!("CILKSAN_DISABLE set: running in no-op mode");
    }

    let metrics = Arc::new(Metrics::new());
    let mut engine = Engine::new(config.engine_config()).with_metrics(metrics.clone());

    let trace = read_trace(args.trace.as_ref())?;
    let malformed = replay(&mut engine, &trace)?;
    if malformed > 0 {
        warn!("{malformed} malformed trace line(s) skipped");
    }

    info!(
        "processed {} events; {} distinct races, {} suppressed",
        engine.events_processed(),
        engine.reports().distinct(),
        engine.reports().suppressed()
    );

    let mut destination = sink::open_destination(&config.output)?;
    sink::write_reports(&mut destination, engine.reports(), &NullSymbolizer, config.output.format)?;
    if args.echo_summary && config.output.path.is_some() {
        eprintln!("Cilksan detected {} distinct races.", engine.reports().distinct());
        eprintln!("Cilksan suppressed {} duplicate race reports.", engine.reports().suppressed());
    }

    if config.monitoring.enabled {
        let state = detsan_core::api::ApiState::connect(&config.monitoring, metrics.clone())
            .await
            .context("opening monitoring store")?;
        state
            .publish(&engine.reports().reports().cloned().collect::<Vec<_>>())
            .await
            .context("publishing race reports to monitoring store")?;

        let section = config.monitoring.clone();
        let serve_state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = detsan_core::api::serve(&section, serve_state).await {
                warn!("monitoring surface exited: {err}");
            }
        });
        info!("monitoring surface enabled at {}; press Ctrl+C to exit", config.monitoring.listen_addr);
        tokio::signal::ctrl_c().await.ok();
    }

    // Exit code is always zero; findings are signaled only through the
    // report stream.
    Ok(())
}
