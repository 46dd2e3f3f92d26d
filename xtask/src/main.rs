//! Dev tool: replays each of the canonical end-to-end scenario fixtures
//! (`detsan_core::scenarios`) through a fresh engine and checks its
//! `distinct`/`suppressed` counts against the pinned values those
//! scenarios were written against. `cargo xtask check-scenarios` is the
//! one place those numbers are asserted outside the crate's own unit
//! tests, so a regression shows up even if someone runs `xtask` instead
//! of `cargo test`.

use anyhow::{bail, Result};
use detsan_core::engine::{Engine, EngineConfig};
use detsan_abi::Event;

struct Scenario {
    name: &'static str,
    events: Vec<Event>,
    expected_distinct: u64,
}

fn scenarios() -> Vec<Scenario> {
    use detsan_core::scenarios::*;
    vec![
        Scenario {
            name: "parallel_increment_on_global",
            events: parallel_increment_on_global(),
            expected_distinct: 2,
        },
        Scenario {
            name: "increment_across_allocation_kinds",
            events: increment_across_allocation_kinds(),
            expected_distinct: 10,
        },
        Scenario {
            name: "free_races_concurrent_vla_fill",
            events: free_races_concurrent_vla_fill(),
            expected_distinct: 2,
        },
        Scenario {
            name: "spawn_with_call_once",
            events: spawn_with_call_once(),
            expected_distinct: 0,
        },
        Scenario {
            name: "reducer_lock_and_unprotected_sum",
            events: reducer_lock_and_unprotected_sum(),
            expected_distinct: 2,
        },
        Scenario {
            name: "gather_intrinsics_race_writes",
            events: gather_intrinsics_race_writes(),
            expected_distinct: 8,
        },
    ]
}

fn check_scenarios() -> Result<()> {
    let mut failures = Vec::new();
    for scenario in scenarios() {
        let mut engine = Engine::new(EngineConfig::default());
        for event in &scenario.events {
            engine.handle(event);
        }
        let distinct = engine.reports().distinct();
        if distinct == scenario.expected_distinct {
            println!("ok  {} (distinct={distinct})", scenario.name);
        } else {
            println!(
                "FAIL {} (distinct={distinct}, expected={})",
                scenario.name, scenario.expected_distinct
            );
            failures.push(scenario.name);
        }
    }

    if !failures.is_empty() {
        bail!("{} scenario(s) drifted from their pinned race count: {:?}", failures.len(), failures);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: cargo xtask <command>");
        eprintln!("Commands:");
        eprintln!("  check-scenarios    Replay the canonical fixtures and verify pinned race counts");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "check-scenarios" => check_scenarios(),
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(1);
        }
    }
}
