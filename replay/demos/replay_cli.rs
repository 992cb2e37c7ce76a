//! Command-line front end for the replay harness.
//!
//! Not part of the library surface — a demonstration of wiring
//! [`alloc_core::Engine`] and [`replay::worker`] together, in the same
//! spirit as `openexr`'s `exrinfo` example. Flags match spec.md §6's
//! "Harness CLI surface" table exactly: `-t T` worker count, `-r R`
//! repeat count, `-s` silent, `-d` verbose per-operation trace,
//! positional `<script>`. Exit code 0 on success, 1 on argument error
//! or file-open failure.
//!
//! Every `s` token in the script invokes the stats callback regardless
//! of these flags — that is the script's own semantics (spec.md §4.3),
//! not something the CLI surface gates.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use alloc_core::{Engine, RawAllocator};
use replay::worker::{replay_file_multi_worker, Trace};

#[derive(Parser)]
#[clap(name = "replay-cli", about = "Replay a deterministic allocation script")]
struct Args {
    /// Path to the script file.
    script: PathBuf,

    /// Worker count (≥1): number of threads, each independently
    /// replaying the script against the shared engine.
    #[clap(short = 't', long = "threads", default_value_t = 1)]
    t: usize,

    /// Repeat count (≥1): number of times each worker replays the
    /// script.
    #[clap(short = 'r', long = "repeat", default_value_t = 1)]
    r: u32,

    /// Silent: suppress the per-worker summary line.
    #[clap(short = 's', long = "silent")]
    s: bool,

    /// Verbose per-operation trace.
    #[clap(short = 'd', long = "debug")]
    d: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let engine = Arc::new(Engine::default());
    let trace = match (args.s, args.d) {
        (true, _) => Trace::Silent,
        (false, true) => Trace::Verbose,
        (false, false) => Trace::Summary,
    };

    let stats_cb: Option<Arc<dyn Fn() + Send + Sync>> = {
        let engine = Arc::clone(&engine);
        Some(Arc::new(move || engine.describe_freelist()))
    };

    let results = replay_file_multi_worker(engine, &args.script, args.t, args.r, stats_cb, trace);

    let mut failures = 0;
    for (worker_id, result) in results.into_iter().enumerate() {
        match result {
            Ok(timings) => {
                if !args.s {
                    println!(
                        "worker {worker_id}: {} allocs, {} reallocs, {} frees, {:?} total",
                        timings.allocate_count,
                        timings.reallocate_count,
                        timings.deallocate_count,
                        timings.total()
                    );
                }
            }
            Err(e) => {
                eprintln!("worker {worker_id} failed: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}
