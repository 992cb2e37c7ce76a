//! Script-driving workers (spec.md §4.3 "Worker loop"). A worker owns a
//! private [`PointerTable`] and replays a parsed script against any
//! [`RawAllocator`], accumulating [`Timings`] as it goes.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use alloc_core::RawAllocator;

use crate::script::{self, ScriptOp};
use crate::stats::Timings;
use crate::table::PointerTable;

/// How much the worker logs as it runs. `Verbose` mirrors the original
/// harness's per-operation debug trace (`libmemsim.c`'s debug flag);
/// `Summary` logs once at the end; `Silent` logs nothing itself
/// (callers may still see `alloc-core`'s own `log::warn!`s on OS
/// failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    Silent,
    Summary,
    Verbose,
}

/// Invoked once per `s` token, after its own time has already been
/// folded into [`Timings::stats`].
pub type StatsCallback = dyn Fn() + Send + Sync;

/// Replays `ops` once against `allocator` using a fresh pointer table,
/// returning accumulated timings. Any pointers still live when the
/// script ends (or hits `e`) are freed before returning, so a worker
/// never leaks a scenario's allocations into the next repetition.
pub fn replay_ops<A: RawAllocator>(
    allocator: &A,
    ops: &[ScriptOp],
    stats_cb: Option<&StatsCallback>,
    trace: Trace,
) -> Timings {
    let mut table = PointerTable::new();
    let mut timings = Timings::default();

    for op in ops {
        match *op {
            ScriptOp::Stop => break,
            ScriptOp::Stats => {
                let start = Instant::now();
                if let Some(cb) = stats_cb {
                    cb();
                }
                timings.record_stats(start.elapsed());
                if trace == Trace::Verbose {
                    log::trace!("s");
                }
            }
            ScriptOp::Clear { index } => {
                let Ok(old) = table.clear(index) else {
                    log::warn!("script referenced out-of-range slot {index}");
                    continue;
                };
                if old.is_null() {
                    continue;
                }
                let start = Instant::now();
                unsafe { allocator.deallocate(old) };
                timings.record_deallocate(start.elapsed());
                if trace == Trace::Verbose {
                    log::trace!("{index} (free)");
                }
            }
            ScriptOp::SetSize { index, size } => {
                let Ok(current) = table.get(index).ok_or(()) else {
                    log::warn!("script referenced out-of-range slot {index}");
                    continue;
                };
                let (result, is_realloc) = if current.is_null() {
                    let start = Instant::now();
                    let p = unsafe { allocator.allocate(size) };
                    timings.record_allocate(start.elapsed());
                    (p, false)
                } else {
                    let start = Instant::now();
                    let p = unsafe { allocator.reallocate(current, size) };
                    timings.record_reallocate(start.elapsed());
                    (p, true)
                };
                if result.is_null() && size != 0 {
                    log::warn!(
                        "allocation of {size} bytes failed for slot {index}: errno={}",
                        errno::errno()
                    );
                }
                let _ = table.set(index, result);
                if trace == Trace::Verbose {
                    log::trace!("{index}={size} ({})", if is_realloc { "realloc" } else { "alloc" });
                }
            }
        }
    }

    for p in table.live() {
        unsafe { allocator.deallocate(p) };
    }

    if trace != Trace::Silent {
        log::info!(
            "replay complete: {} allocs, {} reallocs, {} frees, {} stats calls, {:?} total",
            timings.allocate_count,
            timings.reallocate_count,
            timings.deallocate_count,
            timings.stats_count,
            timings.total()
        );
    }

    timings
}

/// Reads and parses `path`, then replays it `repeat` times against
/// `allocator`, each repetition starting from a fresh pointer table.
pub fn replay_file<A: RawAllocator>(
    allocator: &A,
    path: &Path,
    repeat: u32,
    stats_cb: Option<&StatsCallback>,
    trace: Trace,
) -> io::Result<Timings> {
    let source = fs::read_to_string(path)?;
    let ops = script::parse(&source);
    let mut timings = Timings::default();
    for _ in 0..repeat.max(1) {
        timings.merge(&replay_ops(allocator, &ops, stats_cb, trace));
    }
    Ok(timings)
}

/// Spawns `workers` threads, each independently reading and replaying
/// `path` against the shared `allocator`. Mirrors the original
/// harness's "every worker opens its own copy of the script" model
/// rather than parsing once and sharing the token list, since a worker
/// that hit a read error was expected to fail independently of its
/// siblings.
///
/// A thread that fails to spawn aborts the whole process with a
/// non-zero exit, mirroring the original's `exit(1)` on `pthread_create`
/// failure (spec.md §7, `THREAD_SPAWN_FAILURE`) — this is a harness, not
/// a library embedded in a larger program, so a fail-stop here is the
/// faithful behavior rather than an unwind a caller could plausibly
/// recover from.
pub fn replay_file_multi_worker<A>(
    allocator: Arc<A>,
    path: &Path,
    workers: usize,
    repeat: u32,
    stats_cb: Option<Arc<StatsCallback>>,
    trace: Trace,
) -> Vec<io::Result<Timings>>
where
    A: RawAllocator + 'static,
{
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers.max(1) {
        let allocator = Arc::clone(&allocator);
        let path = path.to_owned();
        let stats_cb = stats_cb.clone();
        let handle = std::thread::Builder::new()
            .name(format!("replay-worker-{worker_id}"))
            .spawn(move || {
                let cb = stats_cb.as_deref();
                replay_file(allocator.as_ref(), &path, repeat, cb, trace)
            })
            .unwrap_or_else(|e| {
                log::error!("failed to spawn replay worker {worker_id}: {e}");
                std::process::abort();
            });
        handles.push(handle);
    }
    handles.into_iter().map(|h| h.join().expect("replay worker panicked")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_core::single::SingleArenaEngine;

    #[test]
    fn replay_frees_everything_left_live_at_end() {
        let engine = SingleArenaEngine::new();
        let ops = script::parse("0=100 1=200 0=50");
        let timings = replay_ops(&engine, &ops, None, Trace::Silent);
        assert_eq!(timings.allocate_count, 2);
        assert_eq!(timings.reallocate_count, 1);
    }

    #[test]
    fn stop_token_ends_replay_early() {
        let engine = SingleArenaEngine::new();
        let ops = script::parse("0=100 e 1=200");
        let timings = replay_ops(&engine, &ops, None, Trace::Silent);
        assert_eq!(timings.allocate_count, 1);
    }

    #[test]
    fn stats_token_invokes_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let engine = SingleArenaEngine::new();
        let calls = AtomicUsize::new(0);
        let wrapped: &StatsCallback = &|| {
            calls.fetch_add(1, Ordering::Relaxed);
        };
        let ops = script::parse("0=8 s s");
        let timings = replay_ops(&engine, &ops, Some(wrapped), Trace::Silent);
        assert_eq!(timings.stats_count, 2);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
