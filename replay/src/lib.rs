//! Deterministic replay harness (spec.md §4.3) for exercising any
//! [`alloc_core::RawAllocator`] against a scripted allocation workload,
//! single- or multi-worker, with per-operation timing.

pub mod script;
pub mod stats;
pub mod table;
pub mod worker;

pub use script::ScriptOp;
pub use stats::Timings;
pub use table::PointerTable;
pub use worker::{replay_file, replay_file_multi_worker, replay_ops, StatsCallback, Trace};
