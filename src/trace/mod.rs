//! Traces: immutable records of query/response exchanges.
//!
//! A trace is persisted once per exchange (re-recording the same id is an
//! upsert) and never deleted by the engine.

mod types;

pub use types::Trace;
