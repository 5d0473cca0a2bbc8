//! Request pipeline components.
//!
//! - **validate**: Request checks before any backend work
//! - **hash**: Request fingerprints for caching and deduplication
//! - **admission**: Concurrency gate with a bounded FIFO queue
//! - **inflight**: Single-flight sharing of identical concurrent requests
//! - **analyzer**: Orchestrates the full pipeline

pub mod admission;
pub mod analyzer;
pub mod hash;
pub mod inflight;
pub mod validate;

pub use admission::{AdmissionGate, GatePermit, GateStatus};
pub use analyzer::{Analyzer, AnalyzerOptions};
pub use hash::Fingerprint;
pub use validate::Validator;
