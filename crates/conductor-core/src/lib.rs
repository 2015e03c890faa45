//! Core of conductor: plans a task DAG into waves, dispatches each wave
//! with bounded parallelism to an external LLM executor, reviews every
//! result through the QC stage, and aggregates the run into a final report.
//!
//! The seams are traits: [`invoker::Executor`] wraps the external process,
//! [`logging::EventSink`] receives progress events. Everything else is
//! plain data flowing one way: plan -> waves -> task results -> summary.

pub mod agent;
pub mod executor;
pub mod invoker;
pub mod logging;
pub mod plan;
pub mod qc;
pub mod report;
pub mod retry;
pub mod wave;
