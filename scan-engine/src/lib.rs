//! Scan engine: durable worker loop, pipeline processors and the
//! pairwise-LLM detection strategy.
//!
//! A user-initiated scan enqueues an orchestrator job; the worker loop
//! dequeues it and each stage's processor enqueues the next on success:
//! `scan` → `ingest` → `detect`. The detect processor runs the analysis
//! phases inline (cache partition, intent extraction, embedding, candidate
//! retrieval, pairwise verification, clique grouping, ranking, persistence),
//! checkpointing progress on PR rows and in the scan's `phase_cursor` so a
//! crash or provider failure never discards completed work.

mod errors;
pub mod lookup;
pub mod payloads;
pub mod processors;
pub mod prompts;
pub mod resolve;
pub mod worker;

pub use errors::{ScanError, ScanResult};
pub use payloads::{DetectJobPayload, JOB_DETECT, JOB_INGEST, JOB_SCAN, ScanJobPayload};
pub use processors::Processor;
pub use worker::{Worker, WorkerConfig};
