//! # docpipe
//!
//! A resumable document extraction pipeline: documents move through a
//! fixed graph of stages — ingest, raw copy, page split, analysis
//! submission, text/JSON materialization — with every transition
//! persisted, so any stage can be re-entered after a partial failure
//! without duplicating work or corrupting state.
//!
//! ## Why this crate?
//!
//! Long-running extraction over an asynchronous analysis backend fails in
//! the middle, constantly: a worker dies after submitting 4 000 jobs, a
//! fetch times out on fragment 312, the same file is delivered twice.
//! docpipe makes those events boring. Identity is a content hash, so
//! re-delivery is detected instead of re-processed. Every stage runs
//! behind a status gate that admits exactly one attempt at a time and
//! refuses out-of-order execution. Results are recorded before they are
//! consumed, so a retry picks up from the last durable step.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Ingest       content-hash identity, landing zone, tracker record
//!  ├─ 2. Copy         landing → raw zone, id stamped in metadata
//!  ├─ 3. Split        raw → ordered page fragments (pdfium, spawn_blocking)
//!  ├─ 4. Submit       one aggregate job, or one per fragment (fan-out)
//!  ├─ 5. Wait         poll jobs to terminal (outside any status gate)
//!  └─ 6. Materialize  ordered aggregation → text + JSON views per item
//! ```
//!
//! Stages 4–6 repeat per analysis variant (text detection, document
//! analysis, expense analysis, lending analysis).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docpipe::{
//!     AnalysisKind, DocumentKind, IngestRequest, MemoryBlobStore, MemoryTracker,
//!     PdfiumSplitter, Pipeline, PipelineConfig, StubBackend, SubmitOverrides, Workspace,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(
//!         Arc::new(MemoryTracker::default()),
//!         Arc::new(MemoryBlobStore::new()),
//!         Arc::new(StubBackend::new()),
//!         Arc::new(PdfiumSplitter::new()),
//!         Workspace::new("doc-store"),
//!         PipelineConfig::default(),
//!     )?;
//!
//!     let receipt = pipeline
//!         .ingest("report.pdf", DocumentKind::Pdf, IngestRequest::default())
//!         .await?;
//!     let doc = &receipt.doc_id;
//!
//!     pipeline.copy_to_raw(doc).await?;
//!     pipeline.split_fragments(doc).await?;
//!     pipeline
//!         .submit_analysis(doc, AnalysisKind::TextDetection, SubmitOverrides::default())
//!         .await?;
//!     pipeline.wait_for_analysis(doc, AnalysisKind::TextDetection).await?;
//!     let outcome = pipeline.materialize(doc, AnalysisKind::TextDetection).await?;
//!     if let Some(outputs) = outcome.completed() {
//!         for item in outputs {
//!             println!("{}: {} chars", item.fragment, item.text.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Swap [`MemoryTracker`] / [`MemoryBlobStore`] / [`StubBackend`] for real
//! implementations of [`StatusTracker`], [`BlobStore`], and
//! [`AnalysisBackend`] to run against production storage and a production
//! analysis service; the orchestration does not change.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docpipe` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docpipe = { version = "0.2", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod graph;
pub mod identity;
pub mod payload;
pub mod pipeline;
pub mod split;
pub mod status;
pub mod store;
pub mod tracker;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{FragmentOutput, ResultAggregator};
pub use backend::{
    AnalysisBackend, AnalysisFeature, AnalysisKind, AnalysisOutput, BackendCapacity, Block,
    BlockKind, JobHandle, StubBackend, SubmitOptions,
};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::PipelineError;
pub use executor::{StageExecutor, StageOutcome, StageYield};
pub use fanout::{CallShape, FanOutPolicy};
pub use graph::PipelineGraph;
pub use identity::DocumentId;
pub use payload::{
    DocumentKind, DocumentPayload, ErrorDetail, FanOutResult, Fragment, FragmentId, FragmentRef,
};
pub use pipeline::{AdvanceOutcome, IngestReceipt, IngestRequest, Pipeline, SubmitOverrides};
pub use split::{DocumentSplitter, FragmentArtifact, PdfiumSplitter, SplitOptions};
pub use status::{Stage, StageStatus, StatusKind};
pub use store::{BlobMeta, BlobRef, BlobStore, FsBlobStore, MemoryBlobStore};
pub use tracker::{
    ExecutionContext, JsonTracker, MemoryTracker, StageRecord, StatusTracker, TrackerConfig,
    TrackerError,
};
pub use workspace::Workspace;
