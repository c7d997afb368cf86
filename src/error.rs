//! Error types for the docpipe library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`PipelineError`] — the library-wide error returned by every pipeline
//!   operation. Stage failures are *both* persisted into the document's
//!   tracker record (message + source chain) and returned to the caller as
//!   one of these variants; nothing is swallowed.
//!
//! * [`crate::tracker::TrackerError`] — raised by the status-tracker seam
//!   and converted into the matching `PipelineError` variant at the
//!   executor boundary, so callers see one taxonomy regardless of which
//!   tracker implementation is plugged in.
//!
//! The gate-refusal variants are deliberately distinct: a
//! [`PipelineError::PreconditionViolation`] means the caller invoked a stage
//! out of order and must intervene, while [`PipelineError::AlreadyInProgress`]
//! means a concurrent duplicate trigger lost the race and should simply back
//! off and retry later.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::{AnalysisKind, JobHandle};
use crate::identity::DocumentId;
use crate::payload::{DocumentKind, FragmentRef};
use crate::status::{Stage, StageStatus};

/// All errors returned by the docpipe library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Status-gate errors ────────────────────────────────────────────────
    /// The document's current status is not in the stage's allowed
    /// predecessor set. Non-retryable without caller intervention.
    #[error(
        "stage '{stage}' refused for this document: current status is {status}, \
         which is not an allowed predecessor\nRun the preceding stages first."
    )]
    PreconditionViolation { stage: Stage, status: StageStatus },

    /// Another invocation holds the in-progress status for this document.
    /// Back off and retry later.
    #[error("stage '{stage}' is already in progress for this document (status {status})")]
    AlreadyInProgress { stage: Stage, status: StageStatus },

    /// The stage has failed `attempts` times and the tracker refuses
    /// further attempts.
    #[error(
        "stage '{stage}' exhausted its {attempts} allowed attempts\n\
         Inspect the recorded error, then reset or ignore the document."
    )]
    RetriesExhausted { stage: Stage, attempts: u32 },

    /// No tracker record exists for the document id.
    #[error("no tracker record for document {doc_id}\nIngest the document first.")]
    UnknownDocument { doc_id: DocumentId },

    /// A record with this document id already exists — identical bytes were
    /// ingested before.
    #[error("document {doc_id} was already ingested (identical content)")]
    DuplicateDocument { doc_id: DocumentId },

    // ── Data-invariant errors ─────────────────────────────────────────────
    /// A per-fragment submission was requested for a document with zero
    /// fragments. Signals an upstream bug, not a retryable condition.
    #[error("document {doc_id} has no fragments to submit")]
    NoFragments { doc_id: DocumentId },

    /// The recorded fan-out result is inconsistent with the fragment list.
    #[error("inconsistent fan-out result: {detail}")]
    InvalidFanOut { detail: String },

    /// A stage encountered a document kind it has no logic for.
    #[error("stage '{stage}' does not support {kind} documents")]
    UnsupportedDocumentKind { kind: DocumentKind, stage: Stage },

    /// Document analysis was requested but no feature set is available,
    /// neither as an explicit override nor in the ingested payload.
    #[error(
        "no analysis features recorded for document {doc_id}\n\
         Pass features explicitly or set them at ingestion."
    )]
    MissingFeatures { doc_id: DocumentId },

    // ── External-collaborator errors ──────────────────────────────────────
    /// The analysis backend rejected a job submission. Retryable by
    /// re-running the stage, which re-derives the fan-out decision.
    #[error("{kind} submission rejected by the analysis backend: {detail}")]
    Submission { kind: AnalysisKind, detail: String },

    /// One fetch failed while aggregating per-fragment results. The whole
    /// aggregation fails; no partial payload is written.
    #[error("aggregation incomplete: fetch failed for fragment {fragment}: {detail}")]
    AggregationIncomplete { fragment: FragmentRef, detail: String },

    /// Waiting for an analysis job exceeded the configured timeout. The
    /// submission itself already succeeded; retry the *next* stage later.
    #[error("analysis job {job} not terminal after {secs}s\nIncrease the poll timeout or retry later.")]
    PollTimeout { job: JobHandle, secs: u64 },

    /// The analysis backend reported the job as terminally failed.
    #[error("analysis job {job} failed on the backend: {detail}")]
    JobFailed { job: JobHandle, detail: String },

    // ── Source errors ─────────────────────────────────────────────────────
    /// Ingest source file was not found at the given path.
    #[error("document file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The ingest source string is not a valid file path or URL.
    #[error("invalid ingest source '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("failed to download '{url}': {reason}\nCheck your network connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The source was read but does not carry the PDF magic bytes.
    #[error("file is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Split / storage errors ────────────────────────────────────────────
    /// Document splitting or page rasterisation failed.
    #[error("document split failed: {detail}")]
    Split { detail: String },

    /// A blob read or write failed.
    #[error("blob store operation failed for '{key}': {detail}")]
    Storage { key: String, detail: String },

    /// A blob that an earlier stage should have written is missing.
    #[error("blob not found: '{key}'\nThe stage that writes it may need to be re-run.")]
    MissingBlob { key: String },

    // ── Plumbing errors ───────────────────────────────────────────────────
    /// A persisted status code does not decode to any known stage/state.
    #[error("unknown status code {0} in tracker record")]
    UnknownStatusCode(u32),

    /// The stage graph failed validation at startup.
    #[error("invalid pipeline graph: {detail}")]
    InvalidGraph { detail: String },

    /// Tracker persistence failed (I/O or serialization).
    #[error("tracker persistence error: {0}")]
    Tracker(String),

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether re-running the same stage may succeed without operator
    /// intervention.
    ///
    /// Gate refusals and data-invariant violations are not retryable: the
    /// former need the predecessor stages to run, the latter signal a bug.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::AlreadyInProgress { .. }
                | PipelineError::Submission { .. }
                | PipelineError::AggregationIncomplete { .. }
                | PipelineError::PollTimeout { .. }
                | PipelineError::DownloadFailed { .. }
                | PipelineError::DownloadTimeout { .. }
                | PipelineError::Storage { .. }
        )
    }
}
