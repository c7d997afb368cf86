//! The status-tracker seam: persisted per-document pipeline state.
//!
//! One [`StageRecord`] exists per document, holding its single advancing
//! status, the accumulated [`DocumentPayload`], the last captured error,
//! and per-stage attempt counts. [`StatusTracker::begin`] is the
//! pipeline's sole mutual-exclusion point: it refuses when another attempt
//! holds the in-progress status, when the current status fails the
//! caller's predecessor gate, or when the stage's attempts are exhausted —
//! and otherwise transitions the record to in-progress and hands back an
//! [`ExecutionContext`].
//!
//! The context guarantees finalization on every exit path: `complete`,
//! `fail`, and `ignore` consume it, and dropping it unfinalized (a panic,
//! an early return that skipped the executor) marks the record failed
//! rather than leaving it wedged in-progress.
//!
//! Distributed locking with lease expiry is a property of a real
//! deployment's tracker implementation; the two bundled here —
//! [`MemoryTracker`] and the file-backed [`JsonTracker`] — serialize
//! through a process-local mutex and are documented as such.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::identity::DocumentId;
use crate::payload::{DocumentPayload, ErrorDetail};
use crate::status::{Stage, StageStatus, StatusKind};

/// Tracker-level policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Attempts allowed per stage before `begin` refuses with
    /// `RetriesExhausted`.
    pub max_attempts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig { max_attempts: 3 }
    }
}

/// The persisted record for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub doc_id: DocumentId,
    pub status: StageStatus,
    pub payload: DocumentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Attempt counts keyed by stage name.
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
}

impl StageRecord {
    fn new(doc_id: DocumentId, payload: DocumentPayload) -> Self {
        StageRecord {
            doc_id,
            status: Stage::LandingToRaw.pending(),
            payload,
            error: None,
            attempts: BTreeMap::new(),
        }
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(stage.name()).copied().unwrap_or(0)
    }
}

/// Errors raised by the tracker seam.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("status {status} is not an allowed predecessor of stage '{stage}'")]
    PreconditionViolation { stage: Stage, status: StageStatus },

    #[error("record is held in progress ({status}); stage '{stage}' must back off")]
    AlreadyInProgress { stage: Stage, status: StageStatus },

    #[error("stage '{stage}' already used its {attempts} attempts")]
    RetriesExhausted { stage: Stage, attempts: u32 },

    #[error("no record for document {doc_id}")]
    UnknownDocument { doc_id: DocumentId },

    #[error("record for document {doc_id} already exists")]
    DuplicateDocument { doc_id: DocumentId },

    #[error("tracker I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker state corrupt: {0}")]
    State(#[from] serde_json::Error),
}

impl From<TrackerError> for PipelineError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::PreconditionViolation { stage, status } => {
                PipelineError::PreconditionViolation { stage, status }
            }
            TrackerError::AlreadyInProgress { stage, status } => {
                PipelineError::AlreadyInProgress { stage, status }
            }
            TrackerError::RetriesExhausted { stage, attempts } => {
                PipelineError::RetriesExhausted { stage, attempts }
            }
            TrackerError::UnknownDocument { doc_id } => PipelineError::UnknownDocument { doc_id },
            TrackerError::DuplicateDocument { doc_id } => {
                PipelineError::DuplicateDocument { doc_id }
            }
            TrackerError::Io(e) => PipelineError::Tracker(e.to_string()),
            TrackerError::State(e) => PipelineError::Tracker(e.to_string()),
        }
    }
}

/// How an execution context was closed.
#[derive(Debug)]
pub enum Finalize {
    /// Persist the updated payload and mark the stage succeeded.
    Complete(DocumentPayload),
    /// Persist the captured error and mark the stage failed.
    Fail(ErrorDetail),
    /// Mark the stage deliberately skipped.
    Ignore(String),
}

/// Terminal-write half of a tracker, used by [`ExecutionContext`].
///
/// Split from [`StatusTracker`] so one context type serves every tracker
/// implementation.
pub trait RecordSink: Send + Sync {
    fn finalize(
        &self,
        doc_id: &DocumentId,
        stage: Stage,
        outcome: Finalize,
    ) -> Result<(), TrackerError>;
}

/// Scoped right to execute one stage for one document.
///
/// Obtained from [`StatusTracker::begin`] after the record has been moved
/// to in-progress. Exactly one of [`complete`](Self::complete),
/// [`fail`](Self::fail), or [`ignore`](Self::ignore) must be called; if
/// the context is dropped instead, the record is marked failed with an
/// "aborted" error so no document is left wedged in-progress.
pub struct ExecutionContext {
    sink: Arc<dyn RecordSink>,
    doc_id: DocumentId,
    stage: Stage,
    payload: DocumentPayload,
    finalized: bool,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("doc_id", &self.doc_id)
            .field("stage", &self.stage)
            .field("payload", &self.payload)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Build a context; tracker implementations call this from `begin`.
    pub fn new(
        sink: Arc<dyn RecordSink>,
        doc_id: DocumentId,
        stage: Stage,
        payload: DocumentPayload,
    ) -> Self {
        ExecutionContext {
            sink,
            doc_id,
            stage,
            payload,
            finalized: false,
        }
    }

    pub fn doc_id(&self) -> &DocumentId {
        &self.doc_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The payload as of the in-progress transition.
    pub fn payload(&self) -> &DocumentPayload {
        &self.payload
    }

    pub fn complete(mut self, payload: DocumentPayload) -> Result<(), TrackerError> {
        self.finalized = true;
        self.sink
            .finalize(&self.doc_id, self.stage, Finalize::Complete(payload))
    }

    pub fn fail(mut self, detail: ErrorDetail) -> Result<(), TrackerError> {
        self.finalized = true;
        self.sink
            .finalize(&self.doc_id, self.stage, Finalize::Fail(detail))
    }

    pub fn ignore(mut self, reason: impl Into<String>) -> Result<(), TrackerError> {
        self.finalized = true;
        self.sink
            .finalize(&self.doc_id, self.stage, Finalize::Ignore(reason.into()))
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        warn!(
            "execution context for stage '{}' dropped unfinalized; marking failed",
            self.stage
        );
        let detail =
            ErrorDetail::from_message("stage aborted before finalization (panic or early drop)");
        if let Err(e) = self
            .sink
            .finalize(&self.doc_id, self.stage, Finalize::Fail(detail))
        {
            warn!("could not finalize aborted stage '{}': {e}", self.stage);
        }
    }
}

/// Persisted per-document status tracking.
///
/// The trait is synchronous: status transitions are small writes, and
/// keeping the seam sync lets `begin` stay the one serialization point
/// without an async lock hierarchy.
pub trait StatusTracker: Send + Sync {
    /// Create the record for a newly ingested document at
    /// `landing_to_raw:pending`. Fails with `DuplicateDocument` when the
    /// id is already tracked.
    fn create(
        &self,
        doc_id: &DocumentId,
        payload: DocumentPayload,
    ) -> Result<StageRecord, TrackerError>;

    /// Open an execution context for `stage`, enforcing the status gate.
    ///
    /// The current status is accepted when it is the stage's own pending
    /// or failed status (first run and retry), or a member of `allowed`;
    /// an empty `allowed` set accepts any status. Any in-progress status
    /// refuses with `AlreadyInProgress` first.
    fn begin(
        &self,
        doc_id: &DocumentId,
        stage: Stage,
        allowed: &[StageStatus],
    ) -> Result<ExecutionContext, TrackerError>;

    fn get(&self, doc_id: &DocumentId) -> Result<Option<StageRecord>, TrackerError>;
}

// ── Shared gate/transition logic ─────────────────────────────────────────

fn gate_and_start(
    record: &mut StageRecord,
    stage: Stage,
    allowed: &[StageStatus],
    config: &TrackerConfig,
) -> Result<DocumentPayload, TrackerError> {
    if record.status.kind == StatusKind::InProgress {
        return Err(TrackerError::AlreadyInProgress {
            stage,
            status: record.status,
        });
    }

    let own_restart =
        record.status == stage.pending() || record.status == stage.failed();
    if !own_restart && !allowed.is_empty() && !allowed.contains(&record.status) {
        return Err(TrackerError::PreconditionViolation {
            stage,
            status: record.status,
        });
    }

    let attempts = record.attempts.entry(stage.name().to_string()).or_insert(0);
    if *attempts >= config.max_attempts {
        return Err(TrackerError::RetriesExhausted {
            stage,
            attempts: *attempts,
        });
    }
    *attempts += 1;

    record.status = stage.in_progress();
    debug!(
        "document {:?} → {} (attempt {attempts})",
        record.doc_id, record.status
    );
    Ok(record.payload.clone())
}

fn apply_finalize(record: &mut StageRecord, stage: Stage, outcome: Finalize) {
    match outcome {
        Finalize::Complete(payload) => {
            record.payload = payload;
            record.status = stage.succeeded();
            record.error = None;
        }
        Finalize::Fail(detail) => {
            record.status = stage.failed();
            record.error = Some(detail);
        }
        Finalize::Ignore(reason) => {
            record.status = stage.ignored();
            record.error = Some(ErrorDetail::from_message(format!("ignored: {reason}")));
        }
    }
    debug!("document {:?} → {}", record.doc_id, record.status);
}

// ── In-memory tracker ────────────────────────────────────────────────────

struct MemoryInner {
    records: Mutex<HashMap<DocumentId, StageRecord>>,
    config: TrackerConfig,
}

impl MemoryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentId, StageRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordSink for MemoryInner {
    fn finalize(
        &self,
        doc_id: &DocumentId,
        stage: Stage,
        outcome: Finalize,
    ) -> Result<(), TrackerError> {
        let mut records = self.lock();
        let record = records
            .get_mut(doc_id)
            .ok_or_else(|| TrackerError::UnknownDocument {
                doc_id: doc_id.clone(),
            })?;
        apply_finalize(record, stage, outcome);
        Ok(())
    }
}

/// Process-local [`StatusTracker`] for tests and embedding.
///
/// Mutual exclusion is a plain mutex: correct within one process, no
/// protection across processes.
#[derive(Clone)]
pub struct MemoryTracker {
    inner: Arc<MemoryInner>,
}

impl MemoryTracker {
    pub fn new(config: TrackerConfig) -> Self {
        MemoryTracker {
            inner: Arc::new(MemoryInner {
                records: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl StatusTracker for MemoryTracker {
    fn create(
        &self,
        doc_id: &DocumentId,
        payload: DocumentPayload,
    ) -> Result<StageRecord, TrackerError> {
        let mut records = self.inner.lock();
        if records.contains_key(doc_id) {
            return Err(TrackerError::DuplicateDocument {
                doc_id: doc_id.clone(),
            });
        }
        let record = StageRecord::new(doc_id.clone(), payload);
        records.insert(doc_id.clone(), record.clone());
        Ok(record)
    }

    fn begin(
        &self,
        doc_id: &DocumentId,
        stage: Stage,
        allowed: &[StageStatus],
    ) -> Result<ExecutionContext, TrackerError> {
        let payload = {
            let mut records = self.inner.lock();
            let record = records
                .get_mut(doc_id)
                .ok_or_else(|| TrackerError::UnknownDocument {
                    doc_id: doc_id.clone(),
                })?;
            gate_and_start(record, stage, allowed, &self.inner.config)?
        };
        Ok(ExecutionContext::new(
            self.inner.clone(),
            doc_id.clone(),
            stage,
            payload,
        ))
    }

    fn get(&self, doc_id: &DocumentId) -> Result<Option<StageRecord>, TrackerError> {
        Ok(self.inner.lock().get(doc_id).cloned())
    }
}

// ── JSON-file tracker ────────────────────────────────────────────────────

struct JsonInner {
    path: PathBuf,
    records: Mutex<HashMap<DocumentId, StageRecord>>,
    config: TrackerConfig,
}

impl JsonInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentId, StageRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist the whole map atomically (temp file + rename).
    fn persist(&self, records: &HashMap<DocumentId, StageRecord>) -> Result<(), TrackerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let ordered: BTreeMap<&DocumentId, &StageRecord> = records.iter().collect();
        let json = serde_json::to_vec_pretty(&ordered)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RecordSink for JsonInner {
    fn finalize(
        &self,
        doc_id: &DocumentId,
        stage: Stage,
        outcome: Finalize,
    ) -> Result<(), TrackerError> {
        let mut records = self.lock();
        let record = records
            .get_mut(doc_id)
            .ok_or_else(|| TrackerError::UnknownDocument {
                doc_id: doc_id.clone(),
            })?;
        apply_finalize(record, stage, outcome);
        self.persist(&records)
    }
}

/// File-backed [`StatusTracker`]: the whole record map in one JSON file,
/// written atomically on every transition.
///
/// Suited to single-operator workflows (the CLI uses it). Like
/// [`MemoryTracker`] it serializes through a process-local mutex; it does
/// not coordinate multiple processes.
#[derive(Clone)]
pub struct JsonTracker {
    inner: Arc<JsonInner>,
}

impl JsonTracker {
    /// Open (or create) the tracker file at `path`.
    pub fn open(path: impl Into<PathBuf>, config: TrackerConfig) -> Result<Self, TrackerError> {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(JsonTracker {
            inner: Arc::new(JsonInner {
                path,
                records: Mutex::new(records),
                config,
            }),
        })
    }
}

impl StatusTracker for JsonTracker {
    fn create(
        &self,
        doc_id: &DocumentId,
        payload: DocumentPayload,
    ) -> Result<StageRecord, TrackerError> {
        let mut records = self.inner.lock();
        if records.contains_key(doc_id) {
            return Err(TrackerError::DuplicateDocument {
                doc_id: doc_id.clone(),
            });
        }
        let record = StageRecord::new(doc_id.clone(), payload);
        records.insert(doc_id.clone(), record.clone());
        self.inner.persist(&records)?;
        Ok(record)
    }

    fn begin(
        &self,
        doc_id: &DocumentId,
        stage: Stage,
        allowed: &[StageStatus],
    ) -> Result<ExecutionContext, TrackerError> {
        let payload = {
            let mut records = self.inner.lock();
            let record = records
                .get_mut(doc_id)
                .ok_or_else(|| TrackerError::UnknownDocument {
                    doc_id: doc_id.clone(),
                })?;
            let payload = gate_and_start(record, stage, allowed, &self.inner.config)?;
            self.inner.persist(&records)?;
            payload
        };
        Ok(ExecutionContext::new(
            self.inner.clone(),
            doc_id.clone(),
            stage,
            payload,
        ))
    }

    fn get(&self, doc_id: &DocumentId) -> Result<Option<StageRecord>, TrackerError> {
        Ok(self.inner.lock().get(doc_id).cloned())
    }
}
