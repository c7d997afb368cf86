//! Pipeline stages and the [`Pipeline`] facade.
//!
//! Each submodule implements exactly one transformation; the facade owns
//! the collaborators and routes every stage through the
//! [`crate::executor::StageExecutor`] guard.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ copy_raw ──▶ fragment ──▶ submit ──▶ (wait) ──▶ materialize
//! (identity)  (raw zone)   (pages)     (fan-out)             (text+json)
//! ```
//!
//! 1. [`ingest`]      — derive the content id, land the bytes, create the
//!    tracker record
//! 2. [`copy_raw`]    — stage `landing_to_raw`
//! 3. [`fragment`]    — stage `raw_to_fragment`, via the document splitter
//! 4. [`submit`]      — the four `fragment_to_*_output` stages; fan-out
//!    decision plus job submission
//! 5. [`materialize`] — the four `*_to_text_and_json` stages; ordered
//!    aggregation plus view writing
//! 6. [`postprocess`] — deterministic cleanup of derived text
//!
//! Waiting for submitted jobs ([`Pipeline::wait_for_analysis`]) is a
//! separate operation on purpose: a submit stage succeeds when its jobs
//! are accepted, so a crashed waiter never needs to resubmit anything.

pub mod copy_raw;
pub mod fragment;
pub mod ingest;
pub mod materialize;
pub mod postprocess;
pub mod source;
pub mod submit;

pub use ingest::{IngestReceipt, IngestRequest};
pub use submit::SubmitOverrides;

use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregate::FragmentOutput;
use crate::backend::{AnalysisBackend, AnalysisKind};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executor::{StageExecutor, StageOutcome};
use crate::graph::PipelineGraph;
use crate::identity::DocumentId;
use crate::payload::{DocumentKind, FanOutResult, Fragment};
use crate::split::DocumentSplitter;
use crate::status::{Stage, StageStatus, StatusKind};
use crate::store::{BlobRef, BlobStore};
use crate::tracker::{StageRecord, StatusTracker};
use crate::workspace::Workspace;

/// What [`Pipeline::advance`] did for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// One stage ran (successfully or to an ignore).
    Ran { stage: Stage },
    /// Every requested analysis variant is materialized; nothing to do.
    Complete,
    /// The document sits in a state `advance` will not act on (a stage
    /// was deliberately ignored); operator attention required.
    Halted { status: StageStatus },
}

/// The extraction pipeline: collaborators, config, and the stage guard.
///
/// All stage entry points take a [`DocumentId`] and may be called from
/// concurrent tasks — per-document serialization happens entirely inside
/// the tracker's in-progress transition, and documents never share
/// mutable state.
pub struct Pipeline {
    pub(crate) tracker: Arc<dyn StatusTracker>,
    pub(crate) store: Arc<dyn BlobStore>,
    pub(crate) backend: Arc<dyn AnalysisBackend>,
    pub(crate) splitter: Arc<dyn DocumentSplitter>,
    pub(crate) workspace: Workspace,
    pub(crate) config: PipelineConfig,
    pub(crate) executor: StageExecutor,
}

impl Pipeline {
    /// Assemble a pipeline over the standard stage graph.
    ///
    /// Validates the graph before anything runs.
    pub fn new(
        tracker: Arc<dyn StatusTracker>,
        store: Arc<dyn BlobStore>,
        backend: Arc<dyn AnalysisBackend>,
        splitter: Arc<dyn DocumentSplitter>,
        workspace: Workspace,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let executor = StageExecutor::new(tracker.clone(), PipelineGraph::standard())?;
        Ok(Pipeline {
            tracker,
            store,
            backend,
            splitter,
            workspace,
            config,
            executor,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The tracker record for a document, if it was ever ingested.
    pub fn record(&self, doc_id: &DocumentId) -> Result<Option<StageRecord>, PipelineError> {
        Ok(self.tracker.get(doc_id)?)
    }

    // ── Ingestion ────────────────────────────────────────────────────────

    /// Ingest a document from a local path or HTTP/HTTPS URL.
    pub async fn ingest(
        &self,
        source: &str,
        kind: DocumentKind,
        request: IngestRequest,
    ) -> Result<IngestReceipt, PipelineError> {
        let resolved =
            source::resolve_source(source, self.config.download_timeout_secs).await?;
        ingest::ingest_bytes(self, &resolved.name, resolved.bytes, kind, request).await
    }

    /// Ingest document bytes already held in memory.
    pub async fn ingest_bytes(
        &self,
        name: &str,
        bytes: Vec<u8>,
        kind: DocumentKind,
        request: IngestRequest,
    ) -> Result<IngestReceipt, PipelineError> {
        ingest::ingest_bytes(self, name, bytes, kind, request).await
    }

    // ── Stages ───────────────────────────────────────────────────────────

    /// Stage `landing_to_raw`.
    pub async fn copy_to_raw(
        &self,
        doc_id: &DocumentId,
    ) -> Result<StageOutcome<BlobRef>, PipelineError> {
        copy_raw::run(self, doc_id).await
    }

    /// Stage `raw_to_fragment`.
    pub async fn split_fragments(
        &self,
        doc_id: &DocumentId,
    ) -> Result<StageOutcome<Vec<Fragment>>, PipelineError> {
        fragment::run(self, doc_id).await
    }

    /// The submit stage for one analysis variant.
    pub async fn submit_analysis(
        &self,
        doc_id: &DocumentId,
        kind: AnalysisKind,
        overrides: SubmitOverrides,
    ) -> Result<StageOutcome<FanOutResult>, PipelineError> {
        submit::run(self, doc_id, kind, overrides).await
    }

    /// The convert stage for one analysis variant.
    pub async fn materialize(
        &self,
        doc_id: &DocumentId,
        kind: AnalysisKind,
    ) -> Result<StageOutcome<Vec<FragmentOutput>>, PipelineError> {
        materialize::run(self, doc_id, kind).await
    }

    // ── Waiting ──────────────────────────────────────────────────────────

    /// Wait for every job of one variant's recorded submission to turn
    /// terminal.
    ///
    /// Runs outside any stage's critical section: the submit stage is
    /// already `succeeded`, and a timeout here surfaces as an error
    /// without touching the record — the convert stage is simply retried
    /// later.
    pub async fn wait_for_analysis(
        &self,
        doc_id: &DocumentId,
        kind: AnalysisKind,
    ) -> Result<(), PipelineError> {
        let record = self
            .record(doc_id)?
            .ok_or_else(|| PipelineError::UnknownDocument {
                doc_id: doc_id.clone(),
            })?;
        let fan_out = record.payload.submissions.get(kind).ok_or_else(|| {
            PipelineError::InvalidFanOut {
                detail: format!("no {kind} submission recorded for document {doc_id}"),
            }
        })?;

        for job in fan_out.jobs() {
            debug!("waiting on {kind} job {job}");
            self.backend
                .poll_until_terminal(job, self.config.poll_delay, self.config.poll_timeout)
                .await?;
        }
        info!(
            "{} {kind} job(s) terminal for document {doc_id}",
            fan_out.job_count()
        );
        Ok(())
    }

    // ── Advancement ──────────────────────────────────────────────────────

    /// Run the next stage for a document, derived from its current status
    /// and the analyses requested at ingestion.
    ///
    /// Pending and failed statuses re-run their own stage (a retry);
    /// succeeded statuses run the successor. Call [`Self::wait_for_analysis`]
    /// between a submit stage and its convert stage when the backend is
    /// genuinely asynchronous.
    pub async fn advance(&self, doc_id: &DocumentId) -> Result<AdvanceOutcome, PipelineError> {
        let record = self
            .record(doc_id)?
            .ok_or_else(|| PipelineError::UnknownDocument {
                doc_id: doc_id.clone(),
            })?;
        let status = record.status;

        let target = match status.kind {
            StatusKind::InProgress => {
                return Err(PipelineError::AlreadyInProgress {
                    stage: status.stage,
                    status,
                });
            }
            StatusKind::Ignored => return Ok(AdvanceOutcome::Halted { status }),
            StatusKind::Pending | StatusKind::Failed => Some(status.stage),
            StatusKind::Succeeded => {
                next_stage(status.stage, &record.payload.ingest.analyses)
            }
        };

        match target {
            None => Ok(AdvanceOutcome::Complete),
            Some(stage) => {
                self.run_stage(stage, doc_id).await?;
                Ok(AdvanceOutcome::Ran { stage })
            }
        }
    }

    /// Dispatch one stage by identity, with default overrides.
    async fn run_stage(&self, stage: Stage, doc_id: &DocumentId) -> Result<(), PipelineError> {
        match stage {
            Stage::LandingToRaw => {
                self.copy_to_raw(doc_id).await?;
            }
            Stage::RawToFragment => {
                self.split_fragments(doc_id).await?;
            }
            other => {
                let (kind, is_submit) = analysis_stage(other);
                if is_submit {
                    self.submit_analysis(doc_id, kind, SubmitOverrides::default())
                        .await?;
                } else {
                    self.materialize(doc_id, kind).await?;
                }
            }
        }
        Ok(())
    }
}

/// The stage that follows a succeeded `stage`, given the requested
/// analysis variants.
fn next_stage(stage: Stage, analyses: &[AnalysisKind]) -> Option<Stage> {
    match stage {
        Stage::LandingToRaw => Some(Stage::RawToFragment),
        Stage::RawToFragment => analyses.first().map(|k| k.submit_stage()),
        other => {
            let (kind, is_submit) = analysis_stage(other);
            if is_submit {
                Some(kind.convert_stage())
            } else {
                // Next requested variant after this one, in canonical order.
                analyses
                    .iter()
                    .filter(|k| **k > kind)
                    .min()
                    .map(|k| k.submit_stage())
            }
        }
    }
}

/// Decompose an analysis stage into its variant and submit/convert role.
fn analysis_stage(stage: Stage) -> (AnalysisKind, bool) {
    match stage {
        Stage::SubmitTextDetection => (AnalysisKind::TextDetection, true),
        Stage::ConvertTextDetection => (AnalysisKind::TextDetection, false),
        Stage::SubmitDocumentAnalysis => (AnalysisKind::DocumentAnalysis, true),
        Stage::ConvertDocumentAnalysis => (AnalysisKind::DocumentAnalysis, false),
        Stage::SubmitExpenseAnalysis => (AnalysisKind::ExpenseAnalysis, true),
        Stage::ConvertExpenseAnalysis => (AnalysisKind::ExpenseAnalysis, false),
        Stage::SubmitLendingAnalysis => (AnalysisKind::LendingAnalysis, true),
        Stage::ConvertLendingAnalysis => (AnalysisKind::LendingAnalysis, false),
        Stage::LandingToRaw | Stage::RawToFragment => {
            unreachable!("not an analysis stage: {stage}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_stage_walks_requested_variants_in_order() {
        let analyses = vec![AnalysisKind::TextDetection, AnalysisKind::LendingAnalysis];

        assert_eq!(
            next_stage(Stage::LandingToRaw, &analyses),
            Some(Stage::RawToFragment)
        );
        assert_eq!(
            next_stage(Stage::RawToFragment, &analyses),
            Some(Stage::SubmitTextDetection)
        );
        assert_eq!(
            next_stage(Stage::SubmitTextDetection, &analyses),
            Some(Stage::ConvertTextDetection)
        );
        assert_eq!(
            next_stage(Stage::ConvertTextDetection, &analyses),
            Some(Stage::SubmitLendingAnalysis)
        );
        assert_eq!(next_stage(Stage::ConvertLendingAnalysis, &analyses), None);
    }

    #[test]
    fn next_stage_skips_unrequested_variants() {
        let analyses = vec![AnalysisKind::DocumentAnalysis];
        assert_eq!(
            next_stage(Stage::RawToFragment, &analyses),
            Some(Stage::SubmitDocumentAnalysis)
        );
        assert_eq!(
            next_stage(Stage::ConvertDocumentAnalysis, &analyses),
            None
        );
    }
}
