//! The stage-execution guard.
//!
//! [`StageExecutor::run`] wraps a stage's business logic with everything
//! the resumability protocol requires:
//!
//! 1. look up the stage's allowed predecessor statuses in the
//!    [`PipelineGraph`] (never hard-coded at call sites),
//! 2. open an [`crate::tracker::ExecutionContext`] — the single mutation
//!    that establishes at-most-one-active-attempt; a refusal surfaces as a
//!    distinct typed error and performs no external work,
//! 3. run the stage function against a snapshot of the payload,
//! 4. finalize: persist payload + `succeeded`, persist error + `failed`,
//!    or mark `ignored` — exactly one terminal write, on every path.
//!
//! Between the in-progress transition and the terminal transition no
//! partial payload write is ever visible: the stage function works on its
//! own copy and hands the whole thing back at completion.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::graph::PipelineGraph;
use crate::identity::DocumentId;
use crate::payload::{DocumentPayload, ErrorDetail};
use crate::status::Stage;
use crate::tracker::StatusTracker;

/// What a stage function hands back on the non-error path.
pub enum StageYield<R> {
    /// The stage did its work: persist `payload` and mark succeeded.
    Completed { payload: DocumentPayload, result: R },
    /// The stage chose to skip this document: mark ignored.
    Ignored { reason: String },
}

/// The caller-visible outcome of a guarded stage run.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<R> {
    Completed(R),
    Ignored(String),
}

impl<R> StageOutcome<R> {
    /// The completed result, if the stage was not ignored.
    pub fn completed(self) -> Option<R> {
        match self {
            StageOutcome::Completed(r) => Some(r),
            StageOutcome::Ignored(_) => None,
        }
    }
}

/// Guarded runner for pipeline stages.
pub struct StageExecutor {
    tracker: Arc<dyn StatusTracker>,
    graph: PipelineGraph,
}

impl StageExecutor {
    /// Build an executor, validating the graph up front.
    pub fn new(
        tracker: Arc<dyn StatusTracker>,
        graph: PipelineGraph,
    ) -> Result<Self, PipelineError> {
        graph.validate()?;
        Ok(StageExecutor { tracker, graph })
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Run `stage` for `doc_id` under the status gate.
    ///
    /// `run_fn` receives the payload as of the in-progress transition and
    /// returns either an updated payload plus a stage result, or an
    /// ignore decision. Any error it raises is captured into the record
    /// (message + source chain), the status moves to failed, and the same
    /// error is returned to the caller.
    pub async fn run<R, F, Fut>(
        &self,
        stage: Stage,
        doc_id: &DocumentId,
        run_fn: F,
    ) -> Result<StageOutcome<R>, PipelineError>
    where
        F: FnOnce(DocumentPayload) -> Fut,
        Fut: Future<Output = Result<StageYield<R>, PipelineError>>,
    {
        let allowed = self.graph.allowed_predecessors(stage);
        let ctx = self.tracker.begin(doc_id, stage, allowed)?;
        info!("stage '{stage}' started for document {doc_id}");

        let payload = ctx.payload().clone();
        match run_fn(payload).await {
            Ok(StageYield::Completed { payload, result }) => {
                ctx.complete(payload)?;
                info!("stage '{stage}' succeeded for document {doc_id}");
                Ok(StageOutcome::Completed(result))
            }
            Ok(StageYield::Ignored { reason }) => {
                ctx.ignore(reason.clone())?;
                info!("stage '{stage}' ignored document {doc_id}: {reason}");
                Ok(StageOutcome::Ignored(reason))
            }
            Err(err) => {
                warn!("stage '{stage}' failed for document {doc_id}: {err}");
                let detail = ErrorDetail::capture(&err);
                if let Err(persist_err) = ctx.fail(detail) {
                    warn!("could not persist failure for stage '{stage}': {persist_err}");
                }
                Err(err)
            }
        }
    }
}
