//! The submit stages: fan out one analysis variant to the backend.
//!
//! One implementation serves all four variants — the stage identity, the
//! payload slot, and the output zones all derive from the
//! [`AnalysisKind`]. The stage:
//!
//! 1. resolves the feature set (explicit override, else the ingested
//!    features; document analysis with neither is an error),
//! 2. asks [`FanOutPolicy`] for the call shape, once, against the raw
//!    object's size and the recorded fragment count,
//! 3. submits one aggregate job or one job per fragment (bounded
//!    concurrency, handle order = fragment order),
//! 4. records the [`FanOutResult`] in the payload slot it owns.
//!
//! The stage succeeds when the jobs are *accepted* — waiting for them to
//! finish is [`Pipeline::wait_for_analysis`], outside any status-gated
//! critical section.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::info;

use crate::backend::{AnalysisBackend, AnalysisFeature, AnalysisKind, JobHandle, SubmitOptions};
use crate::error::PipelineError;
use crate::executor::{StageOutcome, StageYield};
use crate::fanout::{CallShape, FanOutPolicy};
use crate::identity::DocumentId;
use crate::payload::{FanOutResult, FragmentRef};
use crate::pipeline::Pipeline;
use crate::store::BlobStore;

/// Caller-level knobs for one submit-stage invocation.
#[derive(Debug, Clone, Default)]
pub struct SubmitOverrides {
    /// Force the call shape instead of letting the policy decide.
    pub call_shape: Option<CallShape>,
    /// Replace the ingested feature set for this invocation.
    pub features: Vec<AnalysisFeature>,
}

pub(crate) async fn run(
    pipeline: &Pipeline,
    doc_id: &DocumentId,
    kind: AnalysisKind,
    overrides: SubmitOverrides,
) -> Result<StageOutcome<FanOutResult>, PipelineError> {
    let store = pipeline.store.clone();
    let backend = pipeline.backend.clone();
    let workspace = pipeline.workspace.clone();
    let policy = FanOutPolicy::for_backend(pipeline.backend.capacity(), &pipeline.config);
    let submit_concurrency = pipeline.config.submit_concurrency;
    let doc = doc_id.clone();

    pipeline
        .executor
        .run(kind.submit_stage(), doc_id, |mut payload| async move {
            let features = if kind.uses_features() {
                if !overrides.features.is_empty() {
                    overrides.features
                } else if !payload.ingest.features.is_empty() {
                    payload.ingest.features.clone()
                } else {
                    return Err(PipelineError::MissingFeatures { doc_id: doc });
                }
            } else {
                Vec::new()
            };

            let raw_ref = workspace.raw_ref(&doc);
            let total_size = store.size(&raw_ref).await?;
            let shape = policy.decide(
                &doc,
                total_size,
                payload.fragment_count(),
                overrides.call_shape,
            )?;
            info!(
                "{kind} fan-out for document {doc}: {shape:?} \
                 ({total_size} bytes, {} fragment(s))",
                payload.fragment_count()
            );

            let options = SubmitOptions {
                kind,
                features,
                job_tag: doc.to_string(),
            };

            let result = match shape {
                CallShape::Single => {
                    let output = workspace.analysis_output_ref(kind, &doc, &FragmentRef::Document);
                    let job = backend.submit(&raw_ref, &output, &options).await?;
                    info!("{kind} job accepted for document {doc}: {job}");
                    FanOutResult::Single { job }
                }
                CallShape::PerFragment => {
                    let submissions = payload.fragments.iter().map(|fragment| {
                        let fragment_ref = FragmentRef::Page(fragment.id.clone());
                        let input = workspace.fragment_ref(&doc, &fragment_ref);
                        let output = workspace.analysis_output_ref(kind, &doc, &fragment_ref);
                        let backend = backend.clone();
                        let options = options.clone();
                        async move { backend.submit(&input, &output, &options).await }
                    });
                    // `buffered` bounds concurrency while keeping handle
                    // order aligned with fragment order.
                    let jobs: Vec<JobHandle> = stream::iter(submissions)
                        .buffered(submit_concurrency)
                        .try_collect()
                        .await?;
                    info!(
                        "{kind} accepted {} job(s) for document {doc}",
                        jobs.len()
                    );
                    FanOutResult::PerFragment { jobs }
                }
            };

            payload.submissions.set(kind, result.clone());
            Ok(StageYield::Completed {
                payload,
                result,
            })
        })
        .await
}
