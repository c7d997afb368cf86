//! The convert stages: materialize analysis output into text and JSON.
//!
//! Reads the [`FanOutResult`] its submit stage recorded, aggregates the
//! per-job outputs in fragment order, and writes two views per item —
//! derived plain text and the raw structured output as JSON — into the
//! variant's zones. The payload slot this stage owns records where every
//! view landed.
//!
//! Aggregation is all-or-nothing (see [`crate::aggregate`]): a failed
//! fetch leaves the payload untouched and the stage failed, ready for a
//! retry against the same recorded job handles.

use tracing::info;

use crate::aggregate::{FragmentOutput, ResultAggregator};
use crate::backend::{AnalysisBackend, AnalysisKind};
use crate::error::PipelineError;
use crate::executor::{StageOutcome, StageYield};
use crate::identity::DocumentId;
use crate::payload::{MaterializeResult, MaterializedItem};
use crate::pipeline::Pipeline;
use crate::store::{
    BlobStore, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, META_CONTENT_TYPE, META_FRAG_ID,
};

pub(crate) async fn run(
    pipeline: &Pipeline,
    doc_id: &DocumentId,
    kind: AnalysisKind,
) -> Result<StageOutcome<Vec<FragmentOutput>>, PipelineError> {
    let store = pipeline.store.clone();
    let backend = pipeline.backend.clone();
    let workspace = pipeline.workspace.clone();
    let aggregator = ResultAggregator::new(pipeline.config.fetch_concurrency);
    let doc = doc_id.clone();

    pipeline
        .executor
        .run(kind.convert_stage(), doc_id, |mut payload| async move {
            let fan_out = payload.submissions.get(kind).cloned().ok_or_else(|| {
                PipelineError::InvalidFanOut {
                    detail: format!("no {kind} submission recorded for document {doc}"),
                }
            })?;

            let outputs = aggregator
                .collect(&fan_out, &payload.fragments, |_, job| {
                    let backend = backend.clone();
                    async move { backend.fetch_result(&job).await }
                })
                .await?;
            info!(
                "{kind} aggregation for document {doc}: {} result(s)",
                outputs.len()
            );

            let base_meta = store.meta(&workspace.raw_ref(&doc)).await?;
            let mut items = Vec::with_capacity(outputs.len());
            for output in &outputs {
                let text_ref = workspace.analysis_text_ref(kind, &doc, &output.fragment);
                let json_ref = workspace.analysis_json_ref(kind, &doc, &output.fragment);

                let mut meta = base_meta.clone();
                meta.insert(
                    META_FRAG_ID.to_string(),
                    output.fragment.storage_segment().to_string(),
                );

                meta.insert(META_CONTENT_TYPE.to_string(), CONTENT_TYPE_TEXT.to_string());
                store
                    .put(&text_ref, output.text.clone().into_bytes(), meta.clone())
                    .await?;

                let json = serde_json::to_vec(&output.raw).map_err(|e| {
                    PipelineError::Internal(format!("could not serialize analysis output: {e}"))
                })?;
                meta.insert(META_CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string());
                store.put(&json_ref, json, meta).await?;

                items.push(MaterializedItem {
                    fragment: output.fragment.clone(),
                    text_ref,
                    json_ref,
                });
            }

            payload.outputs.set(kind, MaterializeResult { items });
            Ok(StageYield::Completed {
                payload,
                result: outputs,
            })
        })
        .await
}
