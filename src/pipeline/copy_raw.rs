//! Stage `landing_to_raw`: copy the landed object into the raw zone.
//!
//! The raw copy lives at a key derived purely from the document id, so
//! every later stage can find it without the landing name, and the
//! document id is stamped into the object metadata for traceability.

use tracing::info;

use crate::error::PipelineError;
use crate::executor::{StageOutcome, StageYield};
use crate::identity::DocumentId;
use crate::pipeline::Pipeline;
use crate::status::Stage;
use crate::store::{BlobMeta, BlobRef, BlobStore, META_DOC_ID, META_LANDING_URI};

pub(crate) async fn run(
    pipeline: &Pipeline,
    doc_id: &DocumentId,
) -> Result<StageOutcome<BlobRef>, PipelineError> {
    let store = pipeline.store.clone();
    let raw_ref = pipeline.workspace.raw_ref(doc_id);
    let doc = doc_id.clone();

    pipeline
        .executor
        .run(Stage::LandingToRaw, doc_id, |payload| async move {
            let landing_ref = payload.ingest.landing_ref.clone();
            let extra = BlobMeta::from([
                (META_DOC_ID.to_string(), doc.to_string()),
                (META_LANDING_URI.to_string(), landing_ref.to_string()),
            ]);
            info!("copy {landing_ref} → {raw_ref}");
            store.copy(&landing_ref, &raw_ref, extra).await?;
            // This stage owns no payload field; the record advances on
            // status alone.
            Ok(StageYield::Completed {
                payload,
                result: raw_ref,
            })
        })
        .await
}
