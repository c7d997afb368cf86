//! Ingestion: derive the document's identity and create its record.
//!
//! Ingestion is the only place a [`DocumentId`] is ever computed. The
//! bytes are written into the landing zone, and the tracker record is
//! created at `landing_to_raw:pending`. Ingesting bytes we have already
//! seen is not an error — the receipt flags it and nothing is duplicated,
//! which is what makes blind re-delivery of the same file safe.

use tracing::info;

use crate::error::PipelineError;
use crate::identity::DocumentId;
use crate::payload::{DocumentKind, DocumentPayload, IngestInfo};
use crate::pipeline::Pipeline;
use crate::store::{
    BlobMeta, BlobRef, BlobStore, CONTENT_TYPE_PDF, CONTENT_TYPE_PNG, META_CONTENT_TYPE,
    META_DOC_ID,
};
use crate::tracker::{StatusTracker, TrackerError};

/// What to run for a document, fixed at ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Feature toggles for document analysis.
    pub features: Vec<crate::backend::AnalysisFeature>,
    /// Analysis variants to run, in canonical order. Empty means "text
    /// detection only".
    pub analyses: Vec<crate::backend::AnalysisKind>,
}

/// Outcome of an ingestion.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub doc_id: DocumentId,
    pub landing_ref: BlobRef,
    /// True when a record for these exact bytes already existed; nothing
    /// was re-created.
    pub duplicate: bool,
}

pub(crate) async fn ingest_bytes(
    pipeline: &Pipeline,
    name: &str,
    bytes: Vec<u8>,
    kind: DocumentKind,
    request: IngestRequest,
) -> Result<IngestReceipt, PipelineError> {
    if kind == DocumentKind::Pdf && (bytes.len() < 4 || &bytes[..4] != b"%PDF") {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(PipelineError::NotAPdf {
            path: name.into(),
            magic,
        });
    }

    let doc_id = DocumentId::of_bytes(&bytes);
    let landing_ref = pipeline.workspace.landing_ref(name);

    let analyses = if request.analyses.is_empty() {
        vec![crate::backend::AnalysisKind::TextDetection]
    } else {
        request.analyses
    };

    let payload = DocumentPayload::new(IngestInfo {
        landing_ref: landing_ref.clone(),
        kind,
        features: request.features,
        analyses,
    });

    match pipeline.tracker.create(&doc_id, payload) {
        Ok(_) => {}
        Err(TrackerError::DuplicateDocument { .. }) => {
            info!("document {doc_id} already ingested; skipping");
            return Ok(IngestReceipt {
                doc_id,
                landing_ref,
                duplicate: true,
            });
        }
        Err(e) => return Err(e.into()),
    }

    let meta = BlobMeta::from([
        (META_DOC_ID.to_string(), doc_id.to_string()),
        (
            META_CONTENT_TYPE.to_string(),
            match kind {
                DocumentKind::Pdf => CONTENT_TYPE_PDF,
                DocumentKind::Image => CONTENT_TYPE_PNG,
                DocumentKind::Word => "application/octet-stream",
            }
            .to_string(),
        ),
    ]);
    pipeline.store.put(&landing_ref, bytes, meta).await?;

    info!("ingested {kind} document {doc_id} at {landing_ref}");
    Ok(IngestReceipt {
        doc_id,
        landing_ref,
        duplicate: false,
    })
}
