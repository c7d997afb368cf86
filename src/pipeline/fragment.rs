//! Stage `raw_to_fragment`: split the raw document into page fragments.
//!
//! Each page is written twice — once as a standalone document under the
//! fragments zone, once (optionally) as a PNG raster under the images
//! zone — both carrying the document id and fragment id in their
//! metadata. The ordered fragment list is the one payload field this
//! stage owns.

use tracing::info;

use crate::error::PipelineError;
use crate::executor::{StageOutcome, StageYield};
use crate::identity::DocumentId;
use crate::payload::{DocumentKind, Fragment, FragmentId, FragmentRef};
use crate::pipeline::Pipeline;
use crate::split::SplitOptions;
use crate::status::Stage;
use crate::store::{BlobStore, CONTENT_TYPE_PDF, CONTENT_TYPE_PNG, META_CONTENT_TYPE, META_FRAG_ID};

pub(crate) async fn run(
    pipeline: &Pipeline,
    doc_id: &DocumentId,
) -> Result<StageOutcome<Vec<Fragment>>, PipelineError> {
    let store = pipeline.store.clone();
    let splitter = pipeline.splitter.clone();
    let workspace = pipeline.workspace.clone();
    let options = SplitOptions::from(&pipeline.config);
    let doc = doc_id.clone();

    pipeline
        .executor
        .run(Stage::RawToFragment, doc_id, |mut payload| async move {
            let raw_ref = workspace.raw_ref(&doc);
            let bytes = store.get(&raw_ref).await?;
            let base_meta = store.meta(&raw_ref).await?;

            let artifacts = splitter
                .split(payload.ingest.kind, bytes, &options)
                .await?;
            info!("document {doc} split into {} fragment(s)", artifacts.len());

            let page_content_type = match payload.ingest.kind {
                DocumentKind::Pdf => CONTENT_TYPE_PDF,
                DocumentKind::Image => CONTENT_TYPE_PNG,
                DocumentKind::Word => "application/octet-stream",
            };

            let mut fragments = Vec::with_capacity(artifacts.len());
            for (index, artifact) in artifacts.into_iter().enumerate() {
                let frag_id = FragmentId::from_ordinal(index + 1);
                let fragment_ref = FragmentRef::Page(frag_id.clone());

                let mut meta = base_meta.clone();
                meta.insert(META_FRAG_ID.to_string(), frag_id.to_string());
                meta.insert(
                    META_CONTENT_TYPE.to_string(),
                    page_content_type.to_string(),
                );
                store
                    .put(
                        &workspace.fragment_ref(&doc, &fragment_ref),
                        artifact.page_bytes,
                        meta.clone(),
                    )
                    .await?;

                if let Some(png) = artifact.image_png {
                    meta.insert(META_CONTENT_TYPE.to_string(), CONTENT_TYPE_PNG.to_string());
                    store
                        .put(&workspace.image_ref(&doc, &fragment_ref), png, meta)
                        .await?;
                }

                fragments.push(Fragment::new(frag_id));
            }

            payload.fragments = fragments.clone();
            Ok(StageYield::Completed {
                payload,
                result: fragments,
            })
        })
        .await
}
