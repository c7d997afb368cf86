//! End-to-end pipeline tests over in-process collaborators.
//!
//! The stub backend accepts every submission instantly, so these tests
//! exercise the orchestration itself: identity, status gating, fan-out,
//! ordered aggregation, and resumption — no network, no pdfium. The
//! splitter is a test double that cuts on form-feed bytes, giving exact
//! control over fragment counts.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use docpipe::{
    AdvanceOutcome, AnalysisFeature, AnalysisKind, BackendCapacity, BlobStore, CallShape,
    DocumentKind, DocumentSplitter, FanOutResult, FragmentId, FragmentRef, IngestRequest,
    JsonTracker, MemoryBlobStore, MemoryTracker, Pipeline, PipelineConfig, PipelineError,
    SplitOptions, Stage, StubBackend, SubmitOverrides, TrackerConfig, Workspace,
};

// ── Test doubles & fixtures ──────────────────────────────────────────────

/// Splits document bytes on form-feed, one fragment per chunk.
struct FormFeedSplitter;

#[async_trait]
impl DocumentSplitter for FormFeedSplitter {
    async fn split(
        &self,
        kind: DocumentKind,
        bytes: Vec<u8>,
        options: &SplitOptions,
    ) -> Result<Vec<docpipe::split::FragmentArtifact>, PipelineError> {
        if kind != DocumentKind::Pdf {
            return Err(PipelineError::UnsupportedDocumentKind {
                kind,
                stage: Stage::RawToFragment,
            });
        }
        Ok(bytes
            .split(|b| *b == b'\x0c')
            .map(|chunk| docpipe::split::FragmentArtifact {
                page_bytes: chunk.to_vec(),
                image_png: options.extract_images.then(|| chunk.to_vec()),
            })
            .collect())
    }
}

struct TestRig {
    pipeline: Pipeline,
    store: Arc<MemoryBlobStore>,
    backend: Arc<StubBackend>,
}

fn rig_with_backend(backend: StubBackend) -> TestRig {
    let store = Arc::new(MemoryBlobStore::new());
    let backend = Arc::new(backend);
    let config = PipelineConfig::builder()
        .poll_delay(Duration::from_millis(2))
        .poll_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let pipeline = Pipeline::new(
        Arc::new(MemoryTracker::default()),
        store.clone(),
        backend.clone(),
        Arc::new(FormFeedSplitter),
        Workspace::new("doc-store"),
        config,
    )
    .unwrap();
    TestRig {
        pipeline,
        store,
        backend,
    }
}

fn rig() -> TestRig {
    rig_with_backend(StubBackend::new())
}

/// Two pages, comfortably under the default single-call quotas.
fn two_page_doc() -> Vec<u8> {
    b"%PDF-1.4\npage one text\x0cpage two text".to_vec()
}

fn text_detection_request() -> IngestRequest {
    IngestRequest {
        features: vec![],
        analyses: vec![AnalysisKind::TextDetection],
    }
}

async fn ingest_and_split(rig: &TestRig, bytes: Vec<u8>, request: IngestRequest) -> docpipe::DocumentId {
    let receipt = rig
        .pipeline
        .ingest_bytes("report.pdf", bytes, DocumentKind::Pdf, request)
        .await
        .unwrap();
    rig.pipeline.copy_to_raw(&receipt.doc_id).await.unwrap();
    rig.pipeline.split_fragments(&receipt.doc_id).await.unwrap();
    receipt.doc_id
}

// ── Happy path: single aggregate call ────────────────────────────────────

#[tokio::test]
async fn small_document_runs_end_to_end_with_a_single_call() {
    let rig = rig();
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    // Under both quotas, no override: one aggregate job.
    let fan_out = rig
        .pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert!(fan_out.is_single_call());
    assert_eq!(fan_out.job_count(), 1);

    let submissions = rig.backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].input.as_str(),
        format!("doc-store/0020-raw/{doc}")
    );
    assert_eq!(submissions[0].job_tag, doc.to_string());

    rig.pipeline
        .wait_for_analysis(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap();

    let outputs = rig
        .pipeline
        .materialize(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].fragment, FragmentRef::Document);
    assert!(outputs[0].text.contains("text_detection of"));

    // Views landed under the variant's zones, whole-document segment.
    let text_key = format!("doc-store/0060-text-detection-text/{doc}/document");
    let text = rig
        .store
        .get(&docpipe::BlobRef::new(text_key))
        .await
        .unwrap();
    assert_eq!(String::from_utf8(text).unwrap(), outputs[0].text);

    let record = rig.pipeline.record(&doc).unwrap().unwrap();
    assert_eq!(record.status, Stage::ConvertTextDetection.succeeded());
    assert_eq!(
        record
            .payload
            .outputs
            .get(AnalysisKind::TextDetection)
            .unwrap()
            .items
            .len(),
        1
    );
}

// ── Per-fragment fan-out ─────────────────────────────────────────────────

#[tokio::test]
async fn low_capacity_backend_forces_per_fragment_fan_out_in_order() {
    let rig = rig_with_backend(StubBackend::with_capacity(BackendCapacity {
        max_single_call_bytes: 300_000_000,
        max_single_call_fragments: 1,
    }));
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    let fan_out = rig
        .pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert!(!fan_out.is_single_call());
    assert_eq!(fan_out.job_count(), 2);

    // Submission inputs follow fragment order.
    let submissions = rig.backend.submissions();
    assert_eq!(
        submissions[0].input.as_str(),
        format!("doc-store/0030-fragments/{doc}/000001")
    );
    assert_eq!(
        submissions[1].input.as_str(),
        format!("doc-store/0030-fragments/{doc}/000002")
    );

    rig.pipeline
        .wait_for_analysis(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap();
    let outputs = rig
        .pipeline
        .materialize(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(
        outputs[0].fragment,
        FragmentRef::Page(FragmentId::from_ordinal(1))
    );
    assert_eq!(
        outputs[1].fragment,
        FragmentRef::Page(FragmentId::from_ordinal(2))
    );
    assert!(outputs[0].text.contains("000001"));
    assert!(outputs[1].text.contains("000002"));
}

#[tokio::test]
async fn explicit_override_forces_fan_out_on_a_small_document() {
    let rig = rig();
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    let fan_out = rig
        .pipeline
        .submit_analysis(
            &doc,
            AnalysisKind::TextDetection,
            SubmitOverrides {
                call_shape: Some(CallShape::PerFragment),
                features: vec![],
            },
        )
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(fan_out.job_count(), 2);
}

#[tokio::test]
async fn five_thousand_fragments_fan_out_with_order_preserved() {
    let pages: Vec<String> = (1..=5000).map(|i| format!("pg {i}")).collect();
    let mut bytes = b"%PDF-1.4 ".to_vec();
    bytes.extend_from_slice(pages.join("\x0c").as_bytes());

    let rig = rig();
    let request = IngestRequest {
        features: vec![],
        analyses: vec![AnalysisKind::TextDetection],
    };
    let doc = ingest_and_split(&rig, bytes, request).await;

    let fan_out = rig
        .pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap()
        .completed()
        .unwrap();

    match &fan_out {
        FanOutResult::PerFragment { jobs } => assert_eq!(jobs.len(), 5000),
        other => panic!("expected per-fragment fan-out, got {other:?}"),
    }

    let submissions = rig.backend.submissions();
    assert_eq!(submissions.len(), 5000);
    assert!(submissions[0].input.as_str().ends_with("/000001"));
    assert!(submissions[4999].input.as_str().ends_with("/005000"));
}

// ── Gate enforcement ─────────────────────────────────────────────────────

#[tokio::test]
async fn convert_stage_refuses_until_its_submit_stage_succeeded() {
    let rig = rig();
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    let err = rig
        .pipeline
        .materialize(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::PreconditionViolation { .. }));

    // Status and payload untouched by the refused call.
    let record = rig.pipeline.record(&doc).unwrap().unwrap();
    assert_eq!(record.status, Stage::RawToFragment.succeeded());
    assert!(record
        .payload
        .outputs
        .get(AnalysisKind::TextDetection)
        .is_none());
}

#[tokio::test]
async fn re_submitting_a_succeeded_stage_is_refused_without_a_second_backend_call() {
    let rig = rig();
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    rig.pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap();

    let err = rig
        .pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::PreconditionViolation { .. }));
    assert_eq!(rig.backend.submissions().len(), 1);
}

// ── Identity ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn re_ingesting_identical_bytes_is_detected_not_duplicated() {
    let rig = rig();
    let first = rig
        .pipeline
        .ingest_bytes(
            "report.pdf",
            two_page_doc(),
            DocumentKind::Pdf,
            text_detection_request(),
        )
        .await
        .unwrap();
    assert!(!first.duplicate);

    let second = rig
        .pipeline
        .ingest_bytes(
            "renamed.pdf",
            two_page_doc(),
            DocumentKind::Pdf,
            text_detection_request(),
        )
        .await
        .unwrap();
    assert!(second.duplicate);
    assert_eq!(first.doc_id, second.doc_id);
}

// ── Failure handling & retry ─────────────────────────────────────────────

#[tokio::test]
async fn document_analysis_without_features_fails_then_succeeds_with_override() {
    let rig = rig();
    let request = IngestRequest {
        features: vec![],
        analyses: vec![AnalysisKind::DocumentAnalysis],
    };
    let doc = ingest_and_split(&rig, two_page_doc(), request).await;

    let err = rig
        .pipeline
        .submit_analysis(
            &doc,
            AnalysisKind::DocumentAnalysis,
            SubmitOverrides::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingFeatures { .. }));

    let record = rig.pipeline.record(&doc).unwrap().unwrap();
    assert_eq!(record.status, Stage::SubmitDocumentAnalysis.failed());
    assert!(record.error.unwrap().message.contains("features"));

    // The failed stage retries in place, this time with features.
    let fan_out = rig
        .pipeline
        .submit_analysis(
            &doc,
            AnalysisKind::DocumentAnalysis,
            SubmitOverrides {
                call_shape: None,
                features: vec![AnalysisFeature::Forms],
            },
        )
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert!(fan_out.is_single_call());
    assert_eq!(
        rig.backend.submissions()[0].features,
        vec![AnalysisFeature::Forms]
    );
}

#[tokio::test]
async fn one_failed_fetch_fails_materialization_with_no_partial_views() {
    let rig = rig_with_backend(StubBackend::with_capacity(BackendCapacity {
        max_single_call_bytes: 300_000_000,
        max_single_call_fragments: 1,
    }));
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    // Poison fetches for the second fragment's job before submitting.
    rig.backend
        .fail_fetch_for(&format!("doc-store/0030-fragments/{doc}/000002"));

    rig.pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap();

    let err = rig
        .pipeline
        .materialize(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap_err();
    match err {
        PipelineError::AggregationIncomplete { fragment, .. } => {
            assert_eq!(fragment, FragmentRef::Page(FragmentId::from_ordinal(2)));
        }
        other => panic!("expected AggregationIncomplete, got {other:?}"),
    }

    // All-or-nothing: not even the healthy fragment's view was written,
    // and the payload records no outputs.
    let record = rig.pipeline.record(&doc).unwrap().unwrap();
    assert_eq!(record.status, Stage::ConvertTextDetection.failed());
    assert!(record
        .payload
        .outputs
        .get(AnalysisKind::TextDetection)
        .is_none());
    let healthy_view = docpipe::BlobRef::new(format!(
        "doc-store/0060-text-detection-text/{doc}/000001"
    ));
    assert!(!rig.store.exists(&healthy_view).await.unwrap());
}

#[tokio::test]
async fn unsupported_document_kind_is_signaled_not_swallowed() {
    let rig = rig();
    let receipt = rig
        .pipeline
        .ingest_bytes(
            "memo.docx",
            b"PK word bytes".to_vec(),
            DocumentKind::Word,
            text_detection_request(),
        )
        .await
        .unwrap();
    rig.pipeline.copy_to_raw(&receipt.doc_id).await.unwrap();

    let err = rig
        .pipeline
        .split_fragments(&receipt.doc_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnsupportedDocumentKind {
            kind: DocumentKind::Word,
            ..
        }
    ));

    let record = rig.pipeline.record(&receipt.doc_id).unwrap().unwrap();
    assert_eq!(record.status, Stage::RawToFragment.failed());
    assert!(record.error.unwrap().message.contains("word"));
}

// ── Waiting ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn wait_polls_slow_jobs_to_terminal() {
    let rig = rig();
    let doc = ingest_and_split(&rig, two_page_doc(), text_detection_request()).await;

    rig.pipeline
        .submit_analysis(&doc, AnalysisKind::TextDetection, SubmitOverrides::default())
        .await
        .unwrap();

    let record = rig.pipeline.record(&doc).unwrap().unwrap();
    let fan_out = record
        .payload
        .submissions
        .get(AnalysisKind::TextDetection)
        .unwrap();
    for job in fan_out.jobs() {
        rig.backend.require_polls(job, 3);
    }

    rig.pipeline
        .wait_for_analysis(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap();
    rig.pipeline
        .materialize(&doc, AnalysisKind::TextDetection)
        .await
        .unwrap();
}

// ── Advancement ──────────────────────────────────────────────────────────

#[tokio::test]
async fn advance_walks_every_requested_variant_then_completes() {
    let rig = rig();
    let receipt = rig
        .pipeline
        .ingest_bytes(
            "report.pdf",
            two_page_doc(),
            DocumentKind::Pdf,
            IngestRequest {
                features: vec![AnalysisFeature::Forms],
                analyses: vec![
                    AnalysisKind::TextDetection,
                    AnalysisKind::DocumentAnalysis,
                ],
            },
        )
        .await
        .unwrap();
    let doc = receipt.doc_id;

    let mut stages = Vec::new();
    loop {
        match rig.pipeline.advance(&doc).await.unwrap() {
            AdvanceOutcome::Ran { stage } => stages.push(stage),
            AdvanceOutcome::Complete => break,
            AdvanceOutcome::Halted { status } => panic!("halted at {status}"),
        }
    }

    assert_eq!(
        stages,
        vec![
            Stage::LandingToRaw,
            Stage::RawToFragment,
            Stage::SubmitTextDetection,
            Stage::ConvertTextDetection,
            Stage::SubmitDocumentAnalysis,
            Stage::ConvertDocumentAnalysis,
        ]
    );

    let record = rig.pipeline.record(&doc).unwrap().unwrap();
    assert!(record
        .payload
        .outputs
        .get(AnalysisKind::TextDetection)
        .is_some());
    assert!(record
        .payload
        .outputs
        .get(AnalysisKind::DocumentAnalysis)
        .is_some());

    // A further advance is a no-op.
    assert_eq!(
        rig.pipeline.advance(&doc).await.unwrap(),
        AdvanceOutcome::Complete
    );
}

// ── Resumption across pipeline instances ─────────────────────────────────

#[tokio::test]
async fn file_backed_pipeline_resumes_in_a_fresh_instance() {
    let dir = tempfile::tempdir().unwrap();
    let tracker_path = dir.path().join("tracker.json");
    let backend = Arc::new(StubBackend::new());

    let build = |backend: Arc<StubBackend>| {
        Pipeline::new(
            Arc::new(JsonTracker::open(&tracker_path, TrackerConfig::default()).unwrap()),
            Arc::new(docpipe::FsBlobStore::new(dir.path())),
            backend,
            Arc::new(FormFeedSplitter),
            Workspace::new("store"),
            PipelineConfig::builder()
                .poll_delay(Duration::from_millis(2))
                .poll_timeout(Duration::from_millis(500))
                .build()
                .unwrap(),
        )
        .unwrap()
    };

    // First "process": ingest and copy, then stop.
    let doc = {
        let pipeline = build(backend.clone());
        let receipt = pipeline
            .ingest_bytes(
                "report.pdf",
                two_page_doc(),
                DocumentKind::Pdf,
                text_detection_request(),
            )
            .await
            .unwrap();
        pipeline.copy_to_raw(&receipt.doc_id).await.unwrap();
        receipt.doc_id
    };

    // Second "process": picks up exactly where the first left off.
    let pipeline = build(backend);
    let record = pipeline.record(&doc).unwrap().unwrap();
    assert_eq!(record.status, Stage::LandingToRaw.succeeded());

    loop {
        match pipeline.advance(&doc).await.unwrap() {
            AdvanceOutcome::Ran { .. } => {}
            AdvanceOutcome::Complete => break,
            AdvanceOutcome::Halted { status } => panic!("halted at {status}"),
        }
    }

    let record = pipeline.record(&doc).unwrap().unwrap();
    assert_eq!(record.status, Stage::ConvertTextDetection.succeeded());
}
