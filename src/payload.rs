//! The per-document payload accumulated stage by stage.
//!
//! One [`DocumentPayload`] travels with each tracker record. Every stage
//! reads the whole payload, overwrites exactly one field it owns, and
//! writes the whole payload back together with its status transition:
//!
//! | field                | written by                     |
//! |----------------------|--------------------------------|
//! | `ingest`             | record creation                |
//! | `fragments`          | `raw_to_fragment`              |
//! | `submissions.<kind>` | that kind's submit stage       |
//! | `outputs.<kind>`     | that kind's convert stage      |
//!
//! Fields are concrete structs per stage rather than a free-form map so
//! the "each stage writes one field" rule is visible in the types, and a
//! stage cannot quietly grow a dependency on data its predecessors never
//! recorded.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::{AnalysisFeature, AnalysisKind, JobHandle};
use crate::error::PipelineError;
use crate::fanout::CallShape;
use crate::store::BlobRef;

/// Payload schema version, bumped on incompatible field changes.
pub const PAYLOAD_VERSION: u32 = 1;

/// The kind of document being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// A (possibly multi-page) PDF document.
    Pdf,
    /// A single raster image (PNG or JPEG).
    Image,
    /// A word-processor document. Accepted at ingestion; the split stage
    /// has no renderer for it yet and signals `UnsupportedDocumentKind`.
    Word,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Image => "image",
            DocumentKind::Word => "word",
        })
    }
}

/// Zero-padded ordinal identifying one fragment within its document.
///
/// Assigned once by the split stage, starting at `000001`, and stable
/// across reruns: splitting the same bytes always yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    /// Build the id for the 1-based `ordinal`-th fragment.
    pub fn from_ordinal(ordinal: usize) -> Self {
        FragmentId(format!("{ordinal:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical sub-unit of a document, produced exactly once by the split
/// stage and never mutated afterwards. Later stages refer to fragments by
/// id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
}

impl Fragment {
    pub fn new(id: FragmentId) -> Self {
        Fragment { id }
    }
}

/// Addresses either the whole document or one page fragment.
///
/// The whole-document case is its own variant (storage segment
/// `"document"`, outside the numeric fragment-id space) so a single-call
/// analysis result can never collide with a real fragment's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum FragmentRef {
    /// The un-split document as one unit.
    Document,
    /// One page fragment.
    Page(FragmentId),
}

impl FragmentRef {
    /// Path segment used when storing blobs for this reference.
    ///
    /// Fragment ids are all-digit, so `"document"` cannot collide.
    pub fn storage_segment(&self) -> &str {
        match self {
            FragmentRef::Document => "document",
            FragmentRef::Page(id) => id.as_str(),
        }
    }
}

impl fmt::Display for FragmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_segment())
    }
}

/// How a submit stage fanned out to the analysis backend, plus the
/// resulting job handle(s).
///
/// A sum type rather than a flag-and-two-options record: "single call ⇔
/// one handle, no list" holds by construction, and the per-fragment list
/// is positionally aligned with the document's fragment list at
/// submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "shape")]
pub enum FanOutResult {
    /// One aggregate job covering the whole document.
    Single { job: JobHandle },
    /// One job per fragment, in fragment order.
    PerFragment { jobs: Vec<JobHandle> },
}

impl FanOutResult {
    pub fn call_shape(&self) -> CallShape {
        match self {
            FanOutResult::Single { .. } => CallShape::Single,
            FanOutResult::PerFragment { .. } => CallShape::PerFragment,
        }
    }

    pub fn is_single_call(&self) -> bool {
        matches!(self, FanOutResult::Single { .. })
    }

    /// All job handles in submission order (one for the single-call case).
    pub fn jobs(&self) -> Vec<&JobHandle> {
        match self {
            FanOutResult::Single { job } => vec![job],
            FanOutResult::PerFragment { jobs } => jobs.iter().collect(),
        }
    }

    pub fn job_count(&self) -> usize {
        match self {
            FanOutResult::Single { .. } => 1,
            FanOutResult::PerFragment { jobs } => jobs.len(),
        }
    }

    /// Check the recorded result against the fragment count it was
    /// submitted with. Consumers call this before trusting positional
    /// alignment.
    pub fn check_alignment(&self, fragment_count: usize) -> Result<(), PipelineError> {
        match self {
            FanOutResult::Single { .. } => Ok(()),
            FanOutResult::PerFragment { jobs } if jobs.len() == fragment_count => Ok(()),
            FanOutResult::PerFragment { jobs } => Err(PipelineError::InvalidFanOut {
                detail: format!(
                    "{} job handles recorded for {} fragments",
                    jobs.len(),
                    fragment_count
                ),
            }),
        }
    }
}

/// Fields recorded at ingestion, before any stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestInfo {
    /// Where the original object landed. Kept because the document id can
    /// be derived from the landing object but not the other way around.
    pub landing_ref: BlobRef,
    pub kind: DocumentKind,
    /// Feature toggles for document analysis, from the ingest request.
    #[serde(default)]
    pub features: Vec<AnalysisFeature>,
    /// Which analysis variants this document should run, in canonical
    /// order. Drives [`crate::pipeline::Pipeline::advance`].
    #[serde(default)]
    pub analyses: Vec<AnalysisKind>,
}

/// Per-variant submission results. Each submit stage writes its own field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSubmissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_detection: Option<FanOutResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_analysis: Option<FanOutResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_analysis: Option<FanOutResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lending_analysis: Option<FanOutResult>,
}

impl AnalysisSubmissions {
    pub fn get(&self, kind: AnalysisKind) -> Option<&FanOutResult> {
        match kind {
            AnalysisKind::TextDetection => self.text_detection.as_ref(),
            AnalysisKind::DocumentAnalysis => self.document_analysis.as_ref(),
            AnalysisKind::ExpenseAnalysis => self.expense_analysis.as_ref(),
            AnalysisKind::LendingAnalysis => self.lending_analysis.as_ref(),
        }
    }

    pub fn set(&mut self, kind: AnalysisKind, result: FanOutResult) {
        let slot = match kind {
            AnalysisKind::TextDetection => &mut self.text_detection,
            AnalysisKind::DocumentAnalysis => &mut self.document_analysis,
            AnalysisKind::ExpenseAnalysis => &mut self.expense_analysis,
            AnalysisKind::LendingAnalysis => &mut self.lending_analysis,
        };
        *slot = Some(result);
    }
}

/// One materialized output pair for one fragment reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedItem {
    pub fragment: FragmentRef,
    pub text_ref: BlobRef,
    pub json_ref: BlobRef,
}

/// Where a convert stage wrote its text/JSON views, in fragment order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializeResult {
    pub items: Vec<MaterializedItem>,
}

/// Per-variant materialization results. Each convert stage writes its own
/// field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializedOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_detection: Option<MaterializeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_analysis: Option<MaterializeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_analysis: Option<MaterializeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lending_analysis: Option<MaterializeResult>,
}

impl MaterializedOutputs {
    pub fn get(&self, kind: AnalysisKind) -> Option<&MaterializeResult> {
        match kind {
            AnalysisKind::TextDetection => self.text_detection.as_ref(),
            AnalysisKind::DocumentAnalysis => self.document_analysis.as_ref(),
            AnalysisKind::ExpenseAnalysis => self.expense_analysis.as_ref(),
            AnalysisKind::LendingAnalysis => self.lending_analysis.as_ref(),
        }
    }

    pub fn set(&mut self, kind: AnalysisKind, result: MaterializeResult) {
        let slot = match kind {
            AnalysisKind::TextDetection => &mut self.text_detection,
            AnalysisKind::DocumentAnalysis => &mut self.document_analysis,
            AnalysisKind::ExpenseAnalysis => &mut self.expense_analysis,
            AnalysisKind::LendingAnalysis => &mut self.lending_analysis,
        };
        *slot = Some(result);
    }
}

/// The whole per-document payload, persisted with every status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub version: u32,
    pub ingest: IngestInfo,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub submissions: AnalysisSubmissions,
    #[serde(default)]
    pub outputs: MaterializedOutputs,
}

impl DocumentPayload {
    pub fn new(ingest: IngestInfo) -> Self {
        DocumentPayload {
            version: PAYLOAD_VERSION,
            ingest,
            fragments: Vec::new(),
            submissions: AnalysisSubmissions::default(),
            outputs: MaterializedOutputs::default(),
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

/// Captured failure information persisted into the tracker record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// The failure's display message.
    pub message: String,
    /// The rendered `source()` chain, innermost cause last.
    pub trace: String,
}

impl ErrorDetail {
    /// Capture an error and its source chain.
    pub fn capture(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        ErrorDetail {
            message: err.to_string(),
            trace,
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        ErrorDetail {
            trace: message.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> DocumentPayload {
        DocumentPayload::new(IngestInfo {
            landing_ref: BlobRef::new("0010-landing/report.pdf"),
            kind: DocumentKind::Pdf,
            features: vec![AnalysisFeature::Forms],
            analyses: vec![AnalysisKind::DocumentAnalysis],
        })
    }

    #[test]
    fn fragment_ids_are_zero_padded_and_ordered() {
        assert_eq!(FragmentId::from_ordinal(1).as_str(), "000001");
        assert_eq!(FragmentId::from_ordinal(42).as_str(), "000042");
        assert!(FragmentId::from_ordinal(2) < FragmentId::from_ordinal(10));
    }

    #[test]
    fn document_ref_cannot_collide_with_page_ids() {
        let whole = FragmentRef::Document;
        let page = FragmentRef::Page(FragmentId::from_ordinal(1));
        assert_ne!(whole.storage_segment(), page.storage_segment());
        assert!(page.storage_segment().bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn fan_out_shape_and_jobs_are_consistent() {
        let single = FanOutResult::Single {
            job: JobHandle::new("j1"),
        };
        assert!(single.is_single_call());
        assert_eq!(single.job_count(), 1);
        assert!(single.check_alignment(9999).is_ok());

        let multi = FanOutResult::PerFragment {
            jobs: vec![JobHandle::new("j1"), JobHandle::new("j2")],
        };
        assert!(!multi.is_single_call());
        assert_eq!(multi.job_count(), 2);
        assert!(multi.check_alignment(2).is_ok());
        assert!(matches!(
            multi.check_alignment(3),
            Err(PipelineError::InvalidFanOut { .. })
        ));
    }

    #[test]
    fn payload_round_trips_through_json() {
        let mut payload = sample_payload();
        payload.fragments = vec![
            Fragment::new(FragmentId::from_ordinal(1)),
            Fragment::new(FragmentId::from_ordinal(2)),
        ];
        payload.submissions.set(
            AnalysisKind::DocumentAnalysis,
            FanOutResult::Single {
                job: JobHandle::new("job-1"),
            },
        );

        let json = serde_json::to_string(&payload).unwrap();
        let back: DocumentPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn minimal_payload_json_parses() {
        // A record written before any stage ran has only version + ingest.
        let json = r#"{
            "version": 1,
            "ingest": {
                "landing_ref": "0010-landing/report.pdf",
                "kind": "pdf"
            }
        }"#;
        let payload: DocumentPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.fragment_count(), 0);
        assert!(payload.submissions.document_analysis.is_none());
    }

    #[test]
    fn submissions_slot_per_kind() {
        let mut subs = AnalysisSubmissions::default();
        subs.set(
            AnalysisKind::TextDetection,
            FanOutResult::Single {
                job: JobHandle::new("td"),
            },
        );
        assert!(subs.get(AnalysisKind::TextDetection).is_some());
        assert!(subs.get(AnalysisKind::LendingAnalysis).is_none());
    }

    #[test]
    fn error_detail_renders_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = PipelineError::Internal(format!("write failed: {io}"));
        let detail = ErrorDetail::capture(&err);
        assert!(detail.message.contains("write failed"));
        assert!(detail.trace.contains("disk on fire"));
    }
}
