//! Deterministic, versionless blob layout for one pipeline deployment.
//!
//! All keys derive from `(zone, document id, fragment ref)`; nothing else
//! ever feeds into a key, so a stage re-run writes to exactly the same
//! locations it wrote the first time. Zones carry numeric prefixes in
//! pipeline order, which keeps a storage listing readable as a picture of
//! the data flow:
//!
//! ```text
//! 0010-landing/…                      as-received objects
//! 0020-raw/<doc>                      normalized copy, doc-id stamped
//! 0030-fragments/<doc>/<frag>         one PDF per page
//! 0040-images/<doc>/<frag>            one PNG per page
//! 0050…0070  text-detection     output / text / json
//! 0080…0100  document-analysis  output / text / json
//! 0110…0130  expense-analysis   output / text / json
//! 0140…0160  lending-analysis   output / text / json
//! ```

use serde::{Deserialize, Serialize};

use crate::backend::AnalysisKind;
use crate::identity::DocumentId;
use crate::payload::FragmentRef;
use crate::store::BlobRef;

/// Key builder rooted at one storage prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    root: String,
}

impl Workspace {
    /// Create a workspace under `root` (no trailing slash required).
    pub fn new(root: impl Into<String>) -> Self {
        let mut root = root.into();
        while root.ends_with('/') {
            root.pop();
        }
        Workspace { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn key(&self, parts: &[&str]) -> BlobRef {
        let mut key = self.root.clone();
        for part in parts {
            key.push('/');
            key.push_str(part);
        }
        BlobRef::new(key)
    }

    /// Landing-zone key for an as-received object named `filename`.
    pub fn landing_ref(&self, filename: &str) -> BlobRef {
        self.key(&["0010-landing", filename])
    }

    /// The normalized whole-document copy.
    pub fn raw_ref(&self, doc_id: &DocumentId) -> BlobRef {
        self.key(&["0020-raw", doc_id.as_str()])
    }

    /// One page fragment, as a standalone PDF.
    pub fn fragment_ref(&self, doc_id: &DocumentId, fragment: &FragmentRef) -> BlobRef {
        self.key(&["0030-fragments", doc_id.as_str(), fragment.storage_segment()])
    }

    /// One page fragment's raster image.
    pub fn image_ref(&self, doc_id: &DocumentId, fragment: &FragmentRef) -> BlobRef {
        self.key(&["0040-images", doc_id.as_str(), fragment.storage_segment()])
    }

    /// Where the backend writes its own output for one submission.
    pub fn analysis_output_ref(
        &self,
        kind: AnalysisKind,
        doc_id: &DocumentId,
        fragment: &FragmentRef,
    ) -> BlobRef {
        self.key(&[
            zone(kind, ZoneRole::Output),
            doc_id.as_str(),
            fragment.storage_segment(),
        ])
    }

    /// The materialized plain-text view of one result.
    pub fn analysis_text_ref(
        &self,
        kind: AnalysisKind,
        doc_id: &DocumentId,
        fragment: &FragmentRef,
    ) -> BlobRef {
        self.key(&[
            zone(kind, ZoneRole::Text),
            doc_id.as_str(),
            fragment.storage_segment(),
        ])
    }

    /// The materialized structured-JSON view of one result.
    pub fn analysis_json_ref(
        &self,
        kind: AnalysisKind,
        doc_id: &DocumentId,
        fragment: &FragmentRef,
    ) -> BlobRef {
        self.key(&[
            zone(kind, ZoneRole::Json),
            doc_id.as_str(),
            fragment.storage_segment(),
        ])
    }
}

enum ZoneRole {
    Output,
    Text,
    Json,
}

fn zone(kind: AnalysisKind, role: ZoneRole) -> &'static str {
    match (kind, role) {
        (AnalysisKind::TextDetection, ZoneRole::Output) => "0050-text-detection-output",
        (AnalysisKind::TextDetection, ZoneRole::Text) => "0060-text-detection-text",
        (AnalysisKind::TextDetection, ZoneRole::Json) => "0070-text-detection-json",
        (AnalysisKind::DocumentAnalysis, ZoneRole::Output) => "0080-document-analysis-output",
        (AnalysisKind::DocumentAnalysis, ZoneRole::Text) => "0090-document-analysis-text",
        (AnalysisKind::DocumentAnalysis, ZoneRole::Json) => "0100-document-analysis-json",
        (AnalysisKind::ExpenseAnalysis, ZoneRole::Output) => "0110-expense-analysis-output",
        (AnalysisKind::ExpenseAnalysis, ZoneRole::Text) => "0120-expense-analysis-text",
        (AnalysisKind::ExpenseAnalysis, ZoneRole::Json) => "0130-expense-analysis-json",
        (AnalysisKind::LendingAnalysis, ZoneRole::Output) => "0140-lending-analysis-output",
        (AnalysisKind::LendingAnalysis, ZoneRole::Text) => "0150-lending-analysis-text",
        (AnalysisKind::LendingAnalysis, ZoneRole::Json) => "0160-lending-analysis-json",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::FragmentId;

    fn ws() -> Workspace {
        Workspace::new("doc-store/")
    }

    fn doc() -> DocumentId {
        DocumentId::of_bytes(b"sample")
    }

    #[test]
    fn root_slash_is_normalized() {
        assert_eq!(ws().root(), "doc-store");
    }

    #[test]
    fn layout_is_deterministic_and_zone_prefixed() {
        let doc = doc();
        let frag = FragmentRef::Page(FragmentId::from_ordinal(1));

        assert_eq!(
            ws().landing_ref("report.pdf").as_str(),
            "doc-store/0010-landing/report.pdf"
        );
        assert_eq!(
            ws().raw_ref(&doc).as_str(),
            format!("doc-store/0020-raw/{doc}")
        );
        assert_eq!(
            ws().fragment_ref(&doc, &frag).as_str(),
            format!("doc-store/0030-fragments/{doc}/000001")
        );
        assert_eq!(
            ws().image_ref(&doc, &frag).as_str(),
            format!("doc-store/0040-images/{doc}/000001")
        );
        assert_eq!(
            ws().analysis_text_ref(AnalysisKind::DocumentAnalysis, &doc, &frag)
                .as_str(),
            format!("doc-store/0090-document-analysis-text/{doc}/000001")
        );
        // Re-derived keys are identical.
        assert_eq!(ws().raw_ref(&doc), ws().raw_ref(&doc));
    }

    #[test]
    fn whole_document_results_live_beside_fragment_results() {
        let doc = doc();
        let whole = ws().analysis_json_ref(AnalysisKind::TextDetection, &doc, &FragmentRef::Document);
        let page = ws().analysis_json_ref(
            AnalysisKind::TextDetection,
            &doc,
            &FragmentRef::Page(FragmentId::from_ordinal(1)),
        );
        assert_eq!(
            whole.as_str(),
            format!("doc-store/0070-text-detection-json/{doc}/document")
        );
        assert_ne!(whole, page);
    }

    #[test]
    fn every_kind_has_three_distinct_zones() {
        let doc = doc();
        let frag = FragmentRef::Document;
        let mut keys = Vec::new();
        for kind in AnalysisKind::ALL {
            keys.push(ws().analysis_output_ref(kind, &doc, &frag));
            keys.push(ws().analysis_text_ref(kind, &doc, &frag));
            keys.push(ws().analysis_json_ref(kind, &doc, &frag));
        }
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(keys.len(), deduped.len());
    }
}
