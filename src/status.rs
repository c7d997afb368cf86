//! Stage and status vocabulary for the pipeline.
//!
//! Every document carries a single monotonically advancing status value:
//! the pair of the stage it last touched and how that touch ended. Each
//! stage owns five canonical states — pending, in-progress, failed,
//! succeeded, ignored — and a document's overall progress is the
//! highest-numbered succeeded status it has reached.
//!
//! The numeric encoding (`100·stage-ordinal + state-offset`) exists only as
//! a stable storage/wire representation; nothing in the crate dispatches on
//! code arithmetic or status names. Which statuses may precede which stage
//! lives in [`crate::graph::PipelineGraph`], not here.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// One named step in the fixed pipeline, in canonical execution order.
///
/// The four submit/convert pairs cover the four analysis variants the
/// backend offers: plain text detection, document analysis (tables, forms,
/// …), expense analysis, and lending analysis. A document typically runs
/// one or two variants, chosen at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Copy the document from the landing zone into the raw zone.
    LandingToRaw,
    /// Split the raw document into ordered page fragments.
    RawToFragment,
    /// Submit text-detection jobs to the analysis backend.
    SubmitTextDetection,
    /// Materialize text-detection output into text and JSON views.
    ConvertTextDetection,
    /// Submit document-analysis jobs (tables/forms/…).
    SubmitDocumentAnalysis,
    /// Materialize document-analysis output into text and JSON views.
    ConvertDocumentAnalysis,
    /// Submit expense-analysis jobs.
    SubmitExpenseAnalysis,
    /// Materialize expense-analysis output into text and JSON views.
    ConvertExpenseAnalysis,
    /// Submit lending-analysis jobs.
    SubmitLendingAnalysis,
    /// Materialize lending-analysis output into text and JSON views.
    ConvertLendingAnalysis,
}

impl Stage {
    /// All stages in canonical execution order.
    pub const ALL: [Stage; 10] = [
        Stage::LandingToRaw,
        Stage::RawToFragment,
        Stage::SubmitTextDetection,
        Stage::ConvertTextDetection,
        Stage::SubmitDocumentAnalysis,
        Stage::ConvertDocumentAnalysis,
        Stage::SubmitExpenseAnalysis,
        Stage::ConvertExpenseAnalysis,
        Stage::SubmitLendingAnalysis,
        Stage::ConvertLendingAnalysis,
    ];

    /// 1-based position in the canonical order.
    pub fn ordinal(self) -> u32 {
        match self {
            Stage::LandingToRaw => 1,
            Stage::RawToFragment => 2,
            Stage::SubmitTextDetection => 3,
            Stage::ConvertTextDetection => 4,
            Stage::SubmitDocumentAnalysis => 5,
            Stage::ConvertDocumentAnalysis => 6,
            Stage::SubmitExpenseAnalysis => 7,
            Stage::ConvertExpenseAnalysis => 8,
            Stage::SubmitLendingAnalysis => 9,
            Stage::ConvertLendingAnalysis => 10,
        }
    }

    /// Stable name used in logs, errors, and blob metadata.
    pub fn name(self) -> &'static str {
        match self {
            Stage::LandingToRaw => "landing_to_raw",
            Stage::RawToFragment => "raw_to_fragment",
            Stage::SubmitTextDetection => "fragment_to_text_detection_output",
            Stage::ConvertTextDetection => "text_detection_output_to_text_and_json",
            Stage::SubmitDocumentAnalysis => "fragment_to_document_analysis_output",
            Stage::ConvertDocumentAnalysis => "document_analysis_output_to_text_and_json",
            Stage::SubmitExpenseAnalysis => "fragment_to_expense_analysis_output",
            Stage::ConvertExpenseAnalysis => "expense_analysis_output_to_text_and_json",
            Stage::SubmitLendingAnalysis => "fragment_to_lending_analysis_output",
            Stage::ConvertLendingAnalysis => "lending_analysis_output_to_text_and_json",
        }
    }

    fn base_code(self) -> u32 {
        self.ordinal() * 100
    }

    pub fn pending(self) -> StageStatus {
        StageStatus::new(self, StatusKind::Pending)
    }

    pub fn in_progress(self) -> StageStatus {
        StageStatus::new(self, StatusKind::InProgress)
    }

    pub fn failed(self) -> StageStatus {
        StageStatus::new(self, StatusKind::Failed)
    }

    pub fn succeeded(self) -> StageStatus {
        StageStatus::new(self, StatusKind::Succeeded)
    }

    pub fn ignored(self) -> StageStatus {
        StageStatus::new(self, StatusKind::Ignored)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage's last (or current) attempt for a document stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// The stage is reachable but has not started.
    Pending,
    /// An attempt holds the record right now; no second attempt may start.
    InProgress,
    /// The last attempt failed; the error detail is recorded.
    Failed,
    /// The stage completed; its payload field is authoritative.
    Succeeded,
    /// Deliberately skipped; terminal like `Succeeded` but produces nothing.
    Ignored,
}

impl StatusKind {
    fn offset(self) -> u32 {
        match self {
            StatusKind::Pending => 0,
            StatusKind::InProgress => 20,
            StatusKind::Failed => 40,
            StatusKind::Succeeded => 60,
            StatusKind::Ignored => 80,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::InProgress => "in_progress",
            StatusKind::Failed => "failed",
            StatusKind::Succeeded => "succeeded",
            StatusKind::Ignored => "ignored",
        }
    }

    /// Terminal states end an attempt; `Pending` and `InProgress` do not.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusKind::Failed | StatusKind::Succeeded | StatusKind::Ignored
        )
    }
}

/// A document's status: one stage plus the state of that stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub kind: StatusKind,
}

impl StageStatus {
    pub fn new(stage: Stage, kind: StatusKind) -> Self {
        StageStatus { stage, kind }
    }

    /// Stable numeric encoding used by persisted tracker records.
    pub fn code(self) -> u32 {
        self.stage.base_code() + self.kind.offset()
    }

    /// Decode a persisted status code.
    pub fn from_code(code: u32) -> Result<Self, PipelineError> {
        let stage = Stage::ALL
            .into_iter()
            .find(|s| s.base_code() == code / 100 * 100)
            .ok_or(PipelineError::UnknownStatusCode(code))?;
        let kind = match code % 100 {
            0 => StatusKind::Pending,
            20 => StatusKind::InProgress,
            40 => StatusKind::Failed,
            60 => StatusKind::Succeeded,
            80 => StatusKind::Ignored,
            _ => return Err(PipelineError::UnknownStatusCode(code)),
        };
        Ok(StageStatus::new(stage, kind))
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.stage, self.kind.name(), self.code())
    }
}
