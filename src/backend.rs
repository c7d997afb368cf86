//! The asynchronous analysis-backend seam.
//!
//! The pipeline never talks to a concrete OCR/analysis service directly;
//! it submits jobs and fetches results through [`AnalysisBackend`]. The
//! trait is deliberately small — submit, poll, fetch, capacity — because
//! that is the entire surface the orchestration needs. Job scheduling,
//! pagination, and authentication are the backend's problem.
//!
//! [`StubBackend`] is an in-process implementation used by the test suite
//! and the CLI's dry-run mode. It records every submission so tests can
//! assert on fan-out behaviour, and supports failure/latency injection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::PipelineError;
use crate::status::Stage;
use crate::store::BlobRef;

/// The analysis variants the backend offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Plain OCR: lines and words.
    TextDetection,
    /// Structural analysis: tables, forms, queries, signatures, layout.
    DocumentAnalysis,
    /// Invoice/receipt field extraction.
    ExpenseAnalysis,
    /// Mortgage-document classification and extraction.
    LendingAnalysis,
}

impl AnalysisKind {
    /// All variants in canonical pipeline order.
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::TextDetection,
        AnalysisKind::DocumentAnalysis,
        AnalysisKind::ExpenseAnalysis,
        AnalysisKind::LendingAnalysis,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnalysisKind::TextDetection => "text_detection",
            AnalysisKind::DocumentAnalysis => "document_analysis",
            AnalysisKind::ExpenseAnalysis => "expense_analysis",
            AnalysisKind::LendingAnalysis => "lending_analysis",
        }
    }

    /// The stage that submits jobs for this variant.
    pub fn submit_stage(self) -> Stage {
        match self {
            AnalysisKind::TextDetection => Stage::SubmitTextDetection,
            AnalysisKind::DocumentAnalysis => Stage::SubmitDocumentAnalysis,
            AnalysisKind::ExpenseAnalysis => Stage::SubmitExpenseAnalysis,
            AnalysisKind::LendingAnalysis => Stage::SubmitLendingAnalysis,
        }
    }

    /// The stage that materializes this variant's output.
    pub fn convert_stage(self) -> Stage {
        match self {
            AnalysisKind::TextDetection => Stage::ConvertTextDetection,
            AnalysisKind::DocumentAnalysis => Stage::ConvertDocumentAnalysis,
            AnalysisKind::ExpenseAnalysis => Stage::ConvertExpenseAnalysis,
            AnalysisKind::LendingAnalysis => Stage::ConvertLendingAnalysis,
        }
    }

    /// Whether the variant takes a feature list at submission.
    ///
    /// Only document analysis is parameterised; the other variants ignore
    /// features entirely.
    pub fn uses_features(self) -> bool {
        self == AnalysisKind::DocumentAnalysis
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Feature toggles for document analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFeature {
    Tables,
    Forms,
    Queries,
    Signatures,
    Layout,
}

impl AnalysisFeature {
    /// Wire name expected by analysis backends.
    pub fn api_name(self) -> &'static str {
        match self {
            AnalysisFeature::Tables => "TABLES",
            AnalysisFeature::Forms => "FORMS",
            AnalysisFeature::Queries => "QUERIES",
            AnalysisFeature::Signatures => "SIGNATURES",
            AnalysisFeature::Layout => "LAYOUT",
        }
    }
}

impl fmt::Display for AnalysisFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Opaque identifier for an asynchronous analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        JobHandle(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for one job submission.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub kind: AnalysisKind,
    /// Feature toggles; only consulted for document analysis.
    pub features: Vec<AnalysisFeature>,
    /// Caller tag attached to the job for traceability (the document id).
    pub job_tag: String,
}

/// Backend-reported quotas for a single aggregate call.
///
/// The defaults mirror common asynchronous document-analysis limits; a
/// concrete backend reports its own numbers and
/// [`crate::config::PipelineConfig`] may override either value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapacity {
    pub max_single_call_bytes: u64,
    pub max_single_call_fragments: usize,
}

impl Default for BackendCapacity {
    fn default() -> Self {
        BackendCapacity {
            max_single_call_bytes: 300_000_000,
            max_single_call_fragments: 3000,
        }
    }
}

/// Block kinds in a structured analysis output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockKind {
    Page,
    Line,
    Word,
    Table,
    Cell,
    KeyValueSet,
    SelectionElement,
    Signature,
}

/// One element of a structured analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Block {
    pub fn line(text: impl Into<String>) -> Self {
        Block {
            kind: BlockKind::Line,
            text: Some(text.into()),
            page: None,
            confidence: None,
        }
    }
}

/// Structured output of one analysis job, all pages merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub blocks: Vec<Block>,
}

impl AnalysisOutput {
    /// Derive the plain-text view: `Line` blocks in document order, joined
    /// by newlines.
    ///
    /// Pure and order-preserving — repeated calls over the same output
    /// always produce identical text, which downstream consumers rely on.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if block.kind == BlockKind::Line {
                if let Some(text) = &block.text {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
        }
        out
    }
}

/// The asynchronous analysis backend.
///
/// `submit` must be cheap and non-blocking relative to the analysis
/// itself: a submit stage succeeds once its jobs are *accepted*, and
/// completion is observed later via `poll_until_terminal` + `fetch_result`.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Submit one analysis job over the object at `input`, directing the
    /// backend's own output to the `output` location.
    async fn submit(
        &self,
        input: &BlobRef,
        output: &BlobRef,
        options: &SubmitOptions,
    ) -> Result<JobHandle, PipelineError>;

    /// Poll until the job reaches a terminal state, sleeping `delay`
    /// between polls, giving up after `timeout`.
    async fn poll_until_terminal(
        &self,
        job: &JobHandle,
        delay: Duration,
        timeout: Duration,
    ) -> Result<(), PipelineError>;

    /// Fetch the structured output of a terminal job, all pages merged.
    async fn fetch_result(&self, job: &JobHandle) -> Result<AnalysisOutput, PipelineError>;

    /// The backend's single-aggregate-call quotas.
    fn capacity(&self) -> BackendCapacity {
        BackendCapacity::default()
    }
}

// ── Stub backend ─────────────────────────────────────────────────────────

/// One submission as seen by the [`StubBackend`], kept for assertions.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub input: BlobRef,
    pub output: BlobRef,
    pub kind: AnalysisKind,
    pub features: Vec<AnalysisFeature>,
    pub job_tag: String,
    pub job: JobHandle,
}

#[derive(Debug, Default)]
struct StubState {
    next_job: u64,
    /// Output served for each job, keyed by job id.
    results: HashMap<String, AnalysisOutput>,
    /// Polls still required before each job turns terminal.
    polls_remaining: HashMap<String, u32>,
    canned: BTreeMap<String, AnalysisOutput>,
    fail_submit_inputs: HashSet<String>,
    fail_fetch_inputs: HashSet<String>,
    fail_fetch_jobs: HashSet<String>,
    submissions: Vec<RecordedSubmission>,
}

/// In-process [`AnalysisBackend`] for tests and dry runs.
///
/// By default every submission is accepted, turns terminal immediately,
/// and yields a single synthesized `Line` block naming the input object —
/// deterministic, so materialized text is stable across runs. Tests can
/// replace outputs per input key and inject submit/fetch failures.
#[derive(Debug, Default)]
pub struct StubBackend {
    state: Mutex<StubState>,
    capacity: BackendCapacity,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a non-default capacity (e.g. to force per-fragment fan-out).
    pub fn with_capacity(capacity: BackendCapacity) -> Self {
        StubBackend {
            state: Mutex::new(StubState::default()),
            capacity,
        }
    }

    /// Serve `output` for any job submitted over `input_key`.
    pub fn set_output_for(&self, input_key: &str, output: AnalysisOutput) {
        self.lock().canned.insert(input_key.to_string(), output);
    }

    /// Reject submissions over `input_key`.
    pub fn fail_submit_for(&self, input_key: &str) {
        self.lock().fail_submit_inputs.insert(input_key.to_string());
    }

    /// Fail result fetches for jobs submitted over `input_key`.
    pub fn fail_fetch_for(&self, input_key: &str) {
        self.lock().fail_fetch_inputs.insert(input_key.to_string());
    }

    /// Require `n` more polls before `job` turns terminal.
    pub fn require_polls(&self, job: &JobHandle, n: u32) {
        self.lock()
            .polls_remaining
            .insert(job.as_str().to_string(), n);
    }

    /// Everything submitted so far, in submission order.
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.lock().submissions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        // Lock poisoning only happens if a holder panicked; the state is
        // plain data, safe to keep using.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AnalysisBackend for StubBackend {
    async fn submit(
        &self,
        input: &BlobRef,
        output: &BlobRef,
        options: &SubmitOptions,
    ) -> Result<JobHandle, PipelineError> {
        let mut state = self.lock();
        if state.fail_submit_inputs.contains(input.as_str()) {
            return Err(PipelineError::Submission {
                kind: options.kind,
                detail: format!("injected rejection for '{input}'"),
            });
        }

        state.next_job += 1;
        let job = JobHandle::new(format!("job-{:08}", state.next_job));

        let result = state
            .canned
            .get(input.as_str())
            .cloned()
            .unwrap_or_else(|| AnalysisOutput {
                blocks: vec![Block::line(format!("{} of {}", options.kind, input))],
            });
        state.results.insert(job.as_str().to_string(), result);
        if state.fail_fetch_inputs.contains(input.as_str()) {
            state.fail_fetch_jobs.insert(job.as_str().to_string());
        }

        state.submissions.push(RecordedSubmission {
            input: input.clone(),
            output: output.clone(),
            kind: options.kind,
            features: options.features.clone(),
            job_tag: options.job_tag.clone(),
            job: job.clone(),
        });
        Ok(job)
    }

    async fn poll_until_terminal(
        &self,
        job: &JobHandle,
        delay: Duration,
        timeout: Duration,
    ) -> Result<(), PipelineError> {
        let start = tokio::time::Instant::now();
        loop {
            {
                let mut state = self.lock();
                if !state.results.contains_key(job.as_str()) {
                    return Err(PipelineError::Internal(format!("unknown job {job}")));
                }
                match state.polls_remaining.get_mut(job.as_str()) {
                    None => return Ok(()),
                    Some(0) => return Ok(()),
                    Some(n) => *n -= 1,
                }
            }
            if start.elapsed() >= timeout {
                return Err(PipelineError::PollTimeout {
                    job: job.clone(),
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_result(&self, job: &JobHandle) -> Result<AnalysisOutput, PipelineError> {
        let state = self.lock();
        if state.fail_fetch_jobs.contains(job.as_str()) {
            return Err(PipelineError::JobFailed {
                job: job.clone(),
                detail: "injected fetch failure".into(),
            });
        }
        if state
            .polls_remaining
            .get(job.as_str())
            .is_some_and(|n| *n > 0)
        {
            return Err(PipelineError::Internal(format!(
                "job {job} is not terminal yet"
            )));
        }
        state
            .results
            .get(job.as_str())
            .cloned()
            .ok_or_else(|| PipelineError::Internal(format!("unknown job {job}")))
    }

    fn capacity(&self) -> BackendCapacity {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_text_uses_line_blocks_only_in_order() {
        let output = AnalysisOutput {
            blocks: vec![
                Block {
                    kind: BlockKind::Page,
                    text: None,
                    page: Some(1),
                    confidence: None,
                },
                Block::line("first"),
                Block {
                    kind: BlockKind::Word,
                    text: Some("ignored".into()),
                    page: Some(1),
                    confidence: Some(0.99),
                },
                Block::line("second"),
            ],
        };
        assert_eq!(output.to_text(), "first\nsecond");
        // Deterministic across calls.
        assert_eq!(output.to_text(), output.to_text());
    }

    #[test]
    fn to_text_of_empty_output_is_empty() {
        assert_eq!(AnalysisOutput::default().to_text(), "");
    }

    #[tokio::test]
    async fn stub_submit_records_and_serves_results() {
        let backend = StubBackend::new();
        let options = SubmitOptions {
            kind: AnalysisKind::TextDetection,
            features: vec![],
            job_tag: "doc-1".into(),
        };
        let job = backend
            .submit(&BlobRef::new("in/a"), &BlobRef::new("out/a"), &options)
            .await
            .unwrap();

        backend
            .poll_until_terminal(&job, Duration::from_millis(1), Duration::from_secs(1))
            .await
            .unwrap();
        let result = backend.fetch_result(&job).await.unwrap();
        assert!(result.to_text().contains("in/a"));

        let subs = backend.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].job_tag, "doc-1");
    }

    #[tokio::test]
    async fn stub_injected_submit_failure() {
        let backend = StubBackend::new();
        backend.fail_submit_for("in/bad");
        let options = SubmitOptions {
            kind: AnalysisKind::DocumentAnalysis,
            features: vec![AnalysisFeature::Forms],
            job_tag: "doc-1".into(),
        };
        let err = backend
            .submit(&BlobRef::new("in/bad"), &BlobRef::new("out"), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Submission { .. }));
    }

    #[tokio::test]
    async fn stub_poll_times_out_when_job_stays_pending() {
        let backend = StubBackend::new();
        let options = SubmitOptions {
            kind: AnalysisKind::TextDetection,
            features: vec![],
            job_tag: "doc-1".into(),
        };
        let job = backend
            .submit(&BlobRef::new("in/slow"), &BlobRef::new("out"), &options)
            .await
            .unwrap();
        backend.require_polls(&job, 1000);

        let err = backend
            .poll_until_terminal(&job, Duration::from_millis(5), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PollTimeout { .. }));
    }
}
