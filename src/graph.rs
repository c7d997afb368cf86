//! The pipeline stage graph: which statuses may precede which stage.
//!
//! The graph is a single explicit table consulted by the
//! [`crate::executor::StageExecutor`] before any stage runs. Call sites
//! never hard-code their own allowed sets, so adding an analysis variant or
//! re-wiring an edge is a local edit here.
//!
//! The graph is over *stages*, not documents: an edge `P → S` means "stage
//! `S` may start once the document's status is one of `P`'s listed
//! statuses". [`PipelineGraph::validate`] checks at startup that the edge
//! relation is a DAG and that no stage lists one of its own statuses as a
//! predecessor.

use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::status::{Stage, StageStatus};

/// Static table mapping each stage to its allowed predecessor statuses.
///
/// An empty set means "any current status is accepted" and is used only by
/// the very first stage, which must be runnable on a freshly created
/// record and re-runnable for recovery.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    allowed: BTreeMap<Stage, Vec<StageStatus>>,
}

/// The submit/convert stage pair for each analysis variant, in canonical
/// variant order. Earlier variants may gate later ones; never the reverse.
const VARIANT_PAIRS: [(Stage, Stage); 4] = [
    (Stage::SubmitTextDetection, Stage::ConvertTextDetection),
    (Stage::SubmitDocumentAnalysis, Stage::ConvertDocumentAnalysis),
    (Stage::SubmitExpenseAnalysis, Stage::ConvertExpenseAnalysis),
    (Stage::SubmitLendingAnalysis, Stage::ConvertLendingAnalysis),
];

impl PipelineGraph {
    /// The production graph.
    ///
    /// - `landing_to_raw` accepts any status (first stage).
    /// - `raw_to_fragment` requires the raw copy to have succeeded.
    /// - Each submit stage may run once the split has succeeded, or after
    ///   any *earlier* variant's submit or convert stage succeeded, so a
    ///   document can run several analysis variants in canonical order.
    /// - Each convert stage requires its own submit stage to have
    ///   succeeded.
    pub fn standard() -> Self {
        let mut allowed: BTreeMap<Stage, Vec<StageStatus>> = BTreeMap::new();

        allowed.insert(Stage::LandingToRaw, Vec::new());
        allowed.insert(
            Stage::RawToFragment,
            vec![Stage::LandingToRaw.succeeded()],
        );

        for (i, (submit, convert)) in VARIANT_PAIRS.into_iter().enumerate() {
            let mut preds = vec![Stage::RawToFragment.succeeded()];
            for (earlier_submit, earlier_convert) in &VARIANT_PAIRS[..i] {
                preds.push(earlier_submit.succeeded());
                preds.push(earlier_convert.succeeded());
            }
            allowed.insert(submit, preds);
            allowed.insert(convert, vec![submit.succeeded()]);
        }

        PipelineGraph { allowed }
    }

    /// Build a graph from a caller-provided table, validating it eagerly.
    pub fn custom(
        allowed: BTreeMap<Stage, Vec<StageStatus>>,
    ) -> Result<Self, PipelineError> {
        let graph = PipelineGraph { allowed };
        graph.validate()?;
        Ok(graph)
    }

    /// The allowed predecessor statuses for `stage`.
    ///
    /// Returns an empty slice for a stage with no entry, which the
    /// executor treats as "accept any status" — `validate` ensures only
    /// the first stage is configured that way on purpose.
    pub fn allowed_predecessors(&self, stage: Stage) -> &[StageStatus] {
        self.allowed
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Verify the table is complete, self-reference free, and acyclic.
    ///
    /// Run once at pipeline construction; a failure here is a programming
    /// error in the table, not a runtime condition.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            if !self.allowed.contains_key(&stage) {
                return Err(PipelineError::InvalidGraph {
                    detail: format!("stage '{stage}' has no entry in the graph"),
                });
            }
        }

        for (stage, preds) in &self.allowed {
            for pred in preds {
                if pred.stage == *stage {
                    return Err(PipelineError::InvalidGraph {
                        detail: format!(
                            "stage '{stage}' lists its own status {pred} as a predecessor"
                        ),
                    });
                }
            }
        }

        self.check_acyclic()
    }

    /// Depth-first cycle detection over the stage-level edge relation.
    fn check_acyclic(&self) -> Result<(), PipelineError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let index = |s: Stage| (s.ordinal() - 1) as usize;
        let mut marks = [Mark::Unvisited; Stage::ALL.len()];

        // Iterative DFS; `true` frames are post-visit pops.
        for start in Stage::ALL {
            if marks[index(start)] != Mark::Unvisited {
                continue;
            }
            let mut stack: Vec<(Stage, bool)> = vec![(start, false)];
            while let Some((stage, done)) = stack.pop() {
                if done {
                    marks[index(stage)] = Mark::Done;
                    continue;
                }
                if marks[index(stage)] == Mark::Done {
                    continue;
                }
                marks[index(stage)] = Mark::OnStack;
                stack.push((stage, true));
                for pred in self.allowed_predecessors(stage) {
                    match marks[index(pred.stage)] {
                        Mark::OnStack => {
                            return Err(PipelineError::InvalidGraph {
                                detail: format!(
                                    "cycle through stages '{}' and '{}'",
                                    pred.stage, stage
                                ),
                            });
                        }
                        Mark::Unvisited => stack.push((pred.stage, false)),
                        Mark::Done => {}
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_graph_validates() {
        PipelineGraph::standard().validate().unwrap();
    }

    #[test]
    fn first_stage_accepts_any_status() {
        let g = PipelineGraph::standard();
        assert!(g.allowed_predecessors(Stage::LandingToRaw).is_empty());
    }

    #[test]
    fn convert_requires_its_own_submit() {
        let g = PipelineGraph::standard();
        assert_eq!(
            g.allowed_predecessors(Stage::ConvertDocumentAnalysis),
            &[Stage::SubmitDocumentAnalysis.succeeded()]
        );
    }

    #[test]
    fn later_variant_may_follow_earlier_one() {
        let g = PipelineGraph::standard();
        let preds = g.allowed_predecessors(Stage::SubmitDocumentAnalysis);
        assert!(preds.contains(&Stage::RawToFragment.succeeded()));
        assert!(preds.contains(&Stage::SubmitTextDetection.succeeded()));
        assert!(preds.contains(&Stage::ConvertTextDetection.succeeded()));
        // Never gated on a later variant.
        assert!(!preds.contains(&Stage::SubmitLendingAnalysis.succeeded()));
    }

    #[test]
    fn missing_entry_rejected() {
        let mut table = PipelineGraph::standard().allowed;
        table.remove(&Stage::ConvertLendingAnalysis);
        let err = PipelineGraph::custom(table).unwrap_err();
        assert!(err.to_string().contains("no entry"));
    }

    #[test]
    fn self_reference_rejected() {
        let mut table = PipelineGraph::standard().allowed;
        table
            .get_mut(&Stage::RawToFragment)
            .unwrap()
            .push(Stage::RawToFragment.failed());
        let err = PipelineGraph::custom(table).unwrap_err();
        assert!(err.to_string().contains("own status"));
    }

    #[test]
    fn cycle_rejected() {
        let mut table = PipelineGraph::standard().allowed;
        // raw_to_fragment ← submit_text_detection already exists in the
        // forward direction; add the reverse edge to close a cycle.
        table
            .get_mut(&Stage::RawToFragment)
            .unwrap()
            .push(Stage::SubmitTextDetection.succeeded());
        let err = PipelineGraph::custom(table).unwrap_err();
        assert!(err.to_string().contains("cycle"), "got: {err}");
    }
}
