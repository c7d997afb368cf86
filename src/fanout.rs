//! The fan-out decision: one aggregate call vs one call per fragment.
//!
//! A whole document that fits the backend's single-call quotas is cheaper
//! and faster to analyze with one job; anything larger is submitted per
//! fragment. The decision is made exactly once per submit-stage invocation
//! and recorded in the payload's
//! [`crate::payload::FanOutResult`], so downstream stages consume the
//! recorded shape instead of re-deriving it against data that may have
//! changed.

use serde::{Deserialize, Serialize};

use crate::backend::BackendCapacity;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::identity::DocumentId;

/// Which shape a submit stage used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    /// One aggregate job over the whole document.
    Single,
    /// One job per fragment.
    PerFragment,
}

/// Decides the call shape from document size and fragment count.
///
/// Thresholds come from the backend's reported [`BackendCapacity`];
/// [`PipelineConfig`] may pin either value lower (or higher, at the
/// caller's own risk) for a specific deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutPolicy {
    max_single_call_bytes: u64,
    max_single_call_fragments: usize,
}

impl FanOutPolicy {
    pub fn new(capacity: BackendCapacity) -> Self {
        FanOutPolicy {
            max_single_call_bytes: capacity.max_single_call_bytes,
            max_single_call_fragments: capacity.max_single_call_fragments,
        }
    }

    /// Backend capacity with config overrides applied.
    pub fn for_backend(capacity: BackendCapacity, config: &PipelineConfig) -> Self {
        FanOutPolicy {
            max_single_call_bytes: config
                .single_call_max_bytes
                .unwrap_or(capacity.max_single_call_bytes),
            max_single_call_fragments: config
                .single_call_max_fragments
                .unwrap_or(capacity.max_single_call_fragments),
        }
    }

    /// Choose the call shape.
    ///
    /// An explicit override wins verbatim. Otherwise single-call is chosen
    /// iff the document fits *both* quotas. A per-fragment outcome with
    /// zero fragments fails fast with `NoFragments` rather than submitting
    /// zero jobs and reporting an empty success.
    pub fn decide(
        &self,
        doc_id: &DocumentId,
        total_size_bytes: u64,
        fragment_count: usize,
        explicit_override: Option<CallShape>,
    ) -> Result<CallShape, PipelineError> {
        let shape = match explicit_override {
            Some(shape) => shape,
            None => {
                if total_size_bytes <= self.max_single_call_bytes
                    && fragment_count <= self.max_single_call_fragments
                {
                    CallShape::Single
                } else {
                    CallShape::PerFragment
                }
            }
        };

        if shape == CallShape::PerFragment && fragment_count == 0 {
            return Err(PipelineError::NoFragments {
                doc_id: doc_id.clone(),
            });
        }
        Ok(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FanOutPolicy {
        FanOutPolicy::new(BackendCapacity::default())
    }

    fn doc() -> DocumentId {
        DocumentId::of_bytes(b"fanout")
    }

    #[test]
    fn small_document_uses_single_call() {
        let shape = policy().decide(&doc(), 1_000_000, 2, None).unwrap();
        assert_eq!(shape, CallShape::Single);
    }

    #[test]
    fn oversized_document_fans_out() {
        let shape = policy().decide(&doc(), 300_000_001, 2, None).unwrap();
        assert_eq!(shape, CallShape::PerFragment);
    }

    #[test]
    fn too_many_fragments_fan_out() {
        let shape = policy().decide(&doc(), 1_000, 5000, None).unwrap();
        assert_eq!(shape, CallShape::PerFragment);
    }

    #[test]
    fn quota_boundaries_are_inclusive() {
        let shape = policy().decide(&doc(), 300_000_000, 3000, None).unwrap();
        assert_eq!(shape, CallShape::Single);
    }

    #[test]
    fn explicit_override_wins() {
        let shape = policy()
            .decide(&doc(), 1_000, 2, Some(CallShape::PerFragment))
            .unwrap();
        assert_eq!(shape, CallShape::PerFragment);

        let shape = policy()
            .decide(&doc(), u64::MAX, 2, Some(CallShape::Single))
            .unwrap();
        assert_eq!(shape, CallShape::Single);
    }

    #[test]
    fn zero_fragments_per_fragment_fails_fast() {
        let err = policy()
            .decide(&doc(), u64::MAX, 0, None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoFragments { .. }));

        let err = policy()
            .decide(&doc(), 1, 0, Some(CallShape::PerFragment))
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoFragments { .. }));
    }

    #[test]
    fn zero_fragments_single_call_is_allowed() {
        // Forcing one aggregate call over an un-split document is legal.
        let shape = policy()
            .decide(&doc(), 1, 0, Some(CallShape::Single))
            .unwrap();
        assert_eq!(shape, CallShape::Single);
    }

    #[test]
    fn config_overrides_replace_backend_quotas() {
        let config = PipelineConfig::builder()
            .single_call_max_fragments(1)
            .build()
            .unwrap();
        let policy = FanOutPolicy::for_backend(BackendCapacity::default(), &config);
        let shape = policy.decide(&doc(), 1_000, 2, None).unwrap();
        assert_eq!(shape, CallShape::PerFragment);
    }
}
