//! Ordered aggregation of analysis results.
//!
//! A convert stage holds a recorded [`FanOutResult`] — one job handle or
//! one per fragment — and needs the results as a single ordered
//! collection. [`ResultAggregator::collect`] fetches them (concurrently,
//! up to a bound) and assembles them **in original fragment order**,
//! whatever order the jobs actually completed in.
//!
//! Aggregation is all-or-nothing: if any one fetch fails, the whole call
//! fails with [`PipelineError::AggregationIncomplete`] and the caller
//! writes no payload. A re-run of the stage starts from the same recorded
//! job handles, so nothing is lost by failing the whole batch.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use tracing::debug;

use crate::backend::{AnalysisOutput, JobHandle};
use crate::error::PipelineError;
use crate::payload::{FanOutResult, Fragment, FragmentRef};
use crate::pipeline::postprocess;

/// One aggregated result: the fragment it belongs to, the derived
/// plain-text view, and the raw structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentOutput {
    pub fragment: FragmentRef,
    pub text: String,
    pub raw: AnalysisOutput,
}

/// Fetches and orders per-job results.
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator {
    fetch_concurrency: usize,
}

impl ResultAggregator {
    pub fn new(fetch_concurrency: usize) -> Self {
        ResultAggregator {
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Fetch every job's output and assemble the ordered result list.
    ///
    /// For a single-call result the list has one element, aligned with
    /// [`FragmentRef::Document`]. For a per-fragment result the list is
    /// positionally aligned with `fragments`; the recorded handle count
    /// must match the fragment count or the call fails with
    /// `InvalidFanOut` before any fetch is issued.
    ///
    /// The text view is a pure function of the structured output
    /// ([`AnalysisOutput::to_text`] plus deterministic cleanup), so
    /// repeated collections over the same jobs yield identical results.
    pub async fn collect<F, Fut>(
        &self,
        fan_out: &FanOutResult,
        fragments: &[Fragment],
        fetch_fn: F,
    ) -> Result<Vec<FragmentOutput>, PipelineError>
    where
        F: Fn(FragmentRef, JobHandle) -> Fut,
        Fut: Future<Output = Result<AnalysisOutput, PipelineError>>,
    {
        let pairs: Vec<(FragmentRef, JobHandle)> = match fan_out {
            FanOutResult::Single { job } => vec![(FragmentRef::Document, job.clone())],
            FanOutResult::PerFragment { jobs } => {
                fan_out.check_alignment(fragments.len())?;
                fragments
                    .iter()
                    .zip(jobs.iter())
                    .map(|(fragment, job)| {
                        (FragmentRef::Page(fragment.id.clone()), job.clone())
                    })
                    .collect()
            }
        };
        debug!("aggregating {} result(s)", pairs.len());

        // `buffered` (not `buffer_unordered`) keeps outputs in submission
        // order regardless of completion order.
        stream::iter(pairs.into_iter().map(|(fragment, job)| {
            let fetch = fetch_fn(fragment.clone(), job);
            async move {
                match fetch.await {
                    Ok(raw) => Ok(FragmentOutput {
                        text: postprocess::clean_text(&raw.to_text()),
                        fragment,
                        raw,
                    }),
                    Err(err) => Err(PipelineError::AggregationIncomplete {
                        fragment,
                        detail: err.to_string(),
                    }),
                }
            }
        }))
        .buffered(self.fetch_concurrency)
        .try_collect()
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Block;
    use crate::payload::FragmentId;
    use std::time::Duration;

    fn fragments(n: usize) -> Vec<Fragment> {
        (1..=n)
            .map(|i| Fragment::new(FragmentId::from_ordinal(i)))
            .collect()
    }

    fn jobs(n: usize) -> Vec<JobHandle> {
        (1..=n).map(|i| JobHandle::new(format!("job-{i}"))).collect()
    }

    fn output_for(job: &JobHandle) -> AnalysisOutput {
        AnalysisOutput {
            blocks: vec![Block::line(format!("text of {job}"))],
        }
    }

    #[tokio::test]
    async fn single_call_yields_one_document_aligned_result() {
        let fan_out = FanOutResult::Single {
            job: JobHandle::new("only"),
        };
        let results = ResultAggregator::new(8)
            .collect(&fan_out, &fragments(3), |_, job| async move {
                Ok(output_for(&job))
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fragment, FragmentRef::Document);
        assert_eq!(results[0].text, "text of only\n");
    }

    #[tokio::test]
    async fn per_fragment_results_keep_fragment_order_under_any_completion_order() {
        let n = 8;
        let fan_out = FanOutResult::PerFragment { jobs: jobs(n) };

        // Later jobs finish first: job-1 sleeps longest.
        let results = ResultAggregator::new(n)
            .collect(&fan_out, &fragments(n), |_, job| async move {
                let ordinal: u64 = job.as_str()[4..].parse().unwrap();
                tokio::time::sleep(Duration::from_millis((n as u64 - ordinal) * 10)).await;
                Ok(output_for(&job))
            })
            .await
            .unwrap();

        assert_eq!(results.len(), n);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(
                result.fragment,
                FragmentRef::Page(FragmentId::from_ordinal(i + 1))
            );
            assert_eq!(result.text, format!("text of job-{}\n", i + 1));
        }
    }

    #[tokio::test]
    async fn one_failed_fetch_fails_the_whole_aggregation() {
        let fan_out = FanOutResult::PerFragment { jobs: jobs(5) };

        let err = ResultAggregator::new(2)
            .collect(&fan_out, &fragments(5), |_, job| async move {
                if job.as_str() == "job-3" {
                    Err(PipelineError::Internal("fetch exploded".into()))
                } else {
                    Ok(output_for(&job))
                }
            })
            .await
            .unwrap_err();

        match err {
            PipelineError::AggregationIncomplete { fragment, detail } => {
                assert_eq!(fragment, FragmentRef::Page(FragmentId::from_ordinal(3)));
                assert!(detail.contains("fetch exploded"));
            }
            other => panic!("expected AggregationIncomplete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_count_mismatch_is_rejected_before_fetching() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let fan_out = FanOutResult::PerFragment { jobs: jobs(2) };
        let fetches = AtomicUsize::new(0);
        let err = ResultAggregator::new(2)
            .collect(&fan_out, &fragments(3), |_, job| {
                fetches.fetch_add(1, Ordering::SeqCst);
                async move { Ok(output_for(&job)) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFanOut { .. }));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_collection_is_deterministic() {
        let fan_out = FanOutResult::PerFragment { jobs: jobs(3) };
        let frags = fragments(3);
        let aggregator = ResultAggregator::new(3);
        let run =
            || aggregator.collect(&fan_out, &frags, |_, job| async move { Ok(output_for(&job)) });
        assert_eq!(run().await.unwrap(), run().await.unwrap());
    }
}
