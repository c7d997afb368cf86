//! Configuration for the extraction pipeline.
//!
//! All tunable behaviour lives in one [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across stages, log it, and diff two runs to
//! understand why their behaviour differs.
//!
//! # Design choice: builder over constructor
//! A ten-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::pipeline::Pipeline`].
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docpipe::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(150)
///     .submit_concurrency(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rendering DPI for per-page raster images. Range: 72–400. Default: 200.
    ///
    /// 200 DPI keeps small print legible for downstream analysis while the
    /// PNG stays comfortably below typical object-size limits. Drop to 96
    /// for very large pages where object size matters more than density.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels.
    /// Default: 2000.
    ///
    /// A safety cap independent of DPI: an A0 poster rendered at 200 DPI
    /// would otherwise allocate a 13 000 × 18 000 px bitmap. The longest
    /// edge is capped and the other dimension scales proportionally.
    pub max_rendered_pixels: u32,

    /// Whether the split stage also rasterises each page to PNG.
    /// Default: true.
    pub extract_images: bool,

    /// Concurrent job submissions within one submit stage. Default: 4.
    ///
    /// Submissions are network-bound; a small fan-out cuts wall-clock time
    /// on large documents without tripping backend rate limits. Order of
    /// the recorded job handles is preserved regardless.
    pub submit_concurrency: usize,

    /// Concurrent result fetches within one convert stage. Default: 8.
    pub fetch_concurrency: usize,

    /// Delay between polls while waiting for an analysis job. Default: 5s.
    pub poll_delay: Duration,

    /// Overall timeout for waiting on one analysis job. Default: 300s.
    ///
    /// A timed-out wait does not undo the submission — the submit stage
    /// has already succeeded; the caller retries the convert stage later.
    pub poll_timeout: Duration,

    /// Download timeout for URL ingest sources, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Overrides the backend-reported single-call size quota, in bytes.
    ///
    /// Leave `None` to use [`crate::backend::BackendCapacity`] from the
    /// backend itself.
    pub single_call_max_bytes: Option<u64>,

    /// Overrides the backend-reported single-call fragment-count quota.
    pub single_call_max_fragments: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2000,
            extract_images: true,
            submit_concurrency: 4,
            fetch_concurrency: 8,
            poll_delay: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(300),
            download_timeout_secs: 120,
            single_call_max_bytes: None,
            single_call_max_fragments: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn submit_concurrency(mut self, n: usize) -> Self {
        self.config.submit_concurrency = n.max(1);
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n.max(1);
        self
    }

    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.config.poll_delay = delay;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn single_call_max_bytes(mut self, bytes: u64) -> Self {
        self.config.single_call_max_bytes = Some(bytes);
        self
    }

    pub fn single_call_max_fragments(mut self, n: usize) -> Self {
        self.config.single_call_max_fragments = Some(n);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.submit_concurrency == 0 || c.fetch_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be ≥ 1".into(),
            ));
        }
        if c.poll_delay >= c.poll_timeout {
            return Err(PipelineError::InvalidConfig(format!(
                "poll delay ({:?}) must be shorter than poll timeout ({:?})",
                c.poll_delay, c.poll_timeout
            )));
        }
        if c.single_call_max_fragments == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "single-call fragment quota must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
