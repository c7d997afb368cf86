//! Document splitting: one raw document → ordered page fragments.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the
//! blocking thread pool so Tokio worker threads never stall during
//! CPU-heavy page extraction and rasterisation.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 200 DPI would produce a
//! 13 000 × 18 000 px bitmap. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.

use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::payload::DocumentKind;

/// One page produced by a split: the page as a standalone document plus
/// an optional raster image.
#[derive(Debug)]
pub struct FragmentArtifact {
    /// The page as a self-contained document of the input's kind.
    pub page_bytes: Vec<u8>,
    /// PNG raster of the page, when requested.
    pub image_png: Option<Vec<u8>>,
}

/// Knobs the splitter needs, carved out of [`PipelineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SplitOptions {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub extract_images: bool,
}

impl From<&PipelineConfig> for SplitOptions {
    fn from(config: &PipelineConfig) -> Self {
        SplitOptions {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            extract_images: config.extract_images,
        }
    }
}

/// Splits a document into ordered page-level fragments.
///
/// Splitting is pure with respect to its input: the same bytes always
/// produce the same fragments in the same order, which is what makes
/// fragment ids stable across stage reruns.
#[async_trait]
pub trait DocumentSplitter: Send + Sync {
    async fn split(
        &self,
        kind: DocumentKind,
        bytes: Vec<u8>,
        options: &SplitOptions,
    ) -> Result<Vec<FragmentArtifact>, PipelineError>;
}

/// Default [`DocumentSplitter`]: pdfium for PDFs, passthrough for single
/// raster images.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumSplitter;

impl PdfiumSplitter {
    pub fn new() -> Self {
        PdfiumSplitter
    }
}

#[async_trait]
impl DocumentSplitter for PdfiumSplitter {
    async fn split(
        &self,
        kind: DocumentKind,
        bytes: Vec<u8>,
        options: &SplitOptions,
    ) -> Result<Vec<FragmentArtifact>, PipelineError> {
        match kind {
            DocumentKind::Pdf => {
                let options = *options;
                tokio::task::spawn_blocking(move || split_pdf_blocking(&bytes, &options))
                    .await
                    .map_err(|e| PipelineError::Internal(format!("split task panicked: {e}")))?
            }
            // A raster image is its own single fragment; the "page" and
            // the image are the same bytes.
            DocumentKind::Image => Ok(vec![FragmentArtifact {
                image_png: options.extract_images.then(|| bytes.clone()),
                page_bytes: bytes,
            }]),
            DocumentKind::Word => Err(PipelineError::UnsupportedDocumentKind {
                kind,
                stage: crate::status::Stage::RawToFragment,
            }),
        }
    }
}

/// Blocking implementation of PDF splitting.
fn split_pdf_blocking(
    bytes: &[u8],
    options: &SplitOptions,
) -> Result<Vec<FragmentArtifact>, PipelineError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(PipelineError::Split {
            detail: "input does not start with a PDF header".into(),
        });
    }

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| PipelineError::Split {
            detail: format!("could not open document: {e:?}"),
        })?;

    let page_count = document.pages().len();
    debug!("splitting {} pages", page_count);

    let render_config = PdfRenderConfig::new()
        .set_target_width(options.max_rendered_pixels as i32)
        .set_maximum_height(options.max_rendered_pixels as i32);

    let mut artifacts = Vec::with_capacity(page_count as usize);
    for index in 0..page_count {
        // Export the page as a standalone single-page PDF.
        let mut single = pdfium.create_new_pdf().map_err(|e| PipelineError::Split {
            detail: format!("could not create page document: {e:?}"),
        })?;
        single
            .pages_mut()
            .copy_page_from_document(&document, index, 0)
            .map_err(|e| PipelineError::Split {
                detail: format!("could not copy page {}: {e:?}", index + 1),
            })?;
        let page_bytes = single.save_to_bytes().map_err(|e| PipelineError::Split {
            detail: format!("could not serialize page {}: {e:?}", index + 1),
        })?;

        let image_png = if options.extract_images {
            let page = document
                .pages()
                .get(index)
                .map_err(|e| PipelineError::Split {
                    detail: format!("could not load page {}: {e:?}", index + 1),
                })?;
            let bitmap =
                page.render_with_config(&render_config)
                    .map_err(|e| PipelineError::Split {
                        detail: format!("rasterisation failed for page {}: {e:?}", index + 1),
                    })?;
            Some(encode_png(&bitmap.as_image(), index)?)
        } else {
            None
        };

        artifacts.push(FragmentArtifact {
            page_bytes,
            image_png,
        });
    }

    Ok(artifacts)
}

/// PNG-encode a rendered page.
///
/// PNG over JPEG: lossless compression preserves text crispness, which
/// matters far more than object size for OCR accuracy.
fn encode_png(img: &DynamicImage, index: u16) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PipelineError::Split {
            detail: format!("PNG encoding failed for page {}: {e}", index + 1),
        })?;
    Ok(buf)
}
