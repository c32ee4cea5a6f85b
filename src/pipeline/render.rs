//! PDF rasterisation: render one page at a time to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## One page per call
//!
//! The document is reopened for each page. Register scans are a few dozen
//! pages at most and agent round-trips dominate the run, while keeping a
//! single rendered page alive at a time keeps memory flat.
//!
//! ## Pixel cap
//!
//! The target width follows the configured DPI, but the longest edge never
//! exceeds `max_rendered_pixels`. A register scanned at A3 and rendered at
//! 300 DPI would otherwise come out near 5,000 px wide.

use crate::error::{PageError, RegisterError};
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Width in pixels for a page `width_points` wide rendered at `dpi`,
/// capped at `max_pixels`.
pub fn target_width(width_points: f32, dpi: u32, max_pixels: u32) -> i32 {
    let px = (width_points / POINTS_PER_INCH * dpi as f32).round() as i64;
    px.clamp(1, max_pixels.max(1) as i64) as i32
}

/// Render page `index` (0-based) of the PDF at `path`.
pub async fn render_page(
    path: &Path,
    password: Option<&str>,
    index: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, PageError> {
    let path = path.to_path_buf();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        render_page_blocking(&path, password.as_deref(), index, dpi, max_pixels)
    })
    .await
    .map_err(|e| PageError::RenderFailed {
        page: index + 1,
        detail: format!("render task panicked: {}", e),
    })?
}

fn render_page_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    index: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, PageError> {
    let failed = |detail: String| PageError::RenderFailed {
        page: index + 1,
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| failed(e.to_string()))?;
    let document = load(&pdfium, pdf_path, password).map_err(|e| failed(e.to_string()))?;

    let pages = document.pages();
    let page_index = u16::try_from(index).map_err(|_| failed("page index overflow".to_string()))?;
    let page = pages.get(page_index).map_err(|e| failed(format!("{:?}", e)))?;

    let width = target_width(page.width().value, dpi, max_pixels);
    let render_config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| failed(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        index + 1,
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Extract document metadata from a PDF without rendering pages.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, RegisterError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| RegisterError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, RegisterError> {
    let pdfium = bind_pdfium()?;
    let document = load(&pdfium, pdf_path, password)?;

    let metadata = document.metadata();
    let pages = document.pages();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let page_count = pages.len() as usize;
    info!("PDF loaded: {} pages", page_count);

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count,
        pdf_version: format!("{:?}", document.version()),
    })
}

/// Bind pdfium from the working directory first, then the system library.
fn bind_pdfium() -> Result<Pdfium, RegisterError> {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| RegisterError::Internal(format!("pdfium library not available: {:?}", e)))
}

fn load<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, RegisterError> {
    pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| classify_load_error(pdf_path.to_path_buf(), password.is_some(), format!("{:?}", e)))
}

fn classify_load_error(path: PathBuf, had_password: bool, detail: String) -> RegisterError {
    if detail.contains("Password") || detail.contains("password") {
        if had_password {
            RegisterError::WrongPassword { path }
        } else {
            RegisterError::PasswordRequired { path }
        }
    } else {
        RegisterError::CorruptPdf { path, detail }
    }
}
