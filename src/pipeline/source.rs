//! Document sources: produce a document's pages, in order, one at a time.
//!
//! A source hands out each [`Page`] only when the pipeline asks for it, so at
//! most one page image exists on disk at any moment.

use super::render;
use crate::config::ExtractionConfig;
use crate::error::{PageError, RegisterError};
use crate::page::{Page, PageImage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Asynchronous producer of a document's pages.
#[async_trait]
pub trait DocumentSource: Send {
    /// Number of pages this source will yield.
    fn page_count(&self) -> usize;

    /// The next page, `None` once exhausted. An `Err` skips that page only.
    async fn next_page(&mut self) -> Option<Result<Page, PageError>>;
}

/// Renders the selected pages of a PDF lazily.
pub struct PdfPageSource {
    path: PathBuf,
    password: Option<String>,
    dpi: u32,
    max_pixels: u32,
    pending: VecDeque<usize>,
    total: usize,
}

impl PdfPageSource {
    /// Open the PDF at `path` and resolve the page selection.
    ///
    /// # Errors
    /// Load failures (corrupt, password) and an empty page selection.
    pub async fn open(path: &Path, config: &ExtractionConfig) -> Result<Self, RegisterError> {
        let metadata = render::extract_metadata(path, config.password.as_deref()).await?;
        Self::with_page_count(path, metadata.page_count, config)
    }

    pub(crate) fn with_page_count(
        path: &Path,
        total_pages: usize,
        config: &ExtractionConfig,
    ) -> Result<Self, RegisterError> {
        let indices = config.pages.to_indices(total_pages);
        if indices.is_empty() {
            return Err(RegisterError::PageOutOfRange {
                page: 0,
                total: total_pages,
            });
        }
        debug!(
            "Selected {} of {} pages from {}",
            indices.len(),
            total_pages,
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            password: config.password.clone(),
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            total: indices.len(),
            pending: indices.into(),
        })
    }
}

#[async_trait]
impl DocumentSource for PdfPageSource {
    fn page_count(&self) -> usize {
        self.total
    }

    async fn next_page(&mut self) -> Option<Result<Page, PageError>> {
        let index = self.pending.pop_front()?;
        let rendered = render::render_page(
            &self.path,
            self.password.as_deref(),
            index,
            self.dpi,
            self.max_pixels,
        )
        .await;

        let page = rendered.and_then(|img| {
            PageImage::from_image(&img)
                .map(|image| Page::new(index, image))
                .map_err(|e| PageError::RenderFailed {
                    page: index + 1,
                    detail: format!("PNG encoding failed: {}", e),
                })
        });
        Some(page)
    }
}

/// Pages that already exist as image files, one file per page.
///
/// Each file is copied into a temp file when requested; the originals are
/// never modified or deleted.
pub struct ImageFileSource {
    pending: VecDeque<(usize, PathBuf)>,
    total: usize,
}

impl ImageFileSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let pending: VecDeque<(usize, PathBuf)> =
            paths.into_iter().map(Into::into).enumerate().collect();
        Self {
            total: pending.len(),
            pending,
        }
    }
}

#[async_trait]
impl DocumentSource for ImageFileSource {
    fn page_count(&self) -> usize {
        self.total
    }

    async fn next_page(&mut self) -> Option<Result<Page, PageError>> {
        let (index, path) = self.pending.pop_front()?;
        let copied = tokio::task::spawn_blocking(move || {
            PageImage::copy_from(&path).map_err(|e| format!("{}: {}", path.display(), e))
        })
        .await;

        let page = match copied {
            Ok(Ok(image)) => Ok(Page::new(index, image)),
            Ok(Err(detail)) => Err(PageError::RenderFailed {
                page: index + 1,
                detail,
            }),
            Err(e) => Err(PageError::RenderFailed {
                page: index + 1,
                detail: format!("copy task panicked: {}", e),
            }),
        };
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSelection;

    #[tokio::test]
    async fn image_source_copies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.jpg");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, b"second").unwrap();

        let mut source = ImageFileSource::new([a.clone(), b.clone()]);
        assert_eq!(source.page_count(), 2);

        let p1 = source.next_page().await.unwrap().unwrap();
        assert_eq!(p1.page_num(), 1);
        assert_eq!(p1.image().read_bytes().await.unwrap(), b"first");
        assert_ne!(p1.image().path(), a.as_path());

        let p2 = source.next_page().await.unwrap().unwrap();
        assert_eq!(p2.page_num(), 2);
        assert_eq!(p2.image().mime_type(), "image/jpeg");
        assert!(source.next_page().await.is_none());

        drop(p1);
        drop(p2);
        assert!(a.exists() && b.exists());
    }

    #[tokio::test]
    async fn missing_image_fails_only_that_page() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.png");
        std::fs::write(&ok, b"x").unwrap();

        let mut source = ImageFileSource::new([dir.path().join("missing.png"), ok]);
        match source.next_page().await {
            Some(Err(PageError::RenderFailed { page, .. })) => assert_eq!(page, 1),
            other => panic!("expected a render failure, got {other:?}"),
        }
        assert!(source.next_page().await.unwrap().is_ok());
    }

    #[test]
    fn empty_selection_is_fatal() {
        let config = ExtractionConfig::builder()
            .pages(PageSelection::Single(9))
            .build()
            .unwrap();
        match PdfPageSource::with_page_count(Path::new("r.pdf"), 3, &config) {
            Err(RegisterError::PageOutOfRange { total, .. }) => assert_eq!(total, 3),
            _ => panic!("expected PageOutOfRange"),
        }
    }

    #[test]
    fn selection_drives_page_count() {
        let config = ExtractionConfig::builder()
            .pages(PageSelection::Range(2, 4))
            .build()
            .unwrap();
        let source = PdfPageSource::with_page_count(Path::new("r.pdf"), 10, &config).unwrap();
        assert_eq!(source.page_count(), 3);
    }
}
