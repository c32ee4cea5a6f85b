//! Page images and the [`Page`] handle that owns them.
//!
//! Every page image lives in a temporary file owned by a [`PageImage`].
//! The file is deleted when the `PageImage` is released or dropped, which
//! ties the image's lifetime to the page pipeline call that consumes the
//! [`Page`]: success, failure, or unwinding panic all remove it.

use image::DynamicImage;
use std::io::{self, Cursor, Write};
use std::path::Path;
use tempfile::TempPath;
use tracing::{debug, warn};

/// An owned, self-deleting page image on disk.
#[derive(Debug)]
pub struct PageImage {
    path: TempPath,
    mime_type: &'static str,
}

impl PageImage {
    /// Take ownership of an existing file. It is deleted on release.
    pub fn adopt(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            mime_type: mime_for_path(path),
            path: TempPath::from_path(path),
        }
    }

    /// Copy `source` into a fresh temp file, leaving the original untouched.
    pub fn copy_from(source: impl AsRef<Path>) -> io::Result<Self> {
        let source = source.as_ref();
        let bytes = std::fs::read(source)?;
        Self::from_bytes(&bytes, mime_for_path(source))
    }

    /// Write encoded image bytes to a temp file.
    pub fn from_bytes(bytes: &[u8], mime_type: &'static str) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("parivar-page-")
            .suffix(extension_for_mime(mime_type))
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            path: file.into_temp_path(),
            mime_type,
        })
    }

    /// PNG-encode a rendered page into a temp file.
    ///
    /// PNG over JPEG: lossless, so pen strokes in handwritten cells stay crisp.
    pub fn from_image(img: &DynamicImage) -> Result<Self, image::ImageError> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        Ok(Self::from_bytes(&buf, "image/png")?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub async fn read_bytes(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }

    /// Delete the image now. Equivalent to dropping it, but reports errors.
    pub fn release(self) {
        let shown = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => debug!("Released page image {}", shown),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete page image {}: {}", shown, e),
        }
    }
}

/// One page of a document: a 0-based index plus its image.
#[derive(Debug)]
pub struct Page {
    index: usize,
    image: PageImage,
}

impl Page {
    pub fn new(index: usize, image: PageImage) -> Self {
        Self { index, image }
    }

    /// 0-based position in the source document.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number used in events and outputs.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    pub fn image(&self) -> &PageImage {
        &self.image
    }

    pub fn into_image(self) -> PageImage {
        self.image
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => ".jpg",
        "image/webp" => ".webp",
        _ => ".png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn release_deletes_the_file() {
        let img = PageImage::from_bytes(b"not really a png", "image/png").unwrap();
        let path = img.path().to_path_buf();
        assert!(path.exists());
        img.release();
        assert!(!path.exists());
    }

    #[test]
    fn drop_deletes_the_file() {
        let page = Page::new(0, PageImage::from_bytes(b"x", "image/jpeg").unwrap());
        let path = page.image().path().to_path_buf();
        assert_eq!(path.extension().unwrap(), "jpg");
        drop(page);
        assert!(!path.exists());
    }

    #[test]
    fn copy_leaves_source_in_place() {
        let src = tempfile::Builder::new().suffix(".jpeg").tempfile().unwrap();
        std::fs::write(src.path(), b"jpeg bytes").unwrap();
        let img = PageImage::copy_from(src.path()).unwrap();
        assert_eq!(img.mime_type(), "image/jpeg");
        img.release();
        assert!(src.path().exists());
    }

    #[test]
    fn from_image_writes_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let page_img = PageImage::from_image(&img).unwrap();
        let bytes = std::fs::read(page_img.path()).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn page_numbers_are_one_based() {
        let page = Page::new(4, PageImage::from_bytes(b"x", "image/png").unwrap());
        assert_eq!(page.index(), 4);
        assert_eq!(page.page_num(), 5);
    }
}
