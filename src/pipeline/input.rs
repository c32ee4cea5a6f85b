//! Input resolution: turn a user-supplied path or URL into a local PDF.
//!
//! pdfium opens files, not buffers, so a URL is fetched into a `TempDir`
//! owned by the returned [`ResolvedInput`]. Both routes check the `%PDF`
//! header before anything reaches the renderer.

use crate::error::RegisterError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const FALLBACK_NAME: &str = "register.pdf";

/// A local PDF ready for rendering. A downloaded copy is removed on drop.
pub struct ResolvedInput {
    path: PathBuf,
    _download: Option<TempDir>,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` (path or HTTP(S) URL) to a local PDF.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, RegisterError> {
    if input.trim().is_empty() {
        return Err(RegisterError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        fetch(input, timeout_secs).await
    } else {
        open_local(PathBuf::from(input)).await
    }
}

async fn open_local(path: PathBuf) -> Result<ResolvedInput, RegisterError> {
    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => RegisterError::FileNotFound { path: path.clone() },
        ErrorKind::PermissionDenied => RegisterError::PermissionDenied { path: path.clone() },
        _ => RegisterError::Internal(format!("cannot open {}: {e}", path.display())),
    })?;

    let mut header = Vec::with_capacity(PDF_MAGIC.len());
    // A short or unreadable header is left for pdfium to classify.
    if file.take(PDF_MAGIC.len() as u64).read_to_end(&mut header).await.is_ok() {
        check_header(&header, &path)?;
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput {
        path,
        _download: None,
    })
}

async fn fetch(url: &str, timeout_secs: u64) -> Result<ResolvedInput, RegisterError> {
    info!("Downloading register from: {}", url);
    let failed = |e: reqwest::Error| download_error(url, timeout_secs, e);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(failed)?;
    let bytes = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(failed)?
        .bytes()
        .await
        .map_err(failed)?;

    let dir = TempDir::new().map_err(|e| RegisterError::Internal(format!("temp dir: {e}")))?;
    let path = dir.path().join(filename_from_url(url));
    check_header(&bytes, &path)?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| RegisterError::Internal(format!("writing {}: {e}", path.display())))?;

    info!("Downloaded {} bytes to {}", bytes.len(), path.display());
    Ok(ResolvedInput {
        path,
        _download: Some(dir),
    })
}

fn download_error(url: &str, secs: u64, e: reqwest::Error) -> RegisterError {
    if e.is_timeout() {
        RegisterError::DownloadTimeout {
            url: url.to_string(),
            secs,
        }
    } else {
        RegisterError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Reject anything whose first four bytes are present and not `%PDF`.
fn check_header(header: &[u8], path: &Path) -> Result<(), RegisterError> {
    let Some(magic) = header.get(..4).and_then(|h| <[u8; 4]>::try_from(h).ok()) else {
        return Ok(());
    };
    if &magic == PDF_MAGIC {
        Ok(())
    } else {
        Err(RegisterError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        })
    }
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .next_back()
                .filter(|last| last.contains('.'))
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/register.pdf"));
        assert!(is_url("http://example.com/register.pdf"));
        assert!(!is_url("/tmp/register.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_falls_back_for_bare_urls() {
        assert_eq!(filename_from_url("https://host/files/village-7.pdf"), "village-7.pdf");
        assert_eq!(filename_from_url("https://host/download"), "register.pdf");
        assert_eq!(filename_from_url("https://host/"), "register.pdf");
    }

    #[test]
    fn header_check_ignores_short_input() {
        let p = Path::new("x.pdf");
        assert!(check_header(b"%PDF-1.4", p).is_ok());
        assert!(check_header(b"%P", p).is_ok());
        assert!(matches!(
            check_header(b"<html>", p),
            Err(RegisterError::NotAPdf { magic, .. }) if &magic == b"<htm"
        ));
    }

    #[test]
    fn blank_input_is_invalid() {
        let r = tokio_test::block_on(resolve_input("   ", 5));
        assert!(matches!(r, Err(RegisterError::InvalidInput { .. })));
    }

    #[test]
    fn missing_file_is_reported() {
        let r = tokio_test::block_on(resolve_input("/definitely/not/here.pdf", 5));
        assert!(matches!(r, Err(RegisterError::FileNotFound { .. })));
    }

    #[test]
    fn non_pdf_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04zip").unwrap();
        let r = tokio_test::block_on(resolve_input(f.path().to_str().unwrap(), 5));
        match r {
            Err(RegisterError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("expected NotAPdf, got {:?}", other.map(|r| r.path().to_path_buf())),
        }
    }

    #[test]
    fn pdf_magic_is_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        let r = tokio_test::block_on(resolve_input(f.path().to_str().unwrap(), 5)).unwrap();
        assert_eq!(r.path(), f.path());
    }
}
