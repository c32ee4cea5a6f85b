//! Pipeline stages for register extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ page ladder ──▶ document
//! (URL/path) (render)  (agents)        (aggregate)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]: rasterise one page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`source`]: hand out pages lazily, in document order
//! 4. [`encode`]: base64-wrap a page image for multimodal requests
//! 5. [`page`]: primary → secondary → verification for one page
//! 6. [`document`]: every page in order, defects contained, records concatenated

pub mod document;
pub mod encode;
pub mod input;
pub mod page;
pub mod render;
pub mod source;

pub use document::{CancellationFlag, DocumentPipeline};
pub use page::PagePipeline;
pub use source::{DocumentSource, ImageFileSource, PdfPageSource};
