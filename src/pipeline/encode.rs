//! Image encoding: page image file → base64 `ImageData` for vision APIs.
//!
//! `detail: "high"` asks GPT-4-class models for the full tile budget; on a
//! dense handwritten register the low-detail overview loses whole columns.

use crate::error::AgentError;
use crate::page::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Read and base64-encode a page image.
pub async fn encode_page(image: &PageImage) -> Result<ImageData, AgentError> {
    let bytes = image
        .read_bytes()
        .await
        .map_err(|e| AgentError::io(format!("reading page image: {e}")))?;
    Ok(encode_bytes(&bytes, image.mime_type()))
}

pub fn encode_bytes(bytes: &[u8], mime_type: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, mime_type).with_detail("high")
}
