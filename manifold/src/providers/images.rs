//! Image attachment loading.
//!
//! Callers pass absolute paths; providers embed the bytes as base64 with a
//! sniffed MIME type. Data URLs are passed through untouched so hosts can
//! forward already-encoded images.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::error::ProviderError;

/// An image ready for the wire: MIME type plus base64 payload.
#[derive(Debug, Clone)]
pub(crate) struct EncodedImage {
    pub mime: String,
    pub data: String,
}

impl EncodedImage {
    /// Render as an OpenAI-style data URL.
    pub(crate) fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// Read and encode one image attachment.
pub(crate) async fn encode_image(path: &Path) -> Result<EncodedImage, ProviderError> {
    if let Some(url) = path.to_str().filter(|p| p.starts_with("data:")) {
        return split_data_url(url);
    }
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        ProviderError::InvalidArgument(format!("cannot read image {}: {e}", path.display()))
    })?;
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned();
    Ok(EncodedImage {
        mime,
        data: STANDARD.encode(bytes),
    })
}

fn split_data_url(url: &str) -> Result<EncodedImage, ProviderError> {
    let rest = url.trim_start_matches("data:");
    let (header, data) = rest.split_once(',').ok_or_else(|| {
        ProviderError::InvalidArgument("malformed data URL in image attachment".to_owned())
    })?;
    let mime = header.trim_end_matches(";base64");
    Ok(EncodedImage {
        mime: if mime.is_empty() { "image/png".to_owned() } else { mime.to_owned() },
        data: data.to_owned(),
    })
}
