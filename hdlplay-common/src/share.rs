//! Share links: a program and its version packed into a URL fragment

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("Failed to encode share payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Share link is not a recognised encoding")]
    Malformed,
}

/// Program state carried in a share link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedProgram {
    #[serde(rename = "av", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl SharedProgram {
    pub fn new(version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            source: Some(source.into()),
        }
    }
}

/// Encodes a program as a URL fragment (without the leading `#`).
pub fn encode(program: &SharedProgram) -> Result<String, ShareError> {
    let json = serde_json::to_string(program)?;
    Ok(STANDARD.encode(json))
}

/// Builds a complete share URL by placing the encoded program in the fragment.
pub fn share_url(base: &str, program: &SharedProgram) -> Result<Url, ShareError> {
    let mut url = Url::parse(base)?;
    url.set_fragment(Some(&encode(program)?));
    Ok(url)
}

/// Decodes a fragment, a `#fragment` or a complete share URL.
///
/// The current encoding is base64 JSON. Links produced before it used
/// percent-encoded JSON, which is accepted as a fallback.
pub fn decode(link: &str) -> Result<SharedProgram, ShareError> {
    let fragment = match link.split_once('#') {
        Some((_, fragment)) => fragment,
        None => link,
    };
    if fragment.is_empty() {
        return Err(ShareError::Malformed);
    }

    if let Some(program) = decode_base64(fragment) {
        return Ok(program);
    }
    match decode_legacy(fragment) {
        Some(program) => {
            tracing::debug!("Decoded legacy share link");
            Ok(program)
        }
        None => Err(ShareError::Malformed),
    }
}

fn decode_base64(fragment: &str) -> Option<SharedProgram> {
    let bytes = STANDARD.decode(fragment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn decode_legacy(fragment: &str) -> Option<SharedProgram> {
    // Legacy links turned only the first `+` back into a space.
    let fragment = fragment.replacen('+', "%20", 1);
    let text = percent_encoding::percent_decode_str(&fragment)
        .decode_utf8()
        .ok()?;
    serde_json::from_str(&text).ok()
}
