//! Self-describing encoded payloads (data-URI convention)
//!
//! Format: `<scheme>:<content-type>[;param...][;base64],<data>`. Without the
//! `base64` marker the data is percent-encoded text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::error::{Result, StorageError};

/// Content type used when the payload does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Raw bytes plus the content type declared by an encoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub data: Bytes,
    pub content_type: String,
}

/// Decode an encoded payload into bytes and its content type
pub fn decode_data_uri(encoded: &str) -> Result<DecodedPayload> {
    let (header, data) = encoded
        .split_once(',')
        .ok_or_else(|| invalid("missing ',' between metadata and data"))?;

    let (scheme, meta) = header
        .split_once(':')
        .ok_or_else(|| invalid("missing '<scheme>:' prefix"))?;
    if scheme.trim().is_empty() {
        return Err(invalid("empty scheme"));
    }

    let mut segments: Vec<&str> = meta.split(';').collect();
    let is_base64 = segments
        .last()
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("base64"));
    if is_base64 {
        segments.pop();
    }

    let content_type = segments.join(";");
    let content_type = content_type.trim();
    let content_type = if content_type.is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else if content_type.contains('/') {
        content_type.to_string()
    } else {
        return Err(invalid(&format!("invalid content type {:?}", content_type)));
    };

    let data = if is_base64 {
        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| invalid(&format!("bad base64 data: {}", e)))?
    } else {
        urlencoding::decode_binary(data.as_bytes()).into_owned()
    };

    Ok(DecodedPayload {
        data: Bytes::from(data),
        content_type,
    })
}

/// Encode bytes as a base64 data URI
pub fn encode_data_uri(data: &[u8], content_type: &str) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(data))
}

fn invalid(reason: &str) -> StorageError {
    StorageError::InvalidEncoding(reason.to_string())
}
