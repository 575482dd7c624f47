//! Wire encoding for queued payloads.
//!
//! A payload always starts as JSON text. When compression is enabled the
//! JSON is deflated and base64-encoded, and the smaller of the two forms
//! is sent. Tiny or already dense payloads usually come out larger after
//! the transform, in which case the raw JSON goes out unchanged.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::errors::{DomainError, DomainResult};

/// How the body of an outbound mutation is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    Json,
    DeflateBase64,
}

impl PayloadEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadEncoding::Json => "json",
            PayloadEncoding::DeflateBase64 => "deflate_base64",
        }
    }
}

/// A payload ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPayload {
    pub encoding: PayloadEncoding,
    pub body: String,
}

impl PreparedPayload {
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Serialize a payload, applying the deflate+base64 transform only when it wins.
pub fn prepare_payload(payload: &serde_json::Value, compression_enabled: bool) -> DomainResult<PreparedPayload> {
    let json = serde_json::to_string(payload)
        .map_err(|e| DomainError::Compression(format!("Failed to serialize payload: {}", e)))?;

    if !compression_enabled {
        return Ok(PreparedPayload { encoding: PayloadEncoding::Json, body: json });
    }

    let encoded = deflate_base64(&json)?;
    if encoded.len() < json.len() {
        log::debug!("Compressed payload {} -> {} bytes", json.len(), encoded.len());
        Ok(PreparedPayload { encoding: PayloadEncoding::DeflateBase64, body: encoded })
    } else {
        Ok(PreparedPayload { encoding: PayloadEncoding::Json, body: json })
    }
}

/// Inverse of [`prepare_payload`].
pub fn decode_payload(prepared: &PreparedPayload) -> DomainResult<serde_json::Value> {
    let json = match prepared.encoding {
        PayloadEncoding::Json => prepared.body.clone(),
        PayloadEncoding::DeflateBase64 => inflate_base64(&prepared.body)?,
    };
    serde_json::from_str(&json)
        .map_err(|e| DomainError::Compression(format!("Failed to parse payload JSON: {}", e)))
}

fn deflate_base64(text: &str) -> DomainResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())
        .map_err(|e| DomainError::Compression(format!("Compression write error: {}", e)))?;
    let compressed = encoder.finish()
        .map_err(|e| DomainError::Compression(format!("Compression finish error: {}", e)))?;
    Ok(STANDARD.encode(compressed))
}

fn inflate_base64(encoded: &str) -> DomainResult<String> {
    let compressed = STANDARD.decode(encoded)
        .map_err(|e| DomainError::Compression(format!("Invalid base64 body: {}", e)))?;
    let mut decoder = DeflateDecoder::new(compressed.as_slice());
    let mut text = String::new();
    decoder.read_to_string(&mut text)
        .map_err(|e| DomainError::Compression(format!("Decompression error: {}", e)))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_payload_falls_back_to_json() {
        let payload = json!({"note": "test"});
        let raw = serde_json::to_string(&payload).unwrap();
        let prepared = prepare_payload(&payload, true).unwrap();
        assert_eq!(prepared.encoding, PayloadEncoding::Json);
        assert_eq!(prepared.len(), raw.len());
        assert_eq!(prepared.body, raw);
    }

    #[test]
    fn test_repetitive_payload_is_compressed() {
        let rows: Vec<_> = (0..200)
            .map(|i| json!({"item": "fire extinguisher inspected", "status": "pass", "row": i % 4}))
            .collect();
        let payload = json!({"checklist": rows});
        let raw_len = serde_json::to_string(&payload).unwrap().len();

        let prepared = prepare_payload(&payload, true).unwrap();
        assert_eq!(prepared.encoding, PayloadEncoding::DeflateBase64);
        assert!(prepared.len() < raw_len);
        assert_eq!(decode_payload(&prepared).unwrap(), payload);
    }

    #[test]
    fn test_disabled_compression_sends_raw_json() {
        let payload = json!({"notes": "a".repeat(4096)});
        let prepared = prepare_payload(&payload, false).unwrap();
        assert_eq!(prepared.encoding, PayloadEncoding::Json);
        assert_eq!(prepared.body, serde_json::to_string(&payload).unwrap());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let prepared = PreparedPayload { encoding: PayloadEncoding::DeflateBase64, body: "%%%".to_string() };
        assert!(matches!(decode_payload(&prepared), Err(DomainError::Compression(_))));
    }
}
