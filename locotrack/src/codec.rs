//! Wire format for tracker → ingest datagrams.
//!
//! # Format
//!
//! ```text
//! gzip( json_text ++ signature )
//!
//! json_text = {"hostname": "...", "termux_locations": {"<ts>": {...}, ...}}
//! signature = hex(xxh3_128(json_text ++ psk))      // always 32 characters
//! ```
//!
//! The signature is appended without a delimiter; the receiver splits it off
//! at a fixed offset from the end. The pre-shared key only authenticates the
//! payload, nothing is encrypted.
//!
//! Records are parsed one at a time after the signature check: an entry with
//! a non-integer key or an unrecognized shape is skipped and counted, the
//! rest of the batch still goes through.
//!
//! Serialization is deterministic for a given batch (ordered map, fixed field
//! order), but the receiver never re-serializes: it verifies the signature
//! over the exact text it received.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

use crate::ingest::CredentialTable;
use crate::record::{Batch, Envelope, Record};

/// Length of the hex signature appended to the JSON text.
pub const SIGNATURE_LEN: usize = 32;

/// Largest payload that fits in a single UDP datagram over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Errors produced while building a datagram.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to compress payload: {0}")]
    Compress(#[from] std::io::Error),

    #[error("Payload of {size} bytes exceeds the {max} byte datagram limit")]
    TooLarge { size: usize, max: usize },
}

/// Why a received datagram was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not a well-formed envelope.
    #[error("Malformed datagram: {0}")]
    Format(String),

    /// The hostname is unknown.
    #[error("Unknown host '{0}'")]
    UnknownHost(String),

    /// The signature does not match the payload and the host's key.
    #[error("Bad signature from host '{hostname}'")]
    BadSignature { hostname: String },
}

impl DecodeError {
    /// True for authentication failures (as opposed to malformed payloads).
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            DecodeError::UnknownHost(_) | DecodeError::BadSignature { .. }
        )
    }
}

/// Compute the keyed signature of `text` under `psk`.
pub fn signature(text: &str, psk: &str) -> String {
    let mut keyed = Vec::with_capacity(text.len() + psk.len());
    keyed.extend_from_slice(text.as_bytes());
    keyed.extend_from_slice(psk.as_bytes());
    format!("{:032x}", xxh3_128(&keyed))
}

/// gzip-compress a byte slice.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Size in bytes of the gzip-compressed JSON serialization of a batch.
pub fn compressed_size(batch: &Batch) -> Result<usize, CodecError> {
    let json = serde_json::to_vec(batch)?;
    Ok(gzip(&json)?.len())
}

/// Build the signed, compressed datagram for a batch.
pub fn encode(hostname: &str, batch: &Batch, psk: &str) -> Result<Vec<u8>, CodecError> {
    let envelope = EnvelopeRef {
        hostname,
        termux_locations: batch,
    };
    let mut text = serde_json::to_string(&envelope)?;
    let sig = signature(&text, psk);
    text.push_str(&sig);

    let payload = gzip(text.as_bytes())?;
    if payload.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge {
            size: payload.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(payload)
}

/// Decompress, parse and authenticate a received datagram.
pub fn decode(payload: &[u8], credentials: &CredentialTable) -> Result<Envelope, DecodeError> {
    let mut text = String::new();
    GzDecoder::new(payload)
        .read_to_string(&mut text)
        .map_err(|e| DecodeError::Format(format!("not a gzip UTF-8 payload: {}", e)))?;

    if text.len() < SIGNATURE_LEN {
        return Err(DecodeError::Format(format!(
            "payload too short ({} bytes)",
            text.len()
        )));
    }
    let split = text.len() - SIGNATURE_LEN;
    if !text.is_char_boundary(split) {
        return Err(DecodeError::Format("signature is not ASCII".to_string()));
    }
    let (json_text, received_sig) = text.split_at(split);

    let raw: RawEnvelope = serde_json::from_str(json_text)
        .map_err(|e| DecodeError::Format(format!("invalid JSON: {}", e)))?;

    let credential = credentials
        .get(&raw.hostname)
        .ok_or_else(|| DecodeError::UnknownHost(raw.hostname.clone()))?;

    if signature(json_text, &credential.psk) != received_sig {
        return Err(DecodeError::BadSignature {
            hostname: raw.hostname,
        });
    }

    let mut envelope = Envelope {
        hostname: raw.hostname,
        termux_locations: Batch::new(),
        skipped_records: 0,
    };
    for (key, value) in raw.termux_locations {
        let timestamp = match key.parse::<i64>() {
            Ok(ts) => ts,
            Err(_) => {
                debug!(host = %envelope.hostname, key = %key, "Record key is not a timestamp");
                envelope.skipped_records += 1;
                continue;
            }
        };
        match serde_json::from_value::<Record>(value) {
            Ok(record) => {
                envelope.termux_locations.insert(timestamp, record);
            }
            Err(e) => {
                debug!(host = %envelope.hostname, ts = timestamp, error = %e, "Record does not parse");
                envelope.skipped_records += 1;
            }
        }
    }

    Ok(envelope)
}

/// Envelope as received, before its records are parsed.
#[derive(serde::Deserialize)]
struct RawEnvelope {
    hostname: String,
    termux_locations: serde_json::Map<String, serde_json::Value>,
}

/// Borrowing twin of [`Envelope`] so encoding does not clone the batch.
#[derive(serde::Serialize)]
struct EnvelopeRef<'a> {
    hostname: &'a str,
    termux_locations: &'a Batch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::HostCredential;
    use crate::record::{Location, Record};

    fn credentials() -> CredentialTable {
        let mut table = CredentialTable::default();
        table.insert(
            "dev1",
            HostCredential {
                host_id: 1,
                psk: "secret".to_string(),
            },
        );
        table
    }

    fn sample_batch() -> Batch {
        let mut batch = Batch::new();
        batch.insert(
            1_700_000_000,
            Record::Location(Location {
                latitude: Some(45.0),
                longitude: Some(9.0),
                altitude: Some(100.0),
                speed: None,
                bearing: None,
                provider: Some("gps".to_string()),
                accuracy: Some(5.0),
                elapsed_ms: Some(200),
            }),
        );
        batch.insert(1_700_000_005, Record::command_error("timed out"));
        batch
    }

    #[test]
    fn test_signature_is_32_lowercase_hex() {
        let sig = signature("{}", "secret");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(sig, signature("{}", "other"));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let batch = sample_batch();
        let payload = encode("dev1", &batch, "secret").unwrap();

        let envelope = decode(&payload, &credentials()).unwrap();
        assert_eq!(envelope.hostname, "dev1");
        assert_eq!(envelope.termux_locations, batch);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let batch = sample_batch();
        assert_eq!(
            encode("dev1", &batch, "secret").unwrap(),
            encode("dev1", &batch, "secret").unwrap()
        );
    }

    #[test]
    fn test_wrong_key_is_auth_failure() {
        let payload = encode("dev1", &sample_batch(), "not-the-key").unwrap();
        let err = decode(&payload, &credentials()).unwrap_err();
        assert!(matches!(err, DecodeError::BadSignature { .. }));
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_unknown_host_is_auth_failure() {
        let payload = encode("intruder", &sample_batch(), "secret").unwrap();
        let err = decode(&payload, &credentials()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownHost(ref h) if h == "intruder"));
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let batch = sample_batch();
        let envelope = EnvelopeRef {
            hostname: "dev1",
            termux_locations: &batch,
        };
        let text = serde_json::to_string(&envelope).unwrap();
        let sig = signature(&text, "secret");
        let tampered = text.replace("45.0", "46.0") + &sig;

        let err = decode(&gzip(tampered.as_bytes()).unwrap(), &credentials()).unwrap_err();
        assert!(matches!(err, DecodeError::BadSignature { .. }));
    }

    #[test]
    fn test_garbage_is_format_failure() {
        let err = decode(b"definitely not gzip", &credentials()).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
        assert!(!err.is_auth_failure());

        let short = gzip(b"abc").unwrap();
        assert!(matches!(
            decode(&short, &credentials()),
            Err(DecodeError::Format(_))
        ));

        let bad_json = gzip(format!("{{not json{}", "0".repeat(SIGNATURE_LEN)).as_bytes()).unwrap();
        assert!(matches!(
            decode(&bad_json, &credentials()),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn test_unparseable_records_are_skipped() {
        let text = r#"{"hostname":"dev1","termux_locations":{
            "1700000000":{"latitude":45.0,"longitude":9.0},
            "1700000005":{"latitude":"x"},
            "soon":{"error":"e"},
            "1700000010":{"API_ERROR":"denied"}}}"#;
        let payload = gzip(format!("{}{}", text, signature(text, "secret")).as_bytes()).unwrap();

        let envelope = decode(&payload, &credentials()).unwrap();
        assert_eq!(envelope.skipped_records, 2);
        assert_eq!(
            envelope.termux_locations.keys().copied().collect::<Vec<_>>(),
            vec![1_700_000_000, 1_700_000_010]
        );
        assert_eq!(
            envelope.termux_locations[&1_700_000_010],
            Record::api_error("denied")
        );
    }

    #[test]
    fn test_oversized_batch_is_rejected() {
        let mut batch = Batch::new();
        // Incompressible-ish messages so gzip cannot shrink below the limit.
        for i in 0..20_000i64 {
            let noise = format!("{:032x}", xxh3_128(&i.to_le_bytes()));
            batch.insert(i, Record::command_error(noise));
        }
        assert!(matches!(
            encode("dev1", &batch, "secret"),
            Err(CodecError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_compressed_size_grows_with_content() {
        let empty = compressed_size(&Batch::new()).unwrap();
        let full = compressed_size(&sample_batch()).unwrap();
        assert!(full > empty);
    }
}
