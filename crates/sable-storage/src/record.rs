//! Tagged record framing
//!
//! Every stored record is `[u32 little-endian kind][postcard payload]`. The
//! kind lets a loader skip and delete records it no longer understands.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{StorageError, StorageResult};

/// Type discriminant of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKind(pub u32);

impl RecordKind {
    /// Per-peer reputation counters
    pub const PEER_REPUTATION: RecordKind = RecordKind(1);
    /// Signed router record
    pub const PEER_INFO: RecordKind = RecordKind(2);
}

/// Frame a value with its kind
pub fn encode_record<T: Serialize>(kind: RecordKind, value: &T) -> StorageResult<Vec<u8>> {
    let mut out = kind.0.to_le_bytes().to_vec();
    let payload =
        postcard::to_allocvec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Split a framed record into its kind and decode the payload when the kind
/// matches `expected`
///
/// Returns `Ok(None)` for a record of another kind.
pub fn decode_record<T: DeserializeOwned>(
    expected: RecordKind,
    data: &[u8],
) -> StorageResult<Option<T>> {
    if data.len() < 4 {
        return Err(StorageError::deserialization(format!(
            "record of {} bytes has no kind",
            data.len()
        )));
    }
    let kind = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if kind != expected.0 {
        return Ok(None);
    }
    postcard::from_bytes(&data[4..])
        .map(Some)
        .map_err(|e| StorageError::deserialization(e.to_string()))
}
