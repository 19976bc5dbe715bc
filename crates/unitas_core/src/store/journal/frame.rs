//! Journal frame layout.
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The payload is CBOR. The checksum covers the
//! header and the payload.

use crate::entity::{EntityRecord, EntityReference};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use unitas_storage::StorageBackend;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"UJNL";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

pub(crate) const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FrameKind {
    Begin = 1,
    Put = 2,
    Remove = 3,
    Commit = 4,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Remove),
            4 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// Opens a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BeginPayload {
    pub session: String,
    pub version: Version,
    pub time: DateTime<Utc>,
    pub changes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RemovePayload {
    pub reference: EntityReference,
}

/// Seals a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CommitPayload {
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Begin(BeginPayload),
    Put(EntityRecord),
    Remove(RemovePayload),
    Commit(CommitPayload),
}

impl Frame {
    fn kind(&self) -> FrameKind {
        match self {
            Self::Begin(_) => FrameKind::Begin,
            Self::Put(_) => FrameKind::Put,
            Self::Remove(_) => FrameKind::Remove,
            Self::Commit(_) => FrameKind::Commit,
        }
    }

    /// Encodes the frame with header and checksum.
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        match self {
            Self::Begin(p) => ciborium::into_writer(p, &mut payload)?,
            Self::Put(p) => ciborium::into_writer(p, &mut payload)?,
            Self::Remove(p) => ciborium::into_writer(p, &mut payload)?,
            Self::Commit(p) => ciborium::into_writer(p, &mut payload)?,
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::codec(format!("frame payload of {} bytes is too large", payload.len())))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
        buf.push(self.kind() as u8);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> CoreResult<T> {
    Ok(ciborium::from_reader(payload)?)
}

/// Reads the frame at `offset`.
///
/// Returns `Ok(None)` when the bytes from `offset` to `end` hold only part of
/// a frame (a torn tail). Bad magic, an unknown kind, a future version or a
/// checksum mismatch are corruption.
pub(crate) fn read_frame(
    device: &dyn StorageBackend,
    offset: u64,
    end: u64,
) -> CoreResult<Option<(Frame, u64)>> {
    let available = end.saturating_sub(offset);
    if available < HEADER_SIZE as u64 {
        return Ok(None);
    }
    let header = device.read_at(offset, HEADER_SIZE)?;
    if header[0..4] != FRAME_MAGIC {
        return Err(CoreError::corruption(offset, "bad magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version > FRAME_VERSION {
        return Err(CoreError::corruption(offset, format!("unsupported frame version {version}")));
    }
    let kind = FrameKind::from_byte(header[6])
        .ok_or_else(|| CoreError::corruption(offset, format!("unknown frame kind {}", header[6])))?;
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

    let total = (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
    if available < total {
        return Ok(None);
    }
    let body = device.read_at(offset + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
    let (payload, crc_bytes) = body.split_at(payload_len);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(payload);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(CoreError::corruption(
            offset,
            format!("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})"),
        ));
    }

    let frame = match kind {
        FrameKind::Begin => Frame::Begin(decode_payload(payload)?),
        FrameKind::Put => Frame::Put(decode_payload(payload)?),
        FrameKind::Remove => Frame::Remove(decode_payload(payload)?),
        FrameKind::Commit => Frame::Commit(decode_payload(payload)?),
    };
    Ok(Some((frame, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitas_storage::InMemoryBackend;

    fn commit_frame() -> Frame {
        Frame::Commit(CommitPayload {
            session: "s1".into(),
        })
    }

    #[test]
    fn frame_reads_back() {
        let mut device = InMemoryBackend::new();
        let bytes = commit_frame().encode().unwrap();
        device.append(&bytes).unwrap();
        let end = device.size().unwrap();
        let (frame, len) = read_frame(&device, 0, end).unwrap().unwrap();
        assert_eq!(frame, commit_frame());
        assert_eq!(len, bytes.len() as u64);
    }

    #[test]
    fn torn_frame_is_not_an_error() {
        let bytes = commit_frame().encode().unwrap();
        for cut in [0, 5, HEADER_SIZE, bytes.len() - 1] {
            let device = InMemoryBackend::with_data(bytes[..cut].to_vec());
            assert!(read_frame(&device, 0, cut as u64).unwrap().is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn flipped_payload_bit_is_corruption() {
        let mut bytes = commit_frame().encode().unwrap();
        bytes[HEADER_SIZE] ^= 0x01;
        let len = bytes.len() as u64;
        let device = InMemoryBackend::with_data(bytes);
        let err = read_frame(&device, 0, len).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { offset: 0, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = commit_frame().encode().unwrap();
        bytes[0] = b'X';
        let len = bytes.len() as u64;
        let device = InMemoryBackend::with_data(bytes);
        assert!(read_frame(&device, 0, len).is_err());
    }
}
