//! Wire framing for replicated log entries.
//!
//! Every proposal's header buffer starts with a fixed-size
//! [`ReplMessageHeader`] followed by the message payload. The header is
//! sealed with a CRC over its own bytes; the payload is covered by a separate
//! CRC-32/IEEE so commit handlers can detect header/payload mismatches
//! independently.

use crate::error::ReplError;

/// Magic stamped on every replication message header.
pub const REPL_MSG_MAGIC: u64 = 0x7265_6566_6d73_6731; // "reefmsg1"

/// Replicated message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplMsgType {
    /// Create a placement group. Payload: stable JSON `PgInfo`.
    CreatePg = 1,
    /// Create a shard. Payload: encoded `ShardInfoSuperblk`.
    CreateShard = 2,
    /// Seal a shard. Payload: encoded `ShardInfoSuperblk`.
    SealShard = 3,
    /// Put a blob. Payload: encoded `BlobHeader`; key buffer carries the
    /// user key; data buffers carry the padded payload.
    PutBlob = 4,
    /// Delete a blob. Payload: encoded `BlobHeader`.
    DelBlob = 5,
}

impl ReplMsgType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::CreatePg),
            2 => Some(Self::CreateShard),
            3 => Some(Self::SealShard),
            4 => Some(Self::PutBlob),
            5 => Some(Self::DelBlob),
            _ => None,
        }
    }
}

/// Fixed-layout header of every replicated message.
///
/// Wire layout, little-endian: magic (8) | msg_type (4) | payload_size (4) |
/// payload_crc (4) | header_crc (4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplMessageHeader {
    magic: u64,
    /// Message kind.
    pub msg_type: ReplMsgType,
    /// Payload length in bytes.
    pub payload_size: u32,
    /// CRC-32/IEEE over the payload bytes.
    pub payload_crc: u32,
    header_crc: u32,
}

impl ReplMessageHeader {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 24;

    /// Build a sealed header for the given payload.
    pub fn new(msg_type: ReplMsgType, payload: &[u8]) -> Self {
        let mut header = Self {
            magic: REPL_MSG_MAGIC,
            msg_type,
            payload_size: payload.len() as u32,
            payload_crc: crc32fast::hash(payload),
            header_crc: 0,
        };
        header.seal();
        header
    }

    /// Recompute the header CRC after any field change.
    pub fn seal(&mut self) {
        self.header_crc = crc32fast::hash(&self.prefix_bytes());
    }

    /// True iff the magic is wrong or the header CRC does not match.
    pub fn corrupted(&self) -> bool {
        self.magic != REPL_MSG_MAGIC || self.header_crc != crc32fast::hash(&self.prefix_bytes())
    }

    /// Whether `payload` matches the sealed size and CRC.
    pub fn payload_matches(&self, payload: &[u8]) -> bool {
        payload.len() == self.payload_size as usize && crc32fast::hash(payload) == self.payload_crc
    }

    fn prefix_bytes(&self) -> [u8; 20] {
        let mut buf = [0u8; 20];
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&(self.msg_type as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_crc.to_le_bytes());
        buf
    }

    /// Encode to the fixed wire form.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..20].copy_from_slice(&self.prefix_bytes());
        buf[20..24].copy_from_slice(&self.header_crc.to_le_bytes());
        buf
    }

    /// Decode from wire bytes without validating the seal; use
    /// [`corrupted`](Self::corrupted) afterwards.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReplError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(ReplError::BadRequest);
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let raw_type = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let msg_type = ReplMsgType::from_u32(raw_type).ok_or(ReplError::BadRequest)?;
        Ok(Self {
            magic,
            msg_type,
            payload_size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            payload_crc: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            header_crc: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        })
    }

    /// Frame a header buffer: sealed header followed by the payload.
    pub fn frame(msg_type: ReplMsgType, payload: &[u8]) -> Vec<u8> {
        let header = Self::new(msg_type, payload);
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Split a framed buffer into its header and payload slice.
    pub fn split(buf: &[u8]) -> Result<(Self, &[u8]), ReplError> {
        let header = Self::from_bytes(buf)?;
        let end = Self::ENCODED_LEN + header.payload_size as usize;
        if buf.len() < end {
            return Err(ReplError::BadRequest);
        }
        Ok((header, &buf[Self::ENCODED_LEN..end]))
    }

    /// Replace the payload of a framed buffer in place, resealing both CRCs.
    ///
    /// The new payload must have the same length as the old one; pre-commit
    /// hooks use this to stamp replica-agreed fields into the payload.
    pub fn reframe_payload(buf: &mut [u8], payload: &[u8]) -> Result<(), ReplError> {
        let mut header = Self::from_bytes(buf)?;
        if payload.len() != header.payload_size as usize
            || buf.len() < Self::ENCODED_LEN + payload.len()
        {
            return Err(ReplError::BadRequest);
        }
        header.payload_crc = crc32fast::hash(payload);
        header.seal();
        buf[0..Self::ENCODED_LEN].copy_from_slice(&header.to_bytes());
        buf[Self::ENCODED_LEN..Self::ENCODED_LEN + payload.len()].copy_from_slice(payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
