//! Splitting a byte stream into lane messages and back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LaneMessage;

/// Default batch cap in bytes.
pub const DEFAULT_BATCH_CAP: usize = 128;

/// Largest accepted batch cap.
pub const MAX_BATCH_CAP: usize = 64 * 1024;

/// Read buffer used with the per-byte strategy.
const PER_BYTE_READ_SIZE: usize = 1024;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Chunking strategy.
///
/// Both endpoints of a session must be configured with the same strategy;
/// there is no negotiation. Decoding accepts either message form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChunkCodec {
    /// One message per byte.
    PerByte,
    /// One message per read burst of at most `cap` bytes.
    Batched { cap: usize },
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::Batched {
            cap: DEFAULT_BATCH_CAP,
        }
    }
}

impl ChunkCodec {
    /// Size of the local read buffer for this strategy.
    #[must_use]
    pub const fn read_size(self) -> usize {
        match self {
            Self::PerByte => PER_BYTE_READ_SIZE,
            Self::Batched { cap } => cap,
        }
    }

    /// Split `bytes` into messages, in push order.
    #[must_use]
    pub fn encode(self, bytes: &[u8]) -> Vec<LaneMessage> {
        match self {
            Self::PerByte => bytes.iter().copied().map(LaneMessage::byte).collect(),
            Self::Batched { cap } => bytes.chunks(cap.max(1)).map(LaneMessage::chunk).collect(),
        }
    }

    /// Recover the bytes carried by one message.
    ///
    /// # Errors
    /// Returns error if the payload cannot be decoded.
    pub fn decode(message: &LaneMessage) -> Result<Vec<u8>, CodecError> {
        Ok(message.decode()?)
    }
}
