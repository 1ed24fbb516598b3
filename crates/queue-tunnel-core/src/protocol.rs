//! Wire format of lane messages.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// A message as stored in a lane.
///
/// Stored as a JSON object so that stores which only hold JSON can carry
/// it verbatim: `{"b": 27}` for a single byte, `{"data": "G1tB"}` for a
/// base64 chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LaneMessage {
    /// One raw byte.
    Byte { b: u8 },
    /// A chunk of raw bytes, base64 encoded.
    Chunk { data: String },
}

impl LaneMessage {
    /// Create a single-byte message.
    #[must_use]
    pub const fn byte(b: u8) -> Self {
        Self::Byte { b }
    }

    /// Create a chunk message from raw bytes.
    #[must_use]
    pub fn chunk(data: &[u8]) -> Self {
        Self::Chunk {
            data: BASE64.encode(data),
        }
    }

    /// Decode the carried bytes.
    ///
    /// # Errors
    /// Returns error if a chunk is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Self::Byte { b } => Ok(vec![*b]),
            Self::Chunk { data } => BASE64.decode(data),
        }
    }
}
