//! Core abstractions for tunneling a terminal session over an ordered
//! remote queue.
//!
//! This crate provides the fundamental building blocks:
//! - `QueueTransport` - The push / fetch-all / delete capability
//! - `LaneMessage` - Wire format of a lane entry
//! - `ChunkCodec` - Per-byte and batched chunking strategies
//! - `TunnelConfig` - Configuration shared by both endpoints

pub mod codec;
pub mod config;
pub mod protocol;
pub mod traits;

pub use codec::{ChunkCodec, CodecError};
pub use config::{CodecKind, ConfigError, TunnelConfig};
pub use protocol::LaneMessage;
pub use traits::{
    Lane, LaneRef, MessageKey, QueueTransport, SessionName, SessionStatus, TransportError,
};
