//! Remote queue transports.
//!
//! Provides:
//! - `MemoryQueue` - In-process queue (feature: memory)
//! - `RestQueue` - Firebase Realtime Database REST queue (feature: rest)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "rest")]
pub mod rest;

#[cfg(feature = "memory")]
pub use memory::MemoryQueue;

#[cfg(feature = "rest")]
pub use rest::RestQueue;
