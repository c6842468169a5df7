//! Cache Codec Implementations
//!
//! Built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait
//! used for structured (envelope) payloads.

mod json;
pub use json::JsonCodec;
