//! JSON Codec using `serde_json`

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
///
/// This is the envelope format: a structured value `v` is stored as
/// `{"data": v}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::encode::<T>(e))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::decode::<T>(e))
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}
