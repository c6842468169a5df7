//! Value Codec
//!
//! Converts typed values to byte payloads and back.
//!
//! Primitive scalars (integers of every width, `f32`/`f64`, `bool`, `String`)
//! are written in their canonical textual form with no wrapper. Every other
//! type is wrapped in an envelope `{"data": value}` and serialized with
//! [`JsonCodec`]. Because no type tag is stored next to the payload, the
//! decoder relies on `T` to know which form to expect.
//!
//! Type tags end up in keys shared between processes, so they are fixed
//! strings chosen per type rather than compiler-generated type names.
//!
//! # Example
//!
//! ```rust
//! use ctx_cache::codec::{decode, encode};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct User { id: u64, name: String }
//! ctx_cache::impl_cacheable!(User);
//!
//! assert_eq!(encode(&42_i64).unwrap(), b"42");
//! let bytes = encode(&User { id: 1, name: "alice".into() }).unwrap();
//! assert_eq!(bytes, br#"{"data":{"id":1,"name":"alice"}}"#);
//! let user: User = decode(&bytes).unwrap();
//! assert_eq!(user.name, "alice");
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{BuildHasher, Hash};
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheCodec;

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// A value that can be stored through the facade
///
/// Structured types only need to name their tag, usually through
/// [`impl_cacheable!`](crate::impl_cacheable); the encoding defaults to the
/// envelope.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable discriminator mixed into composite keys so the same
    /// `(group, key)` can hold values of different types. Must not change
    /// between builds, or previously written entries become unreachable.
    fn type_tag() -> Cow<'static, str>;

    /// Whether the value is written in raw primitive form
    fn is_primitive() -> bool {
        false
    }

    /// Encode to a payload
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`] if serialization fails.
    fn encode(&self) -> CacheResult<Vec<u8>> {
        JsonCodec.serialize(&EnvelopeRef { data: self })
    }

    /// Decode from a payload
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`] naming `Self` when the payload is malformed.
    fn decode(bytes: &[u8]) -> CacheResult<Self> {
        decode_envelope::<Self>(bytes)
    }
}

/// Encode `value` with its type's rule
///
/// # Errors
///
/// See [`Cacheable::encode`].
pub fn encode<T: Cacheable>(value: &T) -> CacheResult<Vec<u8>> {
    value.encode()
}

/// Decode a payload as `T`
///
/// # Errors
///
/// See [`Cacheable::decode`].
pub fn decode<T: Cacheable>(bytes: &[u8]) -> CacheResult<T> {
    T::decode(bytes)
}

/// Whether `T` takes the raw primitive path
#[must_use]
pub fn is_primitive<T: Cacheable>() -> bool {
    T::is_primitive()
}

fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    match JsonCodec.deserialize::<Envelope<T>>(bytes) {
        Ok(envelope) => Ok(envelope.data),
        Err(CacheError::Decode { reason, .. }) => Err(CacheError::Decode {
            type_name: std::any::type_name::<T>(),
            reason,
        }),
        Err(other) => Err(other),
    }
}

fn decode_primitive<T>(bytes: &[u8]) -> CacheResult<T>
where
    T: FromStr + DeserializeOwned,
    T::Err: std::fmt::Display,
{
    let text = std::str::from_utf8(bytes).map_err(|e| CacheError::decode::<T>(e))?;
    match text.parse::<T>() {
        Ok(value) => Ok(value),
        Err(parse_err) => {
            // Values written before the raw rule existed are enveloped or bare JSON.
            if let Ok(value) = decode_envelope::<T>(bytes) {
                return Ok(value);
            }
            serde_json::from_slice::<T>(bytes).map_err(|_| CacheError::decode::<T>(parse_err))
        }
    }
}

macro_rules! primitive_cacheable {
    ($($ty:ty),* $(,)?) => {$(
        impl Cacheable for $ty {
            fn type_tag() -> Cow<'static, str> {
                Cow::Borrowed(stringify!($ty))
            }

            fn is_primitive() -> bool {
                true
            }

            fn encode(&self) -> CacheResult<Vec<u8>> {
                Ok(self.to_string().into_bytes())
            }

            fn decode(bytes: &[u8]) -> CacheResult<Self> {
                decode_primitive::<Self>(bytes)
            }
        }
    )*};
}

primitive_cacheable!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool
);

impl Cacheable for String {
    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("String")
    }

    fn is_primitive() -> bool {
        true
    }

    fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> CacheResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CacheError::decode::<Self>(e))
    }
}

// Pointer wrappers share the pointee's tag and encoding.
impl<T: Cacheable> Cacheable for Box<T> {
    fn type_tag() -> Cow<'static, str> {
        T::type_tag()
    }

    fn is_primitive() -> bool {
        T::is_primitive()
    }

    fn encode(&self) -> CacheResult<Vec<u8>> {
        (**self).encode()
    }

    fn decode(bytes: &[u8]) -> CacheResult<Self> {
        T::decode(bytes).map(Box::new)
    }
}

impl<T: Cacheable> Cacheable for Arc<T> {
    fn type_tag() -> Cow<'static, str> {
        T::type_tag()
    }

    fn is_primitive() -> bool {
        T::is_primitive()
    }

    fn encode(&self) -> CacheResult<Vec<u8>> {
        (**self).encode()
    }

    fn decode(bytes: &[u8]) -> CacheResult<Self> {
        T::decode(bytes).map(Arc::new)
    }
}

impl<T: Cacheable> Cacheable for Vec<T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("Vec<{}>", T::type_tag()))
    }
}

impl<T: Cacheable> Cacheable for Option<T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("Option<{}>", T::type_tag()))
    }
}

// The hasher does not change the stored form, so it is left out of the tag.
impl<T, S> Cacheable for HashSet<T, S>
where
    T: Cacheable + Eq + Hash,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("HashSet<{}>", T::type_tag()))
    }
}

impl<K, V, S> Cacheable for HashMap<K, V, S>
where
    K: Cacheable + Eq + Hash,
    V: Cacheable,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("HashMap<{},{}>", K::type_tag(), V::type_tag()))
    }
}

impl<T: Cacheable + Ord> Cacheable for BTreeSet<T> {
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("BTreeSet<{}>", T::type_tag()))
    }
}

impl<K, V> Cacheable for BTreeMap<K, V>
where
    K: Cacheable + Ord,
    V: Cacheable,
{
    fn type_tag() -> Cow<'static, str> {
        Cow::Owned(format!("BTreeMap<{},{}>", K::type_tag(), V::type_tag()))
    }
}

impl Cacheable for serde_json::Value {
    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("JsonValue")
    }
}

/// Implement [`Cacheable`] with the envelope encoding for one or more types
///
/// The tag is the type as written in the invocation, or an explicit string
/// after `=>`. Use the explicit form when two types share a name or when a
/// type is renamed but its stored entries must stay reachable.
///
/// ```rust
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Order { id: u64 }
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Invoice { id: u64 }
///
/// ctx_cache::impl_cacheable!(Order);
/// ctx_cache::impl_cacheable!(Invoice => "billing.Invoice");
///
/// use ctx_cache::Cacheable;
/// assert_eq!(Order::type_tag(), "Order");
/// assert_eq!(Invoice::type_tag(), "billing.Invoice");
/// ```
#[macro_export]
macro_rules! impl_cacheable {
    ($($ty:ty => $tag:expr),+ $(,)?) => {
        $(impl $crate::codec::Cacheable for $ty {
            fn type_tag() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($tag)
            }
        })+
    };
    ($($ty:ty),+ $(,)?) => {
        $(impl $crate::codec::Cacheable for $ty {
            fn type_tag() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed(stringify!($ty))
            }
        })+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        tags: Vec<String>,
        score: f64,
    }

    crate::impl_cacheable!(Profile);

    #[test]
    fn test_integer_extremes_round_trip() {
        assert_eq!(decode::<i64>(&encode(&i64::MIN).unwrap()).unwrap(), i64::MIN);
        assert_eq!(decode::<u64>(&encode(&u64::MAX).unwrap()).unwrap(), u64::MAX);
        assert_eq!(decode::<i128>(&encode(&i128::MAX).unwrap()).unwrap(), i128::MAX);
        assert_eq!(decode::<u8>(b"255").unwrap(), 255);
    }

    #[test]
    fn test_floats_use_shortest_form() {
        assert_eq!(encode(&0.1_f64).unwrap(), b"0.1");
        assert_eq!(encode(&1.5_f32).unwrap(), b"1.5");
        let tricky = 0.1_f64 + 0.2_f64;
        assert_eq!(decode::<f64>(&encode(&tricky).unwrap()).unwrap(), tricky);
        assert_eq!(decode::<f32>(&encode(&f32::MIN_POSITIVE).unwrap()).unwrap(), f32::MIN_POSITIVE);
    }

    #[test]
    fn test_bool_and_string_are_raw() {
        assert_eq!(encode(&true).unwrap(), b"true");
        assert!(!decode::<bool>(b"false").unwrap());
        assert_eq!(encode(&"héllo".to_string()).unwrap(), "héllo".as_bytes());
        assert_eq!(decode::<String>(b"plain text").unwrap(), "plain text");
    }

    #[test]
    fn test_structured_values_use_envelope() {
        let profile = Profile {
            id: 7,
            tags: vec!["a".into(), "b".into()],
            score: 2.25,
        };
        let bytes = encode(&profile).unwrap();
        assert!(bytes.starts_with(br#"{"data":"#));
        assert_eq!(decode::<Profile>(&bytes).unwrap(), profile);
    }

    #[test]
    fn test_primitive_predicate() {
        assert!(is_primitive::<i32>());
        assert!(is_primitive::<f64>());
        assert!(is_primitive::<String>());
        assert!(is_primitive::<Box<u16>>());
        assert!(!is_primitive::<Profile>());
        assert!(!is_primitive::<Vec<i32>>());
    }

    #[test]
    fn test_legacy_enveloped_primitive_still_decodes() {
        assert_eq!(decode::<i64>(br#"{"data":99}"#).unwrap(), 99);
        assert!(decode::<bool>(br#"{"data":true}"#).unwrap());
    }

    #[test]
    fn test_decode_error_names_type() {
        match decode::<u32>(b"not-a-number") {
            Err(CacheError::Decode { type_name, .. }) => assert_eq!(type_name, "u32"),
            other => panic!("expected decode error, got {other:?}"),
        }
        match decode::<Profile>(b"{\"wrong\":1}") {
            Err(CacheError::Decode { type_name, .. }) => assert!(type_name.ends_with("Profile")),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_pointer_wrappers_share_tag() {
        assert_eq!(<Box<Profile>>::type_tag(), Profile::type_tag());
        assert_eq!(<Arc<i64>>::type_tag(), i64::type_tag());
        assert_ne!(i64::type_tag(), i32::type_tag());
        assert_ne!(String::type_tag(), <Vec<String>>::type_tag());
    }

    #[test]
    fn test_type_tags_are_fixed_strings() {
        assert_eq!(Profile::type_tag(), "Profile");
        assert_eq!(i64::type_tag(), "i64");
        assert_eq!(<HashSet<String>>::type_tag(), "HashSet<String>");
        assert_eq!(<Vec<Option<u8>>>::type_tag(), "Vec<Option<u8>>");
        assert_eq!(<BTreeMap<String, Vec<Profile>>>::type_tag(), "BTreeMap<String,Vec<Profile>>");
        assert_eq!(serde_json::Value::type_tag(), "JsonValue");
    }
}
