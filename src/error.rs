//! Cache Errors
//!
//! Every fallible operation in the crate reports a [`CacheError`]. Fan-out
//! operations (tiered writes, group deletes) collect the failure of each member
//! into a [`CombinedError`] instead of stopping at the first one.

use std::fmt;
use std::time::Duration;

/// Result alias used throughout the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors reported by backends, the tiered cache, the monitor and the facade
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No entry for the key, or the entry expired
    #[error("cache missed")]
    Miss,

    /// The entry exists but its group changed since it was last observed.
    /// Callers should refetch from the source of truth.
    #[error("cache updated")]
    Updated,

    /// The loader finished without producing a usable value
    #[error("cache get: loader returned no value")]
    LoaderEmpty,

    /// The loader failed; its error is surfaced unchanged
    #[error(transparent)]
    Loader(anyhow::Error),

    /// Stored payload does not have the shape expected for `type_name`
    #[error("failed decoding cached value as {type_name}: {reason}")]
    Decode {
        type_name: &'static str,
        reason: String,
    },

    /// Value could not be turned into a payload
    #[error("failed encoding value of type {type_name}: {reason}")]
    Encode {
        type_name: &'static str,
        reason: String,
    },

    /// I/O or driver failure inside a backend
    #[error("backend {backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: anyhow::Error,
    },

    /// A backend call exceeded its deadline
    #[error("backend {backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },

    /// Several members of a fan-out failed
    #[error(transparent)]
    Combined(CombinedError),
}

impl CacheError {
    /// Wrap a driver error with the name of the backend that produced it
    pub fn backend(backend: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            backend: backend.into(),
            source: source.into(),
        }
    }

    pub(crate) fn decode<T: ?Sized>(reason: impl fmt::Display) -> Self {
        Self::Decode {
            type_name: std::any::type_name::<T>(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode<T: ?Sized>(reason: impl fmt::Display) -> Self {
        Self::Encode {
            type_name: std::any::type_name::<T>(),
            reason: reason.to_string(),
        }
    }

    /// `true` for [`CacheError::Miss`]
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// `true` for [`CacheError::Updated`]
    #[must_use]
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated)
    }

    /// Errors that make the cache-aside path fall through to the loader
    #[must_use]
    pub fn should_refetch(&self) -> bool {
        self.is_miss() || self.is_updated()
    }
}

/// Aggregate of member failures from a fan-out operation
#[derive(Debug, Default)]
pub struct CombinedError {
    errors: Vec<CacheError>,
}

impl CombinedError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CacheError) {
        // Flatten nested fan-outs so callers see one level.
        match err {
            CacheError::Combined(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    /// Record the error of `result`, if any
    pub fn collect(&mut self, result: CacheResult<()>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheError> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing failed, the lone error when one member failed,
    /// otherwise [`CacheError::Combined`]
    ///
    /// # Errors
    ///
    /// Returns the recorded failures.
    pub fn into_result(mut self) -> CacheResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(CacheError::Combined(self)),
        }
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operations failed: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedError {}

impl FromIterator<CacheError> for CombinedError {
    fn from_iter<I: IntoIterator<Item = CacheError>>(iter: I) -> Self {
        let mut combined = Self::new();
        for err in iter {
            combined.push(err);
        }
        combined
    }
}
