//! Seams between the loader and the outside world.

use bytes::Bytes;
use serde::Serialize;

use crate::error::{FetchError, LoadError, RecompressError};
use crate::objects::ObjectRef;

/// What a load attempt points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "uri", rename_all = "snake_case")]
pub enum ResourceSource {
    Remote(String),
    Local(ObjectRef),
}

impl ResourceSource {
    pub fn uri(&self) -> &str {
        match self {
            ResourceSource::Remote(url) => url,
            ResourceSource::Local(object) => object.as_str(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ResourceSource::Local(_))
    }
}

/// The renderer's native load: resolves on success, errors on failure, and
/// may also never resolve (the loader's per-attempt timeout covers that).
#[async_trait::async_trait]
pub trait ResourceSink: Send + Sync {
    async fn load(&self, source: &ResourceSource) -> Result<(), LoadError>;
}

/// Binary GET used by the recompression tier. Dropping the future aborts it.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Decode, bound to `max_dimension` on the longest edge, re-encode.
pub trait Recompressor: Send + Sync {
    fn recompress(&self, bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, RecompressError>;
}
