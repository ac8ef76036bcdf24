//! Resilient acquisition of remote-generated images.
//!
//! A `ResilientLoader` walks a bounded tier sequence (direct load,
//! cache-busted reload, fetch-and-recompress) and ends either loaded or on a
//! calm fallback that points at the original file.

pub mod error;
pub mod http;
pub mod loader;
pub mod objects;
pub mod policy;
pub mod recompress;
pub mod resource;

pub use error::{FetchError, LoadError, RecompressError, RecompressTierError};
pub use http::{HttpFetcher, HttpImageSink, LoadedImage};
pub use loader::{
    Fallback, LoaderDeps, LoaderHandle, LoaderOptions, LoaderView, ResilientLoader, RetryAttempt,
    TerminalState,
};
pub use objects::{ObjectRef, ObjectStore};
pub use policy::{RetryDecision, RetryPolicy, Tier, next_tier};
pub use recompress::ImageRecompressor;
pub use resource::{Recompressor, ResourceFetcher, ResourceSink, ResourceSource};
