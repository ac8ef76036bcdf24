//! Loader error types.

/// A load attempt failed; the loader treats every variant as transient.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not a decodable image: {0}")]
    Decode(String),

    #[error("object reference {0} is not live")]
    MissingObject(String),
}

/// Binary fetch for recompression failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

/// Decode or re-encode failed.
#[derive(Debug, thiserror::Error)]
pub enum RecompressError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("recompression task failed: {0}")]
    Task(String),
}

/// Anything that ends the recompression tier.
#[derive(Debug, thiserror::Error)]
pub enum RecompressTierError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Recompress(#[from] RecompressError),

    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),
}
