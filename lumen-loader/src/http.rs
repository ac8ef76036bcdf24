//! HTTP-backed fetcher and image sink.

use std::io::Cursor;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use image::ImageReader;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::error::{FetchError, LoadError};
use crate::objects::ObjectStore;
use crate::resource::{ResourceFetcher, ResourceSink, ResourceSource};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    fn parse_content_type(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            _ => return Err(FetchError::InvalidUrl(url.to_string())),
        }

        let response = self
            .client
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        debug!(
            url,
            content_type = ?Self::parse_content_type(response.headers()),
            "Fetched image bytes"
        );

        Ok(response.bytes().await?)
    }
}

/// Dimensions and bytes of the last image an `HttpImageSink` accepted.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Bytes,
}

/// Headless stand-in for a renderer: an attempt succeeds when the bytes
/// behind the source decode as an image header.
#[derive(Debug)]
pub struct HttpImageSink {
    fetcher: HttpFetcher,
    objects: ObjectStore,
    last: Mutex<Option<LoadedImage>>,
}

impl HttpImageSink {
    pub fn new(fetcher: HttpFetcher, objects: ObjectStore) -> Self {
        Self {
            fetcher,
            objects,
            last: Mutex::new(None),
        }
    }

    pub fn last_loaded(&self) -> Option<LoadedImage> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Read width and height without decoding the full image.
pub(crate) fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), LoadError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LoadError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| LoadError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl ResourceSink for HttpImageSink {
    async fn load(&self, source: &ResourceSource) -> Result<(), LoadError> {
        let bytes = match source {
            ResourceSource::Remote(url) => self
                .fetcher
                .fetch(url)
                .await
                .map_err(|e| LoadError::Transport(e.to_string()))?,
            ResourceSource::Local(object) => self
                .objects
                .get(object)
                .ok_or_else(|| LoadError::MissingObject(object.to_string()))?,
        };

        let (width, height) = probe_dimensions(&bytes)?;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(LoadedImage {
            uri: source.uri().to_string(),
            width,
            height,
            bytes,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectStore;

    fn tiny_png() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn probe_reads_dimensions() {
        assert_eq!(probe_dimensions(&tiny_png()).unwrap(), (3, 2));
    }

    #[test]
    fn probe_rejects_garbage() {
        let err = probe_dimensions(b"<html>not found</html>").unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let err = fetcher.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn local_sources_load_from_the_store() {
        let objects = ObjectStore::new();
        let object = objects.create(tiny_png());
        let sink = HttpImageSink::new(HttpFetcher::new(Duration::from_secs(1)).unwrap(), objects.clone());

        sink.load(&ResourceSource::Local(object.clone())).await.unwrap();
        let loaded = sink.last_loaded().unwrap();
        assert_eq!((loaded.width, loaded.height), (3, 2));
        assert_eq!(loaded.uri, object.as_str());

        objects.revoke(&object);
        let err = sink.load(&ResourceSource::Local(object)).await.unwrap_err();
        assert!(matches!(err, LoadError::MissingObject(_)));
    }
}
