//! Image materialisation.

use super::ImageFetcher;
use crate::error::{ProviderError, ProviderResult};
use crate::events::ImageRef;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// Image bytes owned by a single operation.
///
/// Dropping the buffer frees the bytes and runs the optional release hook.
pub struct ImageBuffer {
    data: Vec<u8>,
    on_release: Option<ReleaseHook>,
}

impl ImageBuffer {
    /// Wrap bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            on_release: None,
        }
    }

    /// Run `hook` when the buffer is released.
    #[must_use]
    pub fn with_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// The image bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// MIME type guessed from the content.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        sniff_mime(&self.data)
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ImageBuffer {
    fn drop(&mut self) {
        trace!(len = self.data.len(), "image buffer released");
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

/// Guess an image MIME type from its magic bytes, defaulting to JPEG.
#[must_use]
pub fn sniff_mime(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Fetches local and inline images, delegating platform file ids.
#[derive(Clone, Default)]
pub struct LocalFetcher {
    remote: Option<Arc<dyn ImageFetcher>>,
}

impl std::fmt::Debug for LocalFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFetcher")
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

impl LocalFetcher {
    /// Create a fetcher; `remote` handles [`ImageRef::Remote`].
    #[must_use]
    pub fn new(remote: Option<Arc<dyn ImageFetcher>>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ImageFetcher for LocalFetcher {
    async fn fetch(&self, image: &ImageRef) -> ProviderResult<ImageBuffer> {
        match image {
            ImageRef::Local { path } => {
                let data = tokio::fs::read(path).await?;
                Ok(ImageBuffer::new(data))
            }
            ImageRef::Inline { data } => Ok(ImageBuffer::new(data.clone())),
            ImageRef::Remote { .. } => match &self.remote {
                Some(remote) => remote.fetch(image).await,
                None => Err(ProviderError::NotConfigured("remote file download")),
            },
        }
    }
}
