//! Reverse image search through a temporary file relay.
//!
//! The lookup service only accepts public URLs, so the image is first staged
//! on a relay, looked up by its URL and then removed again on every path.

use super::{
    FileRelay, ReverseLookup, SimilarImages, SimilarityFinder, StagedFile, capitalize,
    check_status, sniff_mime,
};
use crate::error::{ProviderError, ProviderResult};
use crate::util::generate_id;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stages images on a relay, then queries a reverse lookup.
#[derive(Clone)]
pub struct RelayedSimilarity {
    relay: Arc<dyn FileRelay>,
    lookup: Arc<dyn ReverseLookup>,
    max_similar: usize,
}

impl std::fmt::Debug for RelayedSimilarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayedSimilarity")
            .field("max_similar", &self.max_similar)
            .finish_non_exhaustive()
    }
}

impl RelayedSimilarity {
    /// Combine a relay and a lookup service.
    pub fn new(
        relay: Arc<dyn FileRelay>,
        lookup: Arc<dyn ReverseLookup>,
        max_similar: usize,
    ) -> Self {
        Self {
            relay,
            lookup,
            max_similar,
        }
    }
}

#[async_trait]
impl SimilarityFinder for RelayedSimilarity {
    async fn find_similar(&self, image: &[u8]) -> ProviderResult<SimilarImages> {
        let mime = sniff_mime(image);
        let filename = format!(
            "{}.{}",
            generate_id("img"),
            mime.trim_start_matches("image/")
        );

        let staged = self.relay.stage(image, &filename, mime).await?;
        debug!(id = %staged.id, "image staged on relay");

        let result = self.lookup.lookup(&staged.url).await;

        if let Err(e) = self.relay.remove(&staged.id).await {
            warn!(id = %staged.id, error = %e, "failed to remove staged image");
        }

        let mut found = result?;
        found.title = found.title.as_deref().map(tidy).filter(|s| !s.is_empty());
        found.subtitle = found.subtitle.as_deref().map(tidy).filter(|s| !s.is_empty());
        found.tags = found
            .tags
            .iter()
            .map(|t| capitalize(t))
            .filter(|t| !t.is_empty())
            .collect();
        found.similar_urls.truncate(self.max_similar);

        info!(
            tags = found.tags.len(),
            similar = found.similar_urls.len(),
            "similar images found"
        );
        Ok(found)
    }
}

/// Capitalise and strip trailing punctuation.
fn tidy(text: &str) -> String {
    capitalize(text.trim_matches(|c: char| c == '.' || c.is_whitespace()))
}

/// File relay with a simple HTTP API: multipart `POST` to the endpoint
/// answers `{ "id", "url" }`; `DELETE {endpoint}/{id}` removes the file.
#[derive(Debug, Clone)]
pub struct HttpFileRelay {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFileRelay {
    /// Create a relay client.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl FileRelay for HttpFileRelay {
    async fn stage(&self, data: &[u8], filename: &str, mime: &str) -> ProviderResult<StagedFile> {
        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn remove(&self, id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(format!("{}/{id}", self.endpoint))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    similar: Vec<String>,
    url: Option<String>,
}

/// Reverse lookup service: `GET {endpoint}?url=<image url>`.
#[derive(Debug, Clone)]
pub struct HttpReverseLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReverseLookup {
    /// Create a lookup client.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ReverseLookup for HttpReverseLookup {
    async fn lookup(&self, url: &str) -> ProviderResult<SimilarImages> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url)])
            .send()
            .await?;
        let body: LookupResponse = check_status(response).await?.json().await?;
        Ok(SimilarImages {
            title: body.title,
            subtitle: body.subtitle,
            tags: body.tags,
            similar_urls: body.similar,
            canonical_url: body.url.unwrap_or_default(),
        })
    }
}
