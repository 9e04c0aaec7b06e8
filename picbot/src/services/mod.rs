//! External collaborators: image search, captioning, similarity, translation.
//!
//! The dialog only sees the traits defined here. HTTP-backed implementations
//! live in the submodules; [`Unavailable`] stands in for any collaborator
//! whose configuration is missing, so the bot still runs with a subset of
//! features.

pub mod caption;
pub mod fetch;
pub mod google;
pub mod similar;
pub mod translate;

pub use caption::HttpCaptioner;
pub use fetch::{ImageBuffer, LocalFetcher, sniff_mime};
pub use google::GoogleImageSearch;
pub use similar::{HttpFileRelay, HttpReverseLookup, RelayedSimilarity};
pub use translate::{PassthroughTranslator, YandexTranslator};

use crate::config::BotConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::events::{ImagePayload, ImageRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Image search by text query.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// Largest count the provider can return.
    fn max_results(&self) -> u32;

    /// Find up to `count` images for `query`.
    ///
    /// Items that fail to download are skipped, so the result may be shorter
    /// than requested; an empty list means "nothing found".
    async fn search(&self, query: &str, count: u32) -> ProviderResult<Vec<ImagePayload>>;
}

/// Image captioning and visual question answering. Output is already in the
/// reply language.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Produce up to `count` caption sentences.
    async fn describe(&self, image: &[u8], count: u32) -> ProviderResult<Vec<String>>;

    /// Answer `question` about the image. May be empty.
    async fn answer(
        &self,
        image: &[u8],
        question: &str,
        language: Option<&str>,
    ) -> ProviderResult<String>;
}

/// Result of a reverse image lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarImages {
    /// What the image shows, if recognised.
    pub title: Option<String>,
    /// Secondary description.
    pub subtitle: Option<String>,
    /// Related tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// URLs of visually similar images.
    #[serde(default)]
    pub similar_urls: Vec<String>,
    /// Link to the full results page.
    #[serde(default)]
    pub canonical_url: String,
}

impl SimilarImages {
    /// Whether the lookup recognised nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.as_deref().is_none_or(str::is_empty)
            && self.subtitle.as_deref().is_none_or(str::is_empty)
            && self.tags.is_empty()
            && self.similar_urls.is_empty()
    }
}

/// Reverse image search.
#[async_trait]
pub trait SimilarityFinder: Send + Sync {
    /// Look up images similar to `image`.
    async fn find_similar(&self, image: &[u8]) -> ProviderResult<SimilarImages>;
}

/// Machine translation.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `texts` into `target`, auto-detecting the source unless given.
    async fn translate(
        &self,
        texts: &[String],
        target: &str,
        source: Option<&str>,
    ) -> ProviderResult<Vec<String>>;
}

/// A file published under a temporary public URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StagedFile {
    /// Relay-side identifier, used for removal.
    pub id: String,
    /// Public URL.
    pub url: String,
}

/// Temporary public file hosting.
#[async_trait]
pub trait FileRelay: Send + Sync {
    /// Publish `data` and return its handle.
    async fn stage(&self, data: &[u8], filename: &str, mime: &str) -> ProviderResult<StagedFile>;

    /// Remove a previously staged file.
    async fn remove(&self, id: &str) -> ProviderResult<()>;
}

/// Reverse image lookup by public URL.
#[async_trait]
pub trait ReverseLookup: Send + Sync {
    /// Look up the image at `url`.
    async fn lookup(&self, url: &str) -> ProviderResult<SimilarImages>;
}

/// Materialises an [`ImageRef`] into bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the image. The returned buffer is released when dropped.
    async fn fetch(&self, image: &ImageRef) -> ProviderResult<ImageBuffer>;
}

/// Placeholder for a collaborator that is not configured.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable(pub &'static str);

#[async_trait]
impl ImageSearch for Unavailable {
    fn max_results(&self) -> u32 {
        google::MAX_RESULTS
    }

    async fn search(&self, _query: &str, _count: u32) -> ProviderResult<Vec<ImagePayload>> {
        Err(ProviderError::NotConfigured(self.0))
    }
}

#[async_trait]
impl Captioner for Unavailable {
    async fn describe(&self, _image: &[u8], _count: u32) -> ProviderResult<Vec<String>> {
        Err(ProviderError::NotConfigured(self.0))
    }

    async fn answer(
        &self,
        _image: &[u8],
        _question: &str,
        _language: Option<&str>,
    ) -> ProviderResult<String> {
        Err(ProviderError::NotConfigured(self.0))
    }
}

#[async_trait]
impl SimilarityFinder for Unavailable {
    async fn find_similar(&self, _image: &[u8]) -> ProviderResult<SimilarImages> {
        Err(ProviderError::NotConfigured(self.0))
    }
}

/// The set of collaborators the dialog drives.
#[derive(Clone)]
pub struct Services {
    /// Image search.
    pub search: Arc<dyn ImageSearch>,
    /// Captioning and question answering.
    pub captioner: Arc<dyn Captioner>,
    /// Reverse image search.
    pub similarity: Arc<dyn SimilarityFinder>,
    /// Image materialisation.
    pub fetcher: Arc<dyn ImageFetcher>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("max_results", &self.search.max_results())
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Build HTTP-backed collaborators from configuration.
    ///
    /// `remote` resolves platform file ids (Telegram photos); without it only
    /// local and inline images can be fetched.
    pub fn from_config(
        config: &BotConfig,
        remote: Option<Arc<dyn ImageFetcher>>,
    ) -> ProviderResult<Self> {
        let client = http_client()?;

        let search: Arc<dyn ImageSearch> =
            if config.search.api_key.is_empty() || config.search.cx.is_empty() {
                Arc::new(Unavailable("image search"))
            } else {
                Arc::new(GoogleImageSearch::new(client.clone(), &config.search))
            };

        let translator: Arc<dyn Translator> = if config.translate.api_key.is_empty() {
            Arc::new(PassthroughTranslator)
        } else {
            Arc::new(YandexTranslator::new(client.clone(), &config.translate))
        };

        let captioner: Arc<dyn Captioner> = if config.caption.endpoint.is_empty() {
            Arc::new(Unavailable("captioning"))
        } else {
            Arc::new(HttpCaptioner::new(
                client.clone(),
                &config.caption,
                translator,
            ))
        };

        let similarity: Arc<dyn SimilarityFinder> = if config.similarity.relay_endpoint.is_empty()
            || config.similarity.lookup_endpoint.is_empty()
        {
            Arc::new(Unavailable("similar image search"))
        } else {
            Arc::new(RelayedSimilarity::new(
                Arc::new(HttpFileRelay::new(
                    client.clone(),
                    &config.similarity.relay_endpoint,
                )),
                Arc::new(HttpReverseLookup::new(
                    client,
                    &config.similarity.lookup_endpoint,
                )),
                config.similarity.max_similar,
            ))
        };

        Ok(Self {
            search,
            captioner,
            similarity,
            fetcher: Arc::new(LocalFetcher::new(remote)),
        })
    }
}

/// Shared HTTP client for all collaborators.
fn http_client() -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("picbot/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .map_err(ProviderError::from)
}

/// Turn a non-success response into [`ProviderError::Api`].
pub(crate) async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(ProviderError::Api {
        status: status.as_u16(),
        body: crate::util::truncate_str(&body, 200),
    })
}

/// Upper-case the first character, like a sentence.
pub(crate) fn capitalize(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize(" a red tractor "), "A red tractor");
        assert_eq!(capitalize("жёлтый"), "Жёлтый");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_similar_images_is_empty() {
        assert!(SimilarImages::default().is_empty());
        let only_link = SimilarImages {
            canonical_url: "https://example.com".to_string(),
            title: Some(String::new()),
            ..SimilarImages::default()
        };
        assert!(only_link.is_empty());
        let titled = SimilarImages {
            title: Some("Tractor".to_string()),
            ..SimilarImages::default()
        };
        assert!(!titled.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_reports_not_configured() {
        let err = Captioner::describe(&Unavailable("captioning"), b"img", 3)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "captioning is not configured");
    }

    #[test]
    fn test_services_from_default_config() {
        let services = Services::from_config(&BotConfig::default(), None).unwrap();
        assert_eq!(services.search.max_results(), google::MAX_RESULTS);
    }
}
