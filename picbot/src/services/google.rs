//! Google Custom Search image provider.

use super::{ImageSearch, check_status};
use crate::config::SearchConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::events::ImagePayload;
use async_trait::async_trait;
use futures::StreamExt;
use image::imageops::FilterType;
use serde::Deserialize;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// Custom Search JSON API endpoint.
const API_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// The API serves at most this many results per query.
pub const MAX_RESULTS: u32 = 50;

/// Results per page.
const PAGE_SIZE: u32 = 10;

/// Parallel image downloads.
const DOWNLOADS: usize = 4;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchItem {
    link: String,
    #[serde(default)]
    mime: Option<String>,
}

/// Image search over the Custom Search JSON API.
#[derive(Debug, Clone)]
pub struct GoogleImageSearch {
    client: reqwest::Client,
    api_key: String,
    cx: String,
    safe: String,
    file_types: String,
    max_results: u32,
    max_dimension: u32,
    base_url: String,
}

impl GoogleImageSearch {
    /// Create a provider from configuration.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            cx: config.cx.clone(),
            safe: config.safe.clone(),
            file_types: config.file_types.clone(),
            max_results: config.max_results.clamp(1, MAX_RESULTS),
            max_dimension: config.max_dimension,
            base_url: API_URL.to_string(),
        }
    }

    /// Use another API base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn page(&self, query: &str, start: u32, num: u32) -> ProviderResult<Vec<SearchItem>> {
        let mut params = vec![
            ("key", self.api_key.clone()),
            ("cx", self.cx.clone()),
            ("q", query.to_string()),
            ("searchType", "image".to_string()),
            ("num", num.to_string()),
            ("start", start.to_string()),
            ("safe", self.safe.clone()),
        ];
        if !self.file_types.is_empty() {
            params.push(("fileType", self.file_types.clone()));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?;
        let body: SearchResponse = check_status(response).await?.json().await?;
        debug!(start, items = body.items.len(), "search page fetched");
        Ok(body.items)
    }

    async fn download(&self, index: usize, item: &SearchItem) -> ProviderResult<ImagePayload> {
        let response = self.client.get(&item.link).send().await?;
        let response = check_status(response).await?;

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(ProviderError::Decode("empty image body".to_string()));
        }

        let mime = header_mime
            .filter(|m| m.starts_with("image/"))
            .or_else(|| item.mime.clone())
            .or_else(|| {
                mime_guess::from_path(url_path(&item.link))
                    .first()
                    .map(|m| m.essence_str().to_string())
            })
            .unwrap_or_else(|| "image/jpeg".to_string());

        Ok(ImagePayload {
            filename: format!("{index:02}.{}", extension_for(&mime)),
            mime,
            data: shrink(data, self.max_dimension),
        })
    }
}

#[async_trait]
impl ImageSearch for GoogleImageSearch {
    fn max_results(&self) -> u32 {
        self.max_results
    }

    async fn search(&self, query: &str, count: u32) -> ProviderResult<Vec<ImagePayload>> {
        let wanted = count.min(self.max_results);
        let mut items = Vec::new();
        let mut start = 1;

        while (items.len() as u32) < wanted {
            let num = (wanted - items.len() as u32).min(PAGE_SIZE);
            match self.page(query, start, num).await {
                Ok(page) => {
                    let short = (page.len() as u32) < num;
                    items.extend(page);
                    if short {
                        break;
                    }
                }
                // A later page failing still leaves earlier results to deliver.
                Err(e) if !items.is_empty() => {
                    warn!(error = %e, start, "search page failed, keeping earlier results");
                    break;
                }
                Err(e) => return Err(e),
            }
            start += PAGE_SIZE;
        }
        items.truncate(wanted as usize);

        let downloads: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(i, item)| async move {
                match self.download(i, item).await {
                    Ok(image) => Some(image),
                    Err(e) => {
                        warn!(url = %item.link, error = %e, "skipping image");
                        None
                    }
                }
            })
            .collect();
        let images: Vec<ImagePayload> = futures::stream::iter(downloads)
            .buffered(DOWNLOADS)
            .filter_map(|image| async move { image })
            .collect()
            .await;

        info!(query = %query, requested = count, delivered = images.len(), "image search done");
        Ok(images)
    }
}

/// Scale `data` down so neither side exceeds `max_dimension`, keeping its format.
///
/// Images that already fit, or that cannot be decoded, are returned untouched.
fn shrink(data: Vec<u8>, max_dimension: u32) -> Vec<u8> {
    if max_dimension == 0 {
        return data;
    }
    let Ok(format) = image::guess_format(&data) else {
        return data;
    };
    let decoded = match image::load_from_memory_with_format(&data, format) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(error = %e, "image not decoded, sending as is");
            return data;
        }
    };
    if decoded.width() <= max_dimension && decoded.height() <= max_dimension {
        return data;
    }

    let resized = decoded.resize(max_dimension, max_dimension, FilterType::Triangle);
    let mut out = Cursor::new(Vec::new());
    match resized.write_to(&mut out, format) {
        Ok(()) => {
            debug!(
                from = %format_args!("{}x{}", decoded.width(), decoded.height()),
                to = %format_args!("{}x{}", resized.width(), resized.height()),
                "image scaled down"
            );
            out.into_inner()
        }
        Err(e) => {
            warn!(error = %e, "image not re-encoded, sending original");
            data
        }
    }
}

fn url_path(link: &str) -> String {
    url::Url::parse(link).map_or_else(|_| link.to_string(), |u| u.path().to_string())
}

/// File extension for an image MIME type.
fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("img"),
    }
}
