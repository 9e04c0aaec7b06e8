//! Translation providers.

use super::{Translator, check_status};
use crate::config::TranslateConfig;
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Yandex Cloud Translate v2 endpoint.
const API_URL: &str = "https://translate.api.cloud.yandex.net/translate/v2/translate";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest<'a> {
    texts: &'a [String],
    target_language_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_language_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

/// Yandex Cloud translation client.
#[derive(Debug, Clone)]
pub struct YandexTranslator {
    client: reqwest::Client,
    api_key: String,
    folder_id: Option<String>,
    base_url: String,
}

impl YandexTranslator {
    /// Create a client from configuration.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &TranslateConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            folder_id: config.folder_id.clone(),
            base_url: API_URL.to_string(),
        }
    }

    /// Use another endpoint.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Translator for YandexTranslator {
    async fn translate(
        &self,
        texts: &[String],
        target: &str,
        source: Option<&str>,
    ) -> ProviderResult<Vec<String>> {
        if texts.is_empty() || source == Some(target) {
            return Ok(texts.to_vec());
        }

        let request = TranslateRequest {
            texts,
            target_language_code: target,
            source_language_code: source,
            folder_id: self.folder_id.as_deref(),
        };
        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .json(&request)
            .send()
            .await?;
        let body: TranslateResponse = check_status(response).await?.json().await?;

        if body.translations.len() != texts.len() {
            return Err(ProviderError::Decode(format!(
                "expected {} translations, got {}",
                texts.len(),
                body.translations.len()
            )));
        }
        debug!(count = texts.len(), target, "texts translated");
        Ok(body.translations.into_iter().map(|t| t.text).collect())
    }
}

/// Returns texts unchanged. Used when no translation key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(
        &self,
        texts: &[String],
        _target: &str,
        _source: Option<&str>,
    ) -> ProviderResult<Vec<String>> {
        Ok(texts.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let texts = vec!["a red tractor".to_string()];
        let request = TranslateRequest {
            texts: &texts,
            target_language_code: "ru",
            source_language_code: Some("en"),
            folder_id: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["targetLanguageCode"], "ru");
        assert_eq!(json["sourceLanguageCode"], "en");
        assert!(json.get("folderId").is_none());
    }

    #[tokio::test]
    async fn test_same_language_skips_request() {
        let translator = YandexTranslator::new(reqwest::Client::new(), &TranslateConfig::default())
            .with_base_url("http://127.0.0.1:9/unreachable");
        let texts = vec!["hello".to_string()];
        let out = translator.translate(&texts, "en", Some("en")).await.unwrap();
        assert_eq!(out, texts);
    }

    #[tokio::test]
    async fn test_passthrough() {
        let texts = vec!["hello".to_string()];
        let out = PassthroughTranslator
            .translate(&texts, "ru", None)
            .await
            .unwrap();
        assert_eq!(out, texts);
    }
}
