//! Captioning and visual question answering over HTTP.
//!
//! The service takes a multipart image and answers in the model language;
//! results are translated into the reply language and capitalised here.

use super::{Captioner, Translator, capitalize, check_status, sniff_mime};
use crate::config::CaptionConfig;
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    #[serde(default)]
    captions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    #[serde(default)]
    answer: String,
}

/// Client for a captioning service exposing `POST /caption` and `POST /answer`.
#[derive(Clone)]
pub struct HttpCaptioner {
    client: reqwest::Client,
    endpoint: String,
    model_language: String,
    language: String,
    translator: Arc<dyn Translator>,
}

impl std::fmt::Debug for HttpCaptioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCaptioner")
            .field("endpoint", &self.endpoint)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl HttpCaptioner {
    /// Create a client from configuration.
    pub fn new(
        client: reqwest::Client,
        config: &CaptionConfig,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model_language: config.model_language.clone(),
            language: config.language.clone(),
            translator,
        }
    }

    fn image_part(image: &[u8]) -> ProviderResult<Part> {
        let mime = sniff_mime(image);
        Part::bytes(image.to_vec())
            .file_name(format!("image.{}", mime.trim_start_matches("image/")))
            .mime_str(mime)
            .map_err(|e| ProviderError::Request(e.to_string()))
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, form: Form) -> ProviderResult<T> {
        let response = self
            .client
            .post(format!("{}/{path}", self.endpoint))
            .multipart(form)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Translate model output into `target` and capitalise each sentence.
    async fn localize(&self, texts: Vec<String>, target: &str) -> ProviderResult<Vec<String>> {
        let texts: Vec<String> = texts
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let translated = if target == self.model_language || texts.is_empty() {
            texts
        } else {
            self.translator
                .translate(&texts, target, Some(&self.model_language))
                .await?
        };
        Ok(translated.iter().map(|t| capitalize(t)).collect())
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn describe(&self, image: &[u8], count: u32) -> ProviderResult<Vec<String>> {
        let form = Form::new()
            .part("image", Self::image_part(image)?)
            .text("count", count.max(1).to_string());
        let body: CaptionResponse = self.post("caption", form).await?;
        debug!(captions = body.captions.len(), "captions generated");

        let captions = self.localize(body.captions, &self.language).await?;
        info!(captions = captions.len(), "image described");
        Ok(captions)
    }

    async fn answer(
        &self,
        image: &[u8],
        question: &str,
        language: Option<&str>,
    ) -> ProviderResult<String> {
        let target = language.unwrap_or(&self.language);
        let question = if target == self.model_language {
            question.to_string()
        } else {
            self.translator
                .translate(&[question.to_string()], &self.model_language, None)
                .await?
                .into_iter()
                .next()
                .unwrap_or_else(|| question.to_string())
        };

        let form = Form::new()
            .part("image", Self::image_part(image)?)
            .text("question", question);
        let body: AnswerResponse = self.post("answer", form).await?;

        let answer = self
            .localize(vec![body.answer], target)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        info!(answered = !answer.is_empty(), "question answered");
        Ok(answer)
    }
}
