//! Shared fakes for the dialog integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use picbot::dialog::{Dialog, DialogSettings, DialogState};
use picbot::error::{ChannelError, ChannelResult, ProviderError, ProviderResult};
use picbot::events::{ConversationId, ImagePayload, ImageRef, InboundMessage, Keyboard};
use picbot::orchestrator::Orchestrator;
use picbot::services::{
    Captioner, ImageBuffer, ImageFetcher, ImageSearch, Services, SimilarImages, SimilarityFinder,
};
use picbot::session::{MemoryStorage, SessionStore};
use picbot::transport::Transport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Something the dialog sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        conversation: ConversationId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Image {
        conversation: ConversationId,
        filename: String,
    },
    Liveness {
        conversation: ConversationId,
    },
}

/// Records everything; optionally refuses images with a given filename and
/// texts containing a given fragment.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    reject_image: Mutex<Option<String>>,
    reject_text: Mutex<Vec<(String, usize)>>,
}

impl RecordingTransport {
    pub fn reject_image(&self, filename: &str) {
        *self.reject_image.lock().unwrap() = Some(filename.to_string());
    }

    /// Fail the next `times` texts containing `fragment`.
    pub fn reject_text(&self, fragment: &str, times: usize) {
        self.reject_text
            .lock()
            .unwrap()
            .push((fragment.to_string(), times));
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Texts sent to `conversation`, in order.
    pub fn texts(&self, conversation: &ConversationId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text {
                    conversation: c,
                    text,
                    ..
                } if &c == conversation => Some(text),
                _ => None,
            })
            .collect()
    }

    /// The last text and its keyboard.
    pub fn last_text(&self, conversation: &ConversationId) -> Option<(String, Option<Keyboard>)> {
        self.sent().into_iter().rev().find_map(|s| match s {
            Sent::Text {
                conversation: c,
                text,
                keyboard,
            } if &c == conversation => Some((text, keyboard)),
            _ => None,
        })
    }

    pub fn images(&self, conversation: &ConversationId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Image {
                    conversation: c,
                    filename,
                } if &c == conversation => Some(filename),
                _ => None,
            })
            .collect()
    }

    pub fn liveness(&self, conversation: &ConversationId) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Liveness { conversation: c } if c == conversation))
            .count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        conversation: &ConversationId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> ChannelResult<()> {
        {
            let mut rules = self.reject_text.lock().unwrap();
            if let Some((_, left)) = rules
                .iter_mut()
                .find(|(fragment, left)| *left > 0 && text.contains(fragment.as_str()))
            {
                *left -= 1;
                return Err(ChannelError::send("transient"));
            }
        }
        self.sent.lock().unwrap().push(Sent::Text {
            conversation: conversation.clone(),
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn send_image(
        &self,
        conversation: &ConversationId,
        image: ImagePayload,
    ) -> ChannelResult<()> {
        if self.reject_image.lock().unwrap().as_deref() == Some(image.filename.as_str()) {
            return Err(ChannelError::send("photo rejected"));
        }
        self.sent.lock().unwrap().push(Sent::Image {
            conversation: conversation.clone(),
            filename: image.filename,
        });
        Ok(())
    }

    async fn send_liveness(&self, conversation: &ConversationId) -> ChannelResult<()> {
        self.sent.lock().unwrap().push(Sent::Liveness {
            conversation: conversation.clone(),
        });
        Ok(())
    }
}

/// Search returning `available` generated images after `delay`.
pub struct FakeSearch {
    pub available: usize,
    pub delay: Duration,
    pub fail: bool,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<(String, u32)>>,
}

impl FakeSearch {
    pub fn new(available: usize) -> Self {
        Self {
            available,
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSearch for FakeSearch {
    fn max_results(&self) -> u32 {
        50
    }

    async fn search(&self, query: &str, count: u32) -> ProviderResult<Vec<ImagePayload>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), count));
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ProviderError::Api {
                status: 500,
                body: "boom".to_string(),
            });
        }
        let n = self.available.min(count as usize);
        Ok((0..n)
            .map(|i| ImagePayload {
                data: vec![0xFF, 0xD8, 0xFF, i as u8],
                mime: "image/jpeg".to_string(),
                filename: format!("{i:02}.jpg"),
            })
            .collect())
    }
}

/// Captioner with canned output.
pub struct FakeCaptioner {
    pub captions: Vec<String>,
    pub answer: String,
    pub delay: Duration,
    pub fail: bool,
    pub questions: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeCaptioner {
    pub fn new(captions: &[&str], answer: &str) -> Self {
        Self {
            captions: captions.iter().map(|s| (*s).to_string()).collect(),
            answer: answer.to_string(),
            delay: Duration::ZERO,
            fail: false,
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Captioner for FakeCaptioner {
    async fn describe(&self, _image: &[u8], count: u32) -> ProviderResult<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ProviderError::Request("caption service down".to_string()));
        }
        Ok(self.captions.iter().take(count as usize).cloned().collect())
    }

    async fn answer(
        &self,
        _image: &[u8],
        question: &str,
        language: Option<&str>,
    ) -> ProviderResult<String> {
        self.questions
            .lock()
            .unwrap()
            .push((question.to_string(), language.map(str::to_string)));
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ProviderError::Request("caption service down".to_string()));
        }
        Ok(self.answer.clone())
    }
}

/// Similarity finder with a canned result; `None` fails.
pub struct FakeSimilarity {
    pub result: Option<SimilarImages>,
    pub delay: Duration,
}

#[async_trait]
impl SimilarityFinder for FakeSimilarity {
    async fn find_similar(&self, _image: &[u8]) -> ProviderResult<SimilarImages> {
        tokio::time::sleep(self.delay).await;
        self.result
            .clone()
            .ok_or_else(|| ProviderError::Request("lookup failed".to_string()))
    }
}

/// Fetcher that counts acquisitions and releases.
#[derive(Default)]
pub struct CountingFetcher {
    pub fail: bool,
    pub fetched: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl CountingFetcher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for CountingFetcher {
    async fn fetch(&self, _image: &ImageRef) -> ProviderResult<ImageBuffer> {
        if self.fail {
            return Err(ProviderError::Request("file expired".to_string()));
        }
        self.fetched.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        Ok(
            ImageBuffer::new(vec![0x89, b'P', b'N', b'G']).with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }
}

/// A dialog wired to fakes.
pub struct Harness {
    pub dialog: Dialog,
    pub transport: Arc<RecordingTransport>,
    pub search: Arc<FakeSearch>,
    pub captioner: Arc<FakeCaptioner>,
    pub fetcher: Arc<CountingFetcher>,
}

pub struct HarnessBuilder {
    search: FakeSearch,
    captioner: FakeCaptioner,
    similar: Option<SimilarImages>,
    similar_delay: Duration,
    fetcher: CountingFetcher,
    interval: Duration,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            search: FakeSearch::new(50),
            captioner: FakeCaptioner::new(
                &["A red tractor in a field.", "A farm vehicle.", "A tractor."],
                "It is red.",
            ),
            similar: Some(SimilarImages::default()),
            similar_delay: Duration::ZERO,
            fetcher: CountingFetcher::default(),
            interval: Duration::from_secs(60),
        }
    }
}

impl HarnessBuilder {
    pub fn search(mut self, search: FakeSearch) -> Self {
        self.search = search;
        self
    }

    pub fn captioner(mut self, captioner: FakeCaptioner) -> Self {
        self.captioner = captioner;
        self
    }

    pub fn similar(mut self, similar: Option<SimilarImages>) -> Self {
        self.similar = similar;
        self
    }

    pub fn similar_delay(mut self, delay: Duration) -> Self {
        self.similar_delay = delay;
        self
    }

    pub fn fetcher(mut self, fetcher: CountingFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let search = Arc::new(self.search);
        let captioner = Arc::new(self.captioner);
        let fetcher = Arc::new(self.fetcher);

        let services = Services {
            search: Arc::clone(&search) as Arc<dyn ImageSearch>,
            captioner: Arc::clone(&captioner) as Arc<dyn Captioner>,
            similarity: Arc::new(FakeSimilarity {
                result: self.similar,
                delay: self.similar_delay,
            }),
            fetcher: Arc::clone(&fetcher) as Arc<dyn ImageFetcher>,
        };

        let dyn_transport: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
        let orchestrator =
            Orchestrator::new(Arc::clone(&dyn_transport)).with_interval(self.interval);
        let dialog = Dialog::new(
            SessionStore::new(MemoryStorage::new()),
            dyn_transport,
            services,
            DialogSettings::default(),
        )
        .with_orchestrator(orchestrator);

        Harness {
            dialog,
            transport,
            search,
            captioner,
            fetcher,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn text(&self, conversation: &ConversationId, text: &str) {
        self.dialog
            .handle(InboundMessage::text(conversation.clone(), text))
            .await
            .unwrap();
    }

    pub async fn press(&self, conversation: &ConversationId, value: &str) {
        self.dialog
            .handle(InboundMessage::button(conversation.clone(), value))
            .await
            .unwrap();
    }

    pub async fn photo(&self, conversation: &ConversationId) {
        self.dialog
            .handle(InboundMessage::photo(
                conversation.clone(),
                ImageRef::Remote {
                    file_id: "AgADphoto".to_string(),
                },
            ))
            .await
            .unwrap();
    }

    pub async fn state(&self, conversation: &ConversationId) -> DialogState {
        self.dialog.store().get(conversation).await.state()
    }
}

pub fn conv(chat: &str) -> ConversationId {
    ConversationId::new("test", chat)
}
