//! Operation orchestrator: runs one external call on behalf of a conversation.
//!
//! Each call is announced with a "working" notice, kept alive with periodic
//! liveness signals until it resolves, and summarised into an [`Outcome`].
//! Calls for one conversation run one at a time behind an operation gate that
//! is separate from the session lock, so a slow call never blocks session
//! updates and never blocks other conversations. Nothing is retried.

use crate::dialog::messages;
use crate::error::{FlowError, FlowResult, ProviderError, ProviderResult};
use crate::events::{ConversationId, ImagePayload, ImageRef};
use crate::services::{ImageFetcher, SimilarImages};
use crate::session::KeyedLocks;
use crate::transport::Transport;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default period between liveness signals.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(4);

/// Summary of one external call.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The call produced a usable payload.
    Success(T),
    /// The call succeeded but found nothing.
    Empty,
    /// The call failed.
    Failure(ProviderError),
}

impl<T: Payload> Outcome<T> {
    /// Classify a collaborator result.
    pub fn from_result(result: ProviderResult<T>) -> Self {
        match result {
            Ok(payload) if payload.is_empty_payload() => Self::Empty,
            Ok(payload) => Self::Success(payload),
            Err(e) => Self::Failure(e),
        }
    }
}

impl<T> Outcome<T> {
    /// Short label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Empty => "empty",
            Self::Failure(_) => "failure",
        }
    }
}

/// Payloads that can be "successfully empty".
pub trait Payload {
    /// Whether the payload carries nothing worth showing.
    fn is_empty_payload(&self) -> bool;
}

impl Payload for String {
    fn is_empty_payload(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Payload for Vec<String> {
    fn is_empty_payload(&self) -> bool {
        self.iter().all(|s| s.trim().is_empty())
    }
}

impl Payload for Vec<ImagePayload> {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

impl Payload for SimilarImages {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

/// An operation over the bytes of one image.
#[async_trait]
pub trait ImageTask: Send + Sync {
    /// Result payload.
    type Output: Payload + Send;

    /// Run against `image`. The bytes are only valid for this call.
    async fn run(&self, image: &[u8]) -> ProviderResult<Self::Output>;
}

/// Runs external calls with liveness signalling and per-conversation gating.
#[derive(Clone)]
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    interval: Duration,
    gate: KeyedLocks,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator reporting through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            interval: DEFAULT_LIVENESS_INTERVAL,
            gate: KeyedLocks::new(),
        }
    }

    /// Set the liveness interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Liveness interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `call` for `conversation`.
    pub async fn run<T, F>(&self, conversation: &ConversationId, call: F) -> Outcome<T>
    where
        T: Payload,
        F: Future<Output = ProviderResult<T>> + Send,
    {
        let _gate = self.gate.lock(&conversation.key()).await;
        let outcome = Outcome::from_result(self.with_liveness(conversation, call).await);
        log_outcome(conversation, &outcome);
        outcome
    }

    /// Materialise `image`, run `task` on its bytes and release them.
    ///
    /// The buffer is dropped before this returns on every path, including
    /// task failure. A failed fetch is reported as [`FlowError::Acquire`].
    pub async fn run_with_image<K: ImageTask>(
        &self,
        conversation: &ConversationId,
        image: &ImageRef,
        fetcher: &dyn ImageFetcher,
        task: &K,
    ) -> FlowResult<Outcome<K::Output>> {
        let _gate = self.gate.lock(&conversation.key()).await;
        let result = self
            .with_liveness(conversation, async {
                let buffer = fetcher.fetch(image).await.map_err(FlowError::Acquire)?;
                debug!(conversation = %conversation, len = buffer.len(), "image acquired");
                let result = task.run(buffer.bytes()).await;
                drop(buffer);
                Ok::<_, FlowError>(result)
            })
            .await;

        let outcome = Outcome::from_result(result?);
        log_outcome(conversation, &outcome);
        Ok(outcome)
    }

    /// Send the working notice, then liveness signals until `call` resolves.
    async fn with_liveness<F: Future>(&self, conversation: &ConversationId, call: F) -> F::Output {
        if let Err(e) = self
            .transport
            .send_text(conversation, messages::WORKING, None)
            .await
        {
            debug!(conversation = %conversation, error = %e, "working notice not delivered");
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(call);

        loop {
            tokio::select! {
                out = &mut call => return out,
                _ = ticker.tick() => {
                    if let Err(e) = self.transport.send_liveness(conversation).await {
                        debug!(conversation = %conversation, error = %e, "liveness signal not delivered");
                    }
                }
            }
        }
    }
}

fn log_outcome<T>(conversation: &ConversationId, outcome: &Outcome<T>) {
    match outcome {
        Outcome::Failure(e) => {
            warn!(conversation = %conversation, error = %e, "external operation failed");
        }
        other => debug!(conversation = %conversation, outcome = other.label(), "operation finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelResult;
    use crate::events::Keyboard;
    use crate::services::ImageBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingTransport {
        texts: Mutex<Vec<String>>,
        liveness: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send_text(
            &self,
            _conversation: &ConversationId,
            text: &str,
            _keyboard: Option<Keyboard>,
        ) -> ChannelResult<()> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_image(
            &self,
            _conversation: &ConversationId,
            _image: ImagePayload,
        ) -> ChannelResult<()> {
            Ok(())
        }

        async fn send_liveness(&self, _conversation: &ConversationId) -> ChannelResult<()> {
            self.liveness.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ReleaseCountingFetcher {
        released: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ImageFetcher for ReleaseCountingFetcher {
        async fn fetch(&self, _image: &ImageRef) -> ProviderResult<ImageBuffer> {
            if self.fail {
                return Err(ProviderError::Request("gone".to_string()));
            }
            let released = Arc::clone(&self.released);
            Ok(ImageBuffer::new(vec![1, 2, 3]).with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    struct Echo(ProviderResult<String>);

    #[async_trait]
    impl ImageTask for Echo {
        type Output = String;

        async fn run(&self, image: &[u8]) -> ProviderResult<String> {
            assert_eq!(image, &[1, 2, 3]);
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(ProviderError::Decode("bad".to_string())),
            }
        }
    }

    fn conv() -> ConversationId {
        ConversationId::new("test", "1")
    }

    #[tokio::test]
    async fn test_outcome_classification() {
        let transport = Arc::new(CountingTransport::default());
        let orch = Orchestrator::new(transport.clone());

        let ok = orch.run(&conv(), async { Ok("answer".to_string()) }).await;
        assert!(matches!(ok, Outcome::Success(ref s) if s == "answer"));

        let empty = orch.run(&conv(), async { Ok(String::new()) }).await;
        assert!(matches!(empty, Outcome::Empty));

        let failed = orch
            .run(&conv(), async {
                Err::<String, _>(ProviderError::NotConfigured("captioning"))
            })
            .await;
        assert!(matches!(failed, Outcome::Failure(_)));

        assert_eq!(transport.texts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_liveness_signals_while_pending() {
        let transport = Arc::new(CountingTransport::default());
        let orch = Orchestrator::new(transport.clone()).with_interval(Duration::from_millis(20));

        let out = orch
            .run(&conv(), async {
                tokio::time::sleep(Duration::from_millis(110)).await;
                Ok(vec!["a".to_string()])
            })
            .await;
        assert!(matches!(out, Outcome::Success(_)));

        let beats = transport.liveness.load(Ordering::SeqCst);
        assert!(beats >= 2, "expected liveness signals, got {beats}");
        assert_eq!(
            transport.texts.lock().unwrap().as_slice(),
            &[messages::WORKING.to_string()]
        );
    }

    #[tokio::test]
    async fn test_buffer_released_on_every_path() {
        let transport = Arc::new(CountingTransport::default());
        let orch = Orchestrator::new(transport);
        let released = Arc::new(AtomicUsize::new(0));
        let fetcher = ReleaseCountingFetcher {
            released: Arc::clone(&released),
            fail: false,
        };
        let image = ImageRef::Inline { data: vec![] };

        let ok = orch
            .run_with_image(&conv(), &image, &fetcher, &Echo(Ok("hi".to_string())))
            .await
            .unwrap();
        assert!(matches!(ok, Outcome::Success(_)));

        let empty = orch
            .run_with_image(&conv(), &image, &fetcher, &Echo(Ok(String::new())))
            .await
            .unwrap();
        assert!(matches!(empty, Outcome::Empty));

        let failed = orch
            .run_with_image(
                &conv(),
                &image,
                &fetcher,
                &Echo(Err(ProviderError::Decode(String::new()))),
            )
            .await
            .unwrap();
        assert!(matches!(failed, Outcome::Failure(_)));

        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_acquisition() {
        let orch = Orchestrator::new(Arc::new(CountingTransport::default()));
        let fetcher = ReleaseCountingFetcher {
            released: Arc::new(AtomicUsize::new(0)),
            fail: true,
        };
        let result = orch
            .run_with_image(
                &conv(),
                &ImageRef::Inline { data: vec![] },
                &fetcher,
                &Echo(Ok("unused".to_string())),
            )
            .await;
        assert!(matches!(result, Err(FlowError::Acquire(_))));
    }

    #[tokio::test]
    async fn test_operations_serialised_per_conversation() {
        let orch = Orchestrator::new(Arc::new(CountingTransport::default()));
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let orch = orch.clone();
            let running = Arc::clone(&running);
            let overlap = Arc::clone(&overlap);
            tasks.push(tokio::spawn(async move {
                orch.run(&conv(), async move {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok("done".to_string())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
