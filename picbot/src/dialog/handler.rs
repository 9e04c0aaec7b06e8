//! Dialog runtime: classify, route, transition, then execute effects.

use super::classify::Event;
use super::messages;
use super::routes::RouteTable;
use super::transition::{
    DialogSettings, Effect, Transition, abandon_image, finish_search, transition,
};
use crate::error::{FlowError, FlowResult, ProviderResult};
use crate::events::{ConversationId, ImageRef, InboundMessage};
use crate::orchestrator::{ImageTask, Orchestrator, Outcome};
use crate::services::{Captioner, Services, SimilarImages, SimilarityFinder};
use crate::session::SessionStore;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handles inbound events for every conversation.
///
/// `Dialog` is cheap to clone; the gateway hands a clone to each event task.
#[derive(Clone)]
pub struct Dialog {
    store: SessionStore,
    transport: Arc<dyn Transport>,
    orchestrator: Orchestrator,
    services: Services,
    routes: Arc<RouteTable>,
    settings: Arc<DialogSettings>,
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("settings", &self.settings)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Dialog {
    /// Create a dialog with the standard route table.
    pub fn new(
        store: SessionStore,
        transport: Arc<dyn Transport>,
        services: Services,
        settings: DialogSettings,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(Arc::clone(&transport)),
            store,
            transport,
            services,
            routes: Arc::new(RouteTable::standard()),
            settings: Arc::new(settings),
        }
    }

    /// Use a custom orchestrator (e.g. a different liveness interval).
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// The session store.
    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Handle one inbound event to completion.
    ///
    /// Unmatched events are ignored. Errors are contained to this
    /// conversation; the caller only logs them.
    pub async fn handle(&self, message: InboundMessage) -> FlowResult<()> {
        let conversation = message.conversation.clone();
        let routes = &self.routes;
        let settings = &self.settings;

        let outcome = self
            .store
            .update(&conversation, |session| {
                let event = Event::classify(&message, session.state());
                let step = routes.resolve(&event)?;
                Some(transition(step, &event, session, settings))
            })
            .await?;

        let Some(applied) = outcome else {
            debug!(conversation = %conversation, "no route matched, event ignored");
            return Ok(());
        };
        if applied.is_silent() {
            debug!(
                conversation = %conversation,
                step = applied.step.name(),
                "step had nothing to do"
            );
            return Ok(());
        }
        let Transition {
            step,
            effects,
            missing,
        } = applied;
        if let Some(key) = missing {
            warn!(
                conversation = %conversation,
                step = step.name(),
                error = %FlowError::MissingData(key),
                "conversation reset"
            );
        }
        info!(
            conversation = %conversation,
            step = step.name(),
            effects = effects.len(),
            "step applied"
        );

        // A failed reply must not skip a committed search and its cleanup.
        let mut failed = None;
        for effect in effects {
            if let Err(e) = self.execute(&conversation, effect).await {
                warn!(conversation = %conversation, step = step.name(), error = %e, "effect failed");
                failed.get_or_insert(e);
            }
        }
        failed.map_or(Ok(()), Err)
    }

    async fn execute(&self, conversation: &ConversationId, effect: Effect) -> FlowResult<()> {
        match effect {
            Effect::Reply { text, keyboard } => {
                self.transport.send_text(conversation, &text, keyboard).await?;
            }
            Effect::Search { query, count } => self.search(conversation, &query, count).await?,
            Effect::Describe { image } => {
                let task = DescribeTask {
                    captioner: self.services.captioner.as_ref(),
                    count: self.settings.captions,
                };
                let outcome = self.with_image(conversation, &image, &task).await?;
                if let Some(outcome) = outcome {
                    let text = match outcome {
                        Outcome::Success(captions) => messages::captions(&captions),
                        Outcome::Empty => messages::NO_DESCRIPTION.to_string(),
                        Outcome::Failure(_) => messages::CAPTION_FAILED.to_string(),
                    };
                    self.menu_reply(conversation, text).await?;
                }
            }
            Effect::Answer {
                image,
                question,
                language,
            } => {
                let task = AnswerTask {
                    captioner: self.services.captioner.as_ref(),
                    question: &question,
                    language: language.as_deref(),
                };
                let outcome = self.with_image(conversation, &image, &task).await?;
                if let Some(outcome) = outcome {
                    let text = match outcome {
                        Outcome::Success(answer) => answer,
                        Outcome::Empty => messages::NO_ANSWER.to_string(),
                        Outcome::Failure(_) => messages::CAPTION_FAILED.to_string(),
                    };
                    self.menu_reply(conversation, text).await?;
                }
            }
            Effect::Similar { image } => {
                let task = SimilarTask {
                    finder: self.services.similarity.as_ref(),
                };
                let outcome = self.with_image(conversation, &image, &task).await?;
                match outcome {
                    Some(Outcome::Success(found)) => {
                        let (text, keyboard) = messages::similar(&found);
                        self.transport.send_text(conversation, &text, keyboard).await?;
                    }
                    Some(Outcome::Empty) => {
                        self.menu_reply(conversation, messages::NO_SIMILAR.to_string())
                            .await?;
                    }
                    Some(Outcome::Failure(_)) => {
                        self.store
                            .update(conversation, |session| abandon_image(session, &image))
                            .await?;
                        self.transport
                            .send_text(conversation, messages::SIMILAR_FAILED, None)
                            .await?;
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }

    /// Run the search and deliver what it found, then close the workflow.
    async fn search(&self, conversation: &ConversationId, query: &str, count: u32) -> FlowResult<()> {
        let outcome = self
            .orchestrator
            .run(conversation, self.services.search.search(query, count))
            .await;

        let delivered = async {
            match outcome {
                Outcome::Success(images) => {
                    let total = images.len();
                    let mut sent = 0;
                    for image in images {
                        let filename = image.filename.clone();
                        match self.transport.send_image(conversation, image).await {
                            Ok(()) => sent += 1,
                            Err(e) => {
                                warn!(conversation = %conversation, file = %filename, error = %e, "image not delivered");
                                if let Err(e) = self
                                    .transport
                                    .send_text(conversation, messages::IMAGE_FAILED, None)
                                    .await
                                {
                                    warn!(
                                        conversation = %conversation,
                                        error = %e,
                                        "failure notice not delivered"
                                    );
                                }
                            }
                        }
                    }
                    info!(conversation = %conversation, sent, total, "search results delivered");
                }
                Outcome::Empty => {
                    self.transport
                        .send_text(conversation, messages::NO_IMAGES, None)
                        .await?;
                }
                Outcome::Failure(_) => {
                    self.transport
                        .send_text(conversation, messages::SEARCH_FAILED, None)
                        .await?;
                }
            }
            Ok::<_, FlowError>(())
        }
        .await;

        // The workflow ends whatever happened above.
        self.store.update(conversation, finish_search).await?;
        delivered
    }

    /// Run an image task. A failed acquisition is reported, ends the photo
    /// workflow unless the user already left it, and yields `None`.
    async fn with_image<K: ImageTask>(
        &self,
        conversation: &ConversationId,
        image: &ImageRef,
        task: &K,
    ) -> FlowResult<Option<Outcome<K::Output>>> {
        match self
            .orchestrator
            .run_with_image(conversation, image, self.services.fetcher.as_ref(), task)
            .await
        {
            Ok(outcome) => Ok(Some(outcome)),
            Err(FlowError::Acquire(e)) => {
                warn!(conversation = %conversation, error = %e, "image could not be acquired");
                self.store
                    .update(conversation, |session| abandon_image(session, image))
                    .await?;
                self.transport
                    .send_text(conversation, messages::IMAGE_UNAVAILABLE, None)
                    .await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn menu_reply(&self, conversation: &ConversationId, text: String) -> FlowResult<()> {
        self.transport
            .send_text(conversation, &text, Some(messages::image_menu()))
            .await?;
        Ok(())
    }
}

struct DescribeTask<'a> {
    captioner: &'a dyn Captioner,
    count: u32,
}

#[async_trait]
impl ImageTask for DescribeTask<'_> {
    type Output = Vec<String>;

    async fn run(&self, image: &[u8]) -> ProviderResult<Vec<String>> {
        self.captioner.describe(image, self.count).await
    }
}

struct AnswerTask<'a> {
    captioner: &'a dyn Captioner,
    question: &'a str,
    language: Option<&'a str>,
}

#[async_trait]
impl ImageTask for AnswerTask<'_> {
    type Output = String;

    async fn run(&self, image: &[u8]) -> ProviderResult<String> {
        self.captioner
            .answer(image, self.question, self.language)
            .await
    }
}

struct SimilarTask<'a> {
    finder: &'a dyn SimilarityFinder,
}

#[async_trait]
impl ImageTask for SimilarTask<'_> {
    type Output = SimilarImages;

    async fn run(&self, image: &[u8]) -> ProviderResult<SimilarImages> {
        self.finder.find_similar(image).await
    }
}
