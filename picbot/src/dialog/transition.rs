//! Workflow steps as synchronous session transitions.
//!
//! A step runs inside [`SessionStore::update`](crate::session::SessionStore::update),
//! so it sees and changes the session atomically. It never performs I/O: the
//! outbound messages and external calls it wants are returned as [`Effect`]s
//! and executed by the dialog after the session lock is released.

use super::classify::Event;
use super::messages;
use super::routes::{Step, parse_count};
use super::state::DialogState;
use crate::events::{ImageRef, Keyboard};
use crate::session::Session;

/// Session key holding the pending search query.
pub const QUERY_KEY: &str = "query";
/// Session key holding the submitted photo.
pub const IMAGE_KEY: &str = "image";
/// Session key marking a search that has been handed to the provider.
pub const SEARCH_PENDING_KEY: &str = "search_pending";

/// Dialog tuning shared by all conversations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogSettings {
    /// Provider maximum for a search.
    pub max_results: u32,
    /// Counts above this get a "will take a while" notice.
    pub slow_threshold: u32,
    /// Quick-pick buttons for the count prompt.
    pub count_buttons: Vec<u32>,
    /// Captions requested per describe.
    pub captions: u32,
}

impl Default for DialogSettings {
    fn default() -> Self {
        Self {
            max_results: 50,
            slow_threshold: 14,
            count_buttons: vec![1, 5, 10, 20, 40, 50],
            captions: 3,
        }
    }
}

/// Work requested by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a text message.
    Reply {
        /// Message text.
        text: String,
        /// Optional keyboard.
        keyboard: Option<Keyboard>,
    },
    /// Run an image search and deliver the results.
    Search {
        /// Query text.
        query: String,
        /// Effective count.
        count: u32,
    },
    /// Caption the photo.
    Describe {
        /// The photo.
        image: ImageRef,
    },
    /// Answer a question about the photo.
    Answer {
        /// The photo.
        image: ImageRef,
        /// The question.
        question: String,
        /// Reply language, if known.
        language: Option<String>,
    },
    /// Reverse-search the photo.
    Similar {
        /// The photo.
        image: ImageRef,
    },
}

impl Effect {
    fn reply(text: impl Into<String>) -> Self {
        Self::Reply {
            text: text.into(),
            keyboard: None,
        }
    }

    fn reply_with(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self::Reply {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The step that ran.
    pub step: Step,
    /// Requested work, in order.
    pub effects: Vec<Effect>,
    /// Session key the step needed but did not find.
    pub missing: Option<&'static str>,
}

impl Transition {
    fn new(step: Step) -> Self {
        Self {
            step,
            effects: Vec::new(),
            missing: None,
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Whether the step ended up doing nothing visible.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Run `step` against `session`.
#[must_use]
pub fn transition(
    step: Step,
    event: &Event,
    session: &mut Session,
    settings: &DialogSettings,
) -> Transition {
    let t = Transition::new(step);
    match step {
        Step::Start => {
            session.reset();
            t.with_effect(Effect::reply(messages::HELP))
        }

        Step::Help => t.with_effect(Effect::reply(messages::HELP)),

        Step::CollectQuery => {
            session.reset();
            session.set(QUERY_KEY, &event.value);
            session.set_state(DialogState::AwaitingResultCount);
            t.with_effect(Effect::reply_with(
                messages::count_prompt(settings.max_results),
                messages::count_keyboard(&settings.count_buttons),
            ))
        }

        Step::RepromptCount => t.with_effect(Effect::reply_with(
            messages::count_reprompt(settings.max_results),
            messages::count_keyboard(&settings.count_buttons),
        )),

        Step::CancelSearch => {
            session.reset();
            t.with_effect(Effect::reply(messages::SEARCH_CANCELLED))
        }

        Step::Dismiss => {
            session.reset();
            t
        }

        Step::ChooseCount => choose_count(t, event, session, settings),

        Step::OpenImageMenu => match &event.image {
            Some(image) => {
                session.reset();
                session.set(IMAGE_KEY, image);
                session.set_state(DialogState::ImageMenu);
                t.with_effect(Effect::reply_with(messages::MENU_PROMPT, messages::image_menu()))
            }
            None => protocol_error(t, session, IMAGE_KEY),
        },

        Step::Describe => match session.get::<ImageRef>(IMAGE_KEY) {
            Some(image) => t.with_effect(Effect::Describe { image }),
            None => protocol_error(t, session, IMAGE_KEY),
        },

        Step::FindSimilar => match session.get::<ImageRef>(IMAGE_KEY) {
            Some(image) => t.with_effect(Effect::Similar { image }),
            None => protocol_error(t, session, IMAGE_KEY),
        },

        Step::AskQuestion => {
            if !session.contains(IMAGE_KEY) {
                return protocol_error(t, session, IMAGE_KEY);
            }
            session.set_state(DialogState::AwaitingQuestion);
            t.with_effect(Effect::reply_with(
                messages::QUESTION_PROMPT,
                messages::question_keyboard(),
            ))
        }

        Step::LeaveImageMenu => {
            session.reset();
            t.with_effect(Effect::reply(messages::MENU_CLOSED))
        }

        Step::AnswerQuestion => match session.get::<ImageRef>(IMAGE_KEY) {
            Some(image) => {
                session.set_state(DialogState::ImageMenu);
                t.with_effect(Effect::Answer {
                    image,
                    question: event.value.clone(),
                    language: event.language.clone(),
                })
            }
            None => protocol_error(t, session, IMAGE_KEY),
        },

        Step::CancelQuestion => {
            if !session.contains(IMAGE_KEY) {
                return protocol_error(t, session, IMAGE_KEY);
            }
            session.set_state(DialogState::ImageMenu);
            t.with_effect(Effect::reply_with(messages::MENU_PROMPT, messages::image_menu()))
        }
    }
}

fn choose_count(
    t: Transition,
    event: &Event,
    session: &mut Session,
    settings: &DialogSettings,
) -> Transition {
    let Some(requested) = parse_count(&event.value) else {
        return t.with_effect(Effect::reply_with(
            messages::count_reprompt(settings.max_results),
            messages::count_keyboard(&settings.count_buttons),
        ));
    };

    // A duplicate of a reply whose search already started.
    if session.contains(SEARCH_PENDING_KEY) {
        return t;
    }

    let Some(query) = session.take::<String>(QUERY_KEY) else {
        return protocol_error(t, session, QUERY_KEY);
    };

    if requested < 1 {
        session.reset();
        return t.with_effect(Effect::reply(messages::COUNT_DECLINED));
    }

    let max = settings.max_results.max(1);
    let count = u32::try_from(requested).unwrap_or(u32::MAX).min(max);

    // The state stays put until the search finishes so that duplicates of
    // this reply are recognised above instead of starting a new query.
    session.set(SEARCH_PENDING_KEY, &true);

    let mut t = t;
    if requested > i64::from(max) {
        t = t.with_effect(Effect::reply(messages::clamp_warning(max)));
    }
    if count > settings.slow_threshold {
        t = t.with_effect(Effect::reply(messages::slow_advisory(count)));
    }
    t.with_effect(Effect::reply(messages::searching(&query, count)))
        .with_effect(Effect::Search { query, count })
}

fn protocol_error(mut t: Transition, session: &mut Session, missing: &'static str) -> Transition {
    session.reset();
    t.missing = Some(missing);
    t.with_effect(Effect::reply(messages::PROTOCOL_ERROR))
}

/// Close a finished search: back to `Idle` unless the user already moved on.
pub fn finish_search(session: &mut Session) {
    if session.state() == DialogState::AwaitingResultCount && session.contains(SEARCH_PENDING_KEY)
    {
        session.reset();
    }
}

/// Drop the photo workflow after its operation failed, unless the user
/// already moved on to another photo or workflow.
pub fn abandon_image(session: &mut Session, image: &ImageRef) -> bool {
    let current = matches!(
        session.state(),
        DialogState::ImageMenu | DialogState::AwaitingQuestion
    ) && session.get::<ImageRef>(IMAGE_KEY).as_ref() == Some(image);
    if current {
        session.reset();
    }
    current
}
