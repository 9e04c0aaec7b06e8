//! Route table: ordered `(state, kind, predicate) -> step` bindings.
//!
//! The table is built once and never mutated; the first matching route wins
//! and an event no route accepts is ignored.

use super::classify::{ContentKind, Event};
use super::messages::actions;
use super::state::DialogState;
use regex::Regex;
use std::sync::LazyLock;

/// Workflow step selected for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// `/start`: reset and greet.
    Start,
    /// `/help`: greet without touching state.
    Help,
    /// Store a search query and ask for a count.
    CollectQuery,
    /// Numeric reply to the count prompt.
    ChooseCount,
    /// Non-numeric reply to the count prompt.
    RepromptCount,
    /// Cancel a pending search.
    CancelSearch,
    /// Cancel with nothing pending.
    Dismiss,
    /// Store a photo and show the action menu.
    OpenImageMenu,
    /// Caption the stored photo.
    Describe,
    /// Ask for a question about the stored photo.
    AskQuestion,
    /// Reverse-search the stored photo.
    FindSimilar,
    /// Anything else in the image menu.
    LeaveImageMenu,
    /// Answer a question about the stored photo.
    AnswerQuestion,
    /// Abandon the pending question.
    CancelQuestion,
}

impl Step {
    /// Stable name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::CollectQuery => "collect_query",
            Self::ChooseCount => "choose_count",
            Self::RepromptCount => "reprompt_count",
            Self::CancelSearch => "cancel_search",
            Self::Dismiss => "dismiss",
            Self::OpenImageMenu => "open_image_menu",
            Self::Describe => "describe",
            Self::AskQuestion => "ask_question",
            Self::FindSimilar => "find_similar",
            Self::LeaveImageMenu => "leave_image_menu",
            Self::AnswerQuestion => "answer_question",
            Self::CancelQuestion => "cancel_question",
        }
    }
}

/// Content-value predicate of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Any value.
    Any,
    /// Exact membership in a set.
    OneOf(&'static [&'static str]),
    /// An optionally signed integer.
    Numeric,
    /// Contains the cancel word anywhere, case-insensitively.
    Cancel,
}

impl Predicate {
    /// Whether `value` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(set) => set.contains(&value),
            Self::Numeric => NUMERIC_RE.is_match(value),
            Self::Cancel => CANCEL_RE.is_match(value),
        }
    }
}

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[+-]?\d+\s*$").expect("valid regex"));

static CANCEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cancel").expect("valid regex"));

/// Parse a value accepted by [`Predicate::Numeric`].
///
/// Values too large for `i64` saturate, so an absurd request still counts as
/// "more than the maximum" rather than as garbage.
#[must_use]
pub fn parse_count(value: &str) -> Option<i64> {
    let value = value.trim();
    if !NUMERIC_RE.is_match(value) {
        return None;
    }
    value.parse::<i64>().ok().or_else(|| {
        if value.starts_with('-') {
            Some(i64::MIN)
        } else {
            Some(i64::MAX)
        }
    })
}

/// One binding in the route table.
#[derive(Debug, Clone)]
pub struct Route {
    /// Required state, or `None` for any state.
    pub state: Option<DialogState>,
    /// Required content kind.
    pub kind: ContentKind,
    /// Required content value.
    pub predicate: Predicate,
    /// Step to run on match.
    pub step: Step,
}

impl Route {
    /// Whether this route accepts `event`.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.state.is_none_or(|s| s == event.state)
            && self.kind == event.kind
            && self.predicate.matches(&event.value)
    }
}

/// Ordered, immutable list of routes.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from routes in priority order.
    #[must_use]
    pub const fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The assistant's routes.
    #[must_use]
    pub fn standard() -> Self {
        use ContentKind::{Button, Photo, Text};
        use DialogState::{AwaitingQuestion, AwaitingResultCount, Idle, ImageMenu};

        let route = |state, kind, predicate, step| Route {
            state,
            kind,
            predicate,
            step,
        };

        Self::new(vec![
            route(None, Text, Predicate::OneOf(&["/start"]), Step::Start),
            route(None, Text, Predicate::OneOf(&["/help"]), Step::Help),
            route(Some(Idle), Text, Predicate::Cancel, Step::Dismiss),
            route(Some(Idle), Text, Predicate::Any, Step::CollectQuery),
            route(Some(Idle), Photo, Predicate::Any, Step::OpenImageMenu),
            route(Some(AwaitingResultCount), Text, Predicate::Cancel, Step::CancelSearch),
            route(Some(AwaitingResultCount), Button, Predicate::Cancel, Step::CancelSearch),
            route(Some(AwaitingResultCount), Text, Predicate::Numeric, Step::ChooseCount),
            route(Some(AwaitingResultCount), Button, Predicate::Numeric, Step::ChooseCount),
            route(Some(AwaitingResultCount), Text, Predicate::Any, Step::RepromptCount),
            route(
                Some(ImageMenu),
                Button,
                Predicate::OneOf(&[actions::DESCRIBE]),
                Step::Describe,
            ),
            route(
                Some(ImageMenu),
                Button,
                Predicate::OneOf(&[actions::QUESTION]),
                Step::AskQuestion,
            ),
            route(
                Some(ImageMenu),
                Button,
                Predicate::OneOf(&[actions::SIMILAR]),
                Step::FindSimilar,
            ),
            route(Some(ImageMenu), Button, Predicate::Any, Step::LeaveImageMenu),
            route(Some(ImageMenu), Text, Predicate::Any, Step::LeaveImageMenu),
            route(Some(ImageMenu), Photo, Predicate::Any, Step::LeaveImageMenu),
            route(Some(AwaitingQuestion), Button, Predicate::Cancel, Step::CancelQuestion),
            route(Some(AwaitingQuestion), Text, Predicate::Any, Step::AnswerQuestion),
        ])
    }

    /// First step whose route accepts `event`.
    #[must_use]
    pub fn resolve(&self, event: &Event) -> Option<Step> {
        self.routes
            .iter()
            .find(|route| route.matches(event))
            .map(|route| route.step)
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::standard()
    }
}
