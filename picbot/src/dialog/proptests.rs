//! Property-based tests for routing and transitions.

use super::classify::{ContentKind, Event};
use super::routes::{RouteTable, Step};
use super::state::DialogState;
use super::transition::*;
use crate::events::{ConversationId, ImageRef};
use crate::session::Session;
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

fn arb_state() -> impl Strategy<Value = DialogState> {
    prop_oneof![
        Just(DialogState::Idle),
        Just(DialogState::AwaitingResultCount),
        Just(DialogState::ImageMenu),
        Just(DialogState::AwaitingQuestion),
    ]
}

fn arb_kind() -> impl Strategy<Value = ContentKind> {
    prop_oneof![
        Just(ContentKind::Text),
        Just(ContentKind::Photo),
        Just(ContentKind::Button),
    ]
}

fn arb_value() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/start".to_string()),
        Just("/help".to_string()),
        Just("describe".to_string()),
        Just("question".to_string()),
        Just("similar".to_string()),
        Just("❌ Cancel".to_string()),
        any::<i64>().prop_map(|n| n.to_string()),
        "[a-z ]{1,20}",
    ]
}

/// A session in `state`, optionally carrying the keys a workflow leaves.
fn arb_session() -> impl Strategy<Value = Session> {
    (arb_state(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(state, query, image, pending)| {
            let mut s = Session::new("test:1");
            s.set_state(state);
            if query {
                s.set(QUERY_KEY, &"red tractor");
            }
            if image {
                s.set(
                    IMAGE_KEY,
                    &ImageRef::Remote {
                        file_id: "f".to_string(),
                    },
                );
            }
            if pending {
                s.set(SEARCH_PENDING_KEY, &true);
            }
            s
        },
    )
}

fn event(state: DialogState, kind: ContentKind, value: &str) -> Event {
    Event {
        conversation: ConversationId::new("test", "1"),
        state,
        kind,
        value: if kind == ContentKind::Photo {
            String::new()
        } else {
            value.to_string()
        },
        image: (kind == ContentKind::Photo).then(|| ImageRef::Remote {
            file_id: "new".to_string(),
        }),
        language: None,
    }
}

fn snapshot(s: &Session) -> (DialogState, Vec<Option<serde_json::Value>>) {
    (
        s.state(),
        [QUERY_KEY, IMAGE_KEY, SEARCH_PENDING_KEY]
            .iter()
            .map(|k| s.get::<serde_json::Value>(k))
            .collect(),
    )
}

fn apply(
    table: &RouteTable,
    session: &mut Session,
    kind: ContentKind,
    value: &str,
) -> Option<Transition> {
    let ev = event(session.state(), kind, value);
    let step = table.resolve(&ev)?;
    Some(transition(step, &ev, session, &DialogSettings::default()))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Same (state, event) always yields the same step, effects and session.
    #[test]
    fn transition_is_deterministic(
        session in arb_session(),
        kind in arb_kind(),
        value in arb_value(),
    ) {
        let table = RouteTable::standard();
        let mut a = session.clone();
        let mut b = session;

        let ta = apply(&table, &mut a, kind, &value);
        let tb = apply(&table, &mut b, kind, &value);

        prop_assert_eq!(ta, tb);
        prop_assert_eq!(snapshot(&a), snapshot(&b));
    }

    /// Repeated cancels from a search or the image menu always end in a
    /// clean `Idle` and never start a search.
    #[test]
    fn cancel_is_idempotent(
        session in arb_session(),
        repeats in 1usize..6,
        button in any::<bool>(),
    ) {
        prop_assume!(matches!(
            session.state(),
            DialogState::AwaitingResultCount | DialogState::ImageMenu
        ));
        let table = RouteTable::standard();
        let kind = if button { ContentKind::Button } else { ContentKind::Text };
        let mut s = session;

        for _ in 0..repeats {
            if let Some(t) = apply(&table, &mut s, kind, "❌ Cancel") {
                let searched = t.effects.iter().any(|e| matches!(e, Effect::Search { .. }));
                prop_assert!(!searched);
            }
        }
        prop_assert_eq!(s.state(), DialogState::Idle);
        prop_assert!(!s.contains(QUERY_KEY));
        prop_assert!(!s.contains(IMAGE_KEY));
    }

    /// A count reply searches for `clamp(n, 1, max)` or declines when `n < 1`.
    #[test]
    fn count_is_clamped_or_declined(n in any::<i64>()) {
        let settings = DialogSettings::default();
        let mut s = Session::new("test:1");
        s.set(QUERY_KEY, &"red tractor");
        s.set_state(DialogState::AwaitingResultCount);

        let ev = event(DialogState::AwaitingResultCount, ContentKind::Text, &n.to_string());
        let t = transition(Step::ChooseCount, &ev, &mut s, &settings);
        let searched: Vec<u32> = t
            .effects
            .iter()
            .filter_map(|e| match e {
                Effect::Search { count, .. } => Some(*count),
                _ => None,
            })
            .collect();

        if n < 1 {
            prop_assert!(searched.is_empty());
            prop_assert_eq!(s.state(), DialogState::Idle);
        } else {
            let expected = u32::try_from(n).unwrap_or(u32::MAX).min(settings.max_results);
            prop_assert_eq!(searched, vec![expected]);
        }
    }
}
