//! User-facing texts and keyboards.

use crate::events::{KeyButton, Keyboard};
use crate::services::SimilarImages;

/// Button values of the image menu and the cancel buttons.
pub mod actions {
    /// Caption the photo.
    pub const DESCRIBE: &str = "describe";
    /// Ask a question about the photo.
    pub const QUESTION: &str = "question";
    /// Find similar images.
    pub const SIMILAR: &str = "similar";
    /// Cancel the current step.
    pub const CANCEL: &str = "cancel";
}

/// Greeting and usage.
pub const HELP: &str = "Send me a description of a picture, for example \"yellow excavator\", \
and I will find matching images (from 1 to 50).\n\
Send me a photo and I will describe it, answer questions about it or find similar images.";

/// Data the current step needs is missing.
pub const PROTOCOL_ERROR: &str =
    "🤷 I lost track of what we were doing. Let's start over: send a text or a photo.";

/// Reply to a cancelled search.
pub const SEARCH_CANCELLED: &str = "👌 Search cancelled.";

/// Reply to a count below one.
pub const COUNT_DECLINED: &str = "👌 Nothing to show then. Send a new description any time.";

/// The search found nothing.
pub const NO_IMAGES: &str = "🤔 No images found.";

/// One search result could not be delivered.
pub const IMAGE_FAILED: &str = "😩 Could not process an image.";

/// The search provider failed.
pub const SEARCH_FAILED: &str = "😩 Image search failed, please try again later.";

/// The user's photo could not be downloaded.
pub const IMAGE_UNAVAILABLE: &str =
    "😩 I could not load your photo. Please send it again.";

/// Shown with the image menu.
pub const MENU_PROMPT: &str = "🖼 What should I do with this picture?";

/// The image menu was left.
pub const MENU_CLOSED: &str = "👌 Done with this picture. Send a text or a photo.";

/// Asks for a question about the photo.
pub const QUESTION_PROMPT: &str = "❓ What would you like to know about the picture?";

/// Captioning produced nothing usable.
pub const NO_DESCRIPTION: &str = "🤔 I could not describe this picture.";

/// The answer came back empty.
pub const NO_ANSWER: &str = "🤔 I could not find an answer.";

/// Captioning or answering failed.
pub const CAPTION_FAILED: &str = "😩 The captioning service failed, please try again.";

/// The reverse lookup found nothing.
pub const NO_SIMILAR: &str = "🤔 No similar images found.";

/// The reverse lookup failed.
pub const SIMILAR_FAILED: &str = "😩 Similar image search failed.";

/// Sent when a long operation starts.
pub const WORKING: &str = "⏳ Working on it ...";

/// Asks how many images to find.
pub fn count_prompt(max: u32) -> String {
    format!("❓ How many images should I find (from 1 to {max})?")
}

/// Repeats the count question after a non-numeric reply.
pub fn count_reprompt(max: u32) -> String {
    format!("🔢 Please send a number from 1 to {max}, or press cancel.")
}

/// The requested count was above the provider maximum.
pub fn clamp_warning(max: u32) -> String {
    format!("⚠ I will show at most {max} images.")
}

/// The requested count will take a while.
pub fn slow_advisory(count: u32) -> String {
    format!("⚠ Finding {count} images will take a while ...")
}

/// Announces the search about to run.
pub fn searching(query: &str, count: u32) -> String {
    format!("🔎 Searching for \"{query}\" ({count} images) ...")
}

/// Quick-pick count buttons plus cancel, three per row.
pub fn count_keyboard(counts: &[u32]) -> Keyboard {
    let mut buttons: Vec<KeyButton> = counts
        .iter()
        .map(|n| KeyButton::callback(n.to_string(), n.to_string()))
        .collect();
    buttons.push(KeyButton::callback("❌ Cancel", actions::CANCEL));
    Keyboard::grid(buttons, 3)
}

/// Action menu shown for a stored photo.
pub fn image_menu() -> Keyboard {
    Keyboard::grid(
        vec![
            KeyButton::callback("📝 Describe", actions::DESCRIBE),
            KeyButton::callback("❓ Ask a question", actions::QUESTION),
            KeyButton::callback("🔍 Similar images", actions::SIMILAR),
            KeyButton::callback("❌ Cancel", actions::CANCEL),
        ],
        2,
    )
}

/// Cancel button shown while waiting for a question.
pub fn question_keyboard() -> Keyboard {
    Keyboard::grid(vec![KeyButton::callback("❌ Cancel", actions::CANCEL)], 1)
}

/// Caption sentences joined into one reply.
pub fn captions(sentences: &[String]) -> String {
    sentences
        .iter()
        .map(|s| format!("• {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Similarity summary: `title - subtitle`, then tags and count lines when
/// there is something to show, plus a link to the full results.
pub fn similar(result: &SimilarImages) -> (String, Option<Keyboard>) {
    let heading = [result.title.as_deref(), result.subtitle.as_deref()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" - ");

    let mut lines = Vec::new();
    if !heading.is_empty() {
        lines.push(heading);
    }
    if !result.tags.is_empty() {
        lines.push(format!("🏷 {}", result.tags.join(", ")));
    }
    if !result.similar_urls.is_empty() {
        lines.push(format!("🖼 {} similar images", result.similar_urls.len()));
    }
    if lines.is_empty() {
        lines.push(NO_SIMILAR.to_string());
    }

    let keyboard = (!result.canonical_url.is_empty()).then(|| {
        Keyboard::default().with_row(vec![KeyButton::link(
            "🔗 Open results",
            result.canonical_url.clone(),
        )])
    });
    (lines.join("\n"), keyboard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_keyboard_layout() {
        let keyboard = count_keyboard(&[1, 5, 10, 20, 40, 50]);
        assert_eq!(keyboard.rows.len(), 3);
        assert_eq!(keyboard.rows[2].len(), 1);
        assert_eq!(keyboard.buttons().count(), 7);
    }

    #[test]
    fn test_similar_without_tags() {
        let result = SimilarImages {
            title: Some("Red tractor".to_string()),
            subtitle: Some("Farm machinery".to_string()),
            tags: Vec::new(),
            similar_urls: Vec::new(),
            canonical_url: "https://example.com/r".to_string(),
        };
        let (text, keyboard) = similar(&result);
        assert_eq!(text, "Red tractor - Farm machinery");
        assert!(keyboard.is_some());
    }

    #[test]
    fn test_similar_full() {
        let result = SimilarImages {
            title: Some("Tractor".to_string()),
            subtitle: None,
            tags: vec!["farm".to_string(), "red".to_string()],
            similar_urls: vec!["a".to_string(), "b".to_string()],
            canonical_url: String::new(),
        };
        let (text, keyboard) = similar(&result);
        assert_eq!(text, "Tractor\n🏷 farm, red\n🖼 2 similar images");
        assert!(keyboard.is_none());
    }

    #[test]
    fn test_captions_joined() {
        let text = captions(&["A red tractor.".to_string(), "A field.".to_string()]);
        assert_eq!(text, "• A red tractor.\n• A field.");
    }
}
