//! Structured message content and flattening.
//!
//! Client payloads may carry message content as a list of typed parts
//! rather than one plain string. Only text parts contribute to the prompt;
//! anything else is preserved as raw JSON so unknown part kinds survive a
//! decode/encode round trip without being silently rewritten.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One part of a structured message body.
///
/// Decoding is driven by the `type` tag: `{"type": "text", "text": ...}`
/// becomes [`ContentPart::Text`]; every other shape lands in
/// [`ContentPart::Other`] untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    /// Plain text content.
    Text {
        #[serde(rename = "type")]
        kind: TextTag,
        text: String,
    },
    /// Any non-text part, kept verbatim.
    Other(Value),
}

/// Marker for the `"text"` type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextTag {
    #[serde(rename = "text")]
    Text,
}

impl ContentPart {
    /// Creates a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            kind: TextTag::Text,
            text: text.into(),
        }
    }
}

/// Flattens structured parts into the single string the model gateway and
/// the message store work with.
///
/// Text parts are concatenated in order; non-text parts contribute nothing.
/// Pure function, no I/O.
///
/// # Examples
///
/// ```
/// use chatloom::content::{flatten_parts, ContentPart};
///
/// let parts = vec![
///     ContentPart::text("Hello, "),
///     ContentPart::Other(serde_json::json!({"type": "image", "url": "x"})),
///     ContentPart::text("world"),
/// ];
/// assert_eq!(flatten_parts(&parts), "Hello, world");
/// ```
#[must_use]
pub fn flatten_parts(parts: &[ContentPart]) -> String {
    let mut out = String::new();
    for part in parts {
        if let ContentPart::Text { text, .. } = part {
            out.push_str(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_concatenates_text_parts_in_order() {
        let parts = vec![
            ContentPart::text("a"),
            ContentPart::text("b"),
            ContentPart::text("c"),
        ];
        assert_eq!(flatten_parts(&parts), "abc");
    }

    #[test]
    fn flatten_skips_non_text_parts() {
        let parts = vec![
            ContentPart::text("keep"),
            ContentPart::Other(json!({"type": "tool_use", "id": "t1"})),
        ];
        assert_eq!(flatten_parts(&parts), "keep");
    }

    #[test]
    fn flatten_of_empty_slice_is_empty() {
        assert_eq!(flatten_parts(&[]), "");
    }

    #[test]
    fn decode_dispatches_on_type_tag() {
        let decoded: Vec<ContentPart> = serde_json::from_value(json!([
            {"type": "text", "text": "hi"},
            {"type": "image", "url": "https://example.com/a.png"},
        ]))
        .unwrap();
        assert_eq!(decoded[0], ContentPart::text("hi"));
        assert!(matches!(decoded[1], ContentPart::Other(_)));
    }

    #[test]
    fn unknown_parts_round_trip_unchanged() {
        let raw = json!({"type": "audio", "bytes": "...", "extra": 3});
        let part: ContentPart = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&part).unwrap(), raw);
    }
}
