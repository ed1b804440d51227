//! Streamed output units and the terminal stream record.

use serde::{Deserialize, Serialize};

use crate::backend::BackendId;

/// One unit of a streamed response.
///
/// Empty text is a legitimate "nothing new this tick" signal and is still
/// delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
}

impl Fragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this fragment carries any text.
    pub fn is_real(&self) -> bool {
        !self.text.is_empty()
    }
}

/// Terminal record of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOutcome {
    /// Backend the stream was opened against.
    pub backend: BackendId,
    /// Fragments with non-empty text, fallback fragments included.
    pub real_fragments: u64,
    /// Every fragment delivered, empty ones included.
    pub emitted_fragments: u64,
    /// Whether the canned fallback stream replaced backend output.
    pub fallback_fired: bool,
    /// Whether the backend errored or timed out during this call.
    pub generation_failed: bool,
}

/// An item of a response stream: fragments in order, then exactly one `End`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum StreamEvent {
    Fragment(Fragment),
    End(StreamOutcome),
}

impl StreamEvent {
    pub fn is_end(&self) -> bool {
        matches!(self, StreamEvent::End(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_is_real() {
        assert!(Fragment::new("hi").is_real());
        assert!(Fragment::new(" ").is_real());
        assert!(!Fragment::empty().is_real());
    }

    #[test]
    fn test_stream_event_serialization() {
        let event = StreamEvent::Fragment(Fragment::new("abc"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"fragment""#));
        assert!(json.contains(r#""text":"abc""#));

        let end = StreamEvent::End(StreamOutcome {
            backend: BackendId::General,
            real_fragments: 1,
            emitted_fragments: 2,
            fallback_fired: false,
            generation_failed: false,
        });
        assert!(end.is_end());
        let json = serde_json::to_string(&end).unwrap();
        assert!(json.contains(r#""event":"end""#));
        assert!(json.contains(r#""backend":"general""#));
    }
}
