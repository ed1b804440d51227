//! Prompt construction from the request text and optional history.

use relay_common::ChatTurn;

/// Earlier turns kept in the transcript.
pub const MAX_HISTORY_TURNS: usize = 10;

/// Fold the last turns of `history` and the new text into a
/// `User:`/`Assistant:` transcript ending with an open assistant turn.
pub fn build_prompt(text: &str, history: &[ChatTurn]) -> String {
    let start = history.len().saturating_sub(MAX_HISTORY_TURNS);
    let mut prompt = String::new();

    for turn in &history[start..] {
        let speaker = if turn.role.eq_ignore_ascii_case("assistant") {
            "Assistant"
        } else {
            "User"
        };
        prompt.push_str(speaker);
        prompt.push_str(": ");
        prompt.push_str(turn.content.trim());
        prompt.push('\n');
    }

    prompt.push_str("User: ");
    prompt.push_str(text.trim());
    prompt.push_str("\nAssistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_history() {
        assert_eq!(build_prompt("hello", &[]), "User: hello\nAssistant:");
    }

    #[test]
    fn test_history_transcript() {
        let history = vec![ChatTurn::user("Hi"), ChatTurn::assistant("Hello! How can I help?")];
        assert_eq!(
            build_prompt("Tell me a joke", &history),
            "User: Hi\nAssistant: Hello! How can I help?\nUser: Tell me a joke\nAssistant:"
        );
    }

    #[test]
    fn test_history_truncated_to_last_turns() {
        let history: Vec<ChatTurn> = (0..15).map(|i| ChatTurn::user(format!("turn {i}"))).collect();
        let prompt = build_prompt("now", &history);
        assert!(!prompt.contains("turn 4\n"));
        assert!(prompt.starts_with("User: turn 5\n"));
        assert_eq!(prompt.matches("User:").count(), MAX_HISTORY_TURNS + 1);
    }
}
