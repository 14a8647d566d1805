//! Shared utility functions for the conductor crate.

/// Maximum length of messages written to the activity log and checkpoints.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut. Always splits on a char boundary.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// Parse a `KEY=VALUE` pair as given on the command line.
pub fn parse_key_value(pair: &str) -> Option<(String, String)> {
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_message_short_text_unchanged() {
        assert_eq!(truncate_message("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_message_exact_length_unchanged() {
        assert_eq!(truncate_message("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_message_long_text() {
        let out = truncate_message("abcdefghij", 8);
        assert_eq!(out, "abcde...");
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn test_truncate_message_multibyte() {
        let text = "é".repeat(20);
        let out = truncate_message(&text, 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("idea=a todo app"),
            Some(("idea".to_string(), "a todo app".to_string()))
        );
        assert_eq!(
            parse_key_value("url=http://x?a=b"),
            Some(("url".to_string(), "http://x?a=b".to_string()))
        );
        assert_eq!(parse_key_value("novalue"), None);
        assert_eq!(parse_key_value("=value"), None);
    }
}
