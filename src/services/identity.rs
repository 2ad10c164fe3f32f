use crate::app::types::{Role, Turn};

const NAME_REQUEST_KEYWORDS: [&str; 5] = ["称呼", "名字", "name", "address", "call"];
const NAME_PREFIX_CHARS: usize = 10;
const MAX_NAME_CHARS: usize = 20;

/// Finds the name the user gave after the assistant asked how to address them.
///
/// Looks at user replies following the first assistant turn that asks for a
/// name and keeps the first one that still reads as a name once trimmed.
pub fn extract_display_name(turns: &[Turn]) -> Option<String> {
    turns.iter().enumerate().find_map(|(index, turn)| {
        if turn.role != Role::Assistant || !asks_for_name(&turn.text) {
            return None;
        }
        turns
            .iter()
            .skip(index + 1)
            .filter(|reply| reply.role == Role::User)
            .find_map(|reply| candidate_name(&reply.text))
    })
}

fn asks_for_name(text: &str) -> bool {
    let lowered = text.to_lowercase();
    NAME_REQUEST_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn candidate_name(reply: &str) -> Option<String> {
    let name: String = reply
        .trim()
        .chars()
        .take(NAME_PREFIX_CHARS)
        .filter(|character| {
            character.is_alphanumeric() || *character == '_' || character.is_whitespace()
        })
        .collect();
    let name = name.trim();
    (!name.is_empty() && name.chars().count() <= MAX_NAME_CHARS).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_name_after_request() {
        let turns = vec![
            Turn::user("你好"),
            Turn::assistant("我是 Le Nez。请问，我该如何称呼你？"),
            Turn::user("小林！"),
        ];
        assert_eq!(extract_display_name(&turns).as_deref(), Some("小林"));
    }

    #[test]
    fn test_truncates_long_replies() {
        let turns = vec![
            Turn::assistant("May I ask, how should I address you?"),
            Turn::user("Call me Margaret, please."),
        ];
        assert_eq!(extract_display_name(&turns).as_deref(), Some("Call me Ma"));
    }

    #[test]
    fn test_skips_punctuation_only_replies() {
        let turns = vec![
            Turn::assistant("What is your name?"),
            Turn::user("..."),
            Turn::user("Lin"),
        ];
        assert_eq!(extract_display_name(&turns).as_deref(), Some("Lin"));
    }

    #[test]
    fn test_no_request_means_no_name() {
        let turns = vec![Turn::user("Lin"), Turn::assistant("Tell me about your day.")];
        assert_eq!(extract_display_name(&turns), None);
    }
}
