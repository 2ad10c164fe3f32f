use crate::app::types::{Role, Turn};

/// Renders the last `max_turns` turns as `User:`/`Bot:` lines, each cut to `max_chars`
pub fn recent_context(turns: &[Turn], max_turns: usize, max_chars: usize) -> String {
    let start = turns.len().saturating_sub(max_turns);
    turns
        .get(start..)
        .unwrap_or_default()
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Bot",
            };
            format!("{}: {}", speaker, truncate_chars(&turn.text, max_chars))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prefix of `text` holding at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text.get(..byte_index).unwrap_or(text),
        None => text,
    }
}

/// Turns with `text` appended as the newest user turn
pub fn with_latest_user_turn(turns: &[Turn], text: &str) -> Vec<Turn> {
    let mut extended = turns.to_vec();
    extended.push(Turn::user(text));
    extended
}
