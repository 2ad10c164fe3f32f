//! Persona system prompt with the per-conversation name instructions

use crate::config::{Locale, PersonaConfig};

/// How the persona should handle the user's name on this turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameContext<'a> {
    Known(&'a str),
    /// First turn and nobody has said how to address the user yet
    AskForName,
    Unknown,
}

impl<'a> NameContext<'a> {
    pub fn for_turn(display_name: Option<&'a str>, is_first_turn: bool) -> Self {
        match display_name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Self::Known(name),
            None if is_first_turn => Self::AskForName,
            None => Self::Unknown,
        }
    }
}

fn name_instructions(context: NameContext<'_>, persona_name: &str, locale: Locale) -> Option<String> {
    match context {
        NameContext::Known(name) => Some(format!(
            "IMPORTANT: The user's name is {}. Address them by name, naturally, in your replies.",
            name
        )),
        NameContext::AskForName => {
            let (introduction, invitation, question) = match locale {
                Locale::Zh => (
                    format!("我是 {}，一位来自法国的调香师。", persona_name),
                    "像在巴黎沙龙写一封信，告诉我你的此刻心情与想携带的香气。",
                    "请问，我该如何称呼你？",
                ),
                Locale::En => (
                    format!("I am {}, a perfumer from France.", persona_name),
                    "As if writing a letter in a Parisian salon, tell me your mood and the scent you wish to carry.",
                    "May I ask, how should I address you?",
                ),
            };
            Some(format!(
                "IMPORTANT: This is the user's first message. You MUST:\n\
                 1. Introduce yourself: '{}'\n\
                 2. Then say: '{}'\n\
                 3. Then ask for their name: '{}'",
                introduction, invitation, question
            ))
        }
        NameContext::Unknown => None,
    }
}

/// Builds the persona system message for one generation request
pub fn persona_prompt(persona: &PersonaConfig, name: NameContext<'_>, locale: Locale) -> String {
    let mut prompt_lines = vec![persona.system_prompt.trim().to_string()];
    if let Some(instructions) = name_instructions(name, &persona.name, locale) {
        prompt_lines.push(instructions);
    }
    prompt_lines.push(
        match locale {
            Locale::Zh => "Reply in natural, colloquial Chinese.",
            Locale::En => "Reply in natural English.",
        }
        .to_string(),
    );
    prompt_lines.join("\n\n")
}
