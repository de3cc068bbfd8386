use crate::sessions::Exchange;

/// Fixed instruction prepended to widget prompts. The chat-widget vendor's
/// visitors get a primed assistant; the generic API path stays bare.
pub const GUIDED_PREAMBLE: &str = "You are a helpful AI assistant. You provide clear, concise, and helpful responses.\n\
You remember the conversation context and can refer to previous messages when relevant.\n\
Keep your responses conversational and engaging.";

/// Two template styles survive from the service's history: the generic API
/// used bare `User:`/`Assistant:` turns, the widget webhook a primed
/// `Human:`/`Assistant:` transcript. Both are kept as selectable modes on
/// one builder since they produce observably different prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// `User:`/`Assistant:` turns, no preamble.
    Plain,
    /// `Human:`/`Assistant:` turns behind [`GUIDED_PREAMBLE`].
    Guided,
}

/// Assembles a generate prompt from a history snapshot plus the new user
/// message. Pure and deterministic; the caller owns the history.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    style: PromptStyle,
    window: usize,
}

impl PromptBuilder {
    pub fn new(style: PromptStyle, window: usize) -> Self {
        Self {
            style,
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn build(&self, history: &[Exchange], message: &str) -> String {
        let skip = history.len().saturating_sub(self.window);
        let recent = &history[skip..];

        match self.style {
            PromptStyle::Plain => Self::build_plain(recent, message),
            PromptStyle::Guided => Self::build_guided(recent, message),
        }
    }

    fn build_plain(recent: &[Exchange], message: &str) -> String {
        if recent.is_empty() {
            return format!("User: {message}\nAssistant:");
        }

        let mut lines = Vec::with_capacity(recent.len() * 2 + 2);
        for exchange in recent {
            lines.push(format!("User: {}", exchange.user_text));
            lines.push(format!("Assistant: {}", exchange.assistant_text));
        }
        lines.push(format!("User: {message}"));
        lines.push("Assistant:".to_string());

        lines.join("\n")
    }

    fn build_guided(recent: &[Exchange], message: &str) -> String {
        let mut prompt = format!("{GUIDED_PREAMBLE}\n\n");
        for exchange in recent {
            prompt.push_str(&format!("Human: {}\n", exchange.user_text));
            prompt.push_str(&format!("Assistant: {}\n", exchange.assistant_text));
        }
        prompt.push_str(&format!("Human: {message}\nAssistant: "));
        prompt
    }
}
