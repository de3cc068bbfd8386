use crate::config::Config;
use crate::error::{GenerateError, RelayError};
use crate::ollama::OllamaClient;
use crate::prompt::{PromptBuilder, PromptStyle};
use crate::sessions::SessionStore;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sessions created through the chat-widget webhook are keyed by visitor,
/// so the same visitor always lands in the same conversation.
pub const WIDGET_SESSION_PREFIX: &str = "zoho_";

/// How often the streaming producer checks for a departed consumer, in
/// fragments. Fragments are token-sized; a handful of wasted tokens after a
/// disconnect is the accepted overhead bound.
const DISCONNECT_CHECK_EVERY: usize = 8;

const EVENT_BUFFER: usize = 32;

/// Successful chat turn, ready for response shaping.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Wire events for the streaming chat surface, in emission order:
/// `processing`, any number of `streaming`, then `complete` or `error`,
/// then the `stream_end` sentinel. A departed consumer sees the sequence
/// cut short instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Processing { session_id: String },
    Streaming { fragment: String, text: String },
    Complete { text: String, session_id: String },
    Error { message: String },
    StreamEnd,
}

/// Orchestrates one chat turn: resolve session → build prompt → call the
/// backend → persist the exchange → shape the reply. Holds the only
/// handles to the store and client; handlers never touch them directly.
#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<dyn SessionStore>,
    client: Arc<OllamaClient>,
    chat_prompt: PromptBuilder,
    widget_prompt: PromptBuilder,
}

impl ChatRelay {
    pub fn new(store: Arc<dyn SessionStore>, client: Arc<OllamaClient>, config: &Config) -> Self {
        Self {
            store,
            client,
            chat_prompt: PromptBuilder::new(PromptStyle::Plain, config.context_window),
            widget_prompt: PromptBuilder::new(PromptStyle::Guided, config.widget_context_window),
        }
    }

    /// Generic chat path. `session_hint` comes from the client header; the
    /// source address is only recorded, never used for keying.
    pub async fn handle_chat(
        &self,
        session_hint: Option<&str>,
        source_address: &str,
        message: &str,
    ) -> Result<ChatReply, RelayError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let session_id = self.store.resolve(session_hint, source_address);
        self.exchange(&session_id, message, &self.chat_prompt).await
    }

    /// Chat-widget webhook path: deterministic per-visitor session, primed
    /// prompt template, otherwise the same sequence as `handle_chat`.
    pub async fn handle_widget_message(
        &self,
        visitor_id: &str,
        text: &str,
    ) -> Result<ChatReply, RelayError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let candidate = format!("{WIDGET_SESSION_PREFIX}{visitor_id}");
        let session_id = self.store.resolve(Some(&candidate), "webhook");
        self.exchange(&session_id, message, &self.widget_prompt).await
    }

    async fn exchange(
        &self,
        session_id: &str,
        message: &str,
        prompt_builder: &PromptBuilder,
    ) -> Result<ChatReply, RelayError> {
        let history = self.store.recent_context(session_id, prompt_builder.window());
        let prompt = prompt_builder.build(&history, message);

        let text = self.client.generate(&prompt).await?;
        self.store.append(session_id, message, &text);

        Ok(ChatReply {
            session_id: session_id.to_string(),
            text,
            timestamp: Utc::now(),
        })
    }

    /// Streaming chat path. The producer runs as its own task and writes
    /// into the returned channel; dropping the receiver cancels it. Partial
    /// output accumulated before a cancel or mid-stream failure is
    /// committed to the session exactly once.
    pub fn stream_chat(
        &self,
        session_hint: Option<&str>,
        source_address: &str,
        message: &str,
    ) -> Result<(String, mpsc::Receiver<ChatEvent>), RelayError> {
        let message = message.trim().to_owned();
        if message.is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let session_id = self.store.resolve(session_hint, source_address);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let relay = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            relay.run_stream(id, message, tx).await;
        });

        Ok((session_id, rx))
    }

    async fn run_stream(&self, session_id: String, message: String, tx: mpsc::Sender<ChatEvent>) {
        let _ = tx
            .send(ChatEvent::Processing {
                session_id: session_id.clone(),
            })
            .await;

        let history = self
            .store
            .recent_context(&session_id, self.chat_prompt.window());
        let prompt = self.chat_prompt.build(&history, &message);

        let mut stream = match self.client.generate_stream(&prompt).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(%error, %session_id, "stream request failed before first fragment");
                let _ = tx
                    .send(ChatEvent::Error {
                        message: error.user_message().to_owned(),
                    })
                    .await;
                let _ = tx.send(ChatEvent::StreamEnd).await;
                return;
            }
        };

        let mut cumulative = String::new();
        let mut fragments = 0usize;

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if !fragment.text.is_empty() {
                        cumulative.push_str(&fragment.text);
                        fragments += 1;

                        let event = ChatEvent::Streaming {
                            fragment: fragment.text,
                            text: cumulative.clone(),
                        };
                        if tx.send(event).await.is_err() {
                            self.commit_partial(&session_id, &message, &cumulative);
                            return;
                        }
                    }

                    if fragment.done {
                        break;
                    }

                    if fragments % DISCONNECT_CHECK_EVERY == 0 && tx.is_closed() {
                        self.commit_partial(&session_id, &message, &cumulative);
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(%error, %session_id, "stream aborted mid-generation");
                    // Partial output still counts as an exchange; the wire
                    // reports the error so the client can render it.
                    self.commit_partial(&session_id, &message, &cumulative);
                    let _ = tx
                        .send(ChatEvent::Error {
                            message: error.user_message().to_owned(),
                        })
                        .await;
                    let _ = tx.send(ChatEvent::StreamEnd).await;
                    return;
                }
            }
        }

        if cumulative.is_empty() {
            let _ = tx
                .send(ChatEvent::Error {
                    message: GenerateError::EmptyResponse.user_message().to_owned(),
                })
                .await;
        } else {
            self.store.append(&session_id, &message, &cumulative);
            let _ = tx
                .send(ChatEvent::Complete {
                    text: cumulative,
                    session_id: session_id.clone(),
                })
                .await;
        }
        let _ = tx.send(ChatEvent::StreamEnd).await;
    }

    fn commit_partial(&self, session_id: &str, message: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        tracing::info!(
            %session_id,
            chars = text.len(),
            "consumer gone; keeping partial reply"
        );
        self.store.append(session_id, message, text);
    }
}
