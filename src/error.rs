use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for chatbridge.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; the binary edge continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Inference backend ───────────────────────────────────────────────
    #[error("backend: {0}")]
    Backend(#[from] GenerateError),

    // ── Relay ───────────────────────────────────────────────────────────
    #[error("relay: {0}")]
    Relay(#[from] RelayError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Inference backend errors ───────────────────────────────────────────────

/// Classified failure of a generate call.
///
/// Callers branch on the kind, not on caught exceptions; every kind maps to a
/// distinct user-safe fallback sentence via [`GenerateError::user_message`].
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("backend returned status {code}")]
    Status { code: u16 },

    #[error("backend request timed out")]
    Timeout,

    #[error("backend connection failed: {0}")]
    Connection(String),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("backend transport error: {0}")]
    Transport(String),
}

impl GenerateError {
    /// User-safe fallback text for this failure. Never leaks status codes or
    /// transport detail; those go to the log instead.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Status { .. } => "Sorry, I'm experiencing technical difficulties.",
            Self::Timeout => {
                "Sorry, the response is taking longer than usual. Please try again."
            }
            Self::Connection(_) => {
                "Sorry, I'm having trouble connecting to the language model."
            }
            Self::EmptyResponse => "Sorry, I couldn't generate a proper response.",
            Self::Transport(_) => "Sorry, I'm currently unavailable. Please try again later.",
        }
    }
}

// ─── Relay errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message is missing or empty")]
    EmptyMessage,

    #[error("backend: {0}")]
    Backend(#[from] GenerateError),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
