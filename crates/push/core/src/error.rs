//! Delivery error taxonomy.

use std::time::Duration;

/// Classified failure of a push operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The caller's notification intent cannot be turned into a payload.
    #[error("invalid notification intent: {0}")]
    InvalidIntent(String),

    /// The provider or TLS peer rejected our credentials.
    #[error("authentication rejected: {reason}")]
    Authentication { reason: String },

    /// No provider response before the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Provider-side overload or internal error.
    #[error("transient provider failure: {reason}")]
    Transient { reason: String },

    /// The device token is no longer valid for this topic.
    #[error("invalid device token: {reason}")]
    InvalidToken { reason: String },

    /// Provider rejected the notification for a non-retryable reason.
    #[error("provider rejected notification: {reason}")]
    Permanent { reason: String },

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credential or topic lookup failed before anything was sent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

impl PushError {
    /// Whether the delivery engine may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }

    /// Whether this is a terminal provider rejection (invalid tokens included).
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. } | Self::InvalidToken { .. })
    }

    /// Provider reason string, or the class name for local failures.
    ///
    /// Free-text detail stays in the `Display` form.
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidIntent(_) => "InvalidIntent".to_string(),
            Self::Authentication { reason }
            | Self::Transient { reason }
            | Self::InvalidToken { reason }
            | Self::Permanent { reason } => reason.clone(),
            Self::Timeout(_) => "Timeout".to_string(),
            Self::Transport(_) => "ConnectionError".to_string(),
            Self::Configuration(_) => "Configuration".to_string(),
            Self::Cancelled => "Cancelled".to_string(),
        }
    }

    pub(crate) fn invalid_intent(msg: impl Into<String>) -> Self {
        Self::InvalidIntent(msg.into())
    }
}
