//! Provider responses and delivery outcomes.

use serde::{Deserialize, Serialize};

use crate::PushError;

/// Reasons that mean the device token is dead.
pub const INVALID_TOKEN_REASONS: &[&str] = &["Unregistered", "BadDeviceToken"];

/// Reasons worth retrying after a delay.
pub const TRANSIENT_REASONS: &[&str] = &[
    "TooManyRequests",
    "InternalServerError",
    "ServiceUnavailable",
    "Shutdown",
    "ExpiredProviderToken",
];

/// Reasons that mean our credentials are unusable.
pub const AUTHENTICATION_REASONS: &[&str] = &[
    "InvalidProviderToken",
    "MissingProviderToken",
    "BadCertificate",
    "BadCertificateEnvironment",
    "Forbidden",
];

/// Raw provider reply for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    /// HTTP status.
    pub status: u16,
    /// `apns-id` response header.
    pub apns_id: Option<String>,
    /// `reason` from the JSON error body.
    pub reason: Option<String>,
    /// `timestamp` from the JSON error body (milliseconds, set for 410).
    pub timestamp: Option<i64>,
}

/// JSON body APNs sends with non-200 replies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ProviderResponse {
    /// Successful reply.
    pub fn success(apns_id: impl Into<String>) -> Self {
        Self {
            status: 200,
            apns_id: Some(apns_id.into()),
            reason: None,
            timestamp: None,
        }
    }

    /// Failed reply with a reason.
    pub fn failure(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            apns_id: None,
            reason: Some(reason.into()),
            timestamp: None,
        }
    }

    /// Decode the status and body of a reply.
    pub fn from_parts(status: u16, apns_id: Option<String>, body: &[u8]) -> Self {
        let error = if body.is_empty() {
            ErrorBody::default()
        } else {
            serde_json::from_slice::<ErrorBody>(body).unwrap_or_default()
        };

        Self {
            status,
            apns_id,
            reason: error.reason,
            timestamp: error.timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Classify the reply into a delivery result.
    pub fn classify(self) -> Result<Delivered, PushError> {
        if self.is_success() {
            return Ok(Delivered {
                apns_id: self.apns_id,
            });
        }

        let Some(reason) = self.reason else {
            let reason = format!("HTTP {}", self.status);
            return Err(if self.status >= 500 {
                PushError::Transient { reason }
            } else {
                PushError::Permanent { reason }
            });
        };

        let reason_str = reason.as_str();
        if INVALID_TOKEN_REASONS.contains(&reason_str) {
            Err(PushError::InvalidToken { reason })
        } else if TRANSIENT_REASONS.contains(&reason_str) {
            Err(PushError::Transient { reason })
        } else if AUTHENTICATION_REASONS.contains(&reason_str) {
            Err(PushError::Authentication { reason })
        } else {
            Err(PushError::Permanent { reason })
        }
    }
}

/// Proof of provider acceptance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivered {
    /// `apns-id` assigned to the notification.
    pub apns_id: Option<String>,
}

/// Terminal per-token result of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { apns_id: Option<String> },
    InvalidToken { reason: String },
    TransientFailure { reason: String },
    PermanentFailure { reason: String },
    MalformedRequest { reason: String },
    ConnectionError { reason: String },
    Cancelled,
}

impl Outcome {
    /// `"Success"` or the failure reason.
    pub fn description(&self) -> &str {
        match self {
            Self::Success { .. } => "Success",
            Self::InvalidToken { reason }
            | Self::TransientFailure { reason }
            | Self::PermanentFailure { reason }
            | Self::MalformedRequest { reason }
            | Self::ConnectionError { reason } => reason,
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken { .. })
    }
}

impl From<Result<Delivered, PushError>> for Outcome {
    fn from(result: Result<Delivered, PushError>) -> Self {
        match result {
            Ok(delivered) => Self::Success {
                apns_id: delivered.apns_id,
            },
            Err(PushError::InvalidToken { reason }) => Self::InvalidToken { reason },
            Err(err @ (PushError::Transient { .. } | PushError::Timeout(_))) => {
                Self::TransientFailure {
                    reason: err.reason(),
                }
            }
            Err(PushError::Permanent { reason } | PushError::Authentication { reason }) => {
                Self::PermanentFailure { reason }
            }
            Err(PushError::InvalidIntent(reason)) => Self::MalformedRequest { reason },
            Err(PushError::Transport(reason) | PushError::Configuration(reason)) => {
                Self::ConnectionError { reason }
            }
            Err(PushError::Cancelled) => Self::Cancelled,
        }
    }
}
