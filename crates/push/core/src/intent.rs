//! Notification intent types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PushError;

/// What the caller wants delivered to one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationIntent {
    /// Device token (hex).
    pub token: String,
    /// Alert content; `None` makes this a background push.
    pub alert: Option<AlertContent>,
    /// App icon badge.
    pub badge: Option<u32>,
    /// Sound name or critical-alert sound.
    pub sound: Option<Sound>,
    /// Thread identifier for grouping.
    pub thread_id: Option<String>,
    /// Notification category (actionable notifications).
    pub category: Option<String>,
    /// Emit `content-available: 1`.
    pub content_available: bool,
    /// Emit `mutable-content: 1`.
    pub mutable_content: bool,
    /// Localization key merged into the alert.
    pub loc_key: Option<String>,
    /// Delivery priority.
    pub priority: Option<Priority>,
    /// Absolute deadline after which the provider should drop the notification.
    pub expiration: Option<DateTime<Utc>>,
    /// Collapse identifier.
    pub collapse_id: Option<String>,
    /// Provider extension fields, placed beside `aps`.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NotificationIntent {
    /// Create an empty intent for a device.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// Background push that wakes the app.
    pub fn silent(token: impl Into<String>) -> Self {
        Self {
            content_available: true,
            ..Self::new(token)
        }
    }

    /// Copy of this intent addressed to another device.
    pub fn for_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..self.clone()
        }
    }

    /// Set the alert.
    pub fn with_alert(mut self, alert: impl Into<AlertContent>) -> Self {
        self.alert = Some(alert.into());
        self
    }

    /// Set the badge.
    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    /// Set the sound.
    pub fn with_sound(mut self, sound: impl Into<Sound>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    /// Set the thread identifier.
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Set the localization key.
    pub fn with_loc_key(mut self, loc_key: impl Into<String>) -> Self {
        self.loc_key = Some(loc_key.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the absolute expiration.
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Set the collapse identifier.
    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    /// Add a top-level extension field.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Push type implied by the alert.
    pub fn push_type(&self) -> PushType {
        if self.alert.is_some() {
            PushType::Alert
        } else {
            PushType::Background
        }
    }
}

/// Alert payload: a bare body string or a structured alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertContent {
    Body(String),
    Structured(Alert),
}

impl AlertContent {
    /// Convert loosely-typed JSON into alert content.
    ///
    /// `null` means no alert. Anything other than a string or an object is rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Option<Self>, PushError> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(body) => Ok(Some(Self::Body(body))),
            value @ serde_json::Value::Object(_) => serde_json::from_value::<Alert>(value)
                .map(|alert| Some(Self::Structured(alert)))
                .map_err(|e| PushError::invalid_intent(format!("malformed alert: {e}"))),
            other => Err(PushError::invalid_intent(format!(
                "alert must be a string or an object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<&str> for AlertContent {
    fn from(body: &str) -> Self {
        Self::Body(body.to_string())
    }
}

impl From<String> for AlertContent {
    fn from(body: String) -> Self {
        Self::Body(body)
    }
}

impl From<Alert> for AlertContent {
    fn from(alert: Alert) -> Self {
        Self::Structured(alert)
    }
}

/// Structured alert. Only set fields are serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_loc_args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc_args: Option<Vec<String>>,
}

impl Alert {
    /// Alert with only a body.
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Alert with a title and body.
    pub fn titled(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
            ..Default::default()
        }
    }
}

/// Sound to play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sound {
    /// Sound file name, or `"default"`.
    Named(String),
    /// Critical alert sound.
    Critical(CriticalSound),
}

impl From<&str> for Sound {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for Sound {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Critical alert sound dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalSound {
    pub critical: u8,
    pub name: String,
    pub volume: f64,
}

/// `apns-push-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushType {
    Alert,
    Background,
}

impl PushType {
    /// Header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
        }
    }
}

impl std::fmt::Display for PushType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `apns-priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// 10: deliver immediately.
    Immediate,
    /// 5: deliver at a power-conserving time.
    ConservePower,
    /// 1: prioritize power over everything.
    Low,
}

impl Priority {
    /// Numeric header value.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Immediate => 10,
            Self::ConservePower => 5,
            Self::Low => 1,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = PushError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Self::Immediate),
            5 => Ok(Self::ConservePower),
            1 => Ok(Self::Low),
            other => Err(PushError::invalid_intent(format!(
                "priority must be 10, 5 or 1, got {other}"
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
