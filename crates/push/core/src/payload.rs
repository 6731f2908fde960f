//! Wire payload building.
//!
//! Maps a [`NotificationIntent`] to the JSON body and header values APNs expects.
//! Building is pure apart from reading the clock for expiration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Alert, AlertContent, NotificationIntent, Priority, PushError, PushType, Sound};

/// Largest body APNs accepts for alert and background pushes.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// The `aps` dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Aps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<Sound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutable_content: Option<u8>,
}

/// Full JSON body: `aps` plus extension fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadBody {
    pub aps: Aps,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A notification ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Device token, used as the request path component.
    pub token: String,
    /// `apns-push-type`.
    pub push_type: PushType,
    /// `apns-priority`, omitted when `None`.
    pub priority: Option<Priority>,
    /// Seconds until expiration, relative to build time. Zero or negative when already expired.
    pub time_to_live: Option<i64>,
    /// `apns-collapse-id`.
    pub collapse_id: Option<String>,
    /// Serialized JSON body.
    pub body: Vec<u8>,
}

impl Payload {
    /// Parse the body back into its typed form.
    pub fn parse_body(&self) -> Result<PayloadBody, PushError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| PushError::invalid_intent(format!("unparseable payload body: {e}")))
    }

    /// Body as a JSON value.
    pub fn json(&self) -> Result<serde_json::Value, PushError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| PushError::invalid_intent(format!("unparseable payload body: {e}")))
    }

    /// `apns-expiration` value for a request sent at `sent_at`.
    pub fn expiration_header(&self, sent_at: DateTime<Utc>) -> Option<i64> {
        self.time_to_live.map(|ttl| sent_at.timestamp() + ttl)
    }
}

/// Build the wire payload using the current time.
pub fn build_payload(intent: &NotificationIntent) -> Result<Payload, PushError> {
    build_payload_at(intent, Utc::now())
}

/// Build the wire payload as of `now`.
pub fn build_payload_at(
    intent: &NotificationIntent,
    now: DateTime<Utc>,
) -> Result<Payload, PushError> {
    if intent.token.is_empty() {
        return Err(PushError::invalid_intent("missing device token"));
    }
    if intent.extra.contains_key("aps") {
        return Err(PushError::invalid_intent(
            "extension fields cannot use the reserved key \"aps\"",
        ));
    }

    let push_type = intent.push_type();
    let alert = merge_loc_key(intent.alert.clone(), intent.loc_key.as_deref());

    let aps = Aps {
        alert,
        badge: intent.badge,
        sound: intent.sound.clone(),
        thread_id: intent.thread_id.clone(),
        category: intent.category.clone(),
        content_available: intent.content_available.then_some(1),
        mutable_content: intent.mutable_content.then_some(1),
    };

    let body = serde_json::to_vec(&PayloadBody {
        aps,
        extra: intent.extra.clone(),
    })
    .map_err(|e| PushError::invalid_intent(format!("failed to serialize payload: {e}")))?;

    if body.len() > MAX_PAYLOAD_SIZE {
        return Err(PushError::invalid_intent(format!(
            "PayloadTooLarge: {} bytes exceeds {MAX_PAYLOAD_SIZE}",
            body.len()
        )));
    }

    // APNs rejects priority 10 on background pushes.
    let priority = match (intent.priority, push_type) {
        (Some(priority), _) => Some(priority),
        (None, PushType::Background) => Some(Priority::ConservePower),
        (None, PushType::Alert) => None,
    };

    Ok(Payload {
        token: intent.token.clone(),
        push_type,
        priority,
        time_to_live: intent
            .expiration
            .map(|deadline| deadline.timestamp() - now.timestamp()),
        collapse_id: intent.collapse_id.clone(),
        body,
    })
}

/// A string body is wrapped into a structured alert before the key is merged.
/// Background pushes carry no alert, so the key is dropped for them.
fn merge_loc_key(alert: Option<AlertContent>, loc_key: Option<&str>) -> Option<AlertContent> {
    let Some(loc_key) = loc_key else {
        return alert;
    };

    let mut alert = match alert? {
        AlertContent::Body(body) => Alert {
            body: Some(body),
            ..Default::default()
        },
        AlertContent::Structured(alert) => alert,
    };
    alert.loc_key = Some(loc_key.to_string());
    Some(AlertContent::Structured(alert))
}
