//! Webhook payload parsing and event classification.
//!
//! A single delivery carries a list of entries; each entry may hold
//! messaging items (DMs) and change items (comment notifications). The
//! classifier flattens them into one order-preserving sequence of typed
//! events and silently drops items missing required fields. It performs no
//! I/O and never fails on a structurally valid payload.

use serde::Deserialize;

// =====================================================
// Wire Types
// =====================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    pub id: Option<String>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub messaging: Vec<MessagingItem>,
    #[serde(default)]
    pub changes: Vec<ChangeItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingItem {
    pub sender: Option<EventActor>,
    pub recipient: Option<EventActor>,
    #[serde(default)]
    pub timestamp: i64,
    pub message: Option<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePart {
    pub mid: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeItem {
    pub field: String,
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeValue {
    pub id: Option<String>,
    pub text: Option<String>,
    pub from: Option<EventActor>,
    pub media: Option<MediaRef>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventActor {
    pub id: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaRef {
    pub id: Option<String>,
    pub media_product_type: Option<String>,
}

// =====================================================
// Classified Events
// =====================================================

/// A direct message with every field the DM pipeline requires.
#[derive(Debug, Clone)]
pub struct DmEvent {
    pub sender_id: String,
    pub recipient_id: String,
    pub message_id: String,
    pub text: String,
}

/// A comment notification with every field the comment pipeline requires.
#[derive(Debug, Clone)]
pub struct CommentEvent {
    pub comment_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub post_id: String,
}

#[derive(Debug, Clone)]
pub enum ClassifiedEvent {
    Dm(DmEvent),
    Comment(CommentEvent),
}

impl ClassifiedEvent {
    /// The platform-assigned id used as the dedup key.
    pub fn external_id(&self) -> &str {
        match self {
            ClassifiedEvent::Dm(e) => &e.message_id,
            ClassifiedEvent::Comment(e) => &e.comment_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedEvent::Dm(_) => "dm",
            ClassifiedEvent::Comment(_) => "comment",
        }
    }
}

/// Flatten a verified payload into typed events, payload order preserved.
/// Within an entry, messaging items come before change items; changes are
/// filtered to `field == "comments"`.
pub fn classify(payload: &WebhookPayload) -> Vec<ClassifiedEvent> {
    let mut events = Vec::new();

    for entry in &payload.entry {
        for item in &entry.messaging {
            if let Some(event) = classify_messaging(item) {
                events.push(ClassifiedEvent::Dm(event));
            }
        }

        for change in &entry.changes {
            if change.field != "comments" {
                continue;
            }
            if let Some(event) = change.value.as_ref().and_then(classify_comment) {
                events.push(ClassifiedEvent::Comment(event));
            }
        }
    }

    events
}

fn classify_messaging(item: &MessagingItem) -> Option<DmEvent> {
    let message = item.message.as_ref()?;
    Some(DmEvent {
        sender_id: item.sender.as_ref()?.id.clone()?,
        recipient_id: item.recipient.as_ref()?.id.clone()?,
        message_id: message.mid.clone()?,
        text: message.text.clone()?,
    })
}

fn classify_comment(value: &ChangeValue) -> Option<CommentEvent> {
    let from = value.from.as_ref()?;
    Some(CommentEvent {
        comment_id: value.id.clone()?,
        text: value.text.clone()?,
        sender_id: from.id.clone()?,
        sender_username: from.username.clone(),
        post_id: value.media.as_ref()?.id.clone()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).expect("valid payload")
    }

    #[test]
    fn classifies_dm_and_comment_in_payload_order() {
        let p = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "acct1",
                "time": 1700000000,
                "messaging": [{
                    "sender": {"id": "u1"},
                    "recipient": {"id": "acct1"},
                    "timestamp": 1700000000,
                    "message": {"mid": "m1", "text": "hi"}
                }],
                "changes": [{
                    "field": "comments",
                    "value": {
                        "id": "c1",
                        "text": "nice post",
                        "from": {"id": "u2", "username": "someone"},
                        "media": {"id": "p1", "media_product_type": "FEED"}
                    }
                }]
            }]
        }));

        let events = classify(&p);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ClassifiedEvent::Dm(e) if e.message_id == "m1"));
        assert!(matches!(&events[1], ClassifiedEvent::Comment(e) if e.comment_id == "c1"));
    }

    #[test]
    fn drops_dm_missing_text() {
        let p = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "acct1",
                "messaging": [{
                    "sender": {"id": "u1"},
                    "recipient": {"id": "acct1"},
                    "message": {"mid": "m1"}
                }]
            }]
        }));
        assert!(classify(&p).is_empty());
    }

    #[test]
    fn drops_dm_missing_message_entirely() {
        let p = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "acct1",
                "messaging": [{
                    "sender": {"id": "u1"},
                    "recipient": {"id": "acct1"}
                }]
            }]
        }));
        assert!(classify(&p).is_empty());
    }

    #[test]
    fn ignores_non_comment_changes() {
        let p = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "acct1",
                "changes": [{
                    "field": "mentions",
                    "value": {"id": "c1", "text": "x", "from": {"id": "u2"}, "media": {"id": "p1"}}
                }]
            }]
        }));
        assert!(classify(&p).is_empty());
    }

    #[test]
    fn drops_comment_missing_media() {
        let p = payload(json!({
            "object": "instagram",
            "entry": [{
                "id": "acct1",
                "changes": [{
                    "field": "comments",
                    "value": {"id": "c1", "text": "hello", "from": {"id": "u2"}}
                }]
            }]
        }));
        assert!(classify(&p).is_empty());
    }

    #[test]
    fn empty_entry_list_yields_no_events() {
        let p = payload(json!({"object": "instagram", "entry": []}));
        assert!(classify(&p).is_empty());
    }
}
