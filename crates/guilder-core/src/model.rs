//! Minimal typed payloads carried by gateway events.
//!
//! Only the fields the client itself relies on are typed; everything else
//! stays reachable through the raw JSON kept on each record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user or bot account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `"bot"` or `"user"`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Returns `true` if this account is a bot.
    pub fn is_bot(&self) -> bool {
        self.kind.as_deref() == Some("bot")
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_by_webhook_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
}

impl ChatMessage {
    /// Message text, or an empty string for content-less messages.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A member of a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMember {
    pub user: User,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_owner: bool,
}

impl ServerMember {
    /// The member's user id.
    pub fn id(&self) -> &str {
        &self.user.id
    }

    /// Nickname when set, otherwise the account name.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.user.name)
    }
}

/// The emote used in a reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emote {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A reaction on a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub channel_id: String,
    pub message_id: String,
    pub created_by: String,
    pub emote: Emote,
    #[serde(default)]
    pub server_id: Option<String>,
}

/// A loosely typed server resource: channel, webhook, role, doc, forum topic,
/// calendar event, RSVP, list item, announcement or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource id, stringified when the API sends a number.
    pub id: String,
    pub server_id: Option<String>,
    /// The full JSON object as received.
    pub data: Value,
}

impl Resource {
    /// Wraps a JSON object. `id` is read from `data["id"]` (string or number)
    /// and `server_id` from `data["serverId"]` unless given.
    pub fn from_value(server_id: Option<String>, data: Value) -> Self {
        let id = match data.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let server_id = server_id.or_else(|| {
            data.get("serverId")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Self {
            id,
            server_id,
            data,
        }
    }

    /// Reads a string field from the raw data.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_deserialize() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": "m1",
            "type": "default",
            "channelId": "c1",
            "serverId": "s1",
            "content": "hello",
            "createdBy": "u1",
            "createdAt": "2024-01-01T00:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(message.text(), "hello");
        assert_eq!(message.server_id.as_deref(), Some("s1"));
        assert!(message.created_at.is_some());
        assert!(!message.is_private);
    }

    #[test]
    fn test_resource_numeric_id() {
        let res = Resource::from_value(None, json!({ "id": 42, "serverId": "s1" }));
        assert_eq!(res.id, "42");
        assert_eq!(res.server_id.as_deref(), Some("s1"));

        let res = Resource::from_value(Some("s2".into()), json!({ "id": "abc", "name": "x" }));
        assert_eq!(res.id, "abc");
        assert_eq!(res.server_id.as_deref(), Some("s2"));
        assert_eq!(res.str_field("name"), Some("x"));
    }

    #[test]
    fn test_member_display_name() {
        let member: ServerMember = serde_json::from_value(json!({
            "user": { "id": "u1", "name": "alice", "type": "user" },
            "roleIds": [1, 2],
            "nickname": null
        }))
        .unwrap();
        assert_eq!(member.display_name(), "alice");
        assert_eq!(member.role_ids, vec![1, 2]);
        assert!(!member.user.is_bot());
    }
}
