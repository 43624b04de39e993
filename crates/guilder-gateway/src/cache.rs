//! In-memory state filled from gateway events.

use std::collections::{HashMap, VecDeque};

use guilder_core::{ChatMessage, Resource, ServerMember};

/// Default bound of the message cache.
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

/// Recently seen messages, evicting the oldest first.
///
/// A bound of `None` (or zero) disables caching entirely.
#[derive(Debug, Clone)]
pub struct MessageCache {
    max: Option<usize>,
    order: VecDeque<String>,
    messages: HashMap<String, ChatMessage>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_MESSAGES))
    }
}

impl MessageCache {
    pub fn new(max: Option<usize>) -> Self {
        Self {
            max,
            order: VecDeque::new(),
            messages: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.max, Some(max) if max > 0)
    }

    /// Inserts or replaces a message. Replacing keeps its eviction position.
    pub fn insert(&mut self, message: ChatMessage) {
        let Some(max) = self.max.filter(|max| *max > 0) else {
            return;
        };

        if !self.messages.contains_key(&message.id) {
            self.order.push_back(message.id.clone());
        }
        self.messages.insert(message.id.clone(), message);

        while self.order.len() > max {
            if let Some(oldest) = self.order.pop_front() {
                self.messages.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let removed = self.messages.remove(id)?;
        self.order.retain(|cached| cached != id);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Cached messages, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id).cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.messages.clear();
    }
}

/// Everything the event parser remembers between frames.
#[derive(Debug, Default)]
pub struct GatewayCache {
    pub messages: MessageCache,
    members: HashMap<(String, String), ServerMember>,
    channels: HashMap<String, Resource>,
}

impl GatewayCache {
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            messages: MessageCache::new(max_messages),
            ..Default::default()
        }
    }

    pub fn member(&self, server_id: &str, user_id: &str) -> Option<&ServerMember> {
        self.members
            .get(&(server_id.to_string(), user_id.to_string()))
    }

    pub fn insert_member(&mut self, server_id: &str, member: ServerMember) {
        self.members
            .insert((server_id.to_string(), member.id().to_string()), member);
    }

    pub fn remove_member(&mut self, server_id: &str, user_id: &str) -> Option<ServerMember> {
        self.members
            .remove(&(server_id.to_string(), user_id.to_string()))
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn channel(&self, channel_id: &str) -> Option<&Resource> {
        self.channels.get(channel_id)
    }

    pub fn insert_channel(&mut self, channel: Resource) {
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn remove_channel(&mut self, channel_id: &str) -> Option<Resource> {
        self.channels.remove(channel_id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.members.clear();
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, content: &str) -> ChatMessage {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "channelId": "c1",
            "content": content,
        }))
        .unwrap()
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut cache = MessageCache::new(Some(2));
        cache.insert(message("a", "1"));
        cache.insert(message("b", "2"));
        cache.insert(message("c", "3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        let ids: Vec<_> = cache.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut cache = MessageCache::new(Some(2));
        cache.insert(message("a", "1"));
        cache.insert(message("b", "2"));
        cache.insert(message("a", "edited"));
        cache.insert(message("c", "3"));

        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").map(ChatMessage::text), Some("2"));
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = MessageCache::new(None);
        cache.insert(message("a", "1"));
        assert!(!cache.is_enabled());
        assert!(cache.is_empty());

        let mut zero = MessageCache::new(Some(0));
        zero.insert(message("a", "1"));
        assert!(zero.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut cache = MessageCache::default();
        cache.insert(message("a", "1"));
        assert_eq!(cache.remove("a").map(|m| m.id), Some("a".to_string()));
        assert!(cache.remove("a").is_none());
        assert!(cache.messages().is_empty());
    }
}
