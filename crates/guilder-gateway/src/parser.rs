//! Translation of dispatch frames into events.
//!
//! A dispatch frame names its payload with a wire name (`t`). The name is
//! first mapped to a [`WireEvent`], then the payload is decoded and fanned
//! out into zero or more [`Event`]s, consulting and updating the
//! [`GatewayCache`] on the way:
//!
//! | wire                   | always                  | only when cached    |
//! |------------------------|-------------------------|---------------------|
//! | `ChatMessageUpdated`   | `raw_message_edit`      | `message_edit`      |
//! | `ChatMessageDeleted`   | `raw_message_delete`    | `message_delete`    |
//! | `ServerMemberUpdated`  | `raw_member_update`     | `member_update`     |
//! | `ChannelMessageReaction*` | `raw_message_reaction_*` | `message_reaction_*` |
//! | `ServerChannelUpdated` |                         | `server_channel_update` |

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::GatewayCache;
use guilder_core::{
    BotMembershipEvent, ChannelUpdateEvent, ChatMessage, ClientError, ClientResult, Event,
    EventKind, MemberEvent, MemberUpdateEvent, MessageDeleteEvent, MessageEditEvent, MessageEvent,
    RawMessageDeleteEvent, RawMessageEditEvent, Reaction, ReactionEvent, Resource, ResourceEvent,
    ServerMember, User,
};

// =============================================================================
// Wire names
// =============================================================================

/// What a wire name means to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    MemberJoined,
    MemberRemoved,
    MemberUpdated,
    RolesUpdated,
    /// `BotAdd` or `BotRemove`.
    BotMembership(EventKind),
    ChannelCreated,
    ChannelUpdated,
    ChannelDeleted,
    Reaction { added: bool },
    /// A plain resource event: the payload object under `key` becomes a
    /// [`ResourceEvent`] of `kind`.
    Resource { kind: EventKind, key: &'static str },
}

impl WireEvent {
    /// Maps a wire name, including legacy `Team*` aliases. Unknown names
    /// return `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        use EventKind as K;

        let resource = |kind: EventKind, key: &'static str| Some(Self::Resource { kind, key });

        match name {
            "ChatMessageCreated" => Some(Self::MessageCreated),
            "ChatMessageUpdated" => Some(Self::MessageUpdated),
            "ChatMessageDeleted" => Some(Self::MessageDeleted),

            "ServerMemberJoined" | "TeamMemberJoined" => Some(Self::MemberJoined),
            "ServerMemberRemoved" | "TeamMemberRemoved" => Some(Self::MemberRemoved),
            "ServerMemberUpdated" | "TeamMemberUpdated" => Some(Self::MemberUpdated),
            "ServerRolesUpdated" | "TeamRolesUpdated" | "teamRolesUpdated" => {
                Some(Self::RolesUpdated)
            }
            "ServerMemberBanned" | "TeamMemberBanned" => resource(K::BanCreate, "serverMemberBan"),
            "ServerMemberUnbanned" | "TeamMemberUnbanned" => {
                resource(K::BanDelete, "serverMemberBan")
            }

            "BotServerMembershipCreated" | "BotTeamMembershipCreated" => {
                Some(Self::BotMembership(K::BotAdd))
            }
            "BotServerMembershipDeleted" | "BotTeamMembershipDeleted" => {
                Some(Self::BotMembership(K::BotRemove))
            }

            "ServerWebhookCreated" | "TeamWebhookCreated" => resource(K::WebhookCreate, "webhook"),
            "ServerWebhookUpdated" | "TeamWebhookUpdated" => resource(K::WebhookUpdate, "webhook"),

            "ServerChannelCreated" | "TeamChannelCreated" => Some(Self::ChannelCreated),
            "ServerChannelUpdated" | "TeamChannelUpdated" => Some(Self::ChannelUpdated),
            "ServerChannelDeleted" | "TeamChannelDeleted" => Some(Self::ChannelDeleted),

            "ChannelMessageReactionCreated" => Some(Self::Reaction { added: true }),
            "ChannelMessageReactionDeleted" => Some(Self::Reaction { added: false }),

            "RoleCreated" => resource(K::RoleCreate, "role"),
            "RoleUpdated" => resource(K::RoleUpdate, "role"),
            "RoleDeleted" => resource(K::RoleDelete, "role"),

            "DocCreated" => resource(K::DocCreate, "doc"),
            "DocUpdated" => resource(K::DocUpdate, "doc"),
            "DocDeleted" => resource(K::DocDelete, "doc"),

            "ForumTopicCreated" => resource(K::ForumTopicCreate, "forumTopic"),
            "ForumTopicUpdated" => resource(K::ForumTopicUpdate, "forumTopic"),
            "ForumTopicDeleted" => resource(K::ForumTopicDelete, "forumTopic"),
            "ForumTopicPinned" => resource(K::ForumTopicPin, "forumTopic"),
            "ForumTopicUnpinned" => resource(K::ForumTopicUnpin, "forumTopic"),
            "ForumTopicLocked" => resource(K::ForumTopicLock, "forumTopic"),
            "ForumTopicUnlocked" => resource(K::ForumTopicUnlock, "forumTopic"),

            "CalendarEventCreated" => resource(K::CalendarEventCreate, "calendarEvent"),
            "CalendarEventUpdated" => resource(K::CalendarEventUpdate, "calendarEvent"),
            "CalendarEventDeleted" => resource(K::CalendarEventDelete, "calendarEvent"),
            "CalendarEventRsvpUpdated" => resource(K::RsvpUpdate, "calendarEventRsvp"),
            "CalendarEventRsvpDeleted" => resource(K::RsvpDelete, "calendarEventRsvp"),

            "ListItemCreated" => resource(K::ListItemCreate, "listItem"),
            "ListItemUpdated" => resource(K::ListItemUpdate, "listItem"),
            "ListItemDeleted" => resource(K::ListItemDelete, "listItem"),
            "ListItemCompleted" => resource(K::ListItemComplete, "listItem"),
            "ListItemUncompleted" => resource(K::ListItemUncomplete, "listItem"),

            "AnnouncementCreated" => resource(K::AnnouncementCreate, "announcement"),
            "AnnouncementUpdated" => resource(K::AnnouncementUpdate, "announcement"),
            "AnnouncementDeleted" => resource(K::AnnouncementDelete, "announcement"),

            "GroupCreated" => resource(K::GroupCreate, "group"),
            "GroupUpdated" => resource(K::GroupUpdate, "group"),
            "GroupDeleted" => resource(K::GroupDelete, "group"),

            _ => None,
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletedMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRoles {
    user_id: String,
    #[serde(default)]
    role_ids: Vec<i64>,
}

/// Turns one dispatch into events.
///
/// `me` is the bot's own user id, used to detect `server_join`. Unknown wire
/// names produce no events.
pub fn parse_dispatch(
    name: &str,
    mut d: Value,
    cache: &mut GatewayCache,
    me: Option<&str>,
) -> ClientResult<Vec<Event>> {
    let Some(wire) = WireEvent::from_name(name) else {
        return Ok(Vec::new());
    };
    let server_id = str_field(&d, "serverId");

    let events = match wire {
        WireEvent::MessageCreated => {
            let message = message_field(&mut d, &server_id)?;
            cache.messages.insert(message.clone());
            vec![Event::Message(MessageEvent { message })]
        }

        WireEvent::MessageUpdated => {
            let after = message_field(&mut d, &server_id)?;
            let mut events = vec![Event::RawMessageEdit(RawMessageEditEvent {
                server_id,
                message: after.clone(),
            })];
            if let Some(before) = cache.messages.get(&after.id).cloned() {
                cache.messages.insert(after.clone());
                events.push(Event::MessageEdit(MessageEditEvent { before, after }));
            }
            events
        }

        WireEvent::MessageDeleted => {
            let deleted: DeletedMessage = take_field(&mut d, "message")?;
            let cached = cache.messages.remove(&deleted.id);
            let mut events = vec![Event::RawMessageDelete(RawMessageDeleteEvent {
                server_id,
                channel_id: deleted.channel_id,
                message_id: deleted.id,
                deleted_at: deleted.deleted_at,
                cached_message: cached.clone(),
            })];
            if let Some(mut message) = cached {
                message.deleted_at = deleted.deleted_at.or(message.deleted_at);
                events.push(Event::MessageDelete(MessageDeleteEvent { message }));
            }
            events
        }

        WireEvent::MemberJoined => {
            let server_id = require_server(server_id)?;
            let mut member: ServerMember = take_field(&mut d, "member")?;
            member.server_id = Some(server_id.clone());
            cache.insert_member(&server_id, member.clone());

            let event = MemberEvent { server_id, member };
            let mut events = Vec::with_capacity(2);
            if me.is_some_and(|me| me == event.member.id()) {
                events.push(Event::ServerJoin(event.clone()));
            }
            events.push(Event::MemberJoin(event));
            events
        }

        WireEvent::MemberRemoved => {
            let server_id = require_server(server_id)?;
            let user_id: String = take_field(&mut d, "userId")?;
            let is_ban = bool_field(&d, "isBan");
            let is_kick = bool_field(&d, "isKick");

            let member = cache
                .remove_member(&server_id, &user_id)
                .unwrap_or_else(|| stub_member(&server_id, &user_id));
            let event = MemberEvent { server_id, member };

            let mut events = vec![Event::MemberRemove(event.clone())];
            if is_ban {
                events.push(Event::MemberBan(event.clone()));
            }
            if is_kick {
                events.push(Event::MemberKick(event.clone()));
            }
            if !is_ban && !is_kick {
                events.push(Event::MemberLeave(event));
            }
            events
        }

        WireEvent::MemberUpdated => {
            let server_id = require_server(server_id)?;
            let info = d.get("userInfo").cloned().unwrap_or(Value::Null);
            let user_id = str_field(&d, "userId")
                .or_else(|| str_field(&info, "id"))
                .ok_or_else(|| ClientError::invalid_data("member update without a user id"))?;

            let mut raw = stub_member(&server_id, &user_id);
            apply_user_info(&mut raw, &info);
            update_member(cache, server_id, raw, |member| apply_user_info(member, &info))
        }

        WireEvent::RolesUpdated => {
            let server_id = require_server(server_id)?;
            let updates: Vec<MemberRoles> = match d.get_mut("memberRoleIds").map(Value::take) {
                None | Some(Value::Null) => Vec::new(),
                Some(value) => serde_json::from_value(value)?,
            };

            let mut events = Vec::new();
            for update in updates {
                let mut raw = stub_member(&server_id, &update.user_id);
                raw.role_ids = update.role_ids.clone();
                events.extend(update_member(cache, server_id.clone(), raw, |member| {
                    member.role_ids = update.role_ids.clone();
                }));
            }
            events
        }

        WireEvent::BotMembership(kind) => {
            let server = Resource::from_value(None, take_value(&mut d, "server")?);
            let actor_id = str_field(&d, "createdBy").or_else(|| str_field(&d, "deletedBy"));
            let event = BotMembershipEvent { server, actor_id };
            match kind {
                EventKind::BotRemove => vec![Event::BotRemove(event)],
                _ => vec![Event::BotAdd(event)],
            }
        }

        WireEvent::ChannelCreated => {
            let channel = Resource::from_value(server_id.clone(), take_value(&mut d, "channel")?);
            cache.insert_channel(channel.clone());
            vec![Event::ServerChannelCreate(ResourceEvent {
                server_id,
                resource: channel,
            })]
        }

        WireEvent::ChannelUpdated => {
            let after = Resource::from_value(server_id.clone(), take_value(&mut d, "channel")?);
            let before = cache.channel(&after.id).cloned();
            cache.insert_channel(after.clone());
            match before {
                Some(before) => vec![Event::ServerChannelUpdate(ChannelUpdateEvent {
                    server_id,
                    before,
                    after,
                })],
                None => Vec::new(),
            }
        }

        WireEvent::ChannelDeleted => {
            let channel = Resource::from_value(server_id.clone(), take_value(&mut d, "channel")?);
            cache.remove_channel(&channel.id);
            vec![Event::ServerChannelDelete(ResourceEvent {
                server_id,
                resource: channel,
            })]
        }

        WireEvent::Reaction { added } => {
            let mut reaction: Reaction = take_field(&mut d, "reaction")?;
            if reaction.server_id.is_none() {
                reaction.server_id = server_id.clone();
            }
            let message = cache.messages.get(&reaction.message_id).cloned();
            let cached = message.is_some();
            let event = ReactionEvent {
                server_id,
                reaction,
                message,
            };

            let (raw, plain): (fn(ReactionEvent) -> Event, fn(ReactionEvent) -> Event) = if added {
                (Event::RawMessageReactionAdd, Event::MessageReactionAdd)
            } else {
                (Event::RawMessageReactionRemove, Event::MessageReactionRemove)
            };

            let mut events = vec![raw(event.clone())];
            if cached {
                events.push(plain(event));
            }
            events
        }

        WireEvent::Resource { kind, key } => {
            let resource = Resource::from_value(server_id.clone(), take_value(&mut d, key)?);
            let event = resource_event(kind, ResourceEvent { server_id, resource })
                .ok_or_else(|| ClientError::invalid_data(format!("{kind} is not a resource event")))?;
            vec![event]
        }
    };

    Ok(events)
}

/// Emits `raw_member_update` for `raw` and, when the member is cached,
/// `member_update` with `apply` run on a copy of the cached member.
fn update_member(
    cache: &mut GatewayCache,
    server_id: String,
    raw: ServerMember,
    apply: impl FnOnce(&mut ServerMember),
) -> Vec<Event> {
    let mut events = vec![Event::RawMemberUpdate(MemberEvent {
        server_id: server_id.clone(),
        member: raw.clone(),
    })];

    match cache.member(&server_id, raw.id()).cloned() {
        Some(before) => {
            let mut after = before.clone();
            apply(&mut after);
            cache.insert_member(&server_id, after.clone());
            events.push(Event::MemberUpdate(MemberUpdateEvent {
                server_id,
                before,
                after,
            }));
        }
        None => cache.insert_member(&server_id, raw),
    }

    events
}

fn apply_user_info(member: &mut ServerMember, info: &Value) {
    if let Some(nickname) = info.get("nickname") {
        member.nickname = nickname.as_str().map(str::to_string);
    }
}

fn resource_event(kind: EventKind, payload: ResourceEvent) -> Option<Event> {
    macro_rules! wrap {
        ($($variant:ident),* $(,)?) => {
            match kind {
                $( EventKind::$variant => Some(Event::$variant(payload)), )*
                _ => None,
            }
        };
    }
    wrap!(
        BanCreate, BanDelete, RoleCreate, RoleUpdate, RoleDelete, WebhookCreate, WebhookUpdate,
        DocCreate, DocUpdate, DocDelete, ForumTopicCreate, ForumTopicUpdate, ForumTopicDelete,
        ForumTopicPin, ForumTopicUnpin, ForumTopicLock, ForumTopicUnlock, CalendarEventCreate,
        CalendarEventUpdate, CalendarEventDelete, RsvpUpdate, RsvpDelete, ListItemCreate,
        ListItemUpdate, ListItemDelete, ListItemComplete, ListItemUncomplete,
        AnnouncementCreate, AnnouncementUpdate, AnnouncementDelete, GroupCreate, GroupUpdate,
        GroupDelete,
    )
}

// =============================================================================
// Field helpers
// =============================================================================

fn take_value(d: &mut Value, key: &str) -> ClientResult<Value> {
    match d.get_mut(key).map(Value::take) {
        None | Some(Value::Null) => Err(ClientError::invalid_data(format!(
            "payload is missing '{key}'"
        ))),
        Some(value) => Ok(value),
    }
}

fn take_field<T: DeserializeOwned>(d: &mut Value, key: &str) -> ClientResult<T> {
    Ok(serde_json::from_value(take_value(d, key)?)?)
}

fn message_field(d: &mut Value, server_id: &Option<String>) -> ClientResult<ChatMessage> {
    let mut message: ChatMessage = take_field(d, "message")?;
    if message.server_id.is_none() {
        message.server_id = server_id.clone();
    }
    Ok(message)
}

fn str_field(d: &Value, key: &str) -> Option<String> {
    d.get(key).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(d: &Value, key: &str) -> bool {
    d.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn require_server(server_id: Option<String>) -> ClientResult<String> {
    server_id.ok_or_else(|| ClientError::invalid_data("payload is missing 'serverId'"))
}

fn stub_member(server_id: &str, user_id: &str) -> ServerMember {
    ServerMember {
        user: User {
            id: user_id.to_string(),
            name: String::new(),
            kind: None,
            avatar: None,
            created_at: None,
        },
        server_id: Some(server_id.to_string()),
        role_ids: Vec::new(),
        nickname: None,
        joined_at: None,
        is_owner: false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(Event::kind).collect()
    }

    fn message_created(cache: &mut GatewayCache, id: &str, content: &str) -> Vec<Event> {
        parse_dispatch(
            "ChatMessageCreated",
            json!({
                "serverId": "s1",
                "message": {"id": id, "channelId": "c1", "content": content, "createdBy": "u1"}
            }),
            cache,
            None,
        )
        .unwrap()
    }

    fn member_payload(user_id: &str) -> Value {
        json!({
            "serverId": "s1",
            "member": {"user": {"id": user_id, "name": "Someone"}, "roleIds": [1], "nickname": "nick"}
        })
    }

    #[test]
    fn test_unknown_wire_name_is_ignored() {
        let mut cache = GatewayCache::default();
        let events = parse_dispatch("SomethingNew", json!({}), &mut cache, None).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_message_create_caches() {
        let mut cache = GatewayCache::default();
        let events = message_created(&mut cache, "m1", "hi");

        assert_eq!(kinds(&events), vec![EventKind::Message]);
        assert_eq!(events[0].server_id(), Some("s1"));
        assert_eq!(cache.messages.get("m1").map(ChatMessage::text), Some("hi"));
    }

    #[test]
    fn test_message_edit_fan_out() {
        let mut cache = GatewayCache::default();
        let edit = |id: &str| {
            json!({"serverId": "s1", "message": {"id": id, "channelId": "c1", "content": "edited"}})
        };

        let events = parse_dispatch("ChatMessageUpdated", edit("m1"), &mut cache, None).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::RawMessageEdit]);

        message_created(&mut cache, "m1", "original");
        let events = parse_dispatch("ChatMessageUpdated", edit("m1"), &mut cache, None).unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::RawMessageEdit, EventKind::MessageEdit]
        );
        match &events[1] {
            Event::MessageEdit(e) => {
                assert_eq!(e.before.text(), "original");
                assert_eq!(e.after.text(), "edited");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(cache.messages.get("m1").map(ChatMessage::text), Some("edited"));
    }

    #[test]
    fn test_message_delete_fan_out() {
        let mut cache = GatewayCache::default();
        message_created(&mut cache, "m1", "bye");
        let payload = json!({
            "serverId": "s1",
            "message": {"id": "m1", "channelId": "c1", "deletedAt": "2024-01-01T00:00:00Z"}
        });

        let events = parse_dispatch("ChatMessageDeleted", payload.clone(), &mut cache, None).unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::RawMessageDelete, EventKind::MessageDelete]
        );
        match &events[0] {
            Event::RawMessageDelete(e) => {
                assert_eq!(e.cached_message.as_ref().map(ChatMessage::text), Some("bye"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            Event::MessageDelete(e) => assert!(e.message.deleted_at.is_some()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(cache.messages.get("m1").is_none());

        let events = parse_dispatch("ChatMessageDeleted", payload, &mut cache, None).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::RawMessageDelete]);
    }

    #[test]
    fn test_member_join_detects_self() {
        let mut cache = GatewayCache::default();

        let events =
            parse_dispatch("ServerMemberJoined", member_payload("u2"), &mut cache, Some("bot")).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::MemberJoin]);

        let events =
            parse_dispatch("TeamMemberJoined", member_payload("bot"), &mut cache, Some("bot")).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::ServerJoin, EventKind::MemberJoin]);
        assert_eq!(cache.member_count(), 2);
    }

    #[test]
    fn test_member_remove_variants() {
        let mut cache = GatewayCache::default();
        parse_dispatch("ServerMemberJoined", member_payload("u2"), &mut cache, None).unwrap();

        let events = parse_dispatch(
            "ServerMemberRemoved",
            json!({"serverId": "s1", "userId": "u2", "isKick": true}),
            &mut cache,
            None,
        )
        .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::MemberRemove, EventKind::MemberKick]);
        match &events[0] {
            Event::MemberRemove(e) => assert_eq!(e.member.display_name(), "nick"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(cache.member("s1", "u2").is_none());

        let events = parse_dispatch(
            "ServerMemberRemoved",
            json!({"serverId": "s1", "userId": "u3"}),
            &mut cache,
            None,
        )
        .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::MemberRemove, EventKind::MemberLeave]);

        let events = parse_dispatch(
            "ServerMemberRemoved",
            json!({"serverId": "s1", "userId": "u4", "isBan": true}),
            &mut cache,
            None,
        )
        .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::MemberRemove, EventKind::MemberBan]);
    }

    #[test]
    fn test_member_update_fan_out() {
        let mut cache = GatewayCache::default();
        let update = json!({"serverId": "s1", "userInfo": {"id": "u2", "nickname": "renamed"}});

        let events = parse_dispatch("ServerMemberUpdated", update.clone(), &mut cache, None).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::RawMemberUpdate]);

        parse_dispatch("ServerMemberJoined", member_payload("u2"), &mut cache, None).unwrap();
        let events = parse_dispatch("ServerMemberUpdated", update, &mut cache, None).unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::RawMemberUpdate, EventKind::MemberUpdate]
        );
        match &events[1] {
            Event::MemberUpdate(e) => {
                assert_eq!(e.before.display_name(), "nick");
                assert_eq!(e.after.display_name(), "renamed");
                assert_eq!(e.after.role_ids, vec![1]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_roles_updated_per_member() {
        let mut cache = GatewayCache::default();
        parse_dispatch("ServerMemberJoined", member_payload("u2"), &mut cache, None).unwrap();

        let events = parse_dispatch(
            "ServerRolesUpdated",
            json!({"serverId": "s1", "memberRoleIds": [
                {"userId": "u2", "roleIds": [1, 2]},
                {"userId": "u3", "roleIds": [3]}
            ]}),
            &mut cache,
            None,
        )
        .unwrap();
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::RawMemberUpdate,
                EventKind::MemberUpdate,
                EventKind::RawMemberUpdate
            ]
        );
        assert_eq!(cache.member("s1", "u2").map(|m| m.role_ids.clone()), Some(vec![1, 2]));
        assert_eq!(cache.member("s1", "u3").map(|m| m.role_ids.clone()), Some(vec![3]));
    }

    #[test]
    fn test_reaction_fan_out() {
        let mut cache = GatewayCache::default();
        let reaction = json!({
            "serverId": "s1",
            "reaction": {
                "channelId": "c1", "messageId": "m1", "createdBy": "u1",
                "emote": {"id": 90001, "name": "thumbsup"}
            }
        });

        let events = parse_dispatch("ChannelMessageReactionCreated", reaction.clone(), &mut cache, None)
            .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::RawMessageReactionAdd]);

        message_created(&mut cache, "m1", "react to me");
        let events = parse_dispatch("ChannelMessageReactionDeleted", reaction, &mut cache, None)
            .unwrap();
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::RawMessageReactionRemove,
                EventKind::MessageReactionRemove
            ]
        );
        match &events[1] {
            Event::MessageReactionRemove(e) => {
                assert_eq!(e.reaction.emote.name, "thumbsup");
                assert_eq!(e.reaction.server_id.as_deref(), Some("s1"));
                assert!(e.message.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_channel_update_requires_cache() {
        let mut cache = GatewayCache::default();
        let channel = |name: &str| {
            json!({"serverId": "s1", "channel": {"id": "c1", "name": name, "type": "chat"}})
        };

        let events = parse_dispatch("ServerChannelUpdated", channel("a"), &mut cache, None).unwrap();
        assert!(events.is_empty());

        let events = parse_dispatch("ServerChannelUpdated", channel("b"), &mut cache, None).unwrap();
        match events.as_slice() {
            [Event::ServerChannelUpdate(e)] => {
                assert_eq!(e.before.str_field("name"), Some("a"));
                assert_eq!(e.after.str_field("name"), Some("b"));
            }
            other => panic!("unexpected events {other:?}"),
        }

        let events = parse_dispatch("TeamChannelDeleted", channel("b"), &mut cache, None).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::ServerChannelDelete]);
        assert!(cache.channel("c1").is_none());
    }

    #[test]
    fn test_resource_events() {
        let mut cache = GatewayCache::default();
        let events = parse_dispatch(
            "ListItemCompleted",
            json!({"serverId": "s1", "listItem": {"id": "li1", "message": "done"}}),
            &mut cache,
            None,
        )
        .unwrap();
        match events.as_slice() {
            [Event::ListItemComplete(e)] => {
                assert_eq!(e.resource.id, "li1");
                assert_eq!(e.server_id.as_deref(), Some("s1"));
            }
            other => panic!("unexpected events {other:?}"),
        }

        let events = parse_dispatch(
            "DocCreated",
            json!({"serverId": "s1", "doc": {"id": 42, "title": "notes"}}),
            &mut cache,
            None,
        )
        .unwrap();
        match events.as_slice() {
            [Event::DocCreate(e)] => assert_eq!(e.resource.id, "42"),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_bot_membership() {
        let mut cache = GatewayCache::default();
        let events = parse_dispatch(
            "BotServerMembershipDeleted",
            json!({"server": {"id": "s9", "name": "Home"}, "deletedBy": "u1"}),
            &mut cache,
            None,
        )
        .unwrap();
        match events.as_slice() {
            [Event::BotRemove(e)] => {
                assert_eq!(e.server.id, "s9");
                assert_eq!(e.actor_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_missing_payload_is_an_error() {
        let mut cache = GatewayCache::default();
        let err = parse_dispatch("ChatMessageCreated", json!({"serverId": "s1"}), &mut cache, None)
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidData(_)));
    }
}
