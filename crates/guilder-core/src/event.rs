//! Gateway events as tagged variants.
//!
//! Every dispatch name the client can emit is one [`Event`] variant with a
//! typed payload, mirrored by a fieldless [`EventKind`] that handler
//! registries use as their key.
//!
//! Several variants share one payload type (all member lifecycle events
//! carry a [`MemberEvent`], every doc/forum/calendar/list event carries a
//! [`ResourceEvent`]), so a handler can extract either a precise variant via
//! its kind or a whole family via the payload type:
//!
//! ```rust,ignore
//! use guilder_core::{EventContext, MessageEvent, ResourceEvent};
//!
//! async fn on_message(event: EventContext<MessageEvent>) {
//!     println!("{}", event.message.text());
//! }
//!
//! async fn on_any_resource(event: EventContext<ResourceEvent>) {
//!     println!("resource {} changed", event.resource.id);
//! }
//! ```

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::ClientError;
use crate::model::{ChatMessage, Reaction, Resource, ServerMember, User};

// =============================================================================
// Payloads
// =============================================================================

/// A gateway connection was (re-)established.
#[derive(Debug, Clone, Default)]
pub struct ConnectEvent;

/// The gateway sent its welcome; the client user is known.
#[derive(Debug, Clone)]
pub struct ReadyEvent {
    pub user: User,
}

/// A resume finished replaying missed events.
#[derive(Debug, Clone, Default)]
pub struct ResumedEvent;

/// The gateway connection dropped.
#[derive(Debug, Clone, Default)]
pub struct DisconnectEvent {
    pub code: Option<u16>,
    pub reason: String,
}

/// A raw frame received from or sent to the gateway.
#[derive(Debug, Clone)]
pub struct RawSocketEvent {
    pub payload: String,
}

/// An error raised while processing gateway traffic.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// The wire event being handled when the error occurred, if any.
    pub source_event: Option<String>,
    pub error: ClientError,
}

/// A message was created.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub message: ChatMessage,
}

/// A cached message was edited.
#[derive(Debug, Clone)]
pub struct MessageEditEvent {
    pub before: ChatMessage,
    pub after: ChatMessage,
}

/// A message was edited, whether or not it was cached.
#[derive(Debug, Clone)]
pub struct RawMessageEditEvent {
    pub server_id: Option<String>,
    pub message: ChatMessage,
}

/// A cached message was deleted.
#[derive(Debug, Clone)]
pub struct MessageDeleteEvent {
    pub message: ChatMessage,
}

/// A message was deleted, whether or not it was cached.
#[derive(Debug, Clone)]
pub struct RawMessageDeleteEvent {
    pub server_id: Option<String>,
    pub channel_id: String,
    pub message_id: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub cached_message: Option<ChatMessage>,
}

/// A reaction was added or removed.
///
/// `message` is the cached message the reaction belongs to; the non-raw
/// variants are only emitted when it is present.
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub server_id: Option<String>,
    pub reaction: Reaction,
    pub message: Option<ChatMessage>,
}

/// A member lifecycle change in a server.
#[derive(Debug, Clone)]
pub struct MemberEvent {
    pub server_id: String,
    pub member: ServerMember,
}

/// A cached member was updated.
#[derive(Debug, Clone)]
pub struct MemberUpdateEvent {
    pub server_id: String,
    pub before: ServerMember,
    pub after: ServerMember,
}

/// The bot was added to or removed from a server.
#[derive(Debug, Clone)]
pub struct BotMembershipEvent {
    pub server: Resource,
    /// The user who added or removed the bot.
    pub actor_id: Option<String>,
}

/// A cached channel was updated.
#[derive(Debug, Clone)]
pub struct ChannelUpdateEvent {
    pub server_id: Option<String>,
    pub before: Resource,
    pub after: Resource,
}

/// A change to a loosely typed server resource.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub server_id: Option<String>,
    pub resource: Resource,
}

// =============================================================================
// Event / EventKind
// =============================================================================

/// Returned when parsing an unknown dispatch name.
#[derive(Debug, Clone, Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

macro_rules! define_events {
    ($( $(#[$doc:meta])* $variant:ident($payload:ty) => $name:literal, )*) => {
        /// An event dispatched to handlers.
        #[derive(Debug, Clone)]
        pub enum Event {
            $( $(#[$doc])* $variant($payload), )*
        }

        /// The dispatch name of an [`Event`], used as the registry key.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $( $(#[$doc])* $variant, )*
        }

        impl EventKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [EventKind] = &[ $( EventKind::$variant, )* ];

            /// The dispatch name, e.g. `"message_edit"`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( EventKind::$variant => $name, )*
                }
            }
        }

        impl FromStr for EventKind {
            type Err = UnknownEventKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("on_").unwrap_or(s);
                match s {
                    $( $name => Ok(EventKind::$variant), )*
                    _ => Err(UnknownEventKind(s.to_string())),
                }
            }
        }

        impl Event {
            /// The kind of this event.
            pub fn kind(&self) -> EventKind {
                match self {
                    $( Event::$variant(_) => EventKind::$variant, )*
                }
            }
        }
    };
}

define_events! {
    // Lifecycle
    Connect(ConnectEvent) => "connect",
    Ready(ReadyEvent) => "ready",
    Resumed(ResumedEvent) => "resumed",
    Disconnect(DisconnectEvent) => "disconnect",
    SocketRawReceive(RawSocketEvent) => "socket_raw_receive",
    SocketRawSend(RawSocketEvent) => "socket_raw_send",
    Error(ErrorEvent) => "error",

    // Messages
    Message(MessageEvent) => "message",
    MessageEdit(MessageEditEvent) => "message_edit",
    RawMessageEdit(RawMessageEditEvent) => "raw_message_edit",
    MessageDelete(MessageDeleteEvent) => "message_delete",
    RawMessageDelete(RawMessageDeleteEvent) => "raw_message_delete",

    // Reactions
    MessageReactionAdd(ReactionEvent) => "message_reaction_add",
    RawMessageReactionAdd(ReactionEvent) => "raw_message_reaction_add",
    MessageReactionRemove(ReactionEvent) => "message_reaction_remove",
    RawMessageReactionRemove(ReactionEvent) => "raw_message_reaction_remove",

    // Members
    MemberJoin(MemberEvent) => "member_join",
    /// The bot user itself joined a server.
    ServerJoin(MemberEvent) => "server_join",
    MemberRemove(MemberEvent) => "member_remove",
    MemberBan(MemberEvent) => "member_ban",
    MemberKick(MemberEvent) => "member_kick",
    MemberLeave(MemberEvent) => "member_leave",
    MemberUpdate(MemberUpdateEvent) => "member_update",
    RawMemberUpdate(MemberEvent) => "raw_member_update",
    BanCreate(ResourceEvent) => "ban_create",
    BanDelete(ResourceEvent) => "ban_delete",
    BotAdd(BotMembershipEvent) => "bot_add",
    BotRemove(BotMembershipEvent) => "bot_remove",

    // Roles
    RoleCreate(ResourceEvent) => "role_create",
    RoleUpdate(ResourceEvent) => "role_update",
    RoleDelete(ResourceEvent) => "role_delete",

    // Channels
    ServerChannelCreate(ResourceEvent) => "server_channel_create",
    ServerChannelUpdate(ChannelUpdateEvent) => "server_channel_update",
    ServerChannelDelete(ResourceEvent) => "server_channel_delete",

    // Webhooks
    WebhookCreate(ResourceEvent) => "webhook_create",
    WebhookUpdate(ResourceEvent) => "webhook_update",

    // Docs
    DocCreate(ResourceEvent) => "doc_create",
    DocUpdate(ResourceEvent) => "doc_update",
    DocDelete(ResourceEvent) => "doc_delete",

    // Forums
    ForumTopicCreate(ResourceEvent) => "forum_topic_create",
    ForumTopicUpdate(ResourceEvent) => "forum_topic_update",
    ForumTopicDelete(ResourceEvent) => "forum_topic_delete",
    ForumTopicPin(ResourceEvent) => "forum_topic_pin",
    ForumTopicUnpin(ResourceEvent) => "forum_topic_unpin",
    ForumTopicLock(ResourceEvent) => "forum_topic_lock",
    ForumTopicUnlock(ResourceEvent) => "forum_topic_unlock",

    // Calendar
    CalendarEventCreate(ResourceEvent) => "calendar_event_create",
    CalendarEventUpdate(ResourceEvent) => "calendar_event_update",
    CalendarEventDelete(ResourceEvent) => "calendar_event_delete",
    RsvpUpdate(ResourceEvent) => "rsvp_update",
    RsvpDelete(ResourceEvent) => "rsvp_delete",

    // List items
    ListItemCreate(ResourceEvent) => "list_item_create",
    ListItemUpdate(ResourceEvent) => "list_item_update",
    ListItemDelete(ResourceEvent) => "list_item_delete",
    ListItemComplete(ResourceEvent) => "list_item_complete",
    ListItemUncomplete(ResourceEvent) => "list_item_uncomplete",

    // Announcements
    AnnouncementCreate(ResourceEvent) => "announcement_create",
    AnnouncementUpdate(ResourceEvent) => "announcement_update",
    AnnouncementDelete(ResourceEvent) => "announcement_delete",

    // Groups
    GroupCreate(ResourceEvent) => "group_create",
    GroupUpdate(ResourceEvent) => "group_update",
    GroupDelete(ResourceEvent) => "group_delete",
}

impl EventKind {
    /// Returns `true` for events that fire regardless of cache state.
    pub fn is_raw(&self) -> bool {
        self.as_str().starts_with("raw_") || self.as_str().starts_with("socket_raw_")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    /// The dispatch name of this event.
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// The server this event belongs to, when it has one.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Event::Message(e) => e.message.server_id.as_deref(),
            Event::MessageEdit(e) => e.after.server_id.as_deref(),
            Event::RawMessageEdit(e) => e.server_id.as_deref(),
            Event::MessageDelete(e) => e.message.server_id.as_deref(),
            Event::RawMessageDelete(e) => e.server_id.as_deref(),
            Event::MessageReactionAdd(e)
            | Event::RawMessageReactionAdd(e)
            | Event::MessageReactionRemove(e)
            | Event::RawMessageReactionRemove(e) => e.server_id.as_deref(),
            Event::MemberJoin(e)
            | Event::ServerJoin(e)
            | Event::MemberRemove(e)
            | Event::MemberBan(e)
            | Event::MemberKick(e)
            | Event::MemberLeave(e)
            | Event::RawMemberUpdate(e) => Some(e.server_id.as_str()),
            Event::MemberUpdate(e) => Some(e.server_id.as_str()),
            Event::BotAdd(e) | Event::BotRemove(e) => Some(e.server.id.as_str()),
            Event::ServerChannelUpdate(e) => e.server_id.as_deref(),
            other => resource_server_id(other),
        }
    }
}

fn resource_server_id(event: &Event) -> Option<&str> {
    macro_rules! resource_arms {
        ($($variant:ident),*) => {
            match event {
                $( Event::$variant(e) => e.server_id.as_deref(), )*
                _ => None,
            }
        };
    }
    resource_arms!(
        BanCreate, BanDelete, RoleCreate, RoleUpdate, RoleDelete, ServerChannelCreate,
        ServerChannelDelete, WebhookCreate, WebhookUpdate, DocCreate, DocUpdate, DocDelete,
        ForumTopicCreate, ForumTopicUpdate, ForumTopicDelete, ForumTopicPin, ForumTopicUnpin,
        ForumTopicLock, ForumTopicUnlock, CalendarEventCreate, CalendarEventUpdate,
        CalendarEventDelete, RsvpUpdate, RsvpDelete, ListItemCreate, ListItemUpdate,
        ListItemDelete, ListItemComplete, ListItemUncomplete, AnnouncementCreate,
        AnnouncementUpdate, AnnouncementDelete, GroupCreate, GroupUpdate, GroupDelete
    )
}

// =============================================================================
// FromEvent / EventContext
// =============================================================================

/// Extraction of a typed payload from an [`Event`].
///
/// Implemented for every payload type; extraction succeeds for any variant
/// carrying that payload.
pub trait FromEvent: Sized + Clone {
    /// Returns the payload if `event` carries one of this type.
    fn from_event(event: &Event) -> Option<Self>;
}

macro_rules! impl_from_event {
    ($payload:ty => [$($variant:ident),+ $(,)?]) => {
        impl FromEvent for $payload {
            fn from_event(event: &Event) -> Option<Self> {
                match event {
                    $( Event::$variant(p) => Some(p.clone()), )+
                    _ => None,
                }
            }
        }
    };
}

impl_from_event!(ConnectEvent => [Connect]);
impl_from_event!(ReadyEvent => [Ready]);
impl_from_event!(ResumedEvent => [Resumed]);
impl_from_event!(DisconnectEvent => [Disconnect]);
impl_from_event!(RawSocketEvent => [SocketRawReceive, SocketRawSend]);
impl_from_event!(ErrorEvent => [Error]);
impl_from_event!(MessageEvent => [Message]);
impl_from_event!(MessageEditEvent => [MessageEdit]);
impl_from_event!(RawMessageEditEvent => [RawMessageEdit]);
impl_from_event!(MessageDeleteEvent => [MessageDelete]);
impl_from_event!(RawMessageDeleteEvent => [RawMessageDelete]);
impl_from_event!(ReactionEvent => [
    MessageReactionAdd, RawMessageReactionAdd, MessageReactionRemove, RawMessageReactionRemove,
]);
impl_from_event!(MemberEvent => [
    MemberJoin, ServerJoin, MemberRemove, MemberBan, MemberKick, MemberLeave, RawMemberUpdate,
]);
impl_from_event!(MemberUpdateEvent => [MemberUpdate]);
impl_from_event!(BotMembershipEvent => [BotAdd, BotRemove]);
impl_from_event!(ChannelUpdateEvent => [ServerChannelUpdate]);
impl_from_event!(ResourceEvent => [
    BanCreate, BanDelete, RoleCreate, RoleUpdate, RoleDelete, ServerChannelCreate,
    ServerChannelDelete, WebhookCreate, WebhookUpdate, DocCreate, DocUpdate, DocDelete,
    ForumTopicCreate, ForumTopicUpdate, ForumTopicDelete, ForumTopicPin, ForumTopicUnpin,
    ForumTopicLock, ForumTopicUnlock, CalendarEventCreate, CalendarEventUpdate,
    CalendarEventDelete, RsvpUpdate, RsvpDelete, ListItemCreate, ListItemUpdate,
    ListItemDelete, ListItemComplete, ListItemUncomplete, AnnouncementCreate,
    AnnouncementUpdate, AnnouncementDelete, GroupCreate, GroupUpdate, GroupDelete,
]);

/// A typed payload extracted from the event being dispatched.
#[derive(Debug, Clone)]
pub struct EventContext<T: FromEvent> {
    kind: EventKind,
    data: T,
}

impl<T: FromEvent> EventContext<T> {
    /// Extracts `T` from `event`.
    pub fn extract(event: &Event) -> Option<Self> {
        T::from_event(event).map(|data| Self {
            kind: event.kind(),
            data,
        })
    }

    /// The kind of the event the payload came from.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The payload.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Consumes the context, returning the payload.
    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: FromEvent> Deref for EventContext<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource_event() -> Event {
        Event::DocCreate(ResourceEvent {
            server_id: Some("s1".into()),
            resource: Resource::from_value(None, json!({ "id": 7 })),
        })
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), *kind);
        }
        assert_eq!("on_message".parse::<EventKind>().unwrap(), EventKind::Message);
        assert!("not_an_event".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_raw_kinds() {
        assert!(EventKind::RawMessageDelete.is_raw());
        assert!(EventKind::SocketRawReceive.is_raw());
        assert!(!EventKind::MessageDelete.is_raw());
    }

    #[test]
    fn test_family_extraction() {
        let event = resource_event();
        let ctx = EventContext::<ResourceEvent>::extract(&event).unwrap();
        assert_eq!(ctx.kind(), EventKind::DocCreate);
        assert_eq!(ctx.resource.id, "7");
        assert!(EventContext::<MessageEvent>::extract(&event).is_none());
    }

    #[test]
    fn test_server_id() {
        assert_eq!(resource_event().server_id(), Some("s1"));
        assert_eq!(Event::Connect(ConnectEvent).server_id(), None);
    }
}
