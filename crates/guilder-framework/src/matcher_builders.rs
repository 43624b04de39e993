//! Matcher builder functions for common event kinds.
//!
//! ```rust,ignore
//! client.register_matchers([
//!     on_message().handler(echo_handler),
//!     on_ready().handler(announce_handler),
//!     on_kinds([EventKind::MemberJoin, EventKind::ServerJoin]).handler(welcome_handler),
//! ]);
//! ```

use guilder_core::EventKind;

use crate::matcher::Matcher;

/// A matcher registered under a single event kind, named after it.
pub fn on_event(kind: EventKind) -> Matcher {
    Matcher::new().on(kind).name(kind.as_str())
}

/// A matcher registered under several event kinds.
pub fn on_kinds(kinds: impl IntoIterator<Item = EventKind>) -> Matcher {
    kinds.into_iter().fold(Matcher::new(), Matcher::on)
}

/// Matches `message` events.
///
/// Messages authored by the client user itself are included; filter with
/// a `check` when a bot must not answer itself.
pub fn on_message() -> Matcher {
    on_event(EventKind::Message)
}

pub fn on_ready() -> Matcher {
    on_event(EventKind::Ready)
}

pub fn on_connect() -> Matcher {
    on_event(EventKind::Connect)
}

pub fn on_disconnect() -> Matcher {
    on_event(EventKind::Disconnect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, message_event, ready_event};

    #[test]
    fn test_on_event_names_matcher() {
        let matcher = on_message();
        assert_eq!(matcher.get_name(), Some("message"));
        assert_eq!(matcher.kinds(), &[EventKind::Message]);
        assert!(matcher.matches(&context(message_event("x"))));
        assert!(!matcher.matches(&context(ready_event())));
    }

    #[test]
    fn test_on_kinds() {
        let matcher = on_kinds([EventKind::Message, EventKind::Ready]);
        assert!(matcher.get_name().is_none());
        assert!(matcher.matches(&context(message_event("x"))));
        assert!(matcher.matches(&context(ready_event())));
        assert!(!on_disconnect().matches(&context(ready_event())));
    }
}
