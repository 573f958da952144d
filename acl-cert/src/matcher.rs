//! Event predicates for assertions.

use std::{borrow::Cow, fmt, sync::Arc};

use crate::{Event, Label};

type MatchFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A predicate over events, with a description used in failure messages.
///
/// Build one from a closure with [`by_event`](Self::by_event) and give it a
/// readable name, or match on the event kind with
/// [`by_label`](Self::by_label) (also reachable through `"Kind".into()`).
///
/// ```ignore
/// let complete = EventMatcher::by_label("ConnectionComplete");
/// let greeting = EventMatcher::by_event(|p: &AclData| p.payload_contains(b"Hello"))
///     .named("greeting");
/// ```
pub struct EventMatcher<E> {
    description: Cow<'static, str>,
    matcher: MatchFn<E>,
}

impl<E> Clone for EventMatcher<E> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            matcher: self.matcher.clone(),
        }
    }
}

impl<E> fmt::Debug for EventMatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMatcher")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<E: Event> EventMatcher<E> {
    /// Match events using a custom predicate.
    pub fn by_event<F>(predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            description: Cow::Borrowed("<predicate>"),
            matcher: Arc::new(predicate),
        }
    }

    /// Match every event.
    pub fn any() -> Self {
        Self::by_event(|_| true).named("any event")
    }

    /// Replace the description shown when this matcher goes unmet.
    pub fn named(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns true if the given event matches.
    pub fn matches(&self, event: &E) -> bool {
        (self.matcher)(event)
    }
}

impl<E: Event + Label> EventMatcher<E> {
    /// Events whose [`Label`] equals `kind`. The kind doubles as description.
    pub fn by_label(kind: impl Into<Cow<'static, str>>) -> Self {
        let kind = kind.into();
        let description = kind.clone();
        Self {
            description,
            matcher: Arc::new(move |event: &E| event.label() == kind),
        }
    }
}

impl<E: Event + Label> From<&'static str> for EventMatcher<E> {
    fn from(kind: &'static str) -> Self {
        Self::by_label(kind)
    }
}

impl<E: Event + Label> From<String> for EventMatcher<E> {
    fn from(kind: String) -> Self {
        Self::by_label(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::{AclData, ConnectionEvent};

    fn complete() -> ConnectionEvent {
        ConnectionEvent::new(vec![0x03, 0x00])
    }

    fn request() -> ConnectionEvent {
        ConnectionEvent::new(vec![0x04, 0x00])
    }

    #[test]
    fn by_label_compares_event_kind() {
        let matcher = EventMatcher::by_label("ConnectionComplete");
        assert!(matcher.matches(&complete()));
        assert!(!matcher.matches(&request()));
        assert_eq!(matcher.description(), "ConnectionComplete");
    }

    #[test]
    fn closures_are_named_for_diagnostics() {
        let unnamed = EventMatcher::by_event(|p: &AclData| p.handle == 2);
        assert_eq!(unnamed.description(), "<predicate>");

        let named = unnamed.clone().named("handle two");
        assert!(named.matches(&AclData::new(2, Vec::new())));
        assert!(!named.matches(&AclData::new(3, Vec::new())));
        assert_eq!(named.description(), "handle two");
    }

    #[test]
    fn strings_convert_to_label_matchers() {
        let borrowed: EventMatcher<ConnectionEvent> = "ConnectionRequest".into();
        let owned: EventMatcher<ConnectionEvent> = String::from("ConnectionRequest").into();
        assert!(borrowed.matches(&request()));
        assert!(owned.matches(&request()));
        assert!(!owned.matches(&complete()));
    }

    #[test]
    fn any_matches_everything() {
        let matcher = EventMatcher::<AclData>::any();
        assert!(matcher.matches(&AclData::new(1, b"x".to_vec())));
        assert_eq!(matcher.description(), "any event");
    }
}
