//! `assert_that(stream).emits(..)` assertions over event streams.

use std::{
    borrow::Cow,
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    time::{Duration, Instant},
};

use crate::{
    Capture, Event, EventMatcher, EventSource, Label, Result, capture::CaptureSlot,
};

/// Something an event must satisfy: a plain matcher or a capture.
///
/// Built implicitly from an [`EventMatcher`], a `&Capture`, or a label
/// string when the event type implements [`Label`].
pub enum Expected<'a, E> {
    Event(EventMatcher<E>),
    Capture(&'a dyn CaptureSlot<E>),
}

impl<E: Event> Expected<'_, E> {
    fn describe(&self) -> Cow<'_, str> {
        match self {
            Expected::Event(matcher) => Cow::Borrowed(matcher.description()),
            Expected::Capture(capture) => Cow::Borrowed(capture.name()),
        }
    }

    /// Offer an event; a capture stores its value on match.
    fn accept(&self, event: &E) -> bool {
        match self {
            Expected::Event(matcher) => matcher.matches(event),
            Expected::Capture(capture) => capture.try_match(event),
        }
    }
}

impl<E> fmt::Debug for Expected<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Event(matcher) => f.debug_tuple("Event").field(matcher).finish(),
            Expected::Capture(capture) => f.debug_tuple("Capture").field(&capture.name()).finish(),
        }
    }
}

impl<E> From<EventMatcher<E>> for Expected<'_, E> {
    fn from(matcher: EventMatcher<E>) -> Self {
        Expected::Event(matcher)
    }
}

impl<'a, E: Event, T: Send + Sync + 'static> From<&'a Capture<E, T>> for Expected<'a, E> {
    fn from(capture: &'a Capture<E, T>) -> Self {
        Expected::Capture(capture)
    }
}

impl<E: Event + Label> From<&'static str> for Expected<'_, E> {
    fn from(label: &'static str) -> Self {
        Expected::Event(EventMatcher::by_label(label))
    }
}

/// Start an assertion about the events `subject` will emit.
///
/// # Example
///
/// ```ignore
/// // Any order, each predicate satisfied by a distinct event
/// assert_that(&stream).emits("ConnectionRequest").and("ConnectionComplete").await?;
///
/// // Strict arrival order, custom timeout
/// assert_that(&dut_acl)
///     .emits(AclMatchers::payload_contains(b"Hello!"))
///     .and(AclMatchers::payload_contains(b"Goodbye"))
///     .in_order()
///     .within(Duration::from_secs(5))
///     .await?;
///
/// // Capture a value from the matching event
/// let complete = HciCaptures::connection_complete();
/// assert_that(&setup).emits(&complete).await?;
/// ```
pub fn assert_that<S: EventSource>(subject: &S) -> Subject<'_, S> {
    Subject { source: subject }
}

/// The stream under assertion. Created by [`assert_that`].
pub struct Subject<'a, S> {
    source: &'a S,
}

impl<S> fmt::Debug for Subject<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject").finish_non_exhaustive()
    }
}

impl<'a, S: EventSource> Subject<'a, S> {
    /// Expect one event satisfying `expected`.
    pub fn emits(self, expected: impl Into<Expected<'a, S::Event>>) -> Emits<'a, S> {
        Emits::new(self.source, vec![expected.into()])
    }

    /// Expect one distinct event for each of `expected`.
    pub fn emits_all<I>(self, expected: I) -> Emits<'a, S>
    where
        I: IntoIterator,
        I::Item: Into<Expected<'a, S::Event>>,
    {
        Emits::new(self.source, expected.into_iter().map(Into::into).collect())
    }
}

/// A pending `emits` assertion. Await it to drain the stream.
///
/// By default predicates may be satisfied in any order. When one event
/// could satisfy several still-pending predicates, it goes to the one
/// listed first. Each predicate consumes exactly one distinct event.
///
/// With [`in_order`](Self::in_order) each predicate must be satisfied
/// after the previous one; events that do not match the awaited predicate
/// are consumed and skipped.
///
/// The whole drain shares one deadline: [`within`](Self::within), or else
/// the source's [`default_timeout`](EventSource::default_timeout). Every consumed event is gone from the stream afterwards,
/// matched or not.
pub struct Emits<'a, S: EventSource> {
    source: &'a S,
    expected: Vec<Expected<'a, S::Event>>,
    in_order: bool,
    timeout: Duration,
}

impl<S: EventSource> fmt::Debug for Emits<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emits")
            .field("expected", &self.expected)
            .field("in_order", &self.in_order)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'a, S: EventSource> Emits<'a, S> {
    fn new(source: &'a S, expected: Vec<Expected<'a, S::Event>>) -> Self {
        Self {
            source,
            expected,
            in_order: false,
            timeout: source.default_timeout(),
        }
    }

    /// Expect one more distinct event.
    pub fn and(mut self, expected: impl Into<Expected<'a, S::Event>>) -> Self {
        self.expected.push(expected.into());
        self
    }

    /// Require the predicates to be satisfied in the order they were listed.
    pub fn in_order(mut self) -> Self {
        self.in_order = true;
        self
    }

    /// Override the source's default timeout.
    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(self) -> Result {
        let deadline = Instant::now() + self.timeout;
        let mut satisfied = vec![false; self.expected.len()];
        let mut scanned = 0usize;

        tracing::debug!(
            expected = ?self.expected,
            in_order = self.in_order,
            timeout = ?self.timeout,
            "draining stream"
        );

        loop {
            let Some(cursor) = satisfied.iter().position(|done| !done) else {
                tracing::debug!(scanned, "all expectations met");
                return Ok(());
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(crate::Error::timed_out(self.timeout).with_progress(
                    self.timeout,
                    self.unmet(&satisfied),
                    scanned,
                ));
            }

            let event = match self.source.next(remaining).await {
                Ok(event) => event,
                Err(e) => {
                    let e = e.with_progress(self.timeout, self.unmet(&satisfied), scanned);
                    tracing::debug!(error = %e, "expectation failed");
                    return Err(e);
                }
            };
            scanned += 1;

            let hit = if self.in_order {
                self.expected[cursor].accept(&event).then_some(cursor)
            } else {
                (cursor..self.expected.len())
                    .filter(|&i| !satisfied[i])
                    .find(|&i| self.expected[i].accept(&event))
            };

            match hit {
                Some(i) => {
                    tracing::trace!(expected = %self.expected[i].describe(), ?event, "matched");
                    satisfied[i] = true;
                }
                None => tracing::trace!(?event, "skipped"),
            }
        }
    }

    fn unmet(&self, satisfied: &[bool]) -> Vec<String> {
        self.expected
            .iter()
            .zip(satisfied)
            .filter(|(_, done)| !**done)
            .map(|(expected, _)| expected.describe().into_owned())
            .collect()
    }
}

impl<'a, S: EventSource + 'a> IntoFuture for Emits<'a, S> {
    type Output = Result;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}
