use std::{borrow::Cow, fmt, sync::OnceLock};

use crate::{Error, Event, Result};

type ParseFn<E, T> = Box<dyn Fn(&E) -> Option<T> + Send + Sync>;

/// A single-use predicate that pulls a typed value out of the event it matches.
///
/// The first event that matches is parsed and the value kept; later
/// matches never overwrite it. Reading the value before any match is a
/// contract violation reported as [`Error::UnmatchedCapture`].
///
/// Pass a capture to [`Subject::emits`](crate::Subject::emits) to wait for
/// the one-time notification it describes:
///
/// ```ignore
/// let complete = HciCaptures::connection_complete();
/// assert_that(&setup_stream).emits(&complete).await?;
/// let handle = complete.get()?.handle;
/// ```
pub struct Capture<E, T> {
    name: Cow<'static, str>,
    parse: ParseFn<E, T>,
    value: OnceLock<T>,
}

impl<E, T: fmt::Debug> fmt::Debug for Capture<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("name", &self.name)
            .field("value", &self.value.get())
            .finish_non_exhaustive()
    }
}

impl<E: Event, T: Send + Sync + 'static> Capture<E, T> {
    /// Capture built from a shape check and an extractor.
    ///
    /// `extract` only runs on events accepted by `matches`.
    pub fn new<M, X>(name: impl Into<Cow<'static, str>>, matches: M, extract: X) -> Self
    where
        M: Fn(&E) -> bool + Send + Sync + 'static,
        X: Fn(&E) -> T + Send + Sync + 'static,
    {
        Self::parsed(name, move |event| matches(event).then(|| extract(event)))
    }

    /// Capture that matches exactly the events `parse` accepts.
    pub fn parsed<P>(name: impl Into<Cow<'static, str>>, parse: P) -> Self
    where
        P: Fn(&E) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parse: Box::new(parse),
            value: OnceLock::new(),
        }
    }

    /// Derive a capture over a projection of the extracted value.
    ///
    /// The derived capture starts unmatched.
    pub fn map<U, F>(self, f: F) -> Capture<E, U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let parse = self.parse;
        Capture::parsed(self.name, move |event| parse(event).map(&f))
    }

    /// Offer an event. Returns `true` if it matches.
    ///
    /// The value of the first match is kept.
    pub fn try_match(&self, event: &E) -> bool {
        match (self.parse)(event) {
            Some(value) => {
                if self.value.set(value).is_ok() {
                    tracing::trace!(capture = %self.name, "capture matched");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.value.get().is_some()
    }

    /// The value extracted from the first matching event.
    pub fn get(&self) -> Result<&T> {
        self.value
            .get()
            .ok_or_else(|| Error::UnmatchedCapture(self.name.to_string()))
    }

    /// Consume the capture and return its value.
    pub fn into_value(self) -> Result<T> {
        let Capture { name, value, .. } = self;
        value
            .into_inner()
            .ok_or_else(|| Error::UnmatchedCapture(name.into_owned()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Type-erased view of a [`Capture`] used by the assertion engine.
pub trait CaptureSlot<E>: Send + Sync {
    fn name(&self) -> &str;

    fn try_match(&self, event: &E) -> bool;
}

impl<E: Event, T: Send + Sync + 'static> CaptureSlot<E> for Capture<E, T> {
    fn name(&self) -> &str {
        Capture::name(self)
    }

    fn try_match(&self, event: &E) -> bool {
        Capture::try_match(self, event)
    }
}
