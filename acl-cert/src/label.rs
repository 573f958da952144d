use std::borrow::Cow;

/// Human-readable kind of an event.
///
/// Used by [`EventMatcher::by_label`](crate::EventMatcher::by_label) and in
/// assertion failure messages.
///
/// # Example
///
/// ```rust
/// use acl_cert::Label;
/// use std::borrow::Cow;
///
/// enum Notification {
///     LinkUp,
///     LinkDown,
/// }
///
/// impl Label for Notification {
///     fn label(&self) -> Cow<'static, str> {
///         match self {
///             Notification::LinkUp => Cow::Borrowed("LinkUp"),
///             Notification::LinkDown => Cow::Borrowed("LinkDown"),
///         }
///     }
/// }
///
/// assert_eq!(Notification::LinkUp.label(), "LinkUp");
/// ```
pub trait Label {
    /// Returns a human-readable label for this item.
    fn label(&self) -> Cow<'static, str>;
}
