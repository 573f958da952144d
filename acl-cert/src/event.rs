use std::fmt;

/// Marker trait for records delivered by a remote event stream.
///
/// Events are produced by a background reader task and handed to the
/// consumer by value, so they must be `Send + Sync + 'static`. `Debug` is
/// required because every skipped or matched event is traced.
///
/// Consider also implementing [`Label`](crate::Label) so matchers can refer
/// to an event kind by name.
///
/// # Example
///
/// ```rust
/// use acl_cert::Event;
///
/// #[derive(Debug)]
/// struct InquiryResult {
///     rssi: i8,
/// }
///
/// impl Event for InquiryResult {}
/// ```
pub trait Event: Send + Sync + fmt::Debug + 'static {}
