use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (position within the originating aggregate's stream)
/// - designed to be **append-only**
///
/// Concrete event kinds are plain structs; each bounded context groups them
/// into one sum type and implements this trait on it with a `match`.
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stream name of the aggregate that produced the event.
    fn aggregate_id(&self) -> &str;

    /// Stable event name (e.g. "AmountAdded"), used as the registry key.
    fn event_name(&self) -> &'static str;

    /// Zero-based position of the event in its aggregate stream.
    fn version(&self) -> u64;

    /// When the event happened (business time).
    fn happened_on(&self) -> DateTime<Utc>;
}
