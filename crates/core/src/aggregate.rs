//! Event-sourced aggregate model.
//!
//! Every aggregate embeds one [`EventSourced`] value and routes all state
//! changes through it. The concrete aggregate only supplies the fold
//! ([`AggregateState::fold`]) and the command methods that decide which
//! events to apply.

use crate::error::{DomainError, DomainResult};
use crate::event::DomainEvent;
use crate::id::AggregateId;

/// Typed aggregate state evolved by folding events.
///
/// `fold` must be deterministic and side-effect free: replaying the same
/// events into `Default::default()` always produces the same state.
/// Implementations match exhaustively on the context's event sum type, with a
/// no-op arm for variants they do not care about.
pub trait AggregateState: Default + Clone + core::fmt::Debug + Send + Sync {
    type Event: DomainEvent;

    /// Evolve state from a single event.
    fn fold(&mut self, event: &Self::Event);
}

/// Generic event-sourced entity: identity, version counter, uncommitted
/// buffer and typed state.
///
/// The only mutation paths are [`EventSourced::apply`] (new facts) and
/// [`EventSourced::load_from_history`] (rehydration).
#[derive(Debug, Clone)]
pub struct EventSourced<S: AggregateState> {
    id: AggregateId,
    committed: u64,
    uncommitted: Vec<S::Event>,
    state: S,
}

impl<S: AggregateState> EventSourced<S> {
    /// Create an empty, not-yet-hydrated aggregate for `id`.
    pub fn new(id: impl Into<AggregateId>) -> Self {
        Self {
            id: id.into(),
            committed: 0,
            uncommitted: Vec::new(),
            state: S::default(),
        }
    }

    /// Create an aggregate and replay `history` into it.
    pub fn rehydrate(
        id: impl Into<AggregateId>,
        history: impl IntoIterator<Item = S::Event>,
    ) -> DomainResult<Self> {
        let mut aggregate = Self::new(id);
        aggregate.load_from_history(history)?;
        Ok(aggregate)
    }

    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Count of all events ever applied (historical + uncommitted).
    ///
    /// This is the number compared against storage for optimistic concurrency.
    pub fn version(&self) -> u64 {
        self.committed + self.uncommitted.len() as u64
    }

    /// Stream version the next applied event will occupy.
    pub fn next_version(&self) -> u64 {
        self.version()
    }

    /// Number of events that came from storage (or were marked committed).
    pub fn committed_version(&self) -> u64 {
        self.committed
    }

    /// Apply a new event: record it as uncommitted and fold it into state.
    pub fn apply(&mut self, event: S::Event) -> DomainResult<()> {
        self.check_identity(&event)?;
        self.state.fold(&event);
        self.uncommitted.push(event);
        Ok(())
    }

    /// Replay persisted events (in stream order) without buffering them.
    pub fn load_from_history(
        &mut self,
        history: impl IntoIterator<Item = S::Event>,
    ) -> DomainResult<()> {
        if !self.uncommitted.is_empty() {
            return Err(DomainError::invariant(
                "cannot load history into an aggregate with uncommitted events",
            ));
        }

        for event in history {
            self.check_identity(&event)?;
            self.state.fold(&event);
            self.committed += 1;
        }
        Ok(())
    }

    /// Owned copy of the uncommitted buffer.
    pub fn uncommitted_events(&self) -> Vec<S::Event> {
        self.uncommitted.clone()
    }

    /// Alias of [`EventSourced::uncommitted_events`].
    pub fn events(&self) -> Vec<S::Event> {
        self.uncommitted_events()
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Fold the uncommitted buffer into the committed count after a
    /// successful append.
    pub fn mark_committed(&mut self) {
        self.committed += self.uncommitted.len() as u64;
        self.uncommitted.clear();
    }

    fn check_identity(&self, event: &S::Event) -> DomainResult<()> {
        let found = event.aggregate_id();
        if found.is_empty() {
            return Err(DomainError::MissingAggregateId {
                event_name: event.event_name(),
            });
        }
        if found != self.id.as_str() {
            return Err(DomainError::StreamMismatch {
                event_name: event.event_name(),
                expected: self.id.to_string(),
                found: found.to_owned(),
            });
        }
        Ok(())
    }
}

/// Read surface the event store needs from an aggregate to persist it.
///
/// Implemented by [`EventSourced`] and by concrete aggregates that delegate to
/// the one they embed, so a single append can span several aggregates.
pub trait AggregateStream<E: DomainEvent>: Send + Sync {
    fn stream_name(&self) -> &str;

    fn version(&self) -> u64;

    fn uncommitted_events(&self) -> Vec<E>;
}

impl<S: AggregateState> AggregateStream<S::Event> for EventSourced<S> {
    fn stream_name(&self) -> &str {
        self.id.as_str()
    }

    fn version(&self) -> u64 {
        EventSourced::version(self)
    }

    fn uncommitted_events(&self) -> Vec<S::Event> {
        EventSourced::uncommitted_events(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ticked {
        stream: String,
        by: i64,
        version: u64,
    }

    impl DomainEvent for Ticked {
        fn aggregate_id(&self) -> &str {
            &self.stream
        }

        fn event_name(&self) -> &'static str {
            "Ticked"
        }

        fn version(&self) -> u64 {
            self.version
        }

        fn happened_on(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    struct Counter {
        total: i64,
    }

    impl AggregateState for Counter {
        type Event = Ticked;

        fn fold(&mut self, event: &Ticked) {
            self.total += event.by;
        }
    }

    fn tick(stream: &str, by: i64, version: u64) -> Ticked {
        Ticked {
            stream: stream.to_owned(),
            by,
            version,
        }
    }

    #[test]
    fn apply_buffers_and_folds() {
        let mut agg = EventSourced::<Counter>::new("c-1");
        agg.apply(tick("c-1", 2, 0)).unwrap();
        agg.apply(tick("c-1", 3, 1)).unwrap();

        assert_eq!(agg.state().total, 5);
        assert_eq!(agg.version(), 2);
        assert_eq!(agg.uncommitted_events().len(), 2);
        assert_eq!(agg.committed_version(), 0);
    }

    #[test]
    fn apply_rejects_event_without_identity() {
        let mut agg = EventSourced::<Counter>::new("c-1");
        let err = agg.apply(tick("", 1, 0)).unwrap_err();

        assert_eq!(err, DomainError::MissingAggregateId { event_name: "Ticked" });
        assert_eq!(agg.version(), 0);
        assert_eq!(agg.state().total, 0);
    }

    #[test]
    fn apply_rejects_event_for_other_stream() {
        let mut agg = EventSourced::<Counter>::new("c-1");
        let err = agg.apply(tick("c-2", 1, 0)).unwrap_err();
        assert!(matches!(err, DomainError::StreamMismatch { .. }));
        assert!(!agg.has_uncommitted_events());
    }

    #[test]
    fn history_is_not_buffered_but_counts_towards_version() {
        let agg = EventSourced::<Counter>::rehydrate(
            "c-1",
            vec![tick("c-1", 1, 0), tick("c-1", 1, 1), tick("c-1", 1, 2)],
        )
        .unwrap();

        assert_eq!(agg.version(), 3);
        assert_eq!(agg.committed_version(), 3);
        assert!(agg.uncommitted_events().is_empty());
        assert_eq!(agg.state().total, 3);
    }

    #[test]
    fn events_returns_a_copy() {
        let mut agg = EventSourced::<Counter>::new("c-1");
        agg.apply(tick("c-1", 4, 0)).unwrap();

        let mut copy = agg.events();
        copy.clear();

        assert_eq!(agg.events().len(), 1);
    }

    #[test]
    fn replaying_uncommitted_events_reproduces_state() {
        let mut original = EventSourced::<Counter>::new("c-1");
        for (v, by) in [5, -2, 9].into_iter().enumerate() {
            original.apply(tick("c-1", by, v as u64)).unwrap();
        }

        let replayed = EventSourced::<Counter>::rehydrate("c-1", original.events()).unwrap();

        assert_eq!(replayed.state(), original.state());
        assert_eq!(replayed.version(), original.version());
    }

    #[test]
    fn mark_committed_moves_buffer_into_version() {
        let mut agg = EventSourced::<Counter>::new("c-1");
        agg.apply(tick("c-1", 1, 0)).unwrap();
        agg.mark_committed();

        assert_eq!(agg.version(), 1);
        assert_eq!(agg.committed_version(), 1);
        assert!(!agg.has_uncommitted_events());
        assert_eq!(agg.next_version(), 1);
    }

    #[test]
    fn load_history_refused_while_uncommitted_events_pending() {
        let mut agg = EventSourced::<Counter>::new("c-1");
        agg.apply(tick("c-1", 1, 0)).unwrap();

        let err = agg.load_from_history(vec![tick("c-1", 1, 0)]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn aggregate_stream_view_matches_entity() {
        let mut agg = EventSourced::<Counter>::new("c-9");
        agg.apply(tick("c-9", 1, 0)).unwrap();

        let stream: &dyn AggregateStream<Ticked> = &agg;
        assert_eq!(stream.stream_name(), "c-9");
        assert_eq!(stream.version(), 1);
        assert_eq!(stream.uncommitted_events(), vec![tick("c-9", 1, 0)]);
    }
}
