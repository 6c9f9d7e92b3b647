use keel_core::DomainEvent;

/// A projection builds a read model from the append-only event log.
///
/// Projections implement the **CQRS read model pattern**: they fold events
/// (write model) into queryable state (read model).
///
/// ## Lifecycle
///
/// 1. **Handle**: for each event in log order, `handle()` updates the
///    projection's private state (typically a map keyed by entity id)
/// 2. **View**: after a batch, `view()` computes the value readers see
/// 3. **Rebuild**: read models are disposable; start from `Default` and
///    replay the whole log to rebuild one
///
/// ## Determinism
///
/// `handle` must be deterministic and must not perform IO. Relevant events
/// are matched exhaustively on the sum type; everything else is a no-op.
///
/// Where the state lives and how often it is refreshed is an infrastructure
/// concern (see `keel_infra::projections::LiveProjection`).
pub trait Projection: Send + Sync + 'static {
    type Event: DomainEvent;

    /// Value handed to readers; computed once per refresh that applied events.
    type View: Send + Sync + 'static;

    /// Fold a single event into the projection state.
    fn handle(&mut self, event: &Self::Event);

    /// Compute the reader-facing view from the current state.
    fn view(&self) -> Self::View;
}
