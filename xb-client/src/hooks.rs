/// Notification hooks the facade registers once at construction time. The
/// Receiver and Controller invoke them by name rather than reaching back
/// into application state through untyped pointers.
///
/// One trait with default no-op methods covers connection-state changes,
/// pre/post-send notifications, and queue-drain failure handling, so an
/// embedder only overrides what it needs.
pub trait ConnectionHooks: Send + Sync {
    /// Called at most once per state transition (§4.7).
    fn on_state_change(&self, _from: &str, _to: &str) {}

    /// Called once per successfully drained batch during a POLLING→ALIVE
    /// queue drain (§4.7 step 3).
    fn on_post_send(&self, _batch_size: usize) {}

    /// Called before a queue entry is sent (§4.7 step 2b).
    fn on_pre_send(&self, _unique_id: i64) {}

    /// Called when a non-communication error occurs while draining the
    /// queue (§4.7 step 2e). Returning `true` means the hook has handled
    /// it (the entry is dropped); returning `false` sends the Controller
    /// to DEAD.
    fn on_sending_failed(&self, _unique_id: i64, _error: &str) -> bool {
        false
    }
}

/// A `ConnectionHooks` that does nothing and never claims to have
/// handled a `sendingFailed` notification.
pub struct NoopHooks;

impl ConnectionHooks for NoopHooks {}
