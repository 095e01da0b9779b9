//! Host hooks the runtime delegates scheduling to.

/// Wakes the host when the runtime has work: invalidated scopes, posted UI
/// tasks or pending async effects. Called from any thread.
pub trait RuntimeScheduler: Send + Sync {
    fn schedule_frame(&self);
}

/// Scheduler that never wakes anything; hosts poll instead.
#[derive(Debug, Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_frame(&self) {}
}
