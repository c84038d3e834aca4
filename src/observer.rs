use std::sync::{Arc, Weak};

/// Receives lifecycle and tick notifications from a `TimingEngine`.
///
/// Callbacks run on whichever thread caused them: `on_tick` on the pump
/// thread, the others on the caller of `start`/`stop`/`reset`. Any callback
/// may call back into the engine that delivered it.
pub trait StopwatchObserver: Send + Sync {
    /// Fired on every tick while running, each field zero-padded to at
    /// least two digits.
    fn on_tick(&self, minutes: &str, seconds: &str, hundredths: &str);

    fn on_started(&self) {}

    fn on_stopped(&self) {}

    fn on_reset(&self) {}
}

/// Non-owning link to the observer. Once the consumer drops its `Arc`
/// every notification becomes a no-op.
pub(crate) struct ObserverHandle {
    target: Weak<dyn StopwatchObserver>,
}

impl ObserverHandle {
    pub(crate) fn new<O: StopwatchObserver + 'static>(observer: &Arc<O>) -> Self {
        let observer: Arc<dyn StopwatchObserver> = observer.clone();
        Self { target: Arc::downgrade(&observer) }
    }

    pub(crate) fn notify(&self, f: impl FnOnce(&dyn StopwatchObserver)) {
        match self.target.upgrade() {
            Some(observer) => f(observer.as_ref()),
            None => log::trace!("observer dropped; notification skipped"),
        }
    }
}
