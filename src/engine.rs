use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use thiserror::Error;
use timer_core::{LapList, TickText, TimerCore, TimerState, TransitionError};

use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::observer::{ObserverHandle, StopwatchObserver};
use crate::pump::Pump;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn tick pump: {0}")]
    Spawn(#[from] io::Error),
}

struct Inner {
    core: TimerCore,
    /// Bumped on every start, stop and reset; the pump tags ticks with it.
    generation: u64,
}

/// Decides which ticks may still reach the observer.
struct Gate {
    generation: AtomicU64,
    /// Held for the whole `on_tick` call.
    delivery: Mutex<()>,
    /// Thread currently inside `on_tick`, if any.
    delivering: Mutex<Option<ThreadId>>,
}

impl Gate {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            delivery: Mutex::new(()),
            delivering: Mutex::new(None),
        }
    }

    fn deliver(&self, generation: u64, f: impl FnOnce()) {
        let _delivery = lock(&self.delivery);
        if self.generation.load(Ordering::SeqCst) != generation {
            log::trace!("dropping stale tick from generation {generation}");
            return;
        }
        *lock(&self.delivering) = Some(thread::current().id());
        f();
        *lock(&self.delivering) = None;
    }

    /// Close the gate to every generation but `generation`.
    fn advance(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    /// Wait until no `on_tick` is in flight. Called from inside `on_tick`
    /// the caller is the delivery in flight, so there is nothing to wait for.
    fn wait_idle(&self) {
        if *lock(&self.delivering) == Some(thread::current().id()) {
            return;
        }
        drop(lock(&self.delivery));
    }
}

struct Shared {
    inner: Mutex<Inner>,
    gate: Gate,
    observer: ObserverHandle,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the state consistent, so a panic in
    // another holder does not invalidate it.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn tick(&self, generation: u64) {
        let text = {
            let mut inner = lock(&self.inner);
            if inner.generation != generation || inner.core.state() != TimerState::Running {
                return;
            }
            let sample = inner.core.sample(self.clock.now_ms());
            TickText::from_ms(sample.total_ms, self.config.minutes)
        };

        self.gate.deliver(generation, || {
            self.observer
                .notify(|o| o.on_tick(&text.minutes, &text.seconds, &text.hundredths))
        });
    }
}

/// A single stopwatch: run/pause accounting, laps, and a fixed-rate tick
/// that reports the formatted total to a `StopwatchObserver`.
///
/// All operations are serialized internally and validate the current
/// state; an invalid call returns `TransitionError` and changes nothing.
pub struct TimingEngine {
    shared: Arc<Shared>,
    pump: Pump,
}

impl TimingEngine {
    pub fn new<O: StopwatchObserver + 'static>(
        observer: &Arc<O>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner { core: TimerCore::new(), generation: 0 }),
            gate: Gate::new(),
            observer: ObserverHandle::new(observer),
            clock,
            config,
        });
        let ticker = shared.clone();
        let pump = Pump::spawn(move |generation| ticker.tick(generation))?;
        Ok(Self { shared, pump })
    }

    /// Monotonic clock and a 10 ms tick.
    pub fn with_defaults<O: StopwatchObserver + 'static>(observer: &Arc<O>) -> Result<Self, EngineError> {
        Self::new(observer, Arc::new(MonotonicClock::new()), EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Idle/Paused -> Running. Opens the first lap when coming from Idle.
    pub fn start(&self) -> Result<(), TransitionError> {
        {
            let mut inner = lock(&self.shared.inner);
            let now = self.shared.clock.now_ms();
            let resuming = inner.core.state() == TimerState::Paused;
            inner.core.start(now).inspect_err(|e| log::warn!("start rejected: {e}"))?;
            inner.generation += 1;
            self.shared.gate.advance(inner.generation);
            self.pump
                .start(inner.generation, self.shared.config.effective_tick_interval());
            log::debug!(
                "{} at {now} ms (generation {})",
                if resuming { "resumed" } else { "started" },
                inner.generation
            );
        }
        self.shared.observer.notify(|o| o.on_started());
        Ok(())
    }

    /// Running -> Paused. Once this returns no further `on_tick` is delivered
    /// for the stopped run. May be called from inside `on_tick`.
    pub fn stop(&self) -> Result<(), TransitionError> {
        {
            let mut inner = lock(&self.shared.inner);
            let now = self.shared.clock.now_ms();
            inner.core.stop(now).inspect_err(|e| log::warn!("stop rejected: {e}"))?;
            inner.generation += 1;
            self.pump.stop();
            self.shared.gate.advance(inner.generation);
            log::debug!("stopped at {now} ms, total {} ms", inner.core.total_elapsed_ms(now));
        }
        // Outside the state lock: an `on_tick` in flight may itself be
        // querying the engine.
        self.shared.gate.wait_idle();
        self.shared.observer.notify(|o| o.on_stopped());
        Ok(())
    }

    /// Close the current lap and open the next. Returns the closed lap in ms.
    pub fn lap(&self) -> Result<u64, TransitionError> {
        let mut inner = lock(&self.shared.inner);
        let now = self.shared.clock.now_ms();
        let closed = inner.core.lap(now).inspect_err(|e| log::warn!("lap rejected: {e}"))?;
        log::debug!("lap {} closed at {closed} ms", inner.core.laps().len() - 1);
        Ok(closed)
    }

    /// Idle/Paused -> Idle. Rejected while running.
    pub fn reset(&self) -> Result<(), TransitionError> {
        {
            let mut inner = lock(&self.shared.inner);
            inner.core.reset().inspect_err(|e| log::warn!("reset rejected: {e}"))?;
            inner.generation += 1;
            self.shared.gate.advance(inner.generation);
        }
        self.shared.gate.wait_idle();
        log::debug!("reset");
        self.shared.observer.notify(|o| o.on_reset());
        Ok(())
    }

    /// Deliver a tick right away, on the calling thread. No-op unless running.
    pub fn refresh(&self) {
        let generation = lock(&self.shared.inner).generation;
        self.shared.tick(generation);
    }

    pub fn state(&self) -> TimerState {
        lock(&self.shared.inner).core.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == TimerState::Running
    }

    /// Every lap rendered as `MM:SS.HH`; the open lap shows its last
    /// ticked value, or an empty string before its first tick.
    pub fn laps(&self) -> Vec<String> {
        lock(&self.shared.inner).core.laps().labels(self.shared.config.minutes)
    }

    pub fn lap_list(&self) -> LapList {
        lock(&self.shared.inner).core.laps().clone()
    }

    pub fn lap_count(&self) -> usize {
        lock(&self.shared.inner).core.laps().len()
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        lock(&self.shared.inner).core.total_elapsed_ms(self.shared.clock.now_ms())
    }

    pub fn lap_elapsed_ms(&self) -> u64 {
        lock(&self.shared.inner).core.lap_elapsed_ms(self.shared.clock.now_ms())
    }

    /// Total elapsed time as it would be reported by a tick right now.
    pub fn current_text(&self) -> TickText {
        TickText::from_ms(self.total_elapsed_ms(), self.shared.config.minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Events {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl StopwatchObserver for Events {
        fn on_tick(&self, minutes: &str, seconds: &str, hundredths: &str) {
            self.0.lock().unwrap().push(format!("tick {minutes}:{seconds}.{hundredths}"));
        }

        fn on_started(&self) {
            self.0.lock().unwrap().push("started".into());
        }

        fn on_stopped(&self) {
            self.0.lock().unwrap().push("stopped".into());
        }

        fn on_reset(&self) {
            self.0.lock().unwrap().push("reset".into());
        }
    }

    // Long enough that the pump never fires during a test.
    fn quiet() -> EngineConfig {
        EngineConfig { tick_interval: Duration::from_secs(3600), ..Default::default() }
    }

    #[test]
    fn test_lifecycle_notifications() {
        let events = Arc::new(Events::default());
        let clock = Arc::new(ManualClock::new(0));
        let engine = TimingEngine::new(&events, clock.clone(), quiet()).unwrap();

        engine.start().unwrap();
        clock.advance(1_500);
        engine.refresh();
        engine.stop().unwrap();
        engine.reset().unwrap();

        assert_eq!(events.take(), vec!["started", "tick 00:01.50", "stopped", "reset"]);
    }

    #[test]
    fn test_rejected_calls_do_not_notify() {
        let events = Arc::new(Events::default());
        let clock = Arc::new(ManualClock::new(0));
        let engine = TimingEngine::new(&events, clock.clone(), quiet()).unwrap();

        assert!(engine.stop().is_err());
        assert!(engine.lap().is_err());
        engine.start().unwrap();
        events.take();

        assert_eq!(engine.start(), Err(TransitionError::AlreadyRunning));
        assert_eq!(engine.reset(), Err(TransitionError::StillRunning));
        assert!(events.take().is_empty());
        assert!(engine.is_running());
    }

    #[test]
    fn test_refresh_is_silent_when_not_running() {
        let events = Arc::new(Events::default());
        let engine = TimingEngine::new(&events, Arc::new(ManualClock::new(0)), quiet()).unwrap();
        engine.refresh();
        engine.start().unwrap();
        engine.stop().unwrap();
        events.take();
        engine.refresh();
        assert!(events.take().is_empty());
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let events = Arc::new(Events::default());
        let clock = Arc::new(ManualClock::new(0));
        let engine = TimingEngine::new(&events, clock.clone(), quiet()).unwrap();

        engine.start().unwrap();
        let first_run = lock(&engine.shared.inner).generation;
        engine.stop().unwrap();
        engine.start().unwrap();
        events.take();

        engine.shared.tick(first_run);
        assert!(events.take().is_empty());
        engine.refresh();
        assert_eq!(events.take(), vec!["tick 00:00.00"]);
    }

    #[test]
    fn test_reset_closes_the_gate() {
        let events = Arc::new(Events::default());
        let engine = TimingEngine::new(&events, Arc::new(ManualClock::new(0)), quiet()).unwrap();

        engine.start().unwrap();
        engine.stop().unwrap();
        let stopped = lock(&engine.shared.inner).generation;
        engine.reset().unwrap();
        let after_reset = lock(&engine.shared.inner).generation;

        assert!(after_reset > stopped);
        assert_eq!(engine.shared.gate.generation.load(Ordering::SeqCst), after_reset);
        engine.shared.tick(stopped);
        assert_eq!(events.take(), vec!["started", "stopped", "reset"]);
    }

    #[test]
    fn test_with_defaults() {
        let events = Arc::new(Events::default());
        let engine = TimingEngine::with_defaults(&events).unwrap();
        assert_eq!(*engine.config(), EngineConfig::default());
        assert_eq!(engine.config().effective_tick_interval(), Duration::from_millis(10));
        assert_eq!(engine.state(), TimerState::Idle);
    }
}
