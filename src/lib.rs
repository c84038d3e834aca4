//! Stopwatch timing engine.
//!
//! The accounting itself lives in `timer-core`; this crate drives it from a
//! monotonic clock, runs the fixed-rate tick pump and delivers formatted
//! updates to a `StopwatchObserver`.

pub mod clock;
pub mod config;
pub mod engine;
pub mod observer;
mod pump;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::EngineConfig;
pub use engine::{EngineError, TimingEngine};
pub use observer::StopwatchObserver;
pub use timer_core::{format_lap, Lap, LapList, MinutesPolicy, TickText, TimerState, TransitionError};
