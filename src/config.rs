use std::time::Duration;

use timer_core::MinutesPolicy;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Period of the tick pump while running. Zero falls back to the default.
    pub tick_interval: Duration,
    pub minutes: MinutesPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            minutes: MinutesPolicy::Unbounded,
        }
    }
}

impl EngineConfig {
    pub fn effective_tick_interval(&self) -> Duration {
        if self.tick_interval.is_zero() {
            DEFAULT_TICK_INTERVAL
        } else {
            self.tick_interval
        }
    }
}
