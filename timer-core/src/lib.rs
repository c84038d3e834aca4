//! Pure stopwatch accounting with no platform dependencies.
//! Every operation takes the current time in milliseconds, so the whole
//! state machine is testable on the host with fabricated timestamps.

use std::fmt;

use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerState {
    /// Never started, or just reset.
    Idle,
    Running,
    /// Stopped with banked time and an open lap; `start` resumes.
    Paused,
}

/// A start/stop/lap/reset call that is not valid in the current state.
/// The timer is left untouched when one of these is returned.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum TransitionError {
    #[error("stopwatch is already running")]
    AlreadyRunning,
    #[error("stopwatch is not running (state: {0:?})")]
    NotRunning(TimerState),
    #[error("stopwatch must be stopped before it can be reset")]
    StillRunning,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Lap {
    /// Finalized by a lap split.
    Closed(u64),
    /// The lap in progress, holding the value last sampled for it.
    /// `None` until the first sample after the lap opened.
    Open(Option<u64>),
}

impl Lap {
    pub fn elapsed_ms(&self) -> Option<u64> {
        match *self {
            Lap::Closed(ms) => Some(ms),
            Lap::Open(ms) => ms,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Lap::Open(_))
    }
}

/// Ordered laps. Only the last entry can be open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LapList {
    entries: Vec<Lap>,
}

impl LapList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the lap in progress; always `len() - 1` while non-empty.
    pub fn current_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    pub fn get(&self, index: usize) -> Option<&Lap> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lap> {
        self.entries.iter()
    }

    /// Durations of every finalized lap, in order.
    pub fn closed(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().filter_map(|lap| match lap {
            Lap::Closed(ms) => Some(*ms),
            Lap::Open(_) => None,
        })
    }

    /// Index of the shortest finalized lap.
    pub fn fastest(&self) -> Option<usize> {
        self.closed_indexed().min_by_key(|&(_, ms)| ms).map(|(i, _)| i)
    }

    /// Index of the longest finalized lap.
    pub fn slowest(&self) -> Option<usize> {
        self.closed_indexed().max_by_key(|&(_, ms)| ms).map(|(i, _)| i)
    }

    /// Render every lap as `MM:SS.HH`. An open lap that has not been
    /// sampled yet renders as an empty string.
    pub fn labels(&self, policy: MinutesPolicy) -> Vec<String> {
        self.entries
            .iter()
            .map(|lap| match lap.elapsed_ms() {
                Some(ms) => format_lap(ms, policy),
                None => String::new(),
            })
            .collect()
    }

    fn closed_indexed(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, lap)| match lap {
            Lap::Closed(ms) => Some((i, *ms)),
            Lap::Open(_) => None,
        })
    }

    fn open(&mut self) {
        self.entries.push(Lap::Open(None));
    }

    fn record_current(&mut self, ms: u64) {
        if let Some(Lap::Open(value)) = self.entries.last_mut() {
            *value = Some(ms);
        }
    }

    fn close_current(&mut self, ms: u64) {
        if let Some(last) = self.entries.last_mut() {
            *last = Lap::Closed(ms);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Total and current-lap elapsed time at one instant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Sample {
    pub total_ms: u64,
    pub lap_ms: u64,
}

/// Run-segment and lap accounting for a single stopwatch.
#[derive(Clone, Debug)]
pub struct TimerCore {
    state: TimerState,
    total_start_ms: u64,
    total_accumulated_ms: u64,
    lap_start_ms: u64,
    lap_accumulated_ms: u64,
    laps: LapList,
}

impl Default for TimerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerCore {
    pub fn new() -> Self {
        Self {
            state: TimerState::Idle,
            total_start_ms: 0,
            total_accumulated_ms: 0,
            lap_start_ms: 0,
            lap_accumulated_ms: 0,
            laps: LapList::default(),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn laps(&self) -> &LapList {
        &self.laps
    }

    /// Begin a run segment. The first start after construction or reset
    /// opens the first lap; a start from `Paused` resumes the open lap.
    pub fn start(&mut self, now_ms: u64) -> Result<(), TransitionError> {
        match self.state {
            TimerState::Running => return Err(TransitionError::AlreadyRunning),
            TimerState::Idle => {
                self.laps.open();
                self.lap_accumulated_ms = 0;
            }
            TimerState::Paused => {}
        }
        self.total_start_ms = now_ms;
        self.lap_start_ms = now_ms;
        self.state = TimerState::Running;
        Ok(())
    }

    /// Bank the current segment into the total and lap accumulators.
    /// The open lap stays open.
    pub fn stop(&mut self, now_ms: u64) -> Result<(), TransitionError> {
        if self.state != TimerState::Running {
            return Err(TransitionError::NotRunning(self.state));
        }
        self.total_accumulated_ms += now_ms.saturating_sub(self.total_start_ms);
        self.lap_accumulated_ms += now_ms.saturating_sub(self.lap_start_ms);
        self.laps.record_current(self.lap_accumulated_ms);
        self.state = TimerState::Paused;
        Ok(())
    }

    /// Close the lap in progress and open the next one. Returns the
    /// duration of the closed lap. Total time is not affected.
    pub fn lap(&mut self, now_ms: u64) -> Result<u64, TransitionError> {
        if self.state != TimerState::Running {
            return Err(TransitionError::NotRunning(self.state));
        }
        let closed = self.lap_elapsed_ms(now_ms);
        self.laps.close_current(closed);
        self.laps.open();
        self.lap_start_ms = now_ms;
        self.lap_accumulated_ms = 0;
        Ok(closed)
    }

    /// Return to `Idle`: zero accumulators and drop every lap.
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        if self.state == TimerState::Running {
            return Err(TransitionError::StillRunning);
        }
        self.total_start_ms = 0;
        self.total_accumulated_ms = 0;
        self.lap_start_ms = 0;
        self.lap_accumulated_ms = 0;
        self.laps.clear();
        self.state = TimerState::Idle;
        Ok(())
    }

    pub fn total_elapsed_ms(&self, now_ms: u64) -> u64 {
        match self.state {
            TimerState::Running => {
                self.total_accumulated_ms + now_ms.saturating_sub(self.total_start_ms)
            }
            _ => self.total_accumulated_ms,
        }
    }

    pub fn lap_elapsed_ms(&self, now_ms: u64) -> u64 {
        match self.state {
            TimerState::Running => {
                self.lap_accumulated_ms + now_ms.saturating_sub(self.lap_start_ms)
            }
            _ => self.lap_accumulated_ms,
        }
    }

    /// Compute both elapsed values and, while running, store the lap
    /// value into the open lap so it shows up in `laps().labels()`.
    pub fn sample(&mut self, now_ms: u64) -> Sample {
        let sample = Sample {
            total_ms: self.total_elapsed_ms(now_ms),
            lap_ms: self.lap_elapsed_ms(now_ms),
        };
        if self.state == TimerState::Running {
            self.laps.record_current(sample.lap_ms);
        }
        sample
    }
}

/// How the minutes field behaves once it passes 59.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MinutesPolicy {
    /// Minutes keep counting and widen past two digits (`100:00.00`).
    #[default]
    Unbounded,
    /// Minutes wrap at 60 and whole hours are carried separately
    /// (`1:00:00.00`).
    WallClock,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ClockFields {
    /// Always zero under `MinutesPolicy::Unbounded`.
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub hundredths: u64,
}

impl ClockFields {
    pub fn from_ms(ms: u64, policy: MinutesPolicy) -> Self {
        let total_minutes = ms / 60_000;
        let (hours, minutes) = match policy {
            MinutesPolicy::Unbounded => (0, total_minutes),
            MinutesPolicy::WallClock => (total_minutes / 60, total_minutes % 60),
        };
        Self {
            hours,
            minutes,
            seconds: (ms / 1000) % 60,
            hundredths: (ms % 1000) / 10,
        }
    }
}

impl fmt::Display for ClockFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hours > 0 {
            write!(f, "{}:", self.hours)?;
        }
        write!(f, "{:02}:{:02}.{:02}", self.minutes, self.seconds, self.hundredths)
    }
}

/// Format milliseconds as "MM:SS.HH"
pub fn format_lap(ms: u64, policy: MinutesPolicy) -> String {
    ClockFields::from_ms(ms, policy).to_string()
}

/// The three zero-padded fields delivered with every tick.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TickText {
    pub minutes: String,
    pub seconds: String,
    pub hundredths: String,
}

impl TickText {
    pub fn from_ms(ms: u64, policy: MinutesPolicy) -> Self {
        ClockFields::from_ms(ms, policy).into()
    }
}

impl From<ClockFields> for TickText {
    fn from(fields: ClockFields) -> Self {
        Self {
            minutes: format!("{:02}", fields.minutes),
            seconds: format!("{:02}", fields.seconds),
            hundredths: format!("{:02}", fields.hundredths),
        }
    }
}
