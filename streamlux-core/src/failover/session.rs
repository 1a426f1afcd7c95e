use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FailoverError {
    #[error("source index {index} out of range ({count} sources)")]
    IndexOutOfRange { index: usize, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Errored,
    CountingDown { remaining: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverSnapshot {
    pub current_index: usize,
    pub source_count: usize,
    pub manual: bool,
    pub state: PlaybackState,
}

impl FailoverSnapshot {
    pub fn countdown_remaining(&self) -> Option<u32> {
        match self.state {
            PlaybackState::CountingDown { remaining } => Some(remaining),
            _ => None,
        }
    }
}

/// Handle to one countdown. Only the ticket of the newest countdown is
/// honoured by [`FailoverSession::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTicket {
    epoch: u64,
    pub seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The countdown was cancelled or superseded.
    Stale,
    Remaining(u32),
    Advanced(usize),
}

/// Source-switching state for one player. Holds no timers; the controller
/// drives [`tick`](FailoverSession::tick) once per second.
#[derive(Debug, Clone)]
pub struct FailoverSession {
    source_count: usize,
    current_index: usize,
    manual: bool,
    state: PlaybackState,
    epoch: u64,
    countdown_seconds: u32,
}

impl FailoverSession {
    pub fn new(source_count: usize, countdown_seconds: u32) -> Self {
        Self {
            source_count,
            current_index: 0,
            manual: false,
            state: initial_state(source_count),
            epoch: 0,
            countdown_seconds: countdown_seconds.max(1),
        }
    }

    pub fn snapshot(&self) -> FailoverSnapshot {
        FailoverSnapshot {
            current_index: self.current_index,
            source_count: self.source_count,
            manual: self.manual,
            state: self.state,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.snapshot().countdown_remaining()
    }

    fn cancel_countdown(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn check_index(&self, index: usize) -> Result<(), FailoverError> {
        if index >= self.source_count {
            return Err(FailoverError::IndexOutOfRange {
                index,
                count: self.source_count,
            });
        }
        Ok(())
    }

    pub fn select_source(&mut self, index: usize) -> Result<(), FailoverError> {
        self.check_index(index)?;
        self.cancel_countdown();
        self.current_index = index;
        self.state = PlaybackState::Loading;
        Ok(())
    }

    /// User-picked source. Disables automatic failover until the next reset.
    pub fn manual_select(&mut self, index: usize) -> Result<(), FailoverError> {
        self.select_source(index)?;
        self.manual = true;
        Ok(())
    }

    pub fn on_loaded(&mut self) {
        match self.state {
            PlaybackState::Loading | PlaybackState::Errored | PlaybackState::CountingDown { .. } => {
                self.cancel_countdown();
                self.state = PlaybackState::Playing;
            }
            PlaybackState::Idle | PlaybackState::Playing => {}
        }
    }

    /// Returns a ticket when a countdown towards the next source starts.
    pub fn on_error(&mut self) -> Option<CountdownTicket> {
        match self.state {
            PlaybackState::Idle | PlaybackState::CountingDown { .. } => return None,
            PlaybackState::Loading | PlaybackState::Playing | PlaybackState::Errored => {}
        }
        self.state = PlaybackState::Errored;
        if self.manual || self.current_index + 1 >= self.source_count {
            return None;
        }
        self.cancel_countdown();
        self.state = PlaybackState::CountingDown {
            remaining: self.countdown_seconds,
        };
        Some(CountdownTicket {
            epoch: self.epoch,
            seconds: self.countdown_seconds,
        })
    }

    pub fn tick(&mut self, ticket: CountdownTicket) -> Tick {
        if ticket.epoch != self.epoch {
            return Tick::Stale;
        }
        let PlaybackState::CountingDown { remaining } = self.state else {
            return Tick::Stale;
        };
        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = PlaybackState::CountingDown { remaining };
            return Tick::Remaining(remaining);
        }
        self.cancel_countdown();
        self.current_index += 1;
        self.state = PlaybackState::Loading;
        Tick::Advanced(self.current_index)
    }

    /// New media item: back to the first source with auto failover enabled.
    pub fn reset(&mut self, source_count: usize) {
        self.cancel_countdown();
        self.source_count = source_count;
        self.current_index = 0;
        self.manual = false;
        self.state = initial_state(source_count);
    }
}

fn initial_state(source_count: usize) -> PlaybackState {
    if source_count == 0 {
        PlaybackState::Idle
    } else {
        PlaybackState::Loading
    }
}
