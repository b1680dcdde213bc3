//! Throughput meter for progress reporting
//!
//! Counts are folded into exponentially weighted moving rates on a fixed tick.
//! Ticks are applied lazily whenever the meter is touched, so no timer task is
//! needed and the meter follows `tokio::time` (pausable in tests).

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::meter::{TICK, WINDOW_1M, WINDOW_1S, WINDOW_5M, WINDOW_5S};

#[derive(Debug, Clone, Copy)]
struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    fn new(window: Duration) -> Self {
        Self {
            alpha: 1.0 - (-TICK.as_secs_f64() / window.as_secs_f64()).exp(),
            rate: 0.0,
            initialized: false,
        }
    }

    fn tick(&mut self, count: u64) {
        let instant_rate = count as f64 / TICK.as_secs_f64();
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Apply `ticks` empty intervals in one step
    fn decay(&mut self, ticks: u32) {
        if self.initialized && ticks > 0 {
            self.rate *= (1.0 - self.alpha).powi(ticks as i32);
        }
    }
}

#[derive(Debug)]
struct MeterState {
    running: bool,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    last_tick: Instant,
    pending: u64,
    total: u64,
    rates: [Ewma; 4],
}

impl MeterState {
    fn fresh(now: Instant) -> Self {
        Self {
            running: false,
            started_at: None,
            stopped_at: None,
            last_tick: now,
            pending: 0,
            total: 0,
            rates: [
                Ewma::new(WINDOW_1S),
                Ewma::new(WINDOW_5S),
                Ewma::new(WINDOW_1M),
                Ewma::new(WINDOW_5M),
            ],
        }
    }

    fn catch_up(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_tick);
        let ticks = (elapsed.as_nanos() / TICK.as_nanos()) as u64;
        if ticks == 0 {
            return;
        }

        for rate in self.rates.iter_mut() {
            rate.tick(self.pending);
            rate.decay(u32::try_from(ticks - 1).unwrap_or(u32::MAX));
        }
        self.pending = 0;
        self.last_tick += TICK * u32::try_from(ticks).unwrap_or(u32::MAX);
    }
}

/// Moving-rate meter. One instance per pipeline stage per run.
#[derive(Debug)]
pub struct Meter {
    state: Mutex<MeterState>,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MeterState::fresh(Instant::now())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset all counters and begin measuring
    pub fn start(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        *state = MeterState::fresh(now);
        state.running = true;
        state.started_at = Some(now);
    }

    /// Freeze the rates; later `add` calls are ignored
    pub fn stop(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.catch_up(now);
        state.running = false;
        state.stopped_at = Some(now);
    }

    pub fn add(&self, delta: u64) {
        let now = Instant::now();
        let mut state = self.lock();
        if !state.running {
            return;
        }
        state.catch_up(now);
        state.pending += delta;
        state.total += delta;
    }

    fn rate(&self, index: usize) -> f64 {
        let now = Instant::now();
        let mut state = self.lock();
        state.catch_up(now);
        state.rates[index].rate
    }

    pub fn rate_1s(&self) -> f64 {
        self.rate(0)
    }

    pub fn rate_5s(&self) -> f64 {
        self.rate(1)
    }

    pub fn rate_1m(&self) -> f64 {
        self.rate(2)
    }

    pub fn rate_5m(&self) -> f64 {
        self.rate(3)
    }

    /// Units per second since `start()`
    pub fn average(&self) -> f64 {
        let now = Instant::now();
        let state = self.lock();
        let Some(started_at) = state.started_at else {
            return 0.0;
        };
        let until = state.stopped_at.unwrap_or(now);
        let elapsed = until.saturating_duration_since(started_at).as_secs_f64();
        if elapsed <= 0.0 {
            0.0
        } else {
            state.total as f64 / elapsed
        }
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}
