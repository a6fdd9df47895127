//! Transfer progress bar.

use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Speed is averaged over samples no older than this.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

struct State {
    so_far: u64,
    history: VecDeque<(Instant, u64)>,
}

/// Progress sink for cache transfers.
///
/// Shared by reference with the backend's byte-count callback; safe to call
/// from several transfer threads at once.
pub struct Progress {
    bar: ProgressBar,
    state: Mutex<State>,
}

impl Progress {
    /// Bar drawn on stderr; hidden when stderr is not a terminal.
    pub fn new(total_bytes: u64) -> Self {
        let bar = ProgressBar::with_draw_target(Some(total_bytes), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("[{bar:40.cyan/blue}] {bytes} / {total_bytes} | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self::with_bar(bar)
    }

    #[cfg(test)]
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            state: Mutex::new(State {
                so_far: 0,
                history: VecDeque::new(),
            }),
        }
    }

    /// Byte-count callback for [`lazy_cache::CacheBackend`] transfers.
    pub fn on_chunk(&self, bytes: u64) {
        self.record(bytes, Instant::now());
    }

    /// Account for `bytes` received at `now`; returns the current speed in
    /// bytes per second.
    pub fn record(&self, bytes: u64, now: Instant) -> f64 {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.so_far += bytes;
        let so_far = state.so_far;
        state.history.push_back((now, so_far));

        let speed = match state.history.front() {
            Some(&(first_at, first_bytes)) if state.history.len() > 1 => {
                let elapsed = now.duration_since(first_at).as_secs_f64();
                if elapsed > 0.0 {
                    (so_far - first_bytes) as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        while let Some(&(at, _)) = state.history.front() {
            if now.duration_since(at) > SPEED_WINDOW {
                state.history.pop_front();
            } else {
                break;
            }
        }

        self.bar.set_position(so_far);
        self.bar.set_message(format!("{}/s", HumanBytes(speed as u64)));
        speed
    }

    #[cfg(test)]
    pub fn bytes_so_far(&self) -> u64 {
        match self.state.lock() {
            Ok(state) => state.so_far,
            Err(poisoned) => poisoned.into_inner().so_far,
        }
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}
