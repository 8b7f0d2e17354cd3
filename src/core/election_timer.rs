//! Single-shot randomized election timer.
//!
//! The timer is armed with a deadline drawn uniformly from the configured
//! `[min, max)` window, can be rearmed (new deadline) or cancelled at any
//! time, and disarms itself when it fires so every expiry is observed at most
//! once. Jitter comes from a per-node RNG that can be seeded from config for
//! reproducible behavior.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tokio::sync::Notify;
use tokio::time::sleep_until;
use tokio::time::Duration;
use tokio::time::Instant;

pub(crate) struct ElectionTimer {
    timeout_range: (u64, u64),
    rng: Mutex<StdRng>,
    state: Mutex<TimerState>,
    changed: Notify,
}

struct TimerState {
    armed: bool,
    deadline: Instant,
}

impl ElectionTimer {
    /// @param timeout_range: (ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX) in ms
    pub(crate) fn new(
        timeout_range: (u64, u64),
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            timeout_range,
            rng: Mutex::new(rng),
            state: Mutex::new(TimerState {
                armed: false,
                deadline: Instant::now(),
            }),
            changed: Notify::new(),
        }
    }

    fn random_duration(&self) -> Duration {
        let (min, max) = self.timeout_range;
        let timeout = self.rng.lock().gen_range(min..max);
        Duration::from_millis(timeout)
    }

    /// Arms (or re-arms) the timer with a fresh randomized deadline.
    pub(crate) fn rearm(&self) {
        let deadline = Instant::now() + self.random_duration();
        {
            let mut state = self.state.lock();
            state.armed = true;
            state.deadline = deadline;
        }
        self.changed.notify_waiters();
    }

    /// Disarms the timer; a pending `expired()` keeps waiting for the next
    /// rearm instead of firing.
    pub(crate) fn cancel(&self) {
        self.state.lock().armed = false;
        self.changed.notify_waiters();
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    /// Resolves on the next expiry, consuming it (the timer disarms).
    /// Rearms and cancels while waiting are picked up transparently.
    pub(crate) async fn expired(&self) {
        loop {
            // Register for change notifications before reading the state so a
            // concurrent rearm/cancel is never missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (armed, deadline) = {
                let state = self.state.lock();
                (state.armed, state.deadline)
            };

            if !armed {
                notified.await;
                continue;
            }

            tokio::select! {
                _ = sleep_until(deadline) => {
                    let mut state = self.state.lock();
                    if state.armed && state.deadline == deadline {
                        state.armed = false;
                        return;
                    }
                }
                _ = &mut notified => {}
            }
        }
    }
}
