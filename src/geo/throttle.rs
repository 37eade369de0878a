use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

#[derive(Debug)]
struct ThrottleState {
    next_slot: Instant,
    cooldown_until: Option<Instant>,
}

/// Spaces out calls to one external provider.
///
/// Every call reserves the next free slot under the lock and then sleeps
/// outside it, so waiting callers never hold up the bookkeeping.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    cooldown: Duration,
    state: Mutex<ThrottleState>,
}

impl Throttle {
    pub fn new(min_interval: Duration, cooldown: Duration) -> Self {
        Throttle {
            min_interval,
            cooldown,
            state: Mutex::new(ThrottleState {
                next_slot: Instant::now(),
                cooldown_until: None,
            }),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until this caller may issue its request.
    pub fn acquire(&self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    /// Reserves a slot at or after `now` and returns how long to wait for it.
    pub fn reserve(&self, now: Instant) -> Duration {
        let mut state = self.lock();
        let mut slot = state.next_slot.max(now);
        if let Some(until) = state.cooldown_until {
            if until > slot {
                slot = until;
            } else {
                state.cooldown_until = None;
            }
        }
        state.next_slot = slot + self.min_interval;
        slot.saturating_duration_since(now)
    }

    /// Pauses all further calls for the configured cooldown, or `retry_after`
    /// when the provider said how long.
    pub fn back_off(&self, retry_after: Option<Duration>) {
        let pause = retry_after.unwrap_or(self.cooldown).max(self.min_interval);
        warn!("Provider rate limited, pausing calls for {:?}", pause);
        let until = Instant::now() + pause;
        let mut state = self.lock();
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |u| u.max(until)));
    }

    pub fn cooling_down(&self) -> bool {
        self.cooling_down_at(Instant::now())
    }

    pub fn cooling_down_at(&self, now: Instant) -> bool {
        self.lock().cooldown_until.map_or(false, |until| until > now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
