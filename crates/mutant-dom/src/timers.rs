//! Timer queue
//!
//! `setTimeout`/`clearTimeout` over a virtual millisecond clock. The
//! clock only moves when the owning document advances it.

/// Timer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Deferred callback
pub type TimerCallback = Box<dyn FnOnce()>;

struct Timer {
    id: TimerId,
    due: u64,
    callback: TimerCallback,
}

/// Timer manager
#[derive(Default)]
pub struct TimerQueue {
    now: u64,
    timers: Vec<Timer>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time (ms)
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.now
    }

    /// Move the clock forward. The clock never goes backwards.
    pub fn set_now(&mut self, now: u64) {
        self.now = self.now.max(now);
    }

    /// Add a timeout firing `delay_ms` after the current time
    pub fn set_timeout(&mut self, delay_ms: u64, callback: TimerCallback) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(Timer {
            id,
            due: self.now.saturating_add(delay_ms),
            callback,
        });
        id
    }

    /// Clear a timer. Returns false if it already fired or never existed.
    pub fn clear(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Remove and return the earliest timer due at or before `at`.
    /// Ties fire in scheduling order.
    pub fn pop_due(&mut self, at: u64) -> Option<(TimerId, u64, TimerCallback)> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= at)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i)?;
        let timer = self.timers.remove(idx);
        Some((timer.id, timer.due, timer.callback))
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("now", &self.now)
            .field("pending", &self.timers.len())
            .finish()
    }
}
