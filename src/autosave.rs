//! Debounced autosave of the actual-parts list.
//!
//! Any change restarts a quiet-period timer; a save fires only once the timer
//! runs out with no further change. Explicit saves and autosaves share one
//! [`SaveGate`] so that at most one write to the record is in flight.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    /// Time passed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }
}

/// Cancellable one-shot timer.
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the timer, replacing any pending deadline.
    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time left before the timer fires.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Disarm and report `true` if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

/// In-flight flag for writes to the tracking record. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct SaveGate {
    busy: Rc<Cell<bool>>,
}

impl SaveGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a save is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Claim the gate. `None` while another save holds it.
    pub fn try_begin(&self) -> Option<SaveGuard> {
        if self.busy.replace(true) {
            return None;
        }
        Some(SaveGuard {
            busy: Rc::clone(&self.busy),
        })
    }
}

/// Releases the [`SaveGate`] when dropped.
#[derive(Debug)]
pub struct SaveGuard {
    busy: Rc<Cell<bool>>,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

/// Decides when the actual-parts list should be written back.
///
/// Feed it the list revision after every change with [`observe`](Self::observe)
/// and call [`poll`](Self::poll) from the event loop. Changes made while
/// hydrating or without edit permission never schedule a save.
#[derive(Debug)]
pub struct AutoSaveCoordinator<C: Clock> {
    clock: C,
    timer: DebounceTimer,
    gate: SaveGate,
    can_edit: bool,
    hydrating: bool,
    seen_revision: u64,
}

impl<C: Clock> AutoSaveCoordinator<C> {
    /// Default quiet period before saving.
    pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

    /// Create a coordinator. It starts in hydration mode.
    pub fn new(clock: C, delay: Duration, gate: SaveGate, can_edit: bool) -> Self {
        Self {
            clock,
            timer: DebounceTimer::new(delay),
            gate,
            can_edit,
            hydrating: true,
            seen_revision: 0,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn gate(&self) -> &SaveGate {
        &self.gate
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_armed()
    }

    /// Time left until the pending save fires.
    pub fn remaining(&self) -> Option<Duration> {
        self.timer.remaining(self.clock.now())
    }

    pub fn set_can_edit(&mut self, can_edit: bool) {
        self.can_edit = can_edit;
        if !can_edit {
            self.timer.cancel();
        }
        log::debug!("Auto-save: can_edit = {}", can_edit);
    }

    /// Suppress scheduling while data is being loaded.
    pub fn begin_hydration(&mut self) {
        self.hydrating = true;
        self.timer.cancel();
    }

    /// End hydration; `revision` is the loaded state and is not saved back.
    pub fn finish_hydration(&mut self, revision: u64) {
        self.hydrating = false;
        self.seen_revision = revision;
        log::trace!("Auto-save: hydration finished at revision {}", revision);
    }

    pub fn is_hydrating(&self) -> bool {
        self.hydrating
    }

    /// Report the current list revision. A new revision restarts the timer.
    pub fn observe(&mut self, revision: u64) {
        if revision == self.seen_revision {
            return;
        }
        self.seen_revision = revision;
        if self.hydrating || !self.can_edit {
            return;
        }
        self.timer.start(self.clock.now());
        log::trace!("Auto-save: change at revision {}, timer restarted", revision);
    }

    /// Claim the gate for an autosave if one is due.
    ///
    /// While another save is in flight the due save stays pending and is
    /// handed out on the first poll after the gate is released.
    pub fn poll(&mut self) -> Option<SaveGuard> {
        if !self.can_edit || !self.timer.is_due(self.clock.now()) {
            return None;
        }
        let guard = self.gate.try_begin()?;
        self.timer.cancel();
        log::debug!("Auto-save: firing");
        Some(guard)
    }

    /// Drop any pending save.
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }
}
