//! # Sync Schedule
//!
//! The coordinator's state machine, with time passed in rather than read.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Coordinator Phases                               │
//! │                                                                         │
//! │            enqueue (online) / went online                               │
//! │   ┌──────┐ ───────────────────────────────► ┌───────────────┐           │
//! │   │ Idle │                                  │  Scheduled    │           │
//! │   └──────┘ ◄─────────────────────────────── │ due = now+2s  │           │
//! │      ▲  ▲          went offline (cancel)    └───────┬───────┘           │
//! │      │  │                                           │ deadline reached  │
//! │      │  │  periodic: online, pending > 0            ▼                   │
//! │      │  └──────────────────────────────────► ┌─────────────┐            │
//! │      │              no errors                │   Syncing   │            │
//! │      └────────────────────────────────────── └──────┬──────┘            │
//! │                                                     │ errors recorded   │
//! │                                                     ▼                   │
//! │                                          ┌──────────────────┐           │
//! │                                          │ IdleWithErrors   │           │
//! │                                          └──────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - At most one pass at a time: [`SyncSchedule::try_begin`] is the only way
//!   into `Syncing` and refuses while already there.
//! - A trigger that arrives mid-pass is remembered and schedules one
//!   follow-up pass when the current one finishes, if still online.
//! - Going offline mid-pass lets the pass finish but drops the follow-up.
//!
//! Nothing here sleeps. The async coordinator asks [`SyncSchedule::deadline`]
//! what to wait for and feeds events back in.

use std::time::{Duration, Instant};

/// Where the coordinator currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    /// A debounced pass will start at `due` unless cancelled.
    Scheduled { due: Instant },
    Syncing,
    /// The last pass recorded at least one failure.
    IdleWithErrors,
}

/// Debounce and mutual-exclusion bookkeeping for drain passes.
#[derive(Debug, Clone)]
pub struct SyncSchedule {
    phase: SyncPhase,
    debounce: Duration,
    /// Phase to fall back to when a scheduled pass is cancelled.
    resting: SyncPhase,
    follow_up: bool,
}

impl SyncSchedule {
    pub fn new(debounce: Duration) -> Self {
        SyncSchedule {
            phase: SyncPhase::Idle,
            debounce,
            resting: SyncPhase::Idle,
            follow_up: false,
        }
    }

    #[inline]
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    #[inline]
    pub fn is_syncing(&self) -> bool {
        self.phase == SyncPhase::Syncing
    }

    /// When the scheduled pass is due, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            SyncPhase::Scheduled { due } => Some(due),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|due| now >= due)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// An operation was queued. Starts (or restarts) the debounce when online.
    pub fn on_enqueue(&mut self, now: Instant, online: bool) {
        if online {
            self.trigger(now);
        }
    }

    /// The network came back.
    pub fn on_online(&mut self, now: Instant) {
        self.trigger(now);
    }

    /// The network went away. Cancels a pending pass; a running one finishes
    /// but will not be followed by another.
    pub fn on_offline(&mut self) {
        match self.phase {
            SyncPhase::Scheduled { .. } => self.phase = self.resting,
            SyncPhase::Syncing => self.follow_up = false,
            SyncPhase::Idle | SyncPhase::IdleWithErrors => {}
        }
    }

    /// The recovery timer ticked. Returns true if a pass was started.
    pub fn on_periodic(&mut self, online: bool, pending_count: u32) -> bool {
        online && pending_count > 0 && self.try_begin()
    }

    /// Starts the scheduled pass if its deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        self.is_due(now) && self.try_begin()
    }

    /// Check-and-set into `Syncing`. Returns false if a pass is already
    /// running; the caller must then treat its trigger as a no-op.
    pub fn try_begin(&mut self) -> bool {
        if self.is_syncing() {
            return false;
        }
        self.phase = SyncPhase::Syncing;
        self.follow_up = false;
        true
    }

    /// The running pass ended.
    pub fn finish(&mut self, now: Instant, online: bool, had_errors: bool) {
        self.resting = if had_errors {
            SyncPhase::IdleWithErrors
        } else {
            SyncPhase::Idle
        };
        self.phase = self.resting;

        if std::mem::take(&mut self.follow_up) && online {
            self.schedule(now);
        }
    }

    /// Errors were cleared by the user.
    pub fn clear_errors(&mut self) {
        self.resting = SyncPhase::Idle;
        if self.phase == SyncPhase::IdleWithErrors {
            self.phase = SyncPhase::Idle;
        }
    }

    fn trigger(&mut self, now: Instant) {
        if self.is_syncing() {
            self.follow_up = true;
        } else {
            self.schedule(now);
        }
    }

    fn schedule(&mut self, now: Instant) {
        self.phase = SyncPhase::Scheduled {
            due: now + self.debounce,
        };
    }
}

impl Default for SyncSchedule {
    fn default() -> Self {
        SyncSchedule::new(Duration::from_millis(crate::DEFAULT_DEBOUNCE_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    #[test]
    fn test_enqueue_online_schedules_after_debounce() {
        let start = Instant::now();
        let mut schedule = SyncSchedule::new(DEBOUNCE);

        schedule.on_enqueue(start, true);
        assert_eq!(schedule.deadline(), Some(start + DEBOUNCE));

        assert!(!schedule.fire_if_due(start + Duration::from_millis(1_999)));
        assert!(schedule.fire_if_due(start + DEBOUNCE));
        assert_eq!(schedule.phase(), SyncPhase::Syncing);
    }

    #[test]
    fn test_enqueue_offline_does_nothing() {
        let mut schedule = SyncSchedule::new(DEBOUNCE);
        schedule.on_enqueue(Instant::now(), false);
        assert_eq!(schedule.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_burst_of_enqueues_restarts_debounce() {
        let start = Instant::now();
        let mut schedule = SyncSchedule::new(DEBOUNCE);

        schedule.on_enqueue(start, true);
        let later = start + Duration::from_millis(1_500);
        schedule.on_enqueue(later, true);

        assert!(!schedule.fire_if_due(start + DEBOUNCE));
        assert!(schedule.fire_if_due(later + DEBOUNCE));
    }

    #[test]
    fn test_offline_cancels_scheduled_pass() {
        let start = Instant::now();
        let mut schedule = SyncSchedule::new(DEBOUNCE);

        schedule.on_online(start);
        schedule.on_offline();

        assert_eq!(schedule.phase(), SyncPhase::Idle);
        assert!(!schedule.fire_if_due(start + DEBOUNCE * 10));
    }

    #[test]
    fn test_second_begin_is_refused() {
        let mut schedule = SyncSchedule::new(DEBOUNCE);
        assert!(schedule.try_begin());
        assert!(!schedule.try_begin());
        assert!(!schedule.on_periodic(true, 5));
    }

    #[test]
    fn test_periodic_requires_online_and_pending() {
        let mut schedule = SyncSchedule::new(DEBOUNCE);
        assert!(!schedule.on_periodic(false, 3));
        assert!(!schedule.on_periodic(true, 0));
        assert!(schedule.on_periodic(true, 3));
    }

    #[test]
    fn test_trigger_during_pass_schedules_follow_up() {
        let start = Instant::now();
        let mut schedule = SyncSchedule::new(DEBOUNCE);
        assert!(schedule.try_begin());

        schedule.on_enqueue(start, true);
        assert!(schedule.is_syncing());

        let end = start + Duration::from_secs(1);
        schedule.finish(end, true, false);
        assert_eq!(schedule.deadline(), Some(end + DEBOUNCE));
    }

    #[test]
    fn test_offline_during_pass_drops_follow_up() {
        let start = Instant::now();
        let mut schedule = SyncSchedule::new(DEBOUNCE);
        assert!(schedule.try_begin());

        schedule.on_enqueue(start, true);
        schedule.on_offline();
        assert!(schedule.is_syncing());

        schedule.finish(start, false, false);
        assert_eq!(schedule.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_errors_leave_idle_with_errors_until_cleared() {
        let start = Instant::now();
        let mut schedule = SyncSchedule::new(DEBOUNCE);
        assert!(schedule.try_begin());
        schedule.finish(start, true, true);
        assert_eq!(schedule.phase(), SyncPhase::IdleWithErrors);

        // A cancelled schedule falls back to the error state.
        schedule.on_online(start);
        schedule.on_offline();
        assert_eq!(schedule.phase(), SyncPhase::IdleWithErrors);

        schedule.clear_errors();
        assert_eq!(schedule.phase(), SyncPhase::Idle);
    }
}
