//! Single-timer reconnection state machine.
//!
//! The scheduler owns exactly one timer slot. Explicit reconnect requests,
//! retry backoff and the silence watchdog all write to that slot, so arming
//! one always cancels whatever was pending before. It never performs I/O:
//! the service asks it what to do and drives the connection accordingly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why the client is reconnecting, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectOrigin {
    Unknown,
    Reboot,
    Shutdown,
    UpgradeSystem,
}

impl ReconnectOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconnectOrigin::Unknown => "unknown",
            ReconnectOrigin::Reboot => "reboot",
            ReconnectOrigin::Shutdown => "shutdown",
            ReconnectOrigin::UpgradeSystem => "upgrade_system",
        }
    }
}

impl fmt::Display for ReconnectOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

// Deadlines past this horizon are clamped; tokio treats them as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Origin recorded when the watchdog, rather than a caller, starts a reconnect.
pub const WATCHDOG_ORIGIN: ReconnectOrigin = ReconnectOrigin::Reboot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRequest {
    pub origin: ReconnectOrigin,
    pub initial_delay: Option<Duration>,
    pub delay: Option<Duration>,
}

impl ReconnectRequest {
    pub fn new(origin: ReconnectOrigin) -> Self {
        Self {
            origin,
            initial_delay: None,
            delay: None,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = Some(initial_delay);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDescriptor {
    pub origin: ReconnectOrigin,
    /// Pause between failed attempts, never below `MIN_RETRY_DELAY`.
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Waiting,
    Attempting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Watchdog,
    Delayed,
    Retry,
    /// Bounds an attempt that never reports open or failed.
    AttemptTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTimer {
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Debug)]
pub struct ReconnectionScheduler {
    phase: Phase,
    timer: Option<PendingTimer>,
    descriptor: Option<ReconnectDescriptor>,
    default_delay: Duration,
    origin_tx: watch::Sender<Option<ReconnectOrigin>>,
}

impl ReconnectionScheduler {
    pub fn new(default_delay: Duration) -> Self {
        let (origin_tx, _) = watch::channel(None);
        Self {
            phase: Phase::Idle,
            timer: None,
            descriptor: None,
            default_delay,
            origin_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ReconnectOrigin>> {
        self.origin_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn descriptor(&self) -> Option<&ReconnectDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.map(|timer| timer.deadline)
    }

    pub fn timer_kind(&self) -> Option<TimerKind> {
        self.timer.map(|timer| timer.kind)
    }

    /// True once an attempt succeeded and nothing has asked for another.
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected && self.descriptor.is_none()
    }

    /// Records the request and replaces any pending timer. Returns true when
    /// the attempt must start right away.
    pub fn schedule(&mut self, request: ReconnectRequest, now: Instant) -> bool {
        self.timer = None;
        self.record(request.origin, request.delay);
        match request.initial_delay.filter(|delay| !delay.is_zero()) {
            Some(delay) => {
                self.set_timer(TimerKind::Delayed, now, delay);
                self.phase = Phase::Waiting;
                false
            }
            None => {
                self.phase = Phase::Attempting;
                true
            }
        }
    }

    /// Pushes the silence deadline out to `now + window`, replacing any
    /// pending timer. Nothing is recorded until the watchdog actually fires.
    pub fn arm_watchdog(&mut self, window: Duration, now: Instant) {
        self.set_timer(TimerKind::Watchdog, now, window);
    }

    /// Consumes the timer if it is due. Returns true when an attempt must start.
    pub fn fire(&mut self, now: Instant) -> bool {
        let Some(timer) = self.timer.filter(|timer| timer.deadline <= now) else {
            return false;
        };
        self.timer = None;
        match (self.phase, timer.kind) {
            (Phase::Idle, _) => return false,
            (_, TimerKind::Watchdog) => self.record(WATCHDOG_ORIGIN, None),
            (Phase::Attempting, TimerKind::AttemptTimeout) => {
                self.record(ReconnectOrigin::Unknown, None)
            }
            // a stale attempt timer after the attempt already settled
            (_, TimerKind::AttemptTimeout) => return false,
            (_, TimerKind::Delayed | TimerKind::Retry) => {}
        }
        self.phase = Phase::Attempting;
        true
    }

    /// An attempt is in flight; it is abandoned if it has not settled within
    /// `timeout`.
    pub fn attempt_started(&mut self, now: Instant, timeout: Duration) {
        self.phase = Phase::Attempting;
        self.set_timer(TimerKind::AttemptTimeout, now, timeout);
    }

    pub fn attempt_succeeded(&mut self) {
        self.phase = Phase::Connected;
        if self.timer.map(|timer| timer.kind) == Some(TimerKind::AttemptTimeout) {
            self.timer = None;
        }
        if self.descriptor.take().is_some() {
            self.publish(None);
        }
    }

    /// Schedules the next attempt after the recorded retry delay.
    pub fn attempt_failed(&mut self, now: Instant) {
        self.record(ReconnectOrigin::Unknown, None);
        let delay = self
            .descriptor
            .map(|descriptor| descriptor.delay)
            .unwrap_or(self.default_delay);
        self.set_timer(TimerKind::Retry, now, delay);
        self.phase = Phase::Waiting;
    }

    /// A live connection dropped on its own.
    pub fn connection_lost(&mut self, now: Instant) -> bool {
        let request =
            ReconnectRequest::new(ReconnectOrigin::Unknown).with_initial_delay(self.default_delay);
        self.schedule(request, now)
    }

    pub fn reset(&mut self) {
        self.timer = None;
        self.phase = Phase::Idle;
        if self.descriptor.take().is_some() {
            self.publish(None);
        }
    }

    fn set_timer(&mut self, kind: TimerKind, now: Instant, delay: Duration) {
        let deadline = now
            .checked_add(delay.min(FAR_FUTURE))
            .unwrap_or(now);
        self.timer = Some(PendingTimer { deadline, kind });
    }

    fn record(&mut self, origin: ReconnectOrigin, delay: Option<Duration>) {
        if self.descriptor.is_some() {
            return;
        }
        self.descriptor = Some(ReconnectDescriptor {
            origin,
            delay: delay.unwrap_or(self.default_delay).max(MIN_RETRY_DELAY),
        });
        self.publish(Some(origin));
    }

    fn publish(&self, origin: Option<ReconnectOrigin>) {
        self.origin_tx.send_if_modified(|current| {
            if *current == origin {
                return false;
            }
            *current = origin;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY: Duration = Duration::from_millis(3000);
    const WINDOW: Duration = Duration::from_secs(15);

    #[test]
    fn immediate_request_attempts_now_and_records_origin() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let rx = scheduler.subscribe();
        let now = Instant::now();

        assert!(scheduler.schedule(ReconnectRequest::new(ReconnectOrigin::Shutdown), now));
        assert_eq!(scheduler.phase(), Phase::Attempting);
        assert_eq!(scheduler.deadline(), None);
        assert_eq!(*rx.borrow(), Some(ReconnectOrigin::Shutdown));

        scheduler.attempt_succeeded();
        assert_eq!(scheduler.phase(), Phase::Connected);
        assert!(!scheduler.is_reconnecting());
        assert_eq!(*rx.borrow(), None);
    }

    #[test]
    fn first_origin_wins_until_success() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let now = Instant::now();
        let reboot = ReconnectRequest::new(ReconnectOrigin::Reboot)
            .with_initial_delay(Duration::from_secs(60))
            .with_delay(Duration::from_secs(10));
        assert!(!scheduler.schedule(reboot, now));
        assert!(!scheduler.schedule(
            ReconnectRequest::new(ReconnectOrigin::UpgradeSystem)
                .with_initial_delay(Duration::from_secs(5)),
            now,
        ));

        let descriptor = scheduler.descriptor().copied().expect("descriptor");
        assert_eq!(descriptor.origin, ReconnectOrigin::Reboot);
        assert_eq!(descriptor.delay, Duration::from_secs(10));
        // the later call still replaced the timer
        assert_eq!(scheduler.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn watchdog_rearming_keeps_a_single_timer() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let start = Instant::now();
        scheduler.attempt_succeeded();
        for step in 0..5u64 {
            scheduler.arm_watchdog(WINDOW, start + Duration::from_secs(step * 10));
        }
        assert_eq!(scheduler.deadline(), Some(start + Duration::from_secs(55)));
        assert_eq!(scheduler.timer_kind(), Some(TimerKind::Watchdog));
        assert!(!scheduler.is_reconnecting());

        assert!(!scheduler.fire(start + Duration::from_secs(54)));
        assert!(scheduler.fire(start + Duration::from_secs(55)));
        assert_eq!(scheduler.deadline(), None);
        assert_eq!(
            scheduler.descriptor().map(|d| d.origin),
            Some(WATCHDOG_ORIGIN)
        );
        assert!(!scheduler.fire(start + Duration::from_secs(100)));
    }

    #[test]
    fn watchdog_replaces_pending_manual_timer_but_not_its_origin() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let now = Instant::now();
        scheduler.schedule(
            ReconnectRequest::new(ReconnectOrigin::Shutdown)
                .with_initial_delay(Duration::from_secs(30)),
            now,
        );
        scheduler.arm_watchdog(WINDOW, now);
        assert_eq!(scheduler.deadline(), Some(now + WINDOW));
        assert!(scheduler.fire(now + WINDOW));
        assert_eq!(
            scheduler.descriptor().map(|d| d.origin),
            Some(ReconnectOrigin::Shutdown)
        );
    }

    #[test]
    fn failures_retry_after_recorded_delay_forever() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let mut now = Instant::now();
        assert!(scheduler.schedule(
            ReconnectRequest::new(ReconnectOrigin::Unknown).with_delay(Duration::from_secs(1)),
            now,
        ));
        for _ in 0..10 {
            scheduler.attempt_failed(now);
            assert_eq!(scheduler.phase(), Phase::Waiting);
            now += Duration::from_secs(1);
            assert!(scheduler.fire(now));
        }
        assert!(scheduler.is_reconnecting());
    }

    #[test]
    fn initial_failure_records_unknown_origin() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let now = Instant::now();
        scheduler.attempt_started(now, WINDOW);
        assert_eq!(scheduler.timer_kind(), Some(TimerKind::AttemptTimeout));
        scheduler.attempt_failed(now);
        assert_eq!(
            scheduler.descriptor().map(|d| d.origin),
            Some(ReconnectOrigin::Unknown)
        );
        assert_eq!(scheduler.deadline(), Some(now + RETRY));
        assert_eq!(scheduler.timer_kind(), Some(TimerKind::Retry));
    }

    #[test]
    fn hung_attempt_times_out_into_a_fresh_attempt() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let rx = scheduler.subscribe();
        let now = Instant::now();
        scheduler.attempt_started(now, WINDOW);
        assert!(!scheduler.is_connected());
        assert!(!scheduler.fire(now + WINDOW - Duration::from_millis(1)));
        assert!(scheduler.fire(now + WINDOW));
        assert_eq!(scheduler.phase(), Phase::Attempting);
        assert_eq!(*rx.borrow(), Some(ReconnectOrigin::Unknown));

        scheduler.attempt_started(now + WINDOW, WINDOW);
        scheduler.attempt_succeeded();
        assert!(scheduler.is_connected());
        assert_eq!(scheduler.deadline(), None);
    }

    #[test]
    fn oversized_delays_never_overflow_the_clock() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let now = Instant::now();
        scheduler.arm_watchdog(Duration::from_secs(u64::MAX), now);
        assert!(scheduler.deadline().is_some_and(|deadline| deadline > now));

        assert!(!scheduler.schedule(
            ReconnectRequest::new(ReconnectOrigin::Reboot)
                .with_initial_delay(Duration::MAX)
                .with_delay(Duration::MAX),
            now,
        ));
        assert!(scheduler.deadline().is_some_and(|deadline| deadline > now));
        scheduler.attempt_failed(now);
        assert!(scheduler.deadline().is_some_and(|deadline| deadline > now));
    }

    #[test]
    fn zero_retry_delay_is_raised_to_the_floor() {
        let mut scheduler = ReconnectionScheduler::new(Duration::ZERO);
        let now = Instant::now();
        scheduler.attempt_failed(now);
        assert_eq!(scheduler.deadline(), Some(now + MIN_RETRY_DELAY));
        assert!(!scheduler.fire(now));
    }

    #[test]
    fn idle_scheduler_ignores_stale_timers() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let now = Instant::now();
        scheduler.arm_watchdog(WINDOW, now);
        assert!(!scheduler.fire(now + WINDOW));
        assert!(!scheduler.is_reconnecting());
    }

    #[test]
    fn reset_clears_everything() {
        let mut scheduler = ReconnectionScheduler::new(RETRY);
        let rx = scheduler.subscribe();
        let now = Instant::now();
        scheduler.connection_lost(now);
        assert_eq!(*rx.borrow(), Some(ReconnectOrigin::Unknown));
        scheduler.reset();
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(scheduler.deadline(), None);
        assert_eq!(*rx.borrow(), None);
    }
}
