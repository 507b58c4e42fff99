use crate::notify::{Notification, NotificationSink};
use crate::scheduler::ReconnectionScheduler;
use crate::transport::RawEvent;
use crate::{lock_ledger, SharedLedger};
use chrono::Utc;
use opstream_core::events::{decode_event, EventError, StreamEvent};
use opstream_core::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use opstream_core::ledger::Ledger;
use opstream_core::reconcile::{reconcile, Effect, Reconciliation};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Reconciled(Reconciliation),
    Heartbeat(HeartbeatAction),
    Toast,
    Rejected(EventError),
    Ignored,
}

/// Routes decoded stream events to the ledger, the heartbeat monitor and the
/// notification sink. Every raw event feeds the watchdog first.
pub struct EventDispatcher<L, N> {
    ledger: SharedLedger<L>,
    notifier: N,
    heartbeat: HeartbeatMonitor,
    watchdog_window: Duration,
}

impl<L: Ledger, N: NotificationSink> EventDispatcher<L, N> {
    pub fn new(ledger: SharedLedger<L>, notifier: N, watchdog_window: Duration) -> Self {
        Self {
            ledger,
            notifier,
            heartbeat: HeartbeatMonitor::new(),
            watchdog_window,
        }
    }

    pub fn arm_watchdog(&self, scheduler: &mut ReconnectionScheduler, now: Instant) {
        scheduler.arm_watchdog(self.watchdog_window, now);
    }

    pub fn dispatch(
        &mut self,
        scheduler: &mut ReconnectionScheduler,
        raw: &RawEvent,
        now: Instant,
    ) -> Dispatched {
        self.arm_watchdog(scheduler, now);
        match decode_event(&raw.name, &raw.data) {
            Ok(event) => self.handle(event),
            Err(err) => {
                warn!(event = "event_decode_error", name = %raw.name, error = %err);
                Dispatched::Rejected(err)
            }
        }
    }

    pub fn handle(&mut self, event: StreamEvent) -> Dispatched {
        match event {
            StreamEvent::Toast(payload) => {
                self.notifier.notify(Notification {
                    body: payload.msg,
                    variant: payload.level.into(),
                });
                Dispatched::Toast
            }
            StreamEvent::Heartbeat(payload) => {
                let now_ms = payload
                    .timestamp
                    .map(|timestamp| timestamp.as_ms())
                    .unwrap_or_else(|| Utc::now().timestamp_millis());
                let mut ledger = lock_ledger(&self.ledger);
                let action = self.heartbeat.observe(&mut *ledger, &payload, now_ms);
                match action {
                    HeartbeatAction::Released {
                        key,
                        was_pseudo_lock,
                    } => info!(event = "lock_released", record = %key, pseudo_lock = was_pseudo_lock),
                    HeartbeatAction::LockTracked { key } => info!(
                        event = "lock_tracked",
                        record = %key,
                        holder = payload.current_operation.as_deref().unwrap_or_default()
                    ),
                    HeartbeatAction::None => {}
                }
                Dispatched::Heartbeat(action)
            }
            event => {
                let name = event.name();
                let mut ledger = lock_ledger(&self.ledger);
                match reconcile(&mut *ledger, &event) {
                    Some(reconciliation) => {
                        log_reconciliation(name, &reconciliation);
                        Dispatched::Reconciled(reconciliation)
                    }
                    None => Dispatched::Ignored,
                }
            }
        }
    }
}

fn log_reconciliation(name: &str, reconciliation: &Reconciliation) {
    let key = reconciliation.key;
    match reconciliation.effect {
        Effect::Closed => info!(event = "operation_closed", record = %key),
        Effect::Replayed => debug!(event = "operation_replayed", record = %key),
        Effect::Skipped(reason) => debug!(
            event = "operation_event_skipped",
            record = %key,
            via = name,
            reason = ?reason
        ),
        Effect::Started | Effect::Message if reconciliation.created => {
            info!(event = "operation_discovered", record = %key, via = name)
        }
        Effect::Started | Effect::Message => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, ToastVariant};
    use crate::scheduler::TimerKind;
    use opstream_core::ledger::OperationLedger;
    use opstream_core::OperationStatus;
    use std::sync::{Arc, Mutex};

    fn dispatcher() -> (
        EventDispatcher<OperationLedger, ChannelNotifier>,
        SharedLedger<OperationLedger>,
        tokio::sync::mpsc::UnboundedReceiver<Notification>,
    ) {
        let ledger = Arc::new(Mutex::new(OperationLedger::new()));
        let (notifier, rx) = ChannelNotifier::new();
        (
            EventDispatcher::new(ledger.clone(), notifier, Duration::from_secs(15)),
            ledger,
            rx,
        )
    }

    #[test]
    fn every_event_rearms_the_watchdog_even_when_rejected() {
        let (mut dispatcher, _ledger, _rx) = dispatcher();
        let mut scheduler = ReconnectionScheduler::new(Duration::from_secs(3));
        let now = Instant::now();

        let outcome = dispatcher.dispatch(&mut scheduler, &RawEvent::new("bogus", "{}"), now);
        assert!(matches!(outcome, Dispatched::Rejected(EventError::UnknownEvent(_))));
        assert_eq!(scheduler.timer_kind(), Some(TimerKind::Watchdog));
        assert_eq!(scheduler.deadline(), Some(now + Duration::from_secs(15)));
        assert!(!scheduler.is_reconnecting());
    }

    #[test]
    fn toasts_are_forwarded_with_variant() {
        let (mut dispatcher, ledger, mut rx) = dispatcher();
        let mut scheduler = ReconnectionScheduler::new(Duration::from_secs(3));
        let raw = RawEvent::new("toast", r#"{"msg":"Disk almost full","level":"error"}"#);
        assert_eq!(
            dispatcher.dispatch(&mut scheduler, &raw, Instant::now()),
            Dispatched::Toast
        );
        let notification = rx.try_recv().expect("notification");
        assert_eq!(notification.body, "Disk almost full");
        assert_eq!(notification.variant, ToastVariant::Danger);
        assert!(lock_ledger(&ledger).records().is_empty());
    }

    #[test]
    fn lifecycle_and_heartbeat_events_reach_the_ledger() {
        let (mut dispatcher, ledger, _rx) = dispatcher();
        let mut scheduler = ReconnectionScheduler::new(Duration::from_secs(3));
        let now = Instant::now();
        let events = [
            RawEvent::new(
                "start",
                r#"{"ref_id":"A","operation_id":"O","title":"T","timestamp":1700000000}"#,
            ),
            RawEvent::new(
                "msg",
                r#"{"ref_id":"A","timestamp":1700000001,"level":"warning","msg":"[#.] > half"}"#,
            ),
        ];
        for raw in &events {
            assert!(matches!(
                dispatcher.dispatch(&mut scheduler, raw, now),
                Dispatched::Reconciled(_)
            ));
        }

        let outcome = dispatcher.dispatch(
            &mut scheduler,
            &RawEvent::new("heartbeat", r#"{"current_operation":null,"cmdline":null}"#),
            now,
        );
        let Dispatched::Heartbeat(HeartbeatAction::Released {
            was_pseudo_lock, ..
        }) = outcome
        else {
            panic!("expected a release, got {outcome:?}");
        };
        assert!(!was_pseudo_lock);

        let guard = lock_ledger(&ledger);
        let record = &guard.records()[0];
        assert_eq!(record.status, OperationStatus::Error);
        assert_eq!(record.counters.warnings, 1);
        assert_eq!(record.messages[0].text, "half");
        assert!(!record.notify_error);
    }
}
