use crate::events::HeartbeatPayload;
use crate::ledger::{CloseOutcome, Ledger, RecordSpec};
use crate::RecordKey;

/// Lock tokens with this prefix belong to a process outside the operation
/// protocol, e.g. an interactive shell. The suffix is its start time in
/// seconds.
pub const LOCK_MARKER_PREFIX: &str = "lock-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// A dangling pending record was closed because the server holds no lock.
    Released { key: RecordKey, was_pseudo_lock: bool },
    /// A pseudo-lock record now stands in for the external lock holder.
    LockTracked { key: RecordKey },
    None,
}

/// Interprets heartbeat lock state and owns the pseudo-lock pointer.
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    pseudo_lock: Option<RecordKey>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pseudo_lock(&self) -> Option<RecordKey> {
        self.pseudo_lock
    }

    /// `now_ms` is used when a lock token carries no parsable start time.
    pub fn observe<L: Ledger + ?Sized>(
        &mut self,
        ledger: &mut L,
        heartbeat: &HeartbeatPayload,
        now_ms: i64,
    ) -> HeartbeatAction {
        match heartbeat.current_operation.as_deref() {
            None => self.release(ledger),
            Some(token) if token.starts_with(LOCK_MARKER_PREFIX) => {
                self.track_lock(ledger, token, heartbeat.cmdline.as_deref(), now_ms)
            }
            Some(_) => HeartbeatAction::None,
        }
    }

    fn release<L: Ledger + ?Sized>(&mut self, ledger: &mut L) -> HeartbeatAction {
        let tracked = self.pseudo_lock.take().filter(|key| {
            ledger
                .get(*key)
                .map(|record| record.is_pending())
                .unwrap_or(false)
        });
        let (key, was_pseudo_lock) = match tracked {
            Some(key) => (key, true),
            None => match ledger.latest_pending_external() {
                Some(key) => (key, false),
                None => return HeartbeatAction::None,
            },
        };
        ledger.close(key, CloseOutcome::silent(was_pseudo_lock));
        HeartbeatAction::Released {
            key,
            was_pseudo_lock,
        }
    }

    fn track_lock<L: Ledger + ?Sized>(
        &mut self,
        ledger: &mut L,
        token: &str,
        cmdline: Option<&str>,
        now_ms: i64,
    ) -> HeartbeatAction {
        let tracking = self
            .pseudo_lock
            .and_then(|key| ledger.get(key))
            .map(|record| record.is_pending())
            .unwrap_or(false);
        if tracking {
            return HeartbeatAction::None;
        }
        let started_at_ms = lock_started_at_ms(token).unwrap_or(now_ms);
        let title = cmdline
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(token);
        let key = ledger.create(RecordSpec::external(token, title, started_at_ms));
        self.pseudo_lock = Some(key);
        HeartbeatAction::LockTracked { key }
    }
}

/// Start time encoded in a lock token, e.g. `lock-1700000000` or `lock-1700000000.25`.
pub fn lock_started_at_ms(token: &str) -> Option<i64> {
    let suffix = token.strip_prefix(LOCK_MARKER_PREFIX)?;
    let seconds = suffix.trim().parse::<f64>().ok()?;
    seconds.is_finite().then(|| crate::seconds_to_ms(seconds))
}
