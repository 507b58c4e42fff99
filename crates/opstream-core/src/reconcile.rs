//! Maps operation lifecycle events onto ledger records.
//!
//! Every event is matched to the most recently added record carrying its
//! reference id. Unknown ids open a new external record, so events for
//! operations started elsewhere (another session, the command line) still
//! show up. Replays and duplicates are absorbed here instead of surfacing
//! as errors.

use crate::events::{EndPayload, MsgPayload, RecentHistoryPayload, StartPayload, StreamEvent};
use crate::ledger::{CloseOutcome, Ledger, RecordSpec};
use crate::progress::{normalize_line_breaks, parse_progress};
use crate::{OperationMessage, OperationStatus, RecordKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Started,
    Message,
    Closed,
    Replayed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The record belongs to a direct request, which closes it itself.
    NotExternal,
    AlreadyClosed,
    DuplicateHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub key: RecordKey,
    pub created: bool,
    pub effect: Effect,
}

/// Applies an operation event. Toasts and heartbeats are not ledger events
/// and yield `None`.
pub fn reconcile<L: Ledger + ?Sized>(ledger: &mut L, event: &StreamEvent) -> Option<Reconciliation> {
    match event {
        StreamEvent::Start(payload) => Some(apply_start(ledger, payload)),
        StreamEvent::Msg(payload) => Some(apply_msg(ledger, payload)),
        StreamEvent::End(payload) => Some(apply_end(ledger, payload)),
        StreamEvent::RecentHistory(payload) => Some(apply_history(ledger, payload)),
        StreamEvent::Toast(_) | StreamEvent::Heartbeat(_) => None,
    }
}

fn lookup_or_create<L: Ledger + ?Sized>(
    ledger: &mut L,
    ref_id: &str,
    default_title: &str,
    started_at_ms: i64,
) -> (RecordKey, bool) {
    if let Some(key) = ledger.find_latest_by_id(ref_id) {
        return (key, false);
    }
    let key = ledger.create(RecordSpec::external(ref_id, default_title, started_at_ms));
    (key, true)
}

pub fn apply_start<L: Ledger + ?Sized>(ledger: &mut L, payload: &StartPayload) -> Reconciliation {
    let (key, created) = lookup_or_create(
        ledger,
        &payload.ref_id,
        &payload.title,
        payload.timestamp.as_ms(),
    );
    if let Some(record) = ledger.record_mut(key) {
        record.operation_id = Some(payload.operation_id.clone());
        record.title = payload.title.clone();
        if payload.started_by.is_some() {
            record.caller = payload.started_by.clone();
        }
    }
    Reconciliation {
        key,
        created,
        effect: Effect::Started,
    }
}

pub fn apply_msg<L: Ledger + ?Sized>(ledger: &mut L, payload: &MsgPayload) -> Reconciliation {
    let default_title = payload.operation_id.as_deref().unwrap_or(&payload.ref_id);
    let (key, created) = lookup_or_create(
        ledger,
        &payload.ref_id,
        default_title,
        payload.timestamp.as_ms(),
    );
    let (progress, text) = parse_progress(&payload.msg);
    if let Some(record) = ledger.record_mut(key) {
        if progress.is_some() {
            record.progress = progress;
        }
        record.messages.push(OperationMessage {
            text: normalize_line_breaks(text),
            severity: payload.level,
        });
        record.counters.record(payload.level);
    }
    Reconciliation {
        key,
        created,
        effect: Effect::Message,
    }
}

pub fn apply_end<L: Ledger + ?Sized>(ledger: &mut L, payload: &EndPayload) -> Reconciliation {
    let default_title = payload.operation_id.as_deref().unwrap_or(&payload.ref_id);
    let (key, created) = lookup_or_create(
        ledger,
        &payload.ref_id,
        default_title,
        payload.timestamp.as_ms(),
    );
    let external = ledger.get(key).map(|record| record.external).unwrap_or(false);
    if !external {
        return Reconciliation {
            key,
            created,
            effect: Effect::Skipped(SkipReason::NotExternal),
        };
    }
    let outcome = CloseOutcome {
        success: payload.success,
        error_message: payload.errormsg.clone(),
        suppress_error_notification: false,
        ended_at_ms: Some(payload.timestamp.as_ms()),
    };
    let effect = if ledger.close(key, outcome) {
        Effect::Closed
    } else {
        Effect::Skipped(SkipReason::AlreadyClosed)
    };
    Reconciliation {
        key,
        created,
        effect,
    }
}

pub fn apply_history<L: Ledger + ?Sized>(
    ledger: &mut L,
    payload: &RecentHistoryPayload,
) -> Reconciliation {
    if let Some(key) = ledger.find_by_operation_id(&payload.operation_id) {
        return Reconciliation {
            key,
            created: false,
            effect: Effect::Skipped(SkipReason::DuplicateHistory),
        };
    }
    let spec = RecordSpec::external(
        payload.operation_id.clone(),
        payload.title.clone(),
        payload.started_at.as_ms(),
    )
    .with_operation_id(payload.operation_id.clone())
    .with_caller(payload.started_by.clone())
    .with_status(OperationStatus::from_success(payload.success))
    .hidden();
    let key = ledger.create(spec);
    Reconciliation {
        key,
        created: true,
        effect: Effect::Replayed,
    }
}
