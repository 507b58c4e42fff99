use crate::{Caller, OperationRecord, OperationStatus, RecordKey, SeverityCounters};
use chrono::Utc;
use uuid::Uuid;

/// What a new ledger record starts out as.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSpec {
    pub id: String,
    pub operation_id: Option<String>,
    pub title: String,
    pub started_at_ms: i64,
    pub caller: Option<Caller>,
    pub external: bool,
    pub status: OperationStatus,
    pub show_modal: bool,
}

impl RecordSpec {
    /// A record opened by the stream reconciler.
    pub fn external(id: impl Into<String>, title: impl Into<String>, started_at_ms: i64) -> Self {
        Self {
            id: id.into(),
            operation_id: None,
            title: title.into(),
            started_at_ms,
            caller: None,
            external: true,
            status: OperationStatus::Pending,
            show_modal: true,
        }
    }

    /// A record opened by a direct request. The id is the reference id the
    /// server echoes back on stream events about this request.
    pub fn request(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_id: None,
            title: title.into(),
            started_at_ms: Utc::now().timestamp_millis(),
            caller: Some(Caller::ThisSession),
            external: false,
            status: OperationStatus::Pending,
            show_modal: true,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_caller(mut self, caller: Option<Caller>) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.show_modal = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseOutcome {
    pub success: bool,
    pub error_message: Option<String>,
    pub suppress_error_notification: bool,
    pub ended_at_ms: Option<i64>,
}

impl CloseOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error_message: Option<String>) -> Self {
        Self {
            success: false,
            error_message,
            ..Self::default()
        }
    }

    pub fn silent(success: bool) -> Self {
        Self {
            success,
            suppress_error_notification: true,
            ..Self::default()
        }
    }

    pub fn at(mut self, ended_at_ms: i64) -> Self {
        self.ended_at_ms = Some(ended_at_ms);
        self
    }
}

/// Insertion-ordered store of operation records shared between the stream
/// reconciler and the request/response layer.
pub trait Ledger {
    fn create(&mut self, spec: RecordSpec) -> RecordKey;

    /// Closes a pending record. Unknown or already closed records are left
    /// untouched and report `false`.
    fn close(&mut self, key: RecordKey, outcome: CloseOutcome) -> bool;

    fn records(&self) -> &[OperationRecord];

    fn record_mut(&mut self, key: RecordKey) -> Option<&mut OperationRecord>;

    fn get(&self, key: RecordKey) -> Option<&OperationRecord> {
        self.records().iter().find(|record| record.key == key)
    }

    /// Last record added with this reference id.
    fn find_latest_by_id(&self, id: &str) -> Option<RecordKey> {
        self.records()
            .iter()
            .rev()
            .find(|record| record.id == id)
            .map(|record| record.key)
    }

    fn find_by_operation_id(&self, operation_id: &str) -> Option<RecordKey> {
        self.records()
            .iter()
            .rev()
            .find(|record| record.operation_id.as_deref() == Some(operation_id))
            .map(|record| record.key)
    }

    fn latest_pending_external(&self) -> Option<RecordKey> {
        self.records()
            .iter()
            .rev()
            .find(|record| record.external && record.is_pending())
            .map(|record| record.key)
    }

    fn pending_count(&self) -> usize {
        self.records()
            .iter()
            .filter(|record| record.is_pending())
            .count()
    }
}

#[derive(Debug, Default)]
pub struct OperationLedger {
    records: Vec<OperationRecord>,
    next_key: u64,
}

impl OperationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Ledger for OperationLedger {
    fn create(&mut self, spec: RecordSpec) -> RecordKey {
        let key = RecordKey(self.next_key);
        self.next_key += 1;
        let ended_at_ms = spec.status.is_closed().then_some(spec.started_at_ms);
        self.records.push(OperationRecord {
            key,
            id: spec.id,
            operation_id: spec.operation_id,
            title: spec.title,
            started_at_ms: spec.started_at_ms,
            ended_at_ms,
            caller: spec.caller,
            status: spec.status,
            external: spec.external,
            show_modal: spec.show_modal,
            progress: None,
            messages: Vec::new(),
            counters: SeverityCounters::default(),
            error: None,
            notify_error: false,
        });
        key
    }

    fn close(&mut self, key: RecordKey, outcome: CloseOutcome) -> bool {
        let Some(record) = self.record_mut(key) else {
            return false;
        };
        if record.status.is_closed() {
            return false;
        }
        record.status = OperationStatus::from_success(outcome.success);
        record.ended_at_ms = Some(
            outcome
                .ended_at_ms
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        );
        record.notify_error = !outcome.success && !outcome.suppress_error_notification;
        record.error = outcome.error_message;
        true
    }

    fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    fn record_mut(&mut self, key: RecordKey) -> Option<&mut OperationRecord> {
        self.records.iter_mut().find(|record| record.key == key)
    }
}
