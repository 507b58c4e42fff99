use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod events;
pub mod heartbeat;
pub mod ledger;
pub mod progress;
pub mod reconcile;

/// Stable handle of a record inside a ledger. Keys are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey(pub u64);

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    Success,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            OperationStatus::Success
        } else {
            OperationStatus::Error
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who started an operation on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    ThisSession,
    OtherSession,
    Cli,
    Other(String),
}

impl Caller {
    pub fn parse_lenient(input: &str) -> Self {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "session" | "this_session" | "webadmin" => Caller::ThisSession,
            "other_session" | "other-session" | "other_webadmin" => Caller::OtherSession,
            "cli" | "root" | "command_line" => Caller::Cli,
            _ => Caller::Other(input.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Caller::ThisSession => "this_session",
            Caller::OtherSession => "other_session",
            Caller::Cli => "cli",
            Caller::Other(value) => value.as_str(),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Caller {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(Caller::parse_lenient(input))
    }
}

impl Serialize for Caller {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Caller {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Caller::parse_lenient(&raw))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    /// Ok severities never touch a counter.
    pub fn is_ok(&self) -> bool {
        matches!(self, Severity::Info | Severity::Success)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterSlot {
    Warnings,
    Errors,
}

const COUNTER_SLOTS: [(Severity, CounterSlot); 2] = [
    (Severity::Warning, CounterSlot::Warnings),
    (Severity::Error, CounterSlot::Errors),
];

/// Running counts of non-ok messages received for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounters {
    pub warnings: u32,
    pub errors: u32,
}

impl SeverityCounters {
    /// Bumps the counter mapped to `severity`. Returns false for ok severities.
    pub fn record(&mut self, severity: Severity) -> bool {
        let Some(slot) = COUNTER_SLOTS
            .iter()
            .find(|(candidate, _)| *candidate == severity)
            .map(|(_, slot)| *slot)
        else {
            return false;
        };
        let counter = match slot {
            CounterSlot::Warnings => &mut self.warnings,
            CounterSlot::Errors => &mut self.errors,
        };
        *counter = counter.saturating_add(1);
        true
    }

    pub fn get(&self, severity: Severity) -> u32 {
        COUNTER_SLOTS
            .iter()
            .find(|(candidate, _)| *candidate == severity)
            .map(|(_, slot)| match slot {
                CounterSlot::Warnings => self.warnings,
                CounterSlot::Errors => self.errors,
            })
            .unwrap_or(0)
    }
}

/// Progress bar state: (completed, partial, pending) step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub partial: u32,
    pub pending: u32,
}

impl Progress {
    pub fn total(&self) -> u32 {
        self.completed + self.partial + self.pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMessage {
    pub text: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub key: RecordKey,
    /// Reference id the stream uses to correlate events with this record.
    pub id: String,
    #[serde(default)]
    pub operation_id: Option<String>,
    pub title: String,
    pub started_at_ms: i64,
    #[serde(default)]
    pub ended_at_ms: Option<i64>,
    #[serde(default)]
    pub caller: Option<Caller>,
    pub status: OperationStatus,
    pub external: bool,
    pub show_modal: bool,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub messages: Vec<OperationMessage>,
    #[serde(default)]
    pub counters: SeverityCounters,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub notify_error: bool,
}

impl OperationRecord {
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }
}

/// Converts a server timestamp in seconds to the ledger's millisecond unit.
pub fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}
