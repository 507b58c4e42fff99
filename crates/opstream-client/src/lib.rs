pub mod config;
pub mod connection;
pub mod dispatch;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use config::{resolve_config, resolve_log_dir, ClientConfig, ConfigError, ConfigFlags};
pub use notify::{ChannelNotifier, Notification, NotificationSink, ToastVariant, TracingNotifier};
pub use scheduler::{ReconnectOrigin, ReconnectRequest};
pub use service::{ClientError, ClientHandle, RequestTicket, StreamClient};
pub use transport::{EventStream, RawEvent, SseTransport, Transport, TransportError, TransportEvent};

/// Ledger shared between the stream task and request-issuing callers.
pub type SharedLedger<L> = Arc<Mutex<L>>;

pub fn shared_ledger<L>(ledger: L) -> SharedLedger<L> {
    Arc::new(Mutex::new(ledger))
}

pub(crate) fn lock_ledger<L>(ledger: &SharedLedger<L>) -> MutexGuard<'_, L> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}
