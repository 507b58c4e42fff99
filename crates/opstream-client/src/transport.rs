use crate::config::ClientConfig;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use thiserror::Error;

/// One named event as it came off the wire, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server accepted the connection and the stream is live.
    Open,
    Message(RawEvent),
    Error(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("stream closed by server")]
    Closed,
}

pub type EventStream = BoxStream<'static, TransportEvent>;

/// Opens persistent server-push connections. Dropping the returned stream
/// closes the connection.
pub trait Transport: Send + 'static {
    fn connect(&mut self) -> Result<EventStream, TransportError>;
}

/// Server-sent events over HTTP with cookies enabled.
pub struct SseTransport {
    http_client: Client,
    config: ClientConfig,
}

impl SseTransport {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let http_client = Client::builder()
            .cookie_store(true)
            .connect_timeout(config.watchdog_window)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Self {
            http_client,
            config,
        })
    }
}

impl Transport for SseTransport {
    fn connect(&mut self) -> Result<EventStream, TransportError> {
        let mut request = self
            .http_client
            .get(self.config.endpoint.clone())
            .header("Accept", "text/event-stream");
        if let Some((name, value)) = self
            .config
            .auth_header
            .as_deref()
            .and_then(parse_auth_header_parts)
        {
            request = request.header(name, value);
        }
        let source = EventSource::new(request)
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let stream = source
            .map(|item| match item {
                Ok(SseEvent::Open) => TransportEvent::Open,
                Ok(SseEvent::Message(message)) => {
                    TransportEvent::Message(RawEvent::new(message.event, message.data))
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    TransportEvent::Error(TransportError::Closed)
                }
                Err(err) => TransportEvent::Error(TransportError::Stream(err.to_string())),
            })
            .boxed();
        Ok(stream)
    }
}

/// Splits `Name: value`; a bare value is sent as `Authorization`.
pub fn parse_auth_header_parts(header: &str) -> Option<(String, String)> {
    if header.trim().is_empty() {
        return None;
    }
    if let Some((name, value)) = header.split_once(':') {
        Some((name.trim().to_string(), value.trim().to_string()))
    } else {
        Some(("Authorization".to_string(), header.trim().to_string()))
    }
}
