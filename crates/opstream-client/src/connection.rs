use crate::transport::{EventStream, RawEvent, Transport, TransportError, TransportEvent};
use futures_util::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Message(RawEvent),
    /// The handle is gone. `while_opening` tells a failed attempt apart from
    /// a live connection that dropped.
    Failed {
        error: TransportError,
        while_opening: bool,
    },
}

/// Owns the one live connection handle.
pub struct ConnectionManager<T> {
    transport: T,
    stream: Option<EventStream>,
    state: ConnectionState,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            stream: None,
            state: ConnectionState::Closed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some() && self.state == ConnectionState::Open
    }

    /// Drops any existing handle and starts a fresh connection. The outcome
    /// arrives later through `next_event` as `Opened` or `Failed`.
    pub fn open(&mut self) -> Result<(), TransportError> {
        self.close();
        let stream = self.transport.connect()?;
        self.stream = Some(stream);
        self.state = ConnectionState::Opening;
        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Closed;
    }

    /// Waits for the next transport event. Never resolves without a handle.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        let Some(stream) = self.stream.as_mut() else {
            return std::future::pending().await;
        };
        match stream.next().await {
            Some(TransportEvent::Open) => {
                self.state = ConnectionState::Open;
                ConnectionEvent::Opened
            }
            Some(TransportEvent::Message(raw)) => ConnectionEvent::Message(raw),
            Some(TransportEvent::Error(error)) => self.fail(error),
            None => self.fail(TransportError::Closed),
        }
    }

    fn fail(&mut self, error: TransportError) -> ConnectionEvent {
        let while_opening = self.state == ConnectionState::Opening;
        self.close();
        ConnectionEvent::Failed {
            error,
            while_opening,
        }
    }
}
