//! In-memory transport for testing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use v2g_core::Message;

use crate::connection::MessageTransport;
use crate::error::TransportError;

#[derive(Default)]
struct MockState {
    sent: Vec<Message>,
    receive_timeouts: Vec<Duration>,
    stop_calls: usize,
}

/// Shared view of what a [`MockTransport`] did
#[derive(Clone, Default)]
pub struct MockLog {
    state: Arc<Mutex<MockState>>,
}

impl MockLog {
    /// Messages sent so far, in order
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    /// Timeout passed to every `receive` call
    pub fn receive_timeouts(&self) -> Vec<Duration> {
        self.state.lock().receive_timeouts.clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }
}

/// Message transport backed by channels
///
/// Either one end of an in-process pair, or a scripted peer whose messages
/// are queued up front. Once the queue is drained `receive` reports
/// [`TransportError::ConnectionClosed`].
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Message>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    log: MockLog,
    is_tls: bool,
    stopped: bool,
}

impl MockTransport {
    /// Two connected ends
    pub fn pair(is_tls: bool) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            incoming: a_rx,
            outgoing: Some(b_tx),
            log: MockLog::default(),
            is_tls,
            stopped: false,
        };
        let b = Self {
            incoming: b_rx,
            outgoing: Some(a_tx),
            log: MockLog::default(),
            is_tls,
            stopped: false,
        };
        (a, b)
    }

    /// Transport that yields `incoming` in order and records what is sent
    pub fn scripted(incoming: Vec<Message>, is_tls: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for message in incoming {
            let _ = tx.send(message);
        }
        Self {
            incoming: rx,
            outgoing: None,
            log: MockLog::default(),
            is_tls,
            stopped: false,
        }
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn receive(&mut self, timeout: Duration) -> Result<Message, TransportError> {
        self.log.state.lock().receive_timeouts.push(timeout);
        if self.stopped {
            return Err(TransportError::ConnectionClosed);
        }
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Err(TransportError::Timeout(format!(
                "no message within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn send(&mut self, message: &Message, _timeout: Duration) -> Result<(), TransportError> {
        if self.stopped {
            return Err(TransportError::ConnectionClosed);
        }
        self.log.state.lock().sent.push(message.clone());
        if let Some(outgoing) = &self.outgoing {
            outgoing
                .send(message.clone())
                .map_err(|_| TransportError::ConnectionClosed)?;
        }
        tracing::debug!(kind = %message.kind(), "Mock transport: sent message");
        Ok(())
    }

    async fn stop(&mut self) {
        self.log.state.lock().stop_calls += 1;
        self.stopped = true;
        self.outgoing = None;
        self.incoming.close();
    }

    fn is_tls(&self) -> bool {
        self.is_tls
    }
}
