//! Scriptable gateway for tests: queue outcomes, record sends.

use async_trait::async_trait;
use dispatch_core::types::{ConnectionStatus, ConnectionTest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::gateway::{MessagingGateway, SendMessage};

/// Gateway double that replays a scripted sequence of outcomes and
/// records every send it receives. Once the script is exhausted, sends
/// succeed.
#[derive(Default)]
pub struct MockGateway {
    script: Mutex<VecDeque<Result<(), String>>>,
    sent: Mutex<Vec<SendMessage>>,
    connection_error: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next unsent outcome slot.
    pub fn push_failure(&self, error: impl Into<String>) {
        self.script.lock().push_back(Err(error.into()));
    }

    /// Queue an explicit success slot.
    pub fn push_success(&self) {
        self.script.lock().push_back(Ok(()));
    }

    /// Make `validate_connection` report an error from now on.
    pub fn set_connection_error(&self, message: impl Into<String>) {
        *self.connection_error.lock() = Some(message.into());
    }

    pub fn sent(&self) -> Vec<SendMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MessagingGateway for MockGateway {
    async fn send_message(&self, payload: &SendMessage) -> anyhow::Result<()> {
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        match outcome {
            Ok(()) => {
                self.sent.lock().push(payload.clone());
                Ok(())
            }
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn validate_connection(&self) -> ConnectionTest {
        match self.connection_error.lock().clone() {
            Some(message) => ConnectionTest {
                instance_id: Uuid::nil(),
                status: ConnectionStatus::Error,
                message: Some(message),
            },
            None => ConnectionTest {
                instance_id: Uuid::nil(),
                status: ConnectionStatus::Connected,
                message: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> SendMessage {
        SendMessage {
            to: "+5511999990000".into(),
            message: text.into(),
            simulate_typing_ms: 0,
        }
    }

    #[tokio::test]
    async fn script_replays_then_defaults_to_success() {
        let gateway = MockGateway::new();
        gateway.push_failure("rate limited");
        gateway.push_success();

        assert!(gateway.send_message(&payload("one")).await.is_err());
        assert!(gateway.send_message(&payload("two")).await.is_ok());
        assert!(gateway.send_message(&payload("three")).await.is_ok());

        // Failed sends are not recorded.
        assert_eq!(gateway.sent_count(), 2);
        assert_eq!(gateway.sent()[0].message, "two");
    }

    #[tokio::test]
    async fn connection_error_fails_ensure_connected() {
        let gateway = MockGateway::new();
        assert!(gateway.ensure_connected().await.is_ok());

        gateway.set_connection_error("logged out");
        let err = gateway.ensure_connected().await.unwrap_err();
        assert!(err.to_string().contains("logged out"));
    }
}
