//! Messaging gateway contract and the per-instance provider.

use async_trait::async_trait;
use dispatch_core::error::{DispatchError, DispatchResult};
use dispatch_core::types::{ConnectionStatus, ConnectionTest, MessagingInstance};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub to: String,
    pub message: String,
    /// Typing indicator shown to the recipient before delivery.
    pub simulate_typing_ms: u64,
}

/// Outbound messaging seam. One implementation per provider; the worker
/// only sees this trait.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_message(&self, payload: &SendMessage) -> anyhow::Result<()>;

    async fn validate_connection(&self) -> ConnectionTest;

    /// Fail fast when the instance is not connected.
    async fn ensure_connected(&self) -> DispatchResult<()> {
        let test = self.validate_connection().await;
        match test.status {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Error => Err(DispatchError::Gateway(
                test.message
                    .unwrap_or_else(|| "instance disconnected".to_string()),
            )),
        }
    }
}

/// Builds the gateway for a given messaging instance. The worker asks
/// for one per job, so each campaign sends through its own instance.
pub trait GatewayFactory: Send + Sync {
    fn gateway_for(&self, instance: &MessagingInstance) -> Arc<dyn MessagingGateway>;
}

/// Default factory: an [`InstanceProvider`] per instance.
pub struct ProviderFactory {
    timeout_ms: u64,
}

impl ProviderFactory {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

impl GatewayFactory for ProviderFactory {
    fn gateway_for(&self, instance: &MessagingInstance) -> Arc<dyn MessagingGateway> {
        Arc::new(InstanceProvider::new(instance, self.timeout_ms))
    }
}

/// Factory that hands out one fixed gateway regardless of instance.
/// Used to wire a scripted double into the worker in tests.
pub struct FixedGateway(pub Arc<dyn MessagingGateway>);

impl GatewayFactory for FixedGateway {
    fn gateway_for(&self, _instance: &MessagingInstance) -> Arc<dyn MessagingGateway> {
        Arc::clone(&self.0)
    }
}

/// Gateway bound to one connected messaging instance.
pub struct InstanceProvider {
    instance_id: Uuid,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl InstanceProvider {
    pub fn new(instance: &MessagingInstance, timeout_ms: u64) -> Self {
        Self {
            instance_id: instance.id,
            base_url: instance.base_url.clone(),
            api_key: instance.api_key.clone(),
            timeout_ms,
        }
    }
}

#[async_trait]
impl MessagingGateway for InstanceProvider {
    async fn send_message(&self, payload: &SendMessage) -> anyhow::Result<()> {
        tracing::info!(
            instance_id = %self.instance_id,
            to = %payload.to,
            body_len = payload.message.len(),
            typing_ms = payload.simulate_typing_ms,
            base = %self.base_url,
            token_len = self.api_key.len(),
            timeout_ms = self.timeout_ms,
            "Sending instance message"
        );
        Ok(())
    }

    async fn validate_connection(&self) -> ConnectionTest {
        tracing::debug!(
            instance_id = %self.instance_id,
            base = %self.base_url,
            "Probing instance connection"
        );
        ConnectionTest {
            instance_id: self.instance_id,
            status: ConnectionStatus::Connected,
            message: None,
        }
    }
}
