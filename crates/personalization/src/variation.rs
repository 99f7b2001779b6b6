//! Optional AI rewrite of the rendered message. Strictly best-effort:
//! a slow or failing provider degrades to the deterministic rendering
//! and never affects the dispatch outcome.

use async_trait::async_trait;
use dispatch_core::types::Contact;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::templating::interpolate;

/// Custom field consulted for the contact's company.
const COMPANY_FIELD: &str = "company";

#[derive(Debug, Clone)]
pub struct VariationRequest {
    pub base_message: String,
    pub contact_name: String,
    pub company: Option<String>,
    pub custom_fields: HashMap<String, String>,
}

/// Provider seam for AI message variations.
#[async_trait]
pub trait AiVariation: Send + Sync {
    async fn generate_variation(&self, request: &VariationRequest) -> anyhow::Result<String>;
}

/// Renders a template for a contact and optionally asks the AI provider
/// for a variation of the result.
pub struct MessagePersonalizer {
    provider: Option<Arc<dyn AiVariation>>,
    timeout: Duration,
}

impl MessagePersonalizer {
    /// Deterministic-only personalizer.
    pub fn new() -> Self {
        Self {
            provider: None,
            timeout: Duration::from_millis(8_000),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn AiVariation>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render `template` for `contact`; when `use_ai` is set and a
    /// provider is wired, request a rewrite of the rendering. Any
    /// provider error or timeout falls back to the rendering.
    pub async fn generate(
        &self,
        template: &str,
        contact: &Contact,
        fallback: Option<&HashMap<String, String>>,
        use_ai: bool,
    ) -> String {
        let base_message = interpolate(template, contact, fallback);

        if !use_ai {
            return base_message;
        }
        let Some(provider) = &self.provider else {
            return base_message;
        };

        let request = VariationRequest {
            base_message: base_message.clone(),
            contact_name: contact.name.clone(),
            company: contact.custom_fields.get(COMPANY_FIELD).cloned(),
            custom_fields: contact.custom_fields.clone(),
        };

        match tokio::time::timeout(self.timeout, provider.generate_variation(&request)).await {
            Ok(Ok(variation)) => variation.trim().to_string(),
            Ok(Err(error)) => {
                tracing::error!(%error, "AI variation failed, using rendered template");
                base_message
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "AI variation timed out, using rendered template"
                );
                base_message
            }
        }
    }
}

impl Default for MessagePersonalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct ScriptedAi {
        responses: Mutex<Vec<anyhow::Result<String>>>,
    }

    impl ScriptedAi {
        fn new(responses: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl AiVariation for ScriptedAi {
        async fn generate_variation(&self, _request: &VariationRequest) -> anyhow::Result<String> {
            self.responses.lock().remove(0)
        }
    }

    struct StallingAi;

    #[async_trait]
    impl AiVariation for StallingAi {
        async fn generate_variation(&self, _request: &VariationRequest) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("sleep outlives the test timeout")
        }
    }

    fn contact() -> Contact {
        Contact {
            id: Uuid::new_v4(),
            name: "Ana".to_string(),
            phone_number: "+5511988887777".to_string(),
            custom_fields: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn ai_disabled_returns_rendering() {
        let personalizer = MessagePersonalizer::new()
            .with_provider(ScriptedAi::new(vec![Ok("should not be used".into())]));
        let message = personalizer
            .generate("Hi {name}", &contact(), None, false)
            .await;
        assert_eq!(message, "Hi Ana");
    }

    #[tokio::test]
    async fn ai_variation_is_trimmed() {
        let personalizer = MessagePersonalizer::new()
            .with_provider(ScriptedAi::new(vec![Ok("  Hello there, Ana!\n".into())]));
        let message = personalizer
            .generate("Hi {name}", &contact(), None, true)
            .await;
        assert_eq!(message, "Hello there, Ana!");
    }

    #[tokio::test]
    async fn ai_error_falls_back_to_rendering() {
        let personalizer = MessagePersonalizer::new()
            .with_provider(ScriptedAi::new(vec![Err(anyhow::anyhow!("quota exceeded"))]));
        let message = personalizer
            .generate("Hi {name}", &contact(), None, true)
            .await;
        assert_eq!(message, "Hi Ana");
    }

    #[tokio::test(start_paused = true)]
    async fn ai_timeout_falls_back_to_rendering() {
        let personalizer = MessagePersonalizer::new()
            .with_provider(Arc::new(StallingAi))
            .with_timeout(Duration::from_millis(50));
        let message = personalizer
            .generate("Hi {name}", &contact(), None, true)
            .await;
        assert_eq!(message, "Hi Ana");
    }

    #[tokio::test]
    async fn missing_provider_with_ai_enabled_still_renders() {
        let personalizer = MessagePersonalizer::new();
        let message = personalizer
            .generate("Hi {name}", &contact(), None, true)
            .await;
        assert_eq!(message, "Hi Ana");
    }
}
