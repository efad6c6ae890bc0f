//! The response-generation capability agents call out to.
//!
//! The swarm never builds prompts itself. It only needs to know whether an
//! exchange succeeded, so [`interact`] turns any provider call into an
//! [`InteractionOutcome`]. Timeouts and errors become failed outcomes.

use async_trait::async_trait;
use hivemind_core::types::{AgentId, InteractionOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Provider-related errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0} ms")]
    Timeout(u128),
}

/// What a provider returned for one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    pub success: bool,
    pub latency_ms: u64,
}

/// Per-agent context handed to the provider alongside the prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent: Option<AgentId>,
    pub partner: Option<AgentId>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl AgentContext {
    pub fn between(agent: AgentId, partner: AgentId) -> Self {
        Self {
            agent: Some(agent),
            partner: Some(partner),
            parameters: BTreeMap::new(),
        }
    }
}

/// Turns a prompt into text. Implemented outside this crate.
#[async_trait]
pub trait ResponseProvider: Send + Sync {
    async fn respond(
        &self,
        prompt: &str,
        context: &AgentContext,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Provider name for logging.
    fn name(&self) -> &str {
        "provider"
    }
}

/// Outcome of one provider-backed interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionResult {
    pub outcome: InteractionOutcome,
    pub response: Option<ProviderResponse>,
    pub error: Option<ProviderError>,
}

impl InteractionResult {
    pub fn is_transient_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Call `provider` with a deadline and map the result to an outcome.
///
/// A reply counts as a success with `magnitude` only when the provider
/// itself reports success. Errors and timeouts are failures with the same
/// magnitude; nothing is retried here.
pub async fn interact(
    provider: &dyn ResponseProvider,
    prompt: &str,
    context: &AgentContext,
    timeout: Duration,
    magnitude: f64,
) -> InteractionResult {
    let started = Instant::now();
    match tokio::time::timeout(timeout, provider.respond(prompt, context)).await {
        Ok(Ok(response)) => {
            let outcome = InteractionOutcome {
                success: response.success,
                magnitude,
            };
            tracing::debug!(
                provider = provider.name(),
                success = response.success,
                latency_ms = response.latency_ms,
                "provider responded"
            );
            InteractionResult {
                outcome,
                response: Some(response),
                error: None,
            }
        }
        Ok(Err(error)) => {
            tracing::warn!(provider = provider.name(), %error, "provider failed");
            InteractionResult {
                outcome: InteractionOutcome::failure(magnitude),
                response: None,
                error: Some(error),
            }
        }
        Err(_) => {
            let elapsed = started.elapsed().as_millis();
            tracing::warn!(provider = provider.name(), elapsed_ms = elapsed as u64, "provider timed out");
            InteractionResult {
                outcome: InteractionOutcome::failure(magnitude),
                response: None,
                error: Some(ProviderError::Timeout(timeout.as_millis())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        delay: Duration,
        reply: Result<ProviderResponse, ProviderError>,
    }

    #[async_trait]
    impl ResponseProvider for Scripted {
        async fn respond(&self, _: &str, _: &AgentContext) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn ok(success: bool) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: "ack".to_string(),
            success,
            latency_ms: 3,
        })
    }

    #[tokio::test]
    async fn successful_reply_is_a_success_outcome() {
        let provider = Scripted { delay: Duration::ZERO, reply: ok(true) };
        let result = interact(&provider, "hello", &AgentContext::default(), Duration::from_secs(1), 0.4).await;
        assert_eq!(result.outcome, InteractionOutcome::success(0.4));
        assert!(!result.is_transient_failure());
    }

    #[tokio::test]
    async fn unsuccessful_reply_is_a_failure_without_error() {
        let provider = Scripted { delay: Duration::ZERO, reply: ok(false) };
        let result = interact(&provider, "hello", &AgentContext::default(), Duration::from_secs(1), 0.4).await;
        assert!(!result.outcome.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn provider_error_becomes_failure() {
        let provider = Scripted {
            delay: Duration::ZERO,
            reply: Err(ProviderError::Unavailable("503".to_string())),
        };
        let result = interact(&provider, "hello", &AgentContext::default(), Duration::from_secs(1), 1.0).await;
        assert_eq!(result.outcome, InteractionOutcome::failure(1.0));
        assert!(result.is_transient_failure());
    }

    #[tokio::test]
    async fn timeout_becomes_failure() {
        let provider = Scripted { delay: Duration::from_secs(5), reply: ok(true) };
        let result = interact(&provider, "hello", &AgentContext::default(), Duration::from_millis(20), 1.0).await;
        assert!(!result.outcome.success);
        assert_eq!(result.error, Some(ProviderError::Timeout(20)));
    }
}
