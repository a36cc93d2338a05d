use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// A single provider inside the [`ProviderRouter`].
pub struct ProviderSlot {
    pub provider: Box<dyn LlmProvider>,
    /// Extra attempts on this provider before moving to the next one.
    pub max_retries: u32,
}

impl ProviderSlot {
    pub fn new(provider: Box<dyn LlmProvider>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries,
        }
    }
}

/// Routes requests across providers with automatic failover.
///
/// Slots are tried in priority order (index 0 first). A slot that keeps
/// failing after its `max_retries` hands over to the next one; a rate-limited
/// slot hands over at once.
pub struct ProviderRouter {
    slots: Vec<ProviderSlot>,
    retry_delay: Duration,
}

impl ProviderRouter {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        Self {
            slots,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// Base delay between retries on the same slot (grows linearly).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            let provider_name = slot.provider.name();

            for attempt in 0..=slot.max_retries {
                match slot.provider.send(req).await {
                    Ok(resp) => {
                        if attempt > 0 {
                            info!(
                                provider = %provider_name,
                                attempt,
                                "request succeeded after retry"
                            );
                        }
                        return Ok(resp);
                    }
                    Err(e) => {
                        warn!(provider = %provider_name, attempt, err = %e, "provider send failed");

                        // rate limits are not retried on the same provider
                        if matches!(e, ProviderError::RateLimited { .. }) {
                            last_err = Some(e);
                            break;
                        }
                        last_err = Some(e);

                        if attempt < slot.max_retries {
                            tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
                        }
                    }
                }
            }

            info!(provider = %provider_name, "provider exhausted, trying next provider");
        }

        Err(last_err.unwrap_or_else(|| {
            ProviderError::Unavailable("no providers configured".to_string())
        }))
    }
}
