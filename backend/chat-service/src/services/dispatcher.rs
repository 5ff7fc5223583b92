//! Batched push delivery with retry and invalid-token cleanup.
//!
//! The dispatcher sits between callers holding a [`NotificationIntent`] and
//! the raw [`PushProvider`]. It splits large token sets into provider-sized
//! sub-batches, paces them, bounds each with a timeout, retries transient
//! failures, and prunes tokens the provider reports as permanently dead.

use std::sync::Arc;

use tiffin_fcm_shared::{classify, DeliveryFailure, FcmError, NotificationIntent, PushProvider};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::error::{AppError, AppResult};
use crate::storage::DeviceStore;

/// Aggregate outcome of one dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeliveryResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Sub-batches the token set was split into on the first attempt.
    pub batch_count: usize,
    /// Tokens the provider declared permanently invalid; already removed
    /// from storage unless ownership changed mid-flight.
    pub invalid_tokens: Vec<String>,
}

/// A token paired with the owner observed when the batch was built. The
/// snapshot guards cleanup: if the token is re-registered to another user
/// before a permanent failure comes back, removal is skipped.
#[derive(Debug, Clone)]
struct Target {
    token: String,
    owner: Option<Uuid>,
}

pub struct NotificationDispatcher {
    provider: Arc<dyn PushProvider>,
    devices: Arc<dyn DeviceStore>,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    pub fn new(
        provider: Arc<dyn PushProvider>,
        devices: Arc<dyn DeviceStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            provider,
            devices,
            settings,
        }
    }

    /// Push one intent to every registered device of a user.
    pub async fn send_to_user(
        &self,
        user_id: Uuid,
        intent: &NotificationIntent,
    ) -> AppResult<BatchDeliveryResult> {
        let devices = self.devices.tokens_for_user(user_id).await?;
        let targets = devices
            .into_iter()
            .map(|d| Target {
                token: d.token,
                owner: Some(d.user_id),
            })
            .collect();
        Ok(self.dispatch(targets, intent).await)
    }

    /// Push one intent to an explicit token list.
    pub async fn send_to_tokens(
        &self,
        tokens: Vec<String>,
        intent: &NotificationIntent,
    ) -> AppResult<BatchDeliveryResult> {
        let mut targets = Vec::with_capacity(tokens.len());
        for token in tokens {
            let owner = self.devices.owner_of(&token).await?;
            targets.push(Target { token, owner });
        }
        Ok(self.dispatch(targets, intent).await)
    }

    /// Publish one intent to a topic. Topic sends are a single provider
    /// call, so batching and token cleanup do not apply.
    pub async fn send_to_topic(
        &self,
        topic: &str,
        intent: &NotificationIntent,
    ) -> AppResult<String> {
        self.provider
            .send_to_topic(topic, intent)
            .await
            .map_err(AppError::from)
    }

    /// Ask the provider whether a token is still deliverable, without a
    /// user-visible push.
    pub async fn validate_token(&self, token: &str) -> AppResult<bool> {
        self.provider
            .validate_token(token)
            .await
            .map_err(AppError::from)
    }

    async fn dispatch(&self, targets: Vec<Target>, intent: &NotificationIntent) -> BatchDeliveryResult {
        let mut result = BatchDeliveryResult::default();
        if targets.is_empty() {
            return result;
        }

        let total = targets.len();
        let mut pending = targets;
        let mut attempt = 0u32;

        loop {
            let mut transient = Vec::new();

            for (index, chunk) in pending.chunks(self.settings.max_batch_size).enumerate() {
                if index > 0 {
                    tokio::time::sleep(self.settings.inter_batch_delay).await;
                }
                if attempt == 0 {
                    result.batch_count += 1;
                }

                let outcomes = self.deliver_chunk(chunk, intent).await;
                for (target, outcome) in outcomes {
                    match outcome {
                        Ok(_message_id) => result.success_count += 1,
                        Err(err) => match classify(&err) {
                            DeliveryFailure::PermanentInvalid => {
                                result.failure_count += 1;
                                self.cleanup_invalid(&target, &err).await;
                                result.invalid_tokens.push(target.token);
                            }
                            DeliveryFailure::TransientRetryable => transient.push(target),
                            DeliveryFailure::Unknown => {
                                warn!(
                                    token = token_tail(&target.token),
                                    error = %err,
                                    "push failed with unclassified error, not retrying"
                                );
                                result.failure_count += 1;
                            }
                        },
                    }
                }
            }

            if transient.is_empty() {
                break;
            }
            if attempt >= self.settings.retry_attempts {
                result.failure_count += transient.len();
                break;
            }

            attempt += 1;
            debug!(
                remaining = transient.len(),
                attempt, "retrying transient push failures"
            );
            tokio::time::sleep(self.settings.retry_backoff).await;
            pending = transient;
        }

        info!(
            total,
            success = result.success_count,
            failed = result.failure_count,
            batches = result.batch_count,
            invalid = result.invalid_tokens.len(),
            "push dispatch complete"
        );
        result
    }

    /// Send one sub-batch under the batch timeout. A timeout converts every
    /// token in the chunk into a transient failure so the whole chunk is
    /// eligible for retry; a stalled provider never marks tokens invalid.
    async fn deliver_chunk(
        &self,
        chunk: &[Target],
        intent: &NotificationIntent,
    ) -> Vec<(Target, Result<String, FcmError>)> {
        let attempt = async {
            let mut outcomes = Vec::with_capacity(chunk.len());
            for target in chunk {
                let outcome = self.provider.send_to_token(&target.token, intent).await;
                outcomes.push((target.clone(), outcome));
            }
            outcomes
        };

        match timeout(self.settings.batch_timeout, attempt).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                warn!(
                    chunk_len = chunk.len(),
                    "push sub-batch timed out, treating all tokens as transient"
                );
                chunk
                    .iter()
                    .map(|t| (t.clone(), Err(FcmError::Timeout)))
                    .collect()
            }
        }
    }

    async fn cleanup_invalid(&self, target: &Target, err: &FcmError) {
        match self
            .devices
            .remove_invalid(&target.token, target.owner)
            .await
        {
            Ok(true) => info!(
                token = token_tail(&target.token),
                error = %err,
                "removed permanently invalid device token"
            ),
            Ok(false) => debug!(
                token = token_tail(&target.token),
                "invalid token already gone or re-registered, leaving it"
            ),
            Err(store_err) => warn!(
                token = token_tail(&target.token),
                error = %store_err,
                "failed to remove invalid device token"
            ),
        }
    }
}

/// Last few characters of a token, safe for logs.
fn token_tail(token: &str) -> &str {
    let start = token.len().saturating_sub(8);
    // Token values are ASCII in practice; fall back to the whole token if
    // the cut would split a multibyte character.
    token.get(start..).unwrap_or(token)
}
