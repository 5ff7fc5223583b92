//! Bulk topic subscription management.
//!
//! The Instance ID batch API caps each request at 1000 tokens, so larger
//! sets are chunked. A transport failure on one chunk is recorded against
//! its tokens and the remaining chunks still run.

use std::sync::Arc;

use tiffin_fcm_shared::{FcmError, PushProvider, TokenTopicError, TopicBatchResult};
use tracing::{info, warn};

/// Provider-imposed per-request token ceiling for topic batch calls.
const TOPIC_BATCH_LIMIT: usize = 1000;

#[derive(Clone, Copy)]
enum TopicOp {
    Subscribe,
    Unsubscribe,
}

impl TopicOp {
    fn verb(self) -> &'static str {
        match self {
            TopicOp::Subscribe => "subscribe",
            TopicOp::Unsubscribe => "unsubscribe",
        }
    }
}

pub struct TopicSubscriptionManager {
    provider: Arc<dyn PushProvider>,
}

impl TopicSubscriptionManager {
    pub fn new(provider: Arc<dyn PushProvider>) -> Self {
        Self { provider }
    }

    pub async fn subscribe(&self, topic: &str, tokens: &[String]) -> TopicBatchResult {
        self.run(TopicOp::Subscribe, topic, tokens).await
    }

    pub async fn unsubscribe(&self, topic: &str, tokens: &[String]) -> TopicBatchResult {
        self.run(TopicOp::Unsubscribe, topic, tokens).await
    }

    async fn run(&self, op: TopicOp, topic: &str, tokens: &[String]) -> TopicBatchResult {
        let mut aggregate = TopicBatchResult {
            topic: topic.to_string(),
            success_count: 0,
            failure_count: 0,
            errors: Vec::new(),
        };

        for chunk in tokens.chunks(TOPIC_BATCH_LIMIT) {
            let outcome = match op {
                TopicOp::Subscribe => self.provider.subscribe_to_topic(chunk, topic).await,
                TopicOp::Unsubscribe => self.provider.unsubscribe_from_topic(chunk, topic).await,
            };

            match outcome {
                Ok(chunk_result) => {
                    aggregate.success_count += chunk_result.success_count;
                    aggregate.failure_count += chunk_result.failure_count;
                    for err in &chunk_result.errors {
                        warn!(
                            topic,
                            op = op.verb(),
                            error = %err.error,
                            "topic operation failed for a token"
                        );
                    }
                    aggregate.errors.extend(chunk_result.errors);
                }
                Err(err) => {
                    // The whole chunk failed to reach the provider. Record
                    // every token as failed and keep going with the rest.
                    warn!(
                        topic,
                        op = op.verb(),
                        chunk_len = chunk.len(),
                        error = %err,
                        "topic batch request failed"
                    );
                    aggregate.failure_count += chunk.len();
                    let reason = chunk_error_text(&err);
                    aggregate
                        .errors
                        .extend(chunk.iter().map(|token| TokenTopicError {
                            token: token.clone(),
                            error: reason.clone(),
                        }));
                }
            }
        }

        info!(
            topic,
            op = op.verb(),
            success = aggregate.success_count,
            failed = aggregate.failure_count,
            "topic batch complete"
        );
        aggregate
    }
}

fn chunk_error_text(err: &FcmError) -> String {
    format!("batch request failed: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tiffin_fcm_shared::NotificationIntent;

    /// Records chunk sizes and fails the nth batch call if configured.
    #[derive(Default)]
    struct ChunkRecorder {
        chunk_sizes: Mutex<Vec<usize>>,
        calls: AtomicUsize,
        fail_call: Option<usize>,
    }

    #[async_trait]
    impl PushProvider for ChunkRecorder {
        async fn send_to_token(
            &self,
            _token: &str,
            _intent: &NotificationIntent,
        ) -> Result<String, FcmError> {
            unreachable!("topic manager never sends to tokens")
        }

        async fn send_to_topic(
            &self,
            _topic: &str,
            _intent: &NotificationIntent,
        ) -> Result<String, FcmError> {
            unreachable!("topic manager never publishes messages")
        }

        async fn subscribe_to_topic(
            &self,
            tokens: &[String],
            topic: &str,
        ) -> Result<TopicBatchResult, FcmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.chunk_sizes.lock().unwrap().push(tokens.len());
            if self.fail_call == Some(call) {
                return Err(FcmError::Http("connection reset".to_string()));
            }
            Ok(TopicBatchResult {
                topic: topic.to_string(),
                success_count: tokens.len(),
                failure_count: 0,
                errors: Vec::new(),
            })
        }

        async fn unsubscribe_from_topic(
            &self,
            tokens: &[String],
            topic: &str,
        ) -> Result<TopicBatchResult, FcmError> {
            self.subscribe_to_topic(tokens, topic).await
        }

        async fn validate_token(&self, _token: &str) -> Result<bool, FcmError> {
            Ok(true)
        }
    }

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("token-{i:04}")).collect()
    }

    #[tokio::test]
    async fn large_sets_are_chunked_at_the_provider_limit() {
        let provider = Arc::new(ChunkRecorder::default());
        let manager = TopicSubscriptionManager::new(provider.clone());

        let result = manager.subscribe("daily-menu", &tokens(2500)).await;

        assert_eq!(result.success_count, 2500);
        assert_eq!(result.failure_count, 0);
        assert_eq!(*provider.chunk_sizes.lock().unwrap(), vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_abort_the_rest() {
        let provider = Arc::new(ChunkRecorder {
            fail_call: Some(1),
            ..Default::default()
        });
        let manager = TopicSubscriptionManager::new(provider.clone());

        let result = manager.subscribe("order-updates", &tokens(2500)).await;

        // Chunks 1 and 3 succeed, chunk 2 (1000 tokens) fails whole.
        assert_eq!(result.success_count, 1500);
        assert_eq!(result.failure_count, 1000);
        assert_eq!(result.errors.len(), 1000);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unsubscribe_uses_the_same_chunking() {
        let provider = Arc::new(ChunkRecorder::default());
        let manager = TopicSubscriptionManager::new(provider.clone());

        let result = manager.unsubscribe("daily-menu", &tokens(3)).await;

        assert_eq!(result.success_count, 3);
        assert_eq!(*provider.chunk_sizes.lock().unwrap(), vec![3]);
    }
}
