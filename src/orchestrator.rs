//! Sequencing of one user message into one bot reply.

use std::{
    future::IntoFuture,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{rngs::StdRng, Rng};
use tokio::task::{JoinError, JoinHandle};

use crate::error::ChatError;
use crate::fallback::fallback;
use crate::resolver::AnswerResolver;
use crate::session::{ExchangeGuard, SessionStore};
use crate::types::ChatMessage;

pub const ERROR_REPLY: &str =
    "I'm sorry, I encountered an error while processing your message. Please try again.";

/// Simulated "thinking" time before the bot answers, sampled from `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingDelay {
    min: Duration,
    max: Duration,
}

impl Default for TypingDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(3000),
        }
    }
}

impl TypingDelay {
    /// `min == max` gives a fixed delay.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ChatError> {
        if max < min {
            return Err(ChatError::config(format!(
                "typing delay max ({} ms) is below min ({} ms)",
                max.as_millis(),
                min.as_millis()
            )));
        }
        Ok(Self { min, max })
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rng.gen_range(self.min..self.max)
    }
}

/// Drives exchanges for one session.
///
/// Exchanges are serialized through a fair gate: a second message sent while
/// the first is still pending is answered after it, and the typing indicator
/// stays up until the last pending reply lands.
#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Arc<SessionStore>,
    resolver: Arc<AnswerResolver>,
    delay: TypingDelay,
    rng: Arc<Mutex<StdRng>>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        resolver: Arc<AnswerResolver>,
        delay: TypingDelay,
        rng: Arc<Mutex<StdRng>>,
    ) -> Self {
        Self {
            store,
            resolver,
            delay,
            rng,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Appends the user message and raises typing before returning; the reply
    /// is produced by a spawned task. Input that is blank after trimming is
    /// ignored; anything else is stored exactly as given.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send_message(&self, content: &str) -> Option<PendingReply> {
        if content.trim().is_empty() || self.store.is_disposed() {
            return None;
        }

        let message = ChatMessage::user(content);
        let guard = self.store.begin_exchange(message.clone());
        let this = self.clone();
        let text = content.to_string();
        let handle = tokio::spawn(async move { this.run_exchange(guard, text).await });
        Some(PendingReply { message, handle })
    }

    async fn run_exchange(self, guard: ExchangeGuard, text: String) {
        let _turn = self.gate.lock().await;

        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.delay.sample(&mut *rng)
        };
        tokio::time::sleep(delay).await;

        if guard.is_stale() {
            tracing::debug!(generation = guard.generation(), "session changed, skipping reply");
            return;
        }

        let reply = match self.compose_reply(&text).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(error = %err, "failed to produce a reply");
                ERROR_REPLY.to_string()
            }
        };

        guard.finish(ChatMessage::bot(reply));
    }

    async fn compose_reply(&self, text: &str) -> Result<String, ChatError> {
        let tenant_id = self.store.snapshot().user_id;

        // Own task: a collaborator panic surfaces here as a JoinError.
        let resolver = Arc::clone(&self.resolver);
        let query = text.to_string();
        let tenant = tenant_id.clone();
        let answer = tokio::spawn(async move { resolver.resolve(&query, tenant.as_deref()).await })
            .await
            .map_err(|err| ChatError::unexpected(format!("resolver task failed: {err}")))?;

        if let Some(answer) = answer {
            return Ok(answer);
        }

        tracing::debug!(tenant_id = ?tenant_id, "no Q&A entry matched");
        if let Some(tenant_id) = tenant_id {
            self.report_unanswered(tenant_id, text);
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(fallback(&mut *rng).to_string())
    }

    fn report_unanswered(&self, tenant_id: String, question: &str) {
        let Some(backend) = self.resolver.backend().cloned() else {
            return;
        };
        let question = question.to_string();
        tokio::spawn(async move {
            if let Err(err) = backend.log_unanswered(&tenant_id, &question).await {
                tracing::warn!(tenant_id = %tenant_id, error = %err, "could not report unanswered question");
            }
        });
    }
}

/// The user message an exchange started with, plus its reply task.
///
/// Awaiting it waits for the bot reply to land.
#[derive(Debug)]
pub struct PendingReply {
    message: ChatMessage,
    handle: JoinHandle<()>,
}

impl PendingReply {
    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn into_handle(self) -> JoinHandle<()> {
        self.handle
    }
}

impl IntoFuture for PendingReply {
    type Output = Result<(), JoinError>;
    type IntoFuture = JoinHandle<()>;

    fn into_future(self) -> Self::IntoFuture {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn delay_samples_stay_in_range() {
        let delay = TypingDelay::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let sample = delay.sample(&mut rng);
            assert!(sample >= Duration::from_millis(1000));
            assert!(sample < Duration::from_millis(3000));
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let delay = TypingDelay::fixed(Duration::from_millis(250));
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(delay.sample(&mut rng), Duration::from_millis(250));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = TypingDelay::new(Duration::from_millis(10), Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
