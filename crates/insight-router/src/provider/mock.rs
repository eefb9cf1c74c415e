//! Scriptable provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{InvocationParams, ModelProvider};
use crate::error::ProviderError;

/// Answers deterministically from the prompt unless a scripted result is
/// queued. Useful for testing without a real model.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with `ProviderError::Failed`.
    pub fn failing(n: usize) -> Self {
        let provider = Self::new();
        for i in 0..n {
            provider.push(Err(ProviderError::Failed(format!("scripted failure {}", i + 1))));
        }
        provider
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a result for a future call.
    pub fn push(&self, result: Result<String, ProviderError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    /// Number of `invoke` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The answer given when nothing is scripted.
    pub fn default_answer(prompt: &str, model_id: &str) -> String {
        let first_line = prompt.lines().next().unwrap_or_default();
        format!("[{model_id}] {}", truncate(first_line, 80))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(
        &self,
        prompt: &str,
        model_id: &str,
        _params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| Ok(Self::default_answer(prompt, model_id)))
    }
}
