//! Model providers.
//!
//! A provider turns a prompt into an answer. The router owns retry, timeout
//! and budget policy; providers make exactly one attempt per `invoke`.

mod command;
mod mock;

pub use command::CommandProvider;
pub use mock::MockProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Per-call parameters passed through to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Pluggable model invocation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Make one attempt at answering `prompt` with `model_id`.
    async fn invoke(
        &self,
        prompt: &str,
        model_id: &str,
        params: &InvocationParams,
    ) -> Result<String, ProviderError>;
}
