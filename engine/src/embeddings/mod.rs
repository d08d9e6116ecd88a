//! Embedding producers.
//!
//! The engine only depends on the [`EmbeddingProvider`] trait; concrete
//! producers are the HTTP provider and the local Unix-socket daemon client.

pub mod daemon;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingSettings;
use crate::error::Result;

/// A pluggable producer of fixed-dimension embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Vector dimension every embedding has.
    fn dimension(&self) -> i32;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the configured provider.
///
/// Returns `None` when embeddings are disabled, or when they are enabled
/// but the configured API-key environment variable is empty - in that case
/// dense indexing self-disables with a warning instead of failing later.
pub fn provider_from_settings(
    settings: &EmbeddingSettings,
) -> Option<Arc<dyn EmbeddingProvider>> {
    if !settings.enabled {
        return None;
    }

    if let Some(socket) = &settings.daemon_socket {
        return Some(Arc::new(daemon::DaemonClient::new(
            socket.clone(),
            settings.model.clone(),
            settings.dimensions,
            std::time::Duration::from_secs(settings.timeout_secs),
        )));
    }

    let api_key = std::env::var(&settings.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            env = %settings.api_key_env,
            "Embeddings enabled but API key variable is empty; disabling dense indexing"
        );
        return None;
    }

    let mut provider = openai::OpenAiEmbeddings::new(api_key)
        .with_model(openai::resolve_model(&settings.model))
        .with_dimension(settings.dimensions)
        .with_timeout(std::time::Duration::from_secs(settings.timeout_secs));
    if let Some(base_url) = &settings.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    Some(Arc::new(provider))
}
