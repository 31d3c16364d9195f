//! Lazily-loaded generation service.
//!
//! The model is resolved on the first request (or on an explicit
//! [`GenerationService::preload`]) and reused for the life of the process.
//! Concurrent first requests serialize on a load lock and re-check the slot
//! after acquiring it, so at most one load runs at a time and a successful
//! load happens once. A failed load leaves the slot empty and the next
//! request retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medreason_core::{Config, ConversationRequest};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{LlmError, LlmResult};
use crate::llm::{DecodingPolicy, ModelHandle};
use crate::parser::{self, FINAL_SECTION, NOT_FINETUNED_MESSAGE, REASONING_SECTION};
use crate::resolver::ModelResolver;

/// Produces a [`ModelHandle`]. Called at most once per successful load.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> LlmResult<ModelHandle>;
}

/// Answers a single user message.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Caller-facing text for `message`.
    async fn generate(&self, message: &str) -> LlmResult<String>;

    /// Whether a request would be served without loading first.
    fn is_ready(&self) -> bool;
}

/// Load counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Requests served by an already-loaded model.
    pub cache_hits: u64,
    /// Successful loads.
    pub load_count: u64,
    pub load_failures: u64,
}

/// Sets its flag when dropped, telling an in-flight decode that nobody is
/// waiting for it any more.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Generation over a lazily-loaded, process-wide model handle.
pub struct GenerationService {
    loader: Arc<dyn ModelLoader>,
    handle: RwLock<Option<Arc<ModelHandle>>>,
    load_lock: tokio::sync::Mutex<()>,
    system_prompt: String,
    policy: DecodingPolicy,
    timeout: Option<Duration>,
    stats: Mutex<LoadStats>,
}

impl GenerationService {
    pub fn new(loader: Arc<dyn ModelLoader>, system_prompt: impl Into<String>) -> Self {
        Self {
            loader,
            handle: RwLock::new(None),
            load_lock: tokio::sync::Mutex::new(()),
            system_prompt: system_prompt.into(),
            policy: DecodingPolicy::default(),
            timeout: None,
            stats: Mutex::new(LoadStats::default()),
        }
    }

    /// Service backed by a [`ModelResolver`] for `config`.
    pub fn from_config(config: &Config) -> Self {
        let resolver = ModelResolver::new(config.model.clone());
        Self::new(Arc::new(resolver), config.generation.system_prompt.clone())
            .with_policy(DecodingPolicy::with_max_new_tokens(
                config.generation.max_new_tokens,
            ))
            .with_timeout(Duration::from_secs(config.server.request_timeout_secs))
    }

    pub fn with_policy(mut self, policy: DecodingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ceiling on a single generation, loading excluded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &DecodingPolicy {
        &self.policy
    }

    pub fn stats(&self) -> LoadStats {
        self.stats.lock().clone()
    }

    fn loaded(&self) -> Option<Arc<ModelHandle>> {
        self.handle.read().clone()
    }

    /// Load the model now unless it is already loaded.
    pub async fn preload(&self) -> LlmResult<()> {
        self.ensure_loaded().await.map(|_| ())
    }

    /// The loaded handle, loading it first if needed.
    pub async fn ensure_loaded(&self) -> LlmResult<Arc<ModelHandle>> {
        if let Some(handle) = self.loaded() {
            self.stats.lock().cache_hits += 1;
            return Ok(handle);
        }

        let _guard = self.load_lock.lock().await;

        // Another caller may have finished loading while we waited.
        if let Some(handle) = self.loaded() {
            self.stats.lock().cache_hits += 1;
            debug!("Model loaded by a concurrent request");
            return Ok(handle);
        }

        info!("Loading model for this process");
        match self.loader.load().await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *self.handle.write() = Some(Arc::clone(&handle));
                self.stats.lock().load_count += 1;
                info!("Model ready");
                Ok(handle)
            }
            Err(e) => {
                self.stats.lock().load_failures += 1;
                error!(error = %e, "Model load failed");
                Err(e)
            }
        }
    }

    /// Raw decoded output (prompt included) for `message`.
    ///
    /// The decode is abandoned when the timeout fires or when the returned
    /// future is dropped.
    pub async fn generate_raw(&self, message: &str) -> LlmResult<String> {
        let handle = self.ensure_loaded().await?;
        let request = ConversationRequest::new(self.system_prompt.clone(), message);
        let policy = self.policy.clone();

        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancel));

        let task = tokio::task::spawn_blocking(move || {
            let prompt = handle.render_prompt(&request)?;
            handle.generate_cancellable(&prompt, &policy, &cancel)
        });

        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                let millis = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms = millis, "Generation timed out, cancelling decode");
                LlmError::Timeout { millis }
            })?,
            None => task.await,
        };
        let generation = joined
            .map_err(|e| LlmError::inference(format!("Generation task failed: {}", e)))??;

        debug!(
            raw_len = generation.text.len(),
            prompt_tokens = generation.prompt_tokens,
            generated_tokens = generation.generated_tokens,
            stopped = generation.stopped,
            has_analysis = REASONING_SECTION.is_opened(&generation.text),
            has_final = FINAL_SECTION.is_opened(&generation.text),
            "Raw generation"
        );
        Ok(generation.text)
    }
}

#[async_trait]
impl AnswerGenerator for GenerationService {
    async fn generate(&self, message: &str) -> LlmResult<String> {
        let raw = self.generate_raw(message).await?;
        let answer = parser::parse(&raw);
        if !answer.is_structured() {
            warn!(raw_len = raw.len(), "Output has no final section, returning fallback");
        }
        Ok(answer
            .render()
            .unwrap_or_else(|| NOT_FINETUNED_MESSAGE.to_string()))
    }

    fn is_ready(&self) -> bool {
        self.handle.read().is_some()
    }
}
