//! Stand-ins for the model in service and HTTP tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use medreason_llm::{parser, AnswerGenerator, LlmError, LlmResult, ModelHandle, ModelLoader};

/// Generator that "generates" a fixed raw output and parses it like the
/// real service.
pub struct StubGenerator {
    raw_output: String,
    calls: AtomicUsize,
    ready: AtomicBool,
    last_message: Mutex<Option<String>>,
}

impl StubGenerator {
    pub fn new(raw_output: impl Into<String>) -> Self {
        Self {
            raw_output: raw_output.into(),
            calls: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            last_message: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().expect("lock").clone()
    }
}

#[async_trait]
impl AnswerGenerator for StubGenerator {
    async fn generate(&self, message: &str) -> LlmResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        *self.last_message.lock().expect("lock") = Some(message.to_string());
        Ok(parser::render(&self.raw_output))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Generator whose every call fails with an inference error.
pub struct FailingGenerator {
    pub message: String,
}

impl Default for FailingGenerator {
    fn default() -> Self {
        Self {
            message: "CUDA out of memory at /models/base_model".to_string(),
        }
    }
}

#[async_trait]
impl AnswerGenerator for FailingGenerator {
    async fn generate(&self, _message: &str) -> LlmResult<String> {
        Err(LlmError::LlmInferenceError {
            message: self.message.clone(),
        })
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Loader wrapper counting how often a load is attempted.
pub struct CountingLoader {
    inner: Arc<dyn ModelLoader>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingLoader {
    /// Wrap `inner`, sleeping `delay` before each load to widen races.
    pub fn new(inner: Arc<dyn ModelLoader>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for CountingLoader {
    async fn load(&self) -> LlmResult<ModelHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.load().await
    }
}
