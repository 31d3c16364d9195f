//! Shared state for request handlers.

use std::sync::Arc;

use medreason_llm::AnswerGenerator;

/// Handler state. Cloned per request; the generator is shared.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn AnswerGenerator>,
}

impl AppState {
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }
}
