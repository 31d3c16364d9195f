//! Model serving core for medreason.
//!
//! - [`resolver`]: locates the base model and LoRA adapter (volume cache or
//!   remote registry), merges them and builds a [`ModelHandle`]
//! - [`llm`]: supported decoders, chat templates and greedy decoding
//! - [`parser`]: splits harmony output into reasoning and final sections
//! - [`service`]: the lazily-loaded, process-wide [`GenerationService`]

pub mod error;
pub mod llm;
pub mod parser;
pub mod resolver;
pub mod service;

pub use error::{LlmError, LlmResult};
pub use llm::{DecodingPolicy, Generation, ModelHandle};
pub use parser::NOT_FINETUNED_MESSAGE;
pub use resolver::{ModelResolver, WeightSource};
pub use service::{AnswerGenerator, GenerationService, LoadStats, ModelLoader};
