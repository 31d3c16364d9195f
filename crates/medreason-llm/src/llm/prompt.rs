//! Chat template rendering.
//!
//! Prompts are produced by the model's own Jinja chat template when it ships
//! one that renders cleanly, and by a built-in harmony template otherwise.

use std::fmt::Write as _;
use std::path::Path;

use medreason_core::{ChatMessage, ConversationRequest};
use minijinja::{context, Environment, ErrorKind};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{LlmError, LlmResult};

const TEMPLATE_NAME: &str = "chat";
const MAX_RECURSION_DEPTH: usize = 100;

/// Built-in harmony-format template. Ends with the assistant header so the
/// model opens its first channel itself.
pub const HARMONY_TEMPLATE: &str = r##"
{{- "<|start|>system<|message|>You are ChatGPT, a large language model trained by OpenAI.\nKnowledge cutoff: 2024-06\n\nReasoning: medium\n\n# Valid channels: analysis, commentary, final. Channel must be included for every message.<|end|>" -}}
{%- for message in messages -%}
{%- if message.role == "system" or message.role == "developer" -%}
{{- "<|start|>developer<|message|># Instructions\n\n" ~ message.content ~ "<|end|>" -}}
{%- elif message.role == "assistant" -%}
{{- "<|start|>assistant<|channel|>final<|message|>" ~ message.content ~ "<|end|>" -}}
{%- else -%}
{{- "<|start|>" ~ message.role ~ "<|message|>" ~ message.content ~ "<|end|>" -}}
{%- endif -%}
{%- endfor -%}
{%- if add_generation_prompt -%}
{{- "<|start|>assistant" -}}
{%- endif -%}
"##;

/// Special token entry: a bare string or an added-token object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TokenSpec {
    Plain(String),
    Added { content: String },
}

impl TokenSpec {
    fn content(&self) -> &str {
        match self {
            TokenSpec::Plain(s) => s,
            TokenSpec::Added { content } => content,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct NamedTemplate {
    name: String,
    template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TemplateSpec {
    Single(String),
    Named(Vec<NamedTemplate>),
}

/// Fields of `tokenizer_config.json` used for prompting and stopping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    chat_template: Option<TemplateSpec>,
    #[serde(default)]
    bos_token: Option<TokenSpec>,
    #[serde(default)]
    eos_token: Option<TokenSpec>,
}

impl TokenizerConfig {
    pub fn from_file(path: &Path) -> LlmResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LlmError::ModelNotFound {
            path: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> LlmResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| LlmError::load(format!("Invalid tokenizer config: {}", e)))
    }

    /// The chat template, preferring the one named "default" when several
    /// are listed.
    pub fn chat_template(&self) -> Option<&str> {
        match self.chat_template.as_ref()? {
            TemplateSpec::Single(template) => Some(template),
            TemplateSpec::Named(list) => list
                .iter()
                .find(|t| t.name == "default")
                .or_else(|| list.first())
                .map(|t| t.template.as_str()),
        }
    }

    pub fn bos_token(&self) -> Option<&str> {
        self.bos_token.as_ref().map(TokenSpec::content)
    }

    pub fn eos_token(&self) -> Option<&str> {
        self.eos_token.as_ref().map(TokenSpec::content)
    }
}

/// Where the active template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOrigin {
    /// Shipped with the model.
    Model,
    /// Built-in harmony template.
    Harmony,
}

/// Compiled chat template.
pub struct ChatTemplate {
    env: Environment<'static>,
    origin: TemplateOrigin,
    bos_token: String,
    eos_token: String,
}

impl std::fmt::Debug for ChatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTemplate")
            .field("origin", &self.origin)
            .field("bos_token", &self.bos_token)
            .field("eos_token", &self.eos_token)
            .finish_non_exhaustive()
    }
}

impl ChatTemplate {
    /// Compile a Jinja chat template.
    pub fn new(
        source: String,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
        origin: TemplateOrigin,
    ) -> LlmResult<Self> {
        let mut env = build_environment();
        env.add_template_owned(TEMPLATE_NAME, source)
            .map_err(|e| LlmError::Template {
                message: format!("Invalid template syntax: {}", e),
            })?;

        Ok(Self {
            env,
            origin,
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        })
    }

    /// The built-in harmony template.
    pub fn harmony() -> LlmResult<Self> {
        Self::new(HARMONY_TEMPLATE.to_string(), "", "", TemplateOrigin::Harmony)
    }

    /// Pick the model's template, falling back to harmony.
    ///
    /// Sources in order: `chat_template` in tokenizer_config.json, then a
    /// standalone `chat_template.jinja`. A template that fails to compile or
    /// to render a sample conversation is replaced by the built-in one.
    pub fn resolve(
        tokenizer_config: Option<&TokenizerConfig>,
        jinja_file: Option<&Path>,
    ) -> LlmResult<Self> {
        let bos = tokenizer_config.and_then(|c| c.bos_token()).unwrap_or("");
        let eos = tokenizer_config.and_then(|c| c.eos_token()).unwrap_or("");

        let model_source = match tokenizer_config.and_then(|c| c.chat_template()) {
            Some(template) => Some(template.to_string()),
            None => match jinja_file {
                Some(path) => match std::fs::read_to_string(path) {
                    Ok(template) => Some(template),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read chat template file");
                        None
                    }
                },
                None => None,
            },
        };

        let Some(source) = model_source else {
            info!("Model ships no chat template, using built-in harmony template");
            return Self::harmony();
        };

        let sample = ConversationRequest::with_default_system("ping").messages();
        match Self::new(source, bos, eos, TemplateOrigin::Model)
            .and_then(|template| template.render(&sample).map(|_| template))
        {
            Ok(template) => {
                info!("Using model chat template");
                Ok(template)
            }
            Err(e) => {
                warn!(error = %e, "Model chat template unusable, using built-in harmony template");
                Self::harmony()
            }
        }
    }

    pub fn origin(&self) -> TemplateOrigin {
        self.origin
    }

    /// Render `messages` with the assistant generation header appended.
    pub fn render(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| LlmError::Template {
                message: format!("Template error: {}", e),
            })?;

        template
            .render(context!(
                messages => messages,
                add_generation_prompt => true,
                bos_token => self.bos_token.as_str(),
                eos_token => self.eos_token.as_str()
            ))
            .map_err(|e| LlmError::Template {
                message: format!("Render error: {}", e),
            })
    }
}

fn build_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_recursion_limit(MAX_RECURSION_DEPTH);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_function("raise_exception", raise_exception);
    env.add_function("strftime_now", strftime_now);
    env
}

fn raise_exception(message: String) -> Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
}

fn strftime_now(format: String) -> String {
    let mut out = String::new();
    if write!(out, "{}", chrono::Local::now().format(&format)).is_err() {
        out.clear();
    }
    out
}
