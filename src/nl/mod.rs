//! Natural language to SQL.
//!
//! - `generator`: language model clients
//! - `prompt`: bounded schema context and prompt text
//! - `translator`: generate, validate, retry once

pub mod generator;
pub mod prompt;
pub mod translator;

pub use generator::{GenerationRequest, OpenAiGenerator, OpenAiOptions, SqlGenerator};
pub use translator::{TranslationResult, Translator, strip_code_fences};
