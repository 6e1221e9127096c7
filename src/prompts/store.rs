//! Named prompt templates with `{key}` parameter substitution. The templates
//! ship with the binary; the environment can repoint a `<prefix>_<type>`
//! slot at a different template name per process.

use std::collections::HashMap;

use thiserror::Error;

use crate::compression::types::CompressionLevel;

#[derive(Debug, Error)]
pub enum PromptStoreError {
    #[error("no prompt named {0}")]
    UnknownPrompt(String),
}

/// Which template family a symbol resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSymbolType {
    Function,
    Class,
    Key,
}

impl PromptSymbolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptSymbolType::Function => "function",
            PromptSymbolType::Class => "class",
            PromptSymbolType::Key => "key",
        }
    }
}

pub struct PromptStore {
    templates: HashMap<&'static str, &'static str>,
    /// `THAUM_PROMPT_<PREFIX>_<SYMBOLTYPE>` values captured at startup,
    /// keyed by the uppercased suffix.
    overrides: HashMap<String, String>,
}

impl PromptStore {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        let mut templates: HashMap<&'static str, &'static str> = HashMap::new();
        templates.insert(
            "optimize_function",
            include_str!("../../prompts/optimize_function.txt"),
        );
        templates.insert(
            "optimize_class",
            include_str!("../../prompts/optimize_class.txt"),
        );
        templates.insert("optimize_key", include_str!("../../prompts/optimize_key.txt"));
        templates.insert(
            "compress_function_v2",
            include_str!("../../prompts/compress_function_v2.txt"),
        );
        templates.insert(
            "compress_class",
            include_str!("../../prompts/compress_class.txt"),
        );
        templates.insert("compress_key", include_str!("../../prompts/compress_key.txt"));
        templates.insert(
            "golf_function",
            include_str!("../../prompts/golf_function.txt"),
        );
        templates.insert("golf_class", include_str!("../../prompts/golf_class.txt"));
        templates.insert("golf_key", include_str!("../../prompts/golf_key.txt"));
        templates.insert(
            "endgame_function",
            include_str!("../../prompts/endgame_function.txt"),
        );
        templates.insert(
            "endgame_class",
            include_str!("../../prompts/endgame_class.txt"),
        );
        templates.insert("endgame_key", include_str!("../../prompts/endgame_key.txt"));
        Self {
            templates,
            overrides,
        }
    }

    /// The prompt name for a compression level and symbol type, after the
    /// environment overrides have had their say. `compress` + `function`
    /// resolves to `compress_function_v2`, which is the one irregular slot.
    pub fn resolve_name(&self, level: CompressionLevel, symbol_type: PromptSymbolType) -> String {
        let override_key = format!(
            "{}_{}",
            level.prefix().to_uppercase(),
            symbol_type.as_str().to_uppercase()
        );
        if let Some(name) = self.overrides.get(&override_key) {
            return name.clone();
        }
        match (level, symbol_type) {
            (CompressionLevel::Compress, PromptSymbolType::Function) => {
                "compress_function_v2".to_owned()
            }
            (level, symbol_type) => format!("{}_{}", level.prefix(), symbol_type.as_str()),
        }
    }

    pub fn load(&self, name: &str) -> Result<&'static str, PromptStoreError> {
        self.templates
            .get(name)
            .copied()
            .ok_or_else(|| PromptStoreError::UnknownPrompt(name.to_owned()))
    }

    /// Textual substitution: every `{key}` present in `parameters` gets
    /// replaced, unknown placeholders stay in the text verbatim and missing
    /// parameters are not an error.
    pub fn format(
        &self,
        name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<String, PromptStoreError> {
        let template = self.load(name)?;
        let mut rendered = template.to_owned();
        for (key, value) in parameters {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Ok(rendered)
    }

    /// Content hash of the named template, recorded next to cache entries so
    /// the browser can tell which prompt generation produced an artifact.
    pub fn content_hash(&self, name: &str) -> Option<String> {
        self.templates
            .get(name)
            .map(|template| blake3::hash(template.as_bytes()).to_hex().to_string())
    }
}
