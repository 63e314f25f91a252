//! Language detection and the `--langmap` override table.

use crate::IndexerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Languages the bundled tokenizer backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Go,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
}

impl Language {
    /// Tokenizer name of this language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
        }
    }

    /// Look up a language by its tokenizer name.
    pub fn from_name(name: &str) -> Option<Language> {
        match name {
            "rust" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            _ => None,
        }
    }
}

/// Common language names whose tokenizer name differs.
///
/// Kept as data so a different backend only needs a different table.
pub const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("golang", "go"),
    ("rs", "rust"),
    ("py", "python"),
    ("python3", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("node", "javascript"),
    ("ecmascript", "javascript"),
    ("ts", "typescript"),
];

/// Lower-case a language name and map it through [`LANGUAGE_ALIASES`].
pub fn canonical_language_name(name: &str) -> String {
    let lower = name.to_lowercase();
    LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

/// Detect the language of a file based on its extension.
pub fn detect_language(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_lowercase();

    match ext.as_str() {
        "rs" => Some(Language::Rust),
        "go" => Some(Language::Go),
        "py" | "pyi" | "pyw" => Some(Language::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
        "ts" | "mts" | "cts" => Some(Language::TypeScript),
        "tsx" => Some(Language::Tsx),
        _ => None,
    }
}

/// Explicit extension to language-name table parsed from `--langmap`.
///
/// The format is a comma separated list of `language:ext.ext2` groups, e.g.
/// `Python:.py.pyw,Golang:.go`. Groups whose language starts with a
/// lower-case letter belong to the built-in parser path and are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageMap {
    by_extension: HashMap<String, String>,
}

impl LanguageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `--langmap` value.
    pub fn parse(langmap: &str) -> Result<Self, IndexerError> {
        let mut map = Self::new();

        for group in langmap.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            let (language, extensions) = group
                .split_once(':')
                .ok_or_else(|| IndexerError::LangMap(group.to_string()))?;

            let first = language
                .chars()
                .next()
                .ok_or_else(|| IndexerError::LangMap(group.to_string()))?;
            if first.is_lowercase() {
                continue;
            }

            for ext in extensions.split('.').filter(|e| !e.is_empty()) {
                map.by_extension
                    .insert(extension_key(ext), language.to_string());
            }
        }

        Ok(map)
    }

    /// Language name configured for the extension of `path`, if any.
    pub fn language_for(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        self.by_extension
            .get(&extension_key(ext))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

fn extension_key(ext: &str) -> String {
    if cfg!(windows) {
        format!(".{}", ext.to_lowercase())
    } else {
        format!(".{}", ext)
    }
}
