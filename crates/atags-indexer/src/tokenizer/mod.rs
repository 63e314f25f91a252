//! Tokenizer capability consumed by reference extraction.
//!
//! A [`TokenizerBackend`] resolves a [`Tokenizer`] either by language name
//! or from a file name; a tokenizer turns text into a token stream whose
//! byte offsets never decrease. The bundled backend is built on tree-sitter
//! grammars, see [`SyntaxBackend`].

mod syntax;
#[cfg(test)]
pub(crate) mod testing;

pub use syntax::{SyntaxBackend, SyntaxTokenizer};

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Identifier-like names; the only kind reference extraction keeps
    Name,
    Keyword,
    Literal,
    Comment,
    Punctuation,
    Other,
}

/// One token of a tokenized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte offset of the token in the tokenized text
    pub offset: usize,
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(offset: usize, kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            text: text.into(),
        }
    }
}

/// Failure of a tokenizer on one input.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TokenizeError(pub String);

/// Turns text into tokens with non-decreasing offsets.
pub trait Tokenizer: Send + Sync {
    /// Name of the language this tokenizer handles.
    fn name(&self) -> &str;

    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError>;
}

/// Source of tokenizers.
pub trait TokenizerBackend: Send + Sync {
    /// Tokenizer registered under a (canonical, lower-case) language name.
    fn by_name(&self, name: &str) -> Option<Arc<dyn Tokenizer>>;

    /// Tokenizer guessed from the file name.
    fn for_filename(&self, path: &Path) -> Option<Arc<dyn Tokenizer>>;
}
