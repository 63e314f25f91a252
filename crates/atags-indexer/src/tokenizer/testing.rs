//! Tokenizer fakes shared by unit tests.

use super::{Token, TokenKind, TokenizeError, Tokenizer, TokenizerBackend};
use std::path::Path;
use std::sync::Arc;

/// Splits on non-identifier characters; every word is a Name.
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "words"
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();
        let mut start = None;
        for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            let word_char = c.is_alphanumeric() || c == '_';
            match (start, word_char) {
                (None, true) => start = Some(i),
                (Some(s), false) => {
                    tokens.push(Token::new(s, TokenKind::Name, &text[s..i]));
                    start = None;
                }
                _ => {}
            }
        }
        Ok(tokens)
    }
}

pub struct FailingTokenizer;

impl Tokenizer for FailingTokenizer {
    fn name(&self) -> &str {
        "broken"
    }

    fn tokenize(&self, _text: &str) -> Result<Vec<Token>, TokenizeError> {
        Err(TokenizeError("lexer exploded".to_string()))
    }
}

pub struct PanickingTokenizer;

impl Tokenizer for PanickingTokenizer {
    fn name(&self) -> &str {
        "panics"
    }

    fn tokenize(&self, _text: &str) -> Result<Vec<Token>, TokenizeError> {
        panic!("tokenizer bug")
    }
}

/// `.w` files use [`WordTokenizer`], `.bad` files fail, `.boom` files panic.
pub struct FakeBackend;

impl TokenizerBackend for FakeBackend {
    fn by_name(&self, name: &str) -> Option<Arc<dyn Tokenizer>> {
        match name {
            "words" => Some(Arc::new(WordTokenizer)),
            "broken" => Some(Arc::new(FailingTokenizer)),
            "panics" => Some(Arc::new(PanickingTokenizer)),
            _ => None,
        }
    }

    fn for_filename(&self, path: &Path) -> Option<Arc<dyn Tokenizer>> {
        match path.extension()?.to_str()? {
            "w" => Some(Arc::new(WordTokenizer)),
            "bad" => Some(Arc::new(FailingTokenizer)),
            "boom" => Some(Arc::new(PanickingTokenizer)),
            _ => None,
        }
    }
}
