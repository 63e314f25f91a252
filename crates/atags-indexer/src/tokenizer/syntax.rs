//! Tokenizer backend built on tree-sitter grammars.

use super::{Token, TokenKind, TokenizeError, Tokenizer, TokenizerBackend};
use crate::scanner::{detect_language, Language};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Tokenizer for one tree-sitter grammar.
///
/// A fresh `tree_sitter::Parser` is created per call since parsers are not
/// `Sync`; the tokenizer itself can be shared across worker threads.
#[derive(Debug, Clone, Copy)]
pub struct SyntaxTokenizer {
    language: Language,
}

impl SyntaxTokenizer {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self.language {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

impl Tokenizer for SyntaxTokenizer {
    fn name(&self) -> &str {
        self.language.name()
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.grammar())
            .map_err(|e| TokenizeError(format!("Failed to set language: {}", e)))?;

        let tree = parser
            .parse(text, None)
            .ok_or_else(|| TokenizeError("Failed to parse content".to_string()))?;

        let tokens = collect_leaves(&tree, text);

        debug!(
            language = self.language.name(),
            tokens = tokens.len(),
            "Tokenized"
        );

        Ok(tokens)
    }
}

/// Emit every non-empty leaf of the syntax tree in document order.
fn collect_leaves(tree: &tree_sitter::Tree, text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut cursor = tree.walk();

    loop {
        let node = cursor.node();

        if node.child_count() > 0 && cursor.goto_first_child() {
            continue;
        }

        let (start, end) = (node.start_byte(), node.end_byte());
        if end > start {
            if let Some(slice) = text.get(start..end) {
                tokens.push(Token::new(start, classify(&node), slice));
            }
        }

        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return tokens;
            }
        }
    }
}

fn classify(node: &tree_sitter::Node) -> TokenKind {
    let kind = node.kind();

    if kind.contains("comment") {
        return TokenKind::Comment;
    }

    if !node.is_named() {
        return if kind.chars().all(|c| c.is_alphanumeric() || c == '_') {
            TokenKind::Keyword
        } else {
            TokenKind::Punctuation
        };
    }

    if kind.ends_with("identifier")
        || kind == "shorthand_property_identifier_pattern"
        || kind == "label_name"
    {
        return TokenKind::Name;
    }

    if kind.contains("string")
        || kind.contains("literal")
        || kind.contains("number")
        || matches!(kind, "integer" | "float" | "escape_sequence" | "char")
    {
        return TokenKind::Literal;
    }

    TokenKind::Other
}

/// Backend resolving the bundled tree-sitter tokenizers.
pub struct SyntaxBackend {
    tokenizers: HashMap<Language, Arc<dyn Tokenizer>>,
}

impl SyntaxBackend {
    pub fn new() -> Self {
        let tokenizers = [
            Language::Rust,
            Language::Go,
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Tsx,
        ]
        .into_iter()
        .map(|lang| (lang, Arc::new(SyntaxTokenizer::new(lang)) as Arc<dyn Tokenizer>))
        .collect();

        Self { tokenizers }
    }
}

impl Default for SyntaxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenizerBackend for SyntaxBackend {
    fn by_name(&self, name: &str) -> Option<Arc<dyn Tokenizer>> {
        let language = Language::from_name(name)?;
        self.tokenizers.get(&language).cloned()
    }

    fn for_filename(&self, path: &Path) -> Option<Arc<dyn Tokenizer>> {
        let language = detect_language(path)?;
        self.tokenizers.get(&language).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tokens: &[Token]) -> Vec<&str> {
        tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Name)
            .map(|t| t.text.as_str())
            .collect()
    }

    #[test]
    fn test_go_names() {
        let tokenizer = SyntaxTokenizer::new(Language::Go);
        let tokens = tokenizer
            .tokenize("package main\n\nfunc helper(count int) int {\n\treturn count\n}\n")
            .unwrap();

        let names = names(&tokens);
        assert!(names.contains(&"main"));
        assert!(names.contains(&"helper"));
        assert!(names.contains(&"count"));
        assert!(!names.contains(&"func"));
    }

    #[test]
    fn test_offsets_non_decreasing() {
        let tokenizer = SyntaxTokenizer::new(Language::Rust);
        let text = "fn main() {\n    let value = compute(1, \"two\");\n}\n";
        let tokens = tokenizer.tokenize(text).unwrap();

        assert!(!tokens.is_empty());
        assert!(tokens.windows(2).all(|w| w[0].offset <= w[1].offset));
        for token in &tokens {
            assert_eq!(&text[token.offset..token.offset + token.text.len()], token.text);
        }
    }

    #[test]
    fn test_comments_are_not_names() {
        let tokenizer = SyntaxTokenizer::new(Language::Python);
        let tokens = tokenizer
            .tokenize("# helper mentioned here\ndef helper():\n    pass\n")
            .unwrap();

        assert_eq!(names(&tokens), vec!["helper"]);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Comment));
    }

    #[test]
    fn test_backend_resolution() {
        let backend = SyntaxBackend::new();

        assert_eq!(backend.by_name("typescript").unwrap().name(), "typescript");
        assert!(backend.by_name("cobol").is_none());
        assert_eq!(
            backend.for_filename(Path::new("src/App.tsx")).unwrap().name(),
            "tsx"
        );
        assert!(backend.for_filename(Path::new("README.md")).is_none());
    }
}
