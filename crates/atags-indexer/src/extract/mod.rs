//! The two extraction strategies: tokenizer-driven references and
//! process-driven definitions.

pub mod definition;
pub mod reference;

pub use definition::{
    collect_definitions, extract_batch, BatchSummary, CtagsProcess, CtagsProvider,
    DefinitionProvider, DefinitionSource, LineProtocol, DEFAULT_CTAGS_FORMAT,
    DEFAULT_CTAGS_PROGRAM, TERMINATOR,
};
pub use reference::{
    decode_latin1, references_from_tokens, LineCursor, LineIndex, ReferenceExtractor,
    MIN_SYMBOL_LEN,
};
