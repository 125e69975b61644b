//! PyHDL frontend
//!
//! Lexes and parses `.phd` sources — Python-syntax hardware descriptions —
//! into a Python-shaped AST. The compiler consumes the AST only; nothing
//! is ever executed.

pub mod ast;
pub mod lexer;
pub mod parser;

use thiserror::Error;

/// Error produced when source text fails to lex or parse
#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based source line of the failure
    pub line: usize,
    /// Human-readable description
    pub message: String,
}

/// Parse a complete PyHDL source text into an AST
pub fn parse_source(source: &str) -> Result<ast::SourceFile, ParseError> {
    let tokens = lexer::tokenize(source)?;
    parser::Parser::new(tokens).parse_source_file()
}
