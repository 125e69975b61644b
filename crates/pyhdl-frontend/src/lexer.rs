//! PyHDL lexer using Logos
//!
//! Tokenizes `.phd` source text. Logos handles the atoms; a second pass
//! reconstructs Python's line structure, emitting `Newline`, `Indent`, and
//! `Dedent` tokens from the column of each line's first token. Newlines
//! inside parentheses or brackets do not terminate the logical line.

use crate::ParseError;
use logos::Logos;

/// Token types for PyHDL
#[derive(Logos, Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    #[token("class")]
    Class,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("match")]
    Match,
    #[token("case")]
    Case,
    #[token("pass")]
    Pass,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,

    // Identifiers and literals
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Identifier(String),

    #[regex(r"0[bB][01_]+", |lex| parse_radix(lex.slice(), 2))]
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| parse_radix(lex.slice(), 16))]
    #[regex(r"[0-9][0-9_]*", |lex| lex.slice().replace('_', "").parse::<i64>().ok())]
    Int(i64),

    // Operators
    #[token("**")]
    DoubleStar,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&")]
    Ampersand,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,

    // Physical newline (kept by logos, folded by the structure pass)
    #[regex(r"\r?\n")]
    Newline,

    // Synthesized by the structure pass, never matched by logos
    Indent,
    Dedent,

    // Whitespace and comments are skipped
    #[regex(r"[ \t]+", logos::skip)]
    #[regex(r"#[^\n]*", logos::skip)]
    #[regex(r"\\\r?\n", logos::skip)]
    Skip,
}

/// Parse a prefixed integer literal (`0b…` / `0x…`) with underscore support
fn parse_radix(input: &str, radix: u32) -> Option<i64> {
    let digits = input[2..].replace('_', "");
    i64::from_str_radix(&digits, radix).ok()
}

/// Token with position information
#[derive(Debug, Clone)]
pub struct TokenWithPos {
    pub token: Token,
    pub span: std::ops::Range<usize>,
    pub line: usize,
}

/// Tokenize source text into a structured stream with layout tokens.
///
/// Indentation is measured in bytes from the start of the line, so tabs
/// count as one column; consistent indentation is the source's problem.
pub fn tokenize(source: &str) -> Result<Vec<TokenWithPos>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut raw: Vec<TokenWithPos> = Vec::new();
    let mut line = 1;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let token = result.map_err(|_| ParseError {
            line,
            message: format!("unexpected character `{}`", lexer.slice()),
        })?;
        let is_newline = token == Token::Newline;
        raw.push(TokenWithPos { token, span, line });
        if is_newline {
            line += 1;
        }
    }

    structure(raw)
}

/// Fold physical newlines into logical line structure
fn structure(raw: Vec<TokenWithPos>) -> Result<Vec<TokenWithPos>, ParseError> {
    let mut out: Vec<TokenWithPos> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut bracket_depth: usize = 0;
    let mut line_start: usize = 0;
    let mut line_has_tokens = false;

    for tok in raw {
        match tok.token {
            Token::Newline => {
                let end = tok.span.end;
                if bracket_depth == 0 {
                    if line_has_tokens {
                        out.push(tok);
                        line_has_tokens = false;
                    }
                    line_start = end;
                }
            }
            _ => {
                if bracket_depth == 0 && !line_has_tokens {
                    let col = tok.span.start - line_start;
                    adjust_indent(col, &mut indents, &mut out, &tok)?;
                }
                line_has_tokens = true;
                match tok.token {
                    Token::LParen | Token::LBracket => bracket_depth += 1,
                    Token::RParen | Token::RBracket => {
                        bracket_depth = bracket_depth.saturating_sub(1)
                    }
                    _ => {}
                }
                out.push(tok);
            }
        }
    }

    // Close the final logical line and any open blocks
    if line_has_tokens {
        let (span, line) = out
            .last()
            .map(|t| (t.span.end..t.span.end, t.line))
            .unwrap_or((0..0, 1));
        out.push(TokenWithPos {
            token: Token::Newline,
            span,
            line,
        });
    }
    while indents.len() > 1 {
        indents.pop();
        let (span, line) = out
            .last()
            .map(|t| (t.span.end..t.span.end, t.line))
            .unwrap_or((0..0, 1));
        out.push(TokenWithPos {
            token: Token::Dedent,
            span,
            line,
        });
    }

    Ok(out)
}

/// Emit `Indent`/`Dedent` tokens for a line starting at column `col`
fn adjust_indent(
    col: usize,
    indents: &mut Vec<usize>,
    out: &mut Vec<TokenWithPos>,
    at: &TokenWithPos,
) -> Result<(), ParseError> {
    let current = *indents.last().unwrap_or(&0);
    if col > current {
        indents.push(col);
        out.push(TokenWithPos {
            token: Token::Indent,
            span: at.span.start..at.span.start,
            line: at.line,
        });
    } else if col < current {
        while *indents.last().unwrap_or(&0) > col {
            indents.pop();
            out.push(TokenWithPos {
                token: Token::Dedent,
                span: at.span.start..at.span.start,
                line: at.line,
            });
        }
        if *indents.last().unwrap_or(&0) != col {
            return Err(ParseError {
                line: at.line,
                message: "unindent does not match any outer indentation level".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("class Counter"),
            vec![
                Token::Class,
                Token::Identifier("Counter".to_string()),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_int_literals() {
        assert_eq!(
            kinds("42 0xFF 0b1010 1_000"),
            vec![
                Token::Int(42),
                Token::Int(255),
                Token::Int(10),
                Token::Int(1000),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("<< >> <= == != ** ="),
            vec![
                Token::Shl,
                Token::Shr,
                Token::Le,
                Token::EqEq,
                Token::NotEq,
                Token::DoubleStar,
                Token::Assign,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("if a:\n    b = 1\nc = 2\n");
        assert_eq!(
            toks,
            vec![
                Token::If,
                Token::Identifier("a".to_string()),
                Token::Colon,
                Token::Newline,
                Token::Indent,
                Token::Identifier("b".to_string()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
                Token::Dedent,
                Token::Identifier("c".to_string()),
                Token::Assign,
                Token::Int(2),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_blank_lines_and_comments_skipped() {
        let toks = kinds("a = 1\n\n# comment only\n    \nb = 2\n");
        assert_eq!(
            toks,
            vec![
                Token::Identifier("a".to_string()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
                Token::Identifier("b".to_string()),
                Token::Assign,
                Token::Int(2),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_bracket_continuation() {
        let toks = kinds("x = In(\n    bit[8]\n)\n");
        assert!(!toks[..toks.len() - 1].contains(&Token::Newline));
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn test_nested_dedent_levels() {
        let toks = kinds("if a:\n    if b:\n        c = 1\nd = 2\n");
        let dedents = toks.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(dedents, 2);
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if a:\n        b = 1\n    c = 2\n").unwrap_err();
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn test_missing_trailing_newline() {
        let toks = kinds("a = 1");
        assert_eq!(toks.last(), Some(&Token::Newline));
    }
}
