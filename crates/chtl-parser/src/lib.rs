//! CHTL Parser
//!
//! Parses a token stream into an arena-backed syntax tree: elements,
//! attributes, text, local and global style/script blocks, template and
//! custom definitions, specialization operators, imports, namespaces,
//! configuration and origin blocks.
//!
//! Parsing is error-tolerant. Every recoverable problem is collected in
//! [`ParseOutput::errors`] and parsing continues at the next statement; a
//! block left open at end of input is fatal.

pub mod ast;
pub mod config;
pub mod parser;

pub use ast::{Node, NodeId, NodeKind, Program};
pub use config::Configuration;
pub use parser::Parser;

use chtl_lexer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Recoverable: the offending statement was skipped.
    Syntax,
    /// A block or raw body runs to end of input.
    Unterminated,
}

/// Parser error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn syntax(message: String, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::Syntax,
            message,
            line: span.line,
            column: span.column,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ParseErrorKind::Unterminated
    }
}

/// The program plus every error met while building it.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub program: Program,
    pub errors: Vec<ParseError>,
}

impl ParseOutput {
    /// The error that stopped parsing, if any.
    pub fn fatal(&self) -> Option<&ParseError> {
        self.errors.iter().find(|e| e.is_fatal())
    }

    /// The program if parsing was clean.
    pub fn into_result(self) -> Result<Program, SyntaxErrors> {
        if self.errors.is_empty() {
            Ok(self.program)
        } else {
            Err(SyntaxErrors(self.errors))
        }
    }
}

/// All syntax errors of a source unit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", describe(.0))]
pub struct SyntaxErrors(pub Vec<ParseError>);

fn describe(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_source_into_result() {
        let program = Parser::parse("div { }").into_result().expect("clean parse");
        assert_eq!(program.items.len(), 1);
    }

    #[test]
    fn test_errors_into_result() {
        let err = Parser::parse("div { id: ; }\np { § }")
            .into_result()
            .expect_err("two errors");
        assert_eq!(err.0.len(), 2);
        assert_eq!(err.to_string().lines().count(), 2);
    }
}
