//! CHTL Resolver
//!
//! Turns a parsed root unit into a fully concrete program: loads imports
//! through a [`Loader`], registers every `[Template]`/`[Custom]` definition
//! in the session's [`DefinitionTable`], expands `@Element`/`@Style` uses,
//! applies `delete`/`insert`/modify specializations, substitutes `@Var`
//! references and enforces `except` constraints.
//!
//! ```text
//! root path → CompilationSession::load_root → Program
//!           → CompilationSession::resolve   → resolved Program (markup only)
//! ```
//!
//! All state of one compilation lives in a [`CompilationSession`]; nothing is
//! shared between sessions.

pub mod constraint;
pub mod expand;
pub mod imports;
pub mod loader;
pub mod module;
pub mod plugin;
pub mod session;
pub mod specialize;
pub mod table;

pub use loader::{FsLoader, Loader, MemoryLoader, NotFound};
pub use plugin::{RuleProvider, StaticRules, SyntaxRule, SyntaxRules};
pub use session::CompilationSession;
pub use specialize::Fragment;
pub use table::{DefKey, DefinitionTable};

use chtl_parser::ParseError;

/// A position in a source unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Everything that can go wrong while compiling a CHTL document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error("Duplicate definition {name}: first defined at {first}, redefined at {second}")]
    DuplicateDefinition {
        name: String,
        first: Location,
        second: Location,
    },

    #[error("Cyclic import: {}", .chain.join(" -> "))]
    CyclicImport { chain: Vec<String> },

    #[error("Import not found: {path}")]
    ImportNotFound { path: String },

    #[error("Constraint violation: {subject} is excluded by 'except {constraint}'")]
    ConstraintViolation { subject: String, constraint: String },

    #[error("Unresolved reference: {reference}")]
    UnresolvedReference { reference: String },

    #[error("Recursive definition: {name} uses itself")]
    RecursiveDefinition { name: String },

    #[error("Plugin rule '{keyword}': {message}")]
    Plugin { keyword: String, message: String },

    #[error("'{operation}' matched nothing")]
    NoMatch { operation: String },

    #[error("Property '{property}' of {style} was never given a value")]
    UnfilledProperty { property: String, style: String },

    #[error("Configuration: {0}")]
    Configuration(String),
}

impl CompileError {
    /// Severity this error is reported with when it does not stop compilation.
    pub fn severity(&self) -> Severity {
        match self {
            CompileError::NoMatch { .. }
            | CompileError::UnfilledProperty { .. }
            | CompileError::Configuration(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A reported problem and the unit it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: CompileError,
    pub file: String,
}

impl Diagnostic {
    pub fn new(error: CompileError, file: impl Into<String>) -> Self {
        Self {
            severity: error.severity(),
            error,
            file: file.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.file, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_import_names_every_path() {
        let err = CompileError::CyclicImport {
            chain: vec!["a.chtl".into(), "b.chtl".into(), "a.chtl".into()],
        };
        assert_eq!(err.to_string(), "Cyclic import: a.chtl -> b.chtl -> a.chtl");
    }

    #[test]
    fn test_warning_severities() {
        let warning = Diagnostic::new(
            CompileError::NoMatch {
                operation: "delete p[3]".into(),
            },
            "main.chtl",
        );
        assert!(!warning.is_error());
        assert_eq!(
            warning.to_string(),
            "warning: main.chtl: 'delete p[3]' matched nothing"
        );

        let error = Diagnostic::new(
            CompileError::UnresolvedReference {
                reference: "@Element Card".into(),
            },
            "main.chtl",
        );
        assert!(error.is_error());
    }
}
