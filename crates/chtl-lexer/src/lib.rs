//! CHTL Lexer
//!
//! Tokenizes `.chtl` source into a flat stream of tokens: element names,
//! block markers (`[Template]`, `[Custom]`, ...), type sigils (`@Style`,
//! `@Element`, `@Var`), string and bare literals, and raw `script`/`[Origin]`
//! bodies.
//!
//! Scanning never fails. Characters the scanner cannot classify become
//! [`TokenKind::Unknown`] tokens and the stream always ends with `Eof`.
//!
//! # Example
//!
//! ```
//! use chtl_lexer::Scanner;
//!
//! let tokens = Scanner::tokenize("");
//! assert_eq!(tokens.len(), 1); // Just EOF
//! ```

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{is_void_element, Span, Token, TokenKind};
