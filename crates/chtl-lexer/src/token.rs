/// A position in source text, tracking line and column for error reporting.
///
/// `start` and `end` are character offsets into the scanned source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

/// Token classification for CHTL source.
///
/// Data-carrying variants embed their value directly; the original text of
/// every token is also kept in [`Token::lexeme`].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals (carry data)
    Identifier(String),
    String(String),
    /// Numeric literal including any unit suffix (`10px`, `1.5em`, `50%`).
    Number(String),
    /// Generator-visible `-- comment`.
    Comment(String),
    /// Verbatim body of a `script { }` or `[Origin]` block.
    RawBlock(String),

    // Block markers
    Template,      // [Template]
    Custom,        // [Custom]
    Import,        // [Import]
    Namespace,     // [Namespace]
    Configuration, // [Configuration]
    Origin,        // [Origin]

    // Type sigils
    AtStyle,
    AtElement,
    AtVar,
    /// Any other `@Word` (`@Html`, `@JavaScript`, `@Chtl`, `@CJmod`).
    AtType(String),

    // Keywords
    Style,
    Script,
    Text,
    Delete,
    Insert,
    Except,
    Inherit,

    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Semicolon,
    Colon,
    Equals,
    Comma,
    Dot,
    Hash,
    Ampersand,
    /// Operator characters that only matter inside values and selectors.
    Operator(char),

    /// Input the scanner could not classify. Never fatal to scanning.
    Unknown(String),

    // End of input
    Eof,
}

impl TokenKind {
    /// Identifier-like tokens: plain identifiers and keywords, which are
    /// ordinary words wherever a keyword is not expected.
    pub fn is_word(&self) -> bool {
        matches!(
            self,
            TokenKind::Identifier(_)
                | TokenKind::Style
                | TokenKind::Script
                | TokenKind::Text
                | TokenKind::Delete
                | TokenKind::Insert
                | TokenKind::Except
                | TokenKind::Inherit
        )
    }
}

/// A token produced by the CHTL lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    /// True when `self` ends exactly where `next` starts.
    pub fn touches(&self, next: &Token) -> bool {
        self.span.end == next.span.start
    }
}

/// HTML5 void elements (self-closing, no children).
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Check if a tag name is an HTML5 void element.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}
