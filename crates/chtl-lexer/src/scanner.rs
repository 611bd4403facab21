use crate::token::{Span, Token, TokenKind};

/// Block markers recognised inside `[...]`.
const BLOCK_MARKERS: &[(&str, TokenKind)] = &[
    ("Template", TokenKind::Template),
    ("Custom", TokenKind::Custom),
    ("Import", TokenKind::Import),
    ("Namespace", TokenKind::Namespace),
    ("Configuration", TokenKind::Configuration),
    ("Origin", TokenKind::Origin),
];

/// CHTL source scanner.
///
/// Tokenizes `.chtl` source into a flat stream of tokens. Scanning never
/// fails: input that cannot be classified becomes a [`TokenKind::Unknown`]
/// token so the parser can report it with a precise position.
///
/// - `Vec<char>` source for index-based navigation
/// - Position tracking on every token
/// - Raw capture of `script { }` and `[Origin]` bodies
pub struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    /// Set after `script` or `[Origin]`: the next `{` opens a raw block.
    raw_pending: Option<RawMode>,
}

/// How a raw body finds its closing brace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawMode {
    /// `script` and `@JavaScript`: braces inside strings and comments
    /// don't count.
    Script,
    /// `@Html`, `@Style` and other origin types: only braces count, so
    /// prose apostrophes are plain text.
    Markup,
}

impl Scanner {
    /// Create a new scanner for the given source.
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            raw_pending: None,
        }
    }

    /// Tokenize the entire source. The result always ends with `Eof`.
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut scanner = Scanner::new(source);
        scanner.scan_tokens();
        tracing::debug!(tokens = scanner.tokens.len(), "tokenized source");
        scanner.tokens
    }

    fn scan_tokens(&mut self) {
        while !self.is_at_end() {
            self.scan_token();
        }

        let span = Span::new(self.pos, self.pos, self.line, self.column);
        self.tokens.push(Token::new(TokenKind::Eof, "", span));
    }

    fn scan_token(&mut self) {
        let ch = self.peek();

        match ch {
            ' ' | '\t' | '\r' => self.advance(),
            '\n' => self.newline(),

            // Comments
            '/' if self.peek_next() == '/' && !self.inside_url() => self.skip_line_comment(),
            '/' if self.peek_next() == '*' => self.skip_block_comment(),
            '-' if self.peek_next() == '-' && self.generator_comment_ahead() => {
                self.scan_generator_comment()
            }

            // Strings
            '"' | '\'' => self.scan_string(),

            // Raw bodies after `script` / `[Origin] @Type name`
            '{' if self.raw_pending.is_some() => self.scan_raw_block(),

            '[' => self.scan_bracket(),
            '@' => self.scan_at(),

            '0'..='9' => self.scan_number(),

            // Punctuation
            '{' => self.single(TokenKind::LBrace),
            '}' => {
                self.raw_pending = None;
                self.single(TokenKind::RBrace)
            }
            ']' => self.single(TokenKind::RBracket),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            ';' => {
                self.raw_pending = None;
                self.single(TokenKind::Semicolon)
            }
            ':' => self.single(TokenKind::Colon),
            '=' => self.single(TokenKind::Equals),
            ',' => self.single(TokenKind::Comma),
            '.' => self.single(TokenKind::Dot),
            '#' => self.single(TokenKind::Hash),
            '&' => self.single(TokenKind::Ampersand),
            '+' | '-' | '*' | '/' | '%' | '<' | '>' | '!' | '?' | '|' | '~' | '^' | '$' => {
                self.single(TokenKind::Operator(ch))
            }

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            _ => {
                let start = self.mark();
                self.advance();
                self.push(TokenKind::Unknown(ch.to_string()), start);
            }
        }
    }

    // --- Comments ---

    /// True inside an unquoted `url(`, where `//` belongs to the address.
    fn inside_url(&self) -> bool {
        let mut tokens = self.tokens.iter().rev();
        for token in tokens.by_ref() {
            match token.kind {
                TokenKind::LParen => break,
                TokenKind::RParen
                | TokenKind::Semicolon
                | TokenKind::LBrace
                | TokenKind::RBrace => return false,
                _ => {}
            }
        }
        matches!(
            tokens.next(),
            Some(Token { kind: TokenKind::Identifier(name), .. }) if name.eq_ignore_ascii_case("url")
        )
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) {
        self.advance();
        self.advance();
        while !self.is_at_end() && !(self.peek() == '*' && self.peek_next() == '/') {
            if self.peek() == '\n' {
                self.newline();
            } else {
                self.advance();
            }
        }
        // closing `*/`, if any
        self.advance();
        self.advance();
    }

    /// `--` starts a generator comment only when followed by whitespace or end
    /// of line; `--name` stays available for CSS custom properties.
    fn generator_comment_ahead(&self) -> bool {
        let after = self.chars.get(self.pos + 2).copied().unwrap_or('\n');
        after.is_whitespace()
    }

    fn scan_generator_comment(&mut self) {
        let start = self.mark();
        self.advance();
        self.advance();

        let mut content = String::new();
        while !self.is_at_end() && self.peek() != '\n' {
            content.push(self.peek());
            self.advance();
        }

        self.push(TokenKind::Comment(content.trim().to_string()), start);
    }

    // --- Literals ---

    /// Scan a quoted string. An unterminated string becomes `Unknown`,
    /// covering the rest of the line.
    fn scan_string(&mut self) {
        let quote = self.peek();
        let start = self.mark();
        self.advance();

        let mut value = String::new();

        while !self.is_at_end() && self.peek() != quote && self.peek() != '\n' {
            if self.peek() == '\\' {
                self.advance();
                if self.is_at_end() {
                    break;
                }
                match self.peek() {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    c if c == quote => value.push(c),
                    c => {
                        value.push('\\');
                        value.push(c);
                    }
                }
                self.advance();
            } else {
                value.push(self.peek());
                self.advance();
            }
        }

        if self.peek() != quote || self.is_at_end() {
            let text = self.text_from(start.0);
            self.push(TokenKind::Unknown(text), start);
            return;
        }

        self.advance(); // closing quote
        self.push(TokenKind::String(value), start);
    }

    /// Scan a number with an optional unit suffix.
    fn scan_number(&mut self) {
        let start = self.mark();

        while !self.is_at_end()
            && (self.peek().is_ascii_digit()
                || (self.peek() == '.' && self.peek_next().is_ascii_digit()))
        {
            self.advance();
        }
        while !self.is_at_end() && (self.peek().is_alphabetic() || self.peek() == '%') {
            self.advance();
        }

        let text = self.text_from(start.0);
        self.push(TokenKind::Number(text), start);
    }

    /// Scan an identifier or keyword. Hyphens are allowed when followed by an
    /// alphanumeric character (`font-size`, `data-id`).
    fn scan_identifier(&mut self) {
        let start = self.mark();

        while !self.is_at_end()
            && (self.peek().is_alphanumeric()
                || self.peek() == '_'
                || (self.peek() == '-' && self.peek_next().is_alphanumeric()))
        {
            self.advance();
        }

        let ident = self.text_from(start.0);
        let kind = Self::keyword_or_ident(ident);
        if kind == TokenKind::Script {
            self.raw_pending = Some(RawMode::Script);
        }
        self.push(kind, start);
    }

    /// `[Template]`-style block markers, or a plain `[`.
    fn scan_bracket(&mut self) {
        let start = self.mark();

        let word: String = self.chars[self.pos + 1..]
            .iter()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        let closes = self.chars.get(self.pos + 1 + word.len()) == Some(&']');

        let marker = BLOCK_MARKERS
            .iter()
            .find(|(name, _)| closes && *name == word)
            .map(|(_, kind)| kind.clone());

        match marker {
            Some(kind) => {
                for _ in 0..word.len() + 2 {
                    self.advance();
                }
                if kind == TokenKind::Origin {
                    self.raw_pending = Some(RawMode::Markup);
                }
                self.push(kind, start);
            }
            None => {
                self.advance();
                self.push(TokenKind::LBracket, start);
            }
        }
    }

    /// `@Style`, `@Element`, `@Var` or any other `@Word`.
    fn scan_at(&mut self) {
        let start = self.mark();
        self.advance();

        let mut word = String::new();
        while !self.is_at_end() && self.peek().is_alphanumeric() {
            word.push(self.peek());
            self.advance();
        }

        let kind = match word.as_str() {
            "" => TokenKind::Unknown("@".into()),
            "Style" => TokenKind::AtStyle,
            "Element" => TokenKind::AtElement,
            "Var" => TokenKind::AtVar,
            _ => TokenKind::AtType(word.clone()),
        };
        if word == "JavaScript" && self.raw_pending.is_some() {
            self.raw_pending = Some(RawMode::Script);
        }
        self.push(kind, start);
    }

    /// Capture a balanced `{ ... }` body verbatim. In script bodies, strings
    /// and comments may contain braces. An unterminated body becomes `Unknown`.
    fn scan_raw_block(&mut self) {
        let script = self.raw_pending.take() == Some(RawMode::Script);
        let start = self.mark();
        self.advance(); // `{`

        let body_start = self.pos;
        let mut depth = 1;

        while !self.is_at_end() {
            match self.peek() {
                '{' => {
                    depth += 1;
                    self.advance();
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    self.advance();
                }
                '"' | '\'' | '`' if script => self.skip_quoted(),
                '/' if script && self.peek_next() == '/' => self.skip_line_comment(),
                '/' if script && self.peek_next() == '*' => self.skip_block_comment(),
                '\n' => self.newline(),
                _ => self.advance(),
            }
        }

        if depth > 0 {
            let text = self.text_from(start.0);
            self.push(TokenKind::Unknown(text), start);
            return;
        }

        let body: String = self.chars[body_start..self.pos].iter().collect();
        self.advance(); // `}`
        self.push(TokenKind::RawBlock(trim_block(&body)), start);
    }

    fn skip_quoted(&mut self) {
        let quote = self.peek();
        self.advance();
        while !self.is_at_end() && self.peek() != quote {
            if self.peek() == '\\' {
                self.advance();
            }
            if self.peek() == '\n' {
                self.newline();
            } else {
                self.advance();
            }
        }
        self.advance();
    }

    // --- Keyword detection ---

    fn keyword_or_ident(ident: String) -> TokenKind {
        match ident.as_str() {
            "style" => TokenKind::Style,
            "script" => TokenKind::Script,
            "text" => TokenKind::Text,
            "delete" => TokenKind::Delete,
            "insert" => TokenKind::Insert,
            "except" => TokenKind::Except,
            "inherit" => TokenKind::Inherit,
            _ => TokenKind::Identifier(ident),
        }
    }

    // --- Helpers ---

    fn single(&mut self, kind: TokenKind) {
        let start = self.mark();
        self.advance();
        self.push(kind, start);
    }

    /// Start position of a token: (offset, line, column).
    fn mark(&self) -> (usize, usize, usize) {
        (self.pos, self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, (start, line, column): (usize, usize, usize)) {
        let lexeme = self.text_from(start);
        let span = Span::new(start, self.pos, line, column);
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn text_from(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.column = 1;
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.pos]
        }
    }

    fn peek_next(&self) -> char {
        if self.pos + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.pos + 1]
        }
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
            self.column += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

/// Strip the blank first/last lines and the common indentation of a raw body.
fn trim_block(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());

    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let lines = &lines[first..=last];

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| {
            if l.len() >= indent && l.is_char_boundary(indent) {
                l[indent..].trim_end()
            } else {
                l.trim()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
