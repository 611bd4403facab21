//! Document parser for CHTL.
//!
//! Parses the flat token stream from `chtl-lexer` into an arena-backed
//! [`Program`]. Recursive descent with error recovery: a problem inside a
//! statement is recorded and the parser skips to the next statement boundary,
//! so one pass reports every recoverable error. Only a block left open at end
//! of input is fatal.

use crate::ast::{
    Attribute, ConfigBlock, Constraint, DefKind, Definition, DefinitionBody, Element, Import,
    ImportKind, Insert, InsertPosition, Modify, Namespace, Node, NodeId, NodeKind, Origin,
    OriginKind, Program, Property, Reference, Scope, ScriptBlock, StyleBlock, StyleItem,
    StyleRule, StyleUse, Subtype, Target, Text, Use, INVALID_INDEX,
};
use crate::{ParseError, ParseErrorKind, ParseOutput};
use chtl_lexer::{Scanner, Span, Token, TokenKind};
use la_arena::Arena;

type PResult<T> = Result<T, ParseError>;

/// The kind of `{ }` body being parsed, which decides what may appear in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyContext {
    Element,
    Definition,
    UseBody,
    Insert,
    Modify,
}

impl BodyContext {
    fn allows_attributes(self) -> bool {
        matches!(self, BodyContext::Element | BodyContext::Modify)
    }

    fn allows_blocks(self) -> bool {
        matches!(self, BodyContext::Element | BodyContext::Modify)
    }

    fn allows_operators(self) -> bool {
        matches!(self, BodyContext::Definition | BodyContext::UseBody)
    }

    fn allows_content(self) -> bool {
        !matches!(self, BodyContext::UseBody)
    }

    fn allows_except(self) -> bool {
        matches!(
            self,
            BodyContext::Element | BodyContext::Definition | BodyContext::Modify
        )
    }

    fn describe(self) -> &'static str {
        match self {
            BodyContext::Element => "an element body",
            BodyContext::Definition => "an element definition",
            BodyContext::UseBody => "a specialization body",
            BodyContext::Insert => "inserted content",
            BodyContext::Modify => "a modification body",
        }
    }
}

/// CHTL document parser.
///
/// Converts a flat token stream into a [`Program`] using recursive descent.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    arena: Arena<Node>,
    errors: Vec<ParseError>,
    fatal_reported: bool,
}

impl Parser {
    /// Create a new parser for the given tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            arena: Arena::new(),
            errors: Vec::new(),
            fatal_reported: false,
        }
    }

    /// Tokenize and parse source code.
    pub fn parse(source: &str) -> ParseOutput {
        let tokens = Scanner::tokenize(source);
        Parser::new(tokens).parse_program()
    }

    /// Parse the whole token stream into a program.
    pub fn parse_program(mut self) -> ParseOutput {
        let mut items = Vec::new();

        while !self.is_at_end() {
            match self.parse_top_item() {
                Ok(Some(id)) => items.push(id),
                Ok(None) => {}
                Err(e) => self.recover(e),
            }
        }

        tracing::debug!(
            nodes = self.arena.len(),
            errors = self.errors.len(),
            "parsed program"
        );

        ParseOutput {
            program: Program {
                arena: self.arena,
                items,
            },
            errors: self.errors,
        }
    }

    // =========================================================================
    // Top-level items
    // =========================================================================

    fn parse_top_item(&mut self) -> PResult<Option<NodeId>> {
        match &self.peek().kind {
            TokenKind::Template | TokenKind::Custom => self.parse_definition().map(Some),
            TokenKind::Import => self.parse_import().map(Some),
            TokenKind::Namespace => self.parse_namespace().map(Some),
            TokenKind::Configuration => self.parse_configuration().map(Some),
            TokenKind::Origin => self.parse_origin().map(Some),
            TokenKind::Style => self.parse_style_block(Scope::Global).map(Some),
            TokenKind::Script => self.parse_script_block(Scope::Global).map(Some),
            TokenKind::Text => self.parse_text().map(Some),
            TokenKind::Comment(_) => Ok(Some(self.parse_comment())),
            TokenKind::AtElement | TokenKind::Inherit => self.parse_use().map(Some),
            TokenKind::Identifier(_) => self.parse_element().map(Some),
            TokenKind::Semicolon => {
                self.advance();
                Ok(None)
            }
            TokenKind::RBrace => {
                let err = self.error("Unexpected '}'".into());
                self.advance();
                Err(err)
            }
            _ => Err(self.unexpected("an element or a declaration")),
        }
    }

    /// `[Namespace] name { items }`
    fn parse_namespace(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();
        let name = self.expect_name("namespace name")?;
        let open = self.expect_open("namespace name")?;

        let mut items = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match self.parse_top_item() {
                Ok(Some(id)) => items.push(id),
                Ok(None) => {}
                Err(e) => self.recover(e),
            }
        }
        self.expect_close(open, "namespace")?;

        Ok(self.alloc(NodeKind::Namespace(Namespace { name, items }), span))
    }

    /// `[Configuration] [name] { KEY = value; ... }`
    fn parse_configuration(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();
        let name = if self.peek().kind.is_word() {
            Some(self.expect_name("configuration name")?)
        } else {
            None
        };
        let open = self.expect_open("[Configuration]")?;
        let items = self.parse_style_items(open, false)?;
        let entries = self.properties_only(items, "configuration blocks");

        Ok(self.alloc(
            NodeKind::Configuration(ConfigBlock { name, entries }),
            span,
        ))
    }

    /// `[Import] <kind> from <path> [as <alias>];`
    fn parse_import(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();

        let kind = match self.peek().kind.clone() {
            TokenKind::AtType(t) if t == "Chtl" => {
                self.advance();
                ImportKind::Chtl
            }
            TokenKind::AtType(t) if t == "CJmod" => {
                self.advance();
                ImportKind::CJmod
            }
            TokenKind::AtType(t) if t == "Html" => {
                self.advance();
                ImportKind::Resource(OriginKind::Html)
            }
            TokenKind::AtType(t) if t == "JavaScript" => {
                self.advance();
                ImportKind::Resource(OriginKind::JavaScript)
            }
            TokenKind::AtStyle => {
                self.advance();
                ImportKind::Resource(OriginKind::Style)
            }
            TokenKind::Template | TokenKind::Custom => {
                let kind = self.parse_def_kind();
                let subtype = self.expect_subtype()?;
                let name = self.expect_name("definition name")?;
                ImportKind::Definition {
                    kind,
                    subtype,
                    name,
                }
            }
            _ => return Err(self.unexpected("an import type such as @Chtl")),
        };

        if !self.check_word("from") {
            return Err(self.unexpected("'from'"));
        }
        self.advance();

        let path = match self.peek().kind.clone() {
            TokenKind::String(path) => {
                self.advance();
                path
            }
            _ => {
                let start = self.pos;
                while !self.is_at_end()
                    && !self.check(&TokenKind::Semicolon)
                    && !self.check_word("as")
                {
                    self.advance();
                }
                let path = reconstruct(&self.tokens[start..self.pos]);
                if path.is_empty() {
                    return Err(self.error("Expected import path".into()));
                }
                path
            }
        };

        let alias = if self.check_word("as") {
            self.advance();
            Some(self.expect_name("import alias")?)
        } else {
            None
        };
        self.end_statement();

        Ok(self.alloc(NodeKind::Import(Import { kind, path, alias }), span))
    }

    /// `[Origin] @Type [name] { raw }` or `[Origin] @Type name;`
    fn parse_origin(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();

        let kind = match self.peek().kind.clone() {
            TokenKind::AtStyle => OriginKind::Style,
            TokenKind::AtType(t) => match t.as_str() {
                "Html" => OriginKind::Html,
                "JavaScript" => OriginKind::JavaScript,
                _ => OriginKind::Other(t),
            },
            _ => return Err(self.unexpected("an origin type such as @Html")),
        };
        self.advance();

        let name = if self.peek().kind.is_word() {
            Some(self.expect_name("origin name")?)
        } else {
            None
        };

        let content = match self.peek().kind.clone() {
            TokenKind::RawBlock(content) => {
                self.advance();
                Some(content)
            }
            TokenKind::Semicolon if name.is_some() => {
                self.advance();
                None
            }
            TokenKind::Unknown(text) if text.starts_with('{') => {
                return Err(self.unterminated_raw("[Origin] block"));
            }
            _ => return Err(self.unexpected("an origin body")),
        };

        Ok(self.alloc(
            NodeKind::Origin(Origin {
                kind,
                name,
                content,
            }),
            span,
        ))
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// `[Template] @Style Name { ... }` and friends.
    fn parse_definition(&mut self) -> PResult<NodeId> {
        let span = self.peek().span;
        let kind = self.parse_def_kind();
        let subtype = self.expect_subtype()?;
        let name = self.expect_name("definition name")?;
        let open = self.expect_open("definition name")?;

        let body = match subtype {
            Subtype::Style => {
                let items = self.parse_style_items(open, false)?;
                if kind == DefKind::Template && has_valueless(&items) {
                    self.errors.push(ParseError::syntax(
                        format!("Valueless properties are only allowed in [Custom] @Style, found in '{name}'"),
                        span,
                    ));
                }
                DefinitionBody::Style(items)
            }
            Subtype::Element => {
                let (_, children) = self.parse_body(BodyContext::Definition, open)?;
                DefinitionBody::Element(children)
            }
            Subtype::Var => {
                let items = self.parse_style_items(open, false)?;
                DefinitionBody::Var(self.properties_only(items, "@Var definitions"))
            }
        };

        tracing::debug!(%kind, %subtype, name = %name, "parsed definition");

        Ok(self.alloc(
            NodeKind::Definition(Definition {
                kind,
                subtype,
                name,
                body,
            }),
            span,
        ))
    }

    fn parse_def_kind(&mut self) -> DefKind {
        let kind = if self.check(&TokenKind::Custom) {
            DefKind::Custom
        } else {
            DefKind::Template
        };
        self.advance();
        kind
    }

    fn expect_subtype(&mut self) -> PResult<Subtype> {
        let subtype = match self.peek().kind {
            TokenKind::AtStyle => Subtype::Style,
            TokenKind::AtElement => Subtype::Element,
            TokenKind::AtVar => Subtype::Var,
            _ => return Err(self.unexpected("@Style, @Element or @Var")),
        };
        self.advance();
        Ok(subtype)
    }

    /// Keep only valued properties, reporting anything else.
    fn properties_only(&mut self, items: Vec<StyleItem>, context: &str) -> Vec<Property> {
        let span = self.peek().span;
        let mut properties = Vec::new();
        for item in items {
            match item {
                StyleItem::Property(p) if p.value.is_some() => properties.push(p),
                StyleItem::Property(p) => self.errors.push(ParseError::syntax(
                    format!("'{}' needs a value in {context}", p.name),
                    span,
                )),
                _ => self.errors.push(ParseError::syntax(
                    format!("Only 'key: value;' entries are allowed in {context}"),
                    span,
                )),
            }
        }
        properties
    }

    // =========================================================================
    // Elements and bodies
    // =========================================================================

    /// `tag { body }` or `tag;`
    fn parse_element(&mut self) -> PResult<NodeId> {
        let span = self.peek().span;
        let tag = self.expect_name("element name")?;

        let (attributes, children) = if self.check(&TokenKind::Semicolon) {
            self.advance();
            (Vec::new(), Vec::new())
        } else {
            let open = self.expect_open(&format!("element '{tag}'"))?;
            self.parse_body(BodyContext::Element, open)?
        };

        Ok(self.alloc(
            NodeKind::Element(Element {
                tag,
                attributes,
                children,
            }),
            span,
        ))
    }

    /// Parse a `{ }` body whose opening brace has been consumed, up to and
    /// including the closing brace.
    fn parse_body(
        &mut self,
        ctx: BodyContext,
        open: Span,
    ) -> PResult<(Vec<Attribute>, Vec<NodeId>)> {
        let mut attributes = Vec::new();
        let mut children = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match self.parse_body_item(ctx, &mut attributes) {
                Ok(Some(id)) => children.push(id),
                Ok(None) => {}
                Err(e) => self.recover(e),
            }
        }
        self.expect_close(open, ctx.describe())?;

        Ok((attributes, children))
    }

    fn parse_body_item(
        &mut self,
        ctx: BodyContext,
        attributes: &mut Vec<Attribute>,
    ) -> PResult<Option<NodeId>> {
        let next = &self.peek_at(1).kind;
        let assigns = matches!(next, TokenKind::Colon | TokenKind::Equals);

        match self.peek().kind.clone() {
            TokenKind::Identifier(_) | TokenKind::Style if assigns => {
                if !ctx.allows_attributes() {
                    return Err(self.not_allowed("Attributes", ctx));
                }
                attributes.push(self.parse_attribute()?);
                Ok(None)
            }
            TokenKind::Identifier(_) if ctx == BodyContext::UseBody => {
                self.parse_modify().map(Some)
            }
            TokenKind::Identifier(_) => {
                if !ctx.allows_content() {
                    return Err(self.not_allowed("Elements", ctx));
                }
                self.parse_element().map(Some)
            }
            TokenKind::Text => {
                if !ctx.allows_content() {
                    return Err(self.not_allowed("Text", ctx));
                }
                self.parse_text().map(Some)
            }
            TokenKind::Style => {
                if !ctx.allows_blocks() {
                    return Err(self.not_allowed("Style blocks", ctx));
                }
                self.parse_style_block(Scope::Local).map(Some)
            }
            TokenKind::Script => {
                if !ctx.allows_blocks() {
                    return Err(self.not_allowed("Script blocks", ctx));
                }
                self.parse_script_block(Scope::Local).map(Some)
            }
            TokenKind::AtElement | TokenKind::Inherit => {
                if !ctx.allows_content() {
                    return Err(self.not_allowed("Template uses", ctx));
                }
                self.parse_use().map(Some)
            }
            TokenKind::AtStyle | TokenKind::AtVar => {
                Err(self.unexpected("@Element (style templates belong in style { })"))
            }
            TokenKind::Delete => {
                if !ctx.allows_operators() {
                    return Err(self.not_allowed("'delete'", ctx));
                }
                self.parse_delete().map(Some)
            }
            TokenKind::Insert => {
                if !ctx.allows_operators() {
                    return Err(self.not_allowed("'insert'", ctx));
                }
                self.parse_insert().map(Some)
            }
            TokenKind::Except => {
                if !ctx.allows_except() {
                    return Err(self.not_allowed("'except'", ctx));
                }
                self.parse_except().map(Some)
            }
            TokenKind::Origin => {
                if !ctx.allows_content() {
                    return Err(self.not_allowed("[Origin] blocks", ctx));
                }
                self.parse_origin().map(Some)
            }
            TokenKind::Comment(_) => Ok(Some(self.parse_comment())),
            TokenKind::Semicolon => {
                self.advance();
                Ok(None)
            }
            TokenKind::Template
            | TokenKind::Custom
            | TokenKind::Import
            | TokenKind::Namespace
            | TokenKind::Configuration => {
                let err = self.error(format!(
                    "'{}' is only allowed at top level or inside [Namespace]",
                    self.peek().lexeme
                ));
                self.advance();
                Err(err)
            }
            _ => Err(self.unexpected("an attribute, element or block")),
        }
    }

    /// `name: value;` or `name = value;`
    fn parse_attribute(&mut self) -> PResult<Attribute> {
        let name = self.peek().lexeme.clone();
        self.advance(); // name
        self.advance(); // `:` or `=`
        let value = self.parse_value(&name)?;
        Ok(Attribute { name, value })
    }

    /// `text { "..." }` or `text: "...";`
    fn parse_text(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();

        let content = match self.peek().kind {
            TokenKind::Colon | TokenKind::Equals => {
                self.advance();
                self.parse_value("text")?
            }
            TokenKind::LBrace => {
                let open = self.advance_span();
                let start = self.pos;
                while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
                    if let TokenKind::Unknown(t) = &self.peek().kind {
                        let err = self.error(format!("Unrecognized input '{t}' in text"));
                        self.errors.push(err);
                    }
                    self.advance();
                }
                let content = reconstruct_text(&self.tokens[start..self.pos]);
                self.expect_close(open, "text block")?;
                content
            }
            _ => return Err(self.unexpected("'{' or ':' after text")),
        };

        Ok(self.alloc(
            NodeKind::Text(Text {
                content,
                raw: false,
            }),
            span,
        ))
    }

    fn parse_comment(&mut self) -> NodeId {
        let token = self.peek().clone();
        self.advance();
        let text = match token.kind {
            TokenKind::Comment(text) => text,
            _ => token.lexeme,
        };
        self.alloc(NodeKind::Comment(text), token.span)
    }

    fn parse_script_block(&mut self, scope: Scope) -> PResult<NodeId> {
        let span = self.advance_span();

        match self.peek().kind.clone() {
            TokenKind::RawBlock(content) => {
                self.advance();
                Ok(self.alloc(NodeKind::Script(ScriptBlock { scope, content }), span))
            }
            TokenKind::Unknown(text) if text.starts_with('{') => {
                Err(self.unterminated_raw("script block"))
            }
            _ => Err(self.unexpected("'{' after script")),
        }
    }

    // =========================================================================
    // Style blocks
    // =========================================================================

    fn parse_style_block(&mut self, scope: Scope) -> PResult<NodeId> {
        let span = self.advance_span();
        let open = self.expect_open("style")?;
        let items = self.parse_style_items(open, true)?;
        Ok(self.alloc(NodeKind::Style(StyleBlock { scope, items }), span))
    }

    /// Parse style items up to and including the closing brace.
    fn parse_style_items(&mut self, open: Span, allow_rules: bool) -> PResult<Vec<StyleItem>> {
        let mut items = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match self.parse_style_item(allow_rules) {
                Ok(parsed) => items.extend(parsed),
                Err(e) => self.recover(e),
            }
        }
        self.expect_close(open, "style block")?;

        Ok(items)
    }

    fn parse_style_item(&mut self, allow_rules: bool) -> PResult<Vec<StyleItem>> {
        match self.peek().kind {
            TokenKind::AtStyle => Ok(vec![StyleItem::Use(self.parse_style_use(false)?)]),
            TokenKind::Inherit => {
                self.advance();
                if !self.check(&TokenKind::AtStyle) {
                    return Err(self.unexpected("@Style after inherit"));
                }
                Ok(vec![StyleItem::Use(self.parse_style_use(true)?)])
            }
            TokenKind::Delete => {
                self.advance();
                let names = self.parse_name_list("property name")?;
                self.end_statement();
                Ok(vec![StyleItem::Delete(names)])
            }
            TokenKind::Comment(_) | TokenKind::Semicolon => {
                self.advance();
                Ok(Vec::new())
            }
            _ => self.parse_property_or_rule(allow_rules),
        }
    }

    /// Gather tokens up to `;`, `{` or `}`: a `{` makes a rule, anything else a
    /// property (or a list of valueless properties).
    fn parse_property_or_rule(&mut self, allow_rules: bool) -> PResult<Vec<StyleItem>> {
        let start = self.pos;
        let mut depth = 0usize;

        loop {
            match &self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon | TokenKind::RBrace | TokenKind::LBrace if depth == 0 => {
                    break
                }
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
                TokenKind::Unknown(t) => {
                    return Err(self.error(format!("Unrecognized input '{t}' in style block")))
                }
                _ => {}
            }
            self.advance();
        }

        let tokens = self.tokens[start..self.pos].to_vec();

        if self.check(&TokenKind::LBrace) {
            let selector = reconstruct(&tokens);
            if !allow_rules {
                return Err(self.error(format!("Selector rule '{selector}' is not allowed here")));
            }
            if selector.is_empty() {
                return Err(self.error("Expected a selector before '{'".into()));
            }
            let open = self.advance_span();
            let items = self.parse_style_items(open, false)?;
            return Ok(vec![StyleItem::Rule(StyleRule { selector, items })]);
        }

        self.end_statement();

        let split = tokens
            .iter()
            .position(|t| matches!(t.kind, TokenKind::Colon | TokenKind::Equals));

        match split {
            Some(i) => {
                let name = reconstruct(&tokens[..i]);
                if name.is_empty() {
                    return Err(ParseError::syntax("Expected property name".into(), tokens[i].span));
                }
                let value_tokens = &tokens[i + 1..];
                if value_tokens.is_empty() {
                    return Err(ParseError::syntax(
                        format!("Expected value for '{name}'"),
                        tokens[i].span,
                    ));
                }
                Ok(vec![StyleItem::Property(Property {
                    name,
                    value: Some(value_text(value_tokens)),
                })])
            }
            None => Ok(tokens
                .split(|t| t.kind == TokenKind::Comma)
                .map(reconstruct)
                .filter(|name| !name.is_empty())
                .map(|name| StyleItem::Property(Property { name, value: None }))
                .collect()),
        }
    }

    /// `@Style Name [from ns] (; | { overrides })`
    fn parse_style_use(&mut self, inherit: bool) -> PResult<StyleUse> {
        let span = self.advance_span();
        let reference = self.parse_reference_tail(Subtype::Style, span)?;

        let items = if self.check(&TokenKind::LBrace) {
            let open = self.advance_span();
            self.parse_style_items(open, false)?
        } else {
            self.end_statement();
            Vec::new()
        };

        Ok(StyleUse {
            reference,
            items,
            inherit,
        })
    }

    // =========================================================================
    // Uses and specialization operators
    // =========================================================================

    /// `[inherit] @Element Name [from ns] (; | { ops })`
    fn parse_use(&mut self) -> PResult<NodeId> {
        let span = self.peek().span;
        let inherit = self.check(&TokenKind::Inherit);
        if inherit {
            self.advance();
        }
        if !self.check(&TokenKind::AtElement) {
            return Err(self.unexpected("@Element"));
        }
        self.advance();
        let reference = self.parse_reference_tail(Subtype::Element, span)?;

        let ops = if self.check(&TokenKind::LBrace) {
            let open = self.advance_span();
            self.parse_body(BodyContext::UseBody, open)?.1
        } else {
            self.end_statement();
            Vec::new()
        };

        Ok(self.alloc(
            NodeKind::Use(Use {
                reference,
                ops,
                inherit,
            }),
            span,
        ))
    }

    /// `Name [from a.b]` after a type sigil.
    fn parse_reference_tail(&mut self, subtype: Subtype, span: Span) -> PResult<Reference> {
        let name = self.expect_name("definition name")?;
        let namespace = if self.check_word("from") {
            self.advance();
            Some(self.parse_namespace_path()?)
        } else {
            None
        };
        Ok(Reference {
            subtype,
            name,
            namespace,
            span,
        })
    }

    /// `a`, `a.b` or `a::b`, normalised to `a::b`.
    fn parse_namespace_path(&mut self) -> PResult<String> {
        let mut segments = vec![self.expect_name("namespace")?];
        loop {
            if self.check(&TokenKind::Dot) && self.peek_at(1).kind.is_word() {
                self.advance();
            } else if self.check(&TokenKind::Colon)
                && self.peek_at(1).kind == TokenKind::Colon
                && self.peek_at(2).kind.is_word()
            {
                self.advance();
                self.advance();
            } else {
                break;
            }
            segments.push(self.expect_name("namespace")?);
        }
        Ok(segments.join("::"))
    }

    /// `delete div, span[1];`
    fn parse_delete(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();
        if self.check(&TokenKind::AtElement) {
            return Err(self.error("Deleting an inherited @Element is not supported".into()));
        }

        let mut targets = vec![self.parse_target()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            targets.push(self.parse_target()?);
        }
        self.end_statement();

        Ok(self.alloc(NodeKind::Delete(targets), span))
    }

    /// `insert after div[0] { ... }`, `insert at top { ... }`
    fn parse_insert(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();

        let position = if self.check_word("after") {
            self.advance();
            InsertPosition::After(self.parse_target()?)
        } else if self.check_word("before") {
            self.advance();
            InsertPosition::Before(self.parse_target()?)
        } else if self.check_word("replace") {
            self.advance();
            InsertPosition::Replace(self.parse_target()?)
        } else if self.check_word("at") {
            self.advance();
            if self.check_word("top") {
                self.advance();
                InsertPosition::AtTop
            } else if self.check_word("bottom") {
                self.advance();
                InsertPosition::AtBottom
            } else {
                return Err(self.unexpected("'top' or 'bottom'"));
            }
        } else {
            return Err(self.unexpected("after, before, replace or at"));
        };

        let open = self.expect_open("insert position")?;
        let (_, content) = self.parse_body(BodyContext::Insert, open)?;

        Ok(self.alloc(NodeKind::Insert(Insert { position, content }), span))
    }

    /// `div[1] { ... }` inside a use body.
    fn parse_modify(&mut self) -> PResult<NodeId> {
        let span = self.peek().span;
        let target = self.parse_target()?;
        let open = self.expect_open(&format!("'{target}'"))?;
        let (attributes, children) = self.parse_body(BodyContext::Modify, open)?;

        Ok(self.alloc(
            NodeKind::Modify(Modify {
                target,
                attributes,
                children,
            }),
            span,
        ))
    }

    /// `tag` or `tag[N]`. An unusable index is reported and replaced with
    /// [`INVALID_INDEX`]; parsing carries on.
    fn parse_target(&mut self) -> PResult<Target> {
        let tag = self.expect_name("element selector")?;
        if !self.check(&TokenKind::LBracket) {
            return Ok(Target { tag, index: None });
        }
        self.advance();

        let index = match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                let parsed = text.parse::<i64>().ok().filter(|n| *n >= 0);
                if parsed.is_none() {
                    let err = self.error(format!("Invalid index '{text}' for '{tag}'"));
                    self.errors.push(err);
                }
                self.advance();
                parsed.unwrap_or(INVALID_INDEX)
            }
            _ => {
                let err = self.error(format!(
                    "Expected an index for '{tag}', found '{}'",
                    self.peek().lexeme
                ));
                self.errors.push(err);
                while !self.is_at_end()
                    && !matches!(
                        self.peek().kind,
                        TokenKind::RBracket
                            | TokenKind::Semicolon
                            | TokenKind::LBrace
                            | TokenKind::RBrace
                    )
                {
                    self.advance();
                }
                INVALID_INDEX
            }
        };

        if self.check(&TokenKind::RBracket) {
            self.advance();
        } else {
            let err = self.error(format!("Expected ']' after index of '{tag}'"));
            self.errors.push(err);
        }

        Ok(Target {
            tag,
            index: Some(index),
        })
    }

    /// `except span, @Html, [Custom] @Element Box;`
    fn parse_except(&mut self) -> PResult<NodeId> {
        let span = self.advance_span();

        let mut constraints = vec![self.parse_constraint()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            constraints.push(self.parse_constraint()?);
        }
        self.end_statement();

        Ok(self.alloc(NodeKind::Except(constraints), span))
    }

    fn parse_constraint(&mut self) -> PResult<Constraint> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(tag) => {
                self.advance();
                Ok(Constraint::TagName(tag))
            }
            TokenKind::AtType(t) if t == "Html" => {
                self.advance();
                Ok(Constraint::HtmlTagType)
            }
            TokenKind::Template | TokenKind::Custom => {
                let kind = self.parse_def_kind();
                if !matches!(
                    self.peek().kind,
                    TokenKind::AtStyle | TokenKind::AtElement | TokenKind::AtVar
                ) {
                    return Ok(Constraint::TemplateRootType(kind));
                }
                let subtype = self.expect_subtype()?;
                let name = if self.peek().kind.is_word() {
                    Some(self.expect_name("definition name")?)
                } else {
                    None
                };
                Ok(Constraint::TemplateSubType {
                    kind,
                    subtype,
                    name,
                })
            }
            _ => Err(self.unexpected("a tag name, @Html, [Template] or [Custom]")),
        }
    }

    // =========================================================================
    // Value helpers
    // =========================================================================

    /// Collect a value up to `;` (consumed) or `}` (left in place).
    /// A lone quoted string yields its contents; anything else is rebuilt
    /// from the source lexemes.
    fn parse_value(&mut self, what: &str) -> PResult<String> {
        let start = self.pos;
        let mut depth = 0usize;

        loop {
            match &self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon | TokenKind::RBrace if depth == 0 => break,
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
                TokenKind::Unknown(t) => {
                    return Err(self.error(format!("Unrecognized input '{t}' in value of '{what}'")))
                }
                _ => {}
            }
            self.advance();
        }

        if start == self.pos {
            return Err(self.error(format!("Expected value for '{what}'")));
        }
        let value = value_text(&self.tokens[start..self.pos]);
        self.end_statement();
        Ok(value)
    }

    fn parse_name_list(&mut self, what: &str) -> PResult<Vec<String>> {
        let mut names = vec![self.parse_compound_name(what)?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            names.push(self.parse_compound_name(what)?);
        }
        Ok(names)
    }

    /// A name that may contain touching punctuation (`--accent`).
    fn parse_compound_name(&mut self, what: &str) -> PResult<String> {
        let start = self.pos;
        while !self.is_at_end()
            && !matches!(
                self.peek().kind,
                TokenKind::Comma | TokenKind::Semicolon | TokenKind::RBrace
            )
        {
            self.advance();
        }
        let name = reconstruct(&self.tokens[start..self.pos]);
        if name.is_empty() {
            return Err(self.error(format!("Expected {what}")));
        }
        Ok(name)
    }

    // =========================================================================
    // Error handling
    // =========================================================================

    /// Record an error and skip to the next statement boundary.
    fn recover(&mut self, error: ParseError) {
        if error.is_fatal() {
            if !self.fatal_reported {
                self.fatal_reported = true;
                self.errors.push(error);
            }
            self.pos = self.tokens.len();
            return;
        }
        self.errors.push(error);
        self.synchronize();
    }

    /// Skip past the current statement: up to a `;`, over a whole `{ }`
    /// block, or up to (not past) the `}` closing the enclosing block.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match self.peek().kind {
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let message = match &token.kind {
            TokenKind::Eof => format!("Expected {expected}, found end of input"),
            TokenKind::Unknown(t) => format!("Unrecognized input '{t}', expected {expected}"),
            _ => format!("Expected {expected}, found '{}'", token.lexeme),
        };
        ParseError::syntax(message, token.span)
    }

    fn not_allowed(&self, what: &str, ctx: BodyContext) -> ParseError {
        self.error(format!("{what} are not allowed in {}", ctx.describe()))
    }

    fn unterminated_raw(&self, what: &str) -> ParseError {
        let span = self.peek().span;
        ParseError {
            kind: ParseErrorKind::Unterminated,
            message: format!("Unterminated {what}"),
            line: span.line,
            column: span.column,
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError::syntax(message, self.peek().span)
    }

    // =========================================================================
    // Token navigation helpers
    // =========================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        static EOF: std::sync::LazyLock<Token> =
            std::sync::LazyLock::new(|| Token::new(TokenKind::Eof, "", Span::default()));
        self.tokens.get(self.pos + offset).unwrap_or(&EOF)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    /// Advance and return the span of the consumed token.
    fn advance_span(&mut self) -> Span {
        let span = self.peek().span;
        self.advance();
        span
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len() || matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(w) if w == word)
    }

    fn expect_name(&mut self, what: &str) -> PResult<String> {
        if self.peek().kind.is_word() {
            let name = self.peek().lexeme.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_open(&mut self, after: &str) -> PResult<Span> {
        if self.check(&TokenKind::LBrace) {
            Ok(self.advance_span())
        } else {
            Err(self.unexpected(&format!("'{{' after {after}")))
        }
    }

    /// Consume the `}` closing a block opened at `open`. Reaching the end of
    /// input instead is the one fatal parse error.
    fn expect_close(&mut self, open: Span, what: &str) -> PResult<()> {
        if self.check(&TokenKind::RBrace) {
            self.advance();
            return Ok(());
        }
        if self.is_at_end() {
            return Err(ParseError {
                kind: ParseErrorKind::Unterminated,
                message: format!("Unterminated {what} opened at line {}", open.line),
                line: open.line,
                column: open.column,
            });
        }
        Err(self.unexpected("'}'"))
    }

    /// Consume a statement-ending `;`. It may be omitted before `}`.
    fn end_statement(&mut self) {
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        } else if !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let err = self.unexpected("';'");
            self.errors.push(err);
        }
    }

    fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.arena.alloc(Node::new(kind, span))
    }
}

fn has_valueless(items: &[StyleItem]) -> bool {
    items
        .iter()
        .any(|item| matches!(item, StyleItem::Property(p) if p.value.is_none()))
}

/// Rebuild source text from tokens, keeping a single space wherever the
/// original had whitespace between two tokens.
fn reconstruct(tokens: &[Token]) -> String {
    join_tokens(tokens, |t| t.lexeme.clone())
}

/// Like [`reconstruct`], but a lone string literal yields its contents.
fn value_text(tokens: &[Token]) -> String {
    match tokens {
        [Token {
            kind: TokenKind::String(s),
            ..
        }] => s.clone(),
        _ => reconstruct(tokens),
    }
}

/// Text block contents: string literals contribute their contents, bare
/// words their lexeme.
fn reconstruct_text(tokens: &[Token]) -> String {
    join_tokens(tokens, |t| match &t.kind {
        TokenKind::String(s) => s.clone(),
        _ => t.lexeme.clone(),
    })
}

fn join_tokens(tokens: &[Token], piece: impl Fn(&Token) -> String) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && !tokens[i - 1].touches(token) {
            out.push(' ');
        }
        out.push_str(&piece(token));
    }
    out
}
