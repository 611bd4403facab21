//! Script-dialect syntax rules.
//!
//! A rule provider (a CJMOD) contributes rules of the shape
//! `{keyword, pattern, expansion}`. The pattern is a whitespace-separated
//! list of literal tokens and slots:
//!
//! - `$!` required slot: a missing value is reported and the call is left as is
//! - `$?` optional slot: binds nothing when no value is present
//! - `$`  any-one slot: binds exactly one term or the rule does not apply
//!
//! Slots bind one JavaScript term each (`x`, `"s"`, `a.b(c)[0]`, `(a + b)`)
//! positionally around the keyword. The expansion refers to slot values as
//! `$0`, `$1`, ... in pattern order.
//!
//! Loading providers from native libraries happens outside this crate; the
//! resolver only sees the [`RuleProvider`] capability.

use crate::CompileError;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    Literal(String),
    Required,
    Optional,
    Any,
}

/// One registered rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxRule {
    pub keyword: String,
    pattern: Vec<Atom>,
    pub expansion: String,
}

impl SyntaxRule {
    pub fn new(
        keyword: impl Into<String>,
        pattern: &str,
        expansion: impl Into<String>,
    ) -> Result<Self, CompileError> {
        let keyword = keyword.into();
        let pattern: Vec<Atom> = pattern
            .split_whitespace()
            .map(|word| match word {
                "$!" => Atom::Required,
                "$?" => Atom::Optional,
                "$" => Atom::Any,
                other => Atom::Literal(other.to_string()),
            })
            .collect();

        if !pattern.contains(&Atom::Literal(keyword.clone())) {
            return Err(CompileError::Plugin {
                keyword,
                message: "pattern does not contain the keyword".into(),
            });
        }

        Ok(Self {
            keyword,
            pattern,
            expansion: expansion.into(),
        })
    }

    /// Bind the pattern around the keyword token at `at`.
    fn bind(&self, tokens: &[JsToken], src: &str, at: usize) -> Binding {
        let Some(split) = self
            .pattern
            .iter()
            .position(|a| *a == Atom::Literal(self.keyword.clone()))
        else {
            return Binding::Miss;
        };
        let (before, after) = (&self.pattern[..split], &self.pattern[split + 1..]);

        let mut start = at;
        let mut leading = Vec::new();
        for atom in before.iter().rev() {
            match atom {
                Atom::Literal(lit) => {
                    if start > 0 && tokens[start - 1].text(src) == lit {
                        start -= 1;
                    } else {
                        return Binding::Miss;
                    }
                }
                slot => match term_backward(tokens, src, start) {
                    Some(s) => {
                        leading.push(src[tokens[s].start..tokens[start - 1].end].to_string());
                        start = s;
                    }
                    None => match slot {
                        Atom::Required => return self.missing(),
                        Atom::Optional => leading.push(String::new()),
                        _ => return Binding::Miss,
                    },
                },
            }
        }
        leading.reverse();

        let mut end = at + 1;
        let mut slots = leading;
        for atom in after {
            match atom {
                Atom::Literal(lit) => {
                    if end < tokens.len() && tokens[end].text(src) == lit {
                        end += 1;
                    } else {
                        return Binding::Miss;
                    }
                }
                slot => match term_forward(tokens, src, end) {
                    Some(e) => {
                        slots.push(src[tokens[end].start..tokens[e - 1].end].to_string());
                        end = e;
                    }
                    None => match slot {
                        Atom::Required => return self.missing(),
                        Atom::Optional => slots.push(String::new()),
                        _ => return Binding::Miss,
                    },
                },
            }
        }

        Binding::Bound { start, end, slots }
    }

    fn missing(&self) -> Binding {
        Binding::Failed(CompileError::Plugin {
            keyword: self.keyword.clone(),
            message: "a required slot has no value".into(),
        })
    }

    fn expand(&self, slots: &[String]) -> String {
        let mut out = self.expansion.clone();
        // Highest index first so `$1` never eats the start of `$10`.
        for (i, value) in slots.iter().enumerate().rev() {
            out = out.replace(&format!("${i}"), value);
        }
        out
    }
}

enum Binding {
    Bound {
        start: usize,
        end: usize,
        slots: Vec<String>,
    },
    Failed(CompileError),
    Miss,
}

/// The rules active in a session, by keyword.
#[derive(Debug, Clone, Default)]
pub struct SyntaxRules {
    rules: IndexMap<String, SyntaxRule>,
}

impl SyntaxRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        keyword: &str,
        pattern: &str,
        expansion: &str,
    ) -> Result<(), CompileError> {
        let rule = SyntaxRule::new(keyword, pattern, expansion)?;
        tracing::debug!(keyword, pattern, "registered syntax rule");
        if self.rules.insert(keyword.to_string(), rule).is_some() {
            tracing::warn!(keyword, "syntax rule replaced an earlier rule");
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Rewrite every invocation of a registered keyword in `script`.
    /// Returns the rewritten text and one error per invocation whose
    /// required slots could not be bound; those invocations are left as is.
    pub fn expand(&self, script: &str) -> (String, Vec<CompileError>) {
        if self.rules.is_empty() {
            return (script.to_string(), Vec::new());
        }

        let tokens = tokenize(script);
        let mut out = String::with_capacity(script.len());
        let mut errors = Vec::new();
        let mut cursor = 0;
        let mut k = 0;

        while k < tokens.len() {
            if let Some(rule) = self.rules.get(tokens[k].text(script)) {
                match rule.bind(&tokens, script, k) {
                    Binding::Bound { start, end, slots } if tokens[start].start >= cursor => {
                        out.push_str(&script[cursor..tokens[start].start]);
                        out.push_str(&rule.expand(&slots));
                        cursor = tokens[end - 1].end;
                        k = end;
                        continue;
                    }
                    Binding::Failed(err) => {
                        tracing::warn!(keyword = %rule.keyword, "syntax rule failed to bind");
                        errors.push(err);
                    }
                    _ => {}
                }
            }
            k += 1;
        }

        out.push_str(&script[cursor..]);
        (out, errors)
    }
}

/// Supplies syntax rules when a unit imports it with `[Import] @CJmod`.
pub trait RuleProvider {
    fn name(&self) -> &str;

    fn register(&self, rules: &mut SyntaxRules) -> Result<(), CompileError>;
}

/// A provider backed by a fixed list of rules.
#[derive(Debug, Clone, Default)]
pub struct StaticRules {
    name: String,
    rules: Vec<(String, String, String)>,
}

impl StaticRules {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn rule(
        mut self,
        keyword: impl Into<String>,
        pattern: impl Into<String>,
        expansion: impl Into<String>,
    ) -> Self {
        self.rules
            .push((keyword.into(), pattern.into(), expansion.into()));
        self
    }
}

impl RuleProvider for StaticRules {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, rules: &mut SyntaxRules) -> Result<(), CompileError> {
        for (keyword, pattern, expansion) in &self.rules {
            rules.register(keyword, pattern, expansion)?;
        }
        Ok(())
    }
}

/// Providers known to a session, by name.
#[derive(Default)]
pub struct PluginRegistry {
    providers: IndexMap<String, Box<dyn RuleProvider>>,
}

impl PluginRegistry {
    pub fn register(&mut self, provider: Box<dyn RuleProvider>) {
        let name = provider.name().to_string();
        tracing::debug!(provider = %name, "registered rule provider");
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<&dyn RuleProvider> {
        self.providers.get(name).map(|p| p.as_ref())
    }
}

// =========================================================================
// JavaScript term scanning
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsKind {
    Word,
    Number,
    Str,
    Punct,
    Open,
    Close,
}

#[derive(Debug, Clone, Copy)]
struct JsToken {
    kind: JsKind,
    start: usize,
    end: usize,
}

impl JsToken {
    fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

const OPERATOR_CHARS: &str = "+-*/%=<>!&|^~?:";

/// Split script text into words, numbers, strings, brackets and operator
/// runs. Comments are skipped.
fn tokenize(src: &str) -> Vec<JsToken> {
    let bytes: Vec<(usize, char)> = src.char_indices().collect();
    let end_of = |i: usize| bytes.get(i).map_or(src.len(), |(b, _)| *b);
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let (start, c) = bytes[i];
        let next = bytes.get(i + 1).map(|(_, c)| *c);

        let (kind, len) = if c.is_whitespace() {
            i += 1;
            continue;
        } else if c == '/' && next == Some('/') {
            while i < bytes.len() && bytes[i].1 != '\n' {
                i += 1;
            }
            continue;
        } else if c == '/' && next == Some('*') {
            i += 2;
            while i < bytes.len() && !(bytes[i].1 == '*' && bytes.get(i + 1).map(|b| b.1) == Some('/')) {
                i += 1;
            }
            i += 2;
            continue;
        } else if matches!(c, '"' | '\'' | '`') {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].1 != c {
                if bytes[j].1 == '\\' {
                    j += 1;
                }
                j += 1;
            }
            (JsKind::Str, (j + 1).min(bytes.len()) - i)
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let len = bytes[i..]
                .iter()
                .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
                .count();
            (JsKind::Word, len)
        } else if c.is_ascii_digit() {
            let len = bytes[i..]
                .iter()
                .take_while(|(_, c)| c.is_alphanumeric() || *c == '.')
                .count();
            (JsKind::Number, len)
        } else if matches!(c, '(' | '[' | '{') {
            (JsKind::Open, 1)
        } else if matches!(c, ')' | ']' | '}') {
            (JsKind::Close, 1)
        } else if OPERATOR_CHARS.contains(c) {
            let len = bytes[i..]
                .iter()
                .take_while(|(_, c)| OPERATOR_CHARS.contains(*c))
                .count();
            (JsKind::Punct, len)
        } else {
            (JsKind::Punct, 1)
        };

        tokens.push(JsToken {
            kind,
            start,
            end: end_of(i + len),
        });
        i += len;
    }

    tokens
}

fn is_atom(token: &JsToken) -> bool {
    matches!(token.kind, JsKind::Word | JsKind::Number | JsKind::Str)
}

fn is_group_open(token: &JsToken, src: &str) -> bool {
    token.kind == JsKind::Open && token.text(src) != "{"
}

fn is_group_close(token: &JsToken, src: &str) -> bool {
    token.kind == JsKind::Close && token.text(src) != "}"
}

/// Index of the bracket closing the one opened at `open`.
fn matching_close(tokens: &[JsToken], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            JsKind::Open => depth += 1,
            JsKind::Close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Index of the bracket opening the one closed at `close`.
fn matching_open(tokens: &[JsToken], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        match tokens[i].kind {
            JsKind::Close => depth += 1,
            JsKind::Open => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// The term starting at `start`; returns the index one past its end.
fn term_forward(tokens: &[JsToken], src: &str, start: usize) -> Option<usize> {
    let first = tokens.get(start)?;
    let mut i = if is_atom(first) {
        start + 1
    } else if first.kind == JsKind::Open {
        matching_close(tokens, start)? + 1
    } else {
        return None;
    };

    loop {
        match tokens.get(i) {
            Some(t) if is_group_open(t, src) => match matching_close(tokens, i) {
                Some(close) => i = close + 1,
                None => break,
            },
            Some(t) if t.text(src) == "." => match tokens.get(i + 1) {
                Some(next) if next.kind == JsKind::Word => i += 2,
                _ => break,
            },
            _ => break,
        }
    }
    Some(i)
}

/// The term ending just before `end`; returns the index of its first token.
fn term_backward(tokens: &[JsToken], src: &str, end: usize) -> Option<usize> {
    #[derive(PartialEq)]
    enum State {
        Start,
        Atom,
        Group,
        Dot,
    }

    let mut i = end;
    let mut state = State::Start;

    while i > 0 {
        let token = &tokens[i - 1];
        state = match state {
            State::Start | State::Dot | State::Group if is_group_close(token, src) => {
                i = matching_open(tokens, i - 1)?;
                State::Group
            }
            State::Start | State::Dot | State::Group if token.kind == JsKind::Word => {
                i -= 1;
                State::Atom
            }
            State::Start if is_atom(token) => {
                i -= 1;
                State::Atom
            }
            State::Atom | State::Group if token.text(src) == "." => {
                i -= 1;
                State::Dot
            }
            State::Start | State::Dot => return None,
            State::Atom | State::Group => break,
        };
    }

    match state {
        State::Atom | State::Group => Some(i),
        State::Start | State::Dot => None,
    }
}
