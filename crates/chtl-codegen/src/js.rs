//! JavaScript code generator.
//!
//! Script blocks are emitted in document order, one per line group. Each
//! block goes through the CHTL script dialect before output:
//!
//! 1. `{{selector}}` becomes a DOM lookup (`{{&}}` is the owning element)
//! 2. `->` becomes `.`
//! 3. syntax rules registered by `[Import] @CJmod` are expanded
//!
//! No eval(), no new Function(): the output is plain script text.

use chtl_resolver::{CompileError, SyntaxRules};

/// A script queued by the HTML generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptChunk {
    pub content: String,
    /// JS expression `{{&}}` stands for. `None` outside an element.
    pub owner: Option<String>,
    /// `[Origin] @JavaScript` content skips the dialect rewrites.
    pub raw: bool,
}

impl ScriptChunk {
    pub fn new(content: impl Into<String>, owner: Option<String>) -> Self {
        Self {
            content: content.into(),
            owner,
            raw: false,
        }
    }

    pub fn raw(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            owner: None,
            raw: true,
        }
    }
}

/// Generate the script output. Plugin rules that fail to bind are returned
/// alongside; their invocations are left in the output unchanged.
pub fn generate(chunks: &[ScriptChunk], rules: &SyntaxRules) -> (String, Vec<CompileError>) {
    let mut errors = Vec::new();
    let mut parts = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let content = chunk.content.trim();
        if content.is_empty() {
            continue;
        }
        if chunk.raw {
            parts.push(content.to_string());
            continue;
        }

        let script = rewrite_selectors(content, chunk.owner.as_deref());
        let script = rewrite_arrows(&script);
        let (script, failed) = rules.expand(&script);
        errors.extend(failed);
        parts.push(script);
    }

    (parts.join("\n"), errors)
}

/// Replace every `{{…}}` lookup:
///
/// - `{{&}}` → `owner`
/// - `{{tag[N]}}` → `document.querySelectorAll('tag')[N]`
/// - `{{selector}}` → `document.querySelector('selector')`
pub fn rewrite_selectors(script: &str, owner: Option<&str>) -> String {
    let mut out = String::with_capacity(script.len());
    let mut rest = script;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        out.push_str(&rest[..start]);
        match lookup(rest[start + 2..end - 2].trim(), owner) {
            Some(js) => out.push_str(&js),
            None => out.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

fn lookup(selector: &str, owner: Option<&str>) -> Option<String> {
    if selector == "&" {
        if owner.is_none() {
            tracing::warn!("'{{{{&}}}}' outside an element is left as is");
        }
        return owner.map(str::to_string);
    }
    if selector.is_empty() {
        return None;
    }
    if let Some((tag, index)) = indexed(selector) {
        return Some(format!(
            "document.querySelectorAll('{}')[{index}]",
            quote(tag)
        ));
    }
    Some(format!("document.querySelector('{}')", quote(selector)))
}

/// `tag[N]` with a decimal `N`.
fn indexed(selector: &str) -> Option<(&str, &str)> {
    let (tag, rest) = selector.split_once('[')?;
    let index = rest.strip_suffix(']')?.trim();
    let numeric = !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit());
    numeric.then_some((tag.trim(), index))
}

/// Replace `->` with `.` outside string and template literals.
pub fn rewrite_arrows(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut quote_char: Option<char> = None;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match quote_char {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote_char = None;
                }
            }
            None if c == '-' && chars.peek() == Some(&'>') => {
                chars.next();
                out.push('.');
            }
            None => {
                if matches!(c, '\'' | '"' | '`') {
                    quote_char = Some(c);
                }
                out.push(c);
            }
        }
    }

    out
}

/// Escape `s` for a single-quoted JS string.
pub fn quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
