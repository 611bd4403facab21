//! CMOD module files.
//!
//! A module is a text unit made of bracketed sections:
//!
//! ```text
//! [ModuleInfo]
//!     name = "ui"; version = "1.0.0";
//! [/ModuleInfo]
//! [ModuleContent]
//!     [Custom] @Element Card { div { } }
//! [/ModuleContent]
//! [ModuleExport]
//!     [Custom] @Element Card;
//! [/ModuleExport]
//! ```
//!
//! Only the `{name, version, exports}` triple and the content source are
//! needed; packaging is handled elsewhere.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    /// Exported definition names. Empty means everything is exported.
    pub exports: Vec<String>,
}

impl ModuleInfo {
    pub fn exports(&self, name: &str) -> bool {
        self.exports.is_empty() || self.exports.iter().any(|e| e == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    pub info: ModuleInfo,
    /// CHTL source of the `[ModuleContent]` section.
    pub content: String,
}

/// Whether a loaded unit is a module rather than plain CHTL.
pub fn is_module(text: &str) -> bool {
    text.trim_start().starts_with("[ModuleInfo]")
}

pub fn parse(text: &str) -> ModuleFile {
    let mut info = ModuleInfo::default();

    for entry in section(text, "ModuleInfo")
        .unwrap_or_default()
        .split([';', '\n'])
    {
        let Some((key, value)) = entry.split_once(['=', ':']) else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        match key.trim() {
            "name" => info.name = value,
            "version" => info.version = value,
            other => tracing::debug!(key = other, "ignoring module info key"),
        }
    }

    info.exports = section(text, "ModuleExport")
        .unwrap_or_default()
        .split([';', ',', '\n'])
        .filter_map(|entry| entry.split_whitespace().last())
        .map(str::to_string)
        .collect();

    ModuleFile {
        info,
        content: section(text, "ModuleContent").unwrap_or_default().to_string(),
    }
}

/// Body of `[name] … [/name]`. A missing closing marker runs the section to
/// the next `[Module…]` marker or the end of the text.
fn section<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("[{name}]");
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest
        .find(&format!("[/{name}]"))
        .or_else(|| rest.find("[Module"))
        .unwrap_or(rest.len());
    Some(rest[..end].trim())
}
