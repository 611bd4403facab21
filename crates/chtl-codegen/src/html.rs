//! HTML code generator.
//!
//! Walks the resolved program and generates HTML output. Local style blocks
//! are folded into their element: properties become the `style` attribute,
//! rules are hoisted into the stylesheet. Script blocks are queued for the
//! JS generator together with the element `{{&}}` refers to.

use crate::css::{self, Declarations};
use crate::js::{self, ScriptChunk};
use crate::CompilationContext;
use chtl_lexer::is_void_element;
use chtl_parser::ast::{Element, NodeId, NodeKind, OriginKind, StyleBlock, StyleItem, Text};
use chtl_parser::Program;
use indexmap::IndexMap;

/// Generate HTML from a resolved program, filling the stylesheet and the
/// script queue of the context.
pub fn generate(program: &Program, ctx: &mut CompilationContext) -> String {
    let mut html = String::new();

    for id in &program.items {
        generate_node(program, *id, ctx, &mut html, 0);
    }

    html
}

fn generate_node(
    program: &Program,
    id: NodeId,
    ctx: &mut CompilationContext,
    out: &mut String,
    depth: usize,
) {
    let indent = ctx.indent(depth);
    match program.kind(id) {
        NodeKind::Element(el) => generate_element(program, el, ctx, out, depth),
        NodeKind::Text(text) => {
            out.push_str(&indent);
            out.push_str(&text_content(text));
            ctx.newline(out);
        }
        NodeKind::Comment(comment) => {
            out.push_str(&indent);
            out.push_str(&format!("<!-- {} -->", comment.trim()));
            ctx.newline(out);
        }
        NodeKind::Origin(origin) => {
            let content = origin.content.as_deref().unwrap_or_default();
            match origin.kind {
                OriginKind::Style => ctx.stylesheet.add_raw(content),
                OriginKind::JavaScript => ctx.scripts.push(ScriptChunk::raw(content)),
                OriginKind::Html | OriginKind::Other(_) => {
                    out.push_str(&indent);
                    out.push_str(content);
                    ctx.newline(out);
                }
            }
        }
        NodeKind::Style(block) => hoist_global(block, ctx),
        NodeKind::Script(block) => ctx.scripts.push(ScriptChunk::new(&block.content, None)),
        // Definitions, imports and operators never survive resolution.
        other => tracing::debug!(node = ?std::mem::discriminant(other), "skipping non-markup node"),
    }
}

fn generate_element(
    program: &Program,
    el: &Element,
    ctx: &mut CompilationContext,
    out: &mut String,
    depth: usize,
) {
    let indent = ctx.indent(depth);

    // Later duplicates overwrite earlier ones in place.
    let mut attributes: IndexMap<String, String> = el
        .attributes
        .iter()
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect();

    // Fold local style and script blocks into the element
    let mut inline = Declarations::new();
    let mut rules = Vec::new();
    let mut scripts = Vec::new();
    for child in &el.children {
        match program.kind(*child) {
            NodeKind::Style(block) => {
                for item in &block.items {
                    match item {
                        StyleItem::Property(p) => {
                            if let Some(value) = &p.value {
                                inline.insert(p.name.clone(), value.clone());
                            }
                        }
                        StyleItem::Rule(rule) => rules.push(rule),
                        StyleItem::Use(_) | StyleItem::Delete(_) => {}
                    }
                }
            }
            NodeKind::Script(block) => scripts.push(block.content.as_str()),
            _ => {}
        }
    }

    for rule in &rules {
        claim_selector(&rule.selector, &mut attributes, ctx);
    }
    let self_ref = rules
        .iter()
        .any(|r| r.selector.contains('&'))
        .then(|| self_selector(&el.tag, &mut attributes, ctx));
    for rule in &rules {
        let selector = match &self_ref {
            Some(s) => rule.selector.replace('&', s),
            None => rule.selector.clone(),
        };
        ctx.stylesheet.add_rule(&selector, declarations(&rule.items));
    }

    let owner = scripts
        .iter()
        .any(|s| s.contains("{{&}}"))
        .then(|| script_owner(&el.tag, &mut attributes, ctx));
    for script in scripts {
        ctx.scripts.push(ScriptChunk::new(script, owner.clone()));
    }

    if !inline.is_empty() {
        let style = css::inline(&inline);
        match attributes.get_mut("style") {
            Some(existing) => {
                if !existing.is_empty() && !existing.trim_end().ends_with(';') {
                    existing.push(';');
                }
                existing.push_str(&style);
            }
            None => {
                attributes.insert("style".into(), style);
            }
        }
    }

    // Opening tag
    out.push_str(&indent);
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &attributes {
        out.push_str(&format!(" {name}=\"{}\"", escape(value)));
    }
    out.push('>');

    // Void elements: no closing tag
    if is_void_element(&el.tag) {
        ctx.newline(out);
        return;
    }

    // Children
    let content: Vec<NodeId> = el
        .children
        .iter()
        .copied()
        .filter(|c| !matches!(program.kind(*c), NodeKind::Style(_) | NodeKind::Script(_)))
        .collect();
    let has_block_children = content.iter().any(|c| {
        matches!(
            program.kind(*c),
            NodeKind::Element(_) | NodeKind::Comment(_) | NodeKind::Origin(_)
        )
    });

    if has_block_children {
        ctx.newline(out);
        for child in content {
            generate_node(program, child, ctx, out, depth + 1);
        }
        out.push_str(&indent);
    } else {
        // Text-only children stay inline
        for child in content {
            if let NodeKind::Text(text) = program.kind(child) {
                out.push_str(&text_content(text));
            }
        }
    }

    // Closing tag
    out.push_str(&format!("</{}>", el.tag));
    ctx.newline(out);
}

/// Top-level `style { }`: rules go to the stylesheet as written.
fn hoist_global(block: &StyleBlock, ctx: &mut CompilationContext) {
    for item in &block.items {
        match item {
            StyleItem::Rule(rule) => {
                ctx.stylesheet.add_rule(&rule.selector, declarations(&rule.items));
            }
            StyleItem::Property(p) => {
                tracing::debug!(property = %p.name, "ignoring property outside a rule");
            }
            StyleItem::Use(_) | StyleItem::Delete(_) => {}
        }
    }
}

fn declarations(items: &[StyleItem]) -> Declarations {
    items
        .iter()
        .filter_map(|item| match item {
            StyleItem::Property(p) => p.value.clone().map(|v| (p.name.clone(), v)),
            _ => None,
        })
        .collect()
}

/// A rule written as `.name` or `#name` gives the element that class or id
/// when it has none yet.
fn claim_selector(
    selector: &str,
    attributes: &mut IndexMap<String, String>,
    ctx: &CompilationContext,
) {
    let selector = selector.trim();
    let (attribute, rest, disabled) = if let Some(rest) = selector.strip_prefix('.') {
        ("class", rest, ctx.config.disable_auto_class)
    } else if let Some(rest) = selector.strip_prefix('#') {
        ("id", rest, ctx.config.disable_auto_id)
    } else {
        return;
    };

    let name = identifier(rest);
    if name.is_empty() || disabled || attributes.contains_key(attribute) {
        return;
    }
    tracing::debug!(attribute, name, "adding selector name to element");
    attributes.insert(attribute.to_string(), name.to_string());
}

/// CSS selector `&` stands for: the element's first class, its id, or a
/// freshly assigned `classN`/`idN`.
fn self_selector(
    tag: &str,
    attributes: &mut IndexMap<String, String>,
    ctx: &mut CompilationContext,
) -> String {
    if let Some(class) = attributes.get("class").and_then(|c| c.split_whitespace().next()) {
        return format!(".{class}");
    }
    if let Some(id) = attributes.get("id") {
        return format!("#{id}");
    }
    if !ctx.config.disable_auto_class {
        let class = ctx.assign_class();
        attributes.insert("class".into(), class.clone());
        return format!(".{class}");
    }
    if !ctx.config.disable_auto_id {
        let id = ctx.assign_id();
        attributes.insert("id".into(), id.clone());
        return format!("#{id}");
    }
    tag.to_string()
}

/// JS expression `{{&}}` stands for inside this element's scripts.
fn script_owner(
    tag: &str,
    attributes: &mut IndexMap<String, String>,
    ctx: &mut CompilationContext,
) -> String {
    if let Some(id) = attributes.get("id") {
        return format!("document.getElementById('{}')", js::quote(id));
    }
    if !ctx.config.disable_auto_id {
        let id = ctx.assign_id();
        attributes.insert("id".into(), id.clone());
        return format!("document.getElementById('{id}')");
    }
    let selector = match attributes.get("class").and_then(|c| c.split_whitespace().next()) {
        Some(class) => format!(".{class}"),
        None => tag.to_string(),
    };
    format!("document.querySelector('{}')", js::quote(&selector))
}

/// Leading run of class/id name characters.
fn identifier(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

fn text_content(text: &Text) -> String {
    if text.raw {
        text.content.clone()
    } else {
        escape(&text.content)
    }
}

/// Escape `& < > " '` for text and attribute values.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use chtl_parser::{Configuration, Parser};
    use pretty_assertions::assert_eq;

    /// Parse `src` (markup only, no definitions) and generate HTML.
    fn render_with<'c>(
        src: &str,
        config: &'c Configuration,
        pretty: bool,
    ) -> (String, CompilationContext<'c>) {
        let program = Parser::parse(src).into_result().unwrap();
        let mut ctx = CompilationContext::new(config, Options { pretty });
        let html = generate(&program, &mut ctx);
        (html, ctx)
    }

    fn render(src: &str) -> String {
        let config = Configuration::default();
        render_with(src, &config, false).0
    }

    // =========================================================================
    // Markup
    // =========================================================================

    #[test]
    fn test_attributes_in_order() {
        assert_eq!(
            render(r#"div { id: "main"; class = box; }"#),
            r#"<div id="main" class="box"></div>"#
        );
    }

    #[test]
    fn test_text_is_escaped() {
        assert_eq!(
            render(r#"p { text { "a < b & 'c'" } }"#),
            "<p>a &lt; b &amp; &#39;c&#39;</p>"
        );
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        assert_eq!(
            render(r#"a { title: "say \"hi\""; }"#),
            r#"<a title="say &quot;hi&quot;"></a>"#
        );
    }

    #[test]
    fn test_void_elements_have_no_closing_tag() {
        assert_eq!(
            render(r#"div { br { } img { src: "a.png"; } }"#),
            r#"<div><br><img src="a.png"></div>"#
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(render("div { -- note\n }"), "<div><!-- note --></div>");
    }

    #[test]
    fn test_pretty_layout() {
        let config = Configuration::default();
        let (html, _) = render_with(
            r#"div { h1 { text { "Title" } } br { } p { text { "x" } } }"#,
            &config,
            true,
        );
        assert_eq!(
            html,
            "<div>\n  <h1>Title</h1>\n  <br>\n  <p>x</p>\n</div>\n"
        );
    }

    #[test]
    fn test_raw_origin_html() {
        assert_eq!(
            render("div { [Origin] @Html { <b>hi</b> } }"),
            "<div><b>hi</b></div>"
        );
    }

    #[test]
    fn test_origin_style_and_script_are_routed() {
        let config = Configuration::default();
        let (html, ctx) = render_with(
            "[Origin] @Style { p { color: red; } }\n[Origin] @JavaScript { go(); }",
            &config,
            false,
        );
        assert_eq!(html, "");
        assert_eq!(ctx.stylesheet.render(false), "p { color: red; }");
        assert_eq!(ctx.scripts, vec![ScriptChunk::raw("go();")]);
    }

    // =========================================================================
    // Local style
    // =========================================================================

    #[test]
    fn test_inline_style() {
        assert_eq!(
            render("p { style { color: black; font-weight: bold; } }"),
            r#"<p style="color:black;font-weight:bold;"></p>"#
        );
    }

    #[test]
    fn test_inline_style_appends_to_attribute() {
        assert_eq!(
            render(r#"p { style: "margin:0"; style { color: red; } }"#),
            r#"<p style="margin:0;color:red;"></p>"#
        );
    }

    #[test]
    fn test_class_rule_adds_class() {
        let config = Configuration::default();
        let (html, ctx) = render_with("div { style { .box { width: 10px; } } }", &config, false);
        assert_eq!(html, r#"<div class="box"></div>"#);
        assert_eq!(ctx.stylesheet.render(false), ".box{width:10px;}");
    }

    #[test]
    fn test_class_rule_keeps_existing_class() {
        let config = Configuration::default();
        let (html, ctx) = render_with(
            "div { class: card; style { .box:hover { color: red; } } }",
            &config,
            false,
        );
        assert_eq!(html, r#"<div class="card"></div>"#);
        assert_eq!(ctx.stylesheet.render(false), ".box:hover{color:red;}");
    }

    #[test]
    fn test_id_rule_adds_id() {
        assert_eq!(
            render("div { style { #main { margin: 0; } } }"),
            r#"<div id="main"></div>"#
        );
    }

    #[test]
    fn test_ampersand_uses_class() {
        let config = Configuration::default();
        let (html, ctx) = render_with(
            "button { class: btn primary; style { &:hover { color: red; } } }",
            &config,
            false,
        );
        assert_eq!(html, r#"<button class="btn primary"></button>"#);
        assert_eq!(ctx.stylesheet.render(false), ".btn:hover{color:red;}");
    }

    #[test]
    fn test_ampersand_assigns_auto_class() {
        let config = Configuration::default();
        let (html, ctx) = render_with(
            "a { style { &:hover { color: red; } } } b { style { &:hover { color: blue; } } }",
            &config,
            false,
        );
        assert_eq!(html, r#"<a class="class0"></a><b class="class1"></b>"#);
        assert_eq!(
            ctx.stylesheet.render(false),
            ".class0:hover{color:red;}\n.class1:hover{color:blue;}"
        );
    }

    #[test]
    fn test_auto_class_disabled_falls_back_to_id() {
        let config = Configuration {
            disable_auto_class: true,
            index_initial_count: 1,
            ..Configuration::default()
        };
        let (html, ctx) = render_with(
            "span { style { .x { color: red; } &:hover { color: blue; } } }",
            &config,
            false,
        );
        assert_eq!(html, r#"<span id="id1"></span>"#);
        assert_eq!(
            ctx.stylesheet.render(false),
            ".x{color:red;}\n#id1:hover{color:blue;}"
        );
    }

    #[test]
    fn test_global_style_is_hoisted() {
        let config = Configuration::default();
        let (html, ctx) = render_with("style { body { margin: 0; } }", &config, false);
        assert_eq!(html, "");
        assert_eq!(ctx.stylesheet.render(false), "body{margin:0;}");
    }

    // =========================================================================
    // Scripts
    // =========================================================================

    #[test]
    fn test_self_script_assigns_id() {
        let config = Configuration::default();
        let (html, ctx) = render_with(
            "button { script { {{&}}->focus(); } }",
            &config,
            false,
        );
        assert_eq!(html, r#"<button id="id0"></button>"#);
        assert_eq!(
            ctx.scripts,
            vec![ScriptChunk::new(
                "{{&}}->focus();",
                Some("document.getElementById('id0')".into())
            )]
        );
    }

    #[test]
    fn test_self_script_uses_existing_id() {
        let config = Configuration::default();
        let (html, ctx) = render_with(
            "div { id: app; script { {{&}}; } }",
            &config,
            false,
        );
        assert_eq!(html, r#"<div id="app"></div>"#);
        assert_eq!(
            ctx.scripts[0].owner.as_deref(),
            Some("document.getElementById('app')")
        );
    }

    #[test]
    fn test_script_without_self_reference_needs_no_id() {
        let config = Configuration::default();
        let (html, ctx) = render_with("div { script { init(); } }", &config, false);
        assert_eq!(html, "<div></div>");
        assert_eq!(ctx.scripts, vec![ScriptChunk::new("init();", None)]);
    }
}
