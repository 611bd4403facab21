//! End-to-end compilation scenarios over in-memory import graphs.

use chtl_codegen::{compile, compile_source, Compilation, CompilerOutput, Options};
use chtl_lexer::{Scanner, TokenKind};
use chtl_resolver::{CompilationSession, CompileError, MemoryLoader};
use pretty_assertions::assert_eq;
use std::path::Path;

fn session(files: &[(&str, &str)]) -> CompilationSession {
    let mut loader = MemoryLoader::new();
    for (path, content) in files {
        loader.insert(*path, *content);
    }
    CompilationSession::new(loader)
}

fn compile_files(files: &[(&str, &str)]) -> Result<Compilation, CompileError> {
    compile(
        &mut session(files),
        Path::new("main.chtl"),
        Options::default(),
    )
}

fn html(source: &str) -> String {
    let compilation = compile_source(source, Options::default()).unwrap();
    assert!(
        compilation.diagnostics.is_empty(),
        "{:?}",
        compilation.diagnostics
    );
    compilation.output.html
}

// =========================================================================
// Tokenizer
// =========================================================================

#[test]
fn test_tokenize_never_fails() {
    for source in ["", "\u{0}\u{7f}¤", "div { ` }", "\"unterminated", "[Origin] @Html {"] {
        let tokens = Scanner::tokenize(source);
        assert!(!tokens.is_empty());
        assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }
}

// =========================================================================
// Markup
// =========================================================================

#[test]
fn test_scenario_attributes() {
    assert_eq!(
        html(r#"div { id: "main"; class = box; }"#),
        r#"<div id="main" class="box"></div>"#
    );
}

#[test]
fn test_text_nodes_appear_once_in_order() {
    let out = html(
        r#"body { h1 { text { "One & Two" } } div { p { text: "<three>"; } } p { text { four } } }"#,
    );
    assert_eq!(
        out,
        "<body><h1>One &amp; Two</h1><div><p>&lt;three&gt;</p></div><p>four</p></body>"
    );
    let positions: Vec<usize> = ["One &amp; Two", "&lt;three&gt;", "four"]
        .iter()
        .map(|text| {
            assert_eq!(out.matches(text).count(), 1);
            out.find(text).unwrap_or_default()
        })
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_origin_html_with_apostrophe() {
    assert_eq!(
        html("body { [Origin] @Html { <p>Don't</p> } div { } }"),
        "<body><p>Don't</p><div></div></body>"
    );
}

#[test]
fn test_unquoted_url_keeps_its_scheme() {
    assert_eq!(
        html("div { style { background: url(https://x/y.png); } } // trailing note"),
        r#"<div style="background:url(https://x/y.png);"></div>"#
    );
}

// =========================================================================
// Templates and customs
// =========================================================================

#[test]
fn test_scenario_template_use() {
    assert_eq!(
        html(
            r#"[Template] @Style Default { color: black; } p { style { @Style Default; font-weight: bold; } text { "Hi" } }"#
        ),
        r#"<p style="color:black;font-weight:bold;">Hi</p>"#
    );
}

#[test]
fn test_scenario_custom_delete() {
    assert_eq!(
        html(
            r#"[Template] @Element Base { p { text { "a" } } p { text { "b" } } p { text { "c" } } }
               [Custom] @Element Trimmed { @Element Base; delete p[0]; }
               div { @Element Trimmed; }"#
        ),
        "<div><p>b</p><p>c</p></div>"
    );
}

#[test]
fn test_delete_twice_is_idempotent() {
    let base = r#"[Template] @Element Base { p { } span { } p { } }"#;
    let once = html(&format!("{base} div {{ @Element Base {{ delete span; }} }}"));
    let twice = html(&format!(
        "{base} div {{ @Element Base {{ delete span; delete span; }} }}"
    ));
    assert_eq!(once, "<div><p></p><p></p></div>");
    assert_eq!(once, twice);
}

#[test]
fn test_var_group_substitution() {
    assert_eq!(
        html(
            r#"[Template] @Var Theme { accent: "teal"; }
               a { style { color: Theme(accent); background: rgba(0, 0, 0, 0.5); } }"#
        ),
        r#"<a style="color:teal;background:rgba(0, 0, 0, 0.5);"></a>"#
    );
}

#[test]
fn test_var_constraint_is_reported() {
    let compilation = compile_source(
        r#"[Template] @Var Theme { c: "red"; } div { except [Template] @Var; style { color: Theme(c); } }"#,
        Options::default(),
    )
    .unwrap();
    assert!(compilation.has_errors());
    assert!(matches!(
        compilation.diagnostics[..],
        [ref d] if matches!(d.error, CompileError::ConstraintViolation { .. })
    ));
}

// =========================================================================
// Imports and namespaces
// =========================================================================

#[test]
fn test_scenario_cyclic_import() {
    let err = compile_files(&[
        ("main.chtl", "[Import] @Chtl from \"b.chtl\"; div { }"),
        ("b.chtl", "[Import] @Chtl from \"main.chtl\"; p { }"),
    ])
    .unwrap_err();

    match err {
        CompileError::CyclicImport { chain } => {
            assert!(chain.iter().any(|p| p == "main.chtl"));
            assert!(chain.iter().any(|p| p == "b.chtl"));
        }
        other => panic!("expected a cyclic import, got {other:?}"),
    }
}

#[test]
fn test_namespace_isolation() {
    let compilation = compile_files(&[
        (
            "main.chtl",
            r#"[Import] @Chtl from "a.chtl"; [Import] @Chtl from "b.chtl";
               p { style { @Style Card from a; } }
               span { style { @Style Card from b; } }"#,
        ),
        ("a.chtl", "[Template] @Style Card { color: red; }"),
        ("b.chtl", "[Template] @Style Card { color: blue; }"),
    ])
    .unwrap();

    assert!(compilation.diagnostics.is_empty(), "{:?}", compilation.diagnostics);
    assert_eq!(
        compilation.output.html,
        r#"<p style="color:red;"></p><span style="color:blue;"></span>"#
    );
}

#[test]
fn test_inner_namespace_shadows_default() {
    assert_eq!(
        html(
            r#"[Template] @Style Card { color: black; }
               [Namespace] ui {
                   [Template] @Style Card { color: red; }
                   p { style { @Style Card; } }
               }
               p { style { @Style Card; } }"#
        ),
        r#"<p style="color:red;"></p><p style="color:black;"></p>"#
    );
}

#[test]
fn test_insert_resolves_in_the_use_site_namespace() {
    let compilation = compile_files(&[
        (
            "main.chtl",
            r#"[Import] @Chtl from "ui.chtl";
               [Namespace] app {
                   [Custom] @Element Local { span { } }
                   body { @Element Card from ui { insert at bottom { @Element Local; } } }
               }"#,
        ),
        ("ui.chtl", "[Template] @Element Card { div { } }"),
    ])
    .unwrap();

    assert!(compilation.diagnostics.is_empty(), "{:?}", compilation.diagnostics);
    assert_eq!(compilation.output.html, "<body><div></div><span></span></body>");
}

#[test]
fn test_precise_import_brings_its_dependencies() {
    let compilation = compile_files(&[
        (
            "main.chtl",
            r#"[Import] [Custom] @Element Box from "lib"; body { @Element Box; }"#,
        ),
        (
            "lib.chtl",
            "[Template] @Style Inner { color: red; } [Custom] @Element Box { div { style { @Style Inner; } } }",
        ),
    ])
    .unwrap();

    assert!(compilation.diagnostics.is_empty(), "{:?}", compilation.diagnostics);
    assert_eq!(
        compilation.output.html,
        r#"<body><div style="color:red;"></div></body>"#
    );
}

#[test]
fn test_module_import_with_exports() {
    let compilation = compile_files(&[
        (
            "main.chtl",
            r#"[Import] @Chtl from "ui"; body { @Element Card from ui; @Element Hidden from ui; }"#,
        ),
        (
            "ui.cmod",
            "[ModuleInfo] name = \"ui\"; version = \"1.0\"; [/ModuleInfo]\n\
             [ModuleContent]\n\
             [Template] @Element Card { div { class: card; } }\n\
             [Template] @Element Hidden { span { } }\n\
             [/ModuleContent]\n\
             [ModuleExport] [Template] @Element Card; [/ModuleExport]",
        ),
    ])
    .unwrap();

    assert_eq!(compilation.output.html, r#"<body><div class="card"></div></body>"#);
    assert!(matches!(
        compilation.diagnostics[..],
        [ref d] if matches!(d.error, CompileError::UnresolvedReference { .. })
    ));
}

#[test]
fn test_resource_imports_route_to_buffers() {
    let compilation = compile_files(&[
        (
            "main.chtl",
            r#"[Import] @Style from "theme.css" as theme;
               [Import] @JavaScript from "boot.js" as boot;
               [Origin] @Style theme;
               body { }
               [Origin] @JavaScript boot;"#,
        ),
        ("theme.css", "body { margin: 0; }"),
        ("boot.js", "start();"),
    ])
    .unwrap();

    assert_eq!(
        compilation.output,
        CompilerOutput {
            html: "<body></body>".into(),
            css: "body { margin: 0; }".into(),
            js: "start();".into(),
        }
    );
}

// =========================================================================
// Determinism
// =========================================================================

#[test]
fn test_compilation_is_deterministic() {
    let files = [
        (
            "main.chtl",
            r#"[Import] @Chtl from "ui.chtl";
               [Template] @Style Base { color: black; margin: 0; padding: 1px; }
               body {
                   div { style { @Style Base; .x { color: red; } &:hover { color: blue; } } }
                   span { style { &:focus { outline: none; } } script { {{&}}->focus(); } }
                   @Element Card from ui;
               }"#,
        ),
        ("ui.chtl", "[Template] @Element Card { section { style { .card { gap: 2px; } } } }"),
    ];

    let first = compile_files(&files).unwrap();
    let second = compile_files(&files).unwrap();
    assert_eq!(first.output, second.output);
    assert!(first.output.css.contains(".x:hover{color:blue;}"));
    assert!(first.output.js.contains("document.getElementById('id0').focus();"));
}
