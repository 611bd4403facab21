//! WASM bindings for the CHTL compiler.
//!
//! Exposes `compile()` and `compileFiles()` to JavaScript via wasm-bindgen.
//! Both return a JS object `{ html, css, js, diagnostics }` or throw on a
//! fatal error (unreadable root, unterminated structure, cyclic import).

use chtl_codegen::{Compilation, Options};
use chtl_resolver::{CompilationSession, MemoryLoader};
use serde::Serialize;
use std::path::Path;
use wasm_bindgen::prelude::*;

/// Name the single-source entry point compiles under.
const ENTRY: &str = "main.chtl";

#[derive(Debug, Serialize)]
struct DiagnosticView {
    severity: String,
    file: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct CompileResult {
    html: String,
    css: String,
    js: String,
    diagnostics: Vec<DiagnosticView>,
}

impl From<Compilation> for CompileResult {
    fn from(compilation: Compilation) -> Self {
        Self {
            diagnostics: compilation
                .diagnostics
                .iter()
                .map(|d| DiagnosticView {
                    severity: d.severity.to_string(),
                    file: d.file.clone(),
                    message: d.error.to_string(),
                })
                .collect(),
            html: compilation.output.html,
            css: compilation.output.css,
            js: compilation.output.js,
        }
    }
}

/// Compile one CHTL document to HTML + CSS + JS.
///
/// Returns `{ html, css, js, diagnostics: [{ severity, file, message }] }`.
#[wasm_bindgen]
pub fn compile(source: &str, pretty: Option<bool>) -> Result<JsValue, JsError> {
    let loader = MemoryLoader::new().with_file(ENTRY, source);
    let result = compile_with(loader, ENTRY, pretty.unwrap_or(false))?;
    serde_wasm_bindgen::to_value(&result).map_err(|e| JsError::new(&e.to_string()))
}

/// Compile `entry` from a `{ path: source }` object, so imports resolve
/// against the other files.
#[wasm_bindgen(js_name = compileFiles)]
pub fn compile_files(
    files: &js_sys::Object,
    entry: &str,
    pretty: Option<bool>,
) -> Result<JsValue, JsError> {
    let mut loader = MemoryLoader::new();
    for pair in js_sys::Object::entries(files).iter() {
        let pair = js_sys::Array::from(&pair);
        let (Some(path), Some(source)) = (pair.get(0).as_string(), pair.get(1).as_string()) else {
            return Err(JsError::new("files must map path strings to source strings"));
        };
        loader.insert(path, source);
    }

    let result = compile_with(loader, entry, pretty.unwrap_or(false))?;
    serde_wasm_bindgen::to_value(&result).map_err(|e| JsError::new(&e.to_string()))
}

fn compile_with(loader: MemoryLoader, entry: &str, pretty: bool) -> Result<CompileResult, JsError> {
    native_compile(loader, entry, pretty).map_err(|e| JsError::new(&e))
}

fn native_compile(loader: MemoryLoader, entry: &str, pretty: bool) -> Result<CompileResult, String> {
    let mut session = CompilationSession::new(loader);
    chtl_codegen::compile(&mut session, Path::new(entry), Options { pretty })
        .map(CompileResult::from)
        .map_err(|e| e.to_string())
}

/// Get the compiler version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
