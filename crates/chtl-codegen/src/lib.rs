//! CHTL Code Generator
//!
//! Turns a resolved CHTL program into three outputs: HTML, CSS and
//! JavaScript. HTML generation hoists style rules into the stylesheet and
//! queues script blocks; JS generation rewrites the queued scripts.
//!
//! ```text
//! root path → CompilationSession → resolved Program → generate() → CompilerOutput { html, css, js }
//! ```

pub mod css;
pub mod html;
pub mod js;

use chtl_parser::{Configuration, Program};
use chtl_resolver::{CompilationSession, CompileError, Diagnostic, MemoryLoader, SyntaxRules};
use serde::Serialize;
use std::path::Path;

/// The compiled output of a CHTL document.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CompilerOutput {
    pub html: String,
    pub css: String,
    pub js: String,
}

/// Output plus every non-fatal problem met on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub output: CompilerOutput,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    /// Indent the HTML and put every CSS declaration on its own line.
    pub pretty: bool,
}

/// Shared context between the generators.
/// HTML generation fills the stylesheet and the script queue; CSS and JS
/// generation read them.
pub struct CompilationContext<'a> {
    pub config: &'a Configuration,
    pub options: Options,
    pub stylesheet: css::Stylesheet,
    pub scripts: Vec<js::ScriptChunk>,
    next_class: i64,
    next_id: i64,
}

impl<'a> CompilationContext<'a> {
    pub fn new(config: &'a Configuration, options: Options) -> Self {
        Self {
            config,
            options,
            stylesheet: css::Stylesheet::new(),
            scripts: Vec::new(),
            next_class: config.index_initial_count,
            next_id: config.index_initial_count,
        }
    }

    pub fn assign_class(&mut self) -> String {
        let class = format!("class{}", self.next_class);
        self.next_class = self.next_class.saturating_add(1);
        class
    }

    pub fn assign_id(&mut self) -> String {
        let id = format!("id{}", self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn indent(&self, depth: usize) -> String {
        if self.options.pretty {
            "  ".repeat(depth)
        } else {
            String::new()
        }
    }

    fn newline(&self, out: &mut String) {
        if self.options.pretty {
            out.push('\n');
        }
    }
}

/// Generate HTML + CSS + JS from a resolved program.
///
/// Plugin rules that failed to bind come back as errors; the output is
/// complete either way.
pub fn generate(
    program: &Program,
    config: &Configuration,
    rules: &SyntaxRules,
    options: Options,
) -> (CompilerOutput, Vec<CompileError>) {
    let mut ctx = CompilationContext::new(config, options);

    let html = html::generate(program, &mut ctx);
    let css = ctx.stylesheet.render(options.pretty);
    let (js, errors) = js::generate(&ctx.scripts, rules);

    (CompilerOutput { html, css, js }, errors)
}

/// Compile the unit at `root` and everything it imports.
///
/// Fails when the root cannot be read or parsed and on a cyclic import.
/// Every other problem is a diagnostic of the returned [`Compilation`].
pub fn compile(
    session: &mut CompilationSession,
    root: &Path,
    options: Options,
) -> Result<Compilation, CompileError> {
    let program = session.load_root(root)?;
    let resolved = session.resolve(&program);

    let (output, errors) = generate(&resolved, session.config(), session.rules(), options);
    let file = session.root_file().to_string();
    for error in errors {
        session.report(error, &file);
    }
    tracing::debug!(
        html = output.html.len(),
        css = output.css.len(),
        js = output.js.len(),
        "generated output"
    );

    Ok(Compilation {
        output,
        diagnostics: session.diagnostics().to_vec(),
    })
}

/// Compile a single in-memory document with no imports of its own.
pub fn compile_source(source: &str, options: Options) -> Result<Compilation, CompileError> {
    let loader = MemoryLoader::new().with_file("main.chtl", source);
    let mut session = CompilationSession::new(loader);
    compile(&mut session, Path::new("main.chtl"), options)
}
