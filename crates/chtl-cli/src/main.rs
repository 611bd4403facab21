use anyhow::Context;
use chtl_codegen::{Compilation, CompilerOutput, Options};
use chtl_resolver::{CompilationSession, FsLoader};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "chtl")]
#[command(about = "CHTL hypertext templating language compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .chtl file to HTML + CSS + JS
    Compile {
        /// Input .chtl file
        input: PathBuf,

        /// Output directory (defaults to the input's directory)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Turn on DEBUG_MODE and debug logging
        #[arg(long)]
        debug: bool,

        /// Indent the generated HTML and CSS
        #[arg(long)]
        pretty: bool,
    },

    /// Check a .chtl file for errors without writing output
    Check {
        /// Input .chtl file
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let debug = matches!(cli.command, Command::Compile { debug: true, .. });
    init_tracing(debug);

    match cli.command {
        Command::Compile {
            input,
            out,
            debug,
            pretty,
        } => cmd_compile(&input, out.as_deref(), debug, pretty),
        Command::Check { input } => cmd_check(&input),
    }
}

/// `RUST_LOG` wins; otherwise `warn`, or `debug` with `--debug`.
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(input: &Path, debug: bool, pretty: bool) -> anyhow::Result<Compilation> {
    let debug_flag = debug;
    tracing::debug!(input = %input.display(), debug = debug_flag, pretty, "compiling");
    let mut session = CompilationSession::new(FsLoader);
    if debug {
        session.force_debug();
    }
    chtl_codegen::compile(&mut session, input, Options { pretty })
        .with_context(|| format!("failed to compile {}", input.display()))
}

/// Print every diagnostic to stderr; the exit code reflects errors only.
fn report(compilation: &Compilation) -> ExitCode {
    for diagnostic in &compilation.diagnostics {
        eprintln!("{diagnostic}");
    }
    if compilation.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn cmd_compile(
    input: &Path,
    out: Option<&Path>,
    debug: bool,
    pretty: bool,
) -> anyhow::Result<ExitCode> {
    let compilation = run(input, debug, pretty)?;

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .context("input path has no file name")?;
    let dir = match out {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    let written = write_outputs(&dir, stem, &compilation.output)?;
    for path in &written {
        eprintln!("Built: {}", path.display());
    }

    Ok(report(&compilation))
}

fn cmd_check(input: &Path) -> anyhow::Result<ExitCode> {
    let compilation = run(input, false, false)?;
    let code = report(&compilation);
    if code == ExitCode::SUCCESS {
        eprintln!("OK: {}", input.display());
    }
    Ok(code)
}

/// Write `{stem}.html` as a standalone document, plus `{stem}.css` and
/// `{stem}.js` when those outputs are non-empty.
fn write_outputs(dir: &Path, stem: &str, output: &CompilerOutput) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut files = vec![(dir.join(format!("{stem}.html")), standalone_document(stem, output))];
    if !output.css.is_empty() {
        files.push((dir.join(format!("{stem}.css")), output.css.clone()));
    }
    if !output.js.is_empty() {
        files.push((dir.join(format!("{stem}.js")), output.js.clone()));
    }

    let mut written = Vec::with_capacity(files.len());
    for (path, content) in files {
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Wrap a fragment in a full page. Output that already is a document is
/// kept as is, with the stylesheet and script still embedded.
fn standalone_document(title: &str, output: &CompilerOutput) -> String {
    let style = if output.css.is_empty() {
        String::new()
    } else {
        format!("<style>\n{}\n</style>\n", output.css.trim_end())
    };
    let script = if output.js.is_empty() {
        String::new()
    } else {
        format!("<script>\n{}\n</script>\n", output.js.trim_end())
    };

    if output.html.trim_start().starts_with("<html") {
        let mut html = output.html.clone();
        match html.find("</head>") {
            Some(at) => html.insert_str(at, &style),
            None => html.insert_str(0, &style),
        }
        match html.rfind("</body>") {
            Some(at) => html.insert_str(at, &script),
            None => html.push_str(&script),
        }
        return format!("<!DOCTYPE html>\n{html}");
    }

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"UTF-8\">\n");
    html.push_str(&format!("  <title>{title}</title>\n"));
    html.push_str(&style);
    html.push_str("</head>\n<body>\n");
    html.push_str(&output.html);
    if !output.html.ends_with('\n') {
        html.push('\n');
    }
    html.push_str(&script);
    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(html: &str, css: &str, js: &str) -> CompilerOutput {
        CompilerOutput {
            html: html.into(),
            css: css.into(),
            js: js.into(),
        }
    }

    // =========================================================================
    // standalone_document
    // =========================================================================

    #[test]
    fn test_fragment_is_wrapped() {
        let doc = standalone_document("index", &output("<p>Hi</p>", "p{color:red;}", "go();"));
        assert_eq!(
            doc,
            "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"UTF-8\">\n  <title>index</title>\n\
             <style>\np{color:red;}\n</style>\n</head>\n<body>\n<p>Hi</p>\n\
             <script>\ngo();\n</script>\n</body>\n</html>\n"
        );
    }

    #[test]
    fn test_full_document_is_kept() {
        let doc = standalone_document(
            "index",
            &output("<html><head></head><body><p></p></body></html>", "p{margin:0;}", ""),
        );
        assert_eq!(
            doc,
            "<!DOCTYPE html>\n<html><head><style>\np{margin:0;}\n</style>\n</head><body><p></p></body></html>"
        );
    }

    // =========================================================================
    // End to end
    // =========================================================================

    #[test]
    fn test_compile_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.chtl");
        std::fs::write(&input, "[Import] @Chtl from \"parts.chtl\"; body { @Element Card from parts; }").unwrap();
        std::fs::write(
            dir.path().join("parts.chtl"),
            "[Template] @Element Card { div { style { .card { color: red; } } } }",
        )
        .unwrap();

        let out = dir.path().join("dist");
        let code = cmd_compile(&input, Some(&out), false, false).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let html = std::fs::read_to_string(out.join("page.html")).unwrap();
        assert!(html.contains(r#"<body><div class="card"></div></body>"#));
        let css = std::fs::read_to_string(out.join("page.css")).unwrap();
        assert_eq!(css, ".card{color:red;}");
        assert!(!out.join("page.js").exists());
    }

    #[test]
    fn test_errors_fail_the_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.chtl");
        std::fs::write(&input, "body { @Element Missing; }").unwrap();

        assert_eq!(cmd_check(&input).unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_check(&dir.path().join("nope.chtl")).unwrap_err();
        assert!(err.to_string().contains("nope.chtl"));
    }
}
