//! Compilation session: everything one compilation owns.

use crate::expand::Expander;
use crate::loader::Loader;
use crate::plugin::{PluginRegistry, RuleProvider, SyntaxRules};
use crate::table::DefinitionTable;
use crate::{CompileError, Diagnostic};
use chtl_parser::ast::NodeKind;
use chtl_parser::{Configuration, Parser, Program};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// State of a single compilation: configuration, diagnostics, the definition
/// table and the import bookkeeping. Sessions share nothing; run one per
/// compilation.
pub struct CompilationSession {
    pub(crate) config: Configuration,
    pub(crate) table: DefinitionTable,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) loader: Box<dyn Loader>,
    pub(crate) plugins: PluginRegistry,
    pub(crate) rules: SyntaxRules,
    /// Canonical paths of the units currently being loaded, outermost first.
    pub(crate) visiting: Vec<PathBuf>,
    /// `(canonical path, target namespace)` pairs already merged.
    pub(crate) completed: HashSet<(PathBuf, String)>,
    root: String,
    force_debug: bool,
}

impl CompilationSession {
    pub fn new(loader: impl Loader + 'static) -> Self {
        Self {
            config: Configuration::default(),
            table: DefinitionTable::new(),
            diagnostics: Vec::new(),
            loader: Box::new(loader),
            plugins: PluginRegistry::default(),
            rules: SyntaxRules::new(),
            visiting: Vec::new(),
            completed: HashSet::new(),
            root: String::new(),
            force_debug: false,
        }
    }

    /// Make a rule provider available to `[Import] @CJmod`.
    pub fn register_provider(&mut self, provider: impl RuleProvider + 'static) {
        self.plugins.register(Box::new(provider));
    }

    /// Turn `DEBUG_MODE` on regardless of the root configuration.
    pub fn force_debug(&mut self) {
        self.force_debug = true;
        self.config.debug_mode = true;
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn table(&self) -> &DefinitionTable {
        &self.table
    }

    pub fn rules(&self) -> &SyntaxRules {
        &self.rules
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Display name of the root unit.
    pub fn root_file(&self) -> &str {
        &self.root
    }

    /// Record a problem that does not stop compilation.
    pub fn report(&mut self, error: CompileError, file: &str) {
        tracing::warn!(file, severity = %error.severity(), "{error}");
        self.diagnostics.push(Diagnostic::new(error, file));
    }

    /// Load and parse the root unit, apply its configuration and register
    /// every definition reachable through its imports.
    ///
    /// Fails for an unreadable root, an unterminated structure in the root
    /// and a cyclic import anywhere in the graph. Everything else is
    /// recorded as a diagnostic.
    pub fn load_root(&mut self, path: &Path) -> Result<Program, CompileError> {
        let text = self
            .loader
            .read(path)
            .map_err(|e| CompileError::ImportNotFound {
                path: e.path.display().to_string(),
            })?;
        self.root = path.display().to_string();
        let root = self.root.clone();

        let output = Parser::parse(&text);
        tracing::debug!(file = %root, errors = output.errors.len(), "parsed root unit");
        let fatal = output.fatal().cloned();
        for error in output.errors.iter().filter(|e| !e.is_fatal()) {
            self.report(CompileError::Syntax(error.clone()), &root);
        }
        if let Some(fatal) = fatal {
            return Err(CompileError::Syntax(fatal));
        }
        let program = output.program;

        self.apply_configuration(&program, &root);

        let canonical = self.loader.canonical(path);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.visiting.push(canonical);
        let collected = self.collect(&program, &program.items, &root, &dir, "", None);
        self.visiting.pop();
        collected?;

        Ok(program)
    }

    /// Expand every use in `program` into plain markup.
    pub fn resolve(&mut self, program: &Program) -> Program {
        let file = self.root.clone();
        Expander::new(self, file).run(program)
    }

    /// The first unnamed `[Configuration]` block of the root unit wins.
    fn apply_configuration(&mut self, program: &Program, file: &str) {
        let mut applied = false;
        for id in &program.items {
            let NodeKind::Configuration(block) = program.kind(*id) else {
                continue;
            };
            if block.name.is_some() {
                tracing::debug!(name = ?block.name, "skipping named configuration");
                continue;
            }
            if applied {
                self.report(
                    CompileError::Configuration("only the first [Configuration] block is applied".into()),
                    file,
                );
                continue;
            }

            let (config, warnings) = Configuration::from_block(block);
            self.config = config;
            applied = true;
            for warning in warnings {
                self.report(CompileError::Configuration(warning), file);
            }
        }

        if self.force_debug {
            self.config.debug_mode = true;
        }
        tracing::debug!(config = ?self.config, "configuration applied");
    }
}
