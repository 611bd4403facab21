//! Definition collection and import resolution.
//!
//! Walks a parsed unit, registers its definitions and named origins in the
//! session table and loads every `[Import]` it names, recursively. Imported
//! content is copied into the table; nothing keeps a reference to the unit
//! it came from.

use crate::module::{self, ModuleInfo};
use crate::session::CompilationSession;
use crate::table::{qualify, DefKey, NamedOrigin, StoredBody, StoredDefinition};
use crate::{CompileError, Fragment, Location};
use chtl_parser::ast::{
    DefKind, Definition, DefinitionBody, Import, ImportKind, NodeId, NodeKind, Origin, Subtype,
};
use chtl_parser::{Parser, Program};
use std::path::{Path, PathBuf};

/// A unit read through the loader.
struct LoadedUnit {
    path: PathBuf,
    canonical: PathBuf,
    program: Program,
    info: Option<ModuleInfo>,
}

impl CompilationSession {
    /// Register the definitions among `items` under `namespace` and follow
    /// their imports. Only a cyclic import is returned as an error.
    pub(crate) fn collect(
        &mut self,
        program: &Program,
        items: &[NodeId],
        file: &str,
        dir: &Path,
        namespace: &str,
        exports: Option<&ModuleInfo>,
    ) -> Result<(), CompileError> {
        for id in items {
            match program.kind(*id) {
                NodeKind::Definition(def) => {
                    if exports.is_some_and(|info| !info.exports(&def.name)) {
                        tracing::debug!(name = %def.name, "skipping unexported definition");
                        continue;
                    }
                    self.store_definition(program, *id, def, namespace, &def.name, file);
                }
                NodeKind::Namespace(ns) => {
                    let nested = qualify(namespace, &ns.name);
                    self.collect(program, &ns.items, file, dir, &nested, exports)?;
                }
                NodeKind::Import(import) => {
                    let location = location(program, *id, file);
                    self.import(import, location, dir, namespace)?;
                }
                NodeKind::Configuration(_) if self.visiting.len() > 1 => {
                    self.report(
                        CompileError::Configuration(
                            "[Configuration] in an imported unit is ignored".into(),
                        ),
                        file,
                    );
                }
                NodeKind::Origin(origin) => self.store_origin(program, *id, origin, namespace, file),
                NodeKind::Element(el) => self.collect_origins(program, &el.children, namespace, file),
                _ => {}
            }
        }
        Ok(())
    }

    fn store_definition(
        &mut self,
        program: &Program,
        id: NodeId,
        def: &Definition,
        namespace: &str,
        name: &str,
        file: &str,
    ) {
        let body = match &def.body {
            DefinitionBody::Style(items) => StoredBody::Style(items.clone()),
            DefinitionBody::Element(ids) => {
                StoredBody::Element(Fragment::from_nodes(&program.arena, ids))
            }
            DefinitionBody::Var(properties) => StoredBody::Var(properties.clone()),
        };
        let stored = StoredDefinition {
            kind: def.kind,
            key: DefKey::new(namespace, def.subtype, name),
            home: namespace.to_string(),
            body,
            location: location(program, id, file),
        };
        if let Err(err) = self.table.insert(stored) {
            self.report(err, file);
        }
    }

    /// Named `[Origin]` blocks with a body define the name.
    fn store_origin(
        &mut self,
        program: &Program,
        id: NodeId,
        origin: &Origin,
        namespace: &str,
        file: &str,
    ) {
        let (Some(name), Some(content)) = (&origin.name, &origin.content) else {
            return;
        };
        let named = NamedOrigin {
            kind: origin.kind.clone(),
            content: content.clone(),
            location: location(program, id, file),
        };
        if let Err(err) = self.table.insert_origin(namespace, name, named) {
            self.report(err, file);
        }
    }

    fn collect_origins(&mut self, program: &Program, ids: &[NodeId], namespace: &str, file: &str) {
        for id in ids {
            match program.kind(*id) {
                NodeKind::Origin(origin) => self.store_origin(program, *id, origin, namespace, file),
                NodeKind::Element(el) => self.collect_origins(program, &el.children, namespace, file),
                _ => {}
            }
        }
    }

    fn import(
        &mut self,
        import: &Import,
        at: Location,
        dir: &Path,
        namespace: &str,
    ) -> Result<(), CompileError> {
        match &import.kind {
            ImportKind::CJmod => {
                let name = stem(&import.path);
                let Some(provider) = self.plugins.get(&name) else {
                    self.report(CompileError::ImportNotFound { path: import.path.clone() }, &at.file);
                    return Ok(());
                };
                match provider.register(&mut self.rules) {
                    Ok(()) => tracing::debug!(provider = %name, "activated rule provider"),
                    Err(err) => self.report(err, &at.file),
                }
                Ok(())
            }

            ImportKind::Resource(kind) => {
                let Some((path, content)) = self.read_import(dir, &import.path, &at.file) else {
                    return Ok(());
                };
                let name = import.alias.clone().unwrap_or_else(|| stem(&import.path));
                let origin = NamedOrigin {
                    kind: kind.clone(),
                    content,
                    location: at.clone(),
                };
                tracing::debug!(path = %path.display(), %kind, name = %name, "imported resource");
                if let Err(err) = self.table.insert_origin(namespace, &name, origin) {
                    self.report(err, &at.file);
                }
                Ok(())
            }

            ImportKind::Chtl => {
                let Some(unit) = self.load_unit(dir, &import.path, &at.file) else {
                    return Ok(());
                };
                let target = match (&import.alias, &unit.info) {
                    (Some(alias), _) => qualify(namespace, alias),
                    (None, _) if self.config.disable_default_namespace => namespace.to_string(),
                    (None, Some(info)) if !info.name.is_empty() => qualify(namespace, &info.name),
                    (None, _) => qualify(namespace, &stem(&import.path)),
                };
                self.merge_unit(unit, &target)
            }

            ImportKind::Definition {
                kind,
                subtype,
                name,
            } => {
                let Some(mut unit) = self.load_unit(dir, &import.path, &at.file) else {
                    return Ok(());
                };
                let exported = unit.info.as_ref().is_none_or(|info| info.exports(name));
                let inner = exported
                    .then(|| find_definition(&unit.program, &unit.program.items, "", *kind, *subtype, name))
                    .flatten();
                let Some(inner) = inner else {
                    self.report(
                        CompileError::UnresolvedReference {
                            reference: format!("{kind} {subtype} {name} in {}", import.path),
                        },
                        &at.file,
                    );
                    return Ok(());
                };

                // The whole unit is staged under a name no source can spell, so
                // the definition keeps resolving what it references.
                let staging = staging_namespace(&unit.canonical);
                unit.info = None;
                self.merge_unit(unit, &staging)?;

                let home = if inner.is_empty() {
                    staging
                } else {
                    qualify(&staging, &inner)
                };
                let Some(staged) = self.table.get(&DefKey::new(home, *subtype, name.as_str())) else {
                    return Ok(());
                };
                let local = import.alias.as_deref().unwrap_or(name);
                let imported = StoredDefinition {
                    key: DefKey::new(namespace, *subtype, local),
                    ..staged.clone()
                };
                if let Err(err) = self.table.insert(imported) {
                    self.report(err, &at.file);
                }
                Ok(())
            }
        }
    }

    /// Register every definition of `unit` under `target`, following its own
    /// imports. A unit already merged into `target` is skipped; a unit that
    /// is still being loaded closes a cycle.
    fn merge_unit(&mut self, unit: LoadedUnit, target: &str) -> Result<(), CompileError> {
        if let Some(start) = self.visiting.iter().position(|p| *p == unit.canonical) {
            let chain = self.visiting[start..]
                .iter()
                .chain(std::iter::once(&unit.canonical))
                .map(|p| p.display().to_string())
                .collect();
            return Err(CompileError::CyclicImport { chain });
        }

        if !self
            .completed
            .insert((unit.canonical.clone(), target.to_string()))
        {
            tracing::debug!(path = %unit.path.display(), namespace = target, "import already merged");
            return Ok(());
        }

        tracing::debug!(path = %unit.path.display(), namespace = target, "resolving import");
        let file = unit.path.display().to_string();
        let dir = unit.path.parent().map(Path::to_path_buf).unwrap_or_default();

        self.visiting.push(unit.canonical.clone());
        let result = self.collect(
            &unit.program,
            &unit.program.items,
            &file,
            &dir,
            target,
            unit.info.as_ref(),
        );
        self.visiting.pop();
        result
    }

    /// Read and parse an imported unit. Module files contribute their
    /// `[ModuleContent]` section.
    fn load_unit(&mut self, dir: &Path, path: &str, importer: &str) -> Option<LoadedUnit> {
        let (path, text) = self.read_import(dir, path, importer)?;
        let file = path.display().to_string();

        let (source, info) = if module::is_module(&text) {
            let module = module::parse(&text);
            tracing::debug!(module = %module.info.name, version = %module.info.version, "loaded module");
            (module.content, Some(module.info))
        } else {
            (text, None)
        };

        let output = Parser::parse(&source);
        for error in output.errors {
            self.report(CompileError::Syntax(error), &file);
        }

        Some(LoadedUnit {
            canonical: self.loader.canonical(&path),
            path,
            program: output.program,
            info,
        })
    }

    /// Resolve `path` against the importer's directory. A path without an
    /// extension tries `.cmod`, then `.chtl`.
    fn read_import(&mut self, dir: &Path, path: &str, importer: &str) -> Option<(PathBuf, String)> {
        let base = dir.join(path);
        let candidates = if base.extension().is_some() {
            vec![base]
        } else {
            vec![base.with_extension("cmod"), base.with_extension("chtl")]
        };

        for candidate in candidates {
            if let Ok(text) = self.loader.read(&candidate) {
                return Some((candidate, text));
            }
        }

        self.report(
            CompileError::ImportNotFound {
                path: path.to_string(),
            },
            importer,
        );
        None
    }
}

fn location(program: &Program, id: NodeId, file: &str) -> Location {
    let span = program.node(id).span;
    Location {
        file: file.to_string(),
        line: span.line,
        column: span.column,
    }
}

/// File name without directories or extension: `lib/ui.chtl` → `ui`.
fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Namespace, relative to the unit, of the first matching definition.
fn find_definition(
    program: &Program,
    items: &[NodeId],
    namespace: &str,
    kind: DefKind,
    subtype: Subtype,
    name: &str,
) -> Option<String> {
    items.iter().find_map(|id| match program.kind(*id) {
        NodeKind::Definition(def) if def.kind == kind && def.subtype == subtype && def.name == name => {
            Some(namespace.to_string())
        }
        NodeKind::Namespace(ns) => {
            let nested = qualify(namespace, &ns.name);
            find_definition(program, &ns.items, &nested, kind, subtype, name)
        }
        _ => None,
    })
}

/// Hidden namespace a precisely imported unit is merged into.
fn staging_namespace(canonical: &Path) -> String {
    format!("<{}>", canonical.display())
}

#[cfg(test)]
mod tests {
    use crate::loader::MemoryLoader;
    use crate::plugin::StaticRules;
    use crate::session::CompilationSession;
    use crate::table::DefKey;
    use crate::CompileError;
    use chtl_parser::ast::{OriginKind, Subtype};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn session(files: &[(&str, &str)]) -> CompilationSession {
        let mut loader = MemoryLoader::new();
        for (path, content) in files {
            loader.insert(*path, *content);
        }
        CompilationSession::new(loader)
    }

    fn load(files: &[(&str, &str)]) -> CompilationSession {
        let mut s = session(files);
        s.load_root(Path::new("main.chtl")).unwrap();
        s
    }

    fn has(s: &CompilationSession, namespace: &str, subtype: Subtype, name: &str) -> bool {
        s.table().contains(&DefKey::new(namespace, subtype, name))
    }

    fn errors(s: &CompilationSession) -> Vec<&CompileError> {
        s.diagnostics().iter().map(|d| &d.error).collect()
    }

    // =========================================================================
    // Local definitions
    // =========================================================================

    #[test]
    fn test_registers_top_level_and_namespaced_definitions() {
        let s = load(&[(
            "main.chtl",
            "[Template] @Style A { color: red; } [Namespace] ui { [Namespace] forms { [Custom] @Element B { div { } } } }",
        )]);
        assert!(has(&s, "", Subtype::Style, "A"));
        assert!(has(&s, "ui::forms", Subtype::Element, "B"));
    }

    #[test]
    fn test_duplicate_definition_is_reported() {
        let s = load(&[(
            "main.chtl",
            "[Template] @Style A { color: red; }\n[Template] @Style A { color: blue; }",
        )]);
        match errors(&s).as_slice() {
            [CompileError::DuplicateDefinition { first, second, .. }] => {
                assert_eq!(first.line, 1);
                assert_eq!(second.line, 2);
            }
            other => panic!("Expected one duplicate, got {other:?}"),
        }
    }

    // =========================================================================
    // @Chtl imports
    // =========================================================================

    #[test]
    fn test_import_lands_in_file_stem_namespace() {
        let s = load(&[
            ("main.chtl", "[Import] @Chtl from \"lib/ui.chtl\";"),
            ("lib/ui.chtl", "[Template] @Style Card { color: red; }"),
        ]);
        assert!(has(&s, "ui", Subtype::Style, "Card"));
        assert!(s.diagnostics().is_empty());
    }

    #[test]
    fn test_import_alias_names_namespace() {
        let s = load(&[
            ("main.chtl", "[Import] @Chtl from \"ui.chtl\" as kit;"),
            ("ui.chtl", "[Template] @Style Card { color: red; }"),
        ]);
        assert!(has(&s, "kit", Subtype::Style, "Card"));
    }

    #[test]
    fn test_disable_default_namespace_merges_into_current() {
        let s = load(&[
            (
                "main.chtl",
                "[Configuration] { DISABLE_DEFAULT_NAMESPACE = true; }\n[Import] @Chtl from \"ui.chtl\";",
            ),
            ("ui.chtl", "[Template] @Style Card { color: red; }"),
        ]);
        assert!(has(&s, "", Subtype::Style, "Card"));
    }

    #[test]
    fn test_nested_import_paths_are_relative_to_importer() {
        let s = load(&[
            ("main.chtl", "[Import] @Chtl from \"lib/a.chtl\";"),
            ("lib/a.chtl", "[Import] @Chtl from \"b.chtl\";"),
            ("lib/b.chtl", "[Template] @Style B { color: red; }"),
        ]);
        assert!(has(&s, "a::b", Subtype::Style, "B"));
    }

    #[test]
    fn test_extensionless_path_prefers_module() {
        let s = load(&[
            ("main.chtl", "[Import] @Chtl from \"ui\";"),
            (
                "ui.cmod",
                "[ModuleInfo] name = widgets; [/ModuleInfo]\n[ModuleContent]\n[Template] @Style Card { color: red; }\n[Template] @Style Hidden { color: red; }\n[/ModuleContent]\n[ModuleExport] [Template] @Style Card; [/ModuleExport]",
            ),
            ("ui.chtl", "[Template] @Style Other { color: red; }"),
        ]);
        assert!(has(&s, "widgets", Subtype::Style, "Card"));
        assert!(!has(&s, "widgets", Subtype::Style, "Hidden"));
        assert!(!has(&s, "ui", Subtype::Style, "Other"));
    }

    #[test]
    fn test_missing_import_is_reported() {
        let s = load(&[("main.chtl", "[Import] @Chtl from \"nope.chtl\"; div { }")]);
        assert_eq!(
            errors(&s),
            vec![&CompileError::ImportNotFound {
                path: "nope.chtl".into()
            }]
        );
    }

    #[test]
    fn test_empty_import_is_not_an_error() {
        let s = load(&[
            ("main.chtl", "[Import] @Chtl from \"empty.chtl\";"),
            ("empty.chtl", ""),
        ]);
        assert!(s.diagnostics().is_empty());
    }

    #[test]
    fn test_cyclic_import_names_the_chain() {
        let mut s = session(&[
            ("main.chtl", "[Import] @Chtl from \"b.chtl\";"),
            ("b.chtl", "[Import] @Chtl from \"main.chtl\";"),
        ]);
        let err = s.load_root(Path::new("main.chtl")).unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicImport {
                chain: vec!["main.chtl".into(), "b.chtl".into(), "main.chtl".into()],
            }
        );
    }

    #[test]
    fn test_diamond_import_is_merged_once() {
        let s = load(&[
            (
                "main.chtl",
                "[Import] @Chtl from \"a.chtl\" as shared; [Import] @Chtl from \"b.chtl\" as shared;",
            ),
            ("a.chtl", "[Import] @Chtl from \"c.chtl\";"),
            ("b.chtl", "[Import] @Chtl from \"c.chtl\";"),
            ("c.chtl", "[Template] @Style C { color: red; }"),
        ]);
        assert!(has(&s, "shared::c", Subtype::Style, "C"));
        assert!(s.diagnostics().is_empty(), "{:?}", s.diagnostics());
    }

    #[test]
    fn test_configuration_in_import_is_ignored() {
        let s = load(&[
            ("main.chtl", "[Import] @Chtl from \"ui.chtl\";"),
            ("ui.chtl", "[Configuration] { INDEX_INITIAL_COUNT = 5; }"),
        ]);
        assert_eq!(s.config().index_initial_count, 0);
        assert!(matches!(errors(&s).as_slice(), [CompileError::Configuration(_)]));
    }

    // =========================================================================
    // Precise and resource imports
    // =========================================================================

    #[test]
    fn test_precise_import_with_alias() {
        let s = load(&[
            ("main.chtl", "[Import] [Custom] @Element Box from \"ui.chtl\" as Panel;"),
            (
                "ui.chtl",
                "[Custom] @Element Box { div { } } [Custom] @Element Other { p { } }",
            ),
        ]);
        assert!(has(&s, "", Subtype::Element, "Panel"));
        assert!(!has(&s, "", Subtype::Element, "Other"));
        assert!(!has(&s, "ui", Subtype::Element, "Box"));
    }

    #[test]
    fn test_precise_import_keeps_unit_dependencies() {
        let s = load(&[
            ("main.chtl", "[Import] [Custom] @Element Box from \"lib\";"),
            (
                "lib.chtl",
                "[Import] @Chtl from \"theme.chtl\";\n[Template] @Style Inner { color: red; }\n[Custom] @Element Box { div { style { @Style Inner; @Style Accent from theme; } } }",
            ),
            ("theme.chtl", "[Template] @Style Accent { margin: 0; }"),
        ]);
        assert!(s.diagnostics().is_empty(), "{:?}", s.diagnostics());

        let imported = s.table().get(&DefKey::new("", Subtype::Element, "Box")).unwrap();
        assert_eq!(imported.home, "<lib.chtl>");
        assert!(has(&s, "<lib.chtl>", Subtype::Style, "Inner"));
        assert!(has(&s, "<lib.chtl>::theme", Subtype::Style, "Accent"));
        assert!(!has(&s, "", Subtype::Style, "Inner"));
    }

    #[test]
    fn test_precise_import_cycle_is_detected() {
        let mut s = session(&[
            ("main.chtl", "[Import] [Template] @Style A from \"lib.chtl\"; [Template] @Style B { color: red; }"),
            ("lib.chtl", "[Import] [Template] @Style B from \"main.chtl\"; [Template] @Style A { color: blue; }"),
        ]);
        let err = s.load_root(Path::new("main.chtl")).unwrap_err();
        assert!(matches!(err, CompileError::CyclicImport { .. }));
    }

    #[test]
    fn test_precise_import_of_missing_definition() {
        let s = load(&[
            ("main.chtl", "[Import] [Template] @Style Nope from \"ui.chtl\";"),
            ("ui.chtl", "[Template] @Style Card { color: red; }"),
        ]);
        assert!(matches!(
            errors(&s).as_slice(),
            [CompileError::UnresolvedReference { .. }]
        ));
    }

    #[test]
    fn test_resource_import_registers_named_origin() {
        let s = load(&[
            ("main.chtl", "[Import] @Html from \"banner.html\" as banner;"),
            ("banner.html", "<b>hi</b>"),
        ]);
        let origin = s
            .table()
            .lookup_origin(&OriginKind::Html, "banner", "")
            .unwrap();
        assert_eq!(origin.content, "<b>hi</b>");
    }

    #[test]
    fn test_named_origin_inside_element_is_registered() {
        let s = load(&[("main.chtl", "body { [Origin] @Html note { <i>x</i> } }")]);
        assert!(s.table().lookup_origin(&OriginKind::Html, "note", "").is_some());
    }

    // =========================================================================
    // @CJmod
    // =========================================================================

    #[test]
    fn test_cjmod_activates_registered_provider() {
        let mut s = session(&[("main.chtl", "[Import] @CJmod from \"math\";")]);
        s.register_provider(StaticRules::new("math").rule("**", "$! ** $!", "Math.pow($0, $1)"));
        s.load_root(Path::new("main.chtl")).unwrap();
        assert_eq!(s.rules().len(), 1);
    }

    #[test]
    fn test_unknown_cjmod_is_not_found() {
        let s = load(&[("main.chtl", "[Import] @CJmod from \"nope.cjmod\";")]);
        assert!(matches!(
            errors(&s).as_slice(),
            [CompileError::ImportNotFound { .. }]
        ));
    }
}
