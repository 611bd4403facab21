//! Use expansion.
//!
//! Rewrites a parsed program into plain markup: elements, text, comments,
//! style and script blocks and raw origin content. `@Element` uses become
//! their specialized content, `@Style` uses are flattened into properties,
//! `Group(key)` variable references are substituted and `except` constraints
//! are enforced along the way.
//!
//! Element definitions are composed on demand. A use inside a definition
//! body inherits the used content at that position; `delete`, `insert` and
//! modify operations that follow specialize what has been composed so far.

use crate::constraint::{self, Subject};
use crate::session::CompilationSession;
use crate::specialize::{Fragment, Specializer};
use crate::table::{qualify, DefKey, StoredBody, StoredDefinition};
use crate::CompileError;
use chtl_lexer::Span;
use chtl_parser::ast::{
    Attribute, Constraint, Element, Node, NodeId, NodeKind, Origin, Property, Reference,
    StyleBlock, StyleItem, StyleRule, StyleUse, Subtype, Use,
};
use chtl_parser::Program;
use indexmap::IndexMap;
use la_arena::Arena;
use std::collections::HashMap;

/// Property name to value, in merge order. `None` is a valueless property
/// still waiting for a value.
type Properties = IndexMap<String, Option<String>>;

pub(crate) struct Expander<'s> {
    session: &'s mut CompilationSession,
    file: String,
    out: Arena<Node>,
    /// Definitions currently being composed or expanded, innermost last.
    active: Vec<DefKey>,
    /// Relocated namespaces of the fragment being expanded, innermost last.
    homes: Vec<HashMap<NodeId, String>>,
}

impl<'s> Expander<'s> {
    pub(crate) fn new(session: &'s mut CompilationSession, file: String) -> Self {
        Self {
            session,
            file,
            out: Arena::new(),
            active: Vec::new(),
            homes: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, program: &Program) -> Program {
        let mut items = Vec::new();
        for id in &program.items {
            self.expand_node(&program.arena, *id, "", &[], &mut items);
        }
        tracing::debug!(nodes = self.out.len(), "expanded program");
        Program {
            arena: self.out,
            items,
        }
    }

    fn report(&mut self, error: CompileError) {
        self.session.report(error, &self.file);
    }

    fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.out.alloc(Node::new(kind, span))
    }

    fn lookup(&self, reference: &Reference, namespace: &str) -> Option<&StoredDefinition> {
        self.session.table.lookup(
            reference.subtype,
            &reference.name,
            namespace,
            reference.namespace.as_deref(),
        )
    }

    // =========================================================================
    // Markup
    // =========================================================================

    fn expand_node(
        &mut self,
        src: &Arena<Node>,
        id: NodeId,
        namespace: &str,
        scope: &[Constraint],
        out: &mut Vec<NodeId>,
    ) {
        let relocated = self.homes.last().and_then(|homes| homes.get(&id)).cloned();
        let namespace = relocated.as_deref().unwrap_or(namespace);

        let node = &src[id];
        match &node.kind {
            NodeKind::Element(el) => {
                if let Err(err) = constraint::check(scope, Subject::Element(&el.tag)) {
                    self.report(err);
                    return;
                }

                let mut inner = scope.to_vec();
                for child in &el.children {
                    if let NodeKind::Except(list) = &src[*child].kind {
                        inner.extend(list.iter().cloned());
                    }
                }

                let attributes = el
                    .attributes
                    .iter()
                    .map(|a| Attribute {
                        name: a.name.clone(),
                        value: self.substitute(&a.value, namespace, &inner),
                    })
                    .collect();

                let mut children = Vec::new();
                for child in &el.children {
                    self.expand_node(src, *child, namespace, &inner, &mut children);
                }

                let element = NodeKind::Element(Element {
                    tag: el.tag.clone(),
                    attributes,
                    children,
                });
                out.push(self.alloc(element, node.span));
            }
            NodeKind::Text(_) | NodeKind::Comment(_) | NodeKind::Script(_) => {
                out.push(self.alloc(node.kind.clone(), node.span));
            }
            NodeKind::Style(block) => {
                let items = self.resolve_style(&block.items, namespace, scope);
                let style = NodeKind::Style(StyleBlock {
                    scope: block.scope,
                    items,
                });
                out.push(self.alloc(style, node.span));
            }
            NodeKind::Use(u) => self.expand_use(src, u, node.span, namespace, scope, out),
            NodeKind::Origin(origin) => self.expand_origin(origin, node.span, namespace, out),
            NodeKind::Namespace(ns) => {
                let nested = qualify(namespace, &ns.name);
                for item in &ns.items {
                    self.expand_node(src, *item, &nested, scope, out);
                }
            }
            NodeKind::Definition(_)
            | NodeKind::Import(_)
            | NodeKind::Configuration(_)
            | NodeKind::Except(_)
            | NodeKind::Delete(_)
            | NodeKind::Insert(_)
            | NodeKind::Modify(_) => {}
        }
    }

    fn expand_use(
        &mut self,
        src: &Arena<Node>,
        u: &Use,
        span: Span,
        namespace: &str,
        scope: &[Constraint],
        out: &mut Vec<NodeId>,
    ) {
        let Some(def) = self.lookup(&u.reference, namespace) else {
            self.report(unresolved(&u.reference));
            return;
        };
        let (key, kind, home) = (def.key.clone(), def.kind, def.home.clone());

        let subject = Subject::Use {
            kind,
            subtype: key.subtype,
            name: &key.name,
        };
        if let Err(err) = constraint::check(scope, subject) {
            self.report(err);
            return;
        }
        if self.active.contains(&key) {
            self.report(CompileError::RecursiveDefinition {
                name: key.to_string(),
            });
            return;
        }

        let fragment = match self.instantiate(&key, src, &u.ops, namespace) {
            Ok(fragment) => fragment,
            Err(err) => {
                self.report(err);
                return;
            }
        };

        if self.session.config.debug_mode {
            let marker = NodeKind::Comment(format!("@Element {}", u.reference.name));
            out.push(self.alloc(marker, span));
        }

        let Fragment {
            arena,
            roots,
            constraints,
            homes,
        } = fragment;
        let mut inner = scope.to_vec();
        inner.extend(constraints);

        self.active.push(key.clone());
        self.homes.push(homes);
        for root in &roots {
            self.expand_node(&arena, *root, &home, &inner, out);
        }
        self.homes.pop();
        self.active.pop();
    }

    fn expand_origin(&mut self, origin: &Origin, span: Span, namespace: &str, out: &mut Vec<NodeId>) {
        let content = match (&origin.content, &origin.name) {
            (Some(content), _) => content.clone(),
            (None, Some(name)) => match self.session.table.lookup_origin(&origin.kind, name, namespace) {
                Some(named) => named.content.clone(),
                None => {
                    self.report(CompileError::UnresolvedReference {
                        reference: format!("[Origin] {} {name}", origin.kind),
                    });
                    return;
                }
            },
            (None, None) => return,
        };

        let origin = NodeKind::Origin(Origin {
            kind: origin.kind.clone(),
            name: origin.name.clone(),
            content: Some(content),
        });
        out.push(self.alloc(origin, span));
    }

    // =========================================================================
    // Element definitions
    // =========================================================================

    /// The composed content of `key`, specialized by `ops` from `src`.
    /// `namespace` is where the operations were written.
    fn instantiate(
        &mut self,
        key: &DefKey,
        src: &Arena<Node>,
        ops: &[NodeId],
        namespace: &str,
    ) -> Result<Fragment, CompileError> {
        let mut fragment = self.materialize(key)?;
        if !ops.is_empty() {
            self.specialize(&mut fragment, src, ops, namespace)?;
        }
        Ok(fragment)
    }

    fn materialize(&mut self, key: &DefKey) -> Result<Fragment, CompileError> {
        if self.active.contains(key) {
            return Err(CompileError::RecursiveDefinition {
                name: key.to_string(),
            });
        }
        let (body, home) = match self.session.table.get(key) {
            Some(StoredDefinition {
                body: StoredBody::Element(fragment),
                home,
                ..
            }) => (fragment.clone(), home.clone()),
            _ => {
                return Err(CompileError::UnresolvedReference {
                    reference: key.to_string(),
                })
            }
        };

        self.active.push(key.clone());
        let composed = self.compose(&body, &home);
        self.active.pop();
        composed
    }

    fn compose(&mut self, body: &Fragment, namespace: &str) -> Result<Fragment, CompileError> {
        let mut out = Fragment {
            constraints: body.constraints.clone(),
            ..Fragment::default()
        };
        let mut pending = Vec::new();

        for id in &body.roots {
            match &body.arena[*id].kind {
                NodeKind::Delete(_) | NodeKind::Insert(_) | NodeKind::Modify(_) => pending.push(*id),
                NodeKind::Except(list) => out.constraints.extend(list.iter().cloned()),
                other => {
                    if !pending.is_empty() {
                        self.specialize(&mut out, &body.arena, &pending, namespace)?;
                        pending.clear();
                    }
                    match other {
                        NodeKind::Use(u) => {
                            let (key, home) = match self.lookup(&u.reference, namespace) {
                                Some(def) => (def.key.clone(), def.home.clone()),
                                None => return Err(unresolved(&u.reference)),
                            };
                            let inherited = self.instantiate(&key, &body.arena, &u.ops, namespace)?;
                            out.append(&inherited, &home);
                        }
                        _ => out.push_copy(&body.arena, *id),
                    }
                }
            }
        }

        if !pending.is_empty() {
            self.specialize(&mut out, &body.arena, &pending, namespace)?;
        }
        Ok(out)
    }

    fn specialize(
        &mut self,
        fragment: &mut Fragment,
        src: &Arena<Node>,
        ops: &[NodeId],
        namespace: &str,
    ) -> Result<(), CompileError> {
        let table = &self.session.table;
        let kind_of = |r: &Reference| {
            table
                .lookup(r.subtype, &r.name, namespace, r.namespace.as_deref())
                .map(|def| def.kind)
        };
        let specializer = Specializer {
            index_base: self.session.config.index_initial_count,
            namespace,
            kind_of: &kind_of,
        };
        let warnings = specializer.apply(fragment, src, ops)?;

        for warning in warnings {
            self.report(warning);
        }
        Ok(())
    }

    // =========================================================================
    // Styles
    // =========================================================================

    /// Flatten a style block: uses are merged in place, deletes applied and
    /// rules resolved. Properties come first, then rules.
    fn resolve_style(
        &mut self,
        items: &[StyleItem],
        namespace: &str,
        scope: &[Constraint],
    ) -> Vec<StyleItem> {
        let mut properties = Properties::new();
        let mut rules = Vec::new();
        self.merge_style(&mut properties, items, namespace, scope, true, &mut rules);

        let mut resolved = Vec::with_capacity(properties.len() + rules.len());
        for (name, value) in properties {
            match value {
                Some(value) => resolved.push(StyleItem::Property(Property {
                    name,
                    value: Some(value),
                })),
                None => self.report(CompileError::UnfilledProperty {
                    property: name,
                    style: "style block".into(),
                }),
            }
        }
        resolved.extend(rules);
        resolved
    }

    /// Merge `items` into `properties`; a later write to the same name keeps
    /// the first position. At a use site (`top`) valueless properties left
    /// by a `@Style` use are dropped with a warning.
    fn merge_style(
        &mut self,
        properties: &mut Properties,
        items: &[StyleItem],
        namespace: &str,
        scope: &[Constraint],
        top: bool,
        rules: &mut Vec<StyleItem>,
    ) {
        for item in items {
            match item {
                StyleItem::Property(p) => {
                    let value = p.value.as_ref().map(|v| self.substitute(v, namespace, scope));
                    properties.insert(p.name.clone(), value);
                }
                StyleItem::Use(u) => {
                    for (name, value) in self.use_style(u, namespace, scope) {
                        if top && value.is_none() {
                            self.report(CompileError::UnfilledProperty {
                                property: name,
                                style: u.reference.name.clone(),
                            });
                            continue;
                        }
                        properties.insert(name, value);
                    }
                }
                StyleItem::Delete(names) => {
                    for name in names {
                        if properties.shift_remove(name).is_none() {
                            self.report(CompileError::NoMatch {
                                operation: format!("delete {name}"),
                            });
                        }
                    }
                }
                StyleItem::Rule(rule) => {
                    let items = self.resolve_style(&rule.items, namespace, scope);
                    rules.push(StyleItem::Rule(StyleRule {
                        selector: rule.selector.clone(),
                        items,
                    }));
                }
            }
        }
    }

    /// Properties of a `@Style` use: the definition's own (resolved in its
    /// home namespace) followed by the use-site overrides.
    fn use_style(&mut self, u: &StyleUse, namespace: &str, scope: &[Constraint]) -> Properties {
        let Some(def) = self.lookup(&u.reference, namespace) else {
            self.report(unresolved(&u.reference));
            return Properties::new();
        };
        let (key, kind, home) = (def.key.clone(), def.kind, def.home.clone());
        let items = match &def.body {
            StoredBody::Style(items) => items.clone(),
            _ => return Properties::new(),
        };

        let subject = Subject::Use {
            kind,
            subtype: key.subtype,
            name: &key.name,
        };
        if let Err(err) = constraint::check(scope, subject) {
            self.report(err);
            return Properties::new();
        }
        if self.active.contains(&key) {
            self.report(CompileError::RecursiveDefinition {
                name: key.to_string(),
            });
            return Properties::new();
        }

        let mut properties = Properties::new();
        let mut ignored = Vec::new();
        self.active.push(key.clone());
        self.merge_style(&mut properties, &items, &home, &[], false, &mut ignored);
        self.active.pop();
        self.merge_style(&mut properties, &u.items, namespace, scope, false, &mut ignored);
        properties
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Replace `Group(key)` and `Group(key = override)` where `Group` is a
    /// visible `@Var` definition holding `key`. Anything else, and a group
    /// the scope excludes, is left as is.
    fn substitute(&mut self, text: &str, namespace: &str, scope: &[Constraint]) -> String {
        if !text.contains('(') {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find('(') {
            let before = &rest[..open];
            let start = before
                .char_indices()
                .rev()
                .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
                .map_or(0, |(i, c)| i + c.len_utf8());
            let group = &before[start..];

            let replacement = rest[open..].find(')').and_then(|close| {
                let inner = &rest[open + 1..open + close];
                self.var_value(group, inner, namespace, scope)
                    .map(|value| (value, open + close + 1))
            });

            match replacement {
                Some((value, end)) => {
                    out.push_str(&before[..start]);
                    out.push_str(&value);
                    rest = &rest[end..];
                }
                None => {
                    out.push_str(&rest[..=open]);
                    rest = &rest[open + 1..];
                }
            }
        }

        out.push_str(rest);
        out
    }

    fn var_value(
        &mut self,
        group: &str,
        inner: &str,
        namespace: &str,
        scope: &[Constraint],
    ) -> Option<String> {
        if group.is_empty() {
            return None;
        }
        let (key, value) = match inner.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (inner.trim(), None),
        };

        let def = self
            .session
            .table
            .lookup(Subtype::Var, group, namespace, None)?;
        let StoredBody::Var(properties) = &def.body else {
            return None;
        };
        let property = properties.iter().find(|p| p.name == key)?;
        let found = match value {
            Some(value) => Some(value.to_string()),
            None => property.value.clone(),
        };
        let (kind, name) = (def.kind, def.key.name.clone());

        let subject = Subject::Use {
            kind,
            subtype: Subtype::Var,
            name: &name,
        };
        if let Err(err) = constraint::check(scope, subject) {
            self.report(err);
            return None;
        }
        found
    }
}

fn unresolved(reference: &Reference) -> CompileError {
    let reference = match &reference.namespace {
        Some(ns) => format!("{} {} from {ns}", reference.subtype, reference.name),
        None => format!("{} {}", reference.subtype, reference.name),
    };
    CompileError::UnresolvedReference { reference }
}
