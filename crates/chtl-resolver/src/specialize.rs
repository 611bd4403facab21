//! Specialization engine.
//!
//! Applies `delete`, `insert` and modify operations to a copy of a
//! definition's content. Operations of one request run in order against the
//! content as it stood when the request began: a deleted node still anchors
//! later operations (so `delete p[0]; insert before p[0] { … }` fills the
//! same position) and inserted nodes are not addressable until the next
//! request. Deleting the same target twice is therefore a no-op.

use crate::constraint::{self, Subject};
use crate::CompileError;
use chtl_parser::ast::{
    copy_subtree, Constraint, DefKind, InsertPosition, Node, NodeId, NodeKind, Reference, Target,
    INVALID_INDEX,
};
use la_arena::Arena;
use std::collections::HashMap;

/// A detached, owned piece of markup.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub arena: Arena<Node>,
    pub roots: Vec<NodeId>,
    /// `except` constraints declared by the definition this was built from.
    pub constraints: Vec<Constraint>,
    /// Namespace a subtree resolves in when it was written somewhere else
    /// than the definition holding it: inherited content and use-site
    /// inserts. Other nodes resolve in the definition's home namespace.
    pub homes: HashMap<NodeId, String>,
}

impl Fragment {
    /// Deep-copy `ids` out of `src`.
    pub fn from_nodes(src: &Arena<Node>, ids: &[NodeId]) -> Self {
        let mut fragment = Self::default();
        for id in ids {
            fragment.push_copy(src, *id);
        }
        fragment
    }

    pub fn push_copy(&mut self, src: &Arena<Node>, id: NodeId) {
        let copy = copy_subtree(src, id, &mut self.arena);
        self.roots.push(copy);
    }

    /// Append a copy of another fragment's content and constraints. Roots
    /// without a namespace of their own resolve in `home`.
    pub fn append(&mut self, other: &Fragment, home: &str) {
        for id in &other.roots {
            let copy = self.copy_tracked(other, *id);
            self.homes.entry(copy).or_insert_with(|| home.to_string());
            self.roots.push(copy);
        }
        self.constraints.extend(other.constraints.iter().cloned());
    }

    fn copy_tracked(&mut self, other: &Fragment, id: NodeId) -> NodeId {
        let node = &other.arena[id];
        let kind = node.kind.map_children(|child| self.copy_tracked(other, child));
        let copy = self.arena.alloc(Node::new(kind, node.span));
        if let Some(home) = other.homes.get(&id) {
            self.homes.insert(copy, home.clone());
        }
        copy
    }

    /// Copy `id` out of `src` as content written in `namespace`.
    fn adopt(&mut self, src: &Arena<Node>, id: NodeId, namespace: &str) -> NodeId {
        let copy = copy_subtree(src, id, &mut self.arena);
        self.homes.insert(copy, namespace.to_string());
        copy
    }
}

/// Parameters of a specialization request.
pub struct Specializer<'a> {
    /// Number that `tag[N]` counts from.
    pub index_base: i64,
    /// Namespace the operations were written in; inserted content resolves
    /// there.
    pub namespace: &'a str,
    /// Kind of the definition a reference resolves to, for constraint checks
    /// on inserted uses.
    pub kind_of: &'a dyn Fn(&Reference) -> Option<DefKind>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: NodeId,
    removed: bool,
    addressable: bool,
}

impl Specializer<'_> {
    /// Produce a specialized copy of `base`. `ops` are `Delete`, `Insert` and
    /// `Modify` nodes living in `src`. Returns the new fragment and any
    /// warnings; a constraint violation fails the whole request.
    pub fn specialize(
        &self,
        base: &Fragment,
        src: &Arena<Node>,
        ops: &[NodeId],
    ) -> Result<(Fragment, Vec<CompileError>), CompileError> {
        let mut fragment = base.clone();
        let warnings = self.apply(&mut fragment, src, ops)?;
        Ok((fragment, warnings))
    }

    /// Apply `ops` to `fragment` in place.
    pub fn apply(
        &self,
        fragment: &mut Fragment,
        src: &Arena<Node>,
        ops: &[NodeId],
    ) -> Result<Vec<CompileError>, CompileError> {
        let mut slots: Vec<Slot> = fragment
            .roots
            .iter()
            .map(|id| Slot {
                id: *id,
                removed: false,
                addressable: true,
            })
            .collect();
        let mut warnings = Vec::new();

        for op in ops {
            match &src[*op].kind {
                NodeKind::Delete(targets) => {
                    for target in targets {
                        let hits = self.select(&fragment.arena, &slots, target);
                        if hits.is_empty() {
                            warnings.push(no_match(format!("delete {target}")));
                        }
                        for i in hits {
                            slots[i].removed = true;
                        }
                    }
                }
                NodeKind::Insert(insert) => {
                    self.check_content(&fragment.constraints, src, &insert.content)?;

                    let at = match &insert.position {
                        InsertPosition::AtTop => Some(0),
                        InsertPosition::AtBottom => Some(slots.len()),
                        InsertPosition::Before(target) => {
                            self.select(&fragment.arena, &slots, target).first().copied()
                        }
                        InsertPosition::After(target) => self
                            .select(&fragment.arena, &slots, target)
                            .last()
                            .map(|i| i + 1),
                        InsertPosition::Replace(target) => {
                            let hits = self.select(&fragment.arena, &slots, target);
                            for i in &hits {
                                slots[*i].removed = true;
                            }
                            hits.first().copied()
                        }
                    };

                    let Some(at) = at else {
                        warnings.push(no_match(format!("insert {}", describe(&insert.position))));
                        continue;
                    };

                    let inserted: Vec<Slot> = insert
                        .content
                        .iter()
                        .map(|id| Slot {
                            id: fragment.adopt(src, *id, self.namespace),
                            removed: false,
                            addressable: false,
                        })
                        .collect();
                    slots.splice(at..at, inserted);
                }
                NodeKind::Modify(modify) => {
                    self.check_content(&fragment.constraints, src, &modify.children)?;

                    let hits: Vec<usize> = self
                        .select(&fragment.arena, &slots, &modify.target)
                        .into_iter()
                        .filter(|i| !slots[*i].removed)
                        .collect();
                    if hits.is_empty() {
                        warnings.push(no_match(format!("{} {{ }}", modify.target)));
                    }

                    for i in hits {
                        let children: Vec<NodeId> = modify
                            .children
                            .iter()
                            .map(|id| fragment.adopt(src, *id, self.namespace))
                            .collect();
                        if let NodeKind::Element(el) = &mut fragment.arena[slots[i].id].kind {
                            for attr in &modify.attributes {
                                el.set_attribute(&attr.name, attr.value.clone());
                            }
                            el.children.extend(children);
                        }
                    }
                }
                other => {
                    tracing::debug!(?other, "ignoring non-operation in specialization body");
                }
            }
        }

        fragment.roots = slots
            .into_iter()
            .filter(|slot| !slot.removed)
            .map(|slot| slot.id)
            .collect();

        Ok(warnings)
    }

    /// Indices of the slots `target` selects: every same-tag element, or the
    /// Nth one counting from `index_base`.
    fn select(&self, arena: &Arena<Node>, slots: &[Slot], target: &Target) -> Vec<usize> {
        let wanted = match target.index {
            None => None,
            Some(INVALID_INDEX) => return Vec::new(),
            Some(index) => match index
                .checked_sub(self.index_base)
                .and_then(|n| usize::try_from(n).ok())
            {
                Some(n) => Some(n),
                None => return Vec::new(),
            },
        };

        let mut hits = Vec::new();
        let mut seen = 0usize;
        for (i, slot) in slots.iter().enumerate() {
            if !slot.addressable {
                continue;
            }
            let NodeKind::Element(el) = &arena[slot.id].kind else {
                continue;
            };
            if el.tag != target.tag {
                continue;
            }
            match wanted {
                None => hits.push(i),
                Some(n) if n == seen => {
                    hits.push(i);
                    break;
                }
                Some(_) => {}
            }
            seen += 1;
        }
        hits
    }

    /// Reject content that the fragment's constraints exclude.
    fn check_content(
        &self,
        constraints: &[Constraint],
        src: &Arena<Node>,
        ids: &[NodeId],
    ) -> Result<(), CompileError> {
        if constraints.is_empty() {
            return Ok(());
        }
        for id in ids {
            match &src[*id].kind {
                NodeKind::Element(el) => {
                    constraint::check(constraints, Subject::Element(&el.tag))?;
                    self.check_content(constraints, src, &el.children)?;
                }
                NodeKind::Use(u) => {
                    if let Some(kind) = (self.kind_of)(&u.reference) {
                        constraint::check(
                            constraints,
                            Subject::Use {
                                kind,
                                subtype: u.reference.subtype,
                                name: &u.reference.name,
                            },
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn no_match(operation: String) -> CompileError {
    tracing::warn!(%operation, "specialization matched nothing");
    CompileError::NoMatch { operation }
}

fn describe(position: &InsertPosition) -> String {
    match position {
        InsertPosition::Before(t) => format!("before {t}"),
        InsertPosition::After(t) => format!("after {t}"),
        InsertPosition::Replace(t) => format!("replace {t}"),
        InsertPosition::AtTop => "at top".into(),
        InsertPosition::AtBottom => "at bottom".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chtl_parser::ast::{DefinitionBody, Program};
    use chtl_parser::Parser;
    use pretty_assertions::assert_eq;

    fn program(source: &str) -> Program {
        let output = Parser::parse(source);
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        output.program
    }

    fn fragment(source: &str) -> Fragment {
        let p = program(source);
        Fragment::from_nodes(&p.arena, &p.items)
    }

    /// Operations written as the body of a throwaway custom element.
    fn ops(body: &str) -> (Program, Vec<NodeId>) {
        let p = program(&format!("[Custom] @Element Ops {{ {body} }}"));
        let ids = match p.kind(p.items[0]) {
            NodeKind::Definition(def) => match &def.body {
                DefinitionBody::Element(ids) => ids.clone(),
                other => panic!("Expected element body, got {other:?}"),
            },
            other => panic!("Expected definition, got {other:?}"),
        };
        (p, ids)
    }

    fn no_kinds(_: &Reference) -> Option<DefKind> {
        None
    }

    fn apply_with(base: i64, fragment: &mut Fragment, body: &str) -> Vec<CompileError> {
        let (p, ids) = ops(body);
        let specializer = Specializer {
            index_base: base,
            namespace: "",
            kind_of: &no_kinds,
        };
        specializer.apply(fragment, &p.arena, &ids).unwrap()
    }

    fn apply(fragment: &mut Fragment, body: &str) -> Vec<CompileError> {
        apply_with(0, fragment, body)
    }

    /// Root tags, with an element's `id` attribute appended when present.
    fn layout(fragment: &Fragment) -> Vec<String> {
        fragment
            .roots
            .iter()
            .map(|id| match &fragment.arena[*id].kind {
                NodeKind::Element(el) => match el.attribute("id") {
                    Some(v) => format!("{}#{v}", el.tag),
                    None => el.tag.clone(),
                },
                other => format!("{other:?}"),
            })
            .collect()
    }

    const BASE: &str = "div { id: a; } p { id: p0; } p { id: p1; } span { }";

    // =========================================================================
    // delete
    // =========================================================================

    #[test]
    fn test_delete_indexed_removes_only_that_sibling() {
        let mut f = fragment(BASE);
        let warnings = apply(&mut f, "delete p[0];");
        assert!(warnings.is_empty());
        assert_eq!(layout(&f), vec!["div#a", "p#p1", "span"]);
    }

    #[test]
    fn test_delete_without_index_removes_all() {
        let mut f = fragment(BASE);
        apply(&mut f, "delete p, span;");
        assert_eq!(layout(&f), vec!["div#a"]);
    }

    #[test]
    fn test_delete_twice_is_idempotent() {
        let mut once = fragment(BASE);
        apply(&mut once, "delete p[0];");
        let mut twice = fragment(BASE);
        apply(&mut twice, "delete p[0]; delete p[0];");
        assert_eq!(layout(&once), layout(&twice));
    }

    #[test]
    fn test_delete_missing_target_warns() {
        let mut f = fragment(BASE);
        let warnings = apply(&mut f, "delete table; delete p[5];");
        assert_eq!(layout(&f), vec!["div#a", "p#p0", "p#p1", "span"]);
        assert_eq!(
            warnings,
            vec![
                CompileError::NoMatch {
                    operation: "delete table".into()
                },
                CompileError::NoMatch {
                    operation: "delete p[5]".into()
                },
            ]
        );
    }

    #[test]
    fn test_invalid_index_matches_nothing() {
        let mut f = fragment(BASE);
        let p = Parser::parse("[Custom] @Element Ops { delete p[x]; }");
        let NodeKind::Definition(def) = p.program.kind(p.program.items[0]) else {
            panic!("Expected definition");
        };
        let DefinitionBody::Element(ids) = &def.body else {
            panic!("Expected element body");
        };
        let specializer = Specializer {
            index_base: 0,
            namespace: "",
            kind_of: &no_kinds,
        };
        let warnings = specializer.apply(&mut f, &p.program.arena, ids).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(layout(&f).len(), 4);
    }

    #[test]
    fn test_extreme_index_base_matches_nothing() {
        let mut f = fragment(BASE);
        let warnings = apply_with(i64::MIN, &mut f, "delete p[1];");
        assert_eq!(warnings.len(), 1);
        assert_eq!(layout(&f).len(), 4);
    }

    #[test]
    fn test_index_base_offsets_selection() {
        let mut f = fragment(BASE);
        apply_with(1, &mut f, "delete p[1];");
        assert_eq!(layout(&f), vec!["div#a", "p#p1", "span"]);
    }

    // =========================================================================
    // insert
    // =========================================================================

    #[test]
    fn test_insert_positions() {
        let mut f = fragment(BASE);
        apply(
            &mut f,
            "insert after div[0] { hr; } insert before span { br; } insert at top { h1 { } } insert at bottom { footer { } }",
        );
        assert_eq!(
            layout(&f),
            vec!["h1", "div#a", "hr", "p#p0", "p#p1", "br", "span", "footer"]
        );
    }

    #[test]
    fn test_inserted_content_records_its_namespace() {
        let mut f = fragment(BASE);
        let (p, ids) = ops("insert at bottom { footer { } }");
        let specializer = Specializer {
            index_base: 0,
            namespace: "app",
            kind_of: &no_kinds,
        };
        specializer.apply(&mut f, &p.arena, &ids).unwrap();

        let footer = f.roots[4];
        assert_eq!(f.homes.get(&footer).map(String::as_str), Some("app"));
        assert!(!f.homes.contains_key(&f.roots[0]));
    }

    #[test]
    fn test_append_carries_homes() {
        let mut inherited = fragment("p { } span { }");
        inherited.homes.insert(inherited.roots[1], "app".into());
        let mut f = Fragment::default();
        f.append(&inherited, "ui");

        assert_eq!(f.homes.get(&f.roots[0]).map(String::as_str), Some("ui"));
        assert_eq!(f.homes.get(&f.roots[1]).map(String::as_str), Some("app"));
    }

    #[test]
    fn test_insert_replace() {
        let mut f = fragment(BASE);
        apply(&mut f, "insert replace p[1] { em { } strong { } }");
        assert_eq!(layout(&f), vec!["div#a", "p#p0", "em", "strong", "span"]);
    }

    #[test]
    fn test_delete_then_insert_at_same_position() {
        let mut f = fragment(BASE);
        apply(&mut f, "delete p[0]; insert before p[0] { section { } }");
        assert_eq!(layout(&f), vec!["div#a", "section", "p#p1", "span"]);
    }

    #[test]
    fn test_inserted_nodes_are_not_addressable_in_same_request() {
        let mut f = fragment(BASE);
        let warnings = apply(&mut f, "insert at top { table { } } delete table;");
        assert_eq!(warnings.len(), 1);
        assert_eq!(layout(&f)[0], "table");
    }

    #[test]
    fn test_insert_with_missing_anchor_warns() {
        let mut f = fragment(BASE);
        let warnings = apply(&mut f, "insert after table { hr; }");
        assert_eq!(layout(&f).len(), 4);
        assert_eq!(
            warnings,
            vec![CompileError::NoMatch {
                operation: "insert after table".into()
            }]
        );
    }

    // =========================================================================
    // modify
    // =========================================================================

    #[test]
    fn test_modify_replaces_attributes_and_appends_children() {
        let mut f = fragment(BASE);
        let (p, ids) = {
            let p = program("@Element Ops { p[1] { id: changed; title: t; text { \"x\" } } }");
            let NodeKind::Use(u) = p.kind(p.items[0]) else {
                panic!("Expected use");
            };
            let ids = u.ops.clone();
            (p, ids)
        };
        let specializer = Specializer {
            index_base: 0,
            namespace: "",
            kind_of: &no_kinds,
        };
        specializer.apply(&mut f, &p.arena, &ids).unwrap();

        assert_eq!(layout(&f), vec!["div#a", "p#p0", "p#changed", "span"]);
        let NodeKind::Element(el) = &f.arena[f.roots[2]].kind else {
            panic!("Expected element");
        };
        assert_eq!(el.attribute("title"), Some("t"));
        assert_eq!(el.children.len(), 1);
    }

    // =========================================================================
    // constraints and purity
    // =========================================================================

    #[test]
    fn test_insert_violating_constraint_fails() {
        let mut f = fragment(BASE);
        f.constraints = vec![Constraint::TagName("span".into())];
        let (p, ids) = ops("insert at bottom { div { span { } } }");
        let specializer = Specializer {
            index_base: 0,
            namespace: "",
            kind_of: &no_kinds,
        };
        let err = specializer.apply(&mut f, &p.arena, &ids).unwrap_err();
        assert!(matches!(err, CompileError::ConstraintViolation { .. }));
    }

    #[test]
    fn test_inserted_use_checked_by_kind() {
        let mut f = fragment(BASE);
        f.constraints = vec![Constraint::TemplateRootType(DefKind::Custom)];
        let (p, ids) = ops("insert at bottom { @Element Card; }");
        let custom = |_: &Reference| Some(DefKind::Custom);
        let specializer = Specializer {
            index_base: 0,
            namespace: "",
            kind_of: &custom,
        };
        assert!(specializer.apply(&mut f, &p.arena, &ids).is_err());
    }

    #[test]
    fn test_specialize_leaves_base_untouched() {
        let base = fragment(BASE);
        let (p, ids) = ops("delete div;");
        let specializer = Specializer {
            index_base: 0,
            namespace: "",
            kind_of: &no_kinds,
        };
        let (specialized, _) = specializer.specialize(&base, &p.arena, &ids).unwrap();
        assert_eq!(layout(&base).len(), 4);
        assert_eq!(layout(&specialized), vec!["p#p0", "p#p1", "span"]);
    }
}
