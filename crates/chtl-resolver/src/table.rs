//! Definition table.
//!
//! Holds every `[Template]`/`[Custom]` definition and named `[Origin]` block
//! of a session, keyed by namespace, subtype and name. Entries own copies of
//! their content; nothing refers back into the unit they came from.

use crate::specialize::Fragment;
use crate::{CompileError, Location};
use chtl_parser::ast::{DefKind, OriginKind, Property, StyleItem, Subtype};
use indexmap::IndexMap;

/// Separator between nested namespace names.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// `(namespace, subtype, name)`. The default namespace is `""`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefKey {
    pub namespace: String,
    pub subtype: Subtype,
    pub name: String,
}

impl DefKey {
    pub fn new(namespace: impl Into<String>, subtype: Subtype, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subtype,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DefKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.subtype, self.name)
        } else {
            write!(
                f,
                "{} {}{NAMESPACE_SEPARATOR}{}",
                self.subtype, self.namespace, self.name
            )
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoredBody {
    Style(Vec<StyleItem>),
    Element(Fragment),
    Var(Vec<Property>),
}

#[derive(Debug, Clone)]
pub struct StoredDefinition {
    pub kind: DefKind,
    pub key: DefKey,
    /// Namespace the body's own references resolve in. Equal to the key's
    /// namespace except for precise imports, which keep their unit's.
    pub home: String,
    pub body: StoredBody,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OriginKey {
    namespace: String,
    kind: OriginKind,
    name: String,
}

#[derive(Debug, Clone)]
pub struct NamedOrigin {
    pub kind: OriginKind,
    pub content: String,
    pub location: Location,
}

/// All definitions visible to one compilation session.
#[derive(Debug, Clone, Default)]
pub struct DefinitionTable {
    definitions: IndexMap<DefKey, StoredDefinition>,
    origins: IndexMap<OriginKey, NamedOrigin>,
}

impl DefinitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Register a definition. An existing entry with the same key is never
    /// overwritten.
    pub fn insert(&mut self, definition: StoredDefinition) -> Result<(), CompileError> {
        if let Some(existing) = self.definitions.get(&definition.key) {
            return Err(CompileError::DuplicateDefinition {
                name: definition.key.to_string(),
                first: existing.location.clone(),
                second: definition.location,
            });
        }
        tracing::debug!(key = %definition.key, kind = %definition.kind, "registered definition");
        self.definitions.insert(definition.key.clone(), definition);
        Ok(())
    }

    pub fn get(&self, key: &DefKey) -> Option<&StoredDefinition> {
        self.definitions.get(key)
    }

    pub fn contains(&self, key: &DefKey) -> bool {
        self.definitions.contains_key(key)
    }

    /// Find a definition from inside `current`. Unqualified names search the
    /// innermost namespace outwards, ending at the default namespace. A
    /// `from ns` qualifier is tried relative to each enclosing namespace,
    /// innermost first, then as an absolute path.
    pub fn lookup(
        &self,
        subtype: Subtype,
        name: &str,
        current: &str,
        qualifier: Option<&str>,
    ) -> Option<&StoredDefinition> {
        search_order(current, qualifier)
            .into_iter()
            .find_map(|namespace| self.definitions.get(&DefKey::new(namespace, subtype, name)))
    }

    pub fn insert_origin(
        &mut self,
        namespace: &str,
        name: &str,
        origin: NamedOrigin,
    ) -> Result<(), CompileError> {
        let key = OriginKey {
            namespace: namespace.to_string(),
            kind: origin.kind.clone(),
            name: name.to_string(),
        };
        if let Some(existing) = self.origins.get(&key) {
            return Err(CompileError::DuplicateDefinition {
                name: format!("[Origin] {} {}", origin.kind, qualify(namespace, name)),
                first: existing.location.clone(),
                second: origin.location,
            });
        }
        self.origins.insert(key, origin);
        Ok(())
    }

    pub fn lookup_origin(&self, kind: &OriginKind, name: &str, current: &str) -> Option<&NamedOrigin> {
        search_order(current, None).into_iter().find_map(|namespace| {
            self.origins.get(&OriginKey {
                namespace,
                kind: kind.clone(),
                name: name.to_string(),
            })
        })
    }
}

/// Join a namespace and a name (or nested namespace).
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}{NAMESPACE_SEPARATOR}{name}")
    }
}

/// `a::b::c` → `["a::b::c", "a::b", "a", ""]`
fn enclosing(namespace: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = namespace;
    while !current.is_empty() {
        chain.push(current.to_string());
        current = match current.rfind(NAMESPACE_SEPARATOR) {
            Some(i) => &current[..i],
            None => "",
        };
    }
    chain.push(String::new());
    chain
}

fn search_order(current: &str, qualifier: Option<&str>) -> Vec<String> {
    match qualifier {
        None => enclosing(current),
        Some(q) => {
            let mut order: Vec<String> = enclosing(current)
                .iter()
                .filter(|ns| !ns.is_empty())
                .map(|ns| qualify(ns, q))
                .collect();
            order.push(q.to_string());
            order
        }
    }
}
