//! Abstract Syntax Tree for CHTL.
//!
//! Nodes live in an arena and refer to their children by [`NodeId`]. Every
//! node is owned by exactly one parent (the tree never shares nodes), so
//! copying a subtree into another arena is a plain recursive walk; see
//! [`copy_subtree`].

use chtl_lexer::Span;
use la_arena::{Arena, Idx};

pub type NodeId = Idx<Node>;

/// A parsed source unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub arena: Arena<Node>,
    pub items: Vec<NodeId>,
}

impl Program {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.arena[id].kind
    }
}

/// A node and the source position it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every construct a CHTL unit can contain.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// An HTML element with attributes and ordered children.
    Element(Element),

    /// Text content, escaped on output unless `raw`.
    Text(Text),

    /// A generator-visible `-- comment`.
    Comment(String),

    /// A `style { }` block.
    Style(StyleBlock),

    /// A `script { }` block.
    Script(ScriptBlock),

    /// A `[Template]` or `[Custom]` definition.
    Definition(Definition),

    /// An `[Import]` statement.
    Import(Import),

    /// A `[Namespace] name { }` block.
    Namespace(Namespace),

    /// A `[Configuration] { }` block.
    Configuration(ConfigBlock),

    /// An `[Origin]` block or reference.
    Origin(Origin),

    /// `@Element Name [from ns] [{ ops }]`.
    Use(Use),

    /// `delete target, ...;`
    Delete(Vec<Target>),

    /// `insert <position> { content }`
    Insert(Insert),

    /// `target { body }` inside a use body: augments the matched element.
    Modify(Modify),

    /// `except constraint, ...;`
    Except(Vec<Constraint>),
}

impl NodeKind {
    /// Ids of the nodes this node owns, in order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Element(el) => el.children.clone(),
            NodeKind::Definition(def) => match &def.body {
                DefinitionBody::Element(ids) => ids.clone(),
                DefinitionBody::Style(_) | DefinitionBody::Var(_) => Vec::new(),
            },
            NodeKind::Namespace(ns) => ns.items.clone(),
            NodeKind::Use(u) => u.ops.clone(),
            NodeKind::Insert(ins) => ins.content.clone(),
            NodeKind::Modify(m) => m.children.clone(),
            NodeKind::Text(_)
            | NodeKind::Comment(_)
            | NodeKind::Style(_)
            | NodeKind::Script(_)
            | NodeKind::Import(_)
            | NodeKind::Configuration(_)
            | NodeKind::Origin(_)
            | NodeKind::Delete(_)
            | NodeKind::Except(_) => Vec::new(),
        }
    }

    /// Clone this node, replacing each owned child id through `map`.
    pub fn map_children(&self, mut map: impl FnMut(NodeId) -> NodeId) -> NodeKind {
        let mut remap = |ids: &[NodeId]| ids.iter().map(|id| map(*id)).collect::<Vec<_>>();
        match self {
            NodeKind::Element(el) => NodeKind::Element(Element {
                children: remap(&el.children),
                ..el.clone()
            }),
            NodeKind::Definition(def) => NodeKind::Definition(Definition {
                body: match &def.body {
                    DefinitionBody::Element(ids) => DefinitionBody::Element(remap(ids)),
                    other => other.clone(),
                },
                ..def.clone()
            }),
            NodeKind::Namespace(ns) => NodeKind::Namespace(Namespace {
                name: ns.name.clone(),
                items: remap(&ns.items),
            }),
            NodeKind::Use(u) => NodeKind::Use(Use {
                ops: remap(&u.ops),
                ..u.clone()
            }),
            NodeKind::Insert(ins) => NodeKind::Insert(Insert {
                position: ins.position.clone(),
                content: remap(&ins.content),
            }),
            NodeKind::Modify(m) => NodeKind::Modify(Modify {
                children: remap(&m.children),
                ..m.clone()
            }),
            other => other.clone(),
        }
    }
}

/// Deep-copy the subtree rooted at `id` from `src` into `dst`.
pub fn copy_subtree(src: &Arena<Node>, id: NodeId, dst: &mut Arena<Node>) -> NodeId {
    let node = &src[id];
    let kind = node.kind.map_children(|child| copy_subtree(src, child, dst));
    dst.alloc(Node::new(kind, node.span))
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

/// An HTML element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<NodeId>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set `name`, replacing an existing attribute in place.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }
}

/// `name: value;` or `name = value;`, the same assignment either way.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub content: String,
    /// Raw text bypasses HTML escaping (`[Origin] @Html` passthrough).
    pub raw: bool,
}

// ---------------------------------------------------------------------------
// Style and script
// ---------------------------------------------------------------------------

/// Local blocks sit inside an element; global blocks at top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleBlock {
    pub scope: Scope,
    pub items: Vec<StyleItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StyleItem {
    /// `color: red;`, or a valueless `color;` in a `[Custom] @Style`.
    Property(Property),
    /// `@Style Name;` or `@Style Name { overrides }`.
    Use(StyleUse),
    /// `delete color, margin;`
    Delete(Vec<String>),
    /// `.box { ... }`, `&:hover { ... }`.
    Rule(StyleRule),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Option<String>,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleUse {
    pub reference: Reference,
    /// Specialization items: overriding properties and deletes.
    pub items: Vec<StyleItem>,
    pub inherit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub selector: String,
    pub items: Vec<StyleItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptBlock {
    pub scope: Scope,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Definitions and references
// ---------------------------------------------------------------------------

/// `[Template]` or `[Custom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefKind {
    Template,
    Custom,
}

impl std::fmt::Display for DefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefKind::Template => write!(f, "[Template]"),
            DefKind::Custom => write!(f, "[Custom]"),
        }
    }
}

/// `@Style`, `@Element` or `@Var`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subtype {
    Style,
    Element,
    Var,
}

impl std::fmt::Display for Subtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subtype::Style => write!(f, "@Style"),
            Subtype::Element => write!(f, "@Element"),
            Subtype::Var => write!(f, "@Var"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub kind: DefKind,
    pub subtype: Subtype,
    pub name: String,
    pub body: DefinitionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionBody {
    Style(Vec<StyleItem>),
    /// Ids of the body nodes: elements, text, uses, operators and `except`.
    Element(Vec<NodeId>),
    Var(Vec<Property>),
}

/// A by-name reference to a definition, optionally qualified with
/// `from ns` (`a.b` and `a::b` both name the nested namespace `a::b`).
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub subtype: Subtype,
    pub name: String,
    pub namespace: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Use {
    pub reference: Reference,
    /// `Delete`, `Insert`, `Modify` and `Except` nodes, in source order.
    pub ops: Vec<NodeId>,
    pub inherit: bool,
}

/// Selects elements among siblings: `div` (all) or `div[1]` (the second).
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub tag: String,
    /// Index among same-tag siblings. `-1` marks an index that failed to parse.
    pub index: Option<i64>,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.tag, i),
            None => write!(f, "{}", self.tag),
        }
    }
}

/// Sentinel stored in [`Target::index`] when the bracketed index is invalid.
pub const INVALID_INDEX: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub enum InsertPosition {
    Before(Target),
    After(Target),
    Replace(Target),
    AtTop,
    AtBottom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub position: InsertPosition,
    pub content: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Modify {
    pub target: Target,
    pub attributes: Vec<Attribute>,
    pub children: Vec<NodeId>,
}

/// One `except` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `except span;`: no element with this tag.
    TagName(String),
    /// `except @Html;`: no plain HTML elements at all.
    HtmlTagType,
    /// `except [Custom];`: no uses of any custom (or template).
    TemplateRootType(DefKind),
    /// `except [Template] @Var;` or `except [Custom] @Element Box;`.
    TemplateSubType {
        kind: DefKind,
        subtype: Subtype,
        name: Option<String>,
    },
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::TagName(tag) => write!(f, "{tag}"),
            Constraint::HtmlTagType => write!(f, "@Html"),
            Constraint::TemplateRootType(kind) => write!(f, "{kind}"),
            Constraint::TemplateSubType {
                kind,
                subtype,
                name: Some(name),
            } => write!(f, "{kind} {subtype} {name}"),
            Constraint::TemplateSubType { kind, subtype, .. } => write!(f, "{kind} {subtype}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Imports, namespaces, configuration, origins
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `@Chtl`: every definition of a CHTL unit or module.
    Chtl,
    /// `@Html`, `@Style`, `@JavaScript`: a raw resource as a named origin.
    Resource(OriginKind),
    /// `@CJmod`: activate a registered syntax-rule provider.
    CJmod,
    /// `[Custom] @Element Box`: one definition.
    Definition {
        kind: DefKind,
        subtype: Subtype,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub kind: ImportKind,
    pub path: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub name: String,
    pub items: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBlock {
    pub name: Option<String>,
    pub entries: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginKind {
    Html,
    Style,
    JavaScript,
    /// Custom origin types pass through like `@Html`.
    Other(String),
}

impl std::fmt::Display for OriginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginKind::Html => write!(f, "@Html"),
            OriginKind::Style => write!(f, "@Style"),
            OriginKind::JavaScript => write!(f, "@JavaScript"),
            OriginKind::Other(name) => write!(f, "@{name}"),
        }
    }
}

/// `[Origin] @Html [name] { raw }` defines (and emits) raw content;
/// `[Origin] @Html name;` re-emits a named one.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub kind: OriginKind,
    pub name: Option<String>,
    pub content: Option<String>,
}
