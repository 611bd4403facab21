//! `except` constraint checking.
//!
//! A scope carries the constraints declared in it and in every enclosing
//! scope. All of them apply: one match rejects the reference.

use crate::CompileError;
use chtl_parser::ast::{Constraint, DefKind, Subtype};

/// What is being placed into a constrained scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    /// A plain HTML element.
    Element(&'a str),
    /// A use of a resolved definition.
    Use {
        kind: DefKind,
        subtype: Subtype,
        name: &'a str,
    },
}

impl std::fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Element(tag) => write!(f, "element '{tag}'"),
            Subject::Use {
                kind,
                subtype,
                name,
            } => write!(f, "{kind} {subtype} {name}"),
        }
    }
}

/// Check `subject` against every constraint in scope.
pub fn check(constraints: &[Constraint], subject: Subject<'_>) -> Result<(), CompileError> {
    match constraints.iter().find(|c| excludes(c, subject)) {
        Some(constraint) => Err(CompileError::ConstraintViolation {
            subject: subject.to_string(),
            constraint: constraint.to_string(),
        }),
        None => Ok(()),
    }
}

fn excludes(constraint: &Constraint, subject: Subject<'_>) -> bool {
    match (constraint, subject) {
        (Constraint::TagName(tag), Subject::Element(t)) => tag == t,
        (Constraint::HtmlTagType, Subject::Element(_)) => true,
        (Constraint::TemplateRootType(k), Subject::Use { kind, .. }) => *k == kind,
        (
            Constraint::TemplateSubType {
                kind: k,
                subtype: s,
                name: n,
            },
            Subject::Use {
                kind,
                subtype,
                name,
            },
        ) => *k == kind && *s == subtype && n.as_deref().is_none_or(|n| n == name),
        _ => false,
    }
}
