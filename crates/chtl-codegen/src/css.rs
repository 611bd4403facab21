//! CSS code generator.
//!
//! Rules from global and local style blocks are hoisted into one
//! stylesheet. A selector keeps the position where it was first seen; later
//! declarations for the same selector merge into that rule.

use indexmap::IndexMap;

/// `property → value` in declaration order. Re-declaring a property keeps
/// its original position.
pub type Declarations = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Rule {
        selector: String,
        declarations: Declarations,
    },
    /// `[Origin] @Style` content, emitted untouched.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stylesheet {
    entries: Vec<Entry>,
    /// Selector → index into `entries`.
    selectors: IndexMap<String, usize>,
}

impl Stylesheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, selector: &str, declarations: Declarations) {
        if declarations.is_empty() {
            tracing::debug!(selector, "skipping empty rule");
            return;
        }
        let selector = selector.trim();
        match self.selectors.get(selector) {
            Some(&index) => {
                if let Entry::Rule {
                    declarations: existing,
                    ..
                } = &mut self.entries[index]
                {
                    existing.extend(declarations);
                }
            }
            None => {
                self.selectors.insert(selector.to_string(), self.entries.len());
                self.entries.push(Entry::Rule {
                    selector: selector.to_string(),
                    declarations,
                });
            }
        }
    }

    pub fn add_raw(&mut self, css: &str) {
        let css = css.trim();
        if !css.is_empty() {
            self.entries.push(Entry::Raw(css.to_string()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compact output puts each rule on one line; pretty output gives every
    /// declaration its own indented line.
    pub fn render(&self, pretty: bool) -> String {
        let blocks: Vec<String> = self
            .entries
            .iter()
            .map(|entry| match entry {
                Entry::Raw(css) => css.clone(),
                Entry::Rule {
                    selector,
                    declarations,
                } if pretty => {
                    let mut block = format!("{selector} {{\n");
                    for (name, value) in declarations {
                        block.push_str(&format!("  {name}: {value};\n"));
                    }
                    block.push('}');
                    block
                }
                Entry::Rule {
                    selector,
                    declarations,
                } => format!("{selector}{{{}}}", inline(declarations)),
            })
            .collect();

        let mut css = blocks.join("\n");
        if pretty && !css.is_empty() {
            css.push('\n');
        }
        css
    }
}

/// `name:value;` pairs for a `style` attribute or a compact rule body.
pub fn inline(declarations: &Declarations) -> String {
    declarations
        .iter()
        .map(|(name, value)| format!("{name}:{value};"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decls(pairs: &[(&str, &str)]) -> Declarations {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_inline_declarations() {
        assert_eq!(
            inline(&decls(&[("color", "red"), ("margin", "0 auto")])),
            "color:red;margin:0 auto;"
        );
        assert_eq!(inline(&Declarations::new()), "");
    }

    #[test]
    fn test_rules_keep_first_seen_order() {
        let mut sheet = Stylesheet::new();
        sheet.add_rule(".b", decls(&[("color", "red")]));
        sheet.add_rule(".a", decls(&[("color", "blue")]));
        sheet.add_rule(".b", decls(&[("margin", "0"), ("color", "green")]));

        assert_eq!(
            sheet.render(false),
            ".b{color:green;margin:0;}\n.a{color:blue;}"
        );
    }

    #[test]
    fn test_pretty_render() {
        let mut sheet = Stylesheet::new();
        sheet.add_rule(".box:hover", decls(&[("color", "red"), ("opacity", "0.5")]));

        assert_eq!(
            sheet.render(true),
            ".box:hover {\n  color: red;\n  opacity: 0.5;\n}\n"
        );
    }

    #[test]
    fn test_raw_entries_stay_in_place() {
        let mut sheet = Stylesheet::new();
        sheet.add_rule("body", decls(&[("margin", "0")]));
        sheet.add_raw("  @media print { body { color: black; } }\n");
        sheet.add_rule("p", decls(&[("color", "gray")]));

        assert_eq!(
            sheet.render(false),
            "body{margin:0;}\n@media print { body { color: black; } }\np{color:gray;}"
        );
    }

    #[test]
    fn test_empty_rules_are_dropped() {
        let mut sheet = Stylesheet::new();
        sheet.add_rule(".empty", Declarations::new());
        sheet.add_raw("   ");
        assert!(sheet.is_empty());
        assert_eq!(sheet.render(true), "");
    }
}
