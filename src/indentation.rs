use std::fmt::{self, Display, Formatter, Write};

use crate::document::{Document, Element, Node};

/// One level of indentation, written as a run of spaces.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Indentation {
    spaces: u8,
}

impl Default for Indentation {
    fn default() -> Self {
        Self::spaces(2)
    }
}

impl Display for Indentation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for _ in 0..self.spaces {
            f.write_char(' ')?;
        }
        Ok(())
    }
}

struct LineIndent {
    indentation: Indentation,
    count: usize,
}

impl Display for LineIndent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_char('\n')?;
        for _ in 0..self.count {
            Display::fmt(&self.indentation, f)?;
        }

        Ok(())
    }
}

impl Indentation {
    pub fn spaces(spaces: u8) -> Self {
        Self { spaces }
    }

    /// Re-indent the whole document so every element sits on its own line, one unit deeper
    /// than its parent.
    ///
    /// Only whitespace is ever rewritten: a run of text between two structural nodes that
    /// holds anything else is left exactly as it was, and so is every element that has no
    /// element, comment or processing-instruction children.
    pub fn apply(&self, document: &mut Document) {
        self.indent_element(document.root_mut(), 0);
    }

    fn line(&self, count: usize) -> String {
        LineIndent {
            indentation: *self,
            count,
        }
        .to_string()
    }

    fn indent_element(&self, element: &mut Element, level: usize) {
        let children = element.children_mut();
        if !children.iter().any(Node::is_structural) {
            return;
        }

        let inner = self.line(level + 1);
        let outer = self.line(level);

        let mut indented = Vec::with_capacity(children.len());
        let mut text_run = Vec::new();
        for mut node in std::mem::take(children) {
            if !node.is_structural() {
                text_run.push(node);
                continue;
            }

            flush_text_run(&mut indented, &mut text_run, &inner);
            if let Node::Element(child) = &mut node {
                self.indent_element(child, level + 1);
            }
            indented.push(node);
        }
        flush_text_run(&mut indented, &mut text_run, &outer);

        *children = indented;
    }
}

fn flush_text_run(indented: &mut Vec<Node>, text_run: &mut Vec<Node>, whitespace: &str) {
    if text_run.iter().all(Node::is_whitespace) {
        text_run.clear();
        indented.push(Node::Text(whitespace.to_string()));
    } else {
        indented.append(text_run);
    }
}
