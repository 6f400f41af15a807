use std::path::Path;

/// One node of a structured document, as handed over by a [`SchemaProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Paragraph(Vec<Node>),
    Heading { level: u8, children: Vec<Node> },
    /// Children are the source lines, one text node per line.
    Code {
        language: Option<String>,
        children: Vec<Node>,
    },
    Media { url: String, alt: String },
    Link { url: String, children: Vec<Node> },
    /// Anything without sync semantics: lists, quotes, emphasis, tables, ...
    Container { kind: String, children: Vec<Node> },
}

impl Node {
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Text(_) | Node::Media { .. } => &[],
            Node::Paragraph(children)
            | Node::Heading { children, .. }
            | Node::Code { children, .. }
            | Node::Link { children, .. }
            | Node::Container { children, .. } => children,
        }
    }

    /// Concatenated text of the node and all of its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(text),
            Node::Media { .. } => {}
            _ => {
                for child in self.children() {
                    child.push_text(out);
                }
            }
        }
    }
}

/// Source of document trees for files on disk.
pub trait SchemaProvider: Send + Sync {
    fn schema(&self, path: &Path) -> anyhow::Result<Vec<Node>>;
}
