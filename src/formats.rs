use serde::{Deserialize, Serialize};

/// Exportable form of a document node, as published remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShareNode {
    Text {
        text: String,
    },
    Paragraph {
        children: Vec<ShareNode>,
    },
    Heading {
        level: u8,
        id: String,
        title: String,
        children: Vec<ShareNode>,
    },
    Code {
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
    },
    Media {
        src: String,
        alt: String,
    },
    Link {
        #[serde(skip_serializing_if = "Option::is_none")]
        href: Option<String>,
        children: Vec<ShareNode>,
    },
    Container {
        kind: String,
        children: Vec<ShareNode>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub text: String,
}

/// One entry of `text.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSections {
    pub section: Vec<Section>,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMapNode {
    pub folder: bool,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ChapterMapNode>>,
}

/// `books/{remote_path}/map.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMap {
    pub title: String,
    pub path: String,
    pub map: Vec<ChapterMapNode>,
}

/// `books/{remote_path}/{chapter_id}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterPayload {
    pub title: String,
    pub schema: Vec<ShareNode>,
}

/// `docs/{doc_id}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocPayload {
    pub schema: Vec<ShareNode>,
    pub title: String,
}

/// Ids of every leaf chapter in the map, folders flattened away.
pub fn leaf_ids(map: &[ChapterMapNode]) -> Vec<&str> {
    let mut ids = Vec::new();
    let mut stack = map.iter().collect::<Vec<_>>();
    while let Some(node) = stack.pop() {
        if node.folder {
            if let Some(children) = &node.children {
                stack.extend(children.iter());
            }
            continue;
        }
        if let Some(path) = node.path.as_deref() {
            ids.push(path);
        }
    }
    ids
}

impl ShareNode {
    /// Plain text of the node; code keeps its newlines, media contributes nothing.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        match self {
            ShareNode::Text { text } => out.push_str(text),
            ShareNode::Code { code, .. } => out.push_str(code),
            ShareNode::Media { .. } => {}
            ShareNode::Paragraph { children }
            | ShareNode::Heading { children, .. }
            | ShareNode::Link { children, .. }
            | ShareNode::Container { children, .. } => {
                for child in children {
                    child.push_text(out);
                }
            }
        }
    }
}

pub fn map_object(remote_path: &str) -> String {
    format!("books/{remote_path}/map.json")
}

pub fn text_object(remote_path: &str) -> String {
    format!("books/{remote_path}/text.json")
}

pub fn chapter_object(remote_path: &str, chapter_id: &str) -> String {
    format!("books/{remote_path}/{chapter_id}.json")
}

pub fn doc_object(doc_id: &str) -> String {
    format!("docs/{doc_id}.json")
}
