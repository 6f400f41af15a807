use std::collections::HashMap;
use std::path::Path;

use crate::document::Node;
use crate::formats::{Section, ShareNode};
use crate::hash::path_id;
use crate::paths::{decode_reference, exists, is_external, resolve_reference};
use crate::publish::Publisher;
use crate::slug::slugify;
use crate::store::index::IndexStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub schema: Vec<ShareNode>,
    pub sections: Vec<Section>,
}

/// Turns a parsed document into its exportable form.
///
/// Local images are published first (in document order, once per distinct
/// reference); then the tree is rewritten with links pointing at remote ids.
/// With `remote_path` set, links target chapters of that book, otherwise
/// standalone docs.
pub async fn transform_document(
    nodes: &[Node],
    doc_path: &Path,
    remote_path: Option<&str>,
    publisher: &mut Publisher,
    index: &dyn IndexStore,
) -> anyhow::Result<Transformed> {
    let mut references = Vec::new();
    collect_media(nodes, &mut references);

    let mut media: HashMap<String, String> = HashMap::new();
    for reference in references {
        if media.contains_key(reference) {
            continue;
        }
        publisher.check_cancelled()?;
        let src = publisher.upload_media(index, reference, doc_path).await?;
        media.insert(reference.to_owned(), src);
    }

    let rewriter = Rewriter {
        doc_path,
        remote_path,
        media: &media,
    };
    let schema = rewriter.rewrite_all(nodes);
    let sections = extract_sections(&schema);
    Ok(Transformed { schema, sections })
}

fn collect_media<'n>(nodes: &'n [Node], out: &mut Vec<&'n str>) {
    for node in nodes {
        if let Node::Media { url, .. } = node {
            out.push(url);
        }
        collect_media(node.children(), out);
    }
}

struct Rewriter<'a> {
    doc_path: &'a Path,
    remote_path: Option<&'a str>,
    media: &'a HashMap<String, String>,
}

impl Rewriter<'_> {
    fn rewrite_all(&self, nodes: &[Node]) -> Vec<ShareNode> {
        nodes.iter().map(|node| self.rewrite(node)).collect()
    }

    fn rewrite(&self, node: &Node) -> ShareNode {
        match node {
            Node::Text(text) => ShareNode::Text { text: text.clone() },
            Node::Paragraph(children) => ShareNode::Paragraph {
                children: self.rewrite_all(children),
            },
            Node::Heading { level, children } => {
                let title = node.text();
                ShareNode::Heading {
                    level: *level,
                    id: slugify(&title),
                    title,
                    children: self.rewrite_all(children),
                }
            }
            Node::Code { language, children } => ShareNode::Code {
                language: language.clone(),
                code: children.iter().map(Node::text).collect::<Vec<_>>().join("\n"),
            },
            Node::Media { url, alt } => ShareNode::Media {
                src: self.media.get(url).cloned().unwrap_or_else(|| url.clone()),
                alt: alt.clone(),
            },
            Node::Link { url, children } => ShareNode::Link {
                href: self.resolve_href(url),
                children: self.rewrite_all(children),
            },
            Node::Container { kind, children } => ShareNode::Container {
                kind: kind.clone(),
                children: self.rewrite_all(children),
            },
        }
    }

    /// `None` when the link points at a local file that does not exist.
    fn resolve_href(&self, url: &str) -> Option<String> {
        if url.is_empty() {
            return None;
        }
        if is_external(url) {
            return Some(url.to_owned());
        }

        let (target, fragment) = match url.split_once('#') {
            Some((target, fragment)) => (target, Some(fragment)),
            None => (url, None),
        };
        let anchor = fragment
            .map(|fragment| slugify(&decode_reference(fragment)))
            .filter(|slug| !slug.is_empty())
            .map(|slug| format!("#{slug}"))
            .unwrap_or_default();

        // A bare `#fragment` stays within the current document.
        let target_path = if target.is_empty() {
            self.doc_path.to_path_buf()
        } else {
            resolve_reference(self.doc_path, target)
        };
        if !exists(&target_path) {
            tracing::debug!(
                link = url,
                doc = %self.doc_path.display(),
                "link target missing; dropping href"
            );
            return None;
        }

        let id = path_id(&target_path);
        Some(match self.remote_path {
            Some(remote_path) => format!("/book/{remote_path}/{id}{anchor}"),
            None => format!("/doc/{id}{anchor}"),
        })
    }
}

/// Splits top-level content into heading-anchored sections. Content before
/// the first heading belongs to no section.
pub fn extract_sections(schema: &[ShareNode]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for node in schema {
        if let ShareNode::Heading { id, title, .. } = node {
            sections.extend(current.take());
            current = Some(Section {
                id: id.clone(),
                title: title.clone(),
                text: String::new(),
            });
            continue;
        }
        let Some(section) = current.as_mut() else {
            continue;
        };
        let text = node.text();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if !section.text.is_empty() {
            section.text.push('\n');
        }
        section.text.push_str(text);
    }
    sections.extend(current);
    sections
}
