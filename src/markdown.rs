use std::path::Path;

use anyhow::Context as _;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

use crate::document::{Node, SchemaProvider};

/// Reads Markdown files from disk and parses them into document trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownProvider;

impl SchemaProvider for MarkdownProvider {
    fn schema(&self, path: &Path) -> anyhow::Result<Vec<Node>> {
        let md = std::fs::read_to_string(path)
            .with_context(|| format!("read markdown: {}", path.display()))?;
        Ok(parse_markdown(&md))
    }
}

#[derive(Debug)]
enum FrameKind {
    Root,
    Paragraph,
    Heading(u8),
    Code(Option<String>),
    Link(String),
    Image(String),
    Container(&'static str),
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    children: Vec<Node>,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    fn into_node(self) -> Option<Node> {
        let node = match self.kind {
            FrameKind::Root => return None,
            FrameKind::Paragraph => Node::Paragraph(self.children),
            FrameKind::Heading(level) => Node::Heading {
                level,
                children: self.children,
            },
            FrameKind::Code(language) => {
                let source = self.children.iter().map(Node::text).collect::<String>();
                Node::Code {
                    language,
                    children: source
                        .lines()
                        .map(|line| Node::Text(line.to_owned()))
                        .collect(),
                }
            }
            FrameKind::Link(url) => Node::Link {
                url,
                children: self.children,
            },
            FrameKind::Image(url) => Node::Media {
                url,
                alt: self.children.iter().map(Node::text).collect(),
            },
            FrameKind::Container(kind) => Node::Container {
                kind: kind.to_owned(),
                children: self.children,
            },
        };
        Some(node)
    }
}

pub fn parse_markdown(md: &str) -> Vec<Node> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut stack = vec![Frame::new(FrameKind::Root)];
    for event in Parser::new_ext(md, options) {
        match event {
            Event::Start(tag) => stack.push(Frame::new(frame_kind(tag))),
            Event::End(_) => {
                if stack.len() < 2 {
                    continue;
                }
                let Some(frame) = stack.pop() else {
                    continue;
                };
                if let Some(node) = frame.into_node() {
                    push_child(&mut stack, node);
                }
            }
            Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => {
                push_child(&mut stack, Node::Text(text.into_string()));
            }
            Event::Code(code) => push_child(
                &mut stack,
                Node::Container {
                    kind: "inline-code".to_owned(),
                    children: vec![Node::Text(code.into_string())],
                },
            ),
            Event::SoftBreak => push_child(&mut stack, Node::Text(" ".to_owned())),
            Event::HardBreak => push_child(&mut stack, Node::Text("\n".to_owned())),
            Event::Rule => push_child(
                &mut stack,
                Node::Container {
                    kind: "rule".to_owned(),
                    children: Vec::new(),
                },
            ),
            Event::TaskListMarker(checked) => push_child(
                &mut stack,
                Node::Container {
                    kind: if checked { "task-done" } else { "task-open" }.to_owned(),
                    children: Vec::new(),
                },
            ),
            Event::FootnoteReference(label) => {
                push_child(&mut stack, Node::Text(format!("[^{}]", &*label)));
            }
            _ => {}
        }
    }

    // Unbalanced input cannot come out of the parser, but fold any leftovers anyway.
    while stack.len() > 1 {
        let Some(frame) = stack.pop() else {
            break;
        };
        if let Some(node) = frame.into_node() {
            push_child(&mut stack, node);
        }
    }
    stack.pop().map(|root| root.children).unwrap_or_default()
}

fn push_child(stack: &mut [Frame], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn frame_kind(tag: Tag<'_>) -> FrameKind {
    match tag {
        Tag::Paragraph => FrameKind::Paragraph,
        Tag::Heading { level, .. } => FrameKind::Heading(level as u8),
        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => {
            let language = info
                .split_whitespace()
                .next()
                .filter(|lang| !lang.is_empty())
                .map(str::to_owned);
            FrameKind::Code(language)
        }
        Tag::CodeBlock(CodeBlockKind::Indented) => FrameKind::Code(None),
        Tag::Link { dest_url, .. } => FrameKind::Link(dest_url.into_string()),
        Tag::Image { dest_url, .. } => FrameKind::Image(dest_url.into_string()),
        Tag::BlockQuote(_) => FrameKind::Container("blockquote"),
        Tag::List(Some(_)) => FrameKind::Container("ordered-list"),
        Tag::List(None) => FrameKind::Container("list"),
        Tag::Item => FrameKind::Container("list-item"),
        Tag::Emphasis => FrameKind::Container("emphasis"),
        Tag::Strong => FrameKind::Container("strong"),
        Tag::Strikethrough => FrameKind::Container("strikethrough"),
        Tag::Table(_) => FrameKind::Container("table"),
        Tag::TableHead => FrameKind::Container("table-head"),
        Tag::TableRow => FrameKind::Container("table-row"),
        Tag::TableCell => FrameKind::Container("table-cell"),
        Tag::FootnoteDefinition(_) => FrameKind::Container("footnote"),
        _ => FrameKind::Container("block"),
    }
}
