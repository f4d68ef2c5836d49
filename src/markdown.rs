//! Leaf markdown rendering.
//!
//! The renderer only ever hands small fragments (a string, a link, the null
//! placeholder) to a [`MarkdownRenderer`]. [`ComrakRenderer`] is the default.

// used to declare an async leaf renderer usable behind Arc<dyn ..>
use async_trait::async_trait;
// used to parse markdown fragments
use comrak::nodes::{AstNode, NodeValue};
use comrak::{Arena, ComrakOptions, parse_document};

use crate::node::{Element, Node};

/// Renders a markdown fragment into `target`. `origin` is the path of the
/// document the fragment came from, used to resolve relative links.
#[async_trait]
pub trait MarkdownRenderer: Send + Sync {
    async fn render(&self, markdown: &str, target: &mut Element, origin: &str);
}

/// Renders `markdown` into a transient `span` and appends that span to
/// `container`. When the span ends up holding a single `p`, the paragraph is
/// unwrapped so short values stay inline.
pub async fn render_compact(renderer: &dyn MarkdownRenderer, markdown: &str, container: &mut Element, origin: &str) {
    let mut span = Element::new("span");
    renderer.render(markdown, &mut span, origin).await;
    strip_block_wrapper(&mut span);
    container.append(Node::Element(span));
}

/// Moves the children of a sole `p` child up into `wrapper`. Wrappers with
/// any other shape are left alone.
pub fn strip_block_wrapper(wrapper: &mut Element) {
    let single_paragraph = {
        let mut elements = wrapper.element_children();
        match (elements.next(), elements.next()) {
            (Some(only), None) => only.tag() == "p",
            _ => false,
        }
    };
    if !single_paragraph {
        return;
    }
    let children = wrapper.take_children();
    for child in children {
        match child {
            Node::Element(mut p) if p.tag() == "p" => {
                for inner in p.take_children() {
                    wrapper.append(inner);
                }
            }
            other => wrapper.append(other),
        }
    }
}

// ------------- ComrakRenderer -------------
#[derive(Debug, Clone, Default)]
pub struct ComrakRenderer;

impl ComrakRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MarkdownRenderer for ComrakRenderer {
    async fn render(&self, markdown: &str, target: &mut Element, _origin: &str) {
        for node in markdown_to_nodes(markdown) {
            target.append(node);
        }
    }
}

// comrak options and arenas are not Send, so they never outlive this call
fn comrak_options() -> ComrakOptions<'static> {
    let mut options = ComrakOptions::default();
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.extension.wikilinks_title_after_pipe = true;
    options
}

/// Converts a markdown fragment into owned nodes.
pub fn markdown_to_nodes(markdown: &str) -> Vec<Node> {
    let arena = Arena::new();
    let options = comrak_options();
    let root = parse_document(&arena, markdown, &options);
    let mut out = Vec::new();
    for child in root.children() {
        convert(child, &options, &mut out);
    }
    out
}

fn convert<'a>(node: &'a AstNode<'a>, options: &ComrakOptions, out: &mut Vec<Node>) {
    let element = {
        let data = node.data.borrow();
        match &data.value {
            NodeValue::Text(text) => {
                out.push(Node::Text(text.clone()));
                return;
            }
            NodeValue::SoftBreak => {
                out.push(Node::Text(" ".to_owned()));
                return;
            }
            NodeValue::Code(code) => {
                let mut el = Element::new("code");
                el.append_text(code.literal.clone());
                out.push(Node::Element(el));
                return;
            }
            NodeValue::HtmlInline(html) => {
                out.push(Node::Html(html.clone()));
                return;
            }
            NodeValue::LineBreak => Some(Element::new("br")),
            NodeValue::Paragraph => Some(Element::new("p")),
            NodeValue::Emph => Some(Element::new("em")),
            NodeValue::Strong => Some(Element::new("strong")),
            NodeValue::Strikethrough => Some(Element::new("del")),
            NodeValue::Heading(heading) => Some(Element::new(format!("h{}", heading.level))),
            NodeValue::Link(link) => Some(Element::new("a").with_attribute("href", link.url.clone())),
            NodeValue::WikiLink(link) => Some(
                Element::new("a")
                    .with_class("internal-link")
                    .with_attribute("data-href", link.url.clone())
                    .with_attribute("href", link.url.clone()),
            ),
            _ => None,
        }
    };
    let Some(mut element) = element else {
        // block structures a value fragment rarely contains
        let mut html = Vec::new();
        if comrak::format_html(node, options, &mut html).is_ok() {
            out.push(Node::Html(String::from_utf8_lossy(&html).into_owned()));
        }
        return;
    };
    let mut children = Vec::new();
    for child in node.children() {
        convert(child, options, &mut children);
    }
    for child in children {
        element.append(child);
    }
    out.push(Node::Element(element));
}
