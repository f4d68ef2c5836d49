//! Projects values into nested HTML structures.
//!
//! The walk is depth-first and strictly sequential: every leaf render is
//! awaited before its next sibling starts, so the output order always matches
//! the input order no matter how long each leaf takes. Depth is carried in a
//! [`Frame`] passed by value; anything deeper than the context's limit is cut
//! off with [`TRUNCATED`].

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;

use crate::format::{MinimalFormatter, TemporalFormatter};
use crate::markdown::{MarkdownRenderer, render_compact};
use crate::node::Element;
use crate::settings::RenderSettings;
use crate::value::{Markup, Value, number_text};

pub const TRUNCATED: &str = "...";
pub const FUNCTION_PLACEHOLDER: &str = "<function>";
pub const EMPTY_LIST: &str = "<empty list>";
pub const EMPTY_OBJECT: &str = "<empty object>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// The value stands on its own.
    Root,
    /// The value is an entry of an enclosing list or object.
    List,
}

/// Per-render settings, built fresh for each top-level render and only read
/// during the walk.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub max_depth: usize,
    pub null_placeholder: String,
    pub locale: String,
    pub date_format: String,
    pub date_time_format: String,
    pub mode: DisplayMode,
}

impl RenderContext {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            max_depth: settings.max_recursive_render_depth,
            null_placeholder: settings.render_null_as.clone(),
            locale: settings.locale.clone(),
            date_format: settings.date_format.clone(),
            date_time_format: settings.date_time_format.clone(),
            mode: DisplayMode::Root,
        }
    }
    pub fn with_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            max_depth: 4,
            null_placeholder: "\\-".to_owned(),
            locale: "en-US".to_owned(),
            date_format: "%B %d, %Y".to_owned(),
            date_time_format: "%-I:%M %p - %B %d, %Y".to_owned(),
            mode: DisplayMode::Root,
        }
    }
}

/// Position of one recursive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub expand_list: bool,
    pub mode: DisplayMode,
    pub depth: usize,
}

impl Frame {
    pub fn root(expand_list: bool, mode: DisplayMode) -> Self {
        Self { expand_list, mode, depth: 0 }
    }
    pub fn descend(self, mode: DisplayMode) -> Self {
        Self { mode, depth: self.depth + 1, ..self }
    }
}

#[derive(Clone)]
pub struct Renderer {
    markdown: Arc<dyn MarkdownRenderer>,
    temporal: Arc<dyn TemporalFormatter>,
}

impl Renderer {
    pub fn new(markdown: Arc<dyn MarkdownRenderer>) -> Self {
        Self { markdown, temporal: Arc::new(MinimalFormatter) }
    }
    pub fn with_formatter(mut self, temporal: Arc<dyn TemporalFormatter>) -> Self {
        self.temporal = temporal;
        self
    }

    /// Renders `value` at the root of `container`.
    pub async fn render(&self, value: &Value, container: &mut Element, origin: &str, ctx: &RenderContext, expand_list: bool) {
        self.render_value(value, container, origin, ctx, Frame::root(expand_list, ctx.mode)).await
    }

    /// Renders `value` into a fresh `div`.
    pub async fn render_to_element(&self, value: &Value, origin: &str, ctx: &RenderContext, expand_list: bool) -> Element {
        let mut root = Element::new("div").with_class("strata-value");
        self.render(value, &mut root, origin, ctx, expand_list).await;
        root
    }

    pub fn render_value<'a>(
        &'a self,
        value: &'a Value,
        container: &'a mut Element,
        origin: &'a str,
        ctx: &'a RenderContext,
        frame: Frame,
    ) -> BoxFuture<'a, ()> {
        async move {
            if frame.depth > ctx.max_depth {
                container.append_text(TRUNCATED);
                return;
            }
            match value {
                Value::Null => render_compact(&*self.markdown, &ctx.null_placeholder, container, origin).await,
                Value::Boolean(b) => render_compact(&*self.markdown, &b.to_string(), container, origin).await,
                Value::Number(n) => render_compact(&*self.markdown, &number_text(*n), container, origin).await,
                Value::String(s) => render_compact(&*self.markdown, s, container, origin).await,
                Value::Link(link) => render_compact(&*self.markdown, &link.markdown(), container, origin).await,
                Value::Date(date) => container.append_text(self.temporal.format_date(date, ctx)),
                Value::Duration(duration) => container.append_text(self.temporal.format_duration(duration, ctx)),
                Value::RawMarkup(Markup::Html(html)) => container.append_html(html.clone()),
                // foreign objects are shown by name and never looked into
                Value::RawMarkup(Markup::Foreign(foreign)) => {
                    container.append_text(format!("<{}>", foreign.type_name()))
                }
                Value::Function(_) => container.append_text(FUNCTION_PLACEHOLDER),
                Value::Array(items) if items.is_empty() => container.append_text(EMPTY_LIST),
                Value::Array(items) if frame.expand_list => {
                    let list = container.append_element(list_element(frame.mode));
                    for item in items.iter() {
                        let li = list.append_element(Element::new("li").with_class("value-list-item"));
                        self.render_value(item, li, origin, ctx, frame.descend(DisplayMode::List)).await;
                    }
                }
                Value::Array(items) => {
                    let span = container.append_element(Element::new("span").with_class("value-inline-list"));
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            span.append_text(", ");
                        }
                        self.render_value(item, span, origin, ctx, frame.descend(DisplayMode::List)).await;
                    }
                }
                Value::Object(map) if map.is_empty() => container.append_text(EMPTY_OBJECT),
                Value::Object(map) if frame.expand_list => {
                    let list = container.append_element(Element::new("ul").with_class("value-object"));
                    for (key, entry) in map {
                        let li = list.append_element(Element::new("li").with_class("value-object-item"));
                        li.append_text(format!("{}: ", key));
                        self.render_value(entry, li, origin, ctx, frame.descend(DisplayMode::List)).await;
                    }
                }
                Value::Object(map) => {
                    let span = container.append_element(Element::new("span").with_class("value-inline-object"));
                    for (i, (key, entry)) in map.iter().enumerate() {
                        if i > 0 {
                            span.append_text(", ");
                        }
                        span.append_text(format!("{}: ", key));
                        self.render_value(entry, span, origin, ctx, frame.descend(DisplayMode::List)).await;
                    }
                }
            }
        }
        .boxed()
    }

    /// Renders each value as one expanded list item.
    pub async fn render_list(&self, items: &[Value], container: &mut Element, origin: &str, ctx: &RenderContext) {
        let list = container.append_element(list_element(DisplayMode::Root));
        for item in items {
            let li = list.append_element(Element::new("li").with_class("value-list-item"));
            self.render_value(item, li, origin, ctx, Frame::root(true, DisplayMode::List)).await;
        }
    }

    /// Renders a header row and one row per record. Headers are markdown.
    pub async fn render_table(
        &self,
        headers: &[String],
        rows: &[Vec<Value>],
        container: &mut Element,
        origin: &str,
        ctx: &RenderContext,
    ) {
        let table = container.append_element(Element::new("table").with_class("value-table"));
        let head = table.append_element(Element::new("thead")).append_element(Element::new("tr"));
        for header in headers {
            let th = head.append_element(Element::new("th"));
            render_compact(&*self.markdown, header, th, origin).await;
        }
        let body = table.append_element(Element::new("tbody"));
        for row in rows {
            let tr = body.append_element(Element::new("tr"));
            for cell in row {
                let td = tr.append_element(Element::new("td"));
                self.render_value(cell, td, origin, ctx, Frame::root(true, DisplayMode::Root)).await;
            }
        }
    }
}

/// Appends a preformatted error block.
pub fn render_error(container: &mut Element, message: &str) {
    let pre = container.append_element(Element::new("pre").with_class("value-error"));
    pre.append_text(message);
}

fn list_element(mode: DisplayMode) -> Element {
    let level = match mode {
        DisplayMode::Root => "value-list-root",
        DisplayMode::List => "value-list-nested",
    };
    Element::new("ul").with_classes(["value-list", level])
}
