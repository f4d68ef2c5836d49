use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use strata::markdown::{ComrakRenderer, MarkdownRenderer, strip_block_wrapper};
use strata::node::{Element, Node};
use strata::render::{DisplayMode, Frame, RenderContext, Renderer, render_error};
use strata::value::{Date, DatePrecision, Duration, DurationUnit, Link, Value};

/// Wraps each fragment in a paragraph, the way a block-level markdown renderer
/// would. `slow:<ms>` fragments take that long.
#[derive(Default)]
struct Recording {
    calls: AtomicUsize,
}

#[async_trait]
impl MarkdownRenderer for Recording {
    async fn render(&self, markdown: &str, target: &mut Element, _origin: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = markdown.strip_prefix("slow:") {
            tokio::time::sleep(StdDuration::from_millis(ms.parse().unwrap_or(0))).await;
        }
        target.append_element(Element::new("p")).append_text(markdown);
    }
}

fn recording() -> (Arc<Recording>, Renderer) {
    let leaf = Arc::new(Recording::default());
    let renderer = Renderer::new(Arc::clone(&leaf) as Arc<dyn MarkdownRenderer>);
    (leaf, renderer)
}

fn comrak() -> Renderer {
    Renderer::new(Arc::new(ComrakRenderer::new()))
}

async fn html(renderer: &Renderer, value: &Value, ctx: &RenderContext, expand: bool) -> String {
    renderer.render_to_element(value, "origin.md", ctx, expand).await.to_html()
}

#[tokio::test]
async fn scalars_render_inline() {
    let (leaf, renderer) = recording();
    let ctx = RenderContext::default();
    assert_eq!(html(&renderer, &Value::from("hi"), &ctx, true).await, "<div class=\"strata-value\"><span>hi</span></div>");
    assert_eq!(html(&renderer, &Value::Number(3.0), &ctx, true).await, "<div class=\"strata-value\"><span>3</span></div>");
    assert_eq!(html(&renderer, &Value::Boolean(true), &ctx, true).await, "<div class=\"strata-value\"><span>true</span></div>");
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_containers_use_placeholders() {
    let (leaf, renderer) = recording();
    let ctx = RenderContext::default();
    assert_eq!(html(&renderer, &Value::array(vec![]), &ctx, true).await, "<div class=\"strata-value\">&lt;empty list&gt;</div>");
    let empty_object = Value::object(Vec::<(String, Value)>::new());
    assert_eq!(html(&renderer, &empty_object, &ctx, false).await, "<div class=\"strata-value\">&lt;empty object&gt;</div>");
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn depth_guard_cuts_off_deep_values() {
    let (_, renderer) = recording();
    let ctx = RenderContext::default().with_max_depth(1);
    let value = Value::array(vec![Value::array(vec![Value::array(vec![Value::from(1i64)])])]);
    assert_eq!(
        html(&renderer, &value, &ctx, true).await,
        "<div class=\"strata-value\"><ul class=\"value-list value-list-root\"><li class=\"value-list-item\">\
         <ul class=\"value-list value-list-nested\"><li class=\"value-list-item\">...</li></ul></li></ul></div>"
    );
}

#[tokio::test]
async fn deep_values_stay_bounded_at_the_default_depth() {
    let (leaf, renderer) = recording();
    let ctx = RenderContext::default();
    let mut value = Value::from("bottom");
    for _ in 0..1_000 {
        value = Value::array(vec![value]);
    }
    let root = renderer.render_to_element(&value, "deep.md", &ctx, false).await;
    assert!(root.text_content().contains("..."));
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn foreign_objects_and_functions_are_never_traversed() {
    let (leaf, renderer) = recording();
    let ctx = RenderContext::default();
    let value = Value::array(vec![Value::foreign("Widget", None), Value::function(Some("f"), |_| Value::Null)]);
    let root = renderer.render_to_element(&value, "o.md", &ctx, false).await;
    assert_eq!(root.text_content(), "<Widget>, <function>");
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sibling_order_survives_unequal_delays() {
    let (leaf, renderer) = recording();
    let ctx = RenderContext::default();
    let value = Value::array(vec![Value::from("slow:80"), Value::from("fast"), Value::from("slow:20")]);
    let inline = renderer.render_to_element(&value, "o.md", &ctx, false).await;
    assert_eq!(inline.text_content(), "slow:80, fast, slow:20");

    let expanded = renderer.render_to_element(&value, "o.md", &ctx, true).await;
    let list = expanded.element_children().next().expect("a list");
    let items: Vec<String> = list.element_children().map(Element::text_content).collect();
    assert_eq!(items, vec!["slow:80", "fast", "slow:20"]);
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn objects_render_keys_before_values() {
    let (_, renderer) = recording();
    let ctx = RenderContext::default();
    let value = Value::object([("a", Value::from(1i64)), ("b", Value::from("two"))]);
    let inline = renderer.render_to_element(&value, "o.md", &ctx, false).await;
    assert_eq!(inline.text_content(), "a: 1, b: two");
    assert!(inline.to_html().contains("value-inline-object"));

    let expanded = renderer.render_to_element(&value, "o.md", &ctx, true).await;
    let list = expanded.element_children().next().expect("a list");
    assert!(list.has_class("value-object"));
    let items: Vec<String> = list.element_children().map(Element::text_content).collect();
    assert_eq!(items, vec!["a: 1", "b: two"]);
}

#[tokio::test]
async fn links_render_through_the_markdown_renderer() {
    let renderer = comrak();
    let ctx = RenderContext::default();
    let value = Value::Link(Link::file("Note A").with_display("see this"));
    let out = html(&renderer, &value, &ctx, true).await;
    assert!(out.contains("class=\"internal-link\""), "{out}");
    assert!(out.contains(">see this</a>"), "{out}");
    assert!(out.contains("Note A"), "{out}");
    assert!(!out.contains("<p>"), "{out}");
}

#[tokio::test]
async fn null_uses_the_configured_placeholder() {
    let renderer = comrak();
    let ctx = RenderContext::default();
    let root = renderer.render_to_element(&Value::Null, "o.md", &ctx, true).await;
    assert_eq!(root.text_content(), "-");

    let ctx = RenderContext { null_placeholder: "*nothing*".into(), ..RenderContext::default() };
    let out = html(&renderer, &Value::Null, &ctx, true).await;
    assert_eq!(out, "<div class=\"strata-value\"><span><em>nothing</em></span></div>");
}

#[tokio::test]
async fn markdown_strings_keep_inline_formatting() {
    let renderer = comrak();
    let ctx = RenderContext::default();
    let out = html(&renderer, &Value::from("**bold** text"), &ctx, true).await;
    assert_eq!(out, "<div class=\"strata-value\"><span><strong>bold</strong> text</span></div>");

    // two paragraphs are not a single wrapper
    let root = renderer.render_to_element(&Value::from("one\n\ntwo"), "o.md", &ctx, true).await;
    let span = root.element_children().next().expect("span");
    assert_eq!(span.element_children().filter(|e| e.tag() == "p").count(), 2);
}

#[test]
fn strip_rule_only_unwraps_a_sole_paragraph() {
    let mut wrapper = Element::new("span");
    wrapper.append_element(Element::new("p")).append_text("x");
    strip_block_wrapper(&mut wrapper);
    assert_eq!(wrapper.children(), &[Node::Text("x".into())]);

    let mut wrapper = Element::new("span");
    wrapper.append_element(Element::new("h1")).append_text("x");
    strip_block_wrapper(&mut wrapper);
    assert_eq!(wrapper.element_children().next().map(Element::tag), Some("h1"));
}

#[test]
fn strip_rule_keeps_text_around_the_paragraph() {
    let mut wrapper = Element::new("span");
    wrapper.append_text("a ");
    wrapper.append_element(Element::new("p")).append_text("b");
    strip_block_wrapper(&mut wrapper);
    assert_eq!(wrapper.children(), &[Node::Text("a ".into()), Node::Text("b".into())]);

    let mut empty = Element::new("span");
    strip_block_wrapper(&mut empty);
    assert!(empty.is_empty());
}

#[tokio::test]
async fn raw_html_is_inserted_verbatim() {
    let (leaf, renderer) = recording();
    let out = html(&renderer, &Value::html("<b>x</b>"), &RenderContext::default(), true).await;
    assert_eq!(out, "<div class=\"strata-value\"><b>x</b></div>");
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dates_and_durations_use_the_formatter() {
    let (_, renderer) = recording();
    let ctx = RenderContext::default();
    let day = Date::from_parts(1_709_251_200, 0, 0, DatePrecision::Day).expect("2024-03-01");
    let timed = Date::from_parts(1_709_251_200 + 9 * 3600 + 30 * 60, 0, 0, DatePrecision::Minute).expect("09:30");
    let month = Date::from_parts(1_709_251_200, 0, 0, DatePrecision::Month).expect("2024-03");

    let text = |v: Value| {
        let renderer = renderer.clone();
        let ctx = ctx.clone();
        async move { renderer.render_to_element(&v, "d.md", &ctx, true).await.text_content() }
    };
    assert_eq!(text(Value::Date(day)).await, "March 01, 2024");
    assert_eq!(text(Value::Date(timed)).await, "9:30 AM - March 01, 2024");
    assert_eq!(text(Value::Date(month)).await, "March 2024");

    let duration = Duration::new()
        .with(DurationUnit::Years, 1.0)
        .and_then(|d| d.with(DurationUnit::Days, 2.0))
        .and_then(|d| d.with(DurationUnit::Hours, 1.5))
        .expect("finite");
    assert_eq!(text(Value::Duration(duration)).await, "1 year, 2 days, 1.5 hours");
    assert_eq!(text(Value::Duration(Duration::new())).await, "0 seconds");
}

#[tokio::test]
async fn dates_follow_the_locale() {
    let (_, renderer) = recording();
    let march = Value::Date(Date::from_parts(1_709_251_200, 0, 0, DatePrecision::Day).expect("2024-03-01"));
    let in_locale = |locale: &str| RenderContext { locale: locale.to_owned(), ..RenderContext::default() };

    let french = renderer.render_to_element(&march, "d.md", &in_locale("fr-FR"), true).await;
    assert_eq!(french.text_content(), "mars 01, 2024");
    let bare = renderer.render_to_element(&march, "d.md", &in_locale("fr"), true).await;
    assert_eq!(bare.text_content(), "mars 01, 2024");
    let unknown = renderer.render_to_element(&march, "d.md", &in_locale("xx-YY"), true).await;
    assert_eq!(unknown.text_content(), "March 01, 2024");
}

#[tokio::test]
async fn tables_have_a_header_row_and_a_row_per_record() {
    let (_, renderer) = recording();
    let ctx = RenderContext::default();
    let headers = vec!["File".to_owned(), "Rating".to_owned()];
    let rows = vec![
        vec![Value::Link(Link::file("A")), Value::from(3i64)],
        vec![Value::Link(Link::file("B")), Value::array(vec![Value::from(1i64), Value::from(2i64)])],
    ];
    let mut root = Element::new("div");
    renderer.render_table(&headers, &rows, &mut root, "t.md", &ctx).await;
    let out = root.to_html();
    assert!(out.starts_with("<div><table class=\"value-table\"><thead><tr><th><span>File</span></th><th><span>Rating</span></th></tr></thead><tbody>"), "{out}");
    assert_eq!(out.matches("<tr>").count(), 3);
    // cells are expanded
    assert!(out.contains("<td><ul class=\"value-list value-list-root\">"), "{out}");
}

#[tokio::test]
async fn lists_render_one_item_per_value() {
    let (_, renderer) = recording();
    let ctx = RenderContext::default();
    let mut root = Element::new("div");
    renderer.render_list(&[Value::from("a"), Value::from("b")], &mut root, "l.md", &ctx).await;
    assert_eq!(
        root.to_html(),
        "<div><ul class=\"value-list value-list-root\"><li class=\"value-list-item\"><span>a</span></li>\
         <li class=\"value-list-item\"><span>b</span></li></ul></div>"
    );
}

#[tokio::test]
async fn explicit_frames_start_deeper() {
    let (_, renderer) = recording();
    let ctx = RenderContext::default().with_mode(DisplayMode::List);
    let mut root = Element::new("div");
    let frame = Frame { expand_list: true, mode: DisplayMode::List, depth: ctx.max_depth + 1 };
    renderer.render_value(&Value::from("x"), &mut root, "f.md", &ctx, frame).await;
    assert_eq!(root.text_content(), "...");
    assert_eq!(Frame::root(true, DisplayMode::Root).descend(DisplayMode::List).depth, 1);
}

#[test]
fn errors_render_as_preformatted_blocks() {
    let mut root = Element::new("div");
    render_error(&mut root, "bad <input>");
    assert_eq!(root.to_html(), "<div><pre class=\"value-error\">bad &lt;input&gt;</pre></div>");
}
