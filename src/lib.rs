//! Strata: typed values extracted from a corpus of notes, and the two ways they
//! travel: off-thread import and recursive rendering.
//!
//! Everything centers on the [`value::Value`] model, a closed union of null,
//! booleans, numbers, strings, dates, durations, links, raw markup, functions,
//! arrays and objects.
//!
//! ## Import
//! An [`import::ImportPool`] parses documents on worker threads with a
//! [`parse::DocumentParser`] (by default [`parse::FieldParser`], which reads
//! inline `key:: value` fields, tags and outlinks). A parsed value crosses back
//! to the caller in its [`codec::TransferEncoding`], a JSON tree in which every
//! variant that JSON cannot express is written as a `{"$transfer": tag, ..}`
//! record. Functions and foreign objects degrade to placeholders on the way.
//!
//! ## Rendering
//! A [`render::Renderer`] projects a value into an HTML [`node::Element`] tree:
//! arrays and objects become nested lists or inline spans, scalars go through a
//! [`markdown::MarkdownRenderer`] and dates and durations through a
//! [`format::TemporalFormatter`]. Nesting beyond the configured depth is cut
//! off.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use strata::markdown::ComrakRenderer;
//! use strata::render::{RenderContext, Renderer};
//! use strata::value::{Link, Value};
//!
//! let renderer = Renderer::new(Arc::new(ComrakRenderer::new()));
//! let value = Value::array(vec![Value::from(1i64), Value::Link(Link::file("Note A"))]);
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let html = rt
//!     .block_on(renderer.render_to_element(&value, "index.md", &RenderContext::default(), false))
//!     .to_html();
//! assert!(html.contains("internal-link"));
//! ```
//!
//! ## Configuration
//! [`settings::Loader`] layers TOML files, `STRATA__SECTION__KEY` environment
//! variables and overrides over the built-in defaults.

pub mod codec;
pub mod error;
pub mod format;
pub mod import;
pub mod index;
pub mod markdown;
pub mod node;
pub mod parse;
pub mod render;
pub mod server;
pub mod settings;
pub mod value;
