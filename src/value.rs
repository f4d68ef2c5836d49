//! The closed value model shared by the import pipeline, the transfer codec and
//! the renderer.
//!
//! A [`Value`] is created once (by a parse routine or by decoding a transfer
//! encoding) and is never mutated afterwards. Containers nest arbitrarily, so
//! code walking a value must bound its own depth.

// used for the instants behind dates
use chrono::{DateTime, FixedOffset, Timelike, Utc};
// objects keep their insertion order
use indexmap::IndexMap;

// used for foreign payloads which we can hold but never look into
use std::any::Any;
// used to print out readable forms of a value
use std::fmt;
use std::ops;
use std::sync::Arc;

pub type Object = IndexMap<String, Value>;

/// The variant tag of a value, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    Date,
    Duration,
    Link,
    RawMarkup,
    Function,
    Array,
    Object,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Date => "date",
            ValueKind::Duration => "duration",
            ValueKind::Link => "link",
            ValueKind::RawMarkup => "markup",
            ValueKind::Function => "function",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(Date),
    Duration(Duration),
    Link(Link),
    RawMarkup(Markup),
    Function(Function),
    Array(List),
    Object(Object),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(List::Owned(items))
    }
    pub fn shared_array(items: Arc<[Value]>) -> Self {
        Value::Array(List::Shared(items))
    }
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
    pub fn html(markup: impl Into<String>) -> Self {
        Value::RawMarkup(Markup::Html(markup.into()))
    }
    pub fn foreign(type_name: impl Into<String>, payload: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Value::RawMarkup(Markup::Foreign(Foreign::new(type_name, payload)))
    }
    pub fn function<F>(name: Option<&str>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Value::Function(Function::new(name, f))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Date(_) => ValueKind::Date,
            Value::Duration(_) => ValueKind::Duration,
            Value::Link(_) => ValueKind::Link,
            Value::RawMarkup(_) => ValueKind::RawMarkup,
            Value::Function(_) => ValueKind::Function,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }
    pub fn is_date(&self) -> bool {
        matches!(self, Value::Date(_))
    }
    pub fn is_duration(&self) -> bool {
        matches!(self, Value::Duration(_))
    }
    pub fn is_link(&self) -> bool {
        matches!(self, Value::Link(_))
    }
    pub fn is_markup(&self) -> bool {
        matches!(self, Value::RawMarkup(_))
    }
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }
    /// True for both the owned and the shared array representation.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<&Date> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }
    pub fn as_duration(&self) -> Option<&Duration> {
        match self {
            Value::Duration(d) => Some(d),
            _ => None,
        }
    }
    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Value::Link(l) => Some(l),
            _ => None,
        }
    }
    pub fn as_markup(&self) -> Option<&Markup> {
        match self {
            Value::RawMarkup(m) => Some(m),
            _ => None,
        }
    }
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Whether a value of `kind` occurs anywhere in this tree. Walks with an
    /// explicit stack, so arbitrarily deep trees cannot exhaust the call stack.
    pub fn contains_kind(&self, kind: ValueKind) -> bool {
        let mut stack = vec![self];
        while let Some(value) = stack.pop() {
            if value.kind() == kind {
                return true;
            }
            match value {
                Value::Array(items) => stack.extend(items.iter()),
                Value::Object(map) => stack.extend(map.values()),
                _ => (),
            }
        }
        false
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<Date> for Value {
    fn from(d: Date) -> Self {
        Value::Date(d)
    }
}
impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}
impl From<Link> for Value {
    fn from(l: Link) -> Self {
        Value::Link(l)
    }
}
impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}
impl From<Object> for Value {
    fn from(map: Object) -> Self {
        Value::Object(map)
    }
}

/// Text used when a number is stringified for display.
pub fn number_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
    } else {
        n.to_string()
    }
}

// Diagnostic dump, used for logs and error blocks. Not a display format.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_text(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d),
            Value::Duration(d) => write!(f, "{}", d),
            Value::Link(l) => write!(f, "{}", l.markdown()),
            Value::RawMarkup(Markup::Html(h)) => write!(f, "html({:?})", h),
            Value::RawMarkup(Markup::Foreign(x)) => write!(f, "<{}>", x.type_name()),
            Value::Function(_) => write!(f, "<function>"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// ------------- List -------------
/// Array payload. Query results may share one slice between many views, while
/// parsed data owns its vector; both are the same logical array.
#[derive(Clone)]
pub enum List {
    Owned(Vec<Value>),
    Shared(Arc<[Value]>),
}

impl ops::Deref for List {
    type Target = [Value];
    fn deref(&self) -> &Self::Target {
        match self {
            List::Owned(items) => items,
            List::Shared(items) => items,
        }
    }
}
impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}
impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ------------- Date -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Minute,
    Second,
    Millisecond,
}

impl DatePrecision {
    pub fn name(&self) -> &'static str {
        match self {
            DatePrecision::Year => "year",
            DatePrecision::Month => "month",
            DatePrecision::Day => "day",
            DatePrecision::Minute => "minute",
            DatePrecision::Second => "second",
            DatePrecision::Millisecond => "millisecond",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "year" => Some(DatePrecision::Year),
            "month" => Some(DatePrecision::Month),
            "day" => Some(DatePrecision::Day),
            "minute" => Some(DatePrecision::Minute),
            "second" => Some(DatePrecision::Second),
            "millisecond" => Some(DatePrecision::Millisecond),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Date {
    instant: DateTime<FixedOffset>,
    precision: DatePrecision,
}

impl Date {
    pub fn new(instant: DateTime<FixedOffset>, precision: DatePrecision) -> Self {
        Self { instant, precision }
    }
    /// Rebuilds a date from its primitive parts, refusing instants and offsets
    /// chrono cannot represent.
    pub fn from_parts(seconds: i64, nanos: u32, offset_seconds: i32, precision: DatePrecision) -> Option<Self> {
        let offset = FixedOffset::east_opt(offset_seconds)?;
        let utc = DateTime::<Utc>::from_timestamp(seconds, nanos)?;
        Some(Self { instant: utc.with_timezone(&offset), precision })
    }
    pub fn now() -> Self {
        Self { instant: Utc::now().fixed_offset(), precision: DatePrecision::Millisecond }
    }
    pub fn instant(&self) -> DateTime<FixedOffset> {
        self.instant
    }
    pub fn precision(&self) -> DatePrecision {
        self.precision
    }
    pub fn seconds(&self) -> i64 {
        self.instant.timestamp()
    }
    pub fn nanos(&self) -> u32 {
        self.instant.timestamp_subsec_nanos()
    }
    pub fn offset_seconds(&self) -> i32 {
        self.instant.offset().local_minus_utc()
    }
    pub fn is_midnight(&self) -> bool {
        let t = self.instant.time();
        t.hour() == 0 && t.minute() == 0 && t.second() == 0 && t.nanosecond() == 0
    }
}
// chrono compares instants only, but a date also remembers its offset
impl PartialEq for Date {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
            && self.offset_seconds() == other.offset_seconds()
            && self.precision == other.precision
    }
}
impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.precision {
            DatePrecision::Year => write!(f, "{}", self.instant.format("%Y")),
            DatePrecision::Month => write!(f, "{}", self.instant.format("%Y-%m")),
            DatePrecision::Day => write!(f, "{}", self.instant.format("%Y-%m-%d")),
            _ => write!(f, "{}", self.instant.to_rfc3339()),
        }
    }
}

// ------------- Duration -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

impl DurationUnit {
    pub const ALL: [DurationUnit; 8] = [
        DurationUnit::Years,
        DurationUnit::Months,
        DurationUnit::Weeks,
        DurationUnit::Days,
        DurationUnit::Hours,
        DurationUnit::Minutes,
        DurationUnit::Seconds,
        DurationUnit::Milliseconds,
    ];
    fn slot(&self) -> usize {
        *self as usize
    }
    pub fn name(&self) -> &'static str {
        match self {
            DurationUnit::Years => "years",
            DurationUnit::Months => "months",
            DurationUnit::Weeks => "weeks",
            DurationUnit::Days => "days",
            DurationUnit::Hours => "hours",
            DurationUnit::Minutes => "minutes",
            DurationUnit::Seconds => "seconds",
            DurationUnit::Milliseconds => "milliseconds",
        }
    }
    pub fn singular(&self) -> &'static str {
        let name = self.name();
        &name[..name.len() - 1]
    }
}

/// A calendar-aware span kept per unit, the way it was written ("1 month"
/// is not a fixed number of seconds).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Duration {
    amounts: [f64; 8],
}

impl Duration {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds `amount` of `unit`. Non-finite amounts are rejected.
    pub fn with(mut self, unit: DurationUnit, amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        self.amounts[unit.slot()] += amount;
        Some(self)
    }
    pub fn get(&self, unit: DurationUnit) -> f64 {
        self.amounts[unit.slot()]
    }
    pub fn is_zero(&self) -> bool {
        self.amounts.iter().all(|a| *a == 0.0)
    }
    /// Non-zero components, largest unit first.
    pub fn components(&self) -> impl Iterator<Item = (DurationUnit, f64)> + '_ {
        DurationUnit::ALL
            .iter()
            .map(|u| (*u, self.get(*u)))
            .filter(|(_, amount)| *amount != 0.0)
    }
}
impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0 seconds");
        }
        for (i, (unit, amount)) in self.components().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{} {}", number_text(amount), unit.name())?;
        }
        Ok(())
    }
}

// ------------- Link -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    File,
    Header,
    Block,
}

impl LinkKind {
    pub fn name(&self) -> &'static str {
        match self {
            LinkKind::File => "file",
            LinkKind::Header => "header",
            LinkKind::Block => "block",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "file" => Some(LinkKind::File),
            "header" => Some(LinkKind::Header),
            "block" => Some(LinkKind::Block),
            _ => None,
        }
    }
}

/// A reference to a document, or to a header or block inside one. The path
/// is resolved by the host; it is never rendered as content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    path: String,
    display: Option<String>,
    subpath: Option<String>,
    embed: bool,
    kind: LinkKind,
}

impl Link {
    pub fn file(path: impl Into<String>) -> Self {
        Self { path: path.into(), display: None, subpath: None, embed: false, kind: LinkKind::File }
    }
    pub fn header(path: impl Into<String>, header: impl Into<String>) -> Self {
        Self { subpath: Some(header.into()), kind: LinkKind::Header, ..Self::file(path) }
    }
    pub fn block(path: impl Into<String>, block: impl Into<String>) -> Self {
        Self { subpath: Some(block.into()), kind: LinkKind::Block, ..Self::file(path) }
    }
    /// Assembles a link from already separated parts; a subpath is required
    /// for header and block links.
    pub fn from_parts(
        path: String,
        display: Option<String>,
        subpath: Option<String>,
        embed: bool,
        kind: LinkKind,
    ) -> Option<Self> {
        if kind != LinkKind::File && subpath.is_none() {
            return None;
        }
        Some(Self { path, display, subpath, embed, kind })
    }
    /// Parses the inside of `[[...]]`: `path#subpath|display`, where a subpath
    /// starting with `^` names a block.
    pub fn parse_inner(inner: &str) -> Self {
        let (target, display) = match inner.split_once('|') {
            Some((t, d)) => (t.trim(), Some(d.trim().to_owned())),
            None => (inner.trim(), None),
        };
        let mut link = match target.split_once('#') {
            Some((path, sub)) => match sub.strip_prefix('^') {
                Some(block) => Link::block(path.trim(), block.trim()),
                None => Link::header(path.trim(), sub.trim()),
            },
            None => Link::file(target),
        };
        link.display = display.filter(|d| !d.is_empty());
        link
    }
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
    pub fn with_embed(mut self, embed: bool) -> Self {
        self.embed = embed;
        self
    }
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }
    pub fn subpath(&self) -> Option<&str> {
        self.subpath.as_deref()
    }
    pub fn embed(&self) -> bool {
        self.embed
    }
    pub fn kind(&self) -> LinkKind {
        self.kind
    }
    /// The target as written inside the brackets, without display text.
    pub fn target(&self) -> String {
        match (&self.kind, &self.subpath) {
            (LinkKind::Block, Some(sub)) => format!("{}#^{}", self.path, sub),
            (LinkKind::Header, Some(sub)) => format!("{}#{}", self.path, sub),
            _ => self.path.clone(),
        }
    }
    pub fn markdown(&self) -> String {
        let bang = if self.embed { "!" } else { "" };
        match &self.display {
            Some(display) => format!("{}[[{}|{}]]", bang, self.target(), display),
            None => format!("{}[[{}]]", bang, self.target()),
        }
    }
}

// ------------- Markup -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    /// Pre-rendered markup inserted verbatim.
    Html(String),
    /// An object from outside the value model, wrapped when it was ingested.
    Foreign(Foreign),
}

#[derive(Clone)]
pub struct Foreign {
    type_name: String,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Foreign {
    pub fn new(type_name: impl Into<String>, payload: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Self { type_name: type_name.into(), payload }
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    pub fn payload(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.payload.as_ref()
    }
}
// payloads are opaque, so only the type name takes part in equality
impl PartialEq for Foreign {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
    }
}
impl fmt::Debug for Foreign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Foreign")
            .field("type_name", &self.type_name)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

// ------------- Function -------------
pub type Callable = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// An opaque callable. A function that crossed a thread boundary comes back
/// as a placeholder that keeps its name but can no longer be called.
#[derive(Clone)]
pub struct Function {
    name: Option<String>,
    callable: Option<Callable>,
}

impl Function {
    pub fn new<F>(name: Option<&str>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self { name: name.map(str::to_owned), callable: Some(Arc::new(f)) }
    }
    pub fn placeholder(name: Option<String>) -> Self {
        Self { name, callable: None }
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn is_placeholder(&self) -> bool {
        self.callable.is_none()
    }
    pub fn call(&self, args: &[Value]) -> Option<Value> {
        self.callable.as_ref().map(|f| f(args))
    }
}
impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && match (&self.callable, &other.callable) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}
impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("placeholder", &self.is_placeholder())
            .finish()
    }
}
