//! Parse routines run inside import workers.
//!
//! The document grammar itself belongs to the host. [`FieldParser`] is the
//! small routine used when none is supplied: inline fields, tags and outlinks.

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use regex::Regex;

use crate::error::ParseFailure;
use crate::import::DocumentMetadata;
use crate::value::{Date, DatePrecision, Duration, DurationUnit, Link, Object, Value};

/// A parse routine. It must be a pure function of its inputs: the same
/// contents and metadata always produce an equivalent value. Each import worker
/// owns its own clone.
pub trait DocumentParser: Clone + Send + 'static {
    fn parse(&self, path: &str, contents: &str, metadata: &DocumentMetadata) -> Result<Value, ParseFailure>;
}

#[derive(Parser)]
#[grammar = "field.pest"]
struct FieldGrammar;

lazy_static! {
    static ref LINE_FIELD: Regex =
        Regex::new(r"^\s*(?:[-*+]\s+)?([\p{L}\p{N}_][\p{L}\p{N}_ /\-]*?)\s*::\s*(.*?)\s*$").unwrap();
    static ref BRACKETED_FIELD: Regex = Regex::new(
        r"[\[(]([\p{L}\p{N}_][\p{L}\p{N}_ /\-]*?)\s*::\s*((?:\[\[[^\]]*\]\]|[^\[\]()])*)[\])]"
    )
    .unwrap();
    static ref TAG: Regex = Regex::new(r"(?:^|\s)(#[\p{L}\p{N}_/\-]+)").unwrap();
    static ref OUTLINK: Regex = Regex::new(r"(!?)\[\[([^\[\]]+?)\]\]").unwrap();
    static ref NON_KEY: Regex = Regex::new(r"[^\p{L}\p{N}_]+").unwrap();
}

/// Lower-case, dash separated form of a field key ("Due Date" -> "due-date").
pub fn canonical_key(key: &str) -> String {
    NON_KEY.replace_all(&key.trim().to_lowercase(), "-").trim_matches('-').to_owned()
}

/// Types the literal text of a field. Text that is not a literal (or a comma
/// separated list of literals) stays a string; empty text is null.
pub fn parse_field_value(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    let plain = || Value::String(trimmed.to_owned());
    let Ok(mut pairs) = FieldGrammar::parse(Rule::field_value, trimmed) else {
        return plain();
    };
    let Some(root) = pairs.next() else {
        return plain();
    };
    let items: Option<Vec<Value>> = root
        .into_inner()
        .filter(|pair| pair.as_rule() != Rule::EOI)
        .map(literal)
        .collect();
    match items {
        Some(mut items) if items.len() == 1 => items.remove(0),
        Some(items) => Value::array(items),
        None => plain(),
    }
}

fn literal(pair: Pair<Rule>) -> Option<Value> {
    match pair.as_rule() {
        Rule::boolean => Some(Value::Boolean(pair.as_str().eq_ignore_ascii_case("true"))),
        Rule::number => pair.as_str().parse::<f64>().ok().map(Value::Number),
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Some(Value::String(unescape(inner)))
        }
        Rule::link => {
            let mut embed = false;
            let mut inner = "";
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::embed => embed = true,
                    Rule::link_inner => inner = part.as_str(),
                    _ => (),
                }
            }
            Some(Value::Link(Link::parse_inner(inner).with_embed(embed)))
        }
        Rule::date => date_literal(pair).map(Value::Date),
        Rule::duration => duration_literal(pair).map(Value::Duration),
        _ => None,
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn date_literal(pair: Pair<Rule>) -> Option<Date> {
    let (mut year, mut month, mut day) = (0i32, 1u32, 1u32);
    let (mut hour, mut minute, mut second, mut milli) = (0u32, 0u32, 0u32, 0u32);
    let mut offset = 0i32;
    let mut precision = DatePrecision::Month;
    for part in pair.into_inner() {
        let text = part.as_str();
        match part.as_rule() {
            Rule::year => year = text.parse().ok()?,
            Rule::month => month = text.parse().ok()?,
            Rule::day => {
                day = text.parse().ok()?;
                precision = DatePrecision::Day;
            }
            Rule::hour => hour = text.parse().ok()?,
            Rule::minute => {
                minute = text.parse().ok()?;
                precision = DatePrecision::Minute;
            }
            Rule::second => {
                second = text.parse().ok()?;
                precision = DatePrecision::Second;
            }
            Rule::millisecond => {
                // ".5" is half a second
                let digits: u32 = text.parse().ok()?;
                milli = digits * 10u32.pow(3 - text.len() as u32);
                precision = DatePrecision::Millisecond;
            }
            Rule::zone => offset = zone_offset(text)?,
            _ => (),
        }
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, milli)?;
    let zone = FixedOffset::east_opt(offset)?;
    let instant = date.and_time(time).and_local_timezone(zone).single()?;
    Some(Date::new(instant, precision))
}

fn zone_offset(text: &str) -> Option<i32> {
    if text == "Z" {
        return Some(0);
    }
    let sign = if text.starts_with('-') { -1 } else { 1 };
    let (hours, minutes) = text[1..].split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

fn duration_literal(pair: Pair<Rule>) -> Option<Duration> {
    let mut duration = Duration::new();
    for part in pair.into_inner() {
        let mut amount = 0.0;
        for piece in part.into_inner() {
            let unit = match piece.as_rule() {
                Rule::duration_amount => {
                    amount = piece.as_str().parse().ok()?;
                    continue;
                }
                Rule::unit_year => DurationUnit::Years,
                Rule::unit_month => DurationUnit::Months,
                Rule::unit_week => DurationUnit::Weeks,
                Rule::unit_day => DurationUnit::Days,
                Rule::unit_hour => DurationUnit::Hours,
                Rule::unit_minute => DurationUnit::Minutes,
                Rule::unit_second => DurationUnit::Seconds,
                Rule::unit_millisecond => DurationUnit::Milliseconds,
                _ => continue,
            };
            duration = duration.with(unit, amount)?;
        }
    }
    Some(duration)
}

// ------------- FieldParser -------------
#[derive(Debug, Clone, Default)]
pub struct FieldParser;

impl FieldParser {
    pub fn new() -> Self {
        Self
    }
}

// repeated keys accumulate into an array
fn add_field(fields: &mut Object, key: &str, value: Value) {
    match fields.get_mut(key) {
        Some(existing) => {
            let mut items = match &*existing {
                Value::Array(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            items.push(value);
            *existing = Value::array(items);
        }
        None => {
            fields.insert(key.to_owned(), value);
        }
    }
}

fn file_object(path: &str, metadata: &DocumentMetadata, tags: Vec<String>, outlinks: Vec<Link>) -> Value {
    let (folder, file) = match path.rsplit_once('/') {
        Some((folder, file)) => (folder, file),
        None => ("", path),
    };
    let (name, ext) = match file.rsplit_once('.') {
        Some((name, ext)) if !name.is_empty() => (name, ext),
        _ => (file, ""),
    };
    let stamp = |t: &Option<chrono::DateTime<FixedOffset>>| match t {
        Some(t) => Value::Date(Date::new(*t, DatePrecision::Millisecond)),
        None => Value::Null,
    };
    Value::object([
        ("path", Value::from(path)),
        ("name", Value::from(name)),
        ("folder", Value::from(folder)),
        ("ext", Value::from(ext)),
        ("link", Value::Link(Link::file(path))),
        ("size", Value::Number(metadata.size as f64)),
        ("ctime", stamp(&metadata.ctime)),
        ("mtime", stamp(&metadata.mtime)),
        ("tags", Value::array(tags.into_iter().map(Value::String).collect())),
        ("outlinks", Value::array(outlinks.into_iter().map(Value::Link).collect())),
    ])
}

impl DocumentParser for FieldParser {
    fn parse(&self, path: &str, contents: &str, metadata: &DocumentMetadata) -> Result<Value, ParseFailure> {
        let mut fields = Object::new();
        let mut tags: Vec<String> = Vec::new();
        let mut outlinks: Vec<Link> = Vec::new();
        let mut open_fence: Option<usize> = None;

        for (index, line) in contents.lines().enumerate() {
            if line.trim_start().starts_with("```") {
                open_fence = match open_fence {
                    Some(_) => None,
                    None => Some(index + 1),
                };
                continue;
            }
            if open_fence.is_some() {
                continue;
            }

            let mut found: Vec<(String, String)> = BRACKETED_FIELD
                .captures_iter(line)
                .map(|c| (c[1].to_owned(), c[2].to_owned()))
                .collect();
            if found.is_empty() {
                if let Some(c) = LINE_FIELD.captures(line) {
                    found.push((c[1].to_owned(), c[2].to_owned()));
                }
            }
            for (key, raw) in found {
                let value = parse_field_value(&raw);
                let canonical = canonical_key(&key);
                if !canonical.is_empty() && canonical != key {
                    add_field(&mut fields, &canonical, value.clone());
                }
                add_field(&mut fields, &key, value);
            }

            for c in TAG.captures_iter(line) {
                let tag = c[1].to_owned();
                // "#2024" is a number, not a tag
                if tag[1..].chars().all(|ch| ch.is_ascii_digit()) {
                    continue;
                }
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            for c in OUTLINK.captures_iter(line) {
                let link = Link::parse_inner(&c[2]).with_embed(!c[1].is_empty());
                if !outlinks.contains(&link) {
                    outlinks.push(link);
                }
            }
        }

        if let Some(line) = open_fence {
            return Err(ParseFailure::at_line("code fence is never closed", line));
        }
        // "file" is reserved for the document's own properties
        fields.insert("file".to_owned(), file_object(path, metadata, tags, outlinks));
        Ok(Value::Object(fields))
    }
}
