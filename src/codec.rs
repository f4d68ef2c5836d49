//! Transfer encoding for values crossing a worker boundary.
//!
//! Plain data maps onto the matching JSON shape. Everything else becomes a
//! record tagged with [`TRANSFER_TAG`]; functions and foreign objects degrade to
//! markers, since neither can be carried across. Both directions are bounded by
//! [`MAX_TRANSFER_DEPTH`], counted in JSON container levels.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::error::{Result, StrataError};
use crate::value::{
    Date, DatePrecision, Duration, DurationUnit, Foreign, Function, Link, LinkKind, Markup, Object, Value,
};

pub const TRANSFER_TAG: &str = "$transfer";
/// Deepest JSON nesting an encoding may reach. Stays under serde_json's parser
/// limit (128) so every encoding also survives `to_bytes`/`from_bytes`.
pub const MAX_TRANSFER_DEPTH: usize = 100;

/// A value in boundary-safe form: owned, free of shared references, and
/// serializable to bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferEncoding(Json);

impl TransferEncoding {
    pub fn from_json(json: Json) -> Self {
        Self(json)
    }
    pub fn as_json(&self) -> &Json {
        &self.0
    }
    pub fn into_json(self) -> Json {
        self.0
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        // a serde_json::Value always serializes
        serde_json::to_vec(&self.0).unwrap_or_default()
    }
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map(Self).map_err(|e| StrataError::MalformedEncoding {
            tag: "bytes".into(),
            message: e.to_string(),
        })
    }
}

pub fn encode(value: &Value) -> Result<TransferEncoding> {
    encode_at(value, 0).map(TransferEncoding)
}

pub fn decode(encoding: &TransferEncoding) -> Result<Value> {
    decode_at(&encoding.0, 0)
}

fn tagged(tag: &str) -> Map<String, Json> {
    let mut record = Map::new();
    record.insert(TRANSFER_TAG.into(), Json::from(tag));
    record
}

fn optional(text: Option<&str>) -> Json {
    text.map(Json::from).unwrap_or(Json::Null)
}

// `level` is the nesting a new JSON container would sit at
fn enter(level: usize) -> Result<usize> {
    if level > MAX_TRANSFER_DEPTH {
        return Err(StrataError::DepthExceeded { limit: MAX_TRANSFER_DEPTH });
    }
    Ok(level)
}

fn encode_at(value: &Value, depth: usize) -> Result<Json> {
    let json = match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Number(n) => match Number::from_f64(*n) {
            Some(number) => Json::Number(number),
            None => {
                enter(depth + 1)?;
                let mut record = tagged("number");
                record.insert("value".into(), Json::from(crate::value::number_text(*n)));
                Json::Object(record)
            }
        },
        Value::String(s) => Json::from(s.as_str()),
        Value::Date(d) => {
            enter(depth + 1)?;
            let mut record = tagged("date");
            record.insert("seconds".into(), Json::from(d.seconds()));
            record.insert("nanos".into(), Json::from(d.nanos()));
            record.insert("offset".into(), Json::from(d.offset_seconds()));
            record.insert("precision".into(), Json::from(d.precision().name()));
            Json::Object(record)
        }
        Value::Duration(d) => {
            enter(depth + 1)?;
            let mut record = tagged("duration");
            for unit in DurationUnit::ALL {
                // components are finite by construction
                let amount = Number::from_f64(d.get(unit)).map(Json::Number).unwrap_or(Json::Null);
                record.insert(unit.name().into(), amount);
            }
            Json::Object(record)
        }
        Value::Link(l) => {
            enter(depth + 1)?;
            let mut record = tagged("link");
            record.insert("path".into(), Json::from(l.path()));
            record.insert("display".into(), optional(l.display()));
            record.insert("subpath".into(), optional(l.subpath()));
            record.insert("embed".into(), Json::Bool(l.embed()));
            record.insert("kind".into(), Json::from(l.kind().name()));
            Json::Object(record)
        }
        Value::RawMarkup(Markup::Html(html)) => {
            enter(depth + 1)?;
            let mut record = tagged("html");
            record.insert("value".into(), Json::from(html.as_str()));
            Json::Object(record)
        }
        Value::RawMarkup(Markup::Foreign(foreign)) => {
            enter(depth + 1)?;
            let mut record = tagged("foreign");
            record.insert("type".into(), Json::from(foreign.type_name()));
            Json::Object(record)
        }
        Value::Function(f) => {
            enter(depth + 1)?;
            let mut record = tagged("function");
            record.insert("name".into(), optional(f.name()));
            Json::Object(record)
        }
        Value::Array(items) => {
            let level = enter(depth + 1)?;
            Json::Array(items.iter().map(|item| encode_at(item, level)).collect::<Result<Vec<_>>>()?)
        }
        Value::Object(map) => {
            // a plain object that happens to use the reserved key is wrapped,
            // which costs one extra level
            let wrapped = map.contains_key(TRANSFER_TAG);
            let level = enter(depth + if wrapped { 2 } else { 1 })?;
            let mut entries = Map::new();
            for (key, item) in map {
                entries.insert(key.clone(), encode_at(item, level)?);
            }
            if wrapped {
                let mut record = tagged("object");
                record.insert("value".into(), Json::Object(entries));
                Json::Object(record)
            } else {
                Json::Object(entries)
            }
        }
    };
    Ok(json)
}

fn malformed(tag: &str, message: impl Into<String>) -> StrataError {
    StrataError::MalformedEncoding { tag: tag.into(), message: message.into() }
}

fn field<'j>(record: &'j Map<String, Json>, tag: &str, key: &str) -> Result<&'j Json> {
    record.get(key).ok_or_else(|| malformed(tag, format!("missing field '{key}'")))
}

fn text_field(record: &Map<String, Json>, tag: &str, key: &str) -> Result<String> {
    field(record, tag, key)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| malformed(tag, format!("field '{key}' is not a string")))
}

fn optional_text_field(record: &Map<String, Json>, tag: &str, key: &str) -> Result<Option<String>> {
    match record.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(malformed(tag, format!("field '{key}' is not a string"))),
    }
}

fn decode_at(json: &Json, depth: usize) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Number(n) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| malformed("number", format!("{n} is not representable"))),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => {
            let level = enter(depth + 1)?;
            Ok(Value::array(items.iter().map(|item| decode_at(item, level)).collect::<Result<Vec<_>>>()?))
        }
        Json::Object(record) => {
            let level = enter(depth + 1)?;
            match record.get(TRANSFER_TAG) {
                None => decode_entries(record, level).map(Value::Object),
                Some(Json::String(tag)) => decode_tagged(tag, record, level),
                Some(other) => Err(StrataError::EncodingMismatch { tag: other.to_string() }),
            }
        }
    }
}

// `level` is the nesting of `record` itself
fn decode_entries(record: &Map<String, Json>, level: usize) -> Result<Object> {
    let mut map = Object::with_capacity(record.len());
    for (key, item) in record {
        map.insert(key.clone(), decode_at(item, level)?);
    }
    Ok(map)
}

fn decode_tagged(tag: &str, record: &Map<String, Json>, level: usize) -> Result<Value> {
    match tag {
        "number" => match text_field(record, tag, "value")?.as_str() {
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            "-Infinity" => Ok(Value::Number(f64::NEG_INFINITY)),
            other => Err(malformed(tag, format!("'{other}' is not a non-finite number"))),
        },
        "date" => {
            let seconds = field(record, tag, "seconds")?
                .as_i64()
                .ok_or_else(|| malformed(tag, "seconds must be an integer"))?;
            let nanos = field(record, tag, "nanos")?
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| malformed(tag, "nanos must be an unsigned 32-bit integer"))?;
            let offset = field(record, tag, "offset")?
                .as_i64()
                .and_then(|o| i32::try_from(o).ok())
                .ok_or_else(|| malformed(tag, "offset must be a 32-bit integer"))?;
            let precision_name = text_field(record, tag, "precision")?;
            let precision = DatePrecision::from_name(&precision_name)
                .ok_or_else(|| malformed(tag, format!("unknown precision '{precision_name}'")))?;
            Date::from_parts(seconds, nanos, offset, precision)
                .map(Value::Date)
                .ok_or_else(|| malformed(tag, "instant out of range"))
        }
        "duration" => {
            let mut duration = Duration::new();
            for unit in DurationUnit::ALL {
                let amount = match record.get(unit.name()) {
                    None | Some(Json::Null) => 0.0,
                    Some(amount) => amount
                        .as_f64()
                        .ok_or_else(|| malformed(tag, format!("'{}' must be a number", unit.name())))?,
                };
                duration = duration
                    .with(unit, amount)
                    .ok_or_else(|| malformed(tag, format!("'{}' must be finite", unit.name())))?;
            }
            Ok(Value::Duration(duration))
        }
        "link" => {
            let kind_name = text_field(record, tag, "kind")?;
            let kind = LinkKind::from_name(&kind_name)
                .ok_or_else(|| malformed(tag, format!("unknown link kind '{kind_name}'")))?;
            let embed = field(record, tag, "embed")?
                .as_bool()
                .ok_or_else(|| malformed(tag, "embed must be a boolean"))?;
            Link::from_parts(
                text_field(record, tag, "path")?,
                optional_text_field(record, tag, "display")?,
                optional_text_field(record, tag, "subpath")?,
                embed,
                kind,
            )
            .map(Value::Link)
            .ok_or_else(|| malformed(tag, "header and block links need a subpath"))
        }
        "html" => Ok(Value::html(text_field(record, tag, "value")?)),
        "foreign" => Ok(Value::RawMarkup(Markup::Foreign(Foreign::new(
            text_field(record, tag, "type")?,
            None,
        )))),
        "function" => Ok(Value::Function(Function::placeholder(optional_text_field(
            record, tag, "name",
        )?))),
        "object" => match field(record, tag, "value")? {
            Json::Object(entries) => decode_entries(entries, enter(level + 1)?).map(Value::Object),
            _ => Err(malformed(tag, "value must be an object")),
        },
        unknown => Err(StrataError::EncodingMismatch { tag: unknown.to_owned() }),
    }
}
