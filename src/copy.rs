//! Bulk copy support: quoted identifiers and the COPY text row format

use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};

use crate::value::Value;

/// Possibly schema-qualified SQL identifier, e.g. `["public", "users"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier(Vec<String>);

impl Identifier {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Double-quoted form safe to splice into SQL
    pub fn sanitize(&self) -> String {
        self.0
            .iter()
            .map(|part| quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self::new([name])
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    let cleaned = name.replace('\0', "");
    format!("\"{}\"", cleaned.replace('"', "\"\""))
}

/// `COPY "table" ("a", "b") FROM STDIN`
pub(crate) fn copy_statement(table: &Identifier, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("COPY {} ({}) FROM STDIN", table.sanitize(), cols)
}

/// Encode rows in the COPY text format: tab-separated fields, one row per line
pub(crate) fn encode_rows(rows: &[Vec<Value>]) -> BytesMut {
    let mut buf = BytesMut::new();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                buf.put_u8(b'\t');
            }
            encode_field(&mut buf, value);
        }
        buf.put_u8(b'\n');
    }
    buf
}

fn encode_field(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Null => buf.put_slice(b"\\N"),
        other => escape_text(buf, &text_form(other)),
    }
}

/// Postgres text input form of a value, before COPY escaping
fn text_form(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "t".to_string(),
        Value::Bool(false) => "f".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "NaN".to_string(),
        Value::Float(f) if f.is_infinite() => {
            let text = if *f > 0.0 { "Infinity" } else { "-Infinity" };
            text.to_string()
        }
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => {
            // bytea hex input
            let mut hex = String::with_capacity(2 + b.len() * 2);
            hex.push_str("\\x");
            for byte in b {
                let _ = write!(hex, "{:02x}", byte);
            }
            hex
        }
        Value::Uuid(u) => u.to_string(),
        Value::Timestamp(t) => t.to_rfc3339(),
        Value::Date(d) => d.to_string(),
        Value::Time(t) => t.to_string(),
        Value::Json(j) => j.to_string(),
        Value::Array(items) => array_literal(items),
    }
}

/// `{"a","b",NULL}` with every element quoted
fn array_literal(items: &[Value]) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::Array(inner) => out.push_str(&array_literal(inner)),
            other => {
                out.push('"');
                for ch in text_form(other).chars() {
                    if ch == '"' || ch == '\\' {
                        out.push('\\');
                    }
                    out.push(ch);
                }
                out.push('"');
            }
        }
    }
    out.push('}');
    out
}

fn escape_text(buf: &mut BytesMut, s: &str) {
    for ch in s.chars() {
        match ch {
            '\\' => buf.put_slice(b"\\\\"),
            '\t' => buf.put_slice(b"\\t"),
            '\n' => buf.put_slice(b"\\n"),
            '\r' => buf.put_slice(b"\\r"),
            c => {
                let mut tmp = [0u8; 4];
                buf.put_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
}
