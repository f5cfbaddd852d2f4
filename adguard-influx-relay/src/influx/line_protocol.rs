//! InfluxDB Line Protocol encoding.
//!
//! The relay writes untagged points only:
//! ```text
//! adguard_stats dns_queries=1200,version="v0.107.43" 1792139405000
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v1/write_protocols/line_protocol_reference/>

use crate::metrics::MetricValue;

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    String(String),
}

impl FieldValue {
    /// Append the encoded value to `out`.
    ///
    /// Floats use Rust's shortest round-trip form (`42`, `3.15`), strings
    /// are double-quoted with `\` and `"` escaped.
    fn encode_into(&self, out: &mut String) {
        match self {
            FieldValue::Float(v) => out.push_str(&v.to_string()),
            FieldValue::String(text) => {
                out.push('"');
                push_escaped(out, text, &['\\', '"']);
                out.push('"');
            }
        }
    }
}

impl From<&MetricValue> for FieldValue {
    fn from(value: &MetricValue) -> Self {
        match value {
            MetricValue::Null => FieldValue::Float(0.0),
            MetricValue::Number(n) => FieldValue::Float(*n),
            MetricValue::Text(s) => FieldValue::String(s.clone()),
        }
    }
}

/// Characters that need a backslash in a measurement name
const MEASUREMENT_SPECIALS: &[char] = &[',', ' '];
/// Characters that need a backslash in a field key
const FIELD_KEY_SPECIALS: &[char] = &[',', '=', ' '];

/// Accumulates points and produces a `/write` request body.
#[derive(Default)]
pub struct LineProtocolWriter {
    lines: Vec<String>,
}

impl LineProtocolWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one point.
    ///
    /// `timestamp` must already be expressed in the precision the body
    /// will be written with.
    pub fn write_point(&mut self, measurement: &str, fields: &[(&str, FieldValue)], timestamp: i64) {
        let mut line = String::new();
        push_escaped(&mut line, measurement, MEASUREMENT_SPECIALS);

        let mut separator = ' ';
        for (key, value) in fields {
            line.push(separator);
            push_escaped(&mut line, key, FIELD_KEY_SPECIALS);
            line.push('=');
            value.encode_into(&mut line);
            separator = ',';
        }

        line.push(' ');
        line.push_str(&timestamp.to_string());
        self.lines.push(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Newline-separated body, emptying the writer.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.lines).join("\n")
    }
}

fn push_escaped(out: &mut String, raw: &str, specials: &[char]) {
    for c in raw.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
