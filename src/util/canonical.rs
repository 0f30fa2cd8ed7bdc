//! Canonical JSON rendering used for block hashing.
//!
//! Every node must produce byte-identical JSON for the same value, or the
//! resulting hashes fork the network. The canonical form is: object keys in
//! lexicographic order, `", "` between items, `": "` after keys, non-ASCII
//! characters escaped as `\uXXXX`, and numbers with zero fractional part
//! written without a decimal point.

use serde::Serialize;
use serde_json::Serializer;
use serde_json::Value;
use serde_json::ser::Formatter;
use std::io;

/// Render a JSON value in the canonical hashing form.
///
/// Key ordering comes from `serde_json::Map` itself (BTreeMap-backed), the
/// rest from [`CanonicalFormatter`].
pub fn to_canonical_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, CanonicalFormatter);
    value
        .serialize(&mut serializer)
        .expect("canonical JSON encoding error");
    String::from_utf8(buf).expect("canonical JSON is valid UTF-8")
}

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        // Integral values are written without a decimal point so that a
        // number round-tripped through JSON as an integer hashes the same
        // as its float representation.
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
            write!(writer, "{}", value as i64)
        } else {
            write!(writer, "{value}")
        }
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.bytes().all(|b| b < 0x7f) {
            return writer.write_all(fragment.as_bytes());
        }
        for ch in fragment.chars() {
            if (ch as u32) < 0x7f {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}
