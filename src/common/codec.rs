//! Codec for "extra" config fields
//!
//! Packs a flat string map into a single field as `key=value` pairs joined
//! with `&`. Keys and values are percent-escaped, so delimiters inside a value
//! survive a round-trip.

use crate::common::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;

pub type Extras = BTreeMap<String, String>;

const ENTRY_SEPARATOR: char = '&';
const VALUE_SEPARATOR: char = '=';

/// Escape set: both separators, the escape character, space, and control chars
const EXTRAS_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'&')
    .add(b'=')
    .add(b'%')
    .add(b' ')
    .add(b'+');

/// Encode a map into its single-field form.
///
/// Entries come out in key order, so equal maps always encode identically.
pub fn encode(values: &Extras) -> String {
    let mut out = String::new();
    for (key, value) in values {
        if !out.is_empty() {
            out.push(ENTRY_SEPARATOR);
        }
        out.extend(utf8_percent_encode(key, EXTRAS_ENCODE_SET));
        out.push(VALUE_SEPARATOR);
        out.extend(utf8_percent_encode(value, EXTRAS_ENCODE_SET));
    }
    out
}

/// Decode a single-field string back into a map.
///
/// An empty string is the "not configured" case and yields an empty map.
pub fn decode(encoded: &str) -> Result<Extras> {
    let mut values = Extras::new();
    if encoded.is_empty() {
        return Ok(values);
    }

    for entry in encoded.split(ENTRY_SEPARATOR) {
        let (raw_key, raw_value) = entry.split_once(VALUE_SEPARATOR).ok_or_else(|| {
            Error::MalformedEncoding(format!("missing '{}' in entry {:?}", VALUE_SEPARATOR, entry))
        })?;
        let key = unescape(raw_key)?;
        let value = unescape(raw_value)?;
        if values.contains_key(&key) {
            return Err(Error::MalformedEncoding(format!("duplicate key {:?}", key)));
        }
        values.insert(key, value);
    }

    Ok(values)
}

fn unescape(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::MalformedEncoding(format!("invalid escape in {:?}: {}", raw, e)))
}
