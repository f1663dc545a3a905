//! Response body decoding.
//!
//! Providers answer token requests either with a JSON object or with an
//! `application/x-www-form-urlencoded` query string (GitHub without an
//! `Accept` header, for instance). Both decode to a [`DataMap`] keyed by the
//! provider's raw field names.

use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::data_map::DataMap;
use crate::error::DecodeError;

/// Wire format of a provider's responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Pick by content type, then by the first non-blank byte of the body
    #[default]
    Auto,
    Json,
    Form,
}

/// Decode `body` choosing the format automatically.
///
/// # Errors
/// See [`decode_as`].
pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<DataMap, DecodeError> {
    decode_as(ResponseFormat::Auto, content_type, body)
}

/// Decode `body` in the given format.
///
/// # Errors
/// - [`DecodeError::InvalidUtf8`] if the body is not UTF-8
/// - [`DecodeError::Json`] / [`DecodeError::NotAnObject`] for JSON bodies
/// - [`DecodeError::MalformedForm`] for a form segment without `=`
pub fn decode_as(
    format: ResponseFormat,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<DataMap, DecodeError> {
    let text = std::str::from_utf8(body)?;
    match resolve(format, content_type, text) {
        ResponseFormat::Form => decode_form(text),
        ResponseFormat::Json | ResponseFormat::Auto => decode_json(text),
    }
}

fn resolve(format: ResponseFormat, content_type: Option<&str>, text: &str) -> ResponseFormat {
    if format != ResponseFormat::Auto {
        return format;
    }
    if let Some(ct) = content_type.map(str::to_ascii_lowercase) {
        if ct.contains("json") {
            return ResponseFormat::Json;
        }
        if ct.contains("x-www-form-urlencoded") {
            return ResponseFormat::Form;
        }
    }
    match text.trim_start().as_bytes().first() {
        Some(b'{' | b'[') => ResponseFormat::Json,
        _ => ResponseFormat::Form,
    }
}

fn decode_json(text: &str) -> Result<DataMap, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(DataMap::from(map)),
        Value::Array(_) => Err(DecodeError::NotAnObject("an array")),
        Value::String(_) => Err(DecodeError::NotAnObject("a string")),
        Value::Number(_) => Err(DecodeError::NotAnObject("a number")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("a boolean")),
        Value::Null => Err(DecodeError::NotAnObject("null")),
    }
}

fn decode_form(text: &str) -> Result<DataMap, DecodeError> {
    let text = text.trim();
    let mut data = DataMap::new();
    for (idx, segment) in text.split('&').enumerate() {
        if segment.is_empty() {
            continue;
        }
        if !segment.contains('=') {
            return Err(DecodeError::MalformedForm(idx));
        }
        for (key, value) in form_urlencoded::parse(segment.as_bytes()) {
            data.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    Ok(data)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn json_by_content_type() {
        let data = decode(
            Some("application/json; charset=utf-8"),
            br#"{"access_token":"abc","expires_in":86400}"#,
        )
        .unwrap();
        assert_eq!(data.get_str("access_token"), Some("abc"));
        assert_eq!(data.get_i64("expires_in"), Some(86400));
    }

    #[test]
    fn form_by_content_type_is_percent_decoded() {
        let data = decode(
            Some("application/x-www-form-urlencoded"),
            b"access_token=a%2Bb&scope=read%3Auser+repo&token_type=bearer",
        )
        .unwrap();
        assert_eq!(data.get_str("access_token"), Some("a+b"));
        assert_eq!(data.get_str("scope"), Some("read:user repo"));
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn sniffs_when_content_type_is_unhelpful() {
        let json = decode(Some("text/plain"), b"  {\"error\":\"bad\"}").unwrap();
        assert_eq!(json.get_str("error"), Some("bad"));

        let form = decode(None, b"error=bad_verification_code&error_description=expired").unwrap();
        assert_eq!(form.get_str("error"), Some("bad_verification_code"));
    }

    #[test]
    fn forced_format_ignores_content_type() {
        let data = decode_as(ResponseFormat::Form, Some("application/json"), b"a=1").unwrap();
        assert_eq!(data.get_str("a"), Some("1"));
        assert!(matches!(
            decode_as(ResponseFormat::Json, None, b"a=1"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn empty_segments_and_values_are_accepted() {
        let data = decode_as(ResponseFormat::Form, None, b"a=1&&b=&").unwrap();
        assert_eq!(data.get_str("a"), Some("1"));
        assert_eq!(data.get_str("b"), Some(""));
        assert!(decode_as(ResponseFormat::Form, None, b"").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(matches!(
            decode(Some("application/json"), b"{\"a\":"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode(Some("application/json"), b"[1,2]"),
            Err(DecodeError::NotAnObject("an array"))
        ));
        assert!(matches!(
            decode(None, b"a=1&garbage"),
            Err(DecodeError::MalformedForm(1))
        ));
        assert!(matches!(
            decode(None, &[0x61, 0x3d, 0xff]),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }
}
