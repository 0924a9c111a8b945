//! Input validation helpers
//!
//! Small predicates and coercions shared by the API handlers, the markdown
//! renderer and the client commands.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Image MIME types accepted in data URLs for vision and upscale requests
pub const ALLOWED_IMAGE_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

fn data_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^data:([^;]+);base64,").expect("valid data url regex"))
}

fn image_size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)x(\d+)$").expect("valid image size regex"))
}

/// Returns true when `value` parses as an absolute `http` or `https` URL
pub fn is_valid_url(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    if value.is_empty() {
        return false;
    }
    match url::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// A parsed `data:<mime>;base64,<payload>` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl<'a> {
    /// MIME type exactly as written in the URL
    pub mime: &'a str,
    /// Base64 payload after the first comma
    pub data: &'a str,
}

/// Split a base64 data URL into MIME type and payload
///
/// Returns `None` unless the value starts with `data:<mime>;base64,`.
pub fn parse_data_url(value: &str) -> Option<DataUrl<'_>> {
    let caps = data_url_regex().captures(value)?;
    let mime = caps.get(1)?.as_str();
    let whole = caps.get(0)?;
    Some(DataUrl {
        mime,
        data: &value[whole.end()..],
    })
}

/// Returns true when `value` is a base64 data URL whose MIME type is in `allowed`
pub fn is_valid_data_url(value: &str, allowed: &[&str]) -> bool {
    parse_data_url(value)
        .map(|parsed| allowed.contains(&parsed.mime))
        .unwrap_or(false)
}

/// Returns true when `value` is a JSON number with no fractional part and greater than zero
pub fn is_positive_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u > 0
            } else if let Some(f) = n.as_f64() {
                f.is_finite() && f.fract() == 0.0 && f > 0.0
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Returns true when `value` is a string with at least one non-whitespace character
pub fn is_non_empty_string(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

/// Clamp a requested `max_tokens` value into `1..=ceiling`
///
/// Non-numeric values fall back to `fallback`; fractional values are rounded.
pub fn clamp_max_tokens(value: Option<&Value>, fallback: u32, ceiling: u32) -> u32 {
    let Some(n) = value.and_then(Value::as_f64).filter(|n| n.is_finite()) else {
        return fallback;
    };
    let rounded = n.round();
    if rounded < 1.0 {
        1
    } else if rounded > ceiling as f64 {
        ceiling
    } else {
        rounded as u32
    }
}

/// Parse an upscale factor given as a JSON number or numeric string
pub fn parse_image_scale(value: Option<&Value>, fallback: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(fallback),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .unwrap_or(fallback),
        _ => fallback,
    }
}

/// Parse a `WIDTHxHEIGHT` size string
///
/// Digit runs too long for `u64` saturate, so oversized values fail the
/// bounds check rather than the format check.
pub fn parse_image_size(value: &str) -> Option<(u64, u64)> {
    let caps = image_size_regex().captures(value)?;
    let dimension = |i: usize| caps.get(i).map(|m| m.as_str().parse().unwrap_or(u64::MAX));
    Some((dimension(1)?, dimension(2)?))
}
