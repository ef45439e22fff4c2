use rand::Rng;
use serde_json::Value;

use crate::error::PipelineError;

/// Opaque 12-char lowercase alphanumeric id.
pub fn short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| {
            let chars = b"abcdefghijklmnopqrstuvwxyz0123456789";
            chars[rng.gen_range(0..chars.len())] as char
        })
        .collect()
}

/// Lowercase dash-separated slug, at most `max` chars, never empty.
pub fn slugify(input: &str, max: usize) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= max {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "projet".to_string() } else { slug }
}

/// Truncate to `max` chars on a char boundary, appending a marker when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("… [truncated]");
    out
}

/// Extract a JSON document from a model reply.
///
/// Tries, in order: a fenced ```json block, any fenced block, and finally
/// the substring from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Result<Value, PipelineError> {
    if let Some(inner) = fenced_block(text, "```json") {
        if let Ok(v) = serde_json::from_str(inner.trim()) {
            return Ok(v);
        }
    }
    if let Some(inner) = fenced_block(text, "```") {
        if let Ok(v) = serde_json::from_str(inner.trim()) {
            return Ok(v);
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str(&text[start..=end]) {
                return Ok(v);
            }
        }
    }
    Err(PipelineError::Parse(truncate_chars(text, 200)))
}

fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    // Skip the rest of the opener line (e.g. a language tag).
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}
