//! Frame sanitization.
//!
//! Every frame is a single line of JSON. A line is trusted only if it is
//! valid UTF-8 and contains no control characters other than tab, so a
//! misbehaving peer can neither forge a frame boundary nor smuggle
//! terminal escapes into our logs.

use std::fmt::Write as _;

const PREVIEW_LEN: usize = 64;

/// Whether a character may appear in a frame.
fn is_allowed(c: char) -> bool {
    c == '\t' || !c.is_control()
}

/// Check a received line (without its trailing newline).
pub fn is_sanitized(line: &[u8]) -> bool {
    match std::str::from_utf8(line) {
        Ok(s) => s.chars().all(is_allowed),
        Err(_) => false,
    }
}

/// Escape the characters JSON serializers leave raw (DEL and the C1 range).
///
/// Only valid on serialized JSON: structural JSON characters are all
/// printable ASCII, so anything rejected here sits inside a string
/// literal where a `\uXXXX` escape is legal.
pub fn escape_json(json: &str) -> String {
    if json.chars().all(is_allowed) {
        return json.to_string();
    }

    let mut out = String::with_capacity(json.len() + 16);
    for c in json.chars() {
        if is_allowed(c) {
            out.push(c);
        } else {
            // Control characters all live in the BMP.
            let _ = write!(out, "\\u{:04x}", c as u32);
        }
    }
    out
}

/// Render control characters other than tab as visible escapes.
///
/// Applied to text that ends up on a terminal, since a JSON `\u001b`
/// escape passes the frame check but decodes to a raw ESC.
pub fn escape_controls(text: &str) -> String {
    if text.chars().all(is_allowed) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        if is_allowed(c) {
            out.push(c);
        } else {
            out.extend(c.escape_default());
        }
    }
    out
}

/// Printable, bounded rendering of a rejected line for error messages.
pub fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let mut out: String = text.chars().take(PREVIEW_LEN).flat_map(char::escape_debug).collect();
    if text.chars().count() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}
