// Purpose: Built-in escape filters applied to interpolated output.
// Inputs/Outputs: Takes rendered text, returns escaped text; names here are
//   reserved in expression position and never resolve through the context.
// Invariants: Builtins are pure string transforms with no runtime state.
// Gotchas: Filters chain left to right, so `x | h | u` url-escapes the
//   html-escaped text.

/// Names that always resolve to the filter library in escape position.
pub fn is_builtin(name: &str) -> bool {
    matches!(name, "h" | "x" | "u" | "trim")
}

pub fn apply_builtin(name: &str, text: &str) -> Option<String> {
    match name {
        "h" => Some(html_escape(text)),
        "x" => Some(xml_escape(text)),
        "u" => Some(url_escape(text)),
        "trim" => Some(text.trim().to_string()),
        _ => None,
    }
}

pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Percent-encode everything outside the unreserved set, utf-8 bytewise.
pub fn url_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}
