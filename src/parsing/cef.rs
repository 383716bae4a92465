//! Common Event Format records
//!
//! `CEF:Version|Vendor|Product|Version|Signature ID|Name|Severity|Extension`
//! where the extension is a run of `key=value` pairs whose values may
//! contain spaces.

const HEADER_FIELDS: [&str; 7] = [
    "cef_version",
    "device_vendor",
    "device_product",
    "device_version",
    "signature_id",
    "name",
    "severity",
];

const PREFIX: &str = "CEF:";

pub fn is_cef(text: &str) -> bool {
    text.trim_start().starts_with(PREFIX)
}

/// Header fields followed by extension pairs, or `None` if the header is incomplete
pub fn parse_cef(text: &str) -> Option<Vec<(String, String)>> {
    let body = text.trim().strip_prefix(PREFIX)?;
    let (header, extension) = split_header(body)?;

    let mut fields: Vec<(String, String)> = HEADER_FIELDS
        .iter()
        .map(|name| name.to_string())
        .zip(header)
        .collect();
    fields.extend(extension_pairs(extension));
    Some(fields)
}

/// Split the seven pipe-separated header fields; `\|` and `\\` are escapes
fn split_header(body: &str) -> Option<(Vec<String>, &str)> {
    let mut fields = Vec::with_capacity(HEADER_FIELDS.len());
    let mut current = String::new();
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '|' => {
                fields.push(std::mem::take(&mut current).trim().to_string());
                if fields.len() == HEADER_FIELDS.len() {
                    return Some((fields, &body[i + 1..]));
                }
            }
            _ => current.push(c),
        }
    }
    None
}

fn is_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn extension_pairs(extension: &str) -> Vec<(String, String)> {
    let bytes = extension.as_bytes();

    // (key start, position of '=')
    let mut keys: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let at_boundary = i == 0 || bytes[i - 1].is_ascii_whitespace();
        if at_boundary && is_key_byte(bytes[i]) {
            let mut j = i;
            while j < bytes.len() && is_key_byte(bytes[j]) {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'=' {
                keys.push((i, j));
                i = j + 1;
            } else {
                i = j;
            }
            continue;
        }
        i += 1;
    }

    keys.iter()
        .enumerate()
        .map(|(k, &(start, eq))| {
            let end = keys.get(k + 1).map_or(bytes.len(), |&(next, _)| next);
            let value = extension[eq + 1..end].trim();
            (extension[start..eq].to_string(), unescape(value))
        })
        .collect()
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
