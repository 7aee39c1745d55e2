//! Cleanup applied to OCR output before it is classified or batched.

const TRIM_CHARS: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '[', ']', '{', '}', '|', '<', '>', '/',
    '*', '-', '+', '=', '@', '#', '$', '%', '^', '&', '~', '`', '_',
];

/// Collapses whitespace, drops tokens without any letter or digit, and trims
/// stray punctuation OCR tends to attach to token edges. Line breaks survive
/// as single newlines so paragraphs stay apart.
pub fn normalize_ocr_text(raw: &str) -> String {
    raw.lines()
        .map(normalize_line)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_line(line: &str) -> String {
    line.split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(trim_token)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keeps one trailing sentence mark so prose still reads naturally.
fn trim_token(token: &str) -> &str {
    let start = token.trim_start_matches(TRIM_CHARS);
    let core = start.trim_end_matches(TRIM_CHARS);
    let tail = &start[core.len()..];
    match tail.chars().next() {
        Some(mark @ ('.' | ',' | '!' | '?' | ':' | ';')) => &start[..core.len() + mark.len_utf8()],
        _ => core,
    }
}
