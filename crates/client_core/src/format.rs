//! Inline text formatting for answer and error messages.
//!
//! `**bold**`, `*italic*` and `` `code` `` spans become `<strong>`, `<em>` and
//! `<code>`; newlines become `<br>`. The text is scanned once, left to
//! right, so code span contents are never touched by the emphasis rules.
//! Spans do not cross line breaks, must be non-empty, and unmatched markers
//! are kept literally. No HTML escaping is performed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allowed {
    All,
    ItalicAndCode,
    CodeOnly,
}

pub fn format_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            out.push_str("<br>");
        }
        format_line(line, Allowed::All, &mut out);
    }
    out
}

fn format_line(line: &str, allowed: Allowed, out: &mut String) {
    let mut rest = line;
    while let Some(ch) = rest.chars().next() {
        if ch == '`' {
            if let Some((inner, tail)) = split_span(&rest[1..], "`") {
                out.push_str("<code>");
                out.push_str(inner);
                out.push_str("</code>");
                rest = tail;
                continue;
            }
        } else if ch == '*' && allowed != Allowed::CodeOnly {
            if allowed == Allowed::All && rest.starts_with("**") {
                if let Some((inner, tail)) = split_span(&rest[2..], "**") {
                    out.push_str("<strong>");
                    format_line(inner, Allowed::ItalicAndCode, out);
                    out.push_str("</strong>");
                    rest = tail;
                    continue;
                }
            }
            if let Some((inner, tail)) = split_span(&rest[1..], "*") {
                out.push_str("<em>");
                format_line(inner, Allowed::CodeOnly, out);
                out.push_str("</em>");
                rest = tail;
                continue;
            }
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
}

/// Splits `text` at the first `marker`, returning the non-empty span body and
/// whatever follows the marker. Emphasis markers inside a code span do not
/// count.
fn split_span<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let end = if marker == "`" {
        text.find(marker)?
    } else {
        find_outside_code(text, marker)?
    };
    if end == 0 {
        return None;
    }
    Some((&text[..end], &text[end + marker.len()..]))
}

fn find_outside_code(text: &str, marker: &str) -> Option<usize> {
    let mut index = 0;
    while let Some(ch) = text[index..].chars().next() {
        let rest = &text[index..];
        if rest.starts_with(marker) {
            return Some(index);
        }
        if ch == '`' {
            if let Some(close) = rest[1..].find('`').filter(|close| *close > 0) {
                index += close + 2;
                continue;
            }
        }
        index += ch.len_utf8();
    }
    None
}
