//! Plaintext extraction for indexing: CPU work that runs inline alongside
//! the async save/projection pipeline.
//!
//! This is deliberately minimal. A full RTF renderer is the editor's job,
//! not this daemon's, and is never reimplemented here. This module only
//! strips enough control structure to get searchable words into the
//! index; it is not expected to losslessly round-trip formatting.

/// Extracts indexable plaintext from `bytes` given the file's extension
/// (without the leading dot). Unknown extensions are treated as UTF-8 text,
/// which covers `.md`/`.txt` and is a safe fallback for anything else the
/// eligibility filter has already let through.
pub fn plaintext_from_bytes(extension: &str, bytes: &[u8]) -> String {
    if extension.eq_ignore_ascii_case("rtf") {
        strip_rtf(&String::from_utf8_lossy(bytes))
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Strips RTF control words, control symbols, and group braces, keeping
/// only literal text. `\par` and `\line` become newlines; `\'hh` hex escapes
/// are decoded as Latin-1 bytes (the common case for RTF authored by
/// Windows editors); `{\*...}` destination groups (font tables, color
/// tables, embedded objects) are skipped by depth-tracking past their
/// closing brace.
fn strip_rtf(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut skip_depth: Option<usize> = None;
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                depth += 1;
                // A destination group starts with `\*` immediately inside
                // the brace; skip it and everything nested inside.
                if chars.peek() == Some(&'\\') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'*') {
                        skip_depth = Some(depth);
                    }
                }
            }
            '}' => {
                if skip_depth == Some(depth) {
                    skip_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            '\\' if skip_depth.is_none() => {
                consume_control(&mut chars, &mut out);
            }
            _ if skip_depth.is_none() => {
                if c != '\r' && c != '\n' {
                    out.push(c);
                }
            }
            _ => {}
        }
    }

    collapse_whitespace(&out)
}

fn consume_control(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    match chars.peek().copied() {
        Some('\'') => {
            chars.next();
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                    out.push(byte as char);
                }
            }
        }
        Some(c) if c.is_alphabetic() => {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphabetic() {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            // An optional numeric parameter (possibly negative).
            if chars.peek() == Some(&'-') {
                chars.next();
            }
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    chars.next();
                } else {
                    break;
                }
            }
            // RTF's mandatory space delimiter after a control word.
            if chars.peek() == Some(&' ') {
                chars.next();
            }
            if word == "par" || word == "line" {
                out.push('\n');
            }
        }
        Some(_) => {
            // Control symbol: a single non-alphabetic character (e.g. `\\`, `\{`).
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        }
        None => {}
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c == '\n' {
            out.push('\n');
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extensions_pass_through_unchanged() {
        assert_eq!(plaintext_from_bytes("md", b"# Title\n\nbody"), "# Title\n\nbody");
        assert_eq!(plaintext_from_bytes("txt", b"hello"), "hello");
    }

    #[test]
    fn strips_rtf_control_words_and_keeps_text() {
        let rtf = r"{\rtf1\ansi\deff0 Hello \b world\b0 !\par Second line.}";
        let text = plaintext_from_bytes("rtf", rtf.as_bytes());
        assert_eq!(text, "Hello world!\nSecond line.");
    }

    #[test]
    fn skips_destination_groups() {
        let rtf = r"{\rtf1{\*\generator NoteNest}Visible text only}";
        let text = plaintext_from_bytes("rtf", rtf.as_bytes());
        assert_eq!(text, "Visible text only");
    }

    #[test]
    fn decodes_hex_escapes() {
        // \'e9 is Latin-1 'é'.
        let rtf = r"{\rtf1 caf\'e9}";
        let text = plaintext_from_bytes("rtf", rtf.as_bytes());
        assert_eq!(text, "café");
    }
}
