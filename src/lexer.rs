//! Constant string literal tokenizer for PHP source.
//!
//! Only the parts of PHP's lexical grammar that decide whether a byte is
//! inside a string, a comment or inline HTML are modelled. Everything else is
//! treated as opaque code.
//!
//! A literal is emitted only when it is constant: single-quoted strings, and
//! double-quoted strings without variable interpolation. Heredoc, nowdoc and
//! backtick bodies are consumed but never emitted. An unterminated token at
//! end of input ends tokenization without emitting it.

/// A constant string literal, quotes included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Literal<'a> {
    pub text: &'a str,
    /// Byte offset of the opening quote.
    pub offset: usize,
}

impl<'a> Literal<'a> {
    /// Literal contents with the surrounding quotes stripped. Escapes are left as written.
    pub fn value(&self) -> &'a str {
        let t = self.text;
        if t.len() >= 2 {
            &t[1..t.len() - 1]
        } else {
            ""
        }
    }
}

/// Collect all constant string literals in `source`, in order of appearance.
pub fn string_literals(source: &str) -> Vec<Literal<'_>> {
    let b = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while let Some(open) = find_open_tag(b, i) {
        i = lex_code(source, open, &mut out);
    }
    out
}

/// Find the next `<?php` or `<?=` at or after `from`; returns the offset just past the tag.
fn find_open_tag(b: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < b.len() {
        if b[i] == b'<' && b[i + 1] == b'?' {
            let rest = &b[i + 2..];
            if rest.first() == Some(&b'=') {
                return Some(i + 3);
            }
            if rest.len() >= 3 && rest[..3].eq_ignore_ascii_case(b"php") {
                let after = rest.get(3);
                if after.map_or(true, |c| c.is_ascii_whitespace()) {
                    return Some(i + 5);
                }
            }
        }
        i += 1;
    }
    None
}

/// Lex PHP code starting at `start` until `?>` or end of input.
/// Returns the offset where inline HTML resumes.
fn lex_code<'a>(source: &'a str, start: usize, out: &mut Vec<Literal<'a>>) -> usize {
    let b = source.as_bytes();
    let n = b.len();
    let mut i = start;

    while i < n {
        let next = b.get(i + 1).copied();
        match b[i] {
            b'?' if next == Some(b'>') => return i + 2,
            b'#' if next != Some(b'[') => i = skip_line_comment(b, i + 1),
            b'/' if next == Some(b'/') => i = skip_line_comment(b, i + 2),
            b'/' if next == Some(b'*') => match find(b, i + 2, b"*/") {
                Some(end) => i = end + 2,
                None => return n,
            },
            b'\'' => match scan_quoted(b, i, b'\'') {
                Some(end) => {
                    out.push(Literal { text: &source[i..end], offset: i });
                    i = end;
                }
                None => return n,
            },
            b'"' => match scan_double_quoted(b, i) {
                Some((end, interpolated)) => {
                    if !interpolated {
                        out.push(Literal { text: &source[i..end], offset: i });
                    }
                    i = end;
                }
                None => return n,
            },
            b'`' => match scan_quoted(b, i, b'`') {
                Some(end) => i = end,
                None => return n,
            },
            b'<' if b[i..].starts_with(b"<<<") => match skip_heredoc(b, i + 3) {
                Some(end) => i = end,
                None => i += 3,
            },
            _ => i += 1,
        }
    }
    n
}

/// Advance to the end of a line comment. Stops before `?>`, which closes PHP mode.
fn skip_line_comment(b: &[u8], mut i: usize) -> usize {
    while i < b.len() {
        match b[i] {
            b'\n' => return i + 1,
            b'?' if b.get(i + 1) == Some(&b'>') => return i,
            _ => i += 1,
        }
    }
    i
}

fn find(b: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= b.len() {
        return None;
    }
    b[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Scan a quoted token opening at `start`; returns the offset past the closing quote.
fn scan_quoted(b: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut j = start + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => return Some(j + 1),
            _ => j += 1,
        }
    }
    None
}

/// Like `scan_quoted` for `"`, also reporting whether the body interpolates.
fn scan_double_quoted(b: &[u8], start: usize) -> Option<(usize, bool)> {
    let mut interpolated = false;
    let mut j = start + 1;
    while j < b.len() {
        let next = b.get(j + 1).copied();
        match b[j] {
            b'\\' => j += 2,
            b'"' => return Some((j + 1, interpolated)),
            b'$' if next.map_or(false, |c| c == b'{' || is_ident_start(c)) => {
                interpolated = true;
                j += 1;
            }
            b'{' if next == Some(b'$') => {
                interpolated = true;
                j += 1;
            }
            _ => j += 1,
        }
    }
    None
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_char(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// Skip a heredoc/nowdoc whose `<<<` ends just before `i`.
/// Returns `None` when the opener is malformed so the caller treats `<<<` as code.
fn skip_heredoc(b: &[u8], mut i: usize) -> Option<usize> {
    let n = b.len();
    while i < n && (b[i] == b' ' || b[i] == b'\t') {
        i += 1;
    }
    let quote = match b.get(i) {
        Some(&q @ (b'\'' | b'"')) => {
            i += 1;
            Some(q)
        }
        _ => None,
    };
    let id_start = i;
    if !b.get(i).copied().map_or(false, is_ident_start) {
        return None;
    }
    while i < n && is_ident_char(b[i]) {
        i += 1;
    }
    let ident = &b[id_start..i];
    if let Some(q) = quote {
        if b.get(i) != Some(&q) {
            return None;
        }
        i += 1;
    }
    if b.get(i) == Some(&b'\r') {
        i += 1;
    }
    if b.get(i) != Some(&b'\n') {
        return None;
    }
    i += 1;

    // Body lines; the closing identifier may be indented.
    while i < n {
        let mut j = i;
        while j < n && (b[j] == b' ' || b[j] == b'\t') {
            j += 1;
        }
        if b[j..].starts_with(ident) {
            let end = j + ident.len();
            if !b.get(end).copied().map_or(false, is_ident_char) {
                return Some(end);
            }
        }
        match find(b, i, b"\n") {
            Some(nl) => i = nl + 1,
            None => break,
        }
    }
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(src: &str) -> Vec<&str> {
        string_literals(src).iter().map(|l| l.value()).collect()
    }

    #[test]
    fn single_and_double_quoted() {
        let src = r#"<?php $a = 'one'; $b = "two"; f('it\'s');"#;
        assert_eq!(values(src), vec!["one", "two", "it\\'s"]);
    }

    #[test]
    fn comments_are_skipped() {
        let src = "<?php\n// 'no1'\n# \"no2\"\n/* 'no3'\n */ $x = 'yes';\n";
        assert_eq!(values(src), vec!["yes"]);
    }

    #[test]
    fn attribute_is_code_not_comment() {
        let src = "<?php\n#[Route('/api')]\nfunction f() {}\n";
        assert_eq!(values(src), vec!["/api"]);
    }

    #[test]
    fn interpolated_strings_are_not_constant() {
        let src = r#"<?php $u = "https://$host/x"; $v = "https://{$h}/"; $w = "cost: \$5";"#;
        assert_eq!(values(src), vec!["cost: \\$5"]);
    }

    #[test]
    fn inline_html_is_ignored() {
        let src = "<a href='https://html.example.com'>x</a><?php echo 'in'; ?><p>'out'</p>";
        assert_eq!(values(src), vec!["in"]);
    }

    #[test]
    fn close_tag_ends_line_comment() {
        let src = "<?php // note ?>'html'<?php $a = 'code';";
        assert_eq!(values(src), vec!["code"]);
    }

    #[test]
    fn short_echo_tag_opens_code() {
        assert_eq!(values("<p><?= 'hi' ?></p>"), vec!["hi"]);
    }

    #[test]
    fn xml_declaration_is_not_php() {
        assert!(values("<?xml version='1.0'?><root/>").is_empty());
    }

    #[test]
    fn heredoc_and_nowdoc_bodies_are_skipped() {
        let src = "<?php\n$a = <<<EOT\n'https://heredoc.example.com'\nEOT;\n$b = <<<'NOW'\n  'x'\n  NOW;\n$c = 'after';\n";
        assert_eq!(values(src), vec!["after"]);
    }

    #[test]
    fn unterminated_string_is_dropped() {
        assert_eq!(values("<?php $a = 'ok'; $b = 'never closed"), vec!["ok"]);
    }

    #[test]
    fn offsets_point_at_opening_quote() {
        let src = "<?php $a = 'x';";
        let lits = string_literals(src);
        assert_eq!(lits.len(), 1);
        assert_eq!(&src[lits[0].offset..lits[0].offset + 1], "'");
    }
}
