//! Low-level text scanning helpers shared by the driver, the filters and
//! the expression parser.
//!
//! Lines are ASCII byte slices; positions are byte indices.

/// True for the characters the cleanup pass treats as spacing
/// (including newline; the line readers check for `\n` explicitly
/// before this).
pub fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == b'\n' || c == b'\r' || c == 0x0b || c == 0x0c
}

/// True for ASCII digits.
pub fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

/// True for identifier-start characters.
pub fn is_sym_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'.' || c == b'$'
}

/// True for identifier-continuation characters.
pub fn is_sym_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'$'
}

/// Advance `pos` past spaces.
pub fn skip_spaces(line: &[u8], pos: &mut usize) {
    while *pos < line.len() && line[*pos] == b' ' {
        *pos += 1;
    }
}

/// Advance `pos` one character, then past spaces.
pub fn skip_char_and_spaces(line: &[u8], pos: &mut usize) {
    *pos += 1;
    skip_spaces(line, pos);
}

/// Extract a plain (unscoped) symbol name starting at `pos`.
///
/// With `local_label` set, a leading digit run followed by `b`/`f` is
/// accepted as a local-label reference (`2b`, `10f`).
pub fn extract_sym_name(line: &[u8], pos: &mut usize, local_label: bool) -> Option<String> {
    let start = *pos;
    if *pos < line.len() && is_sym_start(line[*pos]) {
        *pos += 1;
        while *pos < line.len() && is_sym_char(line[*pos]) {
            *pos += 1;
        }
        return Some(String::from_utf8_lossy(&line[start..*pos]).into_owned());
    }
    if local_label && *pos < line.len() && is_digit(line[*pos]) {
        let digit_start = *pos;
        while *pos < line.len() && is_digit(line[*pos]) {
            *pos += 1;
        }
        if *pos < line.len() && (line[*pos] == b'b' || line[*pos] == b'f') && (*pos + 1 == line.len() || !is_sym_char(line[*pos + 1])) {
            *pos += 1;
            return Some(String::from_utf8_lossy(&line[digit_start..*pos]).into_owned());
        }
        *pos = digit_start;
    }
    None
}

/// Extract a possibly `::`-qualified symbol name.
pub fn extract_scoped_sym_name(line: &[u8], pos: &mut usize, local_label: bool) -> Option<String> {
    let start = *pos;
    // leading :: selects the global scope
    if line[*pos..].starts_with(b"::") {
        *pos += 2;
    }
    if extract_sym_name(line, pos, local_label).is_none() {
        *pos = start;
        return None;
    }
    loop {
        let before = *pos;
        if !line[*pos..].starts_with(b"::") {
            break;
        }
        *pos += 2;
        if extract_sym_name(line, pos, false).is_none() {
            *pos = before;
            break;
        }
    }
    Some(String::from_utf8_lossy(&line[start..*pos]).into_owned())
}

/// Extract a statement-leading name: digit run (local label definition)
/// or scoped symbol name.
pub fn extract_label_name(line: &[u8], pos: &mut usize) -> Option<String> {
    if *pos < line.len() && is_digit(line[*pos]) {
        let start = *pos;
        while *pos < line.len() && is_digit(line[*pos]) {
            *pos += 1;
        }
        return Some(String::from_utf8_lossy(&line[start..*pos]).into_owned());
    }
    extract_scoped_sym_name(line, pos, false)
}

/// Skip any `name:` labels at the start of a statement.
pub fn skip_spaces_and_labels(line: &[u8], pos: &mut usize) {
    loop {
        skip_spaces(line, pos);
        let before = *pos;
        if extract_label_name(line, pos).is_none() {
            break;
        }
        if *pos < line.len() && line[*pos] == b':' && (*pos + 1 == line.len() || line[*pos + 1] != b':') {
            *pos += 1;
        } else {
            *pos = before;
            break;
        }
    }
}

/// Character classes for macro-argument splitting: a run of characters of
/// one non-space class forms a single argument token.
///
/// Classes: 0 - separate single char, 1 - spacing, 2 - operator run,
/// 3 - name run, 4 - quote.
pub fn token_char_class(c: u8) -> u8 {
    match c {
        b' ' | b'\t' => 1,
        b'"' | b'\'' => 4,
        c if is_sym_char(c) || c == b'@' => 3,
        b',' | b';' | b'(' | b')' | b'[' | b']' | b'{' | b'}' => 0,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_names() {
        let line = b"alpha beta";
        let mut pos = 0;
        assert_eq!(extract_sym_name(line, &mut pos, false).as_deref(), Some("alpha"));
        assert_eq!(pos, 5);
    }

    #[test]
    fn extracts_local_label_refs_only_when_asked() {
        let line = b"2b";
        let mut pos = 0;
        assert_eq!(extract_sym_name(line, &mut pos, false), None);
        pos = 0;
        assert_eq!(extract_sym_name(line, &mut pos, true).as_deref(), Some("2b"));
    }

    #[test]
    fn extracts_scoped_names() {
        let line = b"a::b::c rest";
        let mut pos = 0;
        assert_eq!(extract_scoped_sym_name(line, &mut pos, false).as_deref(), Some("a::b::c"));
    }

    #[test]
    fn label_skip_stops_before_statement() {
        let line = b"lab1: lab2: .byte 1";
        let mut pos = 0;
        skip_spaces_and_labels(line, &mut pos);
        assert_eq!(&line[pos..], b".byte 1");
    }
}
