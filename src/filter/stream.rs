//! File/stdin input filter with tokenization-neutral cleanup.

use std::io::Read;
use std::rc::Rc;

use super::{FilterCommon, LineTrans};
use crate::asm::Assembler;
use crate::parse_utils::is_space;
use crate::source::Source;
use gcn_types::LineNo;

const LINE_MAX_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMode {
    Normal,
    LineComment,
    LongComment,
    Str,
    LStr,
}

/// Reads a byte stream and serves logical lines: `\` continuations are
/// joined, `;` splits statements, `#` and `/* */` comments become
/// spaces, spacing is normalized, strings pass through untouched.
pub struct StreamFilter {
    /// Shared filter state.
    pub common: FilterCommon,
    reader: Box<dyn Read>,
    buffer: Vec<u8>,
    pos: usize,
    stmt_pos: usize,
    line_no: LineNo,
    mode: LineMode,
}

impl std::fmt::Debug for StreamFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFilter").field("pos", &self.pos).field("line_no", &self.line_no).finish()
    }
}

impl StreamFilter {
    /// Filter over an arbitrary reader; `source` describes its origin.
    pub fn new(reader: Box<dyn Read>, source: Rc<Source>) -> Self {
        StreamFilter {
            common: FilterCommon {
                col_translations: Vec::new(),
                line_no: 1,
                source,
                macro_subst: None,
            },
            reader,
            buffer: Vec::new(),
            pos: 0,
            stmt_pos: 0,
            line_no: 1,
            mode: LineMode::Normal,
        }
    }

    /// Filter over in-memory text (tests, stdin capture).
    pub fn from_string(text: impl Into<Vec<u8>>, source: Rc<Source>) -> Self {
        Self::new(Box::new(std::io::Cursor::new(text.into())), source)
    }

    pub(crate) fn read_line(&mut self, asm: &mut Assembler) -> Option<Rc<str>> {
        self.common.col_translations.clear();
        let mut end_of_line = false;
        let mut line_start = self.pos;
        let mut join_start = self.pos;
        let mut dest_pos = self.pos;
        let mut backslash = 0usize;
        let mut prev_asterisk = false;
        let mut asterisk = false;
        self.common
            .col_translations
            .push(LineTrans { position: -(self.stmt_pos as isize), line_no: self.line_no });
        while !end_of_line {
            match self.mode {
                LineMode::Normal => {
                    if self.pos < self.buffer.len()
                        && !is_space(self.buffer[self.pos])
                        && self.buffer[self.pos] != b';'
                    {
                        // consume a run of non-space characters
                        loop {
                            backslash = usize::from(self.buffer[self.pos] == b'\\');
                            if self.buffer[self.pos] == b'*'
                                && dest_pos > 0
                                && self.buffer[dest_pos - 1] == b'/'
                            {
                                prev_asterisk = false;
                                asterisk = false;
                                self.buffer[dest_pos - 1] = b' ';
                                self.buffer[dest_pos] = b' ';
                                dest_pos += 1;
                                self.mode = LineMode::LongComment;
                                self.pos += 1;
                                break;
                            }
                            if self.buffer[self.pos] == b'#' {
                                self.buffer[dest_pos] = b' ';
                                dest_pos += 1;
                                self.mode = LineMode::LineComment;
                                self.pos += 1;
                                break;
                            }
                            let old = self.buffer[self.pos];
                            self.buffer[dest_pos] = old;
                            dest_pos += 1;
                            self.pos += 1;
                            if old == b'"' {
                                self.mode = LineMode::Str;
                                break;
                            }
                            if old == b'\'' {
                                self.mode = LineMode::LStr;
                                break;
                            }
                            if self.pos >= self.buffer.len()
                                || is_space(self.buffer[self.pos])
                                || self.buffer[self.pos] == b';'
                            {
                                break;
                            }
                        }
                    }
                    if self.pos < self.buffer.len() && self.mode != LineMode::LineComment {
                        if self.buffer[self.pos] == b'\n' {
                            self.line_no += 1;
                            end_of_line = backslash == 0;
                            if backslash != 0 {
                                dest_pos -= 1;
                                self.replace_col_trans(dest_pos, line_start);
                            }
                            self.stmt_pos = 0;
                            self.pos += 1;
                            join_start = self.pos;
                            backslash = 0;
                        } else if self.buffer[self.pos] == b';' && self.mode == LineMode::Normal {
                            // statement becomes a separate line
                            end_of_line = true;
                            self.pos += 1;
                            self.stmt_pos += self.pos - join_start;
                            join_start = self.pos;
                            backslash = 0;
                        } else if self.mode == LineMode::Normal {
                            // compress spacing to plain spaces
                            backslash = 0;
                            loop {
                                self.buffer[dest_pos] = b' ';
                                dest_pos += 1;
                                self.pos += 1;
                                if self.pos >= self.buffer.len()
                                    || self.buffer[self.pos] == b'\n'
                                    || !is_space(self.buffer[self.pos])
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
                LineMode::LineComment => {
                    while self.pos < self.buffer.len() && self.buffer[self.pos] != b'\n' {
                        backslash = usize::from(self.buffer[self.pos] == b'\\');
                        self.pos += 1;
                        self.buffer[dest_pos] = b' ';
                        dest_pos += 1;
                    }
                    if self.pos < self.buffer.len() {
                        self.line_no += 1;
                        end_of_line = backslash == 0;
                        if backslash != 0 {
                            // comment continues after line splicing
                            dest_pos -= 1;
                            self.replace_col_trans(dest_pos, line_start);
                        } else {
                            self.mode = LineMode::Normal;
                        }
                        self.pos += 1;
                        join_start = self.pos;
                        backslash = 0;
                        self.stmt_pos = 0;
                    }
                }
                LineMode::LongComment => {
                    while self.pos < self.buffer.len()
                        && self.buffer[self.pos] != b'\n'
                        && (!asterisk || self.buffer[self.pos] != b'/')
                    {
                        backslash = usize::from(self.buffer[self.pos] == b'\\');
                        prev_asterisk = asterisk;
                        asterisk = self.buffer[self.pos] == b'*';
                        self.pos += 1;
                        self.buffer[dest_pos] = b' ';
                        dest_pos += 1;
                    }
                    if self.pos < self.buffer.len() {
                        if asterisk && self.buffer[self.pos] == b'/' {
                            self.pos += 1;
                            self.buffer[dest_pos] = b' ';
                            dest_pos += 1;
                            self.mode = LineMode::Normal;
                        } else {
                            self.line_no += 1;
                            end_of_line = backslash == 0;
                            if backslash != 0 {
                                asterisk = prev_asterisk;
                                prev_asterisk = false;
                                dest_pos -= 1;
                                self.replace_col_trans(dest_pos, line_start);
                            }
                            self.pos += 1;
                            join_start = self.pos;
                            backslash = 0;
                            self.stmt_pos = 0;
                        }
                    }
                }
                LineMode::Str | LineMode::LStr => {
                    let quote = if self.mode == LineMode::Str { b'"' } else { b'\'' };
                    while self.pos < self.buffer.len()
                        && self.buffer[self.pos] != b'\n'
                        && ((backslash & 1) != 0 || self.buffer[self.pos] != quote)
                    {
                        if self.buffer[self.pos] == b'\\' {
                            backslash += 1;
                        } else {
                            backslash = 0;
                        }
                        self.buffer[dest_pos] = self.buffer[self.pos];
                        dest_pos += 1;
                        self.pos += 1;
                    }
                    if self.pos < self.buffer.len() {
                        if (backslash & 1) == 0 && self.buffer[self.pos] == quote {
                            self.pos += 1;
                            self.mode = LineMode::Normal;
                            self.buffer[dest_pos] = quote;
                            dest_pos += 1;
                        } else {
                            self.line_no += 1;
                            end_of_line = (backslash & 1) == 0;
                            if (backslash & 1) != 0 {
                                dest_pos -= 1; // drop the splicing backslash
                                self.common.col_translations.push(LineTrans {
                                    position: (dest_pos - line_start) as isize,
                                    line_no: self.line_no,
                                });
                            } else {
                                let col = self.pos - join_start + self.stmt_pos + 1;
                                let pos = crate::source::SourcePos {
                                    macro_subst: self.common.macro_subst.clone(),
                                    source: self.common.source.clone(),
                                    line_no: self.line_no,
                                    col_no: col,
                                    expr_source_pos: None,
                                };
                                asm.print_warning_at(&pos, "Unterminated string: newline inserted");
                            }
                            self.pos += 1;
                            join_start = self.pos;
                            self.stmt_pos = 0;
                        }
                        backslash = 0;
                    }
                }
            }
            if end_of_line {
                break;
            }
            if self.pos >= self.buffer.len() {
                // refill, compacting the processed prefix away first
                if line_start != 0 {
                    self.buffer.copy_within(line_start..self.pos, 0);
                    dest_pos -= line_start;
                    join_start -= self.pos - dest_pos;
                    self.pos = dest_pos;
                    line_start = 0;
                }
                if self.pos == self.buffer.len() {
                    let new_len = LINE_MAX_SIZE.max(self.pos + (self.pos >> 1));
                    self.buffer.resize(new_len, 0);
                }
                let got = match self.reader.read(&mut self.buffer[self.pos..]) {
                    Ok(n) => n,
                    Err(_) => 0,
                };
                self.buffer.truncate(self.pos + got);
                if got == 0 {
                    if self.mode == LineMode::LongComment && line_start != self.pos {
                        let col = self.pos - join_start + self.stmt_pos + 1;
                        let pos = crate::source::SourcePos {
                            macro_subst: self.common.macro_subst.clone(),
                            source: self.common.source.clone(),
                            line_no: self.line_no,
                            col_no: col,
                            expr_source_pos: None,
                        };
                        asm.print_error_at(&pos, "Unterminated multi-line comment");
                    }
                    if dest_pos == line_start {
                        return None;
                    }
                    break;
                }
            }
        }
        self.common.line_no = self.common.col_translations.first().map(|t| t.line_no).unwrap_or(self.line_no);
        let line = String::from_utf8_lossy(&self.buffer[line_start..dest_pos]).into_owned();
        Some(Rc::from(line))
    }

    fn replace_col_trans(&mut self, dest_pos: usize, line_start: usize) {
        let at = (dest_pos - line_start) as isize;
        if self.common.col_translations.last().map(|t| t.position) == Some(at) {
            self.common.col_translations.pop();
        }
        self.common.col_translations.push(LineTrans { position: at, line_no: self.line_no });
    }
}
