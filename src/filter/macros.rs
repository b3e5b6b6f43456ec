//! Macro body storage and the macro-substitution filter.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

use super::{FilterCommon, LineTrans};
use crate::asm::Assembler;
use crate::parse_utils::{extract_sym_name, is_sym_start, skip_spaces_and_labels};
use crate::source::{MacroSubst, Source, SourcePos};
use gcn_types::LineNo;

/// Declared macro argument.
#[derive(Debug, Clone)]
pub struct MacroArg {
    /// Argument name.
    pub name: String,
    /// Default value for omitted arguments.
    pub def_value: String,
    /// `:vararg` — swallows the rest of the call line.
    pub vararg: bool,
    /// `:req` — must be non-empty at the call.
    pub required: bool,
}

/// Recorded body of a `.macro`.
#[derive(Debug)]
pub struct MacroData {
    /// Where the `.macro` appeared.
    pub source_pos: SourcePos,
    /// Declared arguments in order.
    pub args: Vec<MacroArg>,
    content: Vec<u8>,
    col_translations: Vec<LineTrans>,
    source_translations: Vec<(u64, Rc<Source>)>,
    content_line_no: u64,
}

impl MacroData {
    /// Empty body with the given argument list.
    pub fn new(source_pos: SourcePos, args: Vec<MacroArg>) -> Self {
        MacroData {
            source_pos,
            args,
            content: Vec::new(),
            col_translations: Vec::new(),
            source_translations: Vec::new(),
            content_line_no: 0,
        }
    }

    /// Append one recorded line (between `.macro` and `.endm`).
    pub fn add_line(
        &mut self,
        macro_subst: Option<Rc<MacroSubst>>,
        source: Rc<Source>,
        col_trans: &[LineTrans],
        line: &str,
    ) {
        self.content.extend_from_slice(line.as_bytes());
        if line.as_bytes().last() != Some(&b'\n') {
            self.content.push(b'\n');
        }
        self.col_translations.extend_from_slice(col_trans);
        match macro_subst {
            None => {
                let differs = match self.source_translations.last() {
                    None => true,
                    Some((_, last)) => !Rc::ptr_eq(last, &source),
                };
                if differs {
                    self.source_translations.push((self.content_line_no, source));
                }
            }
            Some(mac) => {
                let differs = match self.source_translations.last() {
                    None => true,
                    Some((_, last)) => match &**last {
                        Source::Macro { macro_subst: lm, source: ls } => {
                            !Rc::ptr_eq(ls, &source) || !Rc::ptr_eq(lm, &mac)
                        }
                        _ => true,
                    },
                };
                if differs {
                    self.source_translations.push((
                        self.content_line_no,
                        Rc::new(Source::Macro { macro_subst: mac, source }),
                    ));
                }
            }
        }
        self.content_line_no += 1;
    }

    pub(crate) fn content(&self) -> &[u8] {
        &self.content
    }

    pub(crate) fn col_translations(&self) -> &[LineTrans] {
        &self.col_translations
    }

    pub(crate) fn source_translations(&self) -> &[(u64, Rc<Source>)] {
        &self.source_translations
    }
}

/// Replays a macro body, substituting `\arg`, `\@`, `\()` and, in
/// alternate-macro mode, bare argument and `local` names.
#[derive(Debug)]
pub struct MacroFilter {
    /// Shared filter state.
    pub common: FilterCommon,
    macro_data: Rc<MacroData>,
    /// Sorted `(name, value)` pairs.
    arg_map: Vec<(String, String)>,
    local_map: HashMap<String, u64>,
    macro_count: u64,
    content_line_no: u64,
    source_trans_index: usize,
    real_line_pos: usize,
    alternate_macro: bool,
    pos: usize,
    cur_col_trans: usize,
    line_no: LineNo,
    buffer: Vec<u8>,
}

impl MacroFilter {
    /// Filter for one invocation. `arg_map` must be sorted by name;
    /// `pos` is the invocation position; `macro_count` the per-assembler
    /// invocation counter feeding `\@`.
    pub fn new(
        macro_data: Rc<MacroData>,
        pos: &SourcePos,
        mut arg_map: Vec<(String, String)>,
        macro_count: u64,
        alternate_macro: bool,
    ) -> Self {
        arg_map.sort_by(|a, b| a.0.cmp(&b.0));
        let source = macro_data
            .source_translations()
            .first()
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| pos.source.clone());
        let macro_subst = Rc::new(MacroSubst {
            parent: pos.macro_subst.clone(),
            source: pos.source.clone(),
            line_no: pos.line_no,
            col_no: pos.col_no,
        });
        let line_no = macro_data.col_translations().first().map(|t| t.line_no).unwrap_or(0);
        let real_line_pos = macro_data
            .col_translations()
            .first()
            .map(|t| (-t.position).max(0) as usize)
            .unwrap_or(0);
        MacroFilter {
            common: FilterCommon {
                col_translations: Vec::new(),
                line_no,
                source,
                macro_subst: Some(macro_subst),
            },
            macro_data,
            arg_map,
            local_map: HashMap::new(),
            macro_count,
            content_line_no: 0,
            source_trans_index: 0,
            real_line_pos,
            alternate_macro,
            pos: 0,
            cur_col_trans: 0,
            line_no,
            buffer: Vec::new(),
        }
    }

    fn find_arg(&self, name: &str) -> Option<&str> {
        self.arg_map
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| self.arg_map[i].1.as_str())
    }

    fn add_local(&mut self, name: &str, local_no: u64) -> bool {
        if self.find_arg(name).is_some() {
            return false;
        }
        self.local_map.insert(name.to_owned(), local_no).is_none()
    }

    pub(crate) fn read_line(&mut self, asm: &mut Assembler) -> Option<Rc<str>> {
        self.buffer.clear();
        self.common.col_translations.clear();
        let content = self.macro_data.content().to_vec();
        let content_size = content.len();
        let macro_col_trans = self.macro_data.col_translations().to_vec();
        if self.pos == content_size {
            return None;
        }

        let mut next_line_pos = self.pos;
        while next_line_pos < content_size && content[next_line_pos] != b'\n' {
            next_line_pos += 1;
        }
        let line_pos = self.pos;
        let mut dest_pos = 0usize;
        let mut to_copy_pos = self.pos;
        let mut dest_line_start = 0usize;
        self.common.col_translations.push(LineTrans {
            position: -(self.real_line_pos as isize),
            line_no: macro_col_trans.get(self.cur_col_trans).map(|t| t.line_no).unwrap_or(0),
        });
        let threshold = |cur: usize| -> usize {
            if cur + 1 < macro_col_trans.len() {
                if macro_col_trans[cur + 1].position > 0 {
                    (macro_col_trans[cur + 1].position as usize).wrapping_add(line_pos)
                } else {
                    next_line_pos
                }
            } else {
                usize::MAX
            }
        };
        let mut col_trans_threshold = threshold(self.cur_col_trans);

        // alternate-macro `local NAME[, NAME]` statement detection
        let mut local_stmt_start: Option<usize> = None;
        let mut local_names: Vec<(String, usize)> = Vec::new();
        if self.alternate_macro {
            let mut p = self.pos;
            skip_spaces_and_labels(&content[..next_line_pos], &mut p);
            let stmt = p;
            let rest = &content[p..next_line_pos];
            if rest.len() > 6 && rest[..5].eq_ignore_ascii_case(b"local") && rest[5] == b' ' {
                p += 5;
                local_stmt_start = Some(stmt);
                loop {
                    crate::parse_utils::skip_spaces(&content[..next_line_pos], &mut p);
                    if p == next_line_pos {
                        break;
                    }
                    let name_place = p;
                    match extract_sym_name(&content[..next_line_pos], &mut p, false) {
                        Some(name) => {
                            local_names.push((name, name_place - self.pos));
                            crate::parse_utils::skip_spaces(&content[..next_line_pos], &mut p);
                            if p != next_line_pos && content[p] == b',' {
                                p += 1;
                            }
                        }
                        None => break,
                    }
                }
                crate::parse_utils::skip_spaces(&content[..next_line_pos], &mut p);
                if p != next_line_pos {
                    local_stmt_start = None;
                }
            }
        }

        let mut word_skip = 0usize;
        while self.pos < content_size && content[self.pos] != b'\n' {
            if self.alternate_macro && local_stmt_start == Some(self.pos) {
                // blank out the local statement so the driver ignores it
                self.buffer.extend_from_slice(&content[to_copy_pos..self.pos]);
                dest_pos += self.pos - to_copy_pos;
                to_copy_pos = self.pos;
                while self.pos < content_size && content[self.pos] != b'\n' {
                    if self.pos >= col_trans_threshold {
                        self.cur_col_trans += 1;
                        self.common.col_translations.push(LineTrans {
                            position: (dest_pos + self.pos - to_copy_pos) as isize,
                            line_no: macro_col_trans[self.cur_col_trans].line_no,
                        });
                        if macro_col_trans[self.cur_col_trans].position >= 0 {
                            self.real_line_pos = 0;
                            dest_line_start = dest_pos + self.pos - to_copy_pos;
                        }
                        col_trans_threshold = threshold(self.cur_col_trans);
                    }
                    self.pos += 1;
                    self.buffer.push(b' ');
                }
                dest_pos = self.buffer.len();
                to_copy_pos = self.pos;
                break;
            }

            let mut try_subst = false;
            let mut alt_syntax = false;
            if content[self.pos] != b'\\' {
                if self.pos >= col_trans_threshold {
                    self.cur_col_trans += 1;
                    self.common.col_translations.push(LineTrans {
                        position: (dest_pos + self.pos - to_copy_pos) as isize,
                        line_no: macro_col_trans[self.cur_col_trans].line_no,
                    });
                    if macro_col_trans[self.cur_col_trans].position >= 0 {
                        self.real_line_pos = 0;
                        dest_line_start = dest_pos + self.pos - to_copy_pos;
                    }
                    col_trans_threshold = threshold(self.cur_col_trans);
                }
                if self.alternate_macro && word_skip == 0 && is_sym_start(content[self.pos]) {
                    try_subst = true;
                    alt_syntax = true;
                } else {
                    if word_skip != 0 {
                        word_skip -= 1;
                    }
                    self.pos += 1;
                }
            } else {
                if self.pos >= col_trans_threshold {
                    self.cur_col_trans += 1;
                    self.common.col_translations.push(LineTrans {
                        position: (dest_pos + self.pos - to_copy_pos) as isize,
                        line_no: macro_col_trans[self.cur_col_trans].line_no,
                    });
                    if macro_col_trans[self.cur_col_trans].position >= 0 {
                        self.real_line_pos = 0;
                        dest_line_start = dest_pos + self.pos - to_copy_pos;
                    }
                    col_trans_threshold = threshold(self.cur_col_trans);
                }
                // flush content before the backslash
                self.buffer.extend_from_slice(&content[to_copy_pos..self.pos]);
                dest_pos += self.pos - to_copy_pos;
                self.pos += 1;
                try_subst = true;
            }
            if try_subst {
                if self.pos < content_size {
                    if !alt_syntax
                        && content[self.pos] == b'('
                        && self.pos + 1 < content_size
                        && content[self.pos + 1] == b')'
                    {
                        self.pos += 2; // \() separator
                    } else {
                        let mut p = self.pos;
                        let sym_name = extract_sym_name(&content, &mut p, false);
                        let arg_val =
                            sym_name.as_deref().and_then(|n| self.find_arg(n)).map(str::to_owned);
                        let local_val =
                            sym_name.as_deref().and_then(|n| self.local_map.get(n)).copied();
                        if alt_syntax && (arg_val.is_some() || local_val.is_some()) {
                            // flush before an alternate substitution
                            self.buffer.extend_from_slice(&content[to_copy_pos..self.pos]);
                            dest_pos += self.pos - to_copy_pos;
                        }
                        if let Some(val) = arg_val {
                            self.buffer.extend_from_slice(val.as_bytes());
                            dest_pos += val.len();
                            self.pos = p;
                        } else if let Some(no) = local_val {
                            let mut s = String::new();
                            let _ = write!(s, ".LL{}", no);
                            self.buffer.extend_from_slice(s.as_bytes());
                            dest_pos += s.len();
                            self.pos = p;
                        } else if !alt_syntax && content[self.pos] == b'@' {
                            let mut s = String::new();
                            let _ = write!(s, "{}", self.macro_count);
                            self.pos += 1;
                            self.buffer.extend_from_slice(s.as_bytes());
                            dest_pos += s.len();
                        } else if !alt_syntax {
                            self.buffer.push(b'\\');
                            dest_pos += 1;
                        } else {
                            // unmatched alternate name: copy it verbatim
                            word_skip = sym_name.map(|n| n.len()).unwrap_or(0).max(1);
                            continue;
                        }
                    }
                }
                to_copy_pos = self.pos;
            }
        }
        if self.pos > to_copy_pos {
            self.buffer.extend_from_slice(&content[to_copy_pos..self.pos]);
            dest_pos += self.pos - to_copy_pos;
        }
        let line_size = self.buffer.len();
        if self.pos < content_size {
            if self.cur_col_trans + 1 < macro_col_trans.len() {
                self.cur_col_trans += 1;
                if macro_col_trans[self.cur_col_trans].position >= 0 {
                    self.real_line_pos = 0;
                } else {
                    self.real_line_pos += line_size - dest_line_start + 1;
                }
            }
            self.pos += 1; // skip newline
        }
        self.line_no = macro_col_trans
            .get(self.cur_col_trans.min(macro_col_trans.len().saturating_sub(1)))
            .map(|t| t.line_no)
            .unwrap_or(0);
        self.common.line_no = self.line_no;
        // move to next source translation
        let strans = self.macro_data.source_translations();
        if self.source_trans_index + 1 < strans.len()
            && strans[self.source_trans_index + 1].0 == self.content_line_no
        {
            self.source_trans_index += 1;
            self.common.source = strans[self.source_trans_index].1.clone();
        }
        self.content_line_no += 1;
        if local_stmt_start.is_some() {
            for (name, offset) in local_names {
                let next_no = asm.local_count;
                if !self.add_local(&name, next_no) {
                    let pos = self.common.get_source_pos(offset);
                    asm.print_error_at(
                        &pos,
                        &format!("Name '{}' was already used by local or macro argument", name),
                    );
                } else {
                    asm.local_count += 1;
                }
            }
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        Some(Rc::from(line))
    }
}
