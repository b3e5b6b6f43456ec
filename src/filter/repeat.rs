//! Repetition filters: `.rept`, `.irp`/`.irpc` and `.for`/`.while`.

use std::rc::Rc;

use super::{FilterCommon, LineTrans};
use crate::asm::Assembler;
use crate::expr::ExprId;
use crate::parse_utils::{extract_sym_name, is_sym_start};
use crate::source::{MacroSubst, Source, SourcePos};
use crate::symbol::SymbolId;

/// Recorded body of a repetition clause.
#[derive(Debug)]
pub struct RepeatData {
    /// Where the clause opened.
    pub source_pos: SourcePos,
    /// Number of iterations; 0 for open-ended (`.for`, `.while`).
    pub repeats_num: u64,
    content: Vec<u8>,
    col_translations: Vec<LineTrans>,
    source_translations: Vec<(u64, Option<Rc<MacroSubst>>, Rc<Source>)>,
    content_line_no: u64,
}

impl RepeatData {
    /// Empty body repeating `repeats_num` times.
    pub fn new(source_pos: SourcePos, repeats_num: u64) -> Self {
        RepeatData {
            source_pos,
            repeats_num,
            content: Vec::new(),
            col_translations: Vec::new(),
            source_translations: Vec::new(),
            content_line_no: 0,
        }
    }

    /// Append one recorded line (between `.rept` and `.endr`).
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
        let differs = match self.source_translations.last() {
            None => true,
            Some((_, lm, ls)) => {
                !Rc::ptr_eq(ls, &source)
                    || match (lm, &macro_subst) {
                        (None, None) => false,
                        (Some(a), Some(b)) => !Rc::ptr_eq(a, b),
                        _ => true,
                    }
            }
        };
        if differs {
            self.source_translations.push((self.content_line_no, macro_subst, source));
        }
        self.content_line_no += 1;
    }

    fn first_source(&self) -> Option<&(u64, Option<Rc<MacroSubst>>, Rc<Source>)> {
        self.source_translations.first()
    }
}

/// Replays a `.rept` body `repeats_num` times.
#[derive(Debug)]
pub struct RepeatFilter {
    /// Shared filter state.
    pub common: FilterCommon,
    data: Rc<RepeatData>,
    repeat_count: u64,
    content_line_no: u64,
    source_trans_index: usize,
    pos: usize,
    cur_col_trans: usize,
}

fn repeat_source(data: &RepeatData, repeat_count: u64) -> Rc<Source> {
    let inner = data
        .first_source()
        .map(|(_, _, s)| s.clone())
        .unwrap_or_else(|| Rc::new(Source::File { parent: None, path: Default::default() }));
    Rc::new(Source::Repeat { source: inner, repeat_count, repeats_num: data.repeats_num })
}

impl RepeatFilter {
    /// Filter over a recorded body.
    pub fn new(data: Rc<RepeatData>) -> Self {
        let source = repeat_source(&data, 0);
        let macro_subst = data.first_source().and_then(|(_, m, _)| m.clone());
        let line_no = data.col_translations.first().map(|t| t.line_no).unwrap_or(0);
        RepeatFilter {
            common: FilterCommon { col_translations: Vec::new(), line_no, source, macro_subst },
            data,
            repeat_count: 0,
            content_line_no: 0,
            source_trans_index: 0,
            pos: 0,
            cur_col_trans: 0,
        }
    }

    /// Current iteration (0-based).
    pub fn repeat_count(&self) -> u64 {
        self.repeat_count
    }

    fn rewind(&mut self) {
        self.source_trans_index = 0;
        self.cur_col_trans = 0;
        self.pos = 0;
        self.content_line_no = 0;
        self.common.source = repeat_source(&self.data, self.repeat_count);
    }

    fn serve_line(&mut self) -> Rc<str> {
        let content = &self.data.content;
        let old_pos = self.pos;
        while self.pos < content.len() && content[self.pos] != b'\n' {
            self.pos += 1;
        }
        let line = String::from_utf8_lossy(&content[old_pos..self.pos]).into_owned();
        if self.pos < content.len() {
            self.pos += 1; // newline
        }
        // collect this line's column translations
        let trans = &self.data.col_translations;
        let old_ct = self.cur_col_trans;
        self.cur_col_trans += 1;
        while self.cur_col_trans < trans.len() && trans[self.cur_col_trans].position > 0 {
            self.cur_col_trans += 1;
        }
        self.common.col_translations.clear();
        self.common.col_translations.extend_from_slice(&trans[old_ct..self.cur_col_trans]);
        self.common.line_no = if self.cur_col_trans < trans.len() {
            trans[self.cur_col_trans].line_no
        } else {
            trans.first().map(|t| t.line_no).unwrap_or(0)
        };
        let strans = &self.data.source_translations;
        if self.source_trans_index + 1 < strans.len()
            && strans[self.source_trans_index + 1].0 == self.content_line_no
        {
            self.source_trans_index += 1;
            let (_, mac, src) = &strans[self.source_trans_index];
            self.common.macro_subst = mac.clone();
            self.common.source = Rc::new(Source::Repeat {
                source: src.clone(),
                repeat_count: self.repeat_count,
                repeats_num: self.data.repeats_num,
            });
        }
        self.content_line_no += 1;
        Rc::from(line)
    }

    pub(crate) fn read_line(&mut self, _asm: &mut Assembler) -> Option<Rc<str>> {
        if self.pos == self.data.content.len() {
            self.repeat_count += 1;
            if self.repeat_count == self.data.repeats_num || self.data.content.is_empty() {
                return None;
            }
            self.rewind();
        }
        Some(self.serve_line())
    }
}

/// `.for`/`.while` loop description: a repeat body plus the iteration
/// symbol and the condition/step expressions re-evaluated per pass.
#[derive(Debug)]
pub struct ForData {
    /// Recorded body (with `repeats_num == 0`).
    pub repeat: RepeatData,
    /// Symbol stepped by `next_expr` (`None` for `.while`).
    pub iter_sym: Option<SymbolId>,
    /// Loop continues while this evaluates non-zero.
    pub cond_expr: ExprId,
    /// Step expression evaluated between iterations.
    pub next_expr: Option<ExprId>,
}

/// Replays a `.for` body until its condition turns zero.
#[derive(Debug)]
pub struct ForFilter {
    /// Underlying repeat machinery.
    inner: RepeatFilter,
    data: Rc<ForData>,
}

impl ForFilter {
    /// Filter over a recorded loop body.
    pub fn new(data: Rc<ForData>) -> Self {
        // share the content through ForData; RepeatFilter only needs the
        // repeat part, rebuilt as an Rc view
        let repeat = Rc::new(RepeatData {
            source_pos: data.repeat.source_pos.clone(),
            repeats_num: 0,
            content: data.repeat.content.clone(),
            col_translations: data.repeat.col_translations.clone(),
            source_translations: data.repeat.source_translations.clone(),
            content_line_no: data.repeat.content_line_no,
        });
        ForFilter { inner: RepeatFilter::new(repeat), data }
    }

    /// Shared filter state.
    pub fn common(&self) -> &FilterCommon {
        &self.inner.common
    }

    /// Shared filter state, mutably.
    pub fn common_mut(&mut self) -> &mut FilterCommon {
        &mut self.inner.common
    }

    pub(crate) fn read_line(&mut self, asm: &mut Assembler) -> Option<Rc<str>> {
        if self.inner.pos == self.inner.data.content.len() {
            self.inner.repeat_count += 1;
            if !asm.for_next_iteration(&self.data) || self.inner.data.content.is_empty() {
                return None;
            }
            self.inner.rewind();
        }
        Some(self.inner.serve_line())
    }
}

/// `.irp`/`.irpc` description: body plus the substituted symbol values.
#[derive(Debug)]
pub struct IrpData {
    /// Recorded body; `repeats_num` equals the value count.
    pub repeat: RepeatData,
    /// Substituted symbol name.
    pub symbol: String,
    /// Per-iteration values (one string split per character for `irpc`).
    pub values: Vec<String>,
    /// Character mode (`.irpc`).
    pub irpc: bool,
}

impl IrpData {
    /// Value substituted during iteration `count`.
    fn value_at(&self, count: u64) -> String {
        if self.irpc {
            let s = self.values.first().map(String::as_str).unwrap_or("");
            s.chars().nth(count as usize).map(|c| c.to_string()).unwrap_or_default()
        } else {
            self.values.get(count as usize).cloned().unwrap_or_default()
        }
    }
}

/// Replays an `.irp` body once per value, substituting `\sym`.
#[derive(Debug)]
pub struct IrpFilter {
    inner: RepeatFilter,
    data: Rc<IrpData>,
    alternate_macro: bool,
}

impl IrpFilter {
    /// Filter over a recorded body.
    pub fn new(data: Rc<IrpData>, alternate_macro: bool) -> Self {
        let repeat = Rc::new(RepeatData {
            source_pos: data.repeat.source_pos.clone(),
            repeats_num: data.repeat.repeats_num,
            content: data.repeat.content.clone(),
            col_translations: data.repeat.col_translations.clone(),
            source_translations: data.repeat.source_translations.clone(),
            content_line_no: data.repeat.content_line_no,
        });
        IrpFilter { inner: RepeatFilter::new(repeat), data, alternate_macro }
    }

    /// Shared filter state.
    pub fn common(&self) -> &FilterCommon {
        &self.inner.common
    }

    pub(crate) fn read_line(&mut self, asm: &mut Assembler) -> Option<Rc<str>> {
        let raw = self.inner.read_line(asm)?;
        // substitute \sym (and bare sym in alternate-macro mode) with the
        // current iteration's value
        let value = self.data.value_at(self.inner.repeat_count());
        let bytes = raw.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut shift: isize = 0;
        let mut extra_trans: Vec<(usize, isize)> = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                if bytes[i + 1] == b'(' && i + 2 < bytes.len() && bytes[i + 2] == b')' {
                    i += 3; // \() separator
                    extra_trans.push((out.len(), shift));
                    shift -= 3;
                    continue;
                }
                let mut p = i + 1;
                if let Some(name) = extract_sym_name(bytes, &mut p, false) {
                    if name == self.data.symbol {
                        out.extend_from_slice(value.as_bytes());
                        shift += value.len() as isize - (p - i) as isize;
                        extra_trans.push((out.len(), shift));
                        i = p;
                        continue;
                    }
                }
                out.push(bytes[i]);
                i += 1;
            } else if self.alternate_macro && is_sym_start(bytes[i]) {
                let mut p = i;
                let name = extract_sym_name(bytes, &mut p, false);
                match name {
                    Some(n) if n == self.data.symbol => {
                        out.extend_from_slice(value.as_bytes());
                        shift += value.len() as isize - (p - i) as isize;
                        extra_trans.push((out.len(), shift));
                        i = p;
                    }
                    _ => {
                        out.extend_from_slice(&bytes[i..p.max(i + 1)]);
                        i = p.max(i + 1);
                    }
                }
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        // shift column translations that fall after substitutions
        if !extra_trans.is_empty() {
            let trans = &mut self.inner.common.col_translations;
            for t in trans.iter_mut() {
                let mut total = 0isize;
                for (dst, sh) in &extra_trans {
                    if t.position >= (*dst as isize) - sh {
                        total = *sh;
                    }
                }
                t.position += total;
            }
        }
        Some(Rc::from(String::from_utf8_lossy(&out).into_owned()))
    }
}
