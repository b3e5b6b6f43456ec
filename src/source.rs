//! Source provenance tracking.
//!
//! Every logical line the driver reads carries a [`SourcePos`]: the file
//! (or macro/repetition content) it came from, the macro-substitution
//! chain that produced it, and line/column numbers. Positions are shared
//! through `Rc` so that millions of bytes of output can point at a
//! handful of source descriptors.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

use gcn_types::{ColNo, LineNo};

/// Origin of a stream of lines.
#[derive(Debug)]
pub enum Source {
    /// A file (or stdin, when `path` is empty).
    File {
        /// Position of the `.include` that opened this file.
        parent: Option<(Rc<Source>, LineNo, ColNo)>,
        /// Path as given; empty for stdin.
        path: PathBuf,
    },
    /// Body of a macro being replayed.
    Macro {
        /// The substitution that instantiated the macro.
        macro_subst: Rc<MacroSubst>,
        /// Where the macro body itself was defined.
        source: Rc<Source>,
    },
    /// Body of a `.rept`/`.irp`/`.for` being replayed.
    Repeat {
        /// Content origin.
        source: Rc<Source>,
        /// Zero-based iteration.
        repeat_count: u64,
        /// Total iterations, or 0 when open-ended (`.for`, `.while`).
        repeats_num: u64,
    },
}

impl Source {
    /// File display name, with `<stdin>` for the empty path.
    fn file_name(path: &PathBuf) -> &str {
        let s = path.to_str().unwrap_or("");
        if s.is_empty() {
            "<stdin>"
        } else {
            s
        }
    }
}

/// One macro substitution: which source invoked the macro and where.
#[derive(Debug)]
pub struct MacroSubst {
    /// Enclosing substitution for nested macro calls.
    pub parent: Option<Rc<MacroSubst>>,
    /// Source containing the invocation line.
    pub source: Rc<Source>,
    /// Invocation line.
    pub line_no: LineNo,
    /// Invocation column.
    pub col_no: ColNo,
}

/// Full position of a statement or expression operator.
#[derive(Debug, Clone)]
pub struct SourcePos {
    /// Macro-substitution chain, innermost first.
    pub macro_subst: Option<Rc<MacroSubst>>,
    /// Line origin.
    pub source: Rc<Source>,
    /// 1-based line.
    pub line_no: LineNo,
    /// 1-based column; 0 suppresses the column in diagnostics.
    pub col_no: ColNo,
    /// Position of the expression this position was re-evaluated from
    /// (deferred evaluation reports both places).
    pub expr_source_pos: Option<Rc<SourcePos>>,
}

impl SourcePos {
    /// Position without macro or expression context.
    pub fn new(source: Rc<Source>, line_no: LineNo, col_no: ColNo) -> Self {
        SourcePos { macro_subst: None, source, line_no, col_no, expr_source_pos: None }
    }

    /// Render the position tree into `out`, innermost position last,
    /// matching the diagnostic format of the original toolchain.
    pub fn print(&self, out: &mut String, indent_level: u32) {
        if self.line_no == 0 && self.col_no == 0 {
            return;
        }
        if indent_level == 10 {
            print_indent(out, indent_level);
            out.push_str("Can't print all tree trace due to too big depth level\n");
            return;
        }
        // expression re-evaluation chain
        let mut expr_pos = self.expr_source_pos.as_deref();
        let mut expr_first = true;
        while let Some(pos) = expr_pos {
            print_indent(out, indent_level);
            match &*pos.source {
                Source::File { parent: None, path } => {
                    out.push_str(if expr_first {
                        "Expression evaluation from "
                    } else {
                        "                      from "
                    });
                    let _ = write!(out, "{}:{}", Source::file_name(path), pos.line_no);
                    if pos.col_no != 0 {
                        let _ = write!(out, ":{}:", pos.col_no);
                    }
                    out.push('\n');
                    expr_first = false;
                }
                _ => {
                    out.push_str("Expression evaluation from\n");
                    let mut inner = pos.clone();
                    inner.expr_source_pos = None;
                    inner.print(out, indent_level + 1);
                    out.push('\n');
                    expr_first = true;
                }
            }
            expr_pos = pos.expr_source_pos.as_deref();
        }
        // macro substitution chain
        let mut cur_macro = self.macro_subst.clone();
        let mut first_depth = true;
        while let Some(mac) = cur_macro {
            let parent = mac.parent.clone();
            match &*mac.source {
                Source::File { parent: None, path } => {
                    print_indent(out, indent_level);
                    out.push_str(if first_depth {
                        "In macro substituted from "
                    } else {
                        "                     from "
                    });
                    let _ = write!(out, "{}:{}:{}", Source::file_name(path), mac.line_no, mac.col_no);
                    out.push(if parent.is_some() { ';' } else { ':' });
                    out.push('\n');
                    first_depth = false;
                }
                Source::Macro { macro_subst, source } => {
                    print_indent(out, indent_level);
                    out.push_str("In macro substituted from macro content:\n");
                    let inner = SourcePos {
                        macro_subst: Some(macro_subst.clone()),
                        source: source.clone(),
                        line_no: mac.line_no,
                        col_no: mac.col_no,
                        expr_source_pos: None,
                    };
                    inner.print(out, indent_level + 1);
                    out.push_str(if parent.is_some() { ";\n" } else { ":\n" });
                    first_depth = true;
                }
                _ => {
                    if first_depth {
                        print_indent(out, indent_level);
                        out.push_str("In macro substituted from\n");
                    }
                    let inner = SourcePos {
                        macro_subst: None,
                        source: mac.source.clone(),
                        line_no: mac.line_no,
                        col_no: mac.col_no,
                        expr_source_pos: None,
                    };
                    inner.print(out, indent_level + 1);
                    out.push_str(if parent.is_some() { ";\n" } else { ":\n" });
                    first_depth = true;
                }
            }
            cur_macro = parent;
        }
        // source tree: unwrap repetitions first
        let mut cur_source = self.source.clone();
        cur_source = print_repeats(out, cur_source, indent_level);
        match &*cur_source {
            Source::File { parent, path } => {
                if parent.is_some() {
                    let mut cur = cur_source.clone();
                    let mut first = true;
                    loop {
                        let (psrc, pline, pcol) = match &*cur {
                            Source::File { parent: Some((p, l, c)), .. } => (p.clone(), *l, *c),
                            _ => break,
                        };
                        let psrc = print_repeats(out, psrc, indent_level);
                        print_indent(out, indent_level);
                        let next = match &*psrc {
                            Source::File { parent: pparent, path: ppath } => {
                                out.push_str(if first {
                                    "In file included from "
                                } else {
                                    "                 from "
                                });
                                let _ = write!(out, "{}:{}:{}", Source::file_name(ppath), pline, pcol);
                                out.push(if pparent.is_some() { ',' } else { ':' });
                                out.push('\n');
                                first = false;
                                Some(psrc.clone())
                            }
                            Source::Macro { macro_subst, source } => {
                                out.push_str("In file included from macro content:\n");
                                let inner = SourcePos {
                                    macro_subst: Some(macro_subst.clone()),
                                    source: source.clone(),
                                    line_no: pline,
                                    col_no: pcol,
                                    expr_source_pos: None,
                                };
                                inner.print(out, indent_level + 1);
                                out.push_str(":\n");
                                None
                            }
                            Source::Repeat { .. } => None,
                        };
                        match next {
                            Some(n) => cur = n,
                            None => break,
                        }
                    }
                }
                print_indent(out, indent_level);
                let _ = write!(out, "{}:{}", Source::file_name(path), self.line_no);
                if self.col_no != 0 {
                    let _ = write!(out, ":{}", self.col_no);
                }
            }
            Source::Macro { macro_subst, source } => {
                print_indent(out, indent_level);
                out.push_str("In macro content:\n");
                let inner = SourcePos {
                    macro_subst: Some(macro_subst.clone()),
                    source: source.clone(),
                    line_no: self.line_no,
                    col_no: self.col_no,
                    expr_source_pos: None,
                };
                inner.print(out, indent_level + 1);
            }
            Source::Repeat { .. } => {}
        }
    }
}

fn print_indent(out: &mut String, indent_level: u32) {
    for _ in 0..indent_level {
        out.push_str("    ");
    }
}

fn print_repeats(out: &mut String, mut source: Rc<Source>, indent_level: u32) -> Rc<Source> {
    let mut first_depth = true;
    loop {
        let next = match &*source {
            Source::Repeat { source: inner, repeat_count, repeats_num } => {
                print_indent(out, indent_level);
                out.push_str(if first_depth { "In repetition " } else { "              " });
                if *repeats_num != 0 {
                    let _ = write!(out, "{}/{}:", repeat_count + 1, repeats_num);
                } else {
                    let _ = write!(out, "{}/?:", repeat_count + 1);
                }
                out.push('\n');
                inner.clone()
            }
            _ => break,
        };
        source = next;
        first_depth = false;
    }
    source
}

/// Compact per-section store of `(offset, SourcePos)` pairs.
///
/// Entries arrive in increasing offset order. Consecutive entries almost
/// always share their source, macro chain and the high bits of their
/// numbers, so a chunk stores those once and items keep only the low 16
/// bits of offset, line and column.
#[derive(Debug, Default)]
pub struct SourcePosHandler {
    chunks: Vec<Chunk>,
}

#[derive(Debug)]
struct Chunk {
    offset_first: usize,
    source: Rc<Source>,
    macro_subst: Option<Rc<MacroSubst>>,
    line_no_high: LineNo,
    col_no_high: ColNo,
    items: Vec<Item>,
}

#[derive(Debug, Clone, Copy)]
struct Item {
    offset_lo: u16,
    line_no_lo: u16,
    col_no_lo: u16,
}

/// Cursor over a [`SourcePosHandler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PosReadPos {
    chunk_pos: usize,
    item_pos: usize,
}

impl SourcePosHandler {
    /// Record the position of the statement that produced the bytes at
    /// `offset`.
    pub fn push_source_pos(&mut self, offset: usize, pos: &SourcePos) {
        let line_high = pos.line_no & !0xffff;
        let col_high = pos.col_no & !0xffff;
        let need_new = match self.chunks.last() {
            None => true,
            Some(last) => {
                (last.offset_first & !0xffff) != (offset & !0xffff)
                    || !Rc::ptr_eq(&last.source, &pos.source)
                    || !same_macro(&last.macro_subst, &pos.macro_subst)
                    || last.line_no_high != line_high
                    || last.col_no_high != col_high
            }
        };
        if need_new {
            self.chunks.push(Chunk {
                offset_first: offset,
                source: pos.source.clone(),
                macro_subst: pos.macro_subst.clone(),
                line_no_high: line_high,
                col_no_high: col_high,
                items: Vec::new(),
            });
        }
        self.chunks.last_mut().expect("chunk just ensured").items.push(Item {
            offset_lo: (offset & 0xffff) as u16,
            line_no_lo: (pos.line_no & 0xffff) as u16,
            col_no_lo: (pos.col_no & 0xffff) as u16,
        });
    }

    /// Whether `rpos` has another entry.
    pub fn has_next(&self, rpos: PosReadPos) -> bool {
        rpos.chunk_pos < self.chunks.len()
            && (rpos.item_pos < self.chunks[rpos.chunk_pos].items.len()
                || rpos.chunk_pos + 1 < self.chunks.len())
    }

    /// Read the entry at `rpos`, advancing it.
    pub fn next_source_pos(&self, rpos: &mut PosReadPos) -> (usize, SourcePos) {
        let chunk = &self.chunks[rpos.chunk_pos];
        let item = chunk.items[rpos.item_pos];
        rpos.item_pos += 1;
        if rpos.item_pos >= chunk.items.len() {
            rpos.item_pos = 0;
            rpos.chunk_pos += 1;
        }
        (
            (chunk.offset_first & !0xffff) | usize::from(item.offset_lo),
            SourcePos {
                macro_subst: chunk.macro_subst.clone(),
                source: chunk.source.clone(),
                line_no: chunk.line_no_high | LineNo::from(item.line_no_lo),
                col_no: chunk.col_no_high | ColNo::from(item.col_no_lo),
                expr_source_pos: None,
            },
        )
    }

    /// Cursor to the first entry at or after `offset`.
    pub fn find_position_by_offset(&self, offset: usize) -> PosReadPos {
        if self.chunks.is_empty() {
            return PosReadPos::default();
        }
        let mut chunk_pos = self.chunks.partition_point(|c| c.offset_first < offset);
        if chunk_pos == self.chunks.len() || (chunk_pos != 0 && self.chunks[chunk_pos].offset_first != offset) {
            chunk_pos -= 1;
        }
        let mut item_pos = 0;
        if self.chunks[chunk_pos].offset_first != offset {
            let items = &self.chunks[chunk_pos].items;
            let lo = (offset & 0xffff) as u16;
            item_pos = items.partition_point(|i| i.offset_lo < lo);
            if item_pos >= items.len() {
                chunk_pos += 1;
                item_pos = 0;
            }
        }
        PosReadPos { chunk_pos, item_pos }
    }
}

fn same_macro(a: &Option<Rc<MacroSubst>>, b: &Option<Rc<MacroSubst>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_source(name: &str) -> Rc<Source> {
        Rc::new(Source::File { parent: None, path: PathBuf::from(name) })
    }

    #[test]
    fn plain_file_position_prints_file_line_col() {
        let pos = SourcePos::new(file_source("kernel.s"), 12, 7);
        let mut out = String::new();
        pos.print(&mut out, 0);
        assert_eq!(out, "kernel.s:12:7");
    }

    #[test]
    fn repetition_positions_print_iteration_counts() {
        let inner = file_source("a.s");
        let rept = Rc::new(Source::Repeat { source: inner, repeat_count: 1, repeats_num: 3 });
        let pos = SourcePos::new(rept, 2, 5);
        let mut out = String::new();
        pos.print(&mut out, 0);
        assert!(out.starts_with("In repetition 2/3:\n"), "{out:?}");
        assert!(out.ends_with("a.s:2:5"), "{out:?}");
    }

    #[test]
    fn pos_handler_round_trips_offsets() {
        let src = file_source("x.s");
        let mut handler = SourcePosHandler::default();
        for i in 0..100usize {
            handler.push_source_pos(i * 4, &SourcePos::new(src.clone(), i as LineNo + 1, 1));
        }
        let mut rpos = handler.find_position_by_offset(200);
        let (off, pos) = handler.next_source_pos(&mut rpos);
        assert_eq!(off, 200);
        assert_eq!(pos.line_no, 51);
    }

    #[test]
    fn chunks_split_on_source_change() {
        let mut handler = SourcePosHandler::default();
        handler.push_source_pos(0, &SourcePos::new(file_source("a.s"), 1, 1));
        handler.push_source_pos(4, &SourcePos::new(file_source("b.s"), 1, 1));
        let mut rpos = PosReadPos::default();
        assert!(handler.has_next(rpos));
        let (_, p0) = handler.next_source_pos(&mut rpos);
        let (_, p1) = handler.next_source_pos(&mut rpos);
        assert!(!Rc::ptr_eq(&p0.source, &p1.source));
    }
}
