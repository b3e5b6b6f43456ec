//! Layered input filters.
//!
//! The driver reads logical lines from the top of a filter stack. A
//! stream filter reads a file and performs tokenization-neutral cleanup;
//! macro, repeat, IRP and FOR filters replay pre-recorded content with
//! substitutions. Every filter publishes a column-translation table that
//! maps positions in the logical line back to source line numbers, so
//! diagnostics can point through continuations and substitutions.

mod macros;
mod repeat;
mod stream;

pub use macros::{MacroArg, MacroData, MacroFilter};
pub use repeat::{ForData, ForFilter, IrpData, IrpFilter, RepeatData, RepeatFilter};
pub use stream::StreamFilter;

use std::rc::Rc;

use crate::asm::Assembler;
use crate::source::{MacroSubst, Source, SourcePos};
use gcn_types::{ColNo, LineNo};

/// Maximum `.include` nesting.
pub const INCLUDE_DEPTH_LIMIT: usize = 500;
/// Maximum macro substitution nesting.
pub const MACRO_DEPTH_LIMIT: usize = 1000;

/// One column-translation entry: positions at or after `position` in the
/// logical line belong to source line `line_no`.
///
/// `position` is negative when a statement was split out of a longer
/// physical line (`;`): the offset into the physical line is carried so
/// columns keep counting from the real line start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTrans {
    /// Logical-line position this entry starts at (may be negative).
    pub position: isize,
    /// Source line number.
    pub line_no: LineNo,
}

/// Translated `(line, column)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    /// 1-based source line.
    pub line_no: LineNo,
    /// 1-based column.
    pub col_no: ColNo,
}

/// Translate `position` in the logical line through `col_translations`.
pub fn translate_pos_in(col_translations: &[LineTrans], position: usize) -> LineCol {
    let idx = col_translations.partition_point(|t| t.position <= position as isize);
    let t = &col_translations[idx.saturating_sub(1)];
    LineCol { line_no: t.line_no, col_no: (position as isize - t.position + 1) as ColNo }
}

/// State shared by every filter kind.
#[derive(Debug)]
pub struct FilterCommon {
    /// Column-translation table of the last returned line.
    pub col_translations: Vec<LineTrans>,
    /// Line number of the last returned line.
    pub line_no: LineNo,
    /// Origin reported in source positions.
    pub source: Rc<Source>,
    /// Macro substitution chain, if any.
    pub macro_subst: Option<Rc<MacroSubst>>,
}

impl FilterCommon {
    /// Full source position of `pos` within the last returned line.
    pub fn get_source_pos(&self, pos: usize) -> SourcePos {
        let lc = translate_pos_in(&self.col_translations, pos);
        SourcePos {
            macro_subst: self.macro_subst.clone(),
            source: self.source.clone(),
            line_no: lc.line_no,
            col_no: lc.col_no,
            expr_source_pos: None,
        }
    }
}

/// The filter stack element.
#[derive(Debug)]
pub enum InputFilter {
    /// File/stdin reader.
    Stream(StreamFilter),
    /// Macro body replay.
    Macro(MacroFilter),
    /// `.rept` body replay.
    Repeat(RepeatFilter),
    /// `.irp`/`.irpc` body replay.
    Irp(IrpFilter),
    /// `.for`/`.while` body replay.
    For(ForFilter),
}

impl InputFilter {
    /// Read the next logical line, or `None` at end of this filter's
    /// input. The filter is detached from the assembler while reading,
    /// so implementations may call back into it for diagnostics and
    /// (for `.for`) expression evaluation.
    pub fn read_line(&mut self, asm: &mut Assembler) -> Option<Rc<str>> {
        match self {
            InputFilter::Stream(f) => f.read_line(asm),
            InputFilter::Macro(f) => f.read_line(asm),
            InputFilter::Repeat(f) => f.read_line(asm),
            InputFilter::Irp(f) => f.read_line(asm),
            InputFilter::For(f) => f.read_line(asm),
        }
    }

    /// Shared filter state.
    pub fn common(&self) -> &FilterCommon {
        match self {
            InputFilter::Stream(f) => &f.common,
            InputFilter::Macro(f) => &f.common,
            InputFilter::Repeat(f) => &f.common,
            InputFilter::Irp(f) => f.common(),
            InputFilter::For(f) => f.common(),
        }
    }

    /// Translate a position in the current logical line.
    pub fn translate_pos(&self, pos: usize) -> LineCol {
        translate_pos_in(&self.common().col_translations, pos)
    }

    /// Source position of `pos` in the current logical line.
    pub fn get_source_pos(&self, pos: usize) -> SourcePos {
        self.common().get_source_pos(pos)
    }

    /// True for macro-substitution filters (depth accounting).
    pub fn is_macro_subst(&self) -> bool {
        matches!(self, InputFilter::Macro(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_pos_uses_last_entry_at_or_before() {
        let trans =
            vec![LineTrans { position: 0, line_no: 1 }, LineTrans { position: 10, line_no: 2 }];
        assert_eq!(translate_pos_in(&trans, 0), LineCol { line_no: 1, col_no: 1 });
        assert_eq!(translate_pos_in(&trans, 9), LineCol { line_no: 1, col_no: 10 });
        assert_eq!(translate_pos_in(&trans, 10), LineCol { line_no: 2, col_no: 1 });
    }

    #[test]
    fn negative_positions_continue_statement_columns() {
        // statement split at ';' after 8 chars of the physical line
        let trans = vec![LineTrans { position: -8, line_no: 3 }];
        assert_eq!(translate_pos_in(&trans, 0), LineCol { line_no: 3, col_no: 9 });
    }
}
