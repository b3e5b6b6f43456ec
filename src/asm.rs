//! The assembler context and driver loop.

pub mod parse;
pub mod symbols;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use crate::config::AsmConfig;
use crate::error::{AsmError, AsmResult};
use crate::expr::{ExprId, Expression};
use crate::filter::{
    ForData, ForFilter, InputFilter, IrpData, IrpFilter, LineCol, MacroData, MacroFilter,
    RepeatData, RepeatFilter, StreamFilter, INCLUDE_DEPTH_LIMIT, MACRO_DEPTH_LIMIT,
};
use crate::format::FormatHandler;
use crate::section::{Kernel, Section};
use crate::source::{Source, SourcePos};
use crate::symbol::{RegVar, Scope, ScopeId, Symbol, SymbolEntry, SymbolId};
use gcn_types::{GpuArchitecture, KernelId, SectionId, ABS_SECTION, GLOBAL_KERNEL, NO_SECTION};

/// Result of a sub-parse that may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Parsed successfully.
    Parsed,
    /// Parsed with errors (already reported).
    Failed,
    /// Construct not present at this position.
    Missing,
}

/// Balanced clause kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    /// `.if` family.
    If,
    /// `.elseif` family.
    ElseIf,
    /// `.else`.
    Else,
    /// `.macro`.
    Macro,
    /// `.rept` / `.irp` / `.for` / `.while`.
    Repeat,
}

/// One open clause.
#[derive(Debug, Clone)]
pub struct Clause {
    /// Kind of the innermost opener.
    pub kind: ClauseKind,
    /// Where the clause (or latest else/elseif) begins.
    pub source_pos: SourcePos,
    /// A branch of this conditional has already been taken.
    pub cond_satisfied: bool,
    /// Position of the original `.if` for else/elseif diagnostics.
    pub prev_if_pos: Option<SourcePos>,
}

/// The assembler: all mutable state of one run.
pub struct Assembler {
    /// Configuration.
    pub config: AsmConfig,
    /// Architecture derived from the configured device.
    pub arch: GpuArchitecture,
    /// Collected diagnostics, in order.
    pub messages: Vec<String>,
    /// No error diagnosed so far.
    pub good: bool,

    // input
    pub(crate) filters: Vec<InputFilter>,
    /// Current logical line.
    pub line: Rc<str>,
    pending_files: Vec<PathBuf>,
    pub(crate) line_already_read: bool,
    pub(crate) end_of_assembly: bool,
    pub(crate) macro_subst_level: usize,
    pub(crate) inclusion_level: usize,

    // output
    /// Sections, indexed by [`SectionId`].
    pub sections: Vec<Section>,
    /// Kernels, indexed by [`KernelId`].
    pub kernels: Vec<Kernel>,
    /// Currently selected section.
    pub current_section: SectionId,
    /// Currently selected kernel.
    pub current_kernel: KernelId,
    /// Output position inside the current section (or absolute org).
    pub current_out_pos: usize,
    /// Format handler.
    pub format_handler: FormatHandler,
    format_initialized: bool,

    // names
    /// Scope arena; index 0 is the global scope.
    pub scopes: Vec<Scope>,
    /// Currently open scope.
    pub current_scope: ScopeId,
    pub(crate) abandoned_scopes: Vec<ScopeId>,
    /// Symbol arena.
    pub symbols: Vec<SymbolEntry>,
    /// Register variable arena.
    pub reg_vars: Vec<RegVar>,
    /// Expression arena.
    pub exprs: Vec<Expression>,
    /// Snapshot symbols awaiting resolution.
    pub symbol_snapshots: HashSet<SymbolId>,
    /// Detached symbol clones preserving occurrences.
    pub symbol_clones: HashSet<SymbolId>,
    pub(crate) uneval_expressions: Vec<ExprId>,
    pub(crate) resolving_relocs: bool,
    pub(crate) do_not_remove_from_clones: bool,
    /// Section differences are laid out.
    pub sect_diffs_prepared: bool,
    /// Per-relocation-space section lists.
    pub rel_spaces_sections: Vec<Vec<SectionId>>,

    // macros and clauses
    pub(crate) macros: HashMap<String, Rc<MacroData>>,
    /// Counter feeding `\@`.
    pub macro_count: u64,
    /// Counter feeding alternate-macro `local` names.
    pub local_count: u64,
    pub(crate) clauses: Vec<Clause>,

    // modal flags mutable by pseudo-ops
    /// Alternate macro mode active.
    pub alternate_macro: bool,
    /// Macro names matched case-insensitively.
    pub macro_case: bool,
    /// Buggy float literal compatibility.
    pub buggy_fp_lit: bool,
    /// Old modifier-parameter syntax.
    pub old_mod_param: bool,
}

impl Assembler {
    /// Assembler over one in-memory source (tests, stdin).
    pub fn from_string(name: impl Into<PathBuf>, text: impl Into<Vec<u8>>, config: AsmConfig) -> Self {
        let source = Rc::new(Source::File { parent: None, path: name.into() });
        let filter = StreamFilter::from_string(text, source);
        Self::with_filter(InputFilter::Stream(filter), Vec::new(), config)
    }

    /// Assembler over a list of input files, read in order.
    pub fn from_files(mut files: Vec<PathBuf>, config: AsmConfig) -> AsmResult<Self> {
        if files.is_empty() {
            return Err(AsmError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no input files",
            )));
        }
        files.reverse();
        let first = files.pop().expect("checked non-empty");
        let reader = std::fs::File::open(&first)?;
        let source = Rc::new(Source::File { parent: None, path: first });
        let filter = StreamFilter::new(Box::new(reader), source);
        Ok(Self::with_filter(InputFilter::Stream(filter), files, config))
    }

    fn with_filter(filter: InputFilter, pending_files: Vec<PathBuf>, config: AsmConfig) -> Self {
        let arch = config.device.architecture();
        let alternate_macro = config.alternate_macro;
        let macro_case = config.macro_no_case;
        let buggy_fp_lit = config.buggy_fp_lit;
        let old_mod_param = config.old_mod_param;
        let format_handler = FormatHandler::new(config.format);
        Assembler {
            config,
            arch,
            messages: Vec::new(),
            good: true,
            filters: vec![filter],
            line: Rc::from(""),
            pending_files,
            line_already_read: false,
            end_of_assembly: false,
            macro_subst_level: 0,
            inclusion_level: 0,
            sections: Vec::new(),
            kernels: Vec::new(),
            current_section: NO_SECTION,
            current_kernel: GLOBAL_KERNEL,
            current_out_pos: 0,
            format_handler,
            format_initialized: false,
            scopes: vec![Scope::default()],
            current_scope: 0,
            abandoned_scopes: Vec::new(),
            symbols: Vec::new(),
            reg_vars: Vec::new(),
            exprs: Vec::new(),
            symbol_snapshots: HashSet::new(),
            symbol_clones: HashSet::new(),
            uneval_expressions: Vec::new(),
            resolving_relocs: false,
            do_not_remove_from_clones: false,
            sect_diffs_prepared: false,
            rel_spaces_sections: Vec::new(),
            macros: HashMap::new(),
            macro_count: 0,
            local_count: 0,
            clauses: Vec::new(),
            alternate_macro,
            macro_case,
            buggy_fp_lit,
            old_mod_param,
        }
    }

    // ---- diagnostics ----

    /// Report an error at a full source position.
    pub fn print_error_at(&mut self, pos: &SourcePos, message: &str) {
        self.good = false;
        let mut out = String::new();
        pos.print(&mut out, 0);
        out.push_str(": Error: ");
        out.push_str(message);
        self.messages.push(out);
    }

    /// Report a warning at a full source position.
    pub fn print_warning_at(&mut self, pos: &SourcePos, message: &str) {
        if !self.config.warnings {
            return;
        }
        let mut out = String::new();
        pos.print(&mut out, 0);
        out.push_str(": Warning: ");
        out.push_str(message);
        self.messages.push(out);
    }

    /// Report an error at a position inside the current line.
    pub fn print_error(&mut self, line_pos: usize, message: &str) {
        let pos = self.get_source_pos(line_pos);
        self.print_error_at(&pos, message);
    }

    /// Report a warning at a position inside the current line.
    pub fn print_warning(&mut self, line_pos: usize, message: &str) {
        let pos = self.get_source_pos(line_pos);
        self.print_warning_at(&pos, message);
    }

    /// Warn when `value` does not fit in `bits` (signed or unsigned
    /// interpretation accepted).
    pub fn print_warning_for_range(&mut self, bits: u32, value: u64, pos: &SourcePos) {
        if bits >= 64 {
            return;
        }
        if (value as i64) < (1i64 << bits) && (value as i64) >= -(1i64 << (bits - 1)) {
            return;
        }
        let truncated = value & ((1u64 << bits) - 1);
        let message = format!("Value 0x{:x} truncated to 0x{:x}", value, truncated);
        self.print_warning_at(pos, &message);
    }

    /// Position of `line_pos` in the current logical line.
    pub fn get_source_pos(&self, line_pos: usize) -> SourcePos {
        match self.filters.last() {
            Some(f) => f.get_source_pos(line_pos),
            None => SourcePos::new(
                Rc::new(Source::File { parent: None, path: PathBuf::new() }),
                0,
                0,
            ),
        }
    }

    /// Translate `line_pos` to a line/column pair.
    pub fn translate_pos(&self, line_pos: usize) -> LineCol {
        match self.filters.last() {
            Some(f) => f.translate_pos(line_pos),
            None => LineCol { line_no: 0, col_no: 0 },
        }
    }

    // ---- input ----

    /// Read the next logical line into `self.line`. False at the end of
    /// all inputs.
    pub fn read_line(&mut self) -> bool {
        loop {
            let mut filter = match self.filters.pop() {
                Some(f) => f,
                None => return false,
            };
            let line = filter.read_line(self);
            match line {
                Some(l) => {
                    self.filters.push(filter);
                    self.line = l;
                    return true;
                }
                None => {
                    // filter exhausted
                    if self.filters.is_empty() {
                        if let Some(next) = self.pending_files.pop() {
                            match std::fs::File::open(&next) {
                                Ok(reader) => {
                                    let source =
                                        Rc::new(Source::File { parent: None, path: next });
                                    self.filters.push(InputFilter::Stream(StreamFilter::new(
                                        Box::new(reader),
                                        source,
                                    )));
                                    continue;
                                }
                                Err(e) => {
                                    self.good = false;
                                    self.messages.push(format!(
                                        "Can't open source file '{}': {}",
                                        next.display(),
                                        e
                                    ));
                                    return false;
                                }
                            }
                        }
                        return false;
                    }
                    match filter {
                        InputFilter::Macro(_) => self.macro_subst_level -= 1,
                        InputFilter::Stream(_) => {
                            self.inclusion_level = self.inclusion_level.saturating_sub(1)
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Open an included file, resolving against the including file's
    /// directory and the `-I` list.
    pub fn include_file(&mut self, pseudo_op_place: usize, filename: &str) -> bool {
        if self.inclusion_level == INCLUDE_DEPTH_LIMIT {
            self.print_error(pseudo_op_place, "Inclusion level is greater than 500");
            return false;
        }
        let path = match self.search_include_path(filename) {
            Some(p) => p,
            None => {
                self.print_error(
                    pseudo_op_place,
                    &format!("Include file '{}' not found or unavailable in any directory", filename),
                );
                return false;
            }
        };
        match std::fs::File::open(&path) {
            Ok(reader) => {
                let include_pos = self.get_source_pos(pseudo_op_place);
                let source = Rc::new(Source::File {
                    parent: Some((
                        include_pos.source.clone(),
                        include_pos.line_no,
                        include_pos.col_no,
                    )),
                    path,
                });
                self.filters.push(InputFilter::Stream(StreamFilter::new(Box::new(reader), source)));
                self.inclusion_level += 1;
                true
            }
            Err(e) => {
                self.print_error(pseudo_op_place, &format!("Can't open include file '{}': {}", filename, e));
                false
            }
        }
    }

    fn search_include_path(&self, filename: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(filename);
        if direct.is_absolute() {
            return direct.exists().then_some(direct);
        }
        // relative to the including file first
        if let Some(InputFilter::Stream(_)) = self.filters.last() {
            if let Source::File { path, .. } = &*self.filters.last().expect("just matched").common().source {
                if let Some(dir) = path.parent() {
                    let cand = dir.join(filename);
                    if cand.exists() {
                        return Some(cand);
                    }
                }
            }
        }
        if direct.exists() {
            return Some(direct);
        }
        for dir in &self.config.include_dirs {
            let cand = dir.join(filename);
            if cand.exists() {
                return Some(cand);
            }
        }
        None
    }

    /// Push a macro filter for an invocation of `name` if a macro of
    /// that name exists.
    pub fn make_macro_substitution(&mut self, line_pos: usize) -> ParseState {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        let mut pos = line_pos;
        let mut name = match crate::parse_utils::extract_sym_name(bytes, &mut pos, false) {
            Some(n) => n,
            None => return ParseState::Missing,
        };
        if self.macro_case {
            name.make_ascii_lowercase();
        }
        let macro_data = match self.macros.get(&name) {
            Some(m) => m.clone(),
            None => return ParseState::Missing,
        };

        let mut good = true;
        let mut arg_map: Vec<(String, String)> = Vec::new();
        let args_num = macro_data.args.len();
        for i in 0..args_num {
            let arg = macro_data.args[i].clone();
            crate::parse_utils::skip_spaces(bytes, &mut pos);
            if pos < bytes.len() && bytes[pos] == b',' && i != 0 {
                crate::parse_utils::skip_char_and_spaces(bytes, &mut pos);
            }
            let arg_place = pos;
            let mut value = String::new();
            if !arg.vararg {
                if !self.parse_macro_arg_value(&mut pos, &mut value) {
                    good = false;
                    continue;
                }
            } else {
                let mut arg_good = true;
                while pos < bytes.len() {
                    if !self.parse_macro_arg_value(&mut pos, &mut value) {
                        arg_good = false;
                        good = false;
                        break;
                    }
                    crate::parse_utils::skip_spaces(bytes, &mut pos);
                    if pos < bytes.len() {
                        if bytes[pos] == b',' {
                            crate::parse_utils::skip_char_and_spaces(bytes, &mut pos);
                            value.push(',');
                        } else {
                            self.print_error(pos, "Garbages at end of line");
                            arg_good = false;
                            good = false;
                            break;
                        }
                    }
                }
                if !arg_good {
                    continue;
                }
            }
            if arg.required && value.is_empty() {
                self.print_error(
                    arg_place,
                    &format!("Value required for macro argument '{}'", arg.name),
                );
                good = false;
            } else if value.is_empty() {
                value = arg.def_value.clone();
            }
            arg_map.push((arg.name.clone(), value));
        }
        crate::parse_utils::skip_spaces(bytes, &mut pos);
        if !good {
            return ParseState::Failed;
        }
        if pos != bytes.len() {
            self.print_error(pos, "Garbages at end of line");
            return ParseState::Failed;
        }
        if self.macro_subst_level == MACRO_DEPTH_LIMIT {
            self.print_error(line_pos, "Macro substitution level is greater than 1000");
            return ParseState::Failed;
        }
        let call_pos = self.get_source_pos(line_pos);
        let filter =
            MacroFilter::new(macro_data, &call_pos, arg_map, self.macro_count, self.alternate_macro);
        self.macro_count += 1;
        self.filters.push(InputFilter::Macro(filter));
        self.macro_subst_level += 1;
        ParseState::Parsed
    }

    /// Push a repeat filter.
    pub fn push_repeat_filter(&mut self, data: Rc<RepeatData>) {
        self.filters.push(InputFilter::Repeat(RepeatFilter::new(data)));
    }

    /// Push an IRP filter.
    pub fn push_irp_filter(&mut self, data: Rc<IrpData>) {
        let alt = self.alternate_macro;
        self.filters.push(InputFilter::Irp(IrpFilter::new(data, alt)));
    }

    /// Push a FOR filter.
    pub fn push_for_filter(&mut self, data: Rc<ForData>) {
        self.filters.push(InputFilter::For(ForFilter::new(data)));
    }

    /// Evaluate the step and condition of a `.for` between iterations.
    /// True to run another pass.
    pub fn for_next_iteration(&mut self, data: &ForData) -> bool {
        if let Some(next_expr) = data.next_expr {
            let evaluable = self.create_expr_to_evaluate(next_expr);
            let ok = match evaluable {
                Some(id) => {
                    let (status, value, section_id) = self.evaluate_expr_id(id);
                    if status == crate::error::TryStatus::Success {
                        if let Some(sym) = data.iter_sym {
                            self.set_symbol(sym, value, section_id)
                        } else {
                            true
                        }
                    } else {
                        false
                    }
                }
                None => false,
            };
            if !ok {
                return false;
            }
        }
        let evaluable = self.create_expr_to_evaluate(data.cond_expr);
        match evaluable {
            Some(id) => {
                let (status, value, section_id) = self.evaluate_expr_id(id);
                if status != crate::error::TryStatus::Success {
                    return false;
                }
                if section_id != ABS_SECTION {
                    let pos = self.exprs[data.cond_expr].source_pos.clone();
                    self.print_error_at(&pos, "Value of conditional expression is not absolute");
                    return false;
                }
                value != 0
            }
            None => false,
        }
    }

    // ---- clauses ----

    /// Open or continue a clause. Returns `(no_error, included)`.
    pub fn push_clause(&mut self, line_pos: usize, kind: ClauseKind, satisfied: bool) -> (bool, bool) {
        match kind {
            ClauseKind::Macro | ClauseKind::If | ClauseKind::Repeat => {
                self.clauses.push(Clause {
                    kind,
                    source_pos: self.get_source_pos(line_pos),
                    cond_satisfied: satisfied,
                    prev_if_pos: None,
                });
                return (true, satisfied);
            }
            _ => {}
        }
        if self.clauses.is_empty() {
            if kind == ClauseKind::ElseIf {
                self.print_error(line_pos, "No '.if' before '.elseif");
            } else {
                self.print_error(line_pos, "No '.if' before '.else'");
            }
            return (false, false);
        }
        let clause = self.clauses.last().expect("checked non-empty").clone();
        match clause.kind {
            ClauseKind::Else => {
                if kind == ClauseKind::ElseIf {
                    self.print_error(line_pos, "'.elseif' after '.else'");
                } else {
                    self.print_error(line_pos, "Duplicate of '.else'");
                }
                let pos = clause.source_pos.clone();
                self.print_error_at(&pos, "here is previous '.else'");
                if let Some(if_pos) = &clause.prev_if_pos {
                    let p = if_pos.clone();
                    self.print_error_at(&p, "here is begin of conditional clause");
                }
                return (false, false);
            }
            ClauseKind::Macro => {
                self.print_error(
                    line_pos,
                    if kind == ClauseKind::ElseIf {
                        "No '.if' before '.elseif' inside macro"
                    } else {
                        "No '.if' before '.else' inside macro"
                    },
                );
                return (false, false);
            }
            ClauseKind::Repeat => {
                self.print_error(
                    line_pos,
                    if kind == ClauseKind::ElseIf {
                        "No '.if' before '.elseif' inside repetition"
                    } else {
                        "No '.if' before '.else' inside repetition"
                    },
                );
                return (false, false);
            }
            _ => {}
        }
        let included = satisfied && !clause.cond_satisfied;
        let new_source_pos = self.get_source_pos(line_pos);
        let top = self.clauses.last_mut().expect("checked non-empty");
        top.cond_satisfied |= included;
        if top.kind == ClauseKind::If {
            top.prev_if_pos = Some(top.source_pos.clone());
        }
        top.kind = kind;
        top.source_pos = new_source_pos;
        (true, included)
    }

    /// Close a clause (`.endif`, `.endm`, `.endr`).
    pub fn pop_clause(&mut self, line_pos: usize, kind: ClauseKind) -> bool {
        let clause = match self.clauses.last() {
            Some(c) => c,
            None => {
                match kind {
                    ClauseKind::If => self.print_error(line_pos, "No conditional before '.endif'"),
                    ClauseKind::Macro => self.print_error(line_pos, "No '.macro' before '.endm'"),
                    _ => self.print_error(line_pos, "No '.rept' before '.endr'"),
                }
                return false;
            }
        };
        let msg = match (clause.kind, kind) {
            (ClauseKind::If | ClauseKind::Else | ClauseKind::ElseIf, ClauseKind::Macro) => {
                Some("Ending macro across conditionals")
            }
            (ClauseKind::If | ClauseKind::Else | ClauseKind::ElseIf, ClauseKind::Repeat) => {
                Some("Ending repetition across conditionals")
            }
            (ClauseKind::Macro, ClauseKind::Repeat) => Some("Ending repetition across macro"),
            (ClauseKind::Macro, ClauseKind::If) => Some("Ending conditional across macro"),
            (ClauseKind::Repeat, ClauseKind::Macro) => Some("Ending macro across repetition"),
            (ClauseKind::Repeat, ClauseKind::If) => Some("Ending conditional across repetition"),
            _ => None,
        };
        if let Some(msg) = msg {
            self.print_error(line_pos, msg);
            return false;
        }
        self.clauses.pop();
        true
    }

    // ---- sections ----

    /// Whether the output format has created its sections already.
    pub fn format_initialized(&self) -> bool {
        self.format_initialized
    }

    /// Make sure the format handler created its initial sections.
    pub fn initialize_output_format(&mut self) {
        if !self.format_initialized {
            self.format_initialized = true;
            FormatHandler::initialize(self);
            if self.current_section != NO_SECTION && self.current_section != ABS_SECTION {
                self.current_out_pos = self.sections[self.current_section as usize].size();
            }
        }
    }

    /// True when the current section occupies addresses.
    pub fn is_addressable_section(&self) -> bool {
        self.current_section == ABS_SECTION
            || (self.current_section != NO_SECTION
                && self.sections[self.current_section as usize]
                    .flags
                    .contains(crate::section::SectionFlags::ADDRESSABLE))
    }

    /// True when bytes can be emitted into the current section.
    pub fn is_writeable_section(&self) -> bool {
        self.current_section != ABS_SECTION
            && self.current_section != NO_SECTION
            && self.sections[self.current_section as usize]
                .flags
                .contains(crate::section::SectionFlags::WRITEABLE)
    }

    /// True when values in `section_id` resolve to known addresses.
    pub fn is_resolvable_section(&self, section_id: SectionId) -> bool {
        section_id == ABS_SECTION
            || (section_id != NO_SECTION
                && !self.sections[section_id as usize]
                    .flags
                    .contains(crate::section::SectionFlags::UNRESOLVABLE))
    }

    /// True when `sym` evaluates to an absolute value.
    pub fn is_absolute_symbol(&self, sym: &Symbol) -> bool {
        if sym.section_id == ABS_SECTION {
            return true;
        }
        if self.sections.is_empty() || sym.section_id == NO_SECTION {
            return false;
        }
        self.sections[sym.section_id as usize]
            .flags
            .contains(crate::section::SectionFlags::ABS_ADDRESSABLE)
    }

    /// Reserve or write `bytes` at the current output position.
    pub fn put_data(&mut self, bytes: &[u8]) {
        let section = &mut self.sections[self.current_section as usize];
        section.content.extend_from_slice(bytes);
        self.current_out_pos = section.size();
    }

    /// Reserve `size` zero bytes, returning the offset of the first.
    pub fn reserve_data(&mut self, size: usize) -> usize {
        let section = &mut self.sections[self.current_section as usize];
        let offset = section.size();
        section.content.resize(offset + size, 0);
        self.current_out_pos = section.size();
        offset
    }

    // ---- expressions ----

    /// Append `expr` to the arena.
    pub fn add_expr(&mut self, expr: Expression) -> ExprId {
        self.exprs.push(expr);
        self.exprs.len() - 1
    }

    /// Evaluate expression `id`, printing its diagnostics.
    pub fn evaluate_expr_id(&mut self, id: ExprId) -> (crate::error::TryStatus, u64, SectionId) {
        let expr = self.exprs[id].clone();
        let mut diags = Vec::new();
        let with_diffs = self.format_handler.with_section_diffs() || self.config.test_resolve;
        let ctx = crate::expr::EvalContext {
            sections: &self.sections,
            rel_spaces_sections: &self.rel_spaces_sections,
            with_section_diffs: with_diffs,
            sect_diffs_prepared: self.sect_diffs_prepared,
        };
        let result = expr.try_evaluate(&ctx, &mut diags);
        for d in diags {
            if d.error {
                self.print_error_at(&d.pos, &d.message);
            } else {
                self.print_warning_at(&d.pos, &d.message);
            }
        }
        result
    }

    // ---- driver ----

    /// Assemble all inputs, run the back-end passes and prepare the
    /// binary. True when no error was diagnosed.
    pub fn assemble(&mut self) -> AsmResult<bool> {
        self.resolving_relocs = false;
        self.do_not_remove_from_clones = false;
        self.sect_diffs_prepared = false;

        // seed command-line symbols
        let def_syms = self.config.def_syms.clone();
        for (name, value) in def_syms {
            if name != "." {
                let id = self.put_symbol_entry(&name, Symbol::with_value(ABS_SECTION, value));
                self.scopes[0].symbols.insert(name, id);
            } else if self.config.warnings {
                self.messages
                    .push("<command-line>: Warning: Definition for symbol '.' was ignored".into());
            }
        }

        self.good = true;
        while !self.end_of_assembly {
            if !self.line_already_read {
                if !self.read_line() {
                    break;
                }
            } else {
                self.line_already_read = false;
            }
            let line = self.line.clone();
            let bytes = line.as_bytes();
            let mut pos = 0usize;
            crate::parse_utils::skip_spaces(bytes, &mut pos);
            if pos == bytes.len() {
                continue;
            }
            let mut stmt_place = pos;
            let mut first_name = crate::parse_utils::extract_label_name(bytes, &mut pos);
            crate::parse_utils::skip_spaces(bytes, &mut pos);

            // labels
            let mut do_next_line = false;
            while let Some(name) = first_name.clone() {
                if name.is_empty()
                    || pos >= bytes.len()
                    || bytes[pos] != b':'
                    || (pos + 1 < bytes.len() && bytes[pos + 1] == b':')
                {
                    break;
                }
                pos += 1;
                crate::parse_utils::skip_spaces(bytes, &mut pos);
                self.initialize_output_format();
                if name.as_bytes()[0].is_ascii_digit() {
                    if !self.define_local_label(&name, stmt_place) {
                        do_next_line = true;
                        break;
                    }
                } else if !self.define_label(&name, stmt_place) {
                    do_next_line = true;
                    break;
                }
                stmt_place = pos;
                first_name = crate::parse_utils::extract_label_name(bytes, &mut pos);
                crate::parse_utils::skip_spaces(bytes, &mut pos);
            }
            if do_next_line {
                continue;
            }

            crate::parse_utils::skip_spaces(bytes, &mut pos);
            let digit_first = first_name
                .as_ref()
                .map(|n| n.as_bytes().first().map(|c| c.is_ascii_digit()).unwrap_or(false))
                .unwrap_or(false);
            if pos < bytes.len() && bytes[pos] == b'=' && !digit_first {
                // assignment
                crate::parse_utils::skip_char_and_spaces(bytes, &mut pos);
                if pos == bytes.len() {
                    self.print_error(pos, "Expected assignment expression");
                    continue;
                }
                let name = first_name.unwrap_or_default();
                self.assign_symbol(&name, stmt_place, &mut pos, true, false);
                continue;
            }
            let mut first_name = first_name.unwrap_or_default();
            first_name.make_ascii_lowercase();

            let old_section = self.current_section;
            let old_out_pos = self.current_out_pos;
            let stmt_source_pos = self.get_source_pos(stmt_place);

            if first_name.len() >= 2 && first_name.starts_with('.') {
                crate::pseudo_ops::dispatch(self, &first_name, stmt_place, pos);
            } else if !first_name.is_empty() && first_name.as_bytes()[0].is_ascii_digit() {
                self.print_error(stmt_place, "Illegal number at statement begin");
            } else {
                // macro substitution, then instruction
                if self.make_macro_substitution(stmt_place) == ParseState::Missing {
                    if first_name.is_empty() {
                        if pos != bytes.len() {
                            self.print_error(stmt_place, "Garbages at statement place");
                        }
                        continue;
                    }
                    self.initialize_output_format();
                    if !self.is_writeable_section() {
                        self.print_error(
                            stmt_place,
                            "Writing data into non-writeable section is illegal",
                        );
                        continue;
                    }
                    crate::isa::assemble_instruction(self, &first_name, stmt_place, pos);
                    self.current_out_pos =
                        self.sections[self.current_section as usize].size();
                }
            }
            // record statement position for emitted bytes
            if old_section == self.current_section
                && self.current_section != ABS_SECTION
                && self.current_section != NO_SECTION
                && old_out_pos != self.current_out_pos
            {
                self.sections[old_section as usize]
                    .source_positions
                    .push_source_pos(old_out_pos, &stmt_source_pos);
            }
        }

        // unterminated clauses
        while let Some(clause) = self.clauses.pop() {
            let pos = clause.source_pos.clone();
            match clause.kind {
                ClauseKind::If => self.print_error_at(&pos, "Unterminated '.if'"),
                ClauseKind::ElseIf => {
                    self.print_error_at(&pos, "Unterminated '.elseif'");
                    if let Some(p) = &clause.prev_if_pos {
                        let p = p.clone();
                        self.print_error_at(&p, "here is begin of conditional clause");
                    }
                }
                ClauseKind::Else => {
                    self.print_error_at(&pos, "Unterminated '.else'");
                    if let Some(p) = &clause.prev_if_pos {
                        let p = p.clone();
                        self.print_error_at(&p, "here is begin of conditional clause");
                    }
                }
                ClauseKind::Macro => self.print_error_at(&pos, "Unterminated macro definition"),
                ClauseKind::Repeat => self.print_error_at(&pos, "Unterminated repetition"),
            }
        }

        if self.format_handler.with_section_diffs() {
            FormatHandler::prepare_section_diffs_resolving(self);
            self.sect_diffs_prepared = true;
        }

        // final resolution passes
        self.resolving_relocs = true;
        self.try_to_resolve_symbols(0);
        let abandoned = self.abandoned_scopes.clone();
        for scope in abandoned {
            self.try_to_resolve_symbols(scope);
        }
        self.do_not_remove_from_clones = true;
        let clones: Vec<SymbolId> = self.symbol_clones.iter().copied().collect();
        for id in clones {
            self.try_to_resolve_symbol(id);
        }
        self.do_not_remove_from_clones = false;

        if self.format_handler.with_section_diffs() {
            self.resolving_relocs = false;
            let unevals = std::mem::take(&mut self.uneval_expressions);
            for expr_id in unevals {
                let (status, value, section_id) = self.evaluate_expr_id(expr_id);
                if status == crate::error::TryStatus::Success {
                    self.resolve_expr_target(expr_id, value, section_id);
                }
            }
            self.resolving_relocs = true;
        }

        self.print_unresolved_symbols(0);

        if self.good {
            // close open kernel code regions
            let text_size = self
                .sections
                .iter()
                .find(|s| s.name == ".text")
                .map(|s| s.content.len())
                .unwrap_or(0);
            for kernel in &mut self.kernels {
                kernel.close_code_region(text_size);
                kernel.prune_empty_regions();
            }
            // back-end passes over code sections
            for section_id in 0..self.sections.len() {
                if self.sections[section_id].has_code() {
                    let ra = crate::regalloc::allocate_registers(self, section_id as SectionId)?;
                    crate::wait::schedule_waits(self, section_id as SectionId, &ra)?;
                }
            }
            FormatHandler::prepare_binary(self);
        }
        Ok(self.good)
    }

    /// Serialized output after a successful [`Assembler::assemble`].
    pub fn write_binary(&self) -> AsmResult<Vec<u8>> {
        if !self.good {
            return Err(AsmError::NotGood);
        }
        Ok(FormatHandler::make_binary(self))
    }

    // label definitions

    fn define_label(&mut self, name: &str, stmt_place: usize) -> bool {
        if name == "." {
            self.print_error(stmt_place, "Symbol '.' can't be a label");
            return false;
        }
        let (sym_id, inserted) = self.insert_symbol_in_scope(name, Symbol::undefined());
        if !inserted
            && self.symbols[sym_id].sym.once_defined
            && self.symbols[sym_id].sym.is_defined()
        {
            self.print_error(stmt_place, &format!("Symbol '{}' is already defined", name));
            return false;
        }
        if self.sections.is_empty() {
            self.print_error(stmt_place, "Label can't be defined outside section");
            return false;
        }
        if !self.is_addressable_section() {
            self.print_error(stmt_place, "Label can't be defined in non-addressable section ");
            return false;
        }
        let out_pos = self.current_out_pos as u64;
        let section = self.current_section;
        self.set_symbol(sym_id, out_pos, section);
        self.symbols[sym_id].sym.once_defined = true;
        self.symbols[sym_id].sym.section_id = section;
        FormatHandler::handle_label(self, name);
        true
    }

    fn define_local_label(&mut self, name: &str, stmt_place: usize) -> bool {
        if self.sections.is_empty() {
            self.print_error(stmt_place, "Local label can't be defined outside section");
            return false;
        }
        if !self.is_addressable_section() {
            self.print_error(stmt_place, "Local label can't be defined in non-addressable section ");
            return false;
        }
        let prev_name = format!("{}b", name);
        let next_name = format!("{}f", name);
        let prev_id = self.global_symbol(&prev_name);
        let next_id = self.global_symbol(&next_name);
        let out_pos = self.current_out_pos as u64;
        let section = self.current_section;
        // resolve the forward form now
        self.set_symbol(next_id, out_pos, section);
        // move the value into the backward form, clear the forward one
        let resolvable = self.is_resolvable_section(section);
        let next_value = self.symbols[next_id].sym.value;
        let prev = &mut self.symbols[prev_id].sym;
        prev.value = next_value;
        prev.has_value = resolvable;
        prev.section_id = section;
        self.symbols[next_id].sym.has_value = false;
        true
    }

    /// Global-scope symbol entry, created undefined on demand.
    pub fn global_symbol(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.scopes[0].symbols.get(name) {
            return id;
        }
        let id = self.put_symbol_entry(name, Symbol::undefined());
        self.scopes[0].symbols.insert(name.to_owned(), id);
        id
    }

    /// Append a symbol entry to the arena (no scope registration).
    pub fn put_symbol_entry(&mut self, name: &str, sym: Symbol) -> SymbolId {
        self.symbols.push(SymbolEntry { name: name.to_owned(), sym });
        self.symbols.len() - 1
    }
}

