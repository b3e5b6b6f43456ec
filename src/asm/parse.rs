//! Literal, string and symbol parsing plus scope lookup.

use std::collections::HashSet;

use super::{Assembler, ParseState};
use crate::parse_utils::{
    extract_scoped_sym_name, is_space, skip_spaces, token_char_class,
};
use crate::symbol::{ScopeId, Symbol, SymbolId};
use gcn_types::{SectionId, ABS_SECTION};

impl Assembler {
    /// Parse a quoted string with C-style escapes at `pos`.
    pub fn parse_string(&mut self, pos: &mut usize) -> Option<String> {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() || bytes[*pos] != b'"' {
            self.print_error(*pos, "Expected string");
            return None;
        }
        *pos += 1;
        let mut out = String::new();
        while *pos < bytes.len() && bytes[*pos] != b'"' {
            if bytes[*pos] == b'\\' {
                *pos += 1;
                match self.parse_escape(bytes, pos) {
                    Some(c) => out.push(c as char),
                    None => return None,
                }
            } else {
                out.push(bytes[*pos] as char);
                *pos += 1;
            }
        }
        if *pos >= bytes.len() {
            self.print_error(*pos, "Missing terminating '\"' character");
            return None;
        }
        *pos += 1;
        Some(out)
    }

    /// One character after a backslash (C escapes, octal, hex).
    fn parse_escape(&mut self, bytes: &[u8], pos: &mut usize) -> Option<u8> {
        if *pos >= bytes.len() {
            self.print_error(*pos, "Terminated character of string");
            return None;
        }
        let c = bytes[*pos];
        *pos += 1;
        Some(match c {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'x' => {
                // hex escape
                let mut value: u32 = 0;
                let mut digits = 0;
                while *pos < bytes.len() && bytes[*pos].is_ascii_hexdigit() {
                    value = (value << 4)
                        | u32::from((bytes[*pos] as char).to_digit(16).expect("hex digit"));
                    *pos += 1;
                    digits += 1;
                }
                if digits == 0 {
                    self.print_error(*pos, "Expected hexadecimal character code");
                    return None;
                }
                (value & 0xff) as u8
            }
            b'0'..=b'7' => {
                // octal escape, up to 3 digits
                let mut value: u32 = u32::from(c - b'0');
                let mut digits = 1;
                while *pos < bytes.len() && digits < 3 && (b'0'..=b'7').contains(&bytes[*pos]) {
                    value = (value << 3) | u32::from(bytes[*pos] - b'0');
                    *pos += 1;
                    digits += 1;
                }
                if value > 255 {
                    self.print_error(*pos, "Octal code out of range");
                    return None;
                }
                value as u8
            }
            other => other,
        })
    }

    /// Parse an integer or character literal, reporting failures.
    pub fn parse_literal(&mut self, pos: &mut usize) -> Option<u64> {
        self.parse_literal_inner(pos, true)
    }

    /// Parse a literal without reporting any diagnostic.
    pub fn parse_literal_no_error(&mut self, pos: &mut usize) -> Option<u64> {
        self.parse_literal_inner(pos, false)
    }

    fn parse_literal_inner(&mut self, pos: &mut usize, report: bool) -> Option<u64> {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        if *pos < bytes.len() && bytes[*pos] == b'\'' {
            // character literal
            *pos += 1;
            let value = if *pos < bytes.len() && bytes[*pos] == b'\\' {
                *pos += 1;
                self.parse_escape(bytes, pos)? as u64
            } else if *pos < bytes.len() {
                let v = bytes[*pos] as u64;
                *pos += 1;
                v
            } else {
                if report {
                    self.print_error(*pos, "Terminated character literal");
                }
                return None;
            };
            if *pos >= bytes.len() || bytes[*pos] != b'\'' {
                if report {
                    self.print_error(*pos, "Missing terminating '\'' character");
                }
                return None;
            }
            *pos += 1;
            return Some(value);
        }
        let start = *pos;
        let (radix, digits_start) = if bytes[*pos..].starts_with(b"0x") || bytes[*pos..].starts_with(b"0X") {
            (16, *pos + 2)
        } else if bytes[*pos..].starts_with(b"0b") || bytes[*pos..].starts_with(b"0B") {
            (2, *pos + 2)
        } else if *pos < bytes.len() && bytes[*pos] == b'0' {
            (8, *pos)
        } else {
            (10, *pos)
        };
        let mut p = digits_start;
        let mut value: u64 = 0;
        let mut any = false;
        let mut out_of_range = false;
        while p < bytes.len() {
            let d = match (bytes[p] as char).to_digit(radix) {
                Some(d) => d,
                None => break,
            };
            any = true;
            let (v, o1) = value.overflowing_mul(u64::from(radix));
            let (v, o2) = v.overflowing_add(u64::from(d));
            out_of_range |= o1 || o2;
            value = v;
            p += 1;
        }
        if !any {
            if report {
                self.print_error(start, "Missing number");
            }
            return None;
        }
        *pos = p;
        if out_of_range && report {
            self.print_warning(start, "Integer constant is too big (truncated)");
        }
        Some(value)
    }

    /// Parse a symbol reference in an expression or operand.
    ///
    /// Advances `pos` past the name unless nothing symbol-like is
    /// present. `dont_create` suppresses creating a forward-reference
    /// placeholder (used when probing).
    pub fn parse_symbol(
        &mut self,
        pos: &mut usize,
        dont_create: bool,
    ) -> (ParseState, Option<SymbolId>) {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        let start = *pos;
        let name = match extract_scoped_sym_name(bytes, pos, true) {
            Some(n) if !n.is_empty() => n,
            _ => return (ParseState::Missing, None),
        };
        if name == "." {
            // output counter
            self.initialize_output_format();
            if self.sections.is_empty() {
                self.print_error(start, "Symbol '.' requires output section");
                return (ParseState::Failed, None);
            }
            let id = self.global_symbol(".");
            let out_pos = self.current_out_pos as u64;
            let section = self.current_section;
            let addressable = self.is_addressable_section();
            let sym = &mut self.symbols[id].sym;
            sym.value = out_pos;
            sym.section_id = section;
            sym.has_value = addressable;
            return (ParseState::Parsed, Some(id));
        }
        let name_bytes = name.as_bytes();
        let local_ref = name_bytes[0].is_ascii_digit();
        if local_ref {
            // local label reference ('2b' / '2f')
            if name_bytes.last() == Some(&b'b') {
                match self.scopes[0].symbols.get(&name).copied() {
                    Some(id) if self.symbols[id].sym.has_value => {
                        return (ParseState::Parsed, Some(id))
                    }
                    _ => {
                        self.print_error(
                            start,
                            &format!("Undefined previous local label '{}'", &name[..name.len() - 1]),
                        );
                        return (ParseState::Failed, None);
                    }
                }
            }
            let id = self.global_symbol(&name);
            return (ParseState::Parsed, Some(id));
        }
        match self.find_symbol_in_scope(&name) {
            Some(id) => (ParseState::Parsed, Some(id)),
            None => {
                if dont_create {
                    *pos = start;
                    return (ParseState::Missing, None);
                }
                match self.insert_undefined_symbol(&name) {
                    Some(id) => (ParseState::Parsed, Some(id)),
                    None => {
                        self.print_error(start, &format!("Scope for symbol '{}' doesn't exist", name));
                        (ParseState::Failed, None)
                    }
                }
            }
        }
    }

    /// Skip a symbol-like token (used when recovering from errors).
    pub fn skip_symbol(&mut self, pos: &mut usize) -> bool {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        let start = *pos;
        skip_spaces(bytes, pos);
        extract_scoped_sym_name(bytes, pos, true).is_some() || *pos != start
    }

    /// Parse one macro-call argument value.
    pub fn parse_macro_arg_value(&mut self, pos: &mut usize, out: &mut String) -> bool {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        // evaluated argument: %expr (alternate) or \%expr
        let expr_start = if self.alternate_macro && *pos < bytes.len() && bytes[*pos] == b'%' {
            Some(*pos + 1)
        } else if !self.alternate_macro && bytes[*pos..].starts_with(b"\\%") {
            Some(*pos + 2)
        } else {
            None
        };
        if let Some(mut expr_pos) = expr_start {
            match self.parse_expr_value(&mut expr_pos) {
                Some((value, section)) if section == ABS_SECTION => {
                    out.push_str(&(value as i64).to_string());
                    *pos = expr_pos;
                    return true;
                }
                _ => {
                    *pos = expr_pos;
                    return false;
                }
            }
        }
        if self.alternate_macro
            && *pos < bytes.len()
            && (bytes[*pos] == b'<' || bytes[*pos] == b'\'' || bytes[*pos] == b'"')
        {
            // alternate quoting, '!' escapes
            let term = if bytes[*pos] == b'<' { b'>' } else { bytes[*pos] };
            *pos += 1;
            let mut escape = false;
            while *pos < bytes.len() && (bytes[*pos] != term || escape) {
                if !escape && bytes[*pos] == b'!' {
                    escape = true;
                    *pos += 1;
                } else {
                    escape = false;
                    out.push(bytes[*pos] as char);
                    *pos += 1;
                }
            }
            if *pos >= bytes.len() {
                self.print_error(*pos, "Unterminated quoted string");
                return false;
            }
            *pos += 1;
            return true;
        }
        if *pos < bytes.len() && bytes[*pos] == b'"' {
            // old-mode quoting
            *pos += 1;
            let mut backslash = 0usize;
            while *pos < bytes.len() && (bytes[*pos] != b'"' || (backslash & 1) != 0) {
                if bytes[*pos] == b'\\' {
                    backslash += 1;
                } else {
                    backslash = 0;
                }
                out.push(bytes[*pos] as char);
                *pos += 1;
            }
            if *pos >= bytes.len() {
                self.print_error(*pos, "Unterminated quoted string");
                return false;
            }
            *pos += 1;
            return true;
        }
        // token-class run: a space ends the argument only between two
        // tokens of the name class or between distinct classes of the
        // same continuation kind
        let cont = |class: u8| class == 3;
        let mut first_non_space = false;
        let mut prev_tok: Option<u8> = None;
        while *pos < bytes.len() && bytes[*pos] != b',' {
            if bytes[*pos] == b'"' {
                return true;
            }
            if !is_space(bytes[*pos]) {
                let this_tok = token_char_class(bytes[*pos]);
                let break_here = match prev_tok {
                    Some(p) if first_non_space => {
                        (p != this_tok && cont(p) == cont(this_tok))
                            || (p == this_tok && cont(p) && cont(this_tok))
                    }
                    _ => false,
                };
                if break_here {
                    break;
                }
                out.push(bytes[*pos] as char);
                first_non_space = false;
                prev_tok = Some(this_tok);
            } else {
                first_non_space = true;
            }
            *pos += 1;
        }
        true
    }

    // ---- scopes ----

    /// Locate `name` (possibly `::`-qualified) per the lookup rules:
    /// walk outward through enclosing scopes, searching each scope and
    /// its transitive `.using` imports.
    pub fn find_symbol_in_scope(&self, name: &str) -> Option<SymbolId> {
        let (global, parts) = split_scoped_name(name);
        let mut scope = if global { 0 } else { self.current_scope };
        if parts.len() == 1 {
            loop {
                let mut visited = HashSet::new();
                if let Some(id) = self.find_symbol_with_usings(scope, parts[0], &mut visited) {
                    return Some(id);
                }
                match self.scopes[scope].parent {
                    Some(p) if !global => scope = p,
                    _ => return None,
                }
            }
        }
        // qualified: locate the first scope component outward, then
        // descend strictly
        let first_scope = if global {
            self.find_scope_from(0, parts[0], false)?
        } else {
            let mut cur = self.current_scope;
            loop {
                if let Some(s) = self.find_scope_from(cur, parts[0], true) {
                    break s;
                }
                match self.scopes[cur].parent {
                    Some(p) => cur = p,
                    None => return None,
                }
            }
        };
        let mut scope = first_scope;
        for part in &parts[1..parts.len() - 1] {
            scope = *self.scopes[scope].scopes.get(*part)?;
        }
        let mut visited = HashSet::new();
        self.find_symbol_with_usings(scope, parts[parts.len() - 1], &mut visited)
    }

    fn find_symbol_with_usings(
        &self,
        scope: ScopeId,
        name: &str,
        visited: &mut HashSet<ScopeId>,
    ) -> Option<SymbolId> {
        if !visited.insert(scope) {
            return None;
        }
        if let Some(&id) = self.scopes[scope].symbols.get(name) {
            return Some(id);
        }
        for &used in &self.scopes[scope].used_scopes {
            if let Some(id) = self.find_symbol_with_usings(used, name, visited) {
                return Some(id);
            }
        }
        None
    }

    fn find_scope_from(&self, scope: ScopeId, name: &str, with_usings: bool) -> Option<ScopeId> {
        if let Some(&s) = self.scopes[scope].scopes.get(name) {
            return Some(s);
        }
        if with_usings {
            for &used in &self.scopes[scope].used_scopes {
                if let Some(&s) = self.scopes[used].scopes.get(name) {
                    return Some(s);
                }
            }
        }
        None
    }

    /// Locate a register variable by (possibly qualified) name.
    pub fn find_reg_var(&self, name: &str) -> Option<crate::symbol::RegVarId> {
        let (global, parts) = split_scoped_name(name);
        if parts.len() == 1 && !global {
            let mut scope = self.current_scope;
            loop {
                if let Some(&id) = self.scopes[scope].reg_vars.get(parts[0]) {
                    return Some(id);
                }
                for &used in &self.scopes[scope].used_scopes {
                    if let Some(&id) = self.scopes[used].reg_vars.get(parts[0]) {
                        return Some(id);
                    }
                }
                match self.scopes[scope].parent {
                    Some(p) => scope = p,
                    None => return None,
                }
            }
        }
        let mut scope = if global { 0 } else { self.find_scope_from(self.current_scope, parts[0], true)? };
        if !global {
            for part in &parts[1..parts.len() - 1] {
                scope = *self.scopes[scope].scopes.get(*part)?;
            }
        } else {
            for part in &parts[..parts.len() - 1] {
                scope = *self.scopes[scope].scopes.get(*part)?;
            }
        }
        self.scopes[scope].reg_vars.get(parts[parts.len() - 1]).copied()
    }

    /// Insert `sym` under `name` in the proper scope, or return the
    /// existing entry. `(id, inserted)`.
    pub fn insert_symbol_in_scope(&mut self, name: &str, sym: Symbol) -> (SymbolId, bool) {
        let (global, parts) = split_scoped_name(name);
        if parts.len() == 1 && !global {
            if let Some(id) = self.find_symbol_in_scope(name) {
                return (id, false);
            }
            let id = self.put_symbol_entry(parts[0], sym);
            self.scopes[self.current_scope].symbols.insert(parts[0].to_owned(), id);
            return (id, true);
        }
        match self.resolve_scope_path(global, &parts[..parts.len() - 1]) {
            Some(scope) => {
                let last = parts[parts.len() - 1];
                if let Some(&id) = self.scopes[scope].symbols.get(last) {
                    return (id, false);
                }
                let id = self.put_symbol_entry(last, sym);
                self.scopes[scope].symbols.insert(last.to_owned(), id);
                (id, true)
            }
            None => {
                // fall back to the current scope under the full name
                let id = self.put_symbol_entry(name, sym);
                self.scopes[self.current_scope].symbols.insert(name.to_owned(), id);
                (id, true)
            }
        }
    }

    fn insert_undefined_symbol(&mut self, name: &str) -> Option<SymbolId> {
        let (id, _) = self.insert_symbol_in_scope(name, Symbol::undefined());
        Some(id)
    }

    fn resolve_scope_path(&self, global: bool, parts: &[&str]) -> Option<ScopeId> {
        if parts.is_empty() {
            return Some(if global { 0 } else { self.current_scope });
        }
        let mut scope = if global {
            0
        } else {
            let mut cur = self.current_scope;
            loop {
                if let Some(s) = self.find_scope_from(cur, parts[0], true) {
                    break s;
                }
                cur = self.scopes[cur].parent?;
            }
        };
        let rest = if global { parts } else { &parts[1..] };
        for part in rest {
            scope = *self.scopes[scope].scopes.get(*part)?;
        }
        Some(scope)
    }

    /// Open (creating if needed) a named child scope of the current
    /// scope and make it current.
    pub fn push_scope(&mut self, name: &str) -> ScopeId {
        if name.is_empty() {
            // temporary scope
            self.scopes.push(crate::symbol::Scope::child(self.current_scope, String::new(), true));
            let id = self.scopes.len() - 1;
            self.current_scope = id;
            return id;
        }
        if let Some(&id) = self.scopes[self.current_scope].scopes.get(name) {
            self.current_scope = id;
            return id;
        }
        self.scopes.push(crate::symbol::Scope::child(self.current_scope, name.to_owned(), false));
        let id = self.scopes.len() - 1;
        self.scopes[self.current_scope].scopes.insert(name.to_owned(), id);
        self.current_scope = id;
        id
    }

    /// Close the current scope; temporary scopes resolve eagerly and
    /// move to the abandoned list.
    pub fn pop_scope(&mut self, line_pos: usize) -> bool {
        let cur = self.current_scope;
        let parent = match self.scopes[cur].parent {
            Some(p) => p,
            None => {
                self.print_error(line_pos, "Closing global scope is illegal");
                return false;
            }
        };
        if self.scopes[cur].temporary {
            self.try_to_resolve_symbols(cur);
            self.abandoned_scopes.push(cur);
            let name_removal: Vec<String> = self.scopes[parent]
                .scopes
                .iter()
                .filter(|(_, &v)| v == cur)
                .map(|(k, _)| k.clone())
                .collect();
            for k in name_removal {
                self.scopes[parent].scopes.remove(&k);
            }
        }
        self.current_scope = parent;
        true
    }

    /// Parse and evaluate an absolute expression right away (helper for
    /// macro `%` arguments and pseudo-op arguments).
    pub fn parse_expr_value(&mut self, pos: &mut usize) -> Option<(u64, SectionId)> {
        let expr_id = self.parse_expr(pos, false, true)?;
        if self.exprs[expr_id].sym_occurs_num != 0 {
            let p = self.exprs[expr_id].source_pos.clone();
            self.print_error_at(&p, "Expression have unresolved symbols!");
            return None;
        }
        let (status, value, section) = self.evaluate_expr_id(expr_id);
        if status == crate::error::TryStatus::Success {
            Some((value, section))
        } else {
            None
        }
    }
}

/// Split `a::b::c` into components, reporting a leading `::`.
pub fn split_scoped_name(name: &str) -> (bool, Vec<&str>) {
    let (global, rest) = match name.strip_prefix("::") {
        Some(r) => (true, r),
        None => (false, name),
    };
    (global, rest.split("::").collect())
}
