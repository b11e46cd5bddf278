//! The two-phase parser.
//!
//! Phase 1 (PreAnalyze) runs over the token stream collecting function
//! headers and the global-import visibility map; phase 2 (Main) re-reads
//! the stream and emits bytecode. Both phases run the same state machine;
//! [`Phase`] gates the side effects. Between the phases the symbol table is
//! re-initialized so that phase 2 sees the post-scan table again, except
//! that headers of functions with local bodies survive (that is the whole
//! point of the first phase).
//!
//! Nearly every parse function returns `CompileResult`; the first error
//! unwinds to [`Parser::parse`], which records it and stops.

mod access;
mod decl;
mod expr;
mod stmt;

use std::collections::HashMap;

pub use access::MemoryLocation;

use crate::callpoints::{FuncCallpointMgr, ImportMgr};
use crate::diagnostics::MessageHandler;
use crate::emitter::{CompiledScript, ScopeType};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::nesting::NestingStack;
use crate::source::SrcList;
use crate::symbols::{
    predef, Symbol, SymbolKind, SymbolTable, TypeQualifierSet, Vartype,
};
use crate::CompilerOptions;
use questscript_bytecode::{CodeCell, Register};

/// Register argument cells, for terse emission calls.
pub(crate) const SP: CodeCell = Register::Sp.cell();
pub(crate) const MAR: CodeCell = Register::Mar.cell();
pub(crate) const AX: CodeCell = Register::Ax.cell();
pub(crate) const BX: CodeCell = Register::Bx.cell();
pub(crate) const CX: CodeCell = Register::Cx.cell();
pub(crate) const OP: CodeCell = Register::Op.cell();
pub(crate) const DX: CodeCell = Register::Dx.cell();

/// Which pass over the token stream is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreAnalyze,
    Main,
}

/// Where the value of an evaluated expression ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLocation {
    /// AX holds the value itself.
    AxIsValue,
    /// MAR holds the address of the value.
    MarPointsToValue,
    /// The expression selected an attribute for writing; the caller must
    /// compile the setter call.
    Attribute,
}

/// Result of evaluating an expression or access chain.
#[derive(Debug, Clone, Copy)]
pub struct EvalResult {
    pub vloc: ValueLocation,
    pub scope: ScopeType,
    pub vartype: Vartype,
}

pub struct Parser<'t, 'c> {
    pub(crate) src: SrcList<'t>,
    pub(crate) sym: &'c mut SymbolTable,
    pub(crate) scrip: &'c mut CompiledScript,
    pub(crate) msgs: &'c mut MessageHandler,
    pub(crate) options: CompilerOptions,

    pub(crate) phase: Phase,
    pub(crate) nest: NestingStack,
    /// Callpoints of local functions (code fixups).
    pub(crate) fcm: FuncCallpointMgr,
    /// Callpoints of imported functions (import ordinals).
    pub(crate) fim: FuncCallpointMgr,
    pub(crate) import_mgr: ImportMgr,
    /// Global-import visibility: true when a name was declared as a global
    /// non-import variable somewhere in the unit.
    pub(crate) givm: HashMap<Symbol, bool>,

    pub(crate) name_of_current_func: Symbol,
    pub(crate) struct_of_current_func: Symbol,

    pub(crate) cur_line: u32,
    pub(crate) cur_section_id: usize,
    last_emitted_section_id: Option<usize>,
}

impl std::fmt::Debug for Parser<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("phase", &self.phase)
            .field("cursor", &self.src.get_cursor())
            .finish_non_exhaustive()
    }
}

impl<'t, 'c> Parser<'t, 'c> {
    pub fn new(
        src: SrcList<'t>,
        sym: &'c mut SymbolTable,
        scrip: &'c mut CompiledScript,
        msgs: &'c mut MessageHandler,
        options: CompilerOptions,
    ) -> Self {
        let mut import_mgr = ImportMgr::new();
        import_mgr.init(scrip);
        Self {
            src,
            sym,
            scrip,
            msgs,
            options,
            phase: Phase::PreAnalyze,
            nest: NestingStack::new(),
            fcm: FuncCallpointMgr::new(),
            fim: FuncCallpointMgr::new(),
            import_mgr,
            givm: HashMap::new(),
            name_of_current_func: Symbol::NONE,
            struct_of_current_func: Symbol::NONE,
            cur_line: 0,
            cur_section_id: 0,
            last_emitted_section_id: None,
        }
    }

    /// Run both phases and the end-of-unit checks.
    pub fn parse(&mut self) -> CompileResult<()> {
        let start_of_input = self.src.get_cursor();

        // Needed to partially reset the symbol table between the phases.
        let sym_after_scanning = self.sym.clone();

        self.phase = Phase::PreAnalyze;
        self.parse_input()?;
        self.fcm.reset();
        self.reinit_sym_table(&sym_after_scanning);

        self.src.set_cursor(start_of_input);
        self.phase = Phase::Main;
        self.nest = NestingStack::new();
        self.name_of_current_func = Symbol::NONE;
        self.struct_of_current_func = Symbol::NONE;
        self.last_emitted_section_id = None;
        self.parse_input()?;

        // Errors from here on pertain to the unit as a whole; report them
        // at the last token.
        let last_pos = self.src.len().saturating_sub(1);
        self.cur_line = self.src.lineno_at(last_pos);
        self.cur_section_id = self.src.data().section_id_at(self.src.global_pos_of(last_pos));

        self.check_unresolved_funcs()?;
        self.blank_out_unused_imports();
        Ok(())
    }

    fn check_unresolved_funcs(&mut self) -> CompileResult<()> {
        for mgr in [&self.fcm, &self.fim] {
            if let Some((func, in_source)) = mgr.first_unresolved() {
                self.cur_line = self.src.data().lineno_at(in_source);
                self.cur_section_id = self.src.data().section_id_at(in_source);
                let msg = self.reference_msg_sym(
                    &format!(
                        "The called function '{}()' isn't defined with body nor imported",
                        self.sym.name(func)
                    ),
                    func,
                );
                return Err(self.error(ErrorKind::Reference, msg));
            }
        }
        Ok(())
    }

    /// Clear the names of imports that were never referenced so the linker
    /// doesn't resolve them needlessly.
    fn blank_out_unused_imports(&mut self) {
        use crate::symbols::EntryFlags;
        for sym in self.sym.symbols().collect::<Vec<_>>() {
            let entry = &self.sym[sym];
            if !matches!(entry.kind, SymbolKind::Function | SymbolKind::GlobalVar) {
                continue;
            }
            if entry.qualifiers.contains(TypeQualifierSet::IMPORT)
                && !entry.flags.contains(EntryFlags::ACCESSED)
            {
                let import_idx = entry.offset as usize;
                if let Some(name) = self.scrip.imports.get_mut(import_idx) {
                    name.clear();
                }
            }
        }
    }

    /// Keep the headers of functions that have a local body; reset every
    /// other post-scan entry, preserving indices.
    fn reinit_sym_table(&mut self, sym_after_scanning: &SymbolTable) {
        use crate::symbols::SymbolTableEntry;
        let first = predef::LAST_PREDEFINED.index() + 1;
        for idx in first..self.sym.len() {
            let sym = Symbol(idx as u32);
            if self.sym[sym].kind == SymbolKind::Function {
                let is_import = self.sym[sym].offset == decl::FT_IMPORT;
                self.sym[sym]
                    .qualifiers
                    .set(TypeQualifierSet::IMPORT, is_import);
                self.sym[sym].offset = 0;
                continue;
            }
            if idx < sym_after_scanning.len() {
                self.sym[sym] = sym_after_scanning[sym].clone();
                continue;
            }
            let name = self.sym[sym].name.clone();
            self.sym[sym] = SymbolTableEntry::blank(name);
        }
    }

    /// One full pass over the token stream.
    pub(crate) fn parse_input(&mut self) -> CompileResult<()> {
        while !self.src.reached_eof() {
            let next_pos = self.src.get_cursor();
            self.handle_src_section_change_at(next_pos);
            self.cur_line = self.src.lineno_at(next_pos);
            self.scrip.refresh_lineno(self.cur_line);

            let tqs = self.parse_qualifiers()?;

            let leading_sym = self.src.get_next();
            match leading_sym {
                predef::ENUM => {
                    self.check_tq(tqs, !self.name_of_current_func.is_none(), false)?;
                    self.parse_enum(tqs)?;
                    continue;
                }
                predef::EXPORT => {
                    // No qualifiers in front of 'export' allowed.
                    self.check_tq_empty(tqs)?;
                    self.parse_export()?;
                    continue;
                }
                predef::STRUCT => {
                    self.check_tq(tqs, !self.name_of_current_func.is_none(), false)?;
                    self.parse_struct(tqs)?;
                    continue;
                }
                predef::OPEN_BRACE if self.phase == Phase::PreAnalyze => {
                    // Function bodies are skipped wholesale in phase 1.
                    self.skip_to_close(predef::CLOSE_BRACE)?;
                    self.name_of_current_func = Symbol::NONE;
                    self.struct_of_current_func = Symbol::NONE;
                    continue;
                }
                _ => {}
            }

            // A vartype introduces a declaration unless it is a static
            // struct component access.
            if self.sym.kind(leading_sym) == SymbolKind::Vartype
                && self.src.peek_next() != predef::DOT
            {
                self.parse_vartype(leading_sym, tqs)?;
                continue;
            }

            // Not a declaration, so it must be a command within a function.
            if self.sym.kind(leading_sym) == SymbolKind::NoType {
                let treat_as_command = !self.struct_of_current_func.is_none() && {
                    let mangled = self.sym.mangle(self.struct_of_current_func, leading_sym);
                    self.sym.kind(mangled) != SymbolKind::NoType
                };
                if !treat_as_command {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("Unexpected token '{}'", self.sym.name(leading_sym)),
                    ));
                }
            }

            if self.name_of_current_func.is_none() {
                return Err(self.error(
                    ErrorKind::Syntax,
                    format!(
                        "'{}' is illegal outside a function",
                        self.sym.name(leading_sym)
                    ),
                ));
            }

            // No qualifiers in front of a command allowed.
            self.check_tq_empty(tqs)?;
            self.parse_command(leading_sym)?;
        }
        Ok(())
    }

    fn handle_src_section_change_at(&mut self, pos: usize) {
        let section_id = self.src.data().section_id_at(self.src.global_pos_of(pos));
        self.cur_section_id = section_id;
        if self.last_emitted_section_id == Some(section_id) {
            return;
        }
        if self.phase == Phase::Main {
            let name = self.src.data().section_name(section_id).to_string();
            self.scrip.start_new_section(&name);
        }
        self.last_emitted_section_id = Some(section_id);
    }

    // ==================== Qualifiers ====================

    pub(crate) fn parse_qualifiers(&mut self) -> CompileResult<TypeQualifierSet> {
        let mut tqs = TypeQualifierSet::empty();
        let mut istd_found = false;
        let mut itry_found = false;
        while !self.src.reached_eof() {
            let peeksym = self.src.peek_next();
            match peeksym {
                predef::ATTRIBUTE => tqs |= TypeQualifierSet::ATTRIBUTE,
                predef::AUTOPTR => tqs |= TypeQualifierSet::AUTOPTR,
                predef::BUILTIN => tqs |= TypeQualifierSet::BUILTIN,
                predef::CONST => tqs |= TypeQualifierSet::CONST,
                predef::IMPORT_STD => {
                    tqs |= TypeQualifierSet::IMPORT;
                    istd_found = true;
                }
                predef::IMPORT_TRY => {
                    tqs |= TypeQualifierSet::IMPORT;
                    itry_found = true;
                }
                predef::INTERNALSTRING => tqs |= TypeQualifierSet::STRINGSTRUCT,
                predef::MANAGED => tqs |= TypeQualifierSet::MANAGED,
                predef::PROTECTED => tqs |= TypeQualifierSet::PROTECTED,
                predef::READONLY => tqs |= TypeQualifierSet::READONLY,
                predef::STATIC => tqs |= TypeQualifierSet::STATIC,
                predef::WRITEPROTECTED => tqs |= TypeQualifierSet::WRITEPROTECTED,
                _ => return Ok(tqs),
            }
            self.src.get_next();
            if istd_found && itry_found {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Cannot both use 'import' and '_tryimport'",
                ));
            }
        }
        Ok(tqs)
    }

    /// Check that the qualifiers that accumulated for this declaration go
    /// together.
    pub(crate) fn check_tq(
        &self,
        tqs: TypeQualifierSet,
        in_func_body: bool,
        in_struct_decl: bool,
    ) -> CompileResult<()> {
        let illegal = |name: &str, place: &str| -> CompileError {
            self.error(
                ErrorKind::Declaration,
                format!("'{}' is illegal in {}", name, place),
            )
        };

        if in_struct_decl {
            if tqs.contains(TypeQualifierSet::BUILTIN) {
                return Err(illegal("builtin", "a struct declaration"));
            }
            if tqs.contains(TypeQualifierSet::STRINGSTRUCT) {
                return Err(illegal("internalstring", "a struct declaration"));
            }
        } else {
            for (flag, name) in [
                (TypeQualifierSet::ATTRIBUTE, "attribute"),
                (TypeQualifierSet::PROTECTED, "protected"),
                (TypeQualifierSet::WRITEPROTECTED, "writeprotected"),
            ] {
                if tqs.contains(flag) {
                    return Err(self.error(
                        ErrorKind::Declaration,
                        format!("'{}' is only legal in a struct declaration", name),
                    ));
                }
            }
        }

        if in_func_body {
            for (flag, name) in [
                (TypeQualifierSet::AUTOPTR, "autoptr"),
                (TypeQualifierSet::BUILTIN, "builtin"),
                (TypeQualifierSet::IMPORT, "import"),
                (TypeQualifierSet::MANAGED, "managed"),
                (TypeQualifierSet::STATIC, "static"),
                (TypeQualifierSet::STRINGSTRUCT, "internalstring"),
            ] {
                if tqs.contains(flag) {
                    return Err(illegal(name, "a function body"));
                }
            }
        }

        let protection_count = [
            TypeQualifierSet::PROTECTED,
            TypeQualifierSet::READONLY,
            TypeQualifierSet::WRITEPROTECTED,
        ]
        .iter()
        .filter(|&&f| tqs.contains(f))
        .count();
        if protection_count > 1 {
            return Err(self.error(
                ErrorKind::Declaration,
                "Can only use one out of 'protected', 'readonly', and 'writeprotected'",
            ));
        }

        if tqs.contains(TypeQualifierSet::AUTOPTR)
            && !(tqs.contains(TypeQualifierSet::BUILTIN) && tqs.contains(TypeQualifierSet::MANAGED))
        {
            return Err(self.error(
                ErrorKind::Declaration,
                "'autoptr' must be combined with 'builtin' and 'managed'",
            ));
        }

        if tqs.contains(TypeQualifierSet::STRINGSTRUCT) && !tqs.contains(TypeQualifierSet::AUTOPTR)
        {
            return Err(self.error(
                ErrorKind::Declaration,
                "'internalstring' must be combined with 'autoptr'",
            ));
        }

        if tqs.contains(TypeQualifierSet::CONST) {
            return Err(self.error(
                ErrorKind::Declaration,
                "'const' can only be used for a function parameter (use 'readonly' instead)",
            ));
        }

        if tqs.contains(TypeQualifierSet::IMPORT) && tqs.contains(TypeQualifierSet::STRINGSTRUCT) {
            return Err(self.error(
                ErrorKind::Declaration,
                "Cannot combine 'import' and 'internalstring'",
            ));
        }

        Ok(())
    }

    pub(crate) fn check_tq_empty(&self, tqs: TypeQualifierSet) -> CompileResult<()> {
        if tqs.is_empty() {
            return Ok(());
        }
        Err(self.error(
            ErrorKind::Declaration,
            format!("Unexpected '{}' before a command", tqs.describe()),
        ))
    }

    // ==================== Shared small helpers ====================

    pub(crate) fn error(&self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError::new(
            kind,
            self.src.data().section_name(self.cur_section_id),
            self.cur_line,
            message,
        )
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let section = self
            .src
            .data()
            .section_name(self.cur_section_id)
            .to_string();
        self.msgs.add_warning(section, self.cur_line, message);
    }

    /// Record the line of the cursor of `list` as the current source line.
    pub(crate) fn update_line_from(&mut self, list: &SrcList) {
        self.cur_line = list.lineno();
        self.scrip.refresh_lineno(self.cur_line);
    }

    pub(crate) fn expect(&self, expected: Symbol, actual: Symbol) -> CompileResult<()> {
        self.expect_msg(expected, actual, None)
    }

    pub(crate) fn expect_msg(
        &self,
        expected: Symbol,
        actual: Symbol,
        custom_msg: Option<&str>,
    ) -> CompileResult<()> {
        if actual == expected {
            return Ok(());
        }
        let msg = match custom_msg {
            Some(custom) => format!("{}, found '{}' instead", custom, self.sym.name(actual)),
            None => format!(
                "Expected '{}', found '{}' instead",
                self.sym.name(expected),
                self.sym.name(actual)
            ),
        };
        Err(self.error(ErrorKind::Syntax, msg))
    }

    pub(crate) fn expect_any(&self, expected: &[Symbol], actual: Symbol) -> CompileResult<()> {
        if expected.contains(&actual) {
            return Ok(());
        }
        let mut msg = String::from("Expected ");
        for (idx, &sym) in expected.iter().enumerate() {
            msg.push_str(&format!("'{}'", self.sym.name(sym)));
            if idx + 2 < expected.len() {
                msg.push_str(", ");
            } else if idx + 2 == expected.len() {
                msg.push_str(" or ");
            }
        }
        msg.push_str(&format!(", found '{}' instead", self.sym.name(actual)));
        Err(self.error(ErrorKind::Syntax, msg))
    }

    /// Append `". See <section> line <N>"` when the declaration lies
    /// elsewhere.
    pub(crate) fn reference_msg_loc(&self, msg: &str, declared: Option<usize>) -> String {
        let Some(declared) = declared else {
            return msg.to_string();
        };
        let data = self.src.data();
        let section_id = data.section_id_at(declared);
        let line = data.lineno_at(declared);
        if line == 0 {
            return msg.to_string();
        }
        if section_id != self.cur_section_id {
            format!("{}. See {} line {}", msg, data.section_name(section_id), line)
        } else if line != self.cur_line {
            format!("{}. See line {}", msg, line)
        } else {
            format!("{}. See the current line", msg)
        }
    }

    pub(crate) fn reference_msg_sym(&self, msg: &str, sym: Symbol) -> String {
        self.reference_msg_loc(msg, self.sym.declared(sym))
    }

    // ==================== Literal conversions ====================

    pub(crate) fn string_to_int(&self, text: &str) -> CompileResult<i32> {
        match text.parse::<i64>() {
            Ok(v) if v < i32::MIN as i64 => Err(self.error(
                ErrorKind::Semantic,
                format!("Literal value '{}' is too low (min. is '{}')", text, i32::MIN),
            )),
            Ok(v) if v > i32::MAX as i64 => Err(self.error(
                ErrorKind::Semantic,
                format!("Literal value {} is too high (max. is {})", text, i32::MAX),
            )),
            Ok(v) => Ok(v as i32),
            Err(_) => Err(self.error(
                ErrorKind::Semantic,
                format!("Expected an integer literal, found '{}' instead", text),
            )),
        }
    }

    pub(crate) fn string_to_float(&self, text: &str) -> CompileResult<f32> {
        let value: f64 = text.parse().map_err(|_| {
            self.error(
                ErrorKind::Internal,
                format!("Illegal floating point literal '{}'", text),
            )
        })?;
        if value.is_infinite() {
            return Err(self.error(
                ErrorKind::Semantic,
                format!("Floating point literal '{}' is out of range", text),
            ));
        }
        Ok(value as f32)
    }

    /// The integer value of a literal or constant symbol, negated on demand.
    pub(crate) fn int_literal_or_const_to_value(
        &self,
        symb: Symbol,
        is_negative: bool,
        error_msg: &str,
    ) -> CompileResult<i32> {
        match self.sym.kind(symb) {
            SymbolKind::Constant => {
                let value = self.sym[symb].offset;
                Ok(if is_negative { -value } else { value })
            }
            SymbolKind::LiteralInt => {
                let mut text = self.sym.name(symb).to_string();
                if is_negative {
                    text.insert(0, '-');
                }
                self.string_to_int(&text)
            }
            _ => Err(self.error(ErrorKind::Syntax, error_msg)),
        }
    }

    pub(crate) fn float_literal_to_value(
        &self,
        symb: Symbol,
        is_negative: bool,
        error_msg: &str,
    ) -> CompileResult<f32> {
        if self.sym.kind(symb) != SymbolKind::LiteralFloat {
            return Err(self.error(ErrorKind::Syntax, error_msg));
        }
        let value = self.string_to_float(self.sym.name(symb))?;
        Ok(if is_negative { -value } else { value })
    }

    // ==================== Skipping ====================

    /// Skip upcoming symbols of `list` until one of `stoplist` appears at
    /// nesting depth 0 or a closing symbol would underflow the depth. The
    /// stopping symbol is not consumed.
    pub(crate) fn skip_to(list: &mut SrcList, stoplist: &[Symbol]) {
        let mut depth: i32 = 0;
        while !list.reached_eof() {
            let next_sym = list.peek_next();
            match next_sym {
                predef::OPEN_BRACE | predef::OPEN_BRACKET | predef::OPEN_PAREN => depth += 1,
                predef::CLOSE_BRACE | predef::CLOSE_BRACKET | predef::CLOSE_PAREN => {
                    depth -= 1;
                    if depth < 0 {
                        return;
                    }
                }
                _ if depth == 0 && stoplist.contains(&next_sym) => return,
                _ => {}
            }
            list.get_next();
        }
    }

    /// Skip to and consume the closing symbol matching the bracket that was
    /// just opened.
    pub(crate) fn skip_to_close(&mut self, closer: Symbol) -> CompileResult<()> {
        Self::skip_to(&mut self.src, &[]);
        let actual = self.src.get_next();
        if actual == closer {
            return Ok(());
        }
        Err(self.error(ErrorKind::Internal, "Unexpected closing symbol"))
    }

    pub(crate) fn mark_accessed(&mut self, sym: Symbol) {
        self.sym.mark_accessed(sym);
    }
}
