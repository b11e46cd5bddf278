//! The bytecode emitter and the compiled-script object it fills.
//!
//! [`CompiledScript`] is the single mutation sink of the compiler: code
//! cells, fixups, the import/export/function tables, the global-data and
//! string blobs. Appends are monotonic; the only non-monotonic mutation is
//! chunk yank/replay on the nesting stack, which is always bracketed.
//!
//! Line numbers: an instruction is preceded by a `LINENUM` opcode whenever
//! the current source line differs from the last emitted one.
//! `last_emitted_lineno == None` means "invalid, emit one before the next
//! instruction"; every operation that can transfer control into the middle
//! of a block resets it.

use questscript_bytecode::{
    CodeCell, CodeLoc, ExportKind, FixupKind, Opcode, Register, SIZE_OF_STACK_CELL,
};

use crate::symbols::Vartype;

/// Storage class of a value, as tracked for the result register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeType {
    #[default]
    None,
    Global,
    Local,
    Import,
}

/// A deferred relocation the linker must patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub loc: CodeLoc,
    pub kind: FixupKind,
}

/// One export-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub kind: ExportKind,
    pub offset: i32,
    /// For functions: `num_params + 100 * varargs`.
    pub encoding: i32,
}

/// One function-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    pub code_offset: CodeLoc,
    pub num_params: usize,
}

/// The linkable script object under construction.
#[derive(Debug, Default)]
pub struct CompiledScript {
    pub code: Vec<CodeCell>,
    pub fixups: Vec<Fixup>,
    pub imports: Vec<String>,
    pub exports: Vec<ExportEntry>,
    pub functions: Vec<FunctionEntry>,
    pub global_data: Vec<u8>,
    /// NUL-terminated string literals, back to back.
    pub strings: Vec<u8>,
    /// (section name, code offset where it starts).
    pub sections: Vec<(String, CodeLoc)>,

    /// Byte distance from SP down to the base of the local-variable block.
    pub offset_to_local_var_block: i32,
    /// `None` forces a `LINENUM` before the next instruction.
    pub last_emitted_lineno: Option<u32>,
    cur_lineno: u32,

    /// Vartype of the value currently in AX.
    pub ax_vartype: Vartype,
    /// Storage class of the value currently in AX.
    pub ax_scope_type: ScopeType,
}

impl CompiledScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codesize(&self) -> CodeLoc {
        self.code.len() as CodeLoc
    }

    /// Distance operand for a jump at `here` (the operand cell index + 1)
    /// landing on `dest`.
    pub fn relative_jump_dist(here: CodeLoc, dest: CodeLoc) -> CodeCell {
        dest - here
    }

    // ==================== Line numbers ====================

    /// Record the current source line; emission happens lazily before the
    /// next instruction.
    pub fn refresh_lineno(&mut self, lineno: u32) {
        self.cur_lineno = lineno;
    }

    /// Emit a `LINENUM` for `lineno` unconditionally.
    pub fn write_lineno(&mut self, lineno: u32) {
        self.code.push(Opcode::LineNum.cell());
        self.code.push(lineno as CodeCell);
        self.cur_lineno = lineno;
        self.last_emitted_lineno = Some(lineno);
    }

    fn emit_pending_lineno(&mut self) {
        if self.last_emitted_lineno != Some(self.cur_lineno) {
            self.write_lineno(self.cur_lineno);
        }
    }

    // ==================== Code append ====================

    /// Append a raw cell without line-number bookkeeping (chunk replay).
    pub fn write_cell(&mut self, cell: CodeCell) {
        self.code.push(cell);
    }

    pub fn write_cmd0(&mut self, op: Opcode) {
        self.emit_pending_lineno();
        self.code.push(op.cell());
    }

    pub fn write_cmd1(&mut self, op: Opcode, arg1: CodeCell) {
        self.emit_pending_lineno();
        self.code.push(op.cell());
        self.code.push(arg1);
    }

    pub fn write_cmd2(&mut self, op: Opcode, arg1: CodeCell, arg2: CodeCell) {
        self.emit_pending_lineno();
        self.code.push(op.cell());
        self.code.push(arg1);
        self.code.push(arg2);
    }

    pub fn write_cmd3(&mut self, op: Opcode, arg1: CodeCell, arg2: CodeCell, arg3: CodeCell) {
        self.emit_pending_lineno();
        self.code.push(op.cell());
        self.code.push(arg1);
        self.code.push(arg2);
        self.code.push(arg3);
    }

    /// Push a register; the local-variable block grows by one cell.
    pub fn push_reg(&mut self, reg: Register) {
        self.write_cmd1(Opcode::PushReg, reg.cell());
        self.offset_to_local_var_block += SIZE_OF_STACK_CELL as i32;
    }

    /// Pop into a register; the local-variable block shrinks by one cell.
    pub fn pop_reg(&mut self, reg: Register) {
        self.write_cmd1(Opcode::PopReg, reg.cell());
        self.offset_to_local_var_block -= SIZE_OF_STACK_CELL as i32;
    }

    // ==================== Fixups ====================

    pub fn add_fixup(&mut self, loc: CodeLoc, kind: FixupKind) {
        self.fixups.push(Fixup { loc, kind });
    }

    /// Mark the last emitted cell for relocation.
    pub fn fixup_previous(&mut self, kind: FixupKind) {
        self.add_fixup(self.codesize() - 1, kind);
    }

    // ==================== Tables ====================

    /// Append an import name; returns its ordinal. Deduplication is the
    /// import manager's job.
    pub fn add_new_import(&mut self, name: &str) -> usize {
        self.imports.push(name.to_string());
        self.imports.len() - 1
    }

    /// Register a function starting at the current code end.
    /// Returns (entry offset, function-table index).
    pub fn add_new_function(&mut self, name: &str) -> (CodeLoc, usize) {
        let offset = self.codesize();
        self.functions.push(FunctionEntry {
            name: name.to_string(),
            code_offset: offset,
            num_params: 0,
        });
        (offset, self.functions.len() - 1)
    }

    pub fn add_new_export(
        &mut self,
        name: &str,
        kind: ExportKind,
        offset: i32,
        encoding: i32,
    ) {
        self.exports.push(ExportEntry {
            name: name.to_string(),
            kind,
            offset,
            encoding,
        });
    }

    /// Reserve `size` bytes of global data, optionally initialized.
    /// Returns the blob offset.
    pub fn add_global(&mut self, size: u32, init: Option<&[u8]>) -> i32 {
        let offset = self.global_data.len() as i32;
        match init {
            Some(bytes) => {
                let mut bytes = bytes.to_vec();
                bytes.resize(size as usize, 0);
                self.global_data.extend_from_slice(&bytes);
            }
            None => self.global_data.resize(self.global_data.len() + size as usize, 0),
        }
        offset
    }

    /// Append a NUL-terminated string literal; returns its blob offset.
    pub fn add_string(&mut self, text: &str) -> i32 {
        let offset = self.strings.len() as i32;
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        offset
    }

    pub fn start_new_section(&mut self, name: &str) {
        self.sections.push((name.to_string(), self.codesize()));
    }
}

/// Remembers the code end so speculative emission can be rolled back.
#[derive(Debug)]
pub struct RestorePoint {
    restore_loc: usize,
    last_emitted_lineno: Option<u32>,
}

impl RestorePoint {
    pub fn new(scrip: &CompiledScript) -> Self {
        Self {
            restore_loc: scrip.code.len(),
            last_emitted_lineno: scrip.last_emitted_lineno,
        }
    }

    /// Whether nothing has been emitted since this point.
    pub fn is_empty(&self, scrip: &CompiledScript) -> bool {
        scrip.code.len() == self.restore_loc
    }

    pub fn restore(&self, scrip: &mut CompiledScript) {
        scrip.code.truncate(self.restore_loc);
        scrip.last_emitted_lineno = self.last_emitted_lineno;
    }
}

/// Helper for tests and tools: iterate (location, opcode, args) triples.
pub fn instructions(code: &[CodeCell]) -> Vec<(usize, Opcode, &[CodeCell])> {
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < code.len() {
        let Ok(op) = Opcode::try_from(code[idx]) else {
            break;
        };
        let args_end = (idx + 1 + op.num_args()).min(code.len());
        out.push((idx, op, &code[idx + 1..args_end]));
        idx = args_end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lineno_emitted_on_change_only() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(1);
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 7);
        scrip.write_cmd1(Opcode::PushReg, Register::Ax.cell());
        scrip.refresh_lineno(2);
        scrip.write_cmd0(Opcode::Ret);

        let ops: Vec<Opcode> = instructions(&scrip.code).iter().map(|i| i.1).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LineNum,
                Opcode::LitToReg,
                Opcode::PushReg,
                Opcode::LineNum,
                Opcode::Ret
            ]
        );
    }

    #[test]
    fn test_invalidated_lineno_forces_reemission() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(3);
        scrip.write_cmd0(Opcode::Ret);
        scrip.last_emitted_lineno = None;
        scrip.write_cmd0(Opcode::Ret);

        let ops: Vec<Opcode> = instructions(&scrip.code).iter().map(|i| i.1).collect();
        assert_eq!(
            ops,
            vec![Opcode::LineNum, Opcode::Ret, Opcode::LineNum, Opcode::Ret]
        );
    }

    #[test]
    fn test_push_pop_track_local_block() {
        let mut scrip = CompiledScript::new();
        scrip.push_reg(Register::Ax);
        assert_eq!(scrip.offset_to_local_var_block, 4);
        scrip.pop_reg(Register::Bx);
        assert_eq!(scrip.offset_to_local_var_block, 0);
    }

    #[test]
    fn test_fixup_previous_points_at_last_cell() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(1);
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 0);
        scrip.fixup_previous(FixupKind::GlobalData);
        let fixup = scrip.fixups[0];
        assert_eq!(fixup.kind, FixupKind::GlobalData);
        assert_eq!(scrip.code[fixup.loc as usize], 0);
    }

    #[test]
    fn test_global_data_allocation() {
        let mut scrip = CompiledScript::new();
        let a = scrip.add_global(4, Some(&7i32.to_le_bytes()));
        let b = scrip.add_global(2, None);
        assert_eq!((a, b), (0, 4));
        assert_eq!(&scrip.global_data[0..4], &7i32.to_le_bytes());
        assert_eq!(scrip.global_data.len(), 6);
    }

    #[test]
    fn test_restore_point_rolls_back() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(1);
        scrip.write_cmd0(Opcode::Ret);
        let rp = RestorePoint::new(&scrip);
        scrip.write_cmd0(Opcode::Ret);
        assert!(!rp.is_empty(&scrip));
        rp.restore(&mut scrip);
        let ops: Vec<Opcode> = instructions(&scrip.code).iter().map(|i| i.1).collect();
        assert_eq!(ops, vec![Opcode::LineNum, Opcode::Ret]);
    }

    #[test]
    fn test_string_blob_is_nul_separated() {
        let mut scrip = CompiledScript::new();
        let a = scrip.add_string("hi");
        let b = scrip.add_string("yo");
        assert_eq!((a, b), (0, 3));
        assert_eq!(&scrip.strings, b"hi\0yo\0");
    }
}
