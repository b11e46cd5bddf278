//! The nesting stack: one frame per open block or compound-statement head.
//!
//! A frame carries the jump bookkeeping of its construct, the shadowed
//! symbol definitions to restore on exit, and "chunks": bytecode fragments
//! that were emitted, then ripped back out of the code base to be replayed
//! later (the `for` iterate clause at the loop bottom and at `continue`,
//! the `case` comparison expressions in the jump table).

use std::collections::BTreeMap;

use questscript_bytecode::{CodeCell, CodeLoc, Opcode};

use crate::emitter::{CompiledScript, Fixup};
use crate::jumps::{BackwardJumpDest, ForwardJump};
use crate::symbols::{Symbol, SymbolTableEntry, Vartype};

/// Identifies a yanked chunk. Patch entries tagged [`CODE_BASE_ID`] point
/// into the live code stream instead.
pub type ChunkId = i32;

/// The live code stream, as opposed to any yanked chunk.
pub const CODE_BASE_ID: ChunkId = 0;

/// What kind of construct a nesting frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingType {
    /// The bottom frame; also the global scope.
    None,
    /// The function body.
    Function,
    /// The function parameters.
    Parameters,
    /// A free-standing `{ }` block.
    Braces,
    If,
    Else,
    Do,
    While,
    For,
    Switch,
}

/// A stashed bytecode fragment. Fixup locations are relative to the chunk
/// start and re-based on replay.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub src_line: u32,
    pub code: Vec<CodeCell>,
    pub fixups: Vec<Fixup>,
}

/// One nesting level.
#[derive(Debug)]
pub struct NestingInfo {
    pub nest_type: NestingType,
    /// Backward-jump destination (loop starts).
    pub start: BackwardJumpDest,
    /// Forward jumps that leave this construct.
    pub jump_out: ForwardJump,
    pub switch_expr_vartype: Vartype,
    pub switch_default: BackwardJumpDest,
    pub switch_jumptable: ForwardJump,
    pub switch_cases: Vec<BackwardJumpDest>,
    /// Previous definitions of symbols shadowed in this block, ordered by
    /// handle so scope-exit code comes out deterministically.
    pub old_definitions: BTreeMap<Symbol, SymbolTableEntry>,
    pub chunks: Vec<Chunk>,
}

impl NestingInfo {
    fn new(nest_type: NestingType) -> Self {
        Self {
            nest_type,
            start: BackwardJumpDest::new(),
            jump_out: ForwardJump::new(),
            switch_expr_vartype: Symbol::NONE,
            switch_default: BackwardJumpDest::new(),
            switch_jumptable: ForwardJump::new(),
            switch_cases: Vec::new(),
            old_definitions: BTreeMap::new(),
            chunks: Vec::new(),
        }
    }
}

/// The stack of open blocks. Never empty: level 0 is the global scope.
#[derive(Debug)]
pub struct NestingStack {
    stack: Vec<NestingInfo>,
    chunk_id_ctr: ChunkId,
}

impl Default for NestingStack {
    fn default() -> Self {
        Self::new()
    }
}

impl NestingStack {
    pub fn new() -> Self {
        Self {
            stack: vec![NestingInfo::new(NestingType::None)],
            chunk_id_ctr: CODE_BASE_ID,
        }
    }

    pub fn push(&mut self, nest_type: NestingType) {
        self.stack.push(NestingInfo::new(nest_type));
    }

    pub fn pop(&mut self) {
        debug_assert!(self.stack.len() > 1, "must not pop the global frame");
        self.stack.pop();
    }

    /// The current nesting depth; the top frame's level.
    pub fn top_level(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn nest_type(&self) -> NestingType {
        self.top().nest_type
    }

    pub fn nest_type_at(&self, level: usize) -> NestingType {
        self.stack[level].nest_type
    }

    /// Re-tag the top frame (an `if` whose `else` arrives).
    pub fn set_nest_type(&mut self, nest_type: NestingType) {
        self.top_mut().nest_type = nest_type;
    }

    pub fn top(&self) -> &NestingInfo {
        self.stack.last().expect("nesting stack never empty")
    }

    pub fn top_mut(&mut self) -> &mut NestingInfo {
        self.stack.last_mut().expect("nesting stack never empty")
    }

    pub fn at(&self, level: usize) -> &NestingInfo {
        &self.stack[level]
    }

    pub fn at_mut(&mut self, level: usize) -> &mut NestingInfo {
        &mut self.stack[level]
    }

    /// Stash the previous definition of `sym` in the top frame.
    /// Returns true when a stash for it already exists.
    pub fn add_old_definition(&mut self, sym: Symbol, entry: SymbolTableEntry) -> bool {
        let od = &mut self.top_mut().old_definitions;
        if od.contains_key(&sym) {
            return true;
        }
        od.insert(sym, entry);
        false
    }

    pub fn chunks_exist(&self) -> bool {
        !self.top().chunks.is_empty()
    }

    pub fn chunks_exist_at(&self, level: usize) -> bool {
        !self.stack[level].chunks.is_empty()
    }

    /// Rip the code cells `[code_start, codesize)` and the fixups
    /// `[fixups_start, numfixups)` out of the emitter and stash them as a
    /// chunk on the top frame. Returns the fresh chunk id.
    pub fn yank_chunk(
        &mut self,
        scrip: &mut CompiledScript,
        src_line: u32,
        code_start: CodeLoc,
        fixups_start: usize,
    ) -> ChunkId {
        let code = scrip.code.split_off(code_start as usize);
        let fixups = scrip
            .fixups
            .split_off(fixups_start)
            .into_iter()
            .map(|f| Fixup {
                loc: f.loc - code_start,
                kind: f.kind,
            })
            .collect();

        self.chunk_id_ctr += 1;
        let id = self.chunk_id_ctr;
        self.top_mut().chunks.push(Chunk {
            id,
            src_line,
            code,
            fixups,
        });
        id
    }

    /// Replay a stashed chunk at the current code end, re-basing its fixups.
    /// Returns the chunk's id.
    pub fn write_chunk(
        &self,
        scrip: &mut CompiledScript,
        level: usize,
        chunk_idx: usize,
    ) -> ChunkId {
        let chunk = &self.stack[level].chunks[chunk_idx];

        // A line-number opcode so that runtime errors report the source
        // line the chunk came from, not the line it lands behind.
        if !chunk.code.is_empty() && chunk.code[0] != Opcode::LineNum.cell() && chunk.src_line > 0 {
            scrip.write_lineno(chunk.src_line);
        }

        let start_of_insert = scrip.codesize();
        for &cell in &chunk.code {
            scrip.write_cell(cell);
        }
        for fixup in &chunk.fixups {
            scrip.add_fixup(fixup.loc + start_of_insert, fixup.kind);
        }

        // Invalidate so the next command re-emits its line number.
        scrip.last_emitted_lineno = None;
        chunk.id
    }

    pub fn clear_chunks(&mut self) {
        self.top_mut().chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use questscript_bytecode::{FixupKind, Register};

    #[test]
    fn test_yank_then_write_is_identity_modulo_base() {
        let mut scrip = CompiledScript::new();
        let mut nest = NestingStack::new();
        scrip.refresh_lineno(5);

        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 3);
        scrip.fixup_previous(FixupKind::GlobalData);
        let snapshot = scrip.code.clone();

        let id = nest.yank_chunk(&mut scrip, 5, 0, 0);
        assert!(id > CODE_BASE_ID);
        assert!(scrip.code.is_empty());
        assert!(scrip.fixups.is_empty());

        let written = nest.write_chunk(&mut scrip, nest.top_level(), 0);
        assert_eq!(written, id);
        assert_eq!(scrip.code, snapshot);
        assert_eq!(scrip.fixups.len(), 1);
        assert_eq!(scrip.fixups[0].loc, snapshot.len() as CodeLoc - 1);
        // replaying invalidates the line bookkeeping
        assert_eq!(scrip.last_emitted_lineno, None);
    }

    #[test]
    fn test_write_chunk_rebases_fixups() {
        let mut scrip = CompiledScript::new();
        let mut nest = NestingStack::new();
        scrip.refresh_lineno(1);

        // something that stays in the code base
        scrip.write_cmd0(Opcode::Ret);
        let code_start = scrip.codesize();
        let fixups_start = scrip.fixups.len();

        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 0);
        scrip.fixup_previous(FixupKind::Import);
        nest.yank_chunk(&mut scrip, 1, code_start, fixups_start);

        scrip.write_cmd0(Opcode::Ret);
        let insert_at = scrip.codesize();
        nest.write_chunk(&mut scrip, nest.top_level(), 0);

        // chunk starts with its own LINENUM (first cell wasn't one)
        assert_eq!(scrip.code[insert_at as usize], Opcode::LineNum.cell());
        let fixup = scrip.fixups[0];
        assert_eq!(fixup.kind, FixupKind::Import);
        assert_eq!(scrip.code[fixup.loc as usize], 0);
    }

    #[test]
    fn test_old_definition_stash_rejects_duplicates() {
        let mut nest = NestingStack::new();
        nest.push(NestingType::Braces);
        let sym = Symbol(99);
        assert!(!nest.add_old_definition(sym, SymbolTableEntry::blank("x")));
        assert!(nest.add_old_definition(sym, SymbolTableEntry::blank("x")));
    }

    #[test]
    fn test_levels() {
        let mut nest = NestingStack::new();
        assert_eq!(nest.top_level(), 0);
        nest.push(NestingType::Parameters);
        nest.push(NestingType::Function);
        assert_eq!(nest.top_level(), 2);
        assert_eq!(nest.nest_type_at(1), NestingType::Parameters);
        nest.set_nest_type(NestingType::Braces);
        assert_eq!(nest.nest_type(), NestingType::Braces);
        nest.pop();
        assert_eq!(nest.top_level(), 1);
    }
}
