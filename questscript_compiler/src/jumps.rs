//! Forward-jump patch lists and backward-jump destinations.
//!
//! Both helpers track the last emitted source line so that a target reached
//! by jump *and* by fall-through gets a fresh `LINENUM` whenever the two
//! paths disagree.

use questscript_bytecode::{CodeCell, CodeLoc, Opcode};

use crate::emitter::CompiledScript;

/// Placeholder operands of jumps whose destination is not yet known.
///
/// `add_param` remembers the operand cell of the instruction just appended;
/// `patch` rewrites every remembered cell with the relative distance to the
/// current code end.
#[derive(Debug, Default)]
pub struct ForwardJump {
    param_locs: Vec<CodeLoc>,
    last_emitted_src_lineno: Option<u32>,
}

impl ForwardJump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the operand cell at `codesize + offset` (the operand of the
    /// instruction just appended, with the default offset of -1).
    pub fn add_param_at(&mut self, scrip: &CompiledScript, offset: i32) {
        // If the recorded lineno no longer matches, no single value works
        // for all jumps, so it must become invalid.
        if self.param_locs.is_empty() {
            self.last_emitted_src_lineno = scrip.last_emitted_lineno;
        } else if self.last_emitted_src_lineno != scrip.last_emitted_lineno {
            self.last_emitted_src_lineno = None;
        }
        self.param_locs.push(scrip.codesize() + offset);
    }

    pub fn add_param(&mut self, scrip: &CompiledScript) {
        self.add_param_at(scrip, -1);
    }

    pub fn is_empty(&self) -> bool {
        self.param_locs.is_empty()
    }

    /// Point every remembered jump at the current code end.
    pub fn patch(&mut self, scrip: &mut CompiledScript, cur_line: u32) {
        if !self.param_locs.is_empty() {
            // The next instruction can be reached through a jump or from the
            // previous instruction; if their source lines differ, a LINENUM
            // must come first.
            if Some(cur_line) != scrip.last_emitted_lineno
                || Some(cur_line) != self.last_emitted_src_lineno
            {
                scrip.last_emitted_lineno = None;
            }
        }
        for &loc in &self.param_locs {
            scrip.code[loc as usize] = CompiledScript::relative_jump_dist(loc, scrip.codesize());
        }
        self.param_locs.clear();
    }
}

/// A fixed jump destination for backward jumps.
#[derive(Debug, Default)]
pub struct BackwardJumpDest {
    dest: Option<CodeLoc>,
    last_emitted_src_lineno: Option<u32>,
}

impl BackwardJumpDest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the destination to the current code end.
    pub fn set_here(&mut self, scrip: &CompiledScript) {
        self.set(scrip, scrip.codesize());
    }

    pub fn set(&mut self, scrip: &CompiledScript, dest: CodeLoc) {
        self.dest = Some(dest);
        self.last_emitted_src_lineno = scrip.last_emitted_lineno;
    }

    pub fn get(&self) -> Option<CodeLoc> {
        self.dest
    }

    pub fn is_set(&self) -> bool {
        self.dest.is_some()
    }

    /// Append a jump back to the destination. If no `LINENUM` sits at the
    /// destination and lines have moved on since, emit one in front of the
    /// jump so the runtime reports the right line after looping.
    pub fn write_jump(&mut self, scrip: &mut CompiledScript, jump_op: Opcode, cur_line: u32) {
        let dest = self.dest.expect("backward jump destination never set");
        if scrip.code.get(dest as usize) != Some(&Opcode::LineNum.cell())
            && scrip.last_emitted_lineno != self.last_emitted_src_lineno
        {
            scrip.write_lineno(cur_line);
        }
        let dist: CodeCell = CompiledScript::relative_jump_dist(scrip.codesize() + 1, dest);
        scrip.write_cmd1(jump_op, dist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::instructions;
    use questscript_bytecode::Register;

    #[test]
    fn test_forward_jump_patch() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(1);
        let mut fj = ForwardJump::new();
        scrip.write_cmd1(Opcode::Jz, -77);
        fj.add_param(&scrip);
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 1);
        fj.patch(&mut scrip, 1);

        // the placeholder now holds the distance to the code end
        let jz_operand_loc = 3; // LINENUM, 1, JZ, d
        assert_eq!(
            scrip.code[jz_operand_loc],
            scrip.codesize() - jz_operand_loc as i32
        );
        assert!(fj.is_empty());
    }

    #[test]
    fn test_forward_jump_mixed_lines_invalidate() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(1);
        let mut fj = ForwardJump::new();
        scrip.write_cmd1(Opcode::Jz, -77);
        fj.add_param(&scrip);
        scrip.refresh_lineno(2);
        scrip.write_cmd1(Opcode::Jmp, -77);
        fj.add_param(&scrip);
        fj.patch(&mut scrip, 2);
        // lines disagreed, so the next instruction must re-emit LINENUM
        assert_eq!(scrip.last_emitted_lineno, None);
    }

    #[test]
    fn test_backward_jump_distance() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(1);
        let mut dest = BackwardJumpDest::new();
        dest.set_here(&scrip); // dest = 0
        scrip.write_cmd2(Opcode::Sub, Register::Ax.cell(), 1);
        dest.write_jump(&mut scrip, Opcode::Jnz, 1);

        let insns = instructions(&scrip.code);
        let (loc, op, args) = insns.last().copied().unwrap();
        assert_eq!(op, Opcode::Jnz);
        // jumping from the cell after the operand back to 0
        assert_eq!(args[0], 0 - (loc as i32 + 2));
    }
}
