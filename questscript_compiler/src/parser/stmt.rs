//! Statement parsing and the block-lifetime machinery.
//!
//! Every statement runs inside a function body at nesting level >= 1.
//! Locals are released in reverse order of acquisition on every exit path:
//! fall-through, `break`, `continue`, `return` and the function end. On a
//! jump out of a block the stack trim is emitted but the compile-time
//! `offset_to_local_var_block` is restored afterwards, because code below
//! the jump still owns those locals.

use questscript_bytecode::{CodeCell, Opcode, Register, SIZE_OF_DYNPOINTER, SIZE_OF_STACK_CELL};

use super::decl::DeclScope;
use super::{Parser, AX, BX, MAR, SP};
use crate::error::{CompileResult, ErrorKind};
use crate::jumps::BackwardJumpDest;
use crate::nesting::NestingType;
use crate::symbols::{
    predef, EntryFlags, Symbol, SymbolKind, SymbolTableEntry, TypeQualifierSet, Vartype,
    FUNCTION_SCOPE, PARAMETER_SCOPE,
};

impl<'t, 'c> Parser<'t, 'c> {
    /// One command inside a function body. `leading_sym` has been eaten.
    pub(crate) fn parse_command(&mut self, leading_sym: Symbol) -> CompileResult<()> {
        // Some branches leave this function directly; the rest fall through
        // to the compound-statement cascade below.
        match leading_sym {
            predef::BREAK => self.parse_break()?,

            predef::CASE | predef::DEFAULT => self.parse_switch_label(leading_sym)?,

            predef::CLOSE_BRACE => {
                // The scanner makes sure every close brace has its open.
                if self.nest.top_level() <= FUNCTION_SCOPE {
                    return self.handle_end_of_func_body();
                }
                self.parse_close_brace()?;
            }

            predef::CONTINUE => self.parse_continue()?,

            predef::DO => return self.parse_do(),

            predef::ELSE => {
                return Err(self.error(
                    ErrorKind::Syntax,
                    "Cannot find any 'if' clause that matches this 'else'",
                ))
            }

            predef::FOR => return self.parse_for(),

            predef::IF => return self.parse_if(),

            predef::OPEN_BRACE => {
                if self.nest.top_level() == PARAMETER_SCOPE {
                    return self.parse_func_body_start();
                }
                self.nest.push(NestingType::Braces);
                return Ok(());
            }

            predef::RETURN => self.parse_return()?,

            predef::SWITCH => self.parse_switch()?,

            // The end of a do..while() is handled in handle_end_of_do, so
            // this must start a while statement.
            predef::WHILE => return self.parse_while(),

            _ => {
                // No keyword: an assignment or an isolated expression.
                self.parse_assignment_or_expression(leading_sym)?;
                let semicolon = self.src.get_next();
                self.expect(predef::SEMICOLON, semicolon)?;
            }
        }

        // This statement may close several unbraced compound statements at
        // once, e.g. "while (...) if (...) i++;".
        self.handle_end_of_compound_stmts()
    }

    pub(crate) fn parse_assignment_or_expression(
        &mut self,
        _cursym: Symbol,
    ) -> CompileResult<()> {
        // The expression starts with the symbol in front of the cursor.
        self.src.back_up();
        let expr_start = self.src.get_cursor();
        self.skip_to_end_of_expression()?;
        let mut expression = self
            .src
            .select(expr_start, self.src.get_cursor() - expr_start);

        if expression.is_empty() {
            let next = self.src.get_next();
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Unexpected symbol '{}' at start of statement",
                    self.sym.name(next)
                ),
            ));
        }

        let nextsym = self.src.peek_next();
        if matches!(
            self.sym.kind(nextsym),
            SymbolKind::Assign | SymbolKind::AssignMod | SymbolKind::AssignSOp
        ) {
            self.src.get_next(); // Eat the assignment symbol
            return self.parse_assignment(nextsym, &mut expression);
        }

        // An isolated expression, e.g. a function call.
        let mut res = self.parse_expression_term(&mut expression)?;
        self.result_to_ax(&mut res);
        Ok(())
    }

    // ==================== Function body framing ====================

    /// The `{` at nesting level 1: the function body starts.
    pub(crate) fn parse_func_body_start(&mut self) -> CompileResult<()> {
        self.nest.push(NestingType::Function);

        // The base address for relocations of this function.
        let base = self.scrip.codesize();
        self.scrip.write_cmd1(Opcode::ThisBase, base);

        let func = self.name_of_current_func;
        if self.sym[func].flags.contains(EntryFlags::NO_LOOP_CHECK) {
            self.scrip.write_cmd0(Opcode::LoopCheckOff);
            self.sym[func].flags -= EntryFlags::NO_LOOP_CHECK;
        }

        // The caller pushed dynpointer parameters as plain cells. Catch up:
        // read each one and re-write it with MEMINITPTR so the cells are
        // declared to hold pointers from now on.
        let num_params = self.sym[func].num_params();
        for param_idx in 1..=num_params {
            let param_vartype = self.sym[func].param_vartypes[param_idx];
            if !self.sym.is_dyn_vartype(param_vartype) {
                continue;
            }
            // The return address tops the stack, so the nth parameter sits
            // at the (n+1)th position.
            self.scrip.write_cmd1(
                Opcode::LoadSpOffs,
                SIZE_OF_STACK_CELL as CodeCell * (param_idx as CodeCell + 1),
            );
            self.scrip.write_cmd1(Opcode::MemRead, AX);
            self.scrip.write_cmd1(Opcode::MemInitPtr, AX);
        }

        // Bind "this" without allocating any memory for it.
        self.sym[predef::THIS].vartype = Symbol::NONE;
        if !self.struct_of_current_func.is_none()
            && !self.sym[func].qualifiers.contains(TypeQualifierSet::STATIC)
        {
            let strct = self.struct_of_current_func;
            let this_entry = &mut self.sym[predef::THIS];
            this_entry.kind = SymbolKind::LocalVar;
            this_entry.vartype = strct; // not declared as a dynpointer
            this_entry.scope = 0;
            this_entry.qualifiers = TypeQualifierSet::READONLY;
            this_entry.flags = EntryFlags::ACCESSED | EntryFlags::STRUCT_VARTYPE;
            this_entry.offset = 0;
        }
        Ok(())
    }

    /// The `}` at nesting level <= 2: the function body ends.
    fn handle_end_of_func_body(&mut self) -> CompileResult<()> {
        // Free the dynpointers of parameters and locals.
        self.free_dynpointers_of_locals(1)?;
        // Pop the locals but leave the parameters: the return address sits
        // directly above them and RET still needs it. (The caller pops the
        // parameters afterwards.)
        self.remove_locals_from_stack(FUNCTION_SCOPE);
        // Everything including the parameters becomes invalid.
        self.remove_locals_from_symtable(PARAMETER_SCOPE);

        // Unless the function returns nothing, fall-through returns 0.
        let func = self.name_of_current_func;
        if self.sym[func].param_vartypes[0] != predef::VOID {
            self.scrip.write_cmd2(Opcode::LitToReg, AX, 0);
        }

        self.name_of_current_func = Symbol::NONE;
        self.struct_of_current_func = Symbol::NONE;

        // Unbind "this".
        let this_entry = &mut self.sym[predef::THIS];
        this_entry.kind = SymbolKind::Keyword;
        this_entry.vartype = Symbol::NONE;
        this_entry.qualifiers = TypeQualifierSet::empty();
        this_entry.flags = EntryFlags::empty();

        self.nest.pop(); // the function body level
        let cur_line = self.cur_line;
        self.nest
            .top_mut()
            .jump_out
            .patch(self.scrip, cur_line);
        self.nest.pop(); // the parameters level

        self.scrip.write_cmd0(Opcode::Ret);
        // RET pops the return address, so the offset to the start of the
        // parameters shrinks by one cell.
        self.scrip.offset_to_local_var_block -= SIZE_OF_STACK_CELL as i32;
        Ok(())
    }

    // ==================== Locals lifetime ====================

    fn stacksize_of_locals(&self, from_level: usize) -> u32 {
        let mut total_size = 0;
        for level in from_level..=self.nest.top_level() {
            for &s in self.nest.at(level).old_definitions.keys() {
                if self.sym.kind(s) == SymbolKind::LocalVar {
                    total_size += self.sym.size_of_var(s);
                }
            }
        }
        total_size
    }

    /// Whether values of this vartype contain releasable dynpointers.
    fn contains_releasable_dynpointers(&self, vartype: Vartype) -> bool {
        if self.sym.is_dyn_vartype(vartype) {
            return true;
        }
        if self.sym.is_array_vartype(vartype) {
            return self.contains_releasable_dynpointers(self.sym.get_vartype(vartype));
        }
        if !self.sym.is_struct_vartype(vartype) {
            return false; // atomic non-structs can't have pointers
        }
        self.sym
            .components_of_struct(vartype)
            .iter()
            .any(|&compo| self.contains_releasable_dynpointers(self.sym.get_vartype(compo)))
    }

    /// MAR points at a classic array of pointers; release each element.
    fn free_dynpointers_of_std_array_of_dynpointer(
        &mut self,
        num_of_elements: u32,
        clobbers_ax: &mut bool,
    ) {
        if num_of_elements == 0 {
            return;
        }

        if num_of_elements < 4 {
            self.scrip.write_cmd0(Opcode::MemZeroPtr);
            for _ in 1..num_of_elements {
                self.scrip
                    .write_cmd2(Opcode::Add, MAR, SIZE_OF_DYNPOINTER as CodeCell);
                self.scrip.write_cmd0(Opcode::MemZeroPtr);
            }
            return;
        }

        *clobbers_ax = true;
        self.scrip
            .write_cmd2(Opcode::LitToReg, AX, num_of_elements as CodeCell);

        let mut loop_start = BackwardJumpDest::new();
        loop_start.set_here(self.scrip);
        self.scrip.write_cmd0(Opcode::MemZeroPtr);
        self.scrip
            .write_cmd2(Opcode::Add, MAR, SIZE_OF_DYNPOINTER as CodeCell);
        self.scrip.write_cmd2(Opcode::Sub, AX, 1);
        loop_start.write_jump(self.scrip, Opcode::Jnz, self.cur_line);
    }

    /// MAR points at a struct; release all the pointers it contains.
    fn free_dynpointers_of_struct(&mut self, struct_vtype: Vartype, clobbers_ax: &mut bool) {
        let compo_list: Vec<Symbol> = self
            .sym
            .components_of_struct(struct_vtype)
            .into_iter()
            .filter(|&c| self.contains_releasable_dynpointers(self.sym.get_vartype(c)))
            .collect();

        let mut offset_so_far: i32 = 0;
        for (idx, &compo) in compo_list.iter().enumerate() {
            let compo_offset = self.sym[compo].offset;
            let compo_vartype = self.sym.get_vartype(compo);

            // Let MAR point to the component.
            let diff = compo_offset - offset_so_far;
            if diff > 0 {
                self.scrip.write_cmd2(Opcode::Add, MAR, diff);
            }
            offset_so_far = compo_offset;

            if self.sym.is_dyn_vartype(compo_vartype) {
                self.scrip.write_cmd0(Opcode::MemZeroPtr);
                continue;
            }

            let is_last = idx + 1 == compo_list.len();
            if !is_last {
                self.scrip.push_reg(Register::Mar);
            }
            if self.sym.is_array_vartype(compo_vartype) {
                self.free_dynpointers_of_std_array(compo, clobbers_ax);
            } else if self.sym.is_struct_vartype(compo_vartype) {
                self.free_dynpointers_of_struct(compo_vartype, clobbers_ax);
            }
            if !is_last {
                self.scrip.pop_reg(Register::Mar);
            }
        }
    }

    /// MAR points at a classic array of structs; release the pointers of
    /// every element.
    fn free_dynpointers_of_std_array_of_struct(
        &mut self,
        struct_vtype: Vartype,
        num_of_elements: u32,
        clobbers_ax: &mut bool,
    ) {
        *clobbers_ax = true;

        // AX counts the elements.
        self.scrip
            .write_cmd2(Opcode::LitToReg, AX, num_of_elements as CodeCell);

        let mut loop_start = BackwardJumpDest::new();
        loop_start.set_here(self.scrip);
        self.scrip.push_reg(Register::Mar);
        // Freeing a struct may call code that clobbers AX.
        self.scrip.push_reg(Register::Ax);
        self.free_dynpointers_of_struct(struct_vtype, clobbers_ax);
        self.scrip.pop_reg(Register::Ax);
        self.scrip.pop_reg(Register::Mar);
        let struct_size = self.sym.get_size(struct_vtype);
        self.scrip
            .write_cmd2(Opcode::Add, MAR, struct_size as CodeCell);
        self.scrip.write_cmd2(Opcode::Sub, AX, 1);
        loop_start.write_jump(self.scrip, Opcode::Jnz, self.cur_line);
    }

    /// MAR points at a classic array; release whatever pointers it holds.
    fn free_dynpointers_of_std_array(&mut self, the_array: Symbol, clobbers_ax: &mut bool) {
        let array_vartype = self.sym.get_vartype(the_array);
        let num_of_elements = self.sym.num_array_elements(array_vartype);
        if num_of_elements < 1 {
            return;
        }
        let element_vartype = self.sym.get_vartype(array_vartype);
        if self.sym.is_dynpointer_vartype(element_vartype) {
            self.free_dynpointers_of_std_array_of_dynpointer(num_of_elements, clobbers_ax);
            return;
        }
        if self.sym.is_struct_vartype(element_vartype) {
            self.free_dynpointers_of_std_array_of_struct(
                element_vartype,
                num_of_elements,
                clobbers_ax,
            );
        }
    }

    // The pointed-to structs cannot contain pointers in their turn; if
    // they ever do, releases must be chased at runtime, since pointer
    // rings keep reference counts above zero forever.

    fn free_dynpointers_of_locals0(
        &mut self,
        from_level: usize,
        clobbers_ax: &mut bool,
        clobbers_mar: &mut bool,
    ) -> CompileResult<()> {
        for level in from_level..=self.nest.top_level() {
            let symbols: Vec<Symbol> = self.nest.at(level).old_definitions.keys().copied().collect();
            for s in symbols {
                let s_vartype = self.sym.get_vartype(s);
                if !self.contains_releasable_dynpointers(s_vartype) {
                    continue;
                }

                // Point MAR at the construct that holds the pointers.
                let offset = self.scrip.offset_to_local_var_block - self.sym[s].offset;
                self.scrip.write_cmd1(Opcode::LoadSpOffs, offset);
                *clobbers_mar = true;

                if self.sym.is_dyn_vartype(s_vartype) {
                    self.scrip.write_cmd0(Opcode::MemZeroPtr);
                } else if self.sym.is_array_vartype(s_vartype) {
                    self.free_dynpointers_of_std_array(s, clobbers_ax);
                } else if self.sym.is_struct_vartype(s_vartype) {
                    self.free_dynpointers_of_struct(s_vartype, clobbers_ax);
                }
            }
        }
        Ok(())
    }

    /// Free the pointers of all locals above `from_level`.
    pub(crate) fn free_dynpointers_of_locals(&mut self, from_level: usize) -> CompileResult<()> {
        let mut dummy_ax = false;
        let mut dummy_mar = false;
        self.free_dynpointers_of_locals0(from_level, &mut dummy_ax, &mut dummy_mar)
    }

    /// Free all locals when AX holds a dynamic return value: shelter the
    /// pointer on the stack first so freeing can't drop its last reference,
    /// then take it back without touching the reference count.
    fn free_dynpointers_of_all_locals_dyn_result(&mut self) -> CompileResult<()> {
        let rp_before_precautions = crate::emitter::RestorePoint::new(self.scrip);

        // A shadow local dynpointer holds the return value.
        self.scrip.push_reg(Register::Ax);
        self.scrip
            .write_cmd1(Opcode::LoadSpOffs, SIZE_OF_DYNPOINTER as CodeCell);
        self.scrip.write_cmd1(Opcode::MemInitPtr, AX);

        let rp_before_freeing = crate::emitter::RestorePoint::new(self.scrip);
        let mut dummy_ax = false;
        let mut mar_may_be_clobbered = false;
        self.free_dynpointers_of_locals0(0, &mut dummy_ax, &mut mar_may_be_clobbered)?;
        let no_precautions_were_necessary = rp_before_freeing.is_empty(self.scrip);

        // Release the shadow with the opcode that never deallocates while
        // AX still references the object.
        if mar_may_be_clobbered {
            self.scrip
                .write_cmd1(Opcode::LoadSpOffs, SIZE_OF_DYNPOINTER as CodeCell);
        }
        self.scrip.write_cmd1(Opcode::MemReadPtr, AX);
        self.scrip.write_cmd0(Opcode::MemZeroPtrNd);
        self.scrip.pop_reg(Register::Bx); // do NOT pop AX here

        if no_precautions_were_necessary {
            rp_before_precautions.restore(self.scrip);
        }
        Ok(())
    }

    /// Free all local dynpointers without clobbering AX.
    fn free_dynpointers_of_all_locals_keep_ax(&mut self) -> CompileResult<()> {
        let rp_before_free = crate::emitter::RestorePoint::new(self.scrip);
        let mut clobbers_ax = false;
        let mut dummy_mar = false;
        self.free_dynpointers_of_locals0(0, &mut clobbers_ax, &mut dummy_mar)?;
        if !clobbers_ax {
            return Ok(());
        }

        // AX should have been saved, so redo the whole thing.
        rp_before_free.restore(self.scrip);
        self.scrip.push_reg(Register::Ax);
        self.free_dynpointers_of_locals0(0, &mut clobbers_ax, &mut dummy_mar)?;
        self.scrip.pop_reg(Register::Ax);
        Ok(())
    }

    /// Restore the shadowed definitions of all locals above `from_level`.
    fn remove_locals_from_symtable(&mut self, from_level: usize) {
        let last_level = self.nest.top_level();
        for level in from_level..=last_level {
            let stash: Vec<(Symbol, SymbolTableEntry)> = self
                .nest
                .at(level)
                .old_definitions
                .iter()
                .map(|(&s, entry)| (s, entry.clone()))
                .collect();
            for (s, old_entry) in stash {
                if self.sym.kind(s) != SymbolKind::LocalVar {
                    continue;
                }
                if old_entry.kind != SymbolKind::NoType {
                    // Restore the stashed definition.
                    self.sym[s] = old_entry;
                    continue;
                }
                let name = self.sym[s].name.clone();
                self.sym[s] = SymbolTableEntry::blank(name);
            }
        }
    }

    fn remove_locals_from_stack(&mut self, nesting_level: usize) {
        let size_of_local_vars = self.stacksize_of_locals(nesting_level);
        if size_of_local_vars > 0 {
            self.scrip.offset_to_local_var_block -= size_of_local_vars as i32;
            self.scrip
                .write_cmd2(Opcode::Sub, SP, size_of_local_vars as CodeCell);
        }
    }

    /// `}` (or the end of an unbraced body): free the block's locals.
    fn handle_end_of_brace_command(&mut self) -> CompileResult<()> {
        let depth = self.nest.top_level();
        self.free_dynpointers_of_locals(depth)?;
        self.remove_locals_from_stack(depth);
        self.remove_locals_from_symtable(depth);
        self.nest.pop();
        Ok(())
    }

    /// Close all unbraced compound statements the last statement ended.
    pub(crate) fn handle_end_of_compound_stmts(&mut self) -> CompileResult<()> {
        while self.nest.top_level() > FUNCTION_SCOPE {
            match self.nest.nest_type() {
                // Braces and switches only close on an explicit '}'.
                NestingType::Braces | NestingType::Switch => return Ok(()),

                NestingType::Do => self.handle_end_of_do()?,
                NestingType::Else => self.handle_end_of_else()?,
                NestingType::If => {
                    let else_follows = self.handle_end_of_if()?;
                    if else_follows {
                        return Ok(());
                    }
                }
                NestingType::While => self.handle_end_of_while()?,
                _ => {
                    return Err(self.error(ErrorKind::Internal, "Nesting of unknown type ends"));
                }
            }
        }
        Ok(())
    }

    // ==================== if / else ====================

    /// `if (E)`: the jump-out is patched when the branch ends.
    fn parse_if(&mut self) -> CompileResult<()> {
        self.parse_parenthesized_expression()?;

        self.nest.push(NestingType::If);

        // "if (AX == 0) jumpto X" where X is determined later.
        self.scrip.write_cmd1(Opcode::Jz, -77);
        let scrip = &mut *self.scrip;
        self.nest.top_mut().jump_out.add_param(scrip);
        Ok(())
    }

    fn handle_end_of_if(&mut self) -> CompileResult<bool> {
        let cur_line = self.cur_line;
        if self.src.peek_next() != predef::ELSE {
            self.nest.top_mut().jump_out.patch(self.scrip, cur_line);
            self.nest.pop();
            return Ok(false);
        }

        self.src.get_next(); // Eat 'else'
        // End of the "then" branch: jump out over the "else" branch.
        self.scrip.write_cmd1(Opcode::Jmp, -77);
        // The jump after the "if" condition lands here, at the start of
        // the "else" branch.
        self.nest.top_mut().jump_out.patch(self.scrip, cur_line);
        // Mark the out jump after the "then" branch for patching.
        let scrip = &mut *self.scrip;
        self.nest.top_mut().jump_out.add_param(scrip);
        // One 'else' per 'if'.
        self.nest.set_nest_type(NestingType::Else);
        Ok(true)
    }

    fn handle_end_of_else(&mut self) -> CompileResult<()> {
        let cur_line = self.cur_line;
        self.nest.top_mut().jump_out.patch(self.scrip, cur_line);
        self.nest.pop();
        Ok(())
    }

    // ==================== while / do ====================

    fn parse_while(&mut self) -> CompileResult<()> {
        // The start of the code that evaluates the condition.
        let condition_eval_loc = self.scrip.codesize();

        self.parse_parenthesized_expression()?;

        self.nest.push(NestingType::While);

        self.scrip.write_cmd1(Opcode::Jz, -77);
        let scrip = &mut *self.scrip;
        let top = self.nest.top_mut();
        top.jump_out.add_param(scrip);
        top.start.set(scrip, condition_eval_loc);
        Ok(())
    }

    fn handle_end_of_while(&mut self) -> CompileResult<()> {
        let cur_line = self.cur_line;

        // The inner level of a 'for' loop: drop the yanked iterate-clause
        // chunk back in.
        if self.nest.chunks_exist() {
            let write_start = self.scrip.codesize();
            let id = self
                .nest
                .write_chunk(self.scrip, self.nest.top_level(), 0);
            self.fcm.update_call_list_on_writing(write_start, id);
            self.fim.update_call_list_on_writing(write_start, id);
            self.nest.clear_chunks();
        }

        // Jump back to the condition.
        self.nest
            .top_mut()
            .start
            .write_jump(self.scrip, Opcode::Jmp, cur_line);

        // This ends the loop.
        self.nest.top_mut().jump_out.patch(self.scrip, cur_line);
        self.nest.pop();

        if self.nest.nest_type() != NestingType::For {
            return Ok(());
        }

        // The outer level of the 'for' can hold definitions, e.g.
        // "for (int i = 0; ...)". Free them like a braced block.
        self.handle_end_of_brace_command()
    }

    fn parse_do(&mut self) -> CompileResult<()> {
        self.nest.push(NestingType::Do);
        let scrip = &*self.scrip;
        self.nest.top_mut().start.set_here(scrip);
        Ok(())
    }

    fn handle_end_of_do(&mut self) -> CompileResult<()> {
        let while_sym = self.src.get_next();
        self.expect_msg(
            predef::WHILE,
            while_sym,
            Some("Expected the 'while' of a 'do ... while(...)' statement"),
        )?;

        self.parse_parenthesized_expression()?;

        let semicolon = self.src.get_next();
        self.expect(predef::SEMICOLON, semicolon)?;

        let cur_line = self.cur_line;
        // Jump back to the loop start while the condition holds.
        self.nest
            .top_mut()
            .start
            .write_jump(self.scrip, Opcode::Jnz, cur_line);
        // Jumps out of the loop land here.
        self.nest.top_mut().jump_out.patch(self.scrip, cur_line);
        self.nest.pop();
        Ok(())
    }

    // ==================== for ====================

    fn parse_for_init_clause_vardecl(&mut self) -> CompileResult<()> {
        let mut vartype = self.src.get_next();
        vartype = self.set_dynpointer_in_managed_vartype(vartype);
        self.eat_dynpointer_symbol_if_present(vartype)?;

        loop {
            let varname = self.src.get_next();
            let nextsym = self.src.peek_next();
            if nextsym == predef::SCOPE_RES || nextsym == predef::OPEN_PAREN {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Function definition not allowed in for loop initialiser",
                ));
            }

            self.parse_vardecl(varname, vartype, DeclScope::Local)?;

            let punctuation = self.src.peek_next();
            self.expect_any(&[predef::COMMA, predef::SEMICOLON], punctuation)?;
            if punctuation == predef::COMMA {
                self.src.get_next(); // Eat ','
            }
            if punctuation == predef::SEMICOLON {
                return Ok(());
            }
        }
    }

    fn parse_for_init_clause(&mut self, peeksym: Symbol) -> CompileResult<()> {
        if peeksym == predef::SEMICOLON {
            return Ok(()); // empty init clause
        }
        if self.sym.kind(peeksym) == SymbolKind::Vartype {
            return self.parse_for_init_clause_vardecl();
        }
        let cursym = self.src.get_next();
        self.parse_assignment_or_expression(cursym)
    }

    fn parse_for_while_clause(&mut self) -> CompileResult<()> {
        // Force a line-number opcode: the loop jumps back here.
        self.scrip.last_emitted_lineno = None;
        if self.src.peek_next() == predef::SEMICOLON {
            // No while clause means the condition "true".
            self.scrip.write_cmd2(Opcode::LitToReg, AX, 1);
            return Ok(());
        }
        self.parse_expression()
    }

    fn parse_for_iterate_clause(&mut self) -> CompileResult<()> {
        if self.src.peek_next() == predef::CLOSE_PAREN {
            return Ok(()); // empty iterate clause
        }
        let cursym = self.src.get_next();
        self.parse_assignment_or_expression(cursym)
    }

    /// "for (I; E; C) { ... }" is "{ I; while (E) { ...; C } }": an outer
    /// level for I, an inner While level for the loop proper. The emitted
    /// code of C is yanked as a chunk and replayed at the loop bottom and
    /// at every `continue`.
    fn parse_for(&mut self) -> CompileResult<()> {
        // Outer level.
        self.nest.push(NestingType::For);

        let paren = self.src.get_next();
        self.expect(predef::OPEN_PAREN, paren)?;

        let peeksym = self.src.peek_next();
        if peeksym == predef::CLOSE_PAREN {
            return Err(self.error(
                ErrorKind::Syntax,
                "Empty parentheses '()' aren't allowed after 'for' (write 'for(;;)' instead)",
            ));
        }

        // Initialization clause (I).
        self.parse_for_init_clause(peeksym)?;
        let semicolon = self.src.get_next();
        self.expect_msg(
            predef::SEMICOLON,
            semicolon,
            Some("Expected ';' after for loop initializer clause"),
        )?;

        // Where the condition code starts.
        let while_cond_loc = self.scrip.codesize();

        self.parse_for_while_clause()?;
        let semicolon = self.src.get_next();
        self.expect_msg(
            predef::SEMICOLON,
            semicolon,
            Some("Expected ';' after for loop while clause"),
        )?;

        // Where the iterate-clause code starts.
        let iterate_clause_loc = self.scrip.codesize();
        let iterate_clause_fixups_start = self.scrip.fixups.len();
        let iterate_clause_lineno = self.src.lineno();

        self.parse_for_iterate_clause()?;
        let paren = self.src.get_next();
        self.expect_msg(
            predef::CLOSE_PAREN,
            paren,
            Some("Expected ')' after for loop iterate clause"),
        )?;

        // Inner nesting level.
        self.nest.push(NestingType::While);
        {
            let scrip = &*self.scrip;
            self.nest.top_mut().start.set(scrip, while_cond_loc);
        }

        // The iterate-clause code was just emitted but belongs at the
        // bottom of the loop; rip it out and stash it.
        let yank_size = (self.scrip.codesize() - iterate_clause_loc) as usize;
        let id = self.nest.yank_chunk(
            self.scrip,
            iterate_clause_lineno,
            iterate_clause_loc,
            iterate_clause_fixups_start,
        );
        self.fcm
            .update_call_list_on_yanking(iterate_clause_loc, yank_size, id);
        self.fim
            .update_call_list_on_yanking(iterate_clause_loc, yank_size, id);

        // "If the condition is false, jump over the loop body."
        self.scrip.write_cmd1(Opcode::Jz, -77);
        let scrip = &mut *self.scrip;
        self.nest.top_mut().jump_out.add_param(scrip);
        Ok(())
    }

    // ==================== switch ====================

    fn parse_switch(&mut self) -> CompileResult<()> {
        // Evaluate the switch expression.
        self.parse_parenthesized_expression()?;

        // Remember its vartype to enforce it on the case labels.
        let switch_expr_vartype = self.scrip.ax_vartype;

        // The case comparisons expect the value in BX.
        self.scrip.write_cmd2(Opcode::RegToReg, AX, BX);

        let brace = self.src.get_next();
        self.expect(predef::OPEN_BRACE, brace)?;

        self.nest.push(NestingType::Switch);
        self.nest.top_mut().switch_expr_vartype = switch_expr_vartype;

        // Jump to the as-yet-unwritten jump table.
        self.scrip.write_cmd1(Opcode::Jmp, -77);
        let scrip = &mut *self.scrip;
        self.nest.top_mut().switch_jumptable.add_param(scrip);

        if self.src.reached_eof() {
            return Err(self.error(ErrorKind::Syntax, "Unexpected end of input"));
        }
        self.expect_any(
            &[predef::DEFAULT, predef::CASE, predef::CLOSE_BRACE],
            self.src.peek_next(),
        )
    }

    fn parse_switch_label(&mut self, case_or_default: Symbol) -> CompileResult<()> {
        if self.nest.nest_type() != NestingType::Switch {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "'{}' is only allowed directly within a 'switch' block",
                    self.sym.name(case_or_default)
                ),
            ));
        }

        if case_or_default == predef::DEFAULT {
            if self.nest.top().switch_default.is_set() {
                return Err(self.error(
                    ErrorKind::Semantic,
                    "This switch block already has a 'default' label",
                ));
            }
            let scrip = &*self.scrip;
            self.nest.top_mut().switch_default.set_here(scrip);
        } else {
            // "case": compile the comparison expression, then rip it out
            // into a chunk for the jump table at the end of the switch.
            let start_of_code_loc = self.scrip.codesize();
            let start_of_fixups = self.scrip.fixups.len();
            let start_of_code_lineno = self.src.lineno();

            // The switch expression value.
            self.scrip.push_reg(Register::Bx);

            self.parse_expression()?;

            // The case and switch expressions must have matching vartypes.
            let switch_expr_vartype = self.nest.top().switch_expr_vartype;
            self.check_vartype_mismatch(self.scrip.ax_vartype, switch_expr_vartype, false)?;

            self.scrip.pop_reg(Register::Bx);

            let yank_size = (self.scrip.codesize() - start_of_code_loc) as usize;
            let id = self.nest.yank_chunk(
                self.scrip,
                start_of_code_lineno,
                start_of_code_loc,
                start_of_fixups,
            );
            self.fcm
                .update_call_list_on_yanking(start_of_code_loc, yank_size, id);
            self.fim
                .update_call_list_on_yanking(start_of_code_loc, yank_size, id);

            let mut case_code_start = BackwardJumpDest::new();
            case_code_start.set_here(self.scrip);
            self.nest.top_mut().switch_cases.push(case_code_start);
        }

        let colon = self.src.get_next();
        self.expect(predef::COLON, colon)
    }

    fn handle_end_of_switch(&mut self) -> CompileResult<()> {
        let cur_line = self.cur_line;

        // Without a terminating break in the last case, a jump to the
        // jump-out point prevents falling into the jump table.
        let lastcmd_loc = self.scrip.codesize() - 2;
        if lastcmd_loc < 0
            || self.scrip.code.get(lastcmd_loc as usize) != Some(&Opcode::Jmp.cell())
        {
            self.scrip.write_cmd1(Opcode::Jmp, -77);
            let scrip = &mut *self.scrip;
            self.nest.top_mut().jump_out.add_param(scrip);
        }

        // The jump table begins here.
        self.nest
            .top_mut()
            .switch_jumptable
            .patch(self.scrip, cur_line);

        // Strings compare as strings, not as pointers.
        let switch_expr_vartype = self.nest.top().switch_expr_vartype;
        let eq_opcode = if self.sym.is_any_string_vartype(switch_expr_vartype) {
            Opcode::StringsEqual
        } else {
            Opcode::IsEqual
        };

        let number_of_cases = self.nest.top().chunks.len();
        for cases_idx in 0..number_of_cases {
            // Replay the case expression; its result lands in AX.
            let codesize = self.scrip.codesize();
            let id = self
                .nest
                .write_chunk(self.scrip, self.nest.top_level(), cases_idx);
            self.fcm.update_call_list_on_writing(codesize, id);
            self.fim.update_call_list_on_writing(codesize, id);

            self.scrip.write_cmd2(eq_opcode, AX, BX);
            self.nest.top_mut().switch_cases[cases_idx].write_jump(
                self.scrip,
                Opcode::Jnz,
                cur_line,
            );
        }

        if self.nest.top().switch_default.is_set() {
            self.nest
                .top_mut()
                .switch_default
                .write_jump(self.scrip, Opcode::Jmp, cur_line);
        }

        self.nest.top_mut().jump_out.patch(self.scrip, cur_line);
        self.nest.pop();
        Ok(())
    }

    fn parse_close_brace(&mut self) -> CompileResult<()> {
        if self.nest.nest_type() == NestingType::Switch {
            return self.handle_end_of_switch();
        }
        self.handle_end_of_brace_command()
    }

    // ==================== break / continue / return ====================

    fn parse_break(&mut self) -> CompileResult<()> {
        let semicolon = self.src.get_next();
        self.expect(predef::SEMICOLON, semicolon)?;

        // The level of the construct the break applies to. Similar to, but
        // different from, continue: break also stops at a switch.
        let mut nesting_level = self.nest.top_level();
        while nesting_level > 0 {
            let ltype = self.nest.nest_type_at(nesting_level);
            if matches!(
                ltype,
                NestingType::Do | NestingType::Switch | NestingType::While
            ) {
                break;
            }
            nesting_level -= 1;
        }

        if nesting_level == 0 {
            return Err(self.error(
                ErrorKind::Semantic,
                "'break' is only valid inside a loop or a switch statement block",
            ));
        }

        let save_offset = self.scrip.offset_to_local_var_block;
        self.free_dynpointers_of_locals(nesting_level + 1)?;
        self.remove_locals_from_stack(nesting_level + 1);

        // Jump out of the construct.
        self.scrip.write_cmd1(Opcode::Jmp, -77);
        let scrip = &mut *self.scrip;
        self.nest.at_mut(nesting_level).jump_out.add_param(scrip);

        // The locals only disappear if control flow actually passes the
        // break; below it they still sit on the stack.
        self.scrip.offset_to_local_var_block = save_offset;
        Ok(())
    }

    fn parse_continue(&mut self) -> CompileResult<()> {
        let semicolon = self.src.get_next();
        self.expect(predef::SEMICOLON, semicolon)?;

        // The level of the loop the continue applies to.
        let mut nesting_level = self.nest.top_level();
        while nesting_level > 0 {
            let ltype = self.nest.nest_type_at(nesting_level);
            if matches!(ltype, NestingType::Do | NestingType::While) {
                break;
            }
            nesting_level -= 1;
        }

        if nesting_level == 0 {
            return Err(self.error(
                ErrorKind::Semantic,
                "'continue' is only valid inside a loop",
            ));
        }

        let save_offset = self.scrip.offset_to_local_var_block;
        self.free_dynpointers_of_locals(nesting_level + 1)?;
        self.remove_locals_from_stack(nesting_level + 1);

        // In a 'for', drop the yanked iterate-clause chunk in first.
        if self.nest.chunks_exist_at(nesting_level) {
            let write_start = self.scrip.codesize();
            let id = self.nest.write_chunk(self.scrip, nesting_level, 0);
            self.fcm.update_call_list_on_writing(write_start, id);
            self.fim.update_call_list_on_writing(write_start, id);
        }

        // Jump back to the loop start.
        let cur_line = self.cur_line;
        self.nest
            .at_mut(nesting_level)
            .start
            .write_jump(self.scrip, Opcode::Jmp, cur_line);

        // See parse_break for why the offset is restored.
        self.scrip.offset_to_local_var_block = save_offset;
        Ok(())
    }

    fn parse_return(&mut self) -> CompileResult<()> {
        let function_return_vartype = self.sym[self.name_of_current_func].param_vartypes[0];

        if self.src.peek_next() != predef::SEMICOLON {
            if function_return_vartype == predef::VOID {
                return Err(self.error(
                    ErrorKind::Semantic,
                    "Cannot return value from void function",
                ));
            }

            self.parse_expression()?;

            self.convert_ax_string_to_string_object(function_return_vartype);
            self.check_vartype_mismatch(self.scrip.ax_vartype, function_return_vartype, true)?;

            if self.sym.is_oldstring(self.scrip.ax_vartype)
                && self.scrip.ax_scope_type == crate::emitter::ScopeType::Local
            {
                return Err(self.error(
                    ErrorKind::Semantic,
                    "Cannot return local string from function",
                ));
            }
        } else if self.sym.is_any_integer_vartype(function_return_vartype) {
            self.scrip.write_cmd2(Opcode::LitToReg, AX, 0);
        } else if function_return_vartype != predef::VOID {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Must return a '{}' value from function",
                    self.sym.name(function_return_vartype)
                ),
            ));
        }

        let semicolon = self.src.get_next();
        self.expect(predef::SEMICOLON, semicolon)?;

        // Free the local dynpointers, preserving the returned value.
        if self.sym.is_dyn_vartype(function_return_vartype) {
            self.free_dynpointers_of_all_locals_dyn_result()?;
        } else if function_return_vartype != predef::VOID {
            self.free_dynpointers_of_all_locals_keep_ax()?;
        } else {
            self.free_dynpointers_of_locals(0)?;
        }

        let save_offset = self.scrip.offset_to_local_var_block;
        // Pop the locals but leave the parameters; the return address sits
        // directly above them.
        self.remove_locals_from_stack(FUNCTION_SCOPE);

        // Jump to the function's single exit point.
        self.scrip.write_cmd1(Opcode::Jmp, 0);
        let scrip = &mut *self.scrip;
        self.nest.at_mut(PARAMETER_SCOPE).jump_out.add_param(scrip);

        // Below the return the locals still exist; restore the offset.
        self.scrip.offset_to_local_var_block = save_offset;
        Ok(())
    }
}
