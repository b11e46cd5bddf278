//! Data access: reading and writing variables, literals, struct component
//! cascades, array elements, attributes and function calls.
//!
//! MAR is set lazily through a [`MemoryLocation`] accumulator so that
//! compile-time-known offsets fold into a single instruction. Array offsets
//! are computed at run time; struct component offsets at compile time.

use questscript_bytecode::{
    CodeCell, Opcode, Register, SIZE_OF_STACK_CELL, STRINGBUFFER_LENGTH,
};

use super::expr::{read_cmd_for_size, write_cmd_for_size};
use super::{EvalResult, Parser, ValueLocation, AX, BX, CX, DX, MAR, OP, SP};
use crate::emitter::{CompiledScript, ScopeType};
use crate::error::{CompileResult, ErrorKind};
use crate::symbols::{
    predef, Symbol, SymbolKind, TypeQualifierSet, Vartype, VartypeModifier,
};
use crate::source::SrcList;
use questscript_bytecode::FixupKind;

/// Accumulates the parts of a memory address until MAR must actually be
/// loaded.
#[derive(Debug)]
pub struct MemoryLocation {
    scope_type: ScopeType,
    start_offs: i32,
    component_offs: i32,
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocation {
    pub fn new() -> Self {
        Self {
            scope_type: ScopeType::None,
            start_offs: 0,
            component_offs: 0,
        }
    }

    /// Bind the accumulator to a variable's storage. Returns false when it
    /// is already bound.
    fn set_start(&mut self, scope_type: ScopeType, offset: i32) -> bool {
        if self.scope_type != ScopeType::None {
            return false;
        }
        self.scope_type = scope_type;
        self.start_offs = offset;
        self.component_offs = 0;
        true
    }

    fn add_component_offset(&mut self, offset: i32) {
        self.component_offs += offset;
    }

    fn reset(&mut self) {
        self.scope_type = ScopeType::None;
        self.start_offs = 0;
        self.component_offs = 0;
    }
}

impl<'t, 'c> Parser<'t, 'c> {
    /// Emit whatever it takes for MAR to hold the accumulated address, then
    /// reset the accumulator.
    pub(crate) fn make_mar_current(&mut self, mloc: &mut MemoryLocation) -> CompileResult<()> {
        match mloc.scope_type {
            ScopeType::None => {
                // The start has already been reached (e.g. after a
                // dynpointer dereference); only the component offset may
                // remain.
                if mloc.component_offs > 0 {
                    self.scrip
                        .write_cmd2(Opcode::Add, MAR, mloc.component_offs);
                }
            }
            ScopeType::Global => {
                self.scrip.refresh_lineno(self.cur_line);
                self.scrip.write_cmd2(
                    Opcode::LitToReg,
                    MAR,
                    mloc.start_offs + mloc.component_offs,
                );
                self.scrip.fixup_previous(FixupKind::GlobalData);
            }
            ScopeType::Import => {
                // The linker turns the import ordinal into an address, so
                // the component offset must be added separately.
                self.scrip.refresh_lineno(self.cur_line);
                self.scrip
                    .write_cmd2(Opcode::LitToReg, MAR, mloc.start_offs);
                self.scrip.fixup_previous(FixupKind::Import);
                if mloc.component_offs != 0 {
                    self.scrip
                        .write_cmd2(Opcode::Add, MAR, mloc.component_offs);
                }
            }
            ScopeType::Local => {
                self.scrip.refresh_lineno(self.cur_line);
                let offset =
                    self.scrip.offset_to_local_var_block - mloc.start_offs - mloc.component_offs;
                if offset < 0 {
                    // Must be a bug: that memory is unused.
                    return Err(self.error(
                        ErrorKind::Internal,
                        format!("Trying to emit the negative offset {} to the top-of-stack", offset),
                    ));
                }
                self.scrip.write_cmd1(Opcode::LoadSpOffs, offset);
            }
        }
        mloc.reset();
        Ok(())
    }

    // ==================== The access cascade ====================

    /// Whether the rest of the access chain contains no further `.`.
    fn access_data_is_clause_last(&self, expression: &SrcList) -> bool {
        let mut probe = *expression;
        Parser::skip_to(&mut probe, &[predef::DOT]);
        probe.peek_next() != predef::DOT
    }

    /// Access a variable, constant, literal, function call, or a
    /// `struct.component.component` cascade for reading or writing.
    ///
    /// On return the value is in AX or pointed to by MAR per the result's
    /// `vloc`. When an attribute is selected for writing, the attribute
    /// component is *not* consumed and `vloc` is `Attribute`; the caller
    /// compiles the setter.
    pub(crate) fn access_data(
        &mut self,
        writing: bool,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        if expression.is_empty() {
            return Err(self.error(ErrorKind::Internal, "Empty expression"));
        }
        self.update_line_from(expression);

        let mut mloc = MemoryLocation::new();
        let clause_is_last = self.access_data_is_clause_last(expression);

        // If we are writing, all accesses except the last are reads.
        let mut implied_this_dot = false;
        let mut static_access = false;
        let mut res = self.access_data_first_clause(
            writing && clause_is_last,
            expression,
            &mut mloc,
            &mut implied_this_dot,
            &mut static_access,
        )?;

        let mut outer_vartype = Symbol::NONE;
        while expression.peek_next() == predef::DOT || implied_this_dot {
            if !implied_this_dot {
                expression.get_next(); // Eat '.'
            }
            outer_vartype = res.vartype;

            // A dynpointer in front of '.' dereferences automatically.
            if self.sym.is_dynpointer_vartype(res.vartype) {
                self.access_data_dereference(&mut res.vloc, &mut mloc)?;
                res.vartype = self
                    .sym
                    .vartype_without(VartypeModifier::Dynpointer, res.vartype);
            }

            if !self.sym.is_struct_vartype(res.vartype) || !self.sym.is_atomic(res.vartype) {
                if self.sym.is_array_vartype(res.vartype)
                    || self.sym.is_dynarray_vartype(res.vartype)
                {
                    return Err(self.error(
                        ErrorKind::Type,
                        "Expected a struct in front of '.' but found an array instead",
                    ));
                }
                return Err(self.error(
                    ErrorKind::Type,
                    format!(
                        "Expected a struct in front of '.' but found an expression of type '{}' instead",
                        self.sym.name(outer_vartype)
                    ),
                ));
            }

            if expression.reached_eof() {
                return Err(self.error(
                    ErrorKind::Syntax,
                    "Expected struct component after '.' but did not find it",
                ));
            }

            let clause_is_last = self.access_data_is_clause_last(expression);
            self.access_data_subsequent_clause(
                clause_is_last && writing,
                implied_this_dot,
                static_access,
                expression,
                &mut res,
                &mut mloc,
            )?;

            // The next component access depends on the current one, no
            // longer on "this", and can't be static.
            implied_this_dot = false;
            static_access = false;
        }

        if res.vloc == ValueLocation::Attribute {
            // The caller does the assignment; for that it needs the type
            // of the struct the attribute lives in.
            res.vartype = self.sym.base_vartype(outer_vartype);
            return Ok(res);
        }

        if res.vloc == ValueLocation::AxIsValue {
            self.scrip.ax_vartype = res.vartype;
            self.scrip.ax_scope_type = res.scope;
            return Ok(res);
        }

        self.make_mar_current(&mut mloc)?;
        Ok(res)
    }

    fn access_data_first_clause(
        &mut self,
        writing: bool,
        expression: &mut SrcList<'t>,
        mloc: &mut MemoryLocation,
        implied_this_dot: &mut bool,
        static_access: &mut bool,
    ) -> CompileResult<EvalResult> {
        expression.start_read();
        *implied_this_dot = false;

        let first_sym = expression.peek_next();

        if first_sym == predef::THIS {
            expression.get_next(); // Eat 'this'
            let vartype = self.sym.get_vartype(predef::THIS);
            if vartype.is_none() {
                return Err(self.error(
                    ErrorKind::Semantic,
                    "'this' is only legal in non-static struct functions",
                ));
            }
            self.scrip.write_cmd2(Opcode::RegToReg, OP, MAR);
            self.scrip.write_cmd0(Opcode::CheckNull);
            mloc.reset();
            if expression.peek_next() == predef::DOT {
                expression.get_next(); // Eat '.'
                // Going forward, "this." is implied.
                *implied_this_dot = true;
            }
            return Ok(EvalResult {
                vloc: ValueLocation::MarPointsToValue,
                scope: ScopeType::Local,
                vartype,
            });
        }

        match self.sym.kind(first_sym) {
            SymbolKind::Constant if !writing => {
                let vartype = self.access_data_int_literal_or_const(false, expression)?;
                Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                })
            }

            SymbolKind::Function => {
                let vartype = self.access_data_function_call(first_sym, expression, mloc)?;
                let mut res = EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                };
                if self.sym.is_dynarray_vartype(res.vartype) {
                    self.access_data_process_any_array_index(expression, &mut res, mloc)?;
                }
                Ok(res)
            }

            SymbolKind::GlobalVar => {
                self.mark_accessed(first_sym);
                let mut res = EvalResult {
                    vloc: ValueLocation::MarPointsToValue,
                    scope: ScopeType::Global,
                    vartype: Symbol::NONE,
                };
                self.access_data_global_or_local_var(true, writing, expression, mloc, &mut res)?;
                Ok(res)
            }

            SymbolKind::Keyword if first_sym == predef::NULL && !writing => {
                expression.get_next(); // Eat 'null'
                self.scrip.write_cmd2(Opcode::LitToReg, AX, 0);
                self.scrip.ax_vartype = predef::NULL;
                self.scrip.ax_scope_type = ScopeType::Global;
                Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype: predef::NULL,
                })
            }

            SymbolKind::LiteralFloat if !writing => {
                let vartype = self.access_data_float_literal(false, expression)?;
                Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                })
            }

            SymbolKind::LiteralInt if !writing => {
                let vartype = self.access_data_int_literal_or_const(false, expression)?;
                Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                })
            }

            SymbolKind::LiteralString if !writing => {
                let lit = expression.get_next();
                self.scrip
                    .write_cmd2(Opcode::LitToReg, AX, self.sym[lit].offset);
                self.scrip.fixup_previous(FixupKind::String);
                let vartype = self
                    .sym
                    .vartype_with(VartypeModifier::Const, predef::STRING);
                self.scrip.ax_vartype = vartype;
                Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                })
            }

            SymbolKind::LocalVar => {
                // Parameters are allocated by the caller, outside of the
                // function proper, so values read from them count as global.
                let scope = if self.sym[first_sym].is_parameter() {
                    ScopeType::Global
                } else {
                    ScopeType::Local
                };
                let mut res = EvalResult {
                    vloc: ValueLocation::MarPointsToValue,
                    scope,
                    vartype: Symbol::NONE,
                };
                self.access_data_global_or_local_var(false, writing, expression, mloc, &mut res)?;
                Ok(res)
            }

            SymbolKind::Vartype => {
                expression.get_next(); // Eat the vartype
                *static_access = true;
                mloc.reset();
                Ok(EvalResult {
                    vloc: ValueLocation::MarPointsToValue,
                    scope: ScopeType::Global,
                    vartype: first_sym,
                })
            }

            _ => {
                // An unknown symbol that resolves as a component of 'this'
                // is read as "this.<symbol>".
                let this_vartype = self.sym.get_vartype(predef::THIS);
                if !this_vartype.is_none() {
                    let thiscomponent = self.sym.mangle(this_vartype, first_sym);
                    if self.sym.kind(thiscomponent) != SymbolKind::NoType {
                        self.scrip.write_cmd2(Opcode::RegToReg, OP, MAR);
                        self.scrip.write_cmd0(Opcode::CheckNull);
                        mloc.reset();
                        // The component is re-read by the subsequent-clause
                        // handling with "this." implied.
                        *implied_this_dot = true;
                        return Ok(EvalResult {
                            vloc: ValueLocation::MarPointsToValue,
                            scope: ScopeType::Local,
                            vartype: this_vartype,
                        });
                    }
                }
                if writing && self.sym.kind(first_sym) != SymbolKind::NoType {
                    return Err(self.error(
                        ErrorKind::Type,
                        format!("Cannot assign a value to '{}'", self.sym.name(first_sym)),
                    ));
                }
                Err(self.error(
                    ErrorKind::Syntax,
                    format!("Unexpected '{}'", self.sym.name(expression.get_next())),
                ))
            }
        }
    }

    /// One `.component` clause after the first.
    fn access_data_subsequent_clause(
        &mut self,
        writing: bool,
        access_via_this: bool,
        static_access: bool,
        expression: &mut SrcList<'t>,
        res: &mut EvalResult,
        mloc: &mut MemoryLocation,
    ) -> CompileResult<()> {
        let next_sym = expression.peek_next();

        let component = self.find_component_in_struct(res.vartype, next_sym);
        let component_kind = component
            .map(|c| self.sym.kind(c))
            .unwrap_or(SymbolKind::NoType);

        if static_access {
            if let Some(component) = component {
                if !self.sym[component]
                    .qualifiers
                    .contains(TypeQualifierSet::STATIC)
                {
                    return Err(self.error(
                        ErrorKind::Semantic,
                        format!(
                            "Must specify a specific struct for non-static component {}",
                            self.sym.name(component)
                        ),
                    ));
                }
            }
        }

        match component_kind {
            SymbolKind::Attribute => {
                let component = component.expect("attribute component resolved");
                // Make MAR point to the struct of the attribute.
                self.make_mar_current(mloc)?;
                if writing {
                    // The assignment sink compiles the setter; leave the
                    // component in the stream for it.
                    res.vartype = self.sym.get_vartype(component);
                    res.vloc = ValueLocation::Attribute;
                    return Ok(());
                }
                res.vloc = ValueLocation::AxIsValue;
                let mut vartype = res.vartype;
                self.access_data_call_attribute_func(false, expression, &mut vartype)?;
                res.vartype = vartype;
                Ok(())
            }

            SymbolKind::Function => {
                let component = component.expect("function component resolved");
                res.vloc = ValueLocation::AxIsValue;
                res.scope = ScopeType::Local;
                res.vartype = self.access_data_function_call(component, expression, mloc)?;
                if self.sym.is_dynarray_vartype(res.vartype) {
                    self.access_data_process_any_array_index(expression, res, mloc)?;
                }
                Ok(())
            }

            SymbolKind::StructComponent => {
                let component = component.expect("struct component resolved");
                res.vloc = ValueLocation::MarPointsToValue;
                self.access_data_struct_member(
                    component,
                    writing,
                    access_via_this,
                    expression,
                    mloc,
                    res,
                )?;
                self.access_data_process_any_array_index(expression, res, mloc)
            }

            _ => Err(self.error(
                ErrorKind::Reference,
                format!(
                    "Expected a component of '{}', found '{}' instead",
                    self.sym.name(res.vartype),
                    self.sym.name(next_sym)
                ),
            )),
        }
    }

    /// A plain data member: add its compile-time offset and continue.
    fn access_data_struct_member(
        &mut self,
        component: Symbol,
        writing: bool,
        access_via_this: bool,
        expression: &mut SrcList<'t>,
        mloc: &mut MemoryLocation,
        res: &mut EvalResult,
    ) -> CompileResult<()> {
        expression.get_next(); // Eat the component

        let qualifiers = self.sym[component].qualifiers;
        if writing && qualifiers.contains(TypeQualifierSet::WRITEPROTECTED) && !access_via_this {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Writeprotected component '{}' must not be modified from outside",
                    self.sym.name(component)
                ),
            ));
        }
        if qualifiers.contains(TypeQualifierSet::PROTECTED) && !access_via_this {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Protected component '{}' must not be accessed from outside",
                    self.sym.name(component)
                ),
            ));
        }

        mloc.add_component_offset(self.sym[component].offset);
        res.vartype = self.sym.get_vartype(component);
        Ok(())
    }

    /// Walk the ancestor chain for the struct that owns `component`.
    pub(crate) fn find_struct_of_component(
        &mut self,
        strct: Vartype,
        component: Symbol,
    ) -> Option<Symbol> {
        let mut cur = strct;
        while !cur.is_none() {
            let mangled = self.sym.mangle(cur, component);
            if self.sym.kind(mangled) != SymbolKind::NoType {
                return Some(cur);
            }
            cur = self.sym[cur].parent;
        }
        None
    }

    /// The mangled component symbol, searched through the ancestor chain.
    pub(crate) fn find_component_in_struct(
        &mut self,
        strct: Vartype,
        component: Symbol,
    ) -> Option<Symbol> {
        let mut cur = strct;
        while !cur.is_none() {
            let mangled = self.sym.mangle(cur, component);
            if self.sym.kind(mangled) != SymbolKind::NoType {
                return Some(mangled);
            }
            cur = self.sym[cur].parent;
        }
        None
    }

    // ==================== Dereference and array indexing ====================

    /// MAR (or AX) holds a pointer; make MAR point to the pointed-to data.
    fn access_data_dereference(
        &mut self,
        vloc: &mut ValueLocation,
        mloc: &mut MemoryLocation,
    ) -> CompileResult<()> {
        if *vloc == ValueLocation::AxIsValue {
            self.scrip.write_cmd2(Opcode::RegToReg, AX, MAR);
            self.scrip.write_cmd0(Opcode::CheckNull);
            *vloc = ValueLocation::MarPointsToValue;
            mloc.reset();
        } else {
            self.make_mar_current(mloc)?;
            // CHECKNULL tests MAR itself, so load m[MAR] into MAR first.
            self.scrip.write_cmd1(Opcode::MemReadPtr, MAR);
            self.scrip.write_cmd0(Opcode::CheckNull);
        }
        Ok(())
    }

    fn access_data_process_array_index_constant(
        &mut self,
        idx: usize,
        index_symbol: Symbol,
        negate: bool,
        num_array_elements: u32,
        element_size: u32,
        mloc: &mut MemoryLocation,
    ) -> CompileResult<()> {
        let array_index = self.int_literal_or_const_to_value(
            index_symbol,
            negate,
            &format!("Error parsing array index #{}", idx + 1),
        )?;
        if array_index < 0 {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Array index #{} is {}, thus out of bounds (minimum is 0)",
                    idx + 1,
                    array_index
                ),
            ));
        }
        if num_array_elements > 0 && array_index as u32 >= num_array_elements {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Array index #{} is {}, thus out of bounds (maximum is {})",
                    idx + 1,
                    array_index,
                    num_array_elements - 1
                ),
            ));
        }
        mloc.add_component_offset(array_index * element_size as i32);
        Ok(())
    }

    fn access_data_process_current_array_index(
        &mut self,
        idx: usize,
        dim: u32,
        factor: u32,
        is_dynarray: bool,
        expression: &mut SrcList<'t>,
        mloc: &mut MemoryLocation,
    ) -> CompileResult<()> {
        // Carve out the index expression.
        let index_start = expression.get_cursor();
        Parser::skip_to(expression, &[predef::COMMA, predef::CLOSE_BRACKET]);
        let index_end = expression.get_cursor();
        let mut current_index = expression.select(index_start, index_end - index_start);
        if current_index.is_empty() {
            return Err(self.error(ErrorKind::Syntax, "Empty array index is not supported"));
        }

        // A literal or constant index (or a negation of one) on a classic
        // array folds at compile time. Dynarray lengths are only known at
        // run time, so their indices always go through DYNAMICBOUNDS.
        if !is_dynarray {
            if current_index.len() == 1 {
                let index_sym = current_index.at(0);
                let kind = self.sym.kind(index_sym);
                if matches!(kind, SymbolKind::LiteralInt | SymbolKind::Constant) {
                    return self.access_data_process_array_index_constant(
                        idx, index_sym, false, dim, factor, mloc,
                    );
                }
            }
            if current_index.len() == 2 {
                let op_sym = current_index.at(0);
                let index_sym = current_index.at(1);
                let kind = self.sym.kind(index_sym);
                if self.sym.operator_opcode(op_sym) == Some(Opcode::SubReg)
                    && matches!(kind, SymbolKind::LiteralInt | SymbolKind::Constant)
                {
                    return self.access_data_process_array_index_constant(
                        idx, index_sym, true, dim, factor, mloc,
                    );
                }
            }
        }

        // Run-time index.
        self.make_mar_current(mloc)?;
        self.scrip.push_reg(Register::Mar);
        self.access_data_read_int_expression(&mut current_index)?;
        self.scrip.pop_reg(Register::Mar);

        // DYNAMICBOUNDS compares the byte offset into the block, so it must
        // run after the multiplication; CHECKBOUNDS checks the index, so it
        // must run before it.
        if !is_dynarray {
            self.scrip
                .write_cmd2(Opcode::CheckBounds, AX, dim as CodeCell);
        }
        if factor != 1 {
            self.scrip.write_cmd2(Opcode::Mul, AX, factor as CodeCell);
        }
        if is_dynarray {
            self.scrip.write_cmd1(Opcode::DynamicBounds, AX);
        }
        self.scrip.write_cmd2(Opcode::AddReg, MAR, AX);
        Ok(())
    }

    /// If `[` follows, consume one full index clause (possibly
    /// multi-dimensional) and leave MAR pointing at the element.
    fn access_data_process_any_array_index(
        &mut self,
        expression: &mut SrcList<'t>,
        res: &mut EvalResult,
        mloc: &mut MemoryLocation,
    ) -> CompileResult<()> {
        if expression.peek_next() != predef::OPEN_BRACKET {
            return Ok(());
        }
        expression.get_next(); // Eat '['

        let vartype = res.vartype;
        let is_dynarray = self.sym.is_dynarray_vartype(vartype);
        let is_array = self.sym.is_array_vartype(vartype);
        if !is_dynarray && !is_array {
            return Err(self.error(
                ErrorKind::Type,
                "Array index is only legal after an array expression",
            ));
        }

        let element_vartype = self.sym[vartype].vartype;
        let element_size = self.sym.get_size(element_vartype);
        let dims: Vec<u32> = if is_dynarray {
            vec![0]
        } else {
            self.sym[vartype].dims.clone()
        };
        res.vartype = element_vartype;

        if is_dynarray {
            self.access_data_dereference(&mut res.vloc, mloc)?;
        }

        // Per-dimension stride, innermost dimension striding one element.
        let num_of_dims = dims.len();
        let mut dim_sizes = vec![0u32; num_of_dims];
        let mut factor = element_size;
        for dim_idx in (0..num_of_dims).rev() {
            dim_sizes[dim_idx] = factor;
            factor *= dims[dim_idx].max(1);
        }

        for dim_idx in 0..num_of_dims {
            self.access_data_process_current_array_index(
                dim_idx,
                dims[dim_idx],
                dim_sizes[dim_idx],
                is_dynarray,
                expression,
                mloc,
            )?;

            let mut divider = expression.peek_next();
            self.expect_any(&[predef::CLOSE_BRACKET, predef::COMMA], divider)?;
            if divider == predef::CLOSE_BRACKET {
                expression.get_next(); // Eat ']'
                divider = expression.peek_next();
            }
            if divider == predef::COMMA || divider == predef::OPEN_BRACKET {
                if num_of_dims == dim_idx + 1 {
                    return Err(self.error(
                        ErrorKind::Semantic,
                        format!("Expected {} indexes, found more", num_of_dims),
                    ));
                }
                expression.get_next(); // Eat ',' or '['
                continue;
            }
            if num_of_dims != dim_idx + 1 {
                return Err(self.error(
                    ErrorKind::Semantic,
                    format!(
                        "Expected {} indexes, but only found {}",
                        num_of_dims,
                        dim_idx + 1
                    ),
                ));
            }
        }
        Ok(())
    }

    // ==================== Variables and literals ====================

    fn access_data_global_or_local_var(
        &mut self,
        is_global: bool,
        writing: bool,
        expression: &mut SrcList<'t>,
        mloc: &mut MemoryLocation,
        res: &mut EvalResult,
    ) -> CompileResult<()> {
        let varname = expression.get_next();
        let offset = self.sym[varname].offset;
        let qualifiers = self.sym[varname].qualifiers;

        if writing && qualifiers.contains(TypeQualifierSet::READONLY) {
            return Err(self.error(
                ErrorKind::Semantic,
                format!("Cannot write to readonly '{}'", self.sym.name(varname)),
            ));
        }

        let scope_type = if qualifiers.contains(TypeQualifierSet::IMPORT) {
            ScopeType::Import
        } else if is_global {
            ScopeType::Global
        } else {
            ScopeType::Local
        };
        if !mloc.set_start(scope_type, offset) {
            return Err(self.error(ErrorKind::Internal, "Memory location doubly initialized"));
        }

        res.vartype = self.sym.get_vartype(varname);
        self.access_data_process_any_array_index(expression, res, mloc)
    }

    pub(crate) fn access_data_int_literal_or_const(
        &mut self,
        negate: bool,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<Vartype> {
        let symbol = expression.get_next();
        let literal =
            self.int_literal_or_const_to_value(symbol, negate, "Error parsing integer value")?;
        self.scrip.write_cmd2(Opcode::LitToReg, AX, literal);
        self.scrip.ax_vartype = predef::INT;
        self.scrip.ax_scope_type = ScopeType::Global;
        Ok(predef::INT)
    }

    pub(crate) fn access_data_float_literal(
        &mut self,
        negate: bool,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<Vartype> {
        let symbol = expression.get_next();
        let value = self.float_literal_to_value(symbol, negate, "Error parsing float value")?;
        // Emit the raw bit pattern so loading stays a plain copy.
        self.scrip
            .write_cmd2(Opcode::LitToReg, AX, value.to_bits() as CodeCell);
        self.scrip.ax_vartype = predef::FLOAT;
        self.scrip.ax_scope_type = ScopeType::Global;
        Ok(predef::FLOAT)
    }

    // ==================== Function calls ====================

    /// Push defaults for parameters the call left out, last first.
    fn access_data_function_call_provide_defaults(
        &mut self,
        num_func_args: usize,
        num_supplied_args: usize,
        func_symbol: Symbol,
        func_is_import: bool,
    ) -> CompileResult<()> {
        for arg_idx in ((num_supplied_args + 1)..=num_func_args).rev() {
            if !self.sym[func_symbol].has_param_default(arg_idx) {
                return Err(self.error(
                    ErrorKind::Semantic,
                    format!(
                        "Function call parameter #{} isn't provided and doesn't have any default value",
                        arg_idx
                    ),
                ));
            }
            let cell = self.sym[func_symbol].param_defaults[arg_idx].to_cell();
            self.scrip.write_cmd2(Opcode::LitToReg, AX, cell);
            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, AX);
            } else {
                self.scrip.push_reg(Register::Ax);
            }
        }
        Ok(())
    }

    /// Count the supplied arguments and find the closing parenthesis.
    /// `parameters[0]` must be the opening parenthesis.
    fn access_data_function_call_count_and_check(
        &mut self,
        parameters: &SrcList,
        name_of_func: Symbol,
    ) -> CompileResult<(usize, usize)> {
        let mut paren_nesting_depth = 1usize;
        let mut num_supplied_args = 1usize;
        let mut found_param_symbol = false;
        let mut param_idx = 1usize;

        while param_idx < parameters.len() {
            let sym = parameters.at(param_idx);
            if sym == predef::OPEN_PAREN {
                paren_nesting_depth += 1;
            }
            if sym == predef::CLOSE_PAREN {
                paren_nesting_depth -= 1;
                if paren_nesting_depth == 0 {
                    break;
                }
            }
            if paren_nesting_depth == 1 && sym == predef::COMMA {
                num_supplied_args += 1;
                if !found_param_symbol {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("Argument {} in function call is empty", num_supplied_args - 1),
                    ));
                }
                param_idx += 1;
                continue;
            }
            found_param_symbol = true;
            param_idx += 1;
        }

        // "()" supplies no arguments at all.
        if num_supplied_args == 1 && parameters.len() > 1 && parameters.at(1) == predef::CLOSE_PAREN
        {
            num_supplied_args = 0;
        }

        let index_of_close_paren = param_idx;
        if parameters.at(index_of_close_paren) != predef::CLOSE_PAREN {
            return Err(self.error(
                ErrorKind::Internal,
                "Missing ')' at the end of the parameter list",
            ));
        }
        if index_of_close_paren > 0 && parameters.at(index_of_close_paren - 1) == predef::COMMA {
            return Err(self.error(ErrorKind::Syntax, "Last argument in function call is empty"));
        }
        if paren_nesting_depth > 0 {
            return Err(self.error(
                ErrorKind::Internal,
                format!("Parser confused near '{}'", self.sym.name(name_of_func)),
            ));
        }
        Ok((index_of_close_paren, num_supplied_args))
    }

    /// Push the supplied arguments in reverse source order.
    fn access_data_function_call_push_params(
        &mut self,
        parameters: &SrcList<'t>,
        closed_paren_idx: usize,
        num_func_args: usize,
        num_supplied_args: usize,
        func_symbol: Symbol,
        func_is_import: bool,
    ) -> CompileResult<()> {
        let mut param_num = num_supplied_args + 1;
        let mut start_of_current_param: usize = 0;
        let mut end_of_current_param: isize = closed_paren_idx as isize;

        loop {
            param_num -= 1;
            // Find the start of this parameter, scanning backwards. A ')'
            // increases the depth since we walk right to left.
            let mut paren_nesting_depth = 0i32;
            let mut param_list_idx = end_of_current_param - 1;
            while param_list_idx >= 0 {
                let sym = parameters.at(param_list_idx as usize);
                if sym == predef::CLOSE_PAREN {
                    paren_nesting_depth += 1;
                }
                if sym == predef::OPEN_PAREN {
                    paren_nesting_depth -= 1;
                }
                if (paren_nesting_depth == 0 && sym == predef::COMMA)
                    || (paren_nesting_depth < 0 && sym == predef::OPEN_PAREN)
                {
                    start_of_current_param = param_list_idx as usize + 1;
                    break;
                }
                if param_list_idx == 0 {
                    break;
                }
                param_list_idx -= 1;
            }

            if end_of_current_param < start_of_current_param as isize {
                return Err(self.error(ErrorKind::Internal, "Parameter length is negative"));
            }

            // Compile the parameter into AX.
            let mut current_param = parameters.select(
                start_of_current_param,
                end_of_current_param as usize - start_of_current_param,
            );
            let mut res = self.parse_expression_term(&mut current_param)?;
            self.result_to_ax(&mut res);

            if param_num <= num_func_args {
                // We know what type to expect.
                let param_vartype = self.sym[func_symbol].param_vartypes[param_num];
                self.convert_ax_string_to_string_object(param_vartype);
                self.do_null_check_on_string_in_ax(param_vartype);
                self.check_vartype_mismatch(self.scrip.ax_vartype, param_vartype, true)?;
            }

            // Pushing writes plain cells; dynpointer parameters are
            // re-declared via MEMINITPTR at function entry.
            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, AX);
            } else {
                self.scrip.push_reg(Register::Ax);
            }

            end_of_current_param = start_of_current_param as isize - 1;
            if end_of_current_param <= 0 {
                break;
            }
        }

        Ok(())
    }

    /// The call protocol around the CALL/CALLEXT instruction.
    pub(crate) fn access_data_generate_function_call(
        &mut self,
        name_of_func: Symbol,
        num_args: usize,
        func_is_import: bool,
        call_src_pos: usize,
    ) {
        if func_is_import {
            // Nested imported calls corrupt the real stack without the
            // explicit argument count.
            self.scrip
                .write_cmd1(Opcode::NumFuncArgs, num_args as CodeCell);
        }

        // Load the function address into AX.
        self.scrip
            .write_cmd2(Opcode::LitToReg, AX, self.sym[name_of_func].offset);

        if func_is_import {
            self.scrip.fixup_previous(FixupKind::Import);
            let operand_loc = self.scrip.codesize() - 1;
            if !self
                .import_mgr
                .is_declared_import(self.sym.name(name_of_func))
            {
                self.fim
                    .track_forward_decl_call(self.scrip, name_of_func, operand_loc, call_src_pos);
            }

            self.scrip.write_cmd1(Opcode::CallExt, AX);
            if num_args > 0 {
                self.scrip
                    .write_cmd1(Opcode::SubRealStack, num_args as CodeCell);
            }
            return;
        }

        self.scrip.fixup_previous(FixupKind::Code);
        let operand_loc = self.scrip.codesize() - 1;
        if self.fcm.is_forward_decl(name_of_func) {
            self.fcm
                .track_forward_decl_call(self.scrip, name_of_func, operand_loc, call_src_pos);
        }
        self.scrip.write_cmd1(Opcode::Call, AX);

        // The caller pops the arguments when the call returns.
        if num_args > 0 {
            let size_of_passed_args = (num_args as i32) * SIZE_OF_STACK_CELL as i32;
            self.scrip.write_cmd2(Opcode::Sub, SP, size_of_passed_args);
            self.scrip.offset_to_local_var_block -= size_of_passed_args;
        }
    }

    fn access_data_push_function_call_params(
        &mut self,
        name_of_func: Symbol,
        func_is_import: bool,
        parameters: &SrcList<'t>,
    ) -> CompileResult<(usize, usize)> {
        let num_func_args = self.sym[name_of_func].num_params();

        let (closed_paren_idx, num_supplied_args) =
            self.access_data_function_call_count_and_check(parameters, name_of_func)?;

        // Fill from declared defaults when under-supplied.
        if num_supplied_args < num_func_args {
            self.access_data_function_call_provide_defaults(
                num_func_args,
                num_supplied_args,
                name_of_func,
                func_is_import,
            )?;
        }
        if num_supplied_args > num_func_args && !self.sym[name_of_func].varargs {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Expected just {} parameters but found {}",
                    num_func_args, num_supplied_args
                ),
            ));
        }

        if num_supplied_args > 0 {
            self.access_data_function_call_push_params(
                parameters,
                closed_paren_idx,
                num_func_args,
                num_supplied_args,
                name_of_func,
                func_is_import,
            )?;
        }

        let actual_num_args = num_supplied_args.max(num_func_args);
        Ok((actual_num_args, closed_paren_idx))
    }

    /// Compile a function call. The cursor of `expression` sits at the
    /// function name; on return it sits after the closing parenthesis.
    pub(crate) fn access_data_function_call(
        &mut self,
        name_of_func: Symbol,
        expression: &mut SrcList<'t>,
        mloc: &mut MemoryLocation,
    ) -> CompileResult<Vartype> {
        let name_pos = expression.get_cursor();
        expression.get_next(); // Eat the function name
        if expression.peek_next() != predef::OPEN_PAREN {
            return Err(self.error(ErrorKind::Syntax, "Expected '('"));
        }
        let call_start = expression.get_cursor();
        let parameters = expression.select(call_start, expression.len() - call_start);
        let call_src_pos = expression.global_pos_of(name_pos);

        let func_is_import = self.sym[name_of_func]
            .qualifiers
            .contains(TypeQualifierSet::IMPORT);
        // Imported functions use the engine's real stack; local calls use
        // the normal stack and need stack arithmetic for element access.
        let func_uses_normal_stack = !func_is_import;
        let called_func_uses_this = self.sym.name(name_of_func).contains("::")
            && !self.sym[name_of_func]
                .qualifiers
                .contains(TypeQualifierSet::STATIC);
        let calling_func_uses_this = !self.sym.get_vartype(predef::THIS).is_none();
        let mut mar_pushed = false;
        let mut op_pushed = false;

        if calling_func_uses_this {
            // Save OP no matter whether the called function itself uses
            // "this": it might call one that does.
            self.scrip.push_reg(Register::Op);
            op_pushed = true;
        }

        if called_func_uses_this {
            // MAR addresses the object that becomes "this" in the callee.
            self.make_mar_current(mloc)?;
            // Argument processing may call other functions and clobber MAR,
            // so save it on the stack in front of the arguments.
            self.scrip.push_reg(Register::Mar);
            mar_pushed = true;
        }

        let (num_args, closed_paren_idx) =
            self.access_data_push_function_call_params(name_of_func, func_is_import, &parameters)?;

        if called_func_uses_this {
            if num_args == 0 {
                // MAR is still current, so undo the unneeded push.
                self.scrip.offset_to_local_var_block -= SIZE_OF_STACK_CELL as i32;
                let new_len = self.scrip.code.len() - 2;
                self.scrip.code.truncate(new_len);
                mar_pushed = false;
            } else {
                // Read MAR back; it sits in front of the arguments.
                let depth = (1 + if func_uses_normal_stack { num_args } else { 0 }) as i32
                    * SIZE_OF_STACK_CELL as i32;
                self.scrip.write_cmd1(Opcode::LoadSpOffs, depth);
                self.scrip.write_cmd1(Opcode::MemRead, MAR);
            }
            self.scrip.write_cmd1(Opcode::CallObj, MAR);
        }

        self.access_data_generate_function_call(
            name_of_func,
            num_args,
            func_is_import,
            call_src_pos,
        );

        let rettype = self.sym[name_of_func].param_vartypes[0];
        self.scrip.ax_vartype = rettype;
        self.scrip.ax_scope_type = ScopeType::Local;

        if mar_pushed {
            self.scrip.pop_reg(Register::Mar);
        }
        if op_pushed {
            self.scrip.pop_reg(Register::Op);
        }

        self.mark_accessed(name_of_func);

        // Continue after the closing parenthesis.
        expression.set_cursor(call_start + closed_paren_idx + 1);
        Ok(rettype)
    }

    // ==================== Attributes ====================

    /// The symbol of the getter/setter behind an attribute.
    pub(crate) fn construct_attribute_func_name(
        &mut self,
        attribsym: Symbol,
        writing: bool,
        indexed: bool,
    ) -> Symbol {
        let member = self.sym.name(attribsym);
        // With "::" in the name, take the part after the last "::".
        let member = match member.rfind("::") {
            Some(pos) => &member[pos + 2..],
            None => member,
        };
        let stem = if writing { "set" } else { "get" };
        let indx = if indexed { "i_" } else { "_" };
        let func_name = format!("{}{}{}", stem, indx, member);
        self.sym.find_or_add(&func_name)
    }

    /// Compile the getter or setter call of an attribute. The cursor of
    /// `expression` sits at the attribute component. For setters, AX holds
    /// the value to set.
    pub(crate) fn access_data_call_attribute_func(
        &mut self,
        is_setter: bool,
        expression: &mut SrcList<'t>,
        vartype: &mut Vartype,
    ) -> CompileResult<()> {
        let component = expression.get_next();
        let Some(struct_of_component) = self.find_struct_of_component(*vartype, component) else {
            return Err(self.error(
                ErrorKind::Reference,
                format!(
                    "Struct '{}' does not have an attribute named '{}'",
                    self.sym.name(*vartype),
                    self.sym.name(component)
                ),
            ));
        };
        let name_of_attribute = self.sym.mangle(struct_of_component, component);

        let attrib_uses_this = !self.sym[name_of_attribute]
            .qualifiers
            .contains(TypeQualifierSet::STATIC);
        let call_is_indexed = expression.peek_next() == predef::OPEN_BRACKET;
        let attrib_is_indexed = self
            .sym
            .is_dynarray_vartype(self.sym.get_vartype(name_of_attribute));

        if call_is_indexed && !attrib_is_indexed {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "Unexpected '[' after non-indexed attribute {}",
                    self.sym.name(name_of_attribute)
                ),
            ));
        }
        if !call_is_indexed && attrib_is_indexed {
            return Err(self.error(
                ErrorKind::Semantic,
                format!(
                    "'[' expected after indexed attribute {} but not found",
                    self.sym.name(name_of_attribute)
                ),
            ));
        }

        let func_stem = self.construct_attribute_func_name(component, is_setter, attrib_is_indexed);
        let name_of_func = self.sym.mangle(struct_of_component, func_stem);
        if self.sym.kind(name_of_func) != SymbolKind::Function {
            // A readonly attribute has no setter function.
            let msg = self.reference_msg_sym(
                &format!(
                    "The attribute function '{}' is not declared",
                    self.sym.name(name_of_func)
                ),
                name_of_attribute,
            );
            return Err(self.error(ErrorKind::Reference, msg));
        }
        let func_is_import = self.sym[name_of_func]
            .qualifiers
            .contains(TypeQualifierSet::IMPORT);

        if attrib_uses_this {
            // The current "this" must be restored after the call.
            self.scrip.push_reg(Register::Op);
        }

        let mut num_of_args = 0usize;
        if is_setter {
            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, AX);
            } else {
                self.scrip.push_reg(Register::Ax);
            }
            num_of_args += 1;
        }

        if call_is_indexed {
            // The index sits in the brackets; push it as a parameter.
            if attrib_uses_this {
                self.scrip.push_reg(Register::Mar);
            }
            self.access_data_read_bracketed_int_expression(expression)?;
            if attrib_uses_this {
                self.scrip.pop_reg(Register::Mar);
            }
            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, AX);
            } else {
                self.scrip.push_reg(Register::Ax);
            }
            num_of_args += 1;
        }

        if attrib_uses_this {
            self.scrip.write_cmd1(Opcode::CallObj, MAR);
        }

        let call_src_pos = expression.global_pos();
        self.access_data_generate_function_call(
            name_of_func,
            num_of_args,
            func_is_import,
            call_src_pos,
        );

        if attrib_uses_this {
            self.scrip.pop_reg(Register::Op);
        }

        let rettype = self.sym[name_of_func].param_vartypes[0];
        self.scrip.ax_scope_type = ScopeType::Local;
        self.scrip.ax_vartype = rettype;
        *vartype = rettype;

        self.mark_accessed(name_of_func);
        Ok(())
    }

    // ==================== Assignment sink ====================

    /// Whether evaluating this access chain can clobber AX. Plain locals
    /// and globals, and chains of direct struct members on one, cannot.
    fn access_data_may_access_clobber_ax(&mut self, expression: &SrcList) -> bool {
        let first = expression.at(0);
        if !matches!(
            self.sym.kind(first),
            SymbolKind::GlobalVar | SymbolKind::LocalVar
        ) {
            return true;
        }
        if expression.len() == 1 {
            return false;
        }
        let mut vartype = self.sym.get_vartype(first);
        let mut idx = 1;
        while idx + 1 < expression.len() {
            if expression.at(idx) != predef::DOT {
                return true;
            }
            vartype = self
                .sym
                .vartype_without(VartypeModifier::Dynpointer, vartype);
            let Some(compo) = self.find_component_in_struct(vartype, expression.at(idx + 1)) else {
                return true;
            };
            if self.sym.kind(compo) != SymbolKind::StructComponent {
                return true;
            }
            vartype = self.sym.get_vartype(compo);
            idx += 2;
        }
        false
    }

    /// Copy at most `STRINGBUFFER_LENGTH - 1` bytes from the buffer whose
    /// address is in AX into the buffer MAR points at, stopping at a NUL;
    /// the destination is always terminated.
    pub(crate) fn access_data_strcpy(&mut self) {
        let scrip: &mut CompiledScript = &mut *self.scrip;
        scrip.write_cmd2(Opcode::RegToReg, MAR, CX); // CX = dest
        scrip.write_cmd2(Opcode::RegToReg, AX, BX); // BX = src
        scrip.write_cmd2(Opcode::LitToReg, DX, (STRINGBUFFER_LENGTH - 1) as CodeCell);
        let loop_start = scrip.codesize(); // LOOP_START
        scrip.write_cmd2(Opcode::RegToReg, BX, MAR); // AX = m[BX]
        scrip.write_cmd1(Opcode::MemRead, AX);
        scrip.write_cmd2(Opcode::RegToReg, CX, MAR); // m[CX] = AX
        scrip.write_cmd1(Opcode::MemWrite, AX);
        scrip.write_cmd1(Opcode::Jz, -77); // if (AX == 0) goto LOOP_END
        let jumpout_pos = scrip.codesize() - 1;
        scrip.write_cmd2(Opcode::Add, BX, 1); // BX++, CX++, DX--
        scrip.write_cmd2(Opcode::Add, CX, 1);
        scrip.write_cmd2(Opcode::Sub, DX, 1);
        scrip.write_cmd2(Opcode::RegToReg, DX, AX); // if (DX != 0) goto LOOP_START
        let dist = CompiledScript::relative_jump_dist(scrip.codesize() + 1, loop_start);
        scrip.write_cmd1(Opcode::Jnz, dist);
        scrip.write_cmd2(Opcode::Add, CX, 1); // force a NUL-terminated dest
        scrip.write_cmd2(Opcode::RegToReg, CX, MAR);
        scrip.write_cmd2(Opcode::LitToReg, AX, 0);
        scrip.write_cmd1(Opcode::MemWrite, AX);
        let loop_end = scrip.codesize(); // LOOP_END
        scrip.code[jumpout_pos as usize] =
            CompiledScript::relative_jump_dist(jumpout_pos, loop_end);
    }

    /// AX holds the already-evaluated RHS; store it into the location that
    /// `lhs` denotes, or compile the attribute setter.
    pub(crate) fn access_data_assign_to(&mut self, lhs: &mut SrcList<'t>) -> CompileResult<()> {
        let mut rhsvartype = self.scrip.ax_vartype;
        let rhs_scope_type = self.scrip.ax_scope_type;

        // Save AX unless the LHS evaluation is known not to clobber it.
        let may_clobber = self.access_data_may_access_clobber_ax(lhs);
        if may_clobber {
            self.scrip.push_reg(Register::Ax);
        }

        lhs.start_read();
        let mut res = self.access_data(true, lhs)?;
        let lhsvartype = res.vartype;

        if res.vloc == ValueLocation::AxIsValue {
            if !self.sym.is_managed_vartype(lhsvartype) {
                return Err(self.error(ErrorKind::Type, "Cannot modify this value"));
            }
            self.scrip.write_cmd2(Opcode::RegToReg, AX, MAR);
            self.scrip.write_cmd0(Opcode::CheckNull);
            res.vloc = ValueLocation::MarPointsToValue;
        }

        if may_clobber {
            self.scrip.pop_reg(Register::Ax);
        }
        self.scrip.ax_vartype = rhsvartype;
        self.scrip.ax_scope_type = rhs_scope_type;

        if res.vloc == ValueLocation::Attribute {
            // lhsvartype is the struct the attribute belongs to.
            let mut struct_of_attribute = lhsvartype;
            return self.access_data_call_attribute_func(true, lhs, &mut struct_of_attribute);
        }

        // MAR points to the value now.

        if lhsvartype == predef::STRING
            && self.sym.vartype_without(VartypeModifier::Const, rhsvartype) == predef::STRING
        {
            // Copy the string contents over.
            self.access_data_strcpy();
            return Ok(());
        }

        self.convert_ax_string_to_string_object(lhsvartype);
        rhsvartype = self.scrip.ax_vartype;
        if self.is_vartype_mismatch_oneway(rhsvartype, lhsvartype) {
            return Err(self.error(
                ErrorKind::Type,
                format!(
                    "Cannot assign a type '{}' value to a type '{}' variable",
                    self.sym.name(rhsvartype),
                    self.sym.name(lhsvartype)
                ),
            ));
        }

        let opcode = if self.sym.is_dyn_vartype(lhsvartype) {
            Opcode::MemWritePtr
        } else {
            write_cmd_for_size(self.sym.get_size(lhsvartype))
        };
        self.scrip.write_cmd1(opcode, AX);
        Ok(())
    }

    // ==================== Assignment statements ====================

    /// The LHS of a `+=`/`++` statement, evaluated for reading; the value
    /// ends up in AX.
    fn parse_assignment_read_lhs_for_modification(
        &mut self,
        lhs: &mut SrcList<'t>,
    ) -> CompileResult<(ValueLocation, Vartype)> {
        lhs.start_read();
        let res = self.access_data(false, lhs)?;
        if !lhs.reached_eof() {
            return Err(self.error(ErrorKind::Internal, "Unexpected symbols following expression"));
        }

        if res.vloc == ValueLocation::MarPointsToValue {
            // Move the memory into AX.
            self.scrip.ax_vartype = res.vartype;
            self.scrip.ax_scope_type = res.scope;
            self.scrip
                .write_cmd1(read_cmd_for_size(self.sym.get_size(res.vartype)), AX);
        }
        Ok((res.vloc, res.vartype))
    }

    /// Dispatch on the assignment symbol following an access chain.
    pub(crate) fn parse_assignment(
        &mut self,
        ass_symbol: Symbol,
        lhs: &mut SrcList<'t>,
    ) -> CompileResult<()> {
        match self.sym.kind(ass_symbol) {
            SymbolKind::Assign => self.parse_assignment_assign(lhs),
            SymbolKind::AssignMod => self.parse_assignment_massign(ass_symbol, lhs),
            SymbolKind::AssignSOp => self.parse_assignment_sassign(ass_symbol, lhs),
            _ => Err(self.error(ErrorKind::Internal, "Illegal assignment symbol found")),
        }
    }

    /// `var = expression`.
    fn parse_assignment_assign(&mut self, lhs: &mut SrcList<'t>) -> CompileResult<()> {
        self.parse_expression()?; // RHS of the assignment
        self.access_data_assign_to(lhs)
    }

    /// `var op= expression`.
    fn parse_assignment_massign(
        &mut self,
        ass_symbol: Symbol,
        lhs: &mut SrcList<'t>,
    ) -> CompileResult<()> {
        self.parse_expression()?; // RHS
        self.scrip.push_reg(Register::Ax);
        let rhsvartype = self.scrip.ax_vartype;

        let (vloc, lhsvartype) = self.parse_assignment_read_lhs_for_modification(lhs)?;

        let opcode = self
            .sym
            .operator_opcode(ass_symbol)
            .expect("modifying assignment symbols carry an opcode");
        let opcode = self.get_opcode_valid_for_vartype(lhsvartype, rhsvartype, opcode)?;
        self.scrip.pop_reg(Register::Bx);
        self.scrip.write_cmd2(opcode, AX, BX);

        if vloc == ValueLocation::MarPointsToValue {
            // Write the result straight back through MAR.
            let memwrite = write_cmd_for_size(self.sym.get_size(lhsvartype));
            self.scrip.write_cmd1(memwrite, AX);
            return Ok(());
        }

        self.access_data_assign_to(lhs)
    }

    /// `var++` / `var--`.
    fn parse_assignment_sassign(
        &mut self,
        ass_symbol: Symbol,
        lhs: &mut SrcList<'t>,
    ) -> CompileResult<()> {
        let (vloc, lhsvartype) = self.parse_assignment_read_lhs_for_modification(lhs)?;

        let opcode = self
            .sym
            .operator_opcode(ass_symbol)
            .expect("modifying assignment symbols carry an opcode");
        let opcode = self.get_opcode_valid_for_vartype(lhsvartype, lhsvartype, opcode)?;
        self.scrip.write_cmd2(opcode, AX, 1);

        if vloc == ValueLocation::MarPointsToValue {
            // Write AX back through MAR.
            let memwrite = write_cmd_for_size(self.sym.get_size(lhsvartype));
            self.scrip.write_cmd1(memwrite, AX);
            return Ok(());
        }

        self.access_data_assign_to(lhs)
    }
}
