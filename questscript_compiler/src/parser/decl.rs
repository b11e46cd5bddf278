//! Declaration parsing: variables, functions, structs, attributes, enums
//! and exports, across both compiler phases.

use questscript_bytecode::{
    CodeCell, ExportKind, Opcode, Register, SIZE_OF_INT, SIZE_OF_STACK_CELL, STRINGBUFFER_LENGTH,
    STRUCT_ALIGNMENT,
};

use super::expr::write_cmd_for_size;
use super::{Parser, Phase, AX, SP};
use crate::error::{CompileResult, ErrorKind};
use crate::scanner::string_literal_content;
use crate::symbols::{
    predef, EntryFlags, ParamDefault, Symbol, SymbolKind, SymbolTableEntry, TypeQualifierSet,
    Vartype, VartypeModifier, MAX_FUNCTION_PARAMETERS, PARAMETER_SCOPE,
};

/// Pre-phase declaration class of a function, kept in its `offset`.
pub(crate) const FT_PURE_FORWARD: i32 = 1;
pub(crate) const FT_IMPORT: i32 = 2;
pub(crate) const FT_LOCAL_BODY: i32 = 3;

/// Where a variable declaration puts its variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclScope {
    Global,
    Import,
    Local,
}

impl<'t, 'c> Parser<'t, 'c> {
    // ==================== Shared declaration helpers ====================

    /// Wrap a managed vartype into a dynpointer.
    pub(crate) fn set_dynpointer_in_managed_vartype(&mut self, vartype: Vartype) -> Vartype {
        if self.sym.is_managed_vartype(vartype) {
            self.sym.vartype_with(VartypeModifier::Dynpointer, vartype)
        } else {
            vartype
        }
    }

    /// Consume a `*` after a vartype; only managed types may carry one.
    pub(crate) fn eat_dynpointer_symbol_if_present(&mut self, vartype: Vartype) -> CompileResult<()> {
        if self.src.peek_next() != predef::DYNPOINTER {
            return Ok(());
        }
        if self.phase == Phase::PreAnalyze || self.sym.is_managed_vartype(vartype) {
            self.src.get_next(); // Eat '*'
            return Ok(());
        }
        Err(self.error(
            ErrorKind::Type,
            format!(
                "Cannot use '*' on the non-managed type '{}'",
                self.sym.name(vartype)
            ),
        ))
    }

    /// Consume `[]` after a vartype, producing a dynarray vartype.
    pub(crate) fn parse_dynarray_marker_if_present(
        &mut self,
        vartype: Vartype,
    ) -> CompileResult<Vartype> {
        if self.src.peek_next() != predef::OPEN_BRACKET {
            return Ok(vartype);
        }
        self.src.get_next(); // Eat '['
        let bracket = self.src.get_next();
        self.expect(predef::CLOSE_BRACKET, bracket)?;
        Ok(self.sym.vartype_with(VartypeModifier::Dynarray, vartype))
    }

    /// Read a (possibly `Struct::member`-qualified) fresh name.
    pub(crate) fn parse_varname(
        &mut self,
        accept_member_access: bool,
        skip_type_check: bool,
    ) -> CompileResult<(Symbol, Symbol)> {
        let varname = self.src.get_next();
        if varname <= predef::LAST_PREDEFINED {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Expected an identifier, found '{}' instead",
                    self.sym.name(varname)
                ),
            ));
        }

        if !accept_member_access {
            if !skip_type_check && self.sym.kind(varname) == SymbolKind::Vartype {
                let msg = self.reference_msg_sym(
                    &format!(
                        "'{}' is already in use as a type name",
                        self.sym.name(varname)
                    ),
                    varname,
                );
                return Err(self.error(ErrorKind::Declaration, msg));
            }
            return Ok((Symbol::NONE, varname));
        }

        if self.src.peek_next() != predef::SCOPE_RES {
            return Ok((Symbol::NONE, varname));
        }

        // "Struct::member": varname was the struct name.
        let structname = varname;
        self.src.get_next(); // Eat '::'
        let membername = self.src.get_next();
        let full_name = self.sym.mangle(structname, membername);
        Ok((structname, full_name))
    }

    fn copy_known_sym_info(&mut self, name: Symbol) -> Option<SymbolTableEntry> {
        if self.sym.kind(name) == SymbolKind::NoType {
            return None;
        }
        let known = self.sym[name].clone();
        // Kill the live defaults so the fresh parse must replicate them.
        let num_of_params = known.num_params();
        self.sym[name].param_defaults = vec![ParamDefault::None; num_of_params + 1];
        Some(known)
    }

    // ==================== Vartype-led declarations ====================

    /// A vartype was read at statement level; parse the function or
    /// variable declaration(s) that follow.
    pub(crate) fn parse_vartype(
        &mut self,
        vartype: Vartype,
        tqs: TypeQualifierSet,
    ) -> CompileResult<()> {
        if self.src.reached_eof() {
            return Err(self.error(
                ErrorKind::Syntax,
                "Unexpected end of input (did you forget ';'?)",
            ));
        }
        if tqs.contains(TypeQualifierSet::BUILTIN) {
            return Err(self.error(
                ErrorKind::Declaration,
                "'builtin' can only be used in a struct declaration",
            ));
        }

        self.parse_vartype_check_for_illegal_context()?;

        let scope_type = if !self.name_of_current_func.is_none() {
            DeclScope::Local
        } else if tqs.contains(TypeQualifierSet::IMPORT) {
            DeclScope::Import
        } else {
            DeclScope::Global
        };

        // Imply a pointer for a managed entity unless it is imported
        // (import declarations may name non-pointed managed structs).
        let mut vartype = vartype;
        if (scope_type == DeclScope::Import && self.src.peek_next() == predef::DYNPOINTER)
            || (scope_type != DeclScope::Import && self.sym.is_managed_vartype(vartype))
        {
            vartype = self.sym.vartype_with(VartypeModifier::Dynpointer, vartype);
        }
        self.eat_dynpointer_symbol_if_present(vartype)?;

        // "int [] func(...)"
        vartype = self.parse_dynarray_marker_if_present(vartype)?;

        // "TYPE noloopcheck foo(...)"
        let no_loop_check = self.src.peek_next() == predef::NOLOOPCHECK;
        if no_loop_check {
            self.src.get_next();
        }

        // One vartype, then vars or one function of that type.
        loop {
            let (struct_name, var_or_func_name) = self.parse_varname(true, false)?;
            let is_function = self.src.peek_next() == predef::OPEN_PAREN;

            self.parse_vartype_check_illegal_combis(is_function, tqs)?;

            if is_function {
                let body_follows = self.parse_vartype_funcdecl(
                    tqs,
                    vartype,
                    struct_name,
                    var_or_func_name,
                    no_loop_check,
                )?;
                if body_follows {
                    return Ok(());
                }
            } else if no_loop_check {
                return Err(self.error(ErrorKind::Syntax, "Expected '('"));
            } else {
                if !struct_name.is_none() {
                    return Err(self.error(
                        ErrorKind::Declaration,
                        "Variable may not contain '::'",
                    ));
                }
                self.parse_vartype_vardecl(var_or_func_name, scope_type, tqs, vartype)?;
            }

            let punctuation = self.src.get_next();
            self.expect_any(&[predef::COMMA, predef::SEMICOLON], punctuation)?;
            if punctuation == predef::SEMICOLON {
                return Ok(());
            }
        }
    }

    fn parse_vartype_check_for_illegal_context(&self) -> CompileResult<()> {
        use crate::nesting::NestingType;
        match self.nest.nest_type() {
            NestingType::Switch => Err(self.error(
                ErrorKind::Declaration,
                "Cannot use declarations directly within a switch body. (Put \"{ ... }\" around the case statements)",
            )),
            NestingType::Braces | NestingType::Function | NestingType::None => Ok(()),
            _ => Err(self.error(
                ErrorKind::Declaration,
                "A declaration cannot be the sole body of an 'if', 'else' or loop clause",
            )),
        }
    }

    fn parse_vartype_check_illegal_combis(
        &self,
        is_function: bool,
        tqs: TypeQualifierSet,
    ) -> CompileResult<()> {
        if tqs.contains(TypeQualifierSet::STATIC) && !is_function {
            return Err(self.error(
                ErrorKind::Declaration,
                "'static' can only be applied to functions that are members of a struct",
            ));
        }
        // 'protected' is checked later: the function may turn out to be an
        // extender, and that is not known yet.
        if tqs.contains(TypeQualifierSet::READONLY) && is_function {
            return Err(self.error(
                ErrorKind::Declaration,
                "Readonly cannot be applied to a function",
            ));
        }
        if tqs.contains(TypeQualifierSet::WRITEPROTECTED) && is_function {
            return Err(self.error(
                ErrorKind::Declaration,
                "'writeprotected' cannot be applied to a function",
            ));
        }
        Ok(())
    }

    // ==================== Function declarations ====================

    /// `return_type name(` was accepted; parse the rest of the function
    /// declaration. Returns whether a body follows (and was entered).
    fn parse_vartype_funcdecl(
        &mut self,
        tqs: TypeQualifierSet,
        vartype: Vartype,
        struct_name: Symbol,
        func_name: Symbol,
        no_loop_check: bool,
    ) -> CompileResult<bool> {
        let declaration_start = self.src.get_cursor();
        self.src.get_next(); // Eat '('

        let mut tqs = tqs;
        let mut struct_name = struct_name;
        let mut func_name = func_name;
        if struct_name.is_none() {
            let func_is_static_extender = self.src.peek_next() == predef::STATIC;
            let func_is_extender =
                func_is_static_extender || self.src.peek_next() == predef::THIS;
            if func_is_extender {
                // Rewrite the extender function as a component function of
                // the struct named by its first pseudo-parameter.
                self.parse_funcdecl_extender_preparations(
                    func_is_static_extender,
                    &mut struct_name,
                    &mut func_name,
                    &mut tqs,
                )?;
            }
        }

        let body_follows =
            self.parse_funcdecl(declaration_start, tqs, vartype, struct_name, func_name, no_loop_check)?;
        if !body_follows {
            return Ok(false);
        }

        if !self.name_of_current_func.is_none() {
            let msg = self.reference_msg_sym(
                "Function bodies cannot nest, but the body of another function is still open. (Did you forget a '}'?)",
                func_name,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if no_loop_check {
            self.sym[func_name].flags |= EntryFlags::NO_LOOP_CHECK;
        }

        // A function body has started; remember whose it is.
        self.name_of_current_func = func_name;
        self.struct_of_current_func = struct_name;
        Ok(true)
    }

    /// Extender syntax: `int Fn(this Critter *, ...)` or
    /// `int Fn(static Critter, ...)`.
    fn parse_funcdecl_extender_preparations(
        &mut self,
        is_static_extender: bool,
        struct_of_func: &mut Symbol,
        name_of_func: &mut Symbol,
        tqs: &mut TypeQualifierSet,
    ) -> CompileResult<()> {
        if is_static_extender {
            *tqs |= TypeQualifierSet::STATIC;
        }

        self.src.get_next(); // Eat 'this' or 'static'
        let strct = self.src.get_next();
        if !self.sym.is_struct_vartype(strct) {
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "Expected a struct type instead of '{}'",
                    self.sym.name(strct)
                ),
            ));
        }
        *struct_of_func = strct;
        *name_of_func = self.sym.mangle(strct, *name_of_func);

        if self.src.peek_next() == predef::DYNPOINTER {
            if is_static_extender {
                return Err(self.error(
                    ErrorKind::Syntax,
                    "Unexpected '*' after 'static' in static extender function",
                ));
            }
            self.src.get_next(); // Eat '*'
        }

        // An extender function needn't be declared in the struct body, so
        // pretend that declaration has happened.
        self.sym[*name_of_func].parent = strct;
        self.sym[*name_of_func].flags |= EntryFlags::STRUCT_MEMBER;

        let punctuation = self.src.peek_next();
        self.expect_any(&[predef::COMMA, predef::CLOSE_PAREN], punctuation)?;
        if punctuation == predef::COMMA {
            self.src.get_next(); // Eat ','
        }
        Ok(())
    }

    fn parse_funcdecl_does_body_follow(&mut self) -> CompileResult<bool> {
        let cursor = self.src.get_cursor();
        self.skip_to_close(predef::CLOSE_PAREN)?;
        let body_follows = self.src.peek_next() == predef::OPEN_BRACE;
        self.src.set_cursor(cursor);
        Ok(body_follows)
    }

    fn parse_funcdecl_checks(
        &mut self,
        tqs: TypeQualifierSet,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        return_vartype: Vartype,
        body_follows: bool,
        no_loop_check: bool,
    ) -> CompileResult<()> {
        if struct_of_func.is_none() && tqs.contains(TypeQualifierSet::PROTECTED) {
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "Function '{}' isn't a struct component and so cannot be 'protected'",
                    self.sym.name(name_of_func)
                ),
            ));
        }

        if !body_follows && no_loop_check {
            return Err(self.error(
                ErrorKind::Declaration,
                "Can only use 'noloopcheck' when a function body follows the definition",
            ));
        }

        let kind = self.sym.kind(name_of_func);
        if kind != SymbolKind::Function && kind != SymbolKind::NoType {
            let msg = self.reference_msg_sym(
                &format!(
                    "'{}' is defined elsewhere as a non-function",
                    self.sym.name(name_of_func)
                ),
                name_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if !self.sym.is_managed_vartype(return_vartype)
            && self.sym.is_struct_vartype(return_vartype)
        {
            return Err(self.error(
                ErrorKind::Type,
                "Can only return a struct when it is 'managed'",
            ));
        }

        if self.phase == Phase::PreAnalyze
            && body_follows
            && self.sym[name_of_func].offset == FT_LOCAL_BODY
        {
            let msg = self.reference_msg_sym(
                &format!(
                    "Function '{}' is also defined with body elsewhere",
                    self.sym.name(name_of_func)
                ),
                name_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if self.phase == Phase::Main
            && !struct_of_func.is_none()
            && struct_of_func != self.sym[name_of_func].parent
        {
            // Only struct-body declarations and extenders get a parent.
            let full = self.sym.name(name_of_func);
            let component = full.rsplit(':').next().unwrap_or(full).to_string();
            let msg = self.reference_msg_sym(
                &format!(
                    "Function '{}' has not been declared within struct '{}' as a component",
                    component,
                    self.sym.name(struct_of_func)
                ),
                struct_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        Ok(())
    }

    fn parse_funcdecl_master_data_to_sym(
        &mut self,
        tqs: TypeQualifierSet,
        return_vartype: Vartype,
        _struct_of_function: Symbol,
        name_of_function: Symbol,
        body_follows: bool,
    ) {
        let phase = self.phase;
        let entry = &mut self.sym[name_of_function];
        entry.kind = SymbolKind::Function;
        if entry.param_vartypes.is_empty() {
            entry.param_vartypes.push(return_vartype);
            entry.param_defaults.push(ParamDefault::None);
        } else {
            entry.param_vartypes[0] = return_vartype;
        }
        // "autoptr", "managed" and "builtin" are aspects of the vartype,
        // not of the entity returned.
        entry.qualifiers = tqs
            - (TypeQualifierSet::AUTOPTR | TypeQualifierSet::MANAGED | TypeQualifierSet::BUILTIN);

        if phase == Phase::PreAnalyze {
            // Encode the declaration class in the offset.
            let mut ft = FT_PURE_FORWARD;
            if tqs.contains(TypeQualifierSet::IMPORT) {
                ft = FT_IMPORT;
            }
            if body_follows {
                ft = FT_LOCAL_BODY;
            }
            if entry.offset < ft {
                entry.offset = ft;
            }
        }
    }

    fn parse_funcdecl_paramlist(
        &mut self,
        funcsym: Symbol,
        body_follows: bool,
    ) -> CompileResult<()> {
        self.sym[funcsym].varargs = false;
        self.sym[funcsym].param_vartypes.truncate(1); // [0] is the return type
        self.sym[funcsym].param_defaults.truncate(1);

        let mut param_is_const = false;
        let mut param_idx = 0usize;
        while !self.src.reached_eof() {
            let cursym = self.src.get_next();
            if cursym == predef::CLOSE_PAREN {
                return Ok(()); // empty parameter list
            }

            if self.sym.kind(cursym) == SymbolKind::Vartype {
                if param_idx == 0
                    && cursym == predef::VOID
                    && self.src.peek_next() == predef::CLOSE_PAREN
                {
                    // explicitly empty parameter list, "(void)"
                    self.src.get_next(); // Eat ')'
                    return Ok(());
                }

                param_idx += 1;
                if param_idx >= MAX_FUNCTION_PARAMETERS {
                    return Err(self.error(
                        ErrorKind::Declaration,
                        format!(
                            "Too many parameters defined for function (max. allowed: {})",
                            MAX_FUNCTION_PARAMETERS - 1
                        ),
                    ));
                }

                let vec_idx = self.sym[funcsym].param_vartypes.len();
                self.parse_paramlist_param(funcsym, body_follows, cursym, param_is_const, vec_idx)?;

                param_is_const = false; // the modifier has been used up
                let nextsym = self.src.get_next();
                if nextsym != predef::COMMA && nextsym != predef::CLOSE_PAREN {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!(
                            "Expected ',' or ')' or an identifier, found '{}' instead",
                            self.sym.name(nextsym)
                        ),
                    ));
                }
                if nextsym == predef::CLOSE_PAREN {
                    return Ok(());
                }
                continue;
            }

            if cursym == predef::CONST {
                if self.phase == Phase::Main
                    && self.sym.kind(self.src.peek_next()) != SymbolKind::Vartype
                {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!(
                            "Expected a type after 'const', found '{}' instead",
                            self.sym.name(self.src.peek_next())
                        ),
                    ));
                }
                param_is_const = true;
                continue;
            }

            if cursym == predef::VARARGS {
                self.sym[funcsym].varargs = true;
                let paren = self.src.get_next();
                return self.expect_msg(
                    predef::CLOSE_PAREN,
                    paren,
                    Some("Expected ')' following the '...'"),
                );
            }

            return Err(self.error(
                ErrorKind::Syntax,
                format!("Unexpected '{}' in parameter list", self.sym.name(cursym)),
            ));
        }
        Err(self.error(
            ErrorKind::Internal,
            "End of input when processing parameter list",
        ))
    }

    fn parse_paramlist_param_type(&mut self, vartype: Vartype) -> CompileResult<Vartype> {
        if vartype == predef::VOID {
            return Err(self.error(
                ErrorKind::Declaration,
                "A function parameter must not have the type 'void'",
            ));
        }
        let vartype = self.set_dynpointer_in_managed_vartype(vartype);
        self.eat_dynpointer_symbol_if_present(vartype)?;

        if self.phase == Phase::Main
            && !self.sym.is_managed_vartype(vartype)
            && self.sym.is_struct_vartype(vartype)
        {
            return Err(self.error(
                ErrorKind::Type,
                format!(
                    "'{}' is non-managed; a non-managed struct cannot be passed as parameter",
                    self.sym.name(vartype)
                ),
            ));
        }
        Ok(vartype)
    }

    /// The parameter name, when one matters in this phase.
    fn parse_paramlist_param_name(&mut self, body_follows: bool) -> CompileResult<Symbol> {
        if self.phase == Phase::PreAnalyze || !body_follows {
            // The name, if present, won't be used in this phase.
            let nextsym = self.src.peek_next();
            if self.sym.is_identifier(nextsym) {
                self.src.get_next();
            }
            return Ok(Symbol::NONE);
        }

        let (_, param_name) = self.parse_varname(false, false)?;
        match self.sym.kind(param_name) {
            SymbolKind::Function => {
                let msg = self.reference_msg_sym(
                    &format!("This hides the function '{}()'", self.sym.name(param_name)),
                    param_name,
                );
                self.warn(msg);
                Ok(param_name)
            }
            SymbolKind::GlobalVar | SymbolKind::NoType => Ok(param_name),
            SymbolKind::LocalVar => {
                let msg = self.reference_msg_sym(
                    &format!(
                        "The name '{}' is already in use as a parameter",
                        self.sym.name(param_name)
                    ),
                    param_name,
                );
                Err(self.error(ErrorKind::Declaration, msg))
            }
            _ => {
                let msg = self.reference_msg_sym(
                    &format!("Parameter '{}' is already in use", self.sym.name(param_name)),
                    param_name,
                );
                Err(self.error(ErrorKind::Declaration, msg))
            }
        }
    }

    /// `= literal` after a parameter, if present.
    fn parse_paramlist_param_default(
        &mut self,
        param_vartype: Vartype,
    ) -> CompileResult<ParamDefault> {
        if self.sym.kind(self.src.peek_next()) != SymbolKind::Assign {
            return Ok(ParamDefault::None);
        }
        self.src.get_next(); // Eat '='

        let mut default_symbol = self.src.get_next();
        let mut default_is_negative = false;
        if default_symbol == predef::MINUS {
            default_is_negative = true;
            default_symbol = self.src.get_next();
        }

        if self.sym.is_dyn_vartype(param_vartype) {
            if default_symbol == predef::NULL {
                return Ok(ParamDefault::Dyn);
            }
            if !default_is_negative && self.sym.name(default_symbol) == "0" {
                self.warn("Found '0' as a default for a dynamic object (prefer 'null')");
                return Ok(ParamDefault::Dyn);
            }
            return Err(self.error(ErrorKind::Syntax, "Expected the parameter default 'null'"));
        }

        if self.sym.is_any_integer_vartype(param_vartype) {
            let value = self.int_literal_or_const_to_value(
                default_symbol,
                default_is_negative,
                "Expected an integer literal or constant as parameter default",
            )?;
            return Ok(ParamDefault::Int(value));
        }

        if self
            .sym
            .vartype_without(VartypeModifier::Const, param_vartype)
            != predef::FLOAT
        {
            return Err(self.error(
                ErrorKind::Declaration,
                "Parameter cannot have any default value",
            ));
        }

        if !default_is_negative && self.sym.name(default_symbol) == "0" {
            self.warn("Found '0' as a default for a float value (prefer '0.0')");
            return Ok(ParamDefault::Float(0.0));
        }
        let value = self.float_literal_to_value(
            default_symbol,
            default_is_negative,
            "Expected a float literal as a parameter default",
        )?;
        Ok(ParamDefault::Float(value))
    }

    fn parse_paramlist_param(
        &mut self,
        name_of_func: Symbol,
        body_follows: bool,
        param_vartype: Vartype,
        param_is_const: bool,
        param_idx: usize,
    ) -> CompileResult<()> {
        let mut param_vartype = self.parse_paramlist_param_type(param_vartype)?;
        if param_is_const {
            param_vartype = self.sym.vartype_with(VartypeModifier::Const, param_vartype);
        }

        let param_name = self.parse_paramlist_param_name(body_follows)?;
        param_vartype = self.parse_dynarray_marker_if_present(param_vartype)?;
        let param_default = self.parse_paramlist_param_default(param_vartype)?;

        self.sym[name_of_func].param_vartypes.push(param_vartype);
        self.sym[name_of_func].param_defaults.push(param_default);

        if self.phase != Phase::Main || !body_follows {
            return Ok(());
        }

        // A body follows, so the parameter becomes a local variable.
        self.parse_vardecl_var_to_sym_table(param_name, param_vartype, DeclScope::Local)?;

        let entry = &mut self.sym[param_name];
        if param_is_const {
            entry.qualifiers |= TypeQualifierSet::READONLY;
        }
        // Parameters are pushed back to front, so the first one sits on
        // top; the extra cell is the return address pushed by the call.
        entry.offset = self.scrip.offset_to_local_var_block
            - (param_idx as i32 + 1) * SIZE_OF_STACK_CELL as i32;
        let cursor = self.src.get_cursor();
        self.sym.set_declared(param_name, cursor);
        Ok(())
    }

    fn parse_funcdecl_check_defaults_match(
        &self,
        this_entry: &SymbolTableEntry,
        known_info: &SymbolTableEntry,
        body_follows: bool,
    ) -> CompileResult<()> {
        if body_follows {
            // If no parameter of the definition has a default, let the
            // mismatch through: the prototype supplies the defaults.
            let any_default = (1..=this_entry.num_params())
                .any(|param_idx| this_entry.has_param_default(param_idx));
            if !any_default {
                return Ok(());
            }
        }

        for param_idx in 1..=this_entry.num_params() {
            let here = this_entry.param_defaults[param_idx];
            let elsewhere = known_info.param_defaults[param_idx];
            if here.exists() == elsewhere.exists() && (!here.exists() || here == elsewhere) {
                continue;
            }
            let here_str = if here.exists() {
                format!("has the default {}", here.describe())
            } else {
                "doesn't have a default value".to_string()
            };
            let elsewhere_str = if elsewhere.exists() {
                format!("has the default {}", elsewhere.describe())
            } else {
                "doesn't have a default value".to_string()
            };
            let msg = self.reference_msg_loc(
                &format!(
                    "In this declaration, parameter #{} {}; in a declaration elsewhere, that parameter {}",
                    param_idx, here_str, elsewhere_str
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }
        Ok(())
    }

    /// A forward declaration exists; the real declaration must match it.
    fn parse_funcdecl_check_that_known_info_matches(
        &mut self,
        name_of_func: Symbol,
        known_info: &Option<SymbolTableEntry>,
        body_follows: bool,
    ) -> CompileResult<()> {
        let Some(known_info) = known_info else {
            return Ok(());
        };
        let this_entry = self.sym[name_of_func].clone();

        if known_info.kind != this_entry.kind {
            let msg = self.reference_msg_loc(
                &format!(
                    "'{}' is declared as a function here but differently elsewhere",
                    this_entry.name
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        let known_tq = known_info.qualifiers - TypeQualifierSet::IMPORT;
        let this_tq = this_entry.qualifiers - TypeQualifierSet::IMPORT;
        if known_tq != this_tq {
            let msg = self.reference_msg_loc(
                &format!(
                    "'{}' has the qualifiers '{}' here but '{}' elsewhere",
                    this_entry.name,
                    this_tq.describe(),
                    known_tq.describe()
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if known_info.num_params() != this_entry.num_params() {
            let msg = self.reference_msg_loc(
                &format!(
                    "Function '{}' is declared with {} mandatory parameters here, {} mandatory parameters elsewhere",
                    this_entry.name,
                    this_entry.num_params(),
                    known_info.num_params()
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if known_info.varargs != this_entry.varargs {
            let here = if this_entry.varargs {
                "is declared to accept additional parameters here"
            } else {
                "is declared to not accept additional parameters here"
            };
            let elsewhere = if known_info.varargs {
                "to accept additional parameters elsewhere"
            } else {
                "to not accept additional parameters elsewhere"
            };
            let msg = self.reference_msg_loc(
                &format!("Function '{}' {}, {}", this_entry.name, here, elsewhere),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if known_info.param_vartypes[0] != this_entry.param_vartypes[0] {
            let msg = self.reference_msg_loc(
                &format!(
                    "Return type of '{}' is declared as '{}' here, as '{}' elsewhere",
                    this_entry.name,
                    self.sym.name(this_entry.param_vartypes[0]),
                    self.sym.name(known_info.param_vartypes[0])
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        for param_idx in 1..=this_entry.num_params() {
            if known_info.param_vartypes[param_idx] != this_entry.param_vartypes[param_idx] {
                let msg = self.reference_msg_loc(
                    &format!(
                        "For function '{}': Type of parameter #{} is {} here, {} in a declaration elsewhere",
                        this_entry.name,
                        param_idx,
                        self.sym.name(this_entry.param_vartypes[param_idx]),
                        self.sym.name(known_info.param_vartypes[param_idx])
                    ),
                    known_info.declared,
                );
                return Err(self.error(ErrorKind::Declaration, msg));
            }
        }

        self.parse_funcdecl_check_defaults_match(&this_entry, known_info, body_follows)
    }

    /// Enter the function in the function or import table.
    pub(crate) fn parse_funcdecl_handle_function_or_import_index(
        &mut self,
        tqs: TypeQualifierSet,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        body_follows: bool,
    ) -> CompileResult<()> {
        if self.phase == Phase::Main {
            if body_follows {
                let func_name = self.sym.name(name_of_func).to_string();
                let (offset, function_idx) = self.scrip.add_new_function(&func_name);
                self.fcm.set_func_callpoint(self.scrip, name_of_func, offset);
                self.sym[name_of_func].offset = offset;
                self.scrip.functions[function_idx].num_params =
                    self.sym[name_of_func].num_params();
            } else if !tqs.contains(TypeQualifierSet::IMPORT) {
                // Forward declaration; the callpoint is still unknown.
                self.sym[name_of_func].offset = -1;
            } else {
                let func_name = self.sym.name(name_of_func).to_string();
                let import_idx = self.import_mgr.find_or_add(self.scrip, &func_name);
                self.sym[name_of_func].offset = import_idx as i32;
            }
        }

        if !tqs.contains(TypeQualifierSet::IMPORT) {
            return Ok(());
        }

        // Imported functions.
        self.sym[name_of_func].qualifiers |= TypeQualifierSet::IMPORT;

        if self.phase == Phase::PreAnalyze {
            self.sym[name_of_func].offset = FT_IMPORT;
            return Ok(());
        }

        if !struct_of_func.is_none() {
            // Member imports encode parameter count and varargs in the
            // stored import name.
            let encoding =
                self.sym[name_of_func].num_params() + 100 * self.sym[name_of_func].varargs as usize;
            let import_idx = self.sym[name_of_func].offset as usize;
            self.scrip.imports[import_idx].push_str(&format!("^{}", encoding));
        }

        let import_ordinal = self.sym[name_of_func].offset;
        self.fim
            .set_func_callpoint(self.scrip, name_of_func, import_ordinal);
        Ok(())
    }

    /// Parse a function declaration from directly before its `(`.
    /// Returns whether a body follows.
    pub(crate) fn parse_funcdecl(
        &mut self,
        declaration_start: usize,
        tqs: TypeQualifierSet,
        return_vartype: Vartype,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        no_loop_check: bool,
    ) -> CompileResult<bool> {
        let body_follows = self.parse_funcdecl_does_body_follow()?;

        self.parse_funcdecl_checks(
            tqs,
            struct_of_func,
            name_of_func,
            return_vartype,
            body_follows,
            no_loop_check,
        )?;

        // A forward declaration may be written with "import" (when the
        // options allow it); that isn't an import proper.
        let mut tqs = tqs;
        if tqs.contains(TypeQualifierSet::IMPORT)
            && self.sym.kind(name_of_func) == SymbolKind::Function
            && !self.sym[name_of_func]
                .qualifiers
                .contains(TypeQualifierSet::IMPORT)
        {
            if self.options.no_import_override {
                let msg = self.reference_msg_sym(
                    "In here, a function with a local body must not have an \"import\" declaration",
                    name_of_func,
                );
                return Err(self.error(ErrorKind::Declaration, msg));
            }
            tqs -= TypeQualifierSet::IMPORT;
        }

        if self.phase == Phase::Main && body_follows {
            // The parameters become local variables on nesting level 1.
            self.nest.push(crate::nesting::NestingType::Parameters);
            // The call pushes the return address above the parameters.
            self.scrip.offset_to_local_var_block += SIZE_OF_STACK_CELL as i32;
        }

        // Remember what is known so the new declaration can be compared.
        let known_info = self.copy_known_sym_info(name_of_func);

        self.parse_funcdecl_master_data_to_sym(
            tqs,
            return_vartype,
            struct_of_func,
            name_of_func,
            body_follows,
        );

        self.parse_funcdecl_paramlist(name_of_func, body_follows)?;

        self.parse_funcdecl_check_that_known_info_matches(name_of_func, &known_info, body_follows)?;

        // The prototype's defaults win.
        if let Some(known_info) = &known_info {
            self.sym[name_of_func].param_defaults = known_info.param_defaults.clone();
        }

        self.parse_funcdecl_handle_function_or_import_index(
            tqs,
            struct_of_func,
            name_of_func,
            body_follows,
        )?;

        self.sym.set_declared(name_of_func, declaration_start);
        Ok(body_follows)
    }

    // ==================== Variable declarations ====================

    fn parse_vartype_vardecl(
        &mut self,
        var_name: Symbol,
        scope_type: DeclScope,
        tqs: TypeQualifierSet,
        vartype: Vartype,
    ) -> CompileResult<()> {
        if self.phase == Phase::PreAnalyze {
            return self.parse_vartype_vardecl_pre_analyze(var_name, scope_type);
        }

        // "autoptr", "managed" and "builtin" are aspects of the vartype,
        // not of the variable having the vartype.
        self.sym[var_name].qualifiers = tqs
            - (TypeQualifierSet::AUTOPTR | TypeQualifierSet::MANAGED | TypeQualifierSet::BUILTIN);
        if tqs.contains(TypeQualifierSet::STATIC) {
            return Err(self.error(
                ErrorKind::Declaration,
                "'static' cannot be used in a variable declaration",
            ));
        }
        let in_func_body = self.nest.top_level() > PARAMETER_SCOPE;
        let is_member = self.sym.name(var_name).contains(':');
        self.check_tq(tqs, in_func_body, is_member)?;

        self.parse_vardecl(var_name, vartype, scope_type)
    }

    fn parse_vartype_vardecl_pre_analyze(
        &mut self,
        var_name: Symbol,
        scope_type: DeclScope,
    ) -> CompileResult<()> {
        if let Some(&is_global) = self.givm.get(&var_name) {
            if is_global {
                return Err(self.error(
                    ErrorKind::Declaration,
                    format!(
                        "'{}' is already defined as a global non-import variable",
                        self.sym.name(var_name)
                    ),
                ));
            }
            if scope_type == DeclScope::Global && self.options.no_import_override {
                return Err(self.error(
                    ErrorKind::Declaration,
                    format!(
                        "'{}' is defined as an import variable; that cannot be overridden here",
                        self.sym.name(var_name)
                    ),
                ));
            }
        }
        self.givm.insert(var_name, scope_type == DeclScope::Global);

        // Nothing else about the definition matters in this phase.
        Parser::skip_to(&mut self.src, &[predef::COMMA, predef::SEMICOLON]);
        Ok(())
    }

    fn parse_vardecl_check_illegal_combis(
        &self,
        vartype: Vartype,
        scope_type: DeclScope,
    ) -> CompileResult<()> {
        if vartype == predef::STRING && !self.options.old_strings {
            return Err(self.error(
                ErrorKind::Declaration,
                "Type 'string' is no longer supported; use String instead",
            ));
        }
        if vartype == predef::STRING && scope_type == DeclScope::Import {
            // A string is really a char[]; the pointer wouldn't resolve.
            return Err(self.error(
                ErrorKind::Declaration,
                "Cannot import string; use char[] instead",
            ));
        }
        if vartype == predef::VOID {
            return Err(self.error(
                ErrorKind::Type,
                "'void' is not a valid type in this context",
            ));
        }
        Ok(())
    }

    fn parse_vardecl_check_that_known_info_matches(
        &self,
        this_entry: &SymbolTableEntry,
        known_info: &Option<SymbolTableEntry>,
    ) -> CompileResult<()> {
        let Some(known_info) = known_info else {
            return Ok(());
        };

        if known_info.kind != this_entry.kind {
            let descr = match known_info.kind {
                SymbolKind::Function => "function",
                SymbolKind::GlobalVar => "global variable",
                SymbolKind::LocalVar => "local variable",
                _ => "another entity",
            };
            let msg = self.reference_msg_loc(
                &format!("This variable is declared as {} elsewhere", descr),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        let known_tq = known_info.qualifiers - TypeQualifierSet::IMPORT;
        let this_tq = this_entry.qualifiers - TypeQualifierSet::IMPORT;
        if known_tq != this_tq {
            let msg = self.reference_msg_loc(
                &format!(
                    "The variable '{}' has the qualifiers '{}' here, but '{}' elsewhere",
                    this_entry.name,
                    this_tq.describe(),
                    known_tq.describe()
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        if known_info.vartype != this_entry.vartype {
            // This covers differing array lengths, too.
            let msg = self.reference_msg_loc(
                &format!(
                    "This variable is declared as {} here, as {} elsewhere",
                    self.sym.name(this_entry.vartype),
                    self.sym.name(known_info.vartype)
                ),
                known_info.declared,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        Ok(())
    }

    /// Enter a variable into the symbol table, shadow bookkeeping included.
    pub(crate) fn parse_vardecl_var_to_sym_table(
        &mut self,
        var_name: Symbol,
        vartype: Vartype,
        scope_type: DeclScope,
    ) -> CompileResult<()> {
        if scope_type == DeclScope::Local {
            let var_entry = self.sym[var_name].clone();
            if var_entry.kind == SymbolKind::LocalVar {
                if var_entry.scope == self.nest.top_level() {
                    let msg = self.reference_msg_sym(
                        &format!(
                            "'{}' has already been defined in this scope",
                            self.sym.name(var_name)
                        ),
                        var_name,
                    );
                    return Err(self.error(ErrorKind::Declaration, msg));
                }
                if var_entry.scope == PARAMETER_SCOPE
                    && self.nest.top_level() == crate::symbols::FUNCTION_SCOPE
                {
                    let msg = self.reference_msg_sym(
                        &format!(
                            "'{}' has already been defined as a parameter",
                            self.sym.name(var_name)
                        ),
                        var_name,
                    );
                    return Err(self.error(ErrorKind::Declaration, msg));
                }
            }
            if self.nest.add_old_definition(var_name, var_entry) {
                return Err(self.error(
                    ErrorKind::Internal,
                    "AddOldDefinition: Storage place occupied",
                ));
            }
        }

        let top_level = self.nest.top_level();
        let entry = &mut self.sym[var_name];
        entry.kind = if scope_type == DeclScope::Local {
            SymbolKind::LocalVar
        } else {
            SymbolKind::GlobalVar
        };
        entry.vartype = vartype;
        entry.scope = top_level;
        let cursor = self.src.get_cursor();
        self.sym.set_declared(var_name, cursor);
        Ok(())
    }

    /// `[dims]` or `[]` after a variable name.
    fn parse_array(&mut self, vartype: Vartype) -> CompileResult<Vartype> {
        self.src.get_next(); // Eat '['

        if self.phase == Phase::PreAnalyze {
            // Skip the sequence of "[...]".
            loop {
                self.skip_to_close(predef::CLOSE_BRACKET)?;
                if self.src.peek_next() != predef::OPEN_BRACKET {
                    return Ok(vartype);
                }
                self.src.get_next(); // Eat '['
            }
        }

        if self.src.peek_next() == predef::CLOSE_BRACKET {
            // Dynamic array.
            self.src.get_next(); // Eat ']'
            if vartype == predef::STRING {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Dynamic arrays of old-style strings are not supported",
                ));
            }
            if !self.sym.is_any_integer_vartype(vartype)
                && !self.sym.is_managed_vartype(vartype)
                && vartype != predef::FLOAT
            {
                return Err(self.error(
                    ErrorKind::Declaration,
                    format!(
                        "Can only have dynamic arrays of integer types, float or managed structs. '{}' isn't any of this",
                        self.sym.name(vartype)
                    ),
                ));
            }
            return Ok(self.sym.vartype_with(VartypeModifier::Dynarray, vartype));
        }

        // Classic array; the sizes must be constant.
        let mut dims = Vec::new();
        loop {
            let dim_symbol = self.src.get_next();
            let dimension = self.int_literal_or_const_to_value(
                dim_symbol,
                false,
                "Expected a constant integer value for array dimension",
            )?;
            if dimension < 1 {
                return Err(self.error(
                    ErrorKind::Semantic,
                    format!(
                        "Array dimension must be at least 1, found {} instead",
                        dimension
                    ),
                ));
            }
            dims.push(dimension as u32);

            let punctuation = self.src.get_next();
            self.expect_any(&[predef::COMMA, predef::CLOSE_BRACKET], punctuation)?;
            if punctuation == predef::COMMA {
                continue;
            }
            if self.src.peek_next() != predef::OPEN_BRACKET {
                break;
            }
            self.src.get_next(); // Eat '['
        }
        Ok(self.sym.vartype_with_array(&dims, vartype))
    }

    /// The constant initializer of a global variable, as raw bytes.
    fn parse_vardecl_initial_val_assignment(
        &mut self,
        vartype: Vartype,
    ) -> CompileResult<Vec<u8>> {
        self.src.get_next(); // Eat '='

        if self.sym.is_managed_vartype(vartype) || self.sym.is_dyn_vartype(vartype) {
            return Err(self.error(
                ErrorKind::Declaration,
                "Cannot assign an initial value to a managed type or String",
            ));
        }
        if self.sym.is_struct_vartype(vartype) {
            return Err(self.error(ErrorKind::Declaration, "Cannot initialize struct type"));
        }

        if vartype == predef::STRING {
            // Old-style string buffer.
            let literal_sym = self.src.get_next();
            if self.sym.kind(literal_sym) != SymbolKind::LiteralString {
                return Err(self.error(ErrorKind::Syntax, "Expected a literal string"));
            }
            let content = string_literal_content(self.sym.name(literal_sym)).to_string();
            if content.len() >= STRINGBUFFER_LENGTH {
                return Err(self.error(
                    ErrorKind::Semantic,
                    format!(
                        "Initializer string is too long (max. chars allowed: {})",
                        STRINGBUFFER_LENGTH - 1
                    ),
                ));
            }
            let mut bytes = content.into_bytes();
            bytes.resize(STRINGBUFFER_LENGTH, 0);
            return Ok(bytes);
        }

        let mut is_neg = false;
        if self.src.peek_next() == predef::MINUS {
            is_neg = true;
            self.src.get_next();
        }

        if vartype == predef::FLOAT {
            let value_sym = self.src.get_next();
            let value =
                self.float_literal_to_value(value_sym, is_neg, "Expected floating point value after '='")?;
            // Stored as the raw bit pattern so initialization stays a
            // byte copy in the runtime image.
            return Ok(value.to_bits().to_le_bytes().to_vec());
        }

        let value_sym = self.src.get_next();
        let value =
            self.int_literal_or_const_to_value(value_sym, is_neg, "Expected integer value after '='")?;
        Ok(value.to_le_bytes().to_vec())
    }

    fn parse_vardecl_global_import(
        &mut self,
        var_name: Symbol,
        has_initial_assignment: bool,
    ) -> CompileResult<()> {
        if has_initial_assignment {
            return Err(self.error(
                ErrorKind::Declaration,
                "Imported variables cannot have any initial assignment",
            ));
        }

        if self.givm.get(&var_name) == Some(&true) {
            // The global non-import declaration wins; skip this one.
            return Ok(());
        }

        let name = self.sym.name(var_name).to_string();
        let import_idx = self.scrip.add_new_import(&name);
        self.sym[var_name].qualifiers |= TypeQualifierSet::IMPORT;
        self.sym[var_name].offset = import_idx as i32;
        Ok(())
    }

    fn parse_vardecl_global_no_import(
        &mut self,
        var_name: Symbol,
        vartype: Vartype,
        has_initial_assignment: bool,
    ) -> CompileResult<()> {
        let initial_val = if has_initial_assignment {
            Some(self.parse_vardecl_initial_val_assignment(vartype)?)
        } else {
            None
        };
        let var_size = self.sym.get_size(vartype);
        let offset = self.scrip.add_global(var_size, initial_val.as_deref());
        self.sym[var_name].offset = offset;
        Ok(())
    }

    fn parse_vardecl_local(
        &mut self,
        var_name: Symbol,
        vartype: Vartype,
        has_initial_assignment: bool,
    ) -> CompileResult<()> {
        let var_size = self.sym.get_size(vartype);
        let is_dyn = self.sym.is_dyn_vartype(vartype);

        self.sym[var_name].offset = self.scrip.offset_to_local_var_block;

        if !has_initial_assignment {
            // Initialize the variable with binary zeroes.
            self.scrip.write_cmd1(Opcode::LoadSpOffs, 0);
            if is_dyn {
                self.scrip.write_cmd0(Opcode::MemZeroPtr);
            } else {
                self.scrip
                    .write_cmd1(Opcode::ZeroMemory, var_size as CodeCell);
            }
            self.scrip.write_cmd2(Opcode::Add, SP, var_size as CodeCell);
            self.scrip.offset_to_local_var_block += var_size as i32;
            return Ok(());
        }

        // "readonly" locals get their only write here, so the standard
        // assignment path (which rejects readonly) can't be used.
        self.src.get_next(); // Eat '='
        self.parse_expression()?;

        // The vartypes must match even though the LHS may be readonly. A
        // const string initializing a string is fine: it gets copied.
        let lhsvartype = vartype;
        let rhsvartype = self.scrip.ax_vartype;
        let both_old_strings = self.sym.vartype_without(VartypeModifier::Const, rhsvartype)
            == predef::STRING
            && self.sym.vartype_without(VartypeModifier::Const, lhsvartype) == predef::STRING;
        if self.is_vartype_mismatch_oneway(rhsvartype, lhsvartype) && !both_old_strings {
            return Err(self.error(
                ErrorKind::Type,
                format!(
                    "Cannot assign a type '{}' value to a type '{}' variable",
                    self.sym.name(rhsvartype),
                    self.sym.name(lhsvartype)
                ),
            ));
        }

        if var_size == SIZE_OF_INT && !is_dyn {
            // This push both stores the initializer value and reserves the
            // variable's cell on the stack.
            self.scrip.push_reg(Register::Ax);
            return Ok(());
        }

        self.convert_ax_string_to_string_object(vartype);
        self.scrip.write_cmd1(Opcode::LoadSpOffs, 0);
        if self.sym.vartype_without(VartypeModifier::Const, lhsvartype) == predef::STRING {
            self.access_data_strcpy();
        } else {
            let opcode = if is_dyn {
                Opcode::MemWritePtr
            } else {
                write_cmd_for_size(var_size)
            };
            self.scrip.write_cmd1(opcode, AX);
        }
        self.scrip.write_cmd2(Opcode::Add, SP, var_size as CodeCell);
        self.scrip.offset_to_local_var_block += var_size as i32;
        Ok(())
    }

    fn parse_vardecl0(
        &mut self,
        var_name: Symbol,
        vartype: Vartype,
        scope_type: DeclScope,
    ) -> CompileResult<()> {
        let mut vartype = vartype;
        let mut next_sym = self.src.peek_next();
        if next_sym == predef::OPEN_BRACKET {
            vartype = self.parse_array(vartype)?;
            next_sym = self.src.peek_next();
        }

        self.parse_vardecl_var_to_sym_table(var_name, vartype, scope_type)?;

        let has_initial_assignment = next_sym == predef::ASSIGN;

        match scope_type {
            DeclScope::Global => {
                self.parse_vardecl_global_no_import(var_name, vartype, has_initial_assignment)
            }
            DeclScope::Import => self.parse_vardecl_global_import(var_name, has_initial_assignment),
            DeclScope::Local => {
                self.parse_vardecl_local(var_name, vartype, has_initial_assignment)
            }
        }
    }

    pub(crate) fn parse_vardecl(
        &mut self,
        var_name: Symbol,
        vartype: Vartype,
        scope_type: DeclScope,
    ) -> CompileResult<()> {
        self.parse_vardecl_check_illegal_combis(vartype, scope_type)?;

        if scope_type == DeclScope::Local {
            match self.sym.kind(var_name) {
                SymbolKind::Function => {
                    let msg = self.reference_msg_sym(
                        &format!("This hides the function '{}()'", self.sym.name(var_name)),
                        var_name,
                    );
                    self.warn(msg);
                }
                SymbolKind::GlobalVar | SymbolKind::LocalVar | SymbolKind::NoType => {}
                SymbolKind::Vartype => {
                    let msg = self.reference_msg_sym(
                        &format!(
                            "'{}' is in use as a type elsewhere",
                            self.sym.name(var_name)
                        ),
                        var_name,
                    );
                    return Err(self.error(ErrorKind::Declaration, msg));
                }
                _ => {
                    let msg = self.reference_msg_sym(
                        &format!("'{}' is already in use elsewhere", self.sym.name(var_name)),
                        var_name,
                    );
                    return Err(self.error(ErrorKind::Declaration, msg));
                }
            }
        }

        let known_info = if scope_type == DeclScope::Global {
            self.copy_known_sym_info(var_name)
        } else {
            None
        };

        self.parse_vardecl0(var_name, vartype, scope_type)?;

        if scope_type == DeclScope::Global {
            let this_entry = self.sym[var_name].clone();
            return self.parse_vardecl_check_that_known_info_matches(&this_entry, &known_info);
        }
        Ok(())
    }

    // ==================== Struct declarations ====================

    fn parse_struct_set_type_in_symboltable(&mut self, stname: Symbol, tqs: TypeQualifierSet) {
        let cursor = self.src.get_cursor();
        let entry = &mut self.sym[stname];
        entry.kind = SymbolKind::Vartype;
        entry.parent = Symbol::NONE;
        entry.size = 0;
        entry.flags |= EntryFlags::STRUCT_VARTYPE;
        if tqs.contains(TypeQualifierSet::MANAGED) {
            entry.flags |= EntryFlags::STRUCT_MANAGED;
        }
        if tqs.contains(TypeQualifierSet::BUILTIN) {
            entry.flags |= EntryFlags::STRUCT_BUILTIN;
        }
        if tqs.contains(TypeQualifierSet::AUTOPTR) {
            entry.flags |= EntryFlags::STRUCT_AUTOPTR;
        }
        self.sym.set_declared(stname, cursor);
    }

    fn parse_struct_extends_clause(
        &mut self,
        stname: Symbol,
        size_so_far: &mut u32,
    ) -> CompileResult<()> {
        self.src.get_next(); // Eat 'extends'
        let parent = self.src.get_next();

        if self.phase == Phase::PreAnalyze {
            return Ok(()); // No further analysis in the first phase.
        }

        if self.sym.kind(parent) != SymbolKind::Vartype {
            return Err(self.error(ErrorKind::Declaration, "Expected a struct type here"));
        }
        if !self.sym.is_struct_vartype(parent) {
            return Err(self.error(ErrorKind::Declaration, "Must extend a struct type"));
        }
        if !self.sym.is_managed_vartype(parent) && self.sym.is_managed_vartype(stname) {
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "Managed struct cannot extend the unmanaged struct '{}'",
                    self.sym.name(parent)
                ),
            ));
        }
        if self.sym.is_managed_vartype(parent) && !self.sym.is_managed_vartype(stname) {
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "Unmanaged struct cannot extend the managed struct '{}'",
                    self.sym.name(parent)
                ),
            ));
        }
        if self.sym.is_builtin(parent) && !self.sym.is_builtin(stname) {
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "The built-in type '{}' cannot be extended by a concrete struct. Use extender methods instead",
                    self.sym.name(parent)
                ),
            ));
        }
        *size_so_far = self.sym.get_size(parent);
        self.sym[stname].parent = parent;
        Ok(())
    }

    fn parse_struct_check_component_vartype(
        &self,
        stname: Symbol,
        vartype: Vartype,
    ) -> CompileResult<()> {
        if vartype == stname && !self.sym.is_managed_vartype(vartype) {
            // "struct A { A a; }" would be infinitely large.
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "Struct '{}' cannot be a member of itself",
                    self.sym.name(vartype)
                ),
            ));
        }

        match self.sym.kind(vartype) {
            SymbolKind::NoType => Err(self.error(
                ErrorKind::Declaration,
                format!("Type '{}' is undefined", self.sym.name(vartype)),
            )),
            SymbolKind::Vartype | SymbolKind::UndefinedStruct => Ok(()),
            _ => {
                let msg = self.reference_msg_sym(
                    &format!(
                        "'{}' should be a typename but is in use differently",
                        self.sym.name(vartype)
                    ),
                    vartype,
                );
                Err(self.error(ErrorKind::Declaration, msg))
            }
        }
    }

    /// No ancestor may already define a component of this name.
    fn parse_struct_check_for_compo_in_ancestor(
        &mut self,
        orig: Symbol,
        compo: Symbol,
        act_struct: Symbol,
    ) -> CompileResult<()> {
        if act_struct.is_none() {
            return Ok(());
        }
        let member = self.sym.mangle(act_struct, compo);
        if self.sym.kind(member) != SymbolKind::NoType {
            let msg = self.reference_msg_sym(
                &format!(
                    "The struct '{}' extends '{}', and '{}' is already defined",
                    self.sym.name(orig),
                    self.sym.name(act_struct),
                    self.sym.name(member)
                ),
                member,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }
        let parent = self.sym[act_struct].parent;
        self.parse_struct_check_for_compo_in_ancestor(orig, compo, parent)
    }

    fn parse_struct_funcdecl(
        &mut self,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        tqs: TypeQualifierSet,
        vartype: Vartype,
    ) -> CompileResult<()> {
        if tqs.contains(TypeQualifierSet::WRITEPROTECTED) {
            return Err(self.error(
                ErrorKind::Declaration,
                "'writeprotected' does not apply to functions",
            ));
        }

        let declaration_start = self.src.get_cursor();
        self.src.get_next(); // Eat '('

        self.sym[name_of_func].flags |= EntryFlags::STRUCT_MEMBER;
        self.sym[name_of_func].parent = struct_of_func;

        let body_follows = self.parse_funcdecl(
            declaration_start,
            tqs,
            vartype,
            struct_of_func,
            name_of_func,
            false,
        )?;
        if body_follows {
            return Err(self.error(
                ErrorKind::Declaration,
                "Cannot code a function body within a struct definition",
            ));
        }

        self.expect(predef::SEMICOLON, self.src.peek_next())
    }

    // ==================== Attributes ====================

    fn parse_struct_attribute_check_func(
        &mut self,
        name_of_func: Symbol,
        is_setter: bool,
        is_indexed: bool,
        vartype: Vartype,
    ) -> CompileResult<()> {
        let entry = self.sym[name_of_func].clone();
        let num_parameters_wanted = usize::from(is_indexed) + usize::from(is_setter);
        if num_parameters_wanted != entry.num_params() {
            let msg = self.reference_msg_sym(
                &format!(
                    "The attribute function '{}' should have {} parameter(s) but is declared with {} parameter(s) instead",
                    entry.name,
                    num_parameters_wanted,
                    entry.num_params()
                ),
                name_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        let ret_vartype = if is_setter { predef::VOID } else { vartype };
        if entry.param_vartypes[0] != ret_vartype {
            let msg = self.reference_msg_sym(
                &format!(
                    "The attribute function '{}' must return type '{}' but returns '{}' instead",
                    entry.name,
                    self.sym.name(ret_vartype),
                    self.sym.name(entry.param_vartypes[0])
                ),
                name_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        let mut p_idx = 1usize;
        if is_indexed {
            if entry.param_vartypes[p_idx] != predef::INT {
                let msg = self.reference_msg_sym(
                    &format!(
                        "Parameter #{} of attribute function '{}' must have type integer but doesn't",
                        p_idx, entry.name
                    ),
                    name_of_func,
                );
                return Err(self.error(ErrorKind::Declaration, msg));
            }
            p_idx += 1;
        }

        if is_setter && entry.param_vartypes[p_idx] != vartype {
            let msg = self.reference_msg_sym(
                &format!(
                    "Parameter #{} of attribute function '{}' must have type '{}'",
                    p_idx,
                    entry.name,
                    self.sym.name(vartype)
                ),
                name_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        Ok(())
    }

    fn parse_struct_attribute_param_list(
        &mut self,
        name_of_func: Symbol,
        is_setter: bool,
        is_indexed: bool,
        vartype: Vartype,
    ) {
        let entry = &mut self.sym[name_of_func];
        entry.param_vartypes.truncate(1);
        if is_indexed {
            entry.param_vartypes.push(predef::INT);
        }
        if is_setter {
            entry.param_vartypes.push(vartype);
        }
        let len = entry.param_vartypes.len();
        entry.param_defaults = vec![ParamDefault::None; len];
    }

    /// An attribute corresponds to a getter and a setter; declare one.
    fn parse_struct_attribute_declare_func(
        &mut self,
        tqs: TypeQualifierSet,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        is_setter: bool,
        is_indexed: bool,
        vartype: Vartype,
    ) -> CompileResult<()> {
        let kind = self.sym.kind(name_of_func);
        if kind != SymbolKind::Function && kind != SymbolKind::NoType {
            let msg = self.reference_msg_sym(
                &format!(
                    "Attribute uses '{}' as a function, this clashes with a declaration elsewhere",
                    self.sym.name(name_of_func)
                ),
                name_of_func,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }
        if kind == SymbolKind::Function {
            self.parse_struct_attribute_check_func(name_of_func, is_setter, is_indexed, vartype)?;
        }

        // Assume attribute functions are imported unless a local body
        // already won.
        let mut tqs = tqs | TypeQualifierSet::IMPORT;
        if kind == SymbolKind::Function
            && !self.sym[name_of_func]
                .qualifiers
                .contains(TypeQualifierSet::IMPORT)
        {
            if self.options.no_import_override {
                let msg = self.reference_msg_sym(
                    "In here, attribute functions may not be defined locally",
                    name_of_func,
                );
                return Err(self.error(ErrorKind::Declaration, msg));
            }
            tqs -= TypeQualifierSet::IMPORT;
        }

        self.sym[name_of_func].parent = struct_of_func;
        self.sym[name_of_func].flags |= EntryFlags::STRUCT_MEMBER;

        let return_vartype = if is_setter { predef::VOID } else { vartype };
        tqs -= TypeQualifierSet::ATTRIBUTE;
        self.parse_funcdecl_master_data_to_sym(
            tqs,
            return_vartype,
            struct_of_func,
            name_of_func,
            false,
        );

        self.parse_struct_attribute_param_list(name_of_func, is_setter, is_indexed, vartype);

        let body_follows = false; // inside a struct definition
        self.parse_funcdecl_handle_function_or_import_index(
            tqs,
            struct_of_func,
            name_of_func,
            body_follows,
        )
    }

    fn parse_struct_attribute(
        &mut self,
        tqs: TypeQualifierSet,
        stname: Symbol,
        vname: Symbol,
        vartype: Vartype,
    ) -> CompileResult<()> {
        let declaration_start = self.src.get_cursor();
        // "readonly" means there is no setter; the vartype itself is not
        // readonly.
        let attrib_is_readonly = tqs.contains(TypeQualifierSet::READONLY);
        let tqs = tqs - TypeQualifierSet::READONLY;

        let mut attrib_is_indexed = false;
        if self.src.peek_next() == predef::OPEN_BRACKET {
            attrib_is_indexed = true;
            self.src.get_next();
            if self.src.get_next() != predef::CLOSE_BRACKET {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Cannot specify array size for attribute",
                ));
            }
        }

        self.sym[vname].kind = SymbolKind::Attribute;
        if attrib_is_indexed && self.phase == Phase::Main {
            let wrapped = self
                .sym
                .vartype_with(VartypeModifier::Dynarray, self.sym[vname].vartype);
            self.sym[vname].vartype = wrapped;
        }

        // Declare the getter, e.g. get_X() / geti_X(int index).
        let get_stem = self.construct_attribute_func_name(vname, false, attrib_is_indexed);
        let get_func_name = self.sym.mangle(stname, get_stem);
        self.parse_struct_attribute_declare_func(
            tqs,
            stname,
            get_func_name,
            false,
            attrib_is_indexed,
            vartype,
        )?;
        self.sym.set_declared(get_func_name, declaration_start);

        if attrib_is_readonly {
            return Ok(());
        }

        // Declare the setter, e.g. set_X(value) / seti_X(int index, value).
        let set_stem = self.construct_attribute_func_name(vname, true, attrib_is_indexed);
        let set_func_name = self.sym.mangle(stname, set_stem);
        self.parse_struct_attribute_declare_func(
            tqs,
            stname,
            set_func_name,
            true,
            attrib_is_indexed,
            vartype,
        )?;
        self.sym.set_declared(set_func_name, declaration_start);

        Ok(())
    }

    // ==================== Struct members ====================

    fn parse_struct_variable_or_attribute_defn(
        &mut self,
        tqs: TypeQualifierSet,
        vartype: Vartype,
        stname: Symbol,
        vname: Symbol,
        size_so_far: &mut u32,
    ) -> CompileResult<()> {
        if self.phase == Phase::Main {
            if self.sym.is_builtin(vartype) && !self.sym.is_dyn_vartype(vartype) {
                return Err(self.error(
                    ErrorKind::Declaration,
                    format!(
                        "'{}' is a builtin non-managed struct; struct members of that type are not supported",
                        self.sym.name(vartype)
                    ),
                ));
            }

            if tqs.contains(TypeQualifierSet::IMPORT) && !tqs.contains(TypeQualifierSet::ATTRIBUTE)
            {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Can't import struct component variables; import the whole struct instead",
                ));
            }

            if self.sym.is_managed_vartype(vartype)
                && self.sym.is_managed_vartype(stname)
                && !tqs.contains(TypeQualifierSet::ATTRIBUTE)
            {
                // An engine restriction, not a compiler one.
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Cannot currently have managed variable components in managed struct",
                ));
            }

            let entry = &mut self.sym[vname];
            entry.kind = SymbolKind::StructComponent;
            entry.parent = stname;
            entry.offset = *size_so_far as i32;
            entry.vartype = vartype;
            // "autoptr", "managed" and "builtin" belong to the vartype, not
            // to the variable having the vartype.
            entry.qualifiers = tqs
                - (TypeQualifierSet::AUTOPTR
                    | TypeQualifierSet::MANAGED
                    | TypeQualifierSet::BUILTIN);
        }

        if tqs.contains(TypeQualifierSet::ATTRIBUTE) {
            return self.parse_struct_attribute(tqs, stname, vname, vartype);
        }

        if self.src.peek_next() == predef::OPEN_BRACKET {
            let member_vartype = self.sym[vname].vartype;
            let array_vartype = self.parse_array(member_vartype)?;
            self.sym[vname].vartype = array_vartype;
        }

        *size_so_far += self.sym.size_of_var(vname);
        Ok(())
    }

    fn parse_struct_member_defn(
        &mut self,
        name_of_struct: Symbol,
        tqs: TypeQualifierSet,
        vartype: Vartype,
        size_so_far: &mut u32,
    ) -> CompileResult<()> {
        let (_, component) = self.parse_varname(false, true)?;
        let var_or_func_name = self.sym.mangle(name_of_struct, component);
        let is_function = self.src.peek_next() == predef::OPEN_PAREN;

        // Everything declared within "struct X { }" gets the member flag,
        // functions included.
        self.sym[var_or_func_name].flags |= EntryFlags::STRUCT_MEMBER;
        self.sym[var_or_func_name].parent = name_of_struct;
        self.sym[name_of_struct].children.push(var_or_func_name);

        if is_function {
            return self.parse_struct_funcdecl(name_of_struct, var_or_func_name, tqs, vartype);
        }

        let declaration_start = self.src.get_cursor();
        if self.sym.is_dynarray_vartype(vartype) {
            // e.g. "int [] zonk;"
            return Err(self.error(ErrorKind::Syntax, "Expected '('"));
        }

        if self.phase == Phase::Main {
            if self.sym.kind(var_or_func_name) != SymbolKind::NoType {
                let msg = self.reference_msg_sym(
                    &format!("'{}' is already defined", self.sym.name(var_or_func_name)),
                    var_or_func_name,
                );
                return Err(self.error(ErrorKind::Declaration, msg));
            }

            // The name mustn't exist in any ancestor either.
            let parent = self.sym[name_of_struct].parent;
            self.parse_struct_check_for_compo_in_ancestor(name_of_struct, component, parent)?;
        }

        self.parse_struct_variable_or_attribute_defn(
            tqs,
            vartype,
            name_of_struct,
            var_or_func_name,
            size_so_far,
        )?;

        self.sym.set_declared(var_or_func_name, declaration_start);
        Ok(())
    }

    fn parse_struct_vartype(
        &mut self,
        name_of_struct: Symbol,
        tqs: TypeQualifierSet,
        vartype: Vartype,
        size_so_far: &mut u32,
    ) -> CompileResult<()> {
        if self.phase == Phase::Main {
            self.parse_struct_check_component_vartype(name_of_struct, vartype)?;
        }

        let mut vartype = self.set_dynpointer_in_managed_vartype(vartype);
        self.eat_dynpointer_symbol_if_present(vartype)?;

        // "int [] func(...)"
        vartype = self.parse_dynarray_marker_if_present(vartype)?;

        if self.src.peek_next() == predef::NOLOOPCHECK {
            return Err(self.error(ErrorKind::Declaration, "Cannot use 'noloopcheck' here"));
        }

        // One vartype, then members (or one member function) of that type.
        loop {
            self.parse_struct_member_defn(name_of_struct, tqs, vartype, size_so_far)?;

            let punctuation = self.src.get_next();
            self.expect_any(&[predef::COMMA, predef::SEMICOLON], punctuation)?;
            if punctuation == predef::SEMICOLON {
                return Ok(());
            }
        }
    }

    /// `struct` was eaten; parse the full struct declaration.
    pub(crate) fn parse_struct(&mut self, tqs: TypeQualifierSet) -> CompileResult<()> {
        let start_of_struct_decl = self.src.get_cursor();
        let stname = self.src.get_next();

        if !matches!(
            self.sym.kind(stname),
            SymbolKind::NoType | SymbolKind::UndefinedStruct
        ) {
            let msg = self.reference_msg_sym(
                &format!("'{}' is already defined", self.sym.name(stname)),
                stname,
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }

        self.parse_struct_set_type_in_symboltable(stname, tqs);

        // The struct that implements new strings.
        if tqs.contains(TypeQualifierSet::STRINGSTRUCT) {
            if let Some(existing) = self.sym.string_struct_sym() {
                if existing != stname {
                    return Err(self.error(
                        ErrorKind::Declaration,
                        format!(
                            "The stringstruct type is already defined to be {}",
                            self.sym.name(existing)
                        ),
                    ));
                }
            }
            self.sym.set_string_struct_sym(stname);
        }

        let mut size_so_far: u32 = 0;

        if self.src.peek_next() == predef::EXTENDS {
            self.parse_struct_extends_clause(stname, &mut size_so_far)?;
        }

        // Forward declaration of the struct type.
        if self.src.peek_next() == predef::SEMICOLON {
            if !tqs.contains(TypeQualifierSet::MANAGED) {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Forward-declared structs must be 'managed'",
                ));
            }
            self.src.get_next(); // Eat ';'
            let entry = &mut self.sym[stname];
            entry.kind = SymbolKind::UndefinedStruct;
            entry.flags |= EntryFlags::STRUCT_MANAGED;
            entry.size = 0;
            return Ok(());
        }

        let brace = self.src.get_next();
        self.expect(predef::OPEN_BRACE, brace)?;

        // Member declarations.
        while self.src.peek_next() != predef::CLOSE_BRACE {
            if self.src.reached_eof() {
                return Err(self.error(ErrorKind::Syntax, "Unexpected end of input"));
            }
            self.cur_line = self.src.lineno();
            self.scrip.refresh_lineno(self.cur_line);
            let member_tqs = self.parse_qualifiers()?;
            self.check_tq(member_tqs, false, true)?;
            let vartype = self.src.get_next();
            self.parse_struct_vartype(stname, member_tqs, vartype, &mut size_so_far)?;
        }

        if self.phase == Phase::Main {
            // Round up to the struct alignment.
            if size_so_far % STRUCT_ALIGNMENT != 0 {
                size_so_far += STRUCT_ALIGNMENT - size_so_far % STRUCT_ALIGNMENT;
            }
            self.sym[stname].size = size_so_far;
        }

        self.src.get_next(); // Eat '}'

        let nextsym = self.src.peek_next();
        if nextsym == predef::SEMICOLON {
            if tqs.contains(TypeQualifierSet::READONLY) {
                // Only now do we know there is no following declaration, so
                // "readonly" was wrong. Point at the struct head.
                self.src.set_cursor(start_of_struct_decl);
                self.cur_line = self.src.lineno();
                return Err(self.error(
                    ErrorKind::Declaration,
                    "'readonly' can only be used in a variable declaration",
                ));
            }
            self.src.get_next(); // Eat ';'
            return Ok(());
        }

        // Warn about a probably-forgotten ';' when the next symbol can't
        // begin a declaration.
        let type_of_next = self.sym.kind(nextsym);
        if !matches!(
            type_of_next,
            SymbolKind::NoType | SymbolKind::Function | SymbolKind::GlobalVar | SymbolKind::LocalVar
        ) && nextsym != predef::NOLOOPCHECK
            && nextsym != predef::DYNPOINTER
        {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Unexpected '{}' (did you forget a ';'?)",
                    self.sym.name(nextsym)
                ),
            ));
        }

        // The struct that was just defined is the vartype of a declaration.
        self.parse_vartype(stname, tqs)
    }

    // ==================== Enum declarations ====================

    fn parse_enum_name_to_symtable(&mut self, enum_name: Symbol) -> CompileResult<()> {
        if self.sym.kind(enum_name) != SymbolKind::NoType {
            let msg = self.reference_msg_loc(
                &format!("'{}' is already defined", self.sym.name(enum_name)),
                self.sym.declared(enum_name),
            );
            return Err(self.error(ErrorKind::Declaration, msg));
        }
        let entry = &mut self.sym[enum_name];
        entry.kind = SymbolKind::Vartype;
        entry.size = SIZE_OF_INT;
        entry.vartype = predef::INT;
        Ok(())
    }

    fn parse_enum_assigned_value(&mut self) -> CompileResult<i32> {
        self.src.get_next(); // Eat '='

        let mut item_value = self.src.get_next();
        let mut is_neg = false;
        if item_value == predef::MINUS {
            is_neg = true;
            item_value = self.src.get_next();
        }

        self.int_literal_or_const_to_value(
            item_value,
            is_neg,
            "Expected integer or integer constant after '='",
        )
    }

    fn parse_enum_item_to_symtable(
        &mut self,
        enum_name: Symbol,
        item_name: Symbol,
        current_constant_value: i32,
    ) {
        let entry = &mut self.sym[item_name];
        entry.kind = SymbolKind::Constant;
        entry.vartype = enum_name;
        entry.scope = 0;
        entry.qualifiers = TypeQualifierSet::READONLY;
        entry.parent = enum_name;
        // The offset doubles as the constant's value.
        entry.offset = current_constant_value;
        if self.phase == Phase::Main {
            let cursor = self.src.get_cursor();
            self.sym.set_declared(item_name, cursor);
        }

        self.sym[enum_name].children.push(item_name);
    }

    /// `enum` was eaten; parse `Name { Item [= value] , ... };`.
    pub(crate) fn parse_enum(&mut self, tqs: TypeQualifierSet) -> CompileResult<()> {
        let start_of_enum_decl = self.src.get_cursor();
        if !self.name_of_current_func.is_none() {
            return Err(self.error(
                ErrorKind::Declaration,
                "Enum declaration is not allowed within a function body",
            ));
        }
        if tqs.contains(TypeQualifierSet::BUILTIN) {
            return Err(self.error(
                ErrorKind::Declaration,
                "'builtin' can only be used in a struct declaration",
            ));
        }

        let enum_name = self.src.get_next();
        self.parse_enum_name_to_symtable(enum_name)?;

        let brace = self.src.get_next();
        self.expect(predef::OPEN_BRACE, brace)?;

        let mut current_constant_value: i32 = 0;

        loop {
            let item_name = self.src.get_next();
            if item_name == predef::CLOSE_BRACE {
                break; // the list is empty or ends with a trailing ','
            }

            if self.phase == Phase::Main {
                if self.sym.kind(item_name) == SymbolKind::Constant {
                    let msg = self.reference_msg_sym(
                        &format!(
                            "'{}' is already defined as a constant or enum value",
                            self.sym.name(item_name)
                        ),
                        item_name,
                    );
                    return Err(self.error(ErrorKind::Declaration, msg));
                }
                if self.sym.kind(item_name) != SymbolKind::NoType {
                    return Err(self.error(
                        ErrorKind::Declaration,
                        format!(
                            "Expected '}}' or an unused identifier, found '{}' instead",
                            self.sym.name(item_name)
                        ),
                    ));
                }
            }

            current_constant_value += 1;

            let punctuation = self.src.peek_next();
            self.expect_any(
                &[predef::COMMA, predef::ASSIGN, predef::CLOSE_BRACE],
                punctuation,
            )?;

            if punctuation == predef::ASSIGN {
                // The value of this item is given explicitly.
                current_constant_value = self.parse_enum_assigned_value()?;
            }

            self.parse_enum_item_to_symtable(enum_name, item_name, current_constant_value);

            let comma_or_brace = self.src.get_next();
            self.expect_any(&[predef::COMMA, predef::CLOSE_BRACE], comma_or_brace)?;
            if comma_or_brace == predef::COMMA {
                continue;
            }
            break;
        }

        let nextsym = self.src.peek_next();
        if nextsym == predef::SEMICOLON {
            self.src.get_next(); // Eat ';'
            if tqs.contains(TypeQualifierSet::READONLY) {
                self.src.set_cursor(start_of_enum_decl);
                self.cur_line = self.src.lineno();
                return Err(self.error(
                    ErrorKind::Declaration,
                    "'readonly' can only be used in a variable declaration",
                ));
            }
            return Ok(());
        }

        let type_of_next = self.sym.kind(nextsym);
        if !matches!(
            type_of_next,
            SymbolKind::NoType | SymbolKind::Function | SymbolKind::GlobalVar | SymbolKind::LocalVar
        ) && nextsym != predef::NOLOOPCHECK
            && nextsym != predef::DYNPOINTER
        {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Unexpected '{}' (did you forget a ';'?)",
                    self.sym.name(nextsym)
                ),
            ));
        }

        // The enum that was just defined is the vartype of a declaration.
        self.parse_vartype(enum_name, tqs)
    }

    // ==================== Exports ====================

    /// `export ident (, ident)* ;`
    pub(crate) fn parse_export(&mut self) -> CompileResult<()> {
        if self.phase == Phase::PreAnalyze {
            Parser::skip_to(&mut self.src, &[predef::SEMICOLON]);
            self.src.get_next(); // Eat ';'
            return Ok(());
        }

        loop {
            let export_sym = self.src.get_next();
            let export_kind = self.sym.kind(export_sym);
            if export_kind != SymbolKind::GlobalVar && export_kind != SymbolKind::Function {
                return Err(self.error(
                    ErrorKind::Declaration,
                    format!(
                        "Can only export global variables and functions, not '{}'",
                        self.sym.name(export_sym)
                    ),
                ));
            }
            if self.sym[export_sym]
                .qualifiers
                .contains(TypeQualifierSet::IMPORT)
            {
                return Err(self.error(
                    ErrorKind::Declaration,
                    format!("Cannot export the imported '{}'", self.sym.name(export_sym)),
                ));
            }
            if self.sym.get_vartype(export_sym) == predef::STRING {
                return Err(self.error(
                    ErrorKind::Declaration,
                    "Cannot export 'string'; use char[200] instead",
                ));
            }

            // With EXPORTALL, functions get exported at the end anyway.
            if !(self.options.export_all && export_kind == SymbolKind::Function) {
                let entry = &self.sym[export_sym];
                let kind = if export_kind == SymbolKind::GlobalVar {
                    ExportKind::Data
                } else {
                    ExportKind::Function
                };
                let encoding = entry.num_params() as i32 + 100 * entry.varargs as i32;
                let name = entry.name.clone();
                let offset = entry.offset;
                self.scrip.add_new_export(&name, kind, offset, encoding);
            }

            let punctuation = self.src.get_next();
            self.expect_any(&[predef::COMMA, predef::SEMICOLON], punctuation)?;
            if punctuation == predef::SEMICOLON {
                break;
            }
        }

        Ok(())
    }
}
