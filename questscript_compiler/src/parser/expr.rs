//! Expression parsing.
//!
//! An expression span is split at its least binding operator (the operator
//! with the largest priority number at bracket depth 0). Unary operators
//! chain prefix, so a unary split always happens at position 0. Operands
//! without any operator descend into data access or a parenthesized group.

use questscript_bytecode::{CodeCell, Opcode, Register};

use super::{EvalResult, Parser, ValueLocation, AX, BX, MAR};
use crate::emitter::ScopeType;
use crate::error::{CompileResult, ErrorKind};
use crate::jumps::ForwardJump;
use crate::source::SrcList;
use crate::symbols::{predef, SymbolKind, Vartype, VartypeModifier};

/// The memory-read opcode for a value of `size` bytes.
pub(crate) fn read_cmd_for_size(size: u32) -> Opcode {
    match size {
        1 => Opcode::MemReadB,
        2 => Opcode::MemReadW,
        _ => Opcode::MemRead,
    }
}

/// The memory-write opcode for a value of `size` bytes.
pub(crate) fn write_cmd_for_size(size: u32) -> Opcode {
    match size {
        1 => Opcode::MemWriteB,
        2 => Opcode::MemWriteW,
        _ => Opcode::MemWrite,
    }
}

impl<'t, 'c> Parser<'t, 'c> {
    /// Evaluate the upcoming expression of the main stream into AX.
    /// The cursor ends up after the expression's last token.
    pub(crate) fn parse_expression(&mut self) -> CompileResult<()> {
        let expr_start = self.src.get_cursor();
        self.skip_to_end_of_expression()?;
        let len = self.src.get_cursor() - expr_start;
        let mut expression = self.src.select(expr_start, len);
        if expression.is_empty() {
            return Err(self.error(ErrorKind::Internal, "Empty expression"));
        }
        let mut res = self.parse_expression_term(&mut expression)?;
        self.result_to_ax(&mut res);
        Ok(())
    }

    /// `( expression )` read from the main stream.
    pub(crate) fn parse_parenthesized_expression(&mut self) -> CompileResult<()> {
        let paren = self.src.get_next();
        self.expect(predef::OPEN_PAREN, paren)?;
        self.parse_expression()?;
        let paren = self.src.get_next();
        self.expect(predef::CLOSE_PAREN, paren)
    }

    /// Advance the main cursor over everything that can still belong to the
    /// current expression.
    pub(crate) fn skip_to_end_of_expression(&mut self) -> CompileResult<()> {
        let mut nesting_depth: i32 = 0;
        // A ':' may close a switch label as well as a ternary; only an open
        // '?' at depth 0 claims it for the expression.
        let mut tern_depth: i32 = 0;

        while !self.src.reached_eof() {
            let peeksym = self.src.peek_next();

            match peeksym {
                predef::OPEN_PAREN | predef::OPEN_BRACKET | predef::OPEN_BRACE => {
                    nesting_depth += 1;
                }
                predef::CLOSE_PAREN | predef::CLOSE_BRACKET | predef::CLOSE_BRACE => {
                    nesting_depth -= 1;
                    if nesting_depth < 0 {
                        break;
                    }
                }
                _ => {}
            }
            if nesting_depth > 0
                || matches!(
                    peeksym,
                    predef::OPEN_PAREN | predef::OPEN_BRACKET | predef::OPEN_BRACE
                        | predef::CLOSE_PAREN | predef::CLOSE_BRACKET | predef::CLOSE_BRACE
                )
            {
                self.src.get_next();
                continue;
            }

            if peeksym == predef::COLON {
                if tern_depth <= 0 {
                    break;
                }
                tern_depth -= 1;
                self.src.get_next();
                continue;
            }

            if peeksym == predef::TERN {
                tern_depth += 1;
                self.src.get_next();
                continue;
            }

            if peeksym == predef::DOT {
                self.src.get_next(); // Eat '.'
                self.src.get_next(); // Eat the following component
                continue;
            }

            if peeksym == predef::NEW {
                // Only part of the expression when a type follows.
                self.src.get_next();
                let after_new = self.src.peek_next();
                if self.sym.is_vartype(after_new) {
                    self.src.get_next();
                    continue;
                }
                self.src.back_up();
                break;
            }

            if peeksym == predef::NULL {
                self.src.get_next();
                continue;
            }

            if self.sym.is_vartype(peeksym) {
                // Only part of the expression when a dot follows
                // (static struct component access).
                self.src.get_next();
                if self.src.peek_next() == predef::DOT {
                    self.src.get_next();
                    continue;
                }
                self.src.back_up();
                break;
            }

            let can_continue = matches!(
                self.sym.kind(peeksym),
                SymbolKind::NoType
                    | SymbolKind::Operator
                    | SymbolKind::Constant
                    | SymbolKind::LiteralInt
                    | SymbolKind::LiteralFloat
                    | SymbolKind::LiteralString
                    | SymbolKind::Function
                    | SymbolKind::GlobalVar
                    | SymbolKind::LocalVar
                    | SymbolKind::StructComponent
                    | SymbolKind::Attribute
            );
            if !can_continue {
                break;
            }
            self.src.get_next();
        }

        if nesting_depth > 0 {
            return Err(self.error(ErrorKind::Syntax, "Unexpected end of input"));
        }
        Ok(())
    }

    /// The split point of the expression: the least binding operator at
    /// bracket depth 0.
    ///
    /// Returns `None` when there is no operator, `Some(0)` when the least
    /// binding operator is unary (unary operators chain prefix), and the
    /// operator index otherwise. Ties go to the rightmost operator, which
    /// makes binary operators left-associative.
    pub(crate) fn index_of_least_binding_operator(
        &self,
        expression: &SrcList,
    ) -> CompileResult<Option<usize>> {
        let mut nesting_depth: u32 = 0;
        let mut largest_prio_found: Option<u32> = None;
        let mut largest_is_binary = true;
        let mut index_of_largest: Option<usize> = None;
        let mut encountered_operand = false;

        let mut reader = *expression;
        reader.start_read();
        while !reader.reached_eof() {
            let current_sym = reader.get_next();
            let is_operator = current_sym == predef::NEW
                || current_sym == predef::TERN
                || self.sym.kind(current_sym) == SymbolKind::Operator;

            match current_sym {
                predef::CLOSE_BRACKET | predef::CLOSE_PAREN => {
                    encountered_operand = true;
                    nesting_depth = nesting_depth.saturating_sub(1);
                    continue;
                }
                predef::OPEN_BRACKET | predef::OPEN_PAREN => {
                    nesting_depth += 1;
                    continue;
                }
                _ if !is_operator => {
                    encountered_operand = true;
                }
                _ => {}
            }

            // The contents of () and [] bind tighter than any operator.
            if nesting_depth > 0 || !is_operator {
                continue;
            }

            // A binary operator has an operand to its left.
            let is_binary = encountered_operand;
            encountered_operand = false;

            let current_prio = if is_binary {
                self.sym.binary_op_prio(current_sym)
            } else {
                self.sym.unary_op_prio(current_sym)
            };
            let Some(current_prio) = current_prio else {
                return Err(self.error(
                    ErrorKind::Syntax,
                    format!(
                        "'{}' cannot be used as {} operator",
                        self.sym.name(current_sym),
                        if is_binary { "binary" } else { "unary" }
                    ),
                ));
            };
            if largest_prio_found.is_some_and(|largest| current_prio < largest) {
                continue;
            }

            largest_prio_found = Some(current_prio);
            largest_is_binary = is_binary;
            index_of_largest = Some(reader.get_cursor() - 1);
        }

        match index_of_largest {
            None => Ok(None),
            Some(_) if !largest_is_binary => Ok(Some(0)),
            Some(idx) => Ok(Some(idx)),
        }
    }

    /// Evaluate one expression window. The result is in AX or pointed to by
    /// MAR, as reported in the returned [`EvalResult`].
    pub(crate) fn parse_expression_term(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        if expression.is_empty() {
            return Err(self.error(ErrorKind::Internal, "Cannot parse empty subexpression"));
        }
        self.update_line_from(expression);

        let first_sym = expression.at(0);
        if matches!(
            first_sym,
            predef::CLOSE_PAREN | predef::CLOSE_BRACKET | predef::CLOSE_BRACE
        ) {
            // The scanner sees to it that nesting symbols match.
            return Err(self.error(
                ErrorKind::Internal,
                format!(
                    "Unexpected '{}' at start of expression",
                    self.sym.name(first_sym)
                ),
            ));
        }

        let op_idx = self.index_of_least_binding_operator(expression)?;
        let mut res = match op_idx {
            Some(0) => self.parse_expression_unary(expression)?,
            Some(idx) => self.parse_expression_binary_or_ternary(idx, expression)?,
            None => self.parse_expression_no_ops(expression)?,
        };

        if !expression.reached_eof() {
            // e.g. "4 3": the user most probably forgot an operator.
            let next = expression.get_next();
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Expected an operator, found '{}' instead",
                    self.sym.name(next)
                ),
            ));
        }

        self.handle_struct_or_array_result(&mut res)?;
        Ok(res)
    }

    fn parse_expression_no_ops(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        let first_sym = expression.at(0);
        if first_sym == predef::OPEN_PAREN {
            return self.parse_expression_in_parens(expression);
        }
        if self.sym.kind(first_sym) != SymbolKind::Operator {
            return self.access_data(false, expression);
        }
        Err(self.error(
            ErrorKind::Syntax,
            format!(
                "Expected '(' or an operator, found '{}' instead",
                self.sym.name(first_sym)
            ),
        ))
    }

    fn parse_expression_in_parens(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        // Find the corresponding closing parenthesis.
        expression.set_cursor(1);
        Parser::skip_to(expression, &[]);
        let bp_end = expression.get_cursor();

        let mut between_parens = expression.select(1, bp_end - 1);
        let res = self.parse_expression_term(&mut between_parens)?;
        if !between_parens.reached_eof() {
            let next = between_parens.get_next();
            return Err(self.error(
                ErrorKind::Syntax,
                format!("Expected ')', found '{}' instead", self.sym.name(next)),
            ));
        }
        expression.get_next(); // Eat ')'
        Ok(res)
    }

    // ==================== Unary operators ====================

    fn parse_expression_unary(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        let first_op = expression.at(0);

        if first_op == predef::NEW {
            return self.parse_expression_new(expression);
        }
        match self.sym.operator_opcode(first_op) {
            Some(Opcode::SubReg) => self.parse_expression_unary_minus(expression),
            Some(Opcode::NotReg) => self.parse_expression_negate(expression),
            _ => Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Unexpected operator '{}' without a preceding expression",
                    self.sym.name(first_op)
                ),
            )),
        }
    }

    fn check_arg_of_new(&self, new_vartype: Vartype) -> CompileResult<()> {
        if self.sym.kind(new_vartype) == SymbolKind::UndefinedStruct {
            return Err(self.error(
                ErrorKind::Declaration,
                format!(
                    "The struct '{}' hasn't been completely defined yet",
                    self.sym.name(new_vartype)
                ),
            ));
        }
        if self.sym.kind(new_vartype) != SymbolKind::Vartype {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Expected a type after 'new', found '{}' instead",
                    self.sym.name(new_vartype)
                ),
            ));
        }
        if !self.sym.is_any_integer_vartype(new_vartype) && !self.sym.is_managed_vartype(new_vartype)
        {
            return Err(self.error(
                ErrorKind::Type,
                "Can only use integer or managed types with 'new'",
            ));
        }
        // Using a built-in type with `new` proper is an error, but
        // `new BUILTIN[...]` is allowed; checked by the caller.
        Ok(())
    }

    fn parse_expression_new(&mut self, expression: &mut SrcList<'t>) -> CompileResult<EvalResult> {
        expression.start_read();
        expression.get_next(); // Eat 'new'

        if expression.reached_eof() {
            return Err(self.error(
                ErrorKind::Syntax,
                "Expected a type after 'new' but didn't find any",
            ));
        }
        let argument_vartype = expression.get_next();
        self.check_arg_of_new(argument_vartype)?;

        let is_managed = !self.sym.is_any_integer_vartype(argument_vartype);
        let with_bracket_expr = !expression.reached_eof(); // "new FOO[BAR]"

        let vartype;
        let element_vartype;
        if with_bracket_expr {
            // "new Struct[...]" means "new Struct*[...]"; eat a redundant '*'.
            if expression.peek_next() == predef::DYNPOINTER {
                if !is_managed {
                    return Err(self.error(
                        ErrorKind::Type,
                        format!(
                            "Cannot use '*' on the non-managed type '{}'",
                            self.sym.name(argument_vartype)
                        ),
                    ));
                }
                expression.get_next();
            }
            self.access_data_read_bracketed_int_expression(expression)?;
            element_vartype = if is_managed {
                self.sym
                    .vartype_with(VartypeModifier::Dynpointer, argument_vartype)
            } else {
                argument_vartype
            };
            vartype = self
                .sym
                .vartype_with(VartypeModifier::Dynarray, element_vartype);
        } else {
            if self.sym.is_builtin(argument_vartype) {
                return Err(self.error(
                    ErrorKind::Type,
                    format!(
                        "Expected '[' after the built-in type '{}'",
                        self.sym.name(argument_vartype)
                    ),
                ));
            }
            if !is_managed {
                return Err(self.error(
                    ErrorKind::Type,
                    format!(
                        "Expected '[' after the integer type '{}'",
                        self.sym.name(argument_vartype)
                    ),
                ));
            }
            element_vartype = argument_vartype;
            vartype = self
                .sym
                .vartype_with(VartypeModifier::Dynpointer, argument_vartype);
        }

        let element_size = self.sym.get_size(element_vartype);
        if element_size == 0 {
            // The runtime would divide by zero.
            return Err(self.error(
                ErrorKind::Internal,
                "Trying to emit allocation of zero dynamic memory",
            ));
        }

        if with_bracket_expr {
            self.scrip.write_cmd3(
                Opcode::NewArray,
                AX,
                element_size as CodeCell,
                is_managed as CodeCell,
            );
        } else {
            self.scrip
                .write_cmd2(Opcode::NewUserObject, AX, element_size as CodeCell);
        }

        self.scrip.ax_scope_type = ScopeType::Global;
        self.scrip.ax_vartype = vartype;
        Ok(EvalResult {
            vloc: ValueLocation::AxIsValue,
            scope: ScopeType::Global,
            vartype,
        })
    }

    fn parse_expression_unary_minus(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        if expression.len() < 2 {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Expected a term after '{}' but didn't find any",
                    self.sym.name(expression.at(0))
                ),
            ));
        }

        expression.eat_first_symbol(); // Eat '-'
        if expression.len() == 1 {
            // A negated literal folds at compile time.
            expression.start_read();
            let kind = self.sym.kind(expression.peek_next());
            if matches!(kind, SymbolKind::Constant | SymbolKind::LiteralInt) {
                let vartype = self.access_data_int_literal_or_const(true, expression)?;
                return Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                });
            }
            if kind == SymbolKind::LiteralFloat {
                let vartype = self.access_data_float_literal(true, expression)?;
                return Ok(EvalResult {
                    vloc: ValueLocation::AxIsValue,
                    scope: ScopeType::Global,
                    vartype,
                });
            }
        }

        // Parse the rest of the expression into AX.
        let mut res = self.parse_expression_term(expression)?;
        self.result_to_ax(&mut res);

        let opcode =
            self.get_opcode_valid_for_vartype(self.scrip.ax_vartype, self.scrip.ax_vartype, Opcode::SubReg)?;

        // Calculate 0 - AX. The binary representation of 0.0 is identical
        // to the binary representation of 0, so this works for floats too.
        self.scrip.write_cmd2(Opcode::LitToReg, BX, 0);
        self.scrip.write_cmd2(opcode, BX, AX);
        self.scrip.write_cmd2(Opcode::RegToReg, BX, AX);
        res.vloc = ValueLocation::AxIsValue;
        Ok(res)
    }

    fn parse_expression_negate(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        let op_sym = expression.at(0);
        if expression.len() < 2 {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Expected a term after '{}' but didn't find any",
                    self.sym.name(op_sym)
                ),
            ));
        }

        let mut after_not = expression.select(1, expression.len() - 1);
        let mut res = self.parse_expression_term(&mut after_not)?;
        expression.set_cursor(expression.len());
        self.result_to_ax(&mut res);

        if !self.sym.is_any_integer_vartype(self.scrip.ax_vartype) {
            return Err(self.error(
                ErrorKind::Type,
                format!(
                    "Expected an integer expression after '{}' but found type {}",
                    self.sym.name(op_sym),
                    self.sym.name(self.scrip.ax_vartype)
                ),
            ));
        }

        let bitwise_negation = op_sym != predef::NOT;
        if bitwise_negation {
            // There isn't any opcode for this, so calculate -1 - AX.
            self.scrip.write_cmd2(Opcode::LitToReg, BX, -1);
            self.scrip.write_cmd2(Opcode::SubReg, BX, AX);
            self.scrip.write_cmd2(Opcode::RegToReg, BX, AX);
        } else {
            self.scrip.write_cmd1(Opcode::NotReg, AX);
        }

        res.vloc = ValueLocation::AxIsValue;
        res.vartype = predef::INT;
        self.scrip.ax_vartype = predef::INT;
        Ok(res)
    }

    // ==================== Binary and ternary ====================

    fn parse_expression_binary_or_ternary(
        &mut self,
        op_idx: usize,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        if expression.at(op_idx) == predef::TERN {
            self.parse_expression_ternary(op_idx, expression)
        } else {
            self.parse_expression_binary(op_idx, expression)
        }
    }

    fn parse_expression_binary(
        &mut self,
        op_idx: usize,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        // Process the left hand side first so that errors come left to
        // right.
        let mut lhs = expression.select(0, op_idx);
        let mut lhs_res = self.parse_expression_term(&mut lhs)?;
        self.result_to_ax(&mut lhs_res);
        if !lhs.reached_eof() {
            let next = lhs.get_next();
            return Err(self.error(
                ErrorKind::Internal,
                format!(
                    "Unexpected '{}' after LHS of binary expression",
                    self.sym.name(next)
                ),
            ));
        }
        let vartype_lhs = lhs_res.vartype;

        let mut to_exit = ForwardJump::new();
        let operator_sym = expression.at(op_idx);
        let opcode = self
            .sym
            .operator_opcode(operator_sym)
            .ok_or_else(|| self.error(ErrorKind::Internal, "Operator without opcode"))?;

        if opcode == Opcode::And {
            // Short-circuit: if AX is 0 the AND has failed, so jump past
            // the instruction; AX is still 0 and doubles as the result.
            self.scrip.write_cmd1(Opcode::Jz, -77);
            to_exit.add_param(self.scrip);
        } else if opcode == Opcode::Or {
            // Short-circuit: if AX is non-zero the OR has succeeded.
            self.scrip.write_cmd1(Opcode::Jnz, -77);
            to_exit.add_param(self.scrip);
        }

        self.scrip.push_reg(Register::Ax);
        let mut rhs = expression.select(op_idx + 1, expression.len() - (op_idx + 1));
        if rhs.is_empty() {
            return Err(self.error(
                ErrorKind::Syntax,
                format!(
                    "Binary operator '{}' doesn't have a right hand side",
                    self.sym.name(operator_sym)
                ),
            ));
        }
        let mut rhs_res = self.parse_expression_term(&mut rhs)?;
        self.result_to_ax(&mut rhs_res);
        expression.set_cursor(expression.len());

        // Pop into BX although AX was pushed: the RHS result overwrote AX.
        self.scrip.pop_reg(Register::Bx);

        self.check_vartype_mismatch(vartype_lhs, rhs_res.vartype, false)?;
        let actual_opcode =
            self.get_opcode_valid_for_vartype(vartype_lhs, rhs_res.vartype, opcode)?;

        self.scrip.write_cmd2(actual_opcode, BX, AX);
        self.scrip.write_cmd2(Opcode::RegToReg, BX, AX);

        to_exit.patch(self.scrip, self.cur_line);

        // Comparisons return a bool (an int, in our terms); the other
        // operators return the type they operate on.
        let mut vartype = rhs_res.vartype;
        if actual_opcode.is_boolean() {
            vartype = predef::INT;
            self.scrip.ax_vartype = predef::INT;
        }
        Ok(EvalResult {
            vloc: ValueLocation::AxIsValue,
            scope: rhs_res.scope,
            vartype,
        })
    }

    fn parse_expression_ternary(
        &mut self,
        tern_idx: usize,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<EvalResult> {
        // First term ends before the '?'.
        let mut term1 = expression.select(0, tern_idx);

        // Second term begins after the '?'; find the ':' that closes it.
        let mut after_term1 =
            expression.select(tern_idx + 1, expression.len() - (tern_idx + 1));
        after_term1.start_read();
        Parser::skip_to(&mut after_term1, &[predef::COLON]);
        if after_term1.reached_eof() || after_term1.peek_next() != predef::COLON {
            return Err(self.error(ErrorKind::Syntax, "Didn't find the matching ':' to '?'"));
        }
        let term3_start = after_term1.get_cursor() + 1;
        let mut term3 = after_term1.select(term3_start, after_term1.len() - term3_start);
        let mut term2 = after_term1.select(0, after_term1.get_cursor());
        expression.set_cursor(expression.len());

        let string_struct_ptr = self.sym.string_struct_ptr();

        // Condition.
        let mut res1 = self.parse_expression_term(&mut term1)?;
        self.result_to_ax(&mut res1);
        if !term1.reached_eof() {
            let next = term1.get_next();
            return Err(self.error(
                ErrorKind::Internal,
                format!(
                    "Unexpected '{}' after 1st term of ternary",
                    self.sym.name(next)
                ),
            ));
        }

        // Jump to the third term or to the end of the ternary. With an
        // empty middle arm, the condition value itself is the result when
        // non-zero, so the jump is inverted and skips to the end.
        let second_term_exists = !term2.is_empty();
        self.scrip.write_cmd1(
            if second_term_exists {
                Opcode::Jz
            } else {
                Opcode::Jnz
            },
            -77,
        );
        let mut test_jumpdest = ForwardJump::new();
        test_jumpdest.add_param(self.scrip);

        let mut jumpdest_after_term2 = ForwardJump::new();
        let (term2_vartype, term2_scope);
        if second_term_exists {
            let mut res2 = self.parse_expression_term(&mut term2)?;
            if !term2.reached_eof() {
                let next = term2.get_next();
                return Err(self.error(
                    ErrorKind::Internal,
                    format!(
                        "Unexpected '{}' after 2nd term of ternary",
                        self.sym.name(next)
                    ),
                ));
            }
            self.result_to_ax(&mut res2);
            if self.sym.is_any_string_vartype(res2.vartype) {
                if let Some(wanted) = string_struct_ptr {
                    self.convert_ax_string_to_string_object(wanted);
                    res2.vartype = self.scrip.ax_vartype;
                }
            }
            // Jump to the end of the ternary expression.
            self.scrip.write_cmd1(Opcode::Jmp, -77);
            jumpdest_after_term2.add_param(self.scrip);
            term2_vartype = res2.vartype;
            term2_scope = res2.scope;
        } else {
            // The condition value doubles as the second term's value.
            term2_vartype = {
                let mut vt = res1.vartype;
                if self.sym.is_any_string_vartype(vt) {
                    if let Some(wanted) = string_struct_ptr {
                        self.convert_ax_string_to_string_object(wanted);
                        vt = self.scrip.ax_vartype;
                    }
                }
                vt
            };
            term2_scope = res1.scope;
        }

        // Third term.
        if term3.is_empty() {
            return Err(self.error(
                ErrorKind::Syntax,
                "The third expression of this ternary is empty",
            ));
        }
        if second_term_exists {
            test_jumpdest.patch(self.scrip, self.cur_line);
        }

        let mut res3 = self.parse_expression_term(&mut term3)?;
        self.result_to_ax(&mut res3);
        if self.sym.is_any_string_vartype(res3.vartype) {
            if let Some(wanted) = string_struct_ptr {
                self.convert_ax_string_to_string_object(wanted);
                res3.vartype = self.scrip.ax_vartype;
            }
        }

        if second_term_exists {
            jumpdest_after_term2.patch(self.scrip, self.cur_line);
        } else {
            test_jumpdest.patch(self.scrip, self.cur_line);
        }

        let scope = if term2_scope == ScopeType::Local || res3.scope == ScopeType::Local {
            ScopeType::Local
        } else {
            ScopeType::Global
        };

        // The two value arms must be mutually compatible; the result type
        // is whichever accepts the other.
        let vartype = if !self.is_vartype_mismatch_oneway(term2_vartype, res3.vartype) {
            res3.vartype
        } else if !self.is_vartype_mismatch_oneway(res3.vartype, term2_vartype) {
            term2_vartype
        } else {
            return Err(self.error(
                ErrorKind::Type,
                format!(
                    "An expression of type '{}' is incompatible with an expression of type '{}'",
                    self.sym.name(term2_vartype),
                    self.sym.name(res3.vartype)
                ),
            ));
        };
        self.scrip.ax_vartype = vartype;

        Ok(EvalResult {
            vloc: ValueLocation::AxIsValue,
            scope,
            vartype,
        })
    }

    // ==================== Results and conversions ====================

    /// Load the value into AX if MAR points to it.
    pub(crate) fn result_to_ax(&mut self, res: &mut EvalResult) {
        if res.vloc != ValueLocation::MarPointsToValue {
            return; // Already in AX.
        }
        self.scrip.ax_vartype = res.vartype;
        self.scrip.ax_scope_type = res.scope;

        if self.sym.vartype_without(VartypeModifier::Const, res.vartype) == predef::STRING {
            // A string buffer is used through its address.
            self.scrip.write_cmd2(Opcode::RegToReg, MAR, AX);
        } else {
            let opcode = if self.sym.is_dyn_vartype(res.vartype) {
                Opcode::MemReadPtr
            } else {
                read_cmd_for_size(self.sym.get_size(res.vartype))
            };
            self.scrip.write_cmd1(opcode, AX);
        }
        res.vloc = ValueLocation::AxIsValue;
    }

    /// Whole structs and whole arrays cannot be expression results; managed
    /// structs decay to a pointer.
    pub(crate) fn handle_struct_or_array_result(
        &mut self,
        res: &mut EvalResult,
    ) -> CompileResult<()> {
        if self.sym.is_array_vartype(res.vartype) {
            return Err(self.error(
                ErrorKind::Type,
                "Cannot access array as a whole (did you forget to add \"[0]\"?)",
            ));
        }
        if self.sym.is_atomic(res.vartype) && self.sym.is_struct_vartype(res.vartype) {
            if !self.sym.is_managed_vartype(res.vartype) {
                return Err(self.error(ErrorKind::Type, "Cannot access non-managed struct as a whole"));
            }
            // Interpret the memory address as the result.
            let vartype = self
                .sym
                .vartype_with(VartypeModifier::Dynpointer, res.vartype);
            self.scrip.write_cmd2(Opcode::RegToReg, MAR, AX);
            res.vloc = ValueLocation::AxIsValue;
            res.vartype = vartype;
            self.scrip.ax_vartype = vartype;
        }
        Ok(())
    }

    /// If a String object is wanted but AX holds an old-style string
    /// address, wrap it into a String object.
    pub(crate) fn convert_ax_string_to_string_object(&mut self, wanted_vartype: Vartype) {
        let Some(ss) = self.sym.string_struct_sym() else {
            return;
        };
        if self
            .sym
            .vartype_without(VartypeModifier::Const, self.scrip.ax_vartype)
            == predef::STRING
            && self
                .sym
                .vartype_without(VartypeModifier::Dynpointer, wanted_vartype)
                == ss
        {
            self.scrip.write_cmd1(Opcode::CreateString, AX);
            self.scrip.ax_vartype = self.sym.vartype_with(VartypeModifier::Dynpointer, ss);
        }
    }

    /// If an old-style string is wanted but AX holds a String object
    /// pointer, that pointer must not be null.
    pub(crate) fn do_null_check_on_string_in_ax(&mut self, wanted_vartype: Vartype) {
        let Some(ss) = self.sym.string_struct_sym() else {
            return;
        };
        if self
            .sym
            .vartype_without(VartypeModifier::Dynpointer, self.scrip.ax_vartype)
            == ss
            && self
                .sym
                .vartype_without(VartypeModifier::Const, wanted_vartype)
                == predef::STRING
        {
            self.scrip.write_cmd1(Opcode::CheckNullReg, AX);
        }
    }

    // ==================== Vartype compatibility ====================

    /// Promote a generic opcode to the variant that fits the operand
    /// vartypes, or reject the combination.
    pub(crate) fn get_opcode_valid_for_vartype(
        &mut self,
        vartype1: Vartype,
        vartype2: Vartype,
        opcode: Opcode,
    ) -> CompileResult<Opcode> {
        if vartype1 == predef::FLOAT || vartype2 == predef::FLOAT {
            return match opcode {
                Opcode::Add => Ok(Opcode::FAdd),
                Opcode::AddReg => Ok(Opcode::FAddReg),
                Opcode::DivReg => Ok(Opcode::FDivReg),
                Opcode::Greater => Ok(Opcode::FGreater),
                Opcode::Gte => Ok(Opcode::FGte),
                Opcode::IsEqual => Ok(Opcode::IsEqual),
                Opcode::LessThan => Ok(Opcode::FLessThan),
                Opcode::Lte => Ok(Opcode::FLte),
                Opcode::MulReg => Ok(Opcode::FMulReg),
                Opcode::NotEqual => Ok(Opcode::NotEqual),
                Opcode::Sub => Ok(Opcode::FSub),
                Opcode::SubReg => Ok(Opcode::FSubReg),
                _ => Err(self.error(
                    ErrorKind::Type,
                    "The operator cannot be applied to float values",
                )),
            };
        }

        let iatos1 = self.sym.is_any_string_vartype(vartype1);
        let iatos2 = self.sym.is_any_string_vartype(vartype2);
        if iatos1 || iatos2 {
            let opcode = match opcode {
                Opcode::IsEqual => Opcode::StringsEqual,
                Opcode::NotEqual => Opcode::StringsNotEq,
                _ => {
                    return Err(self.error(
                        ErrorKind::Type,
                        "Operator cannot be applied to string type values",
                    ))
                }
            };
            if vartype1 == predef::NULL || vartype2 == predef::NULL {
                return Ok(opcode);
            }
            if iatos1 != iatos2 {
                return Err(self.error(
                    ErrorKind::Type,
                    "A string type value cannot be compared to a value that isn't a string type",
                ));
            }
            return Ok(opcode);
        }

        let ptr_or_null =
            |s: &Self, v: Vartype| s.sym.is_dynpointer_vartype(v) || v == predef::NULL;
        let arr_or_null = |s: &Self, v: Vartype| s.sym.is_dynarray_vartype(v) || v == predef::NULL;
        if (ptr_or_null(self, vartype1) && ptr_or_null(self, vartype2))
            || (arr_or_null(self, vartype1) && arr_or_null(self, vartype2))
        {
            return match opcode {
                Opcode::IsEqual | Opcode::NotEqual => Ok(opcode),
                _ => Err(self.error(
                    ErrorKind::Type,
                    "The operator cannot be applied to managed types",
                )),
            };
        }

        // Other combinations of managed types won't mingle.
        if self.sym.is_dynpointer_vartype(vartype1) || self.sym.is_dynpointer_vartype(vartype2) {
            return Err(self.error(
                ErrorKind::Type,
                "The operator cannot be applied to values of these types",
            ));
        }

        self.check_vartype_mismatch(vartype1, predef::INT, true)?;
        self.check_vartype_mismatch(vartype2, predef::INT, true)?;
        Ok(opcode)
    }

    /// Type conversion check in one direction.
    pub(crate) fn is_vartype_mismatch_oneway(&self, vartype_is: Vartype, wants_to_be: Vartype) -> bool {
        // 'void' converts to nothing.
        if vartype_is == predef::VOID || wants_to_be == predef::VOID {
            return true;
        }

        if vartype_is == wants_to_be {
            return false;
        }

        // 'null' converts to any dynpointer or dynarray.
        if vartype_is == predef::NULL {
            return !self.sym.is_dynpointer_vartype(wants_to_be)
                && !self.sym.is_dynarray_vartype(wants_to_be);
        }

        if let Some(ss) = self.sym.string_struct_sym() {
            // String* converts to (const) string...
            if self
                .sym
                .vartype_without(VartypeModifier::Dynpointer, vartype_is)
                == ss
                && self.sym.vartype_without(VartypeModifier::Const, wants_to_be) == predef::STRING
            {
                return false;
            }
            // ... and (const) string converts to String*.
            if self.sym.vartype_without(VartypeModifier::Const, vartype_is) == predef::STRING
                && self
                    .sym
                    .vartype_without(VartypeModifier::Dynpointer, wants_to_be)
                    == ss
            {
                return false;
            }
        }

        if self.sym.is_oldstring(vartype_is) != self.sym.is_oldstring(wants_to_be) {
            return true;
        }

        // 'const X' does not convert to non-'const X'. The position of
        // this test matters: it must come after the string conversions.
        if self.sym.is_const_vartype(vartype_is) && !self.sym.is_const_vartype(wants_to_be) {
            return true;
        }

        if self.sym.is_oldstring(vartype_is) {
            return false;
        }

        // From here on, constness doesn't matter.
        let vartype_is = self.sym.vartype_without(VartypeModifier::Const, vartype_is);
        let wants_to_be = self.sym.vartype_without(VartypeModifier::Const, wants_to_be);

        // Floats do not mix with other types.
        if (vartype_is == predef::FLOAT) != (wants_to_be == predef::FLOAT) {
            return true;
        }

        // Any small integer kind converts to int.
        if self.sym.is_any_integer_vartype(vartype_is) && wants_to_be == predef::INT {
            return false;
        }

        // Dynarrays are compatible iff their element vartypes are
        // identical: the element size indexes the allocation.
        if self.sym.is_dynarray_vartype(vartype_is) || self.sym.is_dynarray_vartype(wants_to_be) {
            if self.sym.is_dynarray_vartype(vartype_is) != self.sym.is_dynarray_vartype(wants_to_be)
            {
                return true;
            }
            return self.sym[vartype_is].vartype != self.sym[wants_to_be].vartype;
        }

        // Dynpointers are compatible if the source struct is the target
        // struct or descends from it.
        if self.sym.is_dynpointer_vartype(vartype_is)
            || self.sym.is_dynpointer_vartype(wants_to_be)
        {
            if self.sym.is_dynpointer_vartype(vartype_is)
                != self.sym.is_dynpointer_vartype(wants_to_be)
            {
                return true;
            }
            let target_core = self.sym[wants_to_be].vartype;
            let mut current_core = self.sym[vartype_is].vartype;
            while current_core != target_core {
                current_core = self.sym[current_core].parent;
                if current_core.is_none() {
                    return true;
                }
            }
            return false;
        }

        // Struct-by-value and classic arrays require exact identity.
        if self.sym.is_struct_vartype(vartype_is)
            || self.sym.is_struct_vartype(wants_to_be)
            || self.sym.is_array_vartype(vartype_is)
            || self.sym.is_array_vartype(wants_to_be)
        {
            return vartype_is != wants_to_be;
        }

        false
    }

    /// Error out on a type mismatch; `order_matters == false` accepts
    /// either direction.
    pub(crate) fn check_vartype_mismatch(
        &self,
        vartype_is: Vartype,
        wants_to_be: Vartype,
        order_matters: bool,
    ) -> CompileResult<()> {
        if !self.is_vartype_mismatch_oneway(vartype_is, wants_to_be) {
            return Ok(());
        }
        if !order_matters && !self.is_vartype_mismatch_oneway(wants_to_be, vartype_is) {
            return Ok(());
        }
        Err(self.error(
            ErrorKind::Type,
            format!(
                "Type mismatch: cannot convert '{}' to '{}'",
                self.sym.name(vartype_is),
                self.sym.name(wants_to_be)
            ),
        ))
    }

    // ==================== Int expression helpers ====================

    /// Evaluate an expression window into AX and require an int.
    pub(crate) fn access_data_read_int_expression(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<()> {
        let mut res = self.parse_expression_term(expression)?;
        self.result_to_ax(&mut res);
        self.check_vartype_mismatch(res.vartype, predef::INT, true)
    }

    /// `[ int-expression ]` inside an expression window.
    pub(crate) fn access_data_read_bracketed_int_expression(
        &mut self,
        expression: &mut SrcList<'t>,
    ) -> CompileResult<()> {
        let bracket = expression.get_next();
        self.expect(predef::OPEN_BRACKET, bracket)?;

        let start = expression.get_cursor();
        Parser::skip_to(expression, &[]);
        let mut in_brackets = expression.select(start, expression.get_cursor() - start);

        self.access_data_read_int_expression(&mut in_brackets)?;
        if !in_brackets.reached_eof() {
            let next = in_brackets.get_next();
            return Err(self.error(
                ErrorKind::Syntax,
                format!("Expected ']', found '{}' instead", self.sym.name(next)),
            ));
        }
        let bracket = expression.get_next();
        self.expect(predef::CLOSE_BRACKET, bracket)
    }
}
