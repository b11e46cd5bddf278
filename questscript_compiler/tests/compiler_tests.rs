//! End-to-end compiler tests.
//!
//! Each test feeds QuestScript source through `compile()` and asserts on
//! the emitted code, the link tables, or the reported diagnostics.

use pretty_assertions::assert_eq;
use questscript_bytecode::{CodeCell, FixupKind, Opcode};
use questscript_compiler::emitter::instructions;
use questscript_compiler::{
    compile, CompileError, CompiledScript, CompilerOptions, ErrorKind, MessageHandler,
};

fn compile_ok(source: &str) -> CompiledScript {
    let mut msgs = MessageHandler::new();
    compile(source, CompilerOptions::default(), &mut msgs)
        .unwrap_or_else(|e| panic!("compile failed: {}", e))
}

fn compile_err(source: &str) -> CompileError {
    let mut msgs = MessageHandler::new();
    match compile(source, CompilerOptions::default(), &mut msgs) {
        Ok(_) => panic!("compile unexpectedly succeeded"),
        Err(e) => e,
    }
}

fn count_op(script: &CompiledScript, op: Opcode) -> usize {
    instructions(&script.code)
        .iter()
        .filter(|insn| insn.1 == op)
        .count()
}

fn count_insn(script: &CompiledScript, op: Opcode, args: &[CodeCell]) -> usize {
    instructions(&script.code)
        .iter()
        .filter(|insn| insn.1 == op && insn.2 == args)
        .count()
}

// ==================== Plain functions ====================

#[test]
fn test_minimal_function() {
    let script = compile_ok("int main() { return 7; }");
    assert_eq!(script.functions.len(), 1);
    assert_eq!(script.functions[0].name, "main");
    assert_eq!(script.functions[0].num_params, 0);
    // the function returns through its single exit
    assert_eq!(count_op(&script, Opcode::Ret), 1);
    assert!(count_op(&script, Opcode::ThisBase) == 1);
}

#[test]
fn test_arithmetic_uses_bx_ax_pattern() {
    let script = compile_ok("int main() { return 2 + 3; }");
    // LHS is pushed, RHS lands in AX, LHS is popped into BX.
    assert!(count_op(&script, Opcode::PushReg) >= 1);
    assert!(count_insn(&script, Opcode::PopReg, &[4]) >= 1); // BX
    assert!(count_insn(&script, Opcode::AddReg, &[4, 3]) == 1); // BX += AX
}

#[test]
fn test_float_operands_promote_opcodes() {
    let script = compile_ok("float main() { float a = 1.5; return a * 2.0; }");
    assert_eq!(count_op(&script, Opcode::FMulReg), 1);
    assert_eq!(count_op(&script, Opcode::MulReg), 0);
}

#[test]
fn test_short_circuit_and_emits_jz() {
    let script = compile_ok("int main(int a, int b) { return a && b; }");
    assert!(count_op(&script, Opcode::Jz) >= 1);
    assert_eq!(count_op(&script, Opcode::And), 1);
}

// ==================== Scenario 1: forward call then body ====================

#[test]
fn test_forward_function_call_is_patched() {
    let script = compile_ok(
        "import int f(int x);\n\
         int g() { return f(3); }\n\
         int f(int x) { return x + 1; }\n",
    );

    // The import declaration was overridden by the local body, so nothing
    // was imported.
    assert!(script.imports.is_empty());
    assert_eq!(script.functions.len(), 2);
    assert_eq!(script.functions[0].name, "g");
    assert_eq!(script.functions[1].name, "f");

    // Exactly one code fixup: the CALL operand inside g, patched to f's
    // entry point.
    let code_fixups: Vec<_> = script
        .fixups
        .iter()
        .filter(|f| f.kind == FixupKind::Code)
        .collect();
    assert_eq!(code_fixups.len(), 1);
    let call_site = code_fixups[0].loc as usize;
    assert_eq!(script.code[call_site], script.functions[1].code_offset);
}

#[test]
fn test_undefined_forward_function_is_reported() {
    let err = compile_err("int f(int x);\nint main() { return f(1); }\n");
    assert_eq!(err.kind, ErrorKind::Reference);
    assert!(err.message.contains("f()"), "message: {}", err.message);
}

// ==================== Scenario 2: for-loop increment replay ====================

#[test]
fn test_for_loop_replays_iterate_clause() {
    let script = compile_ok("void main() { for (int i = 0; i < 3; i++) continue; }");
    // The i++ code (AX += 1, write back) appears at the continue and at
    // the natural loop bottom: twice, although it occurs once in source.
    assert_eq!(count_insn(&script, Opcode::Add, &[3, 1]), 2);
    assert_eq!(count_op(&script, Opcode::MemWrite), 2);
}

#[test]
fn test_for_loop_without_continue_replays_once() {
    let script = compile_ok("void main() { int t; for (int i = 0; i < 3; i++) t += i; }");
    assert_eq!(count_insn(&script, Opcode::Add, &[3, 1]), 1);
}

// ==================== Scenario 3: ternary with string coercion ====================

#[test]
fn test_ternary_string_struct_coercion() {
    let script = compile_ok(
        "internalstring autoptr builtin managed struct String {};\n\
         String someString;\n\
         void main(int cond) {\n\
             String s = cond ? \"yes\" : someString;\n\
         }\n",
    );
    // The literal arm is wrapped into a String object; the variable arm
    // already is one.
    assert_eq!(count_op(&script, Opcode::CreateString), 1);
    assert!(script.fixups.iter().any(|f| f.kind == FixupKind::String));
    // Storing into the local pointer goes through the managed write.
    assert!(count_op(&script, Opcode::MemWritePtr) >= 1);
}

#[test]
fn test_ternary_incompatible_arms_rejected() {
    let err = compile_err("int main(int c) { return c ? 1 : 2.5; }");
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_ternary_empty_middle_arm() {
    let script = compile_ok("int main(int c) { return c ? : 7; }");
    // The inverted variant: jump on non-zero straight to the end.
    assert!(count_op(&script, Opcode::Jnz) >= 1);
}

// ==================== Scenario 4: switch over strings ====================

#[test]
fn test_switch_with_string_cases_compares_contents() {
    let script = compile_ok(
        "internalstring autoptr builtin managed struct String {};\n\
         void main(String name) {\n\
             int x;\n\
             switch (name) {\n\
             case \"a\": x = 1; break;\n\
             default: x = 0;\n\
             }\n\
         }\n",
    );
    assert_eq!(count_op(&script, Opcode::StringsEqual), 1);
    assert_eq!(count_op(&script, Opcode::IsEqual), 0);
}

#[test]
fn test_switch_int_cases() {
    let script = compile_ok(
        "void main(int v) {\n\
             int x;\n\
             switch (v) {\n\
             case 1: x = 10; break;\n\
             case 2: x = 20; break;\n\
             default: x = 0;\n\
             }\n\
         }\n",
    );
    // One comparison per case, against BX.
    assert_eq!(count_insn(&script, Opcode::IsEqual, &[3, 4]), 2);
}

#[test]
fn test_case_outside_switch_rejected() {
    let err = compile_err("void main() { case 1: ; }");
    assert_eq!(err.kind, ErrorKind::Semantic);
}

// ==================== Scenario 5: dynarray bounds ====================

#[test]
fn test_dynarray_write_checks_bounds_at_runtime() {
    let script = compile_ok("void main() { int[] a = new int[4]; a[5] = 0; }");
    assert_eq!(count_op(&script, Opcode::NewArray), 1);
    // The out-of-range constant still compiles; the runtime traps.
    assert!(count_op(&script, Opcode::DynamicBounds) >= 1);
    assert!(count_op(&script, Opcode::CheckNull) >= 1);
}

#[test]
fn test_classic_array_constant_index_folds_and_checks() {
    let err = compile_err("void main() { int a[4]; a[5] = 0; }");
    // A constant index on a classic array is checked at compile time.
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("out of bounds"), "message: {}", err.message);
}

#[test]
fn test_classic_array_runtime_index_emits_checkbounds() {
    let script = compile_ok("void main(int i) { int a[4]; a[i] = 0; }");
    assert_eq!(count_op(&script, Opcode::CheckBounds), 1);
    assert_eq!(count_op(&script, Opcode::DynamicBounds), 0);
}

// ==================== Scenario 6: forbidden shadowing ====================

#[test]
fn test_parameter_shadowing_rejected_with_cross_reference() {
    let err = compile_err("void f(int i) { int i; }");
    assert_eq!(err.kind, ErrorKind::Declaration);
    assert!(err.message.contains("parameter"), "message: {}", err.message);
    assert!(err.message.contains("See"), "message: {}", err.message);
}

#[test]
fn test_block_shadowing_of_outer_local_is_allowed() {
    compile_ok("void f() { int i; { int j; j = i; } }");
}

#[test]
fn test_same_scope_redefinition_rejected() {
    let err = compile_err("void f() { int i; int i; }");
    assert_eq!(err.kind, ErrorKind::Declaration);
}

// ==================== Exports ====================

#[test]
fn test_export_function_records_param_encoding() {
    let script = compile_ok("int f(int a, float b) { return a; }\nexport f;\n");
    assert_eq!(script.exports.len(), 1);
    let export = &script.exports[0];
    assert_eq!(export.name, "f");
    assert_eq!(export.kind, questscript_bytecode::ExportKind::Function);
    assert_eq!(export.encoding, 2);
}

#[test]
fn test_export_global_variable() {
    let script = compile_ok("int counter;\nexport counter;\n");
    assert_eq!(script.exports.len(), 1);
    assert_eq!(script.exports[0].kind, questscript_bytecode::ExportKind::Data);
}

#[test]
fn test_export_of_import_rejected() {
    let err = compile_err("import int f(int x);\nexport f;\n");
    assert_eq!(err.kind, ErrorKind::Declaration);
}

// ==================== Imports ====================

#[test]
fn test_unreferenced_imports_are_blanked() {
    let script = compile_ok(
        "import int Used();\n\
         import int Unused();\n\
         int main() { return Used(); }\n",
    );
    assert_eq!(script.imports.len(), 2);
    assert_eq!(script.imports[0], "Used");
    assert_eq!(script.imports[1], "");
}

#[test]
fn test_import_call_protocol() {
    let script = compile_ok(
        "import int GetTime(int fmt);\n\
         int main() { return GetTime(1); }\n",
    );
    // NUMFUNCARGS n, then the ordinal with an import fixup, CALLEXT, and
    // the real-stack restore.
    assert_eq!(count_insn(&script, Opcode::NumFuncArgs, &[1]), 1);
    assert_eq!(count_op(&script, Opcode::CallExt), 1);
    assert_eq!(count_insn(&script, Opcode::SubRealStack, &[1]), 1);
    assert_eq!(count_op(&script, Opcode::PushReal), 1);
    assert!(script.fixups.iter().any(|f| f.kind == FixupKind::Import));
}

#[test]
fn test_import_variable() {
    let script = compile_ok("import int score;\nint main() { return score; }\n");
    assert_eq!(script.imports, vec!["score".to_string()]);
    assert!(script.fixups.iter().any(|f| f.kind == FixupKind::Import));
}

// ==================== Defaults and varargs ====================

#[test]
fn test_missing_arguments_filled_from_defaults() {
    let script = compile_ok(
        "import int Roll(int sides, int times = 1);\n\
         int main() { return Roll(6); }\n",
    );
    // Two arguments are pushed onto the real stack: the default and the
    // supplied one.
    assert_eq!(count_op(&script, Opcode::PushReal), 2);
    assert_eq!(count_insn(&script, Opcode::NumFuncArgs, &[2]), 1);
}

#[test]
fn test_missing_argument_without_default_rejected() {
    let err = compile_err(
        "import int Roll(int sides, int times);\n\
         int main() { return Roll(6); }\n",
    );
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_too_many_arguments_needs_varargs() {
    let err = compile_err("import int F(int a);\nint main() { return F(1, 2); }\n");
    assert_eq!(err.kind, ErrorKind::Semantic);

    compile_ok("import int F(int a, ...);\nint main() { return F(1, 2, 3); }\n");
}

#[test]
fn test_forward_declaration_must_match() {
    let err = compile_err("int f(int x);\nint f(float x) { return 0; }\n");
    assert_eq!(err.kind, ErrorKind::Declaration);
}

// ==================== Structs, members, methods ====================

#[test]
fn test_struct_member_access_via_this() {
    let script = compile_ok(
        "managed struct Critter {\n\
             int hp;\n\
             int Heal(int amount);\n\
         };\n\
         int Critter::Heal(int amount) { hp = this.hp + amount; return hp; }\n",
    );
    assert_eq!(script.functions.len(), 1);
    assert_eq!(script.functions[0].name, "Critter::Heal");
    // this-accesses null-check the object pointer
    assert!(count_op(&script, Opcode::CheckNull) >= 1);
}

#[test]
fn test_method_call_sets_object_pointer() {
    let script = compile_ok(
        "managed struct Critter {\n\
             int hp;\n\
             int Heal(int amount);\n\
         };\n\
         int Critter::Heal(int amount) { hp += amount; return hp; }\n\
         void main(Critter *c) { c.Heal(3); }\n",
    );
    assert!(count_op(&script, Opcode::CallObj) >= 1);
    assert_eq!(count_op(&script, Opcode::Call), 1);
}

#[test]
fn test_extender_function_becomes_component() {
    let script = compile_ok(
        "managed struct Critter { int hp; };\n\
         int GetHp(this Critter *) { return hp; }\n\
         void main(Critter *c) { c.GetHp(); }\n",
    );
    assert_eq!(script.functions[0].name, "Critter::GetHp");
}

#[test]
fn test_struct_sizes_accumulate_and_align() {
    let script = compile_ok(
        "struct Point { short x; short y; char tag; };\n\
         Point origin;\n",
    );
    // 2 + 2 + 1 bytes, padded to the struct alignment of 4.
    assert_eq!(script.global_data.len(), 8);
}

#[test]
fn test_member_offsets_fold_into_single_access() {
    let script = compile_ok(
        "struct Point { int x; int y; };\n\
         Point origin;\n\
         void main() { origin.y = 5; }\n",
    );
    // origin.y folds to one LITTOREG MAR with a global-data fixup of
    // offset 4; no run-time ADD needed.
    let fixup = script
        .fixups
        .iter()
        .find(|f| f.kind == FixupKind::GlobalData)
        .expect("global fixup");
    assert_eq!(script.code[fixup.loc as usize], 4);
}

#[test]
fn test_protected_member_needs_this() {
    let err = compile_err(
        "managed struct Critter { protected int hp; };\n\
         void main(Critter *c) { int x = c.hp; }\n",
    );
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("Protected"));
}

#[test]
fn test_writeprotected_member_blocks_outside_writes() {
    let err = compile_err(
        "managed struct Critter { writeprotected int hp; };\n\
         void main(Critter *c) { c.hp = 1; }\n",
    );
    assert_eq!(err.kind, ErrorKind::Semantic);

    // Reading from outside stays legal.
    compile_ok(
        "managed struct Critter { writeprotected int hp; };\n\
         void main(Critter *c) { int x = c.hp; }\n",
    );
}

#[test]
fn test_struct_extends_inherits_components() {
    compile_ok(
        "managed struct Actor { int x; };\n\
         managed struct Critter extends Actor { int hp; };\n\
         void main(Critter *c) { c.x = 1; c.hp = 2; }\n",
    );
}

#[test]
fn test_ancestor_component_clash_rejected() {
    let err = compile_err(
        "managed struct Actor { int x; };\n\
         managed struct Critter extends Actor { int x; };\n",
    );
    assert_eq!(err.kind, ErrorKind::Declaration);
}

#[test]
fn test_dynpointer_ancestor_conversion() {
    compile_ok(
        "managed struct Actor { int x; };\n\
         managed struct Critter extends Actor { int hp; };\n\
         void main(Critter *c) { Actor *a = c; }\n",
    );
    let err = compile_err(
        "managed struct Actor { int x; };\n\
         managed struct Critter extends Actor { int hp; };\n\
         void main(Actor *a) { Critter *c = a; }\n",
    );
    assert_eq!(err.kind, ErrorKind::Type);
}

// ==================== Attributes ====================

#[test]
fn test_attribute_synthesizes_getter_and_setter() {
    let script = compile_ok(
        "builtin managed struct Critter {\n\
             import attribute int Health;\n\
         };\n\
         void main(Critter *c) { c.Health = 5; int h = c.Health; }\n",
    );
    // Both accessor imports carry the param-count encoding.
    assert!(script.imports.iter().any(|i| i == "Critter::get_Health^0"));
    assert!(script.imports.iter().any(|i| i == "Critter::set_Health^1"));
    assert_eq!(count_op(&script, Opcode::CallExt), 2);
}

#[test]
fn test_readonly_attribute_has_no_setter() {
    let err = compile_err(
        "builtin managed struct Critter {\n\
             import readonly attribute int Health;\n\
         };\n\
         void main(Critter *c) { c.Health = 5; }\n",
    );
    // No setter was declared, so the write can't resolve its function.
    assert!(matches!(
        err.kind,
        ErrorKind::Reference | ErrorKind::Semantic
    ));
}

#[test]
fn test_indexed_attribute_uses_geti() {
    let script = compile_ok(
        "builtin managed struct Deck {\n\
             import attribute int Cards[];\n\
         };\n\
         void main(Deck *d) { int c = d.Cards[3]; }\n",
    );
    assert!(script.imports.iter().any(|i| i == "Deck::geti_Cards^1"));
}

// ==================== Enums and constants ====================

#[test]
fn test_enum_values_auto_increment_and_fold() {
    let script = compile_ok(
        "enum Direction { North, East, South = 10, West };\n\
         int main() { return West; }\n",
    );
    // West folds to 11 at compile time.
    assert_eq!(count_insn(&script, Opcode::LitToReg, &[3, 11]), 1);
}

#[test]
fn test_enum_item_redefinition_rejected() {
    let err = compile_err("enum A { One };\nenum B { One };\n");
    assert_eq!(err.kind, ErrorKind::Declaration);
}

#[test]
fn test_enum_as_array_dimension() {
    compile_ok("enum Sizes { Big = 3 };\nvoid main() { int a[Big]; a[2] = 1; }\n");
}

// ==================== Globals ====================

#[test]
fn test_global_initializers_land_in_data_blob() {
    let script = compile_ok("int a = 7;\nfloat b = 1.0;\nint c;\n");
    assert_eq!(script.global_data.len(), 12);
    assert_eq!(&script.global_data[0..4], &7i32.to_le_bytes());
    // Floats are stored as their raw bit pattern.
    assert_eq!(&script.global_data[4..8], &1.0f32.to_bits().to_le_bytes());
    assert_eq!(&script.global_data[8..12], &[0, 0, 0, 0]);
}

#[test]
fn test_readonly_global_rejects_writes() {
    let err = compile_err("readonly int x = 5;\nvoid main() { x = 3; }\n");
    assert_eq!(err.kind, ErrorKind::Semantic);
    assert!(err.message.contains("readonly"));
}

#[test]
fn test_global_reads_use_fixups() {
    let script = compile_ok("int total;\nint main() { return total; }\n");
    assert!(script
        .fixups
        .iter()
        .any(|f| f.kind == FixupKind::GlobalData));
}

// ==================== Statements ====================

#[test]
fn test_while_loop_shape() {
    let script = compile_ok("void main() { int i; while (i < 10) i += 1; }");
    // Forward exit on false plus the backward jump.
    assert!(count_op(&script, Opcode::Jz) >= 1);
    assert!(count_op(&script, Opcode::Jmp) >= 1);
}

#[test]
fn test_do_while_jumps_back_on_true() {
    let script = compile_ok("void main() { int i; do i += 1; while (i < 3); }");
    assert!(count_op(&script, Opcode::Jnz) >= 1);
}

#[test]
fn test_break_outside_loop_rejected() {
    let err = compile_err("void main() { break; }");
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_continue_outside_loop_rejected() {
    let err = compile_err("void main() { continue; }");
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_return_value_from_void_rejected() {
    let err = compile_err("void main() { return 1; }");
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_return_type_mismatch_rejected() {
    let err = compile_err("int main() { float f = 1.0; return f; }");
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_block_locals_are_popped() {
    let script = compile_ok("void f() { int a; { int b; } int c; }");
    // Three zero-initializations, and stack trims on block exit and at
    // the function end.
    assert_eq!(count_op(&script, Opcode::ZeroMemory), 3);
    assert!(count_insn(&script, Opcode::Sub, &[1, 4]) >= 1);
    assert!(count_insn(&script, Opcode::Sub, &[1, 8]) >= 1);
}

#[test]
fn test_unbraced_compound_statements_cascade() {
    compile_ok("void main(int a) { while (a) if (a > 1) a -= 1; else a = 0; }");
}

#[test]
fn test_else_without_if_rejected() {
    let err = compile_err("void main() { else; }");
    assert_eq!(err.kind, ErrorKind::Syntax);
}

// ==================== Dynamic pointers and scope exits ====================

#[test]
fn test_local_dynpointer_is_released_on_scope_exit() {
    let script = compile_ok(
        "managed struct Critter { int hp; };\n\
         void main() { Critter *c = new Critter; }\n",
    );
    assert_eq!(count_op(&script, Opcode::NewUserObject), 1);
    // Function end releases the local pointer.
    assert!(count_op(&script, Opcode::MemZeroPtr) >= 1);
}

#[test]
fn test_returning_dyn_value_uses_sheltered_release() {
    let script = compile_ok(
        "managed struct Critter { int hp; };\n\
         Critter* main() { Critter *c = new Critter; return c; }\n",
    );
    // The returned pointer is sheltered on the stack and read back with
    // the non-decrementing release.
    assert_eq!(count_op(&script, Opcode::MemZeroPtrNd), 1);
    assert!(count_op(&script, Opcode::MemInitPtr) >= 1);
}

#[test]
fn test_null_assignment_to_dynpointer() {
    compile_ok(
        "managed struct Critter { int hp; };\n\
         void main() { Critter *c = null; c = new Critter; }\n",
    );
}

#[test]
fn test_new_requires_managed_or_sized_type() {
    let err = compile_err("struct Plain { int x; };\nvoid main() { Plain *p = new Plain; }");
    // A non-managed struct cannot be pointed to.
    assert_eq!(err.kind, ErrorKind::Type);
}

// ==================== Line numbers ====================

#[test]
fn test_linenum_opcodes_follow_source_lines() {
    let script = compile_ok("int main() {\nint a = 1;\nreturn a;\n}");
    let linenums: Vec<CodeCell> = instructions(&script.code)
        .iter()
        .filter(|insn| insn.1 == Opcode::LineNum)
        .map(|insn| insn.2[0])
        .collect();
    // Lines 2 and 3 each get an opcode before their first instruction.
    assert!(linenums.contains(&2), "linenums: {:?}", linenums);
    assert!(linenums.contains(&3), "linenums: {:?}", linenums);
    // Monotonic between jumps: straight-line code never goes backwards.
    let mut sorted = linenums.clone();
    sorted.sort_unstable();
    assert_eq!(linenums, sorted);
}

// ==================== Sections and diagnostics ====================

#[test]
fn test_sections_record_code_offsets() {
    let script = compile_ok("int main() { return 0; }");
    assert_eq!(script.sections.len(), 1);
    assert_eq!(script.sections[0].0, "UnnamedSection");
    assert_eq!(script.sections[0].1, 0);
}

#[test]
fn test_error_is_recorded_in_messages() {
    let mut msgs = MessageHandler::new();
    let result = compile(
        "int main() { return zork; }",
        CompilerOptions::default(),
        &mut msgs,
    );
    assert!(result.is_err());
    assert!(msgs.error().is_some());
}

#[test]
fn test_empty_return_in_int_function_returns_zero() {
    let script = compile_ok("int main() { return; }");
    assert!(count_insn(&script, Opcode::LitToReg, &[3, 0]) >= 1);
}

#[test]
fn test_warning_for_zero_as_dynamic_default() {
    let mut msgs = MessageHandler::new();
    compile(
        "managed struct Critter { int hp; };\n\
         import void F(Critter *c = 0);\n\
         void main() { F(); }\n",
        CompilerOptions::default(),
        &mut msgs,
    )
    .expect("compile failed");
    assert!(msgs.warnings().any(|w| w.message.contains("null")));
}

// ==================== Old-style strings ====================

fn old_string_options() -> CompilerOptions {
    CompilerOptions {
        old_strings: true,
        ..CompilerOptions::default()
    }
}

#[test]
fn test_old_string_assignment_is_inline_copy() {
    let mut msgs = MessageHandler::new();
    let script = compile(
        "string buffer;\nvoid main() { buffer = \"hi\"; }\n",
        old_string_options(),
        &mut msgs,
    )
    .expect("compile failed");
    // The bounded copy loop terminates the destination.
    assert!(count_op(&script, Opcode::StringsEqual) == 0);
    assert!(count_op(&script, Opcode::MemWrite) >= 2);
    assert_eq!(script.global_data.len(), 200);
}

#[test]
fn test_old_string_rejected_without_option() {
    let err = compile_err("string buffer;\n");
    assert_eq!(err.kind, ErrorKind::Declaration);
}

#[test]
fn test_string_comparison_uses_string_opcode() {
    let mut msgs = MessageHandler::new();
    let script = compile(
        "int main(string a) { return a == \"x\"; }\n",
        old_string_options(),
        &mut msgs,
    )
    .expect("compile failed");
    assert_eq!(count_op(&script, Opcode::StringsEqual), 1);
}
