//! Predefined symbols.
//!
//! Keywords, punctuation, operators and the primitive vartypes occupy fixed
//! low handles so the parser can match on them directly. Handles at or below
//! [`LAST_PREDEFINED`] are never identifiers.

use questscript_bytecode::Opcode;

use super::entry::{OperatorInfo, SymbolKind, SymbolTableEntry};
use super::{Symbol, SymbolTable};

pub const NO_SYMBOL: Symbol = Symbol(0);

// Punctuation.
pub const OPEN_PAREN: Symbol = Symbol(1);
pub const CLOSE_PAREN: Symbol = Symbol(2);
pub const OPEN_BRACKET: Symbol = Symbol(3);
pub const CLOSE_BRACKET: Symbol = Symbol(4);
pub const OPEN_BRACE: Symbol = Symbol(5);
pub const CLOSE_BRACE: Symbol = Symbol(6);
pub const DOT: Symbol = Symbol(7);
pub const COMMA: Symbol = Symbol(8);
pub const SEMICOLON: Symbol = Symbol(9);
pub const SCOPE_RES: Symbol = Symbol(10);
pub const COLON: Symbol = Symbol(11);
/// `?` — parsed as the least-binding binary operator.
pub const TERN: Symbol = Symbol(12);

// Assignment family.
pub const ASSIGN: Symbol = Symbol(13);
pub const ASSIGN_PLUS: Symbol = Symbol(14);
pub const ASSIGN_MINUS: Symbol = Symbol(15);
pub const ASSIGN_STAR: Symbol = Symbol(16);
pub const ASSIGN_SLASH: Symbol = Symbol(17);
pub const ASSIGN_PERCENT: Symbol = Symbol(18);
pub const ASSIGN_AND: Symbol = Symbol(19);
pub const ASSIGN_OR: Symbol = Symbol(20);
pub const ASSIGN_XOR: Symbol = Symbol(21);
pub const ASSIGN_SHL: Symbol = Symbol(22);
pub const ASSIGN_SHR: Symbol = Symbol(23);
pub const INCREMENT: Symbol = Symbol(24);
pub const DECREMENT: Symbol = Symbol(25);

// Operators.
pub const NOT: Symbol = Symbol(26);
pub const BITNEG: Symbol = Symbol(27);
/// `*` — multiplication, and the dynpointer marker in declarations.
pub const DYNPOINTER: Symbol = Symbol(28);
pub const DIVIDE: Symbol = Symbol(29);
pub const MODULO: Symbol = Symbol(30);
pub const PLUS: Symbol = Symbol(31);
pub const MINUS: Symbol = Symbol(32);
pub const SHIFT_LEFT: Symbol = Symbol(33);
pub const SHIFT_RIGHT: Symbol = Symbol(34);
pub const LESS: Symbol = Symbol(35);
pub const LESS_EQUAL: Symbol = Symbol(36);
pub const GREATER: Symbol = Symbol(37);
pub const GREATER_EQUAL: Symbol = Symbol(38);
pub const EQUALS: Symbol = Symbol(39);
pub const NOT_EQUALS: Symbol = Symbol(40);
pub const BIT_AND: Symbol = Symbol(41);
pub const BIT_XOR: Symbol = Symbol(42);
pub const BIT_OR: Symbol = Symbol(43);
pub const LOGICAL_AND: Symbol = Symbol(44);
pub const LOGICAL_OR: Symbol = Symbol(45);

// Primitive vartypes.
pub const CHAR: Symbol = Symbol(46);
pub const SHORT: Symbol = Symbol(47);
pub const INT: Symbol = Symbol(48);
pub const LONG: Symbol = Symbol(49);
pub const FLOAT: Symbol = Symbol(50);
pub const STRING: Symbol = Symbol(51);
pub const VOID: Symbol = Symbol(52);

// Keywords.
pub const IF: Symbol = Symbol(53);
pub const ELSE: Symbol = Symbol(54);
pub const WHILE: Symbol = Symbol(55);
pub const DO: Symbol = Symbol(56);
pub const FOR: Symbol = Symbol(57);
pub const SWITCH: Symbol = Symbol(58);
pub const CASE: Symbol = Symbol(59);
pub const DEFAULT: Symbol = Symbol(60);
pub const BREAK: Symbol = Symbol(61);
pub const CONTINUE: Symbol = Symbol(62);
pub const RETURN: Symbol = Symbol(63);
pub const STRUCT: Symbol = Symbol(64);
pub const ENUM: Symbol = Symbol(65);
pub const EXTENDS: Symbol = Symbol(66);
pub const EXPORT: Symbol = Symbol(67);
pub const THIS: Symbol = Symbol(68);
pub const NULL: Symbol = Symbol(69);
/// `new` — parsed as a unary operator.
pub const NEW: Symbol = Symbol(70);
pub const IMPORT_STD: Symbol = Symbol(71);
pub const IMPORT_TRY: Symbol = Symbol(72);
pub const READONLY: Symbol = Symbol(73);
pub const WRITEPROTECTED: Symbol = Symbol(74);
pub const PROTECTED: Symbol = Symbol(75);
pub const MANAGED: Symbol = Symbol(76);
pub const BUILTIN: Symbol = Symbol(77);
pub const AUTOPTR: Symbol = Symbol(78);
pub const INTERNALSTRING: Symbol = Symbol(79);
pub const STATIC: Symbol = Symbol(80);
pub const ATTRIBUTE: Symbol = Symbol(81);
pub const CONST: Symbol = Symbol(82);
pub const NOLOOPCHECK: Symbol = Symbol(83);
pub const VARARGS: Symbol = Symbol(84);

pub const LAST_PREDEFINED: Symbol = VARARGS;

// Binding strengths; larger binds less. The ternary must out-rank `||`.
const PRIO_UNARY_NEW: u32 = 10;
const PRIO_UNARY_NOT: u32 = 15;
const PRIO_UNARY_MINUS: u32 = 20;
const PRIO_MULTIPLICATIVE: u32 = 30;
const PRIO_ADDITIVE: u32 = 40;
const PRIO_SHIFT: u32 = 50;
const PRIO_RELATIONAL: u32 = 60;
const PRIO_EQUALITY: u32 = 65;
const PRIO_BIT_AND: u32 = 70;
const PRIO_BIT_XOR: u32 = 75;
const PRIO_BIT_OR: u32 = 80;
const PRIO_LOGICAL_AND: u32 = 110;
const PRIO_LOGICAL_OR: u32 = 115;
const PRIO_TERNARY: u32 = 120;

/// Populate a fresh table with the predefined entries, in handle order.
pub(super) fn install(table: &mut SymbolTable) {
    table.add_predefined("", SymbolKind::NoType);

    for punct in ["(", ")", "[", "]", "{", "}", ".", ",", ";", "::", ":"] {
        table.add_predefined(punct, SymbolKind::Keyword);
    }
    table.add_operator("?", Opcode::Jz, Some(PRIO_TERNARY), None);

    table.add_predefined("=", SymbolKind::Assign);
    for (text, opcode) in [
        ("+=", Opcode::AddReg),
        ("-=", Opcode::SubReg),
        ("*=", Opcode::MulReg),
        ("/=", Opcode::DivReg),
        ("%=", Opcode::ModReg),
        ("&=", Opcode::BitAnd),
        ("|=", Opcode::BitOr),
        ("^=", Opcode::XorReg),
        ("<<=", Opcode::ShiftLeft),
        (">>=", Opcode::ShiftRight),
    ] {
        table.add_assign_symbol(text, SymbolKind::AssignMod, opcode);
    }
    table.add_assign_symbol("++", SymbolKind::AssignSOp, Opcode::Add);
    table.add_assign_symbol("--", SymbolKind::AssignSOp, Opcode::Sub);

    table.add_operator("!", Opcode::NotReg, None, Some(PRIO_UNARY_NOT));
    table.add_operator("~", Opcode::NotReg, None, Some(PRIO_UNARY_NOT));
    table.add_operator("*", Opcode::MulReg, Some(PRIO_MULTIPLICATIVE), None);
    table.add_operator("/", Opcode::DivReg, Some(PRIO_MULTIPLICATIVE), None);
    table.add_operator("%", Opcode::ModReg, Some(PRIO_MULTIPLICATIVE), None);
    table.add_operator("+", Opcode::AddReg, Some(PRIO_ADDITIVE), None);
    table.add_operator(
        "-",
        Opcode::SubReg,
        Some(PRIO_ADDITIVE),
        Some(PRIO_UNARY_MINUS),
    );
    table.add_operator("<<", Opcode::ShiftLeft, Some(PRIO_SHIFT), None);
    table.add_operator(">>", Opcode::ShiftRight, Some(PRIO_SHIFT), None);
    table.add_operator("<", Opcode::LessThan, Some(PRIO_RELATIONAL), None);
    table.add_operator("<=", Opcode::Lte, Some(PRIO_RELATIONAL), None);
    table.add_operator(">", Opcode::Greater, Some(PRIO_RELATIONAL), None);
    table.add_operator(">=", Opcode::Gte, Some(PRIO_RELATIONAL), None);
    table.add_operator("==", Opcode::IsEqual, Some(PRIO_EQUALITY), None);
    table.add_operator("!=", Opcode::NotEqual, Some(PRIO_EQUALITY), None);
    table.add_operator("&", Opcode::BitAnd, Some(PRIO_BIT_AND), None);
    table.add_operator("^", Opcode::XorReg, Some(PRIO_BIT_XOR), None);
    table.add_operator("|", Opcode::BitOr, Some(PRIO_BIT_OR), None);
    table.add_operator("&&", Opcode::And, Some(PRIO_LOGICAL_AND), None);
    table.add_operator("||", Opcode::Or, Some(PRIO_LOGICAL_OR), None);

    table.add_vartype("char", 1);
    table.add_vartype("short", 2);
    table.add_vartype("int", 4);
    table.add_vartype("long", 4);
    table.add_vartype("float", 4);
    table.add_vartype("string", questscript_bytecode::STRINGBUFFER_LENGTH as u32);
    table.add_vartype("void", 0);

    for kw in [
        "if",
        "else",
        "while",
        "do",
        "for",
        "switch",
        "case",
        "default",
        "break",
        "continue",
        "return",
        "struct",
        "enum",
        "extends",
        "export",
        "this",
        "null",
    ] {
        table.add_predefined(kw, SymbolKind::Keyword);
    }
    table.add_operator("new", Opcode::NewUserObject, None, Some(PRIO_UNARY_NEW));
    for kw in [
        "import",
        "_tryimport",
        "readonly",
        "writeprotected",
        "protected",
        "managed",
        "builtin",
        "autoptr",
        "internalstring",
        "static",
        "attribute",
        "const",
        "noloopcheck",
        "...",
    ] {
        table.add_predefined(kw, SymbolKind::Keyword);
    }
}

impl SymbolTable {
    fn add_predefined(&mut self, name: &str, kind: SymbolKind) -> Symbol {
        let sym = self.find_or_add(name);
        self[sym].kind = kind;
        sym
    }

    fn add_operator(
        &mut self,
        name: &str,
        opcode: Opcode,
        binary_prio: Option<u32>,
        unary_prio: Option<u32>,
    ) -> Symbol {
        let sym = self.add_predefined(name, SymbolKind::Operator);
        self[sym].operator = Some(OperatorInfo {
            opcode,
            binary_prio,
            unary_prio,
        });
        sym
    }

    fn add_assign_symbol(&mut self, name: &str, kind: SymbolKind, opcode: Opcode) -> Symbol {
        let sym = self.add_predefined(name, kind);
        self[sym].operator = Some(OperatorInfo {
            opcode,
            binary_prio: None,
            unary_prio: None,
        });
        sym
    }

    fn add_vartype(&mut self, name: &str, size: u32) -> Symbol {
        let sym = self.add_predefined(name, SymbolKind::Vartype);
        let entry: &mut SymbolTableEntry = &mut self[sym];
        entry.size = size;
        sym
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_match_names() {
        let table = SymbolTable::new();
        assert_eq!(table.find("if"), Some(IF));
        assert_eq!(table.find("::"), Some(SCOPE_RES));
        assert_eq!(table.find("*"), Some(DYNPOINTER));
        assert_eq!(table.find("..."), Some(VARARGS));
        assert_eq!(table.find("float"), Some(FLOAT));
        assert_eq!(VARARGS, LAST_PREDEFINED);
    }

    #[test]
    fn test_operator_priorities() {
        let table = SymbolTable::new();
        // `?` must bind less than `||`, `||` less than `&&`.
        let tern = table.binary_op_prio(TERN).unwrap();
        let or = table.binary_op_prio(LOGICAL_OR).unwrap();
        let and = table.binary_op_prio(LOGICAL_AND).unwrap();
        assert!(tern > or);
        assert!(or > and);
        // `-` works in both roles, `!` only as unary.
        assert!(table.binary_op_prio(MINUS).is_some());
        assert!(table.unary_op_prio(MINUS).is_some());
        assert!(table.binary_op_prio(NOT).is_none());
        assert!(table.unary_op_prio(NOT).is_some());
    }
}
