//! Bytecode definitions for the QuestScript virtual machine.
//!
//! This crate is the shared vocabulary between the compiler, the linker and
//! the runtime: the opcode set, the register file, fixup and export kinds,
//! and the cell-size constants that the compiler bakes into offsets.
//!
//! A compiled script is a flat sequence of 32-bit cells. Each instruction is
//! one opcode cell followed by its argument cells inline; [`Opcode::num_args`]
//! tells a consumer how many cells to skip. Jump arguments are relative to
//! the cell *after* the argument, so `JMP 0` is an infinite loop on itself
//! minus one cell and `JMP -2` re-executes the jump.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One machine cell. Code, immediate arguments and jump distances all use
/// this width.
pub type CodeCell = i32;

/// Index of a cell within the code array.
pub type CodeLoc = i32;

/// Size of one stack cell in bytes.
pub const SIZE_OF_STACK_CELL: u32 = 4;

/// Size of an `int` value in bytes.
pub const SIZE_OF_INT: u32 = 4;

/// Size of a managed pointer on the stack or inside a struct, in bytes.
pub const SIZE_OF_DYNPOINTER: u32 = 4;

/// Struct sizes are rounded up to a multiple of this at their tail.
pub const STRUCT_ALIGNMENT: u32 = 4;

/// Capacity of an old-style string buffer, terminator included.
pub const STRINGBUFFER_LENGTH: usize = 200;

/// The virtual machine registers.
///
/// These are encoded directly into instruction argument cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Register {
    /// Stack pointer.
    Sp = 1,
    /// Memory address register; `MEMREAD`/`MEMWRITE` go through it.
    Mar = 2,
    /// General result register.
    Ax = 3,
    /// Auxiliary register; the second operand of register-register opcodes.
    Bx = 4,
    /// Scratch register (string copy loops).
    Cx = 5,
    /// Object pointer; holds `this` inside struct member functions.
    Op = 6,
    /// Scratch register (string copy loops).
    Dx = 7,
}

impl Register {
    /// The register as an argument cell.
    pub const fn cell(self) -> CodeCell {
        self as CodeCell
    }
}

/// The instruction set the compiler emits.
///
/// `Reg`-suffixed arithmetic takes two registers; the plain forms take a
/// register and an immediate. `F`-prefixed opcodes are the float variants
/// that the compiler substitutes when an operand is a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Opcode {
    Add = 1,             // reg += imm
    Sub = 2,             // reg -= imm
    RegToReg = 3,        // reg2 = reg1
    Ret = 5,             // return from CALL
    LitToReg = 6,        // reg = imm
    MemRead = 7,         // reg = m[MAR] (4 bytes)
    MemWrite = 8,        // m[MAR] = reg (4 bytes)
    MulReg = 9,          // reg1 *= reg2
    DivReg = 10,         // reg1 /= reg2
    AddReg = 11,         // reg1 += reg2
    SubReg = 12,         // reg1 -= reg2
    BitAnd = 13,         // reg1 &= reg2
    BitOr = 14,          // reg1 |= reg2
    IsEqual = 15,        // reg1 = (reg1 == reg2)
    NotEqual = 16,       // reg1 = (reg1 != reg2)
    Greater = 17,        // reg1 = (reg1 > reg2)
    LessThan = 18,       // reg1 = (reg1 < reg2)
    Gte = 19,            // reg1 = (reg1 >= reg2)
    Lte = 20,            // reg1 = (reg1 <= reg2)
    And = 21,            // reg1 = (reg1 && reg2)
    Or = 22,             // reg1 = (reg1 || reg2)
    Call = 23,           // call local function at code offset in reg
    MemReadB = 24,       // reg = m[MAR] (1 byte)
    MemReadW = 25,       // reg = m[MAR] (2 bytes)
    MemWriteB = 26,      // m[MAR] = reg (1 byte)
    MemWriteW = 27,      // m[MAR] = reg (2 bytes)
    Jz = 28,             // jump if AX == 0
    PushReg = 29,        // push reg onto the stack
    PopReg = 30,         // pop stack into reg
    Jmp = 31,            // unconditional relative jump
    Mul = 32,            // reg *= imm
    CallExt = 33,        // call imported function whose ordinal is in reg
    PushReal = 34,       // push reg onto the engine's real stack
    SubRealStack = 35,   // pop n cells off the engine's real stack
    LineNum = 36,        // source line of the following instructions
    ThisBase = 38,       // base code offset of the current function
    NumFuncArgs = 39,    // argument count for the next CALLEXT
    ModReg = 40,         // reg1 %= reg2
    XorReg = 41,         // reg1 ^= reg2
    NotReg = 42,         // reg = !reg
    ShiftLeft = 43,      // reg1 <<= reg2
    ShiftRight = 44,     // reg1 >>= reg2
    CallObj = 45,        // set `this` for the next CALL/CALLEXT from reg
    CheckBounds = 46,    // trap unless 0 <= reg < imm
    MemWritePtr = 47,    // m[MAR] = reg, managed (adjusts refcounts)
    MemReadPtr = 48,     // reg = m[MAR], managed
    MemZeroPtr = 49,     // release the pointer in m[MAR]
    MemInitPtr = 50,     // write reg to m[MAR] without releasing the old value
    LoadSpOffs = 51,     // MAR = SP - imm
    CheckNull = 52,      // trap if MAR == 0
    FAdd = 53,           // float: reg += imm
    FSub = 54,           // float: reg -= imm
    FMulReg = 55,        // float: reg1 *= reg2
    FDivReg = 56,        // float: reg1 /= reg2
    FAddReg = 57,        // float: reg1 += reg2
    FSubReg = 58,        // float: reg1 -= reg2
    FGreater = 59,       // float: reg1 = (reg1 > reg2)
    FLessThan = 60,      // float: reg1 = (reg1 < reg2)
    FGte = 61,           // float: reg1 = (reg1 >= reg2)
    FLte = 62,           // float: reg1 = (reg1 <= reg2)
    ZeroMemory = 63,     // zero imm bytes starting at m[MAR]
    CreateString = 64,   // reg = new String object copied from char buffer at reg
    StringsEqual = 65,   // reg1 = strcmp(reg1, reg2) == 0
    StringsNotEq = 66,   // reg1 = strcmp(reg1, reg2) != 0
    CheckNullReg = 67,   // trap if reg == 0
    LoopCheckOff = 68,   // disable the runtime infinite-loop guard
    MemZeroPtrNd = 69,   // release m[MAR] but never free (AX still references it)
    Jnz = 70,            // jump if AX != 0
    DynamicBounds = 71,  // trap unless byte offset in reg is inside m[MAR]'s block
    NewArray = 72,       // reg = new dynarray (length in reg, element size, managed flag)
    NewUserObject = 73,  // reg = new managed object of imm bytes
}

impl Opcode {
    /// Number of argument cells following the opcode cell.
    pub const fn num_args(self) -> usize {
        use Opcode::*;
        match self {
            Ret | CheckNull | MemZeroPtr | MemZeroPtrNd | LoopCheckOff => 0,
            Jz | Jnz | Jmp | PushReg | PopReg | PushReal | SubRealStack | LineNum
            | ThisBase | NumFuncArgs | NotReg | CallObj | Call | CallExt | MemRead
            | MemWrite | MemReadB | MemReadW | MemWriteB | MemWriteW | MemReadPtr
            | MemWritePtr | MemInitPtr | LoadSpOffs | ZeroMemory | CreateString
            | CheckNullReg | DynamicBounds | NewUserObject => 1,
            Add | Sub | RegToReg | LitToReg | MulReg | DivReg | AddReg | SubReg
            | BitAnd | BitOr | IsEqual | NotEqual | Greater | LessThan | Gte | Lte
            | And | Or | Mul | ModReg | XorReg | ShiftLeft | ShiftRight
            | CheckBounds | FAdd | FSub | FMulReg | FDivReg | FAddReg | FSubReg
            | FGreater | FLessThan | FGte | FLte | StringsEqual | StringsNotEq => 2,
            NewArray => 3,
        }
    }

    /// Whether this opcode always leaves a boolean (0/1) in its destination.
    pub const fn is_boolean(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            IsEqual
                | NotEqual
                | Greater
                | LessThan
                | Gte
                | Lte
                | And
                | Or
                | FGreater
                | FLessThan
                | FGte
                | FLte
                | StringsEqual
                | StringsNotEq
        )
    }

    /// The opcode as a code cell.
    pub const fn cell(self) -> CodeCell {
        self as CodeCell
    }
}

/// What a fixup cell must be relocated against when the script is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FixupKind {
    /// Offset into the global data blob.
    GlobalData = 1,
    /// Ordinal into the import table.
    Import = 2,
    /// Offset into the code array (function entry points).
    Code = 3,
    /// Offset into the string-literal blob.
    String = 4,
}

/// What kind of entity an export-table entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExportKind {
    /// A global data offset.
    Data = 1,
    /// A function entry point.
    Function = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for raw in 1..=73 {
            if raw == 4 || raw == 37 {
                // gaps left for retired opcodes
                assert!(Opcode::try_from(raw).is_err());
                continue;
            }
            let op = Opcode::try_from(raw).expect("opcode should decode");
            assert_eq!(CodeCell::from(op), raw);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(Opcode::try_from(0).is_err());
        assert!(Opcode::try_from(74).is_err());
        assert!(Opcode::try_from(-1).is_err());
    }

    #[test]
    fn test_num_args() {
        assert_eq!(Opcode::Ret.num_args(), 0);
        assert_eq!(Opcode::Jmp.num_args(), 1);
        assert_eq!(Opcode::LitToReg.num_args(), 2);
        assert_eq!(Opcode::NewArray.num_args(), 3);
    }

    #[test]
    fn test_boolean_opcodes() {
        assert!(Opcode::IsEqual.is_boolean());
        assert!(Opcode::FGte.is_boolean());
        assert!(Opcode::StringsNotEq.is_boolean());
        assert!(!Opcode::AddReg.is_boolean());
        assert!(!Opcode::Jmp.is_boolean());
    }

    #[test]
    fn test_register_encoding() {
        assert_eq!(Register::Sp.cell(), 1);
        assert_eq!(Register::Ax.cell(), 3);
        assert_eq!(Register::try_from(6), Ok(Register::Op));
        assert!(Register::try_from(8).is_err());
    }
}
