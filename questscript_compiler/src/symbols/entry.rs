//! Symbol-table entries.

use bitflags::bitflags;
use questscript_bytecode::Opcode;

use super::{Symbol, Vartype};

/// Nesting depth reserved for function parameters.
pub const PARAMETER_SCOPE: usize = 1;
/// Nesting depth of the function body proper.
pub const FUNCTION_SCOPE: usize = 2;

/// Maximum number of declared parameters of one function.
pub const MAX_FUNCTION_PARAMETERS: usize = 100;

/// What a symbol currently denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolKind {
    #[default]
    NoType,
    Keyword,
    Operator,
    Vartype,
    /// Forward-declared managed struct without a body yet.
    UndefinedStruct,
    Function,
    Attribute,
    StructComponent,
    Constant,
    LiteralInt,
    LiteralFloat,
    LiteralString,
    GlobalVar,
    LocalVar,
    /// `=`
    Assign,
    /// `+=` and friends.
    AssignMod,
    /// `++` / `--`
    AssignSOp,
}

/// How a compound vartype was derived from its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VartypeModifier {
    #[default]
    Atomic,
    Const,
    Dynpointer,
    Dynarray,
    Array,
}

bitflags! {
    /// Declaration qualifiers collected in front of a declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeQualifierSet: u16 {
        const ATTRIBUTE      = 1 << 0;
        const AUTOPTR        = 1 << 1;
        const BUILTIN        = 1 << 2;
        const CONST          = 1 << 3;
        const IMPORT         = 1 << 4;
        const MANAGED        = 1 << 5;
        const PROTECTED      = 1 << 6;
        const READONLY       = 1 << 7;
        const STATIC         = 1 << 8;
        const STRINGSTRUCT   = 1 << 9;
        const WRITEPROTECTED = 1 << 10;
    }
}

impl TypeQualifierSet {
    /// Qualifier names in declaration order, for diagnostics.
    pub fn describe(self) -> String {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::ATTRIBUTE, "attribute"),
            (Self::AUTOPTR, "autoptr"),
            (Self::BUILTIN, "builtin"),
            (Self::CONST, "const"),
            (Self::IMPORT, "import"),
            (Self::MANAGED, "managed"),
            (Self::PROTECTED, "protected"),
            (Self::READONLY, "readonly"),
            (Self::STATIC, "static"),
            (Self::STRINGSTRUCT, "internalstring"),
            (Self::WRITEPROTECTED, "writeprotected"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        names.join(" ")
    }
}

bitflags! {
    /// Extra per-entry state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u16 {
        /// Declared inside a struct body or attached via extender syntax.
        const STRUCT_MEMBER  = 1 << 0;
        /// This vartype is a struct.
        const STRUCT_VARTYPE = 1 << 1;
        const STRUCT_MANAGED = 1 << 2;
        const STRUCT_BUILTIN = 1 << 3;
        const STRUCT_AUTOPTR = 1 << 4;
        /// Function body starts with `LOOPCHECKOFF`.
        const NO_LOOP_CHECK  = 1 << 5;
        /// The symbol was referenced at least once in phase 2.
        const ACCESSED       = 1 << 6;
    }
}

/// Default value of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ParamDefault {
    #[default]
    None,
    Int(i32),
    Float(f32),
    /// Dynamic parameter defaulting to `null`.
    Dyn,
}

impl ParamDefault {
    pub fn exists(self) -> bool {
        !matches!(self, ParamDefault::None)
    }

    /// The default as a raw argument cell. Floats keep their bit pattern so
    /// pushing the cell is a byte copy, matching the runtime image format.
    pub fn to_cell(self) -> i32 {
        match self {
            ParamDefault::None => 0,
            ParamDefault::Int(i) => i,
            ParamDefault::Float(f) => f.to_bits() as i32,
            ParamDefault::Dyn => 0,
        }
    }

    pub fn describe(self) -> String {
        match self {
            ParamDefault::None => "(no default)".to_string(),
            ParamDefault::Int(i) => i.to_string(),
            ParamDefault::Float(f) => f.to_string(),
            ParamDefault::Dyn => "null".to_string(),
        }
    }
}

/// Opcode and binding strength of an operator symbol.
///
/// Priorities compare "least binding": the larger the number, the looser the
/// operator binds. An operator unusable in a role has `None` there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorInfo {
    pub opcode: Opcode,
    pub binary_prio: Option<u32>,
    pub unary_prio: Option<u32>,
}

/// One interned symbol.
///
/// `offset` is multipurpose, exactly as wide as its uses: stack offset for
/// locals, global-data offset for globals, import ordinal for imports,
/// constant value for enum items, string-blob offset for string literals,
/// code offset (or pre-phase declaration class) for functions.
#[derive(Debug, Clone, Default)]
pub struct SymbolTableEntry {
    pub name: String,
    pub kind: SymbolKind,
    /// Token-stream position of the declaration, for cross-references.
    pub declared: Option<usize>,
    /// For variables/components: their vartype. For compound vartypes: the
    /// base vartype the modifier was applied to.
    pub vartype: Vartype,
    pub vartype_modifier: VartypeModifier,
    /// Classic-array dimensions (outermost first).
    pub dims: Vec<u32>,
    pub qualifiers: TypeQualifierSet,
    pub offset: i32,
    /// Nesting depth at the point of declaration.
    pub scope: usize,
    /// Byte size of a value of this vartype (atomic vartypes only).
    pub size: u32,
    /// Containing struct for components, enum for items, ancestor for structs.
    pub parent: Symbol,
    pub children: Vec<Symbol>,
    /// Index 0 is the return type.
    pub param_vartypes: Vec<Vartype>,
    pub param_defaults: Vec<ParamDefault>,
    pub varargs: bool,
    pub flags: EntryFlags,
    pub operator: Option<OperatorInfo>,
}

impl SymbolTableEntry {
    /// A fresh entry that keeps only the name.
    pub fn blank(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of declared parameters (return type not counted).
    pub fn num_params(&self) -> usize {
        self.param_vartypes.len().saturating_sub(1)
    }

    /// Whether parameter `idx` (1-based) has a declared default.
    pub fn has_param_default(&self, idx: usize) -> bool {
        self.param_defaults.get(idx).is_some_and(|d| d.exists())
    }

    /// Function parameters live on nesting level 1; nothing else does.
    pub fn is_parameter(&self) -> bool {
        self.kind == SymbolKind::LocalVar && self.scope == PARAMETER_SCOPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_default_cell_encoding() {
        assert_eq!(ParamDefault::Int(-3).to_cell(), -3);
        assert_eq!(ParamDefault::Dyn.to_cell(), 0);
        // float defaults are stored as raw bits
        assert_eq!(ParamDefault::Float(1.0).to_cell(), 1.0f32.to_bits() as i32);
    }

    #[test]
    fn test_qualifier_describe() {
        let tqs = TypeQualifierSet::MANAGED | TypeQualifierSet::BUILTIN;
        assert_eq!(tqs.describe(), "builtin managed");
    }

    #[test]
    fn test_blank_keeps_name_only() {
        let mut entry = SymbolTableEntry::blank("foo");
        entry.kind = SymbolKind::GlobalVar;
        entry.offset = 12;
        let blanked = SymbolTableEntry::blank(entry.name.clone());
        assert_eq!(blanked.name, "foo");
        assert_eq!(blanked.kind, SymbolKind::NoType);
        assert_eq!(blanked.offset, 0);
    }
}
