//! Interned symbols and the typed symbol table.
//!
//! Symbols are stable integer handles into an arena of entries. Entries are
//! never removed; block-local shadowing overwrites an entry after stashing
//! the old one on the nesting stack, and scope exit writes the stash back.
//! That keeps every handle valid for the whole compilation unit, which both
//! compiler phases rely on.

pub mod entry;
pub mod predef;

use indexmap::IndexMap;
use questscript_bytecode::SIZE_OF_DYNPOINTER;

pub use entry::{
    EntryFlags, OperatorInfo, ParamDefault, SymbolKind, SymbolTableEntry, TypeQualifierSet,
    VartypeModifier, FUNCTION_SCOPE, MAX_FUNCTION_PARAMETERS, PARAMETER_SCOPE,
};

use questscript_bytecode::Opcode;

/// A stable handle into the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(pub u32);

impl Symbol {
    pub const NONE: Symbol = Symbol(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A vartype is just a symbol whose entry describes a type.
pub type Vartype = Symbol;

/// The interned identifier table.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: Vec<SymbolTableEntry>,
    index: IndexMap<String, Symbol>,
    string_struct: Option<Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A table pre-populated with keywords, operators and primitive vartypes.
    pub fn new() -> Self {
        let mut table = Self {
            entries: Vec::new(),
            index: IndexMap::new(),
            string_struct: None,
        };
        predef::install(&mut table);
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.index.get(name).copied()
    }

    pub fn find_or_add(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.index.get(name) {
            return sym;
        }
        let sym = Symbol(self.entries.len() as u32);
        self.entries.push(SymbolTableEntry::blank(name));
        self.index.insert(name.to_string(), sym);
        sym
    }

    pub fn name(&self, sym: Symbol) -> &str {
        &self[sym].name
    }

    pub fn kind(&self, sym: Symbol) -> SymbolKind {
        self.entries
            .get(sym.index())
            .map(|e| e.kind)
            .unwrap_or(SymbolKind::NoType)
    }

    /// The declared vartype of a variable/component, or the base vartype of
    /// a compound vartype.
    pub fn get_vartype(&self, sym: Symbol) -> Vartype {
        self[sym].vartype
    }

    pub fn set_declared(&mut self, sym: Symbol, pos: usize) {
        self[sym].declared = Some(pos);
    }

    pub fn declared(&self, sym: Symbol) -> Option<usize> {
        self[sym].declared
    }

    pub fn mark_accessed(&mut self, sym: Symbol) {
        self[sym].flags |= EntryFlags::ACCESSED;
    }

    /// Handles above the predefined block whose names look like identifiers.
    pub fn is_identifier(&self, sym: Symbol) -> bool {
        if sym <= predef::LAST_PREDEFINED || sym.index() >= self.entries.len() {
            return false;
        }
        let name = self.name(sym);
        let mut chars = name.chars();
        match chars.next() {
            None => return false,
            Some(c) if c.is_ascii_digit() => return false,
            Some(c) if !(c.is_ascii_alphanumeric() || c == '_') => return false,
            _ => {}
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Intern `"Struct::component"`.
    pub fn mangle(&mut self, struct_sym: Symbol, component: Symbol) -> Symbol {
        let full = format!("{}::{}", self.name(struct_sym), self.name(component));
        self.find_or_add(&full)
    }

    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        (0..self.entries.len() as u32).map(Symbol)
    }

    // ==================== String struct ====================

    pub fn string_struct_sym(&self) -> Option<Symbol> {
        self.string_struct
    }

    pub fn set_string_struct_sym(&mut self, sym: Symbol) {
        self.string_struct = Some(sym);
    }

    /// The dynpointer vartype wrapping the configured string struct.
    pub fn string_struct_ptr(&mut self) -> Option<Vartype> {
        self.string_struct
            .map(|ss| self.vartype_with(VartypeModifier::Dynpointer, ss))
    }

    // ==================== Operators ====================

    pub fn operator_opcode(&self, sym: Symbol) -> Option<Opcode> {
        self[sym].operator.map(|op| op.opcode)
    }

    pub fn binary_op_prio(&self, sym: Symbol) -> Option<u32> {
        self[sym].operator.and_then(|op| op.binary_prio)
    }

    pub fn unary_op_prio(&self, sym: Symbol) -> Option<u32> {
        self[sym].operator.and_then(|op| op.unary_prio)
    }

    // ==================== Vartype construction ====================

    /// Apply a modifier to a vartype, interning the compound name.
    pub fn vartype_with(&mut self, modifier: VartypeModifier, base: Vartype) -> Vartype {
        debug_assert!(modifier != VartypeModifier::Atomic);
        let name = match modifier {
            VartypeModifier::Const => format!("const {}", self.name(base)),
            VartypeModifier::Dynpointer => format!("{}*", self.name(base)),
            VartypeModifier::Dynarray => format!("{}[]", self.name(base)),
            VartypeModifier::Array | VartypeModifier::Atomic => unreachable!(),
        };
        let sym = self.find_or_add(&name);
        if self[sym].kind == SymbolKind::NoType {
            let entry = &mut self[sym];
            entry.kind = SymbolKind::Vartype;
            entry.vartype = base;
            entry.vartype_modifier = modifier;
        }
        sym
    }

    /// A classic array vartype with the given dimensions over `base`.
    pub fn vartype_with_array(&mut self, dims: &[u32], base: Vartype) -> Vartype {
        let dims_str = dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let name = format!("{}[{}]", self.name(base), dims_str);
        let sym = self.find_or_add(&name);
        if self[sym].kind == SymbolKind::NoType {
            let entry = &mut self[sym];
            entry.kind = SymbolKind::Vartype;
            entry.vartype = base;
            entry.vartype_modifier = VartypeModifier::Array;
            entry.dims = dims.to_vec();
        }
        sym
    }

    /// Strip `modifier` if it is the outermost one, else return `v` as is.
    pub fn vartype_without(&self, modifier: VartypeModifier, v: Vartype) -> Vartype {
        if self[v].vartype_modifier == modifier {
            self[v].vartype
        } else {
            v
        }
    }

    /// Strip all modifiers down to the atomic vartype.
    pub fn base_vartype(&self, v: Vartype) -> Vartype {
        let mut v = v;
        while self[v].vartype_modifier != VartypeModifier::Atomic {
            v = self[v].vartype;
        }
        v
    }

    // ==================== Vartype queries ====================

    pub fn is_vartype(&self, sym: Symbol) -> bool {
        matches!(
            self.kind(sym),
            SymbolKind::Vartype | SymbolKind::UndefinedStruct
        )
    }

    pub fn is_atomic(&self, v: Vartype) -> bool {
        self[v].vartype_modifier == VartypeModifier::Atomic
    }

    pub fn is_const_vartype(&self, v: Vartype) -> bool {
        self[v].vartype_modifier == VartypeModifier::Const
    }

    pub fn is_dynpointer_vartype(&self, v: Vartype) -> bool {
        self[v].vartype_modifier == VartypeModifier::Dynpointer
    }

    pub fn is_dynarray_vartype(&self, v: Vartype) -> bool {
        self[v].vartype_modifier == VartypeModifier::Dynarray
    }

    pub fn is_dyn_vartype(&self, v: Vartype) -> bool {
        self.is_dynpointer_vartype(v) || self.is_dynarray_vartype(v)
    }

    pub fn is_array_vartype(&self, v: Vartype) -> bool {
        self[v].vartype_modifier == VartypeModifier::Array
    }

    /// Whether the base-most vartype is a managed struct (pointers to it and
    /// dynarrays over it count as managed too).
    pub fn is_managed_vartype(&self, v: Vartype) -> bool {
        self[self.base_vartype(v)]
            .flags
            .contains(EntryFlags::STRUCT_MANAGED)
    }

    pub fn is_struct_vartype(&self, v: Vartype) -> bool {
        self[self.base_vartype(v)]
            .flags
            .contains(EntryFlags::STRUCT_VARTYPE)
    }

    pub fn is_builtin(&self, v: Vartype) -> bool {
        self[self.base_vartype(v)]
            .flags
            .contains(EntryFlags::STRUCT_BUILTIN)
    }

    pub fn is_any_integer_vartype(&self, v: Vartype) -> bool {
        let v = self.vartype_without(VartypeModifier::Const, v);
        v == predef::CHAR || v == predef::SHORT || v == predef::INT || v == predef::LONG
    }

    /// An old-style string buffer, const or not.
    pub fn is_oldstring(&self, v: Vartype) -> bool {
        self.vartype_without(VartypeModifier::Const, v) == predef::STRING
    }

    /// Old-style strings and pointers to the configured string struct.
    pub fn is_any_string_vartype(&self, v: Vartype) -> bool {
        if self.is_oldstring(v) {
            return true;
        }
        let v = self.vartype_without(VartypeModifier::Const, v);
        match self.string_struct {
            Some(ss) => self.is_dynpointer_vartype(v) && self[v].vartype == ss,
            None => false,
        }
    }

    /// Total element count of a classic-array vartype (or of a variable's
    /// array vartype when given a variable symbol's vartype).
    pub fn num_array_elements(&self, v: Vartype) -> u32 {
        self[v].dims.iter().product()
    }

    /// Byte size of a value of this vartype.
    pub fn get_size(&self, v: Vartype) -> u32 {
        match self[v].vartype_modifier {
            VartypeModifier::Atomic => self[v].size,
            VartypeModifier::Const => self.get_size(self[v].vartype),
            VartypeModifier::Dynpointer | VartypeModifier::Dynarray => SIZE_OF_DYNPOINTER,
            VartypeModifier::Array => self.num_array_elements(v) * self.get_size(self[v].vartype),
        }
    }

    /// Byte size of a declared variable or struct component.
    pub fn size_of_var(&self, sym: Symbol) -> u32 {
        self.get_size(self[sym].vartype)
    }

    /// Data components of a struct, ancestors first, ordered by offset.
    pub fn components_of_struct(&self, strct: Vartype) -> Vec<Symbol> {
        let mut chain = Vec::new();
        let mut cur = strct;
        while !cur.is_none() {
            chain.push(cur);
            cur = self[cur].parent;
        }
        let mut components: Vec<Symbol> = chain
            .into_iter()
            .rev()
            .flat_map(|s| self[s].children.iter().copied())
            .filter(|&c| self.kind(c) == SymbolKind::StructComponent)
            .collect();
        components.sort_by_key(|&c| self[c].offset);
        components
    }
}

impl std::ops::Index<Symbol> for SymbolTable {
    type Output = SymbolTableEntry;

    fn index(&self, sym: Symbol) -> &SymbolTableEntry {
        &self.entries[sym.index()]
    }
}

impl std::ops::IndexMut<Symbol> for SymbolTable {
    fn index_mut(&mut self, sym: Symbol) -> &mut SymbolTableEntry {
        &mut self.entries[sym.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed_struct(table: &mut SymbolTable, name: &str) -> Symbol {
        let sym = table.find_or_add(name);
        let entry = &mut table[sym];
        entry.kind = SymbolKind::Vartype;
        entry.flags = EntryFlags::STRUCT_VARTYPE | EntryFlags::STRUCT_MANAGED;
        entry.size = 8;
        sym
    }

    #[test]
    fn test_handle_stability() {
        let mut table = SymbolTable::new();
        let a = table.find_or_add("alpha");
        let b = table.find_or_add("beta");
        assert_eq!(table.find_or_add("alpha"), a);
        assert_eq!(table.find("beta"), Some(b));
        assert!(a > predef::LAST_PREDEFINED);
    }

    #[test]
    fn test_compound_vartype_queries() {
        let mut table = SymbolTable::new();
        let critter = managed_struct(&mut table, "Critter");
        let ptr = table.vartype_with(VartypeModifier::Dynpointer, critter);
        let arr = table.vartype_with(VartypeModifier::Dynarray, ptr);

        assert!(table.is_dynpointer_vartype(ptr));
        assert!(!table.is_dynpointer_vartype(arr));
        assert!(table.is_dynarray_vartype(arr));
        assert!(table.is_managed_vartype(ptr));
        assert!(table.is_struct_vartype(ptr));
        assert_eq!(table.base_vartype(arr), critter);
        assert_eq!(table.vartype_without(VartypeModifier::Dynpointer, ptr), critter);
        assert_eq!(table.vartype_without(VartypeModifier::Dynarray, ptr), ptr);
        assert_eq!(table.get_size(ptr), SIZE_OF_DYNPOINTER);
    }

    #[test]
    fn test_array_vartype_size() {
        let mut table = SymbolTable::new();
        let arr = table.vartype_with_array(&[3, 4], predef::INT);
        assert!(table.is_array_vartype(arr));
        assert_eq!(table.num_array_elements(arr), 12);
        assert_eq!(table.get_size(arr), 48);
        assert_eq!(table.name(arr), "int[3, 4]");
    }

    #[test]
    fn test_string_vartype_queries() {
        let mut table = SymbolTable::new();
        let const_string = table.vartype_with(VartypeModifier::Const, predef::STRING);
        assert!(table.is_oldstring(const_string));

        let ss = managed_struct(&mut table, "String");
        table.set_string_struct_sym(ss);
        let ss_ptr = table.string_struct_ptr().unwrap();
        assert!(table.is_any_string_vartype(ss_ptr));
        assert!(table.is_any_string_vartype(const_string));
        assert!(!table.is_any_string_vartype(predef::INT));
    }

    #[test]
    fn test_mangling() {
        let mut table = SymbolTable::new();
        let st = table.find_or_add("Critter");
        let comp = table.find_or_add("Health");
        let mangled = table.mangle(st, comp);
        assert_eq!(table.name(mangled), "Critter::Health");
        assert_eq!(table.mangle(st, comp), mangled);
    }
}
