//! Compiler for QuestScript, a statically-typed C-like scripting language
//! for interactive game logic.
//!
//! The compiler is single-threaded and synchronous. It scans source text
//! into a stream of interned symbols, then parses that stream twice: a
//! PreAnalyze phase collects function headers and import visibility, and
//! the Main phase emits bytecode for a stack-based VM together with the
//! fixup, import, export, function, string and global-data tables that the
//! linker consumes. The first error ends the compile.
//!
//! # Usage
//!
//! ```
//! use questscript_compiler::{compile, CompilerOptions, MessageHandler};
//!
//! let mut msgs = MessageHandler::new();
//! let script = compile(
//!     "int Double(int x) { return x + x; }",
//!     CompilerOptions::default(),
//!     &mut msgs,
//! )
//! .expect("compile failed");
//! assert_eq!(script.functions[0].name, "Double");
//! ```

pub mod callpoints;
pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod jumps;
pub mod nesting;
pub mod parser;
pub mod scanner;
pub mod source;
pub mod symbols;

pub use diagnostics::{Diagnostic, MessageHandler, Severity};
pub use emitter::{CompiledScript, ExportEntry, Fixup, FunctionEntry, ScopeType};
pub use error::{CompileError, CompileResult, ErrorKind};
pub use parser::Parser;
pub use source::{SrcList, TokenData};
pub use symbols::{Symbol, SymbolTable};

/// Compiler option bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerOptions {
    /// Reject `import` declarations that a local definition overrides.
    pub no_import_override: bool,
    /// Accept old-style `string` buffers.
    pub old_strings: bool,
    /// All functions get exported at link time anyway, so explicit
    /// function exports are skipped.
    pub export_all: bool,
}

/// Parse a pre-tokenized stream into `scrip`.
///
/// The symbol table must be the one the scanner populated (or an
/// equivalently prepared one: predefined handles plus interned
/// identifiers and literals).
pub fn parse(
    src: SrcList<'_>,
    sym: &mut SymbolTable,
    scrip: &mut CompiledScript,
    options: CompilerOptions,
    msgs: &mut MessageHandler,
) -> CompileResult<()> {
    let mut parser = Parser::new(src, sym, scrip, msgs, options);
    parser.parse()
}

/// Scan and parse one unnamed section of source text.
///
/// On failure the error is also recorded in `msgs`, after any warnings
/// that were produced before it.
pub fn compile(
    source: &str,
    options: CompilerOptions,
    msgs: &mut MessageHandler,
) -> CompileResult<CompiledScript> {
    let mut scrip = CompiledScript::new();
    let mut sym = SymbolTable::new();
    let mut data = TokenData::new();

    match scan_and_parse(source, options, &mut data, &mut sym, &mut scrip, msgs) {
        Ok(()) => Ok(scrip),
        Err(err) => {
            msgs.add_error(&err);
            Err(err)
        }
    }
}

fn scan_and_parse(
    source: &str,
    options: CompilerOptions,
    data: &mut TokenData,
    sym: &mut SymbolTable,
    scrip: &mut CompiledScript,
    msgs: &mut MessageHandler,
) -> CompileResult<()> {
    scanner::scan(source, "UnnamedSection", data, sym, scrip)?;
    parse(SrcList::whole(data), sym, scrip, options, msgs)
}
