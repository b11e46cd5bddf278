//! Forward-call resolution.
//!
//! Two [`FuncCallpointMgr`] instances run side by side: one resolves local
//! functions against code offsets, the other resolves imported functions
//! against import ordinals. Call sites of not-yet-defined functions are
//! queued as patches; defining the function patches every queued live-stream
//! site. Patches inside a yanked chunk are re-keyed to the chunk and
//! translated back each time the chunk replays.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::emitter::CompiledScript;
use crate::nesting::{ChunkId, CODE_BASE_ID};
use crate::symbols::Symbol;
use questscript_bytecode::{CodeCell, CodeLoc};

#[derive(Debug, Clone, Copy)]
struct PatchInfo {
    chunk_id: ChunkId,
    /// Cell to patch; absolute for live-stream entries, chunk-relative
    /// otherwise.
    offset: CodeLoc,
    /// Token-stream position of the call, for the unresolved-call error.
    in_source: usize,
}

#[derive(Debug, Default)]
struct CallpointInfo {
    callpoint: Option<CodeCell>,
    patches: Vec<PatchInfo>,
}

/// Tracks call sites per function until its callpoint is known.
#[derive(Debug, Default)]
pub struct FuncCallpointMgr {
    map: HashMap<Symbol, CallpointInfo>,
}

impl FuncCallpointMgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.map.clear();
    }

    /// Whether calls to `func` still need a callpoint.
    pub fn is_forward_decl(&self, func: Symbol) -> bool {
        self.map.get(&func).map_or(true, |ci| ci.callpoint.is_none())
    }

    /// Note a call to `func` whose operand cell is at `loc`. Patches the
    /// cell right away when the callpoint is already known.
    pub fn track_forward_decl_call(
        &mut self,
        scrip: &mut CompiledScript,
        func: Symbol,
        loc: CodeLoc,
        in_source: usize,
    ) {
        let info = self.map.entry(func).or_default();
        if let Some(callpoint) = info.callpoint {
            scrip.code[loc as usize] = callpoint;
            return;
        }
        info.patches.push(PatchInfo {
            chunk_id: CODE_BASE_ID,
            offset: loc,
            in_source,
        });
    }

    /// Resolve `func`; patch and drop every queued live-stream entry.
    /// Chunk-resident entries stay: their chunks may replay again.
    pub fn set_func_callpoint(&mut self, scrip: &mut CompiledScript, func: Symbol, dest: CodeCell) {
        let info = self.map.entry(func).or_default();
        info.callpoint = Some(dest);
        info.patches.retain(|patch| {
            if patch.chunk_id == CODE_BASE_ID {
                scrip.code[patch.offset as usize] = dest;
                false
            } else {
                true
            }
        });
    }

    /// A chunk `[chunk_start, chunk_start + chunk_len)` was yanked: re-key
    /// every live-stream patch inside it to the chunk, offset made relative.
    pub fn update_call_list_on_yanking(
        &mut self,
        chunk_start: CodeLoc,
        chunk_len: usize,
        id: ChunkId,
    ) {
        let chunk_end = chunk_start + chunk_len as CodeLoc;
        for info in self.map.values_mut() {
            for patch in &mut info.patches {
                if patch.chunk_id != CODE_BASE_ID {
                    continue;
                }
                if patch.offset < chunk_start || patch.offset >= chunk_end {
                    continue;
                }
                patch.chunk_id = id;
                patch.offset -= chunk_start;
            }
        }
    }

    /// Chunk `id` was replayed at `start`: append a live-stream patch per
    /// chunk-tagged entry. The chunk entry itself stays since the same
    /// chunk can replay multiple times.
    pub fn update_call_list_on_writing(&mut self, start: CodeLoc, id: ChunkId) {
        for info in self.map.values_mut() {
            let mut appended = Vec::new();
            for patch in &info.patches {
                if patch.chunk_id != id {
                    continue;
                }
                appended.push(PatchInfo {
                    chunk_id: CODE_BASE_ID,
                    offset: patch.offset + start,
                    in_source: patch.in_source,
                });
            }
            info.patches.extend(appended);
        }
    }

    /// Any remaining live-stream patch is a call to a function that never
    /// got a body nor an import. Returns the function and the source
    /// position of the offending call.
    pub fn first_unresolved(&self) -> Option<(Symbol, usize)> {
        for (&func, info) in &self.map {
            for patch in &info.patches {
                if patch.chunk_id == CODE_BASE_ID {
                    return Some((func, patch.in_source));
                }
            }
        }
        None
    }
}

/// Deduplicated view over the script's import table.
#[derive(Debug, Default)]
pub struct ImportMgr {
    index: IndexMap<String, usize>,
}

impl ImportMgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, scrip: &CompiledScript) {
        self.index.clear();
        for (idx, name) in scrip.imports.iter().enumerate() {
            self.index.insert(name.clone(), idx);
        }
    }

    pub fn is_declared_import(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn find_or_add(&mut self, scrip: &mut CompiledScript, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = scrip.add_new_import(name);
        self.index.insert(name.to_string(), idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questscript_bytecode::{Opcode, Register};

    fn call_site(scrip: &mut CompiledScript) -> CodeLoc {
        scrip.refresh_lineno(1);
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), -77);
        scrip.codesize() - 1
    }

    #[test]
    fn test_patch_list_completeness() {
        let mut scrip = CompiledScript::new();
        let mut fcm = FuncCallpointMgr::new();
        let func = Symbol(200);

        let site1 = call_site(&mut scrip);
        fcm.track_forward_decl_call(&mut scrip, func, site1, 4);
        let site2 = call_site(&mut scrip);
        fcm.track_forward_decl_call(&mut scrip, func, site2, 9);
        assert!(fcm.is_forward_decl(func));

        fcm.set_func_callpoint(&mut scrip, func, 64);
        assert_eq!(scrip.code[site1 as usize], 64);
        assert_eq!(scrip.code[site2 as usize], 64);
        assert_eq!(fcm.first_unresolved(), None);

        // later call sites are patched immediately
        let site3 = call_site(&mut scrip);
        fcm.track_forward_decl_call(&mut scrip, func, site3, 12);
        assert_eq!(scrip.code[site3 as usize], 64);
    }

    #[test]
    fn test_yank_rekeys_and_write_translates_back() {
        let mut scrip = CompiledScript::new();
        let mut fcm = FuncCallpointMgr::new();
        let func = Symbol(201);

        let site = call_site(&mut scrip);
        fcm.track_forward_decl_call(&mut scrip, func, site, 2);

        // pretend the whole stream was yanked as chunk 1
        let chunk_len = scrip.codesize() as usize;
        fcm.update_call_list_on_yanking(0, chunk_len, 1);
        // patching now must leave the chunk entry alone
        fcm.set_func_callpoint(&mut scrip, func, 33);

        // replaying the chunk at 40 (and at 80) creates live entries
        fcm.update_call_list_on_writing(40, 1);
        fcm.update_call_list_on_writing(80, 1);
        let unresolved = fcm.first_unresolved();
        assert!(unresolved.is_some(), "replayed entries are live again");
    }

    #[test]
    fn test_unresolved_reports_call_position() {
        let mut scrip = CompiledScript::new();
        let mut fcm = FuncCallpointMgr::new();
        let func = Symbol(202);
        let site = call_site(&mut scrip);
        fcm.track_forward_decl_call(&mut scrip, func, site, 17);
        assert_eq!(fcm.first_unresolved(), Some((func, 17)));
    }

    #[test]
    fn test_import_mgr_dedups() {
        let mut scrip = CompiledScript::new();
        let mut imports = ImportMgr::new();
        let a = imports.find_or_add(&mut scrip, "GetTime");
        let b = imports.find_or_add(&mut scrip, "Display");
        let a2 = imports.find_or_add(&mut scrip, "GetTime");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(scrip.imports, vec!["GetTime".to_string(), "Display".to_string()]);
        assert!(imports.is_declared_import("Display"));
    }
}
