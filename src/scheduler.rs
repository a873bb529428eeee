//! The script table: a fixed-capacity pool of `Script` fibers plus the
//! allocate/restart/terminate operations the scheduler and event
//! dispatch drive them through.
//!
//! The round-robin tick loop itself lives in `Vm::update` (`host.rs`),
//! since each step needs the sprite table, event tables, and
//! interpreter together — exactly the shape the reference engine's
//! `VirtualMachine::Update` has, just with that state passed
//! explicitly instead of read off a global `VM` pointer.

use log::debug;

use crate::error::VmPanic;
use crate::limits::MAX_SCRIPTS;
use crate::script::{Script, ScriptState};

/// Index into the script table. `Vm::update` holds "the currently
/// running script" as one of these rather than a `&mut Script`, so it
/// can still reach the rest of the VM while running it.
pub type ScriptId = u32;

/// What a script slot was allocated for: which sprite, which `.text`
/// entry point, and whether the scheduler should start it on its own
/// at load time (event-trigger scripts) rather than wait for a
/// dispatch to restart it.
#[derive(Debug, Clone, Copy)]
pub struct ScriptAllocInfo {
    pub sprite: u32,
    pub instance: u32,
    pub entry_pc: u64,
    pub auto_start: bool,
}

pub struct ScriptTable {
    scripts: Vec<Script>,
    auto_start: Vec<bool>,
    scheduled: Vec<bool>,
    last_allocated: usize,
}

impl ScriptTable {
    pub fn new() -> Self {
        ScriptTable {
            scripts: Vec::new(),
            auto_start: Vec::new(),
            scheduled: Vec::new(),
            last_allocated: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.last_allocated
    }

    pub fn get(&self, id: ScriptId) -> &Script {
        &self.scripts[id as usize]
    }

    pub fn get_mut(&mut self, id: ScriptId) -> &mut Script {
        &mut self.scripts[id as usize]
    }

    pub fn is_auto_start(&self, id: ScriptId) -> bool {
        self.auto_start[id as usize]
    }

    pub fn is_scheduled(&self, id: ScriptId) -> bool {
        self.scheduled[id as usize]
    }

    pub fn set_scheduled(&mut self, id: ScriptId, v: bool) {
        self.scheduled[id as usize] = v;
    }

    pub fn clear_scheduled_flags(&mut self) {
        for flag in self.scheduled.iter_mut() {
            *flag = false;
        }
    }

    /// Allocated script ids in slot order, the iteration order the
    /// tick loop visits them in.
    pub fn ids(&self) -> impl Iterator<Item = ScriptId> {
        0..self.last_allocated as u32
    }

    fn grow_to(&mut self, id: usize) {
        while self.scripts.len() <= id {
            self.scripts.push(Script::new(0));
            self.auto_start.push(false);
            self.scheduled.push(false);
        }
    }

    /// Allocates a fresh slot for `info`, matching the reference
    /// engine's `AllocScript`: reuse a reclaimed slot if one exists
    /// before growing the table, capped the same way instance allocation
    /// is capped.
    pub fn alloc(&mut self, info: ScriptAllocInfo) -> Result<ScriptId, VmPanic> {
        for id in 0..self.last_allocated {
            if matches!(self.scripts[id].state, ScriptState::Embryo) {
                self.scripts[id].activate(info.sprite, info.instance, info.entry_pc);
                self.auto_start[id] = info.auto_start;
                self.scheduled[id] = false;
                debug!("allocated script {id} at entry {:#x} (reused slot)", info.entry_pc);
                return Ok(id as ScriptId);
            }
        }

        let id = self.last_allocated;
        if id >= MAX_SCRIPTS {
            return Err(VmPanic::TooManyScripts { capacity: MAX_SCRIPTS });
        }
        self.grow_to(id);

        self.scripts[id].activate(info.sprite, info.instance, info.entry_pc);
        self.auto_start[id] = info.auto_start;
        self.scheduled[id] = false;
        self.last_allocated += 1;

        debug!("allocated script {id} at entry {:#x}", info.entry_pc);
        Ok(id as ScriptId)
    }

    /// Reclaims a terminated script's slot (reference engine's
    /// `FreeScript`).
    pub fn free(&mut self, id: ScriptId) {
        let idx = id as usize;
        self.scripts[idx].reset_stack();
        self.scripts[idx].state = ScriptState::Embryo;

        while self.last_allocated > 0
            && matches!(self.scripts[self.last_allocated - 1].state, ScriptState::Embryo)
        {
            self.last_allocated -= 1;
        }
    }

    /// Marks a script for restart. If it is the currently running
    /// script, the caller (the interpreter's opcode loop) observes
    /// `restart` and unwinds to the top of its own dispatch loop rather
    /// than through a real `longjmp`.
    pub fn restart(&mut self, id: ScriptId) {
        let script = &mut self.scripts[id as usize];
        script.restart = true;
        script.state = ScriptState::Runnable;
    }

    /// Marks a script terminated. Does not reclaim its slot — slots
    /// are reclaimed explicitly by `free` once nothing still
    /// references the script (e.g. after a sprite/clone teardown).
    pub fn terminate(&mut self, id: ScriptId) {
        let script = &mut self.scripts[id as usize];
        if matches!(script.state, ScriptState::Terminated) {
            return;
        }
        script.state = ScriptState::Terminated;
    }

    /// `stopall`/`stopother`: terminates every script
    /// matching `predicate`, except `except`.
    pub fn terminate_where(&mut self, except: ScriptId, predicate: impl Fn(&Script) -> bool) {
        for id in 0..self.last_allocated as u32 {
            if id == except {
                continue;
            }
            if predicate(&self.scripts[id as usize]) {
                self.terminate(id);
            }
        }
    }

    /// Step 3's per-script state advance, ahead of actually running the
    /// script: suspended auto-start scripts become
    /// runnable, terminated auto-start scripts restart, waiting scripts
    /// check their wake condition via `wake_cleared`.
    pub fn advance_state(&mut self, id: ScriptId, wake_cleared: impl FnOnce(&Script) -> bool) {
        let auto_start = self.auto_start[id as usize];
        let script = &mut self.scripts[id as usize];
        match script.state {
            ScriptState::Embryo => {}
            ScriptState::Suspended if auto_start => {
                script.state = ScriptState::Runnable;
            }
            ScriptState::Terminated if auto_start => {
                script.rewind_for_restart();
            }
            ScriptState::Waiting => {
                if wake_cleared(script) {
                    script.wake = None;
                    script.state = ScriptState::Runnable;
                }
            }
            _ => {}
        }
    }
}

impl Default for ScriptTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ScriptAllocInfo {
        ScriptAllocInfo { sprite: 0, instance: 1, entry_pc: 0x10, auto_start: false }
    }

    #[test]
    fn alloc_reuses_freed_slot() {
        let mut table = ScriptTable::new();
        let a = table.alloc(info()).unwrap();
        table.free(a);
        let b = table.alloc(info()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhausting_the_table_is_a_panic() {
        let mut table = ScriptTable::new();
        for _ in 0..MAX_SCRIPTS {
            table.alloc(info()).unwrap();
        }
        assert!(table.alloc(info()).is_err());
    }

    #[test]
    fn restart_sets_runnable_and_flag() {
        let mut table = ScriptTable::new();
        let id = table.alloc(info()).unwrap();
        table.terminate(id);
        table.restart(id);
        assert!(matches!(table.get(id).state, ScriptState::Runnable));
        assert!(table.get(id).restart);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut table = ScriptTable::new();
        let id = table.alloc(info()).unwrap();
        table.terminate(id);
        table.terminate(id);
        assert!(matches!(table.get(id).state, ScriptState::Terminated));
    }
}
