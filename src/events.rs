//! Listener tables and restart/broadcast semantics.
//!
//! Event handler opcodes encode their trigger and consume their
//! operands at script-load time; the loader (`host.rs`) walks each
//! script's entry instruction and registers the resulting script id
//! here. Everything in this module only touches the listener tables
//! and the script table — sprite-level side effects a dispatch implies
//! (stopping every script, deleting clones, hit-testing for a click)
//! are driven from `Vm::update`, which has both the sprite table and
//! this one in scope.

use hashbrown::HashMap;

use crate::scheduler::{ScriptId, ScriptTable};
use crate::script::ScriptState;
use crate::sprite::SpriteHandle;

/// "Any key" listeners register under this synthetic scancode as well
/// as their own table: an any-key listener additionally restarts for
/// every key press, not just one scancode.
const ANY_KEY: i32 = -1;

#[derive(Default)]
pub struct EventTables {
    flag: Vec<ScriptId>,
    key: HashMap<i32, Vec<ScriptId>>,
    message: HashMap<String, Vec<ScriptId>>,
    backdrop: HashMap<String, Vec<ScriptId>>,
    click: HashMap<SpriteHandle, Vec<ScriptId>>,
    clone_entry: HashMap<SpriteHandle, Vec<ScriptId>>,
}

impl EventTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_flag(&mut self, id: ScriptId) {
        self.flag.push(id);
    }

    /// `scancode == None` registers an "any key" listener.
    pub fn register_key(&mut self, scancode: Option<i32>, id: ScriptId) {
        let key = scancode.unwrap_or(ANY_KEY);
        self.key.entry(key).or_default().push(id);
    }

    pub fn register_message(&mut self, name: &str, id: ScriptId) {
        self.message.entry(name.to_string()).or_default().push(id);
    }

    pub fn register_backdrop_switch(&mut self, name: &str, id: ScriptId) {
        self.backdrop.entry(name.to_string()).or_default().push(id);
    }

    pub fn register_click(&mut self, sprite: SpriteHandle, ids: Vec<ScriptId>) {
        self.click.insert(sprite, ids);
    }

    pub fn register_clone_entry(&mut self, sprite: SpriteHandle, ids: Vec<ScriptId>) {
        self.clone_entry.insert(sprite, ids);
    }

    /// Drops a deleted instance's per-instance listener entries (clones
    /// and the base on sprite teardown never dispatch again).
    pub fn forget_instance(&mut self, sprite: SpriteHandle) {
        self.click.remove(&sprite);
        self.clone_entry.remove(&sprite);
    }

    pub fn flag_listeners(&self) -> &[ScriptId] {
        &self.flag
    }

    /// Listeners for `scancode`, plus every "any key" listener.
    pub fn key_listeners(&self, scancode: i32) -> impl Iterator<Item = ScriptId> {
        let mut ids: Vec<ScriptId> =
            self.key.get(&scancode).cloned().unwrap_or_default();
        if scancode != ANY_KEY {
            if let Some(any) = self.key.get(&ANY_KEY) {
                ids.extend_from_slice(any);
            }
        }
        ids.into_iter()
    }

    pub fn message_listeners(&self, name: &str) -> &[ScriptId] {
        self.message.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn backdrop_switch_listeners(&self, name: &str) -> &[ScriptId] {
        self.backdrop.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn click_listeners(&self, sprite: SpriteHandle) -> &[ScriptId] {
        self.click.get(&sprite).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clone_entry_listeners(&self, sprite: SpriteHandle) -> &[ScriptId] {
        self.clone_entry.get(&sprite).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Restarts every script in `ids`: a currently
/// RUNNING script restarts in-place (the `restart` flag is observed by
/// the interpreter's own dispatch loop on its next instruction); any
/// other state transitions straight to RUNNABLE with an emptied stack.
/// Clearing the scheduled flag lets a script restarted mid-tick still
/// run again this tick, matching broadcast's "`nextScript` is reset".
pub fn restart_listeners(ids: impl IntoIterator<Item = ScriptId>, table: &mut ScriptTable) {
    for id in ids {
        if matches!(table.get(id).state, ScriptState::Running) {
            table.restart(id);
        } else {
            table.get_mut(id).rewind_for_restart();
        }
        table.set_scheduled(id, false);
    }
}

/// Tracks a `sendandwait` broadcast's in-flight handlers.
pub struct BroadcastWait {
    pending: Vec<ScriptId>,
}

impl BroadcastWait {
    pub fn new(ids: impl IntoIterator<Item = ScriptId>) -> Self {
        BroadcastWait { pending: ids.into_iter().collect() }
    }

    /// True once every handler it started has left RUNNABLE/RUNNING/WAITING.
    pub fn is_done(&self, table: &ScriptTable) -> bool {
        self.pending.iter().all(|&id| {
            !matches!(
                table.get(id).state,
                ScriptState::Runnable | ScriptState::Running | ScriptState::Waiting
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ScriptAllocInfo;

    fn info() -> ScriptAllocInfo {
        ScriptAllocInfo { sprite: 0, instance: 1, entry_pc: 0x20, auto_start: false }
    }

    #[test]
    fn any_key_listener_fires_for_every_scancode() {
        let mut events = EventTables::new();
        events.register_key(None, 7);
        events.register_key(Some(65), 9);
        let for_a: Vec<_> = events.key_listeners(65).collect();
        assert!(for_a.contains(&9));
        assert!(for_a.contains(&7));
        let for_b: Vec<_> = events.key_listeners(66).collect();
        assert_eq!(for_b, vec![7]);
    }

    #[test]
    fn message_listeners_are_scoped_by_name() {
        let mut events = EventTables::new();
        events.register_message("go", 1);
        events.register_message("stop", 2);
        assert_eq!(events.message_listeners("go"), &[1]);
        assert_eq!(events.message_listeners("stop"), &[2]);
        assert!(events.message_listeners("nope").is_empty());
    }

    #[test]
    fn backdrop_switch_listeners_are_scoped_by_name() {
        let mut events = EventTables::new();
        events.register_backdrop_switch("night", 1);
        events.register_backdrop_switch("day", 2);
        assert_eq!(events.backdrop_switch_listeners("night"), &[1]);
        assert_eq!(events.backdrop_switch_listeners("day"), &[2]);
        assert!(events.backdrop_switch_listeners("nope").is_empty());
    }

    #[test]
    fn forget_instance_drops_click_and_clone_entries() {
        let mut events = EventTables::new();
        let h = SpriteHandle::new(0, 2);
        events.register_click(h, vec![3]);
        events.register_clone_entry(h, vec![4]);
        events.forget_instance(h);
        assert!(events.click_listeners(h).is_empty());
        assert!(events.clone_entry_listeners(h).is_empty());
    }

    #[test]
    fn restart_listeners_clears_scheduled_and_sets_runnable() {
        let mut table = ScriptTable::new();
        let id = table.alloc(info()).unwrap();
        table.set_scheduled(id, true);
        table.terminate(id);
        restart_listeners([id], &mut table);
        assert!(matches!(table.get(id).state, ScriptState::Runnable));
        assert!(!table.is_scheduled(id));
    }

    #[test]
    fn broadcast_wait_completes_once_all_pending_leave_active_states() {
        let mut table = ScriptTable::new();
        let id = table.alloc(info()).unwrap();
        restart_listeners([id], &mut table);
        let wait = BroadcastWait::new([id]);
        assert!(!wait.is_done(&table));
        table.terminate(id);
        assert!(wait.is_done(&table));
    }
}
